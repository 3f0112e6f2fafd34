//! Weight value types
//!
//! Readings are small immutable values passed by copy through the pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Grams per kilogram
const GRAMS_PER_KG: f64 = 1000.0;

/// Convert grams to kilograms
pub fn grams_to_kilograms(grams: f64) -> f64 {
    grams / GRAMS_PER_KG
}

/// Convert kilograms to grams
pub fn kilograms_to_grams(kg: f64) -> f64 {
    kg * GRAMS_PER_KG
}

/// Unit a scale reports its weight in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum WeightUnit {
    #[default]
    Kilogram,
    Gram,
}

impl WeightUnit {
    /// Look up a unit code as sent by the device (case-insensitive)
    pub fn from_code(code: &str) -> Option<Self> {
        if code.eq_ignore_ascii_case("kg") {
            Some(Self::Kilogram)
        } else if code.eq_ignore_ascii_case("g") {
            Some(Self::Gram)
        } else {
            None
        }
    }

    /// Short symbol
    pub fn symbol(&self) -> &'static str {
        match self {
            Self::Kilogram => "kg",
            Self::Gram => "g",
        }
    }

    /// Convert a value in this unit to kilograms
    pub fn to_kilograms(&self, value: f64) -> f64 {
        match self {
            Self::Kilogram => value,
            Self::Gram => grams_to_kilograms(value),
        }
    }
}

impl fmt::Display for WeightUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// Where a reading's stability flag came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StabilitySource {
    /// The frame carried a stability marker
    Device,
    /// No marker in the frame; the stability filter decides
    Inferred,
}

/// A single decoded weight sample
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WeightReading {
    /// Weight as reported, in `unit`
    pub value: f64,
    pub unit: WeightUnit,
    /// Device says the load has settled (or the filter inferred it)
    pub stable: bool,
    pub source: StabilitySource,
    /// When the frame carrying this reading was completed
    pub timestamp: DateTime<Utc>,
}

impl WeightReading {
    /// Weight normalized to kilograms
    pub fn kilograms(&self) -> f64 {
        self.unit.to_kilograms(self.value)
    }

    /// Whether the device itself reported a stability flag
    pub fn has_device_flag(&self) -> bool {
        self.source == StabilitySource::Device
    }
}

impl fmt::Display for WeightReading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:.3} {}{}",
            self.value,
            self.unit,
            if self.stable { "" } else { " ~" }
        )
    }
}

/// A settled reading published to consumers
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StableWeight {
    pub reading: WeightReading,
    /// Strictly increasing across every publication, heartbeats included
    pub sequence: u64,
    /// Re-publication of an unchanged value after the heartbeat interval
    pub heartbeat: bool,
}

impl StableWeight {
    /// Weight in kilograms
    pub fn kilograms(&self) -> f64 {
        self.reading.kilograms()
    }
}
