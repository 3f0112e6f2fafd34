//! Simulated scale
//!
//! Generates a realistic byte stream without hardware: the platform sits
//! empty, a load of 0.5 to 5.5 kg is placed and wobbles while settling, holds
//! steady, then is removed. Frames are rendered in the configured record
//! layout, checksum and terminator, so the whole pipeline runs unchanged.
//!
//! Any bytes written to the simulator act as a tare command.

use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::checksum::ChecksumKind;
use crate::config::{FrameMode, RecordLayout, ScaleConfig, SerialConfig};
use crate::error::{ConnectionError, TransportError};
use crate::reading::WeightUnit;
use crate::transport::{Connector, Transport};

/// Default time between simulated transmissions
pub const DEFAULT_FRAME_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq)]
enum Phase {
    Empty { remaining: u32 },
    Loading { remaining: u32 },
    Settled { remaining: u32 },
    Unloading { remaining: u32 },
}

/// Transport producing synthetic scale frames
pub struct SimulatedScale {
    layout: RecordLayout,
    checksum: ChecksumKind,
    unit: WeightUnit,
    terminator: Vec<u8>,
    interval: Duration,
    next_frame_at: Instant,
    phase: Phase,
    /// True load on the platform in kilograms
    load_kg: f64,
    target_kg: f64,
    tare_kg: f64,
    rng: StdRng,
    closed: bool,
}

impl SimulatedScale {
    /// Simulator matching `config`'s format; fixed-length framing is not supported
    pub fn new(config: &ScaleConfig) -> Result<Self, ConnectionError> {
        Self::with_rng(config, StdRng::from_entropy())
    }

    /// Deterministic simulator for tests
    pub fn seeded(config: &ScaleConfig, seed: u64) -> Result<Self, ConnectionError> {
        Self::with_rng(config, StdRng::seed_from_u64(seed))
    }

    fn with_rng(config: &ScaleConfig, mut rng: StdRng) -> Result<Self, ConnectionError> {
        let terminator = match config.framing.mode() {
            FrameMode::Terminator(terminator) => terminator,
            FrameMode::FixedLength { .. } => {
                return Err(ConnectionError::InvalidConfig(
                    "simulator requires terminator framing".to_string(),
                ))
            }
        };
        let first_idle = rng.gen_range(10..20);
        Ok(Self {
            layout: config.format.layout,
            checksum: config.format.checksum,
            unit: config.format.default_unit,
            terminator,
            interval: DEFAULT_FRAME_INTERVAL,
            next_frame_at: Instant::now(),
            phase: Phase::Empty {
                remaining: first_idle,
            },
            load_kg: 0.0,
            target_kg: 0.0,
            tare_kg: 0.0,
            rng,
            closed: false,
        })
    }

    /// Change the time between transmissions
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Advance one transmission and render it
    pub fn next_frame(&mut self) -> Vec<u8> {
        let stable = self.step();
        let shown_kg = self.load_kg - self.tare_kg;
        let payload = self.render(shown_kg, stable);
        let mut frame = self.checksum.append(payload.as_bytes());
        frame.extend_from_slice(&self.terminator);
        frame
    }

    /// Update the phase machine; returns whether the platform is steady
    fn step(&mut self) -> bool {
        let (next, stable) = match self.phase {
            Phase::Empty { remaining: 0 } => {
                self.target_kg = self.rng.gen_range(0.5..5.5);
                let ticks = self.rng.gen_range(5..10);
                (Phase::Loading { remaining: ticks }, false)
            }
            Phase::Empty { remaining } => {
                self.load_kg = 0.0;
                (Phase::Empty { remaining: remaining - 1 }, true)
            }
            Phase::Loading { remaining: 0 } => {
                self.load_kg = self.target_kg;
                let ticks = self.rng.gen_range(20..40);
                (Phase::Settled { remaining: ticks }, true)
            }
            Phase::Loading { remaining } => {
                let wobble = self.rng.gen_range(-0.05..0.05);
                self.load_kg += (self.target_kg - self.load_kg) * 0.4 + wobble;
                (Phase::Loading { remaining: remaining - 1 }, false)
            }
            Phase::Settled { remaining: 0 } => {
                let ticks = self.rng.gen_range(3..6);
                (Phase::Unloading { remaining: ticks }, false)
            }
            Phase::Settled { remaining } => {
                // Below display resolution
                self.load_kg = self.target_kg + self.rng.gen_range(-0.001..0.001);
                (Phase::Settled { remaining: remaining - 1 }, true)
            }
            Phase::Unloading { remaining: 0 } => {
                self.load_kg = 0.0;
                let ticks = self.rng.gen_range(10..20);
                (Phase::Empty { remaining: ticks }, true)
            }
            Phase::Unloading { remaining } => {
                self.load_kg *= 0.5;
                (Phase::Unloading { remaining: remaining - 1 }, false)
            }
        };
        self.phase = next;
        stable
    }

    fn render(&self, kg: f64, stable: bool) -> String {
        let value = match self.unit {
            WeightUnit::Kilogram => kg,
            WeightUnit::Gram => crate::reading::kilograms_to_grams(kg),
        };
        match self.layout {
            RecordLayout::StatusPrefix => {
                let status = if stable { 'F' } else { 'D' };
                format!("{status}{value:07.2}")
            }
            RecordLayout::Signed => {
                let sign = if value < 0.0 { '-' } else { '+' };
                let marker = if stable { 'S' } else { 'U' };
                format!("{sign}{:07.2}{},{marker}", value.abs(), self.unit.symbol())
            }
        }
    }
}

impl Transport for SimulatedScale {
    fn read(&mut self, timeout: Duration) -> Result<Vec<u8>, TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        let now = Instant::now();
        let deadline = now + timeout;
        if self.next_frame_at > deadline {
            std::thread::sleep(timeout);
            return Err(TransportError::Timeout);
        }
        if self.next_frame_at > now {
            std::thread::sleep(self.next_frame_at - now);
        }
        self.next_frame_at = self.next_frame_at.max(now) + self.interval;
        Ok(self.next_frame())
    }

    fn write(&mut self, _bytes: &[u8]) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        self.tare_kg = self.load_kg;
        tracing::debug!(tare_kg = self.tare_kg, "simulated scale tared");
        Ok(())
    }

    fn close(&mut self) {
        self.closed = true;
    }

    fn describe(&self) -> String {
        "simulator".to_string()
    }
}

/// Connector that opens a fresh [`SimulatedScale`] each time
#[derive(Debug, Clone)]
pub struct SimulatedConnector {
    config: ScaleConfig,
    interval: Duration,
}

impl SimulatedConnector {
    pub fn new(config: &ScaleConfig) -> Self {
        Self {
            config: config.clone(),
            interval: DEFAULT_FRAME_INTERVAL,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }
}

impl Connector for SimulatedConnector {
    fn open(&mut self, serial: &SerialConfig) -> Result<Box<dyn Transport>, ConnectionError> {
        let mut config = self.config.clone();
        config.serial = serial.clone();
        let scale = SimulatedScale::new(&config)?.with_interval(self.interval);
        tracing::info!(port = %serial.port, "simulated scale connected");
        Ok(Box::new(scale))
    }
}
