//! # Scalelink Core Library
//!
//! Reads weights from a serial weighing scale.
//!
//! This library provides:
//! - Serial transport with port discovery and automatic reconnect
//! - Chunk-independent frame decoding (terminator or fixed length)
//! - Configurable record parsing with optional checksum trailers
//! - Stability filtering with heartbeat re-publication
//! - Connection health reporting (`Connected` / `Degraded` / ...)
//! - A simulated scale for running without hardware
//!
//! ## Example
//!
//! ```rust,ignore
//! use scalelink_core::prelude::*;
//!
//! let engine = ScaleEngine::new();
//! engine.start(ScaleConfig::for_port("/dev/ttyS0"))?;
//!
//! let mut feed = engine.subscribe();
//! while let Some(weight) = feed.next().await {
//!     println!("#{} {}", weight.sequence, weight.reading);
//! }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod checksum;
pub mod config;
pub mod engine;
pub mod error;
pub mod frame;
pub mod parser;
pub mod probe;
pub mod reading;
pub mod simulator;
pub mod stability;
pub mod supervisor;
pub mod trace;
pub mod transport;

pub use config::ScaleConfig;
pub use engine::{ScaleEngine, Subscription};
pub use error::{
    ConfigError, ConnectionError, EngineError, FramingError, NotAvailable, ParseError,
    TransportError,
};
pub use reading::{StableWeight, WeightReading, WeightUnit};
pub use supervisor::{ConnectionState, HealthSnapshot};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::checksum::ChecksumKind;
    pub use crate::config::{FramingConfig, RecordLayout, ScaleConfig, SerialConfig};
    pub use crate::engine::{ScaleEngine, Subscription};
    pub use crate::error::{ConnectionError, EngineError, NotAvailable};
    pub use crate::frame::{FrameDecoder, RawFrame};
    pub use crate::parser::WeightParser;
    pub use crate::probe::{probe_port, ProbeResult};
    pub use crate::reading::{StabilitySource, StableWeight, WeightReading, WeightUnit};
    pub use crate::simulator::SimulatedConnector;
    pub use crate::stability::StabilityFilter;
    pub use crate::supervisor::{ConnectionState, HealthSnapshot};
    pub use crate::transport::{list_ports, Connector, PortInfo, Transport};
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
