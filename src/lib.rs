//! # Air-Quality CAN Node
//!
//! Firmware core for a sensor node that samples a particulate-matter sensor,
//! a temperature/humidity sensor and a gas sensor, derives US-EPA AQI values
//! and publishes compact fixed-layout frames on a shared CAN bus.
//!
//! ## Features
//!
//! - **Sensor drivers**: PMS5003 frame parsing, AHT2x climate and ENS160 gas over I2C
//! - **Graceful degradation**: any sensor or the bus may be absent; the node keeps publishing what it has
//! - **Bounded transmission**: every frame is queued within a fixed timeout or dropped
//! - **Fixed cadence**: one cycle per interval, no catch-up after a stall
//! - **Embedded-friendly**: no heap allocations in the cycle path, bounded fault history
//!
//! ## Quick Start
//!
//! ```rust
//! use aircan::simulation::{devices, SimWire, SimulationConfig};
//! use aircan::time::ManualClock;
//! use aircan::{AirQualityAgent, NodeConfig};
//!
//! let wire = SimWire::new();
//! let (pm, climate, gas, bus) = devices(&SimulationConfig::default(), wire.clone());
//! let clock = ManualClock::new(0);
//!
//! let mut agent = AirQualityAgent::boot(NodeConfig::default(), clock.clone(), pm, climate, gas, bus)
//!     .expect("particulate sensor is optional by default");
//!
//! clock.advance(2000);
//! if let Some(report) = agent.tick() {
//!     println!("cycle {}: {} frame(s) sent", report.cycle, report.frames_sent);
//! }
//! assert_eq!(wire.drain().len(), 2);
//! ```
//!
//! ## Architecture
//!
//! - [`agent`] - Boot sequence and the per-interval cycle
//! - [`sensors`] - Sensor traits and device drivers
//! - [`address`] - Bring-up and address fallback for I2C devices
//! - [`protocol`] - CAN identifiers, payload layouts and frame codec
//! - [`transmitter`] - Bounded-time frame publication
//! - [`scheduler`] - Fixed-interval cycle trigger
//! - [`fault`] - Bounded fault history
//! - [`simulation`] - Simulated devices for running off-target

#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]

pub mod address;
pub mod agent;
pub mod config;
pub mod fault;
pub mod protocol;
pub mod scheduler;
pub mod sensors;
pub mod simulation;
pub mod time;
pub mod transmitter;

// Re-export main public types for convenience
pub use agent::{AirQualityAgent, CycleReport, NodeError};
pub use config::NodeConfig;
pub use protocol::{CanFrame, MessageKind, StandardId};
pub use sensors::{ClimateReading, GasReading, ParticulateReading};
