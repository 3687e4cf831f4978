//! TC66C to MQTT bridge.
//!
//! This crate provides a service that:
//! - Connects to a TC66C USB power meter over Bluetooth LE
//! - Requests a measurement on a fixed interval
//! - Publishes voltage, current and power to an MQTT broker
//! - Shuts down gracefully on SIGINT/SIGTERM
//!
//! # Topics
//!
//! Each cycle publishes three messages, in this order:
//!
//! - `<namespace>/<alias>/voltage_V`
//! - `<namespace>/<alias>/current_A`
//! - `<namespace>/<alias>/power_W`
//!
//! The namespace defaults to `tc66c`. The alias defaults to the device
//! address, lower-cased, with every run of non-word characters replaced by
//! `_`.
//!
//! # Configuration
//!
//! The bridge reads optional configuration from
//! `~/.config/tc66-bridge/config.toml`. Command line arguments override it.
//!
//! ```toml
//! [device]
//! address = "AA:BB:CC:DD:EE:FF"
//! alias = "bench"
//!
//! [mqtt]
//! broker = "tcp://localhost:1883"
//!
//! [polling]
//! interval_ms = 2000
//! ```
//!
//! ```
//! let config: tc66_bridge::Config = toml::from_str(r#"
//!     [device]
//!     address = "AA:BB:CC:DD:EE:FF"
//!     [mqtt]
//!     broker = "localhost"
//! "#).unwrap();
//!
//! assert!(config.validate().is_ok());
//! assert_eq!(config.alias(), "aa_bb_cc_dd_ee_ff");
//! ```

pub mod bus;
pub mod config;
pub mod cycle;
pub mod error;
pub mod mock;
pub mod mqtt;
pub mod orchestrator;
pub mod scheduler;
pub mod signal;

pub use bus::{MessageBus, OutboundMessage, PublishError, messages_for};
pub use config::{
    Config, ConfigError, DeviceConfig, MqttConfig, PollingConfig, ValidationError,
};
pub use cycle::{PollCycle, WaitPlan, next_wait};
pub use error::{BridgeError, ExitStatus};
pub use mock::MockBus;
pub use mqtt::{BrokerAddress, MqttBus};
pub use orchestrator::{BridgeOptions, Orchestrator, RunReport};
pub use scheduler::PublishScheduler;
