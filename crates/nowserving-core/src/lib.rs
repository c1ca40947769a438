//! Queue logic for nowserving.
//!
//! Everything in this crate is transport-agnostic and free of I/O beyond
//! reading the config file. The server, the store adapters, and the client
//! façade all depend on it so that a call-next means the same thing no
//! matter which path it took to get here.
//!
//! # Modules
//!
//! - [`operation`] -- Validated [`Operation`]s and lenient field extraction
//! - [`mutate`] -- Pure mutators from one [`QueueState`] to the next
//! - [`command`] -- Decoding of inbound push-transport frames
//! - [`config`] -- YAML configuration with environment overrides
//! - [`error`] -- Validation and command error types
//!
//! [`QueueState`]: nowserving_types::QueueState

pub mod command;
pub mod config;
pub mod error;
pub mod mutate;
pub mod operation;

pub use command::Command;
pub use config::{ConfigError, NowservingConfig, StoreBackend, TransportMode};
pub use error::{CommandError, ValidationError};
pub use mutate::{QueueRules, apply, now_millis};
pub use operation::{CounterId, Operation};
