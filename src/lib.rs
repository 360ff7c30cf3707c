//! Flowcut - Flow Offload Fast Path
//!
//! A fast-path offload accelerator for a stateful packet-forwarding
//! firewall/router. Established connections are promoted onto a shortcut
//! forwarding path so later packets of the same connection bypass full
//! routing and firewall re-evaluation.

pub mod config;
pub mod conn;
pub mod device;
pub mod error;
pub mod offload;
pub mod sim;
pub mod telemetry;
pub mod types;

pub use error::{Error, Result};
