//! Control plane for the fanout relay: start it detached, stop it, and report
//! whether it is running, each as a single JSON result.
#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// CLI parsing and control-plane settings.
pub mod config;
/// Start, stop and status operations.
pub mod control;
/// Errors raised by control operations.
pub mod error;

pub use control::{ControlResult, ControlStatus, Supervisor};
pub use error::ControlError;
