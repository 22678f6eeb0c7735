//! Types and helpers shared by the fanout relay daemon and its control plane.
//!
//! This crate provides:
//! - The broadcast envelope and system-event wire formats ([`envelope`])
//! - The runtime directory layout ([`paths`])
//! - PID record files used for singleton locking and liveness ([`pidfile`])
//! - OS process inspection and signalling ([`process`])
//! - Defaults and exit codes ([`types`])

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod envelope;
pub mod paths;
pub mod pidfile;
pub mod process;
pub mod types;

pub use envelope::{Envelope, SystemEvent, Transport};
pub use paths::RuntimePaths;
pub use pidfile::{PidFileError, PidRecord};
