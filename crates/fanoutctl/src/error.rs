use std::path::PathBuf;
use thiserror::Error;

/// Errors that abort a control operation.
#[derive(Error, Debug)]
pub enum ControlError {
    /// The runtime directory could not be created.
    #[error("cannot create runtime directory {}: {source}", path.display())]
    RuntimeDir {
        /// Directory that was requested.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
    /// A PID record could not be read or removed.
    #[error(transparent)]
    PidFile(#[from] fanout_common::PidFileError),
    /// The relay binary could not be launched.
    #[error("failed to launch {}: {source}", bin.display())]
    Spawn {
        /// Binary that was executed.
        bin: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
}
