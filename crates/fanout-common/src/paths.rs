//! Fixed runtime file layout inside a configurable directory.

use std::io;
use std::path::{Path, PathBuf};

/// Process Identity record file name.
pub const PID_FILE_NAME: &str = "message_server.pid";
/// Singleton Lock record file name.
pub const LOCK_FILE_NAME: &str = "message_server.lock";
/// Activity log file name.
pub const ACTIVITY_LOG_NAME: &str = "message_server_activity.txt";

/// Well-known locations of the relay's runtime files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimePaths {
    dir: PathBuf,
}

impl RuntimePaths {
    /// Lay out runtime files inside `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// The runtime directory itself.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the Process Identity record.
    #[must_use]
    pub fn pid_file(&self) -> PathBuf {
        self.dir.join(PID_FILE_NAME)
    }

    /// Path of the Singleton Lock record.
    #[must_use]
    pub fn lock_file(&self) -> PathBuf {
        self.dir.join(LOCK_FILE_NAME)
    }

    /// Path of the append-only activity log.
    #[must_use]
    pub fn activity_log(&self) -> PathBuf {
        self.dir.join(ACTIVITY_LOG_NAME)
    }

    /// Create the runtime directory (and parents) if missing.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error if the directory cannot be created.
    pub fn ensure_dir(&self) -> io::Result<()> {
        std::fs::create_dir_all(&self.dir)
    }
}
