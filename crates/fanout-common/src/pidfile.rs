//! Plain-text PID records.
//!
//! The relay keeps two of these: the Singleton Lock (mutual exclusion between
//! would-be instances) and the Process Identity (the PID that external
//! supervisors signal). Both contain only the decimal PID.
//!
//! Records are written to a staging file beside the target and then linked
//! or renamed into place, so a reader sees either no record or a complete
//! one, never an empty or half-written file.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;

static STAGING_SEQ: AtomicU64 = AtomicU64::new(0);

/// Errors raised while reading or writing a PID record.
#[derive(Error, Debug)]
pub enum PidFileError {
    /// The file exists but does not contain a decimal PID.
    #[error("pid record {} is malformed: {content:?}", path.display())]
    Malformed {
        /// Record location.
        path: PathBuf,
        /// Raw file content.
        content: String,
    },
    /// An exclusive create found the record already present.
    #[error("pid record {} already exists", .0.display())]
    Exists(PathBuf),
    /// Underlying I/O error.
    #[error("pid record {}: {source}", path.display())]
    Io {
        /// Record location.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: io::Error,
    },
}

/// A PID persisted at a fixed path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PidRecord {
    path: PathBuf,
}

impl PidRecord {
    /// Record stored at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Location of the record.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the file is present.
    #[must_use]
    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Read the recorded PID, `None` if the file is absent.
    ///
    /// # Errors
    ///
    /// [`PidFileError::Malformed`] if the content is not a PID,
    /// [`PidFileError::Io`] for any other read failure.
    pub fn read(&self) -> Result<Option<u32>, PidFileError> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(self.io_err(e)),
        };
        content
            .trim()
            .parse::<u32>()
            .map(Some)
            .map_err(|_| PidFileError::Malformed {
                path: self.path.clone(),
                content,
            })
    }

    /// Write `pid`, replacing any previous content in one atomic rename.
    ///
    /// # Errors
    ///
    /// Returns [`PidFileError::Io`] if the file cannot be written.
    pub fn write(&self, pid: u32) -> Result<(), PidFileError> {
        let staged = self.stage(pid)?;
        fs::rename(&staged, &self.path).map_err(|e| {
            let _ = fs::remove_file(&staged);
            self.io_err(e)
        })
    }

    /// Create the record containing `pid`. Fails if it already exists.
    ///
    /// The record appears with its content already in place: the PID is
    /// staged in a private file which is then hard-linked to the record path.
    ///
    /// # Errors
    ///
    /// [`PidFileError::Exists`] if another writer got there first,
    /// [`PidFileError::Io`] otherwise.
    pub fn create_exclusive(&self, pid: u32) -> Result<(), PidFileError> {
        let staged = self.stage(pid)?;
        let linked = fs::hard_link(&staged, &self.path);
        let _ = fs::remove_file(&staged);
        linked.map_err(|e| {
            if e.kind() == io::ErrorKind::AlreadyExists {
                PidFileError::Exists(self.path.clone())
            } else {
                self.io_err(e)
            }
        })
    }

    /// Delete the record. Missing files are not an error.
    ///
    /// # Errors
    ///
    /// Returns [`PidFileError::Io`] if the file exists but cannot be removed.
    pub fn remove(&self) -> Result<(), PidFileError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(self.io_err(e)),
        }
    }

    /// Delete the record only if it still names `pid`. Returns whether it was removed.
    ///
    /// The record is first renamed to a private name and checked there, so a
    /// record written by someone else between the check and the removal is
    /// put back rather than lost.
    ///
    /// # Errors
    ///
    /// Propagates read and remove failures.
    pub fn remove_if_owned(&self, pid: u32) -> Result<bool, PidFileError> {
        if self.read()? != Some(pid) {
            return Ok(false);
        }
        let claimed = PidRecord::new(self.staging_path());
        match fs::rename(&self.path, &claimed.path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(self.io_err(e)),
        }
        let owned = matches!(claimed.read(), Ok(Some(recorded)) if recorded == pid);
        if !owned {
            // Fails only if a newer record already took the path.
            let _ = fs::hard_link(&claimed.path, &self.path);
        }
        claimed.remove()?;
        Ok(owned)
    }

    /// Unique sibling path for staging, e.g. `.message_server.lock.4242.0.tmp`.
    fn staging_path(&self) -> PathBuf {
        let seq = STAGING_SEQ.fetch_add(1, Ordering::Relaxed);
        let name = self
            .path
            .file_name()
            .map_or_else(|| "pid".into(), |n| n.to_string_lossy());
        self.path
            .with_file_name(format!(".{name}.{}.{seq}.tmp", std::process::id()))
    }

    fn stage(&self, pid: u32) -> Result<PathBuf, PidFileError> {
        let staged = self.staging_path();
        let written = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&staged)
            .and_then(|mut file| {
                file.write_all(pid.to_string().as_bytes())?;
                file.sync_all()
            });
        match written {
            Ok(()) => Ok(staged),
            Err(e) => {
                let _ = fs::remove_file(&staged);
                Err(self.io_err(e))
            }
        }
    }

    fn io_err(&self, source: io::Error) -> PidFileError {
        PidFileError::Io {
            path: self.path.clone(),
            source,
        }
    }
}
