//! Error types for smoothdecrypt.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Main error type for smoothdecrypt operations.
#[derive(Debug, Error)]
pub enum Error {
    /// The key seed is not valid base64 or is shorter than 30 bytes.
    #[error("Invalid key seed: {0}")]
    InvalidKeySeed(String),

    /// The key identifier is not a 128-bit GUID.
    #[error("Invalid key identifier: {0}")]
    InvalidKeyIdentifier(String),

    /// The decrypt tool could not be started.
    #[error("Failed to launch {}: {source}", .program.display())]
    ExternalToolLaunch {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The decrypt tool ran but reported failure.
    #[error("{} exited with status {}", .program.display(), exit_status(.code))]
    ExternalToolExit {
        program: PathBuf,
        code: Option<i32>,
        stdout: String,
    },

    /// The decrypt tool did not finish within the configured wait.
    #[error("{} did not exit within {timeout:?}", .program.display())]
    ExternalToolTimeout { program: PathBuf, timeout: Duration },

    /// The manifest is not a Smooth Streaming client manifest.
    #[error("Invalid manifest {}: {reason}", .path.display())]
    ManifestParse { path: PathBuf, reason: String },

    /// Copy, read, write or directory creation failed.
    #[error("Filesystem error on {}: {source}", .path.display())]
    Filesystem {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Missing or inconsistent configuration.
    #[error("Configuration error: {0}")]
    Config(String),
}

fn exit_status(code: &Option<i32>) -> String {
    match code {
        Some(code) => code.to_string(),
        None => "<signal>".to_string(),
    }
}

/// Coarse classification used to decide whether a failure aborts the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidKeySeed,
    InvalidKeyIdentifier,
    ExternalToolLaunchFailure,
    ManifestParseFailure,
    FilesystemFailure,
    Configuration,
}

impl Error {
    /// Build a filesystem error for `path`.
    pub(crate) fn fs(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Filesystem {
            path: path.into(),
            source,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidKeySeed(_) => ErrorKind::InvalidKeySeed,
            Error::InvalidKeyIdentifier(_) => ErrorKind::InvalidKeyIdentifier,
            Error::ExternalToolLaunch { .. }
            | Error::ExternalToolExit { .. }
            | Error::ExternalToolTimeout { .. } => ErrorKind::ExternalToolLaunchFailure,
            Error::ManifestParse { .. } => ErrorKind::ManifestParseFailure,
            Error::Filesystem { .. } => ErrorKind::FilesystemFailure,
            Error::Config(_) => ErrorKind::Configuration,
        }
    }

    /// Whether this failure invalidates the whole run rather than one file.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::InvalidKeySeed | ErrorKind::InvalidKeyIdentifier | ErrorKind::Configuration
        )
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(e: serde_yaml::Error) -> Self {
        Error::Config(e.to_string())
    }
}

/// Result type alias for smoothdecrypt operations.
pub type Result<T> = std::result::Result<T, Error>;
