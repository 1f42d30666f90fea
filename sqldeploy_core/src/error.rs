use std::fmt;
use std::path::PathBuf;

use thiserror::Error as TError;

use crate::migration::MigrationPhase;

/// An Error occurred while discovering, planning, or deploying migrations
#[derive(Debug)]
pub struct Error {
    kind: Box<Kind>,
}

impl Error {
    pub(crate) fn new(kind: Kind) -> Error {
        Error {
            kind: Box::new(kind),
        }
    }

    /// Return the kind of error occurred
    pub fn kind(&self) -> &Kind {
        &self.kind
    }

    /// Whether the error reports a cooperative cancellation rather than a
    /// failure.
    pub fn is_canceled(&self) -> bool {
        matches!(*self.kind, Kind::Canceled)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.kind.source()
    }
}

/// Enum listing possible errors from a deployment.
#[derive(Debug, TError)]
pub enum Kind {
    /// An Error from an invalid migration source location
    #[error("invalid migration source path {0}, {1}")]
    InvalidSourcePath(PathBuf, std::io::Error),
    /// An Error from an unreadable migration file
    #[error("invalid migration file at path {0}, {1}")]
    InvalidMigrationFile(PathBuf, std::io::Error),
    /// An Error from a repeated migration name, names must be unique
    #[error("migration {0} is repeated, migration names must be unique")]
    RepeatedName(String),
    /// An Error parsing the deployment manifest
    #[error("Error parsing config: {0}")]
    ConfigError(String),
    /// An Error from an underlying database connection Error
    #[error("`{0}`, `{1}`")]
    Connection(String, #[source] Box<dyn std::error::Error + Sync + Send>),
    /// An Error opening or writing a per-database deployment log
    #[error("could not write deployment log {0}, {1}")]
    LogFile(PathBuf, std::io::Error),
    /// The deployment was canceled before this target completed
    #[error("the deployment was canceled")]
    Canceled,
    /// One or more targets failed during a deployment sweep
    #[error("{phase} phase failed on {failed} of {total} database(s)")]
    PhaseFailed {
        phase: MigrationPhase,
        failed: usize,
        total: usize,
    },
}

// Helper trait for adding custom messages to connection and driver errors.
pub trait WrapDeployError<T, E> {
    fn deploy_err(self, msg: &str) -> Result<T, Error>;
}

impl<T, E> WrapDeployError<T, E> for Result<T, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn deploy_err(self, msg: &str) -> Result<T, Error> {
        self.map_err(|err| Error::new(Kind::Connection(msg.into(), Box::new(err))))
    }
}
