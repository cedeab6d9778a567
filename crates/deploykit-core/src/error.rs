//! Error types for deploykit.
//!
//! The variants follow the failure classes the orchestrator distinguishes:
//! preconditions (nothing mutated yet), expected absence/presence, transient
//! control-plane lag, stuck resources needing repair, and hard failures.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Missing configuration or credentials; reported before any mutation.
    #[error("precondition failed: {0}")]
    Precondition(String),

    /// The resource does not exist. Expected on probe and delete paths.
    #[error("not found: {0}")]
    NotFound(String),

    /// The resource already exists. Expected on idempotent create paths.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// Throttling or eventual-consistency lag; safe to retry.
    #[error("transient failure: {0}")]
    Transient(String),

    /// The resource is wedged in a state that needs a repair subroutine.
    #[error("resource {resource} stuck in {status}")]
    Stuck { resource: String, status: String },

    /// A polling loop hit its ceiling before the terminal state arrived.
    #[error("timed out: {0}")]
    Timeout(String),

    /// Retries and repairs exhausted.
    #[error("unrecoverable: {0}")]
    Unrecoverable(String),

    /// Provider call failed in a way the classifier could not place.
    #[error("provider error: {0}")]
    Provider(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether a bounded retry with a fixed delay is worth attempting.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Transient(_))
    }

    /// Absence and presence are success-equivalent on idempotent paths.
    pub fn is_benign(&self) -> bool {
        matches!(self, Error::NotFound(_) | Error::AlreadyExists(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
