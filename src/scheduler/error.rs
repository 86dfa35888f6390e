//! Scheduler error taxonomy

use thiserror::Error;

use crate::client::ClientError;
use crate::template::TemplateError;

/// Broad class of a scheduler error, deciding how it is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Structurally bad template or settings: surfaced, never retried
    Configuration,
    /// Network exchange failed: retried after a delay
    TransientNetwork,
    /// A required surface or entitlement is missing: the cycle is aborted
    /// and retried after a delay
    ResourceNotReady,
}

/// Error raised inside a scheduling cycle.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("template error: {0}")]
    Template(#[from] TemplateError),
    #[error(transparent)]
    Client(#[from] ClientError),
    /// The user state carried no owned colors
    #[error("no owned colors reported")]
    NoEntitlement,
    /// The backend refused a placement for a reason other than rate limiting
    #[error("placement rejected with status {status}: {message}")]
    Rejected { status: u16, message: String },
}

impl SchedulerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SchedulerError::Template(_) => ErrorKind::Configuration,
            SchedulerError::Client(e) if e.is_not_ready() => ErrorKind::ResourceNotReady,
            SchedulerError::Client(_) | SchedulerError::Rejected { .. } => {
                ErrorKind::TransientNetwork
            }
            SchedulerError::NoEntitlement => ErrorKind::ResourceNotReady,
        }
    }

    /// Fatal errors end the run instead of being retried next cycle.
    pub fn is_fatal(&self) -> bool {
        self.kind() == ErrorKind::Configuration
    }
}
