//! Error taxonomy for the minos kernel.
//!
//! Every failure that crosses the isolation boundary is one of these
//! variants. Program-internal failures never appear here; they are caught
//! at the worker boundary and become a `Crashed` process instead.

use thiserror::Error;

/// Result type for kernel operations.
pub type KernelResult<T> = Result<T, KernelError>;

/// Kernel operation errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum KernelError {
    /// The target PID or path does not exist (or is no longer live).
    #[error("not found: {0}")]
    NotFound(String),

    /// Protocol misuse, e.g. a syscall issued before the context was
    /// initialized.
    #[error("precondition violation: {0}")]
    PreconditionViolation(String),

    /// A syscall exceeded its deadline. Only the call fails; the owning
    /// context survives.
    #[error("syscall timed out: {call}")]
    Timeout { call: String },

    /// A pending syscall was invalidated by context teardown.
    #[error("process terminated before the call completed")]
    ProcessTerminated,

    /// Malformed command name or pipeline stage.
    #[error("invalid spec: {0}")]
    InvalidSpec(String),

    /// Wrapped failure surfaced by an external capability handler.
    #[error("collaborator failure: {0}")]
    Collaborator(String),
}

impl KernelError {
    /// True if this error means the call's target simply wasn't there,
    /// as opposed to a protocol or transport problem.
    pub fn is_not_found(&self) -> bool {
        matches!(self, KernelError::NotFound(_))
    }
}
