//! Crate-wide error taxonomy (§7 ERROR HANDLING DESIGN).
//!
//! Every subsystem-specific error enum (runtime, sink, source) is expected
//! to classify into one of these categories so the sync loop and dispatcher
//! can decide retry/backoff/surface behavior without matching on concrete
//! variants, mirroring the teacher's `DockerError` -> `Display` pattern but
//! generalized with a `category()` accessor.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Runtime/sink unreachable or timed out; retry with backoff, don't surface.
    Transient,
    /// Not-found on a delete path; treated as idempotent success.
    NotFound,
    /// Resource-version conflict on a status push; reload and retry.
    Conflict,
    /// Bad input from a source; reject/log, don't crash the agent.
    Validation,
    /// Startup-time incompatibility; fatal.
    Fatal,
}

#[derive(Debug)]
pub struct AgentError {
    pub category: ErrorCategory,
    pub message: String,
}

impl AgentError {
    pub fn new(category: ErrorCategory, message: impl Into<String>) -> Self {
        Self {
            category,
            message: message.into(),
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Transient, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::NotFound, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Conflict, message)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Validation, message)
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Fatal, message)
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self.category, ErrorCategory::Transient | ErrorCategory::Conflict)
    }
}

impl fmt::Display for AgentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.category, self.message)
    }
}

impl std::error::Error for AgentError {}

impl From<crate::types::RuntimeError> for AgentError {
    fn from(err: crate::types::RuntimeError) -> Self {
        match err {
            crate::types::RuntimeError::NotFound(msg) => AgentError::not_found(msg),
            crate::types::RuntimeError::Transient(msg) => AgentError::transient(msg),
            crate::types::RuntimeError::Fatal(msg) => AgentError::fatal(msg),
        }
    }
}
