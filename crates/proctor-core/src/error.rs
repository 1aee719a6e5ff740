//! Error types for the session engine and its persistence collaborators.
//!
//! `SinkError` lives here rather than in the adapter crate so the controller
//! can report persistence failures without knowing which backend produced
//! them, and so callers can decide whether a retry is worthwhile.

use std::fmt;

use thiserror::Error;
use uuid::Uuid;

use crate::session::SessionState;

/// Which bound an index error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexTarget {
    /// A question position within the question set.
    Question,
    /// An option index within a single question.
    Option,
}

impl fmt::Display for IndexTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndexTarget::Question => write!(f, "question"),
            IndexTarget::Option => write!(f, "option"),
        }
    }
}

/// Errors surfaced by [`crate::controller::SessionController`] operations.
#[derive(Debug, Error)]
pub enum SessionError {
    /// A session was requested for a question set with no questions.
    #[error("question set contains no questions")]
    EmptyQuestionSet,

    /// The operation is not permitted in the session's current state.
    #[error("cannot {operation} while session is {state}")]
    InvalidState {
        operation: &'static str,
        state: SessionState,
    },

    /// A question position or option index was out of range.
    #[error("{target} index {index} out of range (0..{len})")]
    InvalidIndex {
        target: IndexTarget,
        index: usize,
        len: usize,
    },

    /// The result was computed but the sink failed to store it.
    #[error("failed to persist result for session {session_id}: {source}")]
    Persistence {
        session_id: Uuid,
        #[source]
        source: SinkError,
    },

    /// A countdown was requested outside of a Tokio runtime.
    #[error("countdown requires a running Tokio runtime")]
    TimerUnavailable,
}

impl SessionError {
    /// Returns `true` if calling `submit` again may succeed.
    ///
    /// Only persistence failures are retryable; the retry re-enters the
    /// persistence step with the already computed result.
    pub fn is_retryable(&self) -> bool {
        match self {
            SessionError::Persistence { source, .. } => !source.is_permanent(),
            _ => false,
        }
    }
}

/// Errors that can occur when storing a result.
#[derive(Debug, Clone, Error)]
pub enum SinkError {
    /// The backend could not be reached.
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    /// Credentials were rejected.
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    /// The backend answered with an error response.
    #[error("storage rejected result (HTTP {status}): {message}")]
    Rejected { status: u16, message: String },

    /// The request timed out.
    #[error("request timed out after {0}s")]
    Timeout(u64),

    /// The result could not be encoded for storage.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// A local file operation failed.
    #[error("I/O error: {0}")]
    Io(String),
}

impl SinkError {
    /// Returns `true` if this error is permanent and should not be retried.
    pub fn is_permanent(&self) -> bool {
        match self {
            SinkError::AuthenticationFailed(_) | SinkError::Serialization(_) => true,
            SinkError::Rejected { status, .. } => {
                (400..500).contains(status) && *status != 408 && *status != 429
            }
            SinkError::Unavailable(_) | SinkError::Timeout(_) | SinkError::Io(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn persistence_errors_are_retryable_unless_permanent() {
        let transient = SessionError::Persistence {
            session_id: Uuid::nil(),
            source: SinkError::Unavailable("connection refused".into()),
        };
        assert!(transient.is_retryable());

        let permanent = SessionError::Persistence {
            session_id: Uuid::nil(),
            source: SinkError::AuthenticationFailed("bad key".into()),
        };
        assert!(!permanent.is_retryable());

        assert!(!SessionError::EmptyQuestionSet.is_retryable());
    }

    #[test]
    fn rejected_status_classification() {
        let conflict = SinkError::Rejected {
            status: 409,
            message: "duplicate".into(),
        };
        assert!(conflict.is_permanent());

        let throttled = SinkError::Rejected {
            status: 429,
            message: "slow down".into(),
        };
        assert!(!throttled.is_permanent());

        let server = SinkError::Rejected {
            status: 503,
            message: "maintenance".into(),
        };
        assert!(!server.is_permanent());
    }

    #[test]
    fn invalid_index_message() {
        let err = SessionError::InvalidIndex {
            target: IndexTarget::Option,
            index: 4,
            len: 4,
        };
        assert_eq!(err.to_string(), "option index 4 out of range (0..4)");
    }
}
