//! Error types for the analysis engine.
//!
//! One typed failure surface (`EngineError`) crosses component boundaries;
//! parsing and validation never produce errors at all — their degraded
//! outcomes are ordinary data (warnings, partitions).

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ============================================================================
// Failure Categories
// ============================================================================

/// Category of an analyzer fetch failure.
///
/// Transient categories are retried by the connection layer; `Protocol`
/// failures (4xx, malformed responses) are surfaced immediately.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FetchFailure {
    /// Request exceeded its deadline.
    Timeout,
    /// Connection could not be established.
    Unreachable,
    /// The analyzer answered with a 5xx status.
    ServerError,
    /// The analyzer rejected the request (4xx) or answered with an
    /// unusable status line.
    Protocol,
}

impl FetchFailure {
    /// Whether the connection layer should retry this failure.
    pub fn is_transient(self) -> bool {
        !matches!(self, Self::Protocol)
    }
}

impl std::fmt::Display for FetchFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Timeout => write!(f, "timeout"),
            Self::Unreachable => write!(f, "unreachable"),
            Self::ServerError => write!(f, "server error"),
            Self::Protocol => write!(f, "protocol error"),
        }
    }
}

// ============================================================================
// Engine Error
// ============================================================================

/// Typed failures surfaced by the engine.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Analyzer call failed after the retry policy was exhausted (or, for
    /// protocol failures, immediately).
    #[error("analyzer request failed ({category}): {detail}")]
    FetchFailed {
        category: FetchFailure,
        detail: String,
    },

    /// The repository root was unreadable or fundamentally unsupported.
    #[error("repository index error: {0}")]
    IndexIo(String),

    /// A requested file or line range does not exist in the indexed tree.
    #[error("not found: {0}")]
    NotFound(String),

    /// Working-tree checkout failed.
    #[error("checkout failed: {0}")]
    Checkout(String),

    /// One branch collection failed hard.
    #[error("branch '{branch}' analysis failed: {source}")]
    BranchFailed {
        branch: String,
        #[source]
        source: Box<EngineError>,
    },

    /// Externally requested stop, or the overall wall-clock budget expired.
    #[error("analysis cancelled: {reason}")]
    Cancelled { reason: String },

    /// Configuration rejected at startup.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl EngineError {
    /// Short machine-readable category label, carried into result metadata
    /// when a branch fails while the other succeeds.
    pub fn category_label(&self) -> &'static str {
        match self {
            Self::FetchFailed { .. } => "FetchFailed",
            Self::IndexIo(_) => "IndexIOError",
            Self::NotFound(_) => "NotFound",
            Self::Checkout(_) => "CheckoutFailed",
            Self::BranchFailed { source, .. } => source.category_label(),
            Self::Cancelled { .. } => "Cancelled",
            Self::Config(_) => "Config",
        }
    }

    /// Whether this error is (or wraps) a cancellation.
    pub fn is_cancelled(&self) -> bool {
        match self {
            Self::Cancelled { .. } => true,
            Self::BranchFailed { source, .. } => source.is_cancelled(),
            _ => false,
        }
    }

    pub(crate) fn cancelled(reason: impl Into<String>) -> Self {
        Self::Cancelled {
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_categories() {
        assert!(FetchFailure::Timeout.is_transient());
        assert!(FetchFailure::Unreachable.is_transient());
        assert!(FetchFailure::ServerError.is_transient());
        assert!(!FetchFailure::Protocol.is_transient());
    }

    #[test]
    fn category_labels() {
        let err = EngineError::FetchFailed {
            category: FetchFailure::Timeout,
            detail: "deadline".into(),
        };
        assert_eq!(err.category_label(), "FetchFailed");

        let wrapped = EngineError::BranchFailed {
            branch: "head".into(),
            source: Box::new(err),
        };
        assert_eq!(wrapped.category_label(), "FetchFailed");
        assert!(!wrapped.is_cancelled());
    }

    #[test]
    fn cancellation_detection_through_wrapping() {
        let err = EngineError::BranchFailed {
            branch: "base".into(),
            source: Box::new(EngineError::cancelled("caller request")),
        };
        assert!(err.is_cancelled());
    }
}
