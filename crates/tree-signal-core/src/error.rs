//! Error types for Tree Signal core
//!
//! Every error in this crate is local and recoverable:
//! - Path validation failures are rejected before any tree mutation
//! - Lock/delete on an unknown channel performs no mutation
//! - Per-node decay failures are isolated to that node

use crate::types::PanelState;

/// Main error type returned by tree and service operations
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TreeError {
    /// Path too deep, empty, or containing disallowed characters
    #[error("invalid channel path: {0}")]
    InvalidPath(#[from] PathError),

    /// Lock or delete on a channel that is not in the tree
    #[error("channel not found: {0}")]
    NotFound(String),

    /// Severity string outside `debug|info|warn|error`
    #[error("invalid severity value")]
    InvalidSeverity(String),

    /// Runtime reconfiguration with unusable values
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Lifecycle transition that the panel state machine forbids
    #[error("illegal panel transition: {from:?} -> {to:?}")]
    IllegalTransition { from: PanelState, to: PanelState },
}

impl TreeError {
    /// Core errors are never worth retrying verbatim
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        false
    }

    /// Whether the caller supplied bad input (as opposed to an internal fault)
    #[inline]
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidPath(_)
                | Self::NotFound(_)
                | Self::InvalidSeverity(_)
                | Self::InvalidConfig(_)
        )
    }
}

/// Channel path validation errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PathError {
    /// Nothing but separators or whitespace
    #[error("channel path must not be empty")]
    Empty,

    /// Empty segment between separators
    #[error("path contains empty segment")]
    EmptySegment,

    /// Invalid segment characters
    #[error("invalid segment: {0} (must be alphanumeric, '_' or '-')")]
    InvalidSegment(String),

    /// Deeper than the configured maximum
    #[error("path depth {depth} exceeds maximum of {max}")]
    TooDeep { depth: usize, max: usize },
}

/// Per-node failure during a decay pass
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecayError {
    /// Last message timestamp lies after the sampling instant
    #[error("clock skew on '{path}': last message is {ahead_ms}ms in the future")]
    ClockSkew { path: String, ahead_ms: i64 },
}

/// Shorthand result type
pub type Result<T, E = TreeError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_path_message_matches_ingress_contract() {
        let err = TreeError::from(PathError::Empty);
        assert!(err.to_string().contains("channel path must not be empty"));
    }

    #[test]
    fn severity_error_display() {
        let err = TreeError::InvalidSeverity("critical".into());
        assert_eq!(err.to_string(), "invalid severity value");
    }

    #[test]
    fn nothing_is_retryable() {
        assert!(!TreeError::NotFound("a".into()).is_retryable());
        assert!(!TreeError::InvalidConfig("x".into()).is_retryable());
    }

    #[test]
    fn client_errors() {
        assert!(TreeError::NotFound("a".into()).is_client_error());
        assert!(!TreeError::IllegalTransition {
            from: PanelState::Removed,
            to: PanelState::Active
        }
        .is_client_error());
    }

    #[test]
    fn clock_skew_display() {
        let err = DecayError::ClockSkew {
            path: "a.b".into(),
            ahead_ms: 1500,
        };
        assert!(err.to_string().contains("a.b"));
        assert!(err.to_string().contains("1500ms"));
    }
}
