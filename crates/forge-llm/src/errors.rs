//! Transport error taxonomy with retryability classification.

use serde::{Deserialize, Serialize};

/// Model/transport failures. The turn executor re-opens the stream for
/// retryable kinds (within its retry budget) and fails the turn immediately
/// for the rest.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LlmError {
    #[error("model unavailable: {message}")]
    Unavailable { message: String },
    #[error("model protocol error: {message}")]
    Protocol { message: String },
    #[error("quota exhausted: {message}")]
    QuotaExhausted { message: String },
    #[error("authentication failed: {message}")]
    AuthFailure { message: String },
    #[error("stream cancelled")]
    Cancelled,
}

impl LlmError {
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Transient transport trouble is worth another stream; authentication,
    /// quota and protocol failures are not.
    pub fn retryable(&self) -> bool {
        matches!(self, LlmError::Unavailable { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_unavailable_is_retryable() {
        assert!(LlmError::unavailable("503").retryable());
        assert!(!LlmError::protocol("bad schema").retryable());
        assert!(!LlmError::QuotaExhausted {
            message: "spent".into()
        }
        .retryable());
        assert!(!LlmError::AuthFailure {
            message: "key".into()
        }
        .retryable());
        assert!(!LlmError::Cancelled.retryable());
    }
}
