//! Wire-level errors

use camscout_core::ErrorCategory;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WireError {
    /// Short buffer, magic mismatch or a length the buffer cannot satisfy
    #[error("malformed frame: {0}")]
    FrameMalformed(String),
    /// Header was fine but the body is not JSON
    #[error("invalid payload: {0}")]
    PayloadInvalid(String),
    /// Payload could not be serialized
    #[error("failed to encode payload: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("login rejected by device (status {code})")]
    AuthenticationFailed { code: i64 },
    #[error("command {command} failed with status {code}")]
    CommandFailed { command: &'static str, code: i64 },
    #[error("no active session; login first")]
    NotLoggedIn,
    #[error("connection closed")]
    Closed,
    #[error("operation timed out")]
    Timeout,
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl WireError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            WireError::FrameMalformed(_)
            | WireError::PayloadInvalid(_)
            | WireError::Encode(_)
            | WireError::CommandFailed { .. }
            | WireError::NotLoggedIn => ErrorCategory::Protocol,
            WireError::AuthenticationFailed { .. } => ErrorCategory::Authentication,
            WireError::Closed | WireError::Timeout | WireError::Io(_) => ErrorCategory::Network,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_categories() {
        assert_eq!(WireError::Timeout.category(), ErrorCategory::Network);
        assert_eq!(
            WireError::AuthenticationFailed { code: 203 }.category(),
            ErrorCategory::Authentication
        );
        assert_eq!(
            WireError::FrameMalformed("short".into()).category(),
            ErrorCategory::Protocol
        );
    }
}
