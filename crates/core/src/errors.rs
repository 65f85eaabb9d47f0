//! Error taxonomy shared by every crate in the workspace.

use serde::{Deserialize, Serialize};

/// How a failure is handled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorCategory {
    /// Timeout, refused, unreachable. Recovered by trying the next port or
    /// protocol, then by the reconnection supervisor.
    Network,
    /// Malformed frame or unsupported command. Dropped and logged, never
    /// retried verbatim.
    Protocol,
    /// Bad credentials. Surfaced to the caller, never retried automatically.
    Authentication,
    /// The device answered but is not a camera. Cached as rejected.
    Classification,
}

impl ErrorCategory {
    pub fn name(&self) -> &'static str {
        match self {
            ErrorCategory::Network => "network",
            ErrorCategory::Protocol => "protocol",
            ErrorCategory::Authentication => "authentication",
            ErrorCategory::Classification => "classification",
        }
    }

    /// Only network failures may be retried
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorCategory::Network)
    }
}
