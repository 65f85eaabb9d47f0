use std::net::IpAddr;

use camscout_core::ErrorCategory;
use camscout_device_onvif::OnvifError;
use camscout_wire::WireError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("network error: {0}")]
    Network(String),
    #[error("protocol error: {0}")]
    Protocol(String),
    /// Never retried with the same credentials
    #[error("authentication failed: {0}")]
    Authentication(String),
    #[error("no usable protocol on {host}")]
    NoUsableProtocol { host: IpAddr },
    #[error("{host} was classified as not a camera")]
    Rejected { host: IpAddr },
    #[error("connection attempt cancelled")]
    Cancelled,
}

impl ConnectionError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            ConnectionError::Network(_) | ConnectionError::NoUsableProtocol { .. } | ConnectionError::Cancelled => {
                ErrorCategory::Network
            }
            ConnectionError::Protocol(_) => ErrorCategory::Protocol,
            ConnectionError::Authentication(_) => ErrorCategory::Authentication,
            ConnectionError::Rejected { .. } => ErrorCategory::Classification,
        }
    }

    pub fn is_authentication(&self) -> bool {
        self.category() == ErrorCategory::Authentication
    }

    fn categorized(category: ErrorCategory, message: String) -> Self {
        match category {
            ErrorCategory::Network => ConnectionError::Network(message),
            ErrorCategory::Authentication => ConnectionError::Authentication(message),
            ErrorCategory::Protocol | ErrorCategory::Classification => ConnectionError::Protocol(message),
        }
    }
}

impl From<WireError> for ConnectionError {
    fn from(e: WireError) -> Self {
        Self::categorized(e.category(), e.to_string())
    }
}

impl From<OnvifError> for ConnectionError {
    fn from(e: OnvifError) -> Self {
        Self::categorized(e.category(), e.to_string())
    }
}
