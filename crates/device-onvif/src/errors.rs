use camscout_core::ErrorCategory;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum OnvifError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("request timed out")]
    Timeout,
    /// HTTP 401 or a `NotAuthorized` SOAP fault
    #[error("device rejected credentials")]
    Unauthorized,
    #[error("SOAP fault: {0}")]
    Fault(String),
    #[error("unexpected HTTP status {0}")]
    Status(u16),
    #[error("xml error: {0}")]
    Xml(String),
    #[error("response is missing {0}")]
    MissingField(&'static str),
    #[error("controller is closed")]
    Closed,
}

impl OnvifError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            OnvifError::Http(_) | OnvifError::Timeout | OnvifError::Closed => ErrorCategory::Network,
            OnvifError::Unauthorized => ErrorCategory::Authentication,
            OnvifError::Fault(_)
            | OnvifError::Status(_)
            | OnvifError::Xml(_)
            | OnvifError::MissingField(_) => ErrorCategory::Protocol,
        }
    }
}
