use std::net::IpAddr;

use camscout_core::ErrorCategory;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("no active IPv4 interface")]
    NoActiveInterface,
}

#[derive(Debug, Error)]
pub enum DetectError {
    /// Nothing answered on any probe. Never cached as non-camera.
    #[error("{host}:{port} did not answer any probe")]
    Unresponsive { host: IpAddr, port: u16 },
    #[error("http client setup failed: {0}")]
    Client(#[from] reqwest::Error),
}

impl DetectError {
    pub fn category(&self) -> ErrorCategory {
        ErrorCategory::Network
    }
}

impl NetworkError {
    pub fn category(&self) -> ErrorCategory {
        ErrorCategory::Network
    }
}
