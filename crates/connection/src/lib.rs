//! Connecting to discovered cameras
//!
//! `HybridConnectionManager` turns a `CameraDescriptor` plus credentials into
//! a `CameraSession` over the standards-based path, the vendor binary path or
//! both. `ReconnectSupervisor` keeps one camera connected and publishes its
//! `ConnectionState`.

pub mod errors;
pub mod manager;
pub mod reconnect;
pub mod session;
pub mod strategy;

pub use errors::ConnectionError;
pub use manager::{HybridConnectionManager, StateObserver};
pub use reconnect::{backoff_delay, ReconnectSupervisor};
pub use session::CameraSession;
pub use strategy::ProtocolStrategy;
