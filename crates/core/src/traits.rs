use crate::models::{MediaEndpoint, ProtocolType};
use async_trait::async_trait;
use std::net::SocketAddr;

/// A live, authenticated link to one camera over one protocol
/// (standards-based or vendor binary).
#[async_trait]
pub trait CameraHandle: Send + Sync {
    /// Protocol family this handle speaks
    fn protocol(&self) -> ProtocolType;

    /// Remote endpoint of the control channel
    fn endpoint(&self) -> SocketAddr;

    /// Media endpoint, if this handle can resolve one
    async fn media_endpoint(&self) -> Option<MediaEndpoint>;

    /// Cheap liveness check used by the reconnection supervisor
    async fn is_alive(&self) -> bool;

    /// Tear down underlying sockets. Must be idempotent.
    async fn close(&self);
}
