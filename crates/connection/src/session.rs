//! A connected camera: one or two live protocol handles under one key

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use async_trait::async_trait;
use camscout_core::{CameraHandle, MediaEndpoint, ProtocolType};
use camscout_device_onvif::OnvifController;
use camscout_wire::BinaryClient;
use chrono::{DateTime, Utc};
use tracing::debug;

pub struct CameraSession {
    host: IpAddr,
    username: String,
    protocol: ProtocolType,
    onvif: Option<Arc<OnvifController>>,
    binary: Option<Arc<BinaryClient>>,
    established_at: DateTime<Utc>,
}

impl std::fmt::Debug for CameraSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CameraSession")
            .field("host", &self.host)
            .field("username", &self.username)
            .field("protocol", &self.protocol)
            .field("onvif", &self.onvif.as_ref().map(|c| c.endpoint()))
            .field("binary", &self.binary.as_ref().map(|b| b.peer()))
            .field("established_at", &self.established_at)
            .finish()
    }
}

impl CameraSession {
    /// The protocol is whatever the live handles speak
    pub(crate) fn new(
        host: IpAddr,
        username: &str,
        onvif: Option<OnvifController>,
        binary: Option<BinaryClient>,
    ) -> Self {
        let protocol = match (&onvif, &binary) {
            (Some(_), Some(_)) => ProtocolType::Hybrid,
            (Some(_), None) => ProtocolType::Standards,
            (None, Some(_)) => ProtocolType::Proprietary,
            (None, None) => ProtocolType::Undetermined,
        };
        Self {
            host,
            username: username.to_string(),
            protocol,
            onvif: onvif.map(Arc::new),
            binary: binary.map(Arc::new),
            established_at: Utc::now(),
        }
    }

    pub fn host(&self) -> IpAddr {
        self.host
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn key(&self) -> (IpAddr, String) {
        (self.host, self.username.clone())
    }

    pub fn established_at(&self) -> DateTime<Utc> {
        self.established_at
    }

    pub fn onvif(&self) -> Option<&Arc<OnvifController>> {
        self.onvif.as_ref()
    }

    pub fn binary(&self) -> Option<&Arc<BinaryClient>> {
        self.binary.as_ref()
    }

    /// Vendor session token, when the binary handle is logged in
    pub fn session_token(&self) -> Option<String> {
        self.binary.as_ref().and_then(|b| b.session_token())
    }

    /// Whether every handle still holds its transport. No traffic.
    pub async fn is_open(&self) -> bool {
        if let Some(c) = &self.onvif {
            if c.is_closed() {
                return false;
            }
        }
        if let Some(b) = &self.binary {
            if !b.is_open().await {
                return false;
            }
        }
        self.onvif.is_some() || self.binary.is_some()
    }

    fn handles(&self) -> Vec<&dyn CameraHandle> {
        let mut handles: Vec<&dyn CameraHandle> = Vec::with_capacity(2);
        if let Some(c) = &self.onvif {
            handles.push(&**c);
        }
        if let Some(b) = &self.binary {
            handles.push(&**b);
        }
        handles
    }
}

#[async_trait]
impl CameraHandle for CameraSession {
    fn protocol(&self) -> ProtocolType {
        self.protocol
    }

    /// Control endpoint; the standards-based one when both are live
    fn endpoint(&self) -> SocketAddr {
        match (&self.onvif, &self.binary) {
            (Some(c), _) => c.endpoint(),
            (None, Some(b)) => b.peer(),
            (None, None) => SocketAddr::new(self.host, 0),
        }
    }

    /// RTSP from the standards-based handle when it resolves one, otherwise
    /// the vendor session itself
    async fn media_endpoint(&self) -> Option<MediaEndpoint> {
        for handle in self.handles() {
            if let Some(endpoint) = handle.media_endpoint().await {
                return Some(endpoint);
            }
        }
        None
    }

    async fn is_alive(&self) -> bool {
        let handles = self.handles();
        if handles.is_empty() {
            return false;
        }
        for handle in handles {
            if !handle.is_alive().await {
                debug!(host = %self.host, protocol = handle.protocol().as_str(), "Handle is not alive");
                return false;
            }
        }
        true
    }

    async fn close(&self) {
        for handle in self.handles() {
            handle.close().await;
        }
    }
}
