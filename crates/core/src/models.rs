use chrono::{DateTime, Utc};
use ipnetwork::Ipv4Network;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr};
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

use crate::ports::DEFAULT_FALLBACK_PORTS;

/// Local network topology, computed once per discovery session
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkInfo {
    pub local_ip: Ipv4Addr,
    pub subnet: Ipv4Network,
    pub gateway: Option<Ipv4Addr>,
    pub interface: String,
}

impl NetworkInfo {
    /// Subnet in CIDR notation, e.g. `192.168.1.0/24`
    pub fn cidr(&self) -> String {
        format!("{}/{}", self.subnet.network(), self.subnet.prefix())
    }

    /// Probe-able hosts: every address in the subnet except the network and
    /// broadcast addresses and our own.
    pub fn hosts(&self) -> Vec<Ipv4Addr> {
        subnet_hosts(&self.subnet)
            .into_iter()
            .filter(|ip| *ip != self.local_ip)
            .collect()
    }
}

/// Every usable host address in `subnet`
pub fn subnet_hosts(subnet: &Ipv4Network) -> Vec<Ipv4Addr> {
    let network = subnet.network();
    let broadcast = subnet.broadcast();
    let point_to_point = subnet.prefix() >= 31;

    subnet
        .iter()
        .filter(|ip| point_to_point || (*ip != network && *ip != broadcast))
        .collect()
}

/// Lifecycle of a discovery session
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Running,
    Completed,
    Cancelled,
}

/// One scan of a subnet
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DiscoverySession {
    pub id: Uuid,
    pub subnet: Ipv4Network,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub status: SessionStatus,
    pub devices_found: usize,
}

impl DiscoverySession {
    pub fn start(subnet: Ipv4Network) -> Self {
        Self {
            id: Uuid::new_v4(),
            subnet,
            started_at: Utc::now(),
            finished_at: None,
            status: SessionStatus::Running,
            devices_found: 0,
        }
    }

    /// Move to a terminal status. A session that already finished keeps its
    /// first terminal status.
    pub fn finish(&mut self, status: SessionStatus) {
        if self.status != SessionStatus::Running {
            return;
        }
        self.status = status;
        self.finished_at = Some(Utc::now());
    }

    pub fn is_terminal(&self) -> bool {
        self.status != SessionStatus::Running
    }
}

/// How a `(host, port)` pair was found
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DiscoveryMethod {
    /// WS-Discovery multicast probe
    #[serde(rename = "multicast-a")]
    WsDiscovery,
    /// SSDP multicast search
    #[serde(rename = "multicast-b")]
    Ssdp,
    /// mDNS service browse
    #[serde(rename = "multicast-c")]
    Mdns,
    /// TCP connect scan
    #[serde(rename = "port-scan")]
    PortScan,
}

impl DiscoveryMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiscoveryMethod::WsDiscovery => "multicast-a",
            DiscoveryMethod::Ssdp => "multicast-b",
            DiscoveryMethod::Mdns => "multicast-c",
            DiscoveryMethod::PortScan => "port-scan",
        }
    }
}

/// A single hit reported by a discovery adapter
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DiscoveryResult {
    pub host: IpAddr,
    pub port: u16,
    pub method: DiscoveryMethod,
    pub response_time: Duration,
    pub valid: bool,
    pub error: Option<String>,
}

impl DiscoveryResult {
    pub fn hit(host: IpAddr, port: u16, method: DiscoveryMethod, response_time: Duration) -> Self {
        Self {
            host,
            port,
            method,
            response_time,
            valid: true,
            error: None,
        }
    }

    /// Deduplication key
    pub fn key(&self) -> (IpAddr, u16) {
        (self.host, self.port)
    }
}

/// What a responder on `host:port` turned out to be
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ServiceKind {
    StandardsBased,
    Media,
    Proprietary,
    Web,
    Rejected,
}

impl ServiceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceKind::StandardsBased => "standards-based",
            ServiceKind::Media => "media",
            ServiceKind::Proprietary => "proprietary",
            ServiceKind::Web => "web",
            ServiceKind::Rejected => "rejected",
        }
    }

    pub fn is_camera(&self) -> bool {
        !matches!(self, ServiceKind::Rejected)
    }
}

/// Control protocol family of a camera
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolType {
    Standards,
    Proprietary,
    Hybrid,
    #[default]
    Undetermined,
}

impl ProtocolType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProtocolType::Standards => "standards",
            ProtocolType::Proprietary => "proprietary",
            ProtocolType::Hybrid => "hybrid",
            ProtocolType::Undetermined => "undetermined",
        }
    }

    pub fn is_resolved(&self) -> bool {
        !matches!(self, ProtocolType::Undetermined)
    }

    /// Combine with newly observed evidence. Standards plus proprietary is hybrid.
    pub fn merge(self, other: ProtocolType) -> ProtocolType {
        use ProtocolType::*;
        match (self, other) {
            (Undetermined, x) | (x, Undetermined) => x,
            (Hybrid, _) | (_, Hybrid) => Hybrid,
            (Standards, Proprietary) | (Proprietary, Standards) => Hybrid,
            (x, _) => x,
        }
    }
}

/// Error type for invalid protocol type strings
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParseProtocolTypeError;

impl fmt::Display for ParseProtocolTypeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid protocol type")
    }
}

impl std::error::Error for ParseProtocolTypeError {}

impl FromStr for ProtocolType {
    type Err = ParseProtocolTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "standards" | "standards-based" | "onvif" => Ok(ProtocolType::Standards),
            "proprietary" | "vendor" => Ok(ProtocolType::Proprietary),
            "hybrid" => Ok(ProtocolType::Hybrid),
            "undetermined" | "auto" => Ok(ProtocolType::Undetermined),
            _ => Err(ParseProtocolTypeError),
        }
    }
}

/// A camera in the roster
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CameraDescriptor {
    pub id: String,
    pub host: IpAddr,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub http_port: Option<u16>,
    #[serde(default)]
    pub media_port: Option<u16>,
    #[serde(default)]
    pub control_port: Option<u16>,
    #[serde(default)]
    pub event_port: Option<u16>,
    #[serde(default)]
    pub proprietary_port: Option<u16>,
    #[serde(default)]
    pub protocol_type: ProtocolType,
    #[serde(default = "default_auto_detect")]
    pub auto_detect: bool,
    #[serde(
        default = "default_fallback_ports",
        deserialize_with = "deserialize_fallback_ports"
    )]
    fallback_ports: Vec<u16>,
}

fn default_auto_detect() -> bool {
    true
}

fn default_fallback_ports() -> Vec<u16> {
    DEFAULT_FALLBACK_PORTS.to_vec()
}

fn deserialize_fallback_ports<'de, D>(deserializer: D) -> Result<Vec<u16>, D::Error>
where
    D: Deserializer<'de>,
{
    let stored = Vec::<u16>::deserialize(deserializer)?;
    Ok(with_default_fallbacks(stored))
}

/// Caller-supplied ports first, then any missing built-in defaults
fn with_default_fallbacks(ports: Vec<u16>) -> Vec<u16> {
    let mut merged: Vec<u16> = Vec::with_capacity(ports.len() + DEFAULT_FALLBACK_PORTS.len());
    for p in ports.into_iter().chain(DEFAULT_FALLBACK_PORTS.iter().copied()) {
        if p != 0 && !merged.contains(&p) {
            merged.push(p);
        }
    }
    merged
}

impl CameraDescriptor {
    /// A fresh descriptor for `host` with nothing detected yet
    pub fn new(host: IpAddr) -> Self {
        Self {
            id: descriptor_id(host),
            host,
            name: None,
            http_port: None,
            media_port: None,
            control_port: None,
            event_port: None,
            proprietary_port: None,
            protocol_type: ProtocolType::Undetermined,
            auto_detect: true,
            fallback_ports: default_fallback_ports(),
        }
    }

    /// Descriptor entered by hand with a fixed protocol
    pub fn manual(host: IpAddr, protocol_type: ProtocolType) -> Self {
        Self {
            protocol_type,
            auto_detect: !protocol_type.is_resolved(),
            ..Self::new(host)
        }
    }

    /// Ordered fallback ports; never empty
    pub fn fallback_ports(&self) -> &[u16] {
        &self.fallback_ports
    }

    /// Put `ports` ahead of the built-in defaults
    pub fn set_fallback_ports(&mut self, ports: Vec<u16>) {
        self.fallback_ports = with_default_fallbacks(ports);
    }

    /// Record a classification for `port`. Returns true when anything changed.
    ///
    /// Descriptors with `auto_detect` off keep their protocol type; their
    /// ports are still filled in when unknown.
    pub fn apply_detection(&mut self, port: u16, kind: ServiceKind) -> bool {
        let before = self.clone();

        let observed = match kind {
            ServiceKind::StandardsBased => {
                self.control_port = Some(port);
                ProtocolType::Standards
            }
            ServiceKind::Proprietary => {
                self.proprietary_port = Some(port);
                ProtocolType::Proprietary
            }
            ServiceKind::Media => {
                self.media_port = Some(port);
                ProtocolType::Undetermined
            }
            ServiceKind::Web => {
                if self.http_port.is_none() {
                    self.http_port = Some(port);
                }
                ProtocolType::Undetermined
            }
            ServiceKind::Rejected => ProtocolType::Undetermined,
        };

        if self.auto_detect {
            self.protocol_type = self.protocol_type.merge(observed);
        }

        *self != before
    }

    /// Ports to try for the standards-based path, most specific first
    pub fn standards_ports(&self) -> Vec<u16> {
        let mut ports = Vec::new();
        for p in [self.control_port, self.http_port].into_iter().flatten() {
            if !ports.contains(&p) {
                ports.push(p);
            }
        }
        for &p in &self.fallback_ports {
            if !ports.contains(&p) {
                ports.push(p);
            }
        }
        ports
    }
}

/// Stable descriptor id derived from the host address
pub fn descriptor_id(host: IpAddr) -> String {
    format!("cam-{}", host.to_string().replace([':', '.'], "-"))
}

/// User-entered credentials. The secret stays plaintext here; hashing happens
/// at the protocol boundary.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub username: String,
    pub secret: String,
}

impl Credential {
    pub fn new(username: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            secret: secret.into(),
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("username", &self.username)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// Where the video-rendering collaborator should pull media from
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MediaEndpoint {
    /// RTSP URL (credentials are not embedded)
    Rtsp { url: String },
    /// Media carried over the vendor binary session itself
    Binary { host: IpAddr, port: u16, channel: u32 },
}

/// Phases of a discovery run
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscoveryPhase {
    Idle,
    Multicast,
    PriorityScan,
    FullScan,
    Completed,
    Cancelled,
}

impl DiscoveryPhase {
    pub fn name(&self) -> &'static str {
        match self {
            DiscoveryPhase::Idle => "idle",
            DiscoveryPhase::Multicast => "phase1-multicast",
            DiscoveryPhase::PriorityScan => "phase2-priority-scan",
            DiscoveryPhase::FullScan => "phase3-full-scan",
            DiscoveryPhase::Completed => "completed",
            DiscoveryPhase::Cancelled => "cancelled",
        }
    }
}

/// Progress report for UI collaborators
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DiscoveryProgress {
    pub session_id: Uuid,
    pub phase: DiscoveryPhase,
    /// 0-100
    pub percent: u8,
    pub devices_found: usize,
}
