//! Protocol detection and camera validation
//!
//! `classify` tries, in order, an ONVIF device-service call, an RTSP
//! `OPTIONS` handshake, a vendor binary login and a plain HTTP `GET /`. The
//! first structurally valid answer decides the kind. HTTP answers are then
//! screened so routers and other login-only appliances are rejected.

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use camscout_core::{Credential, ServiceKind, WireConfig};
use camscout_device_onvif::OnvifController;
use camscout_wire::{BinaryClient, WireError};
use reqwest::Client;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info};

use crate::errors::DetectError;

/// Router firmware names unambiguous enough to match anywhere in a page.
/// A hit rejects the whole host.
pub const ROUTER_FIRMWARE_MARKERS: &[&str] = &[
    "routeros",
    "mikrotik",
    "openwrt",
    "dd-wrt",
    "tomato firmware",
    "asuswrt",
    "fritz!box",
    "edgeos",
    "pfsense",
    "opnsense",
];

/// Router vendors and generic gateway words. Camera lines share some of
/// these names, so they only count in the `<title>` or `Server` header.
pub const ROUTER_MARKERS: &[&str] = &[
    "router",
    "netgear",
    "linksys",
    "speedport",
    "livebox",
    "sagemcom",
    "technicolor",
    "zyxel",
    "draytek",
    "ubiquiti",
    "unifi",
    "home gateway",
    "wireless n gateway",
    "archer c",
    "tenda",
    "totolink",
];

/// Words a camera or recorder web UI almost always contains
pub const CAMERA_MARKERS: &[&str] = &[
    "camera",
    "ipcam",
    "ip cam",
    "webcam",
    "unifi protect",
    "arlo",
    "video",
    "nvr",
    "dvr",
    "onvif",
    "rtsp",
    "live view",
    "liveview",
    "surveillance",
    "netsurveillance",
    "ptz",
    "stream",
];

const LOGIN_MARKERS: &[&str] = &["type=\"password\"", "type='password'", "type=password", "login", "log in", "sign in"];

const MAX_BODY: usize = 64 * 1024;

#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub kind: ServiceKind,
    /// 0.0 to 1.0
    pub confidence: f32,
    /// Rejection applies to every port on the host
    pub host_wide: bool,
    pub detail: Option<String>,
}

impl Classification {
    fn new(kind: ServiceKind, confidence: f32, detail: impl Into<String>) -> Self {
        Self {
            kind,
            confidence,
            host_wide: false,
            detail: Some(detail.into()),
        }
    }

    fn reject_host(detail: impl Into<String>) -> Self {
        Self {
            kind: ServiceKind::Rejected,
            confidence: 0.9,
            host_wide: true,
            detail: Some(detail.into()),
        }
    }

    /// Rebuild a verdict from a fresh cache entry. Cached web hits only
    /// enrich, since the cache does not keep the confidence.
    pub(crate) fn cached(kind: ServiceKind) -> Self {
        let confidence = if kind == ServiceKind::Web { 0.3 } else { 0.9 };
        Classification::new(kind, confidence, "cached")
    }

    /// A 401 is a login prompt by definition
    fn with_login_fallback(self) -> Self {
        if self.kind == ServiceKind::Web && self.confidence < 0.5 {
            Classification::new(ServiceKind::Rejected, 0.7, "authentication prompt without camera markers")
        } else {
            self
        }
    }

    /// Whether this hit is strong enough to put a new camera on the roster.
    /// A web page without camera markers only enriches an existing entry.
    pub fn creates_descriptor(&self) -> bool {
        match self.kind {
            ServiceKind::StandardsBased | ServiceKind::Media | ServiceKind::Proprietary => true,
            ServiceKind::Web => self.confidence >= 0.5,
            ServiceKind::Rejected => false,
        }
    }
}

/// Verdict on an HTTP page
pub fn screen_page(body: &str, server_header: Option<&str>) -> Classification {
    let lower = body.to_lowercase();
    let server = server_header.map(str::to_lowercase).unwrap_or_default();
    let title = page_title(&lower).unwrap_or_default();

    if let Some(marker) = ROUTER_FIRMWARE_MARKERS
        .iter()
        .find(|m| server.contains(*m) || lower.contains(*m))
    {
        return Classification::reject_host(format!("router firmware \"{}\"", marker));
    }

    let headline_is_camera = CAMERA_MARKERS.iter().any(|m| title.contains(m) || server.contains(m));
    if !headline_is_camera {
        if let Some(marker) = ROUTER_MARKERS.iter().find(|m| title.contains(*m) || server.contains(*m)) {
            return Classification::reject_host(format!("router marker \"{}\"", marker));
        }
    }

    let has_camera_marker = CAMERA_MARKERS.iter().any(|m| lower.contains(m) || server.contains(m));
    let is_login = LOGIN_MARKERS.iter().any(|m| lower.contains(m));

    match (has_camera_marker, is_login) {
        (true, _) => Classification::new(ServiceKind::Web, 0.6, "camera web interface"),
        (false, true) => Classification::new(ServiceKind::Rejected, 0.7, "login page without camera markers"),
        (false, false) => Classification::new(ServiceKind::Web, 0.3, "generic web page"),
    }
}

fn page_title(lower_body: &str) -> Option<String> {
    let start = lower_body.find("<title>")? + "<title>".len();
    let end = lower_body[start..].find("</title>")? + start;
    Some(lower_body[start..end].trim().to_string())
}

pub struct ProtocolDetector {
    http: Client,
    probe_timeout: Duration,
    wire: WireConfig,
}

impl ProtocolDetector {
    pub fn new(probe_timeout: Duration, wire: WireConfig) -> Result<Self, DetectError> {
        let http = Client::builder()
            .timeout(probe_timeout)
            .connect_timeout(probe_timeout)
            .redirect(reqwest::redirect::Policy::limited(3))
            .build()?;
        Ok(Self {
            http,
            probe_timeout,
            wire,
        })
    }

    pub async fn classify(
        &self,
        host: IpAddr,
        port: u16,
        credential: Option<&Credential>,
    ) -> Result<Classification, DetectError> {
        let addr = SocketAddr::new(host, port);

        if self.probe_onvif(addr).await {
            info!(%host, port, "Detected ONVIF device service");
            return Ok(Classification::new(ServiceKind::StandardsBased, 0.95, "ONVIF device service"));
        }

        if self.probe_rtsp(addr).await {
            info!(%host, port, "Detected RTSP server");
            return Ok(Classification::new(ServiceKind::Media, 0.9, "RTSP OPTIONS answered"));
        }

        if let Some(found) = self.probe_binary(addr, credential).await {
            info!(%host, port, "Detected vendor binary protocol");
            return Ok(found);
        }

        if let Some(verdict) = self.probe_http(addr).await {
            if verdict.kind == ServiceKind::Rejected {
                info!(%host, port, host_wide = verdict.host_wide, detail = ?verdict.detail, "Rejected non-camera responder");
            } else {
                debug!(%host, port, confidence = verdict.confidence, "Web responder");
            }
            return Ok(verdict);
        }

        debug!(%host, port, "No probe answered");
        Err(DetectError::Unresponsive { host, port })
    }

    /// Anonymous `GetSystemDateAndTime`
    async fn probe_onvif(&self, addr: SocketAddr) -> bool {
        let controller = match OnvifController::new(addr, None, self.probe_timeout) {
            Ok(c) => c,
            Err(_) => return false,
        };
        match controller.get_system_date_and_time().await {
            Ok(()) => true,
            Err(e) => {
                debug!(%addr, error = %e, "ONVIF probe failed");
                false
            }
        }
    }

    async fn probe_rtsp(&self, addr: SocketAddr) -> bool {
        let mut stream = match timeout(self.probe_timeout, TcpStream::connect(addr)).await {
            Ok(Ok(s)) => s,
            _ => return false,
        };

        let request = format!(
            "OPTIONS rtsp://{}/ RTSP/1.0\r\nCSeq: 1\r\nUser-Agent: camscout\r\n\r\n",
            addr
        );
        if stream.write_all(request.as_bytes()).await.is_err() {
            return false;
        }

        let mut buf = [0u8; 512];
        match timeout(self.probe_timeout, stream.read(&mut buf)).await {
            Ok(Ok(n)) if n > 0 => buf[..n].starts_with(b"RTSP/1.0"),
            _ => false,
        }
    }

    /// Any well-formed reply frame counts, including a rejected login
    async fn probe_binary(&self, addr: SocketAddr, credential: Option<&Credential>) -> Option<Classification> {
        let wire = WireConfig {
            io_timeout_ms: self.probe_timeout.as_millis() as u64,
            ..self.wire.clone()
        };
        let client = BinaryClient::connect(addr, &wire, self.probe_timeout).await.ok()?;

        let (user, secret) = credential
            .map(|c| (c.username.as_str(), c.secret.as_str()))
            .unwrap_or(("admin", ""));

        let result = client.login(user, secret).await;
        client.close().await;

        match result {
            Ok(_) => Some(Classification::new(ServiceKind::Proprietary, 0.95, "vendor login accepted")),
            Err(WireError::AuthenticationFailed { code }) => Some(Classification::new(
                ServiceKind::Proprietary,
                0.85,
                format!("vendor login answered with status {}", code),
            )),
            Err(WireError::CommandFailed { .. }) | Err(WireError::PayloadInvalid(_)) => None,
            Err(e) => {
                debug!(%addr, error = %e, "Vendor binary probe failed");
                None
            }
        }
    }

    async fn probe_http(&self, addr: SocketAddr) -> Option<Classification> {
        let url = format!("http://{}/", addr);
        let response = match self.http.get(&url).send().await {
            Ok(r) => r,
            Err(e) => {
                debug!(%addr, error = %e, "HTTP probe failed");
                return None;
            }
        };

        if response.status() == reqwest::StatusCode::UNAUTHORIZED {
            let realm = response
                .headers()
                .get(reqwest::header::WWW_AUTHENTICATE)
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default()
                .to_string();
            return Some(screen_page(&realm, None).with_login_fallback());
        }

        let server = response
            .headers()
            .get(reqwest::header::SERVER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response.text().await.unwrap_or_default();
        let body = truncate(&body, MAX_BODY);

        Some(screen_page(body, server.as_deref()))
    }
}

fn truncate(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_router_login_page_rejects_host() {
        let page = r#"<html><head><title>TP-LINK Wireless Router</title></head>
            <body><form><input type="password" name="pwd"></form></body></html>"#;
        let verdict = screen_page(page, Some("lighttpd"));
        assert_eq!(verdict.kind, ServiceKind::Rejected);
        assert!(verdict.host_wide);
    }

    #[test]
    fn test_firmware_name_in_body_rejects_host() {
        let page = r#"<html><title>Login</title><body>Powered by OpenWrt <input type="password"></body></html>"#;
        let verdict = screen_page(page, None);
        assert_eq!(verdict.kind, ServiceKind::Rejected);
        assert!(verdict.host_wide);
    }

    #[test]
    fn test_vendor_name_in_camera_ui_is_not_a_router() {
        let protect = r#"<html><head><title>UniFi Protect</title></head>
            <body>Ubiquiti camera management. Sign in <input type="password"></body></html>"#;
        let verdict = screen_page(protect, None);
        assert_eq!(verdict.kind, ServiceKind::Web);
        assert!(!verdict.host_wide);

        let arlo = r#"<html><title>Live View</title><body>NETGEAR Arlo, connect your router first</body></html>"#;
        let verdict = screen_page(arlo, Some("nginx"));
        assert_eq!(verdict.kind, ServiceKind::Web);
        assert!(verdict.creates_descriptor());
    }

    #[test]
    fn test_plain_login_page_rejected_for_port() {
        let page = r#"<html><title>Welcome</title><body>Please log in <input type="password"></body></html>"#;
        let verdict = screen_page(page, None);
        assert_eq!(verdict.kind, ServiceKind::Rejected);
        assert!(!verdict.host_wide);
    }

    #[test]
    fn test_camera_login_page_is_web() {
        let page = r#"<html><title>NETSurveillance WEB</title><body>Login <input type="password"></body></html>"#;
        let verdict = screen_page(page, None);
        assert_eq!(verdict.kind, ServiceKind::Web);
        assert!(verdict.creates_descriptor());
    }

    #[test]
    fn test_generic_page_does_not_create_descriptor() {
        let verdict = screen_page("<html><body>It works!</body></html>", Some("Apache"));
        assert_eq!(verdict.kind, ServiceKind::Web);
        assert!(!verdict.creates_descriptor());
    }

    #[test]
    fn test_truncate_respects_char_boundary() {
        let s = "ab€";
        assert_eq!(truncate(s, 3), "ab");
        assert_eq!(truncate(s, 10), s);
    }
}
