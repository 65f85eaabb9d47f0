use std::collections::HashSet;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use camscout_core::{DiscoveryMethod, DiscoveryResult, SSDP_PORT};
use ipnetwork::Ipv4Network;
use reqwest::Url;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::{multicast, DiscoveryAdapter, ProbeEvent, ProbeStream, EVENT_BUFFER};

const SSDP_MX: u8 = 2;

/// SSDP `M-SEARCH` for every UPnP responder
pub struct SsdpAdapter {
    group: SocketAddr,
}

impl Default for SsdpAdapter {
    fn default() -> Self {
        Self {
            group: SocketAddr::from(([239, 255, 255, 250], SSDP_PORT)),
        }
    }
}

impl SsdpAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_target(target: SocketAddr) -> Self {
        Self { group: target }
    }

    fn msearch(&self) -> String {
        format!(
            "M-SEARCH * HTTP/1.1\r\n\
             HOST: {}\r\n\
             MAN: \"ssdp:discover\"\r\n\
             MX: {}\r\n\
             ST: ssdp:all\r\n\
             \r\n",
            self.group, SSDP_MX
        )
    }
}

/// `(host, port)` of the description URL in an SSDP search response.
/// Hostnames in `LOCATION` fall back to the sender address.
pub fn parse_ssdp_response(response: &str, from: IpAddr) -> Option<(IpAddr, u16)> {
    let mut lines = response.lines();
    let status = lines.next()?;
    if !status.starts_with("HTTP/1.1 200") && !status.starts_with("NOTIFY") {
        return None;
    }

    let location = lines.find_map(|line| {
        let (name, value) = line.split_once(':')?;
        name.trim().eq_ignore_ascii_case("location").then(|| value.trim())
    })?;

    let url = Url::parse(location).ok()?;
    let host = url
        .host_str()
        .and_then(|h| h.parse::<IpAddr>().ok())
        .unwrap_or(from);
    Some((host, url.port_or_known_default()?))
}

impl DiscoveryAdapter for SsdpAdapter {
    fn method(&self) -> DiscoveryMethod {
        DiscoveryMethod::Ssdp
    }

    fn probe(self: Box<Self>, _subnet: Ipv4Network, timeout: Duration) -> ProbeStream {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);

        tokio::spawn(async move {
            let started = Instant::now();
            let deadline = started + timeout;

            let socket = match multicast::send_query(self.group, self.msearch().as_bytes()).await {
                Ok(s) => s,
                Err(e) => {
                    warn!(error = %e, "SSDP unavailable");
                    let _ = tx.send(ProbeEvent::Diagnostic(format!("ssdp: {}", e))).await;
                    return;
                }
            };

            let mut seen = HashSet::new();
            let mut buf = vec![0u8; 4096];
            while let Some((len, from)) = multicast::recv_until(&socket, deadline, &mut buf).await {
                let response = String::from_utf8_lossy(&buf[..len]);
                let Some((host, port)) = parse_ssdp_response(&response, from.ip()) else {
                    debug!(%from, "Ignoring SSDP reply without LOCATION");
                    continue;
                };
                if !seen.insert((host, port)) {
                    continue;
                }
                let hit = DiscoveryResult::hit(host, port, DiscoveryMethod::Ssdp, started.elapsed());
                if tx.send(ProbeEvent::Found(hit)).await.is_err() {
                    return;
                }
            }
            info!(found = seen.len(), "SSDP search finished");
        });

        rx
    }
}
