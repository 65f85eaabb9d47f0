use std::collections::HashSet;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use camscout_core::{DiscoveryMethod, DiscoveryResult, HTTP_PORT, WS_DISCOVERY_PORT};
use camscout_device_onvif::{parse_probe_matches, probe_message};
use ipnetwork::Ipv4Network;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{multicast, DiscoveryAdapter, ProbeEvent, ProbeStream, EVENT_BUFFER};

/// WS-Discovery `Probe` for network video transmitters
pub struct WsDiscoveryAdapter {
    group: SocketAddr,
}

impl Default for WsDiscoveryAdapter {
    fn default() -> Self {
        Self {
            group: SocketAddr::from(([239, 255, 255, 250], WS_DISCOVERY_PORT)),
        }
    }
}

impl WsDiscoveryAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Send the probe somewhere other than the multicast group
    pub fn with_target(target: SocketAddr) -> Self {
        Self { group: target }
    }
}

/// Device service endpoints announced in one reply. A match without XAddrs
/// points at the sender on port 80.
fn reply_endpoints(bytes: &[u8], from: SocketAddr) -> Vec<(IpAddr, u16)> {
    let text = String::from_utf8_lossy(bytes);
    let matches = match parse_probe_matches(&text) {
        Ok(m) => m,
        Err(e) => {
            debug!(%from, error = %e, "Ignoring non-ProbeMatches reply");
            return Vec::new();
        }
    };

    let mut endpoints = Vec::new();
    for m in matches {
        let announced = m.endpoints();
        if announced.is_empty() {
            endpoints.push((from.ip(), HTTP_PORT));
        }
        for (host, port) in announced {
            let ip = host.parse::<IpAddr>().unwrap_or_else(|_| from.ip());
            endpoints.push((ip, port));
        }
    }
    endpoints
}

impl DiscoveryAdapter for WsDiscoveryAdapter {
    fn method(&self) -> DiscoveryMethod {
        DiscoveryMethod::WsDiscovery
    }

    fn probe(self: Box<Self>, _subnet: Ipv4Network, timeout: Duration) -> ProbeStream {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);

        tokio::spawn(async move {
            let started = Instant::now();
            let deadline = started + timeout;
            let message = probe_message(Uuid::new_v4());

            let socket = match multicast::send_query(self.group, message.as_bytes()).await {
                Ok(s) => s,
                Err(e) => {
                    warn!(error = %e, "WS-Discovery unavailable");
                    let _ = tx.send(ProbeEvent::Diagnostic(format!("ws-discovery: {}", e))).await;
                    return;
                }
            };

            let mut seen = HashSet::new();
            let mut buf = vec![0u8; 16 * 1024];
            while let Some((len, from)) = multicast::recv_until(&socket, deadline, &mut buf).await {
                for (host, port) in reply_endpoints(&buf[..len], from) {
                    if !seen.insert((host, port)) {
                        continue;
                    }
                    let hit = DiscoveryResult::hit(host, port, DiscoveryMethod::WsDiscovery, started.elapsed());
                    if tx.send(ProbeEvent::Found(hit)).await.is_err() {
                        return;
                    }
                }
            }
            info!(found = seen.len(), "WS-Discovery probe finished");
        });

        rx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::UdpSocket;

    const REPLY: &str = r#"<?xml version="1.0"?><e:Envelope xmlns:e="http://www.w3.org/2003/05/soap-envelope" xmlns:d="http://schemas.xmlsoap.org/ws/2005/04/discovery"><e:Body><d:ProbeMatches>
        <d:ProbeMatch><d:XAddrs>http://127.0.0.1:8899/onvif/device_service</d:XAddrs></d:ProbeMatch>
        <d:ProbeMatch><d:XAddrs></d:XAddrs></d:ProbeMatch>
        </d:ProbeMatches></e:Body></e:Envelope>"#;

    #[tokio::test]
    async fn test_probe_collects_distinct_endpoints() {
        let responder = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let target = responder.local_addr().unwrap();
        tokio::spawn(async move {
            let mut buf = vec![0u8; 4096];
            let (len, from) = responder.recv_from(&mut buf).await.unwrap();
            assert!(String::from_utf8_lossy(&buf[..len]).contains("NetworkVideoTransmitter"));
            // duplicate replies collapse into one result per endpoint
            responder.send_to(REPLY.as_bytes(), from).await.unwrap();
            responder.send_to(REPLY.as_bytes(), from).await.unwrap();
        });

        let adapter = Box::new(WsDiscoveryAdapter::with_target(target));
        let mut rx = adapter.probe("127.0.0.0/8".parse().unwrap(), Duration::from_millis(400));

        let mut found = Vec::new();
        while let Some(event) = rx.recv().await {
            if let ProbeEvent::Found(hit) = event {
                found.push(hit.key());
            }
        }
        found.sort();
        let lo: IpAddr = "127.0.0.1".parse().unwrap();
        assert_eq!(found, vec![(lo, 80), (lo, 8899)]);
    }
}
