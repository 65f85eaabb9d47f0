use std::collections::HashSet;
use std::net::IpAddr;
use std::time::{Duration, Instant};

use camscout_core::{DiscoveryMethod, DiscoveryResult};
use ipnetwork::Ipv4Network;
use mdns_sd::{ServiceDaemon, ServiceEvent};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::{DiscoveryAdapter, ProbeEvent, ProbeStream, EVENT_BUFFER};

/// Service types cameras commonly advertise
pub const CAMERA_SERVICE_TYPES: &[&str] = &["_rtsp._tcp.local.", "_onvif._tcp.local.", "_http._tcp.local."];

/// mDNS browse for camera-ish service types
pub struct MdnsAdapter {
    service_types: Vec<String>,
}

impl Default for MdnsAdapter {
    fn default() -> Self {
        Self {
            service_types: CAMERA_SERVICE_TYPES.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl MdnsAdapter {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DiscoveryAdapter for MdnsAdapter {
    fn method(&self) -> DiscoveryMethod {
        DiscoveryMethod::Mdns
    }

    fn probe(self: Box<Self>, _subnet: Ipv4Network, timeout: Duration) -> ProbeStream {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);

        // mdns-sd receivers are blocking; drain them off the async runtime
        tokio::task::spawn_blocking(move || {
            let started = Instant::now();

            let daemon = match ServiceDaemon::new() {
                Ok(d) => d,
                Err(e) => {
                    warn!(error = %e, "mDNS daemon unavailable");
                    let _ = tx.blocking_send(ProbeEvent::Diagnostic(format!("mdns: {}", e)));
                    return;
                }
            };

            let mut receivers = Vec::new();
            for service_type in &self.service_types {
                match daemon.browse(service_type) {
                    Ok(rx) => receivers.push((service_type.as_str(), rx)),
                    Err(e) => {
                        let _ = tx.blocking_send(ProbeEvent::Diagnostic(format!(
                            "mdns browse {}: {}",
                            service_type, e
                        )));
                    }
                }
            }

            let mut seen = HashSet::new();
            'collect: while started.elapsed() < timeout && !receivers.is_empty() {
                for (service_type, receiver) in &receivers {
                    let event = match receiver.recv_timeout(Duration::from_millis(50)) {
                        Ok(event) => event,
                        Err(_) => continue,
                    };
                    let ServiceEvent::ServiceResolved(info) = event else {
                        continue;
                    };
                    debug!(service = %info.get_fullname(), service_type, "mDNS service resolved");

                    let port = info.get_port();
                    for addr in info.get_addresses() {
                        let IpAddr::V4(v4) = addr else { continue };
                        let host = IpAddr::V4(*v4);
                        if !seen.insert((host, port)) {
                            continue;
                        }
                        let hit = DiscoveryResult::hit(host, port, DiscoveryMethod::Mdns, started.elapsed());
                        if tx.blocking_send(ProbeEvent::Found(hit)).is_err() {
                            break 'collect;
                        }
                    }
                }
            }

            for (service_type, _) in &receivers {
                let _ = daemon.stop_browse(service_type);
            }
            if let Err(e) = daemon.shutdown() {
                debug!(error = %e, "mDNS daemon shutdown failed");
            }
            info!(found = seen.len(), "mDNS browse finished");
        });

        rx
    }
}
