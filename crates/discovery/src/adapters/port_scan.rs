use std::collections::HashSet;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use camscout_core::{subnet_hosts, DiscoveryMethod, DiscoveryResult};
use ipnetwork::Ipv4Network;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Semaphore};
use tokio::time::{sleep_until, timeout, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::{DiscoveryAdapter, ProbeEvent, ProbeStream, EVENT_BUFFER};

/// Shared count of TCP connects issued
#[derive(Debug, Clone, Default)]
pub struct ProbeCounter(Arc<AtomicUsize>);

impl ProbeCounter {
    pub fn get(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }

    pub(crate) fn bump(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

/// Bounded-parallel TCP connect scan
///
/// Targets are ordered port-major: the first port in the list is tried on
/// every host before the second, so a short budget still covers the most
/// telling ports.
pub struct PortScanner {
    ports: Vec<u16>,
    max_concurrent: usize,
    connect_timeout: Duration,
    cancel: CancellationToken,
    exclude_hosts: HashSet<IpAddr>,
    skip_pairs: HashSet<(IpAddr, u16)>,
    counter: ProbeCounter,
}

impl PortScanner {
    pub fn new(ports: Vec<u16>, max_concurrent: usize, connect_timeout: Duration) -> Self {
        Self {
            ports,
            max_concurrent: max_concurrent.max(1),
            connect_timeout,
            cancel: CancellationToken::new(),
            exclude_hosts: HashSet::new(),
            skip_pairs: HashSet::new(),
            counter: ProbeCounter::default(),
        }
    }

    /// Stop issuing connects once `token` is cancelled
    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn exclude_hosts(mut self, hosts: impl IntoIterator<Item = IpAddr>) -> Self {
        self.exclude_hosts.extend(hosts);
        self
    }

    pub fn skip_pairs(mut self, pairs: impl IntoIterator<Item = (IpAddr, u16)>) -> Self {
        self.skip_pairs.extend(pairs);
        self
    }

    pub fn with_counter(mut self, counter: ProbeCounter) -> Self {
        self.counter = counter;
        self
    }

    pub fn targets(&self, subnet: &Ipv4Network) -> Vec<(IpAddr, u16)> {
        let hosts: Vec<IpAddr> = subnet_hosts(subnet)
            .into_iter()
            .map(IpAddr::V4)
            .filter(|h| !self.exclude_hosts.contains(h))
            .collect();

        self.ports
            .iter()
            .flat_map(|&port| hosts.iter().map(move |&host| (host, port)))
            .filter(|pair| !self.skip_pairs.contains(pair))
            .collect()
    }
}

impl DiscoveryAdapter for PortScanner {
    fn method(&self) -> DiscoveryMethod {
        DiscoveryMethod::PortScan
    }

    fn probe(self: Box<Self>, subnet: Ipv4Network, budget: Duration) -> ProbeStream {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let targets = self.targets(&subnet);

        tokio::spawn(async move {
            let deadline = Instant::now() + budget;
            let semaphore = Arc::new(Semaphore::new(self.max_concurrent));
            let total = targets.len();
            let mut issued = 0usize;

            debug!(%subnet, targets = total, ports = ?self.ports, "Port scan starting");

            for (host, port) in targets {
                if self.cancel.is_cancelled() || Instant::now() >= deadline {
                    break;
                }

                let permit = tokio::select! {
                    permit = semaphore.clone().acquire_owned() => match permit {
                        Ok(p) => p,
                        Err(_) => break,
                    },
                    _ = self.cancel.cancelled() => break,
                    _ = sleep_until(deadline) => break,
                };

                issued += 1;
                self.counter.bump();

                let tx = tx.clone();
                let connect_timeout = self.connect_timeout;
                tokio::spawn(async move {
                    let _permit = permit;
                    let started = Instant::now();
                    let addr = SocketAddr::new(host, port);
                    if let Ok(Ok(_stream)) = timeout(connect_timeout, TcpStream::connect(addr)).await {
                        debug!(%host, port, "Port open");
                        let hit = DiscoveryResult::hit(host, port, DiscoveryMethod::PortScan, started.elapsed());
                        let _ = tx.send(ProbeEvent::Found(hit)).await;
                    }
                });
            }

            if issued < total {
                let reason = if self.cancel.is_cancelled() { "cancelled" } else { "budget exhausted" };
                info!(issued, total, reason, "Port scan stopped early");
                let _ = tx
                    .send(ProbeEvent::Diagnostic(format!(
                        "port scan {}: {} of {} probes issued",
                        reason, issued, total
                    )))
                    .await;
            } else {
                debug!(issued, "Port scan issued every probe");
            }
            // in-flight connects keep their own sender clones; the stream
            // closes once they finish
        });

        rx
    }
}
