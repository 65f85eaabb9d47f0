//! Three-phase discovery
//!
//! 1. Multicast: every enabled multicast adapter listens concurrently.
//! 2. Priority scan: a short port list over hosts not already confirmed.
//! 3. Full scan: the rest of the port catalog under a larger budget.
//!
//! Each phase feeds new `(host, port)` pairs through the detector, the cache
//! and the registry before the next phase picks its targets, so work done in
//! an earlier phase (or an earlier session within the cache TTL) is never
//! repeated.

use std::collections::HashSet;
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;

use camscout_core::{
    full_catalog, DiscoveryConfig, DiscoveryPhase, DiscoveryProgress, DiscoveryResult, DiscoverySession,
    NetworkInfo, ServiceKind, SessionStatus,
};
use futures_util::future::{self, join_all};
use futures_util::stream::{self, StreamExt};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::adapters::{
    DiscoveryAdapter, MdnsAdapter, PortScanner, ProbeCounter, ProbeEvent, ProbeStream, SsdpAdapter,
    WsDiscoveryAdapter,
};
use crate::cache::{CacheLookup, SharedDiscoveryCache};
use crate::detector::{Classification, ProtocolDetector};
use crate::registry::SharedRegistry;

/// Builds a fresh one-shot adapter for each session
pub type AdapterFactory = Box<dyn Fn() -> Box<dyn DiscoveryAdapter> + Send + Sync>;

/// One classified `(host, port)` from a session
#[derive(Debug, Clone, PartialEq)]
pub struct ClassifiedHit {
    pub host: IpAddr,
    pub port: u16,
    pub kind: ServiceKind,
    pub confidence: f32,
    /// Reused from the cache rather than probed
    pub cached: bool,
}

#[derive(Debug, Clone)]
pub struct DiscoveryReport {
    pub session: DiscoverySession,
    /// Raw adapter hits, deduplicated by `(host, port)`
    pub results: Vec<DiscoveryResult>,
    pub classified: Vec<ClassifiedHit>,
    pub diagnostics: Vec<String>,
    /// TCP connects plus detector calls issued during the session
    pub probes_issued: usize,
}

impl DiscoveryReport {
    /// Hosts that ended up on the roster during this session
    pub fn camera_hosts(&self) -> HashSet<IpAddr> {
        self.classified
            .iter()
            .filter(|c| c.kind.is_camera())
            .map(|c| c.host)
            .collect()
    }
}

pub struct DiscoveryCoordinator {
    config: DiscoveryConfig,
    cache: SharedDiscoveryCache,
    detector: Arc<ProtocolDetector>,
    registry: SharedRegistry,
    multicast: Vec<AdapterFactory>,
    snapshot_path: Option<PathBuf>,
    progress: broadcast::Sender<DiscoveryProgress>,
}

/// Per-session bookkeeping
struct Run {
    local_ip: IpAddr,
    seen: HashSet<(IpAddr, u16)>,
    results: Vec<DiscoveryResult>,
    classified: Vec<ClassifiedHit>,
    diagnostics: Vec<String>,
    found: HashSet<IpAddr>,
}

impl Run {
    fn new(local_ip: IpAddr) -> Self {
        Self {
            local_ip,
            seen: HashSet::new(),
            results: Vec::new(),
            classified: Vec::new(),
            diagnostics: Vec::new(),
            found: HashSet::new(),
        }
    }

    /// Keep new hits and return the pairs that still need classifying
    fn absorb(&mut self, events: Vec<ProbeEvent>) -> Vec<(IpAddr, u16)> {
        let mut fresh = Vec::new();
        for event in events {
            match event {
                ProbeEvent::Found(hit) => {
                    if hit.host == self.local_ip || !self.seen.insert(hit.key()) {
                        continue;
                    }
                    fresh.push(hit.key());
                    self.results.push(hit);
                }
                ProbeEvent::Diagnostic(msg) => {
                    debug!(diagnostic = %msg, "Adapter diagnostic");
                    self.diagnostics.push(msg);
                }
            }
        }
        fresh
    }
}

impl DiscoveryCoordinator {
    pub fn new(
        config: DiscoveryConfig,
        cache: SharedDiscoveryCache,
        detector: Arc<ProtocolDetector>,
        registry: SharedRegistry,
    ) -> Self {
        let mut multicast: Vec<AdapterFactory> = Vec::new();
        if config.enable_ws_discovery {
            multicast.push(Box::new(|| Box::new(WsDiscoveryAdapter::new())));
        }
        if config.enable_ssdp {
            multicast.push(Box::new(|| Box::new(SsdpAdapter::new())));
        }
        if config.enable_mdns {
            multicast.push(Box::new(|| Box::new(MdnsAdapter::new())));
        }

        let (progress, _) = broadcast::channel(64);
        Self {
            config,
            cache,
            detector,
            registry,
            multicast,
            snapshot_path: None,
            progress,
        }
    }

    /// Replace the Phase 1 adapter set
    pub fn with_multicast(mut self, adapters: Vec<AdapterFactory>) -> Self {
        self.multicast = adapters;
        self
    }

    /// Save the cache to `path` after every session
    pub fn with_snapshot(mut self, path: PathBuf) -> Self {
        self.snapshot_path = Some(path);
        self
    }

    pub fn subscribe_progress(&self) -> broadcast::Receiver<DiscoveryProgress> {
        self.progress.subscribe()
    }

    pub fn registry(&self) -> &SharedRegistry {
        &self.registry
    }

    pub fn cache(&self) -> &SharedDiscoveryCache {
        &self.cache
    }

    fn emit(&self, session: &DiscoverySession, phase: DiscoveryPhase, percent: u8, devices_found: usize) {
        debug!(phase = phase.name(), percent, devices_found, "Discovery progress");
        let _ = self.progress.send(DiscoveryProgress {
            session_id: session.id,
            phase,
            percent,
            devices_found,
        });
    }

    /// Run one discovery session over `network`. Cancelling `cancel` stops
    /// the session at the next phase boundary or probe and returns what was
    /// found so far.
    pub async fn run(&self, network: &NetworkInfo, cancel: CancellationToken) -> DiscoveryReport {
        let mut session = DiscoverySession::start(network.subnet);
        let mut run = Run::new(IpAddr::V4(network.local_ip));
        let counter = ProbeCounter::default();

        let purged = self.cache.purge_stale().await;
        info!(
            session = %session.id,
            subnet = %network.cidr(),
            purged,
            "Discovery session started"
        );

        let mut percent = 0;
        let mut sweep: Option<HashSet<IpAddr>> = None;
        let phases = [
            (DiscoveryPhase::Multicast, 20),
            (DiscoveryPhase::PriorityScan, 50),
            (DiscoveryPhase::FullScan, 95),
        ];

        for (phase, done_percent) in phases {
            if cancel.is_cancelled() {
                break;
            }
            self.emit(&session, phase, percent, run.found.len());

            let events = match phase {
                DiscoveryPhase::Multicast => self.multicast_phase(network, &cancel).await,
                DiscoveryPhase::PriorityScan => {
                    let ports = self.config.priority_ports.clone();
                    let exclude = self.unconfirmed_only(&run).await;
                    self.scan_phase(network, ports, exclude, self.config.priority_scan_budget(), &run, &counter, &cancel)
                        .await
                }
                _ if self.config.enable_full_scan => {
                    let ports: Vec<u16> = full_catalog(&self.config.extra_ports)
                        .into_iter()
                        .filter(|p| !self.config.priority_ports.contains(p))
                        .collect();
                    let exclude = self.unswept_only(&run).await;
                    sweep = Some(exclude.clone());
                    self.scan_phase(network, ports, exclude, self.config.full_scan_budget(), &run, &counter, &cancel)
                        .await
                }
                _ => {
                    debug!("Full scan disabled");
                    Vec::new()
                }
            };

            let pending = run.absorb(events);
            let hits = self.classify_all(pending, &counter, &cancel).await;
            for hit in hits {
                if hit.kind.is_camera() && self.registry.get(hit.host).await.is_some() {
                    run.found.insert(hit.host);
                }
                run.classified.push(hit);
            }

            info!(
                phase = phase.name(),
                hits = run.results.len(),
                devices = run.found.len(),
                "Discovery phase finished"
            );
            percent = done_percent;
        }

        if let (Some(excluded), false) = (sweep, cancel.is_cancelled()) {
            let mut cameras = self.registry.camera_hosts().await;
            cameras.extend(run.found.iter().copied());
            for host in cameras.into_iter().filter(|h| !excluded.contains(h)) {
                self.cache.mark_swept(host).await;
            }
        }

        session.devices_found = run.found.len();
        if cancel.is_cancelled() {
            session.finish(SessionStatus::Cancelled);
            self.emit(&session, DiscoveryPhase::Cancelled, percent, run.found.len());
            info!(session = %session.id, devices = session.devices_found, "Discovery cancelled");
        } else {
            session.finish(SessionStatus::Completed);
            self.emit(&session, DiscoveryPhase::Completed, 100, run.found.len());
            info!(session = %session.id, devices = session.devices_found, "Discovery completed");
        }

        if let Some(path) = &self.snapshot_path {
            if let Err(e) = self.cache.save(path).await {
                warn!(error = %e, "Failed to save discovery cache");
            }
        }

        DiscoveryReport {
            session,
            results: run.results,
            classified: run.classified,
            diagnostics: run.diagnostics,
            probes_issued: counter.get(),
        }
    }

    async fn multicast_phase(&self, network: &NetworkInfo, cancel: &CancellationToken) -> Vec<ProbeEvent> {
        let window = self.config.multicast_timeout();
        let streams: Vec<ProbeStream> = self
            .multicast
            .iter()
            .map(|factory| {
                let adapter = factory();
                debug!(method = adapter.method().as_str(), "Starting multicast adapter");
                adapter.probe(network.subnet, window)
            })
            .collect();

        join_all(streams.into_iter().map(|rx| drain(rx, cancel)))
            .await
            .into_iter()
            .flatten()
            .collect()
    }

    /// Phase 2 targets: hosts not yet confirmed as cameras
    async fn unconfirmed_only(&self, run: &Run) -> HashSet<IpAddr> {
        let mut exclude = self.cache.confirmed_hosts().await;
        exclude.extend(self.cache.rejected_hosts().await);
        exclude.extend(self.registry.camera_hosts().await);
        exclude.extend(run.found.iter().copied());
        exclude.insert(run.local_ip);
        exclude
    }

    /// Phase 3 targets: every host whose catalog has not been swept within
    /// the TTL, confirmed cameras included
    async fn unswept_only(&self, run: &Run) -> HashSet<IpAddr> {
        let mut exclude = self.cache.swept_hosts().await;
        exclude.extend(self.cache.rejected_hosts().await);
        exclude.insert(run.local_ip);
        exclude
    }

    #[allow(clippy::too_many_arguments)]
    async fn scan_phase(
        &self,
        network: &NetworkInfo,
        ports: Vec<u16>,
        exclude: HashSet<IpAddr>,
        budget: std::time::Duration,
        run: &Run,
        counter: &ProbeCounter,
        cancel: &CancellationToken,
    ) -> Vec<ProbeEvent> {
        if ports.is_empty() {
            return Vec::new();
        }

        let mut skip = self.cache.fresh_pairs().await;
        skip.extend(run.seen.iter().copied());

        let scanner = PortScanner::new(ports, self.config.max_concurrent_sockets, self.config.probe_timeout())
            .with_cancel(cancel.clone())
            .exclude_hosts(exclude)
            .skip_pairs(skip)
            .with_counter(counter.clone());

        let rx = Box::new(scanner).probe(network.subnet, budget);
        drain(rx, cancel).await
    }

    async fn classify_all(
        &self,
        pairs: Vec<(IpAddr, u16)>,
        counter: &ProbeCounter,
        cancel: &CancellationToken,
    ) -> Vec<ClassifiedHit> {
        if pairs.is_empty() {
            return Vec::new();
        }
        debug!(pairs = pairs.len(), "Classifying");

        stream::iter(pairs)
            .map(|(host, port)| self.classify_one(host, port, counter, cancel))
            .buffer_unordered(self.config.max_concurrent_sockets.max(1))
            .filter_map(future::ready)
            .collect()
            .await
    }

    async fn classify_one(
        &self,
        host: IpAddr,
        port: u16,
        counter: &ProbeCounter,
        cancel: &CancellationToken,
    ) -> Option<ClassifiedHit> {
        if cancel.is_cancelled() {
            return None;
        }

        let _guard = self.registry.lock_host(host).await;
        if self.registry.is_rejected(host).await || self.cache.is_host_rejected(host).await {
            debug!(%host, port, "Skipping rejected host");
            return None;
        }

        let (mut verdict, cached) = match self.cache.lookup(host, port).await {
            CacheLookup::FreshHit(kind) => (Classification::cached(kind), true),
            CacheLookup::FreshMiss => return None,
            CacheLookup::Stale | CacheLookup::Unknown => {
                counter.bump();
                match self.detector.classify(host, port, None).await {
                    Ok(v) => (v, false),
                    Err(e) => {
                        debug!(%host, port, error = %e, "Classification failed");
                        return None;
                    }
                }
            }
        };

        if verdict.host_wide && self.registry.speaks_camera_protocol(host).await {
            debug!(%host, port, "Router marker on a confirmed camera, rejecting the port only");
            verdict.host_wide = false;
        }

        if !cached {
            if verdict.kind == ServiceKind::Rejected && verdict.host_wide {
                self.cache.reject_host(host).await;
            }
            self.cache.record(host, port, verdict.kind).await;
        }
        self.registry.record_detection(host, port, &verdict).await;

        Some(ClassifiedHit {
            host,
            port,
            kind: verdict.kind,
            confidence: verdict.confidence,
            cached,
        })
    }
}

/// Collect events until the adapter closes its stream or `cancel` fires
async fn drain(mut rx: ProbeStream, cancel: &CancellationToken) -> Vec<ProbeEvent> {
    let mut events = Vec::new();
    loop {
        tokio::select! {
            event = rx.recv() => match event {
                Some(e) => events.push(e),
                None => break,
            },
            _ = cancel.cancelled() => break,
        }
    }
    events
}

#[cfg(test)]
mod tests {
    use super::*;
    use camscout_core::DiscoveryMethod;
    use std::time::Duration;

    fn hit(host: &str, port: u16) -> ProbeEvent {
        ProbeEvent::Found(DiscoveryResult::hit(
            host.parse().unwrap(),
            port,
            DiscoveryMethod::Ssdp,
            Duration::from_millis(3),
        ))
    }

    #[test]
    fn test_absorb_deduplicates_and_skips_self() {
        let mut run = Run::new("192.168.1.10".parse().unwrap());
        let fresh = run.absorb(vec![
            hit("192.168.1.50", 80),
            hit("192.168.1.50", 80),
            hit("192.168.1.10", 80),
            ProbeEvent::Diagnostic("socket closed".into()),
            hit("192.168.1.50", 554),
        ]);

        assert_eq!(fresh.len(), 2);
        assert_eq!(run.results.len(), 2);
        assert_eq!(run.diagnostics, vec!["socket closed".to_string()]);

        assert!(run.absorb(vec![hit("192.168.1.50", 554)]).is_empty());
    }

    #[tokio::test]
    async fn test_drain_stops_on_cancel() {
        let (tx, rx) = tokio::sync::mpsc::channel(4);
        tx.send(hit("10.0.0.2", 80)).await.unwrap();

        let cancel = CancellationToken::new();
        let c = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            c.cancel();
        });

        // tx stays alive so only the cancel can end the drain
        let events = drain(rx, &cancel).await;
        assert_eq!(events.len(), 1);
        drop(tx);
    }
}
