//! Time-boxed memo of classified `(host, port)` pairs

use std::collections::{HashMap, HashSet};
use std::net::IpAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use camscout_core::ServiceKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Port used for host-wide entries
const ANY_PORT: u16 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheLookup {
    /// Known camera service, still within the TTL
    FreshHit(ServiceKind),
    /// Known non-camera, still within the TTL
    FreshMiss,
    /// Entry expired; treat as absent
    Stale,
    /// Never seen
    Unknown,
}

impl CacheLookup {
    pub fn is_fresh(&self) -> bool {
        matches!(self, CacheLookup::FreshHit(_) | CacheLookup::FreshMiss)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
struct Entry {
    kind: ServiceKind,
    inserted_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
struct SnapshotEntry {
    host: IpAddr,
    port: u16,
    kind: ServiceKind,
    inserted_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
struct SweptEntry {
    host: IpAddr,
    swept_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Snapshot {
    entries: Vec<SnapshotEntry>,
    #[serde(default)]
    swept: Vec<SweptEntry>,
}

pub struct DiscoveryCache {
    ttl: chrono::Duration,
    entries: RwLock<HashMap<(IpAddr, u16), Entry>>,
    /// Camera hosts whose full port catalog has been walked
    swept: RwLock<HashMap<IpAddr, DateTime<Utc>>>,
}

pub type SharedDiscoveryCache = Arc<DiscoveryCache>;

impl DiscoveryCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl: chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::days(1)),
            entries: RwLock::new(HashMap::new()),
            swept: RwLock::new(HashMap::new()),
        }
    }

    fn is_fresh(&self, entry: &Entry, now: DateTime<Utc>) -> bool {
        now - entry.inserted_at < self.ttl
    }

    pub async fn lookup(&self, host: IpAddr, port: u16) -> CacheLookup {
        self.lookup_at(host, port, Utc::now()).await
    }

    /// Lookup as of `now`. A fresh host-wide rejection wins over any
    /// per-port entry.
    pub async fn lookup_at(&self, host: IpAddr, port: u16, now: DateTime<Utc>) -> CacheLookup {
        let entries = self.entries.read().await;

        if let Some(wild) = entries.get(&(host, ANY_PORT)) {
            if self.is_fresh(wild, now) {
                return CacheLookup::FreshMiss;
            }
        }

        match entries.get(&(host, port)) {
            None => CacheLookup::Unknown,
            Some(e) if !self.is_fresh(e, now) => CacheLookup::Stale,
            Some(e) if e.kind.is_camera() => CacheLookup::FreshHit(e.kind),
            Some(_) => CacheLookup::FreshMiss,
        }
    }

    pub async fn record(&self, host: IpAddr, port: u16, kind: ServiceKind) {
        self.record_at(host, port, kind, Utc::now()).await
    }

    pub async fn record_at(&self, host: IpAddr, port: u16, kind: ServiceKind, now: DateTime<Utc>) {
        debug!(%host, port, kind = kind.as_str(), "Caching classification");
        self.entries
            .write()
            .await
            .insert((host, port), Entry { kind, inserted_at: now });
    }

    /// Mark every port on `host` as non-camera
    pub async fn reject_host(&self, host: IpAddr) {
        self.record(host, ANY_PORT, ServiceKind::Rejected).await
    }

    pub async fn is_host_rejected(&self, host: IpAddr) -> bool {
        let now = Utc::now();
        self.entries
            .read()
            .await
            .get(&(host, ANY_PORT))
            .is_some_and(|e| self.is_fresh(e, now))
    }

    pub async fn invalidate(&self, host: IpAddr, port: u16) {
        self.entries.write().await.remove(&(host, port));
    }

    /// Hosts with at least one fresh camera entry and no fresh host-wide rejection
    pub async fn confirmed_hosts(&self) -> HashSet<IpAddr> {
        let now = Utc::now();
        let entries = self.entries.read().await;
        let rejected: HashSet<IpAddr> = entries
            .iter()
            .filter(|((_, port), e)| *port == ANY_PORT && self.is_fresh(e, now))
            .map(|((host, _), _)| *host)
            .collect();

        entries
            .iter()
            .filter(|((host, port), e)| {
                *port != ANY_PORT && e.kind.is_camera() && self.is_fresh(e, now) && !rejected.contains(host)
            })
            .map(|((host, _), _)| *host)
            .collect()
    }

    /// Every fresh `(host, port)` pair, hits and misses alike
    pub async fn fresh_pairs(&self) -> HashSet<(IpAddr, u16)> {
        let now = Utc::now();
        self.entries
            .read()
            .await
            .iter()
            .filter(|(_, e)| self.is_fresh(e, now))
            .map(|(k, _)| *k)
            .collect()
    }

    /// Hosts with a fresh host-wide rejection
    pub async fn rejected_hosts(&self) -> HashSet<IpAddr> {
        let now = Utc::now();
        self.entries
            .read()
            .await
            .iter()
            .filter(|((_, port), e)| *port == ANY_PORT && self.is_fresh(e, now))
            .map(|((host, _), _)| *host)
            .collect()
    }

    /// Record that every catalog port on `host` has been probed
    pub async fn mark_swept(&self, host: IpAddr) {
        self.mark_swept_at(host, Utc::now()).await
    }

    pub async fn mark_swept_at(&self, host: IpAddr, now: DateTime<Utc>) {
        debug!(%host, "Full catalog sweep recorded");
        self.swept.write().await.insert(host, now);
    }

    /// Hosts with a sweep inside the TTL and no fresh host-wide rejection
    pub async fn swept_hosts(&self) -> HashSet<IpAddr> {
        let now = Utc::now();
        let rejected = self.rejected_hosts().await;
        self.swept
            .read()
            .await
            .iter()
            .filter(|(host, at)| now - **at < self.ttl && !rejected.contains(host))
            .map(|(host, _)| *host)
            .collect()
    }

    /// Drop expired entries and sweeps, returning how many entries were removed
    pub async fn purge_stale(&self) -> usize {
        let now = Utc::now();
        self.swept.write().await.retain(|_, at| now - *at < self.ttl);
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, e| now - e.inserted_at < self.ttl);
        before - entries.len()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Write every fresh entry to `path` as JSON
    pub async fn save(&self, path: &Path) -> Result<()> {
        let now = Utc::now();
        let entries: Vec<SnapshotEntry> = self
            .entries
            .read()
            .await
            .iter()
            .filter(|(_, e)| self.is_fresh(e, now))
            .map(|((host, port), e)| SnapshotEntry {
                host: *host,
                port: *port,
                kind: e.kind,
                inserted_at: e.inserted_at,
            })
            .collect();
        let swept: Vec<SweptEntry> = self
            .swept
            .read()
            .await
            .iter()
            .filter(|(_, at)| now - **at < self.ttl)
            .map(|(host, at)| SweptEntry {
                host: *host,
                swept_at: *at,
            })
            .collect();
        let snapshot = Snapshot { entries, swept };

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let json = serde_json::to_vec_pretty(&snapshot)?;
        tokio::fs::write(path, json)
            .await
            .with_context(|| format!("Failed to write cache snapshot {}", path.display()))?;

        info!(entries = snapshot.entries.len(), path = %path.display(), "Saved discovery cache");
        Ok(())
    }

    /// Merge a snapshot written by `save`. Expired entries are skipped;
    /// a missing file loads nothing.
    pub async fn load(&self, path: &Path) -> Result<usize> {
        let bytes = match tokio::fs::read(path).await {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read cache snapshot {}", path.display()))
            }
        };
        let snapshot: Snapshot = serde_json::from_slice(&bytes).context("Cache snapshot is not valid JSON")?;

        let now = Utc::now();
        let mut entries = self.entries.write().await;
        let mut loaded = 0;
        for item in snapshot.entries {
            let entry = Entry {
                kind: item.kind,
                inserted_at: item.inserted_at,
            };
            if self.is_fresh(&entry, now) {
                entries.insert((item.host, item.port), entry);
                loaded += 1;
            }
        }
        drop(entries);

        let mut swept = self.swept.write().await;
        for item in snapshot.swept {
            if now - item.swept_at < self.ttl {
                swept.insert(item.host, item.swept_at);
            }
        }

        info!(loaded, path = %path.display(), "Loaded discovery cache");
        Ok(loaded)
    }
}
