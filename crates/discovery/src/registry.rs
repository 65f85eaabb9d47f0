//! The camera roster
//!
//! One owned registry is shared by reference between the discovery
//! coordinator and the connection manager. Every change is published as a
//! `RosterEvent` for persistence and UI collaborators.

use std::collections::{HashMap, HashSet};
use std::net::IpAddr;
use std::sync::{Arc, Mutex as StdMutex};

use camscout_core::{CameraDescriptor, ProtocolType, ServiceKind};
use tokio::sync::{broadcast, Mutex, OwnedMutexGuard, RwLock};
use tracing::{debug, info};

use crate::detector::Classification;

#[derive(Debug, Clone, PartialEq)]
pub enum RosterEvent {
    Added(CameraDescriptor),
    Updated(CameraDescriptor),
    /// `port` is `None` for a host-wide rejection
    Rejected { host: IpAddr, port: Option<u16> },
}

pub struct CameraRegistry {
    cameras: RwLock<HashMap<IpAddr, CameraDescriptor>>,
    rejected: RwLock<HashSet<IpAddr>>,
    detection_locks: StdMutex<HashMap<IpAddr, Arc<Mutex<()>>>>,
    events: broadcast::Sender<RosterEvent>,
}

pub type SharedRegistry = Arc<CameraRegistry>;

impl Default for CameraRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl CameraRegistry {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            cameras: RwLock::new(HashMap::new()),
            rejected: RwLock::new(HashSet::new()),
            detection_locks: StdMutex::new(HashMap::new()),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RosterEvent> {
        self.events.subscribe()
    }

    fn publish(&self, event: RosterEvent) {
        // no subscribers is fine
        let _ = self.events.send(event);
    }

    /// Serialize detection for one host. Hold the guard across probe and
    /// write so two detections never race on the same descriptor.
    pub async fn lock_host(&self, host: IpAddr) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self
                .detection_locks
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            locks.entry(host).or_default().clone()
        };
        lock.lock_owned().await
    }

    /// Add or replace a descriptor supplied by a collaborator
    pub async fn upsert(&self, descriptor: CameraDescriptor) {
        let host = descriptor.host;
        let previous = self.cameras.write().await.insert(host, descriptor.clone());
        self.rejected.write().await.remove(&host);
        match previous {
            None => self.publish(RosterEvent::Added(descriptor)),
            Some(old) if old != descriptor => self.publish(RosterEvent::Updated(descriptor)),
            Some(_) => {}
        }
    }

    pub async fn get(&self, host: IpAddr) -> Option<CameraDescriptor> {
        self.cameras.read().await.get(&host).cloned()
    }

    /// Cameras ordered by address
    pub async fn list(&self) -> Vec<CameraDescriptor> {
        let mut all: Vec<_> = self.cameras.read().await.values().cloned().collect();
        all.sort_by_key(|d| d.host);
        all
    }

    pub async fn len(&self) -> usize {
        self.cameras.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.cameras.read().await.is_empty()
    }

    pub async fn is_rejected(&self, host: IpAddr) -> bool {
        self.rejected.read().await.contains(&host)
    }

    /// Whether `host` has answered ONVIF or a vendor login. Such a host is
    /// never rejected wholesale on the strength of a web page.
    pub async fn speaks_camera_protocol(&self, host: IpAddr) -> bool {
        self.cameras
            .read()
            .await
            .get(&host)
            .is_some_and(|c| c.control_port.is_some() || c.proprietary_port.is_some())
    }

    pub async fn camera_hosts(&self) -> HashSet<IpAddr> {
        self.cameras.read().await.keys().copied().collect()
    }

    /// Merge one classified `(host, port)`. Returns the descriptor when the
    /// roster changed. Callers should hold `lock_host(host)`.
    pub async fn record_detection(
        &self,
        host: IpAddr,
        port: u16,
        classification: &Classification,
    ) -> Option<CameraDescriptor> {
        if classification.kind == ServiceKind::Rejected {
            if classification.host_wide && !self.speaks_camera_protocol(host).await {
                self.reject_host(host).await;
            } else {
                debug!(%host, port, "Port rejected");
                self.publish(RosterEvent::Rejected { host, port: Some(port) });
            }
            return None;
        }

        if self.is_rejected(host).await {
            debug!(%host, port, "Ignoring detection on rejected host");
            return None;
        }

        let mut cameras = self.cameras.write().await;
        let (descriptor, added) = match cameras.get_mut(&host) {
            Some(existing) => (existing, false),
            None if classification.creates_descriptor() => {
                (cameras.entry(host).or_insert_with(|| CameraDescriptor::new(host)), true)
            }
            None => return None,
        };

        let changed = descriptor.apply_detection(port, classification.kind);
        let snapshot = descriptor.clone();
        drop(cameras);

        if added {
            info!(%host, port, kind = classification.kind.as_str(), "Camera added to roster");
            self.publish(RosterEvent::Added(snapshot.clone()));
            Some(snapshot)
        } else if changed {
            self.publish(RosterEvent::Updated(snapshot.clone()));
            Some(snapshot)
        } else {
            None
        }
    }

    /// Remove `host` from the roster and refuse future detections on it
    pub async fn reject_host(&self, host: IpAddr) {
        let removed = self.cameras.write().await.remove(&host);
        let newly = self.rejected.write().await.insert(host);
        if newly || removed.is_some() {
            info!(%host, "Host rejected");
            self.publish(RosterEvent::Rejected { host, port: None });
        }
    }

    /// Fold a connection-time detection result into the descriptor.
    /// Callers should hold `lock_host(host)`.
    pub async fn resolve_protocol(
        &self,
        known: &CameraDescriptor,
        protocol: ProtocolType,
        control_port: Option<u16>,
        proprietary_port: Option<u16>,
    ) -> CameraDescriptor {
        let host = known.host;
        let mut cameras = self.cameras.write().await;
        let added = !cameras.contains_key(&host);
        let descriptor = cameras.entry(host).or_insert_with(|| known.clone());
        let before = descriptor.clone();

        if let Some(port) = control_port {
            descriptor.apply_detection(port, ServiceKind::StandardsBased);
        }
        if let Some(port) = proprietary_port {
            descriptor.apply_detection(port, ServiceKind::Proprietary);
        }
        if descriptor.auto_detect {
            descriptor.protocol_type = descriptor.protocol_type.merge(protocol);
        }

        let snapshot = descriptor.clone();
        drop(cameras);

        if added {
            self.publish(RosterEvent::Added(snapshot.clone()));
        } else if snapshot != before {
            info!(%host, protocol = snapshot.protocol_type.as_str(), "Camera protocol resolved");
            self.publish(RosterEvent::Updated(snapshot.clone()));
        }
        snapshot
    }
}
