//! Hybrid connection manager
//!
//! `connect` dispatches once on `ProtocolStrategy`. Resolved descriptors use
//! only their own path; undetermined ones race both detections under the
//! registry's per-host lock and fall back to the descriptor's port list.
//! Live sessions are cached by `(host, username)`.

use std::collections::HashMap;
use std::future::Future;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use camscout_core::{
    CameraDescriptor, CameraHandle, ConnectionConfig, ConnectionState, Credential, ServiceKind, WireConfig,
};
use camscout_device_onvif::OnvifController;
use camscout_discovery::{SharedDiscoveryCache, SharedRegistry};
use camscout_wire::BinaryClient;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::errors::ConnectionError;
use crate::session::CameraSession;
use crate::strategy::ProtocolStrategy;

type SessionKey = (IpAddr, String);
type SessionSlot = Arc<Mutex<Option<Arc<CameraSession>>>>;

/// Receives `Authenticating` once credentials start flowing
pub type StateObserver<'a> = &'a (dyn Fn(ConnectionState) + Send + Sync);

/// Calls the observer at most once however many paths authenticate
struct Announce<'a> {
    observer: StateObserver<'a>,
    sent: AtomicBool,
}

impl<'a> Announce<'a> {
    fn new(observer: StateObserver<'a>) -> Self {
        Self {
            observer,
            sent: AtomicBool::new(false),
        }
    }

    fn authenticating(&self) {
        if !self.sent.swap(true, Ordering::SeqCst) {
            (self.observer)(ConnectionState::Authenticating);
        }
    }
}

type StandardsResult = Result<(OnvifController, u16), ConnectionError>;
type ProprietaryResult = Result<(BinaryClient, u16), ConnectionError>;

pub struct HybridConnectionManager {
    config: ConnectionConfig,
    wire: WireConfig,
    registry: SharedRegistry,
    cache: Option<SharedDiscoveryCache>,
    sessions: StdMutex<HashMap<SessionKey, SessionSlot>>,
}

impl HybridConnectionManager {
    pub fn new(config: ConnectionConfig, wire: WireConfig, registry: SharedRegistry) -> Self {
        Self {
            config,
            wire,
            registry,
            cache: None,
            sessions: StdMutex::new(HashMap::new()),
        }
    }

    /// Record protocols resolved at connect time in the discovery cache too
    pub fn with_cache(mut self, cache: SharedDiscoveryCache) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn registry(&self) -> &SharedRegistry {
        &self.registry
    }

    fn slot(&self, key: &SessionKey) -> SessionSlot {
        let mut sessions = self
            .sessions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        sessions.entry(key.clone()).or_default().clone()
    }

    /// Lock the slot for `key`. A slot dropped from the map while we waited
    /// is stale, so the lookup starts over.
    async fn lock_slot(&self, key: &SessionKey) -> (SessionSlot, OwnedMutexGuard<Option<Arc<CameraSession>>>) {
        loop {
            let slot = self.slot(key);
            let guard = slot.clone().lock_owned().await;
            if self.is_current(key, &slot) {
                return (slot, guard);
            }
        }
    }

    fn is_current(&self, key: &SessionKey, slot: &SessionSlot) -> bool {
        self.sessions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(key)
            .is_some_and(|s| Arc::ptr_eq(s, slot))
    }

    /// Drop the map entry for `key` if it is still `slot`. Callers hold the
    /// slot's lock with nothing cached in it.
    fn forget(&self, key: &SessionKey, slot: &SessionSlot) {
        let mut sessions = self
            .sessions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if sessions.get(key).is_some_and(|s| Arc::ptr_eq(s, slot)) {
            sessions.remove(key);
        }
    }

    async fn is_rejected(&self, host: IpAddr) -> bool {
        if self.registry.is_rejected(host).await {
            return true;
        }
        match &self.cache {
            Some(cache) => cache.is_host_rejected(host).await,
            None => false,
        }
    }

    /// Cached live session for `(host, username)`
    pub async fn session(&self, host: IpAddr, username: &str) -> Option<Arc<CameraSession>> {
        let slot = {
            let sessions = self
                .sessions
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            sessions.get(&(host, username.to_string())).cloned()
        }?;
        let guard = slot.lock().await;
        guard.clone()
    }

    pub async fn connect(
        &self,
        descriptor: &CameraDescriptor,
        credential: &Credential,
    ) -> Result<Arc<CameraSession>, ConnectionError> {
        self.connect_observed(descriptor, credential, &|_| {}).await
    }

    /// Like `connect`, reporting `Authenticating` to `observer`
    pub async fn connect_observed(
        &self,
        descriptor: &CameraDescriptor,
        credential: &Credential,
        observer: StateObserver<'_>,
    ) -> Result<Arc<CameraSession>, ConnectionError> {
        let host = descriptor.host;
        if self.is_rejected(host).await {
            return Err(ConnectionError::Rejected { host });
        }

        let key = (host, credential.username.clone());
        let (slot, mut cached) = self.lock_slot(&key).await;

        if let Some(existing) = cached.as_ref() {
            if existing.is_open().await {
                debug!(%host, user = %credential.username, "Reusing cached session");
                return Ok(existing.clone());
            }
            debug!(%host, user = %credential.username, "Dropping closed cached session");
            existing.close().await;
            *cached = None;
        }

        let strategy = ProtocolStrategy::for_descriptor(descriptor);
        info!(%host, user = %credential.username, strategy = strategy.name(), "Connecting");

        let announce = Announce::new(observer);
        let session = match self.establish(strategy, descriptor, credential, &announce).await {
            Ok(session) => session,
            Err(e) => {
                self.forget(&key, &slot);
                return Err(e);
            }
        };

        info!(
            %host,
            user = %credential.username,
            protocol = session.protocol().as_str(),
            "Camera connected"
        );
        let session = Arc::new(session);
        *cached = Some(session.clone());
        Ok(session)
    }

    async fn establish(
        &self,
        strategy: ProtocolStrategy,
        descriptor: &CameraDescriptor,
        credential: &Credential,
        announce: &Announce<'_>,
    ) -> Result<CameraSession, ConnectionError> {
        let host = descriptor.host;
        match strategy {
            ProtocolStrategy::Standards => {
                let (controller, _) = self
                    .connect_standards(host, &descriptor.standards_ports(), credential, self.config.connect_timeout(), announce)
                    .await?;
                Ok(CameraSession::new(host, &credential.username, Some(controller), None))
            }
            ProtocolStrategy::Proprietary => {
                let (client, _) = self
                    .connect_proprietary(host, self.proprietary_port(descriptor), credential, self.config.connect_timeout(), announce)
                    .await?;
                Ok(CameraSession::new(host, &credential.username, None, Some(client)))
            }
            ProtocolStrategy::Hybrid => self.connect_hybrid(descriptor, credential, announce).await,
            ProtocolStrategy::AutoFallback => self.connect_auto(descriptor, credential, announce).await,
        }
    }

    /// Close every handle of `session` and forget it. Idempotent.
    pub async fn disconnect(&self, session: &CameraSession) {
        let key = session.key();
        let slot = {
            let sessions = self
                .sessions
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            sessions.get(&key).cloned()
        };

        if let Some(slot) = slot {
            let mut cached = slot.lock().await;
            if cached.as_deref().is_some_and(|c| std::ptr::eq(c, session)) {
                *cached = None;
            }
            if cached.is_none() {
                self.forget(&key, &slot);
            }
        }

        session.close().await;
        debug!(host = %session.host(), user = %session.username(), "Session disconnected");
    }

    /// Disconnect whatever session is cached for `(host, username)`
    pub async fn disconnect_key(&self, host: IpAddr, username: &str) {
        if let Some(session) = self.session(host, username).await {
            self.disconnect(&session).await;
        }
    }

    fn proprietary_port(&self, descriptor: &CameraDescriptor) -> u16 {
        descriptor.proprietary_port.unwrap_or(self.wire.port)
    }

    async fn connect_hybrid(
        &self,
        descriptor: &CameraDescriptor,
        credential: &Credential,
        announce: &Announce<'_>,
    ) -> Result<CameraSession, ConnectionError> {
        let host = descriptor.host;
        let connect_timeout = self.config.connect_timeout();
        let standards_ports = descriptor.standards_ports();

        let (standards, proprietary) = tokio::join!(
            self.connect_standards(host, &standards_ports, credential, connect_timeout, announce),
            self.connect_proprietary(host, self.proprietary_port(descriptor), credential, connect_timeout, announce),
        );

        match settle(standards, proprietary).await? {
            (None, None, Some(e)) => Err(e),
            (None, None, None) => Err(ConnectionError::NoUsableProtocol { host }),
            (onvif, binary, failure) => {
                if let Some(e) = failure {
                    warn!(%host, error = %e, "Hybrid camera connected over one protocol only");
                }
                Ok(CameraSession::new(
                    host,
                    &credential.username,
                    onvif.map(|(c, _)| c),
                    binary.map(|(b, _)| b),
                ))
            }
        }
    }

    async fn connect_auto(
        &self,
        descriptor: &CameraDescriptor,
        credential: &Credential,
        announce: &Announce<'_>,
    ) -> Result<CameraSession, ConnectionError> {
        let host = descriptor.host;
        let _detection = self.registry.lock_host(host).await;
        let detect_timeout = self.config.detect_timeout();

        let mut known: Vec<u16> = Vec::new();
        for p in [descriptor.control_port, descriptor.http_port].into_iter().flatten() {
            if !known.contains(&p) {
                known.push(p);
            }
        }

        let standards = async {
            if known.is_empty() {
                return Err(ConnectionError::NoUsableProtocol { host });
            }
            within(
                detect_timeout,
                self.connect_standards(host, &known, credential, detect_timeout, announce),
            )
            .await
        };
        let proprietary = within(
            detect_timeout,
            self.connect_proprietary(host, self.proprietary_port(descriptor), credential, detect_timeout, announce),
        );
        let (standards, proprietary) = tokio::join!(standards, proprietary);

        let (onvif, binary) = match settle(standards, proprietary).await? {
            (None, None, _) => {
                let ports = self.fallback_ports(descriptor, &known);
                info!(%host, ports = ?ports, "Detection found nothing, trying fallback ports");
                match self
                    .connect_standards(host, &ports, credential, self.config.connect_timeout(), announce)
                    .await
                {
                    Ok(found) => (Some(found), None),
                    Err(e) if e.is_authentication() => return Err(e),
                    Err(e) => {
                        debug!(%host, error = %e, "Fallback ports exhausted");
                        return Err(ConnectionError::NoUsableProtocol { host });
                    }
                }
            }
            (onvif, binary, _) => (onvif, binary),
        };

        let control_port = onvif.as_ref().map(|(_, p)| *p);
        let vendor_port = binary.as_ref().map(|(_, p)| *p);
        let session = CameraSession::new(
            host,
            &credential.username,
            onvif.map(|(c, _)| c),
            binary.map(|(b, _)| b),
        );

        let resolved = self
            .registry
            .resolve_protocol(descriptor, session.protocol(), control_port, vendor_port)
            .await;
        if let Some(cache) = &self.cache {
            if let Some(p) = control_port {
                cache.record(host, p, ServiceKind::StandardsBased).await;
            }
            if let Some(p) = vendor_port {
                cache.record(host, p, ServiceKind::Proprietary).await;
            }
        }
        info!(%host, protocol = resolved.protocol_type.as_str(), "Protocol detected at connect time");

        Ok(session)
    }

    /// Descriptor fallbacks, then configured defaults, minus ports already tried
    fn fallback_ports(&self, descriptor: &CameraDescriptor, tried: &[u16]) -> Vec<u16> {
        let mut ports = Vec::new();
        for &p in descriptor.fallback_ports().iter().chain(&self.config.default_fallback_ports) {
            if !tried.contains(&p) && !ports.contains(&p) {
                ports.push(p);
            }
        }
        ports
    }

    /// Try `ports` in order. A rejected login stops the walk.
    async fn connect_standards(
        &self,
        host: IpAddr,
        ports: &[u16],
        credential: &Credential,
        per_port: Duration,
        announce: &Announce<'_>,
    ) -> StandardsResult {
        let mut last_error = None;
        for &port in ports {
            let endpoint = SocketAddr::new(host, port);
            announce.authenticating();
            match OnvifController::connect(endpoint, credential.clone(), per_port).await {
                Ok(controller) => return Ok((controller, port)),
                Err(e) => {
                    let e = ConnectionError::from(e);
                    if e.is_authentication() {
                        warn!(%host, port, user = %credential.username, "Standards-based login rejected");
                        return Err(e);
                    }
                    debug!(%host, port, error = %e, "Standards-based connect failed");
                    last_error = Some(e);
                }
            }
        }
        Err(last_error.unwrap_or(ConnectionError::NoUsableProtocol { host }))
    }

    async fn connect_proprietary(
        &self,
        host: IpAddr,
        port: u16,
        credential: &Credential,
        connect_timeout: Duration,
        announce: &Announce<'_>,
    ) -> ProprietaryResult {
        let peer = SocketAddr::new(host, port);
        let client = BinaryClient::connect(peer, &self.wire, connect_timeout).await?;

        announce.authenticating();
        match client.login(&credential.username, &credential.secret).await {
            Ok(_) => Ok((client, port)),
            Err(e) => {
                client.close().await;
                let e = ConnectionError::from(e);
                if e.is_authentication() {
                    warn!(%host, port, user = %credential.username, "Vendor login rejected");
                } else {
                    debug!(%host, port, error = %e, "Vendor login failed");
                }
                Err(e)
            }
        }
    }
}

async fn within<T>(
    limit: Duration,
    fut: impl Future<Output = Result<T, ConnectionError>>,
) -> Result<T, ConnectionError> {
    match timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(ConnectionError::Network(format!("detection timed out after {:?}", limit))),
    }
}

/// Combine two parallel attempts. A rejected login on either side closes the
/// other handle and fails the whole connect. Otherwise returns what
/// succeeded plus the last non-fatal failure.
async fn settle(
    standards: StandardsResult,
    proprietary: ProprietaryResult,
) -> Result<
    (
        Option<(OnvifController, u16)>,
        Option<(BinaryClient, u16)>,
        Option<ConnectionError>,
    ),
    ConnectionError,
> {
    let standards = match standards {
        Err(e) if e.is_authentication() => {
            if let Ok((client, _)) = proprietary {
                client.close().await;
            }
            return Err(e);
        }
        other => other,
    };
    let proprietary = match proprietary {
        Err(e) if e.is_authentication() => {
            if let Ok((controller, _)) = standards {
                controller.close().await;
            }
            return Err(e);
        }
        other => other,
    };

    let mut failure = None;
    let onvif = standards.map_err(|e| failure = Some(e)).ok();
    let binary = proprietary.map_err(|e| failure = Some(e)).ok();
    Ok((onvif, binary, failure))
}
