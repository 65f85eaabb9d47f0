//! Per-camera connection supervision
//!
//! A `ReconnectSupervisor` owns one camera's `ConnectionState`. After the
//! first connect it watches the session (periodic health check, or an
//! explicit `notify_lost`) and, on loss, re-runs the manager's connect with
//! capped exponential backoff. Every transition is published on a broadcast
//! channel and the latest state on a watch channel.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use camscout_core::{
    CameraDescriptor, CameraHandle, ConnectionState, Credential, ErrorCategory, MediaEndpoint, ReconnectConfig,
    StateMachine,
};
use tokio::sync::{broadcast, watch, Mutex, Notify};
use tokio::time::{interval, sleep, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::errors::ConnectionError;
use crate::manager::HybridConnectionManager;
use crate::session::CameraSession;

/// Delay before reconnect attempt `attempt` (1-based):
/// `base * 2^(attempt - 1)`, capped at `max_delay`
pub fn backoff_delay(config: &ReconnectConfig, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(31);
    let factor = 1u32 << exponent;
    config
        .base_delay()
        .checked_mul(factor)
        .unwrap_or(Duration::MAX)
        .min(config.max_delay())
}

struct Inner {
    manager: Arc<HybridConnectionManager>,
    descriptor: CameraDescriptor,
    credential: Credential,
    config: ReconnectConfig,
    machine: StdMutex<StateMachine>,
    states: broadcast::Sender<ConnectionState>,
    latest: watch::Sender<ConnectionState>,
    attempt: AtomicU32,
    session: Mutex<Option<Arc<CameraSession>>>,
    lost: Notify,
    cancel: StdMutex<CancellationToken>,
}

impl Inner {
    fn state(&self) -> ConnectionState {
        self.machine
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .state()
    }

    /// Apply `next` if the transition table allows it
    fn set_state(&self, next: ConnectionState) -> bool {
        let mut machine = self.machine.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        match machine.transition(next) {
            Ok(_) => {
                debug!(host = %self.descriptor.host, state = %next, "Connection state changed");
                let _ = self.states.send(next);
                self.latest.send_replace(next);
                true
            }
            Err(e) => {
                debug!(host = %self.descriptor.host, error = %e, "Ignoring state change");
                false
            }
        }
    }

    fn cancel_token(&self) -> CancellationToken {
        self.cancel
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Prefer the registry's copy, which carries protocols resolved since
    async fn current_descriptor(&self) -> CameraDescriptor {
        self.manager
            .registry()
            .get(self.descriptor.host)
            .await
            .unwrap_or_else(|| self.descriptor.clone())
    }

    async fn connect_once(&self) -> Result<Arc<CameraSession>, ConnectionError> {
        let descriptor = self.current_descriptor().await;
        let observer = |state: ConnectionState| {
            self.set_state(state);
        };
        let session = self
            .manager
            .connect_observed(&descriptor, &self.credential, &observer)
            .await?;
        *self.session.lock().await = Some(session.clone());
        Ok(session)
    }

    async fn drop_session(&self) {
        if let Some(session) = self.session.lock().await.take() {
            self.manager.disconnect(&session).await;
        }
    }
}

pub struct ReconnectSupervisor {
    inner: Arc<Inner>,
}

impl ReconnectSupervisor {
    pub fn new(
        manager: Arc<HybridConnectionManager>,
        descriptor: CameraDescriptor,
        credential: Credential,
        config: ReconnectConfig,
    ) -> Self {
        let (states, _) = broadcast::channel(64);
        let (latest, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            inner: Arc::new(Inner {
                manager,
                descriptor,
                credential,
                config,
                machine: StdMutex::new(StateMachine::new()),
                states,
                latest,
                attempt: AtomicU32::new(0),
                session: Mutex::new(None),
                lost: Notify::new(),
                cancel: StdMutex::new(CancellationToken::new()),
            }),
        }
    }

    /// Every transition, in order
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionState> {
        self.inner.states.subscribe()
    }

    /// Latest state only
    pub fn watch(&self) -> watch::Receiver<ConnectionState> {
        self.inner.latest.subscribe()
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.state()
    }

    /// Reconnect attempts since the last successful connect
    pub fn attempt(&self) -> u32 {
        self.inner.attempt.load(Ordering::SeqCst)
    }

    pub async fn session(&self) -> Option<Arc<CameraSession>> {
        self.inner.session.lock().await.clone()
    }

    /// First connect, then supervision in the background.
    ///
    /// A rejected login ends in `Error` and nothing is scheduled. A network
    /// failure goes through `Error` to `Reconnecting` when reconnection is
    /// enabled, and the error is still returned.
    pub async fn start(&self) -> Result<Arc<CameraSession>, ConnectionError> {
        if !self.inner.set_state(ConnectionState::Connecting) {
            if let Some(session) = self.session().await {
                return Ok(session);
            }
            return Err(ConnectionError::Protocol(format!(
                "cannot start from state {}",
                self.state()
            )));
        }

        let cancel = self.inner.cancel_token();
        match self.inner.connect_once().await {
            Ok(session) => {
                self.inner.attempt.store(0, Ordering::SeqCst);
                self.inner.set_state(ConnectionState::Connected);
                tokio::spawn(supervise(self.inner.clone(), cancel, false));
                Ok(session)
            }
            Err(e) => {
                warn!(host = %self.inner.descriptor.host, error = %e, "Initial connect failed");
                self.inner.set_state(ConnectionState::Error);
                if e.category() == ErrorCategory::Network && self.inner.config.enabled {
                    tokio::spawn(supervise(self.inner.clone(), cancel, true));
                }
                Err(e)
            }
        }
    }

    /// Report a lost socket without waiting for the next health check
    pub fn notify_lost(&self) {
        self.inner.lost.notify_one();
    }

    /// Media endpoint of the live session; moves `Connected` to `Streaming`
    pub async fn media_endpoint(&self) -> Option<MediaEndpoint> {
        let session = self.session().await?;
        let endpoint = session.media_endpoint().await?;
        if self.state() == ConnectionState::Connected {
            self.inner.set_state(ConnectionState::Streaming);
        }
        Some(endpoint)
    }

    /// Stop every timer and close the session. Idempotent.
    pub async fn disconnect(&self) {
        self.inner.cancel_token().cancel();
        self.inner.drop_session().await;
        if self.inner.set_state(ConnectionState::Disconnected) {
            info!(host = %self.inner.descriptor.host, "Camera disconnected");
        }
    }

    /// Leave a terminal `Error` for `Disconnected` so `start` can run again
    pub fn reset(&self) -> bool {
        if self.state() != ConnectionState::Error {
            return false;
        }
        self.inner.cancel_token().cancel();
        *self
            .inner
            .cancel
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = CancellationToken::new();
        self.inner.attempt.store(0, Ordering::SeqCst);
        self.inner.set_state(ConnectionState::Disconnected)
    }
}

impl Drop for ReconnectSupervisor {
    fn drop(&mut self) {
        self.inner.cancel_token().cancel();
    }
}

/// Watch the live session; on loss, reconnect. Returns when cancelled or
/// when the camera lands in a terminal `Error`.
async fn supervise(inner: Arc<Inner>, cancel: CancellationToken, mut lost: bool) {
    loop {
        if !lost {
            if !wait_for_loss(&inner, &cancel).await {
                return;
            }
            warn!(host = %inner.descriptor.host, "Connection lost");
        }
        lost = false;

        inner.drop_session().await;
        if !inner.config.enabled {
            inner.set_state(ConnectionState::Error);
            return;
        }
        if !reconnect(&inner, &cancel).await {
            return;
        }
    }
}

/// True once the session is lost, false if cancelled first
async fn wait_for_loss(inner: &Inner, cancel: &CancellationToken) -> bool {
    let mut ticker = interval(inner.config.health_check_interval().max(Duration::from_millis(10)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return false,
            _ = inner.lost.notified() => return true,
            _ = ticker.tick() => {
                let session = inner.session.lock().await.clone();
                match session {
                    Some(s) if s.is_alive().await => {}
                    _ => return true,
                }
            }
        }
    }
}

/// Backoff loop. True when connected again, false on cancel or `Error`.
async fn reconnect(inner: &Inner, cancel: &CancellationToken) -> bool {
    let host = inner.descriptor.host;
    loop {
        let attempt = inner.attempt.fetch_add(1, Ordering::SeqCst) + 1;
        if attempt > inner.config.max_attempts {
            warn!(%host, attempts = attempt - 1, "Reconnect attempts exhausted");
            inner.set_state(ConnectionState::Error);
            return false;
        }

        if inner.state() != ConnectionState::Reconnecting {
            inner.set_state(ConnectionState::Reconnecting);
        }
        let delay = backoff_delay(&inner.config, attempt);
        info!(%host, attempt, delay_ms = delay.as_millis() as u64, "Scheduling reconnect");

        tokio::select! {
            _ = cancel.cancelled() => return false,
            _ = sleep(delay) => {}
        }
        if cancel.is_cancelled() {
            return false;
        }

        inner.set_state(ConnectionState::Connecting);
        match inner.connect_once().await {
            Ok(_) if cancel.is_cancelled() => {
                inner.drop_session().await;
                return false;
            }
            Ok(_) => {
                inner.attempt.store(0, Ordering::SeqCst);
                inner.set_state(ConnectionState::Connected);
                info!(%host, attempt, "Reconnected");
                return true;
            }
            Err(e) if e.category().is_retryable() => {
                warn!(%host, attempt, error = %e, "Reconnect attempt failed");
                inner.set_state(ConnectionState::Reconnecting);
            }
            Err(e) => {
                warn!(%host, attempt, error = %e, "Reconnect stopped");
                inner.set_state(ConnectionState::Error);
                return false;
            }
        }
    }
}
