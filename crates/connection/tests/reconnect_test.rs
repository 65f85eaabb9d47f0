mod common;

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use camscout_core::{
    CameraDescriptor, ConnectionConfig, ConnectionState, Credential, ProtocolType, ReconnectConfig, WireConfig,
};
use camscout_connection::{ConnectionError, HybridConnectionManager, ReconnectSupervisor};
use camscout_discovery::CameraRegistry;
use common::{closed_port, spawn_binary_fake, SESSION_TOKEN};
use tokio::sync::broadcast;
use tokio::time::timeout;

use ConnectionState::*;

fn localhost() -> IpAddr {
    "127.0.0.1".parse().unwrap()
}

fn manager() -> Arc<HybridConnectionManager> {
    let config = ConnectionConfig {
        detect_timeout_ms: 1_000,
        connect_timeout_ms: 1_000,
        default_fallback_ports: Vec::new(),
    };
    Arc::new(HybridConnectionManager::new(
        config,
        WireConfig::default(),
        Arc::new(CameraRegistry::new()),
    ))
}

fn vendor_camera(port: u16) -> CameraDescriptor {
    let mut camera = CameraDescriptor::manual(localhost(), ProtocolType::Proprietary);
    camera.proprietary_port = Some(port);
    camera
}

fn fast_backoff(health_check_interval_ms: u64) -> ReconnectConfig {
    ReconnectConfig {
        enabled: true,
        base_delay_ms: 20,
        max_delay_ms: 200,
        max_attempts: 5,
        health_check_interval_ms,
    }
}

/// Receive transitions until `last` arrives
async fn collect_until(rx: &mut broadcast::Receiver<ConnectionState>, last: ConnectionState) -> Vec<ConnectionState> {
    let mut seen = Vec::new();
    loop {
        let state = timeout(Duration::from_secs(5), rx.recv()).await.unwrap().unwrap();
        seen.push(state);
        if state == last {
            return seen;
        }
    }
}

#[tokio::test]
async fn test_first_connect_reaches_connected() {
    let fake = spawn_binary_fake("secret", false).await;
    let supervisor = ReconnectSupervisor::new(
        manager(),
        vendor_camera(fake.port()),
        Credential::new("admin", "secret"),
        fast_backoff(60_000),
    );
    let mut states = supervisor.subscribe();

    let session = supervisor.start().await.unwrap();
    assert_eq!(session.session_token().as_deref(), Some(SESSION_TOKEN));
    assert_eq!(supervisor.state(), Connected);
    assert_eq!(collect_until(&mut states, Connected).await, vec![Connecting, Authenticating, Connected]);

    assert!(supervisor.media_endpoint().await.is_some());
    assert_eq!(supervisor.state(), Streaming);

    supervisor.disconnect().await;
    supervisor.disconnect().await;
    assert_eq!(supervisor.state(), Disconnected);
    assert!(!session.is_open().await);
}

#[tokio::test]
async fn test_lost_socket_reconnects_and_resets_attempts() {
    let fake = spawn_binary_fake("secret", true).await;
    let supervisor = ReconnectSupervisor::new(
        manager(),
        vendor_camera(fake.port()),
        Credential::new("admin", "secret"),
        fast_backoff(60_000),
    );

    supervisor.start().await.unwrap();
    let mut states = supervisor.subscribe();
    supervisor.notify_lost();

    let seen = collect_until(&mut states, Connected).await;
    assert_eq!(seen, vec![Reconnecting, Connecting, Authenticating, Connected]);
    assert_eq!(supervisor.attempt(), 0);
    assert_eq!(fake.connections(), 2);
    assert!(supervisor.session().await.unwrap().is_open().await);
}

#[tokio::test]
async fn test_health_check_detects_dropped_socket() {
    let fake = spawn_binary_fake("secret", true).await;
    let supervisor = ReconnectSupervisor::new(
        manager(),
        vendor_camera(fake.port()),
        Credential::new("admin", "secret"),
        fast_backoff(50),
    );

    supervisor.start().await.unwrap();
    let mut states = supervisor.subscribe();

    let seen = collect_until(&mut states, Connected).await;
    assert_eq!(seen, vec![Reconnecting, Connecting, Authenticating, Connected]);
    assert_eq!(supervisor.attempt(), 0);
}

#[tokio::test]
async fn test_attempts_never_exceed_limit() {
    let port = closed_port();
    let config = ReconnectConfig {
        max_attempts: 2,
        base_delay_ms: 10,
        ..fast_backoff(60_000)
    };
    let supervisor = ReconnectSupervisor::new(
        manager(),
        vendor_camera(port),
        Credential::new("admin", "secret"),
        config,
    );
    let mut states = supervisor.subscribe();

    let err = supervisor.start().await.unwrap_err();
    assert!(matches!(err, ConnectionError::Network(_)));

    // initial failure passes through Error before the retries
    let mut seen = collect_until(&mut states, Error).await;
    seen.extend(collect_until(&mut states, Error).await);
    assert_eq!(
        seen,
        vec![Connecting, Error, Reconnecting, Connecting, Reconnecting, Connecting, Reconnecting, Error]
    );
    assert_eq!(seen.iter().filter(|s| **s == Connecting).count(), 3);

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(states.try_recv().is_err());
    assert_eq!(supervisor.state(), Error);

    assert!(supervisor.reset());
    assert_eq!(supervisor.state(), Disconnected);
    assert_eq!(supervisor.attempt(), 0);
}

#[tokio::test]
async fn test_rejected_login_is_never_retried() {
    let fake = spawn_binary_fake("secret", false).await;
    let supervisor = ReconnectSupervisor::new(
        manager(),
        vendor_camera(fake.port()),
        Credential::new("admin", "wrong"),
        fast_backoff(60_000),
    );

    let err = supervisor.start().await.unwrap_err();
    assert!(err.is_authentication());
    assert_eq!(supervisor.state(), Error);

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(fake.connections(), 1);
    assert_eq!(supervisor.state(), Error);
}
