use std::net::{IpAddr, Ipv4Addr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::routing::{get, post};
use axum::Router;
use camscout_core::{
    DiscoveryConfig, DiscoveryPhase, NetworkInfo, ProtocolType, ServiceKind, SessionStatus, WireConfig,
};
use camscout_discovery::{
    CacheLookup, CameraRegistry, DiscoveryCache, DiscoveryCoordinator, ProtocolDetector, RosterEvent,
};
use camscout_wire::{FrameCodec, HEADER_LEN};
use serde_json::json;
use ipnetwork::Ipv4Network;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

const LOOPBACK: Ipv4Addr = Ipv4Addr::new(127, 0, 0, 1);

/// Answers every connection with an RTSP status line and counts accepts
async fn spawn_rtsp_fake() -> (u16, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let accepted = Arc::new(AtomicUsize::new(0));
    let count = accepted.clone();

    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                break;
            };
            count.fetch_add(1, Ordering::SeqCst);
            tokio::spawn(async move {
                let mut buf = [0u8; 1024];
                if let Ok(Ok(n)) = tokio::time::timeout(Duration::from_millis(500), socket.read(&mut buf)).await {
                    if n > 0 {
                        let _ = socket
                            .write_all(b"RTSP/1.0 200 OK\r\nCSeq: 1\r\nPublic: OPTIONS, DESCRIBE, PLAY\r\n\r\n")
                            .await;
                    }
                }
            });
        }
    });

    (port, accepted)
}

async fn spawn_router_fake() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let app = Router::new().route(
        "/",
        get(|| async {
            axum::response::Html(
                r#"<html><head><title>Archer C6 Wireless Router</title></head>
                <body><form><input type="password" name="pwd"><button>Log In</button></form></body></html>"#,
            )
        }),
    );
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    port
}

/// ONVIF device service answering the anonymous time query
async fn spawn_onvif_fake() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let app = Router::new().route(
        "/onvif/device_service",
        post(|| async {
            r#"<?xml version="1.0"?><env:Envelope xmlns:env="http://www.w3.org/2003/05/soap-envelope"><env:Body><tds:GetSystemDateAndTimeResponse><tds:SystemDateAndTime/></tds:GetSystemDateAndTimeResponse></env:Body></env:Envelope>"#
        }),
    );
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    port
}

/// Vendor binary device refusing every login. Anything that is not a
/// well-formed frame closes the connection.
async fn spawn_vendor_fake() -> (u16, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let accepted = Arc::new(AtomicUsize::new(0));
    let count = accepted.clone();

    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                break;
            };
            count.fetch_add(1, Ordering::SeqCst);
            tokio::spawn(async move {
                let codec = FrameCodec::default();
                loop {
                    let mut header = [0u8; HEADER_LEN];
                    if socket.read_exact(&mut header).await.is_err() {
                        break;
                    }
                    let Ok(h) = codec.parse_header(&header) else {
                        break;
                    };
                    let mut body = vec![0u8; h.payload_len];
                    if socket.read_exact(&mut body).await.is_err() {
                        break;
                    }
                    let mut frame = header.to_vec();
                    frame.extend_from_slice(&body);
                    let Ok(request) = codec.decode_frame(&frame) else {
                        break;
                    };
                    let reply = codec
                        .encode(request.command_id() + 1, &json!({"Ret": 203, "SessionID": "0x0"}))
                        .unwrap();
                    if socket.write_all(&reply).await.is_err() {
                        break;
                    }
                }
            });
        }
    });

    (port, accepted)
}

fn loopback_network() -> NetworkInfo {
    NetworkInfo {
        local_ip: Ipv4Addr::new(127, 0, 0, 2),
        subnet: Ipv4Network::new(LOOPBACK, 32).unwrap(),
        gateway: None,
        interface: "lo".to_string(),
    }
}

fn scan_config(port: u16) -> DiscoveryConfig {
    DiscoveryConfig {
        multicast_timeout_ms: 100,
        priority_scan_budget_ms: 3_000,
        probe_timeout_ms: 500,
        max_concurrent_sockets: 8,
        priority_ports: vec![port],
        enable_full_scan: false,
        ..DiscoveryConfig::default()
    }
}

fn coordinator(config: DiscoveryConfig) -> DiscoveryCoordinator {
    let detector = ProtocolDetector::new(Duration::from_millis(500), WireConfig::default()).unwrap();
    DiscoveryCoordinator::new(
        config,
        Arc::new(DiscoveryCache::new(Duration::from_secs(24 * 3600))),
        Arc::new(detector),
        Arc::new(CameraRegistry::new()),
    )
    .with_multicast(Vec::new())
}

#[tokio::test]
async fn test_second_run_within_ttl_issues_no_probes() {
    let (port, accepted) = spawn_rtsp_fake().await;
    let coordinator = coordinator(scan_config(port));
    let mut progress = coordinator.subscribe_progress();
    let network = loopback_network();
    let host = IpAddr::V4(LOOPBACK);

    let first = coordinator.run(&network, CancellationToken::new()).await;
    assert_eq!(first.session.status, SessionStatus::Completed);
    assert_eq!(first.session.devices_found, 1);
    assert_eq!(first.classified.len(), 1);
    assert_eq!(first.classified[0].kind, ServiceKind::Media);
    assert!(!first.classified[0].cached);
    assert!(first.probes_issued >= 2);

    let camera = coordinator.registry().get(host).await.unwrap();
    assert_eq!(camera.media_port, Some(port));
    assert_eq!(
        coordinator.cache().lookup(host, port).await,
        CacheLookup::FreshHit(ServiceKind::Media)
    );

    let connections_after_first = accepted.load(Ordering::SeqCst);
    assert!(connections_after_first > 0);

    let second = coordinator.run(&network, CancellationToken::new()).await;
    assert_eq!(second.session.status, SessionStatus::Completed);
    assert_eq!(second.probes_issued, 0);
    assert!(second.results.is_empty());
    assert_eq!(accepted.load(Ordering::SeqCst), connections_after_first);

    let mut last = None;
    while let Ok(p) = progress.try_recv() {
        last = Some(p);
    }
    let last = last.unwrap();
    assert_eq!(last.phase, DiscoveryPhase::Completed);
    assert_eq!(last.percent, 100);
    assert_eq!(last.session_id, second.session.id);
}

#[tokio::test]
async fn test_router_page_rejects_host() {
    let port = spawn_router_fake().await;
    let coordinator = coordinator(scan_config(port));
    let mut roster = coordinator.registry().subscribe();
    let host = IpAddr::V4(LOOPBACK);

    let report = coordinator.run(&loopback_network(), CancellationToken::new()).await;

    assert_eq!(report.session.devices_found, 0);
    assert!(report.camera_hosts().is_empty());
    assert_eq!(report.classified.len(), 1);
    assert_eq!(report.classified[0].kind, ServiceKind::Rejected);

    assert!(coordinator.registry().is_empty().await);
    assert!(coordinator.registry().is_rejected(host).await);
    assert!(coordinator.cache().is_host_rejected(host).await);
    // host-wide: ports never probed are covered too
    assert_eq!(coordinator.cache().lookup(host, 554).await, CacheLookup::FreshMiss);

    assert_eq!(
        roster.recv().await.unwrap(),
        RosterEvent::Rejected { host, port: None }
    );
}

#[tokio::test]
async fn test_cancelled_before_start() {
    let (port, accepted) = spawn_rtsp_fake().await;
    let coordinator = coordinator(scan_config(port));

    let cancel = CancellationToken::new();
    cancel.cancel();
    let report = coordinator.run(&loopback_network(), cancel).await;

    assert_eq!(report.session.status, SessionStatus::Cancelled);
    assert_eq!(report.probes_issued, 0);
    assert_eq!(accepted.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_detector_classifies_rtsp_directly() {
    let (port, _) = spawn_rtsp_fake().await;
    let detector = ProtocolDetector::new(Duration::from_millis(500), WireConfig::default()).unwrap();

    let verdict = detector.classify(IpAddr::V4(LOOPBACK), port, None).await.unwrap();
    assert_eq!(verdict.kind, ServiceKind::Media);
    assert!(verdict.creates_descriptor());

    let closed = {
        let l = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        l.local_addr().unwrap().port()
    };
    assert!(detector.classify(IpAddr::V4(LOOPBACK), closed, None).await.is_err());
}

#[tokio::test]
async fn test_full_scan_finds_second_protocol_on_confirmed_camera() {
    let onvif_port = spawn_onvif_fake().await;
    let (vendor_port, vendor_accepts) = spawn_vendor_fake().await;
    let config = DiscoveryConfig {
        extra_ports: vec![vendor_port],
        enable_full_scan: true,
        full_scan_budget_ms: 10_000,
        ..scan_config(onvif_port)
    };
    let coordinator = coordinator(config);
    let network = loopback_network();
    let host = IpAddr::V4(LOOPBACK);

    let first = coordinator.run(&network, CancellationToken::new()).await;
    assert_eq!(first.session.status, SessionStatus::Completed);
    assert!(first
        .classified
        .iter()
        .any(|c| c.port == onvif_port && c.kind == ServiceKind::StandardsBased));
    assert!(first
        .classified
        .iter()
        .any(|c| c.port == vendor_port && c.kind == ServiceKind::Proprietary));

    let camera = coordinator.registry().get(host).await.unwrap();
    assert_eq!(camera.protocol_type, ProtocolType::Hybrid);
    assert_eq!(camera.control_port, Some(onvif_port));
    assert_eq!(camera.proprietary_port, Some(vendor_port));
    assert!(coordinator.cache().swept_hosts().await.contains(&host));

    let vendor_accepts_after_first = vendor_accepts.load(Ordering::SeqCst);
    let second = coordinator.run(&network, CancellationToken::new()).await;
    assert_eq!(second.session.status, SessionStatus::Completed);
    assert_eq!(second.probes_issued, 0);
    assert_eq!(vendor_accepts.load(Ordering::SeqCst), vendor_accepts_after_first);
}
