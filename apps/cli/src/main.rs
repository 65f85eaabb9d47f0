use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use camscout_connection::{HybridConnectionManager, ReconnectSupervisor};
use camscout_core::{CameraDescriptor, CameraHandle, Config, Credential, NetworkInfo, ProtocolType};
use camscout_discovery::{CameraRegistry, DiscoveryCache, DiscoveryCoordinator, NetworkAnalyzer, ProtocolDetector};
use clap::{Parser, Subcommand};
use ipnetwork::Ipv4Network;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "camscout", version, about = "Find IP cameras on the local network and connect to them")]
struct Args {
    /// Config file (defaults to the platform config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a discovery session and print the camera roster
    Scan {
        /// Scan this subnet instead of the detected one, e.g. 192.168.1.0/24
        #[arg(long)]
        subnet: Option<Ipv4Network>,
        /// Skip WS-Discovery, SSDP and mDNS
        #[arg(long)]
        no_multicast: bool,
    },
    /// Classify a single host and port
    Classify { host: IpAddr, port: u16 },
    /// Connect to a camera and print its media endpoint
    Connect {
        host: IpAddr,
        #[arg(long, short, default_value = "admin")]
        user: String,
        #[arg(long, short)]
        password: String,
        /// standards, proprietary, hybrid or auto
        #[arg(long, default_value = "auto")]
        protocol: ProtocolType,
        /// Stay connected and report state changes until Ctrl-C
        #[arg(long)]
        watch: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,camscout=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let config_path = match args.config {
        Some(path) => path,
        None => Config::default_path()?,
    };
    let config = Config::load(&config_path)?;

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupted, shutting down");
            ctrl_c.cancel();
        }
    });

    match args.command {
        Command::Scan { subnet, no_multicast } => scan(config, subnet, no_multicast, cancel).await,
        Command::Classify { host, port } => classify(config, host, port).await,
        Command::Connect {
            host,
            user,
            password,
            protocol,
            watch,
        } => connect(config, host, Credential::new(user, password), protocol, watch, cancel).await,
    }
}

fn network_for(subnet: Option<Ipv4Network>) -> Result<NetworkInfo> {
    let detected = NetworkAnalyzer::new().analyze();
    match (subnet, detected) {
        (Some(subnet), Ok(mut info)) => {
            info.subnet = subnet;
            Ok(info)
        }
        (Some(subnet), Err(e)) => {
            tracing::warn!("Network analysis failed ({}), scanning {} as given", e, subnet);
            Ok(NetworkInfo {
                local_ip: Ipv4Addr::UNSPECIFIED,
                subnet,
                gateway: None,
                interface: String::new(),
            })
        }
        (None, detected) => detected.context("Failed to determine the local network"),
    }
}

async fn scan(config: Config, subnet: Option<Ipv4Network>, no_multicast: bool, cancel: CancellationToken) -> Result<()> {
    let network = network_for(subnet)?;
    tracing::info!("Scanning {} from {} ({})", network.cidr(), network.local_ip, network.interface);

    let cache = Arc::new(DiscoveryCache::new(config.cache.ttl()));
    if let Some(path) = &config.cache.snapshot_path {
        match cache.load(path).await {
            Ok(restored) => tracing::debug!("Restored {} cache entries", restored),
            Err(e) => tracing::warn!("Ignoring cache snapshot {}: {:#}", path.display(), e),
        }
    }

    let detector = ProtocolDetector::new(config.discovery.probe_timeout(), config.wire.clone())?;
    let mut coordinator = DiscoveryCoordinator::new(
        config.discovery.clone(),
        cache,
        Arc::new(detector),
        Arc::new(CameraRegistry::new()),
    );
    if no_multicast {
        coordinator = coordinator.with_multicast(Vec::new());
    }
    if let Some(path) = &config.cache.snapshot_path {
        coordinator = coordinator.with_snapshot(path.clone());
    }

    let mut progress = coordinator.subscribe_progress();
    tokio::spawn(async move {
        while let Ok(p) = progress.recv().await {
            tracing::info!("{:?}: {}% ({} cameras)", p.phase, p.percent, p.devices_found);
        }
    });

    let report = coordinator.run(&network, cancel).await;
    for line in &report.diagnostics {
        tracing::warn!("{}", line);
    }

    let roster = coordinator.registry().list().await;
    println!("{}", serde_json::to_string_pretty(&roster)?);
    tracing::info!(
        "Session {} {:?}: {} cameras, {} probes",
        report.session.id,
        report.session.status,
        roster.len(),
        report.probes_issued
    );
    Ok(())
}

async fn classify(config: Config, host: IpAddr, port: u16) -> Result<()> {
    let detector = ProtocolDetector::new(config.discovery.probe_timeout(), config.wire.clone())?;
    let verdict = detector
        .classify(host, port, None)
        .await
        .with_context(|| format!("Failed to classify {}:{}", host, port))?;

    println!(
        "{}:{} {} (confidence {:.2}{}) {}",
        host,
        port,
        verdict.kind.as_str(),
        verdict.confidence,
        if verdict.host_wide { ", whole host" } else { "" },
        verdict.detail.as_deref().unwrap_or("")
    );
    Ok(())
}

async fn connect(
    config: Config,
    host: IpAddr,
    credential: Credential,
    protocol: ProtocolType,
    watch: bool,
    cancel: CancellationToken,
) -> Result<()> {
    let descriptor = CameraDescriptor::manual(host, protocol);
    let manager = Arc::new(HybridConnectionManager::new(
        config.connection.clone(),
        config.wire.clone(),
        Arc::new(CameraRegistry::new()),
    ));

    if !watch {
        let session = manager.connect(&descriptor, &credential).await?;
        println!("Connected to {} using {}", host, session.protocol().as_str());
        match session.media_endpoint().await {
            Some(endpoint) => println!("{}", serde_json::to_string_pretty(&endpoint)?),
            None => println!("No media endpoint reported"),
        }
        manager.disconnect(&session).await;
        return Ok(());
    }

    let supervisor = ReconnectSupervisor::new(manager, descriptor, credential, config.reconnect.clone());
    let mut states = supervisor.subscribe();
    let printer = tokio::spawn(async move {
        while let Ok(state) = states.recv().await {
            println!("{} {}", host, state);
        }
    });

    if let Err(e) = supervisor.start().await {
        tracing::error!("Connect to {} failed: {}", host, e);
        if !e.category().is_retryable() || !config.reconnect.enabled {
            printer.abort();
            return Err(e.into());
        }
    }
    if let Some(endpoint) = supervisor.media_endpoint().await {
        println!("{}", serde_json::to_string_pretty(&endpoint)?);
    }

    cancel.cancelled().await;
    supervisor.disconnect().await;
    printer.abort();
    Ok(())
}
