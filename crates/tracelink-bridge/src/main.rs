// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 tracelink.dev

//! Tracelink bridge platform
//!
//! Control plane for live production debugging: terminates marker (IDE)
//! and processor (backend worker) TCP connections, authenticates them
//! against the developer permission store, and relays allow-listed
//! events over the internal bus.
//!
//! # Usage
//!
//! ```bash
//! # Start with default ports (markers 5455, processors 5460)
//! tracelink-bridge
//!
//! # Custom ports and config
//! tracelink-bridge --marker-port 6455 --config bridge.json
//!
//! # JWT authentication instead of raw access tokens
//! tracelink-bridge --jwt-key <hs256-secret>
//! ```

use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Notify;
use tracelink_auth::{
    AuthorizationEngine, MemoryBackend, PermissionStorage, TokenAuthenticator,
};
use tracelink_bridge::{
    addresses, BridgeConfig, DiscoveryService, EventBus, MarkerBridge, ProcessorBridge,
    ServiceRecord, ServiceRegistry, StatusService,
};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

/// Tracelink bridge platform - marker/processor control plane
#[derive(Parser, Debug)]
#[command(name = "tracelink-bridge")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TCP port the marker bridge listens on
    #[arg(long, default_value = "5455")]
    marker_port: u16,

    /// TCP port the processor bridge listens on
    #[arg(long, default_value = "5460")]
    processor_port: u16,

    /// Bind address (0.0.0.0 for all interfaces)
    #[arg(short, long, default_value = "0.0.0.0")]
    bind: String,

    /// Configuration file (JSON format)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// HS256 key for verifying developer JWTs
    #[arg(long)]
    jwt_key: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Initialize logging
    let level = match args.log_level.as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .with_thread_ids(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    // Load or create config
    let config = if let Some(config_path) = args.config {
        info!("Loading config from {:?}", config_path);
        BridgeConfig::from_file(&config_path)?
    } else {
        BridgeConfig {
            bind_address: args.bind.parse()?,
            marker_port: args.marker_port,
            processor_port: args.processor_port,
            jwt_signing_key: args.jwt_key,
            ..Default::default()
        }
    };
    config.validate()?;

    let marker_addr: SocketAddr =
        format!("{}:{}", config.bind_address, config.marker_port).parse()?;
    let processor_addr: SocketAddr =
        format!("{}:{}", config.bind_address, config.processor_port).parse()?;

    info!("Tracelink bridge platform v{}", env!("CARGO_PKG_VERSION"));
    info!("  markers:    {}", marker_addr);
    info!("  processors: {}", processor_addr);
    info!(
        "  auth mode:  {}",
        if config.jwt_signing_key.is_some() {
            "jwt"
        } else {
            "access-token"
        }
    );

    // Permission store with baseline roles installed
    let storage = Arc::new(PermissionStorage::new(MemoryBackend::new()));
    storage.install_defaults().await?;
    let authenticator = Arc::new(TokenAuthenticator::new(
        Arc::clone(&storage),
        config.jwt_signing_key.as_deref(),
    ));
    let authorization = AuthorizationEngine::new(Arc::clone(&storage));

    let bus = EventBus::new();
    let shutdown = Arc::new(Notify::new());

    let marker_bridge = Arc::new(MarkerBridge::new(
        bus.clone(),
        Arc::clone(&authenticator),
        authorization,
        config.max_message_size,
        config.handshake_timeout(),
        config.tcp_keepalive(),
    ));
    let processor_bridge = Arc::new(ProcessorBridge::new(
        bus.clone(),
        Arc::clone(&authenticator),
        config.max_message_size,
        config.handshake_timeout(),
        config.tcp_keepalive(),
    ));
    let status = Arc::new(StatusService::new(
        bus.clone(),
        marker_bridge.presence().clone(),
        processor_bridge.presence().clone(),
    ));
    let discovery = Arc::new(DiscoveryService::new(bus.clone(), ServiceRegistry::new()));

    // The platform itself answers live-service requests; register its
    // record so peers can discover it.
    discovery.registry().publish(ServiceRecord {
        name: config.instance_id.clone(),
        address: addresses::LIVE_SERVICE.to_string(),
        meta: Default::default(),
    });
    info!(instance = %config.instance_id, "live-service record published");

    {
        let status = Arc::clone(&status);
        let stop = Arc::clone(&shutdown);
        tokio::spawn(async move { status.run(stop).await });
    }
    {
        let discovery = Arc::clone(&discovery);
        let stop = Arc::clone(&shutdown);
        tokio::spawn(async move { discovery.run(stop).await });
    }

    // Handle shutdown signals
    {
        let shutdown = Arc::clone(&shutdown);
        let discovery = Arc::clone(&discovery);
        let instance_id = config.instance_id.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            info!("Shutdown signal received, stopping bridges...");
            if discovery.registry().unpublish(&instance_id).is_some() {
                info!(instance = %instance_id, "live-service record unpublished");
            }
            shutdown.notify_waiters();
        });
    }

    let marker_task = {
        let bridge = Arc::clone(&marker_bridge);
        let stop = Arc::clone(&shutdown);
        tokio::spawn(async move { bridge.listen(marker_addr, stop).await })
    };
    let processor_task = {
        let bridge = Arc::clone(&processor_bridge);
        let stop = Arc::clone(&shutdown);
        tokio::spawn(async move { bridge.listen(processor_addr, stop).await })
    };

    marker_task.await??;
    processor_task.await??;

    info!("Bridge platform stopped");
    Ok(())
}
