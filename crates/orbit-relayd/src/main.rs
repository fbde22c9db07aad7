//! Orbit relay daemon
//!
//! Loads configuration, starts every enabled provider adapter, and binds
//! the client/anchor relay sockets until shutdown.

use anyhow::Context;
use orbit_core::provider::AdapterFactory;
use orbit_core::{
    AcpProviderAdapter, OrbitConfig, PeerRole, ProviderAdapter, ProviderCapabilities,
    ProviderRegistry, RelayRouter,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Backends shipped with a default command; config can add or override
const BUILTIN_PROVIDERS: &[(&str, &str, &str)] = &[
    ("acp-claude", "Claude Code", "claude-code-acp"),
    ("acp-codex", "Codex", "codex-acp"),
    ("acp-gemini", "Gemini CLI", "gemini"),
];

fn acp_factory(id: &str, name: &str, command: &str) -> AdapterFactory {
    let (id, name, command) = (id.to_string(), name.to_string(), command.to_string());
    Box::new(move |settings| {
        let adapter: Arc<dyn ProviderAdapter> = Arc::new(AcpProviderAdapter::new(
            id.clone(),
            name.clone(),
            command.clone(),
            settings.clone(),
            ProviderCapabilities::full(),
        ));
        Ok(adapter)
    })
}

fn config_path_from_args() -> Option<PathBuf> {
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--config" {
            return args.next().map(PathBuf::from);
        }
    }
    None
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config_path = config_path_from_args();
    let config = OrbitConfig::load(config_path.as_deref()).context("failed to load config")?;

    let registry = Arc::new(ProviderRegistry::new());
    for (id, name, command) in BUILTIN_PROVIDERS {
        let settings = config.provider(id);
        registry
            .register(*id, acp_factory(id, name, command), settings)
            .await
            .context("failed to register provider")?;
    }
    // Config-only providers use their id as the command unless overridden.
    for (id, settings) in &config.providers {
        if BUILTIN_PROVIDERS.iter().any(|(builtin, _, _)| *builtin == id.as_str()) {
            continue;
        }
        registry
            .register(id.clone(), acp_factory(id, id, id), settings.clone())
            .await
            .context("failed to register provider")?;
    }

    let report = registry.start_all().await;
    for id in &report.succeeded {
        info!("Provider {} started", id);
    }
    for (id, reason) in &report.failed {
        warn!("Provider {} failed to start: {}", id, reason);
    }
    for id in &report.skipped_disabled {
        info!("Provider {} disabled", id);
    }

    let router = RelayRouter::new(Duration::from_millis(config.relay.park_ttl_ms));
    let (client_addr, _client_task) = router
        .listen(&config.relay.client_addr, PeerRole::Client)
        .await
        .context("failed to bind client socket")?;
    let (anchor_addr, _anchor_task) = router
        .listen(&config.relay.anchor_addr, PeerRole::Anchor)
        .await
        .context("failed to bind anchor socket")?;
    info!("Relay up (clients: {}, anchors: {})", client_addr, anchor_addr);

    tokio::signal::ctrl_c().await.context("signal handler")?;
    info!("Shutting down");

    let report = registry.stop_all().await;
    for (id, reason) in &report.failed {
        error!("Provider {} failed to stop: {}", id, reason);
    }

    Ok(())
}
