//! herald: watches tracker announce channels and logs every parsed release.
//!
//! Reads one TOML file with `[[network]]` and `[[indexer]]` tables, connects
//! to every enabled network and reports health periodically.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::Parser;
use herald_core::{Announce, AnnounceSink, DaemonConfig, Service};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "herald", about = "IRC announce-channel monitor")]
struct Args {
    /// Config file
    #[arg(long, env = "HERALD_CONFIG")]
    config: Option<PathBuf>,

    /// Log as JSON lines
    #[arg(long, env = "HERALD_LOG_JSON")]
    log_json: bool,

    /// Seconds between health reports (0 disables them)
    #[arg(long, default_value_t = 300)]
    health_interval: u64,

    /// Check the indexer definitions and exit
    #[arg(long)]
    check: bool,
}

fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("herald")
        .join("config.toml")
}

/// Logs each release as JSON.
struct LogSink;

#[async_trait]
impl AnnounceSink for LogSink {
    async fn deliver(&self, announce: Announce) {
        match serde_json::to_string(&announce) {
            Ok(json) => tracing::info!(
                indexer = %announce.indexer,
                network = %announce.network,
                channel = %announce.channel,
                release = %announce.torrent_name,
                %json,
                "release announced"
            ),
            Err(e) => tracing::warn!(error = %e, "could not serialize announce"),
        }
    }
}

/// Run every definition's self-test. Returns the number of failing
/// definitions.
fn check_definitions(config: &DaemonConfig) -> usize {
    let mut failing = 0;
    for def in &config.indexer {
        if let Err(problems) = def.validate() {
            failing += 1;
            for problem in problems {
                tracing::warn!(indexer = %def.identifier, %problem, "definition self-test failed");
            }
        }
    }
    failing
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "herald=info,herald_core=info,herald_sdk=info".into());
    if args.log_json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    let path = args.config.unwrap_or_else(default_config_path);
    let config = DaemonConfig::load(&path).with_context(|| format!("loading {}", path.display()))?;
    tracing::info!(
        config = %path.display(),
        networks = config.network.len(),
        indexers = config.indexer.len(),
        "configuration loaded"
    );

    let failing = check_definitions(&config);
    if args.check {
        if failing > 0 {
            anyhow::bail!("{failing} definition(s) failed their self-test");
        }
        tracing::info!("all definitions passed");
        return Ok(());
    }

    let service = Arc::new(Service::new(Arc::new(LogSink)));
    let started = service.start_networks(&config).await;
    if started == 0 {
        tracing::warn!("no enabled networks");
    }

    if args.health_interval > 0 {
        let service = service.clone();
        let interval = Duration::from_secs(args.health_interval);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                for health in service.networks_with_health() {
                    let monitoring = health.channels.iter().filter(|c| c.monitoring).count();
                    tracing::info!(
                        network = %health.name,
                        state = ?health.state,
                        healthy = health.healthy,
                        connected = health.connected,
                        channels = health.channels.len(),
                        monitoring,
                        "network health"
                    );
                    for channel in health.channels.iter().filter(|c| !c.error.is_empty()) {
                        tracing::warn!(network = %health.name, channel = %channel.name, error = %channel.error, "channel unhealthy");
                    }
                }
            }
        });
    }

    tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
    tracing::info!("shutting down");
    service.stop_all().await;
    Ok(())
}
