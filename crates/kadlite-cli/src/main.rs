//! kadlite CLI — run an overlay node, or inspect identities and config.

mod cli;
mod config;
mod snapshot;

use crate::cli::{Cli, Commands, RunArgs};
use crate::snapshot::RoutingSnapshot;
use anyhow::Context;
use clap::Parser;
use kadlite_types::{NodeConfig, NodeId};
use kadlite_wire::{spawn_heartbeat_loop, MonotonicClock, PeerNode};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, reload, EnvFilter, Registry};

type FilterHandle = reload::Handle<EnvFilter, Registry>;

/// Log to stderr. Returns a handle for replacing the filter later, unless
/// `RUST_LOG` already pinned it.
fn init_tracing_stderr() -> Option<FilterHandle> {
    let from_env = EnvFilter::try_from_default_env().ok();
    let pinned = from_env.is_some();
    let (filter, handle) =
        reload::Layer::new(from_env.unwrap_or_else(|| EnvFilter::new("info")));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();
    (!pinned).then_some(handle)
}

/// Switch to the configured `log_level` when `RUST_LOG` is unset.
fn apply_log_level(handle: Option<FilterHandle>, level: &str) {
    let Some(handle) = handle else {
        return;
    };
    match EnvFilter::try_new(level) {
        Ok(filter) => {
            if let Err(e) = handle.reload(filter) {
                warn!(error = %e, "Could not apply log_level");
            }
        }
        Err(e) => warn!(log_level = level, error = %e, "Invalid log_level, keeping info"),
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let log_handle = init_tracing_stderr();

    match cli.command {
        Commands::Id { ip, port } => {
            println!("{}", NodeId::derive(ip, port));
            Ok(())
        }
        Commands::Config => cmd_config(cli.config.as_deref()),
        Commands::Snapshot { path } => cmd_snapshot(cli.config.as_deref(), path),
        Commands::Run(args) => cmd_run(cli.config.as_deref(), &args, log_handle),
    }
}

fn cmd_config(path: Option<&Path>) -> anyhow::Result<()> {
    let config = config::load_config(path);
    let text = toml::to_string_pretty(&config).context("serializing config")?;
    print!("{text}");
    Ok(())
}

fn cmd_snapshot(config_path: Option<&Path>, path: Option<PathBuf>) -> anyhow::Result<()> {
    let path = match path {
        Some(path) => path,
        None => config::load_config(config_path)
            .snapshot_path
            .context("no snapshot path given and none configured")?,
    };
    let snapshot = snapshot::read_snapshot(&path)?;
    print!("{}", snapshot::render(&snapshot));
    Ok(())
}

fn cmd_run(
    path: Option<&Path>,
    args: &RunArgs,
    log_handle: Option<FilterHandle>,
) -> anyhow::Result<()> {
    let mut config = config::load_config(path);
    config::apply_overrides(&mut config, args);
    apply_log_level(log_handle, &config.log_level);
    config.validate().context("invalid configuration")?;

    let rt = tokio::runtime::Runtime::new().context("failed to create tokio runtime")?;
    rt.block_on(run_node(config))
}

async fn run_node(config: NodeConfig) -> anyhow::Result<()> {
    let (node, accept) = PeerNode::start(config.clone(), Arc::new(MonotonicClock::new()))
        .await
        .with_context(|| format!("failed to start node on {}", config.listen_addr))?;

    println!(
        "kadlite node {} ({}) listening on {}",
        node.node_id(),
        config.display_name,
        node.local_addr()
    );

    if let Some(target) = config.bootstrap {
        match node.bootstrap(SocketAddr::V4(target)).await {
            Ok(report) => info!(
                %target,
                merged = report.merged,
                flooded = report.flooded,
                "Joined overlay"
            ),
            Err(e) => warn!(%target, error = %e, "Bootstrap failed, running standalone"),
        }
    }

    let snapshot_path = config.snapshot_path.clone();
    let heartbeat = spawn_heartbeat_loop(Arc::clone(&node), move |node, _| {
        if let Some(path) = &snapshot_path {
            if let Err(e) = snapshot::write_snapshot(path, &RoutingSnapshot::capture(node)) {
                warn!(path = %path.display(), error = %e, "Snapshot write failed");
            }
        }
    });

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;
    info!(peers = node.snapshot().len(), "Shutting down");
    heartbeat.abort();
    accept.abort();
    Ok(())
}
