//! Configuration loading and command-line overrides.

use crate::cli::RunArgs;
use kadlite_types::NodeConfig;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// `~/.kadlite/config.toml`, or `./.kadlite/config.toml` without a home dir.
pub fn default_config_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".kadlite")
        .join("config.toml")
}

/// Load configuration from a TOML file, falling back to defaults.
pub fn load_config(path: Option<&Path>) -> NodeConfig {
    let config_path = path
        .map(|p| p.to_path_buf())
        .unwrap_or_else(default_config_path);

    if !config_path.exists() {
        info!(
            path = %config_path.display(),
            "Config file not found, using defaults"
        );
        return NodeConfig::default();
    }

    match std::fs::read_to_string(&config_path) {
        Ok(contents) => match toml::from_str::<NodeConfig>(&contents) {
            Ok(config) => {
                info!(path = %config_path.display(), "Loaded configuration");
                config
            }
            Err(e) => {
                warn!(
                    error = %e,
                    path = %config_path.display(),
                    "Failed to parse config, using defaults"
                );
                NodeConfig::default()
            }
        },
        Err(e) => {
            warn!(
                error = %e,
                path = %config_path.display(),
                "Failed to read config file, using defaults"
            );
            NodeConfig::default()
        }
    }
}

/// Apply `kadlite run` flags on top of a loaded config.
///
/// `--ip` sets both the bind address and the advertised address.
pub fn apply_overrides(config: &mut NodeConfig, args: &RunArgs) {
    if let Some(ip) = args.ip {
        config.listen_addr = SocketAddr::new(ip.into(), config.listen_addr.port());
        config.advertise_ip = ip;
    }
    if let Some(port) = args.port {
        config.listen_addr.set_port(port);
    }
    if let Some(name) = &args.name {
        config.display_name = name.clone();
    }
    if let Some(bootstrap) = args.bootstrap {
        config.bootstrap = Some(bootstrap);
    }
    if let Some(path) = &args.snapshot {
        config.snapshot_path = Some(path.clone());
    }
}
