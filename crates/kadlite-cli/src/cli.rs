//! Clap CLI definitions for kadlite.

use clap::{Args, Parser, Subcommand};
use std::net::{Ipv4Addr, SocketAddrV4};
use std::path::PathBuf;

pub const AFTER_HELP: &str = "\
Examples:
  kadlite run --port 5000                               Start a standalone node
  kadlite run --port 5001 --bootstrap 127.0.0.1:5000    Join through a known node
  kadlite id 127.0.0.1 5000                             Print a node's identity
  kadlite config                                        Show the effective config
  kadlite snapshot /tmp/kadlite.json                    Show a saved routing table";

/// kadlite: a small Kademlia-style overlay node.
#[derive(Parser)]
#[command(name = "kadlite", version, about, after_help = AFTER_HELP)]
pub struct Cli {
    /// Path to config file (default: ~/.kadlite/config.toml).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start a node and run until Ctrl-C.
    Run(RunArgs),
    /// Print the identity derived from an address.
    Id {
        /// IPv4 address.
        ip: Ipv4Addr,
        /// Listening port.
        port: u16,
    },
    /// Print the effective configuration as TOML.
    Config,
    /// Print a routing snapshot written by `kadlite run`.
    Snapshot {
        /// Snapshot file (default: `snapshot_path` from the config).
        path: Option<PathBuf>,
    },
}

/// Overrides for `kadlite run`. Unset flags keep the config file's values.
#[derive(Args, Debug, Default, Clone)]
pub struct RunArgs {
    /// Port to listen on.
    #[arg(long)]
    pub port: Option<u16>,
    /// IPv4 address to bind and advertise.
    #[arg(long)]
    pub ip: Option<Ipv4Addr>,
    /// Display name sent with every message.
    #[arg(long)]
    pub name: Option<String>,
    /// Node to join through, as IP:PORT.
    #[arg(long)]
    pub bootstrap: Option<SocketAddrV4>,
    /// Write a JSON routing snapshot here after every heartbeat cycle.
    #[arg(long)]
    pub snapshot: Option<PathBuf>,
}
