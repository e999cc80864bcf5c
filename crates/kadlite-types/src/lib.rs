//! Core types for the kadlite peer overlay.
//!
//! This crate defines the shared data structures used by the wire protocol
//! engine and the command-line node: identities, peer records, the node
//! configuration and the error type. It contains no business logic.

pub mod config;
pub mod error;
pub mod identity;
pub mod peer;
pub mod serde_compat;

pub use config::NodeConfig;
pub use error::{KadliteError, KadliteResult};
pub use identity::NodeId;
pub use peer::{PeerRecord, SelfDescription, Tick};
