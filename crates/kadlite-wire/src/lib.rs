//! kadlite wire protocol — a small Kademlia-style overlay over TCP.
//!
//! Nodes learn about each other through a Hello/Welcome exchange, keep at
//! most one peer per XOR-distance bucket, and drop peers that stay silent
//! for three heartbeat cycles.
//!
//! ## Architecture
//!
//! - **message**: Binary codec for the four message types
//! - **routing**: 16-bucket XOR routing table with a one-peer-per-bucket rule
//! - **liveness**: Missed-heartbeat counters and eviction
//! - **state**: Table and tracker behind one shared lock
//! - **peer**: TCP listener, inbound dispatch, bootstrap and probing
//! - **heartbeat**: Background task that runs liveness cycles

pub mod clock;
pub mod heartbeat;
pub mod liveness;
pub mod message;
pub mod peer;
pub mod routing;
pub mod state;

pub use clock::{ManualClock, MonotonicClock, TickSource};
pub use heartbeat::spawn_heartbeat_loop;
pub use liveness::LivenessTracker;
pub use message::{decode_message, encode_message, Message, MessageType, PeerEntry};
pub use peer::{BootstrapReport, Greeting, PeerNode, WireError};
pub use routing::{RoutingTable, UpsertOutcome};
pub use state::{CycleReport, NodeState, SharedState};
