//! Heartbeat loop — drives liveness cycles on a fixed interval.
//!
//! The loop runs as a background tokio task. Every `heartbeat_interval` it
//! runs one [`PeerNode::run_heartbeat_cycle`], which bumps every peer's
//! missed count, evicts those at the threshold and pings the rest. The
//! first cycle fires one full interval after start, not immediately.

use crate::peer::PeerNode;
use crate::state::CycleReport;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

/// Start the heartbeat loop for `node`.
///
/// `after_cycle` runs after each cycle with its report, on the loop task.
pub fn spawn_heartbeat_loop<F>(node: Arc<PeerNode>, mut after_cycle: F) -> JoinHandle<()>
where
    F: FnMut(&PeerNode, &CycleReport) + Send + 'static,
{
    let period = node.config().heartbeat_interval();
    info!(interval_secs = period.as_secs(), "Heartbeat loop started");

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let report = node.run_heartbeat_cycle();
            if !report.evicted.is_empty() {
                info!(
                    evicted = report.evicted.len(),
                    remaining = report.to_ping.len(),
                    "Heartbeat cycle evicted peers"
                );
            } else {
                debug!(pinged = report.to_ping.len(), "Heartbeat cycle");
            }
            after_cycle(&node, &report);
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MonotonicClock;
    use kadlite_types::{NodeConfig, NodeId, PeerRecord, Tick};
    use std::net::Ipv4Addr;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_loop_evicts_silent_peer() {
        let config = NodeConfig {
            listen_addr: "127.0.0.1:0".parse().unwrap(),
            heartbeat_interval_secs: 10,
            connect_timeout_secs: 1,
            ..Default::default()
        };
        let (node, _accept) = PeerNode::start(config, Arc::new(MonotonicClock::new()))
            .await
            .unwrap();

        // Port 9 (discard) on a documentation address: never answers.
        let silent = PeerRecord {
            identity: NodeId::new(node.node_id().raw() ^ 0x8000),
            ip: Ipv4Addr::new(192, 0, 2, 1),
            port: 9,
            display_name: "silent".to_string(),
            last_seen: Tick(0),
        };
        node.upsert(silent.clone()).unwrap();

        let cycles = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&cycles);
        let handle = spawn_heartbeat_loop(Arc::clone(&node), move |_, _| {
            seen.fetch_add(1, Ordering::SeqCst);
        });

        // Nothing happens before the first full interval.
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(cycles.load(Ordering::SeqCst), 0);
        assert_eq!(node.missed(silent.identity), None);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(cycles.load(Ordering::SeqCst), 1);
        assert_eq!(node.missed(silent.identity), Some(1));
        assert!(node.contains(silent.identity));

        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(cycles.load(Ordering::SeqCst), 3);
        assert!(!node.contains(silent.identity));
        assert_eq!(node.missed(silent.identity), None);

        handle.abort();
    }
}
