//! PeerNode — TCP listener, session dispatcher and outbound client.
//!
//! A [`PeerNode`] binds a local TCP listener and answers inbound messages:
//! Hello gets a Welcome carrying the whole routing table, Heartbeat gets a
//! HeartbeatResponse. It also dials out: a bootstrap Hello to a known node,
//! one flooding round of Hellos to everything the Welcome taught us, and a
//! Heartbeat to every peer on each liveness cycle.
//!
//! Framing: one message per direction per connection. The writer shuts down
//! its half after writing and the reader reads to EOF, because the wire
//! format's trailing self-description has no length prefix.

use crate::clock::TickSource;
use crate::message::*;
use crate::routing::UpsertOutcome;
use crate::state::{lock, CycleReport, NodeState, SharedState};

use kadlite_types::{KadliteError, NodeConfig, NodeId, PeerRecord, SelfDescription, Tick};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// Errors from the wire protocol layer.
#[derive(Debug, Error)]
pub enum WireError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Encode(#[from] EncodeError),
    #[error("Connect to {0} timed out")]
    ConnectTimeout(SocketAddr),
    #[error("No reply from {0} in time")]
    ResponseTimeout(SocketAddr),
    #[error("Connection closed")]
    ConnectionClosed,
    #[error("Message too large: {size} bytes (max {max})")]
    MessageTooLarge { size: usize, max: usize },
    #[error("Expected {expected}, got {got}")]
    UnexpectedMessage {
        expected: MessageType,
        got: MessageType,
    },
    #[error(transparent)]
    Rejected(#[from] KadliteError),
}

/// Maximum single message size (1 MB).
pub const MAX_MESSAGE_SIZE: usize = 1024 * 1024;

/// Result of a Hello/Welcome exchange.
#[derive(Debug, Clone)]
pub struct Greeting {
    /// The Welcome we got back.
    pub welcome: Message,
    /// How many of its entries changed our table.
    pub merged: usize,
}

/// Result of [`PeerNode::bootstrap`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BootstrapReport {
    /// Entries from the bootstrap Welcome that changed our table.
    pub merged: usize,
    /// Flood Hellos attempted.
    pub flood_attempted: usize,
    /// Flood Hellos answered with a Welcome.
    pub flooded: usize,
}

/// The local overlay node.
pub struct PeerNode {
    config: NodeConfig,
    /// What we tell other nodes about ourselves.
    local: SelfDescription,
    local_id: NodeId,
    state: SharedState,
    clock: Arc<dyn TickSource>,
    /// Actual bound address (useful when binding to port 0).
    local_addr: SocketAddr,
}

impl PeerNode {
    /// Bind the listener and start accepting connections.
    ///
    /// The identity is derived from `advertise_ip` and the bound port.
    pub async fn start(
        config: NodeConfig,
        clock: Arc<dyn TickSource>,
    ) -> Result<(Arc<Self>, tokio::task::JoinHandle<()>), WireError> {
        config.validate()?;

        let listener = TcpListener::bind(config.listen_addr).await?;
        let local_addr = listener.local_addr()?;
        let port = local_addr.port();
        let local_id = NodeId::derive(config.advertise_ip, port);
        let local = SelfDescription {
            ip: config.advertise_ip.to_string(),
            port,
            id: Some(local_id),
            name: Some(config.display_name.clone()),
        };

        info!(
            node_id = %local_id,
            listen = %local_addr,
            advertise = %format!("{}:{}", config.advertise_ip, port),
            "Listening"
        );

        let node = Arc::new(Self {
            state: NodeState::new(local_id, config.max_missed_heartbeats).into_shared(),
            config,
            local,
            local_id,
            clock,
            local_addr,
        });

        let node_clone = Arc::clone(&node);
        let accept_handle = tokio::spawn(async move {
            Self::accept_loop(listener, node_clone).await;
        });

        Ok((node, accept_handle))
    }

    /// Get the actual bound address.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn node_id(&self) -> NodeId {
        self.local_id
    }

    /// Our own self-description.
    pub fn local_peer(&self) -> &SelfDescription {
        &self.local
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    /// Shared node state, for callers that need several reads under one lock.
    pub fn state(&self) -> &SharedState {
        &self.state
    }

    /// Copy of the routing table, in bucket order.
    pub fn snapshot(&self) -> Vec<PeerRecord> {
        lock(&self.state).snapshot()
    }

    pub fn contains(&self, identity: NodeId) -> bool {
        lock(&self.state).contains(identity)
    }

    /// Offer a record to the routing table directly.
    pub fn upsert(&self, record: PeerRecord) -> Result<UpsertOutcome, KadliteError> {
        lock(&self.state).upsert(record)
    }

    pub fn remove_peer(&self, identity: NodeId) -> Option<PeerRecord> {
        lock(&self.state).remove_peer(identity)
    }

    pub fn closest(&self, target: NodeId) -> Option<PeerRecord> {
        lock(&self.state).closest(target)
    }

    /// Missed heartbeat count for a peer, if tracked.
    pub fn missed(&self, identity: NodeId) -> Option<u32> {
        lock(&self.state).missed(identity)
    }

    fn now(&self) -> Tick {
        self.clock.now()
    }

    fn io_timeout(&self) -> Duration {
        self.config.connect_timeout()
    }

    /// Our own entry, as carried by Heartbeat and HeartbeatResponse.
    fn local_entry(&self) -> PeerEntry {
        PeerEntry {
            ip: self.config.advertise_ip,
            port: self.local.port,
            identity: self.local_id,
        }
    }

    fn known_entries(&self) -> Vec<PeerEntry> {
        lock(&self.state)
            .snapshot()
            .iter()
            .map(PeerEntry::from)
            .collect()
    }

    // ------------------------------------------------------------------
    // Inbound
    // ------------------------------------------------------------------

    /// Accept loop, run in a spawned task.
    async fn accept_loop(listener: TcpListener, node: Arc<PeerNode>) {
        loop {
            match listener.accept().await {
                Ok((stream, addr)) => {
                    debug!(%addr, "Accepted connection");
                    let node = Arc::clone(&node);
                    tokio::spawn(async move {
                        if let Err(e) = node.handle_inbound(stream, addr).await {
                            debug!(%addr, error = %e, "Inbound connection ended");
                        }
                    });
                }
                Err(e) => {
                    error!(error = %e, "Accept error");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
    }

    /// Handle one inbound connection: read a message, dispatch, reply.
    async fn handle_inbound(&self, stream: TcpStream, addr: SocketAddr) -> Result<(), WireError> {
        let (mut reader, mut writer) = stream.into_split();

        let read = tokio::time::timeout(self.io_timeout(), read_message(&mut reader))
            .await
            .map_err(|_| WireError::ResponseTimeout(addr))?;
        let msg = match read {
            Ok(msg) => msg,
            Err(WireError::Decode(e)) => {
                match e.reason {
                    DecodeErrorKind::UnknownType(code) => {
                        debug!(%addr, code, "Ignoring message of unknown type");
                    }
                    _ => warn!(%addr, error = %e, "Dropping malformed message"),
                }
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        if let Some(reply) = self.handle_message(&msg, addr) {
            write_message(&mut writer, &reply).await?;
        }
        Ok(())
    }

    /// Dispatch one decoded message from `remote`, returning the reply.
    pub fn handle_message(&self, msg: &Message, remote: SocketAddr) -> Option<Message> {
        debug!(
            %remote,
            kind = %msg.kind,
            from = %msg.sender_name,
            peers = msg.peers.len(),
            "Received message"
        );
        match msg.kind {
            MessageType::Hello => Some(self.on_hello(msg, remote)),
            MessageType::Heartbeat => {
                if let Some(sender) = msg.sender_entry() {
                    lock(&self.state).record_response(sender.identity);
                }
                Some(Message::heartbeat_response(
                    self.config.display_name.clone(),
                    self.local_entry(),
                ))
            }
            MessageType::HeartbeatResponse => {
                self.credit_response(msg);
                None
            }
            MessageType::Welcome => {
                debug!(%remote, "Ignoring unsolicited Welcome");
                None
            }
        }
    }

    /// Record the Hello's sender and answer with the full table.
    fn on_hello(&self, msg: &Message, remote: SocketAddr) -> Message {
        let sender = resolve_hello_sender(msg, remote);
        let now = self.now();

        let mut state = lock(&self.state);
        match PeerRecord::from_description(&sender, now) {
            Ok(record) => {
                if let Err(e) = state.upsert(record) {
                    warn!(%remote, error = %e, "Hello sender not added");
                }
            }
            Err(e) => warn!(%remote, error = %e, "Hello sender not added"),
        }
        let peers = state.snapshot().iter().map(PeerEntry::from).collect();
        drop(state);

        Message::welcome(self.config.display_name.clone(), peers)
    }

    fn credit_response(&self, msg: &Message) -> bool {
        match msg.sender_entry() {
            Some(sender) => lock(&self.state).record_response(sender.identity),
            None => {
                debug!(from = %msg.sender_name, "HeartbeatResponse without sender entry");
                false
            }
        }
    }

    // ------------------------------------------------------------------
    // Outbound
    // ------------------------------------------------------------------

    async fn connect(&self, addr: SocketAddr) -> Result<TcpStream, WireError> {
        match tokio::time::timeout(self.io_timeout(), TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => Ok(stream),
            Ok(Err(e)) => Err(WireError::Io(e)),
            Err(_) => Err(WireError::ConnectTimeout(addr)),
        }
    }

    /// Send one message and wait for one reply on the same connection.
    async fn exchange(&self, addr: SocketAddr, msg: &Message) -> Result<Message, WireError> {
        let stream = self.connect(addr).await?;
        let (mut reader, mut writer) = stream.into_split();
        write_message(&mut writer, msg).await?;
        tokio::time::timeout(self.io_timeout(), read_message(&mut reader))
            .await
            .map_err(|_| WireError::ResponseTimeout(addr))?
    }

    /// Send a Hello to `addr` and merge the Welcome it answers with.
    pub async fn greet(&self, addr: SocketAddr) -> Result<Greeting, WireError> {
        let hello = Message::hello(
            self.config.display_name.clone(),
            self.known_entries(),
            self.local.clone(),
        );
        debug!(%addr, peers = hello.peers.len(), "Sending Hello");

        let welcome = self.exchange(addr, &hello).await?;
        if welcome.kind != MessageType::Welcome {
            return Err(WireError::UnexpectedMessage {
                expected: MessageType::Welcome,
                got: welcome.kind,
            });
        }
        let merged = self.merge_welcome(&welcome);
        info!(
            %addr,
            from = %welcome.sender_name,
            peers = welcome.peers.len(),
            merged,
            "Received Welcome"
        );
        Ok(Greeting { welcome, merged })
    }

    /// Merge a Welcome's peer list, skipping our own identity.
    ///
    /// Returns how many entries changed the table.
    pub fn merge_welcome(&self, welcome: &Message) -> usize {
        let now = self.now();
        let mut state = lock(&self.state);
        let mut merged = 0;
        for entry in &welcome.peers {
            if entry.identity == self.local_id {
                continue;
            }
            let record = PeerRecord {
                identity: entry.identity,
                ip: entry.ip,
                port: entry.port,
                display_name: String::new(),
                last_seen: now,
            };
            match state.upsert(record) {
                Ok(UpsertOutcome::Unchanged) => {}
                Ok(_) => merged += 1,
                Err(e) => debug!(peer = %entry.identity, error = %e, "Skipped Welcome entry"),
            }
        }
        merged
    }

    /// Join the overlay through `target`.
    ///
    /// Greets the target, records it, then sends one Hello to every other
    /// peer in the table. Replies to that round are merged but never start
    /// another round.
    pub async fn bootstrap(self: &Arc<Self>, target: SocketAddr) -> Result<BootstrapReport, WireError> {
        info!(%target, "Bootstrapping");
        let greeting = self.greet(target).await?;

        let target_id = match target.ip() {
            IpAddr::V4(ip) => {
                let identity = NodeId::derive(ip, target.port());
                let record = PeerRecord {
                    identity,
                    ip,
                    port: target.port(),
                    display_name: greeting.welcome.sender_name.clone(),
                    last_seen: self.now(),
                };
                if let Err(e) = self.upsert(record) {
                    warn!(%target, error = %e, "Bootstrap target not added");
                }
                Some(identity)
            }
            IpAddr::V6(_) => {
                warn!(%target, "Bootstrap target is not IPv4; not recording it");
                None
            }
        };

        let flood: Vec<PeerRecord> = self
            .snapshot()
            .into_iter()
            .filter(|p| Some(p.identity) != target_id && p.socket_addr() != target)
            .collect();

        let mut report = BootstrapReport {
            merged: greeting.merged,
            flood_attempted: flood.len(),
            flooded: 0,
        };

        let mut tasks = JoinSet::new();
        for peer in flood {
            let node = Arc::clone(self);
            tasks.spawn(async move {
                let result = node.greet(peer.socket_addr()).await;
                (peer, result)
            });
        }
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok(_))) => report.flooded += 1,
                Ok((peer, Err(e))) => {
                    warn!(peer = %peer, error = %e, "Flood Hello failed");
                }
                Err(e) => error!(error = %e, "Flood task failed"),
            }
        }

        info!(
            merged = report.merged,
            flooded = report.flooded,
            attempted = report.flood_attempted,
            "Bootstrap complete"
        );
        Ok(report)
    }

    /// Send one peer a Heartbeat.
    ///
    /// Returns whether a HeartbeatResponse came back on this connection and
    /// was credited. A reply may instead arrive as a separate inbound
    /// connection, which [`handle_message`](Self::handle_message) credits.
    pub async fn send_heartbeat(&self, peer: &PeerRecord) -> Result<bool, WireError> {
        let addr = peer.socket_addr();
        let stream = self.connect(addr).await?;
        let (mut reader, mut writer) = stream.into_split();
        let heartbeat = Message::heartbeat(self.config.display_name.clone(), self.local_entry());
        write_message(&mut writer, &heartbeat).await?;

        match tokio::time::timeout(self.io_timeout(), read_message(&mut reader)).await {
            Ok(Ok(reply)) if reply.kind == MessageType::HeartbeatResponse => {
                Ok(self.credit_dialled(peer, &reply))
            }
            Ok(Ok(reply)) => {
                debug!(peer = %peer, kind = %reply.kind, "Unexpected reply to Heartbeat");
                Ok(false)
            }
            Ok(Err(WireError::ConnectionClosed)) => {
                debug!(peer = %peer, "No HeartbeatResponse on this connection");
                Ok(false)
            }
            Ok(Err(e)) => Err(e),
            Err(_) => {
                debug!(peer = %peer, "HeartbeatResponse wait timed out");
                Ok(false)
            }
        }
    }

    /// Credit a HeartbeatResponse read back on a connection we dialled to
    /// `peer`.
    ///
    /// The dialled record is the one credited. When the reply names a
    /// different identity (the record was keyed by a guessed id, e.g. the
    /// bootstrap target), the record is re-keyed to that identity and keeps
    /// the address that answered.
    fn credit_dialled(&self, peer: &PeerRecord, reply: &Message) -> bool {
        let now = self.now();
        let carried = reply.sender_entry().map(|e| e.identity);
        let mut state = lock(&self.state);

        let actual = match carried {
            Some(actual) if actual != peer.identity && state.contains(peer.identity) => actual,
            _ => return state.record_response(peer.identity),
        };

        state.remove_peer(peer.identity);
        let display_name = if reply.sender_name.is_empty() {
            peer.display_name.clone()
        } else {
            reply.sender_name.clone()
        };
        let record = PeerRecord {
            identity: actual,
            ip: peer.ip,
            port: peer.port,
            display_name,
            last_seen: now,
        };
        match state.upsert(record) {
            Ok(_) => {
                info!(guessed = %peer.identity, actual = %actual, "Re-keyed peer to its own identity");
                state.record_response(actual)
            }
            Err(e) => {
                warn!(peer = %peer, error = %e, "Could not re-key peer");
                false
            }
        }
    }

    /// Run one liveness cycle and fire a Heartbeat at every survivor.
    ///
    /// Sends run in their own tasks; the report is returned immediately.
    pub fn run_heartbeat_cycle(self: &Arc<Self>) -> CycleReport {
        let report = lock(&self.state).run_cycle();
        debug!(
            pinging = report.to_ping.len(),
            evicted = report.evicted.len(),
            "Heartbeat cycle"
        );
        for peer in report.to_ping.iter().cloned() {
            let node = Arc::clone(self);
            tokio::spawn(async move {
                if let Err(e) = node.send_heartbeat(&peer).await {
                    debug!(peer = %peer, error = %e, "Heartbeat not delivered");
                }
            });
        }
        report
    }
}

/// Work out who sent a Hello.
///
/// Address: the attached self-description's (when its ip is IPv4), else the
/// socket's observed address. Identity: the self-description's, else the
/// first peer entry's, else derived from the resolved address.
pub fn resolve_hello_sender(msg: &Message, observed: SocketAddr) -> SelfDescription {
    let info = msg.self_info.as_ref();
    let observed_ip = match observed.ip() {
        IpAddr::V4(ip) => Some(ip),
        IpAddr::V6(ip) => ip.to_ipv4_mapped(),
    };

    let claimed_ip = info.and_then(|i| i.ip.parse::<Ipv4Addr>().ok());
    let ip = match (claimed_ip, observed_ip) {
        (Some(ip), _) | (None, Some(ip)) => ip.to_string(),
        (None, None) => observed.ip().to_string(),
    };
    let port = info.map(|i| i.port).unwrap_or_else(|| observed.port());

    let identity = info
        .and_then(|i| i.id)
        .or_else(|| msg.peers.first().map(|e| e.identity))
        .unwrap_or_else(|| NodeId::derive(&ip, port));

    let name = if msg.sender_name.is_empty() {
        info.and_then(|i| i.name.clone()).unwrap_or_default()
    } else {
        msg.sender_name.clone()
    };

    SelfDescription {
        ip,
        port,
        id: Some(identity),
        name: Some(name),
    }
}

/// Write one message and close our sending half.
pub async fn write_message<W>(writer: &mut W, msg: &Message) -> Result<(), WireError>
where
    W: AsyncWrite + Unpin,
{
    let bytes = encode_message(msg)?;
    writer.write_all(&bytes).await?;
    writer.flush().await?;
    writer.shutdown().await?;
    Ok(())
}

/// Read one message: everything up to the peer's EOF.
pub async fn read_message<R>(reader: &mut R) -> Result<Message, WireError>
where
    R: AsyncRead + Unpin,
{
    let mut body = Vec::new();
    let mut limited = reader.take(MAX_MESSAGE_SIZE as u64 + 1);
    limited.read_to_end(&mut body).await?;

    if body.is_empty() {
        return Err(WireError::ConnectionClosed);
    }
    if body.len() > MAX_MESSAGE_SIZE {
        return Err(WireError::MessageTooLarge {
            size: body.len(),
            max: MAX_MESSAGE_SIZE,
        });
    }
    Ok(decode_message(&body)?)
}
