//! Wire protocol message types and the binary codec.
//!
//! Every message has the same layout:
//!
//! | Field | Size | Encoding |
//! |---|---|---|
//! | Version | 1 | [`PROTOCOL_VERSION`] |
//! | Type | 1 | 2=Welcome, 4=Hello, 6=Heartbeat, 8=HeartbeatResponse |
//! | PeerCount | 1 | number of peer entries |
//! | NameLength | 2 | big-endian byte length of the sender name |
//! | PeerEntry × PeerCount | 8 each | IPv4 octets, big-endian port, raw identity |
//! | SenderName | NameLength | UTF-8 |
//! | SelfInfo | rest | optional UTF-8 JSON self-description |
//!
//! SelfInfo has no length prefix: it is whatever follows the name. The format
//! is therefore not self-delimiting past SenderName, and any field added in
//! the future has to go before this trailing block.

use kadlite_types::{NodeId, PeerRecord, SelfDescription};
use std::fmt;
use std::net::Ipv4Addr;
use thiserror::Error;

/// Current protocol version byte. Written on encode, not enforced on decode.
pub const PROTOCOL_VERSION: u8 = 18;

/// Version + type + peer count + name length.
pub const HEADER_LEN: usize = 5;

/// IPv4 (4) + port (2) + identity (2).
pub const PEER_ENTRY_LEN: usize = 8;

/// Largest peer list the single-byte PeerCount can describe.
pub const MAX_PEERS: usize = u8::MAX as usize;

/// Largest sender name the two-byte NameLength can describe.
pub const MAX_NAME_LEN: usize = u16::MAX as usize;

/// The message kinds, with their wire codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    /// Reply to Hello carrying the responder's full peer list.
    Welcome,
    /// Bootstrap greeting carrying the sender's self-description.
    Hello,
    /// Liveness check.
    Heartbeat,
    /// Reply to a liveness check.
    HeartbeatResponse,
}

impl MessageType {
    /// Wire code for this type.
    pub const fn code(self) -> u8 {
        match self {
            Self::Welcome => 2,
            Self::Hello => 4,
            Self::Heartbeat => 6,
            Self::HeartbeatResponse => 8,
        }
    }

    /// Parse a wire code.
    pub const fn from_code(code: u8) -> Option<Self> {
        match code {
            2 => Some(Self::Welcome),
            4 => Some(Self::Hello),
            6 => Some(Self::Heartbeat),
            8 => Some(Self::HeartbeatResponse),
            _ => None,
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Welcome => "Welcome",
            Self::Hello => "Hello",
            Self::Heartbeat => "Heartbeat",
            Self::HeartbeatResponse => "HeartbeatResponse",
        };
        f.write_str(name)
    }
}

/// One peer as it travels on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PeerEntry {
    pub ip: Ipv4Addr,
    pub port: u16,
    pub identity: NodeId,
}

impl From<&PeerRecord> for PeerEntry {
    fn from(record: &PeerRecord) -> Self {
        Self {
            ip: record.ip,
            port: record.port,
            identity: record.identity,
        }
    }
}

/// A decoded protocol message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Message kind.
    pub kind: MessageType,
    /// Sender's display name.
    pub sender_name: String,
    /// Peer entries, in wire order.
    pub peers: Vec<PeerEntry>,
    /// Trailing self-description, if one was attached and parsed.
    pub self_info: Option<SelfDescription>,
}

impl Message {
    /// Hello: our known peers plus our own self-description.
    pub fn hello(
        sender_name: impl Into<String>,
        peers: Vec<PeerEntry>,
        self_info: SelfDescription,
    ) -> Self {
        Self {
            kind: MessageType::Hello,
            sender_name: sender_name.into(),
            peers,
            self_info: Some(self_info),
        }
    }

    /// Welcome: the responder's full peer list.
    pub fn welcome(sender_name: impl Into<String>, peers: Vec<PeerEntry>) -> Self {
        Self {
            kind: MessageType::Welcome,
            sender_name: sender_name.into(),
            peers,
            self_info: None,
        }
    }

    /// Heartbeat carrying exactly the sender's own entry.
    pub fn heartbeat(sender_name: impl Into<String>, sender: PeerEntry) -> Self {
        Self {
            kind: MessageType::Heartbeat,
            sender_name: sender_name.into(),
            peers: vec![sender],
            self_info: None,
        }
    }

    /// HeartbeatResponse carrying exactly the responder's own entry.
    pub fn heartbeat_response(sender_name: impl Into<String>, sender: PeerEntry) -> Self {
        Self {
            kind: MessageType::HeartbeatResponse,
            sender_name: sender_name.into(),
            peers: vec![sender],
            self_info: None,
        }
    }

    /// The entry a Heartbeat/HeartbeatResponse uses to name its sender.
    pub fn sender_entry(&self) -> Option<&PeerEntry> {
        self.peers.first()
    }
}

/// Why a buffer could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeErrorKind {
    #[error("truncated {field}: needed {needed} bytes, {available} available")]
    Truncated {
        field: &'static str,
        needed: usize,
        available: usize,
    },
    #[error("unknown message type {0}")]
    UnknownType(u8),
    #[error("sender name is not valid UTF-8")]
    InvalidName,
}

/// A malformed message, with the byte offset where decoding stopped.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("malformed message at offset {offset}: {reason}")]
pub struct DecodeError {
    pub reason: DecodeErrorKind,
    pub offset: usize,
}

/// A message that cannot be represented in the wire format.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EncodeError {
    #[error("too many peer entries: {count} (max {max})")]
    TooManyPeers { count: usize, max: usize },
    #[error("sender name too long: {len} bytes (max {max})")]
    NameTooLong { len: usize, max: usize },
    #[error("self-description could not be serialized: {0}")]
    SelfInfo(String),
}

/// Encode a message into its wire form.
pub fn encode_message(msg: &Message) -> Result<Vec<u8>, EncodeError> {
    if msg.peers.len() > MAX_PEERS {
        return Err(EncodeError::TooManyPeers {
            count: msg.peers.len(),
            max: MAX_PEERS,
        });
    }
    let name = msg.sender_name.as_bytes();
    if name.len() > MAX_NAME_LEN {
        return Err(EncodeError::NameTooLong {
            len: name.len(),
            max: MAX_NAME_LEN,
        });
    }
    let self_info = match &msg.self_info {
        Some(desc) => serde_json::to_vec(desc).map_err(|e| EncodeError::SelfInfo(e.to_string()))?,
        None => Vec::new(),
    };

    let mut bytes = Vec::with_capacity(
        HEADER_LEN + msg.peers.len() * PEER_ENTRY_LEN + name.len() + self_info.len(),
    );
    bytes.push(PROTOCOL_VERSION);
    bytes.push(msg.kind.code());
    bytes.push(msg.peers.len() as u8);
    bytes.extend_from_slice(&(name.len() as u16).to_be_bytes());
    for entry in &msg.peers {
        bytes.extend_from_slice(&entry.ip.octets());
        bytes.extend_from_slice(&entry.port.to_be_bytes());
        bytes.extend_from_slice(&entry.identity.to_be_bytes());
    }
    bytes.extend_from_slice(name);
    bytes.extend_from_slice(&self_info);
    Ok(bytes)
}

/// Bounds-checked cursor over an input buffer.
struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn take(&mut self, field: &'static str, n: usize) -> Result<&'a [u8], DecodeError> {
        let available = self.buf.len() - self.pos;
        if available < n {
            return Err(DecodeError {
                reason: DecodeErrorKind::Truncated {
                    field,
                    needed: n,
                    available,
                },
                offset: self.pos,
            });
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn rest(&self) -> &'a [u8] {
        &self.buf[self.pos..]
    }
}

/// Decode a complete message buffer.
///
/// Whatever follows the sender name is tried as a JSON self-description for
/// every message type; if it does not parse, `self_info` is `None`.
pub fn decode_message(buf: &[u8]) -> Result<Message, DecodeError> {
    let mut cursor = Cursor { buf, pos: 0 };

    let header = cursor.take("header", HEADER_LEN)?;
    // header[0] is the version byte; accepted as-is.
    let kind = MessageType::from_code(header[1]).ok_or(DecodeError {
        reason: DecodeErrorKind::UnknownType(header[1]),
        offset: 1,
    })?;
    let peer_count = header[2] as usize;
    let name_len = u16::from_be_bytes([header[3], header[4]]) as usize;

    let mut peers = Vec::with_capacity(peer_count);
    for _ in 0..peer_count {
        let raw = cursor.take("peer entry", PEER_ENTRY_LEN)?;
        peers.push(PeerEntry {
            ip: Ipv4Addr::new(raw[0], raw[1], raw[2], raw[3]),
            port: u16::from_be_bytes([raw[4], raw[5]]),
            identity: NodeId::from_be_bytes([raw[6], raw[7]]),
        });
    }

    let name_offset = cursor.pos;
    let name_bytes = cursor.take("sender name", name_len)?;
    let sender_name = std::str::from_utf8(name_bytes)
        .map_err(|_| DecodeError {
            reason: DecodeErrorKind::InvalidName,
            offset: name_offset,
        })?
        .to_string();

    let trailing = cursor.rest();
    let self_info = if trailing.is_empty() {
        None
    } else {
        SelfDescription::from_json_lossy(trailing)
    };

    Ok(Message {
        kind,
        sender_name,
        peers,
        self_info,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(last_octet: u8, port: u16, id: u16) -> PeerEntry {
        PeerEntry {
            ip: Ipv4Addr::new(10, 0, 0, last_octet),
            port,
            identity: NodeId::new(id),
        }
    }

    fn local_description() -> SelfDescription {
        SelfDescription::local(Ipv4Addr::LOCALHOST, 5000, "alice")
    }

    #[test]
    fn test_encode_decode_roundtrip_all_types() {
        let peers = vec![entry(1, 5001, 0x1111), entry(2, 5002, 0x2222)];
        let messages = [
            Message::hello("alice", peers.clone(), local_description()),
            Message::welcome("bob", peers.clone()),
            Message::heartbeat("alice", entry(9, 5009, 0x9999)),
            Message::heartbeat_response("bob", entry(8, 5008, 0x8888)),
        ];
        for msg in messages {
            let bytes = encode_message(&msg).unwrap();
            assert_eq!(decode_message(&bytes).unwrap(), msg);
        }
    }

    #[test]
    fn test_golden_hello_layout() {
        let self_info = SelfDescription {
            ip: "127.0.0.1".to_string(),
            port: 5000,
            id: Some(NodeId::new(0xabcd)),
            name: None,
        };
        let msg = Message::hello("ab", vec![entry(7, 0x1388, 0x0102)], self_info);
        let bytes = encode_message(&msg).unwrap();

        let json = br#"{"ip":"127.0.0.1","port":5000,"id":"abcd"}"#;
        let mut expected = vec![18, 4, 1, 0x00, 0x02];
        expected.extend_from_slice(&[10, 0, 0, 7, 0x13, 0x88, 0x01, 0x02]);
        expected.extend_from_slice(b"ab");
        expected.extend_from_slice(json);
        assert_eq!(bytes, expected);
    }

    #[test]
    fn test_empty_welcome_is_header_only() {
        let bytes = encode_message(&Message::welcome("", vec![])).unwrap();
        assert_eq!(bytes, vec![PROTOCOL_VERSION, 2, 0, 0, 0]);
        let decoded = decode_message(&bytes).unwrap();
        assert!(decoded.peers.is_empty());
        assert!(decoded.sender_name.is_empty());
        assert!(decoded.self_info.is_none());
    }

    #[test]
    fn test_max_peer_list_roundtrips() {
        let peers: Vec<PeerEntry> = (0..MAX_PEERS as u16)
            .map(|i| entry((i % 250) as u8, 6000 + i, i))
            .collect();
        let msg = Message::welcome("big", peers);
        let bytes = encode_message(&msg).unwrap();
        assert_eq!(bytes[2], 255);
        assert_eq!(decode_message(&bytes).unwrap(), msg);
    }

    #[test]
    fn test_too_many_peers_rejected() {
        let peers = vec![entry(1, 1, 1); MAX_PEERS + 1];
        let err = encode_message(&Message::welcome("x", peers)).unwrap_err();
        assert_eq!(
            err,
            EncodeError::TooManyPeers {
                count: 256,
                max: 255
            }
        );
    }

    #[test]
    fn test_name_too_long_rejected() {
        let name = "n".repeat(MAX_NAME_LEN + 1);
        let err = encode_message(&Message::welcome(name, vec![])).unwrap_err();
        assert!(matches!(err, EncodeError::NameTooLong { .. }));
    }

    #[test]
    fn test_unicode_name_uses_byte_length() {
        let msg = Message::welcome("nœud-ü", vec![]);
        let bytes = encode_message(&msg).unwrap();
        let len = u16::from_be_bytes([bytes[3], bytes[4]]) as usize;
        assert_eq!(len, "nœud-ü".len());
        assert_eq!(decode_message(&bytes).unwrap().sender_name, "nœud-ü");
    }

    #[test]
    fn test_truncated_header() {
        let err = decode_message(&[18, 4, 0]).unwrap_err();
        assert_eq!(err.offset, 0);
        assert_eq!(
            err.reason,
            DecodeErrorKind::Truncated {
                field: "header",
                needed: 5,
                available: 3
            }
        );
    }

    #[test]
    fn test_truncated_peer_entries() {
        let bytes = encode_message(&Message::welcome("b", vec![entry(1, 1, 1), entry(2, 2, 2)]))
            .unwrap();
        // Cut into the second entry.
        let err = decode_message(&bytes[..HEADER_LEN + PEER_ENTRY_LEN + 3]).unwrap_err();
        assert_eq!(err.offset, HEADER_LEN + PEER_ENTRY_LEN);
        assert!(matches!(
            err.reason,
            DecodeErrorKind::Truncated {
                field: "peer entry",
                ..
            }
        ));
    }

    #[test]
    fn test_truncated_name() {
        let bytes = encode_message(&Message::welcome("bobby", vec![])).unwrap();
        let err = decode_message(&bytes[..bytes.len() - 2]).unwrap_err();
        assert_eq!(err.offset, HEADER_LEN);
        assert_eq!(
            err.reason,
            DecodeErrorKind::Truncated {
                field: "sender name",
                needed: 5,
                available: 3
            }
        );
    }

    #[test]
    fn test_unknown_type() {
        let err = decode_message(&[18, 5, 0, 0, 0]).unwrap_err();
        assert_eq!(err.reason, DecodeErrorKind::UnknownType(5));
        assert_eq!(err.offset, 1);
    }

    #[test]
    fn test_invalid_utf8_name() {
        let err = decode_message(&[18, 2, 0, 0, 2, 0xff, 0xfe]).unwrap_err();
        assert_eq!(err.reason, DecodeErrorKind::InvalidName);
        assert_eq!(err.offset, HEADER_LEN);
    }

    #[test]
    fn test_garbage_trailer_is_not_an_error() {
        let mut bytes = encode_message(&Message::welcome("bob", vec![entry(1, 1, 1)])).unwrap();
        bytes.extend_from_slice(b"{\"ip\": oops");
        let decoded = decode_message(&bytes).unwrap();
        assert_eq!(decoded.sender_name, "bob");
        assert_eq!(decoded.peers.len(), 1);
        assert!(decoded.self_info.is_none());
    }

    #[test]
    fn test_trailer_parsed_for_every_type() {
        let mut bytes =
            encode_message(&Message::heartbeat("alice", entry(1, 5001, 0x0001))).unwrap();
        bytes.extend_from_slice(br#"{"ip":"10.9.9.9","port":"7000"}"#);
        let decoded = decode_message(&bytes).unwrap();
        let info = decoded.self_info.unwrap();
        assert_eq!(info.ip, "10.9.9.9");
        assert_eq!(info.port, 7000);
        assert_eq!(info.id, None);
    }

    #[test]
    fn test_version_byte_not_enforced() {
        let mut bytes = encode_message(&Message::welcome("bob", vec![])).unwrap();
        bytes[0] = 1;
        assert!(decode_message(&bytes).is_ok());
    }

    #[test]
    fn test_type_codes() {
        for kind in [
            MessageType::Welcome,
            MessageType::Hello,
            MessageType::Heartbeat,
            MessageType::HeartbeatResponse,
        ] {
            assert_eq!(MessageType::from_code(kind.code()), Some(kind));
        }
        assert_eq!(MessageType::from_code(0), None);
        assert_eq!(MessageType::from_code(3), None);
    }
}
