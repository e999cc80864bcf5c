//! Node identities.
//!
//! A [`NodeId`] is a 16-bit value derived from a node's reachable address.
//! It is rendered as exactly four lowercase hex characters and travels on
//! the wire as two raw big-endian bytes.

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

use crate::error::KadliteError;

/// Number of bits in an identity (and therefore buckets in a routing table).
pub const ID_BITS: usize = 16;

/// A 16-bit node identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct NodeId(u16);

impl NodeId {
    /// Wrap a raw 16-bit value.
    pub const fn new(raw: u16) -> Self {
        Self(raw)
    }

    /// Derive an identity from `"<ip>:<port>"`.
    ///
    /// The port only has to be displayable, so a textual `"5000"` and the
    /// integer `5000` yield the same identity.
    pub fn derive(ip: impl fmt::Display, port: impl fmt::Display) -> Self {
        let digest = Sha256::digest(format!("{ip}:{port}").as_bytes());
        Self(u16::from_be_bytes([digest[0], digest[1]]))
    }

    /// The raw 16-bit value.
    pub const fn raw(self) -> u16 {
        self.0
    }

    /// Big-endian wire form.
    pub const fn to_be_bytes(self) -> [u8; 2] {
        self.0.to_be_bytes()
    }

    /// Parse the big-endian wire form.
    pub const fn from_be_bytes(bytes: [u8; 2]) -> Self {
        Self(u16::from_be_bytes(bytes))
    }

    /// XOR distance to another identity.
    pub const fn distance(self, other: NodeId) -> u16 {
        self.0 ^ other.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04x}", self.0)
    }
}

impl FromStr for NodeId {
    type Err = KadliteError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0u8; 2];
        hex::decode_to_slice(s, &mut bytes)
            .map_err(|e| KadliteError::InvalidPeer(format!("bad identity '{s}': {e}")))?;
        Ok(Self::from_be_bytes(bytes))
    }
}

impl Serialize for NodeId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for NodeId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}
