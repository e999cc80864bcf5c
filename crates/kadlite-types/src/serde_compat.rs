//! Lenient serde deserializers for peer self-descriptions.
//!
//! Self-descriptions arrive as free-form JSON appended to binary messages,
//! produced by peers we do not control. Ports show up both as numbers and as
//! decimal strings, and identities are sometimes missing or mangled. These
//! helpers accept the tolerable variants instead of failing the whole
//! document.

use serde::de::{self, Deserializer, Visitor};
use std::fmt;

use crate::identity::NodeId;

/// Deserialize a port given either as an integer or as a decimal string.
pub fn port_lenient<'de, D>(deserializer: D) -> Result<u16, D::Error>
where
    D: Deserializer<'de>,
{
    struct PortVisitor;

    impl<'de> Visitor<'de> for PortVisitor {
        type Value = u16;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            formatter.write_str("a port number (integer or decimal string)")
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> Result<Self::Value, E> {
            u16::try_from(v).map_err(|_| E::custom(format!("port out of range: {v}")))
        }

        fn visit_i64<E: de::Error>(self, v: i64) -> Result<Self::Value, E> {
            u16::try_from(v).map_err(|_| E::custom(format!("port out of range: {v}")))
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
            v.trim()
                .parse::<u16>()
                .map_err(|_| E::custom(format!("invalid port: {v}")))
        }
    }

    deserializer.deserialize_any(PortVisitor)
}

/// Deserialize an optional identity: anything that is not a valid 4-char hex
/// string (wrong type, wrong length, null) becomes `None`.
pub fn node_id_lenient<'de, D>(deserializer: D) -> Result<Option<NodeId>, D::Error>
where
    D: Deserializer<'de>,
{
    struct NodeIdVisitor;

    impl<'de> Visitor<'de> for NodeIdVisitor {
        type Value = Option<NodeId>;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            formatter.write_str("a hex identity (or any value, which will default to None)")
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
            Ok(v.parse().ok())
        }

        fn visit_u64<E: de::Error>(self, _v: u64) -> Result<Self::Value, E> {
            Ok(None)
        }

        fn visit_i64<E: de::Error>(self, _v: i64) -> Result<Self::Value, E> {
            Ok(None)
        }

        fn visit_f64<E: de::Error>(self, _v: f64) -> Result<Self::Value, E> {
            Ok(None)
        }

        fn visit_bool<E: de::Error>(self, _v: bool) -> Result<Self::Value, E> {
            Ok(None)
        }

        fn visit_none<E: de::Error>(self) -> Result<Self::Value, E> {
            Ok(None)
        }

        fn visit_unit<E: de::Error>(self) -> Result<Self::Value, E> {
            Ok(None)
        }

        fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
        where
            A: de::SeqAccess<'de>,
        {
            // Drain to keep the deserializer state consistent
            while seq.next_element::<de::IgnoredAny>()?.is_some() {}
            Ok(None)
        }

        fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
        where
            A: de::MapAccess<'de>,
        {
            while map
                .next_entry::<de::IgnoredAny, de::IgnoredAny>()?
                .is_some()
            {}
            Ok(None)
        }
    }

    deserializer.deserialize_any(NodeIdVisitor)
}
