use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

const TMP_PREFIX: &str = "item_";
const TMP_DIGITS: usize = 13;

/// Identifier of an outline item.
///
/// Items created locally carry a `Temporary` id (the creation timestamp in ms)
/// until the backend answers with the `Permanent` id it assigned. The textual
/// form of a temporary id is `item_` + 13 digits, e.g. `item_1700000000000`;
/// server ids never have that exact shape.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum NodeId {
    Temporary(u64),
    Permanent(String),
}

impl NodeId {
    pub fn permanent(id: impl Into<String>) -> Self {
        NodeId::Permanent(id.into())
    }

    pub fn is_temporary(&self) -> bool {
        matches!(self, NodeId::Temporary(_))
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeId::Temporary(ms) => write!(f, "{TMP_PREFIX}{ms:013}"),
            NodeId::Permanent(id) => f.write_str(id),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("empty item id")]
pub struct EmptyIdError;

impl FromStr for NodeId {
    type Err = EmptyIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().is_empty() {
            return Err(EmptyIdError);
        }
        Ok(match parse_tmp_ms(s) {
            Some(ms) => NodeId::Temporary(ms),
            None => NodeId::Permanent(s.to_string()),
        })
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
        s.parse().map_err(serde::de::Error::custom)
    }
}

fn parse_tmp_ms(s: &str) -> Option<u64> {
    let digits = s.strip_prefix(TMP_PREFIX)?;
    if digits.len() != TMP_DIGITS || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// True for client-minted ids (`item_` + 13-digit timestamp).
pub fn is_temporary_id(id: &str) -> bool {
    parse_tmp_ms(id).is_some()
}

/// Mints temporary ids from the wall clock.
///
/// Ids are strictly increasing: a second bullet created in the same
/// millisecond (Enter held down, a pasted batch) gets the next millisecond.
#[derive(Clone, Debug, Default)]
pub struct IdMinter {
    last_ms: u64,
}

impl IdMinter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mint_at(&mut self, now_ms: i64) -> NodeId {
        let now = now_ms.max(0) as u64;
        let ms = if now > self.last_ms { now } else { self.last_ms + 1 };
        self.last_ms = ms;
        NodeId::Temporary(ms)
    }

    pub fn mint(&mut self) -> NodeId {
        self.mint_at(crate::util::now_ms())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn temporary_shape_is_fixed_length() {
        assert!(is_temporary_id("item_1700000000000"));
        assert!(!is_temporary_id("item_1700000000000123_456"));
        assert!(!is_temporary_id("item_170000000000"));
        assert!(!is_temporary_id("item_17000000000x0"));
        assert!(!is_temporary_id("tmp-1700000000000"));
    }

    #[test]
    fn parse_and_display_roundtrip_shape() {
        let tmp: NodeId = "item_1700000000000".parse().unwrap();
        assert_eq!(tmp, NodeId::Temporary(1_700_000_000_000));
        assert_eq!(tmp.to_string(), "item_1700000000000");

        let perm: NodeId = "item_1700000000000123_456".parse().unwrap();
        assert_eq!(perm, NodeId::permanent("item_1700000000000123_456"));
        assert!(!perm.is_temporary());

        assert!("  ".parse::<NodeId>().is_err());
    }

    #[test]
    fn small_timestamps_are_zero_padded() {
        let id = NodeId::Temporary(42);
        assert_eq!(id.to_string(), "item_0000000000042");
        assert!(is_temporary_id(&id.to_string()));
    }

    #[test]
    fn serde_uses_textual_form() {
        let v = serde_json::to_value(NodeId::Temporary(1_700_000_000_000)).unwrap();
        assert_eq!(v, "item_1700000000000");
        let back: NodeId = serde_json::from_value(serde_json::json!("abc-123")).unwrap();
        assert_eq!(back, NodeId::permanent("abc-123"));
    }

    #[test]
    fn minter_never_repeats_within_a_millisecond() {
        let mut m = IdMinter::new();
        let a = m.mint_at(1_700_000_000_000);
        let b = m.mint_at(1_700_000_000_000);
        let c = m.mint_at(1_699_999_999_999);
        assert_eq!(a, NodeId::Temporary(1_700_000_000_000));
        assert_eq!(b, NodeId::Temporary(1_700_000_000_001));
        assert_eq!(c, NodeId::Temporary(1_700_000_000_002));
    }
}
