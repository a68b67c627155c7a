//! Domain-specific identifier types.

use crate::hash::{strip_hex_prefix, HexError};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Identifier of a queued transaction.
///
/// Unique within the queue that owns the ticket. Callers usually pick one
/// with [`TicketId::random`]; the queue rejects duplicates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TicketId(pub u64);

impl TicketId {
    /// Create a new ticket ID.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Pick a random ticket ID.
    pub fn random() -> Self {
        Self(rand::random())
    }

    /// Get the raw ID value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for TicketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tx-{}", self.0)
    }
}

/// Account address (20 bytes).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Address(pub [u8; 20]);

impl Address {
    /// Parse from hex, with or without a `0x` prefix.
    pub fn from_hex(hex: &str) -> Result<Self, HexError> {
        let hex = strip_hex_prefix(hex);
        if hex.len() != 40 {
            return Err(HexError::InvalidLength {
                expected: 40,
                actual: hex.len(),
            });
        }
        let mut bytes = [0u8; 20];
        hex::decode_to_slice(hex, &mut bytes).map_err(|_| HexError::InvalidHex)?;
        Ok(Self(bytes))
    }

    /// Get the bytes as a slice.
    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl FromStr for Address {
    type Err = HexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Address::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ticket_id_display() {
        assert_eq!(TicketId::new(7).to_string(), "tx-7");
        assert_eq!(TicketId(42).as_u64(), 42);
    }

    #[test]
    fn test_address_parse() {
        let addr: Address = "0x00000000000000000000000000000000000000ff".parse().unwrap();
        assert_eq!(addr.0[19], 0xff);
        assert_eq!(
            addr.to_string(),
            "0x00000000000000000000000000000000000000ff"
        );
        assert!(Address::from_hex("0xabc").is_err());
    }
}
