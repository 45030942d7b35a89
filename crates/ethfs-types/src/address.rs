use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::status::Status;
use crate::status_code::RemoteCode;

/// Length of a ledger account or store address in bytes.
pub const ADDRESS_LEN: usize = 20;

/// A 20-byte ledger address identifying an account (record owner, signer)
/// or a store.
///
/// Parses from `0x`-prefixed or bare hex in any letter case and always
/// renders as lowercase `0x…`, so two spellings of the same owner compare
/// equal and hash to the same key.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Address(pub [u8; ADDRESS_LEN]);

impl Address {
    pub const ZERO: Address = Address([0u8; ADDRESS_LEN]);

    pub fn new(bytes: [u8; ADDRESS_LEN]) -> Self {
        Self(bytes)
    }

    /// Address whose last eight bytes hold `n` big-endian. Handy for tests
    /// and for synthetic local stores.
    pub fn from_low_u64(n: u64) -> Self {
        let mut bytes = [0u8; ADDRESS_LEN];
        bytes[ADDRESS_LEN - 8..].copy_from_slice(&n.to_be_bytes());
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; ADDRESS_LEN] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; ADDRESS_LEN]
    }

    /// Lowercase `0x`-prefixed hex form.
    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }
}

impl FromStr for Address {
    type Err = Status;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s
            .strip_prefix("0x")
            .or_else(|| s.strip_prefix("0X"))
            .unwrap_or(s);
        if digits.len() != ADDRESS_LEN * 2 {
            return Err(Status::with_message(
                RemoteCode::INVALID_ADDR,
                format!("address must be {} hex digits: {:?}", ADDRESS_LEN * 2, s),
            ));
        }
        let mut bytes = [0u8; ADDRESS_LEN];
        hex::decode_to_slice(digits, &mut bytes).map_err(|e| {
            Status::with_message(RemoteCode::INVALID_ADDR, format!("{}: {:?}", e, s))
        })?;
        Ok(Self(bytes))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self.to_hex())
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MIXED: &str = "0xAbCdEf0123456789aBcDeF0123456789AbCdEf01";

    #[test]
    fn test_parse_normalizes_case() {
        let a: Address = MIXED.parse().unwrap();
        let b: Address = MIXED.to_lowercase().parse().unwrap();
        assert_eq!(a, b);
        assert_eq!(a.to_string(), MIXED.to_lowercase());
    }

    #[test]
    fn test_parse_without_prefix() {
        let a: Address = "abcdef0123456789abcdef0123456789abcdef01".parse().unwrap();
        assert_eq!(a.to_hex(), "0xabcdef0123456789abcdef0123456789abcdef01");
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert!("0x1234".parse::<Address>().is_err());
        assert!("0xzzcdef0123456789abcdef0123456789abcdef01"
            .parse::<Address>()
            .is_err());
        assert!("docs".parse::<Address>().is_err());
    }

    #[test]
    fn test_from_low_u64() {
        let a = Address::from_low_u64(0x539);
        assert_eq!(a.to_hex(), "0x0000000000000000000000000000000000000539");
        assert!(!a.is_zero());
        assert!(Address::ZERO.is_zero());
    }

    #[test]
    fn test_serde_as_string() {
        let a: Address = MIXED.parse().unwrap();
        let json = serde_json::to_string(&a).unwrap();
        assert_eq!(json, format!("\"{}\"", MIXED.to_lowercase()));
        let parsed: Address = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, a);
    }
}
