use std::{fmt, str::FromStr};

use serde::{de::Error as _, Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};

/// Smallest token / native-currency unit (18 decimals on both sides).
pub type Amount = u128;

/// Unix seconds, always supplied by the caller.
pub type Timestamp = u64;

/// 10^18, one whole token or one whole unit of native currency.
pub const UNIT: Amount = 1_000_000_000_000_000_000;

/// 20-byte account identifier.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Address(pub [u8; 20]);

impl Address {
    pub const ZERO: Address = Address([0u8; 20]);

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 20]
    }

    /// Deterministic address for a deployed component, derived from its
    /// deployer and a role label.
    pub fn derive(label: &[u8], deployer: &Address) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(b"presale-address-v1");
        hasher.update(label);
        hasher.update(deployer.0);
        let digest: [u8; 32] = hasher.finalize().into();
        let mut out = [0u8; 20];
        out.copy_from_slice(&digest[12..]);
        Address(out)
    }

    /// Address whose low 8 bytes hold `n` big-endian.
    pub fn from_low_u64(n: u64) -> Self {
        let mut out = [0u8; 20];
        out[12..].copy_from_slice(&n.to_be_bytes());
        Address(out)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AddressParseError {
    #[error("invalid hex: {0}")]
    Hex(#[from] hex::FromHexError),
    #[error("address must be 20 bytes, got {0}")]
    Length(usize),
}

impl FromStr for Address {
    type Err = AddressParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let s = s
            .strip_prefix("0x")
            .or_else(|| s.strip_prefix("0X"))
            .unwrap_or(s);
        let bytes = hex::decode(s)?;
        if bytes.len() != 20 {
            return Err(AddressParseError::Length(bytes.len()));
        }
        let mut out = [0u8; 20];
        out.copy_from_slice(&bytes);
        Ok(Address(out))
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        encoded.parse().map_err(D::Error::custom)
    }
}

/// Amounts travel as decimal strings; JSON numbers lose precision past 2^53.
pub(crate) mod serde_amount {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    use super::Amount;

    pub fn serialize<S>(value: &Amount, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Amount, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        super::parse_amount(&encoded).map_err(D::Error::custom)
    }

    pub mod option {
        use serde::{Deserialize, Deserializer, Serializer};

        use super::super::Amount;

        pub fn serialize<S>(value: &Option<Amount>, serializer: S) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            match value {
                Some(v) => super::serialize(v, serializer),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Amount>, D::Error>
        where
            D: Deserializer<'de>,
        {
            let encoded: Option<String> = Option::deserialize(deserializer)?;
            encoded
                .map(|s| super::super::parse_amount(&s).map_err(serde::de::Error::custom))
                .transpose()
        }
    }
}

/// Parses a decimal amount, optionally with an `eN` exponent as written in
/// deployment scripts (`875000e18`).
pub fn parse_amount(s: &str) -> Result<Amount, String> {
    let s = s.trim().replace('_', "");
    let (mantissa, exponent) = match s.split_once(['e', 'E']) {
        Some((m, e)) => (m.to_string(), e.parse::<u32>().map_err(|e| format!("{e}"))?),
        None => (s.clone(), 0),
    };
    let base: Amount = mantissa.parse().map_err(|e| format!("{e}"))?;
    let scale = 10u128
        .checked_pow(exponent)
        .ok_or_else(|| "exponent too large".to_string())?;
    base.checked_mul(scale)
        .ok_or_else(|| "amount overflows u128".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_display_and_parse_agree() {
        let addr = Address::from_low_u64(0xabcdef);
        let text = addr.to_string();
        assert_eq!(text, "0x0000000000000000000000000000000000abcdef");
        assert_eq!(text.parse::<Address>().unwrap(), addr);
        assert!("0x1234".parse::<Address>().is_err());
    }

    #[test]
    fn derived_addresses_differ_by_label() {
        let owner = Address::from_low_u64(1);
        let a = Address::derive(b"presale", &owner);
        let b = Address::derive(b"token", &owner);
        assert_ne!(a, b);
        assert!(!a.is_zero());
        assert_eq!(a, Address::derive(b"presale", &owner));
    }

    #[test]
    fn parse_amount_accepts_exponents() {
        assert_eq!(parse_amount("875000e18").unwrap(), 875_000 * UNIT);
        assert_eq!(parse_amount("1_000").unwrap(), 1_000);
        assert!(parse_amount("1e40").is_err());
        assert!(parse_amount("abc").is_err());
    }
}
