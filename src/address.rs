use std::{fmt, str::FromStr};

use serde::{de::Error, Deserialize, Deserializer, Serialize, Serializer};

pub const ADDRESS_BODY_SIZE: usize = 20;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AddressPrefix {
    /// Externally owned account, rendered as `hx…`.
    Eoa,
    /// Deployed contract (SCORE), rendered as `cx…`.
    Contract,
}

impl AddressPrefix {
    fn as_str(self) -> &'static str {
        match self {
            Self::Eoa => "hx",
            Self::Contract => "cx",
        }
    }

    fn tag(self) -> u8 {
        match self {
            Self::Eoa => 0x00,
            Self::Contract => 0x01,
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum AddressError {
    #[error("address must start with hx or cx")]
    InvalidPrefix,
    #[error("address body must be {ADDRESS_BODY_SIZE} bytes of hex")]
    InvalidBody,
}

/// Account or contract identity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Address {
    prefix: AddressPrefix,
    body: [u8; ADDRESS_BODY_SIZE],
}

impl Address {
    pub const fn new(prefix: AddressPrefix, body: [u8; ADDRESS_BODY_SIZE]) -> Self {
        Self { prefix, body }
    }

    pub const fn eoa(body: [u8; ADDRESS_BODY_SIZE]) -> Self {
        Self::new(AddressPrefix::Eoa, body)
    }

    pub const fn contract(body: [u8; ADDRESS_BODY_SIZE]) -> Self {
        Self::new(AddressPrefix::Contract, body)
    }

    /// `cx0000000000000000000000000000000000000000`, the source of fee event logs.
    pub const fn zero_score() -> Self {
        Self::contract([0u8; ADDRESS_BODY_SIZE])
    }

    pub fn is_contract(&self) -> bool {
        self.prefix == AddressPrefix::Contract
    }

    /// Storage key form: one prefix tag byte followed by the body.
    pub fn to_bytes(&self) -> [u8; ADDRESS_BODY_SIZE + 1] {
        let mut out = [0u8; ADDRESS_BODY_SIZE + 1];
        out[0] = self.prefix.tag();
        out[1..].copy_from_slice(&self.body);
        out
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.prefix.as_str(), hex::encode(self.body))
    }
}

impl FromStr for Address {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let prefix = if s.starts_with("hx") {
            AddressPrefix::Eoa
        } else if s.starts_with("cx") {
            AddressPrefix::Contract
        } else {
            return Err(AddressError::InvalidPrefix);
        };
        let bytes = hex::decode(&s[2..]).map_err(|_| AddressError::InvalidBody)?;
        let body: [u8; ADDRESS_BODY_SIZE] =
            bytes.try_into().map_err(|_| AddressError::InvalidBody)?;
        Ok(Self { prefix, body })
    }
}

impl Serialize for Address {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        encoded.parse().map_err(D::Error::custom)
    }
}
