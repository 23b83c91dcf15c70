use std::{fmt, str::FromStr};

use serde::{de::Error, Deserialize, Deserializer, Serialize, Serializer};

use crate::{
    address::Address,
    error::{FeeError, FeeResult},
    ledger::Amount,
};

pub const DEPOSIT_ID_SIZE: usize = 32;

/// Identifier of a deposit: the hash of the transaction that created it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DepositId([u8; DEPOSIT_ID_SIZE]);

impl DepositId {
    pub const fn new(bytes: [u8; DEPOSIT_ID_SIZE]) -> Self {
        Self(bytes)
    }

    /// Rejects anything that is not exactly 32 bytes.
    pub fn from_slice(bytes: &[u8]) -> FeeResult<Self> {
        bytes
            .try_into()
            .map(Self)
            .map_err(|_| FeeError::invalid_request("Invalid deposit ID"))
    }

    pub fn as_bytes(&self) -> &[u8; DEPOSIT_ID_SIZE] {
        &self.0
    }
}

impl fmt::Display for DepositId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl FromStr for DepositId {
    type Err = FeeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let digits = s.strip_prefix("0x").unwrap_or(s);
        let bytes =
            hex::decode(digits).map_err(|_| FeeError::invalid_request("Invalid deposit ID"))?;
        Self::from_slice(&bytes)
    }
}

impl Serialize for DepositId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for DepositId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        encoded.parse().map_err(D::Error::custom)
    }
}

/// One prepaid lock of coin for a SCORE, linked into the SCORE's chain of
/// deposits in creation order.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Deposit {
    pub id: DepositId,
    pub score_address: Address,
    pub sender: Address,
    pub deposit_amount: Amount,
    pub deposit_used: Amount,
    pub created: u64,
    pub expires: u64,
    pub virtual_step_issued: Amount,
    pub virtual_step_used: Amount,
    pub prev_id: Option<DepositId>,
    pub next_id: Option<DepositId>,
}

impl Deposit {
    pub fn new(
        id: DepositId,
        score_address: Address,
        sender: Address,
        deposit_amount: Amount,
        created: u64,
        expires: u64,
    ) -> Self {
        Self {
            id,
            score_address,
            sender,
            deposit_amount,
            deposit_used: 0,
            created,
            expires,
            virtual_step_issued: 0,
            virtual_step_used: 0,
            prev_id: None,
            next_id: None,
        }
    }

    pub fn available_deposit(&self) -> Amount {
        self.deposit_amount.saturating_sub(self.deposit_used)
    }

    pub fn available_virtual_step(&self) -> Amount {
        self.virtual_step_issued
            .saturating_sub(self.virtual_step_used)
    }

    /// A deposit is usable strictly before its expiry height.
    pub fn is_active(&self, block_height: u64) -> bool {
        block_height < self.expires
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deposit_id_requires_exactly_32_bytes() {
        assert!(DepositId::from_slice(&[0u8; 32]).is_ok());
        assert!(matches!(
            DepositId::from_slice(&[0u8; 31]),
            Err(FeeError::InvalidRequest(_))
        ));
        assert!(matches!(
            DepositId::from_slice(&[0u8; 33]),
            Err(FeeError::InvalidRequest(_))
        ));
    }

    #[test]
    fn deposit_id_text_form_is_0x_hex() {
        let id = DepositId::new([0xab; 32]);
        let text = id.to_string();
        assert!(text.starts_with("0xabab"));
        assert_eq!(text.parse::<DepositId>().unwrap(), id);
        assert_eq!(text[2..].parse::<DepositId>().unwrap(), id);
        assert!("0x1234".parse::<DepositId>().is_err());
    }

    #[test]
    fn availability_and_expiry() {
        let mut deposit = Deposit::new(
            DepositId::new([1; 32]),
            Address::contract([1; 20]),
            Address::eoa([2; 20]),
            1_000,
            10,
            20,
        );
        deposit.virtual_step_issued = 50;
        deposit.virtual_step_used = 20;
        deposit.deposit_used = 300;
        assert_eq!(deposit.available_deposit(), 700);
        assert_eq!(deposit.available_virtual_step(), 30);
        assert!(deposit.is_active(19));
        assert!(!deposit.is_active(20));
    }
}
