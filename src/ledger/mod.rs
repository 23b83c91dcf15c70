use serde::{Deserialize, Serialize};

use crate::{address::Address, state::KvStore};

pub type Amount = u128;

/// 1 ICX = 10^18 loop.
pub const LOOP_PER_ICX: Amount = 1_000_000_000_000_000_000;

const ACCOUNT_PREFIX: &[u8] = b"icx|";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum LedgerError {
    #[error("insufficient funds in account {account}: balance {balance}, required {required}")]
    InsufficientFunds {
        account: Address,
        balance: Amount,
        required: Amount,
    },
    #[error("balance overflow in account {account}")]
    Overflow { account: Address },
    #[error("corrupted account record for {account}: {reason}")]
    Corrupted { account: Address, reason: String },
    #[error("cannot encode account record for {account}: {reason}")]
    Encode { account: Address, reason: String },
}

/// Native coin balances the fee engine debits and credits.
///
/// Balances live in the same [`KvStore`] as the fee records so that one
/// transaction covers both.
pub trait AccountLedger {
    fn balance(&self, store: &dyn KvStore, account: &Address) -> Result<Amount, LedgerError>;

    fn debit(
        &self,
        store: &mut dyn KvStore,
        account: &Address,
        amount: Amount,
    ) -> Result<(), LedgerError>;

    fn credit(
        &self,
        store: &mut dyn KvStore,
        account: &Address,
        amount: Amount,
    ) -> Result<(), LedgerError>;
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct AccountBalance {
    pub available: Amount,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct CoinLedger;

impl CoinLedger {
    pub fn new() -> Self {
        Self
    }

    fn key(account: &Address) -> Vec<u8> {
        let mut key = ACCOUNT_PREFIX.to_vec();
        key.extend_from_slice(&account.to_bytes());
        key
    }

    fn load(&self, store: &dyn KvStore, account: &Address) -> Result<AccountBalance, LedgerError> {
        match store.get(&Self::key(account)) {
            None => Ok(AccountBalance::default()),
            Some(bytes) => serde_json::from_slice(&bytes).map_err(|e| LedgerError::Corrupted {
                account: *account,
                reason: e.to_string(),
            }),
        }
    }

    fn store(
        &self,
        store: &mut dyn KvStore,
        account: &Address,
        balance: &AccountBalance,
    ) -> Result<(), LedgerError> {
        let bytes = serde_json::to_vec(balance).map_err(|e| LedgerError::Encode {
            account: *account,
            reason: e.to_string(),
        })?;
        store.put(&Self::key(account), bytes);
        Ok(())
    }
}

impl AccountLedger for CoinLedger {
    fn balance(&self, store: &dyn KvStore, account: &Address) -> Result<Amount, LedgerError> {
        Ok(self.load(store, account)?.available)
    }

    fn debit(
        &self,
        store: &mut dyn KvStore,
        account: &Address,
        amount: Amount,
    ) -> Result<(), LedgerError> {
        let mut balance = self.load(store, account)?;
        if balance.available < amount {
            return Err(LedgerError::InsufficientFunds {
                account: *account,
                balance: balance.available,
                required: amount,
            });
        }
        balance.available -= amount;
        self.store(store, account, &balance)
    }

    fn credit(
        &self,
        store: &mut dyn KvStore,
        account: &Address,
        amount: Amount,
    ) -> Result<(), LedgerError> {
        let mut balance = self.load(store, account)?;
        balance.available = balance
            .available
            .checked_add(amount)
            .ok_or(LedgerError::Overflow { account: *account })?;
        self.store(store, account, &balance)
    }
}
