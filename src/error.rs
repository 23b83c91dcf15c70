use thiserror::Error;

use crate::{contracts::RegistryError, ledger::LedgerError};

/// Canonical error type surfaced by the fee engine and request handler.
///
/// Every variant aborts the call it was raised in; the caller discards the
/// enclosing state transaction.
#[derive(Debug, Error)]
pub enum FeeError {
    /// Malformed or out-of-range input, unknown deposit, wrong caller.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The contract's deposits cannot cover its share of a charge.
    #[error("invalid params: {0}")]
    InvalidParams(String),

    /// Coin ledger failure while debiting or crediting an account.
    #[error("account ledger: {0}")]
    Ledger(#[from] LedgerError),

    /// A stored fee record could not be decoded.
    #[error("corrupted fee record: {0}")]
    Codec(String),
}

impl FeeError {
    pub(crate) fn invalid_request(msg: impl Into<String>) -> Self {
        Self::InvalidRequest(msg.into())
    }

    pub(crate) fn invalid_params(msg: impl Into<String>) -> Self {
        Self::InvalidParams(msg.into())
    }
}

impl From<RegistryError> for FeeError {
    fn from(_: RegistryError) -> Self {
        Self::InvalidRequest("Invalid SCORE".into())
    }
}

pub type FeeResult<T> = Result<T, FeeError>;
