use crate::ledger::Amount;

/// Economic policy plugged into deposit creation and withdrawal.
///
/// No issuance or penalty formula is fixed at this layer; [`ZeroPolicy`]
/// issues nothing and charges nothing. A deployment that wants virtual steps
/// or early-withdrawal penalties must supply its own implementation.
pub trait DepositPolicy {
    /// Virtual steps granted to a deposit of `amount` living from `created` to `expires`.
    fn issue(&self, amount: Amount, created: u64, expires: u64) -> Amount;

    /// Coin withheld when withdrawing at `block_height`. Only consulted
    /// before expiry; the engine also caps the result at what is left.
    fn penalty(&self, amount: Amount, created: u64, expires: u64, block_height: u64) -> Amount;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct ZeroPolicy;

impl DepositPolicy for ZeroPolicy {
    fn issue(&self, _amount: Amount, _created: u64, _expires: u64) -> Amount {
        0
    }

    fn penalty(&self, _amount: Amount, _created: u64, _expires: u64, _block_height: u64) -> Amount {
        0
    }
}

impl<P: DepositPolicy + ?Sized> DepositPolicy for &P {
    fn issue(&self, amount: Amount, created: u64, expires: u64) -> Amount {
        (**self).issue(amount, created, expires)
    }

    fn penalty(&self, amount: Amount, created: u64, expires: u64, block_height: u64) -> Amount {
        (**self).penalty(amount, created, expires, block_height)
    }
}
