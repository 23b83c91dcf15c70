//! Fee deposits and fee sharing for SCORE contracts.
//!
//! A SCORE owner can lock coin in time-limited deposits and choose a ratio of
//! every call's step cost that the contract pays out of those deposits instead
//! of the caller. The crate is split into:
//!
//! * [`fee`]: the deposit chain, the charging engine and the request
//!   dispatcher with its event logs.
//! * [`state`]: the key-value store the fee records live in, with a
//!   commit-or-discard [`Transaction`](state::Transaction) overlay.
//! * [`ledger`] and [`contracts`]: the coin balances and the SCORE ownership
//!   registry the engine depends on.
//! * [`config`]: deposit amount and period bounds.
//!
//! ```
//! use score_fee::{
//!     address::Address,
//!     contracts::ScoreRegistry,
//!     fee::{FeeEngine, StepPayment},
//!     ledger::{AccountLedger, CoinLedger},
//!     state::MemoryDb,
//! };
//!
//! let caller = Address::eoa([1; 20]);
//! let score = Address::contract([2; 20]);
//! let registry = ScoreRegistry::new();
//! let ledger = CoinLedger::new();
//! let mut db = MemoryDb::new();
//! ledger.credit(&mut db, &caller, 1_000).unwrap();
//!
//! let engine = FeeEngine::new(&registry, &ledger);
//! let paid = engine
//!     .charge_transaction_fee(&mut db, &caller, &score, 10, 50, 1)
//!     .unwrap();
//! assert_eq!(paid, StepPayment::from([(caller, 50)]));
//! assert_eq!(ledger.balance(&db, &caller).unwrap(), 500);
//! ```

pub mod address;
pub mod config;
pub mod contracts;
pub mod fee;
pub mod ledger;
pub mod state;

mod error;

pub use error::{FeeError, FeeResult};
