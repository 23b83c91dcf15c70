//! SCORE fee deposits and fee sharing.

pub mod deposit;
pub mod engine;
pub mod handler;
pub mod policy;
pub mod storage;

pub use deposit::{Deposit, DepositId};
pub use engine::{FeeEngine, ScoreFeeInfo, StepPayment, Withdrawal};
pub use handler::{CallContext, EventArg, EventLog, EventSink, FeeHandler, FeeRequest};
pub use policy::{DepositPolicy, ZeroPolicy};
pub use storage::{FeeStorage, ScoreFeeAccount};
