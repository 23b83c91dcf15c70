//! Named-operation front door to the fee engine.
//!
//! A call arrives as a method name plus a JSON parameter object, is decoded
//! into a [`FeeRequest`], runs inside its own state [`Transaction`] and, if
//! it mutated anything, reports one [`EventLog`].

use std::fmt;

use serde::{
    de::{self, Visitor},
    Deserialize, Deserializer, Serialize, Serializer,
};
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use crate::{
    address::Address,
    contracts::OwnershipRegistry,
    error::{FeeError, FeeResult},
    ledger::{AccountLedger, Amount},
    state::{KvStore, Transaction},
};

use super::{
    deposit::{Deposit, DepositId},
    engine::{FeeEngine, ScoreFeeInfo, StepPayment},
    policy::{DepositPolicy, ZeroPolicy},
};

pub const FEE_SHARE_SET: &str = "FeeShareSet(Address,int)";
pub const DEPOSIT_CREATED: &str = "DepositCreated(bytes,Address,Address,int,int)";
pub const DEPOSIT_DESTROYED: &str = "DepositDestroyed(bytes,Address,Address,int,int)";

/// Who is calling, at which height, in which transaction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CallContext {
    /// Hash of the enclosing transaction; becomes the id of a created deposit.
    pub tx_hash: DepositId,
    pub sender: Address,
    pub block_height: u64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EventArg {
    Address(Address),
    Bytes(Vec<u8>),
    Int(Amount),
}

impl Serialize for EventArg {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            Self::Address(address) => address.serialize(serializer),
            Self::Bytes(bytes) => serializer.serialize_str(&format!("0x{}", hex::encode(bytes))),
            Self::Int(value) => serializer.serialize_str(&format!("{value:#x}")),
        }
    }
}

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct EventLog {
    pub score_address: Address,
    pub signature: &'static str,
    pub indexed: Vec<EventArg>,
    pub data: Vec<EventArg>,
}

impl EventLog {
    fn new(signature: &'static str, indexed: Vec<EventArg>, data: Vec<EventArg>) -> Self {
        Self {
            score_address: Address::zero_score(),
            signature,
            indexed,
            data,
        }
    }
}

pub trait EventSink {
    fn emit(&mut self, event: EventLog);
}

impl EventSink for Vec<EventLog> {
    fn emit(&mut self, event: EventLog) {
        self.push(event);
    }
}

/// The six fee operations with their decoded parameters.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FeeRequest {
    CreateDeposit {
        score: Address,
        amount: Amount,
        period: u64,
    },
    SetRatio {
        score: Address,
        ratio: i64,
    },
    DestroyDeposit {
        id: Vec<u8>,
    },
    GetFeeShare {
        score: Address,
    },
    GetDeposit {
        id: Vec<u8>,
    },
    GetScoreInfo {
        score: Address,
    },
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct ScoreParams {
    #[serde(rename = "_score")]
    score: Address,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct CreateDepositParams {
    #[serde(rename = "_score")]
    score: Address,
    #[serde(rename = "_amount", deserialize_with = "wire::integer")]
    amount: Amount,
    #[serde(rename = "_period", deserialize_with = "wire::integer")]
    period: u64,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct SetRatioParams {
    #[serde(rename = "_score")]
    score: Address,
    #[serde(rename = "_ratio", deserialize_with = "wire::integer")]
    ratio: i64,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct DepositIdParams {
    #[serde(rename = "_id", deserialize_with = "wire::bytes")]
    id: Vec<u8>,
}

impl FeeRequest {
    pub fn decode(method: &str, params: Value) -> FeeResult<Self> {
        let params = match params {
            Value::Null => Value::Object(Map::new()),
            other => other,
        };
        let request = match method {
            "createDeposit" => {
                let p: CreateDepositParams = parse(params)?;
                Self::CreateDeposit {
                    score: p.score,
                    amount: p.amount,
                    period: p.period,
                }
            }
            "setRatio" => {
                let p: SetRatioParams = parse(params)?;
                Self::SetRatio {
                    score: p.score,
                    ratio: p.ratio,
                }
            }
            "destroyDeposit" => Self::DestroyDeposit {
                id: parse::<DepositIdParams>(params)?.id,
            },
            "getFeeShare" => Self::GetFeeShare {
                score: parse::<ScoreParams>(params)?.score,
            },
            "getDeposit" => Self::GetDeposit {
                id: parse::<DepositIdParams>(params)?.id,
            },
            "getScoreInfo" => Self::GetScoreInfo {
                score: parse::<ScoreParams>(params)?.score,
            },
            other => {
                return Err(FeeError::invalid_request(format!("Invalid method: {other}")));
            }
        };
        Ok(request)
    }

    pub fn method(&self) -> &'static str {
        match self {
            Self::CreateDeposit { .. } => "createDeposit",
            Self::SetRatio { .. } => "setRatio",
            Self::DestroyDeposit { .. } => "destroyDeposit",
            Self::GetFeeShare { .. } => "getFeeShare",
            Self::GetDeposit { .. } => "getDeposit",
            Self::GetScoreInfo { .. } => "getScoreInfo",
        }
    }

    pub fn is_read_only(&self) -> bool {
        matches!(
            self,
            Self::GetFeeShare { .. } | Self::GetDeposit { .. } | Self::GetScoreInfo { .. }
        )
    }
}

fn parse<T: for<'de> Deserialize<'de>>(params: Value) -> FeeResult<T> {
    serde_json::from_value(params).map_err(|err| {
        debug!(%err, "parameter decode failed");
        FeeError::invalid_request("Invalid request: parameter error")
    })
}

/// Integer and byte forms accepted on the wire.
mod wire {
    use super::*;

    struct IntVisitor;

    impl Visitor<'_> for IntVisitor {
        type Value = i128;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("an integer or a 0x-prefixed hex string")
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> Result<i128, E> {
            Ok(i128::from(v))
        }

        fn visit_i64<E: de::Error>(self, v: i64) -> Result<i128, E> {
            Ok(i128::from(v))
        }

        /// Accepts `[-]0x<hex>` or `[-]<decimal>` with exactly one optional
        /// leading minus and nothing else.
        fn visit_str<E: de::Error>(self, v: &str) -> Result<i128, E> {
            let invalid = || E::invalid_value(de::Unexpected::Str(v), &self);
            let (negative, unsigned) = match v.strip_prefix('-') {
                Some(rest) => (true, rest),
                None => (false, v),
            };
            let (radix, digits) = match unsigned.strip_prefix("0x") {
                Some(hex) => (16, hex),
                None => (10, unsigned),
            };
            if digits.is_empty() || !digits.chars().all(|c| c.is_digit(radix)) {
                return Err(invalid());
            }
            let magnitude = u128::from_str_radix(digits, radix).map_err(|_| invalid())?;

            if negative {
                match i128::try_from(magnitude) {
                    Ok(m) => Ok(-m),
                    Err(_) if magnitude == i128::MIN.unsigned_abs() => Ok(i128::MIN),
                    Err(_) => Err(invalid()),
                }
            } else {
                i128::try_from(magnitude).map_err(|_| invalid())
            }
        }
    }

    fn int<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i128, D::Error> {
        deserializer.deserialize_any(IntVisitor)
    }

    pub fn integer<'de, D, T>(deserializer: D) -> Result<T, D::Error>
    where
        D: Deserializer<'de>,
        T: TryFrom<i128>,
    {
        let value = int(deserializer)?;
        T::try_from(value).map_err(|_| de::Error::custom(format!("{value} out of range")))
    }

    pub fn bytes<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        let digits = encoded
            .strip_prefix("0x")
            .ok_or_else(|| de::Error::custom("bytes must be 0x-prefixed"))?;
        hex::decode(digits).map_err(de::Error::custom)
    }
}

fn hex_int(value: impl Into<Amount>) -> Value {
    Value::String(format!("{:#x}", value.into()))
}

/// JSON form of a deposit as returned by `getDeposit`.
pub fn deposit_to_json(deposit: &Deposit) -> Value {
    let mut out = Map::new();
    out.insert("id".into(), Value::String(deposit.id.to_string()));
    out.insert(
        "scoreAddress".into(),
        Value::String(deposit.score_address.to_string()),
    );
    out.insert("sender".into(), Value::String(deposit.sender.to_string()));
    out.insert("depositAmount".into(), hex_int(deposit.deposit_amount));
    out.insert("depositUsed".into(), hex_int(deposit.deposit_used));
    out.insert("created".into(), hex_int(deposit.created));
    out.insert("expires".into(), hex_int(deposit.expires));
    out.insert(
        "virtualStepIssued".into(),
        hex_int(deposit.virtual_step_issued),
    );
    out.insert("virtualStepUsed".into(), hex_int(deposit.virtual_step_used));
    if let Some(prev_id) = deposit.prev_id {
        out.insert("prevId".into(), Value::String(prev_id.to_string()));
    }
    if let Some(next_id) = deposit.next_id {
        out.insert("nextId".into(), Value::String(next_id.to_string()));
    }
    Value::Object(out)
}

pub fn fee_info_to_json(info: &ScoreFeeInfo) -> Value {
    json!({
        "scoreAddress": info.score_address.to_string(),
        "deposits": info.deposits.iter().map(deposit_to_json).collect::<Vec<_>>(),
        "sharingRatio": hex_int(info.sharing_ratio),
        "availableVirtualStep": hex_int(info.available_virtual_step),
        "availableDeposit": hex_int(info.available_deposit),
    })
}

/// Routes decoded requests to a [`FeeEngine`], one state transaction per call.
pub struct FeeHandler<'a, R, A, P = ZeroPolicy> {
    engine: FeeEngine<'a, R, A, P>,
}

impl<'a, R, A, P> FeeHandler<'a, R, A, P>
where
    R: OwnershipRegistry,
    A: AccountLedger,
    P: DepositPolicy,
{
    pub fn new(engine: FeeEngine<'a, R, A, P>) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &FeeEngine<'a, R, A, P> {
        &self.engine
    }

    /// Decodes and runs one call. State changes and the event are only
    /// applied when the whole call succeeds.
    pub fn handle(
        &self,
        store: &mut dyn KvStore,
        ctx: &CallContext,
        method: &str,
        params: Value,
        events: &mut dyn EventSink,
    ) -> FeeResult<Value> {
        let result = FeeRequest::decode(method, params).and_then(|request| {
            debug!(
                method = request.method(),
                read_only = request.is_read_only(),
                height = ctx.block_height,
                "dispatching fee request"
            );
            let mut tx = Transaction::begin(store);
            let (response, event) = self.execute(&mut tx, ctx, &request)?;
            tx.commit();
            Ok((response, event))
        });

        match result {
            Ok((response, event)) => {
                if let Some(event) = event {
                    events.emit(event);
                }
                Ok(response)
            }
            Err(err) => {
                warn!(method, sender = %ctx.sender, %err, "fee request rejected");
                Err(err)
            }
        }
    }

    fn execute(
        &self,
        store: &mut dyn KvStore,
        ctx: &CallContext,
        request: &FeeRequest,
    ) -> FeeResult<(Value, Option<EventLog>)> {
        let engine = &self.engine;
        match request {
            FeeRequest::CreateDeposit {
                score,
                amount,
                period,
            } => {
                let deposit = engine.deposit_fee(
                    store,
                    ctx.tx_hash,
                    &ctx.sender,
                    score,
                    *amount,
                    ctx.block_height,
                    *period,
                )?;
                let event = EventLog::new(
                    DEPOSIT_CREATED,
                    vec![
                        EventArg::Bytes(deposit.id.as_bytes().to_vec()),
                        EventArg::Address(*score),
                        EventArg::Address(ctx.sender),
                    ],
                    vec![EventArg::Int(*amount), EventArg::Int(Amount::from(*period))],
                );
                Ok((Value::Null, Some(event)))
            }
            FeeRequest::SetRatio { score, ratio } => {
                let ratio = engine.set_fee_sharing_ratio(store, &ctx.sender, score, *ratio)?;
                let event = EventLog::new(
                    FEE_SHARE_SET,
                    vec![EventArg::Address(*score)],
                    vec![EventArg::Int(Amount::from(ratio))],
                );
                Ok((Value::Null, Some(event)))
            }
            FeeRequest::DestroyDeposit { id } => {
                let withdrawal =
                    engine.withdraw_fee(store, &ctx.sender, id, ctx.block_height)?;
                let event = EventLog::new(
                    DEPOSIT_DESTROYED,
                    vec![
                        EventArg::Bytes(id.clone()),
                        EventArg::Address(withdrawal.score_address),
                        EventArg::Address(ctx.sender),
                    ],
                    vec![
                        EventArg::Int(withdrawal.returned_amount),
                        EventArg::Int(withdrawal.penalty),
                    ],
                );
                Ok((Value::Null, Some(event)))
            }
            FeeRequest::GetFeeShare { score } => {
                let ratio = engine.get_fee_sharing_ratio(store, score)?;
                Ok((hex_int(ratio), None))
            }
            FeeRequest::GetDeposit { id } => {
                let deposit = engine.get_deposit_info_by_id(store, id)?;
                Ok((deposit_to_json(&deposit), None))
            }
            FeeRequest::GetScoreInfo { score } => {
                let info = engine.get_score_fee_info(store, score, ctx.block_height)?;
                Ok((fee_info_to_json(&info), None))
            }
        }
    }

    /// Charges one call's step cost; nothing is written if any part fails.
    pub fn charge(
        &self,
        store: &mut dyn KvStore,
        sender: &Address,
        to: &Address,
        step_price: Amount,
        used_step: Amount,
        block_height: u64,
    ) -> FeeResult<StepPayment> {
        let mut tx = Transaction::begin(store);
        match self.engine.charge_transaction_fee(
            &mut tx,
            sender,
            to,
            step_price,
            used_step,
            block_height,
        ) {
            Ok(paid) => {
                tx.commit();
                Ok(paid)
            }
            Err(err) => {
                warn!(%sender, %to, used_step, %err, "fee charge rolled back");
                Err(err)
            }
        }
    }
}
