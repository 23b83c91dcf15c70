//! Deposit bookkeeping and fee charging for SCOREs.
//!
//! Every SCORE owns a chain of deposits linked oldest to newest. Charging
//! walks the chain from one of two cursors, first spending virtual steps and
//! then deposited coin, so older deposits are always drained first.

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::{debug, info};

use crate::{
    address::Address,
    config::FeeConfig,
    contracts::OwnershipRegistry,
    error::{FeeError, FeeResult},
    ledger::{AccountLedger, Amount},
    state::KvStore,
};

use super::{
    deposit::{Deposit, DepositId},
    policy::{DepositPolicy, ZeroPolicy},
    storage::{FeeStorage, ScoreFeeAccount},
};

/// Steps paid per payer for one charged call.
pub type StepPayment = BTreeMap<Address, Amount>;

/// Aggregated fee view of one SCORE.
#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct ScoreFeeInfo {
    pub score_address: Address,
    pub deposits: Vec<Deposit>,
    pub sharing_ratio: u8,
    /// Sum over unexpired deposits only.
    pub available_virtual_step: Amount,
    /// Sum over unexpired deposits only.
    pub available_deposit: Amount,
}

/// Outcome of destroying a deposit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Withdrawal {
    pub score_address: Address,
    pub returned_amount: Amount,
    pub penalty: Amount,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Resource {
    VirtualStep,
    Coin,
}

impl Resource {
    fn available(self, deposit: &Deposit) -> Amount {
        match self {
            Self::VirtualStep => deposit.available_virtual_step(),
            Self::Coin => deposit.available_deposit(),
        }
    }

    fn consume(self, deposit: &mut Deposit, amount: Amount) {
        match self {
            Self::VirtualStep => deposit.virtual_step_used += amount,
            Self::Coin => deposit.deposit_used += amount,
        }
    }
}

pub struct FeeEngine<'a, R, A, P = ZeroPolicy> {
    registry: &'a R,
    accounts: &'a A,
    policy: P,
    config: FeeConfig,
    storage: FeeStorage,
}

impl<'a, R, A> FeeEngine<'a, R, A, ZeroPolicy>
where
    R: OwnershipRegistry,
    A: AccountLedger,
{
    pub fn new(registry: &'a R, accounts: &'a A) -> Self {
        Self {
            registry,
            accounts,
            policy: ZeroPolicy,
            config: FeeConfig::default(),
            storage: FeeStorage::new(),
        }
    }
}

impl<'a, R, A, P> FeeEngine<'a, R, A, P>
where
    R: OwnershipRegistry,
    A: AccountLedger,
    P: DepositPolicy,
{
    pub fn with_policy<Q: DepositPolicy>(self, policy: Q) -> FeeEngine<'a, R, A, Q> {
        FeeEngine {
            registry: self.registry,
            accounts: self.accounts,
            policy,
            config: self.config,
            storage: self.storage,
        }
    }

    pub fn with_config(mut self, config: FeeConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the share of each call's step cost that `score` pays and returns
    /// the stored ratio.
    pub fn set_fee_sharing_ratio(
        &self,
        store: &mut dyn KvStore,
        sender: &Address,
        score: &Address,
        ratio: i64,
    ) -> FeeResult<u8> {
        self.check_score_ownership(sender, score)?;

        let ratio = u8::try_from(ratio)
            .ok()
            .filter(|r| *r <= 100)
            .ok_or_else(|| FeeError::invalid_request("Invalid ratio"))?;

        let mut account = self.storage.get_or_default_score_fee(store, score)?;
        account.ratio = ratio;
        self.storage.put_score_fee(store, score, &account)?;
        info!(%score, ratio, "fee sharing ratio set");
        Ok(ratio)
    }

    pub fn get_fee_sharing_ratio(&self, store: &dyn KvStore, score: &Address) -> FeeResult<u8> {
        self.registry.owner_of(score)?;
        Ok(self
            .storage
            .get_score_fee(store, score)?
            .map(|account| account.ratio)
            .unwrap_or(0))
    }

    pub fn get_score_fee_info(
        &self,
        store: &dyn KvStore,
        score: &Address,
        block_height: u64,
    ) -> FeeResult<ScoreFeeInfo> {
        self.registry.owner_of(score)?;
        let account = self.storage.get_or_default_score_fee(store, score)?;

        let mut info = ScoreFeeInfo {
            score_address: *score,
            deposits: Vec::new(),
            sharing_ratio: account.ratio,
            available_virtual_step: 0,
            available_deposit: 0,
        };
        for deposit in self.storage.deposits(store, account.head_id) {
            let deposit = deposit?;
            if deposit.is_active(block_height) {
                info.available_virtual_step = info
                    .available_virtual_step
                    .saturating_add(deposit.available_virtual_step());
                info.available_deposit = info
                    .available_deposit
                    .saturating_add(deposit.available_deposit());
            }
            info.deposits.push(deposit);
        }
        Ok(info)
    }

    /// Locks `amount` of the sender's coin as a new deposit for `score`,
    /// appended at the tail of the SCORE's chain.
    #[allow(clippy::too_many_arguments)]
    pub fn deposit_fee(
        &self,
        store: &mut dyn KvStore,
        tx_hash: DepositId,
        sender: &Address,
        score: &Address,
        amount: Amount,
        block_height: u64,
        period: u64,
    ) -> FeeResult<Deposit> {
        if !self.config.amount_in_range(amount) {
            return Err(FeeError::invalid_request("Invalid deposit amount"));
        }
        if !self.config.period_in_range(period) {
            return Err(FeeError::invalid_request("Invalid deposit period"));
        }
        self.check_score_ownership(sender, score)?;

        if self.storage.get_deposit(store, &tx_hash)?.is_some() {
            return Err(FeeError::invalid_request("Deposit already exists"));
        }
        let expires = block_height
            .checked_add(period)
            .ok_or_else(|| FeeError::invalid_request("Invalid deposit period"))?;

        self.accounts.debit(store, sender, amount)?;

        let mut deposit = Deposit::new(tx_hash, *score, *sender, amount, block_height, expires);
        deposit.virtual_step_issued = self.policy.issue(amount, block_height, expires);
        self.insert_deposit(store, &mut deposit)?;

        info!(
            id = %deposit.id,
            %score,
            %sender,
            amount,
            expires,
            virtual_step = deposit.virtual_step_issued,
            "deposit created"
        );
        Ok(deposit)
    }

    fn insert_deposit(&self, store: &mut dyn KvStore, deposit: &mut Deposit) -> FeeResult<()> {
        let mut account = self
            .storage
            .get_or_default_score_fee(store, &deposit.score_address)?;

        deposit.prev_id = account.tail_id;
        deposit.next_id = None;
        self.storage.put_deposit(store, deposit)?;

        if let Some(tail_id) = account.tail_id {
            let mut tail = self.storage.load_linked_deposit(store, &tail_id)?;
            tail.next_id = Some(deposit.id);
            self.storage.put_deposit(store, &tail)?;
        }

        account.head_id.get_or_insert(deposit.id);
        account
            .available_head_id_of_virtual_step
            .get_or_insert(deposit.id);
        account.available_head_id_of_deposit.get_or_insert(deposit.id);
        account.tail_id = Some(deposit.id);
        self.storage
            .put_score_fee(store, &deposit.score_address, &account)
    }

    /// Destroys a deposit, returning what is left of it minus any
    /// early-withdrawal penalty to the original depositor.
    pub fn withdraw_fee(
        &self,
        store: &mut dyn KvStore,
        sender: &Address,
        deposit_id: &[u8],
        block_height: u64,
    ) -> FeeResult<Withdrawal> {
        let id = DepositId::from_slice(deposit_id)?;
        let deposit = self
            .storage
            .get_deposit(store, &id)?
            .ok_or_else(|| FeeError::invalid_request("Deposit info not found"))?;
        if deposit.sender != *sender {
            return Err(FeeError::invalid_request("Invalid sender"));
        }

        let available = deposit.available_deposit();
        let penalty = if deposit.is_active(block_height) {
            self.policy
                .penalty(
                    deposit.deposit_amount,
                    deposit.created,
                    deposit.expires,
                    block_height,
                )
                .min(available)
        } else {
            0
        };
        let returned_amount = available - penalty;

        self.delete_deposit(store, &deposit)?;
        if returned_amount > 0 {
            self.accounts.credit(store, sender, returned_amount)?;
        }

        info!(
            %id,
            score = %deposit.score_address,
            returned_amount,
            penalty,
            "deposit destroyed"
        );
        Ok(Withdrawal {
            score_address: deposit.score_address,
            returned_amount,
            penalty,
        })
    }

    fn delete_deposit(&self, store: &mut dyn KvStore, deposit: &Deposit) -> FeeResult<()> {
        if let Some(prev_id) = deposit.prev_id {
            let mut prev = self.storage.load_linked_deposit(store, &prev_id)?;
            prev.next_id = deposit.next_id;
            self.storage.put_deposit(store, &prev)?;
        }
        if let Some(next_id) = deposit.next_id {
            let mut next = self.storage.load_linked_deposit(store, &next_id)?;
            next.prev_id = deposit.prev_id;
            self.storage.put_deposit(store, &next)?;
        }

        let mut account = self
            .storage
            .get_score_fee(store, &deposit.score_address)?
            .ok_or_else(|| {
                FeeError::Codec(format!("no fee account for {}", deposit.score_address))
            })?;
        let before = account.clone();
        let id = Some(deposit.id);

        if account.head_id == id {
            account.head_id = deposit.next_id;
        }
        if account.tail_id == id {
            account.tail_id = deposit.prev_id;
        }
        if account.available_head_id_of_virtual_step == id {
            account.available_head_id_of_virtual_step = deposit.next_id;
        }
        if account.available_head_id_of_deposit == id {
            account.available_head_id_of_deposit = deposit.next_id;
        }
        if account != before {
            self.storage
                .put_score_fee(store, &deposit.score_address, &account)?;
        }

        self.storage.delete_deposit(store, &deposit.id);
        Ok(())
    }

    pub fn get_deposit_info_by_id(
        &self,
        store: &dyn KvStore,
        deposit_id: &[u8],
    ) -> FeeResult<Deposit> {
        let id = DepositId::from_slice(deposit_id)?;
        self.storage
            .get_deposit(store, &id)?
            .ok_or_else(|| FeeError::invalid_request("Deposit info not found"))
    }

    /// Charges `used_step * step_price` for one call, splitting it between
    /// the sender and, if `to` is a sharing SCORE, the SCORE's deposits.
    ///
    /// On error the caller must discard every write made to `store`.
    pub fn charge_transaction_fee(
        &self,
        store: &mut dyn KvStore,
        sender: &Address,
        to: &Address,
        step_price: Amount,
        used_step: Amount,
        block_height: u64,
    ) -> FeeResult<StepPayment> {
        let receiver_step = if to.is_contract() {
            self.charge_fee_from_score(store, to, step_price, used_step, block_height)?
        } else {
            0
        };

        let sender_step = used_step - receiver_step;
        let sender_fee = sender_step
            .checked_mul(step_price)
            .ok_or_else(|| FeeError::invalid_params("Fee overflow"))?;
        self.accounts.debit(store, sender, sender_fee)?;

        let mut paid = StepPayment::new();
        if receiver_step > 0 {
            paid.insert(*to, receiver_step);
            if sender_step > 0 {
                paid.insert(*sender, sender_step);
            }
        } else {
            paid.insert(*sender, sender_step);
        }
        debug!(%sender, %to, sender_step, receiver_step, "transaction fee charged");
        Ok(paid)
    }

    /// Returns the number of steps the SCORE paid.
    fn charge_fee_from_score(
        &self,
        store: &mut dyn KvStore,
        score: &Address,
        step_price: Amount,
        used_step: Amount,
        block_height: u64,
    ) -> FeeResult<Amount> {
        let Some(mut account) = self.storage.get_score_fee(store, score)? else {
            return Ok(0);
        };
        let receiver_step = used_step
            .checked_mul(Amount::from(account.ratio))
            .ok_or_else(|| FeeError::invalid_params("Step overflow"))?
            / 100;
        if receiver_step == 0 {
            return Ok(0);
        }

        let (charged_step, step_cursor) = self.consume(
            store,
            Resource::VirtualStep,
            account.available_head_id_of_virtual_step,
            receiver_step,
            block_height,
        )?;

        let icx_required = (receiver_step - charged_step)
            .checked_mul(step_price)
            .ok_or_else(|| FeeError::invalid_params("Fee overflow"))?;
        let (charged_icx, deposit_cursor) = self.consume(
            store,
            Resource::Coin,
            account.available_head_id_of_deposit,
            icx_required,
            block_height,
        )?;

        if charged_icx != icx_required {
            return Err(FeeError::invalid_params("Out of deposit balance"));
        }

        if account.available_head_id_of_virtual_step != step_cursor
            || account.available_head_id_of_deposit != deposit_cursor
        {
            debug!(
                %score,
                virtual_step = ?step_cursor,
                deposit = ?deposit_cursor,
                "availability cursors advanced"
            );
            account.available_head_id_of_virtual_step = step_cursor;
            account.available_head_id_of_deposit = deposit_cursor;
            self.storage.put_score_fee(store, score, &account)?;
        }
        Ok(receiver_step)
    }

    /// Spends up to `required` of `resource` from unexpired deposits,
    /// oldest first, starting at `start`.
    ///
    /// Returns the amount charged and the new cursor: the cursor moves past
    /// the leading deposits left with nothing to offer on this resource and
    /// stops at the first one that still holds a balance.
    fn consume(
        &self,
        store: &mut dyn KvStore,
        resource: Resource,
        start: Option<DepositId>,
        required: Amount,
        block_height: u64,
    ) -> FeeResult<(Amount, Option<DepositId>)> {
        let mut remaining = required;
        let mut cursor = start;
        let mut exhausted_prefix = true;
        let mut next = start;

        while remaining > 0 {
            let Some(id) = next else { break };
            let mut deposit = self.storage.load_linked_deposit(store, &id)?;
            next = deposit.next_id;

            if deposit.is_active(block_height) {
                let charged = remaining.min(resource.available(&deposit));
                if charged > 0 {
                    resource.consume(&mut deposit, charged);
                    self.storage.put_deposit(store, &deposit)?;
                    remaining -= charged;
                    debug!(id = %deposit.id, ?resource, charged, "deposit charged");
                }
            }

            if exhausted_prefix && resource.available(&deposit) == 0 {
                cursor = deposit.next_id;
            } else {
                exhausted_prefix = false;
            }
        }

        Ok((required - remaining, cursor))
    }

    /// Splits a sender's step limit into what the sender and the receiving
    /// SCORE may each spend for one call.
    pub fn get_available_step(
        &self,
        store: &dyn KvStore,
        sender: &Address,
        to: &Address,
        sender_step_limit: Amount,
    ) -> FeeResult<StepPayment> {
        let ratio = if to.is_contract() {
            self.storage
                .get_score_fee(store, to)?
                .map(|account| Amount::from(account.ratio))
                .unwrap_or(0)
        } else {
            0
        };

        let mut steps = StepPayment::new();
        match ratio {
            0 => {
                steps.insert(*sender, sender_step_limit);
            }
            100 => {
                steps.insert(*to, sender_step_limit);
                steps.insert(*sender, 0);
            }
            r => {
                let total = sender_step_limit
                    .checked_mul(100)
                    .ok_or_else(|| FeeError::invalid_params("Step overflow"))?
                    / (100 - r);
                let score_step = total - sender_step_limit;
                if score_step > 0 {
                    steps.insert(*to, score_step);
                }
                steps.insert(*sender, sender_step_limit);
            }
        }
        Ok(steps)
    }

    /// Whether `score` can currently cover its share of a call.
    pub fn can_charge_fee_from_score(
        &self,
        store: &dyn KvStore,
        score: &Address,
        block_height: u64,
    ) -> FeeResult<bool> {
        let account = self.storage.get_or_default_score_fee(store, score)?;
        if !self.is_score_sharing_fee(&account) {
            return Ok(true);
        }
        for start in [
            account.available_head_id_of_virtual_step,
            account.available_head_id_of_deposit,
        ] {
            for deposit in self.storage.deposits(store, start) {
                let deposit = deposit?;
                if deposit.is_active(block_height)
                    && (deposit.available_virtual_step() > 0 || deposit.available_deposit() > 0)
                {
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }

    fn is_score_sharing_fee(&self, account: &ScoreFeeAccount) -> bool {
        account.ratio > 0 && account.has_deposits()
    }

    fn check_score_ownership(&self, sender: &Address, score: &Address) -> FeeResult<()> {
        if self.registry.owner_of(score)? != *sender {
            return Err(FeeError::invalid_request("Invalid SCORE owner"));
        }
        Ok(())
    }
}
