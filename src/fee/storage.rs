use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::{
    address::Address,
    error::{FeeError, FeeResult},
    state::KvStore,
};

use super::deposit::{Deposit, DepositId};

const DEPOSIT_PREFIX: &[u8] = b"fee|deposit|";
const SCORE_PREFIX: &[u8] = b"fee|score|";

/// Per-SCORE index: the sharing ratio plus the cursors into the deposit chain.
///
/// Created on the first deposit or ratio setting and never removed, so the
/// ratio survives an emptied chain.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScoreFeeAccount {
    /// Percentage of each call's step cost paid by the SCORE.
    pub ratio: u8,
    pub head_id: Option<DepositId>,
    pub tail_id: Option<DepositId>,
    /// Oldest deposit that may still hold virtual steps.
    pub available_head_id_of_virtual_step: Option<DepositId>,
    /// Oldest deposit that may still hold deposited coin.
    pub available_head_id_of_deposit: Option<DepositId>,
}

impl ScoreFeeAccount {
    pub fn has_deposits(&self) -> bool {
        self.head_id.is_some()
    }
}

/// Typed access to deposit and SCORE fee records inside a [`KvStore`].
#[derive(Clone, Copy, Debug, Default)]
pub struct FeeStorage;

impl FeeStorage {
    pub fn new() -> Self {
        Self
    }

    fn deposit_key(id: &DepositId) -> Vec<u8> {
        let mut key = DEPOSIT_PREFIX.to_vec();
        key.extend_from_slice(id.as_bytes());
        key
    }

    fn score_key(score: &Address) -> Vec<u8> {
        let mut key = SCORE_PREFIX.to_vec();
        key.extend_from_slice(&score.to_bytes());
        key
    }

    pub fn get_deposit(&self, store: &dyn KvStore, id: &DepositId) -> FeeResult<Option<Deposit>> {
        read(store, &Self::deposit_key(id))
    }

    /// Like [`get_deposit`](Self::get_deposit) but a missing record is a broken chain.
    pub fn load_linked_deposit(&self, store: &dyn KvStore, id: &DepositId) -> FeeResult<Deposit> {
        self.get_deposit(store, id)?
            .ok_or_else(|| FeeError::Codec(format!("dangling deposit link {id}")))
    }

    pub fn put_deposit(&self, store: &mut dyn KvStore, deposit: &Deposit) -> FeeResult<()> {
        write(store, &Self::deposit_key(&deposit.id), deposit)
    }

    pub fn delete_deposit(&self, store: &mut dyn KvStore, id: &DepositId) {
        store.delete(&Self::deposit_key(id));
    }

    pub fn get_score_fee(
        &self,
        store: &dyn KvStore,
        score: &Address,
    ) -> FeeResult<Option<ScoreFeeAccount>> {
        read(store, &Self::score_key(score))
    }

    pub fn get_or_default_score_fee(
        &self,
        store: &dyn KvStore,
        score: &Address,
    ) -> FeeResult<ScoreFeeAccount> {
        Ok(self.get_score_fee(store, score)?.unwrap_or_default())
    }

    pub fn put_score_fee(
        &self,
        store: &mut dyn KvStore,
        score: &Address,
        account: &ScoreFeeAccount,
    ) -> FeeResult<()> {
        write(store, &Self::score_key(score), account)
    }

    /// Walks the chain forward from `start` through `next_id`.
    pub fn deposits<'s>(&self, store: &'s dyn KvStore, start: Option<DepositId>) -> ChainIter<'s> {
        ChainIter {
            store,
            cursor: start,
            backward: false,
        }
    }

    /// Walks the chain backward from `start` through `prev_id`.
    pub fn deposits_rev<'s>(
        &self,
        store: &'s dyn KvStore,
        start: Option<DepositId>,
    ) -> ChainIter<'s> {
        ChainIter {
            store,
            cursor: start,
            backward: true,
        }
    }
}

fn read<T: DeserializeOwned>(store: &dyn KvStore, key: &[u8]) -> FeeResult<Option<T>> {
    store
        .get(key)
        .map(|bytes| serde_json::from_slice(&bytes).map_err(|e| FeeError::Codec(e.to_string())))
        .transpose()
}

fn write<T: Serialize>(store: &mut dyn KvStore, key: &[u8], value: &T) -> FeeResult<()> {
    let bytes = serde_json::to_vec(value).map_err(|e| FeeError::Codec(e.to_string()))?;
    store.put(key, bytes);
    Ok(())
}

/// Iterator over a deposit chain. A link to an id with no stored record
/// yields a `Codec` error and ends the walk.
pub struct ChainIter<'s> {
    store: &'s dyn KvStore,
    cursor: Option<DepositId>,
    backward: bool,
}

impl Iterator for ChainIter<'_> {
    type Item = FeeResult<Deposit>;

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.cursor.take()?;
        match read::<Deposit>(self.store, &FeeStorage::deposit_key(&id)) {
            Ok(Some(deposit)) => {
                self.cursor = if self.backward {
                    deposit.prev_id
                } else {
                    deposit.next_id
                };
                Some(Ok(deposit))
            }
            Ok(None) => Some(Err(FeeError::Codec(format!("dangling deposit link {id}")))),
            Err(err) => Some(Err(err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::MemoryDb;

    fn linked(n: u8) -> Vec<Deposit> {
        let score = Address::contract([9; 20]);
        let sender = Address::eoa([8; 20]);
        let ids: Vec<DepositId> = (0..n).map(|i| DepositId::new([i + 1; 32])).collect();
        ids.iter()
            .enumerate()
            .map(|(i, id)| {
                let mut d = Deposit::new(*id, score, sender, 100 * (i as u128 + 1), 0, 10);
                d.prev_id = i.checked_sub(1).map(|p| ids[p]);
                d.next_id = ids.get(i + 1).copied();
                d
            })
            .collect()
    }

    #[test]
    fn deposit_record_round_trips() {
        let mut db = MemoryDb::new();
        let storage = FeeStorage::new();
        let mut deposit = linked(1).remove(0);
        deposit.deposit_amount = 100_000 * crate::ledger::LOOP_PER_ICX;
        deposit.virtual_step_issued = u128::MAX;
        storage.put_deposit(&mut db, &deposit).unwrap();
        assert_eq!(storage.get_deposit(&db, &deposit.id).unwrap(), Some(deposit.clone()));
        storage.delete_deposit(&mut db, &deposit.id);
        assert_eq!(storage.get_deposit(&db, &deposit.id).unwrap(), None);
    }

    #[test]
    fn score_account_round_trips_and_defaults() {
        let mut db = MemoryDb::new();
        let storage = FeeStorage::new();
        let score = Address::contract([4; 20]);
        assert_eq!(storage.get_score_fee(&db, &score).unwrap(), None);
        assert_eq!(
            storage.get_or_default_score_fee(&db, &score).unwrap(),
            ScoreFeeAccount::default()
        );
        let account = ScoreFeeAccount {
            ratio: 40,
            head_id: Some(DepositId::new([1; 32])),
            tail_id: Some(DepositId::new([2; 32])),
            available_head_id_of_virtual_step: None,
            available_head_id_of_deposit: Some(DepositId::new([2; 32])),
        };
        storage.put_score_fee(&mut db, &score, &account).unwrap();
        assert_eq!(storage.get_score_fee(&db, &score).unwrap(), Some(account));
    }

    #[test]
    fn chain_iterates_both_directions() {
        let mut db = MemoryDb::new();
        let storage = FeeStorage::new();
        let chain = linked(4);
        for d in &chain {
            storage.put_deposit(&mut db, d).unwrap();
        }
        let forward: Vec<DepositId> = storage
            .deposits(&db, Some(chain[0].id))
            .map(|d| d.unwrap().id)
            .collect();
        let backward: Vec<DepositId> = storage
            .deposits_rev(&db, Some(chain[3].id))
            .map(|d| d.unwrap().id)
            .collect();
        let expected: Vec<DepositId> = chain.iter().map(|d| d.id).collect();
        assert_eq!(forward, expected);
        assert_eq!(backward, expected.into_iter().rev().collect::<Vec<_>>());
    }

    #[test]
    fn dangling_link_is_reported_in_both_directions() {
        let mut db = MemoryDb::new();
        let storage = FeeStorage::new();
        let chain = linked(3);
        for d in &chain {
            storage.put_deposit(&mut db, d).unwrap();
        }
        storage.delete_deposit(&mut db, &chain[1].id);

        let forward: Vec<FeeResult<Deposit>> = storage.deposits(&db, Some(chain[0].id)).collect();
        assert_eq!(forward.len(), 2);
        assert_eq!(forward[0].as_ref().unwrap().id, chain[0].id);
        assert!(matches!(forward[1], Err(FeeError::Codec(_))));

        let backward: Vec<FeeResult<Deposit>> =
            storage.deposits_rev(&db, Some(chain[2].id)).collect();
        assert_eq!(backward.len(), 2);
        assert!(matches!(backward[1], Err(FeeError::Codec(_))));
    }

    #[test]
    fn corrupted_record_is_reported() {
        let mut db = MemoryDb::new();
        let id = DepositId::new([7; 32]);
        db.put(&FeeStorage::deposit_key(&id), b"not json".to_vec());
        assert!(matches!(
            FeeStorage::new().get_deposit(&db, &id),
            Err(FeeError::Codec(_))
        ));
    }
}
