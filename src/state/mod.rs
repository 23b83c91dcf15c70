//! Key-value state shared by the fee records and the coin ledger.
//!
//! Every mutation made while executing one call goes through a
//! [`Transaction`]: the overlay is applied to the underlying store only on
//! [`Transaction::commit`], so a failed call leaves no trace behind.

use std::{collections::BTreeMap, fs, path::Path};

use sha2::{Digest, Sha256};

pub trait KvStore {
    fn get(&self, key: &[u8]) -> Option<Vec<u8>>;
    fn put(&mut self, key: &[u8], value: Vec<u8>);
    fn delete(&mut self, key: &[u8]);
}

#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("state file i/o: {0}")]
    Io(#[from] std::io::Error),
    #[error("state file decode: {0}")]
    Decode(String),
}

/// In-memory store; the CLI persists it as a JSON map of hex strings.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MemoryDb {
    entries: BTreeMap<Vec<u8>, Vec<u8>>,
}

impl MemoryDb {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Load from JSON; missing file -> empty store.
    pub fn load(path: &Path) -> Result<Self, StateError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let bytes = fs::read(path)?;
        let encoded: BTreeMap<String, String> =
            serde_json::from_slice(&bytes).map_err(|e| StateError::Decode(e.to_string()))?;
        let mut entries = BTreeMap::new();
        for (key, value) in encoded {
            let key = hex::decode(&key).map_err(|e| StateError::Decode(e.to_string()))?;
            let value = hex::decode(&value).map_err(|e| StateError::Decode(e.to_string()))?;
            entries.insert(key, value);
        }
        Ok(Self { entries })
    }

    pub fn save(&self, path: &Path) -> Result<(), StateError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let encoded: BTreeMap<String, String> = self
            .entries
            .iter()
            .map(|(k, v)| (hex::encode(k), hex::encode(v)))
            .collect();
        let data =
            serde_json::to_vec_pretty(&encoded).map_err(|e| StateError::Decode(e.to_string()))?;
        fs::write(path, data)?;
        Ok(())
    }

    /// Deterministic digest over every stored pair.
    pub fn state_root(&self) -> [u8; 32] {
        let leaves = self
            .entries
            .iter()
            .map(|(key, value)| {
                let mut hasher = Sha256::new();
                hasher.update(b"kv");
                hasher.update((key.len() as u64).to_le_bytes());
                hasher.update(key);
                hasher.update(value);
                hasher.finalize().into()
            })
            .collect();
        build_merkle(leaves)
    }
}

impl KvStore for MemoryDb {
    fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.entries.get(key).cloned()
    }

    fn put(&mut self, key: &[u8], value: Vec<u8>) {
        self.entries.insert(key.to_vec(), value);
    }

    fn delete(&mut self, key: &[u8]) {
        self.entries.remove(key);
    }
}

fn build_merkle(mut leaves: Vec<[u8; 32]>) -> [u8; 32] {
    if leaves.is_empty() {
        return Sha256::digest(b"score-fee-empty").into();
    }
    while leaves.len() > 1 {
        let mut next = Vec::with_capacity((leaves.len() + 1) / 2);
        for chunk in leaves.chunks(2) {
            let mut hasher = Sha256::new();
            hasher.update(b"node");
            hasher.update(chunk[0]);
            hasher.update(chunk.get(1).unwrap_or(&chunk[0]));
            next.push(hasher.finalize().into());
        }
        leaves = next;
    }
    leaves[0]
}

/// Write-buffer over a base store. Dropping it without `commit` discards
/// every buffered write.
pub struct Transaction<'a, S: KvStore + ?Sized> {
    base: &'a mut S,
    // `None` marks a delete.
    pending: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
}

impl<'a, S: KvStore + ?Sized> Transaction<'a, S> {
    pub fn begin(base: &'a mut S) -> Self {
        Self {
            base,
            pending: BTreeMap::new(),
        }
    }

    pub fn pending_writes(&self) -> usize {
        self.pending.len()
    }

    pub fn commit(self) {
        for (key, value) in self.pending {
            match value {
                Some(value) => self.base.put(&key, value),
                None => self.base.delete(&key),
            }
        }
    }
}

impl<S: KvStore + ?Sized> KvStore for Transaction<'_, S> {
    fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        match self.pending.get(key) {
            Some(value) => value.clone(),
            None => self.base.get(key),
        }
    }

    fn put(&mut self, key: &[u8], value: Vec<u8>) {
        self.pending.insert(key.to_vec(), Some(value));
    }

    fn delete(&mut self, key: &[u8]) {
        self.pending.insert(key.to_vec(), None);
    }
}
