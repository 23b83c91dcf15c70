use std::{collections::BTreeMap, fs, path::Path};

use serde::{Deserialize, Serialize};

use crate::address::Address;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("unknown SCORE {0}")]
    UnknownScore(Address),
    #[error("{0} is not a contract address")]
    NotAContract(Address),
    #[error("registry file: {0}")]
    Io(String),
}

/// Who deployed (and therefore owns) each contract.
pub trait OwnershipRegistry {
    fn owner_of(&self, score: &Address) -> Result<Address, RegistryError>;

    fn is_registered(&self, score: &Address) -> bool {
        self.owner_of(score).is_ok()
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScoreDeployInfo {
    pub score: Address,
    pub owner: Address,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ScoreRegistry {
    scores: BTreeMap<Address, ScoreDeployInfo>,
}

impl ScoreRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load from JSON; missing file -> empty registry.
    pub fn load(path: &Path) -> Result<Self, RegistryError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let bytes = fs::read(path).map_err(|e| RegistryError::Io(e.to_string()))?;
        serde_json::from_slice(&bytes).map_err(|e| RegistryError::Io(e.to_string()))
    }

    pub fn save(&self, path: &Path) -> Result<(), RegistryError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| RegistryError::Io(e.to_string()))?;
        }
        let data =
            serde_json::to_vec_pretty(self).map_err(|e| RegistryError::Io(e.to_string()))?;
        fs::write(path, data).map_err(|e| RegistryError::Io(e.to_string()))
    }

    /// Records a deployment, replacing the owner if the contract is known.
    pub fn register(&mut self, score: Address, owner: Address) -> Result<(), RegistryError> {
        if !score.is_contract() {
            return Err(RegistryError::NotAContract(score));
        }
        self.scores.insert(score, ScoreDeployInfo { score, owner });
        Ok(())
    }
}

impl OwnershipRegistry for ScoreRegistry {
    fn owner_of(&self, score: &Address) -> Result<Address, RegistryError> {
        self.scores
            .get(score)
            .map(|info| info.owner)
            .ok_or(RegistryError::UnknownScore(*score))
    }
}
