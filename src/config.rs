use std::{fs, path::Path};

use serde::{Deserialize, Serialize};

use crate::ledger::{Amount, LOOP_PER_ICX};

pub const MIN_DEPOSIT_AMOUNT: Amount = 5_000 * LOOP_PER_ICX;
pub const MAX_DEPOSIT_AMOUNT: Amount = 100_000 * LOOP_PER_ICX;
/// Deposit periods are measured in blocks.
pub const MIN_DEPOSIT_PERIOD: u64 = 1_296_000;
pub const MAX_DEPOSIT_PERIOD: u64 = 31_104_000;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config i/o: {0}")]
    Io(#[from] std::io::Error),
    #[error("config parse: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("{field}: minimum exceeds maximum")]
    InvertedBounds { field: &'static str },
}

/// Deposit bounds enforced by `createDeposit`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, rename_all = "camelCase")]
pub struct FeeConfig {
    pub min_deposit_amount: Amount,
    pub max_deposit_amount: Amount,
    pub min_deposit_period: u64,
    pub max_deposit_period: u64,
}

impl Default for FeeConfig {
    fn default() -> Self {
        Self {
            min_deposit_amount: MIN_DEPOSIT_AMOUNT,
            max_deposit_amount: MAX_DEPOSIT_AMOUNT,
            min_deposit_period: MIN_DEPOSIT_PERIOD,
            max_deposit_period: MAX_DEPOSIT_PERIOD,
        }
    }
}

impl FeeConfig {
    /// Loads overrides from a JSON file; omitted fields keep their defaults.
    ///
    /// ```json
    /// { "minDepositAmount": 1000, "maxDepositPeriod": 100 }
    /// ```
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.min_deposit_amount > self.max_deposit_amount {
            return Err(ConfigError::InvertedBounds {
                field: "deposit amount",
            });
        }
        if self.min_deposit_period > self.max_deposit_period {
            return Err(ConfigError::InvertedBounds {
                field: "deposit period",
            });
        }
        Ok(())
    }

    pub fn amount_in_range(&self, amount: Amount) -> bool {
        (self.min_deposit_amount..=self.max_deposit_amount).contains(&amount)
    }

    pub fn period_in_range(&self, period: u64) -> bool {
        (self.min_deposit_period..=self.max_deposit_period).contains(&period)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_protocol_constants() {
        let config = FeeConfig::default();
        assert!(config.amount_in_range(MIN_DEPOSIT_AMOUNT));
        assert!(config.amount_in_range(MAX_DEPOSIT_AMOUNT));
        assert!(!config.amount_in_range(MIN_DEPOSIT_AMOUNT - 1));
        assert!(!config.amount_in_range(MAX_DEPOSIT_AMOUNT + 1));
        assert!(config.period_in_range(MIN_DEPOSIT_PERIOD));
        assert!(!config.period_in_range(MAX_DEPOSIT_PERIOD + 1));
    }

    #[test]
    fn partial_file_keeps_remaining_defaults() {
        let mut path = std::env::temp_dir();
        path.push(format!("score_fee_config_{}.json", std::process::id()));
        fs::write(&path, r#"{ "minDepositPeriod": 10, "maxDepositPeriod": 20 }"#).unwrap();
        let config = FeeConfig::load(&path).unwrap();
        fs::remove_file(&path).unwrap();
        assert_eq!(config.min_deposit_period, 10);
        assert_eq!(config.max_deposit_period, 20);
        assert_eq!(config.min_deposit_amount, MIN_DEPOSIT_AMOUNT);
    }

    #[test]
    fn inverted_bounds_are_rejected() {
        let config = FeeConfig {
            min_deposit_period: 5,
            max_deposit_period: 4,
            ..FeeConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvertedBounds { .. })
        ));
    }
}
