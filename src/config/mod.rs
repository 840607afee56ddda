//! Deployment parameters read from a JSON file.

use std::{fs, path::Path};

use serde::{Deserialize, Serialize};

use crate::{
    presale::{PresaleParams, SaleWindow},
    primitives::{serde_amount, Address, Amount, Timestamp},
    token::DEFAULT_CAP,
    vesting::{LockupSchedule, ScheduleError},
};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("malformed config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
    #[error("invalid lock-up schedule: {0}")]
    Schedule(#[from] ScheduleError),
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct GenesisBalance {
    pub account: Address,
    #[serde(with = "serde_amount")]
    pub amount: Amount,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct PresaleConfig {
    pub owner: Address,
    pub wallet: Address,
    pub opening_time: Timestamp,
    pub closing_time: Timestamp,
    #[serde(with = "serde_amount")]
    pub rate: Amount,
    pub lockup_end_times: Vec<Timestamp>,
    #[serde(with = "serde_amount")]
    pub first_vested_lockup_amount: Amount,
    #[serde(with = "serde_amount")]
    pub graded_vested_lockup_amount: Amount,
    /// Minted to the presale at deployment.
    #[serde(with = "serde_amount")]
    pub token_supply: Amount,
    #[serde(
        default,
        with = "serde_amount::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub token_cap: Option<Amount>,
    /// Native-currency balances seeded into the in-memory bank.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub genesis_balances: Vec<GenesisBalance>,
}

impl PresaleConfig {
    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json_str(&text)
    }

    pub fn token_cap(&self) -> Amount {
        self.token_cap.unwrap_or(DEFAULT_CAP)
    }

    pub fn schedule(&self) -> Result<LockupSchedule, ConfigError> {
        Ok(LockupSchedule::new(
            &self.lockup_end_times,
            self.first_vested_lockup_amount,
            self.graded_vested_lockup_amount,
        )?)
    }

    pub fn window(&self) -> Result<SaleWindow, ConfigError> {
        SaleWindow::new(self.opening_time, self.closing_time)
            .map_err(|e| ConfigError::Invalid(e.to_string()))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.owner.is_zero() {
            return Err(ConfigError::Invalid("owner is the null address".into()));
        }
        if self.wallet.is_zero() {
            return Err(ConfigError::Invalid("wallet is the null address".into()));
        }
        if self.rate == 0 {
            return Err(ConfigError::Invalid("rate must be non-zero".into()));
        }
        self.window()?;
        self.schedule()?;
        if self.token_supply > self.token_cap() {
            return Err(ConfigError::Invalid(format!(
                "token_supply {} exceeds cap {}",
                self.token_supply,
                self.token_cap()
            )));
        }
        if let Some(g) = self.genesis_balances.iter().find(|g| g.account.is_zero()) {
            return Err(ConfigError::Invalid(format!(
                "genesis balance of {} assigned to the null address",
                g.amount
            )));
        }
        Ok(())
    }

    /// Ledger parameters for a presale deployed at `address`.
    pub fn params(&self, address: Address) -> Result<PresaleParams, ConfigError> {
        Ok(PresaleParams {
            address,
            owner: self.owner,
            wallet: self.wallet,
            window: self.window()?,
            rate: self.rate,
            schedule: self.schedule()?,
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::primitives::UNIT;

    pub(crate) const SAMPLE: &str = r#"{
        "owner": "0x0000000000000000000000000000000000000001",
        "wallet": "0x0000000000000000000000000000000000000002",
        "opening_time": 1600000000,
        "closing_time": 1600604800,
        "rate": "1000",
        "lockup_end_times": [1601209600, 1601814400, 1602419200, 1603024000, 1603628800, 1604233600],
        "first_vested_lockup_amount": "4000e18",
        "graded_vested_lockup_amount": "2000e18",
        "token_supply": "100000000e18",
        "genesis_balances": [
            { "account": "0x0000000000000000000000000000000000000003", "amount": "100e18" }
        ]
    }"#;

    #[test]
    fn parses_sample_config() {
        let config = PresaleConfig::from_json_str(SAMPLE).unwrap();
        assert_eq!(config.rate, 1_000);
        assert_eq!(config.first_vested_lockup_amount, 4_000 * UNIT);
        assert_eq!(config.token_cap(), DEFAULT_CAP);
        assert_eq!(config.genesis_balances[0].amount, 100 * UNIT);
        assert_eq!(config.schedule().unwrap().stage_ends()[5], 1_604_233_600);
    }

    #[test]
    fn serialization_keeps_amounts_as_strings() {
        let config = PresaleConfig::from_json_str(SAMPLE).unwrap();
        let value = serde_json::to_value(&config).unwrap();
        assert_eq!(value["token_supply"], "100000000000000000000000000");
        assert!(value.get("token_cap").is_none());
        let back: PresaleConfig = serde_json::from_value(value).unwrap();
        assert_eq!(back, config);
    }

    fn tweak(edit: impl FnOnce(&mut serde_json::Value)) -> Result<PresaleConfig, ConfigError> {
        let mut value: serde_json::Value = serde_json::from_str(SAMPLE).unwrap();
        edit(&mut value);
        PresaleConfig::from_json_str(&value.to_string())
    }

    #[test]
    fn rejects_inconsistent_configs() {
        assert!(matches!(
            tweak(|v| v["closing_time"] = 1_500_000_000u64.into()),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            tweak(|v| v["rate"] = "0".into()),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            tweak(|v| v["lockup_end_times"] = serde_json::json!([1, 2, 3])),
            Err(ConfigError::Schedule(ScheduleError::StageCount(3)))
        ));
        assert!(matches!(
            tweak(|v| v["owner"] = "0x0000000000000000000000000000000000000000".into()),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            tweak(|v| v["token_cap"] = "1000".into()),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            tweak(|v| v["rate"] = "twelve".into()),
            Err(ConfigError::Parse(_))
        ));
    }
}
