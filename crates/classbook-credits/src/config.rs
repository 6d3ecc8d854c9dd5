use crate::domain::types::AdminPolicy;
use crate::error::{CreditsError, Result};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_CONFIG_FILE: &str = "classbook-credits.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreditsConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub ledger: LedgerConfig,
    #[serde(default)]
    pub sweep: SweepConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite connection url, e.g. `sqlite://classbook-credits.db`
    pub url: String,
    pub max_connections: u32,
    pub busy_timeout_seconds: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://classbook-credits.db".to_string(),
            max_connections: 8,
            busy_timeout_seconds: 5,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LedgerConfig {
    pub admin_policy: AdminPolicy,
    /// Offset of the studio's local time from UTC, used to decide what "today" is
    pub utc_offset_minutes: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepConfig {
    pub enabled: bool,
    pub interval_seconds: u64,
    pub batch_size: i64,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_seconds: 3600,
            batch_size: 500,
        }
    }
}

impl SweepConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds)
    }
}

impl CreditsConfig {
    /// Defaults, then the TOML file, then `CLASSBOOK_` environment variables
    /// (nested keys separated by `__`, e.g. `CLASSBOOK_LEDGER__ADMIN_POLICY`).
    pub fn load(path_override: Option<PathBuf>) -> Result<Self> {
        let mut figment = Figment::from(Serialized::defaults(CreditsConfig::default()));

        if let Some(path) = path_override {
            if !path.exists() {
                return Err(CreditsError::Config {
                    message: format!("config file {} does not exist", path.display()),
                });
            }
            figment = figment.merge(Toml::file(&path));
        } else {
            let default_path = PathBuf::from(DEFAULT_CONFIG_FILE);
            if default_path.exists() {
                figment = figment.merge(Toml::file(default_path));
            }
        }

        figment = figment.merge(Env::prefixed("CLASSBOOK_").split("__"));

        let config: CreditsConfig = figment.extract().map_err(|e| CreditsError::Config {
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.database.url.trim().is_empty() {
            return Err(CreditsError::Config {
                message: "database.url must not be empty".to_string(),
            });
        }
        if self.database.max_connections == 0 {
            return Err(CreditsError::Config {
                message: "database.max_connections must be at least 1".to_string(),
            });
        }
        if self.ledger.utc_offset_minutes.abs() >= 24 * 60 {
            return Err(CreditsError::Config {
                message: format!(
                    "ledger.utc_offset_minutes must be within ±1439, got {}",
                    self.ledger.utc_offset_minutes
                ),
            });
        }
        if self.sweep.interval_seconds == 0 || self.sweep.batch_size <= 0 {
            return Err(CreditsError::Config {
                message: "sweep.interval_seconds and sweep.batch_size must be positive"
                    .to_string(),
            });
        }
        Ok(())
    }
}
