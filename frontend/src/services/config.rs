//! # Client Configuration
//!
//! Settings for the clinic desk client, read from a single YAML file with a
//! handful of environment overrides on top.
//!
//! ## YAML Format
//!
//! ```yaml
//! api_base_url: "https://clinic.example.com/api"
//! request_timeout_secs: 20
//! api_token: null
//! attendance_poll_secs: 30
//! approval_poll_secs: 15
//! currency_symbol: "₹"
//! max_payment_amount: 1000000
//! require_rejection_reason: false
//! log_level: "info"
//! session:
//!   employee_id: 12
//!   branch_id: 3
//!   role: reception
//! ```
//!
//! ## Environment overrides
//!
//! - `CLINIC_API_URL` replaces `api_base_url`
//! - `CLINIC_API_TOKEN` replaces `api_token`
//! - `CLINIC_LOG` replaces `log_level`

use crate::domain::money::MoneyRules;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use shared::Session;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

pub const DEFAULT_CONFIG_FILE: &str = "clinic-desk.yaml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub api_base_url: String,
    pub request_timeout_secs: u64,
    pub api_token: Option<String>,
    pub attendance_poll_secs: u64,
    pub approval_poll_secs: u64,
    pub currency_symbol: String,
    #[serde(with = "rust_decimal::serde::float")]
    pub max_payment_amount: Decimal,
    pub max_remarks_length: usize,
    /// Whether an admin must give a reason when rejecting a pending session
    pub require_rejection_reason: bool,
    pub log_level: String,
    /// Operator identity used when the command line does not give one
    pub session: Option<Session>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        let rules = MoneyRules::default();
        Self {
            api_base_url: "http://localhost:8000/api".to_string(),
            request_timeout_secs: 20,
            api_token: None,
            attendance_poll_secs: 30,
            approval_poll_secs: 15,
            currency_symbol: rules.currency_symbol,
            max_payment_amount: rules.max_amount,
            max_remarks_length: rules.max_remarks_length,
            require_rejection_reason: false,
            log_level: "info".to_string(),
            session: None,
        }
    }
}

impl ClientConfig {
    /// Load from `path` if it exists, otherwise start from defaults. Either
    /// way the environment overrides apply.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = path
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));

        let mut config = if path.exists() {
            let yaml = fs::read_to_string(&path).map_err(|source| ConfigError::Read {
                path: path.clone(),
                source,
            })?;
            let config: ClientConfig = serde_yaml::from_str(&yaml).map_err(|source| ConfigError::Parse {
                path: path.clone(),
                source,
            })?;
            debug!(component = "config", path = %path.display(), "Loaded client config");
            config
        } else {
            info!(component = "config", path = %path.display(), "No config file, using defaults");
            ClientConfig::default()
        };

        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Apply environment-style overrides from `lookup`.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("CLINIC_API_URL").filter(|v| !v.trim().is_empty()) {
            self.api_base_url = url;
        }
        if let Some(token) = lookup("CLINIC_API_TOKEN").filter(|v| !v.trim().is_empty()) {
            self.api_token = Some(token);
        }
        if let Some(level) = lookup("CLINIC_LOG").filter(|v| !v.trim().is_empty()) {
            self.log_level = level;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let url = self.api_base_url.trim();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(ConfigError::Invalid(format!(
                "api_base_url must start with http:// or https://, got '{}'",
                self.api_base_url
            )));
        }
        if self.request_timeout_secs == 0 {
            return Err(ConfigError::Invalid("request_timeout_secs must be greater than 0".to_string()));
        }
        if self.attendance_poll_secs == 0 || self.approval_poll_secs == 0 {
            return Err(ConfigError::Invalid("poll intervals must be greater than 0".to_string()));
        }
        if self.max_payment_amount <= Decimal::ZERO {
            return Err(ConfigError::Invalid("max_payment_amount must be positive".to_string()));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn attendance_poll_interval(&self) -> Duration {
        Duration::from_secs(self.attendance_poll_secs)
    }

    pub fn approval_poll_interval(&self) -> Duration {
        Duration::from_secs(self.approval_poll_secs)
    }

    pub fn money_rules(&self) -> MoneyRules {
        MoneyRules {
            currency_symbol: self.currency_symbol.clone(),
            max_amount: self.max_payment_amount,
            max_remarks_length: self.max_remarks_length,
        }
    }
}
