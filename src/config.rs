// ⚙️ Pipeline Configuration
// One immutable value, built once and passed by reference into every component

use crate::error::EtlError;
use crate::rules::{default_rules, CategoryRule, Categorizer};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

/// What to do with phone numbers found in the counterparty and message body
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PhonePolicy {
    /// Rewrite to `+<country><subscriber>`
    #[default]
    Normalize,
    /// Canonicalize, then mask every digit except the last three
    Redact,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub database_path: PathBuf,
    pub log_dir: PathBuf,
    pub dead_letter_dir: PathBuf,

    /// Records per storage transaction
    pub batch_size: usize,

    /// Element names treated as one message entry
    pub entry_tags: Vec<String>,

    /// chrono format strings, tried in order after RFC 3339
    pub timestamp_formats: Vec<String>,

    /// Accept 10-digit epoch seconds and 13-digit epoch milliseconds
    pub accept_epoch_timestamps: bool,

    /// Currency tags recognized around amounts
    pub currency_codes: Vec<String>,

    /// Country calling code applied to local numbers, digits only
    pub default_country_code: String,

    pub phone_policy: PhonePolicy,

    /// Ordered classification rules (first match wins)
    pub rules: Vec<CategoryRule>,

    /// JSON rules file; replaces `rules` when set
    pub rules_file: Option<PathBuf>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            database_path: PathBuf::from("data/db.sqlite3"),
            log_dir: PathBuf::from("data/logs"),
            dead_letter_dir: PathBuf::from("data/logs/dead_letter"),
            batch_size: 100,
            entry_tags: vec!["sms".into(), "message".into(), "transaction".into()],
            timestamp_formats: vec![
                "%Y-%m-%d %H:%M:%S%.f".into(),
                "%Y-%m-%dT%H:%M:%S%.f".into(),
                "%Y-%m-%d %H:%M:%S %z".into(),
                "%d %b %Y %I:%M:%S %p".into(),
                "%d/%m/%Y %H:%M:%S".into(),
                "%d/%m/%Y %H:%M".into(),
                "%Y-%m-%d".into(),
            ],
            accept_epoch_timestamps: true,
            currency_codes: vec!["RWF".into(), "FRW".into(), "USD".into(), "EUR".into()],
            default_country_code: "250".into(),
            phone_policy: PhonePolicy::Normalize,
            rules: default_rules(),
            rules_file: None,
        }
    }
}

impl PipelineConfig {
    /// Load from an optional TOML file, then apply environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let content = fs::read_to_string(path)
                    .with_context(|| format!("Failed to read config file: {}", path.display()))?;
                toml::from_str(&content)
                    .with_context(|| format!("Failed to parse config file: {}", path.display()))?
            }
            None => PipelineConfig::default(),
        };

        config.apply_env_overrides()?;

        if let Some(rules_file) = config.rules_file.clone() {
            config.rules = Categorizer::read_rules_file(&rules_file)?;
        }

        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(path) = env::var("DATABASE_PATH") {
            self.database_path = PathBuf::from(path);
        }
        if let Ok(dir) = env::var("DEAD_LETTER_DIR") {
            self.dead_letter_dir = PathBuf::from(dir);
        }
        if let Ok(dir) = env::var("LOG_DIR") {
            self.log_dir = PathBuf::from(dir);
        }
        if let Ok(size) = env::var("BATCH_SIZE") {
            self.batch_size = size
                .parse()
                .with_context(|| format!("BATCH_SIZE must be a positive integer, got {:?}", size))?;
        }
        Ok(())
    }

    pub fn validate(&self) -> std::result::Result<(), EtlError> {
        if self.batch_size == 0 {
            return Err(EtlError::Config("batch_size must be greater than zero".into()));
        }
        if self.entry_tags.is_empty() {
            return Err(EtlError::Config("at least one entry tag is required".into()));
        }
        if self.timestamp_formats.iter().all(|f| f.trim().is_empty()) {
            return Err(EtlError::Config("at least one timestamp format is required".into()));
        }
        if self.default_country_code.is_empty()
            || !self.default_country_code.chars().all(|c| c.is_ascii_digit())
        {
            return Err(EtlError::Config(format!(
                "default_country_code must be digits only, got {:?}",
                self.default_country_code
            )));
        }
        Categorizer::validate_rules(&self.rules)?;
        Ok(())
    }

    /// Path of the append-only dead-letter log
    pub fn dead_letter_path(&self) -> PathBuf {
        self.dead_letter_dir.join("dead_letter.jsonl")
    }
}
