use anyhow::{Context, Result};
use keyring::Entry;
use std::path::PathBuf;
use std::time::Duration;

use crate::upload::RetryPolicy;

const KEYRING_SERVICE_PREFIX: &str = "leftoverai_api_key";

const DEFAULT_API_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const DEFAULT_MODEL: &str = "gemini-1.5-flash";
const DEFAULT_API_KEY_REF: &str = "env:GOOGLE_API_KEY";
const DEFAULT_DB_PATH: &str = "leftoverai.sqlite";

/// Which generative model to talk to and where its key lives.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ModelConfig {
    pub name: String,
    pub api_url: String,
    pub model: String,
    // 'keyring', 'env:MY_API_KEY', or None
    pub api_key_ref: Option<String>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            name: "Gemini".to_string(),
            api_url: DEFAULT_API_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            api_key_ref: Some(DEFAULT_API_KEY_REF.to_string()),
        }
    }
}

/// Everything `run` needs to wire the application together.
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub model: ModelConfig,
    pub db_path: PathBuf,
    pub retry: RetryPolicy,
}

impl AppConfig {
    /// Reads `LEFTOVERAI_*` variables, falling back to defaults for anything unset.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = ModelConfig::default();
        let model = ModelConfig {
            name: defaults.name,
            api_url: lookup("LEFTOVERAI_API_URL").unwrap_or(defaults.api_url),
            model: lookup("LEFTOVERAI_MODEL").unwrap_or(defaults.model),
            api_key_ref: lookup("LEFTOVERAI_API_KEY_REF").or(defaults.api_key_ref),
        };

        let mut retry = RetryPolicy::default();
        if let Some(secs) = lookup("LEFTOVERAI_ATTEMPT_TIMEOUT_SECS") {
            let secs: u64 = secs
                .parse()
                .context(format!("Invalid LEFTOVERAI_ATTEMPT_TIMEOUT_SECS '{}'", secs))?;
            retry.attempt_timeout = Duration::from_secs(secs);
        }
        if let Some(ms) = lookup("LEFTOVERAI_RETRY_DELAY_MS") {
            let ms: u64 = ms
                .parse()
                .context(format!("Invalid LEFTOVERAI_RETRY_DELAY_MS '{}'", ms))?;
            retry.retry_delay = Duration::from_millis(ms);
        }

        let db_path = lookup("LEFTOVERAI_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DB_PATH));

        Ok(Self {
            model,
            db_path,
            retry,
        })
    }
}

/// Retrieves the API key for a given model configuration.
/// It checks the `api_key_ref` field to determine whether to read from
/// environment variables or the OS keyring.
pub fn get_api_key(config: &ModelConfig) -> Result<String> {
    match config.api_key_ref.as_deref() {
        Some(ref_str) if ref_str.starts_with("env:") => {
            let env_var_name = ref_str.trim_start_matches("env:");
            log::debug!("Retrieving API key from environment variable: {}", env_var_name);
            std::env::var(env_var_name).context(format!(
                "Failed to get API key from environment variable '{}'",
                env_var_name
            ))
        }
        Some("keyring") => {
            let entry = keyring_entry(config)?;
            log::debug!("Retrieving API key from keyring for model: {}", config.name);
            entry.get_password().context(format!(
                "Failed to get API key from keyring for '{}'. Store it first.",
                config.name
            ))
        }
        Some(other) => Err(anyhow::anyhow!("Unsupported api_key_ref format: {}", other)),
        None => Err(anyhow::anyhow!(
            "API key reference not set for model config '{}'",
            config.name
        )),
    }
}

/// Stores an API key in the OS keyring for the given model configuration.
pub fn set_api_key_in_keyring(config: &ModelConfig, api_key: &str) -> Result<()> {
    let entry = keyring_entry(config)?;
    log::info!("Setting API key in keyring for model: {}", config.name);
    entry.set_password(api_key).context(format!(
        "Failed to set API key in keyring for '{}'",
        config.name
    ))
}

fn keyring_entry(config: &ModelConfig) -> Result<Entry> {
    let service_name = format!("{}-{}", KEYRING_SERVICE_PREFIX, config.model);
    Entry::new(&service_name, &config.name).context("Failed to create keyring entry")
}
