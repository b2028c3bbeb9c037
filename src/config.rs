//! Configuration loading and validation

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub chain: ChainConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub signers: SignersConfig,
    #[serde(default)]
    pub progress: ProgressConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChainConfig {
    /// WebSocket endpoint; it must allow unsafe RPCs
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    /// Environment variable holding the master mnemonic
    #[serde(default = "default_mnemonic_env")]
    pub mnemonic_env: String,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            mnemonic_env: default_mnemonic_env(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DispatchConfig {
    /// Operations per transaction; above one they are wrapped in a batch call
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Pause after every flush
    #[serde(default = "default_dispatch_delay_ms")]
    pub delay_ms: u64,
    /// Submit the last partial batch when a scan phase ends
    #[serde(default = "default_true")]
    pub flush_remainder: bool,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            delay_ms: default_dispatch_delay_ms(),
            flush_remainder: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SignersConfig {
    /// Number of rotating signers
    #[serde(default = "default_accounts_to_use")]
    pub accounts_to_use: u32,
    /// Balance each signer is topped up to. Should be at least the ED.
    /// KSM ED = 333,333,333; DOT and Westend ED = 10,000,000,000
    #[serde(default = "default_topup_balance")]
    pub topup_balance: u64,
    /// Pause between transfers from the same account
    #[serde(default = "default_topup_delay_ms")]
    pub topup_delay_ms: u64,
    /// Minimum signer balance to dispatch with; the ED when unset
    #[serde(default)]
    pub min_dispatch_balance: Option<u64>,
}

impl Default for SignersConfig {
    fn default() -> Self {
        Self {
            accounts_to_use: default_accounts_to_use(),
            topup_balance: default_topup_balance(),
            topup_delay_ms: default_topup_delay_ms(),
            min_dispatch_balance: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProgressConfig {
    /// Report scan progress every N keys
    #[serde(default = "default_progress_step")]
    pub step: u64,
    /// Report census progress every N accounts
    #[serde(default = "default_census_step")]
    pub census_step: u64,
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            step: default_progress_step(),
            census_step: default_census_step(),
        }
    }
}

fn default_endpoint() -> String {
    "wss://westend-rpc.dwellir.com".to_string()
}

fn default_mnemonic_env() -> String {
    "DOT_BOT_MNEMONIC".to_string()
}

fn default_batch_size() -> usize {
    1
}

fn default_dispatch_delay_ms() -> u64 {
    2_000
}

fn default_true() -> bool {
    true
}

fn default_accounts_to_use() -> u32 {
    6
}

fn default_topup_balance() -> u64 {
    3_333_333_333 // 0.003 KSM
}

fn default_topup_delay_ms() -> u64 {
    12_000
}

fn default_progress_step() -> u64 {
    50
}

fn default_census_step() -> u64 {
    10
}

impl Config {
    /// Load configuration from file and environment variables
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let settings = config::Config::builder()
            // Start with defaults
            .set_default("chain.endpoint", default_endpoint())?
            .set_default("chain.mnemonic_env", default_mnemonic_env())?
            .set_default("dispatch.batch_size", default_batch_size() as i64)?
            .set_default("dispatch.delay_ms", default_dispatch_delay_ms() as i64)?
            // Load from file if exists
            .add_source(config::File::from(path).required(false))
            // Override with environment variables (prefix MIGRATOR_)
            .add_source(
                config::Environment::with_prefix("MIGRATOR")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to build configuration")?;

        let config: Config = settings
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        // Validate configuration
        config.validate()?;

        Ok(config)
    }

    /// Replace the endpoint (command-line override) and re-validate it
    pub fn with_endpoint(mut self, endpoint: Option<String>) -> Result<Self> {
        if let Some(endpoint) = endpoint {
            self.chain.endpoint = endpoint;
            validate_endpoint(&self.chain.endpoint)?;
        }
        Ok(self)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        validate_endpoint(&self.chain.endpoint)?;

        if self.chain.mnemonic_env.is_empty() {
            anyhow::bail!("mnemonic_env must name an environment variable");
        }

        if self.dispatch.batch_size == 0 {
            anyhow::bail!("batch_size must be at least 1");
        }

        if self.signers.accounts_to_use == 0 {
            anyhow::bail!("accounts_to_use must be at least 1");
        }

        if self.signers.topup_balance == 0 {
            anyhow::bail!("topup_balance must be positive");
        }

        if self.signers.topup_delay_ms <= self.dispatch.delay_ms {
            tracing::warn!(
                "topup_delay_ms ({}) is not longer than the dispatch delay ({}); top-ups may race their own nonce",
                self.signers.topup_delay_ms,
                self.dispatch.delay_ms
            );
        }

        if self.dispatch.batch_size > 1 {
            tracing::warn!(
                "batch_size {} wraps operations in Utility.batch, which adds fees",
                self.dispatch.batch_size
            );
        }

        Ok(())
    }

    /// Get configuration for display (no secrets are stored here, only the env name)
    pub fn masked_display(&self) -> String {
        format!(
            r#"Configuration:
  Chain:
    endpoint: {}
    mnemonic_env: {} ({})
  Dispatch:
    batch_size: {}
    delay: {}ms
    flush_remainder: {}
  Signers:
    accounts_to_use: {}
    topup_balance: {}
    topup_delay: {}ms
    min_dispatch_balance: {}
  Progress:
    step: {}
    census_step: {}
"#,
            mask_url(&self.chain.endpoint),
            self.chain.mnemonic_env,
            if std::env::var(&self.chain.mnemonic_env).is_ok() {
                "set"
            } else {
                "not set"
            },
            self.dispatch.batch_size,
            self.dispatch.delay_ms,
            self.dispatch.flush_remainder,
            self.signers.accounts_to_use,
            self.signers.topup_balance,
            self.signers.topup_delay_ms,
            self.signers
                .min_dispatch_balance
                .map(|b| b.to_string())
                .unwrap_or_else(|| "existential deposit".to_string()),
            self.progress.step,
            self.progress.census_step,
        )
    }
}

fn validate_endpoint(endpoint: &str) -> Result<()> {
    let url = url::Url::parse(endpoint)
        .with_context(|| format!("Invalid endpoint URL: {}", endpoint))?;
    match url.scheme() {
        "ws" | "wss" => Ok(()),
        other => anyhow::bail!(
            "Endpoint {} uses scheme '{}', expected ws or wss",
            endpoint,
            other
        ),
    }
}

/// Mask URL for display (hide API keys in query params)
fn mask_url(url: &str) -> String {
    if let Some(idx) = url.find('?') {
        format!("{}?***", &url[..idx])
    } else {
        url.to_string()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            chain: ChainConfig::default(),
            dispatch: DispatchConfig::default(),
            signers: SignersConfig::default(),
            progress: ProgressConfig::default(),
        }
    }
}
