//! Configuration management for the batch-call client
//!
//! Loads configuration from TOML files with environment variable substitution.

use crate::batch::BatchRequest;
use crate::protocol::{Atomicity, BatchId, Call, ChainId};

use anyhow::{Context, Result};
use ethers::types::{Address, Bytes, U256};
use lazy_static::lazy_static;
use regex::Regex;
use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};

lazy_static! {
    static ref ENV_VAR: Regex = Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}").unwrap();
}

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub client: ClientConfig,
    pub wallet: WalletConfig,
    pub session: SessionConfig,
    pub metrics: MetricsConfig,
    /// Batch to submit on startup
    pub batch: Option<BatchConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    pub poll_interval_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WalletConfig {
    pub rpc_urls: Vec<String>,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    pub account: Address,
    pub chain_id: ChainId,
    #[serde(default = "default_chains")]
    pub chains: Vec<ChainId>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BatchConfig {
    /// Defaults to the session's chain
    pub chain_id: Option<ChainId>,
    pub atomicity: Atomicity,
    /// Generated when absent
    pub correlation_id: Option<String>,
    pub calls: Vec<CallConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CallConfig {
    pub to: Address,
    #[serde(default)]
    pub data: Bytes,
    pub value: Option<U256>,
}

fn default_request_timeout() -> u64 {
    30
}

// Mainnet, Base, Celo, Optimism, Arbitrum One, Polygon
fn default_chains() -> Vec<ChainId> {
    vec![1, 8453, 42220, 10, 42161, 137]
}

impl Settings {
    /// Load settings from the file named by `BATCHCALL_CONFIG`
    pub fn load() -> Result<Self> {
        let config_path = env::var("BATCHCALL_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config/default.toml"));

        Self::from_file(&config_path)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let config_str = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        Self::from_toml(&config_str)
    }

    fn from_toml(raw: &str) -> Result<Self> {
        // Substitute environment variables
        let config_str = substitute_env_vars(raw);

        let settings: Settings =
            toml::from_str(&config_str).with_context(|| "Failed to parse configuration")?;

        settings.validate()?;

        Ok(settings)
    }

    /// Validate configuration
    fn validate(&self) -> Result<()> {
        if self.wallet.rpc_urls.is_empty() {
            anyhow::bail!("At least one wallet RPC URL must be configured");
        }

        if self.client.poll_interval_ms == 0 {
            anyhow::bail!("client.poll_interval_ms must be positive");
        }

        if !self.session.chains.contains(&self.session.chain_id) {
            anyhow::bail!(
                "Session chain {} is not among the available chains {:?}",
                self.session.chain_id,
                self.session.chains
            );
        }

        if let Some(batch) = &self.batch {
            if batch.calls.is_empty() {
                anyhow::bail!("Configured batch has no calls");
            }
            let chain_id = batch.chain_id.unwrap_or(self.session.chain_id);
            if !self.session.chains.contains(&chain_id) {
                anyhow::bail!("Batch chain {} is not available", chain_id);
            }
        }

        Ok(())
    }

    /// Configured startup batch for the session account
    pub fn batch_request(&self) -> Option<BatchRequest> {
        let batch = self.batch.as_ref()?;
        let calls = batch.calls.iter().map(|c| {
            let call = Call::new(c.to, c.data.clone());
            match c.value {
                Some(value) => call.with_value(value),
                None => call,
            }
        });
        let correlation_id = batch
            .correlation_id
            .clone()
            .map(BatchId::from)
            .unwrap_or_else(BatchId::random);

        Some(
            BatchRequest::new(
                self.session.account,
                batch.chain_id.unwrap_or(self.session.chain_id),
                batch.atomicity,
            )
            .calls(calls)
            .correlation_id(correlation_id),
        )
    }
}

/// Substitute environment variables in the format ${VAR_NAME}
fn substitute_env_vars(input: &str) -> String {
    ENV_VAR
        .replace_all(input, |caps: &regex::Captures| {
            env::var(&caps[1]).unwrap_or_default()
        })
        .into_owned()
}
