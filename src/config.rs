//! Configuration management for the stableflow daemon
//!
//! Loads configuration from TOML files with environment variable substitution.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::env;
use std::path::PathBuf;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub daemon: DaemonConfig,
    pub database: DatabaseConfig,
    pub api: ApiConfig,
    pub metrics: MetricsConfig,
    pub backend: BackendConfig,
    pub quotes: QuotesConfig,
    pub chains: HashMap<String, ChainConfig>,
    pub actions: Vec<ActionConfig>,
    pub wallet: WalletConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DaemonConfig {
    pub instance_id: String,
    /// Receipt poll cadence when the watcher falls back to manual polling
    pub receipt_poll_interval_ms: u64,
    /// How long the primary receipt watcher may run before the manual fallback kicks in
    pub receipt_watch_timeout_secs: u64,
    /// Delay after a chain switch before re-checking the network
    pub switch_settle_delay_ms: u64,
    /// Conservative gas limit used when estimation fails
    pub fallback_gas_limit: u64,
    pub health_check_interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub port: u16,
}

/// Internal actions backend (REST)
#[derive(Debug, Clone, Deserialize)]
pub struct BackendConfig {
    pub base_url: String,
    pub request_timeout_secs: u64,
    /// Fail-open completion policy: a 404 on action lookup still completes
    /// the workflow. Kept configurable so tests can assert both behaviors.
    pub degrade_to_success_on_not_found: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QuotesConfig {
    pub coingecko_url: String,
    pub moralis_url: Option<String>,
    pub moralis_api_key_env: Option<String>,
    pub cache_ttl_secs: u64,
    /// Last-resort USD rates per token symbol when every live source fails
    pub fallback_rates_usd: HashMap<String, f64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChainConfig {
    pub chain_id: u64,
    pub name: String,
    pub rpc_urls: Vec<String>,
    pub confirmation_blocks: u64,
    pub gas_price_strategy: GasPriceStrategy,
    pub max_gas_price_gwei: u64,
    pub enabled: bool,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum GasPriceStrategy {
    Legacy,
    Eip1559,
}

/// One configured acquisition action (swap or registration) on a chain
#[derive(Debug, Clone, Deserialize)]
pub struct ActionConfig {
    /// Action title as seeded in the backend
    pub title: String,
    /// Key into the `chains` table
    pub chain: String,
    pub kind: ActionKind,
    /// Token being spent (approve-then-swap flows)
    pub token_in: Option<String>,
    /// Token being acquired
    pub token_out: Option<String>,
    /// Router/broker that must be approved to spend `token_in`
    pub spender: Option<String>,
    /// Registry contract for registration flows
    pub registry: Option<String>,
    /// Slippage tolerance in basis points (10, 50, 100, 200)
    pub slippage_bps: Option<u32>,
}

#[derive(Debug, Clone, Copy, Deserialize, serde::Serialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum ActionKind {
    ApproveThenSwap,
    DirectSwap,
    RegisterThenComplete,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WalletConfig {
    pub private_key_env: Option<String>,
}

impl Settings {
    /// Load settings from configuration files
    pub fn load() -> Result<Self> {
        let config_path = env::var("STABLEFLOW_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config/default.toml"));

        let config_str = std::fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {:?}", config_path))?;

        // Substitute environment variables
        let config_str = substitute_env_vars(&config_str);

        let settings: Settings =
            toml::from_str(&config_str).with_context(|| "Failed to parse configuration")?;

        settings.validate()?;

        Ok(settings)
    }

    /// Validate configuration
    fn validate(&self) -> Result<()> {
        if self.enabled_chains().is_empty() {
            anyhow::bail!("At least one chain must be enabled");
        }

        for (name, chain) in &self.chains {
            if chain.enabled && chain.rpc_urls.is_empty() {
                anyhow::bail!("Chain {} has no RPC URLs configured", name);
            }
        }

        for action in &self.actions {
            let chain = self
                .chains
                .get(&action.chain)
                .with_context(|| format!("Action {} references unknown chain {}", action.title, action.chain))?;
            if !chain.enabled {
                tracing::warn!("Action {} targets disabled chain {}", action.title, action.chain);
            }
            match action.kind {
                ActionKind::ApproveThenSwap => {
                    if action.token_in.is_none() || action.spender.is_none() {
                        anyhow::bail!(
                            "Action {} is approve-then-swap but lacks token_in/spender",
                            action.title
                        );
                    }
                }
                ActionKind::RegisterThenComplete => {
                    if action.registry.is_none() {
                        anyhow::bail!("Action {} is a registration but lacks a registry", action.title);
                    }
                }
                ActionKind::DirectSwap => {}
            }
            if let Some(bps) = action.slippage_bps {
                if bps > 10_000 {
                    anyhow::bail!("Action {} slippage {} bps exceeds 100%", action.title, bps);
                }
            }
        }

        Ok(())
    }

    /// Get list of enabled chains
    pub fn enabled_chains(&self) -> Vec<(&String, &ChainConfig)> {
        self.chains.iter().filter(|(_, c)| c.enabled).collect()
    }

    /// Get chain config by chain ID
    pub fn get_chain_by_id(&self, chain_id: u64) -> Option<&ChainConfig> {
        self.chains.values().find(|c| c.chain_id == chain_id)
    }

    /// Get an action by its backend title
    pub fn get_action(&self, title: &str) -> Option<&ActionConfig> {
        self.actions.iter().find(|a| a.title == title)
    }
}

/// Substitute environment variables in the format ${VAR_NAME}
fn substitute_env_vars(input: &str) -> String {
    let mut result = input.to_string();
    let re = regex::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}").unwrap();

    for cap in re.captures_iter(input) {
        let var_name = &cap[1];
        let var_value = env::var(var_name).unwrap_or_default();
        result = result.replace(&cap[0], &var_value);
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_var_substitution() {
        env::set_var("TEST_VAR", "test_value");
        let input = "url = \"https://api.example.com/${TEST_VAR}/endpoint\"";
        let result = substitute_env_vars(input);
        assert_eq!(result, "url = \"https://api.example.com/test_value/endpoint\"");
    }

    #[test]
    fn action_kind_parses_kebab_case() {
        let kind: ActionKind = toml::from_str::<HashMap<String, ActionKind>>(
            "kind = \"approve-then-swap\"",
        )
        .unwrap()["kind"];
        assert_eq!(kind, ActionKind::ApproveThenSwap);
    }
}
