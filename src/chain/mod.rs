//! Chain module - multi-chain provider access
//!
//! This module provides:
//! - Multi-RPC provider management with automatic failover
//! - The network guard that gates submissions on the connected chain
//! - Receipt watching with manual poll fallback

pub mod network;
pub mod provider;
pub mod receipt;

pub use network::{NetworkGuard, RpcWalletSession, WalletSession};
pub use provider::{ChainProvider, GasPrice};
pub use receipt::{ReceiptSource, ReceiptWaiter, ReceiptWatcher};

use crate::config::Settings;
use crate::error::{FlowError, FlowResult};

use dashmap::DashMap;
use std::sync::Arc;
use tracing::info;

/// Manages connections to all configured chains
pub struct ChainManager {
    /// Chain providers indexed by chain ID
    providers: DashMap<u64, Arc<ChainProvider>>,
}

impl ChainManager {
    /// Create a new chain manager with all enabled chains
    pub async fn new(settings: &Settings) -> FlowResult<Self> {
        let providers = DashMap::new();

        for (name, chain_config) in settings.enabled_chains() {
            info!(
                "Initializing chain {} (ID: {})",
                chain_config.name, chain_config.chain_id
            );

            let provider = ChainProvider::new(chain_config.clone()).await?;
            providers.insert(chain_config.chain_id, Arc::new(provider));

            info!("Chain {} initialized successfully", name);
        }

        Ok(Self { providers })
    }

    /// Get provider for a specific chain
    pub fn get_provider(&self, chain_id: u64) -> FlowResult<Arc<ChainProvider>> {
        self.providers
            .get(&chain_id)
            .map(|p| p.clone())
            .ok_or(FlowError::ChainNotFound { chain_id })
    }

    /// Health check for all chains
    pub async fn health_check(&self) -> Vec<(u64, bool)> {
        let mut results = Vec::new();

        for entry in self.providers.iter() {
            let chain_id = *entry.key();
            let provider = entry.value();
            let healthy = provider.health_check().await;
            results.push((chain_id, healthy));

            crate::metrics::record_chain_health(chain_id, healthy);
        }

        results
    }

    /// Get all connected chain IDs
    pub fn connected_chains(&self) -> Vec<u64> {
        self.providers.iter().map(|e| *e.key()).collect()
    }
}
