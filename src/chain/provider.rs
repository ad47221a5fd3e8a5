//! Chain provider with multi-RPC support and automatic failover

use crate::config::{ChainConfig, GasPriceStrategy};
use crate::error::{FlowError, FlowResult};

use ethers::prelude::*;
use ethers::providers::{Http, Provider};
use ethers::types::transaction::eip2718::TypedTransaction;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, error, warn};

/// Multi-provider wrapper with automatic failover
pub struct ChainProvider {
    /// Chain configuration
    config: ChainConfig,
    /// HTTP providers (multiple for failover)
    http_providers: Vec<Provider<Http>>,
    /// Current active provider index
    current_provider: AtomicUsize,
    /// Last known block number
    last_block: RwLock<u64>,
}

impl ChainProvider {
    /// Create a new chain provider
    pub async fn new(config: ChainConfig) -> FlowResult<Self> {
        let mut http_providers = Vec::new();

        for url in &config.rpc_urls {
            match Provider::<Http>::try_from(url.as_str()) {
                Ok(provider) => {
                    let provider = provider.interval(Duration::from_millis(100));
                    http_providers.push(provider);
                    debug!("Added HTTP provider for chain {}: {}", config.chain_id, url);
                }
                Err(e) => {
                    warn!("Failed to create provider for {}: {}", url, e);
                }
            }
        }

        if http_providers.is_empty() {
            return Err(FlowError::ChainConnection {
                chain_id: config.chain_id,
                message: "No valid RPC providers".to_string(),
            });
        }

        let initial_block = http_providers[0]
            .get_block_number()
            .await
            .map(|b| b.as_u64())
            .unwrap_or(0);

        Ok(Self {
            config,
            http_providers,
            current_provider: AtomicUsize::new(0),
            last_block: RwLock::new(initial_block),
        })
    }

    /// Get the active HTTP provider
    pub fn http(&self) -> &Provider<Http> {
        let idx = self.current_provider.load(Ordering::Relaxed);
        &self.http_providers[idx % self.http_providers.len()]
    }

    /// Switch to next available provider
    pub fn failover(&self) {
        let current = self.current_provider.load(Ordering::Relaxed);
        let next = (current + 1) % self.http_providers.len();
        self.current_provider.store(next, Ordering::Relaxed);
        warn!("Chain {} failover to provider {}", self.config.chain_id, next);
    }

    /// Get the chain ID reported by the RPC endpoint (not the configured one)
    pub async fn get_chain_id(&self) -> FlowResult<u64> {
        for _ in 0..self.http_providers.len() {
            match self.http().get_chainid().await {
                Ok(id) => return Ok(id.as_u64()),
                Err(e) => {
                    warn!(
                        "Failed to get chain id from chain {}: {}",
                        self.config.chain_id, e
                    );
                    self.failover();
                }
            }
        }

        Err(FlowError::ChainConnection {
            chain_id: self.config.chain_id,
            message: "All providers failed".to_string(),
        })
    }

    /// Get current block number with failover
    pub async fn get_block_number(&self) -> FlowResult<u64> {
        for _ in 0..self.http_providers.len() {
            match self.http().get_block_number().await {
                Ok(block) => {
                    let block_num = block.as_u64();
                    *self.last_block.write().await = block_num;
                    return Ok(block_num);
                }
                Err(e) => {
                    warn!(
                        "Failed to get block number from chain {}: {}",
                        self.config.chain_id, e
                    );
                    self.failover();
                }
            }
        }

        Err(FlowError::ChainConnection {
            chain_id: self.config.chain_id,
            message: "All providers failed".to_string(),
        })
    }

    /// Perform a read-only contract call with failover
    pub async fn call(&self, tx: &TypedTransaction) -> FlowResult<Bytes> {
        for _ in 0..self.http_providers.len() {
            match self.http().call(tx, None).await {
                Ok(bytes) => return Ok(bytes),
                Err(e) => {
                    warn!("eth_call failed on chain {}: {}", self.config.chain_id, e);
                    self.failover();
                }
            }
        }

        Err(FlowError::ChainConnection {
            chain_id: self.config.chain_id,
            message: "All providers failed eth_call".to_string(),
        })
    }

    /// Get transaction receipt with failover
    pub async fn get_transaction_receipt(
        &self,
        tx_hash: H256,
    ) -> FlowResult<Option<TransactionReceipt>> {
        for _ in 0..self.http_providers.len() {
            match self.http().get_transaction_receipt(tx_hash).await {
                Ok(receipt) => return Ok(receipt),
                Err(e) => {
                    warn!(
                        "Receipt read failed on chain {}: {}",
                        self.config.chain_id, e
                    );
                    self.failover();
                }
            }
        }

        Err(FlowError::ChainConnection {
            chain_id: self.config.chain_id,
            message: "All providers failed".to_string(),
        })
    }

    /// Estimate gas for a transaction
    pub async fn estimate_gas(&self, tx: &TypedTransaction) -> FlowResult<U256> {
        self.http()
            .estimate_gas(tx, None)
            .await
            .map_err(|e| FlowError::GasEstimation(e.to_string()))
    }

    /// Get pending nonce for an address with failover
    pub async fn get_nonce(&self, address: Address) -> FlowResult<u64> {
        for _ in 0..self.http_providers.len() {
            match self.http().get_transaction_count(address, None).await {
                Ok(n) => return Ok(n.as_u64()),
                Err(e) => {
                    warn!("Nonce read failed on chain {}: {}", self.config.chain_id, e);
                    self.failover();
                }
            }
        }

        Err(FlowError::ChainConnection {
            chain_id: self.config.chain_id,
            message: "All providers failed".to_string(),
        })
    }

    /// Broadcast a signed transaction.
    ///
    /// No failover here: retrying the send on another provider could
    /// broadcast the payload twice.
    pub async fn send_raw_transaction(&self, raw: Bytes) -> FlowResult<H256> {
        match self.http().send_raw_transaction(raw).await {
            Ok(pending) => Ok(pending.tx_hash()),
            Err(e) => Err(FlowError::Transaction(e.to_string())),
        }
    }

    /// Get current gas price based on chain strategy
    pub async fn get_gas_price(&self) -> FlowResult<GasPrice> {
        match self.config.gas_price_strategy {
            GasPriceStrategy::Legacy => {
                let price = self
                    .http()
                    .get_gas_price()
                    .await
                    .map_err(|e| FlowError::GasEstimation(e.to_string()))?;
                Ok(GasPrice::Legacy(price))
            }
            GasPriceStrategy::Eip1559 => {
                let (max_fee, priority_fee) = self.estimate_eip1559_fees().await?;
                Ok(GasPrice::Eip1559 {
                    max_fee_per_gas: max_fee,
                    max_priority_fee_per_gas: priority_fee,
                })
            }
        }
    }

    /// Estimate EIP-1559 fees
    async fn estimate_eip1559_fees(&self) -> FlowResult<(U256, U256)> {
        let block = self
            .http()
            .get_block(BlockNumber::Latest)
            .await
            .map_err(|e| FlowError::GasEstimation(e.to_string()))?
            .ok_or_else(|| FlowError::GasEstimation("No latest block".to_string()))?;

        let base_fee = block
            .base_fee_per_gas
            .ok_or_else(|| FlowError::GasEstimation("No base fee in block".to_string()))?;

        let priority_fee = U256::from(2_000_000_000u64); // 2 gwei default

        // Max fee = 2 * base_fee + priority_fee (buffer for block variability)
        let max_fee = base_fee * 2 + priority_fee;

        // Cap at configured max
        let max_gwei = U256::from(self.config.max_gas_price_gwei) * U256::from(1_000_000_000u64);
        let max_fee = std::cmp::min(max_fee, max_gwei);

        Ok((max_fee, priority_fee))
    }

    /// Health check
    pub async fn health_check(&self) -> bool {
        match self.get_block_number().await {
            Ok(_) => true,
            Err(e) => {
                error!("Health check failed for chain {}: {}", self.config.chain_id, e);
                false
            }
        }
    }

    /// Configured chain ID
    pub fn chain_id(&self) -> u64 {
        self.config.chain_id
    }

    /// Chain display name
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Confirmations required before a receipt counts as success
    pub fn confirmation_blocks(&self) -> u64 {
        self.config.confirmation_blocks
    }
}

/// Gas price types
#[derive(Debug, Clone)]
pub enum GasPrice {
    Legacy(U256),
    Eip1559 {
        max_fee_per_gas: U256,
        max_priority_fee_per_gas: U256,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dead_chain() -> ChainConfig {
        ChainConfig {
            chain_id: 42220,
            name: "Celo".into(),
            // nothing listens on these ports; every call fails immediately
            rpc_urls: vec!["http://127.0.0.1:1".into(), "http://127.0.0.1:2".into()],
            confirmation_blocks: 1,
            gas_price_strategy: GasPriceStrategy::Eip1559,
            max_gas_price_gwei: 100,
            enabled: true,
        }
    }

    #[tokio::test]
    async fn receipt_and_nonce_reads_exhaust_every_provider() {
        let provider = ChainProvider::new(dead_chain()).await.unwrap();

        let err = provider
            .get_transaction_receipt(H256::zero())
            .await
            .unwrap_err();
        assert!(matches!(err, FlowError::ChainConnection { chain_id: 42220, .. }));

        let err = provider.get_nonce(Address::zero()).await.unwrap_err();
        assert!(matches!(err, FlowError::ChainConnection { chain_id: 42220, .. }));
    }
}
