//! Confirmation watcher: resolves a submitted transaction hash into a
//! success/revert outcome.
//!
//! The primary path is the provider library's pending-transaction watcher.
//! Wallet libraries occasionally lose track of a hash, so a manual
//! `eth_getTransactionReceipt` poll loop backs it up.

use crate::error::{FlowError, FlowResult};

use super::provider::ChainProvider;

use async_trait::async_trait;
use ethers::prelude::*;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Outcome of waiting on a transaction hash
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ReceiptWaiter: Send + Sync {
    /// Wait until the transaction is confirmed and succeeded.
    /// A mined-but-reverted transaction is an error, not a success.
    async fn wait_for_success(&self, tx_hash: H256) -> FlowResult<TransactionReceipt>;
}

/// Chain-side receipt reads behind the watcher
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ReceiptSource: Send + Sync {
    /// Library watcher with required confirmations. `Ok(None)` means it
    /// timed out or lost the hash; the caller falls back to polling.
    async fn watch(
        &self,
        tx_hash: H256,
        watch_timeout: Duration,
    ) -> FlowResult<Option<TransactionReceipt>>;

    /// One `eth_getTransactionReceipt` read
    async fn fetch(&self, tx_hash: H256) -> FlowResult<Option<TransactionReceipt>>;

    fn chain_id(&self) -> u64;
}

#[async_trait]
impl ReceiptSource for ChainProvider {
    async fn watch(
        &self,
        tx_hash: H256,
        watch_timeout: Duration,
    ) -> FlowResult<Option<TransactionReceipt>> {
        let confirmations = self.confirmation_blocks() as usize;
        let pending = PendingTransaction::new(tx_hash, self.http()).confirmations(confirmations);

        match timeout(watch_timeout, pending).await {
            Ok(Ok(receipt)) => Ok(receipt),
            Ok(Err(e)) => {
                warn!("Receipt watcher failed for {:?}: {}", tx_hash, e);
                Ok(None)
            }
            Err(_) => {
                warn!(
                    "Receipt watcher timed out after {:?} for {:?}, falling back to polling",
                    watch_timeout, tx_hash
                );
                Ok(None)
            }
        }
    }

    async fn fetch(&self, tx_hash: H256) -> FlowResult<Option<TransactionReceipt>> {
        self.get_transaction_receipt(tx_hash).await
    }

    fn chain_id(&self) -> u64 {
        ChainProvider::chain_id(self)
    }
}

/// Per-chain receipt watcher with manual-poll fallback
pub struct ReceiptWatcher {
    source: Arc<dyn ReceiptSource>,
    watch_timeout: Duration,
    poll_interval: Duration,
}

impl ReceiptWatcher {
    pub fn new(
        source: Arc<dyn ReceiptSource>,
        watch_timeout: Duration,
        poll_interval: Duration,
    ) -> Self {
        Self {
            source,
            watch_timeout,
            poll_interval,
        }
    }

    /// Fallback path: poll the JSON-RPC endpoint directly
    async fn poll(&self, tx_hash: H256) -> FlowResult<TransactionReceipt> {
        let max_attempts =
            (self.watch_timeout.as_millis() / self.poll_interval.as_millis().max(1)).max(1);

        for attempt in 0..max_attempts {
            match self.source.fetch(tx_hash).await {
                Ok(Some(receipt)) => {
                    debug!(
                        "Manual poll found receipt for {:?} on attempt {}",
                        tx_hash, attempt
                    );
                    return Ok(receipt);
                }
                Ok(None) => {}
                Err(e) => {
                    warn!("Receipt poll error for {:?}: {}", tx_hash, e);
                }
            }
            tokio::time::sleep(self.poll_interval).await;
        }

        Err(FlowError::Timeout {
            operation: format!("receipt for {:?}", tx_hash),
        })
    }

    fn ensure_success(&self, receipt: TransactionReceipt) -> FlowResult<TransactionReceipt> {
        if receipt.status == Some(1.into()) {
            Ok(receipt)
        } else {
            Err(FlowError::Reverted {
                chain_id: self.source.chain_id(),
                tx_hash: format!("{:?}", receipt.transaction_hash),
            })
        }
    }
}

#[async_trait]
impl ReceiptWaiter for ReceiptWatcher {
    async fn wait_for_success(&self, tx_hash: H256) -> FlowResult<TransactionReceipt> {
        // Library watcher first; any miss falls through to manual polling
        if let Some(receipt) = self.source.watch(tx_hash, self.watch_timeout).await? {
            return self.ensure_success(receipt);
        }

        let receipt = self.poll(tx_hash).await?;
        self.ensure_success(receipt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    const CHAIN: u64 = 42220;

    fn receipt(status: u64) -> TransactionReceipt {
        let mut receipt = TransactionReceipt::default();
        receipt.status = Some(status.into());
        receipt
    }

    fn watcher(source: MockReceiptSource) -> ReceiptWatcher {
        ReceiptWatcher::new(
            Arc::new(source),
            Duration::from_millis(50),
            Duration::from_millis(1),
        )
    }

    #[tokio::test]
    async fn watcher_success_skips_polling() {
        let mut source = MockReceiptSource::new();
        source.expect_watch().returning(|_, _| Ok(Some(receipt(1))));
        source.expect_fetch().times(0);

        let result = watcher(source).wait_for_success(H256::zero()).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn watcher_miss_falls_back_to_manual_poll() {
        let mut source = MockReceiptSource::new();
        source.expect_watch().returning(|_, _| Ok(None));
        let attempts = Arc::new(AtomicU64::new(0));
        let counter = attempts.clone();
        source.expect_fetch().returning(move |_| {
            // not mined on the first read, found on the second
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Ok(None)
            } else {
                Ok(Some(receipt(1)))
            }
        });

        let result = watcher(source).wait_for_success(H256::zero()).await.unwrap();
        assert_eq!(result.status, Some(1.into()));
        assert!(attempts.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn poll_exhaustion_times_out() {
        let mut source = MockReceiptSource::new();
        source.expect_watch().returning(|_, _| Ok(None));
        source.expect_fetch().returning(|_| Ok(None));

        let watcher = ReceiptWatcher::new(
            Arc::new(source),
            Duration::from_millis(5),
            Duration::from_millis(1),
        );
        let err = watcher.wait_for_success(H256::zero()).await.unwrap_err();
        assert!(matches!(err, FlowError::Timeout { .. }));
    }

    #[tokio::test]
    async fn poll_survives_transient_read_errors() {
        let mut source = MockReceiptSource::new();
        source.expect_watch().returning(|_, _| Ok(None));
        let attempts = Arc::new(AtomicU64::new(0));
        let counter = attempts.clone();
        source.expect_fetch().returning(move |_| {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(FlowError::ChainConnection {
                    chain_id: CHAIN,
                    message: "connection reset".into(),
                })
            } else {
                Ok(Some(receipt(1)))
            }
        });

        let result = watcher(source).wait_for_success(H256::zero()).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn reverted_receipt_is_an_error_not_a_success() {
        let mut source = MockReceiptSource::new();
        source.expect_watch().returning(|_, _| Ok(Some(receipt(0))));
        source.expect_chain_id().return_const(CHAIN);

        let err = watcher(source).wait_for_success(H256::zero()).await.unwrap_err();
        assert!(matches!(err, FlowError::Reverted { chain_id: CHAIN, .. }));
    }
}
