//! Transaction submitter: turns a prepared call into a signed, broadcast
//! transaction and hands back the hash.

use super::gas::GasPolicy;
use super::prepared::CallData;
use crate::chain::{ChainProvider, GasPrice};
use crate::error::{FlowError, FlowResult};

use async_trait::async_trait;
use ethers::prelude::*;
use ethers::signers::{LocalWallet, Signer};
use ethers::types::transaction::eip2718::TypedTransaction;
use std::sync::Arc;
use tracing::{debug, info};

/// Slippage presets offered by the acquisition flows, in basis points
pub const SLIPPAGE_PRESETS_BPS: [u32; 4] = [10, 50, 100, 200];

/// Apply a slippage tolerance to a quoted output amount.
///
/// `min_amount_out = quoted * (10_000 - tolerance_bps) / 10_000`, integer
/// math, rounding down.
pub fn min_amount_out(quoted: U256, tolerance_bps: u32) -> U256 {
    let bps = U256::from(10_000u64 - u64::from(tolerance_bps.min(10_000)));
    quoted * bps / U256::from(10_000u64)
}

/// ERC-20 `approve(spender, amount)` calldata
pub fn encode_approve(spender: Address, amount: U256) -> Bytes {
    let mut data = ethers::utils::id("approve(address,uint256)").to_vec();
    let mut padded = [0u8; 32];
    padded[12..].copy_from_slice(spender.as_bytes());
    data.extend_from_slice(&padded);
    let mut amount_bytes = [0u8; 32];
    amount.to_big_endian(&mut amount_bytes);
    data.extend_from_slice(&amount_bytes);
    data.into()
}

/// Submission seam the workflow engine drives
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StepSubmitter: Send + Sync {
    /// Sign and broadcast one call; returns the transaction hash
    async fn submit(&self, call: CallData) -> FlowResult<H256>;
}

/// Production submitter signing with a local wallet
pub struct TransactionSubmitter {
    provider: Arc<ChainProvider>,
    wallet: LocalWallet,
    gas_policy: GasPolicy,
}

impl TransactionSubmitter {
    pub fn new(provider: Arc<ChainProvider>, wallet: LocalWallet, gas_policy: GasPolicy) -> Self {
        let wallet = wallet.with_chain_id(provider.chain_id());
        Self {
            provider,
            wallet,
            gas_policy,
        }
    }

    /// Load the signing wallet from the environment
    pub fn load_wallet(env_var: &str) -> FlowResult<LocalWallet> {
        let key = std::env::var(env_var)
            .map_err(|_| FlowError::Wallet(format!("{} not set", env_var)))?;
        key.parse::<LocalWallet>()
            .map_err(|e| FlowError::Wallet(format!("Invalid private key: {}", e)))
    }

    pub fn wallet_address(&self) -> Address {
        self.wallet.address()
    }

    async fn build(&self, call: &CallData) -> FlowResult<TypedTransaction> {
        let nonce = self.provider.get_nonce(self.wallet.address()).await?;
        let gas_price = self.provider.get_gas_price().await?;

        let base = TransactionRequest::new()
            .from(self.wallet.address())
            .to(call.to)
            .data(call.data.clone())
            .value(call.value)
            .nonce(nonce);

        let mut tx: TypedTransaction = match gas_price {
            GasPrice::Legacy(price) => base.gas_price(price).into(),
            GasPrice::Eip1559 {
                max_fee_per_gas,
                max_priority_fee_per_gas,
            } => Eip1559TransactionRequest::new()
                .from(self.wallet.address())
                .to(call.to)
                .data(call.data.clone())
                .value(call.value)
                .nonce(nonce)
                .max_fee_per_gas(max_fee_per_gas)
                .max_priority_fee_per_gas(max_priority_fee_per_gas)
                .into(),
        };

        // Estimation failure falls back to the manual limit, once
        let gas_limit = self.gas_policy.gas_limit(&self.provider, &tx).await?;
        tx.set_gas(gas_limit);

        debug!(
            "Built tx to {:?} on chain {} (gas {})",
            call.to,
            self.provider.chain_id(),
            gas_limit
        );
        Ok(tx)
    }
}

#[async_trait]
impl StepSubmitter for TransactionSubmitter {
    async fn submit(&self, call: CallData) -> FlowResult<H256> {
        let tx = self.build(&call).await?;

        let signature = self
            .wallet
            .sign_transaction(&tx)
            .await
            .map_err(|e| FlowError::Wallet(e.to_string()))?;

        let raw = tx.rlp_signed(&signature);
        let tx_hash = self.provider.send_raw_transaction(raw).await?;

        info!(
            "Submitted transaction {:?} on chain {}",
            tx_hash,
            self.provider.chain_id()
        );
        crate::metrics::record_tx_submitted(self.provider.chain_id());

        Ok(tx_hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn min_amount_out_matches_presets() {
        // quoted * (1 - t) for t in {0.1%, 0.5%, 1%, 2%}
        let quoted = U256::from(1_000_000_000_000u64);
        let expected = [
            U256::from(999_000_000_000u64),
            U256::from(995_000_000_000u64),
            U256::from(990_000_000_000u64),
            U256::from(980_000_000_000u64),
        ];
        for (bps, want) in SLIPPAGE_PRESETS_BPS.iter().zip(expected) {
            assert_eq!(min_amount_out(quoted, *bps), want, "tolerance {} bps", bps);
        }
    }

    #[test]
    fn min_amount_out_rounds_down() {
        // 999 * 9990 / 10000 = 998.001 -> 998
        assert_eq!(min_amount_out(U256::from(999u64), 10), U256::from(998u64));
    }

    #[test]
    fn min_amount_out_saturates_at_full_tolerance() {
        assert_eq!(min_amount_out(U256::from(1000u64), 10_000), U256::zero());
        assert_eq!(min_amount_out(U256::from(1000u64), 20_000), U256::zero());
    }

    #[test]
    fn approve_calldata_layout() {
        let spender = Address::repeat_byte(0x11);
        let data = encode_approve(spender, U256::from(500u64));
        // selector + two 32-byte words
        assert_eq!(data.len(), 4 + 64);
        assert_eq!(&data[0..4], &ethers::utils::id("approve(address,uint256)")[..]);
        assert_eq!(&data[16..36], spender.as_bytes());
        assert_eq!(data[67], 0xf4); // 500 = 0x01f4
    }
}
