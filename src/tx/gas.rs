//! Gas limit policy for workflow submissions
//!
//! Automatic estimation first; a single retry with a conservative manual
//! limit when estimation fails. Node estimators routinely choke on freshly
//! prepared swap calldata even when the call would succeed.

use crate::chain::{ChainProvider, GasPrice};
use crate::error::{FlowError, FlowResult};

use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::U256;
use std::sync::Arc;
use tracing::{debug, warn};

pub struct GasPolicy {
    /// Buffer applied on top of a successful estimate (percent)
    estimate_buffer_percent: u64,
    /// Manual limit used when estimation fails
    fallback_gas_limit: U256,
}

impl GasPolicy {
    pub fn new(fallback_gas_limit: u64) -> Self {
        Self {
            estimate_buffer_percent: 20,
            fallback_gas_limit: U256::from(fallback_gas_limit),
        }
    }

    /// Resolve the gas limit for a transaction.
    ///
    /// The first estimation failure is retried once with the manual limit by
    /// returning it directly; a second failure is impossible by construction
    /// since the manual limit needs no estimation.
    pub async fn gas_limit(
        &self,
        provider: &Arc<ChainProvider>,
        tx: &TypedTransaction,
    ) -> FlowResult<U256> {
        match provider.estimate_gas(tx).await {
            Ok(estimate) => {
                let buffered = estimate + estimate * self.estimate_buffer_percent / 100;
                debug!("Gas estimate {} (buffered {})", estimate, buffered);
                Ok(buffered)
            }
            Err(FlowError::GasEstimation(msg)) => {
                warn!(
                    "Gas estimation failed ({}), using manual limit {}",
                    msg, self.fallback_gas_limit
                );
                Ok(self.fallback_gas_limit)
            }
            Err(e) => Err(e),
        }
    }

    /// Total cost ceiling in wei for a limit and price
    pub fn max_cost(gas_limit: U256, gas_price: &GasPrice) -> U256 {
        match gas_price {
            GasPrice::Legacy(price) => gas_limit * *price,
            GasPrice::Eip1559 {
                max_fee_per_gas, ..
            } => gas_limit * *max_fee_per_gas,
        }
    }
}

impl Default for GasPolicy {
    fn default() -> Self {
        Self::new(300_000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn max_cost_uses_max_fee_for_eip1559() {
        let cost = GasPolicy::max_cost(
            U256::from(100_000u64),
            &GasPrice::Eip1559 {
                max_fee_per_gas: U256::from(50u64),
                max_priority_fee_per_gas: U256::from(2u64),
            },
        );
        assert_eq!(cost, U256::from(5_000_000u64));
    }
}
