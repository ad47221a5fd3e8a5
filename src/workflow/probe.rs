//! Readiness probe: one-shot contract read deciding whether a workflow's
//! first step can be skipped (allowance already granted, user already
//! registered).
//!
//! A failed read must never block the flow; it degrades to "not yet done"
//! so the user simply sees the first step again.

use crate::chain::ChainProvider;
use crate::error::FlowResult;

use async_trait::async_trait;
use ethers::prelude::*;
use ethers::types::transaction::eip2718::TypedTransaction;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// What the probe learned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// First step already satisfied on-chain; skip it
    AlreadyDone,
    /// First step still required (also the degraded answer on read failure)
    NotDone,
}

/// The underlying one-shot read
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ReadinessCheck: Send + Sync {
    async fn is_already_done(&self) -> FlowResult<bool>;
}

/// Wraps a [`ReadinessCheck`] with the run-once guard and the
/// degrade-on-failure policy.
pub struct ReadinessProbe {
    check: Arc<dyn ReadinessCheck>,
    cached: Mutex<Option<ProbeOutcome>>,
}

impl ReadinessProbe {
    pub fn new(check: Arc<dyn ReadinessCheck>) -> Self {
        Self {
            check,
            cached: Mutex::new(None),
        }
    }

    /// Run the probe. Re-renders/re-entries get the cached outcome; the
    /// contract read happens at most once per workflow.
    pub async fn probe(&self) -> ProbeOutcome {
        let mut cached = self.cached.lock().await;
        if let Some(outcome) = *cached {
            return outcome;
        }

        let outcome = match self.check.is_already_done().await {
            Ok(true) => ProbeOutcome::AlreadyDone,
            Ok(false) => ProbeOutcome::NotDone,
            Err(e) => {
                warn!("Readiness probe failed, assuming not done: {}", e);
                ProbeOutcome::NotDone
            }
        };

        *cached = Some(outcome);
        outcome
    }

    pub async fn has_probed(&self) -> bool {
        self.cached.lock().await.is_some()
    }
}

fn encode_address(addr: Address) -> [u8; 32] {
    let mut padded = [0u8; 32];
    padded[12..].copy_from_slice(addr.as_bytes());
    padded
}

fn read_call(to: Address, data: Vec<u8>) -> TypedTransaction {
    TransactionRequest::new().to(to).data(data).into()
}

/// ERC-20 `allowance(owner, spender) >= required`
pub struct AllowanceCheck {
    provider: Arc<ChainProvider>,
    token: Address,
    owner: Address,
    spender: Address,
    required: U256,
}

impl AllowanceCheck {
    pub fn new(
        provider: Arc<ChainProvider>,
        token: Address,
        owner: Address,
        spender: Address,
        required: U256,
    ) -> Self {
        Self {
            provider,
            token,
            owner,
            spender,
            required,
        }
    }
}

#[async_trait]
impl ReadinessCheck for AllowanceCheck {
    async fn is_already_done(&self) -> FlowResult<bool> {
        let mut data = ethers::utils::id("allowance(address,address)").to_vec();
        data.extend_from_slice(&encode_address(self.owner));
        data.extend_from_slice(&encode_address(self.spender));

        let bytes = self.provider.call(&read_call(self.token, data)).await?;
        let allowance = if bytes.len() >= 32 {
            U256::from_big_endian(&bytes[..32])
        } else {
            U256::zero()
        };

        debug!(
            "Allowance for {:?} -> {:?}: {} (required {})",
            self.owner, self.spender, allowance, self.required
        );
        Ok(allowance >= self.required)
    }
}

/// Registry `isUserRegistered(user)`
pub struct RegistrationCheck {
    provider: Arc<ChainProvider>,
    registry: Address,
    user: Address,
}

impl RegistrationCheck {
    pub fn new(provider: Arc<ChainProvider>, registry: Address, user: Address) -> Self {
        Self {
            provider,
            registry,
            user,
        }
    }
}

#[async_trait]
impl ReadinessCheck for RegistrationCheck {
    async fn is_already_done(&self) -> FlowResult<bool> {
        let mut data = ethers::utils::id("isUserRegistered(address)").to_vec();
        data.extend_from_slice(&encode_address(self.user));

        let bytes = self.provider.call(&read_call(self.registry, data)).await?;
        Ok(bytes.last().copied().unwrap_or(0) != 0)
    }
}

/// Direct-swap flows have no skippable first step
pub struct NoopCheck;

#[async_trait]
impl ReadinessCheck for NoopCheck {
    async fn is_already_done(&self) -> FlowResult<bool> {
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FlowError;

    #[tokio::test]
    async fn read_failure_degrades_to_not_done() {
        let mut check = MockReadinessCheck::new();
        check.expect_is_already_done().times(1).returning(|| {
            Err(FlowError::ChainConnection {
                chain_id: 42220,
                message: "rpc down".into(),
            })
        });

        let probe = ReadinessProbe::new(Arc::new(check));
        assert_eq!(probe.probe().await, ProbeOutcome::NotDone);
    }

    #[tokio::test]
    async fn probe_runs_exactly_once() {
        let mut check = MockReadinessCheck::new();
        check
            .expect_is_already_done()
            .times(1)
            .returning(|| Ok(true));

        let probe = ReadinessProbe::new(Arc::new(check));
        assert_eq!(probe.probe().await, ProbeOutcome::AlreadyDone);
        // Second and third calls hit the cache; mockall enforces times(1)
        assert_eq!(probe.probe().await, ProbeOutcome::AlreadyDone);
        assert_eq!(probe.probe().await, ProbeOutcome::AlreadyDone);
        assert!(probe.has_probed().await);
    }

    #[tokio::test]
    async fn noop_check_is_never_done() {
        let probe = ReadinessProbe::new(Arc::new(NoopCheck));
        assert_eq!(probe.probe().await, ProbeOutcome::NotDone);
    }
}
