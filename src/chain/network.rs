//! Network guard: verifies the wallet session is on the required chain
//! before any submission, and drives chain switches.

use crate::error::{FlowError, FlowResult};

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Wallet-side view of the connected network.
///
/// Abstracted so the guard can be exercised against a mock session; the
/// production implementation is [`RpcWalletSession`].
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait WalletSession: Send + Sync {
    /// Chain ID the session is currently connected to
    async fn chain_id(&self) -> FlowResult<u64>;

    /// Request a switch to the given chain. Resolving does NOT guarantee the
    /// switch took effect; callers must re-check `chain_id`.
    async fn switch_chain(&self, chain_id: u64) -> FlowResult<()>;
}

/// Guards one workflow against running on the wrong chain
pub struct NetworkGuard {
    session: Arc<dyn WalletSession>,
    required_chain: u64,
    /// Wallets apply switches asynchronously; re-check only after this delay
    settle_delay: Duration,
}

impl NetworkGuard {
    pub fn new(session: Arc<dyn WalletSession>, required_chain: u64, settle_delay: Duration) -> Self {
        Self {
            session,
            required_chain,
            settle_delay,
        }
    }

    /// Check whether the session is on the required chain.
    /// Session errors count as "wrong network" rather than propagating.
    pub async fn is_correct_network(&self) -> bool {
        match self.session.chain_id().await {
            Ok(id) => id == self.required_chain,
            Err(e) => {
                warn!("Network check failed: {}", e);
                false
            }
        }
    }

    /// Request a chain switch, wait for it to settle, then re-check.
    ///
    /// Returns `Ok(true)` only if the re-read chain ID matches. A rejected or
    /// ineffective switch returns `Ok(false)`; this never errors past the
    /// workflow boundary.
    pub async fn switch_to(&self) -> FlowResult<bool> {
        if self.is_correct_network().await {
            return Ok(true);
        }

        if let Err(e) = self.session.switch_chain(self.required_chain).await {
            warn!("Chain switch to {} failed: {}", self.required_chain, e);
            return Ok(false);
        }

        tokio::time::sleep(self.settle_delay).await;

        let correct = self.is_correct_network().await;
        debug!(
            "Chain switch to {} settled, correct={}",
            self.required_chain, correct
        );
        Ok(correct)
    }

    /// Error to raise when a submission is attempted on the wrong chain
    pub async fn wrong_network_error(&self) -> FlowError {
        let actual = self.session.chain_id().await.unwrap_or(0);
        FlowError::WrongNetwork {
            expected: self.required_chain,
            actual,
        }
    }

    pub fn required_chain(&self) -> u64 {
        self.required_chain
    }
}

/// Production wallet session backed by the daemon's chain providers.
///
/// The daemon's "wallet" is a local signer pointed at one chain at a time;
/// switching re-targets the active provider slot.
pub struct RpcWalletSession {
    chains: Arc<super::ChainManager>,
    current: tokio::sync::RwLock<u64>,
}

#[async_trait]
impl WalletSession for RpcWalletSession {
    async fn chain_id(&self) -> FlowResult<u64> {
        let current = *self.current.read().await;
        let provider = self.chains.get_provider(current)?;
        // Ask the endpoint itself; a misconfigured RPC URL must not pass the guard
        provider.get_chain_id().await
    }

    async fn switch_chain(&self, chain_id: u64) -> FlowResult<()> {
        // Fails if we have no provider for the target chain
        self.chains.get_provider(chain_id)?;
        *self.current.write().await = chain_id;
        Ok(())
    }
}

impl RpcWalletSession {
    pub fn new(chains: Arc<super::ChainManager>, initial_chain: u64) -> Self {
        Self {
            chains,
            current: tokio::sync::RwLock::new(initial_chain),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn guard_with(session: MockWalletSession, required: u64) -> NetworkGuard {
        NetworkGuard::new(Arc::new(session), required, Duration::from_millis(1))
    }

    #[tokio::test]
    async fn correct_network_passes() {
        let mut session = MockWalletSession::new();
        session.expect_chain_id().returning(|| Ok(42220));
        let guard = guard_with(session, 42220);
        assert!(guard.is_correct_network().await);
    }

    #[tokio::test]
    async fn session_error_counts_as_wrong_network() {
        let mut session = MockWalletSession::new();
        session
            .expect_chain_id()
            .returning(|| Err(FlowError::Wallet("no session".into())));
        let guard = guard_with(session, 8453);
        assert!(!guard.is_correct_network().await);
    }

    #[tokio::test]
    async fn switch_that_does_not_take_effect_stays_wrong() {
        // switch_chain resolves but the observed chain never changes
        let mut session = MockWalletSession::new();
        session.expect_chain_id().returning(|| Ok(1));
        session.expect_switch_chain().returning(|_| Ok(()));
        let guard = guard_with(session, 10);

        let switched = guard.switch_to().await.unwrap();
        assert!(!switched);
        assert!(!guard.is_correct_network().await);
    }

    #[tokio::test]
    async fn effective_switch_reports_correct() {
        use std::sync::atomic::{AtomicU64, Ordering};
        let observed = Arc::new(AtomicU64::new(1));

        let mut session = MockWalletSession::new();
        let obs = observed.clone();
        session
            .expect_chain_id()
            .returning(move || Ok(obs.load(Ordering::SeqCst)));
        let obs = observed.clone();
        session.expect_switch_chain().returning(move |id| {
            obs.store(id, Ordering::SeqCst);
            Ok(())
        });

        let guard = guard_with(session, 137);
        assert!(guard.switch_to().await.unwrap());
        assert!(guard.is_correct_network().await);
    }

    #[tokio::test]
    async fn rejected_switch_returns_false_without_error() {
        let mut session = MockWalletSession::new();
        session.expect_chain_id().returning(|| Ok(1));
        session
            .expect_switch_chain()
            .returning(|_| Err(FlowError::UserRejected));
        let guard = guard_with(session, 10);
        assert_eq!(guard.switch_to().await.unwrap(), false);
    }
}
