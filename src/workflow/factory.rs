//! Wires one workflow engine together from configuration.
//!
//! The factory owns the long-lived pieces (chain manager, wallet session,
//! completion recorder, audit sink) and stamps out one engine per start
//! request, each with its own guard, probe, submitter and watcher bound to
//! the action's chain.

use super::engine::{AuditSink, WorkflowEngine};
use super::probe::{AllowanceCheck, NoopCheck, ReadinessCheck, ReadinessProbe, RegistrationCheck};
use super::strategy::AcquisitionStrategy;
use crate::chain::{ChainManager, NetworkGuard, ReceiptWatcher, RpcWalletSession};
use crate::config::{ActionConfig, ActionKind, Settings};
use crate::error::{FlowError, FlowResult};
use crate::recorder::CompletionRecorder;
use crate::tx::prepared::parse_amount;
use crate::tx::{GasPolicy, PreparedTransaction, TransactionSubmitter};

use ethers::types::{Address, U256};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Inputs for starting one workflow
#[derive(Debug, Clone, serde::Deserialize)]
pub struct StartRequest {
    /// Action title as configured and seeded in the backend
    pub action_title: String,
    /// Wallet address of the acting user
    pub user: String,
    /// Prepared transaction payload for swap flows (steps[], direct, or
    /// 0x-quote shape); absent for registration flows
    pub prepared: Option<serde_json::Value>,
    /// Input amount for approval sizing (decimal or 0x-hex string)
    pub amount_in: Option<serde_json::Value>,
}

pub struct EngineFactory {
    settings: Settings,
    chains: Arc<ChainManager>,
    session: Arc<RpcWalletSession>,
    recorder: Arc<CompletionRecorder>,
    audit: Arc<dyn AuditSink>,
}

impl EngineFactory {
    pub fn new(
        settings: Settings,
        chains: Arc<ChainManager>,
        session: Arc<RpcWalletSession>,
        recorder: Arc<CompletionRecorder>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            settings,
            chains,
            session,
            recorder,
            audit,
        }
    }

    pub fn build(&self, request: &StartRequest) -> FlowResult<WorkflowEngine> {
        let action = self
            .settings
            .get_action(&request.action_title)
            .ok_or_else(|| {
                FlowError::Config(format!("unknown action '{}'", request.action_title))
            })?;

        let chain = self.settings.chains.get(&action.chain).ok_or_else(|| {
            FlowError::Config(format!("action references unknown chain '{}'", action.chain))
        })?;
        let provider = self.chains.get_provider(chain.chain_id)?;

        let user = parse_addr(&request.user)?;
        let strategy = self.build_strategy(action, request)?;
        let check = self.build_check(action, provider.clone(), user, &strategy)?;

        let daemon = &self.settings.daemon;
        let guard = NetworkGuard::new(
            self.session.clone(),
            chain.chain_id,
            Duration::from_millis(daemon.switch_settle_delay_ms),
        );

        let wallet = TransactionSubmitter::load_wallet(
            self.settings
                .wallet
                .private_key_env
                .as_deref()
                .unwrap_or("STABLEFLOW_PRIVATE_KEY"),
        )?;
        let submitter = TransactionSubmitter::new(
            provider.clone(),
            wallet,
            GasPolicy::new(daemon.fallback_gas_limit),
        );

        let watcher = ReceiptWatcher::new(
            provider,
            Duration::from_secs(daemon.receipt_watch_timeout_secs),
            Duration::from_millis(daemon.receipt_poll_interval_ms),
        );

        info!(
            "Starting workflow for '{}' on chain {} (user {})",
            action.title, chain.chain_id, request.user
        );

        Ok(WorkflowEngine::new(
            request.user.clone(),
            action.title.clone(),
            chain.chain_id,
            strategy,
            guard,
            ReadinessProbe::new(check),
            Arc::new(submitter),
            Arc::new(watcher),
            self.recorder.clone(),
            self.audit.clone(),
        ))
    }

    fn build_strategy(
        &self,
        action: &ActionConfig,
        request: &StartRequest,
    ) -> FlowResult<AcquisitionStrategy> {
        match action.kind {
            ActionKind::ApproveThenSwap => {
                let swap = parse_prepared(request)?;
                let token_in = parse_addr(action.token_in.as_deref().ok_or_else(|| {
                    FlowError::Config(format!("action '{}' lacks token_in", action.title))
                })?)?;
                let spender = parse_addr(action.spender.as_deref().ok_or_else(|| {
                    FlowError::Config(format!("action '{}' lacks spender", action.title))
                })?)?;
                let amount_in = match &request.amount_in {
                    Some(v) => parse_amount(v)?,
                    None => U256::MAX, // unlimited approval when unspecified
                };
                Ok(AcquisitionStrategy::ApproveThenSwap {
                    token_in,
                    spender,
                    amount_in,
                    swap,
                })
            }
            ActionKind::DirectSwap => Ok(AcquisitionStrategy::DirectSwap {
                swap: parse_prepared(request)?,
            }),
            ActionKind::RegisterThenComplete => {
                let swap = parse_prepared(request)?;
                let register = swap.calls().into_iter().next().ok_or_else(|| {
                    FlowError::PreparedShape("registration payload has no call".into())
                })?;
                Ok(AcquisitionStrategy::RegisterThenComplete { register })
            }
        }
    }

    fn build_check(
        &self,
        action: &ActionConfig,
        provider: Arc<crate::chain::ChainProvider>,
        user: Address,
        strategy: &AcquisitionStrategy,
    ) -> FlowResult<Arc<dyn ReadinessCheck>> {
        match strategy {
            AcquisitionStrategy::ApproveThenSwap {
                token_in,
                spender,
                amount_in,
                swap,
            } => Ok(Arc::new(AllowanceCheck::new(
                provider,
                *token_in,
                user,
                swap.allowance_target().unwrap_or(*spender),
                *amount_in,
            ))),
            AcquisitionStrategy::RegisterThenComplete { .. } => {
                let registry = parse_addr(action.registry.as_deref().ok_or_else(|| {
                    FlowError::Config(format!("action '{}' lacks registry", action.title))
                })?)?;
                Ok(Arc::new(RegistrationCheck::new(provider, registry, user)))
            }
            AcquisitionStrategy::DirectSwap { .. } => Ok(Arc::new(NoopCheck)),
        }
    }
}

fn parse_prepared(request: &StartRequest) -> FlowResult<PreparedTransaction> {
    let payload = request
        .prepared
        .as_ref()
        .ok_or_else(|| FlowError::PreparedShape("missing prepared transaction".into()))?;
    PreparedTransaction::parse(payload)
}

fn parse_addr(s: &str) -> FlowResult<Address> {
    Address::from_str(s).map_err(|e| FlowError::Config(format!("bad address {}: {}", s, e)))
}
