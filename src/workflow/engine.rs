//! Workflow engine: drives one acquisition workflow through
//! guard -> probe -> submit -> confirm -> record.
//!
//! Steps are strictly sequential within a workflow; an in-flight flag rejects
//! re-entrant execution so a double-triggered submit cannot produce a
//! duplicate on-chain transaction.

use super::probe::{ProbeOutcome, ReadinessProbe};
use super::status::{StepKind, WorkflowStatus};
use super::strategy::AcquisitionStrategy;
use crate::chain::{NetworkGuard, ReceiptWaiter};
use crate::error::{FailureKind, FlowError, FlowResult};
use crate::recorder::{CompletionRecord, CompletionRecorder};
use crate::tx::StepSubmitter;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ethers::types::H256;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

/// One in-progress user action
#[derive(Debug, Clone, Serialize)]
pub struct TransactionWorkflow {
    pub id: Uuid,
    pub user: String,
    pub action_title: String,
    pub chain_id: u64,
    #[serde(flatten)]
    pub status: WorkflowStatus,
    pub error_message: Option<String>,
    pub tx_hash: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Sink for workflow status transitions (audit trail)
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, workflow: &TransactionWorkflow) -> FlowResult<()>;
}

/// No-op sink for contexts without a database
pub struct NoopAudit;

#[async_trait]
impl AuditSink for NoopAudit {
    async fn record(&self, _workflow: &TransactionWorkflow) -> FlowResult<()> {
        Ok(())
    }
}

pub struct WorkflowEngine {
    workflow: RwLock<TransactionWorkflow>,
    strategy: AcquisitionStrategy,
    guard: NetworkGuard,
    probe: ReadinessProbe,
    submitter: Arc<dyn StepSubmitter>,
    watcher: Arc<dyn ReceiptWaiter>,
    recorder: Arc<CompletionRecorder>,
    audit: Arc<dyn AuditSink>,
    /// First step satisfied on-chain, per the probe or a confirmed receipt
    first_step_satisfied: AtomicBool,
    /// Submission re-entrancy guard
    in_flight: AtomicBool,
}

impl WorkflowEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        user: String,
        action_title: String,
        chain_id: u64,
        strategy: AcquisitionStrategy,
        guard: NetworkGuard,
        probe: ReadinessProbe,
        submitter: Arc<dyn StepSubmitter>,
        watcher: Arc<dyn ReceiptWaiter>,
        recorder: Arc<CompletionRecorder>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        let workflow = TransactionWorkflow {
            id: Uuid::new_v4(),
            user,
            action_title,
            chain_id,
            status: WorkflowStatus::Idle,
            error_message: None,
            tx_hash: None,
            created_at: Utc::now(),
        };

        Self {
            workflow: RwLock::new(workflow),
            strategy,
            guard,
            probe,
            submitter,
            watcher,
            recorder,
            audit,
            first_step_satisfied: AtomicBool::new(false),
            in_flight: AtomicBool::new(false),
        }
    }

    pub async fn snapshot(&self) -> TransactionWorkflow {
        self.workflow.read().await.clone()
    }

    pub async fn status(&self) -> WorkflowStatus {
        self.workflow.read().await.status.clone()
    }

    pub async fn id(&self) -> Uuid {
        self.workflow.read().await.id
    }

    /// Move to `next`, enforcing transition legality and recording the audit row
    async fn set_status(&self, next: WorkflowStatus) -> FlowResult<()> {
        let mut workflow = self.workflow.write().await;
        if !workflow.status.can_transition(&next) {
            return Err(FlowError::InvalidTransition {
                from: workflow.status.name().to_string(),
                to: next.name().to_string(),
            });
        }

        workflow.error_message = match &next {
            WorkflowStatus::Failed { message } => Some(message.clone()),
            _ => None,
        };
        workflow.status = next;
        crate::metrics::record_workflow_status(workflow.chain_id, workflow.status.name());

        let snapshot = workflow.clone();
        drop(workflow);

        if let Err(e) = self.audit.record(&snapshot).await {
            warn!("Audit write failed for workflow {}: {}", snapshot.id, e);
        }
        Ok(())
    }

    async fn fail(&self, error: &FlowError) {
        let message = error.failure_kind().user_message().to_string();
        crate::metrics::record_workflow_failed(self.workflow.read().await.chain_id);
        if let Err(e) = self.set_status(WorkflowStatus::Failed { message }).await {
            warn!("Could not enter error state: {}", e);
        }
    }

    /// Is the wallet session on this workflow's chain?
    pub async fn is_correct_network(&self) -> bool {
        self.guard.is_correct_network().await
    }

    /// Request a chain switch; `Ok(true)` only when the switch took effect
    pub async fn switch_network(&self) -> FlowResult<bool> {
        self.guard.switch_to().await
    }

    /// Run the readiness probe and settle into the pre-submission state.
    ///
    /// Refuses to run on the wrong network. When the probe reports the first
    /// step already satisfied, a registration flow completes outright and a
    /// swap flow lands on its swap-ready state.
    pub async fn start(&self) -> FlowResult<WorkflowStatus> {
        if !self.guard.is_correct_network().await {
            return Err(self.guard.wrong_network_error().await);
        }

        self.set_status(WorkflowStatus::Checking).await?;
        let outcome = self.probe.probe().await;

        match outcome {
            ProbeOutcome::AlreadyDone if self.strategy.skips_entirely_when_satisfied() => {
                // Nothing left on-chain; only the bookkeeping remains
                self.first_step_satisfied.store(true, Ordering::SeqCst);
                self.set_status(WorkflowStatus::Completing).await?;
                self.record_completion().await?;
                self.set_status(WorkflowStatus::Completed).await?;
            }
            ProbeOutcome::AlreadyDone => {
                self.first_step_satisfied.store(true, Ordering::SeqCst);
                self.set_status(WorkflowStatus::NotStarted).await?;
            }
            ProbeOutcome::NotDone => {
                self.set_status(WorkflowStatus::NotStarted).await?;
            }
        }

        Ok(self.status().await)
    }

    /// The next step a caller would be asked to confirm, if any
    pub async fn next_step_kind(&self) -> Option<StepKind> {
        let satisfied = self.first_step_satisfied.load(Ordering::SeqCst);
        self.strategy.steps(satisfied).first().map(|(kind, _)| *kind)
    }

    /// Execute all remaining steps sequentially, then record completion.
    ///
    /// A user rejection returns the machine to the retryable pre-submission
    /// state without entering `Failed`; every other failure does.
    pub async fn execute(&self) -> FlowResult<WorkflowStatus> {
        {
            let workflow = self.workflow.read().await;
            if !workflow.status.is_actionable() {
                return Err(FlowError::InvalidTransition {
                    from: workflow.status.name().to_string(),
                    to: "submitting".to_string(),
                });
            }
        }

        // No submission on the wrong chain, ever
        if !self.guard.is_correct_network().await {
            return Err(self.guard.wrong_network_error().await);
        }

        if self
            .in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            let id = self.workflow.read().await.id;
            return Err(FlowError::StepInFlight {
                workflow_id: id.to_string(),
            });
        }

        let result = self.execute_steps().await;
        self.in_flight.store(false, Ordering::SeqCst);

        match result {
            Ok(()) => Ok(self.status().await),
            Err(e) => {
                if e.failure_kind() == FailureKind::UserRejection {
                    // Retryable without ceremony
                    info!("User rejected signature; returning to actionable state");
                    self.set_status(WorkflowStatus::NotStarted).await?;
                    Ok(self.status().await)
                } else {
                    self.fail(&e).await;
                    Err(e)
                }
            }
        }
    }

    async fn execute_steps(&self) -> FlowResult<()> {
        let satisfied = self.first_step_satisfied.load(Ordering::SeqCst);
        let steps = self.strategy.steps(satisfied);

        for (kind, call) in steps {
            self.set_status(WorkflowStatus::Submitting { step: kind }).await?;

            let tx_hash = self.submitter.submit(call).await?;
            {
                let mut workflow = self.workflow.write().await;
                workflow.tx_hash = Some(format!("0x{}", hex::encode(tx_hash)));
            }

            self.set_status(WorkflowStatus::TransactionPending).await?;
            self.set_status(WorkflowStatus::TransactionConfirming).await?;

            self.watcher.wait_for_success(tx_hash).await?;
            info!("Step {} confirmed ({:?})", kind, tx_hash);

            // A confirmed approval or registration stays done across retries;
            // a failure on a later step must not re-submit it
            if self.strategy.strikeable_step() == Some(kind) {
                self.first_step_satisfied.store(true, Ordering::SeqCst);
            }
        }

        self.set_status(WorkflowStatus::TransactionSuccess).await?;
        self.set_status(WorkflowStatus::Completing).await?;
        self.record_completion().await?;
        self.set_status(WorkflowStatus::Completed).await?;

        let workflow = self.workflow.read().await;
        crate::metrics::record_workflow_completed(workflow.chain_id);
        Ok(())
    }

    async fn record_completion(&self) -> FlowResult<()> {
        let workflow = self.workflow.read().await;
        let record = CompletionRecord {
            user: workflow.user.clone(),
            action_title: workflow.action_title.clone(),
            tx_hash: workflow.tx_hash.clone().unwrap_or_default(),
            chain_id: workflow.chain_id,
            completed_at: Utc::now(),
        };
        drop(workflow);

        // Fail-open: the recorder only errors when the policy says so
        let outcome = self.recorder.record(&record).await?;
        info!("Completion outcome: {:?}", outcome);
        Ok(())
    }

    /// Explicit user retry out of the error state
    pub async fn retry(&self) -> FlowResult<WorkflowStatus> {
        {
            let workflow = self.workflow.read().await;
            if !workflow.status.is_failed() {
                return Err(FlowError::InvalidTransition {
                    from: workflow.status.name().to_string(),
                    to: "not-started".to_string(),
                });
            }
        }
        self.set_status(WorkflowStatus::NotStarted).await?;
        Ok(self.status().await)
    }

    /// Last transaction hash observed, if any
    pub async fn tx_hash(&self) -> Option<String> {
        self.workflow.read().await.tx_hash.clone()
    }
}
