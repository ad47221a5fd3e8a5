//! Workflow status machine
//!
//! One enumerated status drives every acquisition flow. Transitions come from
//! user actions (execute/retry), asynchronous submission callbacks, and the
//! one-shot readiness probe. `Failed` absorbs everything except an explicit
//! retry; `Completed` is terminal.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Which step a submission belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepKind {
    Approve,
    Register,
    Swap,
    Prepare,
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StepKind::Approve => "approving",
            StepKind::Register => "registering",
            StepKind::Swap => "swapping",
            StepKind::Prepare => "preparing",
        };
        write!(f, "{}", s)
    }
}

/// Status of one acquisition workflow
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "kebab-case")]
pub enum WorkflowStatus {
    /// Created, nothing has happened yet
    Idle,
    /// Readiness probe in flight
    Checking,
    /// Probe done, first step still required (not-registered / not-swapped)
    NotStarted,
    /// A step's transaction is being built and signed
    Submitting { step: StepKind },
    /// Hash obtained, waiting for the transaction to be mined
    TransactionPending,
    /// Mined, waiting for confirmations
    TransactionConfirming,
    /// On-chain work done
    TransactionSuccess,
    /// Recording completion against the backend
    Completing,
    /// Terminal success
    Completed,
    /// Absorbing error state; only an explicit retry leaves it
    Failed { message: String },
}

impl WorkflowStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, WorkflowStatus::Completed)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, WorkflowStatus::Failed { .. })
    }

    /// States from which `execute()` may be (re-)invoked
    pub fn is_actionable(&self) -> bool {
        matches!(self, WorkflowStatus::NotStarted)
    }

    /// Whether moving from `self` to `next` is a legal transition.
    ///
    /// `Failed` is reachable from every non-terminal state. The only exits
    /// from `Failed` are retry (back to `NotStarted`) or a fresh failure
    /// message. Nothing leaves `Completed`.
    pub fn can_transition(&self, next: &WorkflowStatus) -> bool {
        use WorkflowStatus::*;

        if self.is_terminal() {
            return false;
        }
        if matches!(next, Failed { .. }) {
            return true;
        }

        match (self, next) {
            (Failed { .. }, NotStarted) => true,
            (Failed { .. }, _) => false,

            (Idle, Checking) => true,
            // Probe skipped entirely (e.g. wrong network path re-entry)
            (Idle, NotStarted) => true,

            (Checking, NotStarted) => true,
            // Probe says already done: skip the redundant step
            (Checking, TransactionSuccess) => true,
            (Checking, Completing) => true,

            (NotStarted, Submitting { .. }) => true,
            // Retry after the on-chain step already confirmed: only the
            // completion recording remains
            (NotStarted, TransactionSuccess) => true,

            (Submitting { .. }, TransactionPending) => true,
            // User rejection drops back to the retryable state
            (Submitting { .. }, NotStarted) => true,

            (TransactionPending, TransactionConfirming) => true,
            (TransactionConfirming, TransactionSuccess) => true,
            // Multi-step flows loop back for the next submission
            (TransactionConfirming, Submitting { .. }) => true,
            (TransactionSuccess, Submitting { .. }) => true,

            (TransactionSuccess, Completing) => true,
            (Completing, Completed) => true,

            _ => false,
        }
    }

    /// Short machine-readable name for metrics and audit rows
    pub fn name(&self) -> &'static str {
        match self {
            WorkflowStatus::Idle => "idle",
            WorkflowStatus::Checking => "checking",
            WorkflowStatus::NotStarted => "not-started",
            WorkflowStatus::Submitting { step: StepKind::Approve } => "approving",
            WorkflowStatus::Submitting { step: StepKind::Register } => "registering",
            WorkflowStatus::Submitting { step: StepKind::Swap } => "swapping",
            WorkflowStatus::Submitting { step: StepKind::Prepare } => "preparing",
            WorkflowStatus::TransactionPending => "transaction-pending",
            WorkflowStatus::TransactionConfirming => "transaction-confirming",
            WorkflowStatus::TransactionSuccess => "transaction-success",
            WorkflowStatus::Completing => "completing",
            WorkflowStatus::Completed => "completed",
            WorkflowStatus::Failed { .. } => "error",
        }
    }
}

impl fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkflowStatus::Failed { message } => write!(f, "error: {}", message),
            other => write!(f, "{}", other.name()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failed() -> WorkflowStatus {
        WorkflowStatus::Failed {
            message: "boom".into(),
        }
    }

    #[test]
    fn error_reachable_from_every_non_terminal_state() {
        let states = [
            WorkflowStatus::Idle,
            WorkflowStatus::Checking,
            WorkflowStatus::NotStarted,
            WorkflowStatus::Submitting { step: StepKind::Swap },
            WorkflowStatus::TransactionPending,
            WorkflowStatus::TransactionConfirming,
            WorkflowStatus::TransactionSuccess,
            WorkflowStatus::Completing,
            failed(),
        ];
        for s in &states {
            assert!(s.can_transition(&failed()), "{} -> error", s);
        }
    }

    #[test]
    fn completed_is_terminal() {
        let done = WorkflowStatus::Completed;
        assert!(!done.can_transition(&WorkflowStatus::Idle));
        assert!(!done.can_transition(&failed()));
        assert!(!done.can_transition(&WorkflowStatus::Completing));
    }

    #[test]
    fn failed_only_exits_via_retry() {
        assert!(failed().can_transition(&WorkflowStatus::NotStarted));
        assert!(!failed().can_transition(&WorkflowStatus::Completing));
        assert!(!failed().can_transition(&WorkflowStatus::TransactionPending));
    }

    #[test]
    fn happy_path_is_legal() {
        let path = [
            WorkflowStatus::Idle,
            WorkflowStatus::Checking,
            WorkflowStatus::NotStarted,
            WorkflowStatus::Submitting { step: StepKind::Approve },
            WorkflowStatus::TransactionPending,
            WorkflowStatus::TransactionConfirming,
            WorkflowStatus::Submitting { step: StepKind::Swap },
            WorkflowStatus::TransactionPending,
            WorkflowStatus::TransactionConfirming,
            WorkflowStatus::TransactionSuccess,
            WorkflowStatus::Completing,
            WorkflowStatus::Completed,
        ];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition(&pair[1]), "{} -> {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn probe_skip_jumps_past_submission() {
        assert!(WorkflowStatus::Checking.can_transition(&WorkflowStatus::Completing));
        assert!(!WorkflowStatus::Checking
            .can_transition(&WorkflowStatus::TransactionPending));
    }

    #[test]
    fn retry_with_nothing_left_to_submit_resumes_past_submission() {
        assert!(WorkflowStatus::NotStarted.can_transition(&WorkflowStatus::TransactionSuccess));
        assert!(!WorkflowStatus::NotStarted.can_transition(&WorkflowStatus::Completing));
    }

    #[test]
    fn rejection_returns_to_actionable_state() {
        let submitting = WorkflowStatus::Submitting { step: StepKind::Swap };
        assert!(submitting.can_transition(&WorkflowStatus::NotStarted));
        assert!(WorkflowStatus::NotStarted.is_actionable());
    }
}
