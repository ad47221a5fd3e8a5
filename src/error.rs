//! Error types for the stableflow daemon

use thiserror::Error;

/// Main error type for workflow execution
#[derive(Error, Debug)]
pub enum FlowError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Chain connection error for chain {chain_id}: {message}")]
    ChainConnection { chain_id: u64, message: String },

    #[error("Wallet session error: {0}")]
    Wallet(String),

    #[error("User rejected the signature request")]
    UserRejected,

    #[error("Gas estimation error: {0}")]
    GasEstimation(String),

    #[error("Transaction error: {0}")]
    Transaction(String),

    #[error("Transaction reverted on chain {chain_id}: {tx_hash}")]
    Reverted { chain_id: u64, tx_hash: String },

    #[error("Unrecognized prepared-transaction shape: {0}")]
    PreparedShape(String),

    #[error("Backend error ({status}): {message}")]
    Backend { status: u16, message: String },

    #[error("Price source error: {0}")]
    PriceSource(String),

    #[error("Timeout waiting for {operation}")]
    Timeout { operation: String },

    #[error("Chain {chain_id} not found")]
    ChainNotFound { chain_id: u64 },

    #[error("Workflow {workflow_id} not found")]
    WorkflowNotFound { workflow_id: String },

    #[error("Invalid status transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Wrong network: expected chain {expected}, wallet is on {actual}")]
    WrongNetwork { expected: u64, actual: u64 },

    #[error("Step already in flight for workflow {workflow_id}")]
    StepInFlight { workflow_id: String },

    #[error("Insufficient funds on chain {chain_id}")]
    InsufficientFunds { chain_id: u64 },

    #[error("Internal error: {0}")]
    Internal(String),
}

/// User-facing classification of a failure, derived from the raw error text.
///
/// Upstream wallet and RPC libraries expose failures as strings, so the one
/// place allowed to substring-match on them is [`classify`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Wallet declined the signature; retryable without alarm.
    UserRejection,
    /// Provider unreachable, timed out, or rate limited.
    Rpc,
    /// Not enough balance to cover value + gas.
    InsufficientFunds,
    /// Output fell below the slippage floor.
    Slippage,
    /// Generic on-chain revert.
    Revert,
    /// Anything we could not recognize.
    Unknown,
}

impl FailureKind {
    /// Neutral message shown for this failure class.
    pub fn user_message(&self) -> &'static str {
        match self {
            FailureKind::UserRejection => "Signature request declined. Try again when ready.",
            FailureKind::Rpc => "Network hiccup while talking to the chain. Try again.",
            FailureKind::InsufficientFunds => "Insufficient funds to cover this transaction.",
            FailureKind::Slippage => "Price moved beyond the slippage tolerance.",
            FailureKind::Revert => "The transaction was rejected by the contract.",
            FailureKind::Unknown => "Something went wrong. Try again.",
        }
    }
}

/// Classify a raw error string from a wallet/provider library.
pub fn classify(message: &str) -> FailureKind {
    let lower = message.to_lowercase();
    if lower.contains("user rejected")
        || lower.contains("user denied")
        || lower.contains("rejected by user")
    {
        FailureKind::UserRejection
    } else if lower.contains("insufficient funds") || lower.contains("insufficient balance") {
        FailureKind::InsufficientFunds
    } else if lower.contains("slippage")
        || lower.contains("insufficient output amount")
        || lower.contains("too little received")
    {
        FailureKind::Slippage
    } else if lower.contains("timeout")
        || lower.contains("timed out")
        || lower.contains("connection")
        || lower.contains("rate limit")
    {
        FailureKind::Rpc
    } else if lower.contains("revert") {
        FailureKind::Revert
    } else {
        FailureKind::Unknown
    }
}

impl FlowError {
    /// Check if the error is worth retrying without user intervention
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FlowError::ChainConnection { .. }
                | FlowError::Timeout { .. }
                | FlowError::PriceSource(_)
        )
    }

    /// Failure class for user-facing reporting
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            FlowError::UserRejected => FailureKind::UserRejection,
            FlowError::InsufficientFunds { .. } => FailureKind::InsufficientFunds,
            FlowError::Reverted { .. } => FailureKind::Revert,
            FlowError::ChainConnection { .. } | FlowError::Timeout { .. } => FailureKind::Rpc,
            FlowError::Transaction(msg) | FlowError::Wallet(msg) => classify(msg),
            _ => FailureKind::Unknown,
        }
    }
}

/// Result type for workflow operations
pub type FlowResult<T> = Result<T, FlowError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_user_rejection() {
        assert_eq!(
            classify("MetaMask Tx Signature: User denied transaction signature."),
            FailureKind::UserRejection
        );
        assert_eq!(
            classify("user rejected the request"),
            FailureKind::UserRejection
        );
    }

    #[test]
    fn classifies_funds_before_generic_revert() {
        assert_eq!(
            classify("execution reverted: insufficient funds for transfer"),
            FailureKind::InsufficientFunds
        );
    }

    #[test]
    fn classifies_slippage() {
        assert_eq!(
            classify("execution reverted: insufficient output amount"),
            FailureKind::Slippage
        );
        assert_eq!(classify("Too little received"), FailureKind::Slippage);
    }

    #[test]
    fn classifies_revert_and_unknown() {
        assert_eq!(classify("execution reverted"), FailureKind::Revert);
        assert_eq!(classify("something exotic"), FailureKind::Unknown);
    }

    #[test]
    fn retryable_errors() {
        assert!(FlowError::Timeout {
            operation: "receipt".into()
        }
        .is_retryable());
        assert!(!FlowError::UserRejected.is_retryable());
    }
}
