//! Acquisition strategies
//!
//! One engine drives every flow; the strategy variant captures what differs
//! between them: which steps run, in what order, and which first step the
//! readiness probe may strike out.

use super::status::StepKind;
use crate::tx::{encode_approve, CallData, PreparedTransaction};

use ethers::types::{Address, U256};

/// Per-flow plan executed by the workflow engine
#[derive(Debug, Clone)]
pub enum AcquisitionStrategy {
    /// ERC-20 approval for the router, then the prepared swap
    ApproveThenSwap {
        token_in: Address,
        spender: Address,
        amount_in: U256,
        swap: PreparedTransaction,
    },
    /// Prepared swap with no approval step (native token in, or pre-approved)
    DirectSwap { swap: PreparedTransaction },
    /// Single registry write; completion recording is the whole second half
    RegisterThenComplete { register: CallData },
}

impl AcquisitionStrategy {
    /// Ordered steps to submit. `first_step_satisfied` reflects the probe
    /// outcome: a satisfied allowance or registration drops the first step.
    pub fn steps(&self, first_step_satisfied: bool) -> Vec<(StepKind, CallData)> {
        match self {
            AcquisitionStrategy::ApproveThenSwap {
                token_in,
                spender,
                amount_in,
                swap,
            } => {
                let mut steps = Vec::new();
                if !first_step_satisfied {
                    // A 0x-style quote names its own spender
                    let spender = swap.allowance_target().unwrap_or(*spender);
                    steps.push((
                        StepKind::Approve,
                        CallData {
                            to: *token_in,
                            data: encode_approve(spender, *amount_in),
                            value: U256::zero(),
                        },
                    ));
                }
                steps.extend(swap.calls().into_iter().map(|c| (StepKind::Swap, c)));
                steps
            }
            AcquisitionStrategy::DirectSwap { swap } => {
                swap.calls().into_iter().map(|c| (StepKind::Swap, c)).collect()
            }
            AcquisitionStrategy::RegisterThenComplete { register } => {
                if first_step_satisfied {
                    Vec::new()
                } else {
                    vec![(StepKind::Register, register.clone())]
                }
            }
        }
    }

    /// The step a satisfied probe (or a confirmed receipt) strikes out
    pub fn strikeable_step(&self) -> Option<StepKind> {
        match self {
            AcquisitionStrategy::ApproveThenSwap { .. } => Some(StepKind::Approve),
            AcquisitionStrategy::DirectSwap { .. } => None,
            AcquisitionStrategy::RegisterThenComplete { .. } => Some(StepKind::Register),
        }
    }

    /// Whether a satisfied probe leaves nothing to submit at all
    pub fn skips_entirely_when_satisfied(&self) -> bool {
        matches!(self, AcquisitionStrategy::RegisterThenComplete { .. })
    }
}
