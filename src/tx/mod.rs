//! Transaction building and submission for workflow steps

pub mod gas;
pub mod prepared;
pub mod submitter;

pub use gas::GasPolicy;
pub use prepared::{CallData, PreparedTransaction};
pub use submitter::{
    encode_approve, min_amount_out, StepSubmitter, TransactionSubmitter, SLIPPAGE_PRESETS_BPS,
};
