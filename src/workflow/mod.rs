//! Workflow state machine and engine
//!
//! A workflow is the unit of work here: one user acquiring one stablecoin
//! action on one chain. The status machine constrains every move; the engine
//! composes the network guard, readiness probe, submitter, receipt watcher
//! and completion recorder around it.

pub mod engine;
pub mod factory;
pub mod probe;
pub mod status;
pub mod strategy;

pub use engine::{AuditSink, NoopAudit, TransactionWorkflow, WorkflowEngine};
pub use factory::{EngineFactory, StartRequest};
pub use probe::{
    AllowanceCheck, NoopCheck, ProbeOutcome, ReadinessCheck, ReadinessProbe, RegistrationCheck,
};
pub use status::{StepKind, WorkflowStatus};
pub use strategy::AcquisitionStrategy;
