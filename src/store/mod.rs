//! Durable local state with PostgreSQL
//!
//! Holds:
//! - The shadow copy of completion records (fail-open recording)
//! - A workflow audit trail of status transitions

mod manager;

pub use manager::{CompletionStats, Store};
