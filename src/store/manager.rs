//! PostgreSQL store for completion records and the workflow audit trail

use crate::config::DatabaseConfig;
use crate::error::{FlowError, FlowResult};
use crate::recorder::{CompletionRecord, ShadowStore};
use crate::workflow::{AuditSink, TransactionWorkflow, WorkflowStatus};

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Row;
use tracing::{debug, info};
use uuid::Uuid;

pub struct Store {
    pool: PgPool,
}

impl Store {
    pub async fn new(config: &DatabaseConfig) -> FlowResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .connect(&config.url)
            .await
            .map_err(FlowError::Database)?;

        Ok(Self { pool })
    }

    /// Run database migrations
    pub async fn run_migrations(&self) -> FlowResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS completion_records (
                id BIGSERIAL PRIMARY KEY,
                user_address VARCHAR(66) NOT NULL,
                action_title VARCHAR(255) NOT NULL,
                tx_hash VARCHAR(66) NOT NULL,
                chain_id BIGINT NOT NULL,
                completed_at TIMESTAMPTZ NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // One completion per (user, action) is meaningful; re-recordings are no-ops
        sqlx::query(
            r#"
            CREATE UNIQUE INDEX IF NOT EXISTS idx_completions_user_action
            ON completion_records (user_address, action_title)
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS workflow_audit (
                id BIGSERIAL PRIMARY KEY,
                workflow_id UUID NOT NULL,
                user_address VARCHAR(66) NOT NULL,
                action_title VARCHAR(255) NOT NULL,
                chain_id BIGINT NOT NULL,
                status VARCHAR(32) NOT NULL,
                error_message TEXT,
                tx_hash VARCHAR(66),
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_audit_workflow
            ON workflow_audit (workflow_id, created_at)
            "#,
        )
        .execute(&self.pool)
        .await?;

        info!("Database migrations complete");
        Ok(())
    }

    /// Health check
    pub async fn health_check(&self) -> FlowResult<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(FlowError::Database)?;
        Ok(())
    }

    /// Append one status transition to the audit trail
    pub async fn record_transition(
        &self,
        workflow_id: Uuid,
        user: &str,
        action_title: &str,
        chain_id: u64,
        status: &WorkflowStatus,
        tx_hash: Option<&str>,
    ) -> FlowResult<()> {
        let error_message = match status {
            WorkflowStatus::Failed { message } => Some(message.as_str()),
            _ => None,
        };

        sqlx::query(
            r#"
            INSERT INTO workflow_audit
                (workflow_id, user_address, action_title, chain_id, status, error_message, tx_hash)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(workflow_id)
        .bind(user)
        .bind(action_title)
        .bind(chain_id as i64)
        .bind(status.name())
        .bind(error_message)
        .bind(tx_hash)
        .execute(&self.pool)
        .await?;

        debug!("Audit: workflow {} -> {}", workflow_id, status.name());
        Ok(())
    }

    /// Whether a completion already exists for (user, action)
    pub async fn has_completion(&self, user: &str, action_title: &str) -> FlowResult<bool> {
        let row = sqlx::query(
            "SELECT 1 FROM completion_records WHERE user_address = $1 AND action_title = $2",
        )
        .bind(user)
        .bind(action_title)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.is_some())
    }

    /// Completion counts for the status endpoint
    pub async fn get_stats(&self) -> FlowResult<CompletionStats> {
        let row = sqlx::query(
            r#"
            SELECT
                (SELECT COUNT(*) FROM completion_records) as completions,
                (SELECT COUNT(*) FROM workflow_audit WHERE status = 'completed') as completed_workflows,
                (SELECT COUNT(*) FROM workflow_audit WHERE status = 'error') as failed_transitions
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(CompletionStats {
            completions: row.get::<i64, _>("completions") as u64,
            completed_workflows: row.get::<i64, _>("completed_workflows") as u64,
            failed_transitions: row.get::<i64, _>("failed_transitions") as u64,
        })
    }
}

#[async_trait]
impl ShadowStore for Store {
    async fn save_completion(&self, record: &CompletionRecord) -> FlowResult<()> {
        sqlx::query(
            r#"
            INSERT INTO completion_records
                (user_address, action_title, tx_hash, chain_id, completed_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (user_address, action_title) DO NOTHING
            "#,
        )
        .bind(&record.user)
        .bind(&record.action_title)
        .bind(&record.tx_hash)
        .bind(record.chain_id as i64)
        .bind(record.completed_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl AuditSink for Store {
    async fn record(&self, workflow: &TransactionWorkflow) -> FlowResult<()> {
        self.record_transition(
            workflow.id,
            &workflow.user,
            &workflow.action_title,
            workflow.chain_id,
            &workflow.status,
            workflow.tx_hash.as_deref(),
        )
        .await
    }
}

/// Completion statistics
#[derive(Debug, Clone)]
pub struct CompletionStats {
    pub completions: u64,
    pub completed_workflows: u64,
    pub failed_transitions: u64,
}
