//! Completion recorder: persists the durable fact that a user finished an
//! acquisition action.
//!
//! Recording is best-effort and fail-open by policy: missing backend seed
//! data (404 on action lookup) or a dead backend must never strand a user
//! whose on-chain work already succeeded. The local shadow store keeps the
//! proof in those cases.

use crate::error::{FlowError, FlowResult};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Durable fact of one completed action
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionRecord {
    /// Wallet address of the user
    pub user: String,
    pub action_title: String,
    pub tx_hash: String,
    pub chain_id: u64,
    pub completed_at: DateTime<Utc>,
}

/// How the recorder resolved a completion
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionOutcome {
    /// Backend acknowledged the completion
    Recorded,
    /// Action not seeded in the backend (404); completed anyway by policy
    SkippedNotSeeded,
    /// Backend unreachable or erroring; proof kept in the shadow store
    RecordedLocally,
}

/// Named fail-open policy (spelled out so tests can assert it deliberately)
#[derive(Debug, Clone, Copy)]
pub struct CompletionPolicy {
    pub degrade_to_success_on_not_found: bool,
}

impl Default for CompletionPolicy {
    fn default() -> Self {
        Self {
            degrade_to_success_on_not_found: true,
        }
    }
}

/// Internal actions backend (REST)
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ActionBackend: Send + Sync {
    /// Resolve an action title to its backend id. `Ok(None)` means the
    /// backend answered 404, a recognized outcome rather than an error.
    async fn find_action_by_title(&self, title: &str) -> FlowResult<Option<String>>;

    async fn record_completion(
        &self,
        action_id: &str,
        record: &CompletionRecord,
    ) -> FlowResult<()>;
}

/// Durable local mirror of completion records
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ShadowStore: Send + Sync {
    async fn save_completion(&self, record: &CompletionRecord) -> FlowResult<()>;
}

pub struct CompletionRecorder {
    backend: Arc<dyn ActionBackend>,
    shadow: Arc<dyn ShadowStore>,
    policy: CompletionPolicy,
}

impl CompletionRecorder {
    pub fn new(
        backend: Arc<dyn ActionBackend>,
        shadow: Arc<dyn ShadowStore>,
        policy: CompletionPolicy,
    ) -> Self {
        Self {
            backend,
            shadow,
            policy,
        }
    }

    /// Record a completion. Every return of `Ok(_)` means the workflow may
    /// resolve `Completed`; only a disabled fail-open policy can surface a
    /// not-seeded action as an error.
    pub async fn record(&self, record: &CompletionRecord) -> FlowResult<CompletionOutcome> {
        // The shadow copy is written first so no later failure can lose the proof
        if let Err(e) = self.shadow.save_completion(record).await {
            warn!("Shadow store write failed: {}", e);
        }

        let action_id = match self.backend.find_action_by_title(&record.action_title).await {
            Ok(Some(id)) => id,
            Ok(None) => {
                if self.policy.degrade_to_success_on_not_found {
                    info!(
                        "Action '{}' not seeded in backend; completing anyway",
                        record.action_title
                    );
                    crate::metrics::record_completion_degraded();
                    return Ok(CompletionOutcome::SkippedNotSeeded);
                }
                return Err(FlowError::Backend {
                    status: 404,
                    message: format!("action '{}' not found", record.action_title),
                });
            }
            Err(e) => {
                warn!(
                    "Action lookup failed for '{}', keeping local proof: {}",
                    record.action_title, e
                );
                crate::metrics::record_completion_local();
                return Ok(CompletionOutcome::RecordedLocally);
            }
        };

        match self.backend.record_completion(&action_id, record).await {
            Ok(()) => {
                info!(
                    "Completion recorded for {} / '{}'",
                    record.user, record.action_title
                );
                Ok(CompletionOutcome::Recorded)
            }
            Err(e) => {
                warn!("Completion POST failed, keeping local proof: {}", e);
                crate::metrics::record_completion_local();
                Ok(CompletionOutcome::RecordedLocally)
            }
        }
    }
}

/// REST client for the internal actions backend
pub struct HttpActionBackend {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Serialize)]
struct ByTitleRequest<'a> {
    title: &'a str,
}

#[derive(Deserialize)]
struct ByTitleResponse {
    id: String,
}

#[derive(Serialize)]
struct CompleteRequest<'a> {
    #[serde(rename = "actionId")]
    action_id: &'a str,
    #[serde(rename = "userId")]
    user_id: &'a str,
    proof: CompletionProof<'a>,
}

#[derive(Serialize)]
struct CompletionProof<'a> {
    #[serde(rename = "transactionHash")]
    transaction_hash: &'a str,
    #[serde(rename = "chainId")]
    chain_id: u64,
    timestamp: DateTime<Utc>,
}

impl HttpActionBackend {
    pub fn new(base_url: String, request_timeout: Duration) -> FlowResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| FlowError::Internal(e.to_string()))?;
        Ok(Self { client, base_url })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }
}

#[async_trait]
impl ActionBackend for HttpActionBackend {
    async fn find_action_by_title(&self, title: &str) -> FlowResult<Option<String>> {
        let resp = self
            .client
            .post(self.url("/api/actions/by-title"))
            .json(&ByTitleRequest { title })
            .send()
            .await
            .map_err(|e| FlowError::Backend {
                status: 0,
                message: e.to_string(),
            })?;

        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !resp.status().is_success() {
            return Err(FlowError::Backend {
                status: resp.status().as_u16(),
                message: resp.text().await.unwrap_or_default(),
            });
        }

        let body: ByTitleResponse = resp.json().await.map_err(|e| FlowError::Backend {
            status: 0,
            message: format!("bad by-title response: {}", e),
        })?;
        Ok(Some(body.id))
    }

    async fn record_completion(
        &self,
        action_id: &str,
        record: &CompletionRecord,
    ) -> FlowResult<()> {
        let resp = self
            .client
            .post(self.url("/api/actions/complete"))
            .json(&CompleteRequest {
                action_id,
                user_id: &record.user,
                proof: CompletionProof {
                    transaction_hash: &record.tx_hash,
                    chain_id: record.chain_id,
                    timestamp: record.completed_at,
                },
            })
            .send()
            .await
            .map_err(|e| FlowError::Backend {
                status: 0,
                message: e.to_string(),
            })?;

        if !resp.status().is_success() {
            return Err(FlowError::Backend {
                status: resp.status().as_u16(),
                message: resp.text().await.unwrap_or_default(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> CompletionRecord {
        CompletionRecord {
            user: "0xabc".into(),
            action_title: "Get cUSD on Celo".into(),
            tx_hash: "0xdeadbeef".into(),
            chain_id: 42220,
            completed_at: Utc::now(),
        }
    }

    fn quiet_shadow() -> MockShadowStore {
        let mut shadow = MockShadowStore::new();
        shadow.expect_save_completion().returning(|_| Ok(()));
        shadow
    }

    #[tokio::test]
    async fn not_found_completes_under_fail_open_policy() {
        let mut backend = MockActionBackend::new();
        backend
            .expect_find_action_by_title()
            .returning(|_| Ok(None));

        let recorder = CompletionRecorder::new(
            Arc::new(backend),
            Arc::new(quiet_shadow()),
            CompletionPolicy::default(),
        );
        let outcome = recorder.record(&record()).await.unwrap();
        assert_eq!(outcome, CompletionOutcome::SkippedNotSeeded);
    }

    #[tokio::test]
    async fn not_found_errors_when_policy_disabled() {
        let mut backend = MockActionBackend::new();
        backend
            .expect_find_action_by_title()
            .returning(|_| Ok(None));

        let recorder = CompletionRecorder::new(
            Arc::new(backend),
            Arc::new(quiet_shadow()),
            CompletionPolicy {
                degrade_to_success_on_not_found: false,
            },
        );
        let err = recorder.record(&record()).await.unwrap_err();
        assert!(matches!(err, FlowError::Backend { status: 404, .. }));
    }

    #[tokio::test]
    async fn backend_failure_resolves_locally() {
        let mut backend = MockActionBackend::new();
        backend.expect_find_action_by_title().returning(|_| {
            Err(FlowError::Backend {
                status: 500,
                message: "db unavailable".into(),
            })
        });

        let mut shadow = MockShadowStore::new();
        shadow
            .expect_save_completion()
            .times(1)
            .returning(|_| Ok(()));

        let recorder = CompletionRecorder::new(
            Arc::new(backend),
            Arc::new(shadow),
            CompletionPolicy::default(),
        );
        let outcome = recorder.record(&record()).await.unwrap();
        assert_eq!(outcome, CompletionOutcome::RecordedLocally);
    }

    #[tokio::test]
    async fn completion_post_failure_still_resolves() {
        let mut backend = MockActionBackend::new();
        backend
            .expect_find_action_by_title()
            .returning(|_| Ok(Some("action-1".into())));
        backend.expect_record_completion().returning(|_, _| {
            Err(FlowError::Backend {
                status: 503,
                message: "overloaded".into(),
            })
        });

        let recorder = CompletionRecorder::new(
            Arc::new(backend),
            Arc::new(quiet_shadow()),
            CompletionPolicy::default(),
        );
        let outcome = recorder.record(&record()).await.unwrap();
        assert_eq!(outcome, CompletionOutcome::RecordedLocally);
    }

    #[tokio::test]
    async fn happy_path_records_remotely() {
        let mut backend = MockActionBackend::new();
        backend
            .expect_find_action_by_title()
            .returning(|_| Ok(Some("action-1".into())));
        backend
            .expect_record_completion()
            .times(1)
            .returning(|_, _| Ok(()));

        let recorder = CompletionRecorder::new(
            Arc::new(backend),
            Arc::new(quiet_shadow()),
            CompletionPolicy::default(),
        );
        let outcome = recorder.record(&record()).await.unwrap();
        assert_eq!(outcome, CompletionOutcome::Recorded);
    }

    #[tokio::test]
    async fn shadow_write_failure_does_not_block() {
        let mut backend = MockActionBackend::new();
        backend
            .expect_find_action_by_title()
            .returning(|_| Ok(None));

        let mut shadow = MockShadowStore::new();
        shadow
            .expect_save_completion()
            .returning(|_| Err(FlowError::Internal("disk full".into())));

        let recorder = CompletionRecorder::new(
            Arc::new(backend),
            Arc::new(shadow),
            CompletionPolicy::default(),
        );
        assert!(recorder.record(&record()).await.is_ok());
    }
}
