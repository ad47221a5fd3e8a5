//! HTTP API for workflow control, health checks, and monitoring

use crate::chain::ChainManager;
use crate::config::{ApiConfig, Settings};
use crate::error::{FlowError, FlowResult};
use crate::quote::QuoteService;
use crate::store::Store;
use crate::tx::{min_amount_out, SLIPPAGE_PRESETS_BPS};
use crate::workflow::{EngineFactory, StartRequest, StepKind, TransactionWorkflow, WorkflowEngine};

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use dashmap::DashMap;
use futures::future::join_all;
use serde::Serialize;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use uuid::Uuid;

/// Live workflow engines indexed by workflow ID
pub struct WorkflowRegistry {
    engines: DashMap<Uuid, Arc<WorkflowEngine>>,
}

impl WorkflowRegistry {
    pub fn new() -> Self {
        Self {
            engines: DashMap::new(),
        }
    }

    pub fn insert(&self, id: Uuid, engine: Arc<WorkflowEngine>) {
        self.engines.insert(id, engine);
    }

    pub fn get(&self, id: Uuid) -> FlowResult<Arc<WorkflowEngine>> {
        self.engines
            .get(&id)
            .map(|e| e.clone())
            .ok_or(FlowError::WorkflowNotFound {
                workflow_id: id.to_string(),
            })
    }

    pub async fn snapshots(&self) -> Vec<TransactionWorkflow> {
        let engines: Vec<_> = self.engines.iter().map(|e| e.value().clone()).collect();
        join_all(engines.iter().map(|e| e.snapshot())).await
    }
}

impl Default for WorkflowRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub store: Arc<Store>,
    pub chain_manager: Arc<ChainManager>,
    pub registry: Arc<WorkflowRegistry>,
    pub factory: Arc<EngineFactory>,
    pub quotes: Arc<QuoteService>,
}

/// Run the HTTP API server
pub async fn run_server(config: ApiConfig, state: AppState) -> FlowResult<()> {
    let app = Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/status", get(get_status))
        .route("/actions", get(list_actions))
        .route("/chains", get(get_chains))
        .route("/stats", get(get_stats))
        .route("/workflows", get(list_workflows).post(start_workflow))
        .route("/workflows/:id", get(get_workflow))
        .route("/workflows/:id/start", post(restart_workflow))
        .route("/workflows/:id/execute", post(execute_workflow))
        .route("/workflows/:id/retry", post(retry_workflow))
        .route("/workflows/:id/switch-network", post(switch_network))
        .route("/quotes/:token", get(get_quote))
        .route("/quotes/min-out", post(compute_min_out))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state);

    let addr = format!("{}:{}", config.host, config.port);
    info!("Starting API server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await.unwrap();
    axum::serve(listener, app).await.unwrap();

    Ok(())
}

fn error_response(e: FlowError) -> (StatusCode, Json<ErrorResponse>) {
    let status = match &e {
        FlowError::WorkflowNotFound { .. } | FlowError::ChainNotFound { .. } => {
            StatusCode::NOT_FOUND
        }
        FlowError::Config(_) | FlowError::PreparedShape(_) => StatusCode::BAD_REQUEST,
        FlowError::InvalidTransition { .. }
        | FlowError::WrongNetwork { .. }
        | FlowError::StepInFlight { .. } => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (
        status,
        Json(ErrorResponse {
            error: e.to_string(),
        }),
    )
}

/// Health check endpoint - basic liveness
async fn health_check() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Readiness check - verify all dependencies
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    let db_ok = state.store.health_check().await.is_ok();

    let chain_health = state.chain_manager.health_check().await;
    let chains_ok = chain_health.iter().all(|(_, healthy)| *healthy);

    let body = ReadinessResponse {
        ready: db_ok && chains_ok,
        database: db_ok,
        chains: chains_ok,
        details: chain_health
            .into_iter()
            .map(|(id, h)| ChainHealth {
                chain_id: id,
                healthy: h,
            })
            .collect(),
    };

    if body.ready {
        (StatusCode::OK, Json(body))
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, Json(body))
    }
}

/// Get daemon status
async fn get_status(State(state): State<AppState>) -> impl IntoResponse {
    let chain_health = state.chain_manager.health_check().await;

    Json(StatusResponse {
        version: env!("CARGO_PKG_VERSION").to_string(),
        instance: state.settings.daemon.instance_id.clone(),
        connected_chains: state.chain_manager.connected_chains(),
        active_workflows: state.registry.snapshots().await.len(),
        chain_status: chain_health
            .into_iter()
            .map(|(id, h)| ChainHealth {
                chain_id: id,
                healthy: h,
            })
            .collect(),
    })
}

/// Configured actions a caller may start workflows for
async fn list_actions(State(state): State<AppState>) -> impl IntoResponse {
    Json(ActionsResponse {
        actions: action_summaries(&state.settings),
    })
}

fn action_summaries(settings: &Settings) -> Vec<ActionSummary> {
    settings
        .actions
        .iter()
        .map(|a| ActionSummary {
            title: a.title.clone(),
            chain: a.chain.clone(),
            chain_id: settings.chains.get(&a.chain).map(|c| c.chain_id),
            kind: a.kind,
            token_out: a.token_out.clone(),
            slippage_bps: a.slippage_bps,
        })
        .collect()
}

/// Get connected chains
async fn get_chains(State(state): State<AppState>) -> impl IntoResponse {
    let chains = state.chain_manager.connected_chains();
    Json(ChainsResponse { chains })
}

/// Completion statistics
async fn get_stats(State(state): State<AppState>) -> impl IntoResponse {
    match state.store.get_stats().await {
        Ok(stats) => (
            StatusCode::OK,
            Json(StatsResponse {
                completions: stats.completions,
                completed_workflows: stats.completed_workflows,
                failed_transitions: stats.failed_transitions,
            }),
        ),
        Err(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(StatsResponse {
                completions: 0,
                completed_workflows: 0,
                failed_transitions: 0,
            }),
        ),
    }
}

async fn list_workflows(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.registry.snapshots().await)
}

/// Create a workflow and run its readiness probe
async fn start_workflow(
    State(state): State<AppState>,
    Json(request): Json<StartRequest>,
) -> impl IntoResponse {
    let engine = match state.factory.build(&request) {
        Ok(engine) => Arc::new(engine),
        Err(e) => return error_response(e).into_response(),
    };

    let id = engine.id().await;
    state.registry.insert(id, engine.clone());

    match engine.start().await {
        Ok(_) => workflow_response(&engine, StatusCode::CREATED)
            .await
            .into_response(),
        Err(e) => error_response(e).into_response(),
    }
}

async fn get_workflow(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    match state.registry.get(id) {
        Ok(engine) => workflow_response(&engine, StatusCode::OK)
            .await
            .into_response(),
        Err(e) => error_response(e).into_response(),
    }
}

/// Re-run the readiness phase, e.g. after a network switch
async fn restart_workflow(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    let engine = match state.registry.get(id) {
        Ok(engine) => engine,
        Err(e) => return error_response(e).into_response(),
    };

    match engine.start().await {
        Ok(_) => workflow_response(&engine, StatusCode::OK)
            .await
            .into_response(),
        Err(e) => error_response(e).into_response(),
    }
}

/// Execute all remaining steps of a workflow
async fn execute_workflow(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    let engine = match state.registry.get(id) {
        Ok(engine) => engine,
        Err(e) => return error_response(e).into_response(),
    };

    match engine.execute().await {
        Ok(_) => workflow_response(&engine, StatusCode::OK)
            .await
            .into_response(),
        // The workflow holds its own error state; the HTTP error carries detail
        Err(e) => error_response(e).into_response(),
    }
}

/// Leave the error state
async fn retry_workflow(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    let engine = match state.registry.get(id) {
        Ok(engine) => engine,
        Err(e) => return error_response(e).into_response(),
    };

    match engine.retry().await {
        Ok(_) => workflow_response(&engine, StatusCode::OK)
            .await
            .into_response(),
        Err(e) => error_response(e).into_response(),
    }
}

/// Request a switch to the workflow's chain
async fn switch_network(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    let engine = match state.registry.get(id) {
        Ok(engine) => engine,
        Err(e) => return error_response(e).into_response(),
    };

    match engine.switch_network().await {
        Ok(switched) => (StatusCode::OK, Json(SwitchResponse { switched })).into_response(),
        Err(e) => error_response(e).into_response(),
    }
}

/// Minimum acceptable swap output for a quoted amount under a slippage
/// tolerance. Callers compute this before requesting a prepared swap.
async fn compute_min_out(
    State(state): State<AppState>,
    Json(request): Json<MinOutRequest>,
) -> impl IntoResponse {
    use ethers::types::U256;

    let quoted = match U256::from_dec_str(&request.quoted_out) {
        Ok(q) => q,
        Err(e) => {
            return error_response(FlowError::Config(format!(
                "bad quoted_out '{}': {}",
                request.quoted_out, e
            )))
            .into_response()
        }
    };

    // Explicit tolerance wins, then the action's configured default
    let slippage_bps = request
        .slippage_bps
        .or_else(|| {
            request
                .action_title
                .as_deref()
                .and_then(|t| state.settings.get_action(t))
                .and_then(|a| a.slippage_bps)
        })
        .unwrap_or(SLIPPAGE_PRESETS_BPS[1]);

    (
        StatusCode::OK,
        Json(MinOutResponse {
            min_amount_out: min_amount_out(quoted, slippage_bps).to_string(),
            slippage_bps,
            presets_bps: SLIPPAGE_PRESETS_BPS.to_vec(),
        }),
    )
        .into_response()
}

/// USD price for a token, with its source
async fn get_quote(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> impl IntoResponse {
    match state.quotes.usd_price(&token).await {
        Ok(quote) => (StatusCode::OK, Json(quote)).into_response(),
        Err(e) => error_response(e).into_response(),
    }
}

async fn workflow_response(
    engine: &Arc<WorkflowEngine>,
    status: StatusCode,
) -> (StatusCode, Json<WorkflowResponse>) {
    (
        status,
        Json(WorkflowResponse {
            workflow: engine.snapshot().await,
            next_step: engine.next_step_kind().await,
        }),
    )
}

// Response types

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

#[derive(Serialize)]
struct ReadinessResponse {
    ready: bool,
    database: bool,
    chains: bool,
    details: Vec<ChainHealth>,
}

#[derive(Serialize)]
struct ChainHealth {
    chain_id: u64,
    healthy: bool,
}

#[derive(Serialize)]
struct StatusResponse {
    version: String,
    instance: String,
    connected_chains: Vec<u64>,
    active_workflows: usize,
    chain_status: Vec<ChainHealth>,
}

#[derive(Serialize)]
struct ChainsResponse {
    chains: Vec<u64>,
}

#[derive(Serialize)]
struct ActionsResponse {
    actions: Vec<ActionSummary>,
}

#[derive(Serialize)]
struct ActionSummary {
    title: String,
    chain: String,
    chain_id: Option<u64>,
    kind: crate::config::ActionKind,
    /// Token the user ends up holding
    token_out: Option<String>,
    slippage_bps: Option<u32>,
}

#[derive(Serialize)]
struct StatsResponse {
    completions: u64,
    completed_workflows: u64,
    failed_transitions: u64,
}

#[derive(Serialize)]
struct WorkflowResponse {
    workflow: TransactionWorkflow,
    next_step: Option<StepKind>,
}

#[derive(Serialize)]
struct SwitchResponse {
    switched: bool,
}

#[derive(serde::Deserialize)]
struct MinOutRequest {
    /// Quoted output amount in raw token units (decimal string)
    quoted_out: String,
    slippage_bps: Option<u32>,
    /// Optional action whose configured tolerance serves as the default
    action_title: Option<String>,
}

#[derive(Serialize)]
struct MinOutResponse {
    min_amount_out: String,
    slippage_bps: u32,
    presets_bps: Vec<u32>,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> Settings {
        toml::from_str(
            r#"
            [daemon]
            instance_id = "test-1"
            receipt_poll_interval_ms = 100
            receipt_watch_timeout_secs = 1
            switch_settle_delay_ms = 1
            fallback_gas_limit = 300000
            health_check_interval_secs = 30

            [database]
            url = "postgres://localhost/test"
            max_connections = 1
            min_connections = 1

            [api]
            host = "127.0.0.1"
            port = 0

            [metrics]
            enabled = false
            port = 0

            [backend]
            base_url = "http://localhost"
            request_timeout_secs = 1
            degrade_to_success_on_not_found = true

            [quotes]
            coingecko_url = "http://localhost"
            cache_ttl_secs = 1

            [quotes.fallback_rates_usd]

            [wallet]

            [chains.celo]
            chain_id = 42220
            name = "Celo"
            rpc_urls = ["http://localhost"]
            confirmation_blocks = 1
            gas_price_strategy = "eip1559"
            max_gas_price_gwei = 100
            enabled = true

            [[actions]]
            title = "Get cUSD on Celo"
            chain = "celo"
            kind = "approve-then-swap"
            token_in = "0x471EcE3750Da237f93B8E339c536989b8978a438"
            token_out = "0x765DE816845861e75A25fCA122bb6898B8B1282a"
            spender = "0x0000000000001fF3684f28c67538d4D072C22734"
            slippage_bps = 50
            "#,
        )
        .unwrap()
    }

    #[test]
    fn action_listing_carries_acquired_token_and_chain() {
        let summaries = action_summaries(&settings());
        assert_eq!(summaries.len(), 1);
        assert_eq!(
            summaries[0].token_out.as_deref(),
            Some("0x765DE816845861e75A25fCA122bb6898B8B1282a")
        );
        assert_eq!(summaries[0].chain_id, Some(42220));
        assert_eq!(summaries[0].slippage_bps, Some(50));
    }
}
