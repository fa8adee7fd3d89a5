use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info};

use crate::exec::ExecError;
use crate::llm::models::{ChartSpec, InsightText};
use crate::llm::GenerationError;
use crate::pipeline::{PipelineError, QueryOutcome};
use crate::record::QueryRecord;
use crate::source::SourceError;
use crate::web::state::AppState;

/// Owner identity is an opaque identifier supplied by whatever sits in front
/// of this service; authentication itself lives outside.
const USER_HEADER: &str = "x-user-id";
const DEFAULT_USER: &str = "local";

fn owner(headers: &HeaderMap) -> String {
    headers
        .get(USER_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or(DEFAULT_USER)
        .to_string()
}

/// Maps pipeline failures onto the response surface. Domain errors travel
/// with their specific reason; store/internal failures are logged and
/// surfaced opaquely.
fn error_response(err: PipelineError) -> (StatusCode, String) {
    match &err {
        PipelineError::Source(SourceError::Unavailable(_)) => {
            (StatusCode::NOT_FOUND, err.to_string())
        }
        PipelineError::Source(SourceError::Empty) => (StatusCode::BAD_REQUEST, err.to_string()),
        PipelineError::Validation(_) => (StatusCode::BAD_REQUEST, err.to_string()),
        PipelineError::Execution(ExecError::Timeout(_)) => {
            (StatusCode::GATEWAY_TIMEOUT, err.to_string())
        }
        PipelineError::Execution(_) => (StatusCode::BAD_REQUEST, err.to_string()),
        PipelineError::Generation(GenerationError::Config(_)) => {
            error!("{}", err);
            (StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
        }
        PipelineError::Generation(_) => (StatusCode::BAD_GATEWAY, err.to_string()),
        PipelineError::RecordNotFound(_) => (StatusCode::NOT_FOUND, err.to_string()),
        PipelineError::RecordNotEligible { .. } => (StatusCode::BAD_REQUEST, err.to_string()),
        PipelineError::Store(_) | PipelineError::Internal(_) => {
            error!("{}", err);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal error".to_string(),
            )
        }
    }
}

fn default_execute() -> bool {
    true
}

#[derive(Debug, Deserialize)]
pub struct AskQueryRequest {
    /// Locator of the tabular source (CSV path).
    pub source: String,
    pub question: String,
    /// When false, generate and validate only; the record stays pending.
    #[serde(default = "default_execute")]
    pub execute: bool,
}

#[derive(Debug, Deserialize)]
pub struct HistoryParams {
    #[serde(default)]
    pub skip: usize,
    #[serde(default = "default_limit")]
    pub limit: usize,
    pub source: Option<String>,
}

fn default_limit() -> usize {
    20
}

#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub queries: Vec<QueryRecord>,
    pub total: i64,
    pub page: usize,
    pub page_size: usize,
}

#[derive(Debug, Serialize)]
pub struct ChartResponse {
    pub query_id: i64,
    pub chart: ChartSpec,
}

#[derive(Debug, Serialize)]
pub struct InsightResponse {
    pub query_id: i64,
    pub insight: InsightText,
}

#[derive(Debug, Serialize)]
pub struct SystemStatus {
    pub version: String,
    pub uptime_seconds: i64,
    pub query_count: i64,
}

pub async fn ask_query(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(payload): Json<AskQueryRequest>,
) -> Result<(StatusCode, Json<QueryOutcome>), (StatusCode, String)> {
    let user = owner(&headers);
    info!(user, question = %payload.question, "ask-query");

    let outcome = state
        .pipeline
        .run_question(&user, &payload.source, &payload.question, payload.execute)
        .await
        .map_err(error_response)?;

    Ok((StatusCode::CREATED, Json(outcome)))
}

pub async fn query_history(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(params): Query<HistoryParams>,
) -> Result<Json<HistoryResponse>, (StatusCode, String)> {
    let user = owner(&headers);
    let store = state.pipeline.store();

    let limit = params.limit.clamp(1, 100);
    let source = params.source.as_deref();
    let total = store
        .count(&user, source)
        .map_err(|e| error_response(e.into()))?;
    let queries = store
        .list(&user, source, params.skip, limit)
        .map_err(|e| error_response(e.into()))?;

    let page = params.skip / limit + 1;

    Ok(Json(HistoryResponse {
        queries,
        total,
        page,
        page_size: limit,
    }))
}

pub async fn query_detail(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Result<Json<QueryRecord>, (StatusCode, String)> {
    let user = owner(&headers);
    let record = state
        .pipeline
        .store()
        .get(id, &user)
        .map_err(|e| error_response(e.into()))?
        .ok_or_else(|| error_response(PipelineError::RecordNotFound(id)))?;
    Ok(Json(record))
}

pub async fn rerun_query(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Result<(StatusCode, Json<QueryOutcome>), (StatusCode, String)> {
    let user = owner(&headers);
    info!(user, id, "rerun-query");

    let outcome = state
        .pipeline
        .rerun(&user, id)
        .await
        .map_err(error_response)?;
    Ok((StatusCode::CREATED, Json(outcome)))
}

pub async fn delete_query(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Result<StatusCode, (StatusCode, String)> {
    let user = owner(&headers);
    let deleted = state
        .pipeline
        .store()
        .delete(id, &user)
        .map_err(|e| error_response(e.into()))?;

    if deleted {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(error_response(PipelineError::RecordNotFound(id)))
    }
}

pub async fn generate_chart(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Result<Json<ChartResponse>, (StatusCode, String)> {
    let user = owner(&headers);
    info!(user, id, "generate-chart");

    let chart = state
        .pipeline
        .chart(&user, id)
        .await
        .map_err(error_response)?;
    Ok(Json(ChartResponse {
        query_id: id,
        chart,
    }))
}

pub async fn generate_insight(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Result<Json<InsightResponse>, (StatusCode, String)> {
    let user = owner(&headers);
    info!(user, id, "generate-insight");

    let insight = state
        .pipeline
        .insight(&user, id)
        .await
        .map_err(error_response)?;
    Ok(Json(InsightResponse {
        query_id: id,
        insight,
    }))
}

pub async fn system_status(
    State(state): State<Arc<AppState>>,
) -> Result<Json<SystemStatus>, (StatusCode, String)> {
    let uptime = chrono::Utc::now()
        .signed_duration_since(state.startup_time)
        .num_seconds();
    let query_count = state
        .pipeline
        .store()
        .count_all()
        .map_err(|e| error_response(e.into()))?;

    Ok(Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: uptime,
        query_count,
    }))
}
