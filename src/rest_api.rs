//! Operator REST surface.
//!
//! A thin router over the communication service: execute, mode
//! management, evidence queries, and statistics. The host process mounts
//! this router; everything of substance happens inside the service
//! pipeline. JSON bodies use the gateway's wire formats; timestamps are
//! ISO-8601 with a trailing `Z`.

use crate::domain_types::EvidenceId;
use crate::evidence::store::EvidenceFilter;
use crate::models::{ConnectorKind, ExecutionPhase, NetworkMode, ParamMap, RequestStatus};
use crate::service::CommunicationService;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::{get, post};
use axum::Router;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use std::str::FromStr;

type ApiError = (StatusCode, Json<Value>);
type ApiResult = Result<Json<Value>, ApiError>;

/// Builds the gateway router over a service instance.
#[must_use]
pub fn router(service: CommunicationService) -> Router {
    Router::new()
        .route("/api/v1/health", get(health))
        .route("/api/v1/execute", post(execute))
        .route("/api/v1/connectors", get(connectors))
        .route("/api/v1/mode", get(mode_info).put(set_mode))
        .route("/api/v1/mode/history", get(mode_history))
        .route("/api/v1/evidence", get(search_evidence))
        .route("/api/v1/evidence/{id}", get(get_evidence))
        .route("/api/v1/stats", get(stats))
        .with_state(service)
}

fn internal_error(message: impl std::fmt::Display) -> ApiError {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({"error": message.to_string()})),
    )
}

fn bad_request(message: impl std::fmt::Display) -> ApiError {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({"error": message.to_string()})),
    )
}

async fn health() -> Json<Value> {
    Json(json!({"status": "healthy"}))
}

#[derive(Debug, Deserialize)]
struct ExecuteBody {
    connector_kind: ConnectorKind,
    operation: String,
    #[serde(default)]
    params: ParamMap,
    #[serde(default)]
    context: ParamMap,
    execution_phase: Option<ExecutionPhase>,
    approval_token: Option<String>,
}

async fn execute(
    State(service): State<CommunicationService>,
    Json(body): Json<ExecuteBody>,
) -> ApiResult {
    let response = service
        .execute(
            body.connector_kind,
            &body.operation,
            body.params,
            body.context,
            body.execution_phase.unwrap_or(ExecutionPhase::Execution),
            body.approval_token,
        )
        .await;

    serde_json::to_value(&response)
        .map(Json)
        .map_err(internal_error)
}

async fn connectors(State(service): State<CommunicationService>) -> Json<Value> {
    Json(service.list_connectors())
}

async fn mode_info(State(service): State<CommunicationService>) -> ApiResult {
    let info = service
        .mode_manager()
        .mode_info()
        .await
        .map_err(internal_error)?;
    serde_json::to_value(&info).map(Json).map_err(internal_error)
}

#[derive(Debug, Deserialize)]
struct SetModeBody {
    mode: NetworkMode,
    updated_by: Option<String>,
    reason: Option<String>,
}

async fn set_mode(
    State(service): State<CommunicationService>,
    Json(body): Json<SetModeBody>,
) -> ApiResult {
    let transition = service
        .mode_manager()
        .set_mode(
            body.mode,
            body.updated_by.as_deref(),
            body.reason.as_deref(),
            None,
        )
        .await
        .map_err(internal_error)?;
    serde_json::to_value(&transition)
        .map(Json)
        .map_err(internal_error)
}

#[derive(Debug, Deserialize)]
struct HistoryQuery {
    limit: Option<i64>,
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
}

async fn mode_history(
    State(service): State<CommunicationService>,
    Query(query): Query<HistoryQuery>,
) -> ApiResult {
    let history = service
        .mode_manager()
        .get_history(query.limit.unwrap_or(100), query.start, query.end)
        .await
        .map_err(internal_error)?;
    serde_json::to_value(&history)
        .map(Json)
        .map_err(internal_error)
}

#[derive(Debug, Deserialize)]
struct EvidenceQuery {
    connector_kind: Option<String>,
    operation: Option<String>,
    status: Option<String>,
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
    limit: Option<i64>,
}

async fn search_evidence(
    State(service): State<CommunicationService>,
    Query(query): Query<EvidenceQuery>,
) -> ApiResult {
    let connector_kind = query
        .connector_kind
        .as_deref()
        .map(ConnectorKind::from_str)
        .transpose()
        .map_err(bad_request)?;
    let status = query
        .status
        .as_deref()
        .map(RequestStatus::from_str)
        .transpose()
        .map_err(bad_request)?;

    let filter = EvidenceFilter {
        connector_kind,
        operation: query.operation,
        status,
        start: query.start,
        end: query.end,
    };
    let records = service
        .evidence_logger()
        .search_evidence(&filter, query.limit.unwrap_or(100))
        .await
        .map_err(internal_error)?;

    serde_json::to_value(&records)
        .map(Json)
        .map_err(internal_error)
}

async fn get_evidence(
    State(service): State<CommunicationService>,
    Path(id): Path<String>,
) -> ApiResult {
    let record = service
        .evidence_logger()
        .get_evidence(&EvidenceId::new(id))
        .await
        .map_err(internal_error)?;

    match record {
        Some(record) => serde_json::to_value(&record)
            .map(Json)
            .map_err(internal_error),
        None => Err((
            StatusCode::NOT_FOUND,
            Json(json!({"error": "evidence not found"})),
        )),
    }
}

async fn stats(State(service): State<CommunicationService>) -> ApiResult {
    service.statistics().await.map(Json).map_err(internal_error)
}
