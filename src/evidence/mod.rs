//! Evidence logging for audit and compliance.
//!
//! Every admitted request leaves exactly one evidence row: a redacted
//! request summary, a redacted response summary, the outcome status, and
//! the trust tier assigned at audit time. Summaries whitelist parameter
//! keys and truncate long bodies; full payloads and credentials are never
//! persisted.

pub mod store;

use crate::clock::{iso_z, SharedClock};
use crate::domain_types::EvidenceId;
use crate::models::{
    CommunicationRequest, CommunicationResponse, EvidenceRecord, RequestStatus,
};
use crate::trust::TrustTierClassifier;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use store::{EvidenceFilter, SqliteEvidenceStore, StoreResult};
use tracing::{info, instrument};

/// Parameter keys copied verbatim into the request summary.
const SAFE_PARAM_KEYS: &[&str] = &["url", "query", "feed_url", "to", "channel"];

/// Parameter keys whose values are truncated into the request summary.
const TRUNCATED_PARAM_KEYS: &[&str] = &["body", "content", "message"];

/// Response metadata keys copied into the response summary.
const SAFE_METADATA_KEYS: &[&str] = &["content_type", "content_length", "status_code"];

/// Maximum characters of a truncated parameter kept in a summary.
const SUMMARY_BODY_LIMIT: usize = 200;

/// Logger composing summaries, trust classification, and durable storage.
pub struct EvidenceLogger {
    store: Arc<SqliteEvidenceStore>,
    classifier: Arc<TrustTierClassifier>,
    clock: SharedClock,
}

impl EvidenceLogger {
    /// Creates a logger over the given store and classifier.
    #[must_use]
    pub fn new(
        store: Arc<SqliteEvidenceStore>,
        classifier: Arc<TrustTierClassifier>,
        clock: SharedClock,
    ) -> Self {
        Self {
            store,
            classifier,
            clock,
        }
    }

    /// The trust-tier classifier backing this logger.
    #[must_use]
    pub fn classifier(&self) -> &Arc<TrustTierClassifier> {
        &self.classifier
    }

    /// Records one request/response pair, returning the evidence id.
    ///
    /// Writes are upserts by request id: a pipeline may log a denial and a
    /// later stage may refine the same request's outcome without producing
    /// a second row.
    ///
    /// # Errors
    ///
    /// Returns an error if the durable write fails.
    #[instrument(skip(self, request, response), fields(request_id = %request.id))]
    pub async fn log_operation(
        &self,
        request: &CommunicationRequest,
        response: &CommunicationResponse,
    ) -> StoreResult<EvidenceId> {
        let evidence_id = EvidenceId::generate();

        let subject_url = request
            .str_param("url")
            .or_else(|| request.str_param("query"))
            .unwrap_or_default();
        let trust_tier = self.classifier.classify(subject_url, request.connector_kind);

        let record = EvidenceRecord {
            id: evidence_id.clone(),
            request_id: request.id.clone(),
            connector_kind: request.connector_kind,
            operation: request.operation.clone(),
            request_summary: build_request_summary(request),
            response_summary: Some(build_response_summary(response)),
            status: response.status,
            trust_tier,
            metadata: json!({
                "risk_level": request.risk_level.as_str(),
                "context": Value::Object(request.context.clone()),
            }),
            created_at: self.clock.now(),
        };

        self.store.save(&record).await?;
        info!(
            evidence_id = %evidence_id,
            trust_tier = %trust_tier,
            status = %response.status,
            "Logged evidence"
        );
        Ok(evidence_id)
    }

    /// Fetches evidence by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the lookup fails.
    pub async fn get_evidence(&self, id: &EvidenceId) -> StoreResult<Option<EvidenceRecord>> {
        self.store.get(id).await
    }

    /// Fetches the evidence for a request.
    ///
    /// # Errors
    ///
    /// Returns an error if the lookup fails.
    pub async fn get_request_evidence(
        &self,
        request_id: &crate::domain_types::RequestId,
    ) -> StoreResult<Option<EvidenceRecord>> {
        self.store.get_by_request(request_id).await
    }

    /// Searches evidence records, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn search_evidence(
        &self,
        filter: &EvidenceFilter,
        limit: i64,
    ) -> StoreResult<Vec<EvidenceRecord>> {
        self.store.search(filter, limit).await
    }

    /// Total number of logged requests.
    ///
    /// # Errors
    ///
    /// Returns an error if the count fails.
    pub async fn total_requests(&self) -> StoreResult<i64> {
        self.store.count().await
    }

    /// Percentage of logged requests that succeeded (0–100).
    ///
    /// # Errors
    ///
    /// Returns an error if the counts fail.
    pub async fn success_rate(&self) -> StoreResult<f64> {
        let total = self.store.count().await?;
        if total == 0 {
            return Ok(0.0);
        }
        let successful = self.store.count_by_status(RequestStatus::Success).await?;
        Ok(successful as f64 / total as f64 * 100.0)
    }

    /// Request counts per connector kind.
    ///
    /// # Errors
    ///
    /// Returns an error if the aggregation fails.
    pub async fn stats_by_connector(&self) -> StoreResult<HashMap<String, i64>> {
        self.store.stats_by_connector().await
    }

    /// Exports evidence in the given window to a JSON file.
    ///
    /// # Errors
    ///
    /// Returns an error if the search or write fails.
    pub async fn export_evidence(
        &self,
        start: Option<chrono::DateTime<chrono::Utc>>,
        end: Option<chrono::DateTime<chrono::Utc>>,
        path: &Path,
    ) -> StoreResult<PathBuf> {
        self.store.export(start, end, path).await
    }

    /// Deletes evidence older than `days` days.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails.
    pub async fn purge_older_than(&self, days: i64) -> StoreResult<u64> {
        self.store.purge_older_than(days, self.clock.now()).await
    }
}

/// Builds the redacted request summary: whitelisted parameters only, long
/// bodies truncated, everything else dropped.
fn build_request_summary(request: &CommunicationRequest) -> Value {
    let mut safe_params = serde_json::Map::new();

    for (key, value) in &request.params {
        if SAFE_PARAM_KEYS.contains(&key.as_str()) {
            safe_params.insert(key.clone(), value.clone());
        } else if TRUNCATED_PARAM_KEYS.contains(&key.as_str()) {
            let rendered = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            let truncated: String = if rendered.chars().count() > SUMMARY_BODY_LIMIT {
                let kept: String = rendered.chars().take(SUMMARY_BODY_LIMIT).collect();
                format!("{kept}...")
            } else {
                rendered
            };
            safe_params.insert(key.clone(), Value::String(truncated));
        }
    }

    json!({
        "connector_kind": request.connector_kind.as_str(),
        "operation": request.operation,
        "timestamp": iso_z(request.created_at),
        "params": Value::Object(safe_params),
    })
}

/// Builds the redacted response summary: status, error, whitelisted
/// metadata, and payload shape, never the payload itself.
fn build_response_summary(response: &CommunicationResponse) -> Value {
    let mut summary = serde_json::Map::new();
    summary.insert(
        "status".to_string(),
        Value::String(response.status.as_str().to_string()),
    );
    summary.insert(
        "timestamp".to_string(),
        Value::String(iso_z(response.created_at)),
    );

    if let Some(error) = &response.error {
        summary.insert("error".to_string(), Value::String(error.clone()));
    }

    if !response.metadata.is_empty() {
        let metadata: serde_json::Map<String, Value> = response
            .metadata
            .iter()
            .filter(|(key, _)| SAFE_METADATA_KEYS.contains(&key.as_str()))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        if !metadata.is_empty() {
            summary.insert("metadata".to_string(), Value::Object(metadata));
        }
    }

    if let Some(data) = &response.data {
        summary.insert("has_data".to_string(), Value::Bool(true));
        summary.insert(
            "data_type".to_string(),
            Value::String(json_type_name(data).to_string()),
        );
    }

    Value::Object(summary)
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::manual_clock;
    use crate::database::DatabaseConnection;
    use crate::domain_types::ApprovalToken;
    use crate::models::{ConnectorKind, ExecutionPhase, ParamMap, RiskLevel, TrustTier};
    use chrono::TimeZone;
    use serde_json::json;

    async fn logger() -> EvidenceLogger {
        let connection = DatabaseConnection::in_memory().await.unwrap();
        let start = chrono::Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        let clock: SharedClock = manual_clock(start);
        EvidenceLogger::new(
            Arc::new(SqliteEvidenceStore::new(connection)),
            Arc::new(TrustTierClassifier::new()),
            clock,
        )
    }

    fn request(kind: ConnectorKind, operation: &str, params: Value) -> CommunicationRequest {
        let params = match params {
            Value::Object(map) => map,
            _ => ParamMap::new(),
        };
        let mut request = CommunicationRequest::new(
            kind,
            operation,
            params,
            ParamMap::new(),
            ExecutionPhase::Execution,
            ApprovalToken::from_raw(Some("tok-1".to_string())),
            chrono::Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap(),
        );
        request.risk_level = RiskLevel::Low;
        request
    }

    fn response(request: &CommunicationRequest, status: RequestStatus) -> CommunicationResponse {
        CommunicationResponse {
            request_id: request.id.clone(),
            status,
            data: Some(json!({"content": "hello"})),
            metadata: ParamMap::new(),
            evidence_id: None,
            error: None,
            created_at: chrono::Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 1).unwrap(),
        }
    }

    #[tokio::test]
    async fn test_should_whitelist_params_when_building_request_summary() {
        let logger = logger().await;
        let request = request(
            ConnectorKind::EmailSmtp,
            "send",
            json!({
                "to": "a@b.c",
                "subject": "secret subject",
                "body": "b".repeat(300),
                "password": "hunter2",
            }),
        );
        let response = response(&request, RequestStatus::Success);

        let id = logger.log_operation(&request, &response).await.unwrap();
        let record = logger.get_evidence(&id).await.unwrap().unwrap();

        let params = &record.request_summary["params"];
        assert_eq!(params["to"], "a@b.c");
        // Non-whitelisted keys never reach the summary.
        assert!(params.get("subject").is_none());
        assert!(params.get("password").is_none());
        // Long bodies are truncated with an ellipsis.
        let body = params["body"].as_str().unwrap();
        assert_eq!(body.chars().count(), 203);
        assert!(body.ends_with("..."));
    }

    #[tokio::test]
    async fn test_should_omit_payload_when_building_response_summary() {
        let logger = logger().await;
        let request = request(ConnectorKind::WebFetch, "fetch", json!({"url": "https://example.com"}));
        let mut resp = response(&request, RequestStatus::Success);
        resp.metadata.insert("content_type".to_string(), json!("text/html"));
        resp.metadata.insert("internal_debug".to_string(), json!("dropped"));

        let id = logger.log_operation(&request, &resp).await.unwrap();
        let record = logger.get_evidence(&id).await.unwrap().unwrap();

        let summary = record.response_summary.unwrap();
        assert_eq!(summary["status"], "success");
        assert_eq!(summary["has_data"], true);
        assert_eq!(summary["data_type"], "object");
        assert_eq!(summary["metadata"]["content_type"], "text/html");
        assert!(summary["metadata"].get("internal_debug").is_none());
        // The payload itself is never stored.
        assert!(summary.get("data").is_none());
    }

    #[tokio::test]
    async fn test_should_assign_search_result_tier_when_logging_search() {
        let logger = logger().await;
        let request = request(
            ConnectorKind::WebSearch,
            "search",
            json!({"query": "https://www.whitehouse.gov"}),
        );
        let resp = response(&request, RequestStatus::Success);

        let id = logger.log_operation(&request, &resp).await.unwrap();
        let record = logger.get_evidence(&id).await.unwrap().unwrap();
        assert_eq!(record.trust_tier, TrustTier::SearchResult);
    }

    #[tokio::test]
    async fn test_should_classify_fetch_urls_when_logging() {
        let logger = logger().await;
        let request = request(
            ConnectorKind::WebFetch,
            "fetch",
            json!({"url": "https://www.cdc.gov/page"}),
        );
        let resp = response(&request, RequestStatus::Success);

        let id = logger.log_operation(&request, &resp).await.unwrap();
        let record = logger.get_evidence(&id).await.unwrap().unwrap();
        assert_eq!(record.trust_tier, TrustTier::AuthoritativeSource);
    }

    #[tokio::test]
    async fn test_should_compute_success_rate_when_aggregating() {
        let logger = logger().await;
        assert!((logger.success_rate().await.unwrap() - 0.0).abs() < f64::EPSILON);

        for (operation, status) in [
            ("fetch", RequestStatus::Success),
            ("fetch", RequestStatus::Failed),
            ("fetch", RequestStatus::Success),
            ("fetch", RequestStatus::Denied),
        ] {
            let request = request(
                ConnectorKind::WebFetch,
                operation,
                json!({"url": "https://example.com"}),
            );
            let resp = response(&request, status);
            logger.log_operation(&request, &resp).await.unwrap();
        }

        assert_eq!(logger.total_requests().await.unwrap(), 4);
        assert!((logger.success_rate().await.unwrap() - 50.0).abs() < f64::EPSILON);
    }
}
