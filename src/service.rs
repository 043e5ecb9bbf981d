//! Communication service: the orchestrator composing the whole pipeline.
//!
//! `execute` runs each request through a fixed stage order: mode check,
//! parameter validation, risk assessment, policy evaluation, rate-limit
//! admission, input sanitization, connector dispatch, output sanitization,
//! evidence write. Failure at any stage short-circuits to an error
//! response that still leaves an evidence row; no path raises to the
//! caller.

use crate::clock::{system_clock, SharedClock};
use crate::config::GatewayConfig;
use crate::connectors::email_smtp::{DryRunMailTransport, EmailSmtpConnector};
use crate::connectors::rss::{DryRunFeedSource, RssConfig, RssConnector};
use crate::connectors::slack::{DryRunChatTransport, SlackConfig, SlackConnector};
use crate::connectors::web_fetch::{WebFetchConfig, WebFetchConnector};
use crate::connectors::web_search::{DuckDuckGoEngine, WebSearchConfig, WebSearchConnector};
use crate::connectors::{Connector, ConnectorError, ConnectorRegistry};
use crate::database::{DatabaseConfig, DatabaseConnection};
use crate::domain_types::{ApprovalToken, WindowSeconds};
use crate::error::{GatewayError, GatewayResult};
use crate::evidence::store::{SqliteEvidenceStore, StoreError};
use crate::evidence::EvidenceLogger;
use crate::models::{
    CommunicationRequest, CommunicationResponse, ConnectorKind, ExecutionPhase, ParamMap,
    RequestStatus,
};
use crate::network_mode::NetworkModeManager;
use crate::policy::PolicyEngine;
use crate::rate_limit::{RateLimitDecision, RateLimiter};
use crate::sanitize::{InputSanitizer, OutputSanitizer};
use crate::ssrf::SsrfGuard;
use crate::trust::TrustTierClassifier;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

/// Main service for external communications.
///
/// Cheap to clone; all mutable state lives behind the shared components.
#[derive(Clone)]
pub struct CommunicationService {
    policy_engine: Arc<PolicyEngine>,
    evidence_logger: Arc<EvidenceLogger>,
    rate_limiter: Arc<RateLimiter>,
    input_sanitizer: InputSanitizer,
    output_sanitizer: OutputSanitizer,
    mode_manager: Arc<NetworkModeManager>,
    registry: Arc<ConnectorRegistry>,
    clock: SharedClock,
}

impl CommunicationService {
    /// Creates a service from pre-built components.
    #[must_use]
    pub fn new(
        policy_engine: Arc<PolicyEngine>,
        evidence_logger: Arc<EvidenceLogger>,
        rate_limiter: Arc<RateLimiter>,
        mode_manager: Arc<NetworkModeManager>,
        registry: Arc<ConnectorRegistry>,
        clock: SharedClock,
    ) -> Self {
        Self {
            policy_engine,
            evidence_logger,
            rate_limiter,
            input_sanitizer: InputSanitizer::new(),
            output_sanitizer: OutputSanitizer::new(),
            mode_manager,
            registry,
            clock,
        }
    }

    /// Builds a fully wired service from process configuration: opens the
    /// database, loads trusted sources, and registers the default
    /// connector set.
    ///
    /// # Errors
    ///
    /// Returns an error if the database or a connector fails to
    /// initialize.
    pub async fn bootstrap(config: &GatewayConfig) -> GatewayResult<Self> {
        let clock = system_clock();

        let db_config = DatabaseConfig::new(&config.db_path).map_err(StoreError::from)?;
        let connection = DatabaseConnection::initialize(db_config)
            .await
            .map_err(StoreError::from)?;

        let classifier = Arc::new(TrustTierClassifier::new());
        let store = Arc::new(SqliteEvidenceStore::new(connection.clone()));
        let evidence_logger = Arc::new(EvidenceLogger::new(
            store,
            Arc::clone(&classifier),
            clock.clone(),
        ));

        let mode_manager = Arc::new(
            NetworkModeManager::initialize(connection, clock.clone())
                .await
                .map_err(StoreError::from)?,
        );

        let guard = Arc::new(SsrfGuard::new());
        let policy_engine = Arc::new(PolicyEngine::new(Arc::clone(&guard)));
        let rate_limiter = Arc::new(RateLimiter::new(clock.clone(), config.global_rate_limit));

        let trusted_sources = config.trusted_sources();
        let registry = Arc::new(ConnectorRegistry::new());
        registry.register(
            ConnectorKind::WebFetch,
            Arc::new(WebFetchConnector::new(
                WebFetchConfig::default(),
                Arc::clone(&guard),
                Arc::clone(&classifier),
                clock.clone(),
            )?),
        );
        registry.register(
            ConnectorKind::WebSearch,
            Arc::new(WebSearchConnector::new(
                WebSearchConfig::default(),
                Arc::new(DuckDuckGoEngine::default()),
                trusted_sources,
                clock.clone(),
            )),
        );
        registry.register(
            ConnectorKind::Rss,
            Arc::new(RssConnector::new(
                RssConfig::default(),
                Arc::clone(&guard),
                Arc::new(DryRunFeedSource),
            )),
        );
        registry.register(
            ConnectorKind::EmailSmtp,
            Arc::new(EmailSmtpConnector::new(
                Arc::new(DryRunMailTransport),
                clock.clone(),
            )),
        );
        registry.register(
            ConnectorKind::Slack,
            Arc::new(SlackConnector::new(
                SlackConfig::default(),
                Arc::new(DryRunChatTransport),
            )),
        );

        Ok(Self::new(
            policy_engine,
            evidence_logger,
            rate_limiter,
            mode_manager,
            registry,
            clock,
        ))
    }

    /// Registers (or replaces) a connector handler.
    pub fn register_connector(&self, kind: ConnectorKind, connector: Arc<dyn Connector>) {
        self.registry.register(kind, connector);
    }

    /// The policy engine, for admin surfaces.
    #[must_use]
    pub fn policy_engine(&self) -> &Arc<PolicyEngine> {
        &self.policy_engine
    }

    /// The evidence logger, for audit surfaces.
    #[must_use]
    pub fn evidence_logger(&self) -> &Arc<EvidenceLogger> {
        &self.evidence_logger
    }

    /// The network mode manager, for admin surfaces.
    #[must_use]
    pub fn mode_manager(&self) -> &Arc<NetworkModeManager> {
        &self.mode_manager
    }

    /// The rate limiter, for usage introspection.
    #[must_use]
    pub fn rate_limiter(&self) -> &Arc<RateLimiter> {
        &self.rate_limiter
    }

    /// Executes a communication operation through the full pipeline.
    #[instrument(skip(self, params, context, approval_token), fields(kind = %connector_kind, operation))]
    pub async fn execute(
        &self,
        connector_kind: ConnectorKind,
        operation: &str,
        params: ParamMap,
        context: ParamMap,
        execution_phase: ExecutionPhase,
        approval_token: Option<String>,
    ) -> CommunicationResponse {
        let mut request = CommunicationRequest::new(
            connector_kind,
            operation,
            params,
            context,
            execution_phase,
            ApprovalToken::from_raw(approval_token),
            self.clock.now(),
        );

        // Stage 2: network mode gates everything else.
        let (allowed, deny_reason) = self.mode_manager.is_operation_allowed(operation, None);
        if !allowed {
            let reason = deny_reason.unwrap_or_else(|| "blocked".to_string());
            warn!(
                operation,
                mode = %self.mode_manager.get_mode(),
                "Operation blocked by network mode"
            );
            return self
                .error_response(
                    &mut request,
                    format!("NETWORK_MODE_BLOCKED: {reason}"),
                    RequestStatus::Denied,
                    ParamMap::new(),
                )
                .await;
        }

        // Stage 3: connector-specific required parameters.
        if let Err(reason) = self.policy_engine.validate_params(&request) {
            return self
                .error_response(&mut request, reason, RequestStatus::Denied, ParamMap::new())
                .await;
        }

        // Stage 4: risk assessment.
        request.risk_level = self.policy_engine.assess_risk(&request);

        // Stage 5: policy evaluation (hard rules first).
        let verdict = self.policy_engine.evaluate(&request, execution_phase).await;
        if !verdict.is_approved() {
            let error = format!("{}: {}", verdict.reason_code, verdict.hint);
            return self
                .error_response(&mut request, error, verdict.status, ParamMap::new())
                .await;
        }
        request.status = RequestStatus::Approved;

        let policy = self.policy_engine.get_policy(connector_kind);

        // Stage 6: rate-limit admission on the connector class.
        if let Some(policy) = &policy {
            let decision = self.rate_limiter.check(
                connector_kind.as_str(),
                policy.rate_limit_per_minute,
                minute_window(),
            );
            if let RateLimitDecision::Denied {
                retry_after_seconds,
                reason,
                ..
            } = decision
            {
                let mut metadata = ParamMap::new();
                metadata.insert("retry_after_seconds".to_string(), json!(retry_after_seconds));
                return self
                    .error_response(&mut request, reason, RequestStatus::RateLimited, metadata)
                    .await;
            }
        }

        // Stage 7: input sanitization.
        if policy.as_ref().is_some_and(|p| p.sanitize_inputs) {
            let cleaned = self
                .input_sanitizer
                .sanitize(&Value::Object(request.params.clone()));
            if let Value::Object(map) = cleaned {
                request.params = map;
            }
        }

        // The connector honors the policy's I/O ceilings via parameters.
        if let Some(policy) = &policy {
            request.params.insert(
                "timeout_ms".to_string(),
                json!(policy.timeout_ms.as_u64()),
            );
            request.params.insert(
                "max_response_size_bytes".to_string(),
                json!(policy.max_response_size_bytes.as_u64()),
            );
        }

        // Stage 8: connector dispatch.
        let Some(connector) = self.registry.get(connector_kind) else {
            return self
                .error_response(
                    &mut request,
                    format!("No connector registered for {connector_kind}"),
                    RequestStatus::Failed,
                    ParamMap::new(),
                )
                .await;
        };

        request.status = RequestStatus::InProgress;
        request.updated_at = self.clock.now();

        match connector.execute(&request.operation, &request.params).await {
            Ok(mut data) => {
                // Stage 9: output sanitization and size truncation.
                if policy.as_ref().is_some_and(|p| p.sanitize_outputs) {
                    data = self.output_sanitizer.sanitize(&data);
                    let truncated = match (&policy, &data) {
                        (Some(policy), Value::String(text)) => {
                            let limit = policy.max_response_size_bytes.as_u64() as usize;
                            (text.len() > limit)
                                .then(|| self.output_sanitizer.truncate(text, limit))
                        }
                        _ => None,
                    };
                    if let Some(text) = truncated {
                        data = Value::String(text);
                    }
                }

                let mut response = CommunicationResponse {
                    request_id: request.id.clone(),
                    status: RequestStatus::Success,
                    data: Some(data),
                    metadata: ParamMap::new(),
                    evidence_id: None,
                    error: None,
                    created_at: self.clock.now(),
                };

                // Stage 10: evidence write, durable before returning.
                match self.evidence_logger.log_operation(&request, &response).await {
                    Ok(evidence_id) => response.evidence_id = Some(evidence_id),
                    Err(e) => {
                        error!(request_id = %request.id, "Failed to log evidence: {e}");
                        response.error = Some(format!("evidence write failed: {e}"));
                    }
                }

                info!(request_id = %request.id, "Request succeeded");
                response
            }
            Err(connector_error) => {
                let mut metadata = ParamMap::new();
                if let ConnectorError::SizeExceeded { actual, .. } = &connector_error {
                    metadata.insert("content_length".to_string(), json!(actual));
                }
                self.error_response(
                    &mut request,
                    connector_error.to_string(),
                    RequestStatus::Failed,
                    metadata,
                )
                .await
            }
        }
    }

    /// Builds an error response and writes its evidence row. Evidence
    /// failures are logged but never surface to the caller.
    async fn error_response(
        &self,
        request: &mut CommunicationRequest,
        error: String,
        status: RequestStatus,
        metadata: ParamMap,
    ) -> CommunicationResponse {
        request.status = status;
        request.updated_at = self.clock.now();

        let mut response = CommunicationResponse {
            request_id: request.id.clone(),
            status,
            data: None,
            metadata,
            evidence_id: None,
            error: Some(error),
            created_at: self.clock.now(),
        };

        match self.evidence_logger.log_operation(request, &response).await {
            Ok(evidence_id) => response.evidence_id = Some(evidence_id),
            Err(e) => error!(request_id = %request.id, "Failed to log evidence: {e}"),
        }

        response
    }

    /// Summarizes registered connectors with their policy settings.
    #[must_use]
    pub fn list_connectors(&self) -> Value {
        let mut connectors = serde_json::Map::new();
        for kind in self.registry.kinds() {
            let policy = self.policy_engine.get_policy(kind);
            let enabled = self
                .registry
                .get(kind)
                .map(|connector| connector.enabled())
                .unwrap_or(false)
                && policy.as_ref().is_none_or(|p| p.enabled);
            connectors.insert(
                kind.as_str().to_string(),
                json!({
                    "type": kind.as_str(),
                    "enabled": enabled,
                    "operations": policy
                        .as_ref()
                        .map(|p| p.allowed_operations.iter().cloned().collect::<Vec<_>>())
                        .unwrap_or_default(),
                    "rate_limit": policy
                        .map(|p| p.rate_limit_per_minute.as_u32())
                        .unwrap_or(0),
                }),
            );
        }
        Value::Object(connectors)
    }

    /// Aggregate gateway statistics from the evidence store.
    ///
    /// # Errors
    ///
    /// Returns an error if the evidence queries fail.
    pub async fn statistics(&self) -> Result<Value, GatewayError> {
        let total = self.evidence_logger.total_requests().await?;
        let success_rate = self.evidence_logger.success_rate().await?;
        let by_connector: HashMap<String, i64> =
            self.evidence_logger.stats_by_connector().await?;

        Ok(json!({
            "total_requests": total,
            "success_rate": success_rate,
            "by_connector": by_connector,
        }))
    }
}

fn minute_window() -> WindowSeconds {
    WindowSeconds::try_new(60).expect("sixty seconds is a valid window")
}
