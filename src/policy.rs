//! Policy engine for communication security and governance.
//!
//! Evaluates each request against hard outbound rules and the registered
//! per-connector policy: operation allow-lists, domain block/allow lists,
//! SSRF screening, and approval requirements. The two hard rules come
//! first so a misconfigured policy can never re-open the outbound gate.

use crate::domain_types::{MaxResponseBytes, RateLimitCeiling, TimeoutMillis};
use crate::models::{
    CommunicationPolicy, CommunicationRequest, ConnectorKind, ExecutionPhase, PolicyVerdict,
    ReasonCode, RequestStatus, RiskLevel,
};
use crate::ssrf::SsrfGuard;
use dashmap::DashMap;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::info;
use url::Url;

/// Operation keywords that raise the assessed risk.
const SENSITIVE_OPERATIONS: &[&str] = &["send", "upload", "post", "delete"];

/// Engine evaluating communication requests against registered policies.
pub struct PolicyEngine {
    policies: DashMap<ConnectorKind, CommunicationPolicy>,
    ssrf_guard: Arc<SsrfGuard>,
}

impl PolicyEngine {
    /// Creates an engine with the default policy set registered.
    #[must_use]
    pub fn new(ssrf_guard: Arc<SsrfGuard>) -> Self {
        let engine = Self {
            policies: DashMap::new(),
            ssrf_guard,
        };
        engine.load_default_policies();
        engine
    }

    fn load_default_policies(&self) {
        // Loopback and metadata hosts are handled by the SSRF guard with a
        // precise reason code, so the default block lists stay empty.
        self.register_policy(CommunicationPolicy {
            name: "default_web_search".to_string(),
            connector_kind: ConnectorKind::WebSearch,
            allowed_operations: operations(&["search"]),
            blocked_domains: BTreeSet::new(),
            allowed_domains: BTreeSet::new(),
            require_approval: false,
            rate_limit_per_minute: ceiling(30),
            max_response_size_bytes: response_bytes(5 * 1024 * 1024),
            timeout_ms: timeout(30_000),
            sanitize_inputs: true,
            sanitize_outputs: true,
            enabled: true,
        });

        self.register_policy(CommunicationPolicy {
            name: "default_web_fetch".to_string(),
            connector_kind: ConnectorKind::WebFetch,
            allowed_operations: operations(&["fetch", "download"]),
            blocked_domains: BTreeSet::new(),
            allowed_domains: BTreeSet::new(),
            require_approval: false,
            rate_limit_per_minute: ceiling(20),
            max_response_size_bytes: response_bytes(10 * 1024 * 1024),
            timeout_ms: timeout(60_000),
            sanitize_inputs: true,
            sanitize_outputs: true,
            enabled: true,
        });

        self.register_policy(CommunicationPolicy {
            name: "default_rss".to_string(),
            connector_kind: ConnectorKind::Rss,
            allowed_operations: operations(&["fetch_feed"]),
            blocked_domains: BTreeSet::new(),
            allowed_domains: BTreeSet::new(),
            require_approval: false,
            rate_limit_per_minute: ceiling(10),
            max_response_size_bytes: response_bytes(5 * 1024 * 1024),
            timeout_ms: timeout(30_000),
            sanitize_inputs: true,
            sanitize_outputs: true,
            enabled: true,
        });

        self.register_policy(CommunicationPolicy {
            name: "default_email".to_string(),
            connector_kind: ConnectorKind::EmailSmtp,
            allowed_operations: operations(&["send"]),
            blocked_domains: BTreeSet::new(),
            allowed_domains: BTreeSet::new(),
            require_approval: true,
            rate_limit_per_minute: ceiling(5),
            max_response_size_bytes: response_bytes(1024 * 1024),
            timeout_ms: timeout(30_000),
            sanitize_inputs: true,
            sanitize_outputs: true,
            enabled: true,
        });

        self.register_policy(CommunicationPolicy {
            name: "default_slack".to_string(),
            connector_kind: ConnectorKind::Slack,
            allowed_operations: operations(&["send_message", "upload_file"]),
            blocked_domains: BTreeSet::new(),
            allowed_domains: BTreeSet::new(),
            require_approval: false,
            rate_limit_per_minute: ceiling(10),
            max_response_size_bytes: response_bytes(1024 * 1024),
            timeout_ms: timeout(30_000),
            sanitize_inputs: true,
            sanitize_outputs: true,
            enabled: true,
        });
    }

    /// Registers (or replaces) the policy for its connector kind.
    pub fn register_policy(&self, policy: CommunicationPolicy) {
        info!(name = %policy.name, kind = %policy.connector_kind, "Registered policy");
        self.policies.insert(policy.connector_kind, policy);
    }

    /// Gets the policy for a connector kind.
    #[must_use]
    pub fn get_policy(&self, kind: ConnectorKind) -> Option<CommunicationPolicy> {
        self.policies.get(&kind).map(|entry| entry.value().clone())
    }

    /// Evaluates a request. Rules run in fixed order; the first match wins.
    pub async fn evaluate(
        &self,
        request: &CommunicationRequest,
        phase: ExecutionPhase,
    ) -> PolicyVerdict {
        // Hard rule 1: no outbound during planning.
        if phase == ExecutionPhase::Planning && request.connector_kind.is_outbound() {
            return PolicyVerdict::new(
                RequestStatus::Denied,
                ReasonCode::OutboundForbiddenInPlanning,
                "Outbound operations are not allowed during planning phase",
            );
        }

        // Hard rule 2: outbound requires an approval token.
        if request.connector_kind.is_outbound() && request.approval_token.is_none() {
            return PolicyVerdict::new(
                RequestStatus::RequireAdmin,
                ReasonCode::OutboundRequiresApproval,
                "Outbound operation requires explicit human approval",
            );
        }

        let Some(policy) = self.get_policy(request.connector_kind) else {
            return PolicyVerdict::new(
                RequestStatus::Denied,
                ReasonCode::NoPolicy,
                format!(
                    "No policy found for connector kind: {}",
                    request.connector_kind
                ),
            );
        };

        if !policy.enabled {
            return PolicyVerdict::new(
                RequestStatus::Denied,
                ReasonCode::ConnectorDisabled,
                format!("Connector {} is disabled", request.connector_kind),
            );
        }

        if !policy.allowed_operations.is_empty()
            && !policy.allowed_operations.contains(&request.operation)
        {
            return PolicyVerdict::new(
                RequestStatus::Denied,
                ReasonCode::OperationNotAllowed,
                format!(
                    "Operation '{}' not allowed for {}",
                    request.operation, request.connector_kind
                ),
            );
        }

        if let Some(url) = request.str_param("url") {
            if let Err(reason) = check_domain_policy(url, &policy) {
                return PolicyVerdict::new(
                    RequestStatus::Denied,
                    ReasonCode::DomainBlocked,
                    reason,
                );
            }

            if let Err(violation) = self.ssrf_guard.validate(url).await {
                return PolicyVerdict::new(
                    RequestStatus::Denied,
                    ReasonCode::SsrfDetected,
                    format!("SSRF protection: {violation}"),
                );
            }
        }

        // Per-policy approval. A non-empty token (or a pre-approved request)
        // satisfies it.
        if policy.require_approval {
            let has_approval = request.approval_token.is_some()
                || request.status == RequestStatus::Approved;
            if !has_approval {
                return PolicyVerdict::new(
                    RequestStatus::RequireAdmin,
                    ReasonCode::ApprovalRequired,
                    "Request requires manual approval",
                );
            }
        }

        PolicyVerdict::new(
            RequestStatus::Approved,
            ReasonCode::RequestApproved,
            "Request approved",
        )
    }

    /// Assesses the discrete risk level of a request from connector kind
    /// and operation keywords.
    #[must_use]
    pub fn assess_risk(&self, request: &CommunicationRequest) -> RiskLevel {
        let mut score = 0u32;

        if request.connector_kind.is_outbound() {
            score += 2;
        }

        let operation = request.operation.to_ascii_lowercase();
        if SENSITIVE_OPERATIONS.iter().any(|op| operation.contains(op)) {
            score += 1;
        }

        let params_text = serde_json::Value::Object(request.params.clone())
            .to_string()
            .to_ascii_lowercase();
        if params_text.contains("file") || operation.contains("upload") {
            score += 1;
        }

        match score {
            0 | 1 => RiskLevel::Low,
            2 => RiskLevel::Medium,
            3 => RiskLevel::High,
            _ => RiskLevel::Critical,
        }
    }

    /// Checks connector-kind-specific required parameters.
    ///
    /// # Errors
    ///
    /// Returns a human-readable message naming the missing parameters.
    pub fn validate_params(&self, request: &CommunicationRequest) -> Result<(), String> {
        match request.connector_kind {
            ConnectorKind::WebSearch => {
                if !request.params.contains_key("query") {
                    return Err("Web search requires 'query' parameter".to_string());
                }
            }
            ConnectorKind::WebFetch => {
                if !request.params.contains_key("url") {
                    return Err("Web fetch requires 'url' parameter".to_string());
                }
            }
            ConnectorKind::EmailSmtp => {
                let missing: Vec<&str> = ["to", "subject", "body"]
                    .iter()
                    .copied()
                    .filter(|param| !request.params.contains_key(*param))
                    .collect();
                if !missing.is_empty() {
                    return Err(format!("Email requires parameters: {}", missing.join(", ")));
                }
            }
            ConnectorKind::Rss | ConnectorKind::Slack | ConnectorKind::Custom => {}
        }
        Ok(())
    }
}

/// Checks a URL's host against the policy's blocked and allowed domain
/// sets. Matches are exact or dotted-suffix on the lower-cased host.
fn check_domain_policy(url: &str, policy: &CommunicationPolicy) -> Result<(), String> {
    let parsed = Url::parse(url).map_err(|e| format!("Invalid URL format: {e}"))?;
    let Some(host) = parsed.host_str().map(str::to_ascii_lowercase) else {
        return Err("Invalid URL format: missing host".to_string());
    };

    for blocked in &policy.blocked_domains {
        let blocked = blocked.to_ascii_lowercase();
        if host == blocked || host.ends_with(&format!(".{blocked}")) {
            return Err(format!("Domain {host} is blocked"));
        }
    }

    if !policy.allowed_domains.is_empty() {
        let allowed = policy.allowed_domains.iter().any(|domain| {
            let domain = domain.to_ascii_lowercase();
            host == domain || host.ends_with(&format!(".{domain}"))
        });
        if !allowed {
            return Err(format!("Domain {host} is not in allowed list"));
        }
    }

    Ok(())
}

fn operations(names: &[&str]) -> BTreeSet<String> {
    names.iter().map(|name| (*name).to_string()).collect()
}

fn ceiling(value: u32) -> RateLimitCeiling {
    RateLimitCeiling::try_new(value).expect("default rate limit is in range")
}

fn response_bytes(value: u64) -> MaxResponseBytes {
    MaxResponseBytes::try_new(value).expect("default response size is in range")
}

fn timeout(value: u64) -> TimeoutMillis {
    TimeoutMillis::try_new(value).expect("default timeout is in range")
}
