//! Data model for the communication gateway.
//!
//! Defines the core structures that flow through the request pipeline:
//! requests, responses, policies, verdicts, and audit evidence, together
//! with the wire-stable enumerations they carry.

use crate::domain_types::{
    ApprovalToken, EvidenceId, MaxResponseBytes, RateLimitCeiling, RequestId, TimeoutMillis,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// String-keyed parameter / metadata mapping, as carried on the wire.
pub type ParamMap = serde_json::Map<String, Value>;

/// Kinds of external communication connectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectorKind {
    WebSearch,
    WebFetch,
    Rss,
    EmailSmtp,
    Slack,
    Custom,
}

impl ConnectorKind {
    /// Stable wire name of the connector kind.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::WebSearch => "web_search",
            Self::WebFetch => "web_fetch",
            Self::Rss => "rss",
            Self::EmailSmtp => "email_smtp",
            Self::Slack => "slack",
            Self::Custom => "custom",
        }
    }

    /// Whether this connector originates data leaving the platform.
    ///
    /// Outbound kinds are subject to the planning-phase block and the
    /// approval-token gate regardless of per-connector policy.
    #[must_use]
    pub fn is_outbound(self) -> bool {
        matches!(self, Self::EmailSmtp | Self::Slack)
    }
}

impl fmt::Display for ConnectorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConnectorKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "web_search" => Ok(Self::WebSearch),
            "web_fetch" => Ok(Self::WebFetch),
            "rss" => Ok(Self::Rss),
            "email_smtp" => Ok(Self::EmailSmtp),
            "slack" => Ok(Self::Slack),
            "custom" => Ok(Self::Custom),
            unknown => Err(format!("unknown connector kind: {unknown}")),
        }
    }
}

/// Status of a communication request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Pending,
    Approved,
    Denied,
    InProgress,
    Success,
    Failed,
    RateLimited,
    RequireAdmin,
}

impl RequestStatus {
    /// Stable wire name of the status.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Denied => "denied",
            Self::InProgress => "in_progress",
            Self::Success => "success",
            Self::Failed => "failed",
            Self::RateLimited => "rate_limited",
            Self::RequireAdmin => "require_admin",
        }
    }

    /// Whether the status is terminal for the request lifecycle.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Success | Self::Failed | Self::Denied | Self::RequireAdmin | Self::RateLimited
        )
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RequestStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "pending" => Ok(Self::Pending),
            "approved" => Ok(Self::Approved),
            "denied" => Ok(Self::Denied),
            "in_progress" => Ok(Self::InProgress),
            "success" => Ok(Self::Success),
            "failed" => Ok(Self::Failed),
            "rate_limited" => Ok(Self::RateLimited),
            "require_admin" => Ok(Self::RequireAdmin),
            unknown => Err(format!("unknown request status: {unknown}")),
        }
    }
}

/// Discrete risk level for a communication operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    /// Stable wire name of the risk level.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Trust level of an information source.
///
/// Search results are candidate sources, never verified truth; only the
/// primary and authoritative tiers are decision-grade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TrustTier {
    /// Search engine results: candidates only, never facts.
    #[serde(rename = "search_result")]
    SearchResult,
    /// Fetched content from an unrecognized source: needs verification.
    #[serde(rename = "external_source")]
    ExternalSource,
    /// First-hand source: official sites, original documents.
    #[serde(rename = "primary_source")]
    PrimarySource,
    /// Government, academia, certified organizations.
    #[serde(rename = "authoritative")]
    AuthoritativeSource,
}

impl TrustTier {
    /// Stable wire name of the trust tier.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SearchResult => "search_result",
            Self::ExternalSource => "external_source",
            Self::PrimarySource => "primary_source",
            Self::AuthoritativeSource => "authoritative",
        }
    }
}

impl fmt::Display for TrustTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TrustTier {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "search_result" => Ok(Self::SearchResult),
            "external_source" => Ok(Self::ExternalSource),
            "primary_source" => Ok(Self::PrimarySource),
            "authoritative" => Ok(Self::AuthoritativeSource),
            unknown => Err(format!("unknown trust tier: {unknown}")),
        }
    }
}

/// Phase of the agent task lifecycle issuing the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionPhase {
    Planning,
    Execution,
}

impl ExecutionPhase {
    /// Stable wire name of the phase.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Planning => "planning",
            Self::Execution => "execution",
        }
    }
}

impl fmt::Display for ExecutionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Machine-readable reason codes emitted by the policy pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReasonCode {
    OutboundForbiddenInPlanning,
    OutboundRequiresApproval,
    NoPolicy,
    ConnectorDisabled,
    OperationNotAllowed,
    DomainBlocked,
    SsrfDetected,
    ApprovalRequired,
    NetworkModeBlocked,
    RateLimitExceeded,
    RequestApproved,
}

impl ReasonCode {
    /// Stable machine string for the reason code.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::OutboundForbiddenInPlanning => "OUTBOUND_FORBIDDEN_IN_PLANNING",
            Self::OutboundRequiresApproval => "OUTBOUND_REQUIRES_APPROVAL",
            Self::NoPolicy => "NO_POLICY",
            Self::ConnectorDisabled => "CONNECTOR_DISABLED",
            Self::OperationNotAllowed => "OPERATION_NOT_ALLOWED",
            Self::DomainBlocked => "DOMAIN_BLOCKED",
            Self::SsrfDetected => "SSRF_DETECTED",
            Self::ApprovalRequired => "APPROVAL_REQUIRED",
            Self::NetworkModeBlocked => "NETWORK_MODE_BLOCKED",
            Self::RateLimitExceeded => "RATE_LIMIT_EXCEEDED",
            Self::RequestApproved => "REQUEST_APPROVED",
        }
    }
}

impl fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Request to perform external communication.
///
/// Created by the orchestrator on entry and mutated only by pipeline
/// stages; `connector_kind`, `operation`, and `created_at` are immutable
/// after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommunicationRequest {
    pub id: RequestId,
    pub connector_kind: ConnectorKind,
    pub operation: String,
    pub params: ParamMap,
    #[serde(default)]
    pub context: ParamMap,
    pub status: RequestStatus,
    pub risk_level: RiskLevel,
    pub approval_token: Option<ApprovalToken>,
    pub execution_phase: ExecutionPhase,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CommunicationRequest {
    /// Creates a new pending request with a generated id.
    #[must_use]
    pub fn new(
        connector_kind: ConnectorKind,
        operation: impl Into<String>,
        params: ParamMap,
        context: ParamMap,
        execution_phase: ExecutionPhase,
        approval_token: Option<ApprovalToken>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: RequestId::generate(),
            connector_kind,
            operation: operation.into(),
            params,
            context,
            status: RequestStatus::Pending,
            risk_level: RiskLevel::Medium,
            approval_token,
            execution_phase,
            created_at: now,
            updated_at: now,
        }
    }

    /// Looks up a string parameter by key.
    #[must_use]
    pub fn str_param(&self, key: &str) -> Option<&str> {
        self.params.get(key).and_then(Value::as_str)
    }
}

/// Response from external communication. Immutable after emission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommunicationResponse {
    pub request_id: RequestId,
    pub status: RequestStatus,
    pub data: Option<Value>,
    #[serde(default)]
    pub metadata: ParamMap,
    pub evidence_id: Option<EvidenceId>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Policy governing one connector kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommunicationPolicy {
    pub name: String,
    pub connector_kind: ConnectorKind,
    /// Empty set means "no operation allow-list".
    #[serde(default)]
    pub allowed_operations: BTreeSet<String>,
    #[serde(default)]
    pub blocked_domains: BTreeSet<String>,
    /// Empty set means "no domain allow-list".
    #[serde(default)]
    pub allowed_domains: BTreeSet<String>,
    pub require_approval: bool,
    pub rate_limit_per_minute: RateLimitCeiling,
    pub max_response_size_bytes: MaxResponseBytes,
    pub timeout_ms: TimeoutMillis,
    pub sanitize_inputs: bool,
    pub sanitize_outputs: bool,
    pub enabled: bool,
}

/// Result of policy evaluation. Produced per request, never persisted
/// standalone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyVerdict {
    pub status: RequestStatus,
    pub reason_code: ReasonCode,
    pub hint: String,
    #[serde(default)]
    pub metadata: ParamMap,
}

impl PolicyVerdict {
    /// Creates a verdict with empty metadata.
    #[must_use]
    pub fn new(status: RequestStatus, reason_code: ReasonCode, hint: impl Into<String>) -> Self {
        Self {
            status,
            reason_code,
            hint: hint.into(),
            metadata: ParamMap::new(),
        }
    }

    /// Whether the verdict admits the request.
    #[must_use]
    pub fn is_approved(&self) -> bool {
        self.status == RequestStatus::Approved
    }
}

/// Audit evidence for a communication operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvidenceRecord {
    pub id: EvidenceId,
    pub request_id: RequestId,
    pub connector_kind: ConnectorKind,
    pub operation: String,
    pub request_summary: Value,
    pub response_summary: Option<Value>,
    pub status: RequestStatus,
    pub trust_tier: TrustTier,
    #[serde(default)]
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
}

/// Network access mode, from most to least restrictive:
/// `Off` disables everything, `ReadOnly` permits read operations only,
/// `On` permits everything.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NetworkMode {
    #[serde(rename = "off")]
    Off,
    #[serde(rename = "readonly")]
    ReadOnly,
    #[serde(rename = "on")]
    On,
}

impl NetworkMode {
    /// Stable wire name of the mode.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Off => "off",
            Self::ReadOnly => "readonly",
            Self::On => "on",
        }
    }
}

impl fmt::Display for NetworkMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NetworkMode {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "off" => Ok(Self::Off),
            "readonly" => Ok(Self::ReadOnly),
            "on" => Ok(Self::On),
            unknown => Err(format!(
                "invalid network mode: {unknown} (valid modes: off, readonly, on)"
            )),
        }
    }
}
