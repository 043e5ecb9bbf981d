//! # Portcullis - Mediated External-Communication Gateway
//!
//! Portcullis is the single chokepoint through which agents reach the
//! outside world. Agents cannot perform outbound network I/O directly;
//! every attempt (web search, web fetch, feed pull, email, chat message)
//! is funneled through the gateway, which enforces policy, rate limits,
//! input/output sanitization, SSRF protection, trust-tier classification,
//! and tamper-evident audit logging.
//!
//! ## Request pipeline
//!
//! ```rust,ignore
//! use portcullis::*;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = GatewayConfig::from_env()?;
//!     let service = CommunicationService::bootstrap(&config).await?;
//!
//!     let response = service
//!         .execute(
//!             ConnectorKind::WebSearch,
//!             "search",
//!             serde_json::json!({"query": "climate policy"})
//!                 .as_object().cloned().unwrap_or_default(),
//!             Default::default(),
//!             ExecutionPhase::Execution,
//!             None,
//!         )
//!         .await;
//!     println!("{:?} evidence={:?}", response.status, response.evidence_id);
//!     Ok(())
//! }
//! ```
//!
//! Hard guarantees, enforced ahead of any per-connector policy: no
//! outbound connector runs during the planning phase, no outbound
//! connector runs without an approval token, no connection is opened to a
//! loopback/private/link-local address, and every admitted request leaves
//! exactly one evidence row.

pub mod clock;
pub mod config;
pub mod connectors;
pub mod database;
pub mod domain_types;
pub mod error;
pub mod evidence;
pub mod models;
pub mod network_mode;
pub mod observability;
pub mod policy;
pub mod priority;
pub mod rate_limit;
pub mod rest_api;
pub mod sanitize;
pub mod service;
pub mod ssrf;
pub mod trust;

pub use crate::clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use crate::config::{GatewayConfig, TrustedSources};
pub use crate::connectors::{Connector, ConnectorError, ConnectorRegistry};
pub use crate::domain_types::{ApprovalToken, EvidenceId, RequestId};
pub use crate::error::{GatewayError, GatewayResult};
pub use crate::evidence::store::{EvidenceFilter, SqliteEvidenceStore};
pub use crate::evidence::EvidenceLogger;
pub use crate::models::{
    CommunicationPolicy, CommunicationRequest, CommunicationResponse, ConnectorKind,
    EvidenceRecord, ExecutionPhase, NetworkMode, ParamMap, PolicyVerdict, ReasonCode,
    RequestStatus, RiskLevel, TrustTier,
};
pub use crate::network_mode::NetworkModeManager;
pub use crate::policy::PolicyEngine;
pub use crate::rate_limit::RateLimiter;
pub use crate::sanitize::{InputSanitizer, OutputSanitizer};
pub use crate::service::CommunicationService;
pub use crate::ssrf::{SsrfGuard, SsrfViolation};
pub use crate::trust::TrustTierClassifier;
