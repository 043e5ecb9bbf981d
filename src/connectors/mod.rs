//! Connector protocol and registry.
//!
//! Every external back-end implements the same [`Connector`] contract:
//! an operation-dispatched async `execute`, a declared operation set, and
//! an enable/disable switch. The registry maps connector kinds to handlers
//! and is populated during service bootstrap, keeping the policy pipeline
//! uniform across heterogeneous back-ends.

pub mod email_smtp;
pub mod rss;
pub mod slack;
pub mod web_fetch;
pub mod web_search;

use crate::models::{ConnectorKind, ParamMap};
use crate::ssrf::SsrfViolation;
use async_trait::async_trait;
use dashmap::DashMap;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

/// Connector execution errors.
#[derive(Error, Debug)]
pub enum ConnectorError {
    /// Connector switched off.
    #[error("Connector is disabled")]
    Disabled,

    /// Operation not in the connector's supported set.
    #[error("Unsupported operation: {operation}")]
    UnsupportedOperation {
        /// The rejected operation name.
        operation: String,
    },

    /// Required parameter absent.
    #[error("{param} is required")]
    MissingParam {
        /// Name of the missing parameter.
        param: &'static str,
    },

    /// Parameter present but unusable.
    #[error("Invalid parameter '{param}': {reason}")]
    InvalidParam {
        /// Name of the offending parameter.
        param: &'static str,
        /// Why it was rejected.
        reason: String,
    },

    /// SSRF guard rejected the target.
    #[error("SSRF_BLOCKED: {0}")]
    Ssrf(#[from] SsrfViolation),

    /// Response exceeded the admitted size.
    #[error("Content size ({actual} bytes) exceeds maximum allowed size ({limit} bytes)")]
    SizeExceeded {
        /// Observed (or advertised) size in bytes.
        actual: u64,
        /// Configured ceiling in bytes.
        limit: u64,
    },

    /// Request exceeded the policy timeout.
    #[error("Request timeout after {timeout_ms} ms")]
    Timeout {
        /// The timeout that elapsed.
        timeout_ms: u64,
    },

    /// Remote returned a non-success HTTP status.
    #[error("HTTP {status}")]
    HttpStatus {
        /// The status code received.
        status: u16,
    },

    /// Transport-level network failure.
    #[error("Network error: {message}")]
    Network {
        /// Underlying error message.
        message: String,
    },

    /// Search engine driver failure.
    #[error("Search failed: {message}")]
    Search {
        /// Driver error message.
        message: String,
    },

    /// Local I/O failure (downloads).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Connector result type.
pub type ConnectorResult<T> = Result<T, ConnectorError>;

/// Health probe result.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectorHealth {
    pub healthy: bool,
    pub detail: Option<String>,
}

/// Uniform contract implemented by every connector back-end.
///
/// `execute` must be safe to invoke concurrently; connectors hold no
/// per-request mutable state.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Executes one operation with the given parameters.
    async fn execute(&self, operation: &str, params: &ParamMap) -> ConnectorResult<Value>;

    /// Names of operations this connector dispatches.
    fn supported_operations(&self) -> BTreeSet<String>;

    /// Whether the connector currently accepts work.
    fn enabled(&self) -> bool;

    /// Switches the connector on.
    fn enable(&self);

    /// Switches the connector off.
    fn disable(&self);

    /// Liveness probe; defaults to reporting the enabled switch.
    async fn health_check(&self) -> ConnectorHealth {
        ConnectorHealth {
            healthy: self.enabled(),
            detail: None,
        }
    }
}

/// Enable/disable switch shared by connector implementations.
#[derive(Debug)]
pub struct EnabledFlag(AtomicBool);

impl Default for EnabledFlag {
    fn default() -> Self {
        Self(AtomicBool::new(true))
    }
}

impl EnabledFlag {
    /// Creates a flag in the enabled state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state.
    #[must_use]
    pub fn get(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    /// Sets the state.
    pub fn set(&self, enabled: bool) {
        self.0.store(enabled, Ordering::Relaxed);
    }

    /// Errors when disabled, for use at the top of `execute`.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectorError::Disabled`] when the flag is off.
    pub fn ensure_enabled(&self) -> ConnectorResult<()> {
        if self.get() {
            Ok(())
        } else {
            Err(ConnectorError::Disabled)
        }
    }
}

/// Registry mapping connector kinds to handlers.
#[derive(Default)]
pub struct ConnectorRegistry {
    connectors: DashMap<ConnectorKind, Arc<dyn Connector>>,
}

impl ConnectorRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers (or replaces) the handler for a kind.
    pub fn register(&self, kind: ConnectorKind, connector: Arc<dyn Connector>) {
        info!(kind = %kind, "Registered connector");
        self.connectors.insert(kind, connector);
    }

    /// Gets the handler for a kind.
    #[must_use]
    pub fn get(&self, kind: ConnectorKind) -> Option<Arc<dyn Connector>> {
        self.connectors.get(&kind).map(|entry| Arc::clone(entry.value()))
    }

    /// Kinds with a registered handler.
    #[must_use]
    pub fn kinds(&self) -> Vec<ConnectorKind> {
        self.connectors.iter().map(|entry| *entry.key()).collect()
    }
}

/// Extracts a required string parameter.
///
/// # Errors
///
/// Returns [`ConnectorError::MissingParam`] when absent and
/// [`ConnectorError::InvalidParam`] when not a string.
pub(crate) fn require_str<'a>(
    params: &'a ParamMap,
    param: &'static str,
) -> ConnectorResult<&'a str> {
    match params.get(param) {
        None => Err(ConnectorError::MissingParam { param }),
        Some(Value::String(value)) if !value.trim().is_empty() => Ok(value),
        Some(Value::String(_)) => Err(ConnectorError::InvalidParam {
            param,
            reason: "must be a non-empty string".to_string(),
        }),
        Some(_) => Err(ConnectorError::InvalidParam {
            param,
            reason: "must be a string".to_string(),
        }),
    }
}

/// Extracts an optional string parameter.
pub(crate) fn optional_str<'a>(params: &'a ParamMap, param: &str) -> Option<&'a str> {
    params.get(param).and_then(Value::as_str)
}

/// Extracts an optional unsigned integer parameter.
pub(crate) fn optional_u64(params: &ParamMap, param: &str) -> Option<u64> {
    params.get(param).and_then(Value::as_u64)
}
