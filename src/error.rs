//! Top-level error type for the Portcullis gateway.
//!
//! Components define their own precise error enums (`StoreError`,
//! `ConnectorError`, `SsrfViolation`); this type rolls them up for callers
//! that cross component boundaries, such as the server binary and the REST
//! router. The orchestrator itself never surfaces errors to callers; every
//! outcome is converted into a `CommunicationResponse`.

use thiserror::Error;

/// Aggregate error for gateway bootstrap and administration paths.
#[derive(Error, Debug)]
pub enum GatewayError {
    /// Evidence or mode storage failure.
    #[error("Store error: {0}")]
    Store(#[from] crate::evidence::store::StoreError),

    /// Connector execution failure.
    #[error("Connector error: {0}")]
    Connector(#[from] crate::connectors::ConnectorError),

    /// SSRF guard rejection.
    #[error("SSRF violation: {0}")]
    Ssrf(#[from] crate::ssrf::SsrfViolation),

    /// Invalid configuration value.
    #[error("Configuration error: {field} - {reason}")]
    Configuration {
        /// Name of the configuration field that was invalid.
        field: String,
        /// Reason why the configuration was invalid.
        reason: String,
    },

    /// File system I/O failure.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding or decoding failure.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Gateway result type.
pub type GatewayResult<T> = Result<T, GatewayError>;
