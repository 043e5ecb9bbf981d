//! Outbound email connector.
//!
//! Validates and shapes outgoing messages, then hands them to an
//! injectable [`MailTransport`]. The SMTP wire protocol itself lives
//! behind that seam; the default transport records an accepted message
//! without contacting a server, which keeps the policy, approval, and
//! audit guarantees testable end to end.

use crate::clock::{iso_z, SharedClock};
use crate::connectors::{
    require_str, Connector, ConnectorError, ConnectorResult, EnabledFlag,
};
use crate::models::ParamMap;
use crate::sanitize::InputSanitizer;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{info, instrument};

/// A fully validated outbound email.
#[derive(Debug, Clone)]
pub struct OutboundEmail {
    pub to: Vec<String>,
    pub cc: Vec<String>,
    pub bcc: Vec<String>,
    pub subject: String,
    pub body: String,
    pub is_html: bool,
}

/// Delivery seam for the SMTP transport.
#[async_trait]
pub trait MailTransport: Send + Sync {
    /// Delivers one message, returning transport metadata (message id and
    /// acceptance details).
    async fn deliver(&self, email: &OutboundEmail) -> ConnectorResult<Value>;
}

/// Transport that accepts messages without contacting a server.
pub struct DryRunMailTransport;

#[async_trait]
impl MailTransport for DryRunMailTransport {
    async fn deliver(&self, email: &OutboundEmail) -> ConnectorResult<Value> {
        info!(recipients = email.to.len(), "Accepted outbound email (dry run)");
        Ok(json!({
            "success": true,
            "message_id": Value::Null,
        }))
    }
}

/// Connector for SMTP email operations.
pub struct EmailSmtpConnector {
    transport: Arc<dyn MailTransport>,
    clock: SharedClock,
    sanitizer: InputSanitizer,
    enabled: EnabledFlag,
}

impl EmailSmtpConnector {
    /// Creates a connector over the given transport.
    #[must_use]
    pub fn new(transport: Arc<dyn MailTransport>, clock: SharedClock) -> Self {
        Self {
            transport,
            clock,
            sanitizer: InputSanitizer::new(),
            enabled: EnabledFlag::new(),
        }
    }

    #[instrument(skip(self, params))]
    async fn send(&self, params: &ParamMap) -> ConnectorResult<Value> {
        let to = self.address_list(params, "to", true)?;
        let subject = require_str(params, "subject")?.to_string();
        let body = require_str(params, "body")?.to_string();
        let cc = self.address_list(params, "cc", false)?;
        let bcc = self.address_list(params, "bcc", false)?;
        let is_html = params
            .get("is_html")
            .and_then(Value::as_bool)
            .unwrap_or(false);

        let email = OutboundEmail {
            to: to.clone(),
            cc,
            bcc,
            subject,
            body,
            is_html,
        };

        info!(recipients = ?to, "Sending email");
        let delivery = self.transport.deliver(&email).await?;

        Ok(json!({
            "success": delivery.get("success").and_then(Value::as_bool).unwrap_or(true),
            "message_id": delivery.get("message_id").cloned().unwrap_or(Value::Null),
            "recipients": to,
            "timestamp": iso_z(self.clock.now()),
        }))
    }

    /// Reads an address parameter that may be a single string or an array,
    /// validating every address.
    fn address_list(
        &self,
        params: &ParamMap,
        param: &'static str,
        required: bool,
    ) -> ConnectorResult<Vec<String>> {
        let addresses: Vec<String> = match params.get(param) {
            None => {
                if required {
                    return Err(ConnectorError::MissingParam { param });
                }
                Vec::new()
            }
            Some(Value::String(address)) => vec![address.clone()],
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect(),
            Some(_) => {
                return Err(ConnectorError::InvalidParam {
                    param,
                    reason: "must be an address or list of addresses".to_string(),
                })
            }
        };

        if required && addresses.is_empty() {
            return Err(ConnectorError::MissingParam { param });
        }

        for address in &addresses {
            if !self.sanitizer.validate_email(address) {
                return Err(ConnectorError::InvalidParam {
                    param,
                    reason: format!("'{address}' is not a valid email address"),
                });
            }
        }

        Ok(addresses)
    }
}

#[async_trait]
impl Connector for EmailSmtpConnector {
    async fn execute(&self, operation: &str, params: &ParamMap) -> ConnectorResult<Value> {
        self.enabled.ensure_enabled()?;
        match operation {
            "send" => self.send(params).await,
            other => Err(ConnectorError::UnsupportedOperation {
                operation: other.to_string(),
            }),
        }
    }

    fn supported_operations(&self) -> BTreeSet<String> {
        ["send".to_string()].into_iter().collect()
    }

    fn enabled(&self) -> bool {
        self.enabled.get()
    }

    fn enable(&self) {
        self.enabled.set(true);
    }

    fn disable(&self) {
        self.enabled.set(false);
    }
}
