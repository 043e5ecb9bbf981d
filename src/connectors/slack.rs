//! Outbound chat (Slack) connector.
//!
//! Validates message and upload requests and hands them to an injectable
//! [`ChatTransport`]. The vendor API lives behind that seam; the default
//! transport records an accepted action without network contact.

use crate::connectors::{
    optional_str, require_str, Connector, ConnectorError, ConnectorResult, EnabledFlag,
};
use crate::models::ParamMap;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{info, instrument};

/// Delivery seam for the chat transport.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Posts a message to a channel.
    async fn post_message(
        &self,
        channel: &str,
        text: &str,
        thread_ts: Option<&str>,
    ) -> ConnectorResult<Value>;

    /// Shares a local file into one or more channels.
    async fn upload_file(
        &self,
        channels: &[String],
        file_path: &str,
        title: Option<&str>,
        comment: Option<&str>,
    ) -> ConnectorResult<Value>;
}

/// Transport that accepts actions without contacting the vendor API.
pub struct DryRunChatTransport;

#[async_trait]
impl ChatTransport for DryRunChatTransport {
    async fn post_message(
        &self,
        channel: &str,
        text: &str,
        _thread_ts: Option<&str>,
    ) -> ConnectorResult<Value> {
        info!(channel, "Accepted chat message (dry run)");
        Ok(json!({
            "success": true,
            "ts": Value::Null,
            "channel": channel,
            "message": text,
        }))
    }

    async fn upload_file(
        &self,
        channels: &[String],
        file_path: &str,
        _title: Option<&str>,
        _comment: Option<&str>,
    ) -> ConnectorResult<Value> {
        info!(file_path, "Accepted file upload (dry run)");
        Ok(json!({
            "success": true,
            "file_id": Value::Null,
            "permalink": Value::Null,
            "channels": channels,
        }))
    }
}

/// Slack connector configuration.
#[derive(Debug, Clone, Default)]
pub struct SlackConfig {
    /// Channel used when a message names none.
    pub default_channel: Option<String>,
}

/// Connector for chat messaging operations.
pub struct SlackConnector {
    config: SlackConfig,
    transport: Arc<dyn ChatTransport>,
    enabled: EnabledFlag,
}

impl SlackConnector {
    /// Creates a connector over the given transport.
    #[must_use]
    pub fn new(config: SlackConfig, transport: Arc<dyn ChatTransport>) -> Self {
        Self {
            config,
            transport,
            enabled: EnabledFlag::new(),
        }
    }

    #[instrument(skip(self, params))]
    async fn send_message(&self, params: &ParamMap) -> ConnectorResult<Value> {
        let channel = optional_str(params, "channel")
            .map(str::to_string)
            .or_else(|| self.config.default_channel.clone())
            .ok_or(ConnectorError::MissingParam { param: "channel" })?;
        let text = require_str(params, "text")?;
        let thread_ts = optional_str(params, "thread_ts");

        info!(channel = %channel, "Sending chat message");
        self.transport
            .post_message(&channel, text, thread_ts)
            .await
    }

    #[instrument(skip(self, params))]
    async fn upload_file(&self, params: &ParamMap) -> ConnectorResult<Value> {
        let channels: Vec<String> = match params.get("channels") {
            Some(Value::Array(items)) if !items.is_empty() => items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect(),
            Some(Value::String(channel)) => vec![channel.clone()],
            _ => {
                return Err(ConnectorError::MissingParam { param: "channels" });
            }
        };
        let file_path = require_str(params, "file_path")?;
        let title = optional_str(params, "title");
        let comment = optional_str(params, "comment");

        info!(file_path, "Uploading file to chat");
        self.transport
            .upload_file(&channels, file_path, title, comment)
            .await
    }
}

#[async_trait]
impl Connector for SlackConnector {
    async fn execute(&self, operation: &str, params: &ParamMap) -> ConnectorResult<Value> {
        self.enabled.ensure_enabled()?;
        match operation {
            "send_message" => self.send_message(params).await,
            "upload_file" => self.upload_file(params).await,
            other => Err(ConnectorError::UnsupportedOperation {
                operation: other.to_string(),
            }),
        }
    }

    fn supported_operations(&self) -> BTreeSet<String> {
        ["send_message".to_string(), "upload_file".to_string()]
            .into_iter()
            .collect()
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
