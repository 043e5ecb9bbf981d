//! SSRF-hardened web fetch connector.
//!
//! Operations: `fetch` (page retrieval with optional HTML extraction) and
//! `download` (streaming to disk). Every target URL, including every
//! redirect hop, passes through the SSRF guard before a connection is
//! opened. Response size is enforced twice: against an advertised
//! `Content-Length` before the body is read, and against the streamed
//! total while it is read. Failed or oversized downloads remove their
//! partial files.

use crate::clock::{iso_z, SharedClock};
use crate::connectors::{
    optional_str, optional_u64, require_str, Connector, ConnectorError, ConnectorResult,
    EnabledFlag,
};
use crate::models::{ConnectorKind, ParamMap};
use crate::ssrf::{DnsCache, SsrfGuard};
use crate::trust::TrustTierClassifier;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE, LOCATION};
use reqwest::{Method, StatusCode};
use scraper::{ElementRef, Html, Selector};
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{info, instrument, warn};
use url::Url;
use uuid::Uuid;

/// Extraction bounds.
const TEXT_LIMIT_CHARS: usize = 10_000;
const HTML_LIMIT_CHARS: usize = 5_000;
const MAX_LINKS: usize = 50;
const MAX_IMAGES: usize = 20;
const MAX_SECTIONS: usize = 20;
const MAX_REFERENCES: usize = 30;
const SECTION_PARAGRAPHS: usize = 3;

/// Web fetch connector configuration.
#[derive(Debug, Clone)]
pub struct WebFetchConfig {
    /// User agent sent with every request.
    pub user_agent: String,
    /// Whether to follow redirects (each hop re-validated).
    pub follow_redirects: bool,
    /// Redirect hop ceiling.
    pub max_redirects: usize,
    /// Default timeout when the policy supplies none.
    pub default_timeout_ms: u64,
    /// Default size ceiling when the policy supplies none.
    pub default_max_size_bytes: u64,
}

impl Default for WebFetchConfig {
    fn default() -> Self {
        Self {
            user_agent: "Portcullis/0.1".to_string(),
            follow_redirects: true,
            max_redirects: 5,
            default_timeout_ms: 30_000,
            default_max_size_bytes: 10 * 1024 * 1024,
        }
    }
}

/// Connector for web content fetching operations.
pub struct WebFetchConnector {
    config: WebFetchConfig,
    guard: Arc<SsrfGuard>,
    classifier: Arc<TrustTierClassifier>,
    clock: SharedClock,
    client: reqwest::Client,
    enabled: EnabledFlag,
}

impl WebFetchConnector {
    /// Creates a connector. Redirects are handled manually so each hop can
    /// be re-validated, so the underlying client never follows them.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(
        config: WebFetchConfig,
        guard: Arc<SsrfGuard>,
        classifier: Arc<TrustTierClassifier>,
        clock: SharedClock,
    ) -> ConnectorResult<Self> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| ConnectorError::Network {
                message: format!("Failed to build HTTP client: {e}"),
            })?;

        Ok(Self {
            config,
            guard,
            classifier,
            clock,
            client,
            enabled: EnabledFlag::new(),
        })
    }

    fn timeout_for(&self, params: &ParamMap) -> Duration {
        Duration::from_millis(
            optional_u64(params, "timeout_ms").unwrap_or(self.config.default_timeout_ms),
        )
    }

    fn max_size_for(&self, params: &ParamMap) -> u64 {
        optional_u64(params, "max_response_size_bytes")
            .unwrap_or(self.config.default_max_size_bytes)
    }

    /// Sends a request, re-validating every redirect target through the
    /// SSRF guard before connecting to it.
    async fn send_with_guard(
        &self,
        mut method: Method,
        url: &str,
        headers: HeaderMap,
        mut body: Option<String>,
        timeout: Duration,
        cache: &mut DnsCache,
    ) -> ConnectorResult<(reqwest::Response, Url)> {
        let mut current = Url::parse(url).map_err(|e| ConnectorError::InvalidParam {
            param: "url",
            reason: e.to_string(),
        })?;

        for _hop in 0..=self.config.max_redirects {
            self.guard
                .validate_with_cache(current.as_str(), cache)
                .await?;

            let mut request = self
                .client
                .request(method.clone(), current.clone())
                .headers(headers.clone())
                .timeout(timeout);
            if let Some(body) = &body {
                request = request.body(body.clone());
            }

            let response = request.send().await.map_err(|e| {
                if e.is_timeout() {
                    ConnectorError::Timeout {
                        timeout_ms: timeout.as_millis() as u64,
                    }
                } else {
                    ConnectorError::Network {
                        message: e.to_string(),
                    }
                }
            })?;

            if !(self.config.follow_redirects && response.status().is_redirection()) {
                return Ok((response, current));
            }

            let Some(location) = response
                .headers()
                .get(LOCATION)
                .and_then(|value| value.to_str().ok())
            else {
                return Ok((response, current));
            };

            let next = current.join(location).map_err(|e| ConnectorError::Network {
                message: format!("Invalid redirect location '{location}': {e}"),
            })?;

            // Browsers demote the method on 301/302/303; 307/308 preserve it.
            if matches!(
                response.status(),
                StatusCode::MOVED_PERMANENTLY | StatusCode::FOUND | StatusCode::SEE_OTHER
            ) {
                method = Method::GET;
                body = None;
            }

            info!(from = %current, to = %next, "Following redirect");
            current = next;
        }

        Err(ConnectorError::Network {
            message: format!("Too many redirects (limit {})", self.config.max_redirects),
        })
    }

    /// Reads the response body under the size ceiling.
    async fn read_body(
        response: reqwest::Response,
        max_size: u64,
    ) -> ConnectorResult<(Vec<u8>, HeaderMap, StatusCode)> {
        use futures::StreamExt;

        let status = response.status();
        let headers = response.headers().clone();

        if let Some(advertised) = response.content_length() {
            if advertised > max_size {
                return Err(ConnectorError::SizeExceeded {
                    actual: advertised,
                    limit: max_size,
                });
            }
        }

        let mut body = Vec::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| ConnectorError::Network {
                message: e.to_string(),
            })?;
            if (body.len() + chunk.len()) as u64 > max_size {
                return Err(ConnectorError::SizeExceeded {
                    actual: (body.len() + chunk.len()) as u64,
                    limit: max_size,
                });
            }
            body.extend_from_slice(&chunk);
        }

        Ok((body, headers, status))
    }

    #[instrument(skip(self, params), fields(url = %optional_str(params, "url").unwrap_or("")))]
    async fn fetch(&self, params: &ParamMap) -> ConnectorResult<Value> {
        let url = require_str(params, "url")?;
        let method_raw = optional_str(params, "method").unwrap_or("GET");
        let method = Method::from_bytes(method_raw.to_ascii_uppercase().as_bytes()).map_err(
            |_| ConnectorError::InvalidParam {
                param: "method",
                reason: format!("unsupported HTTP method '{method_raw}'"),
            },
        )?;
        let body = optional_str(params, "body").map(str::to_string);
        let extract_content = params
            .get("extract_content")
            .and_then(Value::as_bool)
            .unwrap_or(true);
        let timeout = self.timeout_for(params);
        let max_size = self.max_size_for(params);
        let headers = build_headers(params)?;

        let mut cache = DnsCache::new();
        let (response, final_url) = self
            .send_with_guard(method, url, headers, body, timeout, &mut cache)
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ConnectorError::HttpStatus {
                status: status.as_u16(),
            });
        }

        let (bytes, response_headers, status) = Self::read_body(response, max_size).await?;
        let content = String::from_utf8_lossy(&bytes).into_owned();
        let content_length = bytes.len() as u64;
        let content_type = response_headers
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_string();

        let mut result = Map::new();
        result.insert("url".to_string(), json!(url));
        result.insert("final_url".to_string(), json!(final_url.as_str()));
        result.insert("status_code".to_string(), json!(status.as_u16()));
        result.insert("content".to_string(), json!(content));
        result.insert("headers".to_string(), headers_to_json(&response_headers));
        result.insert("content_type".to_string(), json!(content_type));
        result.insert("content_length".to_string(), json!(content_length));

        if extract_content && content_type.to_ascii_lowercase().contains("text/html") {
            let extracted = extract_html_content(&content, final_url.as_str());
            let document = self.build_fetched_document(
                final_url.as_str(),
                &extracted,
                status.as_u16(),
                &content_type,
                content_length,
            );
            info!(title = %extracted.title, "Extracted HTML content");
            result.insert("extracted".to_string(), extracted.to_json());
            result.insert("fetched_document".to_string(), document);
        }

        info!(
            bytes = content_length,
            status = status.as_u16(),
            "Fetched content"
        );
        Ok(Value::Object(result))
    }

    #[instrument(skip(self, params), fields(url = %optional_str(params, "url").unwrap_or("")))]
    async fn download(&self, params: &ParamMap) -> ConnectorResult<Value> {
        use futures::StreamExt;

        let url = require_str(params, "url")?;
        let timeout = self.timeout_for(params);
        let max_size = self.max_size_for(params);

        let destination = match optional_str(params, "destination") {
            Some(path) => PathBuf::from(path),
            None => std::env::temp_dir().join(format!(
                "portcullis-{}{}",
                Uuid::new_v4().simple(),
                file_extension(url)
            )),
        };

        let mut cache = DnsCache::new();
        let (response, final_url) = self
            .send_with_guard(
                Method::GET,
                url,
                build_headers(params)?,
                None,
                timeout,
                &mut cache,
            )
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ConnectorError::HttpStatus {
                status: status.as_u16(),
            });
        }

        if let Some(advertised) = response.content_length() {
            if advertised > max_size {
                return Err(ConnectorError::SizeExceeded {
                    actual: advertised,
                    limit: max_size,
                });
            }
        }

        let response_headers = response.headers().clone();
        let content_type = response_headers
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or("application/octet-stream")
            .to_string();

        // The guard removes the partial file on every early exit,
        // including cancellation; it is defused only after a full write.
        let cleanup = PartialFileGuard::new(destination.clone());
        let mut file = tokio::fs::File::create(&destination).await?;
        let mut total: u64 = 0;
        let mut stream = response.bytes_stream();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| ConnectorError::Network {
                message: e.to_string(),
            })?;
            total += chunk.len() as u64;
            if total > max_size {
                return Err(ConnectorError::SizeExceeded {
                    actual: total,
                    limit: max_size,
                });
            }
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        cleanup.defuse();

        info!(bytes = total, destination = %destination.display(), "Downloaded file");
        Ok(json!({
            "url": url,
            "final_url": final_url.as_str(),
            "destination": destination.to_string_lossy(),
            "size": total,
            "content_type": content_type,
            "headers": headers_to_json(&response_headers),
        }))
    }

    /// Builds the structured `fetched_document` object. Field names are a
    /// wire contract; the object carries no analytical fields.
    fn build_fetched_document(
        &self,
        url: &str,
        extracted: &ExtractedContent,
        status_code: u16,
        content_type: &str,
        content_length: u64,
    ) -> Value {
        let source_domain = Url::parse(url)
            .ok()
            .and_then(|parsed| parsed.host_str().map(str::to_string))
            .unwrap_or_default();
        let trust_tier = self.classifier.classify(url, ConnectorKind::WebFetch);

        let mut hasher = Sha256::new();
        hasher.update(extracted.text.as_bytes());
        let content_hash = format!("{:x}", hasher.finalize());

        json!({
            "type": "fetched_document",
            "trust_tier": trust_tier.as_str(),
            "url": url,
            "source_domain": source_domain,
            "content": {
                "title": extracted.title,
                "publish_date": extracted.publish_date,
                "author": extracted.author,
                "body_text": extracted.text,
                "sections": extracted.sections,
                "references": extracted.references,
            },
            "metadata": {
                "fetched_at": iso_z(self.clock.now()),
                "content_hash": content_hash,
                "status_code": status_code,
                "content_type": content_type,
                "content_length": content_length,
            },
        })
    }
}

#[async_trait]
impl Connector for WebFetchConnector {
    async fn execute(&self, operation: &str, params: &ParamMap) -> ConnectorResult<Value> {
        self.enabled.ensure_enabled()?;
        match operation {
            "fetch" => self.fetch(params).await,
            "download" => self.download(params).await,
            other => Err(ConnectorError::UnsupportedOperation {
                operation: other.to_string(),
            }),
        }
    }

    fn supported_operations(&self) -> BTreeSet<String> {
        ["fetch".to_string(), "download".to_string()]
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

/// Deletes a partially written file unless defused.
struct PartialFileGuard {
    path: PathBuf,
    armed: std::cell::Cell<bool>,
}

impl PartialFileGuard {
    fn new(path: PathBuf) -> Self {
        Self {
            path,
            armed: std::cell::Cell::new(true),
        }
    }

    fn defuse(&self) {
        self.armed.set(false);
    }
}

impl Drop for PartialFileGuard {
    fn drop(&mut self) {
        if self.armed.get() {
            if let Err(e) = std::fs::remove_file(&self.path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(path = %self.path.display(), "Failed to remove partial file: {e}");
                }
            }
        }
    }
}

fn build_headers(params: &ParamMap) -> ConnectorResult<HeaderMap> {
    let mut headers = HeaderMap::new();
    headers.insert(
        reqwest::header::ACCEPT,
        HeaderValue::from_static("text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8"),
    );
    headers.insert(
        reqwest::header::ACCEPT_LANGUAGE,
        HeaderValue::from_static("en-US,en;q=0.9"),
    );

    if let Some(Value::Object(custom)) = params.get("headers") {
        for (key, value) in custom {
            let Some(value) = value.as_str() else {
                continue;
            };
            match (
                HeaderName::from_bytes(key.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                (Ok(name), Ok(value)) => {
                    headers.insert(name, value);
                }
                _ => warn!(header = %key, "Skipping invalid custom header"),
            }
        }
    }

    Ok(headers)
}

fn headers_to_json(headers: &HeaderMap) -> Value {
    let map: Map<String, Value> = headers
        .iter()
        .map(|(name, value)| {
            (
                name.as_str().to_string(),
                Value::String(String::from_utf8_lossy(value.as_bytes()).into_owned()),
            )
        })
        .collect();
    Value::Object(map)
}

fn file_extension(url: &str) -> String {
    Url::parse(url)
        .ok()
        .and_then(|parsed| {
            Path::new(parsed.path())
                .extension()
                .map(|ext| format!(".{}", ext.to_string_lossy()))
        })
        .unwrap_or_default()
}

/// Content pulled out of an HTML page, with bounded sizes.
#[derive(Debug, Clone, Default)]
pub struct ExtractedContent {
    pub title: String,
    pub description: String,
    pub author: Option<String>,
    pub publish_date: Option<String>,
    pub content_html: String,
    pub text: String,
    pub sections: Vec<Value>,
    pub links: Vec<Value>,
    pub references: Vec<Value>,
    pub images: Vec<Value>,
    pub url: String,
}

impl ExtractedContent {
    fn to_json(&self) -> Value {
        json!({
            "title": self.title,
            "description": self.description,
            "author": self.author,
            "publish_date": self.publish_date,
            "content": self.content_html,
            "text": self.text,
            "sections": self.sections,
            "links": self.links,
            "references": self.references,
            "images": self.images,
            "url": self.url,
        })
    }
}

fn sel(selectors: &str) -> Selector {
    Selector::parse(selectors).expect("static selector")
}

fn truncate_chars(value: &str, limit: usize) -> String {
    value.chars().take(limit).collect()
}

/// Extracts title, metadata, readable text, sections, links, references,
/// and images from an HTML document. Pure and synchronous; the parsed tree
/// never crosses an await point.
#[must_use]
pub fn extract_html_content(html: &str, url: &str) -> ExtractedContent {
    let document = Html::parse_document(html);

    let title = first_text(&document, "title")
        .or_else(|| meta_content(&document, "meta[property='og:title']"))
        .unwrap_or_default();

    let description = meta_content(&document, "meta[name='description']")
        .or_else(|| meta_content(&document, "meta[property='og:description']"))
        .unwrap_or_default();

    let author = meta_content(&document, "meta[name='author']")
        .or_else(|| meta_content(&document, "meta[property='article:author']"))
        .or_else(|| first_text(&document, "[itemprop='author']"));

    let publish_date = meta_content(&document, "meta[property='article:published_time']")
        .or_else(|| meta_content(&document, "meta[name='date']"))
        .or_else(|| attr_value(&document, "time[itemprop='datePublished']", "datetime"))
        .or_else(|| attr_value(&document, "time", "datetime"))
        .map(|raw| normalize_date(&raw));

    // Readable text: paragraph-level elements only, which skips script,
    // style, and navigation boilerplate without mutating the tree.
    let text_selector = sel("p, h1, h2, h3, h4, h5, h6, li");
    let mut lines: Vec<String> = Vec::new();
    for element in document.select(&text_selector) {
        let line = element_text(element);
        if !line.is_empty() {
            lines.push(line);
        }
    }
    let text = truncate_chars(&lines.join("\n"), TEXT_LIMIT_CHARS);

    let content_html = main_content_html(&document);

    let sections = extract_sections(&document);

    let link_selector = sel("a[href]");
    let mut links = Vec::new();
    for element in document.select(&link_selector) {
        if links.len() >= MAX_LINKS {
            break;
        }
        let Some(href) = element.value().attr("href") else {
            continue;
        };
        if href.starts_with('#') || href.is_empty() {
            continue;
        }
        links.push(json!({"url": href, "text": element_text(element)}));
    }

    let references = extract_references(&document);

    let image_selector = sel("img[src]");
    let mut images = Vec::new();
    for element in document.select(&image_selector) {
        if images.len() >= MAX_IMAGES {
            break;
        }
        let Some(src) = element.value().attr("src") else {
            continue;
        };
        images.push(json!({
            "url": src,
            "alt": element.value().attr("alt").unwrap_or_default(),
        }));
    }

    ExtractedContent {
        title,
        description,
        author,
        publish_date,
        content_html,
        text,
        sections,
        links,
        references,
        images,
        url: url.to_string(),
    }
}

fn first_text(document: &Html, selectors: &str) -> Option<String> {
    let selector = sel(selectors);
    document.select(&selector).next().map(element_text).filter(|t| !t.is_empty())
}

fn meta_content(document: &Html, selectors: &str) -> Option<String> {
    attr_value(document, selectors, "content")
}

fn attr_value(document: &Html, selectors: &str, attr: &str) -> Option<String> {
    let selector = sel(selectors);
    document
        .select(&selector)
        .next()
        .and_then(|element| element.value().attr(attr))
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn element_text(element: ElementRef<'_>) -> String {
    element
        .text()
        .collect::<Vec<_>>()
        .join(" ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn main_content_html(document: &Html) -> String {
    for selectors in ["main", "article", "div.content", "div#content", "body"] {
        let selector = sel(selectors);
        if let Some(element) = document.select(&selector).next() {
            return truncate_chars(&element.inner_html(), HTML_LIMIT_CHARS);
        }
    }
    String::new()
}

/// Collects headings with the paragraphs that follow them, up to the next
/// heading.
fn extract_sections(document: &Html) -> Vec<Value> {
    let heading_selector = sel("h1, h2, h3, h4, h5, h6");
    let mut sections = Vec::new();

    for heading in document.select(&heading_selector) {
        if sections.len() >= MAX_SECTIONS {
            break;
        }
        let heading_text = element_text(heading);
        if heading_text.is_empty() {
            continue;
        }

        let mut paragraphs = Vec::new();
        for sibling in heading.next_siblings() {
            let Some(element) = ElementRef::wrap(sibling) else {
                continue;
            };
            let name = element.value().name();
            if matches!(name, "h1" | "h2" | "h3" | "h4" | "h5" | "h6") {
                break;
            }
            if name == "p" {
                let paragraph = element_text(element);
                if !paragraph.is_empty() {
                    paragraphs.push(paragraph);
                }
                if paragraphs.len() >= SECTION_PARAGRAPHS {
                    break;
                }
            }
        }

        if !paragraphs.is_empty() {
            sections.push(json!({
                "heading": heading_text,
                "content": paragraphs.join(" "),
            }));
        }
    }

    sections
}

/// Collects links from reference-looking containers (class or id naming
/// references, citations, sources, or footnotes).
fn extract_references(document: &Html) -> Vec<Value> {
    let selector = sel(
        "div[class*='reference'] a[href], section[class*='reference'] a[href], \
         aside[class*='reference'] a[href], div[class*='citation'] a[href], \
         section[class*='citation'] a[href], div[class*='source'] a[href], \
         div[id*='reference'] a[href], section[id*='reference'] a[href], \
         div[id*='footnote'] a[href], div[id*='citation'] a[href]",
    );

    let mut references = Vec::new();
    let mut seen = BTreeSet::new();
    for element in document.select(&selector) {
        if references.len() >= MAX_REFERENCES {
            break;
        }
        let Some(href) = element.value().attr("href") else {
            continue;
        };
        let text = element_text(element);
        if href.starts_with('#') || text.is_empty() || !seen.insert(href.to_string()) {
            continue;
        }
        references.push(json!({"url": href, "text": text}));
    }

    references
}

/// Normalizes a date string: full ISO datetimes are clipped to seconds,
/// bare dates to `YYYY-MM-DD`; unparseable input passes through.
fn normalize_date(raw: &str) -> String {
    if raw.contains('T') {
        let cleaned = raw.replace('Z', "+00:00");
        if let Ok(parsed) = chrono::DateTime::parse_from_rfc3339(&cleaned) {
            return parsed.format("%Y-%m-%dT%H:%M:%S").to_string();
        }
    }
    if raw.len() >= 10 && raw.as_bytes()[4] == b'-' {
        return raw[..10].to_string();
    }
    raw.to_string()
}
