//! Web search connector.
//!
//! Dispatches queries to a pluggable engine driver, then normalizes,
//! deduplicates, priority-scores, and orders the results. Result items
//! carry only retrieval metadata (title, url, snippet, domain, and the
//! score breakdown), never summaries or other analytical fields; search
//! output is a list of candidates, not conclusions.

use crate::clock::SharedClock;
use crate::config::TrustedSources;
use crate::connectors::{
    optional_str, optional_u64, require_str, Connector, ConnectorError, ConnectorResult,
    EnabledFlag,
};
use crate::models::ParamMap;
use crate::priority::calculate_priority_score;
use async_trait::async_trait;
use chrono::Datelike;
use scraper::{Html, Selector};
use serde_json::{json, Value};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};
use url::Url;

/// One raw record as returned by an engine driver, before normalization.
#[derive(Debug, Clone, Default)]
pub struct RawSearchRecord {
    pub title: Option<String>,
    pub url: Option<String>,
    pub snippet: Option<String>,
}

/// A search engine driver.
#[async_trait]
pub trait SearchEngine: Send + Sync {
    /// Engine name reported in results.
    fn name(&self) -> &str;

    /// Runs one query, returning raw records in engine order.
    async fn search(
        &self,
        query: &str,
        max_results: usize,
        language: &str,
    ) -> ConnectorResult<Vec<RawSearchRecord>>;
}

/// DuckDuckGo driver.
///
/// The HTML endpoint is queried with a blocking client on a worker thread
/// (`spawn_blocking`) and parsed synchronously; nothing blocking touches
/// the async executor.
pub struct DuckDuckGoEngine {
    timeout: Duration,
    user_agent: String,
}

impl Default for DuckDuckGoEngine {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

impl DuckDuckGoEngine {
    /// Creates a driver with the given request timeout.
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            user_agent: "Portcullis/0.1".to_string(),
        }
    }

    fn search_blocking(
        query: &str,
        max_results: usize,
        language: &str,
        timeout: Duration,
        user_agent: &str,
    ) -> ConnectorResult<Vec<RawSearchRecord>> {
        let region = if language.is_empty() {
            "wt-wt".to_string()
        } else {
            format!("{language}-{language}")
        };

        let client = reqwest::blocking::Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()
            .map_err(|e| ConnectorError::Network {
                message: format!("Failed to build search client: {e}"),
            })?;

        let response = client
            .post("https://html.duckduckgo.com/html/")
            .form(&[("q", query), ("kl", region.as_str())])
            .send()
            .map_err(|e| {
                if e.is_timeout() {
                    ConnectorError::Timeout {
                        timeout_ms: timeout.as_millis() as u64,
                    }
                } else {
                    ConnectorError::Network {
                        message: format!("Network error during search: {e}"),
                    }
                }
            })?;

        if response.status().as_u16() == 429 {
            return Err(ConnectorError::Search {
                message: "Search engine rate limit exceeded (HTTP 429)".to_string(),
            });
        }
        if !response.status().is_success() {
            return Err(ConnectorError::Search {
                message: format!("Search engine returned HTTP {}", response.status().as_u16()),
            });
        }

        let body = response.text().map_err(|e| ConnectorError::Network {
            message: format!("Failed to read search response: {e}"),
        })?;

        Ok(parse_result_page(&body, max_results))
    }
}

#[async_trait]
impl SearchEngine for DuckDuckGoEngine {
    fn name(&self) -> &str {
        "duckduckgo"
    }

    async fn search(
        &self,
        query: &str,
        max_results: usize,
        language: &str,
    ) -> ConnectorResult<Vec<RawSearchRecord>> {
        let query = query.to_string();
        let language = language.to_string();
        let timeout = self.timeout;
        let user_agent = self.user_agent.clone();

        tokio::task::spawn_blocking(move || {
            Self::search_blocking(&query, max_results, &language, timeout, &user_agent)
        })
        .await
        .map_err(|e| ConnectorError::Search {
            message: format!("Search worker failed: {e}"),
        })?
    }
}

/// Parses a DuckDuckGo HTML result page into raw records.
fn parse_result_page(body: &str, max_results: usize) -> Vec<RawSearchRecord> {
    let document = Html::parse_document(body);
    let result_selector = Selector::parse("div.result").expect("static selector");
    let title_selector = Selector::parse("a.result__a").expect("static selector");
    let snippet_selector =
        Selector::parse("a.result__snippet, div.result__snippet").expect("static selector");

    let mut records = Vec::new();
    for result in document.select(&result_selector) {
        if records.len() >= max_results {
            break;
        }
        let Some(anchor) = result.select(&title_selector).next() else {
            continue;
        };
        let title: String = anchor.text().collect::<Vec<_>>().join(" ");
        let href = anchor.value().attr("href").map(decode_redirect_url);
        let snippet = result
            .select(&snippet_selector)
            .next()
            .map(|el| el.text().collect::<Vec<_>>().join(" "));

        records.push(RawSearchRecord {
            title: Some(title.trim().to_string()),
            url: href,
            snippet: snippet.map(|s| s.trim().to_string()),
        });
    }
    records
}

/// Unwraps DuckDuckGo's redirect links (`/l/?uddg=<encoded>`) to the real
/// target, passing other URLs through.
fn decode_redirect_url(href: &str) -> String {
    let absolute = if href.starts_with("//") {
        format!("https:{href}")
    } else {
        href.to_string()
    };
    if let Ok(parsed) = Url::parse(&absolute) {
        if parsed.path().starts_with("/l/") {
            if let Some((_, target)) = parsed.query_pairs().find(|(key, _)| key == "uddg") {
                return target.into_owned();
            }
        }
    }
    absolute
}

/// Fixed-response engine for tests and offline use.
pub struct StaticSearchEngine {
    records: Vec<RawSearchRecord>,
}

impl StaticSearchEngine {
    /// Creates an engine that always returns the given records.
    #[must_use]
    pub fn new(records: Vec<RawSearchRecord>) -> Self {
        Self { records }
    }
}

#[async_trait]
impl SearchEngine for StaticSearchEngine {
    fn name(&self) -> &str {
        "static"
    }

    async fn search(
        &self,
        _query: &str,
        max_results: usize,
        _language: &str,
    ) -> ConnectorResult<Vec<RawSearchRecord>> {
        Ok(self.records.iter().take(max_results).cloned().collect())
    }
}

/// Web search connector configuration.
#[derive(Debug, Clone)]
pub struct WebSearchConfig {
    /// Default result cap when the request supplies none.
    pub max_results: usize,
    /// Whether to drop duplicate URLs.
    pub deduplicate: bool,
    /// Default language code.
    pub language: String,
}

impl Default for WebSearchConfig {
    fn default() -> Self {
        Self {
            max_results: 10,
            deduplicate: true,
            language: "en".to_string(),
        }
    }
}

/// Connector for web search operations.
pub struct WebSearchConnector {
    config: WebSearchConfig,
    engine: Arc<dyn SearchEngine>,
    trusted_sources: TrustedSources,
    clock: SharedClock,
    enabled: EnabledFlag,
}

impl WebSearchConnector {
    /// Creates a connector over the given engine driver.
    #[must_use]
    pub fn new(
        config: WebSearchConfig,
        engine: Arc<dyn SearchEngine>,
        trusted_sources: TrustedSources,
        clock: SharedClock,
    ) -> Self {
        Self {
            config,
            engine,
            trusted_sources,
            clock,
            enabled: EnabledFlag::new(),
        }
    }

    #[instrument(skip(self, params), fields(engine = %self.engine.name()))]
    async fn search(&self, params: &ParamMap) -> ConnectorResult<Value> {
        let query = require_str(params, "query")?;
        let max_results = optional_u64(params, "max_results")
            .map_or(self.config.max_results, |n| n as usize);
        let language = optional_str(params, "language").unwrap_or(&self.config.language);

        info!(query, max_results, "Performing search");
        // Over-fetch so deduplication does not shrink the page below the cap.
        let raw = self
            .engine
            .search(query, max_results.saturating_mul(2), language)
            .await?;

        let mut items = normalize_records(raw);
        if self.config.deduplicate {
            items = deduplicate(items);
        }

        let current_year = self.clock.now().year();
        let mut scored: Vec<Value> = items
            .into_iter()
            .map(|item| {
                let score = calculate_priority_score(
                    &item.url,
                    &item.snippet,
                    &self.trusted_sources,
                    current_year,
                );
                json!({
                    "title": item.title,
                    "url": item.url,
                    "snippet": item.snippet,
                    "domain": item.domain,
                    // Search output is always candidate-tier, whatever the
                    // underlying domain.
                    "trust_tier": crate::models::TrustTier::SearchResult.as_str(),
                    "priority_score": score.total_score,
                    "priority_reasons": score.reason_strings(),
                })
            })
            .collect();

        // Stable sort: engine order survives among equal scores.
        scored.sort_by_key(|item| {
            std::cmp::Reverse(item["priority_score"].as_u64().unwrap_or(0))
        });
        scored.truncate(max_results);
        let total_results = scored.len();

        Ok(json!({
            "query": query,
            "results": scored,
            "total_results": total_results,
            "engine": self.engine.name(),
        }))
    }
}

#[async_trait]
impl Connector for WebSearchConnector {
    async fn execute(&self, operation: &str, params: &ParamMap) -> ConnectorResult<Value> {
        self.enabled.ensure_enabled()?;
        match operation {
            "search" => self.search(params).await,
            other => Err(ConnectorError::UnsupportedOperation {
                operation: other.to_string(),
            }),
        }
    }

    fn supported_operations(&self) -> BTreeSet<String> {
        ["search".to_string()].into_iter().collect()
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

/// A normalized result, pre-scoring.
#[derive(Debug, Clone)]
struct NormalizedResult {
    title: String,
    url: String,
    snippet: String,
    domain: String,
}

/// Converts raw engine records into normalized results, dropping entries
/// without a URL or with a malformed scheme/host.
fn normalize_records(raw: Vec<RawSearchRecord>) -> Vec<NormalizedResult> {
    let mut normalized = Vec::new();
    for record in raw {
        let Some(url) = record.url else {
            warn!("Skipping search result without URL");
            continue;
        };
        let url = url.trim().to_string();
        let Ok(parsed) = Url::parse(&url) else {
            warn!(url, "Skipping result with unparseable URL");
            continue;
        };
        if !matches!(parsed.scheme(), "http" | "https") {
            warn!(url, "Skipping result with non-http scheme");
            continue;
        }
        let Some(domain) = parsed.host_str().map(str::to_string) else {
            warn!(url, "Skipping result without host");
            continue;
        };

        normalized.push(NormalizedResult {
            title: record.title.unwrap_or_default().trim().to_string(),
            url,
            snippet: record.snippet.unwrap_or_default().trim().to_string(),
            domain,
        });
    }
    normalized
}

/// Drops results whose normalized URL (lower-cased, trailing slash
/// stripped, query string ignored) was already seen. First occurrence
/// wins, preserving engine order.
fn deduplicate(items: Vec<NormalizedResult>) -> Vec<NormalizedResult> {
    let mut seen: BTreeSet<String> = BTreeSet::new();
    let mut unique = Vec::new();

    for item in items {
        let key = match Url::parse(&item.url.to_ascii_lowercase()) {
            Ok(parsed) => format!(
                "{}://{}{}",
                parsed.scheme(),
                parsed.host_str().unwrap_or_default(),
                parsed.path().trim_end_matches('/')
            ),
            Err(_) => item.url.to_ascii_lowercase(),
        };
        if seen.insert(key) {
            unique.push(item);
        } else {
            debug!(url = %item.url, "Skipping duplicate URL");
        }
    }
    unique
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::manual_clock;
    use chrono::TimeZone;

    fn record(title: &str, url: &str, snippet: &str) -> RawSearchRecord {
        RawSearchRecord {
            title: Some(title.to_string()),
            url: Some(url.to_string()),
            snippet: Some(snippet.to_string()),
        }
    }

    fn connector(records: Vec<RawSearchRecord>) -> WebSearchConnector {
        let clock: SharedClock = manual_clock(
            chrono::Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap(),
        );
        WebSearchConnector::new(
            WebSearchConfig::default(),
            Arc::new(StaticSearchEngine::new(records)),
            TrustedSources {
                official_policy: vec!["gov.au".to_string()],
                recognized_ngo: vec!["climatecouncil.org.au".to_string()],
            },
            clock,
        )
    }

    fn search_params(query: &str) -> ParamMap {
        let mut params = ParamMap::new();
        params.insert("query".to_string(), json!(query));
        params
    }

    #[tokio::test]
    async fn test_should_reject_empty_query_when_searching() {
        let connector = connector(vec![]);
        for params in [
            ParamMap::new(),
            search_params(""),
            search_params("   "),
        ] {
            let error = connector.execute("search", &params).await.unwrap_err();
            assert!(
                matches!(
                    error,
                    ConnectorError::MissingParam { .. } | ConnectorError::InvalidParam { .. }
                ),
                "got {error:?}"
            );
        }
    }

    #[tokio::test]
    async fn test_should_drop_records_without_usable_urls_when_normalizing() {
        let connector = connector(vec![
            record("Good", "https://example.com/a", "text"),
            RawSearchRecord {
                title: Some("No URL".to_string()),
                url: None,
                snippet: None,
            },
            record("Bad scheme", "ftp://example.com/b", "text"),
            record("Unparseable", "not a url", "text"),
        ]);

        let result = connector
            .execute("search", &search_params("q"))
            .await
            .unwrap();
        assert_eq!(result["total_results"], 1);
        assert_eq!(result["results"][0]["url"], "https://example.com/a");
    }

    #[tokio::test]
    async fn test_should_deduplicate_by_normalized_url_when_searching() {
        let connector = connector(vec![
            record("One", "https://example.com/page", "first"),
            record("Two", "https://EXAMPLE.com/page/", "same path"),
            record("Three", "https://example.com/page?utm=tracking", "query ignored"),
            record("Other", "https://example.com/other", "different"),
        ]);

        let result = connector
            .execute("search", &search_params("q"))
            .await
            .unwrap();
        assert_eq!(result["total_results"], 2);
        // First occurrence wins.
        assert_eq!(result["results"][0]["snippet"], "first");
    }

    #[tokio::test]
    async fn test_should_rank_by_priority_score_descending_when_searching() {
        let connector = connector(vec![
            record("Blog", "https://myblog.com/climate-post", "Personal thoughts"),
            record(
                "Gov policy",
                "https://environment.gov.au/policy/emissions.pdf",
                "Updated 2026. National framework.",
            ),
            record(
                "NGO report",
                "https://climatecouncil.org.au/resources/report-2026",
                "Published in 2026",
            ),
        ]);

        let result = connector
            .execute("search", &search_params("climate"))
            .await
            .unwrap();
        let results = result["results"].as_array().unwrap();
        assert_eq!(results[0]["url"], "https://environment.gov.au/policy/emissions.pdf");
        assert!(
            results[0]["priority_score"].as_u64().unwrap()
                > results[1]["priority_score"].as_u64().unwrap()
        );
        assert_eq!(results[2]["url"], "https://myblog.com/climate-post");
    }

    #[tokio::test]
    async fn test_should_preserve_engine_order_among_ties_when_sorting() {
        let connector = connector(vec![
            record("First", "https://alpha.example.com/a", "no dates"),
            record("Second", "https://beta.example.com/b", "no dates"),
            record("Third", "https://gamma.example.com/c", "no dates"),
        ]);

        let result = connector
            .execute("search", &search_params("q"))
            .await
            .unwrap();
        let results = result["results"].as_array().unwrap();
        assert_eq!(results[0]["title"], "First");
        assert_eq!(results[1]["title"], "Second");
        assert_eq!(results[2]["title"], "Third");
    }

    #[tokio::test]
    async fn test_should_truncate_to_max_results_when_searching() {
        let records: Vec<RawSearchRecord> = (0..8)
            .map(|i| record(&format!("R{i}"), &format!("https://site{i}.example.com"), ""))
            .collect();
        let connector = connector(records);

        let mut params = search_params("q");
        params.insert("max_results".to_string(), json!(3));
        let result = connector.execute("search", &params).await.unwrap();
        assert_eq!(result["total_results"], 3);
        assert_eq!(result["results"].as_array().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_should_carry_no_analytical_fields_when_returning_results() {
        let connector = connector(vec![record(
            "Item",
            "https://example.com/a",
            "snippet text",
        )]);

        let result = connector
            .execute("search", &search_params("q"))
            .await
            .unwrap();
        let item = &result["results"][0];
        for field in ["summary", "why_it_matters", "analysis", "verdict"] {
            assert!(item.get(field).is_none(), "unexpected field {field}");
        }
        assert!(item["priority_reasons"].is_array());
        assert!(item["priority_score"].as_u64().is_some());
    }

    #[test]
    fn test_should_unwrap_redirect_links_when_decoding() {
        let wrapped =
            "//duckduckgo.com/l/?uddg=https%3A%2F%2Fexample.gov%2Fpolicy%2Fa.pdf&rut=abc";
        assert_eq!(
            decode_redirect_url(wrapped),
            "https://example.gov/policy/a.pdf"
        );
        assert_eq!(
            decode_redirect_url("https://example.com/direct"),
            "https://example.com/direct"
        );
    }

    #[test]
    fn test_should_parse_result_markup_when_reading_engine_page() {
        let page = r#"
        <html><body>
          <div class="result">
            <a class="result__a" href="https://example.com/one">First result</a>
            <a class="result__snippet">Snippet one</a>
          </div>
          <div class="result">
            <a class="result__a" href="//duckduckgo.com/l/?uddg=https%3A%2F%2Fexample.org%2Ftwo">Second</a>
            <div class="result__snippet">Snippet two</div>
          </div>
          <div class="result"><span>no anchor</span></div>
        </body></html>"#;

        let records = parse_result_page(page, 10);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].url.as_deref(), Some("https://example.com/one"));
        assert_eq!(records[0].title.as_deref(), Some("First result"));
        assert_eq!(records[1].url.as_deref(), Some("https://example.org/two"));
        assert_eq!(records[1].snippet.as_deref(), Some("Snippet two"));
    }

    #[tokio::test]
    async fn test_should_refuse_unsupported_operations_when_executing() {
        let connector = connector(vec![]);
        let error = connector
            .execute("crawl", &search_params("q"))
            .await
            .unwrap_err();
        assert!(matches!(error, ConnectorError::UnsupportedOperation { .. }));
    }
}
