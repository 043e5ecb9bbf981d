//! Shared test harness: a fully wired gateway over an in-memory database,
//! a manual clock, and a fixed-response search engine.

// Each test binary compiles this module separately and uses a subset.
#![allow(dead_code)]

use chrono::TimeZone;
use portcullis::clock::{manual_clock, ManualClock, SharedClock};
use portcullis::connectors::email_smtp::{DryRunMailTransport, EmailSmtpConnector};
use portcullis::connectors::rss::{DryRunFeedSource, RssConfig, RssConnector};
use portcullis::connectors::slack::{DryRunChatTransport, SlackConfig, SlackConnector};
use portcullis::connectors::web_fetch::{WebFetchConfig, WebFetchConnector};
use portcullis::connectors::web_search::{
    RawSearchRecord, StaticSearchEngine, WebSearchConfig, WebSearchConnector,
};
use portcullis::connectors::ConnectorRegistry;
use portcullis::database::DatabaseConnection;
use portcullis::evidence::store::SqliteEvidenceStore;
use portcullis::{
    CommunicationService, EvidenceLogger, NetworkModeManager, ParamMap, PolicyEngine, RateLimiter,
    SsrfGuard, TrustTierClassifier, TrustedSources,
};
use std::sync::Arc;

pub struct TestGateway {
    pub service: CommunicationService,
    pub clock: Arc<ManualClock>,
}

/// Default mixed-quality search records.
pub fn sample_search_records() -> Vec<RawSearchRecord> {
    let record = |title: &str, url: &str, snippet: &str| RawSearchRecord {
        title: Some(title.to_string()),
        url: Some(url.to_string()),
        snippet: Some(snippet.to_string()),
    };
    vec![
        record(
            "Climate Change Blog Post",
            "https://myblog.com/climate-post",
            "Personal thoughts on climate change",
        ),
        record(
            "Government Climate Policy",
            "https://environment.gov.au/climate-change/policy/emissions.pdf",
            "Updated 2026. National emissions reduction framework",
        ),
        record(
            "University Research on Climate",
            "https://research.edu.au/climate/study",
            "Climate research findings from 2025",
        ),
    ]
}

/// Builds a gateway with the given SSRF guard and search fixtures.
pub async fn gateway_with(guard: SsrfGuard, records: Vec<RawSearchRecord>) -> TestGateway {
    let connection = DatabaseConnection::in_memory().await.unwrap();
    let start = chrono::Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
    let clock = manual_clock(start);
    let shared: SharedClock = clock.clone();

    let guard = Arc::new(guard);
    let classifier = Arc::new(TrustTierClassifier::new());
    let store = Arc::new(SqliteEvidenceStore::new(connection.clone()));
    let evidence_logger = Arc::new(EvidenceLogger::new(
        store,
        Arc::clone(&classifier),
        shared.clone(),
    ));
    let mode_manager = Arc::new(
        NetworkModeManager::initialize(connection, shared.clone())
            .await
            .unwrap(),
    );
    let policy_engine = Arc::new(PolicyEngine::new(Arc::clone(&guard)));
    let rate_limiter = Arc::new(RateLimiter::new(shared.clone(), 1000));

    let trusted = TrustedSources {
        official_policy: vec!["gov.au".to_string()],
        recognized_ngo: vec!["climatecouncil.org.au".to_string()],
    };

    let registry = Arc::new(ConnectorRegistry::new());
    registry.register(
        portcullis::ConnectorKind::WebFetch,
        Arc::new(
            WebFetchConnector::new(
                WebFetchConfig::default(),
                Arc::clone(&guard),
                Arc::clone(&classifier),
                shared.clone(),
            )
            .unwrap(),
        ),
    );
    registry.register(
        portcullis::ConnectorKind::WebSearch,
        Arc::new(WebSearchConnector::new(
            WebSearchConfig::default(),
            Arc::new(StaticSearchEngine::new(records)),
            trusted,
            shared.clone(),
        )),
    );
    registry.register(
        portcullis::ConnectorKind::Rss,
        Arc::new(RssConnector::new(
            RssConfig::default(),
            Arc::clone(&guard),
            Arc::new(DryRunFeedSource),
        )),
    );
    registry.register(
        portcullis::ConnectorKind::EmailSmtp,
        Arc::new(EmailSmtpConnector::new(
            Arc::new(DryRunMailTransport),
            shared.clone(),
        )),
    );
    registry.register(
        portcullis::ConnectorKind::Slack,
        Arc::new(SlackConnector::new(
            SlackConfig::default(),
            Arc::new(DryRunChatTransport),
        )),
    );

    let service = CommunicationService::new(
        policy_engine,
        evidence_logger,
        rate_limiter,
        mode_manager,
        registry,
        shared,
    );

    TestGateway { service, clock }
}

/// Gateway with the hardened guard and default fixtures.
pub async fn gateway() -> TestGateway {
    gateway_with(SsrfGuard::new(), sample_search_records()).await
}

/// Builds a parameter map from a JSON object literal.
pub fn params(value: serde_json::Value) -> ParamMap {
    match value {
        serde_json::Value::Object(map) => map,
        _ => ParamMap::new(),
    }
}
