//! Property-based checks of the security invariants: outbound hard rules,
//! SSRF address classes, trust-tier classification, scorer determinism,
//! sanitizer idempotence, and the mode taxonomy.

mod common;

use portcullis::clock::system_clock;
use portcullis::domain_types::ApprovalToken;
use portcullis::models::{
    CommunicationRequest, ConnectorKind, ExecutionPhase, ParamMap, ReasonCode, RequestStatus,
};
use portcullis::priority::calculate_priority_score;
use portcullis::sanitize::OutputSanitizer;
use portcullis::ssrf::classify_forbidden;
use portcullis::{
    NetworkMode, PolicyEngine, SsrfGuard, TrustTier, TrustTierClassifier, TrustedSources,
};
use proptest::prelude::*;
use serde_json::json;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

fn request(
    kind: ConnectorKind,
    operation: &str,
    token: Option<String>,
) -> CommunicationRequest {
    let mut params = ParamMap::new();
    params.insert("to".to_string(), json!("a@b.co"));
    params.insert("subject".to_string(), json!("s"));
    params.insert("body".to_string(), json!("b"));
    CommunicationRequest::new(
        kind,
        operation,
        params,
        ParamMap::new(),
        ExecutionPhase::Execution,
        ApprovalToken::from_raw(token),
        system_clock().now(),
    )
}

fn outbound_kind() -> impl Strategy<Value = ConnectorKind> {
    prop_oneof![Just(ConnectorKind::EmailSmtp), Just(ConnectorKind::Slack)]
}

#[test]
fn prop_planning_phase_always_denies_outbound() {
    let rt = runtime();
    let engine = PolicyEngine::new(Arc::new(SsrfGuard::new()));

    proptest!(|(
        kind in outbound_kind(),
        operation in "[a-z_]{1,16}",
        token in proptest::option::of("[a-zA-Z0-9-]{1,24}"),
    )| {
        let req = request(kind, &operation, token);
        let verdict = rt.block_on(engine.evaluate(&req, ExecutionPhase::Planning));
        prop_assert_eq!(verdict.status, RequestStatus::Denied);
        prop_assert_eq!(verdict.reason_code, ReasonCode::OutboundForbiddenInPlanning);
    });
}

#[test]
fn prop_outbound_without_token_always_requires_admin() {
    let rt = runtime();
    let engine = PolicyEngine::new(Arc::new(SsrfGuard::new()));

    proptest!(|(
        kind in outbound_kind(),
        operation in "[a-z_]{1,16}",
        empty_token in prop_oneof![Just(None), Just(Some(String::new()))],
    )| {
        let req = request(kind, &operation, empty_token);
        let verdict = rt.block_on(engine.evaluate(&req, ExecutionPhase::Execution));
        prop_assert_eq!(verdict.status, RequestStatus::RequireAdmin);
        prop_assert_eq!(verdict.reason_code, ReasonCode::OutboundRequiresApproval);
    });
}

#[test]
fn prop_forbidden_ranges_are_always_classified() {
    proptest!(|(host_octet in 0u8..=255, low in 0u8..=255)| {
        // Loopback 127.0.0.0/8
        let loopback = IpAddr::V4(Ipv4Addr::new(127, host_octet, low, 1));
        prop_assert!(classify_forbidden(loopback).is_some());

        // RFC1918 10.0.0.0/8
        let rfc1918 = IpAddr::V4(Ipv4Addr::new(10, host_octet, low, 1));
        prop_assert!(classify_forbidden(rfc1918).is_some());

        // Link-local 169.254.0.0/16 (cloud metadata range)
        let link_local = IpAddr::V4(Ipv4Addr::new(169, 254, host_octet, low));
        prop_assert!(classify_forbidden(link_local).is_some());

        // 192.168.0.0/16
        let private = IpAddr::V4(Ipv4Addr::new(192, 168, host_octet, low));
        prop_assert!(classify_forbidden(private).is_some());
    });
}

#[test]
fn prop_non_http_schemes_are_always_rejected() {
    let rt = runtime();
    let guard = SsrfGuard::new();

    proptest!(|(scheme in "[a-z]{2,8}", host in "[a-z]{3,10}")| {
        prop_assume!(scheme != "http" && scheme != "https");
        let url = format!("{scheme}://{host}.example.com/path");
        let result = rt.block_on(guard.validate(&url));
        prop_assert!(result.is_err());
    });
}

#[test]
fn prop_search_results_always_classify_as_search_tier() {
    let classifier = TrustTierClassifier::new();

    proptest!(|(url in ".{0,60}")| {
        prop_assert_eq!(
            classifier.classify(&url, ConnectorKind::WebSearch),
            TrustTier::SearchResult
        );
    });
}

#[test]
fn prop_priority_scoring_is_deterministic() {
    let trusted = TrustedSources {
        official_policy: vec!["gov.au".to_string()],
        recognized_ngo: vec!["ngo.org".to_string()],
    };

    proptest!(|(
        host in "[a-z]{3,10}\\.(gov|edu|org|com)",
        path in "(/[a-z]{1,8}){0,3}",
        snippet in ".{0,80}",
    )| {
        let url = format!("https://{host}{path}");
        let first = calculate_priority_score(&url, &snippet, &trusted, 2026);
        let second = calculate_priority_score(&url, &snippet, &trusted, 2026);
        prop_assert_eq!(first.total_score, second.total_score);
        prop_assert_eq!(first.reasons, second.reasons);
        prop_assert!(first.total_score >= first.domain_score);
    });
}

#[test]
fn prop_output_redaction_is_idempotent() {
    let sanitizer = OutputSanitizer::new();

    proptest!(|(text in ".{0,120}")| {
        let once = sanitizer.redact_string(&text);
        let twice = sanitizer.redact_string(&once);
        prop_assert_eq!(&once, &twice);
    });
}

#[test]
fn prop_output_redaction_is_idempotent_with_credentials() {
    let sanitizer = OutputSanitizer::new();

    proptest!(|(key in "[a-zA-Z0-9_-]{20,40}", filler in "[a-z ]{0,40}")| {
        let text = format!("{filler} api_key={key} password=hunter2secret");
        let once = sanitizer.redact_string(&text);
        let twice = sanitizer.redact_string(&once);
        prop_assert_eq!(&once, &twice);
        prop_assert!(!once.contains(&key));
    });
}

#[test]
fn prop_readonly_mode_always_denies_write_verbs() {
    let rt = runtime();
    let gateway = rt.block_on(common::gateway());
    let manager = gateway.service.mode_manager();
    let write_verbs = [
        "send", "post", "put", "delete", "create", "update", "write", "publish",
    ];

    proptest!(|(index in 0usize..8, suffix in "[a-z_]{0,8}")| {
        let verb = write_verbs[index];
        // The bare verb and any operation embedding it are both denied.
        let (allowed, _) = manager.is_operation_allowed(verb, Some(NetworkMode::ReadOnly));
        prop_assert!(!allowed);

        let composite = format!("{verb}_{suffix}");
        let (allowed, _) =
            manager.is_operation_allowed(&composite, Some(NetworkMode::ReadOnly));
        prop_assert!(!allowed);
    });
}

#[test]
fn prop_off_mode_denies_every_operation() {
    let rt = runtime();
    let gateway = rt.block_on(common::gateway());
    let manager = gateway.service.mode_manager();

    proptest!(|(operation in "[a-z_]{1,20}")| {
        let (allowed, reason) = manager.is_operation_allowed(&operation, Some(NetworkMode::Off));
        prop_assert!(!allowed);
        prop_assert!(reason.is_some());
    });
}

#[test]
fn prop_request_summaries_never_leak_sensitive_values() {
    let rt = runtime();
    let gateway = rt.block_on(common::gateway());

    proptest!(|(secret in "[A-Za-z0-9]{24,32}")| {
        let response = rt.block_on(gateway.service.execute(
            ConnectorKind::WebSearch,
            "search",
            common::params(json!({
                "query": "harmless",
                "api_key": secret.clone(),
                "password": secret.clone(),
            })),
            ParamMap::new(),
            ExecutionPhase::Execution,
            None,
        ));

        let record = rt
            .block_on(
                gateway
                    .service
                    .evidence_logger()
                    .get_request_evidence(&response.request_id),
            )
            .unwrap()
            .unwrap();
        let summary = record.request_summary.to_string();
        prop_assert!(!summary.contains(&secret));
        prop_assert!(!summary.contains("api_key"));
        prop_assert!(!summary.contains("password"));
    });
}
