//! Metadata-based priority scoring for search results.
//!
//! Ranks candidate links using only URL structure, snippet regex, and the
//! configured trusted-source lists, never fetched content. Four
//! independent sub-scorers are summed; each emits reasons so a ranking can
//! be audited after the fact. Same inputs always produce the same score.

use crate::config::TrustedSources;
use crate::models::ParamMap;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use url::Url;

static YEAR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(19|20)\d{2}\b").expect("static year pattern"));

/// Why a result scored the way it did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriorityReason {
    GovDomain,
    EduDomain,
    OrgDomain,
    OtherDomain,
    OfficialPolicySource,
    RecognizedNgo,
    GeneralSource,
    PdfDocument,
    PolicyPath,
    BlogOpinion,
    GeneralDocument,
    CurrentYear,
    RecentYear,
    NoDateInfo,
}

impl PriorityReason {
    /// Stable wire name of the reason.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::GovDomain => "gov_domain",
            Self::EduDomain => "edu_domain",
            Self::OrgDomain => "org_domain",
            Self::OtherDomain => "other_domain",
            Self::OfficialPolicySource => "official_policy_source",
            Self::RecognizedNgo => "recognized_ngo",
            Self::GeneralSource => "general_source",
            Self::PdfDocument => "pdf_document",
            Self::PolicyPath => "policy_path",
            Self::BlogOpinion => "blog_opinion",
            Self::GeneralDocument => "general_document",
            Self::CurrentYear => "current_year",
            Self::RecentYear => "recent_year",
            Self::NoDateInfo => "no_date_info",
        }
    }
}

impl fmt::Display for PriorityReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Breakdown of a result's priority score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriorityScore {
    pub total_score: u32,
    pub domain_score: u32,
    pub source_type_score: u32,
    pub document_type_score: u32,
    pub recency_score: u32,
    pub reasons: Vec<PriorityReason>,
    pub metadata: ParamMap,
}

impl PriorityScore {
    /// Zero score with an error annotation, for unparseable URLs.
    fn invalid(url: &str) -> Self {
        let mut metadata = ParamMap::new();
        metadata.insert("error".to_string(), Value::String("invalid_url".to_string()));
        metadata.insert("url".to_string(), Value::String(url.to_string()));
        Self {
            total_score: 0,
            domain_score: 0,
            source_type_score: 0,
            document_type_score: 0,
            recency_score: 0,
            reasons: Vec::new(),
            metadata,
        }
    }

    /// Reason names as wire strings.
    #[must_use]
    pub fn reason_strings(&self) -> Vec<String> {
        self.reasons.iter().map(|r| r.as_str().to_string()).collect()
    }
}

/// Computes the full priority score for one search result.
///
/// `current_year` is injected from the clock so the recency sub-scorer is
/// deterministic under test.
#[must_use]
pub fn calculate_priority_score(
    url: &str,
    snippet: &str,
    trusted_sources: &TrustedSources,
    current_year: i32,
) -> PriorityScore {
    let Ok(parsed) = Url::parse(url) else {
        return PriorityScore::invalid(url);
    };
    let Some(host) = parsed.host_str().map(str::to_ascii_lowercase) else {
        return PriorityScore::invalid(url);
    };
    let host = host.strip_prefix("www.").unwrap_or(&host).to_string();
    let path = parsed.path().to_ascii_lowercase();

    let (domain_score, domain_reason) = score_domain(&host);
    let (source_type_score, source_reason) = score_source_type(&host, trusted_sources);
    let (document_type_score, document_reasons) = score_document_type(&path);
    let (recency_score, recency_reason) = score_recency(snippet, current_year);

    let mut reasons = vec![domain_reason, source_reason];
    reasons.extend(document_reasons);
    reasons.push(recency_reason);

    let mut metadata = ParamMap::new();
    metadata.insert("domain".to_string(), Value::String(host));
    metadata.insert("path".to_string(), Value::String(path));
    metadata.insert(
        "domain_type".to_string(),
        Value::String(domain_reason.as_str().to_string()),
    );
    metadata.insert(
        "source_type".to_string(),
        Value::String(source_reason.as_str().to_string()),
    );

    PriorityScore {
        total_score: domain_score + source_type_score + document_type_score + recency_score,
        domain_score,
        source_type_score,
        document_type_score,
        recency_score,
        reasons,
        metadata,
    }
}

/// Domain authority: `.gov*` 40, `.edu`/`.ac.*` 25, `.org` 15, else 5.
#[must_use]
pub fn score_domain(host: &str) -> (u32, PriorityReason) {
    let labels: Vec<&str> = host.split('.').collect();
    let last = labels.last().copied().unwrap_or_default();
    let second_last = if labels.len() >= 2 {
        labels[labels.len() - 2]
    } else {
        ""
    };

    if last == "gov" || second_last == "gov" {
        (40, PriorityReason::GovDomain)
    } else if last == "edu" || second_last == "ac" || second_last == "edu" {
        (25, PriorityReason::EduDomain)
    } else if last == "org" {
        (15, PriorityReason::OrgDomain)
    } else {
        (5, PriorityReason::OtherDomain)
    }
}

/// Source type against the configured allow-lists: official policy 30,
/// recognized NGO 20, else 5. Subdomains of a listed entry match.
#[must_use]
pub fn score_source_type(
    host: &str,
    trusted_sources: &TrustedSources,
) -> (u32, PriorityReason) {
    if trusted_sources
        .official_policy
        .iter()
        .any(|d| matches_domain(host, d))
    {
        (30, PriorityReason::OfficialPolicySource)
    } else if trusted_sources
        .recognized_ngo
        .iter()
        .any(|d| matches_domain(host, d))
    {
        (20, PriorityReason::RecognizedNgo)
    } else {
        (5, PriorityReason::GeneralSource)
    }
}

/// Document type from path structure: policy/legislation +15, PDF +15,
/// blog/opinion flagged at zero.
#[must_use]
pub fn score_document_type(path: &str) -> (u32, Vec<PriorityReason>) {
    let mut score = 0;
    let mut reasons = Vec::new();

    if path.contains("/policy/") || path.contains("/legislation/") {
        score += 15;
        reasons.push(PriorityReason::PolicyPath);
    }
    if path.ends_with(".pdf") {
        score += 15;
        reasons.push(PriorityReason::PdfDocument);
    }
    if path.contains("/blog/") || path.contains("/opinion/") {
        reasons.push(PriorityReason::BlogOpinion);
    }
    if reasons.is_empty() {
        reasons.push(PriorityReason::GeneralDocument);
    }

    (score, reasons)
}

/// Recency from snippet years: current or previous year scores 10.
/// When several years appear, the most recent one decides.
#[must_use]
pub fn score_recency(snippet: &str, current_year: i32) -> (u32, PriorityReason) {
    let best_year = YEAR_RE
        .find_iter(snippet)
        .filter_map(|m| m.as_str().parse::<i32>().ok())
        .max();

    match best_year {
        Some(year) if year == current_year => (10, PriorityReason::CurrentYear),
        Some(year) if year == current_year - 1 => (10, PriorityReason::RecentYear),
        _ => (0, PriorityReason::NoDateInfo),
    }
}

fn matches_domain(host: &str, domain: &str) -> bool {
    let domain = domain.to_ascii_lowercase();
    host == domain || host.ends_with(&format!(".{domain}"))
}
