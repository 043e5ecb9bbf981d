//! Trust-tier classification of retrieved artifacts.
//!
//! Search results are candidate links, never verified truth: anything a
//! search connector produced is `SearchResult` regardless of domain.
//! Fetched content climbs the tiers only on URL structure and the two
//! configured domain sets; there is no semantic analysis.

use crate::models::{ConnectorKind, TrustTier};
use std::collections::BTreeSet;
use std::sync::{PoisonError, RwLock};
use url::Url;

/// Default authoritative domains: government, academia, standards bodies,
/// scientific publishers.
const DEFAULT_AUTHORITATIVE_DOMAINS: &[&str] = &[
    "whitehouse.gov",
    "state.gov",
    "defense.gov",
    "nih.gov",
    "cdc.gov",
    "fda.gov",
    "sec.gov",
    "ftc.gov",
    "dhs.gov",
    "justice.gov",
    "europa.eu",
    "who.int",
    "un.org",
    "mit.edu",
    "stanford.edu",
    "harvard.edu",
    "berkeley.edu",
    "oxford.ac.uk",
    "cambridge.ac.uk",
    "w3.org",
    "ietf.org",
    "ieee.org",
    "iso.org",
    "nature.com",
    "science.org",
    "sciencedirect.com",
];

/// Default primary-source domains: official documentation and original
/// publishers.
const DEFAULT_PRIMARY_SOURCE_DOMAINS: &[&str] = &[
    "docs.python.org",
    "docs.microsoft.com",
    "developer.apple.com",
    "developer.mozilla.org",
    "docs.github.com",
    "cloud.google.com",
    "docs.aws.amazon.com",
    "kubernetes.io",
    "docker.com",
    "reuters.com",
    "apnews.com",
    "bbc.com",
    "npr.org",
    "github.com",
    "gitlab.com",
    "sourceforge.net",
];

/// Classifier mapping `(url, connector kind)` to a trust tier.
///
/// The two domain sets are runtime-mutable; readers take a shared lock so
/// concurrent classification never observes a torn set.
#[derive(Debug)]
pub struct TrustTierClassifier {
    authoritative: RwLock<BTreeSet<String>>,
    primary: RwLock<BTreeSet<String>>,
}

impl Default for TrustTierClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl TrustTierClassifier {
    /// Creates a classifier seeded with the default domain sets.
    #[must_use]
    pub fn new() -> Self {
        Self {
            authoritative: RwLock::new(
                DEFAULT_AUTHORITATIVE_DOMAINS
                    .iter()
                    .map(|d| (*d).to_string())
                    .collect(),
            ),
            primary: RwLock::new(
                DEFAULT_PRIMARY_SOURCE_DOMAINS
                    .iter()
                    .map(|d| (*d).to_string())
                    .collect(),
            ),
        }
    }

    /// Creates a classifier with explicit domain sets.
    #[must_use]
    pub fn with_domains(
        authoritative: BTreeSet<String>,
        primary: BTreeSet<String>,
    ) -> Self {
        Self {
            authoritative: RwLock::new(authoritative),
            primary: RwLock::new(primary),
        }
    }

    /// Classifies a URL retrieved through the given connector kind.
    ///
    /// Search results map to [`TrustTier::SearchResult`] unconditionally;
    /// parse failures map to [`TrustTier::ExternalSource`].
    #[must_use]
    pub fn classify(&self, url: &str, kind: ConnectorKind) -> TrustTier {
        if kind == ConnectorKind::WebSearch {
            return TrustTier::SearchResult;
        }

        let Some(host) = normalize_host(url) else {
            return TrustTier::ExternalSource;
        };

        if is_institutional_host(&host) || self.in_set(&self.authoritative, &host) {
            return TrustTier::AuthoritativeSource;
        }

        if self.in_set(&self.primary, &host) {
            return TrustTier::PrimarySource;
        }

        TrustTier::ExternalSource
    }

    /// Adds a domain to the authoritative set.
    pub fn add_authoritative(&self, domain: impl Into<String>) {
        self.authoritative
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(domain.into().to_ascii_lowercase());
    }

    /// Removes a domain from the authoritative set.
    pub fn remove_authoritative(&self, domain: &str) {
        self.authoritative
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&domain.to_ascii_lowercase());
    }

    /// Adds a domain to the primary-source set.
    pub fn add_primary(&self, domain: impl Into<String>) {
        self.primary
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(domain.into().to_ascii_lowercase());
    }

    /// Removes a domain from the primary-source set.
    pub fn remove_primary(&self, domain: &str) {
        self.primary
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&domain.to_ascii_lowercase());
    }

    /// Snapshot of the authoritative set.
    #[must_use]
    pub fn authoritative_domains(&self) -> BTreeSet<String> {
        self.authoritative
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Snapshot of the primary-source set.
    #[must_use]
    pub fn primary_domains(&self) -> BTreeSet<String> {
        self.primary
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn in_set(&self, set: &RwLock<BTreeSet<String>>, host: &str) -> bool {
        let set = set.read().unwrap_or_else(PoisonError::into_inner);
        set.iter()
            .any(|domain| host == domain || host.ends_with(&format!(".{domain}")))
    }
}

/// Extracts the lower-cased host from a URL, with the port and a leading
/// `www.` stripped.
fn normalize_host(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let host = parsed.host_str()?.to_ascii_lowercase();
    Some(host.strip_prefix("www.").unwrap_or(&host).to_string())
}

/// Institutional TLD patterns: `.gov`, `.gov.<cc>`, `.edu`, `.ac.<cc>`,
/// `.int`.
fn is_institutional_host(host: &str) -> bool {
    let labels: Vec<&str> = host.split('.').collect();
    if labels.len() < 2 {
        return false;
    }
    let last = labels[labels.len() - 1];
    let second_last = labels[labels.len() - 2];
    matches!(last, "gov" | "edu" | "int") || matches!(second_last, "gov" | "ac")
}
