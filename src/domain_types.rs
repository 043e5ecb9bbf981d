//! Domain types for the Portcullis gateway.
//!
//! Strongly-typed domain values to prevent primitive obsession: identifiers
//! carry their own generation rules, and policy numerics carry their bounds.

use nutype::nutype;
use uuid::Uuid;

/// Opaque identifier of a communication request.
///
/// Generated ids carry the full 128 bits of a v4 UUID, satisfying the
/// collision-resistance requirement for audit correlation.
#[nutype(derive(
    Debug,
    Clone,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    From,
    Into
))]
pub struct RequestId(String);

impl RequestId {
    /// Creates a new random request id.
    #[must_use]
    pub fn generate() -> Self {
        Self::new(format!("comm-{}", Uuid::new_v4().simple()))
    }
}

/// Opaque identifier of an evidence record.
#[nutype(derive(
    Debug,
    Clone,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    From,
    Into
))]
pub struct EvidenceId(String);

impl EvidenceId {
    /// Creates a new random evidence id.
    #[must_use]
    pub fn generate() -> Self {
        Self::new(format!("ev-{}", Uuid::new_v4().simple()))
    }
}

/// Approval token carried by an outbound request.
///
/// Non-empty by construction; an empty or missing token is represented as
/// `None` at the request level. Cryptographic binding to a principal is a
/// later concern and slots in behind this type.
#[nutype(
    validate(len_char_min = 1),
    derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Display, TryFrom, Into)
)]
pub struct ApprovalToken(String);

impl ApprovalToken {
    /// Converts an optional raw token into a validated optional token,
    /// treating empty strings as absent.
    #[must_use]
    pub fn from_raw(raw: Option<String>) -> Option<Self> {
        raw.and_then(|value| Self::try_new(value).ok())
    }
}

/// Per-window request ceiling for a connector class.
#[nutype(
    validate(greater = 0, less_or_equal = 100_000),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Serialize,
        Deserialize,
        Display,
        TryFrom,
        Into
    )
)]
pub struct RateLimitCeiling(u32);

impl RateLimitCeiling {
    /// Gets the value as u32.
    #[must_use]
    pub fn as_u32(&self) -> u32 {
        self.into_inner()
    }

    /// Gets the value as usize for count comparisons.
    #[must_use]
    pub fn as_usize(&self) -> usize {
        self.into_inner() as usize
    }
}

/// Sliding-window length in seconds.
#[nutype(
    validate(greater = 0, less_or_equal = 86_400),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Serialize,
        Deserialize,
        Display,
        TryFrom,
        Into
    )
)]
pub struct WindowSeconds(u64);

impl WindowSeconds {
    /// Gets the value as u64.
    #[must_use]
    pub fn as_u64(&self) -> u64 {
        self.into_inner()
    }

    /// Gets the value as f64 for window arithmetic.
    #[must_use]
    pub fn as_secs_f64(&self) -> f64 {
        self.into_inner() as f64
    }
}

/// Maximum response size in bytes accepted from a connector.
#[nutype(
    validate(greater = 0, less_or_equal = 1_073_741_824),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Serialize,
        Deserialize,
        Display,
        TryFrom,
        Into
    )
)]
pub struct MaxResponseBytes(u64);

impl MaxResponseBytes {
    /// Gets the value as u64.
    #[must_use]
    pub fn as_u64(&self) -> u64 {
        self.into_inner()
    }
}

/// Outbound I/O timeout in milliseconds.
#[nutype(
    validate(greater = 0, less_or_equal = 600_000),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Serialize,
        Deserialize,
        Display,
        TryFrom,
        Into
    )
)]
pub struct TimeoutMillis(u64);

impl TimeoutMillis {
    /// Gets the value as u64.
    #[must_use]
    pub fn as_u64(&self) -> u64 {
        self.into_inner()
    }

    /// Converts to a [`std::time::Duration`].
    #[must_use]
    pub fn as_duration(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.into_inner())
    }
}
