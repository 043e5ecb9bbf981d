//! Input and output sanitizers.
//!
//! The input sanitizer strips injection-shaped substrings (SQL, shell,
//! script) from every string reachable in a parameter tree, then
//! HTML-escapes and trims the residue. The output sanitizer redacts
//! credentials and PII from connector results before they are returned or
//! summarized into evidence. Both walk `serde_json::Value` trees
//! recursively and pass non-string leaves through unchanged; neither ever
//! fails.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use tracing::warn;

static SQL_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?i)\b(SELECT|INSERT|UPDATE|DELETE|DROP|CREATE|ALTER|EXEC|EXECUTE)\b",
        r"(--|#|/\*|\*/)",
        r"(?i)\bOR\b.*=.*",
        r"(?i)\bAND\b.*=.*",
        r";.*--",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("static SQL pattern"))
    .collect()
});

static CMD_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [r"[;&|`$]", r"\$\(", r"`[^`]*`", r"\$\{[^}]*\}"]
        .iter()
        .map(|p| Regex::new(p).expect("static command pattern"))
        .collect()
});

static SCRIPT_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?is)<script[^>]*>.*?</script>",
        r"(?i)javascript:",
        r"(?i)\bon\w+\s*=",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("static script pattern"))
    .collect()
});

static EMAIL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$").expect("static email pattern")
});

static URL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^https?://[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}(:[0-9]+)?(/.*)?$")
        .expect("static url pattern")
});

/// Value patterns redacted from output strings. The second capture group,
/// when present, is the sensitive part; otherwise the whole match is.
static SENSITIVE_VALUE_PATTERNS: Lazy<Vec<(&'static str, Regex)>> = Lazy::new(|| {
    vec![
        (
            "api_key",
            Regex::new(r#"(?i)(api[_-]?key|apikey)["']?\s*[:=]\s*["']?([a-zA-Z0-9_-]{20,})"#)
                .expect("static api key pattern"),
        ),
        (
            "password",
            Regex::new(r#"(?i)(password|passwd|pwd)["']?\s*[:=]\s*["']?([^\s"']{6,})"#)
                .expect("static password pattern"),
        ),
        (
            "token",
            Regex::new(r#"(?i)(token|auth)["']?\s*[:=]\s*["']?([a-zA-Z0-9_-]{20,})"#)
                .expect("static token pattern"),
        ),
        (
            "secret",
            Regex::new(r#"(?i)(secret|private[_-]?key)["']?\s*[:=]\s*["']?([a-zA-Z0-9_-]{20,})"#)
                .expect("static secret pattern"),
        ),
        (
            "credit_card",
            Regex::new(r"\b\d{4}[-\s]?\d{4}[-\s]?\d{4}[-\s]?\d{4}\b")
                .expect("static credit card pattern"),
        ),
        (
            "ssn",
            Regex::new(r"\b\d{3}-\d{2}-\d{4}\b").expect("static ssn pattern"),
        ),
    ]
});

/// Key-name substrings that mark a whole value as sensitive.
const SENSITIVE_KEYS: &[&str] = &[
    "api_key",
    "apikey",
    "api-key",
    "password",
    "passwd",
    "pwd",
    "token",
    "auth",
    "authorization",
    "secret",
    "private_key",
    "private-key",
    "credit_card",
    "creditcard",
    "ssn",
    "social_security",
];

/// Escapes HTML-significant characters, ampersand first.
fn html_escape(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#x27;"),
            other => escaped.push(other),
        }
    }
    escaped
}

/// Sanitizer for input validation and cleaning.
#[derive(Debug, Clone, Default)]
pub struct InputSanitizer;

impl InputSanitizer {
    /// Creates an input sanitizer.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Recursively sanitizes every string in a value tree.
    #[must_use]
    pub fn sanitize(&self, data: &Value) -> Value {
        match data {
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(key, value)| (key.clone(), self.sanitize(value)))
                    .collect(),
            ),
            Value::Array(items) => {
                Value::Array(items.iter().map(|item| self.sanitize(item)).collect())
            }
            Value::String(value) => Value::String(self.sanitize_string(value)),
            other => other.clone(),
        }
    }

    /// Sanitizes a single string value.
    #[must_use]
    pub fn sanitize_string(&self, value: &str) -> String {
        let mut cleaned = value.to_string();

        for pattern in SQL_PATTERNS.iter() {
            if pattern.is_match(&cleaned) {
                warn!(prefix = %truncate_for_log(&cleaned), "potential SQL injection removed");
                cleaned = pattern.replace_all(&cleaned, "").into_owned();
            }
        }

        for pattern in CMD_PATTERNS.iter() {
            if pattern.is_match(&cleaned) {
                warn!(prefix = %truncate_for_log(&cleaned), "potential command injection removed");
                cleaned = pattern.replace_all(&cleaned, "").into_owned();
            }
        }

        for pattern in SCRIPT_PATTERNS.iter() {
            if pattern.is_match(&cleaned) {
                warn!(prefix = %truncate_for_log(&cleaned), "potential script injection removed");
                cleaned = pattern.replace_all(&cleaned, "").into_owned();
            }
        }

        html_escape(&cleaned).trim().to_string()
    }

    /// Checks basic email address shape.
    #[must_use]
    pub fn validate_email(&self, email: &str) -> bool {
        EMAIL_RE.is_match(email)
    }

    /// Checks basic URL shape; only http/https qualify.
    #[must_use]
    pub fn validate_url(&self, url: &str) -> bool {
        URL_RE.is_match(url)
    }
}

/// Sanitizer for output filtering and credential redaction.
#[derive(Debug, Clone, Default)]
pub struct OutputSanitizer;

impl OutputSanitizer {
    /// Creates an output sanitizer.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Recursively redacts sensitive data from a value tree.
    ///
    /// Redaction is idempotent: applying it twice yields the same tree.
    #[must_use]
    pub fn sanitize(&self, data: &Value) -> Value {
        match data {
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(key, value)| {
                        if is_sensitive_key(key) {
                            (key.clone(), Value::String(redact_value(value)))
                        } else {
                            (key.clone(), self.sanitize(value))
                        }
                    })
                    .collect(),
            ),
            Value::Array(items) => {
                Value::Array(items.iter().map(|item| self.sanitize(item)).collect())
            }
            Value::String(value) => Value::String(self.redact_string(value)),
            other => other.clone(),
        }
    }

    /// Redacts pattern-matched sensitive spans inside a string.
    #[must_use]
    pub fn redact_string(&self, value: &str) -> String {
        let mut result = value.to_string();

        for (name, pattern) in SENSITIVE_VALUE_PATTERNS.iter() {
            // Collect spans up front, then splice back-to-front so earlier
            // replacements cannot shift later ranges.
            let spans: Vec<(usize, usize)> = pattern
                .captures_iter(&result)
                .filter_map(|caps| {
                    caps.get(2)
                        .or_else(|| caps.get(0))
                        .map(|m| (m.start(), m.end()))
                })
                .collect();

            for (start, end) in spans.into_iter().rev() {
                let sensitive = &result[start..end];
                let redacted = mask(sensitive);
                if redacted != sensitive {
                    warn!(kind = name, "redacted sensitive span from output");
                    result.replace_range(start..end, &redacted);
                }
            }
        }

        result
    }

    /// Truncates text to `max_bytes`, appending a marker when exceeded.
    #[must_use]
    pub fn truncate(&self, text: &str, max_bytes: usize) -> String {
        if text.len() <= max_bytes {
            return text.to_string();
        }
        let mut cut = max_bytes;
        while cut > 0 && !text.is_char_boundary(cut) {
            cut -= 1;
        }
        warn!(
            from = text.len(),
            to = max_bytes,
            "truncating oversized output"
        );
        format!("{}... [TRUNCATED]", &text[..cut])
    }
}

fn is_sensitive_key(key: &str) -> bool {
    let key_lower = key.to_ascii_lowercase();
    SENSITIVE_KEYS
        .iter()
        .any(|sensitive| key_lower.contains(sensitive))
}

/// Masks a sensitive span: first four characters kept, the rest replaced
/// with `*` (capped at twenty).
fn mask(sensitive: &str) -> String {
    let chars: Vec<char> = sensitive.chars().collect();
    if chars.len() > 4 {
        let kept: String = chars[..4].iter().collect();
        let stars = (chars.len() - 4).min(20);
        format!("{kept}{}", "*".repeat(stars))
    } else {
        "****".to_string()
    }
}

fn redact_value(value: &Value) -> String {
    let rendered = match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    mask(&rendered)
}

fn truncate_for_log(value: &str) -> &str {
    let cut = value
        .char_indices()
        .nth(50)
        .map_or(value.len(), |(index, _)| index);
    &value[..cut]
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_should_strip_sql_keywords_when_sanitizing_input() {
        let sanitizer = InputSanitizer::new();
        let cleaned = sanitizer.sanitize_string("DROP TABLE users; -- boom");
        assert!(!cleaned.to_lowercase().contains("drop"));
        assert!(!cleaned.contains("--"));
    }

    #[test]
    fn test_should_strip_shell_metacharacters_when_sanitizing_input() {
        let sanitizer = InputSanitizer::new();
        let cleaned = sanitizer.sanitize_string("hello; rm -rf / | cat $(whoami) `id`");
        for forbidden in [";", "|", "`", "$("] {
            assert!(!cleaned.contains(forbidden), "found {forbidden} in {cleaned}");
        }
    }

    #[test]
    fn test_should_strip_script_tags_when_sanitizing_input() {
        let sanitizer = InputSanitizer::new();
        let cleaned = sanitizer.sanitize_string("<script>alert(1)</script>safe javascript:void");
        assert!(!cleaned.to_lowercase().contains("<script"));
        assert!(!cleaned.to_lowercase().contains("javascript:"));
        assert!(cleaned.contains("safe"));
    }

    #[test]
    fn test_should_html_escape_residual_text_when_sanitizing_input() {
        let sanitizer = InputSanitizer::new();
        let cleaned = sanitizer.sanitize_string("a < b > c");
        assert_eq!(cleaned, "a &lt; b &gt; c");
    }

    #[test]
    fn test_should_walk_nested_structures_when_sanitizing_input() {
        let sanitizer = InputSanitizer::new();
        let input = json!({
            "query": "climate policy",
            "nested": {"values": ["<script>x</script>", 42, true]},
        });
        let cleaned = sanitizer.sanitize(&input);
        assert_eq!(cleaned["query"], "climate policy");
        assert_eq!(cleaned["nested"]["values"][0], "");
        assert_eq!(cleaned["nested"]["values"][1], 42);
        assert_eq!(cleaned["nested"]["values"][2], true);
    }

    #[test]
    fn test_should_validate_email_shapes_when_checking() {
        let sanitizer = InputSanitizer::new();
        assert!(sanitizer.validate_email("a@b.co"));
        assert!(sanitizer.validate_email("first.last+tag@example.org"));
        assert!(!sanitizer.validate_email("not-an-email"));
        assert!(!sanitizer.validate_email("missing@tld"));
    }

    #[test]
    fn test_should_validate_only_http_urls_when_checking() {
        let sanitizer = InputSanitizer::new();
        assert!(sanitizer.validate_url("https://example.com/path"));
        assert!(sanitizer.validate_url("http://example.com:8080"));
        assert!(!sanitizer.validate_url("ftp://example.com"));
        assert!(!sanitizer.validate_url("example.com"));
    }

    #[test]
    fn test_should_redact_sensitive_keys_when_sanitizing_output() {
        let sanitizer = OutputSanitizer::new();
        let output = json!({
            "api_key": "sk-super-secret-value-123456",
            "result": "fine",
        });
        let cleaned = sanitizer.sanitize(&output);
        let redacted = cleaned["api_key"].as_str().unwrap();
        assert!(redacted.starts_with("sk-s"));
        assert!(redacted.contains('*'));
        assert!(!redacted.contains("secret"));
        assert_eq!(cleaned["result"], "fine");
    }

    #[test]
    fn test_should_redact_embedded_credentials_when_sanitizing_strings() {
        let sanitizer = OutputSanitizer::new();
        let cleaned =
            sanitizer.redact_string("config: api_key=abcdefghijklmnopqrstuvwx rest stays");
        assert!(cleaned.contains("abcd"));
        assert!(!cleaned.contains("abcdefghijklmnopqrstuvwx"));
        assert!(cleaned.contains("rest stays"));
    }

    #[test]
    fn test_should_redact_card_and_ssn_numbers_when_sanitizing_strings() {
        let sanitizer = OutputSanitizer::new();
        let cleaned = sanitizer.redact_string("card 4111-1111-1111-1111 ssn 123-45-6789");
        assert!(!cleaned.contains("4111-1111-1111-1111"));
        assert!(!cleaned.contains("123-45-6789"));
    }

    #[test]
    fn test_should_be_idempotent_when_redacting_twice() {
        let sanitizer = OutputSanitizer::new();
        let output = json!({
            "password": "hunter2hunter2",
            "note": "token=abcdefghij0123456789xy and card 4111 1111 1111 1111",
        });
        let once = sanitizer.sanitize(&output);
        let twice = sanitizer.sanitize(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_should_append_marker_when_truncating_oversized_output() {
        let sanitizer = OutputSanitizer::new();
        let text = "x".repeat(100);
        let truncated = sanitizer.truncate(&text, 10);
        assert!(truncated.starts_with("xxxxxxxxxx"));
        assert!(truncated.ends_with("... [TRUNCATED]"));
        assert_eq!(sanitizer.truncate("short", 100), "short");
    }

    #[test]
    fn test_should_pass_through_non_string_leaves_when_sanitizing() {
        let input = json!({"n": 7, "b": false, "nothing": null});
        assert_eq!(InputSanitizer::new().sanitize(&input), input);
        assert_eq!(OutputSanitizer::new().sanitize(&input), input);
    }
}
