//! Built-in redaction patterns.
//!
//! This module provides the pre-compiled regexes used to detect sensitive
//! substrings and identifier-shaped URL segments, plus the default host and
//! asset lists consumed by the inclusion policy.

use regex::{Regex, Replacer};

/// A compiled redaction pattern.
#[derive(Debug)]
pub struct RedactPattern {
    /// Name of the pattern for identification.
    pub name: &'static str,

    /// Description of what this pattern matches.
    pub description: &'static str,

    /// The compiled regex.
    regex: Regex,
}

impl RedactPattern {
    /// Create a new redaction pattern.
    ///
    /// # Panics
    ///
    /// Panics if the regex pattern is invalid.
    #[must_use]
    pub fn new(name: &'static str, description: &'static str, pattern: &str) -> Self {
        Self {
            name,
            description,
            regex: Regex::new(pattern).expect("Invalid regex pattern"),
        }
    }

    /// Check if the content matches this pattern.
    #[must_use]
    pub fn matches(&self, content: &str) -> bool {
        self.regex.is_match(content)
    }

    /// Replace every match in the content.
    #[must_use]
    pub fn replace_all<R: Replacer>(&self, content: &str, rep: R) -> String {
        self.regex.replace_all(content, rep).into_owned()
    }
}

/// The set of patterns the redaction engine runs.
#[derive(Debug)]
pub struct PatternSet {
    /// JWT-shaped tokens.
    pub jwt: RedactPattern,
    /// Email addresses.
    pub email: RedactPattern,
    /// Phone-number-like digit runs.
    pub phone: RedactPattern,
    /// Query keys whose values are always masked.
    pub pii_query_key: RedactPattern,
    /// Purely numeric path segments.
    pub numeric_segment: RedactPattern,
    /// Opaque hex or uuid path segments.
    pub opaque_segment: RedactPattern,
}

impl PatternSet {
    /// Compile the built-in pattern set.
    #[must_use]
    pub fn builtin() -> Self {
        Self {
            jwt: RedactPattern::new(
                "jwt",
                "JSON web tokens (three dot-separated base64url segments)",
                r"\beyJ[A-Za-z0-9_-]+\.[A-Za-z0-9_-]+\.[A-Za-z0-9_-]*",
            ),
            email: RedactPattern::new(
                "email",
                "Email addresses; keeps the first local-part character and the domain",
                r"([A-Za-z0-9._%+-])[A-Za-z0-9._%+-]{2,}(@[A-Za-z0-9.-]+\.[A-Za-z]{2,})",
            ),
            phone: RedactPattern::new(
                "phone",
                "Digit runs of ten or more; keeps the first 3 and last 2 digits",
                r"(\d{3})\d{5,}(\d{2})",
            ),
            pii_query_key: RedactPattern::new(
                "pii_query_key",
                "Query parameter names that carry personal data or credentials",
                r"(?i)(email|phone|token|auth|password)",
            ),
            numeric_segment: RedactPattern::new(
                "numeric_segment",
                "Path segments made only of digits",
                r"^\d+$",
            ),
            opaque_segment: RedactPattern::new(
                "opaque_segment",
                "Path segments shaped like hex ids or uuids",
                r"^[0-9a-fA-F-]{8,}$",
            ),
        }
    }
}

impl Default for PatternSet {
    fn default() -> Self {
        Self::builtin()
    }
}

/// Default list of analytics and third-party hosts excluded from capture.
#[must_use]
pub fn default_analytics_hosts() -> Vec<&'static str> {
    vec![
        // Product analytics
        "segment.io",
        "api.segment.io",
        "cdn.segment.com",
        // Google
        "google-analytics.com",
        "analytics.google.com",
        "www.googletagmanager.com",
        // Social pixels
        "facebook.com",
        "connect.facebook.net",
        "tiktok.com",
        "analytics.tiktok.com",
        // Error reporting
        "sentry.io",
        // Payments
        "stripe.com",
        "paypal.com",
    ]
}

/// File extensions treated as static assets.
#[must_use]
pub fn asset_extensions() -> &'static [&'static str] {
    &[
        "png", "jpg", "jpeg", "gif", "webp", "svg", "ico", "avif", "bmp", // images
        "woff", "woff2", "ttf", "otf", "eot", // fonts
        "css", "js", "mjs", "map", // code
        "mp4", "webm", "mp3", "ogg", "wav", // media
    ]
}

/// Resource types reported by the host that are treated as static assets.
#[must_use]
pub fn asset_resource_types() -> &'static [&'static str] {
    &["Image", "Font", "Stylesheet", "Script", "Media", "Manifest"]
}

/// Content type prefixes treated as static assets.
#[must_use]
pub fn asset_content_types() -> &'static [&'static str] {
    &[
        "image/",
        "font/",
        "video/",
        "audio/",
        "text/css",
        "text/javascript",
        "application/javascript",
        "application/x-javascript",
        "application/font-",
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redact_pattern_matches() {
        let pattern = RedactPattern::new("test", "digits", r"\d+");
        assert!(pattern.matches("abc123"));
        assert!(!pattern.matches("abc"));
        assert_eq!(pattern.replace_all("a1b22c333", "#"), "a#b#c#");
    }

    #[test]
    #[should_panic(expected = "Invalid regex pattern")]
    fn test_redact_pattern_invalid_regex() {
        let _ = RedactPattern::new("bad", "unbalanced", r"(abc");
    }

    #[test]
    fn test_jwt_pattern() {
        let set = PatternSet::builtin();
        assert!(set.jwt.matches("token eyJhbGciOiJIUzI1NiJ9.eyJzdWIiOiIxIn0.sig_x-y"));
        assert!(!set.jwt.matches("eyJonlyone"));
    }

    #[test]
    fn test_email_pattern() {
        let set = PatternSet::builtin();
        let out = set.email.replace_all("mail alice@example.com now", "${1}***${2}");
        assert_eq!(out, "mail a***@example.com now");
    }

    #[test]
    fn test_email_pattern_inside_json() {
        let set = PatternSet::builtin();
        let out = set
            .email
            .replace_all(r#"{"email":"zoe@example.com"}"#, "${1}***${2}");
        assert_eq!(out, r#"{"email":"z***@example.com"}"#);
    }

    #[test]
    fn test_phone_pattern_requires_ten_digits() {
        let set = PatternSet::builtin();
        assert!(set.phone.matches("5551234567"));
        assert!(!set.phone.matches("555123456"));
        assert_eq!(set.phone.replace_all("5551234567", "${1}***${2}"), "555***67");
    }

    #[test]
    fn test_pii_query_key_pattern() {
        let set = PatternSet::builtin();
        assert!(set.pii_query_key.matches("user_email"));
        assert!(set.pii_query_key.matches("AccessToken"));
        assert!(!set.pii_query_key.matches("page"));
    }

    #[test]
    fn test_segment_patterns() {
        let set = PatternSet::builtin();
        assert!(set.numeric_segment.matches("12345"));
        assert!(!set.numeric_segment.matches("12a45"));
        assert!(set.opaque_segment.matches("550e8400-e29b-41d4-a716-446655440000"));
        assert!(set.opaque_segment.matches("deadbeef"));
        assert!(!set.opaque_segment.matches("profile"));
    }

    #[test]
    fn test_default_analytics_hosts() {
        let hosts = default_analytics_hosts();
        assert!(hosts.contains(&"google-analytics.com"));
        assert!(hosts.contains(&"sentry.io"));
        assert_eq!(hosts.len(), 13);
    }

    #[test]
    fn test_asset_lists_not_empty() {
        assert!(asset_extensions().contains(&"woff2"));
        assert!(asset_resource_types().contains(&"Image"));
        assert!(asset_content_types().contains(&"image/"));
    }
}
