//! Redaction engine.
//!
//! Pure transformations of strings, headers, URLs and bodies into safe,
//! hashed forms. Nothing here performs I/O; the same input always produces
//! the same output.

use std::collections::BTreeMap;

use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine as _;
use regex::Captures;
use tracing::trace;
use url::Url;

use super::patterns::PatternSet;
use crate::event::{BodyDescriptor, BodyKind, UrlParts, DISPLAY_HASH_LEN};

/// Placeholder for masked query values.
pub const REDACTED_VALUE: &str = "<redacted>";

/// Placeholder for numeric path segments.
pub const ID_PLACEHOLDER: &str = ":id";

/// Placeholder for opaque hex or uuid path segments.
pub const UUID_PLACEHOLDER: &str = ":uuid";

/// Full hex BLAKE3 digest of the content.
#[must_use]
pub fn digest(content: &[u8]) -> String {
    blake3::hash(content).to_hex().to_string()
}

/// Display form of the digest of the content.
#[must_use]
pub fn short_digest(content: &[u8]) -> String {
    let mut hex = digest(content);
    hex.truncate(DISPLAY_HASH_LEN);
    hex
}

/// Largest prefix of `text` that is at most `cap` bytes and ends on a char
/// boundary.
fn byte_prefix(text: &str, cap: usize) -> &str {
    if text.len() <= cap {
        return text;
    }
    let mut end = cap;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

/// The redaction engine.
#[derive(Debug, Default)]
pub struct Redactor {
    patterns: PatternSet,
}

impl Redactor {
    /// Create a redactor with the built-in patterns.
    #[must_use]
    pub fn new() -> Self {
        Self {
            patterns: PatternSet::builtin(),
        }
    }

    /// Generic string redaction.
    ///
    /// JWT-shaped tokens are replaced by `jwt.<alg>.<hash8>` first, then
    /// email addresses and phone-like digit runs are masked.
    #[must_use]
    pub fn redact_str(&self, input: &str) -> String {
        let out = self
            .patterns
            .jwt
            .replace_all(input, |caps: &Captures<'_>| Self::jwt_placeholder(&caps[0]));
        let out = self.patterns.email.replace_all(&out, "${1}***${2}");
        self.patterns.phone.replace_all(&out, "${1}***${2}")
    }

    fn jwt_placeholder(token: &str) -> String {
        let alg = token
            .split('.')
            .next()
            .and_then(|header| URL_SAFE_NO_PAD.decode(header.trim_end_matches('=')).ok())
            .and_then(|bytes| serde_json::from_slice::<serde_json::Value>(&bytes).ok())
            .and_then(|header| header.get("alg")?.as_str().map(str::to_string))
            .unwrap_or_else(|| "unk".to_string());
        format!("jwt.{alg}.{}", short_digest(token.as_bytes()))
    }

    /// Redact a `cookie` header value.
    ///
    /// Each `name=value` pair keeps its name and gets `<hash8>` as value.
    /// Bare flags and pairs with an empty value pass through unchanged.
    #[must_use]
    pub fn redact_cookie(&self, value: &str) -> String {
        value
            .split(';')
            .map(str::trim)
            .map(|part| match part.split_once('=') {
                Some((name, v)) if !v.trim().is_empty() => {
                    format!("{name}=<{}>", short_digest(v.trim().as_bytes()))
                }
                _ => part.to_string(),
            })
            .collect::<Vec<_>>()
            .join("; ")
    }

    /// Redact an `authorization` header value, keeping a `Bearer ` prefix.
    #[must_use]
    pub fn redact_authorization(&self, value: &str) -> String {
        let hash = short_digest(value.trim().as_bytes());
        if value.starts_with("Bearer ") {
            format!("Bearer <{hash}>")
        } else {
            format!("<{hash}>")
        }
    }

    /// Redact a header map.
    #[must_use]
    pub fn redact_headers(&self, headers: &BTreeMap<String, String>) -> BTreeMap<String, String> {
        headers
            .iter()
            .map(|(name, value)| {
                let redacted = match name.to_ascii_lowercase().as_str() {
                    "cookie" => self.redact_cookie(value),
                    "authorization" => self.redact_authorization(value),
                    _ => self.redact_str(value),
                };
                (name.clone(), redacted)
            })
            .collect()
    }

    /// Replace identifier-shaped path segments with placeholders.
    #[must_use]
    pub fn template_path(&self, path: &str) -> String {
        path.split('/')
            .map(|segment| {
                if self.patterns.numeric_segment.matches(segment) {
                    ID_PLACEHOLDER
                } else if self.patterns.opaque_segment.matches(segment) {
                    UUID_PLACEHOLDER
                } else {
                    segment
                }
            })
            .collect::<Vec<_>>()
            .join("/")
    }

    /// Normalize and redact a URL.
    ///
    /// Query values under PII-bearing keys become `<redacted>`; other values
    /// go through generic string redaction. Unparseable input yields a
    /// descriptor with an empty host and a redacted path.
    #[must_use]
    pub fn normalize_url(&self, raw: &str) -> UrlParts {
        let Ok(url) = Url::parse(raw) else {
            trace!("URL did not parse, keeping redacted path only");
            let path = self.redact_str(raw.split(['?', '#']).next().unwrap_or_default());
            return UrlParts {
                template: self.template_path(&path),
                path,
                ..UrlParts::default()
            };
        };

        let host = match (url.host_str(), url.port()) {
            (Some(host), Some(port)) => format!("{host}:{port}"),
            (Some(host), None) => host.to_string(),
            (None, _) => String::new(),
        };

        let query = url
            .query_pairs()
            .map(|(key, value)| {
                let value = if self.patterns.pii_query_key.matches(&key) {
                    REDACTED_VALUE.to_string()
                } else {
                    self.redact_str(&value)
                };
                (key.into_owned(), value)
            })
            .collect();

        let path = self.redact_str(url.path());
        UrlParts {
            scheme: url.scheme().to_string(),
            host,
            template: self.template_path(&path),
            path,
            query,
        }
    }

    /// Describe a text payload.
    ///
    /// The sample is the redacted prefix of at most `cap` bytes. Size and
    /// hash always cover the full content.
    #[must_use]
    pub fn describe_text(&self, text: &str, cap: usize) -> BodyDescriptor {
        if text.is_empty() {
            return BodyDescriptor::none();
        }
        let prefix = byte_prefix(text, cap);
        let truncated = prefix.len() < text.len();
        let mut sample = self.redact_str(prefix);
        if truncated {
            sample.push_str(BodyDescriptor::TRUNCATION_MARKER);
        }
        BodyDescriptor {
            kind: BodyKind::Text,
            size: text.len(),
            hash: Some(digest(text.as_bytes())),
            sample: Some(sample),
            truncated,
        }
    }

    /// Describe a binary payload. Binary content is never sampled.
    #[must_use]
    pub fn describe_binary(&self, bytes: &[u8]) -> BodyDescriptor {
        if bytes.is_empty() {
            return BodyDescriptor::none();
        }
        BodyDescriptor {
            kind: BodyKind::Binary,
            size: bytes.len(),
            hash: Some(digest(bytes)),
            sample: None,
            truncated: false,
        }
    }

    /// Describe a body as delivered by the host.
    ///
    /// Base64-encoded bodies are decoded and treated as binary. A body that
    /// claims base64 but does not decode is hashed as-is.
    #[must_use]
    pub fn describe_body(&self, body: &str, base64_encoded: bool, cap: usize) -> BodyDescriptor {
        if !base64_encoded {
            return self.describe_text(body, cap);
        }
        match STANDARD.decode(body) {
            Ok(bytes) => self.describe_binary(&bytes),
            Err(_) => self.describe_binary(body.as_bytes()),
        }
    }
}
