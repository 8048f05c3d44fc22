//! Redaction of captured content.
//!
//! Everything that leaves the correlator passes through here first:
//!
//! - **Headers**: `cookie` values and `authorization` credentials are
//!   replaced by short hashes; other headers get generic string redaction.
//!
//! - **Strings**: JWTs become `jwt.<alg>.<hash8>`, email addresses and
//!   phone-like digit runs are masked.
//!
//! - **URLs**: PII-bearing query keys are masked and identifier-shaped path
//!   segments are templated.
//!
//! - **Bodies**: sized and hashed over the full content; text samples are
//!   capped and redacted, binary content is never sampled.
//!
//! # Example
//!
//! ```
//! use tabcapture::redact::Redactor;
//!
//! let redactor = Redactor::new();
//! assert_eq!(redactor.redact_str("ping ann@example.com"), "ping a***@example.com");
//! assert_eq!(redactor.template_path("/orders/1234"), "/orders/:id");
//! ```

mod engine;
mod patterns;

pub use engine::{digest, short_digest, Redactor, ID_PLACEHOLDER, REDACTED_VALUE, UUID_PLACEHOLDER};
pub use patterns::{
    asset_content_types, asset_extensions, asset_resource_types, default_analytics_hosts,
    PatternSet, RedactPattern,
};
