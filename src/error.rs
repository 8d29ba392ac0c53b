//! Typed error hierarchy for the entra-export crate.
//!
//! Every variant carries enough context to diagnose a failure without
//! re-running with extra instrumentation:
//! - `Auth` keeps the identity provider's error code, description and
//!   correlation id.
//! - `Api` keeps the HTTP status and the raw response body.
//! - `Write` keeps both the spreadsheet and the CSV fallback failures.
//!
//! Variants map to system boundaries (identity endpoint, REST APIs,
//! filesystem), not to internal implementation details.

use std::path::PathBuf;

use reqwest::StatusCode;

/// Boxed cause used where the underlying error type varies.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Unified error type for all entra-export operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The identity provider rejected the client-credential grant, or the
    /// token endpoint could not be reached.
    ///
    /// `code` is the OAuth2 `error` field (e.g. `invalid_client`), and
    /// `description` carries `error_description`, which includes the
    /// AADSTS code. A non-JSON failure body is preserved in `description`.
    #[error(
        "authentication failed ({code}): {description} [correlation id: {}]",
        .correlation_id.as_deref().unwrap_or("none")
    )]
    Auth {
        /// OAuth2 error code, or `http_<status>` / `transport` when the
        /// identity provider did not supply one.
        code: String,
        /// Human-readable description from the identity provider.
        description: String,
        /// Correlation id to quote when opening a support case.
        correlation_id: Option<String>,
        /// The underlying transport or parse error, if any.
        #[source]
        source: Option<BoxError>,
    },

    /// A REST API returned a non-success status code.
    #[error("API error {status}: {body}")]
    Api {
        /// The HTTP status code returned by the API.
        status: StatusCode,
        /// The raw response body text, or an empty string if unreadable.
        body: String,
    },

    /// Both the spreadsheet export and its CSV fallback failed.
    #[error("export to {} failed: {primary}; CSV fallback failed: {fallback}", .path.display())]
    Write {
        /// The primary (spreadsheet) destination.
        path: PathBuf,
        /// Why the spreadsheet write failed.
        primary: BoxError,
        /// Why the CSV fallback write failed.
        fallback: BoxError,
    },

    /// A named resource (site, drive) does not exist.
    #[error("{kind} '{name}' not found")]
    NotFound {
        /// What was looked up, e.g. `"site"` or `"drive"`.
        kind: &'static str,
        /// The name or id that was searched for.
        name: String,
    },

    /// A non-empty target filter matched none of the available targets.
    #[error("none of the requested targets {requested:?} exist; available: {available:?}")]
    UnmatchedTargets {
        /// The names that were asked for.
        requested: Vec<String>,
        /// The names the API actually returned.
        available: Vec<String>,
    },

    /// An OData filter could not be built from the given identifiers.
    #[error("invalid filter: {0}")]
    InvalidFilter(String),

    /// Configuration is missing a required value or could not be parsed.
    #[error("configuration error: {0}")]
    Config(String),

    /// JSON deserialization of an API response failed.
    #[error("failed to parse response: {0}")]
    Parse(#[from] serde_json::Error),

    /// Transport-level failure (DNS, TCP, TLS) with no HTTP status.
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Local filesystem failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Returns `true` when the error must abort a whole run rather than
    /// just the target that produced it.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Auth { .. })
    }
}

/// Convenience alias used throughout the library.
pub type Result<T> = std::result::Result<T, Error>;
