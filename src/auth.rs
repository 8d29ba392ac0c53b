//! OAuth2 client-credentials authentication against Microsoft Entra ID.
//!
//! Acquires bearer tokens from the `/oauth2/v2.0/token` endpoint using the
//! client_credentials grant. The resulting [`Credential`] is cached in the
//! [`TokenProvider`] until it expires or is invalidated; consumers (e.g.
//! `ApiClient`) read it via `credential()` and call `acquire()` when it is
//! absent.
//!
//! The provider never retries: one rejected grant is returned to the caller
//! as `Error::Auth` carrying the identity provider's error code,
//! description and correlation id.

use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Error, Result};

/// Public Entra ID authority host.
pub const DEFAULT_AUTHORITY: &str = "https://login.microsoftonline.com";

/// Scope for the Defender for Endpoint security-center API.
pub const DEFENDER_SCOPE: &str = "https://api.securitycenter.microsoft.com/.default";

/// Scope for Microsoft Graph.
pub const GRAPH_SCOPE: &str = "https://graph.microsoft.com/.default";

/// Safety buffer subtracted from `expires_in` so a token is never used
/// right at its expiry boundary.
const EXPIRY_BUFFER_SECS: u64 = 60;

/// Lifetime assumed when the token response omits `expires_in`.
const DEFAULT_EXPIRES_IN_SECS: u64 = 3599;

/// Form body sent to the token endpoint.
/// Serialized as `application/x-www-form-urlencoded` by reqwest's `.form()`.
#[derive(Serialize)]
pub struct TokenRequest<'a> {
    client_id: &'a str,
    scope: &'a str,
    client_secret: &'a str,
    grant_type: &'a str,
}

/// Subset of the token response that we need. Extra fields such as
/// `ext_expires_in` are ignored.
#[derive(Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default = "default_expires_in")]
    pub expires_in: u64,
}

fn default_expires_in() -> u64 {
    DEFAULT_EXPIRES_IN_SECS
}

/// Error body returned by the identity provider on a rejected grant.
#[derive(Debug, Default, Deserialize)]
struct TokenErrorResponse {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
    #[serde(default)]
    correlation_id: Option<String>,
}

/// A bearer token acquired for a set of scopes.
///
/// The token is opaque; it is never logged.
#[derive(Clone)]
pub struct Credential {
    scopes: Vec<String>,
    access_token: String,
    expires_in: u64,
    acquired_at: Instant,
}

impl Credential {
    /// The raw bearer token.
    pub fn access_token(&self) -> &str {
        &self.access_token
    }

    /// The scopes this token was requested for.
    pub fn scopes(&self) -> &[String] {
        &self.scopes
    }

    /// When the token was acquired.
    pub fn acquired_at(&self) -> Instant {
        self.acquired_at
    }

    /// Ready-to-use `Authorization` header value.
    pub fn authorization_header(&self) -> String {
        format!("Bearer {}", self.access_token)
    }

    fn is_expired(&self) -> bool {
        let lifetime = self.expires_in.saturating_sub(EXPIRY_BUFFER_SECS);
        self.acquired_at.elapsed().as_secs() >= lifetime
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("scopes", &self.scopes)
            .field("access_token", &"<redacted>")
            .field("expires_in", &self.expires_in)
            .finish()
    }
}

/// Manages client-credential token acquisition and caching.
///
/// Invariants:
/// - `credential` is `None` until the first successful `acquire()`.
/// - `credential()` returns `None` once the cached token has expired
///   (minus the safety buffer) or after `invalidate()`.
pub struct TokenProvider {
    client: reqwest::Client,
    authority: String,
    tenant_id: String,
    client_id: String,
    client_secret: String,
    scopes: Vec<String>,
    credential: Option<Credential>,
}

impl TokenProvider {
    pub fn new(tenant_id: &str, client_id: &str, client_secret: &str, scopes: Vec<String>) -> Self {
        TokenProvider {
            client: reqwest::Client::new(),
            authority: DEFAULT_AUTHORITY.to_string(),
            tenant_id: tenant_id.to_string(),
            client_id: client_id.to_string(),
            client_secret: client_secret.to_string(),
            scopes,
            credential: None,
        }
    }

    /// Points the provider at a different authority host (sovereign
    /// clouds, or a mock server in tests).
    pub fn with_authority(mut self, authority: &str) -> Self {
        self.authority = authority.trim_end_matches('/').to_string();
        self
    }

    /// Creates a provider holding a pre-set token, bypassing Entra ID.
    /// Used by tests to avoid real token acquisition.
    pub fn with_token(token: &str) -> Self {
        let mut tp = TokenProvider::new("", "", "", Vec::new());
        tp.credential = Some(Credential {
            scopes: Vec::new(),
            access_token: token.to_string(),
            expires_in: 3600,
            acquired_at: Instant::now(),
        });
        tp
    }

    /// The token endpoint for the configured tenant.
    pub fn token_url(&self) -> String {
        format!("{}/{}/oauth2/v2.0/token", self.authority, self.tenant_id)
    }

    /// The scopes requested on each acquisition.
    pub fn scopes(&self) -> &[String] {
        &self.scopes
    }

    /// Performs one client-credential grant and caches the result.
    ///
    /// The body is read as text before the status is inspected so the
    /// identity provider's diagnostic fields survive into the error.
    pub async fn acquire(&mut self) -> Result<&Credential> {
        let scope = self.scopes.join(" ");
        let body = TokenRequest {
            client_id: &self.client_id,
            scope: &scope,
            client_secret: &self.client_secret,
            grant_type: "client_credentials",
        };

        let url = self.token_url();
        debug!(%url, scope = %scope, "requesting token");

        let response = self
            .client
            .post(&url)
            .form(&body)
            .send()
            .await
            .map_err(transport_error)?;
        let status = response.status();
        let text = response.text().await.map_err(transport_error)?;

        if !status.is_success() {
            return Err(rejection_error(status, &text));
        }

        let resp: TokenResponse = serde_json::from_str(&text).map_err(|e| Error::Auth {
            code: "invalid_response".to_string(),
            description: "token endpoint returned an unreadable body".to_string(),
            correlation_id: None,
            source: Some(Box::new(e)),
        })?;

        info!(tenant = %self.tenant_id, scope = %scope, "acquired access token");
        Ok(&*self.credential.insert(Credential {
            scopes: self.scopes.clone(),
            access_token: resp.access_token,
            expires_in: resp.expires_in,
            acquired_at: Instant::now(),
        }))
    }

    /// Returns the cached credential, or `None` if none exists or it has
    /// expired.
    pub fn credential(&self) -> Option<&Credential> {
        self.credential.as_ref().filter(|c| !c.is_expired())
    }

    /// Returns the cached bearer token, if still valid.
    pub fn token(&self) -> Option<&str> {
        self.credential().map(Credential::access_token)
    }

    #[cfg(test)]
    pub(crate) fn client_secret(&self) -> &str {
        &self.client_secret
    }

    /// Drops the cached credential so the next caller re-acquires.
    pub fn invalidate(&mut self) {
        self.credential = None;
    }
}

fn transport_error(e: reqwest::Error) -> Error {
    Error::Auth {
        code: "transport".to_string(),
        description: e.to_string(),
        correlation_id: None,
        source: Some(Box::new(e)),
    }
}

/// Builds `Error::Auth` from a rejected grant, falling back to the raw
/// body when it is not the usual OAuth2 error JSON.
fn rejection_error(status: reqwest::StatusCode, body: &str) -> Error {
    let parsed: TokenErrorResponse = serde_json::from_str(body).unwrap_or_default();
    Error::Auth {
        code: parsed
            .error
            .unwrap_or_else(|| format!("http_{}", status.as_u16())),
        description: parsed.error_description.unwrap_or_else(|| body.to_string()),
        correlation_id: parsed.correlation_id,
        source: None,
    }
}
