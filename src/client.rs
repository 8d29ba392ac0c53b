//! Authenticated HTTP client shared by the Defender and Graph operations.
//!
//! `ApiClient` wraps a `reqwest::Client`, a base URL and a `TokenProvider`
//! behind a `Mutex`. The two Microsoft APIs differ only in base URL and
//! token scope, so one parameterized client serves both.
//!
//! Token lifecycle:
//! - Lazy acquisition: [`ApiClient::authenticate`] acquires a token when
//!   none is cached. Every request helper calls it first, and callers may
//!   call it up front to fail fast on bad credentials.
//! - The mutex is the single acquisition-in-progress guard: concurrent
//!   callers wait on one acquisition instead of starting their own.
//! - No retry: every non-2xx response is reported as `Error::Api`. A 401
//!   also invalidates the cached token so the next request re-acquires.

use std::time::Duration;

use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, de::DeserializeOwned};
use tokio::sync::Mutex;
use tracing::debug;

use crate::auth::TokenProvider;
use crate::error::{Error, Result};

/// Base URL of the Defender for Endpoint security-center API.
pub const DEFENDER_BASE_URL: &str = "https://api.securitycenter.microsoft.com/";

/// Base URL of Microsoft Graph.
pub const GRAPH_BASE_URL: &str = "https://graph.microsoft.com/";

/// Covers TCP + TLS handshake only. There is deliberately no overall
/// request timeout; large downloads are streamed for as long as they take.
const API_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

fn build_api_client() -> Result<Client> {
    Ok(Client::builder()
        .connect_timeout(API_CONNECT_TIMEOUT)
        .build()?)
}

/// OData collection wrapper returned by list endpoints.
///
/// Both APIs wrap collections in `{ "value": [...] }` alongside metadata
/// such as `@odata.context`, which is ignored. A missing `value` is
/// treated as an empty collection.
#[derive(Debug, Deserialize)]
pub struct ODataList<T> {
    /// The array of result items.
    #[serde(default = "Vec::new")]
    pub value: Vec<T>,
}

/// Authenticated HTTP client over a fixed base URL.
///
/// `base_url` is a `String` so tests can point it at a wiremock server.
pub struct ApiClient {
    client: Client,
    base_url: String,
    auth: Mutex<TokenProvider>,
}

impl ApiClient {
    /// Client for the Defender for Endpoint API.
    pub fn defender(auth: TokenProvider) -> Result<Self> {
        Self::with_base_url(auth, DEFENDER_BASE_URL)
    }

    /// Client for Microsoft Graph.
    pub fn graph(auth: TokenProvider) -> Result<Self> {
        Self::with_base_url(auth, GRAPH_BASE_URL)
    }

    /// Client over an arbitrary base URL. Paths passed to the request
    /// helpers are appended verbatim, so the base should end with `/`.
    pub fn with_base_url(auth: TokenProvider, base_url: &str) -> Result<Self> {
        Ok(ApiClient {
            client: build_api_client()?,
            base_url: base_url.to_string(),
            auth: Mutex::new(auth),
        })
    }

    /// The base URL all request paths are resolved against.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Acquires a token if none is cached, and returns the bearer token.
    ///
    /// Idempotent: with a valid cached token this performs no network
    /// call. The lock is held only for the check and the acquisition,
    /// never across an API round-trip.
    pub async fn authenticate(&self) -> Result<String> {
        let mut auth = self.auth.lock().await;
        if let Some(token) = auth.token() {
            return Ok(token.to_owned());
        }
        Ok(auth.acquire().await?.access_token().to_owned())
    }

    async fn invalidate(&self) {
        self.auth.lock().await.invalidate();
    }

    /// Sends an authenticated GET and returns the response once its status
    /// is known to be successful.
    async fn send_get(&self, path: &str, query: &[(&str, &str)]) -> Result<Response> {
        let url = format!("{}{}", self.base_url, path);
        let token = self.authenticate().await?;

        debug!(%url, "GET");
        let mut req = self.client.get(&url).bearer_auth(&token);
        if !query.is_empty() {
            req = req.query(query);
        }
        let resp = req.send().await?;
        self.check_status(resp).await
    }

    /// Converts a non-success response into `Error::Api`, keeping the body.
    async fn check_status(&self, resp: Response) -> Result<Response> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        if status == StatusCode::UNAUTHORIZED {
            // The next request re-acquires; this one is still reported.
            self.invalidate().await;
        }
        let body = resp.text().await.unwrap_or_default();
        Err(Error::Api { status, body })
    }

    /// Sends an authenticated GET and deserializes the JSON response.
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.get_with_query(path, &[]).await
    }

    /// Sends an authenticated GET with URL-encoded query parameters and
    /// deserializes the JSON response.
    pub async fn get_with_query<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T> {
        let resp = self.send_get(path, query).await?;
        let bytes = resp.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Sends an authenticated GET and returns the raw response for
    /// streaming the body.
    pub async fn get_stream(&self, path: &str) -> Result<Response> {
        self.send_get(path, &[]).await
    }
}
