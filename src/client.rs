//! HTTP client for the sync endpoint.
//!
//! The client always adopts what the server sends back: the returned record
//! is the authoritative one, whether or not it matches what was pushed.

use reqwest::header::AUTHORIZATION;
use reqwest::{RequestBuilder, Response};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::record::{NamedRecord, SyncRecord};
use crate::server::auth::{
    derive_token, AuthScheme, DEFAULT_PSK_HEADER, DEFAULT_SHARE_SALT, DEFAULT_SYNC_SALT,
    SHARE_QUERY_PARAM,
};
use crate::server::routes::HealthResponse;
use crate::server::ErrorBody;

/// Errors that can occur when talking to the server.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Transport or decoding failure.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    /// Server answered with a non-success status.
    #[error("server returned {status}: {message}")]
    Status { status: u16, message: String },
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct NamedBody<'a> {
    value: &'a Value,
    update_at: u64,
}

/// Client for one sync server.
#[derive(Debug, Clone)]
pub struct SyncClient {
    server_url: String,
    secret: String,
    scheme: AuthScheme,
    psk_header: String,
    sync_salt: String,
    share_salt: String,
    http: reqwest::Client,
}

impl SyncClient {
    /// Creates a client using the derived-token scheme and default salts.
    pub fn new(server_url: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into().trim_end_matches('/').to_string(),
            secret: secret.into(),
            scheme: AuthScheme::Derived,
            psk_header: DEFAULT_PSK_HEADER.to_string(),
            sync_salt: DEFAULT_SYNC_SALT.to_string(),
            share_salt: DEFAULT_SHARE_SALT.to_string(),
            http: reqwest::Client::new(),
        }
    }

    pub fn with_scheme(mut self, scheme: AuthScheme) -> Self {
        self.scheme = scheme;
        self
    }

    pub fn with_psk_header(mut self, header: impl Into<String>) -> Self {
        self.psk_header = header.into();
        self
    }

    pub fn with_salts(mut self, sync_salt: impl Into<String>, share_salt: impl Into<String>) -> Self {
        self.sync_salt = sync_salt.into();
        self.share_salt = share_salt.into();
        self
    }

    /// Returns the server URL.
    pub fn server_url(&self) -> &str {
        &self.server_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.server_url, path)
    }

    /// Attaches the write credential for the configured scheme.
    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match self.scheme {
            AuthScheme::Plain => request.header(self.psk_header.as_str(), &self.secret),
            AuthScheme::Derived => request.header(
                AUTHORIZATION,
                format!("Bearer {}", derive_token(&self.secret, &self.sync_salt)),
            ),
        }
    }

    /// Pushes a record to `/sync` and returns the server's authoritative copy.
    ///
    /// Pass `update_at = 0` to let the server stamp the write.
    pub async fn push(
        &self,
        key: &str,
        value: Value,
        update_at: u64,
    ) -> Result<SyncRecord, ClientError> {
        let record = SyncRecord::new(key, value, update_at);
        let request = self.authorize(self.http.post(self.url("/sync"))).json(&record);
        let response = check_status(request.send().await?).await?;
        Ok(response.json().await?)
    }

    /// Pushes a value to a named resource, e.g. `rules`.
    pub async fn push_named(
        &self,
        resource: &str,
        value: &Value,
        update_at: u64,
    ) -> Result<NamedRecord, ClientError> {
        let body = NamedBody { value, update_at };
        let request = self
            .authorize(self.http.post(self.url(&format!("/{resource}"))))
            .json(&body);
        let response = check_status(request.send().await?).await?;
        Ok(response.json().await?)
    }

    /// Fetches the read-only share export.
    pub async fn fetch_share(&self) -> Result<Value, ClientError> {
        let token = derive_token(&self.secret, &self.share_salt);
        let request = self
            .http
            .get(self.url("/share"))
            .query(&[(SHARE_QUERY_PARAM, token.as_str())]);
        let response = check_status(request.send().await?).await?;
        Ok(response.json().await?)
    }

    /// Checks that the server is reachable.
    pub async fn health(&self) -> Result<HealthResponse, ClientError> {
        let response = check_status(self.http.get(self.url("/health")).send().await?).await?;
        Ok(response.json().await?)
    }
}

/// Turns a non-2xx response into `ClientError::Status`.
async fn check_status(response: Response) -> Result<Response, ClientError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let text = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorBody>(&text)
        .map(|body| body.message)
        .unwrap_or(text);

    Err(ClientError::Status {
        status: status.as_u16(),
        message,
    })
}
