//! Route table and handlers.
//!
//! ```text
//! POST /sync        generic record, key in body          (write auth)
//! POST /<resource>  named record, key from route table   (write auth)
//! GET  /share       read-only export of the share key    (share token in ?psk=)
//! GET  /health      liveness, no auth
//! ```

use axum::{
    body::Bytes,
    extract::{MatchedPath, Query, Request, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::auth::SHARE_QUERY_PARAM;
use super::{json_response, AppState, SyncError};
use crate::record::{parse_named_body, parse_sync_body, NamedRecord};

/// Methods advertised in CORS preflight responses.
pub const CORS_METHODS: &str = "GET, HEAD, POST, OPTIONS";

/// `Allow` list for the write routes.
pub const WRITE_METHODS: &str = "POST, OPTIONS";

/// `Allow` list for the read routes.
pub const READ_METHODS: &str = "GET, HEAD, OPTIONS";

const PREFLIGHT_MAX_AGE: &str = "86400";

/// Paths with fixed meaning that a named resource may not take.
pub const RESERVED_PATHS: [&str; 3] = ["sync", "share", "health"];

/// Maps route names to store keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceMap {
    named: BTreeMap<String, String>,
    share_key: String,
}

impl ResourceMap {
    pub fn new(named: BTreeMap<String, String>, share_key: impl Into<String>) -> Self {
        Self {
            named,
            share_key: share_key.into(),
        }
    }

    /// Store key for a named resource.
    pub fn store_key(&self, name: &str) -> Option<&str> {
        self.named.get(name).map(String::as_str)
    }

    /// Names of all configured resources.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.named.keys().map(String::as_str)
    }

    /// Store key served by the share export.
    pub fn share_key(&self) -> &str {
        &self.share_key
    }
}

// ============================================================================
// Middleware
// ============================================================================

/// Checks the write credential before the body is read.
pub async fn require_write_auth(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    match state.auth.verify_write(request.headers()) {
        Ok(()) => next.run(request).await,
        Err(e) => SyncError::from(e).into_response(),
    }
}

#[derive(Debug, Default, Deserialize)]
struct ShareQuery {
    psk: Option<String>,
}

/// Checks the share token carried in the query string.
pub async fn require_share_auth(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let token = Query::<ShareQuery>::try_from_uri(request.uri())
        .map(|Query(q)| q)
        .unwrap_or_default()
        .psk;

    match state.auth.verify_share(token.as_deref()) {
        Ok(()) => next.run(request).await,
        Err(e) => {
            tracing::debug!(param = SHARE_QUERY_PARAM, "share token rejected");
            SyncError::from(e).into_response()
        }
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// `POST /sync`
pub async fn sync_record(State(state): State<AppState>, body: Bytes) -> Result<Response, SyncError> {
    let record = parse_sync_body(&body)?;
    let merged = state.engine.merge(record).await?;
    Ok(json_response(StatusCode::OK, &merged))
}

/// `POST /<resource>`
pub async fn named_record(
    State(state): State<AppState>,
    path: MatchedPath,
    body: Bytes,
) -> Result<Response, SyncError> {
    let name = path.as_str().trim_start_matches('/');
    let store_key = state.resources.store_key(name).ok_or(SyncError::NotFound)?;

    let record = parse_named_body(&body, store_key)?;
    let merged = state.engine.merge(record).await?;
    Ok(json_response(StatusCode::OK, &NamedRecord::from(merged)))
}

/// `GET /share`
pub async fn share_export(State(state): State<AppState>) -> Result<Response, SyncError> {
    let entry = state
        .engine
        .store()
        .get_with_metadata(state.resources.share_key())
        .await?
        .ok_or(SyncError::EmptyData)?;
    Ok(json_response(StatusCode::OK, &entry.value))
}

/// Health check response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// `GET /health`
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: crate::version().to_string(),
    })
}

/// A preflight carries `Origin` and both `Access-Control-Request-*` headers.
pub fn is_preflight(headers: &HeaderMap) -> bool {
    [
        header::ORIGIN,
        header::ACCESS_CONTROL_REQUEST_METHOD,
        header::ACCESS_CONTROL_REQUEST_HEADERS,
    ]
    .iter()
    .all(|name| headers.contains_key(name))
}

/// Answers `OPTIONS`: CORS headers for a preflight, otherwise `Allow: <allow>`.
pub fn options_response(headers: &HeaderMap, allow: &'static str) -> Response {
    let Some(requested) = headers
        .get(header::ACCESS_CONTROL_REQUEST_HEADERS)
        .filter(|_| is_preflight(headers))
    else {
        return (
            StatusCode::OK,
            [(header::ALLOW, HeaderValue::from_static(allow))],
        )
            .into_response();
    };

    (
        StatusCode::OK,
        [
            (header::ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*")),
            (
                header::ACCESS_CONTROL_ALLOW_METHODS,
                HeaderValue::from_static(CORS_METHODS),
            ),
            (header::ACCESS_CONTROL_ALLOW_HEADERS, requested.clone()),
            (
                header::ACCESS_CONTROL_MAX_AGE,
                HeaderValue::from_static(PREFLIGHT_MAX_AGE),
            ),
        ],
    )
        .into_response()
}

/// `OPTIONS /sync` and `OPTIONS /<resource>`
pub async fn write_options(headers: HeaderMap) -> Response {
    options_response(&headers, WRITE_METHODS)
}

/// `OPTIONS /share` and `OPTIONS /health`
pub async fn read_options(headers: HeaderMap) -> Response {
    options_response(&headers, READ_METHODS)
}

pub async fn method_not_allowed() -> SyncError {
    SyncError::Method
}

pub async fn not_found() -> SyncError {
    SyncError::NotFound
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_map_lookup() {
        let mut named = BTreeMap::new();
        named.insert("rules".to_string(), "kvsync-rules".to_string());
        named.insert("setting".to_string(), "kvsync-setting".to_string());
        let map = ResourceMap::new(named, "kvsync-rules-share");

        assert_eq!(map.store_key("rules"), Some("kvsync-rules"));
        assert_eq!(map.store_key("setting"), Some("kvsync-setting"));
        assert_eq!(map.store_key("sync"), None);
        assert_eq!(map.share_key(), "kvsync-rules-share");
        assert_eq!(map.names().collect::<Vec<_>>(), vec!["rules", "setting"]);
    }

    #[test]
    fn test_preflight_needs_all_three_headers() {
        let mut headers = HeaderMap::new();
        headers.insert(header::ORIGIN, HeaderValue::from_static("https://a.example"));
        headers.insert(
            header::ACCESS_CONTROL_REQUEST_METHOD,
            HeaderValue::from_static("POST"),
        );
        assert!(!is_preflight(&headers));

        headers.insert(
            header::ACCESS_CONTROL_REQUEST_HEADERS,
            HeaderValue::from_static("content-type"),
        );
        assert!(is_preflight(&headers));

        headers.remove(header::ORIGIN);
        assert!(!is_preflight(&headers));
    }

    #[test]
    fn test_options_response_without_preflight_lists_methods() {
        let response = options_response(&HeaderMap::new(), READ_METHODS);
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers().get(header::ALLOW).unwrap(), READ_METHODS);
        assert!(response
            .headers()
            .get(header::ACCESS_CONTROL_ALLOW_METHODS)
            .is_none());
    }
}
