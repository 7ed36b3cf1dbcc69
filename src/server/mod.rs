//! HTTP boundary for the sync endpoint.
//!
//! Request flow: routing → auth middleware → handler → merge engine → store.
//! Routing decides 404/405 before any credential is looked at, and the auth
//! middleware runs before any store access. `OPTIONS` is answered per route
//! without auth, and every response gets `Access-Control-Allow-Origin: *`.

pub mod auth;
pub mod error;
pub mod routes;

pub use auth::{derive_token, AuthError, AuthScheme, Authenticator, OperationClass};
pub use error::{ErrorBody, SyncError};
pub use routes::ResourceMap;

use axum::{
    http::{header, HeaderValue, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use serde::Serialize;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;

use crate::config::{ConfigError, ServerConfig};
use crate::merge::MergeEngine;

/// Content type of every JSON body we send.
pub const JSON_CONTENT_TYPE: &str = "application/json; charset=UTF-8";

/// Shared, read-only state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub engine: MergeEngine,
    pub auth: Arc<Authenticator>,
    pub resources: Arc<ResourceMap>,
}

impl AppState {
    pub fn new(engine: MergeEngine, auth: Authenticator, resources: ResourceMap) -> Self {
        Self {
            engine,
            auth: Arc::new(auth),
            resources: Arc::new(resources),
        }
    }

    /// Wires store, merge engine, authenticator and route table from config.
    pub fn from_config(config: &ServerConfig) -> Result<Self, ConfigError> {
        let engine = MergeEngine::new(config.build_store(), config.tie_policy);
        let auth = Authenticator::new(config.secret.clone(), config.auth_scheme)
            .with_salts(config.sync_salt.clone(), config.share_salt.clone())
            .with_psk_header(config.psk_header_name()?);
        let resources = ResourceMap::new(config.resources.clone(), config.share_key.clone());
        Ok(Self::new(engine, auth, resources))
    }
}

/// Serializes `body` with the JSON content type.
pub(crate) fn json_response<T: Serialize>(status: StatusCode, body: &T) -> Response {
    match serde_json::to_vec(body) {
        Ok(bytes) => (
            status,
            [(header::CONTENT_TYPE, HeaderValue::from_static(JSON_CONTENT_TYPE))],
            bytes,
        )
            .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "failed to encode response body");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Wildcard origin on every response. Preflights are answered by the routes.
pub fn allow_any_origin() -> SetResponseHeaderLayer<HeaderValue> {
    SetResponseHeaderLayer::if_not_present(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    )
}

/// Builds the full router.
pub fn router(state: AppState) -> Router {
    let write_auth = middleware::from_fn_with_state(state.clone(), routes::require_write_auth);
    let share_auth = middleware::from_fn_with_state(state.clone(), routes::require_share_auth);

    let mut app = Router::new()
        .route(
            "/health",
            get(routes::health)
                .options(routes::read_options)
                .fallback(routes::method_not_allowed),
        )
        .route(
            "/sync",
            post(routes::sync_record)
                .route_layer(write_auth.clone())
                .options(routes::write_options)
                .fallback(routes::method_not_allowed),
        )
        .route(
            "/share",
            get(routes::share_export)
                .route_layer(share_auth)
                .options(routes::read_options)
                .fallback(routes::method_not_allowed),
        );

    for name in state.resources.names() {
        app = app.route(
            &format!("/{name}"),
            post(routes::named_record)
                .route_layer(write_auth.clone())
                .options(routes::write_options)
                .fallback(routes::method_not_allowed),
        );
    }

    app.fallback(routes::not_found)
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(allow_any_origin()),
        )
}
