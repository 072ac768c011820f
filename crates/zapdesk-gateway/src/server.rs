// SPDX-FileCopyrightText: 2026 Zapdesk Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Gateway HTTP server built on axum.
//!
//! Sets up routes, middleware, and shared state for the gateway.

use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    Router,
    extract::DefaultBodyLimit,
    middleware as axum_middleware,
    routing::{get, post},
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use zapdesk_config::model::ZapdeskConfig;
use zapdesk_core::ZapdeskError;
use zapdesk_pipeline::Pipeline;
use zapdesk_realtime::Realtime;
use zapdesk_whatsapp::ChannelEvent;

use crate::auth::{AuthConfig, auth_middleware};
use crate::{handlers, webhook, ws};

/// Largest webhook body accepted. Provider deliveries are far smaller.
const WEBHOOK_BODY_LIMIT: usize = 1024 * 1024;

/// Health state for unauthenticated health/metrics endpoints.
#[derive(Clone)]
pub struct HealthState {
    /// Process start time for uptime calculation.
    pub start_time: std::time::Instant,
    /// Optional Prometheus metrics render function.
    pub prometheus_render: Option<Arc<dyn Fn() -> String + Send + Sync>>,
}

/// Shared state for axum request handlers.
#[derive(Clone)]
pub struct GatewayState {
    pub pipeline: Arc<Pipeline>,
    /// Webhook deliveries are queued here for the pipeline's event loop.
    pub events: mpsc::Sender<ChannelEvent>,
    pub realtime: Realtime,
    pub auth: AuthConfig,
    /// Secret for `X-Hub-Signature-256`; unset skips the check.
    pub app_secret: Option<Arc<str>>,
    pub health: HealthState,
}

/// Gateway bind address and filesystem roots.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Directory served under `/media`.
    pub media_dir: Option<PathBuf>,
}

impl ServerConfig {
    pub fn from_config(config: &ZapdeskConfig) -> Self {
        Self {
            host: config.gateway.host.clone(),
            port: config.gateway.port,
            media_dir: Some(PathBuf::from(&config.whatsapp.media_dir)),
        }
    }
}

/// Assembles every route:
/// - GET /health, GET /metrics (public)
/// - GET|POST /webhook/{channel_id} (provider, optionally signed)
/// - GET /v1/channels, POST /v1/tickets/{ticket_id}/rating, /media/* (bearer)
/// - GET /ws (auth via query params, not middleware)
pub fn router(state: GatewayState, media_dir: Option<PathBuf>) -> Router {
    let auth_state = state.auth.clone();

    let public_routes = Router::new()
        .route("/health", get(handlers::get_health))
        .route("/metrics", get(handlers::get_metrics))
        .with_state(state.clone());

    let webhook_routes = Router::new()
        .route(
            "/webhook/{channel_id}",
            get(webhook::verify).post(webhook::receive),
        )
        .layer(DefaultBodyLimit::max(WEBHOOK_BODY_LIMIT))
        .with_state(state.clone());

    let mut api_routes = Router::new()
        .route("/v1/channels", get(handlers::list_channels))
        .route(
            "/v1/tickets/{ticket_id}/rating",
            post(handlers::request_rating),
        )
        .with_state(state.clone());
    if let Some(dir) = media_dir {
        api_routes = api_routes.nest_service("/media", ServeDir::new(dir));
    }
    let api_routes = api_routes.layer(axum_middleware::from_fn_with_state(
        auth_state,
        auth_middleware,
    ));

    let ws_routes = Router::new()
        .route("/ws", get(ws::ws_handler))
        .with_state(state);

    Router::new()
        .merge(public_routes)
        .merge(webhook_routes)
        .merge(api_routes)
        .merge(ws_routes)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Binds and serves until `cancel` fires.
pub async fn start_server(
    config: &ServerConfig,
    state: GatewayState,
    cancel: CancellationToken,
) -> Result<(), ZapdeskError> {
    let app = router(state, config.media_dir.clone());

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| ZapdeskError::Channel {
            message: format!("failed to bind gateway to {addr}: {e}"),
            source: Some(Box::new(e)),
        })?;

    tracing::info!("Gateway server listening on {addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await
        .map_err(|e| ZapdeskError::Channel {
            message: format!("gateway server error: {e}"),
            source: Some(Box::new(e)),
        })?;

    tracing::info!("Gateway server stopped");
    Ok(())
}
