// SPDX-FileCopyrightText: 2026 Zapdesk Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Request handlers for health, metrics and the operator API.

use axum::{
    Json,
    extract::{Path, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Serialize;

use zapdesk_core::ZapdeskError;
use zapdesk_core::types::{ChannelId, ChannelKind, SessionStatus, TenantId, TicketId};
use zapdesk_realtime::batcher::BatcherStats;
use zapdesk_realtime::memory::RoomStats;
use zapdesk_realtime::metrics::MetricsSnapshot;
use zapdesk_realtime::pool::PoolMetrics;

use crate::server::GatewayState;

/// Response body for GET /health.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
    pub channels: usize,
    pub connected_channels: usize,
    pub sockets: PoolMetrics,
    pub rooms: RoomStats,
    pub batcher: BatcherStats,
    pub delivery: MetricsSnapshot,
}

#[derive(Debug, Serialize)]
pub struct ChannelInfo {
    pub id: ChannelId,
    pub tenant_id: TenantId,
    pub kind: ChannelKind,
    pub status: SessionStatus,
}

#[derive(Debug, Serialize)]
pub struct ChannelListResponse {
    pub channels: Vec<ChannelInfo>,
}

/// Error response body.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Maps a pipeline error to an HTTP status and JSON body.
pub fn error_response(err: &ZapdeskError) -> Response {
    let status = match err {
        ZapdeskError::NotFound { .. } => StatusCode::NOT_FOUND,
        ZapdeskError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
        ZapdeskError::Conflict(_) => StatusCode::CONFLICT,
        ZapdeskError::ChannelOffline { .. } => StatusCode::SERVICE_UNAVAILABLE,
        ZapdeskError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (
        status,
        Json(ErrorResponse {
            error: err.to_string(),
        }),
    )
        .into_response()
}

/// GET /health
///
/// Unauthenticated; used by systemd and load balancers.
pub async fn get_health(State(state): State<GatewayState>) -> Json<HealthResponse> {
    let registry = &state.pipeline.deps().registry;
    let channels = registry.all_channels();
    let connected = channels
        .iter()
        .filter_map(|id| registry.session(*id))
        .filter(|s| s.status == SessionStatus::Connected)
        .count();
    let hub = &state.realtime.hub;

    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.health.start_time.elapsed().as_secs(),
        channels: channels.len(),
        connected_channels: connected,
        sockets: hub.pool().metrics(),
        rooms: hub.memory().stats(),
        batcher: state.realtime.batcher.stats(),
        delivery: hub.performance().snapshot(),
    })
}

/// GET /metrics
///
/// Prometheus text exposition. 404 when no recorder is installed.
pub async fn get_metrics(State(state): State<GatewayState>) -> Response {
    match &state.health.prometheus_render {
        Some(render) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            render(),
        )
            .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

/// GET /v1/channels
pub async fn list_channels(State(state): State<GatewayState>) -> Json<ChannelListResponse> {
    let registry = &state.pipeline.deps().registry;
    let channels = registry
        .all_channels()
        .into_iter()
        .filter_map(|id| registry.session(id))
        .map(|s| ChannelInfo {
            id: s.channel_id,
            tenant_id: s.tenant_id,
            kind: s.kind,
            status: s.status,
        })
        .collect();
    Json(ChannelListResponse { channels })
}

/// POST /v1/tickets/{ticket_id}/rating
///
/// Sends the rating prompt; the contact's next reply is captured as the score.
pub async fn request_rating(
    State(state): State<GatewayState>,
    Path(ticket_id): Path<TicketId>,
) -> Response {
    match state.pipeline.request_rating(ticket_id).await {
        Ok(()) => StatusCode::ACCEPTED.into_response(),
        Err(e) => {
            tracing::warn!(ticket_id, error = %e, "rating request failed");
            error_response(&e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn errors_map_to_statuses() {
        let cases = [
            (ZapdeskError::not_found("ticket", 9), StatusCode::NOT_FOUND),
            (
                ZapdeskError::Validation("closed".into()),
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
            (ZapdeskError::Conflict("taken".into()), StatusCode::CONFLICT),
            (
                ZapdeskError::ChannelOffline { channel_id: 3 },
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (
                ZapdeskError::Timeout {
                    duration: Duration::from_secs(1),
                },
                StatusCode::GATEWAY_TIMEOUT,
            ),
            (
                ZapdeskError::Internal("boom".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(error_response(&err).status(), status, "{err}");
        }
    }

    #[test]
    fn error_response_serializes() {
        let json = serde_json::to_value(ErrorResponse {
            error: "nope".into(),
        })
        .unwrap();
        assert_eq!(json["error"], "nope");
    }
}
