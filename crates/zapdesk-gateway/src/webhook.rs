// SPDX-FileCopyrightText: 2026 Zapdesk Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Business API webhook endpoints.
//!
//! `GET /webhook/{channel_id}` answers the subscription handshake and
//! `POST /webhook/{channel_id}` turns a delivery into wire events for the
//! pipeline. Deliveries are acknowledged as soon as they are queued.

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use serde_json::Value;
use tracing::{debug, info, warn};

use zapdesk_core::types::ChannelId;
use zapdesk_whatsapp::normalize::cloud::parse_webhook;
use zapdesk_whatsapp::webhook::{VerifyParams, verify_signature, verify_subscription};

use crate::server::GatewayState;

pub const SIGNATURE_HEADER: &str = "x-hub-signature-256";

/// GET /webhook/{channel_id}
pub async fn verify(
    State(state): State<GatewayState>,
    Path(channel_id): Path<ChannelId>,
    Query(params): Query<VerifyParams>,
) -> Response {
    let expected = match state.pipeline.deps().storage.get_channel(channel_id).await {
        Ok(channel) => channel.and_then(|c| c.verify_token),
        Err(e) => {
            warn!(channel_id, error = %e, "channel lookup failed during webhook handshake");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    match verify_subscription(&params, expected.as_deref()) {
        Ok(challenge) => {
            info!(channel_id, "webhook subscription verified");
            (StatusCode::OK, challenge).into_response()
        }
        Err(e) => {
            warn!(channel_id, error = %e, "webhook subscription refused");
            StatusCode::FORBIDDEN.into_response()
        }
    }
}

/// POST /webhook/{channel_id}
pub async fn receive(
    State(state): State<GatewayState>,
    Path(channel_id): Path<ChannelId>,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    if let Some(secret) = state.app_secret.as_deref() {
        let signature = headers
            .get(SIGNATURE_HEADER)
            .and_then(|v| v.to_str().ok());
        if !signature.is_some_and(|s| verify_signature(secret, s, &body)) {
            warn!(channel_id, "webhook delivery with a missing or bad signature");
            return StatusCode::UNAUTHORIZED;
        }
    }

    match state.pipeline.deps().storage.get_channel(channel_id).await {
        Ok(Some(channel)) if channel.enabled => {}
        Ok(_) => {
            debug!(channel_id, "webhook delivery for an unknown channel");
            return StatusCode::NOT_FOUND;
        }
        Err(e) => {
            warn!(channel_id, error = %e, "channel lookup failed during webhook delivery");
            return StatusCode::INTERNAL_SERVER_ERROR;
        }
    }

    let payload: Value = match serde_json::from_slice(&body) {
        Ok(payload) => payload,
        Err(e) => {
            warn!(channel_id, error = %e, "webhook body is not JSON");
            return StatusCode::BAD_REQUEST;
        }
    };

    // Foreign objects are acknowledged so the provider does not retry them.
    let events = match parse_webhook(&payload) {
        Ok(events) => events,
        Err(e) => {
            debug!(channel_id, error = %e, "ignoring webhook delivery");
            return StatusCode::OK;
        }
    };

    let count = events.len();
    for event in events {
        if state.events.send((channel_id, event)).await.is_err() {
            warn!(channel_id, "pipeline is not accepting events");
            return StatusCode::SERVICE_UNAVAILABLE;
        }
    }
    debug!(channel_id, count, "webhook delivery queued");
    StatusCode::OK
}
