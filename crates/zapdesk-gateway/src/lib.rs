// SPDX-FileCopyrightText: 2026 Zapdesk Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! HTTP/WebSocket gateway.
//!
//! The gateway is the process's only listener. Business API webhooks are
//! verified and queued for the pipeline's event loop, operator UIs attach
//! over `/ws` to receive realtime envelopes, and `/health` plus `/metrics`
//! serve orchestration and scraping.

pub mod auth;
pub mod handlers;
pub mod server;
pub mod webhook;
pub mod ws;

pub use auth::AuthConfig;
pub use server::{GatewayState, HealthState, ServerConfig, router, start_server};
