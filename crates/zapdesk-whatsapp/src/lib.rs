// SPDX-FileCopyrightText: 2026 Zapdesk Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! WhatsApp transports for Zapdesk.
//!
//! Two transports feed the same canonical [`zapdesk_core::types::WireEvent`]
//! stream:
//!
//! - the hosted Business API ([`cloud::CloudApiClient`] for outbound calls,
//!   [`webhook`] plus [`normalize::cloud`] for inbound webhooks), and
//! - the multi-device socket protocol, spoken by an external bridge process
//!   that [`bridge::BridgeClient`] reaches over a WebSocket.
//!
//! Live clients are kept in the [`SessionRegistry`] keyed by channel id.

pub mod bridge;
pub mod cloud;
pub mod interactive;
pub mod normalize;
pub mod registry;
pub mod webhook;

pub use bridge::BridgeClient;
pub use cloud::CloudApiClient;
pub use registry::{Session, SessionRegistry};

/// A wire event tagged with the channel it arrived on.
pub type ChannelEvent = (zapdesk_core::types::ChannelId, zapdesk_core::types::WireEvent);
