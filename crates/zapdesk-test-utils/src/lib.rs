// SPDX-FileCopyrightText: 2026 Zapdesk Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test utilities for Zapdesk integration tests.
//!
//! Provides mock adapters and a test harness for fast, deterministic,
//! CI-runnable tests without a WhatsApp account or external services.
//!
//! # Components
//!
//! - [`MockChannel`] - Channel client that captures sends and scripts probes
//! - [`RecordingPublisher`] - Event publisher that keeps every event
//! - [`ScriptedCollaborators`] - Flow/assistant/prompt/integration stand-ins
//! - [`TestHarness`] - Temp SQLite, one registered channel and a pipeline

pub mod collaborators;
pub mod harness;
pub mod mock_channel;
pub mod publisher;

pub use collaborators::ScriptedCollaborators;
pub use harness::{TestHarness, inbound_text};
pub use mock_channel::MockChannel;
pub use publisher::RecordingPublisher;
