// SPDX-FileCopyrightText: 2026 Zapdesk Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Core library for the Zapdesk helpdesk platform.
//!
//! Holds the error type, the domain records and the trait seams every other
//! crate plugs into. Nothing here performs I/O.

pub mod clock;
pub mod error;
pub mod models;
pub mod traits;
pub mod types;

pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use error::ZapdeskError;
pub use types::{AdapterType, HealthStatus, MessageId};

pub use traits::{
    Adapter, AssistantHandler, ChannelClient, DispatchRequest, EventPublisher, FlowEngine,
    HeapProbe, IntegrationHandler, KeyValueStore, MediaStore, Priority, PromptHandler, PromptOutcome,
    RealtimeEvent, RoomOwners, RuleEngine, StorageAdapter, rooms,
};
