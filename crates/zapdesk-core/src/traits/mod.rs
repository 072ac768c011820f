// SPDX-FileCopyrightText: 2026 Zapdesk Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Trait seams between the pipeline, transports, storage and collaborators.
//!
//! Adapters extend the [`Adapter`] base trait and use `#[async_trait]` so
//! they can be held as trait objects.

pub mod adapter;
pub mod channel;
pub mod collaborators;
pub mod heap;
pub mod kv;
pub mod publisher;
pub mod storage;

pub use adapter::Adapter;
pub use channel::ChannelClient;
pub use collaborators::{
    AssistantHandler, DispatchRequest, FlowEngine, IntegrationHandler, MediaStore,
    PromptHandler, PromptOutcome, RuleEngine,
};
pub use heap::{HeapProbe, NoHeapProbe};
pub use kv::KeyValueStore;
pub use publisher::{EventPublisher, Priority, RealtimeEvent, RoomOwners, rooms};
pub use storage::StorageAdapter;
