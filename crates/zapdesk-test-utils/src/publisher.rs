// SPDX-FileCopyrightText: 2026 Zapdesk Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Event publisher that records instead of broadcasting.

use async_trait::async_trait;
use tokio::sync::Mutex;

use zapdesk_core::{EventPublisher, RealtimeEvent};

#[derive(Default)]
pub struct RecordingPublisher {
    events: Mutex<Vec<RealtimeEvent>>,
}

impl RecordingPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn events(&self) -> Vec<RealtimeEvent> {
        self.events.lock().await.clone()
    }

    /// Rooms that received an event named `event`, in publish order.
    pub async fn rooms_for(&self, event: &str) -> Vec<String> {
        self.events
            .lock()
            .await
            .iter()
            .filter(|e| e.event == event)
            .map(|e| e.room.clone())
            .collect()
    }

    pub async fn clear(&self) {
        self.events.lock().await.clear();
    }
}

#[async_trait]
impl EventPublisher for RecordingPublisher {
    async fn publish(&self, event: RealtimeEvent) {
        self.events.lock().await.push(event);
    }
}
