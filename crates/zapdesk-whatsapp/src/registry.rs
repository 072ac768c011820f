// SPDX-FileCopyrightText: 2026 Zapdesk Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! In-memory map from channel id to its live client.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use zapdesk_core::ChannelClient;
use zapdesk_core::ZapdeskError;
use zapdesk_core::types::{ChannelId, ChannelKind, SessionStatus, TenantId};

/// One tenant's live connection for one channel.
#[derive(Clone)]
pub struct Session {
    pub channel_id: ChannelId,
    pub tenant_id: TenantId,
    pub kind: ChannelKind,
    pub client: Arc<dyn ChannelClient>,
    pub status: SessionStatus,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("channel_id", &self.channel_id)
            .field("tenant_id", &self.tenant_id)
            .field("kind", &self.kind)
            .field("client", &self.client.name())
            .field("status", &self.status)
            .finish()
    }
}

/// Registry of live sessions.
///
/// Every method holds the lock only for the map operation itself, so a
/// check followed by an insert is two separate steps. Callers that need the
/// pair to be atomic must serialize on their own lock.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<ChannelId, Session>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a session, returning the one it replaced.
    pub fn add(&self, session: Session) -> Option<Session> {
        let channel_id = session.channel_id;
        let previous = self.sessions.write().insert(channel_id, session);
        debug!(channel_id, replaced = previous.is_some(), "session registered");
        previous
    }

    /// Client for a channel, or `None` when the channel is offline.
    pub fn get(&self, channel_id: ChannelId) -> Option<Arc<dyn ChannelClient>> {
        self.sessions
            .read()
            .get(&channel_id)
            .map(|s| Arc::clone(&s.client))
    }

    /// Like [`get`](Self::get) but turns a miss into [`ZapdeskError::ChannelOffline`].
    pub fn require(&self, channel_id: ChannelId) -> Result<Arc<dyn ChannelClient>, ZapdeskError> {
        self.get(channel_id)
            .ok_or(ZapdeskError::ChannelOffline { channel_id })
    }

    pub fn session(&self, channel_id: ChannelId) -> Option<Session> {
        self.sessions.read().get(&channel_id).cloned()
    }

    pub fn remove(&self, channel_id: ChannelId) -> bool {
        let removed = self.sessions.write().remove(&channel_id).is_some();
        if removed {
            debug!(channel_id, "session removed");
        }
        removed
    }

    pub fn exists(&self, channel_id: ChannelId) -> bool {
        self.sessions.read().contains_key(&channel_id)
    }

    /// Snapshot of every registered channel id, ascending.
    pub fn all_channels(&self) -> Vec<ChannelId> {
        let mut ids: Vec<ChannelId> = self.sessions.read().keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Updates the cached status and returns the previous one.
    pub fn set_status(&self, channel_id: ChannelId, status: SessionStatus) -> Option<SessionStatus> {
        self.sessions
            .write()
            .get_mut(&channel_id)
            .map(|s| std::mem::replace(&mut s.status, status))
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use zapdesk_core::Adapter;
    use zapdesk_core::types::{
        AdapterType, ChannelProbe, HealthStatus, MediaLocation, MediaRef, MessageId,
        OutboundMessage,
    };

    struct NullClient;

    #[async_trait]
    impl Adapter for NullClient {
        fn name(&self) -> &str {
            "null"
        }
        fn adapter_type(&self) -> AdapterType {
            AdapterType::Channel
        }
        async fn health_check(&self) -> Result<HealthStatus, ZapdeskError> {
            Ok(HealthStatus::Healthy)
        }
        async fn shutdown(&self) -> Result<(), ZapdeskError> {
            Ok(())
        }
    }

    #[async_trait]
    impl ChannelClient for NullClient {
        fn kind(&self) -> ChannelKind {
            ChannelKind::BusinessApi
        }
        async fn send(&self, _msg: OutboundMessage) -> Result<MessageId, ZapdeskError> {
            Ok(MessageId("x".into()))
        }
        async fn probe(&self) -> Result<ChannelProbe, ZapdeskError> {
            Ok(ChannelProbe {
                status: SessionStatus::Connected,
                detail: None,
            })
        }
        async fn media_location(&self, _media: &MediaRef) -> Result<MediaLocation, ZapdeskError> {
            Err(ZapdeskError::channel("none"))
        }
    }

    fn session(channel_id: ChannelId) -> Session {
        Session {
            channel_id,
            tenant_id: 1,
            kind: ChannelKind::BusinessApi,
            client: Arc::new(NullClient),
            status: SessionStatus::Connected,
        }
    }

    #[test]
    fn add_get_remove() {
        let registry = SessionRegistry::new();
        assert!(registry.add(session(5)).is_none());
        assert!(registry.exists(5));
        assert!(registry.get(5).is_some());
        assert!(registry.remove(5));
        assert!(!registry.remove(5));
        assert!(registry.get(5).is_none());
    }

    #[test]
    fn unknown_channel_is_offline() {
        let registry = SessionRegistry::new();
        let err = match registry.require(9) {
            Err(e) => e,
            Ok(_) => panic!("expected offline"),
        };
        assert!(matches!(err, ZapdeskError::ChannelOffline { channel_id: 9 }));
    }

    #[test]
    fn add_replaces_existing_session() {
        let registry = SessionRegistry::new();
        registry.add(session(1));
        let replaced = registry.add(session(1));
        assert!(replaced.is_some());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn status_updates_return_previous() {
        let registry = SessionRegistry::new();
        registry.add(session(2));
        registry.add(session(1));
        assert_eq!(
            registry.set_status(2, SessionStatus::Limited),
            Some(SessionStatus::Connected)
        );
        assert_eq!(registry.session(2).map(|s| s.status), Some(SessionStatus::Limited));
        assert_eq!(registry.set_status(3, SessionStatus::Limited), None);
        assert_eq!(registry.all_channels(), vec![1, 2]);
    }
}
