// SPDX-FileCopyrightText: 2026 Zapdesk Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Outbound side of a WhatsApp transport.

use async_trait::async_trait;

use crate::error::ZapdeskError;
use crate::traits::adapter::Adapter;
use crate::types::{
    ChannelKind, ChannelProbe, DirectoryContact, GroupMetadata, LocalMedia, MediaLocation,
    MediaRef, MessageId, OutboundMessage,
};

/// A live session able to send messages for one channel.
///
/// Instances live in the session registry keyed by channel id; inbound
/// traffic arrives separately as [`crate::types::WireEvent`]s.
#[async_trait]
pub trait ChannelClient: Adapter {
    fn kind(&self) -> ChannelKind;

    /// Delivers a message and returns the provider's id for it.
    async fn send(&self, msg: OutboundMessage) -> Result<MessageId, ZapdeskError>;

    /// Asks the provider whether the session is usable.
    ///
    /// Credential failures come back as [`ZapdeskError::ChannelAuth`].
    async fn probe(&self) -> Result<ChannelProbe, ZapdeskError>;

    /// Resolves where an attachment can be downloaded from.
    async fn media_location(&self, media: &MediaRef) -> Result<MediaLocation, ZapdeskError>;

    /// Uploads a local file and returns the provider's media id.
    async fn upload_media(&self, media: &LocalMedia) -> Result<String, ZapdeskError> {
        let _ = media;
        Err(ZapdeskError::channel(format!(
            "{} does not support media upload",
            self.name()
        )))
    }

    async fn group_metadata(&self, group_id: &str) -> Result<GroupMetadata, ZapdeskError> {
        let _ = group_id;
        Err(ZapdeskError::channel(format!(
            "{} does not expose group metadata",
            self.name()
        )))
    }

    /// Address book of the business account, used by the daily import.
    async fn directory_contacts(&self) -> Result<Vec<DirectoryContact>, ZapdeskError> {
        Ok(Vec::new())
    }
}
