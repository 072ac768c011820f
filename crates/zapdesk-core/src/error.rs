// SPDX-FileCopyrightText: 2026 Zapdesk Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Error types shared by every Zapdesk crate.

use thiserror::Error;

/// Provider error codes that mean the channel credentials are no longer valid.
pub const FATAL_AUTH_CODES: [i64; 2] = [0, 190];

/// Returns true when a provider error code invalidates the channel session.
pub fn is_fatal_auth_code(code: i64) -> bool {
    FATAL_AUTH_CODES.contains(&code)
}

/// The primary error type used across adapter traits and pipeline stages.
#[derive(Debug, Error)]
pub enum ZapdeskError {
    /// Configuration errors (invalid TOML, missing required fields, type mismatches).
    #[error("configuration error: {0}")]
    Config(String),

    /// Storage backend errors (database connection, query failure, serialization).
    #[error("storage error: {source}")]
    Storage {
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Transport errors (connection failure, malformed payload, rate limiting).
    #[error("channel error: {message}")]
    Channel {
        message: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The provider rejected the channel credentials.
    #[error("channel authentication failed (code {code}): {message}")]
    ChannelAuth { code: i64, message: String },

    /// The channel has no live session in the registry.
    #[error("channel {channel_id} is not connected")]
    ChannelOffline { channel_id: i64 },

    /// Inbound or outbound payload failed validation.
    #[error("validation error: {0}")]
    Validation(String),

    /// A uniqueness constraint was hit (duplicate message, taken slot).
    #[error("conflict: {0}")]
    Conflict(String),

    /// A referenced entity does not exist.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// Operation timed out.
    #[error("operation timed out after {duration:?}")]
    Timeout { duration: std::time::Duration },

    /// Internal or unexpected errors.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ZapdeskError {
    /// Shorthand for a [`ZapdeskError::Channel`] without a source.
    pub fn channel(message: impl Into<String>) -> Self {
        Self::Channel {
            message: message.into(),
            source: None,
        }
    }

    /// Shorthand for a [`ZapdeskError::NotFound`].
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// True when the error means the channel must be marked disconnected
    /// and dropped from the session registry.
    pub fn is_channel_fatal(&self) -> bool {
        match self {
            Self::ChannelAuth { code, .. } => is_fatal_auth_code(*code),
            _ => false,
        }
    }
}
