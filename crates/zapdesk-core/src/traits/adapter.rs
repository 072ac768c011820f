// SPDX-FileCopyrightText: 2026 Zapdesk Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Base trait shared by transports, storage and media backends.

use async_trait::async_trait;

use crate::error::ZapdeskError;
use crate::types::{AdapterType, HealthStatus};

/// Identity, health and lifecycle of a pluggable backend.
#[async_trait]
pub trait Adapter: Send + Sync + 'static {
    /// Name used in logs and health output.
    fn name(&self) -> &str;

    fn adapter_type(&self) -> AdapterType;

    async fn health_check(&self) -> Result<HealthStatus, ZapdeskError>;

    /// Releases held connections. Must be idempotent.
    async fn shutdown(&self) -> Result<(), ZapdeskError>;
}
