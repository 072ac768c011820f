// SPDX-FileCopyrightText: 2026 Zapdesk Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Connection setup, pragmas and lifecycle.
//!
//! Every statement runs on the single background thread owned by
//! `tokio_rusqlite`. Query modules borrow [`Database`] and go through
//! [`Database::connection`]; no second connection is ever opened for writes.

use std::path::Path;
use std::time::Duration;

use tracing::{debug, info};
use zapdesk_core::ZapdeskError;

use crate::migrations;

pub struct Database {
    conn: tokio_rusqlite::Connection,
}

impl Database {
    /// Opens (creating if needed) the database at `path` in WAL mode and
    /// applies migrations.
    pub async fn open(path: &str) -> Result<Self, ZapdeskError> {
        Self::open_with(path, true).await
    }

    pub async fn open_with(path: &str, wal_mode: bool) -> Result<Self, ZapdeskError> {
        if let Some(parent) = Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| ZapdeskError::Storage {
                    source: Box::new(e),
                })?;
            }
        }

        let conn = tokio_rusqlite::Connection::open(path)
            .await
            .map_err(|e| map_tr_err(tokio_rusqlite::Error::Error(e)))?;

        let journal_mode = if wal_mode { "WAL" } else { "DELETE" };
        let mode = conn
            .call(move |conn| -> Result<String, rusqlite::Error> {
                let mode = conn.pragma_update_and_check(None, "journal_mode", journal_mode, |row| {
                    row.get::<_, String>(0)
                })?;
                conn.pragma_update(None, "foreign_keys", true)?;
                conn.pragma_update(None, "synchronous", "NORMAL")?;
                conn.busy_timeout(Duration::from_secs(5))?;
                Ok(mode)
            })
            .await
            .map_err(map_tr_err)?;
        debug!(journal_mode = %mode, "pragmas applied");

        let applied = conn
            .call(migrations::run_migrations)
            .await
            .map_err(map_tr_err)?;
        info!(path, applied, "database ready");

        Ok(Self { conn })
    }

    pub fn connection(&self) -> &tokio_rusqlite::Connection {
        &self.conn
    }

    /// Checkpoints the WAL and closes the background thread.
    pub async fn close(self) -> Result<(), ZapdeskError> {
        checkpoint(&self.conn).await?;
        self.conn.close().await.map_err(map_tr_err)
    }
}

pub(crate) async fn checkpoint(conn: &tokio_rusqlite::Connection) -> Result<(), ZapdeskError> {
    conn.call(|conn| -> Result<(), rusqlite::Error> {
        conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);")
    })
    .await
    .map_err(map_tr_err)
}

/// Converts a `tokio_rusqlite` error into [`ZapdeskError::Storage`].
pub fn map_tr_err<E>(e: tokio_rusqlite::Error<E>) -> ZapdeskError
where
    E: std::error::Error + Send + Sync + 'static,
{
    match e {
        tokio_rusqlite::Error::Error(inner) => ZapdeskError::Storage {
            source: Box::new(inner),
        },
        other => ZapdeskError::Storage {
            source: other.to_string().into(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn open_creates_parent_dirs_and_schema() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested/deeper/zapdesk.db");
        let db = Database::open(path.to_str().unwrap()).await.unwrap();

        let tables: Vec<String> = db
            .connection()
            .call(|conn| -> Result<Vec<String>, rusqlite::Error> {
                let mut stmt = conn.prepare(
                    "SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name",
                )?;
                let rows = stmt.query_map([], |row| row.get(0))?;
                rows.collect()
            })
            .await
            .unwrap();

        for expected in ["appointments", "chatbot_states", "contacts", "messages", "tickets"] {
            assert!(tables.iter().any(|t| t == expected), "missing table {expected}");
        }
        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn reopening_is_idempotent() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("twice.db");
        let db = Database::open(path.to_str().unwrap()).await.unwrap();
        db.close().await.unwrap();
        let db = Database::open(path.to_str().unwrap()).await.unwrap();
        db.close().await.unwrap();
    }
}
