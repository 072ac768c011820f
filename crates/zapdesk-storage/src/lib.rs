// SPDX-FileCopyrightText: 2026 Zapdesk Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! SQLite persistence for Zapdesk.
//!
//! WAL-mode SQLite with embedded refinery migrations, a single writer thread
//! through `tokio-rusqlite`, and typed query modules for channels, contacts,
//! tickets, messages, chatbot state and appointments.

pub mod adapter;
pub mod database;
mod migrations;
pub mod queries;

pub use adapter::SqliteStorage;
pub use database::Database;
