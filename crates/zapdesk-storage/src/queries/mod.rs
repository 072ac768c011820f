// SPDX-FileCopyrightText: 2026 Zapdesk Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Typed query modules, one per aggregate.

pub mod catalog;
pub mod channels;
pub mod chatbot;
pub mod contacts;
pub mod messages;
pub mod scheduling;
pub mod tickets;
pub mod tracking;

use std::str::FromStr;

/// Reads a text column into a `strum`-style enum.
pub(crate) fn get_enum<T>(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let text: String = row.get(idx)?;
    T::from_str(&text).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}
