// SPDX-FileCopyrightText: 2026 Zapdesk Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

/// Fast counter store kept beside the database (unread counts and similar).
pub trait KeyValueStore: Send + Sync + 'static {
    fn get(&self, key: &str) -> Option<i64>;

    fn set(&self, key: &str, value: i64);

    /// Adds one and returns the new value; a missing key starts at zero.
    fn incr(&self, key: &str) -> i64;
}

/// Key under which a contact's unread counter lives.
pub fn unread_key(contact_id: i64) -> String {
    format!("contact:{contact_id}:unreads")
}
