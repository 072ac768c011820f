// SPDX-FileCopyrightText: 2026 Zapdesk Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Re-send suppression for automatic notices.
//!
//! A bounded map of `(kind, id)` to the time the notice was last sent. Entries
//! older than the window are ignored and evicted; when the map is full the
//! oldest entry goes first.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use strum::Display;

use zapdesk_core::SharedClock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "snake_case")]
pub enum NoticeKind {
    OutOfHours,
    Greeting,
    QueueMenu,
}

type Key = (NoticeKind, i64);

#[derive(Default)]
struct Entries {
    sent: HashMap<Key, DateTime<Utc>>,
    order: VecDeque<(Key, DateTime<Utc>)>,
}

pub struct NoticeCache {
    clock: SharedClock,
    window: Duration,
    capacity: usize,
    entries: Mutex<Entries>,
}

impl NoticeCache {
    pub fn new(clock: SharedClock, window_secs: u64, capacity: usize) -> Self {
        Self {
            clock,
            window: Duration::seconds(window_secs as i64),
            capacity: capacity.max(1),
            entries: Mutex::new(Entries::default()),
        }
    }

    /// Records the notice and returns true unless it was sent within the window.
    pub fn should_send(&self, kind: NoticeKind, id: i64) -> bool {
        let now = self.clock.now();
        let mut entries = self.entries.lock();
        self.evict(&mut entries, now);

        let key = (kind, id);
        if entries
            .sent
            .get(&key)
            .is_some_and(|at| now - *at < self.window)
        {
            return false;
        }

        while entries.sent.len() >= self.capacity {
            let Some((old, at)) = entries.order.pop_front() else {
                break;
            };
            if entries.sent.get(&old) == Some(&at) {
                entries.sent.remove(&old);
            }
        }
        entries.sent.insert(key, now);
        entries.order.push_back((key, now));
        true
    }

    /// Allows the notice to be sent again immediately.
    pub fn forget(&self, kind: NoticeKind, id: i64) {
        let key = (kind, id);
        let mut entries = self.entries.lock();
        entries.sent.remove(&key);
        entries.order.retain(|(k, _)| *k != key);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().sent.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn evict(&self, entries: &mut Entries, now: DateTime<Utc>) {
        while let Some((key, at)) = entries.order.front().copied() {
            let stale = entries.sent.get(&key) != Some(&at);
            if !stale && now - at < self.window {
                break;
            }
            entries.order.pop_front();
            if !stale {
                entries.sent.remove(&key);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use zapdesk_core::ManualClock;

    fn cache(capacity: usize) -> (NoticeCache, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        (NoticeCache::new(clock.clone(), 1800, capacity), clock)
    }

    #[test]
    fn suppressed_within_window() {
        let (c, clock) = cache(10);
        assert!(c.should_send(NoticeKind::Greeting, 7));
        assert!(!c.should_send(NoticeKind::Greeting, 7));
        assert!(c.should_send(NoticeKind::OutOfHours, 7), "kinds are independent");

        clock.advance(Duration::seconds(1801));
        assert!(c.should_send(NoticeKind::Greeting, 7));
    }

    #[test]
    fn capacity_evicts_oldest() {
        let (c, _) = cache(2);
        assert!(c.should_send(NoticeKind::Greeting, 1));
        assert!(c.should_send(NoticeKind::Greeting, 2));
        assert!(c.should_send(NoticeKind::Greeting, 3));
        assert_eq!(c.len(), 2);
        assert!(c.should_send(NoticeKind::Greeting, 1), "1 was evicted");
        assert!(!c.should_send(NoticeKind::Greeting, 3));
    }

    #[test]
    fn forget_allows_resend() {
        let (c, _) = cache(10);
        assert!(c.should_send(NoticeKind::QueueMenu, 9));
        c.forget(NoticeKind::QueueMenu, 9);
        assert!(c.should_send(NoticeKind::QueueMenu, 9));
    }

    #[test]
    fn forgotten_keys_do_not_count_as_oldest() {
        let (c, _) = cache(2);
        assert!(c.should_send(NoticeKind::Greeting, 2));
        c.forget(NoticeKind::Greeting, 2);
        assert!(c.should_send(NoticeKind::Greeting, 3));
        assert!(c.should_send(NoticeKind::Greeting, 2));

        // 3 is now the oldest live entry
        assert!(c.should_send(NoticeKind::Greeting, 4));
        assert!(!c.should_send(NoticeKind::Greeting, 2));
        assert!(c.should_send(NoticeKind::Greeting, 3));
    }

    #[test]
    fn expired_entries_are_evicted() {
        let (c, clock) = cache(10);
        c.should_send(NoticeKind::Greeting, 1);
        c.should_send(NoticeKind::Greeting, 2);
        clock.advance(Duration::seconds(1801));
        c.should_send(NoticeKind::Greeting, 3);
        assert_eq!(c.len(), 1);
    }
}
