// SPDX-FileCopyrightText: 2026 Zapdesk Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use dashmap::DashMap;

use zapdesk_core::KeyValueStore;

/// Process-local counter store.
#[derive(Debug, Default)]
pub struct InMemoryKv {
    values: DashMap<String, i64>,
}

impl InMemoryKv {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for InMemoryKv {
    fn get(&self, key: &str) -> Option<i64> {
        self.values.get(key).map(|v| *v)
    }

    fn set(&self, key: &str, value: i64) {
        self.values.insert(key.to_string(), value);
    }

    fn incr(&self, key: &str) -> i64 {
        let mut entry = self.values.entry(key.to_string()).or_insert(0);
        *entry += 1;
        *entry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use zapdesk_core::traits::kv::unread_key;

    #[test]
    fn incr_starts_at_zero_and_set_resets() {
        let kv = InMemoryKv::new();
        let key = unread_key(4);
        assert_eq!(kv.get(&key), None);
        assert_eq!(kv.incr(&key), 1);
        assert_eq!(kv.incr(&key), 2);
        kv.set(&key, 0);
        assert_eq!(kv.get(&key), Some(0));
    }
}
