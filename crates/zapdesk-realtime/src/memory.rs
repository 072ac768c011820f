// SPDX-FileCopyrightText: 2026 Zapdesk Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Room membership bookkeeping and heap pressure handling.
//!
//! Rooms map to socket ids and sockets map back to rooms, so a disconnect can
//! be cleaned up without scanning every room.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use zapdesk_config::model::MemoryConfig;
use zapdesk_core::{HeapProbe, SharedClock};

use crate::pool::SocketId;

#[derive(Debug)]
struct Room {
    members: HashSet<SocketId>,
    last_activity: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct Rooms {
    rooms: HashMap<String, Room>,
    sockets: HashMap<SocketId, HashSet<String>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct SweepReport {
    pub rooms_removed: usize,
    pub orphans_removed: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct PressureReport {
    pub heap_used: Option<u64>,
    pub over_threshold: bool,
    pub sweep: SweepReport,
    /// Bytes returned to the OS by a forced reclaim.
    pub reclaimed: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RoomStats {
    pub rooms: usize,
    pub sockets: usize,
    pub memberships: usize,
}

pub struct MemoryManager {
    config: MemoryConfig,
    clock: SharedClock,
    heap: Arc<dyn HeapProbe>,
    state: Mutex<Rooms>,
    last_reclaim: Mutex<Option<DateTime<Utc>>>,
}

impl MemoryManager {
    pub fn new(config: MemoryConfig, clock: SharedClock, heap: Arc<dyn HeapProbe>) -> Self {
        Self {
            config,
            clock,
            heap,
            state: Mutex::new(Rooms::default()),
            last_reclaim: Mutex::new(None),
        }
    }

    pub fn join(&self, socket_id: &str, room: &str) {
        let now = self.clock.now();
        let mut state = self.state.lock();
        let entry = state.rooms.entry(room.to_string()).or_insert_with(|| Room {
            members: HashSet::new(),
            last_activity: now,
        });
        entry.members.insert(socket_id.to_string());
        entry.last_activity = now;
        state
            .sockets
            .entry(socket_id.to_string())
            .or_default()
            .insert(room.to_string());
    }

    /// Removes one membership. Empty rooms stay until the sweep.
    pub fn leave(&self, socket_id: &str, room: &str) -> bool {
        let now = self.clock.now();
        let mut state = self.state.lock();
        let removed = match state.rooms.get_mut(room) {
            Some(r) => {
                r.last_activity = now;
                r.members.remove(socket_id)
            }
            None => false,
        };
        if let Some(rooms) = state.sockets.get_mut(socket_id) {
            rooms.remove(room);
            if rooms.is_empty() {
                state.sockets.remove(socket_id);
            }
        }
        removed
    }

    pub fn touch_room(&self, room: &str) {
        let now = self.clock.now();
        if let Some(r) = self.state.lock().rooms.get_mut(room) {
            r.last_activity = now;
        }
    }

    pub fn members(&self, room: &str) -> Vec<SocketId> {
        self.state
            .lock()
            .rooms
            .get(room)
            .map(|r| r.members.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn rooms_of(&self, socket_id: &str) -> Vec<String> {
        self.state
            .lock()
            .sockets
            .get(socket_id)
            .map(|r| r.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Drops a socket from every room it joined and prunes rooms left
    /// empty. Returns the number of rooms pruned.
    pub fn cleanup_socket(&self, socket_id: &str) -> usize {
        let mut state = self.state.lock();
        let Some(rooms) = state.sockets.remove(socket_id) else {
            return 0;
        };
        let mut pruned = 0;
        for room in rooms {
            let empty = match state.rooms.get_mut(&room) {
                Some(r) => {
                    r.members.remove(socket_id);
                    r.members.is_empty()
                }
                None => false,
            };
            if empty {
                state.rooms.remove(&room);
                pruned += 1;
            }
        }
        pruned
    }

    /// Deletes rooms that are empty and idle, and memberships of sockets for
    /// which `is_live` returns false.
    pub fn sweep(&self, is_live: impl Fn(&str) -> bool) -> SweepReport {
        let idle_cutoff = self.clock.now() - chrono::Duration::seconds(self.config.room_idle_secs as i64);
        let mut state = self.state.lock();
        let mut report = SweepReport::default();

        let orphans: Vec<SocketId> = state
            .sockets
            .keys()
            .filter(|id| !is_live(id))
            .cloned()
            .collect();
        for id in orphans {
            if let Some(rooms) = state.sockets.remove(&id) {
                for room in rooms {
                    if let Some(r) = state.rooms.get_mut(&room) {
                        r.members.remove(&id);
                    }
                }
                report.orphans_removed += 1;
            }
        }

        let before = state.rooms.len();
        state
            .rooms
            .retain(|_, r| !(r.members.is_empty() && r.last_activity < idle_cutoff));
        report.rooms_removed = before - state.rooms.len();

        if report != SweepReport::default() {
            debug!(
                rooms_removed = report.rooms_removed,
                orphans_removed = report.orphans_removed,
                "room sweep"
            );
        }
        report
    }

    pub fn stats(&self) -> RoomStats {
        let state = self.state.lock();
        RoomStats {
            rooms: state.rooms.len(),
            sockets: state.sockets.len(),
            memberships: state.rooms.values().map(|r| r.members.len()).sum(),
        }
    }

    /// Samples the heap. Over the threshold, sweeps rooms and forces a
    /// reclaim when the cooldown has passed.
    pub fn check_pressure(&self, is_live: impl Fn(&str) -> bool) -> PressureReport {
        let heap_used = self.heap.heap_used();
        if let Some(bytes) = heap_used {
            zapdesk_prometheus::set_heap_used(bytes);
        }
        let threshold = self.config.heap_threshold_mb * 1024 * 1024;
        let over_threshold = heap_used.is_some_and(|b| b > threshold);
        if !over_threshold {
            return PressureReport {
                heap_used,
                ..PressureReport::default()
            };
        }

        warn!(heap_used, threshold, "heap above threshold, cleaning up");
        let sweep = self.sweep(is_live);

        let now = self.clock.now();
        let cooldown = chrono::Duration::seconds(self.config.reclaim_cooldown_secs as i64);
        let reclaimed = {
            let mut last = self.last_reclaim.lock();
            if last.is_some_and(|t| now - t < cooldown) {
                None
            } else {
                let freed = self.heap.reclaim();
                if freed.is_some() {
                    *last = Some(now);
                }
                freed
            }
        };
        if let Some(freed) = reclaimed {
            info!(freed_bytes = freed, "forced heap reclaim");
        }

        PressureReport {
            heap_used,
            over_threshold,
            sweep,
            reclaimed,
        }
    }

    /// Spawns the room sweep and the heap monitor.
    pub fn spawn_tasks<F>(self: &Arc<Self>, is_live: F, cancel: CancellationToken) -> JoinHandle<()>
    where
        F: Fn(&str) -> bool + Send + Sync + 'static,
    {
        let manager = Arc::clone(self);
        let sweep_every = Duration::from_secs(self.config.sweep_interval_secs.max(1));
        let monitor_every = Duration::from_secs(self.config.monitor_interval_secs.max(1));
        tokio::spawn(async move {
            let mut sweep = tokio::time::interval(sweep_every);
            let mut monitor = tokio::time::interval(monitor_every);
            sweep.tick().await;
            monitor.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = sweep.tick() => {
                        manager.sweep(&is_live);
                    }
                    _ = monitor.tick() => {
                        manager.check_pressure(&is_live);
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tracing_test::traced_test;
    use zapdesk_core::ManualClock;

    struct FakeHeap {
        used: u64,
        reclaims: AtomicU32,
    }

    impl HeapProbe for FakeHeap {
        fn heap_used(&self) -> Option<u64> {
            Some(self.used)
        }

        fn reclaim(&self) -> Option<u64> {
            self.reclaims.fetch_add(1, Ordering::SeqCst);
            Some(4096)
        }
    }

    fn manager(heap_used: u64) -> (MemoryManager, Arc<ManualClock>, Arc<FakeHeap>) {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let heap = Arc::new(FakeHeap {
            used: heap_used,
            reclaims: AtomicU32::new(0),
        });
        (
            MemoryManager::new(MemoryConfig::default(), clock.clone(), heap.clone()),
            clock,
            heap,
        )
    }

    #[test]
    fn cleanup_socket_prunes_empty_rooms() {
        let (m, _, _) = manager(0);
        m.join("a", "ticket-1");
        m.join("a", "tenant-1-open");
        m.join("b", "tenant-1-open");

        assert_eq!(m.cleanup_socket("a"), 1);
        assert!(m.members("ticket-1").is_empty());
        assert_eq!(m.members("tenant-1-open"), vec!["b".to_string()]);
        assert!(m.rooms_of("a").is_empty());
        assert_eq!(m.cleanup_socket("a"), 0);
    }

    #[test]
    fn sweep_removes_idle_empty_rooms_and_orphans() {
        let (m, clock, _) = manager(0);
        m.join("a", "ticket-1");
        m.leave("a", "ticket-1");
        m.join("ghost", "tenant-1-open");
        m.join("live", "tenant-1-open");

        let report = m.sweep(|id| id != "ghost");
        assert_eq!(report.orphans_removed, 1);
        assert_eq!(report.rooms_removed, 0, "ticket-1 is empty but not idle yet");

        clock.advance(chrono::Duration::seconds(601));
        let report = m.sweep(|_| true);
        assert_eq!(report.rooms_removed, 1);
        assert_eq!(m.stats().rooms, 1);
        assert_eq!(m.members("tenant-1-open"), vec!["live".to_string()]);
    }

    #[test]
    fn pressure_below_threshold_is_noop() {
        let (m, _, heap) = manager(10 * 1024 * 1024);
        let report = m.check_pressure(|_| true);
        assert!(!report.over_threshold);
        assert_eq!(heap.reclaims.load(Ordering::SeqCst), 0);
    }

    #[test]
    #[traced_test]
    fn pressure_is_logged() {
        let (m, _, _) = manager(600 * 1024 * 1024);
        assert!(m.check_pressure(|_| true).over_threshold);
        assert!(logs_contain("heap above threshold"));
        assert!(logs_contain("forced heap reclaim"));
    }

    #[test]
    fn reclaim_respects_cooldown() {
        let (m, clock, heap) = manager(600 * 1024 * 1024);
        assert_eq!(m.check_pressure(|_| true).reclaimed, Some(4096));
        assert_eq!(m.check_pressure(|_| true).reclaimed, None);

        clock.advance(chrono::Duration::seconds(31));
        assert!(m.check_pressure(|_| true).reclaimed.is_some());
        assert_eq!(heap.reclaims.load(Ordering::SeqCst), 2);
    }
}
