// SPDX-FileCopyrightText: 2026 Zapdesk Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Connection pool for UI sockets.
//!
//! Keeps the primary connection map plus two secondary indexes (by tenant and
//! by user) behind one lock, so every mutation updates all three together.
//! [`ConnectionPool::validate_integrity`] recomputes the indexes from the
//! primary map and reports drift.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, error};

use zapdesk_config::model::PoolConfig;
use zapdesk_core::types::{TenantId, UserId};
use zapdesk_core::{SharedClock, ZapdeskError};

pub type SocketId = String;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionInfo {
    pub socket_id: SocketId,
    pub tenant_id: TenantId,
    pub user_id: UserId,
    pub connected_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct PoolState {
    connections: HashMap<SocketId, ConnectionInfo>,
    by_tenant: HashMap<TenantId, HashSet<SocketId>>,
    by_user: HashMap<UserId, HashSet<SocketId>>,
    peak: usize,
    accepted: u64,
    rejected: u64,
}

impl PoolState {
    fn tenant_count(&self, tenant_id: TenantId) -> usize {
        self.by_tenant.get(&tenant_id).map_or(0, HashSet::len)
    }

    fn user_count(&self, user_id: UserId) -> usize {
        self.by_user.get(&user_id).map_or(0, HashSet::len)
    }

    fn unindex(&mut self, info: &ConnectionInfo) {
        if let Some(set) = self.by_tenant.get_mut(&info.tenant_id) {
            set.remove(&info.socket_id);
            if set.is_empty() {
                self.by_tenant.remove(&info.tenant_id);
            }
        }
        if let Some(set) = self.by_user.get_mut(&info.user_id) {
            set.remove(&info.socket_id);
            if set.is_empty() {
                self.by_user.remove(&info.user_id);
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PoolMetrics {
    pub total_connections: usize,
    pub tenants: usize,
    pub users: usize,
    pub peak_connections: usize,
    pub accepted: u64,
    pub rejected: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TenantMetrics {
    pub tenant_id: TenantId,
    pub connections: usize,
    pub users: usize,
}

/// Utilisation of each ceiling, as fractions in `0.0..=1.0`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CapacityUsage {
    pub global: f64,
    /// Fullest tenant, if any tenant is connected.
    pub busiest_tenant: Option<(TenantId, f64)>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct IntegrityReport {
    pub valid: bool,
    pub issues: Vec<String>,
}

pub struct ConnectionPool {
    config: PoolConfig,
    clock: SharedClock,
    state: Mutex<PoolState>,
}

impl ConnectionPool {
    pub fn new(config: PoolConfig, clock: SharedClock) -> Self {
        Self {
            config,
            clock,
            state: Mutex::new(PoolState::default()),
        }
    }

    /// True when a new socket for `(tenant, user)` fits under every ceiling.
    pub fn can_connect(&self, tenant_id: TenantId, user_id: UserId) -> bool {
        let state = self.state.lock();
        self.fits(&state, tenant_id, user_id)
    }

    fn fits(&self, state: &PoolState, tenant_id: TenantId, user_id: UserId) -> bool {
        state.connections.len() < self.config.max_connections
            && state.tenant_count(tenant_id) < self.config.max_per_tenant
            && state.user_count(user_id) < self.config.max_per_user
    }

    /// Registers a socket. The limit check and the insert happen under one lock.
    pub fn add_connection(
        &self,
        socket_id: impl Into<SocketId>,
        tenant_id: TenantId,
        user_id: UserId,
    ) -> Result<ConnectionInfo, ZapdeskError> {
        let socket_id = socket_id.into();
        let now = self.clock.now();
        let mut state = self.state.lock();

        if state.connections.contains_key(&socket_id) {
            return Err(ZapdeskError::Conflict(format!(
                "socket {socket_id} is already registered"
            )));
        }
        if !self.fits(&state, tenant_id, user_id) {
            state.rejected += 1;
            return Err(ZapdeskError::Conflict(format!(
                "connection limit reached for tenant {tenant_id} user {user_id}"
            )));
        }

        let info = ConnectionInfo {
            socket_id: socket_id.clone(),
            tenant_id,
            user_id,
            connected_at: now,
            last_activity: now,
        };
        state.connections.insert(socket_id.clone(), info.clone());
        state.by_tenant.entry(tenant_id).or_default().insert(socket_id.clone());
        state.by_user.entry(user_id).or_default().insert(socket_id);
        state.accepted += 1;
        state.peak = state.peak.max(state.connections.len());
        debug!(tenant_id, user_id, total = state.connections.len(), "socket connected");
        Ok(info)
    }

    pub fn remove_connection(&self, socket_id: &str) -> Option<ConnectionInfo> {
        let mut state = self.state.lock();
        let info = state.connections.remove(socket_id)?;
        state.unindex(&info);
        Some(info)
    }

    /// Records activity on a socket. Returns false for unknown sockets.
    pub fn touch(&self, socket_id: &str) -> bool {
        let now = self.clock.now();
        match self.state.lock().connections.get_mut(socket_id) {
            Some(info) => {
                info.last_activity = now;
                true
            }
            None => false,
        }
    }

    pub fn get(&self, socket_id: &str) -> Option<ConnectionInfo> {
        self.state.lock().connections.get(socket_id).cloned()
    }

    pub fn contains(&self, socket_id: &str) -> bool {
        self.state.lock().connections.contains_key(socket_id)
    }

    pub fn tenant_sockets(&self, tenant_id: TenantId) -> Vec<SocketId> {
        self.state
            .lock()
            .by_tenant
            .get(&tenant_id)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn user_sockets(&self, user_id: UserId) -> Vec<SocketId> {
        self.state
            .lock()
            .by_user
            .get(&user_id)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.state.lock().connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Removes every connection idle for longer than the inactivity timeout
    /// and returns them so the caller can close the sockets.
    pub fn take_inactive(&self) -> Vec<ConnectionInfo> {
        let cutoff = self.clock.now() - Duration::seconds(self.config.inactivity_timeout_secs as i64);
        let mut state = self.state.lock();
        let stale: Vec<SocketId> = state
            .connections
            .values()
            .filter(|c| c.last_activity < cutoff)
            .map(|c| c.socket_id.clone())
            .collect();

        let mut removed = Vec::with_capacity(stale.len());
        for id in stale {
            if let Some(info) = state.connections.remove(&id) {
                state.unindex(&info);
                removed.push(info);
            }
        }
        removed
    }

    pub fn metrics(&self) -> PoolMetrics {
        let state = self.state.lock();
        PoolMetrics {
            total_connections: state.connections.len(),
            tenants: state.by_tenant.len(),
            users: state.by_user.len(),
            peak_connections: state.peak,
            accepted: state.accepted,
            rejected: state.rejected,
        }
    }

    pub fn tenant_metrics(&self, tenant_id: TenantId) -> TenantMetrics {
        let state = self.state.lock();
        let sockets = state.by_tenant.get(&tenant_id);
        let users: HashSet<UserId> = sockets
            .into_iter()
            .flatten()
            .filter_map(|id| state.connections.get(id).map(|c| c.user_id))
            .collect();
        TenantMetrics {
            tenant_id,
            connections: sockets.map_or(0, HashSet::len),
            users: users.len(),
        }
    }

    pub fn capacity_usage(&self) -> CapacityUsage {
        let state = self.state.lock();
        let ratio = |n: usize, max: usize| if max == 0 { 1.0 } else { n as f64 / max as f64 };
        CapacityUsage {
            global: ratio(state.connections.len(), self.config.max_connections),
            busiest_tenant: state
                .by_tenant
                .iter()
                .max_by_key(|(_, s)| s.len())
                .map(|(t, s)| (*t, ratio(s.len(), self.config.max_per_tenant))),
        }
    }

    /// Recomputes both indexes from the primary map and lists every mismatch.
    pub fn validate_integrity(&self) -> IntegrityReport {
        let state = self.state.lock();
        let mut issues = Vec::new();

        for (id, info) in &state.connections {
            if !state.by_tenant.get(&info.tenant_id).is_some_and(|s| s.contains(id)) {
                issues.push(format!("socket {id} missing from tenant {} index", info.tenant_id));
            }
            if !state.by_user.get(&info.user_id).is_some_and(|s| s.contains(id)) {
                issues.push(format!("socket {id} missing from user {} index", info.user_id));
            }
        }

        let tenant_total: usize = state.by_tenant.values().map(HashSet::len).sum();
        let user_total: usize = state.by_user.values().map(HashSet::len).sum();
        if tenant_total != state.connections.len() {
            issues.push(format!(
                "tenant index holds {tenant_total} sockets, pool holds {}",
                state.connections.len()
            ));
        }
        if user_total != state.connections.len() {
            issues.push(format!(
                "user index holds {user_total} sockets, pool holds {}",
                state.connections.len()
            ));
        }

        if !issues.is_empty() {
            error!(issues = issues.len(), "connection pool index drift");
        }
        IntegrityReport {
            valid: issues.is_empty(),
            issues,
        }
    }

    #[cfg(test)]
    fn corrupt_tenant_index(&self, tenant_id: TenantId, socket_id: &str) {
        self.state
            .lock()
            .by_tenant
            .entry(tenant_id)
            .or_default()
            .insert(socket_id.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use zapdesk_core::ManualClock;

    fn pool() -> (ConnectionPool, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        (ConnectionPool::new(PoolConfig::default(), clock.clone()), clock)
    }

    #[test]
    fn fourth_socket_for_a_user_is_rejected() {
        let (pool, _) = pool();
        for i in 0..3 {
            assert!(pool.can_connect(1, 10));
            pool.add_connection(format!("s{i}"), 1, 10).unwrap();
        }
        assert!(!pool.can_connect(1, 10));
        assert!(pool.add_connection("s3", 1, 10).is_err());
        assert!(pool.can_connect(1, 11));
        assert_eq!(pool.metrics().rejected, 1);
    }

    #[test]
    fn tenant_ceiling() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let config = PoolConfig {
            max_per_tenant: 2,
            ..PoolConfig::default()
        };
        let pool = ConnectionPool::new(config, clock);
        pool.add_connection("a", 1, 1).unwrap();
        pool.add_connection("b", 1, 2).unwrap();
        assert!(!pool.can_connect(1, 3));
        assert!(pool.can_connect(2, 3));
    }

    #[test]
    fn indexes_follow_mutations() {
        let (pool, _) = pool();
        pool.add_connection("a", 1, 10).unwrap();
        pool.add_connection("b", 1, 11).unwrap();
        pool.add_connection("c", 2, 12).unwrap();
        assert_eq!(pool.tenant_sockets(1).len(), 2);
        assert_eq!(pool.user_sockets(12), vec!["c".to_string()]);

        pool.remove_connection("a").unwrap();
        assert_eq!(pool.tenant_sockets(1), vec!["b".to_string()]);
        assert!(pool.user_sockets(10).is_empty());
        assert!(pool.validate_integrity().valid);

        let tm = pool.tenant_metrics(1);
        assert_eq!((tm.connections, tm.users), (1, 1));
    }

    #[test]
    fn duplicate_socket_id_is_conflict() {
        let (pool, _) = pool();
        pool.add_connection("a", 1, 10).unwrap();
        assert!(matches!(
            pool.add_connection("a", 1, 10),
            Err(ZapdeskError::Conflict(_))
        ));
    }

    #[test]
    fn idle_sockets_are_swept() {
        let (pool, clock) = pool();
        pool.add_connection("old", 1, 10).unwrap();
        clock.advance(Duration::seconds(200));
        pool.add_connection("fresh", 1, 11).unwrap();
        clock.advance(Duration::seconds(150));

        let removed = pool.take_inactive();
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].socket_id, "old");
        assert!(pool.contains("fresh"));
        assert!(pool.validate_integrity().valid);
    }

    #[test]
    fn touch_keeps_socket_alive() {
        let (pool, clock) = pool();
        pool.add_connection("a", 1, 10).unwrap();
        clock.advance(Duration::seconds(290));
        assert!(pool.touch("a"));
        clock.advance(Duration::seconds(20));
        assert!(pool.take_inactive().is_empty());
        assert!(!pool.touch("missing"));
    }

    #[test]
    fn drift_is_reported() {
        let (pool, _) = pool();
        pool.add_connection("a", 1, 10).unwrap();
        pool.corrupt_tenant_index(1, "ghost");
        let report = pool.validate_integrity();
        assert!(!report.valid);
        assert_eq!(report.issues.len(), 1);
    }

    #[test]
    fn capacity_usage_ratios() {
        let (pool, _) = pool();
        pool.add_connection("a", 7, 1).unwrap();
        let usage = pool.capacity_usage();
        assert!((usage.global - 1.0 / 10_000.0).abs() < f64::EPSILON);
        assert_eq!(usage.busiest_tenant.map(|(t, _)| t), Some(7));
    }
}
