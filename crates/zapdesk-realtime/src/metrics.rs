// SPDX-FileCopyrightText: 2026 Zapdesk Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Rolling latency and error budgets for the realtime layer.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;

/// Latency samples kept for percentiles.
const WINDOW: usize = 1000;

#[derive(Debug, Default)]
pub struct PerformanceMetrics {
    samples: Mutex<VecDeque<Duration>>,
    operations: AtomicU64,
    errors: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub operations: u64,
    pub errors: u64,
    pub error_rate: f64,
    pub avg_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
}

impl PerformanceMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_latency(&self, elapsed: Duration) {
        self.operations.fetch_add(1, Ordering::Relaxed);
        let mut samples = self.samples.lock();
        if samples.len() == WINDOW {
            samples.pop_front();
        }
        samples.push_back(elapsed);
    }

    pub fn record_error(&self) {
        self.operations.fetch_add(1, Ordering::Relaxed);
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let mut sorted: Vec<Duration> = self.samples.lock().iter().copied().collect();
        sorted.sort_unstable();

        let operations = self.operations.load(Ordering::Relaxed);
        let errors = self.errors.load(Ordering::Relaxed);
        let ms = |d: Duration| d.as_secs_f64() * 1000.0;
        let pct = |p: f64| {
            if sorted.is_empty() {
                return 0.0;
            }
            let idx = ((sorted.len() as f64 * p).ceil() as usize).clamp(1, sorted.len()) - 1;
            ms(sorted[idx])
        };
        let avg_ms = if sorted.is_empty() {
            0.0
        } else {
            sorted.iter().map(|d| ms(*d)).sum::<f64>() / sorted.len() as f64
        };

        MetricsSnapshot {
            operations,
            errors,
            error_rate: if operations == 0 {
                0.0
            } else {
                errors as f64 / operations as f64
            },
            avg_ms,
            p95_ms: pct(0.95),
            p99_ms: pct(0.99),
        }
    }

    /// True when the error rate is at or under `max_error_rate` and p95
    /// latency is at or under `max_p95`.
    pub fn within_budget(&self, max_error_rate: f64, max_p95: Duration) -> bool {
        let snap = self.snapshot();
        snap.error_rate <= max_error_rate && snap.p95_ms <= max_p95.as_secs_f64() * 1000.0
    }

    pub fn reset(&self) {
        self.samples.lock().clear();
        self.operations.store(0, Ordering::Relaxed);
        self.errors.store(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percentiles_over_window() {
        let m = PerformanceMetrics::new();
        for i in 1..=100 {
            m.record_latency(Duration::from_millis(i));
        }
        let snap = m.snapshot();
        assert_eq!(snap.operations, 100);
        assert!((snap.p95_ms - 95.0).abs() < 1e-6);
        assert!((snap.p99_ms - 99.0).abs() < 1e-6);
        assert!((snap.avg_ms - 50.5).abs() < 1e-6);
    }

    #[test]
    fn error_budget() {
        let m = PerformanceMetrics::new();
        m.record_latency(Duration::from_millis(5));
        m.record_error();
        assert!((m.snapshot().error_rate - 0.5).abs() < 1e-9);
        assert!(!m.within_budget(0.1, Duration::from_millis(100)));
        m.reset();
        assert!(m.within_budget(0.1, Duration::from_millis(100)));
    }

    #[test]
    fn window_is_bounded() {
        let m = PerformanceMetrics::new();
        for _ in 0..(WINDOW + 10) {
            m.record_latency(Duration::from_millis(1));
        }
        assert_eq!(m.samples.lock().len(), WINDOW);
    }
}
