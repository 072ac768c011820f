// SPDX-FileCopyrightText: 2026 Zapdesk Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! jemalloc-backed heap probe for the realtime memory manager.

use std::sync::Arc;

use zapdesk_core::HeapProbe;

/// Reads jemalloc's `stats.allocated` and turns on background purging
/// when asked to reclaim.
#[cfg(not(target_env = "msvc"))]
#[derive(Debug, Default, Clone, Copy)]
pub struct JemallocProbe;

#[cfg(not(target_env = "msvc"))]
impl HeapProbe for JemallocProbe {
    fn heap_used(&self) -> Option<u64> {
        // stats are cached until the epoch advances
        tikv_jemalloc_ctl::epoch::advance().ok()?;
        tikv_jemalloc_ctl::stats::allocated::read()
            .ok()
            .map(|bytes| bytes as u64)
    }

    fn reclaim(&self) -> Option<u64> {
        tikv_jemalloc_ctl::epoch::advance().ok()?;
        let before = tikv_jemalloc_ctl::stats::resident::read().ok()?;

        if let Err(e) = tikv_jemalloc_ctl::background_thread::write(true) {
            tracing::debug!(error = %e, "jemalloc background purge unavailable");
        }

        tikv_jemalloc_ctl::epoch::advance().ok()?;
        let after = tikv_jemalloc_ctl::stats::resident::read().ok()?;
        Some(before.saturating_sub(after) as u64)
    }
}

/// The probe for this build.
pub fn probe() -> Arc<dyn HeapProbe> {
    #[cfg(not(target_env = "msvc"))]
    {
        Arc::new(JemallocProbe)
    }
    #[cfg(target_env = "msvc")]
    {
        Arc::new(zapdesk_core::traits::NoHeapProbe)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[cfg(not(target_env = "msvc"))]
    fn jemalloc_reports_heap_usage() {
        let buf = vec![0u8; 4 * 1024 * 1024];
        let used = probe().heap_used().unwrap();
        assert!(used >= buf.len() as u64);
        drop(buf);
    }

    #[test]
    #[cfg(not(target_env = "msvc"))]
    fn reclaim_reports_a_byte_count() {
        assert!(probe().reclaim().is_some());
    }
}
