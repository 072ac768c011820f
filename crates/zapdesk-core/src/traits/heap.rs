// SPDX-FileCopyrightText: 2026 Zapdesk Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

/// Allocator statistics and the manual reclaim hook used under memory pressure.
pub trait HeapProbe: Send + Sync + 'static {
    /// Bytes currently allocated by the process, when the allocator reports it.
    fn heap_used(&self) -> Option<u64>;

    /// Returns unused pages to the OS. `None` when no hook is available.
    fn reclaim(&self) -> Option<u64>;
}

/// Probe for builds without allocator introspection.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoHeapProbe;

impl HeapProbe for NoHeapProbe {
    fn heap_used(&self) -> Option<u64> {
        None
    }

    fn reclaim(&self) -> Option<u64> {
        None
    }
}
