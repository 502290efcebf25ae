// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Allocation statistics for the host backend.
//!
//! [`AllocationStats`] tracks cumulative metrics about how the host device
//! is being used: allocation counts per location, live and peak bytes, and
//! copy volume.

/// Cumulative statistics about host backend memory usage.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct AllocationStats {
    /// Total number of allocation requests that succeeded.
    pub total_allocations: u64,
    /// Allocations made with `malloc_host`.
    pub host_allocations: u64,
    /// Allocations made with `malloc` on the current device.
    pub device_allocations: u64,
    /// Total number of frees.
    pub total_deallocations: u64,
    /// Bytes currently allocated.
    pub live_bytes: usize,
    /// Peak memory usage in bytes.
    pub peak_allocated_bytes: usize,
    /// Total bytes ever allocated (including freed).
    pub cumulative_allocated_bytes: u64,
    /// Number of memcpy / upload / download calls.
    pub copies: u64,
    /// Total bytes moved by copies.
    pub bytes_copied: u64,
}

impl AllocationStats {
    pub(crate) fn record_allocation(&mut self, size: usize, on_host: bool) {
        self.total_allocations += 1;
        if on_host {
            self.host_allocations += 1;
        } else {
            self.device_allocations += 1;
        }
        self.cumulative_allocated_bytes += size as u64;
        self.live_bytes += size;
        self.update_peak(self.live_bytes);
    }

    pub(crate) fn record_deallocation(&mut self, size: usize) {
        self.total_deallocations += 1;
        self.live_bytes = self.live_bytes.saturating_sub(size);
    }

    pub(crate) fn record_copy(&mut self, size: usize) {
        self.copies += 1;
        self.bytes_copied += size as u64;
    }

    /// Updates the peak allocation high-water mark if needed.
    fn update_peak(&mut self, current_bytes: usize) {
        if current_bytes > self.peak_allocated_bytes {
            self.peak_allocated_bytes = current_bytes;
        }
    }

    /// Allocations not yet freed.
    pub fn outstanding(&self) -> u64 {
        self.total_allocations.saturating_sub(self.total_deallocations)
    }

    /// Returns a human-readable summary.
    pub fn summary(&self) -> String {
        let peak_mb = self.peak_allocated_bytes as f64 / (1024.0 * 1024.0);
        format!(
            "Allocations: {} total ({} host, {} device), {} deallocations, \
             peak {:.2} MB, {} copies ({} bytes)",
            self.total_allocations,
            self.host_allocations,
            self.device_allocations,
            self.total_deallocations,
            peak_mb,
            self.copies,
            self.bytes_copied,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default() {
        let s = AllocationStats::default();
        assert_eq!(s.total_allocations, 0);
        assert_eq!(s.outstanding(), 0);
    }

    #[test]
    fn test_peak_tracking() {
        let mut s = AllocationStats::default();
        s.record_allocation(100, false);
        s.record_allocation(50, true);
        assert_eq!(s.peak_allocated_bytes, 150);
        s.record_deallocation(100);
        assert_eq!(s.live_bytes, 50);
        assert_eq!(s.peak_allocated_bytes, 150); // Doesn't decrease.
        assert_eq!(s.outstanding(), 1);
    }

    #[test]
    fn test_summary() {
        let mut s = AllocationStats::default();
        s.record_allocation(1024 * 1024, false);
        s.record_allocation(512, true);
        s.record_copy(512);
        let summary = s.summary();
        assert!(summary.contains("2 total"));
        assert!(summary.contains("1 host"));
        assert!(summary.contains("1 copies"));
    }
}
