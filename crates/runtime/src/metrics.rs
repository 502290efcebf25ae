// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Graph run profiling metrics.
//!
//! [`RunMetrics`] collects the wall time of a [`crate::Runtime::run`] and,
//! when profiling is enabled, the dispatch time of every operator. Kernels
//! may complete asynchronously on their stream, so per-operator timings
//! measure submission unless the backend is synchronous.

use std::time::Duration;

use device_rt::DeviceKind;
use graph_ir::{OpId, OpType};

/// Metrics for a single operator dispatch.
#[derive(Debug, Clone, serde::Serialize)]
pub struct OpMetrics {
    pub op: OpId,
    pub op_type: OpType,
    /// Name of the kernel record that ran the operator.
    pub kernel: String,
    pub duration: Duration,
}

/// Aggregate metrics for one graph run.
#[derive(Debug, Clone, serde::Serialize)]
pub struct RunMetrics {
    /// Device of the context the graph ran on.
    pub device: DeviceKind,
    /// Total wall-clock time of the run.
    pub total_duration: Duration,
    /// Number of operators dispatched.
    pub operators_run: usize,
    /// Per-operator metrics; empty when profiling is disabled.
    pub op_metrics: Vec<OpMetrics>,
}

impl RunMetrics {
    /// Creates an empty metrics container.
    pub fn new(device: DeviceKind) -> Self {
        Self {
            device,
            total_duration: Duration::ZERO,
            operators_run: 0,
            op_metrics: Vec::new(),
        }
    }

    /// Counts one dispatched operator.
    pub fn record_dispatch(&mut self) {
        self.operators_run += 1;
    }

    /// Records the timing of one operator.
    pub fn record_op(&mut self, op: OpId, op_type: OpType, kernel: &str, duration: Duration) {
        self.op_metrics.push(OpMetrics {
            op,
            op_type,
            kernel: kernel.to_string(),
            duration,
        });
    }

    pub fn finalise(&mut self, total: Duration) {
        self.total_duration = total;
    }

    /// Sum of the recorded operator durations.
    pub fn total_op_duration(&self) -> Duration {
        self.op_metrics.iter().map(|m| m.duration).sum()
    }

    /// The slowest recorded operator.
    pub fn slowest(&self) -> Option<&OpMetrics> {
        self.op_metrics.iter().max_by_key(|m| m.duration)
    }

    /// Returns a human-readable summary.
    pub fn summary(&self) -> String {
        let mut s = format!(
            "Run on {}: {:.3}ms total, {} operators, {:.3}ms in kernels",
            self.device,
            self.total_duration.as_secs_f64() * 1000.0,
            self.operators_run,
            self.total_op_duration().as_secs_f64() * 1000.0,
        );
        if let Some(m) = self.slowest() {
            s.push_str(&format!(
                ", slowest {}[{}] {:.3}ms",
                m.op_type,
                m.op,
                m.duration.as_secs_f64() * 1000.0
            ));
        }
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_metrics() {
        let m = RunMetrics::new(DeviceKind::Cpu);
        assert_eq!(m.operators_run, 0);
        assert_eq!(m.total_op_duration(), Duration::ZERO);
        assert!(m.slowest().is_none());
        assert!(m.summary().starts_with("Run on CPU"));
    }

    #[test]
    fn test_record_and_finalise() {
        let mut m = RunMetrics::new(DeviceKind::Nvidia);
        let (a, b) = (OpId::from_raw(1), OpId::from_raw(2));
        m.record_dispatch();
        m.record_op(a, OpType::Gemm, "GemmKernel_NVIDIA", Duration::from_millis(5));
        m.record_dispatch();
        m.record_op(b, OpType::Add, "ElementWiseKernel_NVIDIA", Duration::from_millis(2));
        m.finalise(Duration::from_millis(9));

        assert_eq!(m.operators_run, 2);
        assert_eq!(m.total_op_duration(), Duration::from_millis(7));
        assert_eq!(m.slowest().unwrap().op, a);
        let s = m.summary();
        assert!(s.contains("2 operators"));
        assert!(s.contains("slowest Gemm[1]"));
    }

    #[test]
    fn test_serialises() {
        let mut m = RunMetrics::new(DeviceKind::Cpu);
        m.record_op(OpId::from_raw(3), OpType::RMSNorm, "RmsNormKernel_CPU", Duration::from_micros(10));
        let json = serde_json::to_string(&m).unwrap();
        assert!(json.contains("\"device\":\"cpu\""));
        assert!(json.contains("RmsNormKernel_CPU"));
    }
}
