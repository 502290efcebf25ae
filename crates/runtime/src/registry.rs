// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Kernel dispatch table keyed by (device kind, operator kind).
//!
//! The registry is an ordinary value built at startup, usually through
//! [`KernelRegistry::with_builtin_kernels`], and shared with runtimes via
//! `Arc`. There is no fallback: dispatching a pair with no record fails.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use device_rt::DeviceKind;
use graph_ir::{Graph, OpType, Operator};

use crate::kernels::{ElementWiseKernel, GemmKernel, RmsNormKernel};
use crate::{Context, Runtime, RuntimeError};

/// A backend implementation of one operator kind.
pub trait Kernel: Send + Sync {
    /// Run `op` on `ctx`'s device and stream.
    fn compute(
        &self,
        op: &Operator,
        graph: &Graph,
        runtime: &Runtime,
        ctx: &Context,
    ) -> Result<(), RuntimeError>;
}

/// A registered kernel with its name and registration order.
#[derive(Clone)]
pub struct KernelRecord {
    kernel: Arc<dyn Kernel>,
    name: String,
    id: usize,
}

impl KernelRecord {
    pub fn kernel(&self) -> &Arc<dyn Kernel> {
        &self.kernel
    }

    /// E.g. `GemmKernel_NVIDIA`.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn id(&self) -> usize {
        self.id
    }
}

impl fmt::Debug for KernelRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KernelRecord")
            .field("name", &self.name)
            .field("id", &self.id)
            .finish()
    }
}

type KernelCtor = fn() -> Arc<dyn Kernel>;

fn element_wise() -> Arc<dyn Kernel> {
    Arc::new(ElementWiseKernel)
}

fn gemm() -> Arc<dyn Kernel> {
    Arc::new(GemmKernel)
}

fn rms_norm() -> Arc<dyn Kernel> {
    Arc::new(RmsNormKernel)
}

/// Built-in kernels: (operator kind, kernel base name, constructor). Each
/// entry is registered for every device kind.
const BUILTIN_KERNELS: &[(OpType, &str, KernelCtor)] = &[
    (OpType::Add, "ElementWiseKernel", element_wise),
    (OpType::Sub, "ElementWiseKernel", element_wise),
    (OpType::Mul, "ElementWiseKernel", element_wise),
    (OpType::Gemm, "GemmKernel", gemm),
    (OpType::RMSNorm, "RmsNormKernel", rms_norm),
];

#[derive(Debug, Default)]
pub struct KernelRegistry {
    kernels: HashMap<(DeviceKind, OpType), KernelRecord>,
    next_id: usize,
}

impl KernelRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding every built-in kernel for every device kind.
    pub fn with_builtin_kernels() -> Result<Self, RuntimeError> {
        let mut registry = Self::new();
        for device in DeviceKind::ALL {
            for &(op, base, ctor) in BUILTIN_KERNELS {
                registry.register(device, op, ctor(), format!("{base}_{}", device.as_str()))?;
            }
        }
        tracing::debug!(kernels = registry.len(), "registered built-in kernels");
        Ok(registry)
    }

    /// Register `kernel` for `(device, op)`. Returns the record id.
    pub fn register(
        &mut self,
        device: DeviceKind,
        op: OpType,
        kernel: Arc<dyn Kernel>,
        name: impl Into<String>,
    ) -> Result<usize, RuntimeError> {
        if self.kernels.contains_key(&(device, op)) {
            return Err(RuntimeError::DuplicateKernel { device, op });
        }
        let id = self.next_id;
        self.next_id += 1;
        self.kernels.insert(
            (device, op),
            KernelRecord {
                kernel,
                name: name.into(),
                id,
            },
        );
        Ok(id)
    }

    pub fn get(&self, device: DeviceKind, op: OpType) -> Result<&KernelRecord, RuntimeError> {
        self.kernels
            .get(&(device, op))
            .ok_or(RuntimeError::KernelNotFound { device, op })
    }

    pub fn contains(&self, device: DeviceKind, op: OpType) -> bool {
        self.kernels.contains_key(&(device, op))
    }

    pub fn len(&self) -> usize {
        self.kernels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kernels.is_empty()
    }

    /// Records in registration order.
    pub fn records(&self) -> Vec<(&(DeviceKind, OpType), &KernelRecord)> {
        let mut all: Vec<_> = self.kernels.iter().collect();
        all.sort_by_key(|(_, r)| r.id);
        all
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoopKernel;

    impl Kernel for NoopKernel {
        fn compute(
            &self,
            _op: &Operator,
            _graph: &Graph,
            _runtime: &Runtime,
            _ctx: &Context,
        ) -> Result<(), RuntimeError> {
            Ok(())
        }
    }

    #[test]
    fn test_builtin_table() {
        let r = KernelRegistry::with_builtin_kernels().unwrap();
        assert_eq!(r.len(), DeviceKind::ALL.len() * BUILTIN_KERNELS.len());
        let gemm = r.get(DeviceKind::Nvidia, OpType::Gemm).unwrap();
        assert_eq!(gemm.name(), "GemmKernel_NVIDIA");
        assert_eq!(r.get(DeviceKind::Cpu, OpType::Add).unwrap().name(), "ElementWiseKernel_CPU");
    }

    #[test]
    fn test_lookup_returns_same_instance() {
        let r = KernelRegistry::with_builtin_kernels().unwrap();
        let a = r.get(DeviceKind::Ascend, OpType::RMSNorm).unwrap();
        let b = r.get(DeviceKind::Ascend, OpType::RMSNorm).unwrap();
        assert!(Arc::ptr_eq(a.kernel(), b.kernel()));
        assert_eq!(a.id(), b.id());
    }

    #[test]
    fn test_missing_kernel() {
        let mut r = KernelRegistry::new();
        r.register(DeviceKind::Cpu, OpType::Add, Arc::new(NoopKernel), "Add_CPU").unwrap();
        assert!(r.get(DeviceKind::Cpu, OpType::Add).is_ok());
        assert!(matches!(
            r.get(DeviceKind::Cpu, OpType::Sub),
            Err(RuntimeError::KernelNotFound {
                device: DeviceKind::Cpu,
                op: OpType::Sub
            })
        ));
        assert!(matches!(
            r.get(DeviceKind::Kunlun, OpType::Add),
            Err(RuntimeError::KernelNotFound { .. })
        ));
    }

    #[test]
    fn test_duplicate_registration() {
        let mut r = KernelRegistry::new();
        assert_eq!(r.register(DeviceKind::Cpu, OpType::Sub, Arc::new(NoopKernel), "Sub_CPU").unwrap(), 0);
        assert_eq!(r.register(DeviceKind::Kunlun, OpType::Sub, Arc::new(NoopKernel), "Sub_KUNLUN").unwrap(), 1);
        assert!(matches!(
            r.register(DeviceKind::Cpu, OpType::Sub, Arc::new(NoopKernel), "again"),
            Err(RuntimeError::DuplicateKernel { .. })
        ));
        let ids: Vec<usize> = r.records().iter().map(|(_, rec)| rec.id()).collect();
        assert_eq!(ids, vec![0, 1]);
    }
}
