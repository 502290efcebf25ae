// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Graph tensors: symbolic layout, device data and producer/consumer links.
//!
//! A [`Tensor`] never owns another entity. Its producer (`source`) and
//! consumers (`targets`) are [`OpId`]s that the owning [`crate::Graph`]
//! resolves on demand.
//!
//! # Buffer Ownership
//! A tensor owns at most one [`Blob`]. Dropping a `Blob` does **not**
//! release device memory: buffers are always released explicitly, through
//! [`Tensor::data_free`], a migration ([`Tensor::copy_to_host`] /
//! [`Tensor::copy_to_device`]) or by the caller after [`Tensor::take_data`].
//! A tensor dropped while still holding data leaks that buffer until the
//! device itself is torn down.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use device_rt::{native_call, DType, DeviceError, DeviceKind, DevicePtr, DeviceRuntime, Element, MemcpyKind};
use serde::{Deserialize, Serialize};
use shape_expr::{contiguous_stride, linear_offset, Bindings, ShapeExpr, StrideExpr};

use crate::{GraphError, OpId};

static NEXT_TENSOR_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique tensor identifier (fuid). Stable across shape changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TensorId(u64);

impl TensorId {
    fn fresh() -> Self {
        Self(NEXT_TENSOR_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Rebuild an id from [`Self::as_u64`].
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TensorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An exclusively owned device or host buffer.
#[derive(Debug, PartialEq, Eq)]
pub struct Blob {
    ptr: DevicePtr,
    size: usize,
}

impl Blob {
    /// Wrap `size` bytes at `ptr`. The caller hands over ownership.
    pub fn new(ptr: DevicePtr, size: usize) -> Self {
        Self { ptr, size }
    }

    pub fn ptr(&self) -> DevicePtr {
        self.ptr
    }

    pub fn size(&self) -> usize {
        self.size
    }
}

/// Memory services a tensor needs to realise, migrate and access its data.
///
/// The runtime implements this on top of the calling thread's context;
/// [`DirectMemory`] implements it straight on a [`DeviceRuntime`].
pub trait TensorMemory {
    type Error: From<GraphError> + From<DeviceError> + fmt::Display;

    /// Device that `alloc_device` allocates on.
    fn active_device(&self) -> Result<DeviceKind, Self::Error>;
    fn alloc_device(&self, size: usize) -> Result<DevicePtr, Self::Error>;
    fn alloc_host(&self, size: usize) -> Result<DevicePtr, Self::Error>;
    fn dealloc_device(&self, ptr: DevicePtr) -> Result<(), Self::Error>;
    fn dealloc_host(&self, ptr: DevicePtr) -> Result<(), Self::Error>;
    fn memcpy(
        &self,
        dst: DevicePtr,
        src: DevicePtr,
        size: usize,
        kind: MemcpyKind,
    ) -> Result<(), Self::Error>;
    fn upload(&self, dst: DevicePtr, src: &[u8]) -> Result<(), Self::Error>;
    fn download(&self, dst: &mut [u8], src: DevicePtr) -> Result<(), Self::Error>;
}

/// [`TensorMemory`] backed directly by a [`DeviceRuntime`], using the
/// calling thread's selected device.
#[derive(Clone, Copy)]
pub struct DirectMemory<'a>(pub &'a dyn DeviceRuntime);

impl TensorMemory for DirectMemory<'_> {
    type Error = GraphError;

    fn active_device(&self) -> Result<DeviceKind, GraphError> {
        Ok(native_call!(self.0.current_device())?.0)
    }

    fn alloc_device(&self, size: usize) -> Result<DevicePtr, GraphError> {
        Ok(native_call!(self.0.malloc(size))?)
    }

    fn alloc_host(&self, size: usize) -> Result<DevicePtr, GraphError> {
        Ok(native_call!(self.0.malloc_host(size))?)
    }

    fn dealloc_device(&self, ptr: DevicePtr) -> Result<(), GraphError> {
        Ok(native_call!(self.0.free(ptr))?)
    }

    fn dealloc_host(&self, ptr: DevicePtr) -> Result<(), GraphError> {
        Ok(native_call!(self.0.free_host(ptr))?)
    }

    fn memcpy(
        &self,
        dst: DevicePtr,
        src: DevicePtr,
        size: usize,
        kind: MemcpyKind,
    ) -> Result<(), GraphError> {
        Ok(native_call!(self.0.memcpy(dst, src, size, kind))?)
    }

    fn upload(&self, dst: DevicePtr, src: &[u8]) -> Result<(), GraphError> {
        Ok(native_call!(self.0.upload(dst, src))?)
    }

    fn download(&self, dst: &mut [u8], src: DevicePtr) -> Result<(), GraphError> {
        Ok(native_call!(self.0.download(dst, src))?)
    }
}

/// A graph tensor.
#[derive(Debug)]
pub struct Tensor {
    fuid: TensorId,
    dtype: DType,
    shape: ShapeExpr,
    stride: StrideExpr,
    device: DeviceKind,
    data: Option<Blob>,
    source: Option<OpId>,
    targets: Vec<OpId>,
}

impl Tensor {
    /// A tensor with the contiguous stride of `shape`.
    pub fn new(shape: impl Into<ShapeExpr>, dtype: DType) -> Result<Self, GraphError> {
        let shape = shape.into();
        let stride = contiguous_stride(&shape);
        Self::with_stride(shape, stride, dtype)
    }

    /// A tensor with an explicit stride.
    ///
    /// Fails if the ranks differ or a constant axis is not strictly
    /// positive. Symbolic axes are checked once resolved.
    pub fn with_stride(
        shape: impl Into<ShapeExpr>,
        stride: impl Into<StrideExpr>,
        dtype: DType,
    ) -> Result<Self, GraphError> {
        let shape = shape.into();
        let stride = stride.into();
        validate_layout(&shape, &stride)?;
        Ok(Self {
            fuid: TensorId::fresh(),
            dtype,
            shape,
            stride,
            device: DeviceKind::Cpu,
            data: None,
            source: None,
            targets: Vec::new(),
        })
    }

    pub fn fuid(&self) -> TensorId {
        self.fuid
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn shape(&self) -> &ShapeExpr {
        &self.shape
    }

    pub fn stride(&self) -> &StrideExpr {
        &self.stride
    }

    pub fn rank(&self) -> usize {
        self.shape.size()
    }

    /// Device the data buffer lives on (CPU until realised elsewhere).
    pub fn device(&self) -> DeviceKind {
        self.device
    }

    pub fn data(&self) -> Option<&Blob> {
        self.data.as_ref()
    }

    pub fn is_allocated(&self) -> bool {
        self.data.is_some()
    }

    /// The producing operator.
    pub fn source(&self) -> Option<OpId> {
        self.source
    }

    /// Consuming operators, once per consuming input slot.
    pub fn targets(&self) -> &[OpId] {
        &self.targets
    }

    pub fn is_concrete(&self) -> bool {
        self.shape.is_concrete() && self.stride.is_concrete()
    }

    /// Overwrite the shape. The stride is left untouched.
    pub fn set_shape(&mut self, shape: ShapeExpr) {
        self.shape = shape;
    }

    pub fn set_stride(&mut self, stride: StrideExpr) -> Result<(), GraphError> {
        validate_layout(&self.shape, &stride)?;
        self.stride = stride;
        Ok(())
    }

    /// Replace the stride with the contiguous stride of the current shape.
    pub fn reset_contiguous_stride(&mut self) {
        self.stride = contiguous_stride(&self.shape);
    }

    /// Substitute bound variables into the shape and stride. Returns
    /// whether the shape changed.
    pub fn substitute(&mut self, bindings: &Bindings) -> Result<bool, GraphError> {
        let shape = self.shape.substitute(bindings);
        let stride = self.stride.substitute(bindings);
        validate_layout(&shape, &stride)?;
        let changed = shape != self.shape;
        self.shape = shape;
        self.stride = stride;
        Ok(changed)
    }

    /// Concrete shape values.
    pub fn concrete_shape(&self) -> Result<Vec<usize>, GraphError> {
        self.shape
            .constant_value()
            .map_err(|_| GraphError::NotConcrete {
                tensor: self.fuid,
                what: "shape",
                value: self.shape.to_string(),
            })
    }

    /// Concrete stride values.
    pub fn concrete_stride(&self) -> Result<Vec<isize>, GraphError> {
        self.stride
            .constant_value()
            .map_err(|_| GraphError::NotConcrete {
                tensor: self.fuid,
                what: "stride",
                value: self.stride.to_string(),
            })
    }

    /// Number of logical elements.
    pub fn element_count(&self) -> Result<usize, GraphError> {
        Ok(self.concrete_shape()?.iter().product())
    }

    /// Number of elements spanned in memory, from the lowest to the highest
    /// addressable offset. Negative strides are supported; a scalar spans 1.
    pub fn storage_size(&self) -> Result<usize, GraphError> {
        let shape = self.concrete_shape()?;
        let stride = self.concrete_stride()?;
        if shape.iter().any(|&d| d == 0) {
            return Ok(0);
        }
        let (mut lo, mut hi) = (0isize, 0isize);
        for (&d, &s) in shape.iter().zip(&stride) {
            let span = (d as isize - 1) * s;
            if span >= 0 {
                hi += span;
            } else {
                lo += span;
            }
        }
        Ok((hi - lo + 1) as usize)
    }

    /// Storage size in bytes.
    pub fn total_bytes(&self) -> Result<usize, GraphError> {
        Ok(self.storage_size()? * self.dtype.size_bytes())
    }

    // ── Graph wiring ───────────────────────────────────────────────

    pub(crate) fn set_source(&mut self, op: OpId) {
        self.source = Some(op);
    }

    pub(crate) fn add_target(&mut self, op: OpId) {
        self.targets.push(op);
    }

    // ── Data ───────────────────────────────────────────────────────

    /// Take ownership of an externally supplied buffer living on
    /// [`Tensor::device`]. Returns the previous buffer, which the caller
    /// must release.
    pub fn set_data(&mut self, blob: Blob) -> Option<Blob> {
        self.data.replace(blob)
    }

    /// Give up the buffer without freeing it.
    pub fn take_data(&mut self) -> Option<Blob> {
        self.data.take()
    }

    /// Realise the data buffer on `mem`'s active device.
    ///
    /// - No buffer yet: allocate on the active device.
    /// - Buffer on the CPU while the active device is an accelerator: copy
    ///   host to device, rebind, then release the host buffer.
    /// - Otherwise nothing happens; the buffer keeps its identity.
    ///
    /// A failed promotion leaves the tensor on its host buffer.
    pub fn data_malloc<M: TensorMemory>(&mut self, mem: &M) -> Result<(), M::Error> {
        let active = mem.active_device()?;
        let bytes = self.total_bytes()?;
        match self.data.as_ref().map(Blob::ptr) {
            None => {
                let ptr = mem.alloc_device(bytes)?;
                tracing::debug!(tensor = %self.fuid, bytes, device = %active, "allocated tensor data");
                self.data = Some(Blob::new(ptr, bytes));
                self.device = active;
            }
            Some(host) if self.device.is_cpu() && !active.is_cpu() => {
                self.migrate(mem, host, active)?;
                tracing::debug!(tensor = %self.fuid, bytes, device = %active, "promoted tensor data to device");
            }
            Some(_) => {}
        }
        Ok(())
    }

    /// Release the data buffer, if any.
    pub fn data_free<M: TensorMemory>(&mut self, mem: &M) -> Result<(), M::Error> {
        if let Some(blob) = self.data.take() {
            if self.device.is_cpu() {
                mem.dealloc_host(blob.ptr())?;
            } else {
                mem.dealloc_device(blob.ptr())?;
            }
        }
        Ok(())
    }

    /// Move device-resident data to host memory.
    pub fn copy_to_host<M: TensorMemory>(&mut self, mem: &M) -> Result<(), M::Error> {
        if self.device.is_cpu() {
            return Err(self.wrong_location("a device").into());
        }
        let old = self
            .data
            .as_ref()
            .map(Blob::ptr)
            .ok_or(GraphError::NotAllocated(self.fuid))?;
        self.migrate(mem, old, DeviceKind::Cpu)
    }

    /// Move host-resident data to `mem`'s active (non-CPU) device.
    pub fn copy_to_device<M: TensorMemory>(&mut self, mem: &M) -> Result<(), M::Error> {
        if !self.device.is_cpu() {
            return Err(self.wrong_location("the host").into());
        }
        let active = mem.active_device()?;
        if active.is_cpu() {
            return Err(GraphError::WrongLocation {
                tensor: self.fuid,
                device: active,
                expected: "an accelerator as the active device",
            }
            .into());
        }
        let old = self
            .data
            .as_ref()
            .map(Blob::ptr)
            .ok_or(GraphError::NotAllocated(self.fuid))?;
        self.migrate(mem, old, active)
    }

    /// Copy the buffer at `old` into a fresh buffer on `target`, rebind to
    /// it and release `old`.
    ///
    /// If the copy fails the fresh buffer is released and the tensor keeps
    /// `old`. Once rebound, a failure to release `old` is reported but the
    /// tensor stays on the new buffer.
    fn migrate<M: TensorMemory>(
        &mut self,
        mem: &M,
        old: DevicePtr,
        target: DeviceKind,
    ) -> Result<(), M::Error> {
        let bytes = self.total_bytes()?;
        let to_host = target.is_cpu();
        let (ptr, kind) = if to_host {
            (mem.alloc_host(bytes)?, MemcpyKind::DeviceToHost)
        } else {
            (mem.alloc_device(bytes)?, MemcpyKind::HostToDevice)
        };
        if let Err(e) = mem.memcpy(ptr, old, bytes, kind) {
            let released = if to_host {
                mem.dealloc_host(ptr)
            } else {
                mem.dealloc_device(ptr)
            };
            if let Err(cleanup) = released {
                tracing::warn!(tensor = %self.fuid, error = %cleanup, "failed to release migration buffer");
            }
            return Err(e);
        }

        let source = std::mem::replace(&mut self.device, target);
        self.data = Some(Blob::new(ptr, bytes));
        if source.is_cpu() {
            mem.dealloc_host(old)
        } else {
            mem.dealloc_device(old)
        }
    }

    /// Upload `values` into the buffer, in storage order.
    pub fn write_data<T: Element, M: TensorMemory>(
        &self,
        mem: &M,
        values: &[T],
    ) -> Result<(), M::Error> {
        let blob = self.checked_blob::<T>()?;
        let expected = self.storage_size()?;
        if values.len() != expected {
            return Err(GraphError::DataMismatch {
                tensor: self.fuid,
                detail: format!("expected {expected} elements, got {}", values.len()),
            }
            .into());
        }
        let mut bytes = Vec::with_capacity(values.len() * T::DTYPE.size_bytes());
        for &v in values {
            v.write_ne(&mut bytes);
        }
        mem.upload(blob.ptr(), &bytes)
    }

    /// Download the buffer, in storage order.
    pub fn read_data<T: Element, M: TensorMemory>(&self, mem: &M) -> Result<Vec<T>, M::Error> {
        let blob = self.checked_blob::<T>()?;
        let mut bytes = vec![0u8; self.total_bytes()?];
        mem.download(&mut bytes, blob.ptr())?;
        let width = T::DTYPE.size_bytes();
        Ok(bytes.chunks_exact(width).map(T::read_ne).collect())
    }

    /// Render up to `max_elements` logical elements, walking the stride.
    pub fn format_data<M: TensorMemory>(
        &self,
        mem: &M,
        max_elements: usize,
        precision: usize,
    ) -> Result<String, M::Error> {
        let blob = self
            .data
            .as_ref()
            .ok_or(GraphError::NotAllocated(self.fuid))?;
        let shape = self.concrete_shape()?;
        let stride = self.concrete_stride()?;
        let mut bytes = vec![0u8; self.total_bytes()?];
        mem.download(&mut bytes, blob.ptr())?;

        let width = self.dtype.size_bytes();
        let count: usize = shape.iter().product();
        let shown = count.min(max_elements);
        let mut out = String::from("[");
        for i in 0..shown {
            if i > 0 {
                out.push_str(", ");
            }
            let start = usize::try_from(linear_offset(i, &shape, &stride))
                .ok()
                .map(|o| o * width);
            match start.and_then(|s| bytes.get(s..s + width)) {
                Some(b) => out.push_str(&self.dtype.format_element(b, precision)),
                None => out.push('?'),
            }
        }
        if shown < count {
            out.push_str(", ...");
        }
        out.push(']');
        Ok(out)
    }

    fn checked_blob<T: Element>(&self) -> Result<&Blob, GraphError> {
        if T::DTYPE != self.dtype {
            return Err(GraphError::DataMismatch {
                tensor: self.fuid,
                detail: format!("host type {} does not match dtype {}", T::DTYPE, self.dtype),
            });
        }
        self.data.as_ref().ok_or(GraphError::NotAllocated(self.fuid))
    }

    fn wrong_location(&self, expected: &'static str) -> GraphError {
        GraphError::WrongLocation {
            tensor: self.fuid,
            device: self.device,
            expected,
        }
    }
}

fn validate_layout(shape: &ShapeExpr, stride: &StrideExpr) -> Result<(), GraphError> {
    if shape.size() != stride.size() {
        return Err(GraphError::RankMismatch {
            shape: shape.to_string(),
            stride: stride.to_string(),
        });
    }
    for (axis, dim) in shape.iter().enumerate() {
        if let Some(value) = dim.as_constant() {
            if value <= 0 {
                return Err(GraphError::InvalidDimension {
                    axis,
                    value,
                    shape: shape.to_string(),
                });
            }
        }
    }
    Ok(())
}

impl fmt::Display for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Tensor {}, dtype {}, shape {}, stride {}, device {}",
            self.fuid, self.dtype, self.shape, self.stride, self.device
        )?;
        match self.source {
            Some(op) => write!(f, ", source {op}")?,
            None => write!(f, ", source None")?,
        }
        write!(f, ", targets [")?;
        for (i, t) in self.targets.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{t}")?;
        }
        write!(f, "]")?;
        if let Some(blob) = &self.data {
            write!(f, ", data {}", blob.ptr())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use device_rt::host::HostDevice;
    use shape_expr::Expr;

    #[test]
    fn test_contiguous_default() {
        let t = Tensor::new([2, 3, 4], DType::F32).unwrap();
        assert_eq!(t.stride(), &StrideExpr::from([12, 4, 1]));
        assert_eq!(t.storage_size().unwrap(), 24);
        assert_eq!(t.total_bytes().unwrap(), 96);
        assert_eq!(t.element_count().unwrap(), 24);
    }

    #[test]
    fn test_fuids_are_unique() {
        let a = Tensor::new([1], DType::F32).unwrap();
        let b = Tensor::new([1], DType::F32).unwrap();
        assert_ne!(a.fuid(), b.fuid());
    }

    #[test]
    fn test_validation() {
        assert!(matches!(
            Tensor::with_stride([2, 3], [1], DType::F32),
            Err(GraphError::RankMismatch { .. })
        ));
        assert!(matches!(
            Tensor::new([2, 0], DType::F32),
            Err(GraphError::InvalidDimension { axis: 1, .. })
        ));
        // Symbolic axes are not checked until resolved.
        assert!(Tensor::new([Expr::var("n"), Expr::constant(4)], DType::F32).is_ok());
    }

    #[test]
    fn test_storage_size_with_broadcast_and_negative_strides() {
        let t = Tensor::with_stride([2, 3], [0, 1], DType::F32).unwrap();
        assert_eq!(t.storage_size().unwrap(), 3);
        let t = Tensor::with_stride([4], [-1], DType::F32).unwrap();
        assert_eq!(t.storage_size().unwrap(), 4);
        let t = Tensor::with_stride([2, 3], [-3, 1], DType::F64).unwrap();
        assert_eq!(t.storage_size().unwrap(), 6);
        assert_eq!(t.total_bytes().unwrap(), 48);
    }

    #[test]
    fn test_scalar_storage() {
        let t = Tensor::new(ShapeExpr::scalar(), DType::I64).unwrap();
        assert_eq!(t.storage_size().unwrap(), 1);
        assert_eq!(t.total_bytes().unwrap(), 8);
    }

    #[test]
    fn test_symbolic_sizes_fail() {
        let t = Tensor::new([Expr::var("n")], DType::F32).unwrap();
        assert!(matches!(
            t.element_count(),
            Err(GraphError::NotConcrete { what: "shape", .. })
        ));
    }

    #[test]
    fn test_set_shape_keeps_stride() {
        let mut t = Tensor::new([2, 3], DType::F32).unwrap();
        t.set_shape(ShapeExpr::from([4, 3]));
        assert_eq!(t.stride(), &StrideExpr::from([3, 1]));
        t.reset_contiguous_stride();
        assert_eq!(t.stride(), &StrideExpr::from([3, 1]));
        t.set_shape(ShapeExpr::from([4, 5]));
        t.reset_contiguous_stride();
        assert_eq!(t.stride(), &StrideExpr::from([5, 1]));
    }

    #[test]
    fn test_substitute() {
        let n = Expr::var("n");
        let mut t = Tensor::new([n, Expr::constant(4)], DType::F32).unwrap();
        assert!(!t.is_concrete());
        let mut env = Bindings::new();
        env.insert("n".into(), 3);
        assert!(t.substitute(&env).unwrap());
        assert_eq!(t.shape(), &ShapeExpr::from([3, 4]));
        assert_eq!(t.stride(), &StrideExpr::from([4, 1]));
        assert!(!t.substitute(&env).unwrap());

        let mut t = Tensor::new([Expr::var("m")], DType::F32).unwrap();
        env.insert("m".into(), 0);
        assert!(matches!(
            t.substitute(&env),
            Err(GraphError::InvalidDimension { .. })
        ));
    }

    #[test]
    fn test_data_malloc_is_idempotent() {
        let dev = HostDevice::new();
        let mem = DirectMemory(&dev);
        let mut t = Tensor::new([2, 2], DType::F32).unwrap();
        t.data_malloc(&mem).unwrap();
        let first = t.data().unwrap().ptr();
        t.data_malloc(&mem).unwrap();
        assert_eq!(t.data().unwrap().ptr(), first);
        assert_eq!(dev.live_allocations(), 1);
        t.data_free(&mem).unwrap();
        assert_eq!(dev.live_allocations(), 0);
    }

    #[test]
    fn test_write_read_format() {
        let dev = HostDevice::new();
        let mem = DirectMemory(&dev);
        let mut t = Tensor::new([2, 3], DType::F32).unwrap();
        t.data_malloc(&mem).unwrap();
        t.write_data(&mem, &[1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
        assert_eq!(t.read_data::<f32, _>(&mem).unwrap(), vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        assert_eq!(t.format_data(&mem, 4, 1).unwrap(), "[1.0, 2.0, 3.0, 4.0, ...]");

        assert!(matches!(
            t.write_data(&mem, &[1.0f64; 6]),
            Err(GraphError::DataMismatch { .. })
        ));
        assert!(matches!(
            t.write_data(&mem, &[1.0f32; 5]),
            Err(GraphError::DataMismatch { .. })
        ));
        t.data_free(&mem).unwrap();
    }

    #[test]
    fn test_format_follows_stride() {
        let dev = HostDevice::new();
        let mem = DirectMemory(&dev);
        // Column-major view of a 2x3 buffer.
        let mut t = Tensor::with_stride([2, 3], [1, 2], DType::I32).unwrap();
        t.data_malloc(&mem).unwrap();
        t.write_data(&mem, &[0i32, 1, 2, 3, 4, 5]).unwrap();
        assert_eq!(t.format_data(&mem, 100, 0).unwrap(), "[0, 2, 4, 1, 3, 5]");
        t.data_free(&mem).unwrap();
    }

    #[test]
    fn test_promotion_and_migration() {
        let dev = HostDevice::with_emulated(&[DeviceKind::Nvidia]);
        let mem = DirectMemory(&dev);
        let mut t = Tensor::new([4], DType::F32).unwrap();

        // Realised on the CPU first.
        t.data_malloc(&mem).unwrap();
        t.write_data(&mem, &[1.0f32, 2.0, 3.0, 4.0]).unwrap();
        assert_eq!(t.device(), DeviceKind::Cpu);

        // Switching the thread to an accelerator promotes on the next malloc.
        dev.set_device(DeviceKind::Nvidia, 0).unwrap();
        t.data_malloc(&mem).unwrap();
        assert_eq!(t.device(), DeviceKind::Nvidia);
        assert_eq!(dev.live_allocations(), 1);
        assert!(matches!(
            t.copy_to_device(&mem),
            Err(GraphError::WrongLocation { .. })
        ));

        t.copy_to_host(&mem).unwrap();
        assert_eq!(t.device(), DeviceKind::Cpu);
        assert_eq!(t.read_data::<f32, _>(&mem).unwrap(), vec![1.0, 2.0, 3.0, 4.0]);

        t.copy_to_device(&mem).unwrap();
        assert_eq!(t.device(), DeviceKind::Nvidia);
        assert_eq!(dev.live_allocations(), 1);
        t.data_free(&mem).unwrap();
        assert_eq!(dev.live_allocations(), 0);
    }

    /// Bookkeeping-only memory whose alloc or memcpy can be made to fail.
    struct FlakyMemory {
        active: DeviceKind,
        fail_alloc: bool,
        fail_memcpy: bool,
        next: std::cell::Cell<usize>,
        live: std::cell::RefCell<Vec<DevicePtr>>,
    }

    impl FlakyMemory {
        fn new(active: DeviceKind) -> Self {
            Self {
                active,
                fail_alloc: false,
                fail_memcpy: false,
                next: std::cell::Cell::new(0x1000),
                live: std::cell::RefCell::new(Vec::new()),
            }
        }

        fn alloc(&self) -> Result<DevicePtr, GraphError> {
            if self.fail_alloc {
                native_call!(Err::<(), _>(device_rt::Status::InternalError))?;
            }
            let addr = self.next.get();
            self.next.set(addr + 0x1000);
            let ptr = DevicePtr::from_addr(addr).unwrap();
            self.live.borrow_mut().push(ptr);
            Ok(ptr)
        }

        fn release(&self, ptr: DevicePtr) -> Result<(), GraphError> {
            let mut live = self.live.borrow_mut();
            let pos = live.iter().position(|p| *p == ptr);
            let pos = pos.ok_or(DeviceError::Native {
                site: "tensor tests",
                call: "release",
                status: device_rt::Status::NullPointer,
            })?;
            live.remove(pos);
            Ok(())
        }

        fn live(&self) -> Vec<DevicePtr> {
            self.live.borrow().clone()
        }
    }

    impl TensorMemory for FlakyMemory {
        type Error = GraphError;

        fn active_device(&self) -> Result<DeviceKind, GraphError> {
            Ok(self.active)
        }
        fn alloc_device(&self, _size: usize) -> Result<DevicePtr, GraphError> {
            self.alloc()
        }
        fn alloc_host(&self, _size: usize) -> Result<DevicePtr, GraphError> {
            self.alloc()
        }
        fn dealloc_device(&self, ptr: DevicePtr) -> Result<(), GraphError> {
            self.release(ptr)
        }
        fn dealloc_host(&self, ptr: DevicePtr) -> Result<(), GraphError> {
            self.release(ptr)
        }
        fn memcpy(
            &self,
            _dst: DevicePtr,
            _src: DevicePtr,
            _size: usize,
            _kind: MemcpyKind,
        ) -> Result<(), GraphError> {
            if self.fail_memcpy {
                native_call!(Err::<(), _>(device_rt::Status::InternalError))?;
            }
            Ok(())
        }
        fn upload(&self, _dst: DevicePtr, _src: &[u8]) -> Result<(), GraphError> {
            Ok(())
        }
        fn download(&self, _dst: &mut [u8], _src: DevicePtr) -> Result<(), GraphError> {
            Ok(())
        }
    }

    /// A 4-element F32 tensor already holding a buffer from `mem`.
    fn resident(mem: &FlakyMemory, device: DeviceKind) -> (Tensor, DevicePtr) {
        let mut t = Tensor::new([4], DType::F32).unwrap();
        let ptr = mem.alloc().unwrap();
        t.set_data(Blob::new(ptr, 16));
        t.device = device;
        (t, ptr)
    }

    #[test]
    fn test_failed_promotion_keeps_host_buffer() {
        let mut mem = FlakyMemory::new(DeviceKind::Nvidia);
        let (mut t, host) = resident(&mem, DeviceKind::Cpu);
        mem.fail_memcpy = true;

        assert!(matches!(t.data_malloc(&mem), Err(GraphError::Device(_))));
        assert!(t.is_allocated());
        assert_eq!(t.device(), DeviceKind::Cpu);
        assert_eq!(t.data().unwrap().ptr(), host);
        // The device buffer taken for the copy was handed back.
        assert_eq!(mem.live(), vec![host]);

        mem.fail_memcpy = false;
        t.data_malloc(&mem).unwrap();
        assert_eq!(t.device(), DeviceKind::Nvidia);
        assert_eq!(mem.live(), vec![t.data().unwrap().ptr()]);
    }

    #[test]
    fn test_failed_promotion_alloc_keeps_host_buffer() {
        let mut mem = FlakyMemory::new(DeviceKind::Nvidia);
        let (mut t, host) = resident(&mem, DeviceKind::Cpu);
        mem.fail_alloc = true;

        assert!(t.data_malloc(&mem).is_err());
        assert_eq!(t.device(), DeviceKind::Cpu);
        assert_eq!(t.data().unwrap().ptr(), host);
        assert_eq!(mem.live(), vec![host]);
    }

    #[test]
    fn test_failed_copy_to_host_keeps_device_buffer() {
        let mut mem = FlakyMemory::new(DeviceKind::Nvidia);
        let (mut t, dev_ptr) = resident(&mem, DeviceKind::Nvidia);
        mem.fail_memcpy = true;

        assert!(t.copy_to_host(&mem).is_err());
        assert_eq!(t.device(), DeviceKind::Nvidia);
        assert_eq!(t.data().unwrap().ptr(), dev_ptr);
        assert_eq!(mem.live(), vec![dev_ptr]);

        mem.fail_alloc = true;
        mem.fail_memcpy = false;
        assert!(t.copy_to_host(&mem).is_err());
        assert_eq!(t.data().unwrap().ptr(), dev_ptr);
        assert_eq!(mem.live(), vec![dev_ptr]);
    }

    #[test]
    fn test_failed_copy_to_device_keeps_host_buffer() {
        let mut mem = FlakyMemory::new(DeviceKind::Kunlun);
        let (mut t, host) = resident(&mem, DeviceKind::Cpu);
        mem.fail_memcpy = true;

        assert!(t.copy_to_device(&mem).is_err());
        assert_eq!(t.device(), DeviceKind::Cpu);
        assert_eq!(t.data().unwrap().ptr(), host);
        assert_eq!(mem.live(), vec![host]);

        mem.fail_memcpy = false;
        t.copy_to_device(&mem).unwrap();
        assert_eq!(t.device(), DeviceKind::Kunlun);
        assert_ne!(t.data().unwrap().ptr(), host);
        assert_eq!(mem.live().len(), 1);
    }

    #[test]
    fn test_set_data_returns_previous() {
        let dev = HostDevice::new();
        let mem = DirectMemory(&dev);
        let mut t = Tensor::new([2], DType::F32).unwrap();
        let p = native_call!(dev.malloc(8)).unwrap();
        assert!(t.set_data(Blob::new(p, 8)).is_none());
        let q = native_call!(dev.malloc(8)).unwrap();
        let old = t.set_data(Blob::new(q, 8)).unwrap();
        assert_eq!(old.ptr(), p);
        native_call!(dev.free(old.ptr())).unwrap();
        t.data_free(&mem).unwrap();
        assert_eq!(dev.live_allocations(), 0);
    }

    #[test]
    fn test_display() {
        let t = Tensor::new([2, 3], DType::F32).unwrap();
        let s = t.to_string();
        assert!(s.contains("shape [2, 3]"));
        assert!(s.contains("stride [3, 1]"));
        assert!(s.contains("source None"));
    }
}
