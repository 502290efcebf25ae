// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Host implementation of the operator-descriptor protocol.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::host::kernels::{self, HostFloat, TensorLayout};
use crate::host::HostDevice;
use crate::{
    DType, DeviceKind, DevicePtr, DeviceRuntime, LaunchArgs, NativeOp, OpDesc, OpHandle,
    OpLibrary, Status, Stream, TensorDesc,
};

/// A compiled op descriptor: the op and the validated operand layouts,
/// outputs first.
#[derive(Debug, Clone)]
struct OpEntry {
    op: NativeOp,
    operands: Vec<TensorLayout>,
}

#[derive(Debug, Default)]
struct Registry {
    next_id: u64,
    handles: HashMap<u64, (DeviceKind, usize)>,
    tensors: HashMap<u64, TensorLayout>,
    ops: HashMap<u64, OpEntry>,
}

impl Registry {
    fn next(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

/// [`OpLibrary`] computing on memory owned by a [`HostDevice`].
///
/// Supports `F32` and `F64` operands with non-negative strides.
#[derive(Debug)]
pub struct HostOpLibrary {
    device: Arc<HostDevice>,
    registry: Mutex<Registry>,
}

impl HostOpLibrary {
    pub fn new(device: Arc<HostDevice>) -> Self {
        Self {
            device,
            registry: Mutex::new(Registry::default()),
        }
    }

    /// Number of live (handles, tensor descriptors, op descriptors).
    pub fn live_descriptors(&self) -> (usize, usize, usize) {
        self.registry
            .lock()
            .map(|r| (r.handles.len(), r.tensors.len(), r.ops.len()))
            .unwrap_or_default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Registry>, Status> {
        self.registry.lock().map_err(|_| Status::InternalError)
    }

    /// Validate operand layouts for `op` and return the layouts the launch
    /// will use (Gemm operands are normalised to rank 3).
    fn compile(op: NativeOp, operands: Vec<TensorLayout>) -> Result<Vec<TensorLayout>, Status> {
        let (outs, ins) = op.arity();
        if operands.len() != outs + ins {
            return Err(Status::BadParam);
        }
        let dtype = operands[0].dtype;
        if !matches!(dtype, DType::F32 | DType::F64) {
            return Err(Status::BadTensorDtype);
        }
        if operands.iter().any(|l| l.dtype != dtype) {
            return Err(Status::BadTensorDtype);
        }

        match op {
            NativeOp::Add | NativeOp::Sub | NativeOp::Mul => {
                let shape = &operands[0].shape;
                if operands.iter().any(|l| &l.shape != shape) {
                    return Err(Status::BadTensorShape);
                }
                Ok(operands)
            }
            NativeOp::Gemm => {
                let mut it = operands.into_iter().map(to_batched);
                let (y, a, b) = match (it.next(), it.next(), it.next()) {
                    (Some(y), Some(a), Some(b)) => (y?, a?, b?),
                    _ => return Err(Status::BadParam),
                };
                let (batch, m, n) = (y.shape[0], y.shape[1], y.shape[2]);
                let k = a.shape[2];
                let batch_ok = |d: usize| d == batch || d == 1;
                if !batch_ok(a.shape[0])
                    || !batch_ok(b.shape[0])
                    || a.shape[1] != m
                    || b.shape[1] != k
                    || b.shape[2] != n
                {
                    return Err(Status::BadTensorShape);
                }
                Ok(vec![y, a, b])
            }
            NativeOp::RmsNorm { .. } => {
                let (y, x, w) = (&operands[0], &operands[1], &operands[2]);
                let last = x.shape.last().copied().ok_or(Status::BadTensorShape)?;
                if y.shape != x.shape || w.shape != [last] {
                    return Err(Status::BadTensorShape);
                }
                Ok(operands)
            }
        }
    }

    fn check_operands(
        &self,
        layouts: &[TensorLayout],
        ptrs: impl Iterator<Item = DevicePtr>,
    ) -> Result<(), Status> {
        for (layout, ptr) in layouts.iter().zip(ptrs) {
            self.device.check_range(ptr, layout.span_bytes())?;
        }
        Ok(())
    }
}

/// Reshape a rank-2 or rank-3 layout to `[batch, rows, cols]`, with a zero
/// batch stride when the batch extent is 1.
fn to_batched(mut layout: TensorLayout) -> Result<TensorLayout, Status> {
    match layout.shape.len() {
        2 => {
            layout.shape.insert(0, 1);
            layout.strides.insert(0, 0);
        }
        3 => {
            if layout.shape[0] == 1 {
                layout.strides[0] = 0;
            }
        }
        _ => return Err(Status::BadTensorShape),
    }
    Ok(layout)
}

/// Run `op` for element type `T`.
///
/// # Safety
/// `ptrs` (outputs first) must each be valid over the span of the matching
/// layout; `workspace` must be valid for `layouts[0].shape[2]` elements of
/// `T` when `op` is Gemm.
unsafe fn run<T: HostFloat>(
    op: NativeOp,
    layouts: &[TensorLayout],
    ptrs: &[DevicePtr],
    workspace: DevicePtr,
    args: LaunchArgs,
) {
    let y = ptrs[0].addr() as *mut T;
    let a = ptrs[1].addr() as *const T;
    let b = ptrs[2].addr() as *const T;
    let (yl, al, bl) = (&layouts[0], &layouts[1], &layouts[2]);
    match op {
        NativeOp::Add => kernels::binary(|p: T, q: T| p + q, y, yl, a, al, b, bl),
        NativeOp::Sub => kernels::binary(|p: T, q: T| p - q, y, yl, a, al, b, bl),
        NativeOp::Mul => kernels::binary(|p: T, q: T| p * q, y, yl, a, al, b, bl),
        NativeOp::Gemm => {
            let (alpha, beta) = match args {
                LaunchArgs::Scale { alpha, beta } => (T::from_f32(alpha), T::from_f32(beta)),
                LaunchArgs::Plain => (T::from_f32(1.0), T::default()),
            };
            let acc = workspace.addr() as *mut T;
            kernels::gemm(y, yl, a, al, b, bl, alpha, beta, acc)
        }
        NativeOp::RmsNorm { epsilon } => {
            kernels::rms_norm(y, yl, a, al, b, bl, T::from_f32(epsilon))
        }
    }
}

impl OpLibrary for HostOpLibrary {
    fn create_handle(&self, device: DeviceKind, device_id: usize) -> Result<OpHandle, Status> {
        let count = self.device.device_count(device)?;
        if count == 0 {
            return Err(Status::DeviceTypeNotSupported);
        }
        if device_id >= count {
            return Err(Status::DeviceNotFound);
        }
        let mut reg = self.lock()?;
        let id = reg.next();
        reg.handles.insert(id, (device, device_id));
        Ok(OpHandle(id))
    }

    fn destroy_handle(&self, handle: OpHandle) -> Result<(), Status> {
        let mut reg = self.lock()?;
        reg.handles
            .remove(&handle.0)
            .map(|_| ())
            .ok_or(Status::BadParam)
    }

    fn create_tensor_descriptor(
        &self,
        shape: &[usize],
        strides: &[isize],
        dtype: DType,
    ) -> Result<TensorDesc, Status> {
        if shape.len() != strides.len() {
            return Err(Status::BadTensorShape);
        }
        if strides.iter().any(|&s| s < 0) {
            return Err(Status::BadTensorStrides);
        }
        let mut reg = self.lock()?;
        let id = reg.next();
        reg.tensors.insert(
            id,
            TensorLayout {
                shape: shape.to_vec(),
                strides: strides.to_vec(),
                dtype,
            },
        );
        Ok(TensorDesc(id))
    }

    fn destroy_tensor_descriptor(&self, desc: TensorDesc) -> Result<(), Status> {
        let mut reg = self.lock()?;
        reg.tensors
            .remove(&desc.0)
            .map(|_| ())
            .ok_or(Status::BadParam)
    }

    fn create_op_descriptor(
        &self,
        handle: OpHandle,
        op: NativeOp,
        operands: &[TensorDesc],
    ) -> Result<OpDesc, Status> {
        let mut reg = self.lock()?;
        if !reg.handles.contains_key(&handle.0) {
            return Err(Status::BadParam);
        }
        let layouts = operands
            .iter()
            .map(|d| reg.tensors.get(&d.0).cloned().ok_or(Status::BadParam))
            .collect::<Result<Vec<_>, _>>()?;
        let operands = Self::compile(op, layouts)?;
        let id = reg.next();
        reg.ops.insert(id, OpEntry { op, operands });
        Ok(OpDesc(id))
    }

    fn workspace_size(&self, desc: OpDesc) -> Result<usize, Status> {
        let reg = self.lock()?;
        let entry = reg.ops.get(&desc.0).ok_or(Status::BadParam)?;
        Ok(match entry.op {
            // One accumulator row of the output.
            NativeOp::Gemm => entry.operands[0].shape[2] * entry.operands[0].dtype.size_bytes(),
            _ => 0,
        })
    }

    fn launch(
        &self,
        desc: OpDesc,
        workspace: DevicePtr,
        workspace_size: usize,
        outputs: &[DevicePtr],
        inputs: &[DevicePtr],
        args: LaunchArgs,
        _stream: Stream,
    ) -> Result<(), Status> {
        let entry = {
            let reg = self.lock()?;
            reg.ops.get(&desc.0).cloned().ok_or(Status::BadParam)?
        };
        let (outs, ins) = entry.op.arity();
        if outputs.len() != outs || inputs.len() != ins {
            return Err(Status::BadParam);
        }

        let needed = self.workspace_size(desc)?;
        if workspace_size < needed {
            return Err(Status::InsufficientWorkspace);
        }
        self.device.check_range(workspace, needed)?;

        let ptrs: Vec<DevicePtr> = outputs.iter().chain(inputs).copied().collect();
        self.check_operands(&entry.operands, ptrs.iter().copied())?;

        // SAFETY: every operand pointer and the workspace were checked against
        // live allocations for the full span their layout addresses.
        unsafe {
            match entry.operands[0].dtype {
                DType::F32 => run::<f32>(entry.op, &entry.operands, &ptrs, workspace, args),
                DType::F64 => run::<f64>(entry.op, &entry.operands, &ptrs, workspace, args),
                _ => return Err(Status::BadTensorDtype),
            }
        }
        Ok(())
    }

    fn destroy_op_descriptor(&self, desc: OpDesc) -> Result<(), Status> {
        let mut reg = self.lock()?;
        reg.ops.remove(&desc.0).map(|_| ()).ok_or(Status::BadParam)
    }
}
