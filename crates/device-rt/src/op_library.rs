// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The native operator-descriptor protocol.
//!
//! For every operator kind the core goes through the same steps:
//!
//! 1. [`OpLibrary::create_handle`] for the executing device.
//! 2. [`OpLibrary::create_tensor_descriptor`] per operand, from the concrete
//!    shape, strides and dtype.
//! 3. [`OpLibrary::create_op_descriptor`] from the handle, the operand
//!    descriptors (outputs first, then inputs) and the [`NativeOp`].
//! 4. [`OpLibrary::destroy_tensor_descriptor`] for each operand descriptor.
//!    The op descriptor keeps its own copy of the layouts.
//! 5. [`OpLibrary::workspace_size`], then [`OpLibrary::launch`] with the
//!    workspace, the operand data pointers and the stream.
//! 6. [`OpLibrary::destroy_op_descriptor`] when the operator goes away.

use serde::{Deserialize, Serialize};

use crate::{DType, DeviceKind, DevicePtr, Status, Stream};

/// A library handle bound to one device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OpHandle(pub u64);

/// A tensor layout descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TensorDesc(pub u64);

/// A compiled operator descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OpDesc(pub u64);

/// The operator an op descriptor computes, with its creation-time
/// hyperparameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum NativeOp {
    Add,
    Sub,
    Mul,
    /// `y = alpha * a @ b + beta * y`, batched over the leading axis.
    /// Transposition is expressed through the operand strides.
    Gemm,
    /// `y = x / sqrt(mean(x^2) + epsilon) * w` over the last axis.
    RmsNorm { epsilon: f32 },
}

impl NativeOp {
    /// Number of (outputs, inputs) operands the descriptor expects.
    pub fn arity(&self) -> (usize, usize) {
        // Every supported kind writes one output from two inputs.
        (1, 2)
    }

    pub fn name(&self) -> &'static str {
        match self {
            NativeOp::Add => "add",
            NativeOp::Sub => "sub",
            NativeOp::Mul => "mul",
            NativeOp::Gemm => "gemm",
            NativeOp::RmsNorm { .. } => "rms_norm",
        }
    }
}

/// Launch-time scalar arguments.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum LaunchArgs {
    #[default]
    Plain,
    Scale {
        alpha: f32,
        beta: f32,
    },
}

/// A library of native operator implementations.
pub trait OpLibrary: Send + Sync {
    fn create_handle(&self, device: DeviceKind, device_id: usize) -> Result<OpHandle, Status>;

    fn destroy_handle(&self, handle: OpHandle) -> Result<(), Status>;

    fn create_tensor_descriptor(
        &self,
        shape: &[usize],
        strides: &[isize],
        dtype: DType,
    ) -> Result<TensorDesc, Status>;

    fn destroy_tensor_descriptor(&self, desc: TensorDesc) -> Result<(), Status>;

    /// `operands` lists output descriptors first, then inputs, in the
    /// order given by [`NativeOp::arity`].
    fn create_op_descriptor(
        &self,
        handle: OpHandle,
        op: NativeOp,
        operands: &[TensorDesc],
    ) -> Result<OpDesc, Status>;

    /// Scratch bytes a launch of `desc` needs.
    fn workspace_size(&self, desc: OpDesc) -> Result<usize, Status>;

    #[allow(clippy::too_many_arguments)]
    fn launch(
        &self,
        desc: OpDesc,
        workspace: DevicePtr,
        workspace_size: usize,
        outputs: &[DevicePtr],
        inputs: &[DevicePtr],
        args: LaunchArgs,
        stream: Stream,
    ) -> Result<(), Status>;

    fn destroy_op_descriptor(&self, desc: OpDesc) -> Result<(), Status>;
}
