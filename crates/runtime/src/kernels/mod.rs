// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Built-in kernels.
//!
//! Every built-in kernel runs through the operator library's descriptor
//! protocol: build (or reuse) the operator's descriptor for the context's
//! device, query its workspace, borrow the runtime workspace and launch on
//! the context's stream.

mod elementwise;
mod gemm;
mod rms_norm;

pub use elementwise::ElementWiseKernel;
pub use gemm::GemmKernel;
pub use rms_norm::RmsNormKernel;

use device_rt::{native_call, DevicePtr, LaunchArgs};
use graph_ir::{Graph, GraphError, Operator, TensorId};

use crate::{Context, Runtime, RuntimeError};

/// Data pointer of tensor `id`.
fn data_ptr(graph: &Graph, id: TensorId) -> Result<DevicePtr, RuntimeError> {
    graph
        .get_tensor(id)?
        .data()
        .map(|blob| blob.ptr())
        .ok_or(RuntimeError::Graph(GraphError::NotAllocated(id)))
}

/// Launch `op`'s native descriptor with `inputs` as the input operands and
/// the operator's outputs as output operands.
fn launch(
    op: &Operator,
    graph: &Graph,
    runtime: &Runtime,
    ctx: &Context,
    inputs: &[TensorId],
    args: LaunchArgs,
) -> Result<(), RuntimeError> {
    let library = runtime.library();
    let desc = op.create_op_desc(graph, library, ctx.device(), ctx.device_id())?;
    let size = native_call!(library.workspace_size(desc))?;
    let workspace = runtime.get_workspace(size)?;

    let outputs = op
        .outputs()
        .iter()
        .map(|&id| data_ptr(graph, id))
        .collect::<Result<Vec<_>, _>>()?;
    let inputs = inputs
        .iter()
        .map(|&id| data_ptr(graph, id))
        .collect::<Result<Vec<_>, _>>()?;

    native_call!(library.launch(
        desc,
        workspace,
        size,
        &outputs,
        &inputs,
        args,
        ctx.stream()
    ))?;
    Ok(())
}
