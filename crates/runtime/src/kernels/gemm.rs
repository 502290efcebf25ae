// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

use device_rt::{LaunchArgs, MemcpyKind};
use graph_ir::ops::Gemm;
use graph_ir::{Graph, GraphError, Operator};

use super::{data_ptr, launch};
use crate::{Context, Kernel, Runtime, RuntimeError};

/// `Y = alpha * op(A) @ op(B) + beta * C`.
///
/// The bias is copied into `Y` first and accumulated in place; without a
/// bias `beta` is ignored.
#[derive(Debug, Clone, Copy, Default)]
pub struct GemmKernel;

impl Kernel for GemmKernel {
    fn compute(
        &self,
        op: &Operator,
        graph: &Graph,
        runtime: &Runtime,
        ctx: &Context,
    ) -> Result<(), RuntimeError> {
        let gemm = op
            .downcast_ref::<Gemm>()
            .ok_or(RuntimeError::KernelMismatch {
                kernel: "GemmKernel",
                op: op.op_type(),
            })?;
        let (a, b, y) = match (op.input(0), op.input(1), op.output(0)) {
            (Some(a), Some(b), Some(y)) => (a, b, y),
            _ => {
                return Err(GraphError::InvalidGraph(format!(
                    "gemm operator {} is missing operands",
                    op.guid()
                ))
                .into())
            }
        };

        let beta = match op.input(2) {
            Some(c) => {
                let bias = graph.get_tensor(c)?;
                let out = graph.get_tensor(y)?;
                let bytes = out.total_bytes()?;
                if bias.total_bytes()? != bytes {
                    return Err(GraphError::DataMismatch {
                        tensor: c,
                        detail: format!("bias spans {} bytes, output {bytes}", bias.total_bytes()?),
                    }
                    .into());
                }
                let kind = copy_kind(bias.device().is_cpu(), out.device().is_cpu());
                runtime.memcpy(data_ptr(graph, y)?, data_ptr(graph, c)?, bytes, kind)?;
                gemm.beta
            }
            None => 0.0,
        };

        launch(
            op,
            graph,
            runtime,
            ctx,
            &[a, b],
            LaunchArgs::Scale {
                alpha: gemm.alpha,
                beta,
            },
        )
    }
}

fn copy_kind(src_on_cpu: bool, dst_on_cpu: bool) -> MemcpyKind {
    match (src_on_cpu, dst_on_cpu) {
        (true, true) => MemcpyKind::HostToHost,
        (true, false) => MemcpyKind::HostToDevice,
        (false, true) => MemcpyKind::DeviceToHost,
        (false, false) => MemcpyKind::DeviceToDevice,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_copy_kind() {
        assert_eq!(copy_kind(true, true), MemcpyKind::HostToHost);
        assert_eq!(copy_kind(true, false), MemcpyKind::HostToDevice);
        assert_eq!(copy_kind(false, true), MemcpyKind::DeviceToHost);
        assert_eq!(copy_kind(false, false), MemcpyKind::DeviceToDevice);
    }
}
