// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

use device_rt::LaunchArgs;
use graph_ir::ops::RmsNorm;
use graph_ir::{Graph, Operator};

use super::launch;
use crate::{Context, Kernel, Runtime, RuntimeError};

/// `Y = X / sqrt(mean(X^2) + epsilon) * W` over the last axis.
#[derive(Debug, Clone, Copy, Default)]
pub struct RmsNormKernel;

impl Kernel for RmsNormKernel {
    fn compute(
        &self,
        op: &Operator,
        graph: &Graph,
        runtime: &Runtime,
        ctx: &Context,
    ) -> Result<(), RuntimeError> {
        if op.downcast_ref::<RmsNorm>().is_none() {
            return Err(RuntimeError::KernelMismatch {
                kernel: "RmsNormKernel",
                op: op.op_type(),
            });
        }
        // Epsilon is baked into the descriptor.
        launch(op, graph, runtime, ctx, op.inputs(), LaunchArgs::Plain)
    }
}
