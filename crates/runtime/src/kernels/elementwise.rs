// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

use device_rt::LaunchArgs;
use graph_ir::{Graph, Operator};

use super::launch;
use crate::{Context, Kernel, Runtime, RuntimeError};

/// Add, Sub and Mul with broadcasting.
#[derive(Debug, Clone, Copy, Default)]
pub struct ElementWiseKernel;

impl Kernel for ElementWiseKernel {
    fn compute(
        &self,
        op: &Operator,
        graph: &Graph,
        runtime: &Runtime,
        ctx: &Context,
    ) -> Result<(), RuntimeError> {
        launch(op, graph, runtime, ctx, op.inputs(), LaunchArgs::Plain)
    }
}
