// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Root-mean-square normalisation over the last axis.

use std::any::Any;
use std::ops::RangeInclusive;

use device_rt::{DType, NativeOp};
use serde::{Deserialize, Serialize};
use shape_expr::ShapeExpr;

use crate::{GraphError, NativeOperand, OpImpl, OpType, Tensor};

/// `y = x / sqrt(mean(x^2) + epsilon) * w` with inputs `[x, w]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RmsNorm {
    pub epsilon: f32,
}

impl RmsNorm {
    pub const DEFAULT_EPSILON: f32 = 1e-8;

    pub fn new(epsilon: f32) -> Self {
        Self { epsilon }
    }
}

impl Default for RmsNorm {
    fn default() -> Self {
        Self::new(Self::DEFAULT_EPSILON)
    }
}

impl OpImpl for RmsNorm {
    fn op_type(&self) -> OpType {
        OpType::RMSNorm
    }

    fn input_arity(&self) -> RangeInclusive<usize> {
        2..=2
    }

    fn infer_shape(&self, inputs: &[&Tensor]) -> Result<Vec<ShapeExpr>, GraphError> {
        let (x, w) = (inputs[0].shape(), inputs[1].shape());
        let mismatch = || GraphError::ShapeMismatch {
            op: OpType::RMSNorm,
            detail: format!("weight {w} does not match the last axis of {x}"),
        };
        let last = x.dims().last().ok_or_else(mismatch)?;
        if w.size() != 1 || w.get(0)? != last {
            return Err(mismatch());
        }
        Ok(vec![x.clone()])
    }

    fn infer_dtype(&self, inputs: &[&Tensor]) -> Result<Vec<DType>, GraphError> {
        Ok(vec![inputs[0].dtype()])
    }

    fn native_op(&self) -> NativeOp {
        NativeOp::RmsNorm {
            epsilon: self.epsilon,
        }
    }

    fn native_operands(
        &self,
        inputs: &[&Tensor],
        outputs: &[&Tensor],
    ) -> Result<Vec<NativeOperand>, GraphError> {
        Ok(vec![
            NativeOperand::of(outputs[0])?,
            NativeOperand::of(inputs[0])?,
            NativeOperand::of(inputs[1])?,
        ])
    }

    fn attributes(&self) -> String {
        format!("epsilon={}", self.epsilon)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
