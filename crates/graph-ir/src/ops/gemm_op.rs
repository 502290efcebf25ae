// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! General matrix multiply: `Y = alpha * op(A) @ op(B) + beta * C`.
//!
//! Operands are rank 2 (`[rows, cols]`, batch 1) or rank 3
//! (`[batch, rows, cols]`). The batch axis broadcasts when one side is 1.
//! Transposition swaps the last two axes of an operand's view; no data
//! moves. The output is always rank 3.

use std::any::Any;
use std::ops::RangeInclusive;

use device_rt::{DType, NativeOp};
use serde::{Deserialize, Serialize};
use shape_expr::{Expr, ShapeExpr};

use crate::{GraphError, NativeOperand, OpImpl, OpType, Tensor};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Gemm {
    pub alpha: f32,
    pub beta: f32,
    pub trans_a: bool,
    pub trans_b: bool,
}

impl Default for Gemm {
    fn default() -> Self {
        Self {
            alpha: 1.0,
            beta: 1.0,
            trans_a: false,
            trans_b: false,
        }
    }
}

/// `[batch, rows, cols]` of an operand as seen after optional transposition.
struct MatrixView {
    batch: Expr,
    rows: Expr,
    cols: Expr,
}

impl Gemm {
    pub fn new(alpha: f32, beta: f32, trans_a: bool, trans_b: bool) -> Self {
        Self {
            alpha,
            beta,
            trans_a,
            trans_b,
        }
    }

    fn view(&self, tensor: &Tensor, transposed: bool) -> Result<MatrixView, GraphError> {
        let shape = tensor.shape();
        let (batch, rows, cols) = match shape.size() {
            2 => (Expr::constant(1), shape.get(0)?, shape.get(1)?),
            3 => (shape.get(0)?.clone(), shape.get(1)?, shape.get(2)?),
            rank => {
                return Err(GraphError::ShapeMismatch {
                    op: OpType::Gemm,
                    detail: format!("operand {} has rank {rank}, expected 2 or 3", tensor.fuid()),
                })
            }
        };
        let (rows, cols) = if transposed { (cols, rows) } else { (rows, cols) };
        Ok(MatrixView {
            batch,
            rows: rows.clone(),
            cols: cols.clone(),
        })
    }

    /// Operand layout with the last two axes swapped when `transposed`.
    fn operand(tensor: &Tensor, transposed: bool) -> Result<NativeOperand, GraphError> {
        let mut operand = NativeOperand::of(tensor)?;
        let rank = operand.shape.len();
        if transposed && rank >= 2 {
            operand.shape.swap(rank - 2, rank - 1);
            operand.strides.swap(rank - 2, rank - 1);
        }
        Ok(operand)
    }
}

fn is_one(e: &Expr) -> bool {
    e.as_constant() == Some(1)
}

impl OpImpl for Gemm {
    fn op_type(&self) -> OpType {
        OpType::Gemm
    }

    /// A, B and the optional bias C.
    fn input_arity(&self) -> RangeInclusive<usize> {
        2..=3
    }

    fn infer_shape(&self, inputs: &[&Tensor]) -> Result<Vec<ShapeExpr>, GraphError> {
        let a = self.view(inputs[0], self.trans_a)?;
        let b = self.view(inputs[1], self.trans_b)?;

        let batch = if a.batch == b.batch || is_one(&b.batch) {
            a.batch
        } else if is_one(&a.batch) {
            b.batch
        } else {
            return Err(GraphError::ShapeMismatch {
                op: OpType::Gemm,
                detail: format!("batch {} vs {}", a.batch, b.batch),
            });
        };
        if a.cols != b.rows {
            return Err(GraphError::ShapeMismatch {
                op: OpType::Gemm,
                detail: format!("contraction {} vs {}", a.cols, b.rows),
            });
        }

        let output = ShapeExpr::new(vec![batch, a.rows, b.cols]);
        if let Some(c) = inputs.get(2) {
            if c.shape() != &output {
                return Err(GraphError::ShapeMismatch {
                    op: OpType::Gemm,
                    detail: format!("bias {} vs output {}", c.shape(), output),
                });
            }
        }
        Ok(vec![output])
    }

    fn infer_dtype(&self, inputs: &[&Tensor]) -> Result<Vec<DType>, GraphError> {
        let dtype = inputs[0].dtype();
        for other in &inputs[1..] {
            if other.dtype() != dtype {
                return Err(GraphError::DTypeMismatch {
                    op: OpType::Gemm,
                    lhs: dtype,
                    rhs: other.dtype(),
                });
            }
        }
        Ok(vec![dtype])
    }

    fn native_op(&self) -> NativeOp {
        NativeOp::Gemm
    }

    /// `[Y, op(A), op(B)]`. The bias is copied into Y before launch and is
    /// not a native operand.
    fn native_operands(
        &self,
        inputs: &[&Tensor],
        outputs: &[&Tensor],
    ) -> Result<Vec<NativeOperand>, GraphError> {
        Ok(vec![
            NativeOperand::of(outputs[0])?,
            Self::operand(inputs[0], self.trans_a)?,
            Self::operand(inputs[1], self.trans_b)?,
        ])
    }

    fn attributes(&self) -> String {
        format!(
            "alpha={}, beta={}, transA={}, transB={}",
            self.alpha, self.beta, self.trans_a, self.trans_b
        )
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
