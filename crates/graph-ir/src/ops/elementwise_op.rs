// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Broadcasting binary element-wise operators.

use std::any::Any;
use std::ops::RangeInclusive;

use device_rt::{DType, NativeOp};
use serde::{Deserialize, Serialize};
use shape_expr::{broadcast_stride, infer_broadcast, ShapeExpr};

use crate::{GraphError, NativeOperand, OpImpl, OpType, Tensor};

/// `y = a (op) b` with NumPy-style broadcasting of `a` and `b`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElementWise {
    op_type: OpType,
}

impl ElementWise {
    /// Element-wise operator of kind `op_type` (Add, Sub or Mul).
    pub fn new(op_type: OpType) -> Result<Self, GraphError> {
        match op_type {
            OpType::Add | OpType::Sub | OpType::Mul => Ok(Self { op_type }),
            other => Err(GraphError::UnsupportedOp(other)),
        }
    }

    pub fn add() -> Self {
        Self { op_type: OpType::Add }
    }

    pub fn sub() -> Self {
        Self { op_type: OpType::Sub }
    }

    pub fn mul() -> Self {
        Self { op_type: OpType::Mul }
    }
}

impl OpImpl for ElementWise {
    fn op_type(&self) -> OpType {
        self.op_type
    }

    fn input_arity(&self) -> RangeInclusive<usize> {
        2..=2
    }

    fn infer_shape(&self, inputs: &[&Tensor]) -> Result<Vec<ShapeExpr>, GraphError> {
        let shape = infer_broadcast(inputs[0].shape(), inputs[1].shape()).map_err(|e| {
            GraphError::ShapeMismatch {
                op: self.op_type,
                detail: e.to_string(),
            }
        })?;
        Ok(vec![shape])
    }

    fn infer_dtype(&self, inputs: &[&Tensor]) -> Result<Vec<DType>, GraphError> {
        let (lhs, rhs) = (inputs[0].dtype(), inputs[1].dtype());
        if lhs != rhs {
            return Err(GraphError::DTypeMismatch {
                op: self.op_type,
                lhs,
                rhs,
            });
        }
        Ok(vec![lhs])
    }

    fn native_op(&self) -> NativeOp {
        match self.op_type {
            OpType::Sub => NativeOp::Sub,
            OpType::Mul => NativeOp::Mul,
            _ => NativeOp::Add,
        }
    }

    fn native_operands(
        &self,
        inputs: &[&Tensor],
        outputs: &[&Tensor],
    ) -> Result<Vec<NativeOperand>, GraphError> {
        let y = NativeOperand::of(outputs[0])?;
        let mut operands = Vec::with_capacity(3);
        for input in inputs {
            // Each input is read through y's shape with broadcast strides.
            let stride = broadcast_stride(input.shape(), input.stride(), y.shape.len())?;
            let strides = stride.constant_value().map_err(|_| GraphError::NotConcrete {
                tensor: input.fuid(),
                what: "stride",
                value: stride.to_string(),
            })?;
            operands.push(NativeOperand {
                shape: y.shape.clone(),
                strides,
                dtype: input.dtype(),
            });
        }
        operands.insert(0, y);
        Ok(operands)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shape_expr::Expr;

    #[test]
    fn test_new_rejects_other_kinds() {
        assert!(ElementWise::new(OpType::Mul).is_ok());
        assert!(matches!(
            ElementWise::new(OpType::Gemm),
            Err(GraphError::UnsupportedOp(OpType::Gemm))
        ));
    }

    #[test]
    fn test_infer_shape_broadcasts() {
        let a = Tensor::new([3, 1], DType::F32).unwrap();
        let b = Tensor::new([2, 3, 4], DType::F32).unwrap();
        let shapes = ElementWise::add().infer_shape(&[&a, &b]).unwrap();
        assert_eq!(shapes, vec![ShapeExpr::from([2, 3, 4])]);
    }

    #[test]
    fn test_infer_shape_symbolic() {
        let n = Expr::var("n");
        let a = Tensor::new([n.clone(), Expr::constant(4)], DType::F32).unwrap();
        let b = Tensor::new([4], DType::F32).unwrap();
        let shapes = ElementWise::mul().infer_shape(&[&a, &b]).unwrap();
        assert_eq!(shapes[0], ShapeExpr::new(vec![n, Expr::constant(4)]));
    }

    #[test]
    fn test_infer_shape_mismatch() {
        let a = Tensor::new([2, 3], DType::F32).unwrap();
        let b = Tensor::new([4], DType::F32).unwrap();
        assert!(matches!(
            ElementWise::sub().infer_shape(&[&a, &b]),
            Err(GraphError::ShapeMismatch { op: OpType::Sub, .. })
        ));
    }

    #[test]
    fn test_dtype_mismatch() {
        let a = Tensor::new([2], DType::F32).unwrap();
        let b = Tensor::new([2], DType::F64).unwrap();
        assert!(matches!(
            ElementWise::add().infer_dtype(&[&a, &b]),
            Err(GraphError::DTypeMismatch { .. })
        ));
    }

    #[test]
    fn test_native_operands_use_broadcast_strides() {
        let a = Tensor::new([3, 1], DType::F32).unwrap();
        let b = Tensor::new([2, 3, 4], DType::F32).unwrap();
        let y = Tensor::new([2, 3, 4], DType::F32).unwrap();
        let ops = ElementWise::add().native_operands(&[&a, &b], &[&y]).unwrap();
        assert_eq!(ops.len(), 3);
        assert_eq!(ops[0].strides, vec![12, 4, 1]);
        assert_eq!(ops[1].shape, vec![2, 3, 4]);
        assert_eq!(ops[1].strides, vec![0, 1, 0]);
        assert_eq!(ops[2].strides, vec![12, 4, 1]);
    }
}
