// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Typed graph-construction surface.
//!
//! Every operator method takes an optional output. With `Some(y)` the
//! operator is attached to the existing tensor and its shape is verified;
//! with `None` the output is created from the inferred shape. Either way the
//! output fuid is returned.

use std::fmt;

use device_rt::DType;
use shape_expr::{ShapeExpr, StrideExpr};

use crate::ops::{ElementWise, Gemm, RmsNorm};
use crate::{Graph, GraphError, OpImpl, OpType, TensorId};

#[derive(Debug, Default)]
pub struct GraphBuilder {
    graph: Graph,
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tensor(
        &mut self,
        shape: impl Into<ShapeExpr>,
        dtype: DType,
    ) -> Result<TensorId, GraphError> {
        self.graph.add_tensor(shape, dtype)
    }

    pub fn tensor_with_stride(
        &mut self,
        shape: impl Into<ShapeExpr>,
        stride: impl Into<StrideExpr>,
        dtype: DType,
    ) -> Result<TensorId, GraphError> {
        self.graph.add_tensor_with_stride(shape, stride, dtype)
    }

    pub fn add(
        &mut self,
        a: TensorId,
        b: TensorId,
        y: Option<TensorId>,
    ) -> Result<TensorId, GraphError> {
        self.push(ElementWise::new(OpType::Add)?, &[a, b], y)
    }

    pub fn sub(
        &mut self,
        a: TensorId,
        b: TensorId,
        y: Option<TensorId>,
    ) -> Result<TensorId, GraphError> {
        self.push(ElementWise::new(OpType::Sub)?, &[a, b], y)
    }

    pub fn mul(
        &mut self,
        a: TensorId,
        b: TensorId,
        y: Option<TensorId>,
    ) -> Result<TensorId, GraphError> {
        self.push(ElementWise::new(OpType::Mul)?, &[a, b], y)
    }

    /// `y = a @ b (+ c)` with `alpha = beta = 1` and no transposition.
    pub fn gemm(
        &mut self,
        a: TensorId,
        b: TensorId,
        c: Option<TensorId>,
        y: Option<TensorId>,
    ) -> Result<TensorId, GraphError> {
        self.gemm_with(a, b, c, y, Gemm::default())
    }

    pub fn gemm_with(
        &mut self,
        a: TensorId,
        b: TensorId,
        c: Option<TensorId>,
        y: Option<TensorId>,
        gemm: Gemm,
    ) -> Result<TensorId, GraphError> {
        match c {
            Some(c) => self.push(gemm, &[a, b, c], y),
            None => self.push(gemm, &[a, b], y),
        }
    }

    pub fn rms_norm(
        &mut self,
        x: TensorId,
        w: TensorId,
        epsilon: f32,
        y: Option<TensorId>,
    ) -> Result<TensorId, GraphError> {
        self.push(RmsNorm::new(epsilon), &[x, w], y)
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn graph_mut(&mut self) -> &mut Graph {
        &mut self.graph
    }

    pub fn into_graph(self) -> Graph {
        self.graph
    }

    fn push(
        &mut self,
        kind: impl OpImpl,
        inputs: &[TensorId],
        y: Option<TensorId>,
    ) -> Result<TensorId, GraphError> {
        match y {
            Some(y) => {
                self.graph.add_op_with_outputs(kind, inputs, &[y])?;
                Ok(y)
            }
            None => {
                let op_type = kind.op_type();
                let id = self.graph.add_op(kind, inputs)?;
                self.graph
                    .get_operator(id)?
                    .output(0)
                    .ok_or_else(|| GraphError::Arity {
                        op: op_type,
                        what: "outputs",
                        expected: "1".to_string(),
                        actual: 0,
                    })
            }
        }
    }
}

impl From<Graph> for GraphBuilder {
    fn from(graph: Graph) -> Self {
        Self { graph }
    }
}

impl fmt::Display for GraphBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.graph.fmt(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chain_of_ops() {
        let mut b = GraphBuilder::new();
        let x = b.tensor([2, 3], DType::F32).unwrap();
        let w = b.tensor([3, 4], DType::F32).unwrap();
        let bias = b.tensor([1, 2, 4], DType::F32).unwrap();
        let h = b.gemm(x, w, Some(bias), None).unwrap();
        let g = b.tensor([4], DType::F32).unwrap();
        let y = b.rms_norm(h, g, 1e-6, None).unwrap();
        let z = b.add(y, h, None).unwrap();

        let graph = b.into_graph();
        assert_eq!(graph.operators().len(), 3);
        assert_eq!(graph.get_tensor(z).unwrap().shape(), &ShapeExpr::from([1, 2, 4]));
        graph.check_valid().unwrap();
    }

    #[test]
    fn test_explicit_output() {
        let mut b = GraphBuilder::new();
        let x = b.tensor([2, 2], DType::F64).unwrap();
        let y = b.tensor([2, 2], DType::F64).unwrap();
        assert_eq!(b.mul(x, x, Some(y)).unwrap(), y);
        let bad = b.tensor([4], DType::F64).unwrap();
        assert!(matches!(
            b.sub(x, x, Some(bad)),
            Err(GraphError::OutputShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_gemm_with_transposes() {
        let mut b = GraphBuilder::new();
        let a = b.tensor([3, 2], DType::F32).unwrap();
        let w = b.tensor([4, 3], DType::F32).unwrap();
        let y = b
            .gemm_with(a, w, None, None, Gemm::new(0.5, 0.0, true, true))
            .unwrap();
        assert_eq!(b.graph().get_tensor(y).unwrap().shape(), &ShapeExpr::from([1, 2, 4]));
        assert!(b.to_string().contains("transA=true"));
    }
}
