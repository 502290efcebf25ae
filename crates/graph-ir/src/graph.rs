// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The graph container: owner of every tensor and operator.
//!
//! Edges are never stored on their own. When an operator is added,
//! [`Graph::add_operator_and_connect`] derives its predecessor and successor
//! links from the `source` / `targets` of the tensors it touches, so the
//! wiring does not depend on insertion order.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;

use device_rt::DType;
use shape_expr::{Bindings, ShapeExpr, StrideExpr};

use crate::{GraphError, OpId, OpImpl, Operator, Tensor, TensorId};

/// A tensor/operator graph.
#[derive(Debug, Default)]
pub struct Graph {
    tensors: Vec<Tensor>,
    ops: Vec<Operator>,
    sorted: bool,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Tensors ────────────────────────────────────────────────────

    /// Register a new contiguous tensor.
    pub fn add_tensor(
        &mut self,
        shape: impl Into<ShapeExpr>,
        dtype: DType,
    ) -> Result<TensorId, GraphError> {
        self.insert_tensor(Tensor::new(shape, dtype)?)
    }

    pub fn add_tensor_with_stride(
        &mut self,
        shape: impl Into<ShapeExpr>,
        stride: impl Into<StrideExpr>,
        dtype: DType,
    ) -> Result<TensorId, GraphError> {
        self.insert_tensor(Tensor::with_stride(shape, stride, dtype)?)
    }

    /// Register a pre-built tensor.
    pub fn insert_tensor(&mut self, tensor: Tensor) -> Result<TensorId, GraphError> {
        let id = tensor.fuid();
        if self.tensor(id).is_some() {
            return Err(GraphError::DuplicateTensor(id));
        }
        self.tensors.push(tensor);
        Ok(id)
    }

    pub fn insert_tensors(
        &mut self,
        tensors: impl IntoIterator<Item = Tensor>,
    ) -> Result<Vec<TensorId>, GraphError> {
        tensors.into_iter().map(|t| self.insert_tensor(t)).collect()
    }

    pub fn tensor(&self, id: TensorId) -> Option<&Tensor> {
        self.tensors.iter().find(|t| t.fuid() == id)
    }

    pub fn tensor_mut(&mut self, id: TensorId) -> Option<&mut Tensor> {
        self.tensors.iter_mut().find(|t| t.fuid() == id)
    }

    /// Look a tensor up by fuid, failing if it is not in the graph.
    pub fn get_tensor(&self, id: TensorId) -> Result<&Tensor, GraphError> {
        self.tensor(id).ok_or(GraphError::TensorNotFound(id))
    }

    pub fn tensors(&self) -> &[Tensor] {
        &self.tensors
    }

    pub fn tensors_mut(&mut self) -> impl Iterator<Item = &mut Tensor> {
        self.tensors.iter_mut()
    }

    /// Resolve a list of fuids.
    pub fn tensors_of(&self, ids: &[TensorId]) -> Result<Vec<&Tensor>, GraphError> {
        ids.iter().map(|&id| self.get_tensor(id)).collect()
    }

    /// Drop a tensor from the graph. Links held by other entities are left
    /// in place; [`Graph::check_valid`] reports them.
    pub fn remove_tensor(&mut self, id: TensorId) -> Option<Tensor> {
        let pos = self.tensors.iter().position(|t| t.fuid() == id)?;
        Some(self.tensors.remove(pos))
    }

    // ── Operators ──────────────────────────────────────────────────

    /// Add an operator whose outputs are created from the inferred shapes
    /// and dtypes.
    pub fn add_op(&mut self, kind: impl OpImpl, inputs: &[TensorId]) -> Result<OpId, GraphError> {
        check_arity(&kind, "inputs", &kind.input_arity(), inputs.len())?;
        let (shapes, dtypes) = {
            let tensors = self.tensors_of(inputs)?;
            (kind.infer_shape(&tensors)?, kind.infer_dtype(&tensors)?)
        };
        let expected = kind.num_outputs();
        check_arity(&kind, "inferred shapes", &(expected..=expected), shapes.len())?;
        check_arity(&kind, "inferred dtypes", &(expected..=expected), dtypes.len())?;

        let outputs = shapes
            .into_iter()
            .zip(dtypes)
            .map(|(shape, dtype)| self.add_tensor(shape, dtype))
            .collect::<Result<Vec<_>, _>>()?;
        let op = Operator::new(Box::new(kind), inputs.to_vec(), outputs);
        Ok(self.add_operator_and_connect(op))
    }

    /// Add an operator over caller-supplied outputs. Each output's shape
    /// must equal the inferred one exactly.
    pub fn add_op_with_outputs(
        &mut self,
        kind: impl OpImpl,
        inputs: &[TensorId],
        outputs: &[TensorId],
    ) -> Result<OpId, GraphError> {
        check_arity(&kind, "inputs", &kind.input_arity(), inputs.len())?;
        let expected = kind.num_outputs();
        check_arity(&kind, "outputs", &(expected..=expected), outputs.len())?;

        let shapes = kind.infer_shape(&self.tensors_of(inputs)?)?;
        check_arity(&kind, "inferred shapes", &(expected..=expected), shapes.len())?;
        for (index, (id, inferred)) in outputs.iter().zip(&shapes).enumerate() {
            let actual = self.get_tensor(*id)?.shape();
            if actual != inferred {
                return Err(GraphError::OutputShapeMismatch {
                    op: kind.op_type(),
                    index,
                    actual: actual.to_string(),
                    inferred: inferred.to_string(),
                });
            }
        }
        let op = Operator::new(Box::new(kind), inputs.to_vec(), outputs.to_vec());
        Ok(self.add_operator_and_connect(op))
    }

    /// Take ownership of `op` and derive its edges from the tensors it
    /// touches.
    ///
    /// - Each input gains `op` as a target; if the input already has a
    ///   producer, producer and `op` are linked both ways.
    /// - Each output gets `op` as its source; every operator already
    ///   consuming it is linked both ways.
    pub fn add_operator_and_connect(&mut self, mut op: Operator) -> OpId {
        let guid = op.guid();
        let (inputs, outputs) = (op.inputs().to_vec(), op.outputs().to_vec());
        for input in inputs {
            let source = match self.tensor_mut(input) {
                Some(t) => {
                    t.add_target(guid);
                    t.source()
                }
                None => None,
            };
            if let Some(src) = source {
                op.add_predecessor(src);
                if let Some(pred) = self.operator_mut(src) {
                    pred.add_successor(guid);
                }
            }
        }
        for output in outputs {
            let targets = match self.tensor_mut(output) {
                Some(t) => {
                    t.set_source(guid);
                    t.targets().to_vec()
                }
                None => Vec::new(),
            };
            for target in targets {
                op.add_successor(target);
                if let Some(succ) = self.operator_mut(target) {
                    succ.add_predecessor(guid);
                }
            }
        }
        tracing::trace!(op = %guid, kind = %op.op_type(), "connected operator");
        self.ops.push(op);
        self.sorted = false;
        guid
    }

    pub fn operator(&self, id: OpId) -> Option<&Operator> {
        self.ops.iter().find(|op| op.guid() == id)
    }

    fn operator_mut(&mut self, id: OpId) -> Option<&mut Operator> {
        self.ops.iter_mut().find(|op| op.guid() == id)
    }

    pub fn get_operator(&self, id: OpId) -> Result<&Operator, GraphError> {
        self.operator(id).ok_or(GraphError::OperatorNotFound(id))
    }

    /// Operators in their current order (topological after a successful
    /// [`Graph::topo_sort`]).
    pub fn operators(&self) -> &[Operator] {
        &self.ops
    }

    /// Drop an operator from the graph. Links held by other entities are
    /// left in place; [`Graph::check_valid`] reports them.
    pub fn remove_operator(&mut self, id: OpId) -> Option<Operator> {
        let pos = self.ops.iter().position(|op| op.guid() == id)?;
        Some(self.ops.remove(pos))
    }

    pub fn is_sorted(&self) -> bool {
        self.sorted
    }

    // ── Passes ─────────────────────────────────────────────────────

    /// Reorder operators topologically (Kahn's algorithm).
    ///
    /// An operator's in-degree is the number of its inputs produced by an
    /// operator in the graph. On a cycle the order is left unchanged.
    pub fn topo_sort(&mut self) -> Result<(), GraphError> {
        if self.sorted {
            return Ok(());
        }
        let index: HashMap<OpId, usize> = self
            .ops
            .iter()
            .enumerate()
            .map(|(i, op)| (op.guid(), i))
            .collect();

        let mut in_degree: Vec<usize> = self
            .ops
            .iter()
            .map(|op| {
                op.inputs()
                    .iter()
                    .filter_map(|&t| self.tensor(t).and_then(Tensor::source))
                    .filter(|src| index.contains_key(src))
                    .count()
            })
            .collect();

        let mut queue: VecDeque<usize> = (0..self.ops.len()).filter(|&i| in_degree[i] == 0).collect();
        let mut order = Vec::with_capacity(self.ops.len());
        while let Some(i) = queue.pop_front() {
            order.push(i);
            for succ in self.ops[i].successors() {
                if let Some(&j) = index.get(succ) {
                    in_degree[j] = in_degree[j].saturating_sub(1);
                    if in_degree[j] == 0 {
                        queue.push_back(j);
                    }
                }
            }
        }

        if order.len() < self.ops.len() {
            return Err(GraphError::Cycle {
                sorted: order.len(),
                total: self.ops.len(),
            });
        }

        let mut slots: Vec<Option<Operator>> = std::mem::take(&mut self.ops).into_iter().map(Some).collect();
        self.ops = order.into_iter().filter_map(|i| slots[i].take()).collect();
        self.sorted = true;
        tracing::debug!(operators = self.ops.len(), "topologically sorted graph");
        Ok(())
    }

    /// Re-run shape inference over every operator in order, overwriting
    /// output shapes that changed. Strides are not recomputed.
    ///
    /// Returns the fuids of the tensors whose shape changed.
    pub fn shape_infer(&mut self) -> Result<Vec<TensorId>, GraphError> {
        let mut changed = Vec::new();
        for i in 0..self.ops.len() {
            let (shapes, outputs) = {
                let op = &self.ops[i];
                let inputs = self.tensors_of(op.inputs())?;
                (op.kind().infer_shape(&inputs)?, op.outputs().to_vec())
            };
            if shapes.len() != outputs.len() {
                return Err(GraphError::Arity {
                    op: self.ops[i].op_type(),
                    what: "inferred shapes",
                    expected: outputs.len().to_string(),
                    actual: shapes.len(),
                });
            }
            for (id, shape) in outputs.into_iter().zip(shapes) {
                let tensor = self.tensor_mut(id).ok_or(GraphError::TensorNotFound(id))?;
                if tensor.shape() != &shape {
                    tensor.set_shape(shape);
                    changed.push(id);
                }
            }
        }
        Ok(changed)
    }

    /// Bind symbolic dimensions: substitute `bindings` into every shape and
    /// stride, re-run shape inference and reset the strides of outputs
    /// whose shape changed to contiguous.
    pub fn resolve(&mut self, bindings: &Bindings) -> Result<Vec<TensorId>, GraphError> {
        for tensor in &mut self.tensors {
            tensor.substitute(bindings)?;
        }
        let changed = self.shape_infer()?;
        for &id in &changed {
            if let Some(t) = self.tensor_mut(id) {
                t.reset_contiguous_stride();
            }
        }
        tracing::info!(changed = changed.len(), "resolved graph shapes");
        Ok(changed)
    }

    // ── Validation ─────────────────────────────────────────────────

    /// Check structural consistency. Fails on the first violation:
    ///
    /// - a fuid or operator id registered twice;
    /// - a tensor with neither a source nor a target;
    /// - a reference to a tensor or operator missing from the graph;
    /// - tensor and operator links that do not mirror each other.
    pub fn check_valid(&self) -> Result<(), GraphError> {
        let invalid = |msg: String| Err(GraphError::InvalidGraph(msg));

        let mut seen = HashSet::new();
        for t in &self.tensors {
            if !seen.insert(t.fuid()) {
                return invalid(format!("tensor {} registered twice", t.fuid()));
            }
        }
        let mut seen = HashSet::new();
        for op in &self.ops {
            if !seen.insert(op.guid()) {
                return invalid(format!("operator {} registered twice", op.guid()));
            }
        }

        for t in &self.tensors {
            let id = t.fuid();
            if t.source().is_none() && t.targets().is_empty() {
                return invalid(format!("tensor {id} has neither a source nor a target"));
            }
            if let Some(src) = t.source() {
                let Some(op) = self.operator(src) else {
                    return invalid(format!("tensor {id} has missing source operator {src}"));
                };
                if !op.outputs().contains(&id) {
                    return invalid(format!("tensor {id} names {src} as source but is not its output"));
                }
            }
            for &target in t.targets() {
                let Some(op) = self.operator(target) else {
                    return invalid(format!("tensor {id} has missing target operator {target}"));
                };
                if !op.inputs().contains(&id) {
                    return invalid(format!("tensor {id} names {target} as target but is not its input"));
                }
            }
        }

        for op in &self.ops {
            let guid = op.guid();
            for &input in op.inputs() {
                let Some(t) = self.tensor(input) else {
                    return invalid(format!("operator {guid} has missing input tensor {input}"));
                };
                if !t.targets().contains(&guid) {
                    return invalid(format!("input {input} of operator {guid} does not list it as target"));
                }
            }
            for &output in op.outputs() {
                let Some(t) = self.tensor(output) else {
                    return invalid(format!("operator {guid} has missing output tensor {output}"));
                };
                if t.source() != Some(guid) {
                    return invalid(format!("output {output} of operator {guid} has a different source"));
                }
            }
            for &pred in op.predecessors() {
                let Some(p) = self.operator(pred) else {
                    return invalid(format!("operator {guid} has missing predecessor {pred}"));
                };
                if !p.successors().contains(&guid) {
                    return invalid(format!("predecessor {pred} of operator {guid} does not list it as successor"));
                }
            }
            for &succ in op.successors() {
                let Some(s) = self.operator(succ) else {
                    return invalid(format!("operator {guid} has missing successor {succ}"));
                };
                if !s.predecessors().contains(&guid) {
                    return invalid(format!("successor {succ} of operator {guid} does not list it as predecessor"));
                }
            }
        }
        Ok(())
    }

    /// [`Graph::check_valid`], plus: the operators are topologically sorted
    /// and every tensor is concrete.
    pub fn check_before_run(&self) -> Result<(), GraphError> {
        self.check_valid()?;
        if !self.sorted {
            return Err(GraphError::InvalidGraph(
                "operators are not topologically sorted".to_string(),
            ));
        }
        for t in &self.tensors {
            t.concrete_shape()?;
            t.concrete_stride()?;
        }
        Ok(())
    }
}

fn check_arity(
    kind: &dyn OpImpl,
    what: &'static str,
    expected: &std::ops::RangeInclusive<usize>,
    actual: usize,
) -> Result<(), GraphError> {
    if expected.contains(&actual) {
        return Ok(());
    }
    let expected = if expected.start() == expected.end() {
        expected.start().to_string()
    } else {
        format!("{}..={}", expected.start(), expected.end())
    };
    Err(GraphError::Arity {
        op: kind.op_type(),
        what,
        expected,
        actual,
    })
}

impl fmt::Display for Graph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Graph Tensors:")?;
        for t in &self.tensors {
            writeln!(f, "  {t}")?;
        }
        writeln!(f, "Graph Operators:")?;
        for op in &self.ops {
            writeln!(f, "  {op}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::{ElementWise, Gemm, RmsNorm};
    use shape_expr::Expr;

    /// `x -> A -> t1 -> B -> t2 -> C -> t3`, with `c_feeds_a` closing the loop.
    fn chain(reverse: bool) -> (Graph, [OpId; 3]) {
        let mut g = Graph::new();
        let x = g.add_tensor([4], DType::F32).unwrap();
        let t1 = g.add_tensor([4], DType::F32).unwrap();
        let t2 = g.add_tensor([4], DType::F32).unwrap();
        let t3 = g.add_tensor([4], DType::F32).unwrap();
        let steps = [(x, t1), (t1, t2), (t2, t3)];
        let mut ids = [None; 3];
        let order: Vec<usize> = if reverse { vec![2, 1, 0] } else { vec![0, 1, 2] };
        for i in order {
            let (input, output) = steps[i];
            ids[i] = Some(
                g.add_op_with_outputs(ElementWise::add(), &[input, x], &[output])
                    .unwrap(),
            );
        }
        (g, ids.map(|id| id.unwrap()))
    }

    fn order(g: &Graph) -> Vec<OpId> {
        g.operators().iter().map(Operator::guid).collect()
    }

    #[test]
    fn test_add_op_creates_outputs() {
        let mut g = Graph::new();
        let a = g.add_tensor([3, 1], DType::F32).unwrap();
        let b = g.add_tensor([2, 3, 4], DType::F32).unwrap();
        let id = g.add_op(ElementWise::add(), &[a, b]).unwrap();
        let op = g.operator(id).unwrap();
        let y = g.get_tensor(op.output(0).unwrap()).unwrap();
        assert_eq!(y.shape(), &ShapeExpr::from([2, 3, 4]));
        assert_eq!(y.source(), Some(id));
        assert_eq!(g.get_tensor(a).unwrap().targets(), &[id]);
        assert_eq!(g.tensors().len(), 3);
        g.check_valid().unwrap();
    }

    #[test]
    fn test_arity_checked() {
        let mut g = Graph::new();
        let a = g.add_tensor([2], DType::F32).unwrap();
        assert!(matches!(
            g.add_op(ElementWise::add(), &[a]),
            Err(GraphError::Arity { what: "inputs", actual: 1, .. })
        ));
        let b = g.add_tensor([2], DType::F32).unwrap();
        assert!(matches!(
            g.add_op_with_outputs(ElementWise::add(), &[a, b], &[]),
            Err(GraphError::Arity { what: "outputs", .. })
        ));
    }

    #[test]
    fn test_add_op_with_outputs_verifies_shape() {
        let mut g = Graph::new();
        let a = g.add_tensor([2, 3], DType::F32).unwrap();
        let b = g.add_tensor([3, 4], DType::F32).unwrap();
        let wrong = g.add_tensor([2, 4], DType::F32).unwrap();
        assert!(matches!(
            g.add_op_with_outputs(Gemm::default(), &[a, b], &[wrong]),
            Err(GraphError::OutputShapeMismatch { index: 0, .. })
        ));
        let right = g.add_tensor([1, 2, 4], DType::F32).unwrap();
        g.add_op_with_outputs(Gemm::default(), &[a, b], &[right])
            .unwrap();
    }

    #[test]
    fn test_wiring_is_order_independent() {
        for reverse in [false, true] {
            let (g, [a, b, c]) = chain(reverse);
            assert_eq!(g.get_operator(b).unwrap().predecessors(), &[a]);
            assert_eq!(g.get_operator(b).unwrap().successors(), &[c]);
            assert_eq!(g.get_operator(a).unwrap().successors(), &[b]);
            assert!(g.get_operator(a).unwrap().predecessors().is_empty());
            g.check_valid().unwrap();
        }
    }

    #[test]
    fn test_topo_sort_chain() {
        let (mut g, [a, b, c]) = chain(true);
        assert_eq!(order(&g), vec![c, b, a]);
        g.topo_sort().unwrap();
        assert!(g.is_sorted());
        assert_eq!(order(&g), vec![a, b, c]);
    }

    #[test]
    fn test_topo_sort_cycle_leaves_order() {
        let mut g = Graph::new();
        let x = g.add_tensor([4], DType::F32).unwrap();
        let t1 = g.add_tensor([4], DType::F32).unwrap();
        let t2 = g.add_tensor([4], DType::F32).unwrap();
        let t3 = g.add_tensor([4], DType::F32).unwrap();
        // C's output feeds A.
        let a = g.add_op_with_outputs(ElementWise::add(), &[t3, x], &[t1]).unwrap();
        let b = g.add_op_with_outputs(ElementWise::add(), &[t1, x], &[t2]).unwrap();
        let c = g.add_op_with_outputs(ElementWise::add(), &[t2, x], &[t3]).unwrap();

        let before = order(&g);
        assert_eq!(before, vec![a, b, c]);
        assert!(matches!(
            g.topo_sort(),
            Err(GraphError::Cycle { sorted: 0, total: 3 })
        ));
        assert_eq!(order(&g), before);
        assert!(!g.is_sorted());
    }

    #[test]
    fn test_shape_infer_broadcast() {
        let mut g = Graph::new();
        let a = g.add_tensor([3, 1], DType::F32).unwrap();
        let b = g.add_tensor([2, 3, 4], DType::F32).unwrap();
        let y = g.add_tensor([1], DType::F32).unwrap();
        // Bypass verification by wiring a pre-built operator by hand.
        let op = Operator::new(Box::new(ElementWise::add()), vec![a, b], vec![y]);
        g.add_operator_and_connect(op);

        let changed = g.shape_infer().unwrap();
        assert_eq!(changed, vec![y]);
        let t = g.get_tensor(y).unwrap();
        assert_eq!(t.shape(), &ShapeExpr::from([2, 3, 4]));
        // Stride is the caller's job.
        assert_eq!(t.stride(), &StrideExpr::from([1]));
        assert!(g.shape_infer().unwrap().is_empty());
    }

    #[test]
    fn test_resolve_binds_and_propagates() {
        let mut g = Graph::new();
        let n = Expr::var("n");
        let x = g
            .add_tensor([n.clone(), Expr::constant(8)], DType::F32)
            .unwrap();
        let w = g.add_tensor([8], DType::F32).unwrap();
        let norm = g.add_op(RmsNorm::default(), &[x, w]).unwrap();
        let y = g.get_operator(norm).unwrap().output(0).unwrap();
        assert!(!g.get_tensor(y).unwrap().is_concrete());

        let mut env = Bindings::new();
        env.insert("n".into(), 5);
        g.resolve(&env).unwrap();
        let t = g.get_tensor(y).unwrap();
        assert_eq!(t.shape(), &ShapeExpr::from([5, 8]));
        assert_eq!(t.stride(), &StrideExpr::from([8, 1]));
        g.topo_sort().unwrap();
        g.check_before_run().unwrap();
    }

    #[test]
    fn test_check_before_run_requirements() {
        let mut g = Graph::new();
        let a = g.add_tensor([Expr::var("n")], DType::F32).unwrap();
        let b = g.add_tensor([Expr::var("n")], DType::F32).unwrap();
        g.add_op(ElementWise::mul(), &[a, b]).unwrap();
        g.check_valid().unwrap();
        assert!(matches!(
            g.check_before_run(),
            Err(GraphError::InvalidGraph(_))
        ));
        g.topo_sort().unwrap();
        assert!(matches!(
            g.check_before_run(),
            Err(GraphError::NotConcrete { .. })
        ));
    }

    #[test]
    fn test_check_valid_isolated_tensor() {
        let mut g = Graph::new();
        g.add_tensor([2], DType::F32).unwrap();
        assert!(matches!(g.check_valid(), Err(GraphError::InvalidGraph(_))));
    }

    #[test]
    fn test_removal_leaves_dangling_links() {
        let (mut g, [a, b, _]) = chain(false);
        let removed = g.remove_operator(a).unwrap();
        assert_eq!(removed.guid(), a);
        // B still names A as predecessor.
        assert_eq!(g.get_operator(b).unwrap().predecessors(), &[a]);
        let err = g.check_valid().unwrap_err();
        assert!(err.to_string().contains("missing"));

        let (mut g, [_, b, _]) = chain(false);
        let t2 = g.get_operator(b).unwrap().output(0).unwrap();
        assert!(g.remove_tensor(t2).is_some());
        assert!(g.remove_tensor(t2).is_none());
        assert!(g.check_valid().is_err());
    }

    #[test]
    fn test_insert_prebuilt_tensors() {
        let mut g = Graph::new();
        let t = Tensor::new([2], DType::F32).unwrap();
        let u = Tensor::with_stride([2, 2], [1, 2], DType::F64).unwrap();
        let (tid, uid) = (t.fuid(), u.fuid());
        assert_eq!(g.insert_tensors(vec![t, u]).unwrap(), vec![tid, uid]);
        assert_eq!(g.get_tensor(uid).unwrap().stride(), &StrideExpr::from([1, 2]));
        assert!(matches!(
            g.get_tensor(TensorId::from_raw(u64::MAX)),
            Err(GraphError::TensorNotFound(_))
        ));
    }

    #[test]
    fn test_shared_input_counts_twice() {
        let mut g = Graph::new();
        let x = g.add_tensor([2], DType::F32).unwrap();
        let one = g.add_tensor([2], DType::F32).unwrap();
        let a = g.add_op(ElementWise::add(), &[x, one]).unwrap();
        let h = g.get_operator(a).unwrap().output(0).unwrap();
        let b = g.add_op(ElementWise::mul(), &[h, h]).unwrap();
        assert_eq!(g.get_operator(b).unwrap().predecessors(), &[a, a]);
        assert_eq!(g.get_tensor(h).unwrap().targets(), &[b, b]);
        g.check_valid().unwrap();
        g.topo_sort().unwrap();
        assert_eq!(order(&g), vec![a, b]);
    }

    #[test]
    fn test_display_lists_everything() {
        let mut g = Graph::new();
        let a = g.add_tensor([2, 3], DType::F32).unwrap();
        let b = g.add_tensor([3, 4], DType::F32).unwrap();
        g.add_op(Gemm::default(), &[a, b]).unwrap();
        let s = g.to_string();
        assert!(s.starts_with("Graph Tensors:"));
        assert!(s.contains("Graph Operators:"));
        assert!(s.contains("shape [1, 2, 4]"));
        assert!(s.contains("Gemm["));
    }
}
