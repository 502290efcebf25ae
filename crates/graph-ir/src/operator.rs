// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Operators: the polymorphic op-kind contract and the graph node that
//! carries it.
//!
//! Each operator kind implements [`OpImpl`] (shape and dtype inference plus
//! the mapping onto a [`NativeOp`]). An [`Operator`] wraps one boxed kind
//! together with its tensor lists and its derived predecessor/successor
//! edges, and lazily owns the native descriptor built for it.

use std::any::Any;
use std::fmt;
use std::ops::RangeInclusive;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use device_rt::{native_call, DType, DeviceKind, NativeOp, OpDesc, OpHandle, OpLibrary, TensorDesc};
use serde::{Deserialize, Serialize};
use shape_expr::ShapeExpr;

use crate::{Graph, GraphError, Tensor, TensorId};

static NEXT_OP_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique operator identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OpId(u64);

impl OpId {
    fn fresh() -> Self {
        Self(NEXT_OP_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Rebuild an id from [`Self::as_u64`].
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for OpId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Operator kind tag, the second half of a kernel registry key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum OpType {
    Add,
    Gemm,
    Mul,
    Sub,
    RMSNorm,
}

impl OpType {
    pub const ALL: [OpType; 5] = [
        OpType::Add,
        OpType::Gemm,
        OpType::Mul,
        OpType::Sub,
        OpType::RMSNorm,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            OpType::Add => "Add",
            OpType::Gemm => "Gemm",
            OpType::Mul => "Mul",
            OpType::Sub => "Sub",
            OpType::RMSNorm => "RMSNorm",
        }
    }
}

impl fmt::Display for OpType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Concrete layout of one operand handed to the native library.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeOperand {
    pub shape: Vec<usize>,
    pub strides: Vec<isize>,
    pub dtype: DType,
}

impl NativeOperand {
    /// The tensor's own concrete layout.
    pub fn of(tensor: &Tensor) -> Result<Self, GraphError> {
        Ok(Self {
            shape: tensor.concrete_shape()?,
            strides: tensor.concrete_stride()?,
            dtype: tensor.dtype(),
        })
    }
}

/// Behaviour of one operator kind.
pub trait OpImpl: fmt::Debug + Send + Sync + 'static {
    fn op_type(&self) -> OpType;

    /// Accepted number of inputs.
    fn input_arity(&self) -> RangeInclusive<usize>;

    fn num_outputs(&self) -> usize {
        1
    }

    /// One shape per output.
    fn infer_shape(&self, inputs: &[&Tensor]) -> Result<Vec<ShapeExpr>, GraphError>;

    /// One dtype per output.
    fn infer_dtype(&self, inputs: &[&Tensor]) -> Result<Vec<DType>, GraphError>;

    /// The native operator and its creation-time hyperparameters.
    fn native_op(&self) -> NativeOp;

    /// Operand layouts for the native descriptor, outputs first. All
    /// tensors must be concrete.
    fn native_operands(
        &self,
        inputs: &[&Tensor],
        outputs: &[&Tensor],
    ) -> Result<Vec<NativeOperand>, GraphError>;

    /// Kind-specific attributes for `Display`; empty when there are none.
    fn attributes(&self) -> String {
        String::new()
    }

    fn as_any(&self) -> &dyn Any;
}

/// A native op descriptor and the handle it was created from. Both are
/// destroyed on drop.
struct OpDescriptor {
    library: Arc<dyn OpLibrary>,
    handle: OpHandle,
    desc: OpDesc,
    device: (DeviceKind, usize),
}

impl Drop for OpDescriptor {
    fn drop(&mut self) {
        if let Err(e) = native_call!(self.library.destroy_op_descriptor(self.desc)) {
            tracing::warn!(error = %e, "failed to destroy op descriptor");
        }
        if let Err(e) = native_call!(self.library.destroy_handle(self.handle)) {
            tracing::warn!(error = %e, "failed to destroy op handle");
        }
    }
}

/// A graph node.
pub struct Operator {
    guid: OpId,
    kind: Box<dyn OpImpl>,
    inputs: Vec<TensorId>,
    outputs: Vec<TensorId>,
    predecessors: Vec<OpId>,
    successors: Vec<OpId>,
    descriptor: Mutex<Option<OpDescriptor>>,
}

impl Operator {
    pub(crate) fn new(kind: Box<dyn OpImpl>, inputs: Vec<TensorId>, outputs: Vec<TensorId>) -> Self {
        Self {
            guid: OpId::fresh(),
            kind,
            inputs,
            outputs,
            predecessors: Vec::new(),
            successors: Vec::new(),
            descriptor: Mutex::new(None),
        }
    }

    pub fn guid(&self) -> OpId {
        self.guid
    }

    pub fn op_type(&self) -> OpType {
        self.kind.op_type()
    }

    pub fn kind(&self) -> &dyn OpImpl {
        self.kind.as_ref()
    }

    /// The operator kind as a concrete type, e.g. `op.downcast_ref::<Gemm>()`.
    pub fn downcast_ref<T: OpImpl>(&self) -> Option<&T> {
        self.kind.as_any().downcast_ref::<T>()
    }

    pub fn inputs(&self) -> &[TensorId] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[TensorId] {
        &self.outputs
    }

    pub fn input(&self, i: usize) -> Option<TensorId> {
        self.inputs.get(i).copied()
    }

    pub fn output(&self, i: usize) -> Option<TensorId> {
        self.outputs.get(i).copied()
    }

    pub fn predecessors(&self) -> &[OpId] {
        &self.predecessors
    }

    pub fn successors(&self) -> &[OpId] {
        &self.successors
    }

    pub(crate) fn add_predecessor(&mut self, op: OpId) {
        self.predecessors.push(op);
    }

    pub(crate) fn add_successor(&mut self, op: OpId) {
        self.successors.push(op);
    }

    /// Build (or reuse) the native descriptor for `device`.
    ///
    /// Repeated calls for the same device and library return the same
    /// descriptor. A different device or library replaces it.
    pub fn create_op_desc(
        &self,
        graph: &Graph,
        library: &Arc<dyn OpLibrary>,
        device: DeviceKind,
        device_id: usize,
    ) -> Result<OpDesc, GraphError> {
        let mut slot = self.lock_descriptor();
        if let Some(existing) = slot.as_ref() {
            if existing.device == (device, device_id) && same_library(&existing.library, library) {
                return Ok(existing.desc);
            }
        }
        // Release a stale descriptor before building its replacement.
        *slot = None;

        let inputs = graph.tensors_of(&self.inputs)?;
        let outputs = graph.tensors_of(&self.outputs)?;
        let operands = self.kind.native_operands(&inputs, &outputs)?;
        let native = self.kind.native_op();

        let handle = native_call!(library.create_handle(device, device_id))?;
        let desc = match build_descriptor(library.as_ref(), handle, native, &operands) {
            Ok(desc) => desc,
            Err(e) => {
                if let Err(cleanup) = native_call!(library.destroy_handle(handle)) {
                    tracing::warn!(error = %cleanup, "failed to destroy op handle");
                }
                return Err(e);
            }
        };
        tracing::debug!(op = %self.guid, kind = %self.op_type(), %device, "created op descriptor");
        *slot = Some(OpDescriptor {
            library: Arc::clone(library),
            handle,
            desc,
            device: (device, device_id),
        });
        Ok(desc)
    }

    /// The current native descriptor, if one was built.
    pub fn op_desc(&self) -> Option<OpDesc> {
        self.lock_descriptor().as_ref().map(|d| d.desc)
    }

    /// Destroy the native descriptor now instead of on drop.
    pub fn release_op_desc(&self) {
        *self.lock_descriptor() = None;
    }

    fn lock_descriptor(&self) -> MutexGuard<'_, Option<OpDescriptor>> {
        // The slot holds no invariant a panicking holder could break.
        self.descriptor
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn same_library(a: &Arc<dyn OpLibrary>, b: &Arc<dyn OpLibrary>) -> bool {
    Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
}

/// Create the operand descriptors, compile the op descriptor, then destroy
/// the operand descriptors whatever the outcome.
fn build_descriptor(
    library: &dyn OpLibrary,
    handle: OpHandle,
    native: NativeOp,
    operands: &[NativeOperand],
) -> Result<OpDesc, GraphError> {
    let mut descs: Vec<TensorDesc> = Vec::with_capacity(operands.len());
    let mut created = Ok(());
    for o in operands {
        match native_call!(library.create_tensor_descriptor(&o.shape, &o.strides, o.dtype)) {
            Ok(d) => descs.push(d),
            Err(e) => {
                created = Err(e);
                break;
            }
        }
    }
    let op_desc = created.and_then(|()| native_call!(library.create_op_descriptor(handle, native, &descs)));
    for d in descs {
        if let Err(e) = native_call!(library.destroy_tensor_descriptor(d)) {
            tracing::warn!(error = %e, "failed to destroy tensor descriptor");
        }
    }
    Ok(op_desc?)
}

impl fmt::Debug for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Operator")
            .field("guid", &self.guid)
            .field("kind", &self.kind)
            .field("inputs", &self.inputs)
            .field("outputs", &self.outputs)
            .field("predecessors", &self.predecessors)
            .field("successors", &self.successors)
            .finish()
    }
}

fn write_ids<T: fmt::Display>(f: &mut fmt::Formatter<'_>, ids: &[T]) -> fmt::Result {
    write!(f, "[")?;
    for (i, id) in ids.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{id}")?;
    }
    write!(f, "]")
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.op_type(), self.guid)?;
        let attrs = self.kind.attributes();
        if !attrs.is_empty() {
            write!(f, "({attrs})")?;
        }
        write!(f, " inputs ")?;
        write_ids(f, &self.inputs)?;
        write!(f, " outputs ")?;
        write_ids(f, &self.outputs)?;
        write!(f, " pred ")?;
        write_ids(f, &self.predecessors)?;
        write!(f, " succ ")?;
        write_ids(f, &self.successors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::{ElementWise, Gemm};
    use device_rt::host::host_backend;

    #[test]
    fn test_op_type_names() {
        assert_eq!(OpType::RMSNorm.to_string(), "RMSNorm");
        assert_eq!(OpType::ALL.len(), 5);
        let json = serde_json::to_string(&OpType::Gemm).unwrap();
        assert_eq!(serde_json::from_str::<OpType>(&json).unwrap(), OpType::Gemm);
    }

    #[test]
    fn test_downcast() {
        let mut g = Graph::new();
        let a = g.add_tensor([2, 3], DType::F32).unwrap();
        let b = g.add_tensor([3, 4], DType::F32).unwrap();
        let op = g.add_op(Gemm::default(), &[a, b]).unwrap();
        let op = g.operator(op).unwrap();
        assert!(op.downcast_ref::<Gemm>().is_some());
        assert!(op.downcast_ref::<ElementWise>().is_none());
    }

    #[test]
    fn test_create_op_desc_is_idempotent() {
        let (_dev, lib) = host_backend(&[DeviceKind::Nvidia]);
        let library: Arc<dyn OpLibrary> = lib.clone();
        let mut g = Graph::new();
        let a = g.add_tensor([2, 3], DType::F32).unwrap();
        let b = g.add_tensor([2, 3], DType::F32).unwrap();
        let id = g.add_op(ElementWise::new(OpType::Add).unwrap(), &[a, b]).unwrap();
        let op = g.operator(id).unwrap();

        let first = op.create_op_desc(&g, &library, DeviceKind::Cpu, 0).unwrap();
        let again = op.create_op_desc(&g, &library, DeviceKind::Cpu, 0).unwrap();
        assert_eq!(first, again);
        // One handle and one op descriptor; operand descriptors are gone.
        assert_eq!(lib.live_descriptors(), (1, 0, 1));

        let other = op.create_op_desc(&g, &library, DeviceKind::Nvidia, 0).unwrap();
        assert_ne!(first, other);
        assert_eq!(lib.live_descriptors(), (1, 0, 1));

        op.release_op_desc();
        assert_eq!(op.op_desc(), None);
        assert_eq!(lib.live_descriptors(), (0, 0, 0));
    }

    #[test]
    fn test_failed_descriptor_cleans_up() {
        let (_dev, lib) = host_backend(&[]);
        let library: Arc<dyn OpLibrary> = lib.clone();
        let mut g = Graph::new();
        // I32 is rejected by the host library at op-descriptor creation.
        let a = g.add_tensor([2], DType::I32).unwrap();
        let b = g.add_tensor([2], DType::I32).unwrap();
        let id = g.add_op(ElementWise::new(OpType::Mul).unwrap(), &[a, b]).unwrap();
        let err = g
            .operator(id)
            .unwrap()
            .create_op_desc(&g, &library, DeviceKind::Cpu, 0)
            .unwrap_err();
        assert!(matches!(err, GraphError::Device(_)));
        assert_eq!(lib.live_descriptors(), (0, 0, 0));
    }

    #[test]
    fn test_descriptor_dropped_with_graph() {
        let (_dev, lib) = host_backend(&[]);
        let library: Arc<dyn OpLibrary> = lib.clone();
        {
            let mut g = Graph::new();
            let a = g.add_tensor([4], DType::F64).unwrap();
            let b = g.add_tensor([4], DType::F64).unwrap();
            let id = g.add_op(ElementWise::new(OpType::Sub).unwrap(), &[a, b]).unwrap();
            g.operator(id)
                .unwrap()
                .create_op_desc(&g, &library, DeviceKind::Cpu, 0)
                .unwrap();
            assert_eq!(lib.live_descriptors(), (1, 0, 1));
        }
        assert_eq!(lib.live_descriptors(), (0, 0, 0));
    }

    #[test]
    fn test_display() {
        let mut g = Graph::new();
        let a = g.add_tensor([2], DType::F32).unwrap();
        let b = g.add_tensor([2], DType::F32).unwrap();
        let id = g.add_op(ElementWise::new(OpType::Add).unwrap(), &[a, b]).unwrap();
        let s = g.operator(id).unwrap().to_string();
        assert!(s.starts_with(&format!("Add[{id}]")));
        assert!(s.contains(&format!("inputs [{a}, {b}]")));
    }
}
