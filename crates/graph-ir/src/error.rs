// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Error types for graph construction and validation.

use device_rt::{DType, DeviceError, DeviceKind};
use shape_expr::ShapeError;

use crate::{OpId, OpType, TensorId};

/// Errors raised while building, transforming or validating a graph.
#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    /// Shape algebra failed (bad index, broadcast mismatch, ...).
    #[error(transparent)]
    Shape(#[from] ShapeError),

    /// A native call failed while building or releasing a descriptor.
    #[error(transparent)]
    Device(#[from] DeviceError),

    /// A concrete tensor axis is zero or negative.
    #[error("invalid dimension {value} at axis {axis} of shape {shape}")]
    InvalidDimension {
        axis: usize,
        value: i64,
        shape: String,
    },

    /// Shape and stride ranks differ.
    #[error("shape {shape} and stride {stride} have different ranks")]
    RankMismatch { shape: String, stride: String },

    /// A value that must be concrete still contains variables.
    #[error("{what} of tensor {tensor} is not concrete: {value}")]
    NotConcrete {
        tensor: TensorId,
        what: &'static str,
        value: String,
    },

    /// Operand dtypes disagree.
    #[error("{op}: dtype mismatch, {lhs} vs {rhs}")]
    DTypeMismatch {
        op: OpType,
        lhs: DType,
        rhs: DType,
    },

    /// Operand shapes are incompatible for the operator.
    #[error("{op}: incompatible shapes, {detail}")]
    ShapeMismatch { op: OpType, detail: String },

    /// The operator kind cannot be built by this constructor.
    #[error("unsupported operator kind {0}")]
    UnsupportedOp(OpType),

    /// Wrong number of inputs or outputs for the operator.
    #[error("{op}: expected {expected} {what}, got {actual}")]
    Arity {
        op: OpType,
        what: &'static str,
        expected: String,
        actual: usize,
    },

    /// A pre-supplied output does not match the inferred shape.
    #[error("{op}: output {index} has shape {actual}, inferred {inferred}")]
    OutputShapeMismatch {
        op: OpType,
        index: usize,
        actual: String,
        inferred: String,
    },

    #[error("tensor {0} not found in graph")]
    TensorNotFound(TensorId),

    #[error("operator {0} not found in graph")]
    OperatorNotFound(OpId),

    #[error("tensor {0} is already registered")]
    DuplicateTensor(TensorId),

    /// Topological sort found a cycle; the operator order is unchanged.
    #[error("graph contains a cycle: sorted {sorted} of {total} operators")]
    Cycle { sorted: usize, total: usize },

    /// A structural consistency check failed.
    #[error("invalid graph: {0}")]
    InvalidGraph(String),

    /// The tensor has no data buffer yet.
    #[error("tensor {0} has no data")]
    NotAllocated(TensorId),

    /// A migration was requested from the wrong side.
    #[error("tensor {tensor} is on {device}, expected {expected}")]
    WrongLocation {
        tensor: TensorId,
        device: DeviceKind,
        expected: &'static str,
    },

    /// Host data does not fit the tensor.
    #[error("tensor {tensor}: {detail}")]
    DataMismatch { tensor: TensorId, detail: String },
}
