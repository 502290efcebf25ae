// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Error types for shape and stride algebra.

/// Errors raised by shape/stride sequences and broadcasting.
///
/// Unresolved symbolic values are *not* errors; they surface as `None`
/// from the `evaluate` family of methods.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ShapeError {
    /// An axis index was outside `0..len`.
    #[error("axis index {index} out of range for rank {len}")]
    IndexOutOfRange { index: usize, len: usize },

    /// An insertion position was outside `0..=len`.
    #[error("insert position {pos} out of range for rank {len}")]
    InsertOutOfRange { pos: usize, len: usize },

    /// A constant value was requested from a sequence with symbolic axes.
    #[error("{kind} {value} is not concrete")]
    NotConcrete { kind: &'static str, value: String },

    /// Two shapes cannot be broadcast together.
    #[error("cannot broadcast {lhs} with {rhs}: axis {axis} differs and neither side is 1")]
    BroadcastMismatch {
        lhs: String,
        rhs: String,
        axis: usize,
    },

    /// A shape and its stride have different ranks.
    #[error("shape rank {shape_rank} does not match stride rank {stride_rank}")]
    RankMismatch {
        shape_rank: usize,
        stride_rank: usize,
    },
}
