// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Broadcasting and stride layout helpers.
//!
//! Shapes are aligned from the trailing axis. An axis missing from the
//! shorter shape behaves as extent 1.

use crate::error::ShapeError;
use crate::expr::Expr;
use crate::shape::{ShapeExpr, StrideExpr};

/// Compute the broadcast result shape of `a` and `b`.
///
/// Per aligned axis the extents must be structurally equal, or one of them
/// must be the constant 1. The output keeps the non-1 side; when `a` is the
/// constant 1 the `b` expression is taken verbatim.
pub fn infer_broadcast(a: &ShapeExpr, b: &ShapeExpr) -> Result<ShapeExpr, ShapeError> {
    let rank = a.size().max(b.size());
    let one = Expr::constant(1);
    let mut out = Vec::with_capacity(rank);

    for i in 0..rank {
        let a_dim = aligned(a, rank, i).unwrap_or(&one);
        let b_dim = aligned(b, rank, i).unwrap_or(&one);

        let dim = if a_dim == b_dim || is_one(b_dim) {
            a_dim
        } else if is_one(a_dim) {
            b_dim
        } else {
            return Err(ShapeError::BroadcastMismatch {
                lhs: a.to_string(),
                rhs: b.to_string(),
                axis: i,
            });
        };
        out.push(dim.clone());
    }

    Ok(ShapeExpr::new(out))
}

/// Strides to read an input of `in_shape`/`in_stride` as if it had been
/// expanded to `target_rank` axes.
///
/// Axes that are missing from the input or have constant extent 1 get a
/// stride of 0; all other axes keep their input stride.
pub fn broadcast_stride(
    in_shape: &ShapeExpr,
    in_stride: &StrideExpr,
    target_rank: usize,
) -> Result<StrideExpr, ShapeError> {
    if in_shape.size() != in_stride.size() {
        return Err(ShapeError::RankMismatch {
            shape_rank: in_shape.size(),
            stride_rank: in_stride.size(),
        });
    }

    let rank = target_rank.max(in_shape.size());
    let offset = rank - in_shape.size();
    let mut out = Vec::with_capacity(rank);

    for i in 0..rank {
        if i < offset {
            out.push(Expr::constant(0));
            continue;
        }
        let j = i - offset;
        let extent = in_shape.get(j)?;
        if is_one(extent) {
            out.push(Expr::constant(0));
        } else {
            out.push(in_stride.get(j)?.clone());
        }
    }

    Ok(StrideExpr::new(out))
}

/// Row-major strides for `shape`: the last axis has stride 1 and every
/// earlier axis steps over the product of all later extents.
///
/// The products are folded only when the shape is fully concrete.
pub fn contiguous_stride(shape: &ShapeExpr) -> StrideExpr {
    let rank = shape.size();
    let mut out = vec![Expr::constant(1); rank];
    let mut running = Expr::constant(1);

    for (i, dim) in shape.iter().enumerate().rev() {
        out[i] = running.clone();
        running = running * dim;
    }

    let stride = StrideExpr::new(out);
    if shape.is_concrete() {
        stride.simplify()
    } else {
        stride
    }
}

/// Linear element offset of `index` in a tensor laid out with `stride`.
///
/// Walks the axes from last to first, decomposing the flat `index` by each
/// extent and accumulating `coordinate * stride`.
pub fn linear_offset(index: usize, shape: &[usize], stride: &[isize]) -> isize {
    let mut remaining = index;
    let mut offset = 0isize;

    for (&extent, &step) in shape.iter().zip(stride).rev() {
        if extent == 0 {
            return 0;
        }
        let coord = remaining % extent;
        remaining /= extent;
        offset += coord as isize * step;
    }
    offset
}

fn aligned(shape: &ShapeExpr, rank: usize, axis: usize) -> Option<&Expr> {
    let offset = rank - shape.size();
    axis.checked_sub(offset).and_then(|j| shape.get(j).ok())
}

fn is_one(e: &Expr) -> bool {
    e.as_constant() == Some(1)
}
