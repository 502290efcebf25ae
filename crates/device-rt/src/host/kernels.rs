// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Scalar compute loops behind [`super::HostOpLibrary`].
//!
//! Every loop addresses its operands through the descriptor's shape and
//! strides, so broadcast (stride 0) and transposed (swapped strides) views
//! need no copies. Operands are accessed through raw pointers with
//! element-wise reads and writes; an output may alias an input.

use std::ops::{Add, Div, Mul, Sub};

use shape_expr::linear_offset;

use crate::DType;

/// Concrete layout recorded by a tensor descriptor.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct TensorLayout {
    pub shape: Vec<usize>,
    pub strides: Vec<isize>,
    pub dtype: DType,
}

impl TensorLayout {
    pub fn element_count(&self) -> usize {
        self.shape.iter().product()
    }

    /// Bytes from the base pointer to one past the furthest addressable
    /// element. Strides are non-negative for host descriptors.
    pub fn span_bytes(&self) -> usize {
        if self.shape.iter().any(|&d| d == 0) {
            return 0;
        }
        let last: usize = self
            .shape
            .iter()
            .zip(&self.strides)
            .map(|(&d, &s)| (d - 1) * s.unsigned_abs())
            .sum();
        (last + 1) * self.dtype.size_bytes()
    }
}

/// Floating-point element types the host kernels compute in.
pub(crate) trait HostFloat:
    Copy
    + PartialEq
    + Default
    + Add<Output = Self>
    + Sub<Output = Self>
    + Mul<Output = Self>
    + Div<Output = Self>
{
    fn from_f32(v: f32) -> Self;
    fn from_usize(v: usize) -> Self;
    fn sqrt(self) -> Self;
}

impl HostFloat for f32 {
    fn from_f32(v: f32) -> Self {
        v
    }

    fn from_usize(v: usize) -> Self {
        v as f32
    }

    fn sqrt(self) -> Self {
        f32::sqrt(self)
    }
}

impl HostFloat for f64 {
    fn from_f32(v: f32) -> Self {
        v as f64
    }

    fn from_usize(v: usize) -> Self {
        v as f64
    }

    fn sqrt(self) -> Self {
        f64::sqrt(self)
    }
}

/// Element-wise `y = f(a, b)`. All three layouts share `y`'s shape; the
/// inputs carry broadcast strides.
///
/// # Safety
/// Each pointer must be valid for reads (inputs) or writes (`y`) over the
/// span of its layout.
pub(crate) unsafe fn binary<T: HostFloat>(
    f: impl Fn(T, T) -> T,
    y: *mut T,
    y_layout: &TensorLayout,
    a: *const T,
    a_layout: &TensorLayout,
    b: *const T,
    b_layout: &TensorLayout,
) {
    for i in 0..y_layout.element_count() {
        let yo = linear_offset(i, &y_layout.shape, &y_layout.strides);
        let ao = linear_offset(i, &a_layout.shape, &a_layout.strides);
        let bo = linear_offset(i, &b_layout.shape, &b_layout.strides);
        let v = f(a.offset(ao).read(), b.offset(bo).read());
        y.offset(yo).write(v);
    }
}

/// Batched `y = alpha * a @ b + beta * y` over rank-3 layouts
/// `y: [B, M, N]`, `a: [B, M, K]`, `b: [B, K, N]`. A batch stride of 0
/// broadcasts that operand over the batch.
///
/// Uses the ikj loop order; `acc` holds one output row.
///
/// # Safety
/// Each pointer must be valid over the span of its layout and `acc` must be
/// valid for `N` writes.
#[allow(clippy::too_many_arguments)]
pub(crate) unsafe fn gemm<T: HostFloat>(
    y: *mut T,
    y_layout: &TensorLayout,
    a: *const T,
    a_layout: &TensorLayout,
    b: *const T,
    b_layout: &TensorLayout,
    alpha: T,
    beta: T,
    acc: *mut T,
) {
    let (batch, m, n) = (y_layout.shape[0], y_layout.shape[1], y_layout.shape[2]);
    let k = a_layout.shape[2];
    let ys = &y_layout.strides;
    let as_ = &a_layout.strides;
    let bs = &b_layout.strides;
    let zero = T::default();

    for bi in 0..batch {
        let bi = bi as isize;
        for i in 0..m {
            let i = i as isize;
            for j in 0..n {
                acc.add(j).write(zero);
            }
            for p in 0..k {
                let p = p as isize;
                let a_ip = a.offset(bi * as_[0] + i * as_[1] + p * as_[2]).read();
                for j in 0..n {
                    let b_pj = b.offset(bi * bs[0] + p * bs[1] + j as isize * bs[2]).read();
                    let slot = acc.add(j);
                    slot.write(slot.read() + a_ip * b_pj);
                }
            }
            for j in 0..n {
                let dst = y.offset(bi * ys[0] + i * ys[1] + j as isize * ys[2]);
                let prod = alpha * acc.add(j).read();
                let v = if beta == zero {
                    prod
                } else {
                    prod + beta * dst.read()
                };
                dst.write(v);
            }
        }
    }
}

/// Root-mean-square normalisation over the last axis:
/// `y = x / sqrt(mean(x^2) + eps) * w`.
///
/// # Safety
/// Each pointer must be valid over the span of its layout. `w` is 1-D with
/// the length of the last axis.
pub(crate) unsafe fn rms_norm<T: HostFloat>(
    y: *mut T,
    y_layout: &TensorLayout,
    x: *const T,
    x_layout: &TensorLayout,
    w: *const T,
    w_layout: &TensorLayout,
    eps: T,
) {
    let Some(&last_dim) = x_layout.shape.last() else {
        return;
    };
    if last_dim == 0 {
        return;
    }
    let rank = x_layout.shape.len();
    let x_step = x_layout.strides[rank - 1];
    let y_step = y_layout.strides[rank - 1];
    let w_step = w_layout.strides[0];
    let num_rows = x_layout.element_count() / last_dim;

    for row in 0..num_rows {
        // Offset of element (row, 0).
        let x_base = linear_offset(row * last_dim, &x_layout.shape, &x_layout.strides);
        let y_base = linear_offset(row * last_dim, &y_layout.shape, &y_layout.strides);

        let mut sum_sq = T::default();
        for j in 0..last_dim {
            let v = x.offset(x_base + j as isize * x_step).read();
            sum_sq = sum_sq + v * v;
        }
        let inv_rms = T::from_f32(1.0) / (sum_sq / T::from_usize(last_dim) + eps).sqrt();

        for j in 0..last_dim {
            let j = j as isize;
            let v = x.offset(x_base + j * x_step).read();
            let g = w.offset(j * w_step).read();
            y.offset(y_base + j * y_step).write(v * inv_rms * g);
        }
    }
}
