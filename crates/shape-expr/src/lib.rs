// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # shape-expr
//!
//! Symbolic integer arithmetic for tensor shapes and strides whose extents
//! are only known at run time.
//!
//! This crate provides:
//! - [`Expr`]: an immutable arithmetic tree over `i64` constants and named
//!   variables (`+ - * / %`, `min`, `max`).
//! - [`ShapeExpr`] / [`StrideExpr`]: one [`Expr`] per tensor axis, with
//!   concreteness checks, evaluation against [`Bindings`] and constant
//!   extraction.
//! - NumPy-style broadcasting via [`infer_broadcast`] and [`broadcast_stride`].
//!
//! # Partial Evaluation
//! Evaluating an expression never fails. An unbound variable or a zero
//! divisor yields `None`, which propagates to the root of the tree.
//!
//! ```
//! use shape_expr::{Bindings, Expr};
//!
//! let n = Expr::var("n");
//! let e = (n.clone() + 2) * 3;
//! assert_eq!(e.to_string(), "((n + 2) * 3)");
//!
//! let mut env = Bindings::new();
//! assert_eq!(e.evaluate(&env), None);
//! env.insert("n".into(), 4);
//! assert_eq!(e.evaluate(&env), Some(18));
//! ```
//!
//! Equality is structural: `a + b` and `b + a` are different expressions.

mod broadcast;
mod error;
mod expr;
mod shape;

pub use broadcast::{broadcast_stride, contiguous_stride, infer_broadcast, linear_offset};
pub use error::ShapeError;
pub use expr::{BinaryOp, Bindings, ElementType, Expr, ExprKind};
pub use shape::{AxisKind, ExprSeq, ShapeAxis, ShapeExpr, StrideAxis, StrideExpr};
