// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Per-axis expression sequences: [`ShapeExpr`] and [`StrideExpr`].
//!
//! Both are the same container, [`ExprSeq`], tagged with a zero-sized axis
//! kind so that a shape can never be passed where a stride is expected.
//! The tag also fixes the concrete value type: shapes evaluate to `usize`
//! extents, strides to signed `isize` element steps.

use std::collections::BTreeSet;
use std::fmt;
use std::marker::PhantomData;

use serde::{Deserialize, Serialize};

use crate::error::ShapeError;
use crate::expr::{Bindings, ElementType, Expr};

/// Marker trait for the two kinds of per-axis sequence.
pub trait AxisKind {
    /// Concrete value of one axis.
    type Value: Copy + fmt::Debug + PartialEq;

    /// Human-readable name used in error messages.
    const NAME: &'static str;

    /// Convert an evaluated expression to an axis value. Returns `None`
    /// when the value is not representable (e.g. a negative extent).
    fn from_element(v: ElementType) -> Option<Self::Value>;
}

/// Axis kind of [`ShapeExpr`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ShapeAxis;

/// Axis kind of [`StrideExpr`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct StrideAxis;

impl AxisKind for ShapeAxis {
    type Value = usize;
    const NAME: &'static str = "shape";

    fn from_element(v: ElementType) -> Option<usize> {
        usize::try_from(v).ok()
    }
}

impl AxisKind for StrideAxis {
    type Value = isize;
    const NAME: &'static str = "stride";

    fn from_element(v: ElementType) -> Option<isize> {
        isize::try_from(v).ok()
    }
}

/// An ordered sequence of [`Expr`], one per tensor axis.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent, bound = "")]
pub struct ExprSeq<K> {
    dims: Vec<Expr>,
    #[serde(skip)]
    _kind: PhantomData<K>,
}

/// Per-axis extents of a tensor.
pub type ShapeExpr = ExprSeq<ShapeAxis>;

/// Per-axis element steps of a tensor.
pub type StrideExpr = ExprSeq<StrideAxis>;

impl<K: AxisKind> ExprSeq<K> {
    pub fn new(dims: Vec<Expr>) -> Self {
        Self {
            dims,
            _kind: PhantomData,
        }
    }

    /// The empty (rank-0) sequence.
    pub fn scalar() -> Self {
        Self::new(Vec::new())
    }

    /// Number of axes.
    pub fn size(&self) -> usize {
        self.dims.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dims.is_empty()
    }

    pub fn dims(&self) -> &[Expr] {
        &self.dims
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Expr> {
        self.dims.iter()
    }

    /// Bounds-checked axis access.
    pub fn get(&self, index: usize) -> Result<&Expr, ShapeError> {
        self.dims.get(index).ok_or(ShapeError::IndexOutOfRange {
            index,
            len: self.dims.len(),
        })
    }

    /// Bounds-checked mutable axis access.
    pub fn get_mut(&mut self, index: usize) -> Result<&mut Expr, ShapeError> {
        let len = self.dims.len();
        self.dims
            .get_mut(index)
            .ok_or(ShapeError::IndexOutOfRange { index, len })
    }

    /// Insert `expr` before position `pos`; `pos == size()` appends.
    pub fn insert(&mut self, pos: usize, expr: impl Into<Expr>) -> Result<(), ShapeError> {
        if pos > self.dims.len() {
            return Err(ShapeError::InsertOutOfRange {
                pos,
                len: self.dims.len(),
            });
        }
        self.dims.insert(pos, expr.into());
        Ok(())
    }

    pub fn push(&mut self, expr: impl Into<Expr>) {
        self.dims.push(expr.into());
    }

    /// True when every axis is a `Constant` node.
    pub fn is_concrete(&self) -> bool {
        self.dims.iter().all(Expr::is_constant)
    }

    pub fn is_dynamic(&self) -> bool {
        !self.is_concrete()
    }

    /// Evaluate every axis. `None` if any axis is unresolved or its value
    /// does not fit the axis type.
    pub fn evaluate(&self, bindings: &Bindings) -> Option<Vec<K::Value>> {
        self.dims
            .iter()
            .map(|e| e.evaluate(bindings).and_then(K::from_element))
            .collect()
    }

    /// Apply [`Expr::simplify`] to every axis.
    pub fn simplify(&self) -> Self {
        Self::new(self.dims.iter().map(Expr::simplify).collect())
    }

    /// Apply [`Expr::substitute`] to every axis.
    pub fn substitute(&self, bindings: &Bindings) -> Self {
        Self::new(self.dims.iter().map(|e| e.substitute(bindings)).collect())
    }

    /// The concrete values of a fully constant sequence.
    pub fn constant_value(&self) -> Result<Vec<K::Value>, ShapeError> {
        self.dims
            .iter()
            .map(|e| e.as_constant().and_then(K::from_element))
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| ShapeError::NotConcrete {
                kind: K::NAME,
                value: self.to_string(),
            })
    }

    /// Union of the variables referenced by all axes.
    pub fn variables(&self) -> BTreeSet<String> {
        self.dims.iter().flat_map(Expr::variables).collect()
    }
}

impl<K: AxisKind> Default for ExprSeq<K> {
    fn default() -> Self {
        Self::scalar()
    }
}

impl<K> fmt::Display for ExprSeq<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, d) in self.dims.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{d}")?;
        }
        write!(f, "]")
    }
}

impl<'a, K> IntoIterator for &'a ExprSeq<K> {
    type Item = &'a Expr;
    type IntoIter = std::slice::Iter<'a, Expr>;

    fn into_iter(self) -> Self::IntoIter {
        self.dims.iter()
    }
}

impl<K: AxisKind> FromIterator<Expr> for ExprSeq<K> {
    fn from_iter<I: IntoIterator<Item = Expr>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

// ── Conversions ──────────────────────────────────────────────────

impl<K: AxisKind> From<Vec<Expr>> for ExprSeq<K> {
    fn from(dims: Vec<Expr>) -> Self {
        Self::new(dims)
    }
}

impl<K: AxisKind, const N: usize> From<[Expr; N]> for ExprSeq<K> {
    fn from(dims: [Expr; N]) -> Self {
        Self::new(dims.into())
    }
}

impl From<&[usize]> for ShapeExpr {
    fn from(dims: &[usize]) -> Self {
        dims.iter().map(|&d| Expr::from(d)).collect()
    }
}

impl From<Vec<usize>> for ShapeExpr {
    fn from(dims: Vec<usize>) -> Self {
        Self::from(dims.as_slice())
    }
}

impl<const N: usize> From<[usize; N]> for ShapeExpr {
    fn from(dims: [usize; N]) -> Self {
        Self::from(&dims[..])
    }
}

impl From<&[isize]> for StrideExpr {
    fn from(dims: &[isize]) -> Self {
        dims.iter().map(|&d| Expr::from(d)).collect()
    }
}

impl From<Vec<isize>> for StrideExpr {
    fn from(dims: Vec<isize>) -> Self {
        Self::from(dims.as_slice())
    }
}

impl<const N: usize> From<[isize; N]> for StrideExpr {
    fn from(dims: [isize; N]) -> Self {
        Self::from(&dims[..])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_concrete_roundtrip() {
        let s = ShapeExpr::from([2, 3, 4]);
        assert!(s.is_concrete());
        assert_eq!(s.constant_value().unwrap(), vec![2, 3, 4]);
        assert_eq!(s.evaluate(&Bindings::new()), Some(vec![2, 3, 4]));
        assert_eq!(s.to_string(), "[2, 3, 4]");
    }

    #[test]
    fn test_symbolic_axes() {
        let s = ShapeExpr::from([Expr::var("batch"), Expr::constant(16)]);
        assert!(s.is_dynamic());
        assert!(matches!(
            s.constant_value(),
            Err(ShapeError::NotConcrete { kind: "shape", .. })
        ));
        assert_eq!(s.evaluate(&Bindings::new()), None);

        let mut env = Bindings::new();
        env.insert("batch".into(), 8);
        assert_eq!(s.evaluate(&env), Some(vec![8, 16]));
        assert_eq!(s.substitute(&env), ShapeExpr::from([8, 16]));
        assert_eq!(s.variables().len(), 1);
    }

    #[test]
    fn test_negative_extent_is_unresolved() {
        let s = ShapeExpr::from([Expr::constant(-1)]);
        assert_eq!(s.evaluate(&Bindings::new()), None);
        assert!(s.constant_value().is_err());

        let st = StrideExpr::from([-1, 4]);
        assert_eq!(st.constant_value().unwrap(), vec![-1, 4]);
    }

    #[test]
    fn test_bounds_checked_access() {
        let mut s = ShapeExpr::from([5, 6]);
        assert_eq!(s.get(1).unwrap(), &Expr::constant(6));
        assert_eq!(
            s.get(2),
            Err(ShapeError::IndexOutOfRange { index: 2, len: 2 })
        );
        *s.get_mut(0).unwrap() = Expr::var("n");
        assert_eq!(s.to_string(), "[n, 6]");
    }

    #[test]
    fn test_insert() {
        let mut s = ShapeExpr::from([3, 4]);
        s.insert(0, 1usize).unwrap();
        s.insert(3, Expr::var("k")).unwrap();
        assert_eq!(s.to_string(), "[1, 3, 4, k]");
        assert_eq!(
            s.insert(9, 1usize),
            Err(ShapeError::InsertOutOfRange { pos: 9, len: 4 })
        );
    }

    #[test]
    fn test_simplify_per_axis() {
        let s = ShapeExpr::from([Expr::constant(2) * 3, Expr::var("n") + 0]);
        let simplified = s.simplify();
        assert_eq!(simplified.get(0).unwrap(), &Expr::constant(6));
        assert_eq!(simplified.simplify(), simplified);
    }

    #[test]
    fn test_scalar() {
        let s = ShapeExpr::scalar();
        assert_eq!(s.size(), 0);
        assert!(s.is_concrete());
        assert_eq!(s.constant_value().unwrap(), Vec::<usize>::new());
        assert_eq!(s.to_string(), "[]");
    }

    #[test]
    fn test_serde_roundtrip() {
        let s = ShapeExpr::from([Expr::var("seq"), Expr::constant(64)]);
        let json = serde_json::to_string(&s).unwrap();
        let back: ShapeExpr = serde_json::from_str(&json).unwrap();
        assert_eq!(back, s);
    }
}
