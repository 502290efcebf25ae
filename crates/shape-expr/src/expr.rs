// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Symbolic integer expressions.
//!
//! An [`Expr`] is an immutable tree. Children are shared through [`Arc`], so
//! cloning an expression or reusing it as the operand of several parents is
//! cheap and never deep-copies.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::ops;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Integer type every expression evaluates to.
pub type ElementType = i64;

/// Variable name → value assignments used by [`Expr::evaluate`].
pub type Bindings = HashMap<String, ElementType>;

/// Binary operators supported by [`Expr::Binary`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Min,
    Max,
}

impl BinaryOp {
    /// Apply the operator to two concrete values.
    ///
    /// Division and remainder truncate toward zero. A zero divisor yields
    /// `None`.
    pub fn apply(self, a: ElementType, b: ElementType) -> Option<ElementType> {
        match self {
            Self::Add => Some(a.wrapping_add(b)),
            Self::Sub => Some(a.wrapping_sub(b)),
            Self::Mul => Some(a.wrapping_mul(b)),
            Self::Div => (b != 0).then(|| a.wrapping_div(b)),
            Self::Mod => (b != 0).then(|| a.wrapping_rem(b)),
            Self::Min => Some(a.min(b)),
            Self::Max => Some(a.max(b)),
        }
    }

    fn symbol(self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::Mod => "%",
            Self::Min => "min",
            Self::Max => "max",
        }
    }

    fn is_function(self) -> bool {
        matches!(self, Self::Min | Self::Max)
    }
}

/// Flat tag describing the root of an expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExprKind {
    Constant,
    Variable,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Min,
    Max,
}

impl From<BinaryOp> for ExprKind {
    fn from(op: BinaryOp) -> Self {
        match op {
            BinaryOp::Add => Self::Add,
            BinaryOp::Sub => Self::Sub,
            BinaryOp::Mul => Self::Mul,
            BinaryOp::Div => Self::Div,
            BinaryOp::Mod => Self::Mod,
            BinaryOp::Min => Self::Min,
            BinaryOp::Max => Self::Max,
        }
    }
}

/// A symbolic integer expression.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Expr {
    Constant(ElementType),
    Variable(Arc<str>),
    Binary {
        op: BinaryOp,
        lhs: Arc<Expr>,
        rhs: Arc<Expr>,
    },
}

impl Expr {
    pub fn constant(value: ElementType) -> Self {
        Self::Constant(value)
    }

    pub fn var(name: impl AsRef<str>) -> Self {
        Self::Variable(Arc::from(name.as_ref()))
    }

    pub fn binary(op: BinaryOp, lhs: impl Into<Expr>, rhs: impl Into<Expr>) -> Self {
        Self::Binary {
            op,
            lhs: Arc::new(lhs.into()),
            rhs: Arc::new(rhs.into()),
        }
    }

    pub fn min(lhs: impl Into<Expr>, rhs: impl Into<Expr>) -> Self {
        Self::binary(BinaryOp::Min, lhs, rhs)
    }

    pub fn max(lhs: impl Into<Expr>, rhs: impl Into<Expr>) -> Self {
        Self::binary(BinaryOp::Max, lhs, rhs)
    }

    pub fn kind(&self) -> ExprKind {
        match self {
            Self::Constant(_) => ExprKind::Constant,
            Self::Variable(_) => ExprKind::Variable,
            Self::Binary { op, .. } => (*op).into(),
        }
    }

    /// The value of a `Constant` node, `None` for anything else.
    ///
    /// No folding happens here; call [`Expr::simplify`] first if needed.
    pub fn as_constant(&self) -> Option<ElementType> {
        match self {
            Self::Constant(v) => Some(*v),
            _ => None,
        }
    }

    pub fn is_constant(&self) -> bool {
        matches!(self, Self::Constant(_))
    }

    /// All variable names referenced anywhere in the tree.
    pub fn variables(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        self.collect_variables(&mut out);
        out
    }

    fn collect_variables(&self, out: &mut BTreeSet<String>) {
        match self {
            Self::Constant(_) => {}
            Self::Variable(name) => {
                out.insert(name.to_string());
            }
            Self::Binary { lhs, rhs, .. } => {
                lhs.collect_variables(out);
                rhs.collect_variables(out);
            }
        }
    }

    /// Evaluate against `bindings`.
    ///
    /// Returns `None` if any referenced variable is unbound or any divisor
    /// evaluates to zero.
    pub fn evaluate(&self, bindings: &Bindings) -> Option<ElementType> {
        match self {
            Self::Constant(v) => Some(*v),
            Self::Variable(name) => bindings.get(name.as_ref()).copied(),
            Self::Binary { op, lhs, rhs } => {
                let a = lhs.evaluate(bindings)?;
                let b = rhs.evaluate(bindings)?;
                op.apply(a, b)
            }
        }
    }

    /// Fold every sub-tree whose operands are both constants.
    ///
    /// Nodes that would divide by a constant zero are left in place.
    /// Applying `simplify` twice yields the same tree as applying it once.
    pub fn simplify(&self) -> Expr {
        match self {
            Self::Constant(_) | Self::Variable(_) => self.clone(),
            Self::Binary { op, lhs, rhs } => {
                let l = lhs.simplify();
                let r = rhs.simplify();
                if let (Some(a), Some(b)) = (l.as_constant(), r.as_constant()) {
                    if let Some(v) = op.apply(a, b) {
                        return Self::Constant(v);
                    }
                }
                Self::Binary {
                    op: *op,
                    lhs: Arc::new(l),
                    rhs: Arc::new(r),
                }
            }
        }
    }

    /// Replace every variable present in `bindings` by its value, then fold.
    ///
    /// Variables absent from `bindings` stay symbolic.
    pub fn substitute(&self, bindings: &Bindings) -> Expr {
        match self {
            Self::Constant(_) => self.clone(),
            Self::Variable(name) => match bindings.get(name.as_ref()) {
                Some(v) => Self::Constant(*v),
                None => self.clone(),
            },
            Self::Binary { op, lhs, rhs } => Self::Binary {
                op: *op,
                lhs: Arc::new(lhs.substitute(bindings)),
                rhs: Arc::new(rhs.substitute(bindings)),
            }
            .simplify(),
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Constant(v) => write!(f, "{v}"),
            Self::Variable(name) => write!(f, "{name}"),
            Self::Binary { op, lhs, rhs } if op.is_function() => {
                write!(f, "{}({lhs},{rhs})", op.symbol())
            }
            Self::Binary { op, lhs, rhs } => write!(f, "({lhs} {} {rhs})", op.symbol()),
        }
    }
}

// ── Conversions ──────────────────────────────────────────────────

impl From<i64> for Expr {
    fn from(v: i64) -> Self {
        Self::Constant(v)
    }
}

impl From<i32> for Expr {
    fn from(v: i32) -> Self {
        Self::Constant(v as i64)
    }
}

impl From<usize> for Expr {
    fn from(v: usize) -> Self {
        Self::Constant(v as i64)
    }
}

impl From<isize> for Expr {
    fn from(v: isize) -> Self {
        Self::Constant(v as i64)
    }
}

impl From<&Expr> for Expr {
    fn from(e: &Expr) -> Self {
        e.clone()
    }
}

// ── Operator overloads ───────────────────────────────────────────

macro_rules! impl_binary_operator {
    ($trait:ident, $method:ident, $op:expr) => {
        impl<R: Into<Expr>> ops::$trait<R> for Expr {
            type Output = Expr;

            fn $method(self, rhs: R) -> Expr {
                Expr::binary($op, self, rhs)
            }
        }

        impl<R: Into<Expr>> ops::$trait<R> for &Expr {
            type Output = Expr;

            fn $method(self, rhs: R) -> Expr {
                Expr::binary($op, self.clone(), rhs)
            }
        }
    };
}

impl_binary_operator!(Add, add, BinaryOp::Add);
impl_binary_operator!(Sub, sub, BinaryOp::Sub);
impl_binary_operator!(Mul, mul, BinaryOp::Mul);
impl_binary_operator!(Div, div, BinaryOp::Div);
impl_binary_operator!(Rem, rem, BinaryOp::Mod);
