// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # graph-ir
//!
//! The tensor/operator graph executed by the runtime.
//!
//! - [`Tensor`]: dtype, symbolic shape and stride, an exclusively owned data
//!   buffer, and links to its producer and consumers.
//! - [`Operator`]: one operator kind ([`OpImpl`]) with its input and output
//!   tensors and the predecessor/successor edges derived from them.
//! - [`Graph`]: the arena owning both, with topological sorting, shape
//!   inference, symbolic resolution and consistency checks.
//! - [`GraphBuilder`]: the typed construction surface.
//!
//! # Identity Instead Of Pointers
//! Entities refer to each other by [`TensorId`] and [`OpId`] only. The
//! [`Graph`] is the single owner and resolves ids on demand, so removing an
//! entity can never leave a dangling pointer, only a dangling id that
//! [`Graph::check_valid`] reports.
//!
//! # Example
//! ```
//! use device_rt::DType;
//! use graph_ir::GraphBuilder;
//! use shape_expr::ShapeExpr;
//!
//! let mut b = GraphBuilder::new();
//! let x = b.tensor([3, 1], DType::F32).unwrap();
//! let y = b.tensor([2, 3, 4], DType::F32).unwrap();
//! let z = b.add(x, y, None).unwrap();
//!
//! let mut graph = b.into_graph();
//! graph.topo_sort().unwrap();
//! graph.check_before_run().unwrap();
//! assert_eq!(graph.get_tensor(z).unwrap().shape(), &ShapeExpr::from([2, 3, 4]));
//! ```

mod builder;
mod error;
mod graph;
mod operator;
pub mod ops;
mod tensor;

pub use builder::GraphBuilder;
pub use error::GraphError;
pub use graph::Graph;
pub use operator::{NativeOperand, OpId, OpImpl, OpType, Operator};
pub use tensor::{Blob, DirectMemory, Tensor, TensorId, TensorMemory};
