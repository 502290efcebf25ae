// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # runtime
//!
//! The execution engine that runs a sorted [`graph_ir::Graph`] on a device.
//!
//! The runtime owns:
//! - A [`device_rt::DeviceRuntime`] and a [`device_rt::OpLibrary`].
//! - A shared [`KernelRegistry`] mapping (device kind, operator kind) to a
//!   [`Kernel`].
//! - One [`Context`] per participating thread, and a scratch workspace.
//!
//! A typical run:
//! ```text
//! GraphBuilder ─► Graph ─► topo_sort ─► resolve ─► data_malloc ─► run
//! ```
//!
//! ```
//! use device_rt::{DType, DeviceKind};
//! use graph_ir::GraphBuilder;
//! use runtime::{ByteSize, Runtime, RuntimeConfig};
//!
//! let rt = Runtime::host(RuntimeConfig::with_device(DeviceKind::Cpu, ByteSize::from_mb(1))).unwrap();
//!
//! let mut b = GraphBuilder::new();
//! let x = b.tensor([2, 2], DType::F32).unwrap();
//! let y = b.add(x, x, None).unwrap();
//! let mut graph = b.into_graph();
//!
//! graph.topo_sort().unwrap();
//! rt.data_malloc(&mut graph).unwrap();
//! graph.get_tensor(x).unwrap().write_data(&rt, &[1.0f32, 2.0, 3.0, 4.0]).unwrap();
//! rt.run(&graph).unwrap();
//! rt.synchronize().unwrap();
//!
//! let out: Vec<f32> = graph.get_tensor(y).unwrap().read_data(&rt).unwrap();
//! assert_eq!(out, vec![2.0, 4.0, 6.0, 8.0]);
//! rt.data_free(&mut graph).unwrap();
//! ```
//!
//! # Threads
//! Every thread that runs graphs first calls
//! [`Runtime::init_thread_context`]. The constructing thread is bound
//! automatically to the configured device.

mod config;
mod context;
mod error;
mod kernels;
mod metrics;
mod registry;
mod runtime;

pub use config::{ByteSize, RuntimeConfig};
pub use context::Context;
pub use error::RuntimeError;
pub use kernels::{ElementWiseKernel, GemmKernel, RmsNormKernel};
pub use metrics::{OpMetrics, RunMetrics};
pub use registry::{Kernel, KernelRecord, KernelRegistry};
pub use runtime::Runtime;
