// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Error types for the execution runtime.

use device_rt::{DeviceError, DeviceKind};
use graph_ir::{GraphError, OpType};

/// Errors that can occur while configuring the runtime or running a graph.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    /// Graph construction, validation or tensor data handling failed.
    #[error(transparent)]
    Graph(#[from] GraphError),

    /// A device-runtime or operator-library call failed.
    #[error(transparent)]
    Device(#[from] DeviceError),

    /// The calling thread never initialised a context on this runtime.
    #[error("thread {thread} has no runtime context; call init_thread_context first")]
    NoContext { thread: String },

    /// No kernel is registered for the (device, operator kind) pair.
    #[error("no kernel registered for {op} on {device}")]
    KernelNotFound { device: DeviceKind, op: OpType },

    /// A kernel is already registered for the pair.
    #[error("kernel for {op} on {device} is already registered")]
    DuplicateKernel { device: DeviceKind, op: OpType },

    /// A kernel was dispatched an operator of a kind it cannot run.
    #[error("kernel {kernel} cannot run operator kind {op}")]
    KernelMismatch { kernel: &'static str, op: OpType },

    /// A kernel asked for more scratch memory than the workspace holds.
    #[error("workspace request of {requested} bytes exceeds capacity of {capacity} bytes")]
    WorkspaceTooSmall { requested: usize, capacity: usize },

    /// Configuration error.
    #[error("configuration error: {0}")]
    ConfigError(String),
}
