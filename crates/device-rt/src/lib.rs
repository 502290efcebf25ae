// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # device-rt
//!
//! The boundary between the execution core and the hardware.
//!
//! This crate provides:
//! - [`DeviceKind`], [`DType`], [`MemcpyKind`]: the vocabulary shared by
//!   every layer above.
//! - [`DeviceRuntime`]: device selection, streams, host/device memory and
//!   memcpy.
//! - [`OpLibrary`]: the per-operator descriptor protocol (handle, tensor
//!   descriptors, op descriptor, workspace query, launch, destroy).
//! - [`Status`] and the [`native_call!`] macro, which turns a failed native
//!   call into a [`DeviceError`] carrying the call site and call text.
//! - [`host`]: a CPU implementation of both interfaces, able to emulate
//!   accelerator device kinds whose memory lives on the host.
//!
//! Native calls never panic and are never retried; every failure is a
//! [`Status`] for the caller to propagate.

mod device;
mod device_runtime;
mod dtype;
mod error;
pub mod host;
mod op_library;
mod status;

pub use device::{DeviceKind, DevicePtr, MemcpyKind, Stream};
pub use device_runtime::DeviceRuntime;
pub use dtype::{DType, Element};
pub use error::DeviceError;
pub use op_library::{LaunchArgs, NativeOp, OpDesc, OpHandle, OpLibrary, TensorDesc};
pub use status::Status;
