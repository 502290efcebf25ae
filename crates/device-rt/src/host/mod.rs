// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Host (CPU) backend.
//!
//! [`HostDevice`] implements [`crate::DeviceRuntime`] on the process heap and
//! [`HostOpLibrary`] implements [`crate::OpLibrary`] with scalar loops over
//! `f32` and `f64`. Accelerator kinds can be emulated: their "device
//! memory" is host memory tagged with the device it belongs to, so memcpy
//! direction checks behave as they would on real hardware.

mod device;
mod kernels;
mod op_library;
mod stats;

pub use device::{HostDevice, Location};
pub use op_library::HostOpLibrary;
pub use stats::AllocationStats;

use std::sync::Arc;

use crate::DeviceKind;

/// A host device and an operator library bound to it.
///
/// `emulated` lists the accelerator kinds to expose in addition to `Cpu`.
pub fn host_backend(emulated: &[DeviceKind]) -> (Arc<HostDevice>, Arc<HostOpLibrary>) {
    let device = Arc::new(HostDevice::with_emulated(emulated));
    let library = Arc::new(HostOpLibrary::new(Arc::clone(&device)));
    (device, library)
}
