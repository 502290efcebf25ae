// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The device-runtime interface consumed by the execution core.

use crate::{DeviceKind, DevicePtr, MemcpyKind, Status, Stream};

/// Device selection, streams, memory and copies.
///
/// The selected device is per calling thread: [`DeviceRuntime::set_device`]
/// affects only the thread that calls it, and [`DeviceRuntime::malloc`]
/// allocates on that thread's device.
///
/// Implementations are treated as correct; callers never retry a failed
/// call.
pub trait DeviceRuntime: Send + Sync {
    /// One-time library initialisation.
    fn init(&self) -> Result<(), Status>;

    /// Number of devices of `kind` visible to this process.
    fn device_count(&self, kind: DeviceKind) -> Result<usize, Status>;

    /// Device counts for every kind, in [`DeviceKind::ALL`] order.
    fn all_device_counts(&self) -> Result<Vec<(DeviceKind, usize)>, Status> {
        DeviceKind::ALL
            .into_iter()
            .map(|kind| Ok((kind, self.device_count(kind)?)))
            .collect()
    }

    /// Select the device used by the calling thread.
    fn set_device(&self, kind: DeviceKind, device_id: usize) -> Result<(), Status>;

    /// The device selected by the calling thread.
    fn current_device(&self) -> Result<(DeviceKind, usize), Status>;

    fn stream_create(&self) -> Result<Stream, Status>;

    fn stream_destroy(&self, stream: Stream) -> Result<(), Status>;

    /// Allocate `size` bytes on the calling thread's device.
    fn malloc(&self, size: usize) -> Result<DevicePtr, Status>;

    /// Allocate `size` bytes of host memory visible to the device.
    fn malloc_host(&self, size: usize) -> Result<DevicePtr, Status>;

    fn free(&self, ptr: DevicePtr) -> Result<(), Status>;

    fn free_host(&self, ptr: DevicePtr) -> Result<(), Status>;

    /// Copy `size` bytes from `src` to `dst`. `kind` names where each side
    /// lives; a direction that contradicts the pointers is a `BadParam`.
    fn memcpy(
        &self,
        dst: DevicePtr,
        src: DevicePtr,
        size: usize,
        kind: MemcpyKind,
    ) -> Result<(), Status>;

    fn memcpy_async(
        &self,
        dst: DevicePtr,
        src: DevicePtr,
        size: usize,
        kind: MemcpyKind,
        stream: Stream,
    ) -> Result<(), Status>;

    fn malloc_async(&self, size: usize, stream: Stream) -> Result<DevicePtr, Status>;

    fn free_async(&self, ptr: DevicePtr, stream: Stream) -> Result<(), Status>;

    /// Copy caller-owned host bytes into an allocation.
    fn upload(&self, dst: DevicePtr, src: &[u8]) -> Result<(), Status>;

    /// Copy an allocation's bytes into caller-owned host memory.
    fn download(&self, dst: &mut [u8], src: DevicePtr) -> Result<(), Status>;

    /// Block until all work queued on the calling thread's device is done.
    fn device_synchronize(&self) -> Result<(), Status>;
}
