// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Heap-backed [`DeviceRuntime`].
//!
//! Every allocation is recorded in an address-ordered table together with
//! its [`Location`]. Copies and kernel launches resolve their pointers
//! against that table, so an out-of-range or already-freed address is
//! reported as a [`Status`] instead of touching memory.
//!
//! # Thread Safety
//! `HostDevice` is `Send + Sync`. The allocation table, the stream set and
//! the per-thread device selection each sit behind their own `Mutex`.

use std::alloc::{self, Layout};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::ptr;
use std::sync::Mutex;
use std::thread::{self, ThreadId};

use crate::host::AllocationStats;
use crate::{DeviceKind, DevicePtr, DeviceRuntime, MemcpyKind, Status, Stream};

/// Alignment of every host allocation, enough for any element type.
const ALIGN: usize = 64;

/// Where an allocation lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Location {
    /// Pinned host memory from `malloc_host`.
    Host,
    /// Memory from `malloc` on the given device.
    Device(DeviceKind, usize),
}

impl Location {
    /// CPU device memory is host memory, so it satisfies both sides of a
    /// copy direction.
    fn host_accessible(self) -> bool {
        matches!(self, Location::Host | Location::Device(DeviceKind::Cpu, _))
    }

    fn device_resident(self) -> bool {
        matches!(self, Location::Device(..))
    }
}

#[derive(Debug)]
struct Allocation {
    layout: Layout,
    location: Location,
}

#[derive(Debug, Default)]
struct State {
    allocations: BTreeMap<usize, Allocation>,
    streams: HashSet<u64>,
    next_stream: u64,
    initialized: bool,
}

impl State {
    /// The allocation containing `[addr, addr + len)`.
    fn find(&self, addr: usize, len: usize) -> Result<(usize, &Allocation), Status> {
        let (&start, alloc) = self
            .allocations
            .range(..=addr)
            .next_back()
            .ok_or(Status::BadParam)?;
        let end = start + alloc.layout.size();
        match addr.checked_add(len) {
            Some(hi) if hi <= end => Ok((start, alloc)),
            _ => Err(Status::BadParam),
        }
    }
}

/// A [`DeviceRuntime`] whose memory lives on the process heap.
#[derive(Debug)]
pub struct HostDevice {
    emulated: Vec<DeviceKind>,
    devices_per_kind: usize,
    state: Mutex<State>,
    current: Mutex<HashMap<ThreadId, (DeviceKind, usize)>>,
    stats: Mutex<AllocationStats>,
}

impl HostDevice {
    /// A host device exposing only [`DeviceKind::Cpu`].
    pub fn new() -> Self {
        Self::with_emulated(&[])
    }

    /// A host device that also accepts the given accelerator kinds, each
    /// with a single device.
    pub fn with_emulated(kinds: &[DeviceKind]) -> Self {
        let mut emulated: Vec<DeviceKind> =
            kinds.iter().copied().filter(|k| !k.is_cpu()).collect();
        emulated.sort();
        emulated.dedup();
        Self {
            emulated,
            devices_per_kind: 1,
            state: Mutex::new(State::default()),
            current: Mutex::new(HashMap::new()),
            stats: Mutex::new(AllocationStats::default()),
        }
    }

    /// Snapshot of the allocation statistics.
    pub fn stats(&self) -> AllocationStats {
        self.stats
            .lock()
            .map(|s| s.clone())
            .unwrap_or_default()
    }

    /// Location of the allocation containing `ptr`, if any.
    pub fn location_of(&self, ptr: DevicePtr) -> Option<Location> {
        let state = self.state.lock().ok()?;
        state.find(ptr.addr(), 0).ok().map(|(_, a)| a.location)
    }

    /// Check that `[ptr, ptr + len)` lies inside one live allocation.
    pub fn check_range(&self, ptr: DevicePtr, len: usize) -> Result<Location, Status> {
        let state = self.state.lock().map_err(|_| Status::InternalError)?;
        state.find(ptr.addr(), len).map(|(_, a)| a.location)
    }

    /// Number of live allocations.
    pub fn live_allocations(&self) -> usize {
        self.state.lock().map(|s| s.allocations.len()).unwrap_or(0)
    }

    fn supports(&self, kind: DeviceKind) -> bool {
        kind.is_cpu() || self.emulated.contains(&kind)
    }

    fn allocate(&self, size: usize, location: Location) -> Result<DevicePtr, Status> {
        let layout = Layout::from_size_align(size.max(1), ALIGN).map_err(|_| Status::BadParam)?;
        // SAFETY: `layout` has a non-zero size.
        let raw = unsafe { alloc::alloc_zeroed(layout) };
        let ptr = DevicePtr::from_addr(raw as usize).ok_or(Status::InternalError)?;

        let mut state = self.state.lock().map_err(|_| Status::InternalError)?;
        state
            .allocations
            .insert(ptr.addr(), Allocation { layout, location });
        drop(state);

        if let Ok(mut stats) = self.stats.lock() {
            stats.record_allocation(layout.size(), location == Location::Host);
        }
        tracing::debug!(%ptr, size, ?location, "host allocation");
        Ok(ptr)
    }

    fn release(&self, ptr: DevicePtr, accept: impl Fn(Location) -> bool) -> Result<(), Status> {
        let mut state = self.state.lock().map_err(|_| Status::InternalError)?;
        let accepted = state
            .allocations
            .get(&ptr.addr())
            .is_some_and(|a| accept(a.location));
        if !accepted {
            return Err(Status::BadParam);
        }
        let alloc = state
            .allocations
            .remove(&ptr.addr())
            .ok_or(Status::BadParam)?;
        drop(state);

        // SAFETY: the address and layout come from the matching `alloc_zeroed`
        // and the entry has just been removed, so it is freed exactly once.
        unsafe { alloc::dealloc(ptr.addr() as *mut u8, alloc.layout) };

        if let Ok(mut stats) = self.stats.lock() {
            stats.record_deallocation(alloc.layout.size());
        }
        Ok(())
    }

    fn check_stream(&self, stream: Stream) -> Result<(), Status> {
        let state = self.state.lock().map_err(|_| Status::InternalError)?;
        if state.streams.contains(&stream.0) {
            Ok(())
        } else {
            Err(Status::BadParam)
        }
    }

    fn record_copy(&self, size: usize) {
        if let Ok(mut stats) = self.stats.lock() {
            stats.record_copy(size);
        }
    }
}

impl Default for HostDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceRuntime for HostDevice {
    fn init(&self) -> Result<(), Status> {
        let mut state = self.state.lock().map_err(|_| Status::InternalError)?;
        state.initialized = true;
        Ok(())
    }

    fn device_count(&self, kind: DeviceKind) -> Result<usize, Status> {
        Ok(if self.supports(kind) {
            self.devices_per_kind
        } else {
            0
        })
    }

    fn set_device(&self, kind: DeviceKind, device_id: usize) -> Result<(), Status> {
        if !self.supports(kind) {
            return Err(Status::DeviceTypeNotSupported);
        }
        if device_id >= self.devices_per_kind {
            return Err(Status::DeviceNotFound);
        }
        let mut current = self.current.lock().map_err(|_| Status::InternalError)?;
        current.insert(thread::current().id(), (kind, device_id));
        Ok(())
    }

    fn current_device(&self) -> Result<(DeviceKind, usize), Status> {
        let current = self.current.lock().map_err(|_| Status::InternalError)?;
        Ok(current
            .get(&thread::current().id())
            .copied()
            .unwrap_or((DeviceKind::Cpu, 0)))
    }

    fn stream_create(&self) -> Result<Stream, Status> {
        let mut state = self.state.lock().map_err(|_| Status::InternalError)?;
        state.next_stream += 1;
        let id = state.next_stream;
        state.streams.insert(id);
        Ok(Stream(id))
    }

    fn stream_destroy(&self, stream: Stream) -> Result<(), Status> {
        let mut state = self.state.lock().map_err(|_| Status::InternalError)?;
        if state.streams.remove(&stream.0) {
            Ok(())
        } else {
            Err(Status::BadParam)
        }
    }

    fn malloc(&self, size: usize) -> Result<DevicePtr, Status> {
        let (kind, id) = self.current_device()?;
        self.allocate(size, Location::Device(kind, id))
    }

    fn malloc_host(&self, size: usize) -> Result<DevicePtr, Status> {
        self.allocate(size, Location::Host)
    }

    fn free(&self, ptr: DevicePtr) -> Result<(), Status> {
        self.release(ptr, Location::device_resident)
    }

    fn free_host(&self, ptr: DevicePtr) -> Result<(), Status> {
        self.release(ptr, Location::host_accessible)
    }

    fn memcpy(
        &self,
        dst: DevicePtr,
        src: DevicePtr,
        size: usize,
        kind: MemcpyKind,
    ) -> Result<(), Status> {
        let src_loc = self.check_range(src, size)?;
        let dst_loc = self.check_range(dst, size)?;

        let src_ok = if kind.src_on_device() {
            src_loc.device_resident()
        } else {
            src_loc.host_accessible()
        };
        let dst_ok = if kind.dst_on_device() {
            dst_loc.device_resident()
        } else {
            dst_loc.host_accessible()
        };
        if !src_ok || !dst_ok {
            return Err(Status::BadParam);
        }

        // SAFETY: both ranges were checked to lie inside live allocations
        // owned by this device; `ptr::copy` tolerates overlap.
        unsafe {
            ptr::copy(src.addr() as *const u8, dst.addr() as *mut u8, size);
        }
        self.record_copy(size);
        Ok(())
    }

    fn memcpy_async(
        &self,
        dst: DevicePtr,
        src: DevicePtr,
        size: usize,
        kind: MemcpyKind,
        stream: Stream,
    ) -> Result<(), Status> {
        self.check_stream(stream)?;
        self.memcpy(dst, src, size, kind)
    }

    fn malloc_async(&self, size: usize, stream: Stream) -> Result<DevicePtr, Status> {
        self.check_stream(stream)?;
        self.malloc(size)
    }

    fn free_async(&self, ptr: DevicePtr, stream: Stream) -> Result<(), Status> {
        self.check_stream(stream)?;
        self.free(ptr)
    }

    fn upload(&self, dst: DevicePtr, src: &[u8]) -> Result<(), Status> {
        self.check_range(dst, src.len())?;
        // SAFETY: the destination range is inside a live allocation and
        // cannot overlap the caller's borrowed slice.
        unsafe {
            ptr::copy_nonoverlapping(src.as_ptr(), dst.addr() as *mut u8, src.len());
        }
        self.record_copy(src.len());
        Ok(())
    }

    fn download(&self, dst: &mut [u8], src: DevicePtr) -> Result<(), Status> {
        self.check_range(src, dst.len())?;
        // SAFETY: the source range is inside a live allocation and cannot
        // overlap the caller's exclusively borrowed slice.
        unsafe {
            ptr::copy_nonoverlapping(src.addr() as *const u8, dst.as_mut_ptr(), dst.len());
        }
        self.record_copy(dst.len());
        Ok(())
    }

    fn device_synchronize(&self) -> Result<(), Status> {
        // Every host operation completes before returning.
        Ok(())
    }
}

impl Drop for HostDevice {
    fn drop(&mut self) {
        let Ok(state) = self.state.get_mut() else {
            return;
        };
        let leaked = state.allocations.len();
        for (addr, alloc) in std::mem::take(&mut state.allocations) {
            // SAFETY: every entry was produced by `alloc_zeroed` with this
            // layout and has not been freed.
            unsafe { alloc::dealloc(addr as *mut u8, alloc.layout) };
        }
        if leaked > 0 {
            tracing::debug!(leaked, "released outstanding host allocations at device teardown");
        }
    }
}
