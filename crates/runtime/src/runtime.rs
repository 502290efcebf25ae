// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The runtime: per-thread contexts, memory services, the shared workspace
//! and the graph run loop.
//!
//! ```text
//! Runtime::new / Runtime::host
//!     │  init device library, bind calling thread, allocate workspace
//!     ▼
//! init_thread_context (once per worker thread)
//!     ▼
//! data_malloc(graph) ──► run(graph) ──► synchronize()
//! ```
//!
//! # Contexts
//! Each thread binds one [`Context`] (device, index, stream). Contexts are
//! published in a map guarded by an `RwLock`: a writer lock is only taken
//! the first time a thread registers. Lookups go through a thread-local
//! cache first and fall back to a read lock.
//!
//! # Workspace
//! A single scratch buffer is allocated at construction and handed to every
//! kernel launch in turn. It is not synchronised: two threads must not run
//! graphs on the same runtime at the same time.

use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, Weak};
use std::thread::{self, ThreadId};
use std::time::Instant;

use device_rt::host::host_backend;
use device_rt::{
    native_call, DeviceKind, DevicePtr, DeviceRuntime, MemcpyKind, OpLibrary,
};
use graph_ir::{Graph, TensorMemory};
use shape_expr::Bindings;

use crate::{Context, KernelRegistry, RunMetrics, RuntimeConfig, RuntimeError};

static NEXT_RUNTIME_ID: AtomicU64 = AtomicU64::new(1);

/// A context cached for one runtime. `owner` dies with the runtime.
struct CachedContext {
    owner: Weak<()>,
    ctx: Arc<Context>,
}

thread_local! {
    /// Contexts of the current thread, per runtime id.
    static CONTEXT_CACHE: RefCell<HashMap<u64, CachedContext>> = RefCell::new(HashMap::new());
}

/// Drop cached contexts whose runtime is gone. A runtime only clears its
/// entry on the thread that drops it; other threads clear theirs here.
fn prune_dead(cache: &mut HashMap<u64, CachedContext>) {
    cache.retain(|_, entry| entry.owner.strong_count() > 0);
}

/// The scratch buffer shared by kernel launches.
#[derive(Debug)]
struct Workspace {
    ptr: DevicePtr,
    size: usize,
}

/// Executes graphs on one device library and operator library.
pub struct Runtime {
    id: u64,
    device: Arc<dyn DeviceRuntime>,
    library: Arc<dyn OpLibrary>,
    kernels: Arc<KernelRegistry>,
    contexts: RwLock<HashMap<ThreadId, Arc<Context>>>,
    alive: Arc<()>,
    workspace: Workspace,
    config: RuntimeConfig,
}

impl Runtime {
    /// Initialise the device library, bind the calling thread to
    /// `config.device` and allocate the workspace on it.
    pub fn new(
        device: Arc<dyn DeviceRuntime>,
        library: Arc<dyn OpLibrary>,
        kernels: Arc<KernelRegistry>,
        config: RuntimeConfig,
    ) -> Result<Self, RuntimeError> {
        native_call!(device.init())?;
        let size = config.workspace_size.as_bytes();
        let id = NEXT_RUNTIME_ID.fetch_add(1, Ordering::Relaxed);

        native_call!(device.set_device(config.device, config.device_id))?;
        let ptr = native_call!(device.malloc(size))?;
        let runtime = Self {
            id,
            device,
            library,
            kernels,
            contexts: RwLock::new(HashMap::new()),
            alive: Arc::new(()),
            workspace: Workspace { ptr, size },
            config,
        };
        runtime.init_thread_context(runtime.config.device, runtime.config.device_id)?;
        tracing::info!(
            device = %runtime.config.device,
            device_id = runtime.config.device_id,
            workspace = %runtime.config.workspace_size,
            "runtime created"
        );
        Ok(runtime)
    }

    /// A runtime on the host backend with every accelerator kind emulated
    /// and the built-in kernels registered.
    pub fn host(config: RuntimeConfig) -> Result<Self, RuntimeError> {
        let emulated: Vec<DeviceKind> = DeviceKind::ALL
            .into_iter()
            .filter(|d| !d.is_cpu())
            .collect();
        let (device, library) = host_backend(&emulated);
        let kernels = Arc::new(KernelRegistry::with_builtin_kernels()?);
        Self::new(device, library, kernels, config)
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn device_runtime(&self) -> &Arc<dyn DeviceRuntime> {
        &self.device
    }

    pub fn library(&self) -> &Arc<dyn OpLibrary> {
        &self.library
    }

    pub fn kernels(&self) -> &KernelRegistry {
        &self.kernels
    }

    // ── Contexts ───────────────────────────────────────────────────

    /// Bind the calling thread to `device`. A thread that already has a
    /// context keeps it and gets it back unchanged.
    pub fn init_thread_context(
        &self,
        device: DeviceKind,
        device_id: usize,
    ) -> Result<Arc<Context>, RuntimeError> {
        if let Some(ctx) = self.cached_context() {
            return Ok(ctx);
        }
        native_call!(self.device.set_device(device, device_id))?;
        let stream = native_call!(self.device.stream_create())?;
        let ctx = Arc::new(Context::new(device, device_id, stream));
        self.publish(Arc::clone(&ctx));
        tracing::debug!(context = %ctx, thread = ?thread::current().id(), "registered thread context");
        Ok(ctx)
    }

    /// The calling thread's context.
    pub fn current_context(&self) -> Result<Arc<Context>, RuntimeError> {
        if let Some(ctx) = self.cached_context() {
            return Ok(ctx);
        }
        let thread = thread::current().id();
        let found = self
            .contexts
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&thread)
            .cloned();
        match found {
            Some(ctx) => {
                self.cache(Arc::clone(&ctx));
                Ok(ctx)
            }
            None => Err(RuntimeError::NoContext {
                thread: format!("{thread:?}"),
            }),
        }
    }

    /// Rebind the calling thread to another device with a fresh stream.
    /// Contexts handed out earlier keep the old, destroyed stream.
    pub fn set_current_device(
        &self,
        device: DeviceKind,
        device_id: usize,
    ) -> Result<Arc<Context>, RuntimeError> {
        let old = self.current_context()?;
        if old.device() == device && old.device_id() == device_id {
            return Ok(old);
        }
        native_call!(self.device.set_device(device, device_id))?;
        let stream = native_call!(self.device.stream_create())?;
        native_call!(self.device.stream_destroy(old.stream()))?;
        let ctx = Arc::new(Context::new(device, device_id, stream));
        self.publish(Arc::clone(&ctx));
        tracing::debug!(context = %ctx, "switched thread device");
        Ok(ctx)
    }

    /// Whether the calling thread runs on the CPU.
    pub fn is_cpu(&self) -> Result<bool, RuntimeError> {
        Ok(self.current_context()?.is_cpu())
    }

    fn cached_context(&self) -> Option<Arc<Context>> {
        CONTEXT_CACHE.with(|c| {
            let mut cache = c.borrow_mut();
            match cache.get(&self.id) {
                Some(entry) => Some(Arc::clone(&entry.ctx)),
                None => {
                    prune_dead(&mut cache);
                    None
                }
            }
        })
    }

    fn cache(&self, ctx: Arc<Context>) {
        CONTEXT_CACHE.with(|c| {
            let mut cache = c.borrow_mut();
            prune_dead(&mut cache);
            let owner = Arc::downgrade(&self.alive);
            cache.insert(self.id, CachedContext { owner, ctx });
        });
    }

    fn publish(&self, ctx: Arc<Context>) {
        self.cache(Arc::clone(&ctx));
        self.contexts
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(thread::current().id(), ctx);
    }

    // ── Device queries ─────────────────────────────────────────────

    /// Initialise the device library. Idempotent.
    pub fn init(&self) -> Result<(), RuntimeError> {
        Ok(native_call!(self.device.init())?)
    }

    pub fn device_count(&self, kind: DeviceKind) -> Result<usize, RuntimeError> {
        Ok(native_call!(self.device.device_count(kind))?)
    }

    // ── Execution ──────────────────────────────────────────────────

    /// Run every operator of `graph` in order on the calling thread's
    /// context. Kernels are issued on the context's stream; call
    /// [`Runtime::synchronize`] before reading results on an asynchronous
    /// backend.
    pub fn run(&self, graph: &Graph) -> Result<RunMetrics, RuntimeError> {
        let ctx = self.current_context()?;
        self.run_in(&ctx, graph)
    }

    /// [`Runtime::run`] with an explicit context.
    pub fn run_in(&self, ctx: &Context, graph: &Graph) -> Result<RunMetrics, RuntimeError> {
        graph.check_before_run()?;
        let start = Instant::now();
        let mut metrics = RunMetrics::new(ctx.device());
        for op in graph.operators() {
            let record = self.kernels.get(ctx.device(), op.op_type())?;
            tracing::debug!(op = %op.guid(), kind = %op.op_type(), kernel = record.name(), "dispatching operator");
            let t0 = Instant::now();
            record.kernel().compute(op, graph, self, ctx)?;
            metrics.record_dispatch();
            if self.config.enable_profiling {
                metrics.record_op(op.guid(), op.op_type(), record.name(), t0.elapsed());
            }
        }
        metrics.finalise(start.elapsed());
        Ok(metrics)
    }

    /// Sort, bind symbolic dimensions, realise data and run.
    pub fn execute(
        &self,
        graph: &mut Graph,
        bindings: &Bindings,
    ) -> Result<RunMetrics, RuntimeError> {
        graph.topo_sort()?;
        graph.resolve(bindings)?;
        self.data_malloc(graph)?;
        let metrics = self.run(graph)?;
        tracing::info!(
            operators = metrics.operators_run,
            elapsed_ms = metrics.total_duration.as_secs_f64() * 1000.0,
            "executed graph"
        );
        Ok(metrics)
    }

    /// Block until all work on the current device has completed.
    pub fn synchronize(&self) -> Result<(), RuntimeError> {
        Ok(native_call!(self.device.device_synchronize())?)
    }

    // ── Memory ─────────────────────────────────────────────────────

    /// Realise every tensor's buffer on the calling thread's device.
    pub fn data_malloc(&self, graph: &mut Graph) -> Result<(), RuntimeError> {
        for tensor in graph.tensors_mut() {
            tensor.data_malloc(self)?;
        }
        Ok(())
    }

    /// Release every tensor's buffer.
    pub fn data_free(&self, graph: &mut Graph) -> Result<(), RuntimeError> {
        for tensor in graph.tensors_mut() {
            tensor.data_free(self)?;
        }
        Ok(())
    }

    /// The shared workspace, provided `size` bytes fit in it.
    pub fn get_workspace(&self, size: usize) -> Result<DevicePtr, RuntimeError> {
        if size > self.workspace.size {
            return Err(RuntimeError::WorkspaceTooSmall {
                requested: size,
                capacity: self.workspace.size,
            });
        }
        Ok(self.workspace.ptr)
    }

    pub fn workspace_size(&self) -> usize {
        self.workspace.size
    }

    pub fn malloc(&self, size: usize) -> Result<DevicePtr, RuntimeError> {
        Ok(native_call!(self.device.malloc(size))?)
    }

    pub fn malloc_host(&self, size: usize) -> Result<DevicePtr, RuntimeError> {
        Ok(native_call!(self.device.malloc_host(size))?)
    }

    pub fn free(&self, ptr: DevicePtr) -> Result<(), RuntimeError> {
        Ok(native_call!(self.device.free(ptr))?)
    }

    pub fn free_host(&self, ptr: DevicePtr) -> Result<(), RuntimeError> {
        Ok(native_call!(self.device.free_host(ptr))?)
    }

    pub fn memcpy(
        &self,
        dst: DevicePtr,
        src: DevicePtr,
        size: usize,
        kind: MemcpyKind,
    ) -> Result<(), RuntimeError> {
        Ok(native_call!(self.device.memcpy(dst, src, size, kind))?)
    }

    /// Copy on the calling thread's stream.
    pub fn memcpy_async(
        &self,
        dst: DevicePtr,
        src: DevicePtr,
        size: usize,
        kind: MemcpyKind,
    ) -> Result<(), RuntimeError> {
        let stream = self.current_context()?.stream();
        Ok(native_call!(self.device.memcpy_async(dst, src, size, kind, stream))?)
    }

    pub fn malloc_async(&self, size: usize) -> Result<DevicePtr, RuntimeError> {
        let stream = self.current_context()?.stream();
        Ok(native_call!(self.device.malloc_async(size, stream))?)
    }

    pub fn free_async(&self, ptr: DevicePtr) -> Result<(), RuntimeError> {
        let stream = self.current_context()?.stream();
        Ok(native_call!(self.device.free_async(ptr, stream))?)
    }
}

impl TensorMemory for Runtime {
    type Error = RuntimeError;

    fn active_device(&self) -> Result<DeviceKind, RuntimeError> {
        Ok(self.current_context()?.device())
    }

    fn alloc_device(&self, size: usize) -> Result<DevicePtr, RuntimeError> {
        self.malloc(size)
    }

    fn alloc_host(&self, size: usize) -> Result<DevicePtr, RuntimeError> {
        self.malloc_host(size)
    }

    fn dealloc_device(&self, ptr: DevicePtr) -> Result<(), RuntimeError> {
        self.free(ptr)
    }

    fn dealloc_host(&self, ptr: DevicePtr) -> Result<(), RuntimeError> {
        self.free_host(ptr)
    }

    fn memcpy(
        &self,
        dst: DevicePtr,
        src: DevicePtr,
        size: usize,
        kind: MemcpyKind,
    ) -> Result<(), RuntimeError> {
        Runtime::memcpy(self, dst, src, size, kind)
    }

    fn upload(&self, dst: DevicePtr, src: &[u8]) -> Result<(), RuntimeError> {
        Ok(native_call!(self.device.upload(dst, src))?)
    }

    fn download(&self, dst: &mut [u8], src: DevicePtr) -> Result<(), RuntimeError> {
        Ok(native_call!(self.device.download(dst, src))?)
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        if let Err(e) = native_call!(self.device.free(self.workspace.ptr)) {
            tracing::warn!(error = %e, "failed to free workspace");
        }
        let contexts = std::mem::take(
            self.contexts
                .get_mut()
                .unwrap_or_else(|poisoned| poisoned.into_inner()),
        );
        for ctx in contexts.values() {
            if let Err(e) = native_call!(self.device.stream_destroy(ctx.stream())) {
                tracing::warn!(error = %e, "failed to destroy stream");
            }
        }
        // Other threads prune their entries once `alive` is gone.
        let _ = CONTEXT_CACHE.try_with(|c| c.borrow_mut().remove(&self.id));
    }
}

#[cfg(test)]
fn cached_context_count() -> usize {
    CONTEXT_CACHE.with(|c| c.borrow().len())
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("id", &self.id)
            .field("workspace", &self.workspace)
            .field("kernels", &self.kernels.len())
            .field("config", &self.config)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ByteSize;
    use device_rt::DType;
    use graph_ir::{GraphBuilder, GraphError, OpType};

    fn small(device: DeviceKind) -> RuntimeConfig {
        RuntimeConfig::with_device(device, ByteSize::from_mb(1))
    }

    #[test]
    fn test_constructing_thread_has_context() {
        let rt = Runtime::host(small(DeviceKind::Cpu)).unwrap();
        let ctx = rt.current_context().unwrap();
        assert_eq!(ctx.device(), DeviceKind::Cpu);
        assert!(rt.is_cpu().unwrap());
        assert_eq!(rt.workspace_size(), 1024 * 1024);
    }

    #[test]
    fn test_init_thread_context_is_idempotent() {
        let rt = Runtime::host(small(DeviceKind::Cpu)).unwrap();
        let first = rt.current_context().unwrap();
        let again = rt.init_thread_context(DeviceKind::Nvidia, 0).unwrap();
        assert!(Arc::ptr_eq(&first, &again));
    }

    #[test]
    fn test_other_thread_needs_context() {
        let rt = Runtime::host(small(DeviceKind::Cpu)).unwrap();
        thread::scope(|s| {
            s.spawn(|| {
                assert!(matches!(
                    rt.current_context(),
                    Err(RuntimeError::NoContext { .. })
                ));
                let ctx = rt.init_thread_context(DeviceKind::Moore, 0).unwrap();
                assert_eq!(ctx.device(), DeviceKind::Moore);
                assert_eq!(rt.current_context().unwrap().device(), DeviceKind::Moore);
            });
        });
        assert_eq!(rt.current_context().unwrap().device(), DeviceKind::Cpu);
    }

    #[test]
    fn test_two_runtimes_keep_separate_contexts() {
        let a = Runtime::host(small(DeviceKind::Cpu)).unwrap();
        let b = Runtime::host(small(DeviceKind::Hygon)).unwrap();
        assert_eq!(b.current_context().unwrap().device(), DeviceKind::Hygon);
        assert_eq!(a.current_context().unwrap().device(), DeviceKind::Cpu);
    }

    #[test]
    fn test_dropped_runtime_leaves_no_cache_on_other_threads() {
        let a = Arc::new(Runtime::host(small(DeviceKind::Cpu)).unwrap());
        let b = Runtime::host(small(DeviceKind::Cpu)).unwrap();
        let (ready_tx, ready_rx) = std::sync::mpsc::channel();
        let (go_tx, go_rx) = std::sync::mpsc::channel::<()>();

        thread::scope(|s| {
            let worker_a = Arc::clone(&a);
            let b = &b;
            s.spawn(move || {
                worker_a.init_thread_context(DeviceKind::Cpu, 0).unwrap();
                b.init_thread_context(DeviceKind::Cpu, 0).unwrap();
                assert_eq!(cached_context_count(), 2);
                drop(worker_a);
                ready_tx.send(()).unwrap();

                go_rx.recv().unwrap();
                // `a` was dropped on the main thread; this thread's entry
                // goes on the next cache update.
                b.set_current_device(DeviceKind::Kunlun, 0).unwrap();
                assert_eq!(cached_context_count(), 1);
                assert_eq!(b.current_context().unwrap().device(), DeviceKind::Kunlun);
            });

            ready_rx.recv().unwrap();
            let a = Arc::try_unwrap(a).unwrap();
            drop(a);
            go_tx.send(()).unwrap();
        });
    }

    #[test]
    fn test_set_current_device() {
        let rt = Runtime::host(small(DeviceKind::Cpu)).unwrap();
        let old = rt.current_context().unwrap();
        let ctx = rt.set_current_device(DeviceKind::Kunlun, 0).unwrap();
        assert_eq!(ctx.device(), DeviceKind::Kunlun);
        assert_ne!(ctx.stream(), old.stream());
        assert!(!rt.is_cpu().unwrap());
        assert!(rt.set_current_device(DeviceKind::Kunlun, 3).is_err());
    }

    #[test]
    fn test_workspace_capacity() {
        let rt = Runtime::host(small(DeviceKind::Cpu)).unwrap();
        assert!(rt.get_workspace(0).is_ok());
        assert!(rt.get_workspace(1024 * 1024).is_ok());
        assert!(matches!(
            rt.get_workspace(1024 * 1024 + 1),
            Err(RuntimeError::WorkspaceTooSmall { .. })
        ));
    }

    #[test]
    fn test_device_queries() {
        let rt = Runtime::host(small(DeviceKind::Cpu)).unwrap();
        rt.init().unwrap();
        assert_eq!(rt.device_count(DeviceKind::Cpu).unwrap(), 1);
        assert_eq!(rt.device_count(DeviceKind::Iluvatar).unwrap(), 1);
    }

    #[test]
    fn test_async_memory_uses_context_stream() {
        let rt = Runtime::host(small(DeviceKind::Nvidia)).unwrap();
        let a = rt.malloc_async(16).unwrap();
        let b = rt.malloc(16).unwrap();
        rt.memcpy_async(b, a, 16, MemcpyKind::DeviceToDevice).unwrap();
        rt.synchronize().unwrap();
        rt.free_async(a).unwrap();
        rt.free(b).unwrap();
    }

    #[test]
    fn test_run_requires_sorted_graph() {
        let rt = Runtime::host(small(DeviceKind::Cpu)).unwrap();
        let mut b = GraphBuilder::new();
        let x = b.tensor([2], DType::F32).unwrap();
        b.add(x, x, None).unwrap();
        let graph = b.into_graph();
        assert!(matches!(
            rt.run(&graph),
            Err(RuntimeError::Graph(GraphError::InvalidGraph(_)))
        ));
    }

    #[test]
    fn test_run_without_kernel_fails() {
        let (device, library) = host_backend(&[]);
        let rt = Runtime::new(
            device,
            library,
            Arc::new(KernelRegistry::new()),
            small(DeviceKind::Cpu),
        )
        .unwrap();
        let mut b = GraphBuilder::new();
        let x = b.tensor([2], DType::F32).unwrap();
        b.mul(x, x, None).unwrap();
        let mut graph = b.into_graph();
        graph.topo_sort().unwrap();
        rt.data_malloc(&mut graph).unwrap();
        assert!(matches!(
            rt.run(&graph),
            Err(RuntimeError::KernelNotFound {
                device: DeviceKind::Cpu,
                op: OpType::Mul
            })
        ));
        rt.data_free(&mut graph).unwrap();
    }

    #[test]
    fn test_unsupported_device_fails_construction() {
        let (device, library) = host_backend(&[]);
        let err = Runtime::new(
            device,
            library,
            Arc::new(KernelRegistry::new()),
            small(DeviceKind::Cambricon),
        )
        .unwrap_err();
        assert!(matches!(err, RuntimeError::Device(_)));
    }
}
