//! Kernel invocation engine.
//!
//! One call to [`Engine::run`] performs the whole pipeline:
//!
//! ```text
//! ┌────────────┐   ┌─────────┐   ┌─────────┐   ┌──────────┐   ┌──────┐   ┌────────┐   ┌──────────┐
//! │ load source│ → │ compile │ → │ resolve │ → │ allocate │ → │ bind │ → │ launch │ → │ readback │
//! └────────────┘   └─────────┘   └─────────┘   └──────────┘   └──────┘   └────────┘   └──────────┘
//!        │              │             │              │            │           │             │
//!        └──────────────┴─────────────┴──── teardown (always, exactly once) ──┴─────────────┘
//! ```
//!
//! Every resource acquired by a stage is owned by an [`Invocation`] guard.
//! When the guard drops, on success or at any failing stage, it releases the
//! buffers in reverse allocation order, then the kernel, the program and the
//! source text. Resources that were never acquired are never released.

use crate::backend::{Backend, BuildFailure};
use crate::binder::ArgumentBinder;
use crate::config::EngineConfig;
use crate::descriptor::{BufferDescriptor, KernelDescriptor};
use crate::error::{ClError, Result};
use std::fs;
use std::time::{Duration, Instant};

/// Summary of a successful run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RunReport {
    /// Device buffers created.
    pub buffers: usize,
    /// Bytes copied in by allocations.
    pub bytes_uploaded: usize,
    /// Bytes copied back to host memory.
    pub bytes_read_back: usize,
    /// Wall time of the whole invocation.
    pub elapsed: Duration,
}

/// Resources owned by one invocation.
struct Invocation<'b, B: Backend> {
    backend: &'b B,
    source: Option<String>,
    program: Option<B::Program>,
    kernel: Option<B::Kernel>,
    buffers: Vec<B::Buffer>,
    reads_in_flight: bool,
}

impl<'b, B: Backend> Invocation<'b, B> {
    fn new(backend: &'b B, buffer_count: usize) -> Self {
        Invocation {
            backend,
            source: None,
            program: None,
            kernel: None,
            buffers: Vec::with_capacity(buffer_count),
            reads_in_flight: false,
        }
    }
}

impl<B: Backend> Drop for Invocation<'_, B> {
    fn drop(&mut self) {
        // Host slices targeted by non-blocking reads are released by the
        // caller once we return.
        if self.reads_in_flight {
            if let Err(e) = self.backend.finish() {
                tracing::error!("queue drain during teardown failed: {}", e);
            }
        }

        let count = self.buffers.len();
        while let Some(buffer) = self.buffers.pop() {
            drop(buffer);
        }
        drop(self.kernel.take());
        drop(self.program.take());
        drop(self.source.take());

        tracing::trace!(buffers = count, "invocation resources released");
    }
}

/// Generic compile → allocate → bind → launch → readback engine.
///
/// The engine borrows its backend; any number of sequential runs may share
/// one backend, and every run releases everything it acquired before it
/// returns.
pub struct Engine<'b, B: Backend> {
    backend: &'b B,
    build_options: String,
}

impl<'b, B: Backend> Engine<'b, B> {
    /// Create an engine with no compiler options.
    pub fn new(backend: &'b B) -> Self {
        Engine {
            backend,
            build_options: String::new(),
        }
    }

    /// Create an engine using the compiler options of `config`.
    pub fn with_config(backend: &'b B, config: &EngineConfig) -> Self {
        Self::new(backend).with_build_options(config.build_options.clone())
    }

    /// Set the options passed to the kernel compiler.
    pub fn with_build_options(mut self, options: impl Into<String>) -> Self {
        self.build_options = options.into();
        self
    }

    pub fn backend(&self) -> &'b B {
        self.backend
    }

    pub fn build_options(&self) -> &str {
        &self.build_options
    }

    /// Run one kernel invocation.
    ///
    /// Buffers are created from `buffers` in order; `binder` is called once
    /// with them before the launch. After the launch every descriptor with
    /// readback requested and writable host memory receives exactly `size`
    /// bytes. Only the last readback blocks; if nothing is read back the
    /// queue is drained instead. Either way all device work is complete when
    /// this returns `Ok`.
    ///
    /// The first failure aborts the run and is returned after teardown.
    ///
    /// If a readback fails after earlier non-blocking reads were issued,
    /// teardown drains the queue before releasing buffers. Should that drain
    /// fail too, it is logged and the readback error is still the one
    /// returned. The device state is then unknown, and host slices targeted
    /// by the earlier reads must not be trusted; drop the backend rather
    /// than reuse it.
    pub fn run<A>(
        &self,
        kernel: &KernelDescriptor,
        buffers: &mut [BufferDescriptor<'_>],
        binder: &mut A,
    ) -> Result<RunReport>
    where
        A: ArgumentBinder<B> + ?Sized,
    {
        let start = Instant::now();
        kernel.validate()?;

        let mut inv = Invocation::new(self.backend, buffers.len());
        let mut report = RunReport::default();

        // Load
        let path = kernel.source();
        let source = fs::read_to_string(path).map_err(|e| {
            tracing::error!("could not load kernel source {}: {}", path.display(), e);
            ClError::SourceLoad {
                path: path.to_path_buf(),
                source: e,
            }
        })?;
        tracing::debug!(path = %path.display(), bytes = source.len(), "kernel source loaded");
        let source: &str = inv.source.insert(source);

        // Compile
        let program = self
            .backend
            .build_program(source, &self.build_options)
            .map_err(|BuildFailure { code, log }| {
                tracing::error!("kernel build failed (code {}). Build log:\n{}", code, log);
                ClError::Compile { code, log }
            })?;
        let program = &*inv.program.insert(program);

        // Resolve
        let name = kernel.entry_point();
        let resolved = self.backend.create_kernel(program, name).map_err(|e| {
            tracing::error!("kernel entry point `{}` not found: {}", name, e);
            ClError::SymbolResolution {
                name: name.to_string(),
                source: e,
            }
        })?;
        let resolved = inv.kernel.insert(resolved);
        tracing::debug!(entry = name, "kernel resolved");

        // Allocate, uploading readable host data in the same call
        for (index, desc) in buffers.iter().enumerate() {
            let upload = desc.upload_bytes();
            let buffer = self
                .backend
                .create_buffer(desc.access(), desc.size(), upload)
                .map_err(|e| {
                    tracing::error!("allocation of buffer {} failed: {}", index, e);
                    ClError::BufferAllocation {
                        index,
                        size: desc.size(),
                        source: e,
                    }
                })?;
            inv.buffers.push(buffer);
            report.bytes_uploaded += upload.map_or(0, <[u8]>::len);
        }
        report.buffers = inv.buffers.len();
        tracing::debug!(
            buffers = report.buffers,
            uploaded = report.bytes_uploaded,
            "device buffers allocated"
        );

        // Bind
        binder.bind(resolved, &inv.buffers).map_err(|e| {
            tracing::warn!("argument binder aborted the run: {}", e);
            ClError::from(e)
        })?;

        // Launch
        self.backend
            .enqueue_nd_range(resolved, kernel.range())
            .map_err(|e| {
                tracing::error!("kernel launch failed: {}", e);
                ClError::Launch(e)
            })?;
        tracing::debug!(
            global = ?kernel.range().global,
            local = ?kernel.range().local,
            "kernel enqueued"
        );

        // Readback: block on the last transfer only
        let last = buffers.iter().rposition(|d| d.wants_readback());
        match last {
            Some(last) => {
                for (index, desc) in buffers.iter_mut().enumerate().take(last + 1) {
                    let Some(dst) = desc.readback_target() else {
                        continue;
                    };
                    let blocking = index == last;
                    let len = dst.len();
                    // SAFETY: `dst` borrows caller memory that outlives this call.
                    // Non-blocking copies are completed by the final blocking
                    // read on the same in-order queue, or by the drain in
                    // teardown if a later read fails.
                    let result = unsafe {
                        self.backend
                            .enqueue_read(&inv.buffers[index], blocking, dst)
                    };
                    if let Err(e) = result {
                        tracing::error!("readback of buffer {} failed: {}", index, e);
                        return Err(ClError::Readback { index, source: e });
                    }
                    if !blocking {
                        inv.reads_in_flight = true;
                    }
                    report.bytes_read_back += len;
                }
                inv.reads_in_flight = false;
            }
            None => {
                self.backend.finish().map_err(|e| {
                    tracing::error!("waiting for kernel completion failed: {}", e);
                    ClError::Synchronization(e)
                })?;
            }
        }

        drop(inv);
        report.elapsed = start.elapsed();
        tracing::debug!(
            entry = name,
            read_back = report.bytes_read_back,
            elapsed_us = report.elapsed.as_micros() as u64,
            "kernel run complete"
        );
        Ok(report)
    }
}
