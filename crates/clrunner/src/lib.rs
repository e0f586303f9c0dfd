//! OpenCL kernel runner
//!
//! Runs a single OpenCL compute kernel from a source file on one device:
//! compile, allocate buffers, bind arguments, launch, read results back,
//! and release everything the invocation acquired.
//!
//! # Architecture
//!
//! ```text
//!   DeviceContext ──────────────┐   (platform, device, context, in-order queue)
//!                               │
//!   KernelDescriptor ──┐        ▼
//!   BufferDescriptor[] ┼──► Engine::run ──► RunReport
//!   ArgumentBinder ────┘        │
//!                               └── Invocation guard: teardown on every path
//! ```
//!
//! The engine is generic over a [`Backend`]. The OpenCL backend lives behind
//! the `opencl` feature; the `testing` feature adds a host-side
//! `RecordingBackend` that journals every device call, so the engine can be
//! exercised without a GPU.
//!
//! # Example
//!
//! ```ignore
//! use clrunner::{BufferDescriptor, BuffersThen, DeviceContext, DeviceSelection, Engine, KernelDescriptor};
//!
//! let device = DeviceContext::acquire(&DeviceSelection::first_gpu())?;
//! let engine = Engine::new(&device);
//!
//! let a = vec![1.0f32; 1024];
//! let b = vec![2.0f32; 1024];
//! let mut sum = vec![0.0f32; 1024];
//! let kernel = KernelDescriptor::linear("kernels/vector.cl", "add_vectors_kernel", 1024, 256)?;
//! let mut buffers = [
//!     BufferDescriptor::input(&a),
//!     BufferDescriptor::input(&b),
//!     BufferDescriptor::output(&mut sum),
//! ];
//! engine.run(&kernel, &mut buffers, &mut BuffersThen::new([1024i32]))?;
//! ```

pub mod backend;
pub mod binder;
pub mod config;
pub mod descriptor;
pub mod engine;
pub mod error;
#[cfg(feature = "opencl")]
pub mod opencl;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use backend::{Backend, BuildFailure, KernelArgs};
pub use binder::{ArgumentBinder, BuffersThen};
pub use config::{DeviceKind, DeviceSelection, EngineConfig};
pub use descriptor::{
    round_up_global, AccessMode, BufferDescriptor, HostMemory, KernelDescriptor, NdRange,
    MAX_WORK_DIM,
};
pub use engine::{Engine, RunReport};
pub use error::{AcquireStage, BindError, ClError, DeviceError, Result};
#[cfg(feature = "opencl")]
pub use opencl::{probe_devices, DeviceContext, DeviceInfo};
