//! Device backend abstraction.
//!
//! The [`Engine`](crate::Engine) drives any type implementing [`Backend`].
//! [`DeviceContext`](crate::DeviceContext) is the OpenCL implementation;
//! [`RecordingBackend`](crate::testing::RecordingBackend) runs host closures
//! and records every device operation for tests.
//!
//! Every resource type releases its device object when dropped, exactly once.

use crate::descriptor::{AccessMode, NdRange};
use crate::error::{BindError, DeviceError};
use bytemuck::Pod;

/// Failed program build.
#[derive(Debug, Clone)]
pub struct BuildFailure {
    /// Runtime status code of the failed build.
    pub code: i32,
    /// Full build log as reported by the compiler.
    pub log: String,
}

/// Setting kernel arguments, implemented by every backend kernel type.
pub trait KernelArgs<Buf> {
    /// Bind a device buffer to argument `index`.
    fn set_buffer(&mut self, index: u32, buffer: &Buf) -> Result<(), BindError>;

    /// Bind a plain value to argument `index`.
    fn set_scalar<T: Pod>(&mut self, index: u32, value: &T) -> Result<(), BindError>;
}

/// One device, one context and one in-order command queue.
///
/// Commands on a backend execute in submission order. At most one
/// [`Engine::run`](crate::Engine::run) may be in flight per backend: runs
/// from several threads on one backend need external serialization, or one
/// backend per thread.
pub trait Backend {
    type Buffer;
    type Program;
    type Kernel: KernelArgs<Self::Buffer>;

    /// Allocate a device buffer.
    ///
    /// When `upload` is present its bytes are copied in by the allocation
    /// itself; no separate transfer command is issued.
    fn create_buffer(
        &self,
        access: AccessMode,
        size: usize,
        upload: Option<&[u8]>,
    ) -> Result<Self::Buffer, DeviceError>;

    /// Compile `source` for this backend's device.
    fn build_program(&self, source: &str, options: &str) -> Result<Self::Program, BuildFailure>;

    /// Resolve an entry point of a built program.
    fn create_kernel(&self, program: &Self::Program, name: &str)
        -> Result<Self::Kernel, DeviceError>;

    /// Enqueue an N-dimensional range execution. Does not wait.
    fn enqueue_nd_range(&self, kernel: &Self::Kernel, range: &NdRange) -> Result<(), DeviceError>;

    /// Copy `dst.len()` bytes from the start of `buffer` into `dst`.
    ///
    /// # Safety
    ///
    /// With `blocking == false` the copy may still be in flight on return:
    /// `dst` must stay valid and unaliased until a later blocking command or
    /// [`finish`](Backend::finish) returns.
    unsafe fn enqueue_read(
        &self,
        buffer: &Self::Buffer,
        blocking: bool,
        dst: &mut [u8],
    ) -> Result<(), DeviceError>;

    /// Block until every enqueued command has completed.
    fn finish(&self) -> Result<(), DeviceError>;
}
