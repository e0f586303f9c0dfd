//! Task-specific kernel argument binding.

use crate::backend::Backend;
use crate::error::BindError;

/// Binds the arguments of one kernel invocation.
///
/// Called exactly once per [`Engine::run`](crate::Engine::run), after every
/// device buffer exists and before the launch. `buffers[i]` was created from
/// buffer descriptor `i`. Anything else the binder needs (element counts,
/// scalar parameters) is carried by the binder value itself.
///
/// Closures of the shape `FnMut(&mut B::Kernel, &[B::Buffer]) -> Result<(), BindError>`
/// are binders too.
pub trait ArgumentBinder<B: Backend> {
    fn bind(&mut self, kernel: &mut B::Kernel, buffers: &[B::Buffer]) -> Result<(), BindError>;
}

impl<B, F> ArgumentBinder<B> for F
where
    B: Backend,
    F: FnMut(&mut B::Kernel, &[B::Buffer]) -> Result<(), BindError>,
{
    fn bind(&mut self, kernel: &mut B::Kernel, buffers: &[B::Buffer]) -> Result<(), BindError> {
        self(kernel, buffers)
    }
}

/// Binds every buffer to the argument slot of the same index, then appends
/// scalar arguments after them.
///
/// Covers kernels shaped `k(global T* b0, ..., global T* bn, scalar s0, ...)`.
#[derive(Debug, Clone, Default)]
pub struct BuffersThen<S> {
    scalars: Vec<S>,
}

impl<S> BuffersThen<S> {
    pub fn new(scalars: impl Into<Vec<S>>) -> Self {
        BuffersThen {
            scalars: scalars.into(),
        }
    }
}

impl<B, S> ArgumentBinder<B> for BuffersThen<S>
where
    B: Backend,
    S: bytemuck::Pod,
{
    fn bind(&mut self, kernel: &mut B::Kernel, buffers: &[B::Buffer]) -> Result<(), BindError> {
        use crate::backend::KernelArgs;

        for (index, buffer) in buffers.iter().enumerate() {
            kernel.set_buffer(index as u32, buffer)?;
        }
        let offset = buffers.len() as u32;
        for (i, scalar) in self.scalars.iter().enumerate() {
            kernel.set_scalar(offset + i as u32, scalar)?;
        }
        Ok(())
    }
}
