//! Element-wise vector addition.

use crate::error::{Result, TaskError};
use crate::{element_count, LOCAL_SIZE};
use clrunner::{
    ArgumentBinder, Backend, BindError, BufferDescriptor, Engine, KernelArgs, KernelDescriptor,
    RunReport,
};
use std::path::Path;

pub const SOURCE_FILE: &str = "vector.cl";
pub const ENTRY_POINT: &str = "add_vectors_kernel";

/// Binds `(a, b, result, n)`.
#[derive(Debug, Clone, Copy)]
struct VectorAddArgs {
    n: i32,
}

impl<B: Backend> ArgumentBinder<B> for VectorAddArgs {
    fn bind(
        &mut self,
        kernel: &mut B::Kernel,
        buffers: &[B::Buffer],
    ) -> std::result::Result<(), BindError> {
        kernel.set_buffer(0, &buffers[0])?;
        kernel.set_buffer(1, &buffers[1])?;
        kernel.set_buffer(2, &buffers[2])?;
        kernel.set_scalar(3, &self.n)
    }
}

/// `result[i] = a[i] + b[i]` on the device.
///
/// All three slices must have the same, non-zero length.
pub fn add_vectors<B: Backend>(
    engine: &Engine<'_, B>,
    a: &[f32],
    b: &[f32],
    result: &mut [f32],
    kernel_dir: &Path,
) -> Result<RunReport> {
    if a.len() != b.len() || a.len() != result.len() {
        tracing::error!(
            "[add_vectors] Size mismatch ({}, {}, {})",
            a.len(),
            b.len(),
            result.len()
        );
        return Err(TaskError::SizeMismatch {
            sizes: vec![a.len(), b.len(), result.len()],
        });
    }

    let n = element_count(a.len())?;
    let kernel = KernelDescriptor::linear(
        kernel_dir.join(SOURCE_FILE),
        ENTRY_POINT,
        a.len(),
        LOCAL_SIZE,
    )?;
    let mut buffers = [
        BufferDescriptor::input(a),
        BufferDescriptor::input(b),
        BufferDescriptor::output(result),
    ];

    let report = engine.run(&kernel, &mut buffers, &mut VectorAddArgs { n })?;
    Ok(report)
}

/// Host reference for [`add_vectors`].
pub fn add_vectors_seq(a: &[f32], b: &[f32], out: &mut [f32]) {
    for ((o, x), y) in out.iter_mut().zip(a).zip(b) {
        *o = x + y;
    }
}

/// `start, start + 1, start + 2, ...`
pub fn fill_seq(len: usize, start: f32) -> Vec<f32> {
    (0..len).map(|i| start + i as f32).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fill_seq() {
        assert_eq!(fill_seq(4, 0.5), vec![0.5, 1.5, 2.5, 3.5]);
        assert!(fill_seq(0, 1.0).is_empty());
    }

    #[test]
    fn test_add_vectors_seq() {
        let a = fill_seq(5, 1.0);
        let b = fill_seq(5, 0.5);
        let mut out = vec![0.0; 5];
        add_vectors_seq(&a, &b, &mut out);
        assert_eq!(out, vec![1.5, 3.5, 5.5, 7.5, 9.5]);
    }
}
