//! Missing-value replacement.
//!
//! A sample equal to `0.0` is missing. It is replaced by the mean of the
//! nearest present samples to its left and right; at either end of the array
//! the one available neighbour is used, and an array with no present sample
//! stays all zero. Present samples are copied unchanged.

use crate::element_count;
use crate::error::{Result, TaskError};
use crate::LOCAL_SIZE;
use clrunner::{
    ArgumentBinder, Backend, BindError, BufferDescriptor, Engine, KernelArgs, KernelDescriptor,
    RunReport,
};
use std::path::Path;

pub const SOURCE_FILE: &str = "replace_missing.cl";
pub const ENTRY_POINT: &str = "replace_missing_kernel";

/// Present samples in [`fill_with_gaps`] are this far apart.
pub const GAP_PERIOD: usize = 12;

/// Binds `(input, result, n)`.
#[derive(Debug, Clone, Copy)]
struct ReplaceMissingArgs {
    n: i32,
}

impl<B: Backend> ArgumentBinder<B> for ReplaceMissingArgs {
    fn bind(
        &mut self,
        kernel: &mut B::Kernel,
        buffers: &[B::Buffer],
    ) -> std::result::Result<(), BindError> {
        kernel.set_buffer(0, &buffers[0])?;
        kernel.set_buffer(1, &buffers[1])?;
        kernel.set_scalar(2, &self.n)
    }
}

/// Replace missing samples of `input` into `result` on the device.
///
/// The element count is `input.len()`; `result` must be the same length.
pub fn replace_missing<B: Backend>(
    engine: &Engine<'_, B>,
    input: &[f32],
    result: &mut [f32],
    kernel_dir: &Path,
) -> Result<RunReport> {
    if input.len() != result.len() {
        tracing::error!(
            "[replace_missing] Size mismatch ({}, {})",
            input.len(),
            result.len()
        );
        return Err(TaskError::SizeMismatch {
            sizes: vec![input.len(), result.len()],
        });
    }

    let n = element_count(input.len())?;
    let kernel = KernelDescriptor::linear(
        kernel_dir.join(SOURCE_FILE),
        ENTRY_POINT,
        input.len(),
        LOCAL_SIZE,
    )?;
    let mut buffers = [
        BufferDescriptor::input(input),
        BufferDescriptor::output(result),
    ];

    Ok(engine.run(&kernel, &mut buffers, &mut ReplaceMissingArgs { n })?)
}

/// Replacement value for sample `index`.
pub fn replaced_at(input: &[f32], index: usize) -> f32 {
    let value = input[index];
    if value != 0.0 {
        return value;
    }
    let left = input[..index].iter().rev().find(|v| **v != 0.0);
    let right = input[index + 1..].iter().find(|v| **v != 0.0);
    match (left, right) {
        (Some(l), Some(r)) => (l + r) * 0.5,
        (Some(l), None) => *l,
        (None, Some(r)) => *r,
        (None, None) => 0.0,
    }
}

/// Host reference for [`replace_missing`].
pub fn replace_missing_seq(input: &[f32], result: &mut [f32]) {
    for (index, out) in result.iter_mut().enumerate().take(input.len()) {
        *out = replaced_at(input, index);
    }
}

/// `start + i` at every [`GAP_PERIOD`]th index, `0.0` (missing) elsewhere.
pub fn fill_with_gaps(len: usize, start: f32) -> Vec<f32> {
    (0..len)
        .map(|i| {
            if i % GAP_PERIOD == 0 {
                start + i as f32
            } else {
                0.0
            }
        })
        .collect()
}
