//! Task error types.

use clrunner::ClError;
use thiserror::Error;

/// Result type for task operations.
pub type Result<T> = std::result::Result<T, TaskError>;

#[derive(Error, Debug)]
pub enum TaskError {
    /// The kernel run failed.
    #[error(transparent)]
    Cl(#[from] ClError),

    /// Input and output arrays disagree in length.
    #[error("size mismatch {sizes:?}")]
    SizeMismatch { sizes: Vec<usize> },

    /// Element count does not fit the kernel's `int` parameter.
    #[error("{0} elements exceed the kernel's int range")]
    TooManyElements(usize),

    /// Device result differs from the host reference.
    #[error("validation mismatch at [{index}]: device={device:.6} reference={reference:.6}")]
    Validation {
        index: usize,
        device: f32,
        reference: f32,
    },
}
