//! Kernel tasks built on `clrunner`.
//!
//! - [`vector_add`]: element-wise `a + b`
//! - [`replace_missing`]: fill zero gaps from their nearest present neighbours
//!
//! Each task ships its OpenCL source under [`KERNEL_DIR`], a host reference
//! implementation, and runs against any [`clrunner::Backend`].

pub mod error;
pub mod replace_missing;
pub mod validate;
pub mod vector_add;

pub use error::{Result, TaskError};
pub use replace_missing::{fill_with_gaps, replace_missing, replace_missing_seq};
pub use validate::{compare, DEFAULT_TOLERANCE};
pub use vector_add::{add_vectors, add_vectors_seq, fill_seq};

/// Directory holding the bundled `.cl` kernel sources.
pub const KERNEL_DIR: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/kernels");

/// Work-group size used by every task.
pub const LOCAL_SIZE: usize = 256;

/// Element count as the `int` kernels take it.
pub(crate) fn element_count(n: usize) -> Result<i32> {
    i32::try_from(n).map_err(|_| TaskError::TooManyElements(n))
}

/// `label [size=N]: v v v ...`, showing at most `max` values to one decimal.
pub fn preview(label: &str, values: &[f32], max: usize) -> String {
    let mut line = format!("{} [size={}]: ", label, values.len());
    for v in values.iter().take(max) {
        line.push_str(&format!("{:.1} ", v));
    }
    if values.len() > max {
        line.push_str("...");
    }
    line
}
