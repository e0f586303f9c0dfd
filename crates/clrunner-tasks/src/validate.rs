//! Device result validation against host references.

use crate::error::{Result, TaskError};

/// Largest accepted absolute difference per element.
pub const DEFAULT_TOLERANCE: f32 = 1e-4;

/// Fail on the first element where `device` and `reference` differ by more
/// than `tolerance`.
pub fn compare(device: &[f32], reference: &[f32], tolerance: f32) -> Result<()> {
    if device.len() != reference.len() {
        return Err(TaskError::SizeMismatch {
            sizes: vec![device.len(), reference.len()],
        });
    }

    for (index, (d, r)) in device.iter().zip(reference).enumerate() {
        let diff = (d - r).abs();
        // NaN on either side is a mismatch
        if diff.is_nan() || diff > tolerance {
            tracing::error!(
                "[Validation] MISMATCH at [{}]: GPU={:.6}  SEQ={:.6}",
                index,
                d,
                r
            );
            return Err(TaskError::Validation {
                index,
                device: *d,
                reference: *r,
            });
        }
    }
    Ok(())
}
