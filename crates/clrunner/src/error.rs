//! Error types for the OpenCL kernel runner.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for runner operations.
pub type Result<T> = std::result::Result<T, ClError>;

/// Stage of device acquisition that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireStage {
    Platform,
    Device,
    Context,
    Queue,
}

impl fmt::Display for AcquireStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AcquireStage::Platform => "platform",
            AcquireStage::Device => "device",
            AcquireStage::Context => "context",
            AcquireStage::Queue => "command queue",
        };
        f.write_str(name)
    }
}

/// A failure reported by the device runtime.
///
/// `code` is the runtime status code (an OpenCL `cl_int` for the OpenCL
/// backend), `message` a readable rendering of it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message} (code {code})")]
pub struct DeviceError {
    pub code: i32,
    pub message: String,
}

impl DeviceError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        DeviceError {
            code,
            message: message.into(),
        }
    }
}

#[cfg(feature = "opencl")]
impl From<opencl3::error_codes::ClError> for DeviceError {
    fn from(err: opencl3::error_codes::ClError) -> Self {
        DeviceError::new(err.0, err.to_string())
    }
}

/// Error returned by an [`ArgumentBinder`](crate::ArgumentBinder).
///
/// A binder failure is an abort requested by task logic, not an engine fault.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BindError {
    /// The device rejected a single argument.
    #[error("argument {index} rejected: {source}")]
    Argument {
        index: u32,
        #[source]
        source: DeviceError,
    },

    /// The binder decided not to run the kernel.
    #[error("binding rejected: {0}")]
    Rejected(String),
}

/// Errors that can occur while acquiring a device or running a kernel.
#[derive(Error, Debug)]
pub enum ClError {
    /// Platform, device, context or queue could not be created.
    #[error("device acquisition failed at {stage}: {source}")]
    DeviceAcquisition {
        stage: AcquireStage,
        #[source]
        source: DeviceError,
    },

    /// Kernel source file could not be read.
    #[error("could not load kernel source {}: {source}", .path.display())]
    SourceLoad {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Kernel source failed to compile. `log` is the full build log.
    #[error("kernel build failed (code {code}):\n{log}")]
    Compile { code: i32, log: String },

    /// The entry point does not exist in the compiled program.
    #[error("kernel entry point `{name}` not found: {source}")]
    SymbolResolution {
        name: String,
        #[source]
        source: DeviceError,
    },

    /// Device buffer allocation failed.
    #[error("allocation of buffer {index} ({size} bytes) failed: {source}")]
    BufferAllocation {
        index: usize,
        size: usize,
        #[source]
        source: DeviceError,
    },

    /// The argument binder aborted the run.
    #[error("argument binding aborted: {0}")]
    ArgumentBind(#[from] BindError),

    /// Enqueueing the kernel failed.
    #[error("kernel launch failed: {0}")]
    Launch(#[source] DeviceError),

    /// Device-to-host copy failed.
    #[error("readback of buffer {index} failed: {source}")]
    Readback {
        index: usize,
        #[source]
        source: DeviceError,
    },

    /// Waiting for the command queue to drain failed.
    #[error("command queue synchronization failed: {0}")]
    Synchronization(#[source] DeviceError),

    /// Buffer or kernel descriptor is malformed.
    #[error("invalid descriptor: {0}")]
    InvalidDescriptor(String),

    /// Configuration file missing or malformed.
    #[error("configuration error: {0}")]
    Config(String),
}

impl ClError {
    /// Check if the run was aborted by the task's own binder.
    pub fn is_caller_abort(&self) -> bool {
        matches!(self, ClError::ArgumentBind(_))
    }

    /// Check if this error indicates the device or its runtime misbehaved.
    pub fn is_device_error(&self) -> bool {
        matches!(
            self,
            ClError::DeviceAcquisition { .. }
                | ClError::BufferAllocation { .. }
                | ClError::Launch(_)
                | ClError::Readback { .. }
                | ClError::Synchronization(_)
        )
    }

    /// Build log text, if this is a compile failure.
    pub fn build_log(&self) -> Option<&str> {
        match self {
            ClError::Compile { log, .. } => Some(log),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bind_error_is_caller_abort() {
        let err: ClError = BindError::Rejected("n out of range".into()).into();
        assert!(err.is_caller_abort());
        assert!(!err.is_device_error());
    }

    #[test]
    fn test_compile_error_exposes_log() {
        let err = ClError::Compile {
            code: -11,
            log: "error: use of undeclared identifier 'x'".into(),
        };
        assert_eq!(err.build_log(), Some("error: use of undeclared identifier 'x'"));
        assert!(err.to_string().contains("undeclared identifier"));
    }

    #[test]
    fn test_acquisition_message_names_stage() {
        let err = ClError::DeviceAcquisition {
            stage: AcquireStage::Queue,
            source: DeviceError::new(-5, "CL_OUT_OF_RESOURCES"),
        };
        assert!(err.is_device_error());
        assert_eq!(
            err.to_string(),
            "device acquisition failed at command queue: CL_OUT_OF_RESOURCES (code -5)"
        );
    }
}
