//! Per-invocation buffer and kernel descriptors.
//!
//! Descriptors are plain data handed to [`Engine::run`](crate::Engine::run).
//! The engine never keeps them past the call.
//!
//! ```text
//! descriptor i ──allocate──▶ device buffer i ──bind──▶ kernel argument slot(s)
//!      │                                                    │
//!      └─────────────── readback (if requested) ◀───────────┘
//! ```

use crate::error::{ClError, Result};
use bytemuck::Pod;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// How the kernel accesses a device buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessMode {
    ReadOnly,
    WriteOnly,
    ReadWrite,
}

impl AccessMode {
    /// Whether the kernel reads the buffer, so host data must be uploaded.
    pub fn is_readable(self) -> bool {
        matches!(self, AccessMode::ReadOnly | AccessMode::ReadWrite)
    }
}

/// Caller-owned host memory backing a buffer descriptor.
#[derive(Debug, Default)]
pub enum HostMemory<'a> {
    /// No host memory; the buffer lives on the device only.
    #[default]
    Absent,
    /// Host memory that can be uploaded but never written back.
    Shared(&'a [u8]),
    /// Host memory that can be uploaded and receive readback.
    Exclusive(&'a mut [u8]),
}

impl HostMemory<'_> {
    fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            HostMemory::Absent => None,
            HostMemory::Shared(bytes) => Some(&bytes[..]),
            HostMemory::Exclusive(bytes) => Some(&bytes[..]),
        }
    }
}

/// Describes one device buffer of an invocation.
///
/// The buffer created from descriptor `i` is always element `i` of the
/// handle slice passed to the [`ArgumentBinder`](crate::ArgumentBinder).
#[derive(Debug)]
pub struct BufferDescriptor<'a> {
    host: HostMemory<'a>,
    size: usize,
    access: AccessMode,
    read_back: bool,
}

impl<'a> BufferDescriptor<'a> {
    /// Read-only kernel input, uploaded from `data`.
    pub fn input<T: Pod>(data: &'a [T]) -> Self {
        let bytes: &[u8] = bytemuck::cast_slice(data);
        BufferDescriptor {
            size: bytes.len(),
            host: HostMemory::Shared(bytes),
            access: AccessMode::ReadOnly,
            read_back: false,
        }
    }

    /// Write-only kernel output, read back into `data` after the launch.
    pub fn output<T: Pod>(data: &'a mut [T]) -> Self {
        let bytes: &mut [u8] = bytemuck::cast_slice_mut(data);
        BufferDescriptor {
            size: bytes.len(),
            host: HostMemory::Exclusive(bytes),
            access: AccessMode::WriteOnly,
            read_back: true,
        }
    }

    /// Buffer the kernel both reads and writes; uploaded and read back.
    pub fn read_write<T: Pod>(data: &'a mut [T]) -> Self {
        let bytes: &mut [u8] = bytemuck::cast_slice_mut(data);
        BufferDescriptor {
            size: bytes.len(),
            host: HostMemory::Exclusive(bytes),
            access: AccessMode::ReadWrite,
            read_back: true,
        }
    }

    /// Device-only buffer of `size` bytes with no host counterpart.
    pub fn scratch(size: usize, access: AccessMode) -> Self {
        BufferDescriptor {
            host: HostMemory::Absent,
            size,
            access,
            read_back: false,
        }
    }

    /// Descriptor from its raw parts.
    ///
    /// `size` may not exceed the host memory length when host memory is present.
    pub fn from_parts(
        host: HostMemory<'a>,
        size: usize,
        access: AccessMode,
        read_back: bool,
    ) -> Result<Self> {
        if let Some(bytes) = host.as_bytes() {
            if bytes.len() < size {
                return Err(ClError::InvalidDescriptor(format!(
                    "host memory of {} bytes is smaller than buffer size {}",
                    bytes.len(),
                    size
                )));
            }
        }
        Ok(BufferDescriptor {
            host,
            size,
            access,
            read_back,
        })
    }

    /// Override the readback flag.
    pub fn with_read_back(mut self, read_back: bool) -> Self {
        self.read_back = read_back;
        self
    }

    /// Size in bytes.
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn access(&self) -> AccessMode {
        self.access
    }

    pub fn read_back(&self) -> bool {
        self.read_back
    }

    pub fn has_host_memory(&self) -> bool {
        !matches!(self.host, HostMemory::Absent)
    }

    /// Host memory is present and the kernel reads the buffer.
    ///
    /// Write-only buffers are never uploaded, whatever host memory they carry.
    pub fn upload_needed(&self) -> bool {
        self.has_host_memory() && self.access.is_readable()
    }

    /// Bytes to copy in as part of the allocation, if any.
    pub(crate) fn upload_bytes(&self) -> Option<&[u8]> {
        if !self.upload_needed() {
            return None;
        }
        self.host.as_bytes().map(|bytes| &bytes[..self.size])
    }

    /// Host destination for readback: readback requested and writable host memory.
    pub(crate) fn readback_target(&mut self) -> Option<&mut [u8]> {
        if !self.read_back {
            return None;
        }
        let size = self.size;
        match &mut self.host {
            HostMemory::Exclusive(bytes) => Some(&mut bytes[..size]),
            HostMemory::Absent | HostMemory::Shared(_) => None,
        }
    }

    pub(crate) fn wants_readback(&self) -> bool {
        self.read_back && matches!(self.host, HostMemory::Exclusive(_))
    }
}

/// Maximum supported work dimensionality.
pub const MAX_WORK_DIM: usize = 3;

/// Smallest multiple of `local` that is at least `n`.
///
/// `round_up_global(1000, 256) == 1024`. Returns `None` for a zero `local`
/// or on overflow.
pub fn round_up_global(n: usize, local: usize) -> Option<usize> {
    if local == 0 {
        return None;
    }
    n.checked_add(local - 1).map(|v| v / local * local)
}

/// N-dimensional launch range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NdRange {
    pub global: Vec<usize>,
    pub local: Option<Vec<usize>>,
}

impl NdRange {
    pub fn work_dim(&self) -> u32 {
        self.global.len() as u32
    }

    /// Total number of work-items.
    pub fn global_items(&self) -> usize {
        self.global.iter().product()
    }
}

/// Everything needed to build and launch one kernel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelDescriptor {
    source: PathBuf,
    entry_point: String,
    range: NdRange,
}

impl KernelDescriptor {
    /// Kernel with an implementation-chosen local work-size.
    pub fn new(
        source: impl Into<PathBuf>,
        entry_point: impl Into<String>,
        global: impl Into<Vec<usize>>,
    ) -> Self {
        KernelDescriptor {
            source: source.into(),
            entry_point: entry_point.into(),
            range: NdRange {
                global: global.into(),
                local: None,
            },
        }
    }

    /// One-dimensional kernel over `n` elements with work-groups of `local`.
    ///
    /// The global size is rounded up to a multiple of `local`; the kernel must
    /// ignore lanes at or beyond `n`.
    pub fn linear(
        source: impl Into<PathBuf>,
        entry_point: impl Into<String>,
        n: usize,
        local: usize,
    ) -> Result<Self> {
        let global = round_up_global(n, local).ok_or_else(|| {
            ClError::InvalidDescriptor(format!(
                "cannot round {n} work-items up to a multiple of {local}"
            ))
        })?;
        Ok(Self::new(source, entry_point, vec![global]).with_local(vec![local]))
    }

    /// Set an explicit local work-size.
    pub fn with_local(mut self, local: impl Into<Vec<usize>>) -> Self {
        self.range.local = Some(local.into());
        self
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    pub fn entry_point(&self) -> &str {
        &self.entry_point
    }

    pub fn range(&self) -> &NdRange {
        &self.range
    }

    pub fn work_dim(&self) -> u32 {
        self.range.work_dim()
    }

    /// Check dimensionality and sizes before any device work.
    pub fn validate(&self) -> Result<()> {
        let dims = self.range.global.len();
        if dims == 0 || dims > MAX_WORK_DIM {
            return Err(ClError::InvalidDescriptor(format!(
                "work dimensionality must be 1..={MAX_WORK_DIM}, got {dims}"
            )));
        }
        if self.range.global.contains(&0) {
            return Err(ClError::InvalidDescriptor(
                "global work-size contains a zero extent".into(),
            ));
        }
        if let Some(local) = &self.range.local {
            if local.len() != dims {
                return Err(ClError::InvalidDescriptor(format!(
                    "local work-size has {} dimensions, global has {}",
                    local.len(),
                    dims
                )));
            }
            if local.contains(&0) {
                return Err(ClError::InvalidDescriptor(
                    "local work-size contains a zero extent".into(),
                ));
            }
        }
        if self.entry_point.is_empty() {
            return Err(ClError::InvalidDescriptor("empty kernel entry point".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_up_global() {
        assert_eq!(round_up_global(1000, 256), Some(1024));
        assert_eq!(round_up_global(1024, 256), Some(1024));
        assert_eq!(round_up_global(1, 256), Some(256));
        assert_eq!(round_up_global(0, 256), Some(0));
        assert_eq!(round_up_global(10, 0), None);
        assert_eq!(round_up_global(usize::MAX, 256), None);
    }

    #[test]
    fn test_upload_decision() {
        let data = [1.0f32, 2.0, 3.0];
        let mut out = [0.0f32; 3];
        let mut rw = [0u32; 4];

        assert!(BufferDescriptor::input(&data).upload_needed());
        assert!(!BufferDescriptor::output(&mut out).upload_needed());
        assert!(BufferDescriptor::read_write(&mut rw).upload_needed());
        assert!(!BufferDescriptor::scratch(64, AccessMode::ReadWrite).upload_needed());
    }

    #[test]
    fn test_write_only_with_host_memory_never_uploads() {
        let mut host = [7u8; 16];
        let desc = BufferDescriptor::from_parts(
            HostMemory::Exclusive(&mut host),
            16,
            AccessMode::WriteOnly,
            false,
        )
        .unwrap();
        assert!(desc.has_host_memory());
        assert!(!desc.upload_needed());
        assert!(desc.upload_bytes().is_none());
    }

    #[test]
    fn test_shared_memory_is_never_a_readback_target() {
        let data = [1u8; 8];
        let mut desc = BufferDescriptor::input(&data).with_read_back(true);
        assert!(desc.read_back());
        assert!(!desc.wants_readback());
        assert!(desc.readback_target().is_none());
    }

    #[test]
    fn test_from_parts_rejects_short_host_memory() {
        let data = [0u8; 4];
        let err =
            BufferDescriptor::from_parts(HostMemory::Shared(&data), 8, AccessMode::ReadOnly, false)
                .unwrap_err();
        assert!(matches!(err, ClError::InvalidDescriptor(_)));
    }

    #[test]
    fn test_linear_kernel_rounds_global() {
        let kd = KernelDescriptor::linear("k.cl", "k", 1000, 256).unwrap();
        assert_eq!(kd.range().global, vec![1024]);
        assert_eq!(kd.range().local, Some(vec![256]));
        assert_eq!(kd.work_dim(), 1);
        kd.validate().unwrap();
    }

    #[test]
    fn test_validate_dimensionality() {
        let none: Vec<usize> = Vec::new();
        assert!(KernelDescriptor::new("k.cl", "k", none).validate().is_err());
        assert!(KernelDescriptor::new("k.cl", "k", vec![1usize; 4]).validate().is_err());
        assert!(KernelDescriptor::new("k.cl", "k", vec![8usize, 8, 8]).validate().is_ok());
        assert!(KernelDescriptor::new("k.cl", "k", vec![8usize, 0]).validate().is_err());
        assert!(KernelDescriptor::new("k.cl", "k", vec![8usize, 8])
            .with_local(vec![4usize])
            .validate()
            .is_err());
        assert!(KernelDescriptor::new("k.cl", "", vec![8usize]).validate().is_err());
    }
}
