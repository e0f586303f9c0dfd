//! OpenCL device context.
//!
//! [`DeviceContext`] owns one platform, one device, one context and one
//! in-order command queue, and implements [`Backend`] on top of them.
//!
//! Acquisition is all-or-nothing: every handle created before a failing step
//! is released before the error is returned.

use crate::backend::{Backend, BuildFailure, KernelArgs};
use crate::config::{DeviceKind, DeviceSelection};
use crate::descriptor::{AccessMode, NdRange};
use crate::error::{AcquireStage, BindError, ClError, DeviceError, Result};
use bytemuck::Pod;
use opencl3::command_queue::CommandQueue;
use opencl3::context::Context;
use opencl3::device::{
    Device, CL_DEVICE_TYPE_ACCELERATOR, CL_DEVICE_TYPE_ALL, CL_DEVICE_TYPE_CPU,
    CL_DEVICE_TYPE_DEFAULT, CL_DEVICE_TYPE_GPU,
};
use opencl3::kernel::Kernel;
use opencl3::memory::{
    Buffer, ClMem, CL_MEM_COPY_HOST_PTR, CL_MEM_READ_ONLY, CL_MEM_READ_WRITE, CL_MEM_WRITE_ONLY,
};
use opencl3::platform::{get_platforms, Platform};
use opencl3::program::Program;
use opencl3::types::{cl_device_type, cl_mem_flags, CL_BLOCKING, CL_NON_BLOCKING};
use std::ffi::c_void;
use std::fmt;
use std::ptr;

/// `CL_DEVICE_NOT_FOUND`
const DEVICE_NOT_FOUND: i32 = -1;
/// `CL_INVALID_PLATFORM`
const INVALID_PLATFORM: i32 = -32;

fn device_type(kind: DeviceKind) -> cl_device_type {
    match kind {
        DeviceKind::Gpu => CL_DEVICE_TYPE_GPU,
        DeviceKind::Cpu => CL_DEVICE_TYPE_CPU,
        DeviceKind::Accelerator => CL_DEVICE_TYPE_ACCELERATOR,
        DeviceKind::Default => CL_DEVICE_TYPE_DEFAULT,
        DeviceKind::All => CL_DEVICE_TYPE_ALL,
    }
}

fn device_kind(dev_type: cl_device_type) -> DeviceKind {
    if dev_type & CL_DEVICE_TYPE_GPU != 0 {
        DeviceKind::Gpu
    } else if dev_type & CL_DEVICE_TYPE_CPU != 0 {
        DeviceKind::Cpu
    } else if dev_type & CL_DEVICE_TYPE_ACCELERATOR != 0 {
        DeviceKind::Accelerator
    } else {
        DeviceKind::Default
    }
}

fn memory_flags(access: AccessMode) -> cl_mem_flags {
    match access {
        AccessMode::ReadOnly => CL_MEM_READ_ONLY,
        AccessMode::WriteOnly => CL_MEM_WRITE_ONLY,
        AccessMode::ReadWrite => CL_MEM_READ_WRITE,
    }
}

fn acquisition(stage: AcquireStage, source: impl Into<DeviceError>) -> ClError {
    let source = source.into();
    tracing::error!("OpenCL {} acquisition failed: {}", stage, source);
    ClError::DeviceAcquisition { stage, source }
}

/// Information about an OpenCL device.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub platform_index: usize,
    pub device_index: usize,
    pub platform: String,
    pub name: String,
    pub vendor: String,
    pub version: String,
    pub kind: DeviceKind,
    pub max_work_group_size: usize,
    pub global_mem_size: u64,
}

impl DeviceInfo {
    fn query(platform_index: usize, device_index: usize, platform: &Platform, device: &Device) -> Self {
        DeviceInfo {
            platform_index,
            device_index,
            platform: platform.name().unwrap_or_default().trim().to_string(),
            name: device.name().unwrap_or_default().trim().to_string(),
            vendor: device.vendor().unwrap_or_default().trim().to_string(),
            version: device.version().unwrap_or_default().trim().to_string(),
            kind: device_kind(device.dev_type().unwrap_or(0)),
            max_work_group_size: device.max_work_group_size().unwrap_or(1),
            global_mem_size: device.global_mem_size().unwrap_or(0),
        }
    }
}

impl fmt::Display for DeviceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}:{}] {} ({}, {}) on {} - max work-group {}, {:.1}GB",
            self.platform_index,
            self.device_index,
            self.name,
            self.kind,
            self.version,
            self.platform,
            self.max_work_group_size,
            self.global_mem_size as f64 / 1e9,
        )
    }
}

/// List every device of every platform.
///
/// Returns an empty vec if no OpenCL runtime is installed (never errors).
/// `device_index` is the index among all devices of the platform, which is
/// the index [`DeviceSelection`] expects with [`DeviceKind::All`].
pub fn probe_devices() -> Vec<DeviceInfo> {
    let platforms = match get_platforms() {
        Ok(platforms) => platforms,
        Err(_) => return Vec::new(),
    };

    let mut devices = Vec::new();
    for (platform_index, platform) in platforms.iter().enumerate() {
        let ids = platform.get_devices(CL_DEVICE_TYPE_ALL).unwrap_or_default();
        for (device_index, id) in ids.into_iter().enumerate() {
            let device = Device::new(id);
            devices.push(DeviceInfo::query(platform_index, device_index, platform, &device));
        }
    }
    devices
}

/// Platform, device, context and in-order command queue.
///
/// Fields drop in declaration order: queue before context.
pub struct DeviceContext {
    queue: CommandQueue,
    context: Context,
    device: Device,
    platform: Platform,
    info: DeviceInfo,
}

impl fmt::Debug for DeviceContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceContext")
            .field("info", &self.info)
            .finish_non_exhaustive()
    }
}

impl DeviceContext {
    /// Acquire the device named by `selection`.
    ///
    /// With the default selection this is the first GPU of the first
    /// platform. No other device is tried if that one is missing.
    pub fn acquire(selection: &DeviceSelection) -> Result<Self> {
        let platforms = get_platforms().map_err(|e| acquisition(AcquireStage::Platform, e))?;
        let platform = platforms
            .get(selection.platform_index)
            .cloned()
            .ok_or_else(|| {
                acquisition(
                    AcquireStage::Platform,
                    DeviceError::new(
                        INVALID_PLATFORM,
                        format!(
                            "platform {} requested, {} available",
                            selection.platform_index,
                            platforms.len()
                        ),
                    ),
                )
            })?;

        let ids = platform
            .get_devices(device_type(selection.device_type))
            .map_err(|e| acquisition(AcquireStage::Device, e))?;
        let id = ids.get(selection.device_index).copied().ok_or_else(|| {
            acquisition(
                AcquireStage::Device,
                DeviceError::new(
                    DEVICE_NOT_FOUND,
                    format!(
                        "{} device {} requested, {} available",
                        selection.device_type,
                        selection.device_index,
                        ids.len()
                    ),
                ),
            )
        })?;
        let device = Device::new(id);

        let context =
            Context::from_device(&device).map_err(|e| acquisition(AcquireStage::Context, e))?;

        // An in-order queue: no out-of-order or profiling properties. The
        // OpenCL 1.2 entry point keeps 1.2-only runtimes working.
        #[allow(deprecated)]
        let queue = CommandQueue::create_default(&context, 0)
            .map_err(|e| acquisition(AcquireStage::Queue, e))?;

        let info = DeviceInfo::query(
            selection.platform_index,
            selection.device_index,
            &platform,
            &device,
        );
        tracing::info!("OpenCL device acquired: {}", info);

        Ok(DeviceContext {
            queue,
            context,
            device,
            platform,
            info,
        })
    }

    /// Release the queue, then the context.
    ///
    /// The device is a root device returned by the platform and has no
    /// reference count of its own to release.
    pub fn release(self) {
        let DeviceContext {
            queue,
            context,
            info,
            ..
        } = self;
        drop(queue);
        drop(context);
        tracing::debug!("OpenCL device released: {}", info.name);
    }

    pub fn info(&self) -> &DeviceInfo {
        &self.info
    }

    pub fn platform(&self) -> &Platform {
        &self.platform
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    pub fn queue(&self) -> &CommandQueue {
        &self.queue
    }
}

impl KernelArgs<Buffer<u8>> for Kernel {
    fn set_buffer(&mut self, index: u32, buffer: &Buffer<u8>) -> std::result::Result<(), BindError> {
        // SAFETY: the argument is a live cl_mem handle of the kernel's context.
        unsafe { self.set_arg(index, &buffer.get()) }.map_err(|e| BindError::Argument {
            index,
            source: e.into(),
        })
    }

    fn set_scalar<T: Pod>(&mut self, index: u32, value: &T) -> std::result::Result<(), BindError> {
        // SAFETY: Pod values are plain bytes of size_of::<T>().
        unsafe { self.set_arg(index, value) }.map_err(|e| BindError::Argument {
            index,
            source: e.into(),
        })
    }
}

impl Backend for DeviceContext {
    type Buffer = Buffer<u8>;
    type Program = Program;
    type Kernel = Kernel;

    fn create_buffer(
        &self,
        access: AccessMode,
        size: usize,
        upload: Option<&[u8]>,
    ) -> std::result::Result<Buffer<u8>, DeviceError> {
        let mut flags = memory_flags(access);
        let host_ptr = match upload {
            Some(bytes) => {
                flags |= CL_MEM_COPY_HOST_PTR;
                bytes.as_ptr() as *mut c_void
            }
            None => ptr::null_mut(),
        };
        // SAFETY: with CL_MEM_COPY_HOST_PTR the runtime only reads `size`
        // bytes from host_ptr during this call; `bytes` holds exactly `size`.
        let buffer = unsafe { Buffer::<u8>::create(&self.context, flags, size, host_ptr) }?;
        Ok(buffer)
    }

    fn build_program(&self, source: &str, options: &str) -> std::result::Result<Program, BuildFailure> {
        let mut program = Program::create_from_source(&self.context, source).map_err(|e| {
            BuildFailure {
                code: e.0,
                log: format!("program creation failed: {e}"),
            }
        })?;

        if let Err(e) = program.build(&[self.device.id()], options) {
            let log = match program.get_build_log(self.device.id()) {
                Ok(log) if !log.trim().is_empty() => log,
                Ok(_) => format!("build failed with {e}; the compiler produced no log"),
                Err(log_err) => format!("build failed with {e}; build log unavailable: {log_err}"),
            };
            return Err(BuildFailure { code: e.0, log });
        }
        Ok(program)
    }

    fn create_kernel(&self, program: &Program, name: &str) -> std::result::Result<Kernel, DeviceError> {
        Ok(Kernel::create(program, name)?)
    }

    fn enqueue_nd_range(&self, kernel: &Kernel, range: &NdRange) -> std::result::Result<(), DeviceError> {
        let local = match &range.local {
            Some(local) => local.as_ptr(),
            None => ptr::null(),
        };
        // SAFETY: global and local hold work_dim entries each and outlive the call.
        unsafe {
            self.queue.enqueue_nd_range_kernel(
                kernel.get(),
                range.work_dim(),
                ptr::null(),
                range.global.as_ptr(),
                local,
                &[],
            )
        }?;
        Ok(())
    }

    unsafe fn enqueue_read(
        &self,
        buffer: &Buffer<u8>,
        blocking: bool,
        dst: &mut [u8],
    ) -> std::result::Result<(), DeviceError> {
        let blocking = if blocking { CL_BLOCKING } else { CL_NON_BLOCKING };
        self.queue
            .enqueue_read_buffer(buffer, blocking, 0, dst, &[])?;
        Ok(())
    }

    fn finish(&self) -> std::result::Result<(), DeviceError> {
        self.queue.finish()?;
        Ok(())
    }
}
