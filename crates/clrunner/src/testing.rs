//! Host-memory backend for testing kernel runs without a device.
//!
//! [`RecordingBackend`] implements [`Backend`] on plain host memory. It
//! records every device operation in order, counts live resources, can inject
//! failures at any stage, and executes kernels as registered host closures.
//!
//! # Feature Gate
//!
//! This module is only available when the `testing` feature is enabled,
//! or when running tests.
//!
//! ```toml
//! [dev-dependencies]
//! clrunner = { version = "...", features = ["testing"] }
//! ```
//!
//! # Example
//!
//! ```ignore
//! use clrunner::testing::RecordingBackend;
//!
//! let backend = RecordingBackend::new();
//! backend.register_kernel("scale", |launch| {
//!     let n = launch.scalar::<i32>(1) as usize;
//!     let mut data = launch.read::<f32>(0);
//!     for gid in 0..launch.global_size()[0].min(n) {
//!         data[gid] *= 2.0;
//!     }
//!     launch.write(0, &data);
//! });
//! ```

use crate::backend::{Backend, BuildFailure, KernelArgs};
use crate::descriptor::{AccessMode, NdRange};
use crate::error::{BindError, DeviceError};
use bytemuck::Pod;
use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;

/// OpenCL status codes reproduced by the recording backend.
pub mod codes {
    pub const BUILD_PROGRAM_FAILURE: i32 = -11;
    pub const INVALID_VALUE: i32 = -30;
    pub const INVALID_KERNEL_NAME: i32 = -46;
    pub const INVALID_KERNEL_ARGS: i32 = -52;
    pub const INVALID_BUFFER_SIZE: i32 = -61;
    pub const MEM_OBJECT_ALLOCATION_FAILURE: i32 = -4;
    pub const OUT_OF_RESOURCES: i32 = -5;
}

/// One recorded device operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceOp {
    BufferCreated {
        id: usize,
        access: AccessMode,
        size: usize,
        uploaded: bool,
    },
    BufferReleased {
        id: usize,
    },
    ProgramBuilt {
        id: usize,
    },
    ProgramReleased {
        id: usize,
    },
    KernelCreated {
        id: usize,
        name: String,
    },
    KernelReleased {
        id: usize,
    },
    ArgSet {
        kernel: usize,
        index: u32,
        buffer: Option<usize>,
    },
    Launched {
        kernel: usize,
        global: Vec<usize>,
        local: Option<Vec<usize>>,
    },
    Read {
        buffer: usize,
        blocking: bool,
        len: usize,
    },
    Finish,
}

#[derive(Debug, Default)]
struct Journal {
    ops: Vec<DeviceOp>,
    next_id: usize,
    live: usize,
}

impl Journal {
    fn acquire(&mut self) -> usize {
        let id = self.next_id;
        self.next_id += 1;
        self.live += 1;
        id
    }

    fn release(&mut self, op: DeviceOp) {
        self.live -= 1;
        self.ops.push(op);
    }
}

#[derive(Debug, Default)]
struct Faults {
    allocation: Option<usize>,
    launch: bool,
    read: Option<usize>,
    finish: bool,
}

/// Host closure standing in for a compiled kernel.
pub type HostKernelFn = Rc<dyn Fn(&mut HostLaunch<'_>)>;

/// Device buffer in host memory.
pub struct HostBuffer {
    id: usize,
    data: Rc<RefCell<Vec<u8>>>,
    journal: Rc<RefCell<Journal>>,
}

impl HostBuffer {
    pub fn id(&self) -> usize {
        self.id
    }

    /// Current device-side contents.
    pub fn contents(&self) -> Vec<u8> {
        self.data.borrow().clone()
    }
}

impl Drop for HostBuffer {
    fn drop(&mut self) {
        self.journal
            .borrow_mut()
            .release(DeviceOp::BufferReleased { id: self.id });
    }
}

/// Built program: the entry points declared in its source.
pub struct HostProgram {
    id: usize,
    entries: Vec<String>,
    journal: Rc<RefCell<Journal>>,
}

impl HostProgram {
    pub fn entries(&self) -> &[String] {
        &self.entries
    }
}

impl Drop for HostProgram {
    fn drop(&mut self) {
        self.journal
            .borrow_mut()
            .release(DeviceOp::ProgramReleased { id: self.id });
    }
}

/// Value bound to a kernel argument slot.
#[derive(Clone)]
pub enum HostArg {
    Buffer {
        id: usize,
        data: Rc<RefCell<Vec<u8>>>,
    },
    Scalar(Vec<u8>),
}

/// Resolved kernel and its bound arguments.
pub struct HostKernel {
    id: usize,
    name: String,
    func: Option<HostKernelFn>,
    args: BTreeMap<u32, HostArg>,
    journal: Rc<RefCell<Journal>>,
}

impl HostKernel {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Buffer id bound at `index`, if a buffer is bound there.
    pub fn buffer_arg(&self, index: u32) -> Option<usize> {
        match self.args.get(&index) {
            Some(HostArg::Buffer { id, .. }) => Some(*id),
            _ => None,
        }
    }
}

impl Drop for HostKernel {
    fn drop(&mut self) {
        self.journal
            .borrow_mut()
            .release(DeviceOp::KernelReleased { id: self.id });
    }
}

impl KernelArgs<HostBuffer> for HostKernel {
    fn set_buffer(&mut self, index: u32, buffer: &HostBuffer) -> Result<(), BindError> {
        self.args.insert(
            index,
            HostArg::Buffer {
                id: buffer.id,
                data: buffer.data.clone(),
            },
        );
        self.journal.borrow_mut().ops.push(DeviceOp::ArgSet {
            kernel: self.id,
            index,
            buffer: Some(buffer.id),
        });
        Ok(())
    }

    fn set_scalar<T: Pod>(&mut self, index: u32, value: &T) -> Result<(), BindError> {
        self.args
            .insert(index, HostArg::Scalar(bytemuck::bytes_of(value).to_vec()));
        self.journal.borrow_mut().ops.push(DeviceOp::ArgSet {
            kernel: self.id,
            index,
            buffer: None,
        });
        Ok(())
    }
}

/// View of a launch handed to a [`HostKernelFn`].
///
/// Accessors panic when the requested argument is missing or of the wrong
/// kind, which fails the test that launched the kernel.
pub struct HostLaunch<'a> {
    args: &'a BTreeMap<u32, HostArg>,
    range: &'a NdRange,
}

impl HostLaunch<'_> {
    pub fn global_size(&self) -> &[usize] {
        &self.range.global
    }

    pub fn local_size(&self) -> Option<&[usize]> {
        self.range.local.as_deref()
    }

    /// Scalar argument at `index`.
    pub fn scalar<T: Pod>(&self, index: u32) -> T {
        match self.args.get(&index) {
            Some(HostArg::Scalar(bytes)) => bytemuck::pod_read_unaligned(bytes),
            _ => panic!("argument {index} is not a scalar"),
        }
    }

    /// Copy of the buffer bound at `index`, as elements of `T`.
    pub fn read<T: Pod>(&self, index: u32) -> Vec<T> {
        let data = self.buffer(index).borrow();
        let values: Vec<T> = data
            .chunks_exact(std::mem::size_of::<T>())
            .map(bytemuck::pod_read_unaligned::<T>)
            .collect();
        values
    }

    /// Overwrite the start of the buffer bound at `index`.
    pub fn write<T: Pod>(&self, index: u32, values: &[T]) {
        let bytes: &[u8] = bytemuck::cast_slice(values);
        let buffer = self.buffer(index);
        buffer.borrow_mut()[..bytes.len()].copy_from_slice(bytes);
    }

    fn buffer(&self, index: u32) -> &Rc<RefCell<Vec<u8>>> {
        match self.args.get(&index) {
            Some(HostArg::Buffer { data, .. }) => data,
            _ => panic!("argument {index} is not a buffer"),
        }
    }
}

/// Recording host backend. See the [module docs](self).
#[derive(Default)]
pub struct RecordingBackend {
    journal: Rc<RefCell<Journal>>,
    kernels: RefCell<HashMap<String, HostKernelFn>>,
    faults: RefCell<Faults>,
}

impl RecordingBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the host implementation of entry point `name`.
    ///
    /// Declared entry points without a registration launch as no-ops.
    pub fn register_kernel<F>(&self, name: &str, func: F)
    where
        F: Fn(&mut HostLaunch<'_>) + 'static,
    {
        self.kernels
            .borrow_mut()
            .insert(name.to_string(), Rc::new(func));
    }

    /// Fail the `nth` buffer allocation from now on (0-based).
    pub fn fail_allocation(&self, nth: usize) {
        self.faults.borrow_mut().allocation = Some(nth);
    }

    /// Fail the next launch.
    pub fn fail_launch(&self) {
        self.faults.borrow_mut().launch = true;
    }

    /// Fail the `nth` readback from now on (0-based).
    pub fn fail_read(&self, nth: usize) {
        self.faults.borrow_mut().read = Some(nth);
    }

    /// Fail the next queue drain.
    pub fn fail_finish(&self) {
        self.faults.borrow_mut().finish = true;
    }

    /// All operations recorded so far.
    pub fn ops(&self) -> Vec<DeviceOp> {
        self.journal.borrow().ops.clone()
    }

    pub fn clear_ops(&self) {
        self.journal.borrow_mut().ops.clear();
    }

    /// Buffers, programs and kernels currently alive.
    pub fn outstanding(&self) -> usize {
        self.journal.borrow().live
    }

    /// Number of recorded operations matching `pred`.
    pub fn count(&self, pred: impl Fn(&DeviceOp) -> bool) -> usize {
        self.journal.borrow().ops.iter().filter(|op| pred(op)).count()
    }

    fn record(&self, op: DeviceOp) {
        self.journal.borrow_mut().ops.push(op);
    }

    /// Counts down an `nth` fault; true when it fires.
    fn trip(slot: &mut Option<usize>) -> bool {
        match slot {
            Some(0) => {
                *slot = None;
                true
            }
            Some(n) => {
                *n -= 1;
                false
            }
            None => false,
        }
    }
}

/// Entry points declared as `__kernel void name(` or `kernel void name(`.
pub fn declared_entries(source: &str) -> Vec<String> {
    let tokens: Vec<&str> = source
        .split(|c: char| c.is_whitespace() || c == '(')
        .filter(|t| !t.is_empty())
        .collect();
    tokens
        .windows(3)
        .filter(|w| matches!(w[0], "__kernel" | "kernel") && w[1] == "void")
        .map(|w| w[2].to_string())
        .collect()
}

impl Backend for RecordingBackend {
    type Buffer = HostBuffer;
    type Program = HostProgram;
    type Kernel = HostKernel;

    fn create_buffer(
        &self,
        access: AccessMode,
        size: usize,
        upload: Option<&[u8]>,
    ) -> Result<HostBuffer, DeviceError> {
        if Self::trip(&mut self.faults.borrow_mut().allocation) {
            return Err(DeviceError::new(
                codes::MEM_OBJECT_ALLOCATION_FAILURE,
                "CL_MEM_OBJECT_ALLOCATION_FAILURE",
            ));
        }
        if size == 0 {
            return Err(DeviceError::new(
                codes::INVALID_BUFFER_SIZE,
                "CL_INVALID_BUFFER_SIZE",
            ));
        }

        let mut data = vec![0u8; size];
        if let Some(bytes) = upload {
            data.copy_from_slice(bytes);
        }
        let id = self.journal.borrow_mut().acquire();
        self.record(DeviceOp::BufferCreated {
            id,
            access,
            size,
            uploaded: upload.is_some(),
        });
        Ok(HostBuffer {
            id,
            data: Rc::new(RefCell::new(data)),
            journal: self.journal.clone(),
        })
    }

    fn build_program(&self, source: &str, _options: &str) -> Result<HostProgram, BuildFailure> {
        let errors: Vec<String> = source
            .lines()
            .enumerate()
            .filter(|(_, line)| line.trim_start().starts_with("#error"))
            .map(|(n, line)| format!("<source>:{}: error: {}", n + 1, line.trim()))
            .collect();
        if !errors.is_empty() {
            return Err(BuildFailure {
                code: codes::BUILD_PROGRAM_FAILURE,
                log: errors.join("\n"),
            });
        }

        let id = self.journal.borrow_mut().acquire();
        self.record(DeviceOp::ProgramBuilt { id });
        Ok(HostProgram {
            id,
            entries: declared_entries(source),
            journal: self.journal.clone(),
        })
    }

    fn create_kernel(&self, program: &HostProgram, name: &str) -> Result<HostKernel, DeviceError> {
        if !program.entries.iter().any(|e| e == name) {
            return Err(DeviceError::new(
                codes::INVALID_KERNEL_NAME,
                "CL_INVALID_KERNEL_NAME",
            ));
        }
        let func = self.kernels.borrow().get(name).cloned();
        let id = self.journal.borrow_mut().acquire();
        self.record(DeviceOp::KernelCreated {
            id,
            name: name.to_string(),
        });
        Ok(HostKernel {
            id,
            name: name.to_string(),
            func,
            args: BTreeMap::new(),
            journal: self.journal.clone(),
        })
    }

    fn enqueue_nd_range(&self, kernel: &HostKernel, range: &NdRange) -> Result<(), DeviceError> {
        if std::mem::take(&mut self.faults.borrow_mut().launch) {
            return Err(DeviceError::new(codes::OUT_OF_RESOURCES, "CL_OUT_OF_RESOURCES"));
        }
        if kernel.args.is_empty() {
            return Err(DeviceError::new(
                codes::INVALID_KERNEL_ARGS,
                "CL_INVALID_KERNEL_ARGS",
            ));
        }
        self.record(DeviceOp::Launched {
            kernel: kernel.id,
            global: range.global.clone(),
            local: range.local.clone(),
        });
        if let Some(func) = &kernel.func {
            let mut launch = HostLaunch {
                args: &kernel.args,
                range,
            };
            func(&mut launch);
        }
        Ok(())
    }

    unsafe fn enqueue_read(
        &self,
        buffer: &HostBuffer,
        blocking: bool,
        dst: &mut [u8],
    ) -> Result<(), DeviceError> {
        if Self::trip(&mut self.faults.borrow_mut().read) {
            return Err(DeviceError::new(codes::OUT_OF_RESOURCES, "CL_OUT_OF_RESOURCES"));
        }
        let data = buffer.data.borrow();
        if dst.len() > data.len() {
            return Err(DeviceError::new(codes::INVALID_VALUE, "CL_INVALID_VALUE"));
        }
        dst.copy_from_slice(&data[..dst.len()]);
        self.record(DeviceOp::Read {
            buffer: buffer.id,
            blocking,
            len: dst.len(),
        });
        Ok(())
    }

    fn finish(&self) -> Result<(), DeviceError> {
        if std::mem::take(&mut self.faults.borrow_mut().finish) {
            return Err(DeviceError::new(codes::OUT_OF_RESOURCES, "CL_OUT_OF_RESOURCES"));
        }
        self.record(DeviceOp::Finish);
        Ok(())
    }
}
