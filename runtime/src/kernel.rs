//! Kernel invocation.
//!
//! Kernels follow one calling convention: every parameter is passed as the
//! address of an argument slot, and the slot holds the raw data pointer of the
//! corresponding tensor. Scalars go through the same path, so generated kernels
//! must treat every parameter as if passed by address. Results leave a kernel
//! only by writes through its pointer parameters.

use std::ffi::c_void;
use std::sync::Arc;

use kiln_device::TensorHandle;
use libffi::low::CodePtr;
use snafu::ensure;

use crate::abi::CallDescriptor;
use crate::call::CallInterface;
use crate::compiler::JitEngine;
use crate::error::{ArgumentCountSnafu, Result};

/// A kernel resolved from a loaded library, ready to be called.
#[derive(Clone)]
pub struct ResolvedKernel {
    name: String,
    hash: u64,
    /// Address of the kernel in a library that is never unloaded.
    code: *const c_void,
    interface: Arc<CallInterface>,
}

// SAFETY: the function pointer points to read-only code in a library that
// stays loaded for the rest of the process. Multiple threads can call it
// concurrently; whether the kernel itself is reentrant is up to its author.
unsafe impl Send for ResolvedKernel {}
unsafe impl Sync for ResolvedKernel {}

impl std::fmt::Debug for ResolvedKernel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedKernel")
            .field("name", &self.name)
            .field("hash", &format_args!("{:016x}", self.hash))
            .field("code", &self.code)
            .field("descriptor", self.interface.descriptor())
            .finish()
    }
}

impl ResolvedKernel {
    pub(crate) fn new(name: &str, hash: u64, code: *const c_void, interface: Arc<CallInterface>) -> Self {
        Self { name: name.to_string(), hash, code, interface }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Content hash of the source the kernel was compiled from.
    pub fn hash(&self) -> u64 {
        self.hash
    }

    pub fn code_ptr(&self) -> *const c_void {
        self.code
    }

    pub fn descriptor(&self) -> &CallDescriptor {
        self.interface.descriptor()
    }

    /// Call the kernel with the data pointers of `tensors`, in order.
    ///
    /// Shapes and dtypes are not checked against the kernel signature. Handles
    /// beyond the descriptor's arity are ignored, as the native call would.
    ///
    /// # Safety
    ///
    /// - Every tensor's data pointer must be valid for the reads and writes the
    ///   kernel performs, for the duration of the call.
    /// - The tensors must match the kernel's parameters in count, order and type.
    pub unsafe fn invoke<H: TensorHandle>(&self, tensors: &[H]) -> Result<()> {
        let arity = self.descriptor().arity();
        ensure!(tensors.len() >= arity, ArgumentCountSnafu { name: &self.name, expected: arity, actual: tensors.len() });

        tracing::debug!(kernel.name = %self.name, kernel.num_args = tensors.len(), "invoking kernel");

        let mut arg_data: Vec<*mut c_void> = tensors.iter().map(|t| t.data_ptr()).collect();
        let mut arg_slots: Vec<*mut c_void> = arg_data.iter_mut().map(|slot| (slot as *mut *mut c_void).cast()).collect();

        unsafe { self.interface.call(&self.name, CodePtr::from_ptr(self.code), &mut arg_slots) }
    }
}

/// Kernel bound to its source and name: compiles on first use, then calls.
#[derive(Clone)]
pub struct KernelFunction {
    engine: Arc<JitEngine>,
    source: Arc<str>,
    name: String,
    arg_count: usize,
}

impl KernelFunction {
    pub fn new(engine: Arc<JitEngine>, source: Arc<str>, name: impl Into<String>, arg_count: usize) -> Self {
        Self { engine, source, name: name.into(), arg_count }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn arg_count(&self) -> usize {
        self.arg_count
    }

    /// Compile (or fetch from cache) and resolve the kernel.
    pub fn resolve(&self) -> Result<ResolvedKernel> {
        self.engine.compile_and_load(&self.source, &self.name)
    }

    /// Call the kernel with exactly `arg_count` tensors.
    ///
    /// # Safety
    ///
    /// Same contract as [`ResolvedKernel::invoke`].
    pub unsafe fn call<H: TensorHandle>(&self, tensors: &[H]) -> Result<()> {
        ensure!(
            tensors.len() == self.arg_count,
            ArgumentCountSnafu { name: &self.name, expected: self.arg_count, actual: tensors.len() }
        );
        let kernel = self.resolve().inspect_err(|err| {
            tracing::error!(kernel.name = %self.name, error = %err, "failed to compile or load kernel");
        })?;
        unsafe { kernel.invoke(tensors) }
    }
}
