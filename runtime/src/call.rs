//! Foreign call interface for kernels without a compile-time function type.

use std::ffi::c_void;
use std::ptr;

use libffi::low::{self, CodePtr, ffi_cif, ffi_type, types};
use snafu::ensure;

use crate::abi::{AbiKind, CallDescriptor};
use crate::error::{ArgumentCountSnafu, DescriptorFailureSnafu, Result};

fn ffi_type_of(kind: AbiKind) -> *mut ffi_type {
    match kind {
        AbiKind::Void => &raw mut types::void,
        AbiKind::Int32 => &raw mut types::sint32,
        AbiKind::Float32 => &raw mut types::float,
        AbiKind::Float64 => &raw mut types::double,
        AbiKind::Pointer => &raw mut types::pointer,
    }
}

/// A prepared libffi `ffi_cif` together with the type table it points into.
pub struct CallInterface {
    cif: Box<ffi_cif>,
    /// Referenced by `cif.arg_types`; heap storage never moves.
    _arg_types: Vec<*mut ffi_type>,
    descriptor: CallDescriptor,
}

// SAFETY: after preparation the cif and its type table are only read, by
// `ffi_call`, and the builtin type descriptors are immutable statics.
unsafe impl Send for CallInterface {}
unsafe impl Sync for CallInterface {}

impl CallInterface {
    /// Prepare a call interface for `descriptor` with the platform default ABI.
    pub fn prepare(name: &str, descriptor: &CallDescriptor) -> Result<Self> {
        let mut arg_types: Vec<*mut ffi_type> = descriptor.arg_kinds.iter().map(|&kind| ffi_type_of(kind)).collect();
        let mut cif: Box<ffi_cif> = Box::default();

        let status = unsafe {
            low::prep_cif(
                cif.as_mut(),
                low::ffi_abi_FFI_DEFAULT_ABI,
                arg_types.len(),
                ffi_type_of(descriptor.return_kind),
                arg_types.as_mut_ptr(),
            )
        };
        if let Err(err) = status {
            return DescriptorFailureSnafu { name, reason: format!("ffi_prep_cif failed: {err:?}") }.fail();
        }

        Ok(Self { cif, _arg_types: arg_types, descriptor: descriptor.clone() })
    }

    pub fn descriptor(&self) -> &CallDescriptor {
        &self.descriptor
    }

    /// Call `code` with one argument slot address per descriptor argument.
    ///
    /// # Safety
    ///
    /// - `code` must be a function whose native signature matches the descriptor.
    /// - `arg_slots` must hold at least `descriptor.arity()` pointers, each to a
    ///   live value of the corresponding ABI kind.
    pub unsafe fn call(&self, name: &str, code: CodePtr, arg_slots: &mut [*mut c_void]) -> Result<()> {
        ensure!(
            arg_slots.len() >= self.descriptor.arity(),
            ArgumentCountSnafu { name, expected: self.descriptor.arity(), actual: arg_slots.len() }
        );

        // The return kind is always void, so libffi gets no return slot.
        unsafe {
            libffi::raw::ffi_call(
                self.cif.as_ref() as *const ffi_cif as *mut ffi_cif,
                Some(*code.as_fun()),
                ptr::null_mut(),
                arg_slots.as_mut_ptr(),
            );
        }
        Ok(())
    }
}
