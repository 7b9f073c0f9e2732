use std::ffi::c_void;
use std::marker::PhantomData;

use kiln_dtype::{DType, HasDType};
use snafu::ensure;

use crate::error::{Result, SizeMismatchSnafu};

/// Opaque, externally owned buffer descriptor passed into a kernel call.
///
/// The runtime only reads [`TensorHandle::data_ptr`]. Dtype and shape are
/// exposed for callers and diagnostics; they are not checked against the
/// kernel signature.
pub trait TensorHandle {
    /// Raw pointer to the first element.
    fn data_ptr(&self) -> *mut c_void;

    fn dtype(&self) -> DType;

    fn shape(&self) -> &[usize];

    /// Number of elements.
    fn numel(&self) -> usize {
        self.shape().iter().product()
    }

    fn nbytes(&self) -> usize {
        self.numel() * self.dtype().bytes()
    }
}

/// Borrowed view over caller memory, the host-side analogue of a `DLTensor`.
///
/// The view holds the mutable borrow it was created from for `'a`, so a
/// kernel writing through [`TensorHandle::data_ptr`] cannot race safe Rust
/// code reading the same slice.
#[derive(Debug)]
pub struct TensorView<'a> {
    data: *mut c_void,
    dtype: DType,
    shape: Vec<usize>,
    _borrow: PhantomData<&'a mut [u8]>,
}

impl<'a> TensorView<'a> {
    /// One-dimensional view over a whole slice.
    pub fn from_slice<T: HasDType>(data: &'a mut [T]) -> Self {
        let shape = vec![data.len()];
        Self { data: data.as_mut_ptr().cast(), dtype: T::DTYPE, shape, _borrow: PhantomData }
    }

    /// View over a slice with an explicit shape.
    pub fn with_shape<T: HasDType>(data: &'a mut [T], shape: Vec<usize>) -> Result<Self> {
        let expected = shape.iter().product::<usize>();
        ensure!(expected == data.len(), SizeMismatchSnafu { shape, expected, actual: data.len() });
        Ok(Self { data: data.as_mut_ptr().cast(), dtype: T::DTYPE, shape, _borrow: PhantomData })
    }

    /// View over foreign memory, e.g. a tensor owned by a host framework.
    ///
    /// # Safety
    ///
    /// `data` must point to at least `shape.iter().product() * dtype.bytes()`
    /// bytes that stay valid, and are not accessed elsewhere, for `'a`.
    pub unsafe fn from_raw(data: *mut c_void, dtype: DType, shape: Vec<usize>) -> Self {
        Self { data, dtype, shape, _borrow: PhantomData }
    }
}

impl TensorHandle for TensorView<'_> {
    fn data_ptr(&self) -> *mut c_void {
        self.data
    }

    fn dtype(&self) -> DType {
        self.dtype
    }

    fn shape(&self) -> &[usize] {
        &self.shape
    }
}

impl<H: TensorHandle + ?Sized> TensorHandle for &H {
    fn data_ptr(&self) -> *mut c_void {
        (**self).data_ptr()
    }

    fn dtype(&self) -> DType {
        (**self).dtype()
    }

    fn shape(&self) -> &[usize] {
        (**self).shape()
    }
}
