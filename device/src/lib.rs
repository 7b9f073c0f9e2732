//! Tensor handles forwarded to kiln kernels.
//!
//! Kernels never see tensors, only raw data pointers. A [`TensorHandle`] is
//! whatever can hand out such a pointer together with the element type and
//! shape describing the memory behind it. [`TensorView`] is the handle used
//! for caller-owned host memory.

pub mod error;
pub mod tensor;


pub use error::*;
pub use tensor::{TensorHandle, TensorView};
