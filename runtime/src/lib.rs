//! Runtime compilation and invocation of generated C/C++ kernels.
//!
//! Given the source of a kernel and its name, the runtime annotates the first
//! loop for parallel execution, compiles the source into a shared library with
//! an external compiler, loads it, recovers a call descriptor from the
//! kernel's textual signature and calls it through libffi with the data
//! pointers of tensor handles. Compiled libraries are cached by source hash.
//!
//! # Pipeline
//!
//! [`KernelModule`] → [`KernelFunction`] → [`JitEngine::compile_and_load`]
//! ([`ArtifactCache`] hit, or [`parallelize`] → compiler → `dlopen` →
//! [`extract_signature`] / [`describe`] → [`CallInterface`]) →
//! [`ResolvedKernel::invoke`].

pub mod abi;
pub mod cache;
pub mod call;
pub mod compiler;
pub mod config;
pub mod error;
pub mod kernel;
pub mod module;
pub mod signature;
pub mod transform;


pub use abi::{AbiKind, CallDescriptor, describe, map_type};
pub use cache::ArtifactCache;
pub use call::CallInterface;
pub use compiler::{JitEngine, artifact_stem, content_hash};
pub use config::{JitConfig, TargetArch, UnsupportedParamPolicy};
pub use error::*;
pub use kernel::{KernelFunction, ResolvedKernel};
pub use module::{KernelMetadata, KernelModule};
pub use signature::{KernelSignature, extract_signature};
pub use transform::{Parallelized, parallelize};
