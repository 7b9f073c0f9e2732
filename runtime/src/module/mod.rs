//! Kernel modules: exported kernels of one generated source, persisted and dispatched by name.

use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use kiln_device::TensorHandle;
use kiln_dtype::DType;
use serde::{Deserialize, Serialize};
use snafu::{OptionExt, ResultExt, ensure};

use crate::compiler::JitEngine;
use crate::error::{FormatMismatchSnafu, FunctionNotFoundSnafu, IoSnafu, MetadataSnafu, Result};
use crate::kernel::KernelFunction;

mod stream;

/// Type key of kiln modules in a host module registry.
pub const TYPE_KEY: &str = "kiln";

/// Suffix replacing the extension of a saved module for its metadata sidecar.
pub const META_FILE_EXTENSION: &str = "kiln_meta.json";

/// Per-kernel metadata exported by a module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KernelMetadata {
    pub name: String,
    /// Element type of each tensor argument, in call order.
    pub arg_types: Vec<DType>,
    #[serde(default)]
    pub launch_param_tags: Vec<String>,
}

impl KernelMetadata {
    pub fn new(name: impl Into<String>, arg_types: Vec<DType>) -> Self {
        Self { name: name.into(), arg_types, launch_param_tags: Vec::new() }
    }

    /// Number of tensor handles a call expects.
    pub fn arg_count(&self) -> usize {
        self.arg_types.len()
    }
}

/// Format a module is saved in: `format` when given, else the extension of `path`.
pub fn file_format(path: &Path, format: &str) -> String {
    if !format.is_empty() {
        return format.to_string();
    }
    path.extension().map(|ext| ext.to_string_lossy().into_owned()).unwrap_or_default()
}

/// Sidecar metadata path of a saved module.
pub fn meta_file_path(path: &Path) -> PathBuf {
    path.with_extension(META_FILE_EXTENSION)
}

/// Kernels compiled from one source, exported by name.
pub struct KernelModule {
    engine: Arc<JitEngine>,
    /// Kernel source handed to the compiler.
    data: Arc<str>,
    format: String,
    functions: BTreeMap<String, KernelMetadata>,
    /// Auxiliary source text for inspection, not persisted.
    source: String,
}

impl KernelModule {
    pub fn new(
        engine: Arc<JitEngine>,
        data: impl Into<Arc<str>>,
        format: impl Into<String>,
        functions: BTreeMap<String, KernelMetadata>,
        source: impl Into<String>,
    ) -> Self {
        Self { engine, data: data.into(), format: format.into(), functions, source: source.into() }
    }

    pub fn type_key(&self) -> &'static str {
        TYPE_KEY
    }

    pub fn format(&self) -> &str {
        &self.format
    }

    pub fn functions(&self) -> &BTreeMap<String, KernelMetadata> {
        &self.functions
    }

    pub fn data(&self) -> &str {
        &self.data
    }

    pub fn engine(&self) -> &Arc<JitEngine> {
        &self.engine
    }

    /// Callable for an exported kernel, `None` if `name` is not exported.
    pub fn get_function(&self, name: &str) -> Option<KernelFunction> {
        let meta = self.functions.get(name)?;
        Some(KernelFunction::new(Arc::clone(&self.engine), Arc::clone(&self.data), name, meta.arg_count()))
    }

    /// Call exported kernel `name` with `tensors`.
    ///
    /// # Safety
    ///
    /// Same contract as [`crate::ResolvedKernel::invoke`].
    pub unsafe fn dispatch<H: TensorHandle>(&self, name: &str, tensors: &[H]) -> Result<()> {
        let function = self.get_function(name).context(FunctionNotFoundSnafu { name })?;
        unsafe { function.call(tensors) }
    }

    /// Source text in `format`: the kernel source for the module's own format
    /// (or an empty request), the auxiliary source otherwise.
    pub fn get_source(&self, format: &str) -> &str {
        if format.is_empty() || format == self.format { &self.data } else { &self.source }
    }

    /// Write format tag, function metadata and kernel source, in that order.
    pub fn save_to_binary<W: Write>(&self, w: &mut W) -> Result<()> {
        stream::write_str(w, &self.format)?;
        stream::write_function_map(w, &self.functions)?;
        stream::write_str(w, &self.data)
    }

    /// Inverse of [`KernelModule::save_to_binary`]. The auxiliary source is not persisted.
    pub fn load_binary<R: Read>(r: &mut R, engine: Arc<JitEngine>) -> Result<Self> {
        let format = stream::read_string(r)?;
        let functions = stream::read_function_map(r)?;
        let data = stream::read_string(r)?;
        Ok(Self::new(engine, data, format, functions, String::new()))
    }

    /// Save the kernel source to `path` and the metadata to its sidecar file.
    pub fn save_to_file(&self, path: &Path, format: &str) -> Result<()> {
        let format = file_format(path, format);
        ensure!(format == self.format, FormatMismatchSnafu { expected: &self.format, actual: format });

        let meta_path = meta_file_path(path);
        let meta = serde_json::to_vec_pretty(&self.functions).context(MetadataSnafu)?;
        std::fs::write(&meta_path, meta).context(IoSnafu { path: &meta_path })?;
        std::fs::write(path, self.data.as_bytes()).context(IoSnafu { path })?;

        tracing::debug!(path = %path.display(), format = %self.format, "saved kernel module");
        Ok(())
    }

    /// Load a module written by [`KernelModule::save_to_file`].
    pub fn load_from_file(path: &Path, format: &str, engine: Arc<JitEngine>) -> Result<Self> {
        let format = file_format(path, format);
        let meta_path = meta_file_path(path);
        let meta = std::fs::read(&meta_path).context(IoSnafu { path: &meta_path })?;
        let functions = serde_json::from_slice(&meta).context(MetadataSnafu)?;
        let data = std::fs::read_to_string(path).context(IoSnafu { path })?;
        Ok(Self::new(engine, data, format, functions, String::new()))
    }
}
