//! Kernel compilation through an external C/C++ compiler and dynamic loading.
//!
//! A kernel source is annotated for parallel execution, written to
//! `<home>/kiln_module_<hash>.cc`, compiled with the configured compiler into
//! `<home>/kiln_module_<hash>.so` and loaded with `dlopen`. Generated files are
//! not cleaned up. Compiler runs are not time-limited: a hung compiler blocks
//! the calling thread.

use std::ffi::c_void;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;

use libloading::Library;
use snafu::ResultExt;

use crate::abi::{self, CallDescriptor};
use crate::cache::ArtifactCache;
use crate::call::CallInterface;
use crate::config::JitConfig;
use crate::error::{Error, IoSnafu, Result, SymbolNotFoundSnafu, ToolchainFailureSnafu};
use crate::kernel::ResolvedKernel;
use crate::signature::extract_signature;
use crate::transform::parallelize;

/// Content hash of a kernel source, the artifact cache key.
pub fn content_hash(source: &str) -> u64 {
    xxhash_rust::xxh64::xxh64(source.as_bytes(), 0)
}

/// File stem shared by the generated source and library of a kernel.
pub fn artifact_stem(hash: u64) -> String {
    format!("kiln_module_{hash:016x}")
}

/// Compiles, loads and caches kernels.
pub struct JitEngine {
    config: JitConfig,
    cache: Arc<ArtifactCache>,
}

impl JitEngine {
    /// Engine with a private, empty cache.
    pub fn new(config: JitConfig) -> Self {
        Self::with_cache(config, Arc::new(ArtifactCache::new()))
    }

    /// Engine sharing `cache` with other engines.
    pub fn with_cache(config: JitConfig, cache: Arc<ArtifactCache>) -> Self {
        Self { config, cache }
    }

    /// Engine configured from the environment, see [`JitConfig::from_env`].
    pub fn from_env() -> Result<Self> {
        Ok(Self::new(JitConfig::from_env()?))
    }

    pub fn config(&self) -> &JitConfig {
        &self.config
    }

    pub fn cache(&self) -> &Arc<ArtifactCache> {
        &self.cache
    }

    /// Compile `source` (unless cached), load it and resolve kernel `name`.
    pub fn compile_and_load(&self, source: &str, name: &str) -> Result<ResolvedKernel> {
        let hash = content_hash(source);
        if let Some(kernel) = self.cache.lookup(hash, name) {
            tracing::debug!(kernel.name = %name, kernel.hash = hash, "kernel cache hit");
            return Ok(kernel);
        }

        let (library, so_path, descriptor) = match self.cache.library(hash) {
            Some((library, so_path)) => (library, so_path, self.describe(source, name)?),
            None => {
                let stem = artifact_stem(hash);
                let src_path = self.write_source(&stem, source)?;
                let descriptor = self.describe(source, name)?;
                let so_path = self.compile(name, &stem, &src_path)?;
                let library = load_library(&so_path)?;
                (self.cache.insert_library(hash, library, &so_path), so_path, descriptor)
            }
        };

        let code = resolve_symbol(library, name, &so_path)?;
        let interface = Arc::new(CallInterface::prepare(name, &descriptor)?);
        let kernel = ResolvedKernel::new(name, hash, code, interface);
        self.cache.insert(hash, library, &so_path, kernel.clone());

        tracing::debug!(kernel.name = %name, path = %so_path.display(), "kernel compiled and loaded");
        Ok(kernel)
    }

    /// Extract the signature of `name` and build its call descriptor.
    fn describe(&self, source: &str, name: &str) -> Result<CallDescriptor> {
        let signature = extract_signature(source, name)?;
        abi::describe(&signature, self.config.unsupported_params)
    }

    /// Write the parallelized source to `<home>/<stem>.cc`.
    ///
    /// The file is written under a temporary name and renamed into place, so a
    /// concurrent compile of the same source never reads a partial file.
    fn write_source(&self, stem: &str, source: &str) -> Result<PathBuf> {
        let path = self.config.artifact_path(stem, "cc");
        let home = &self.config.home;

        let mut tmp = tempfile::Builder::new().prefix(stem).suffix(".cc").tempfile_in(home).context(IoSnafu { path: home })?;
        tmp.write_all(parallelize(source).source.as_bytes()).context(IoSnafu { path: tmp.path() })?;
        tmp.persist(&path).map_err(|err| err.error).context(IoSnafu { path: &path })?;

        Ok(path)
    }

    /// Compiler invocation producing `output` from `source`.
    pub fn compile_command(&self, source: &Path, output: &Path) -> Command {
        let config = &self.config;
        let (program, wrapper_args) = match config.compiler.split_first() {
            Some((program, rest)) => (program.as_str(), rest),
            None => ("g++", &[][..]),
        };

        let mut cmd = Command::new(program);
        cmd.args(wrapper_args)
            .arg(format!("-O{}", config.opt_level))
            .args(["-fPIC", "-shared", "-fpermissive"])
            .arg(&config.parallel_flag)
            .args(config.target.vector_flags())
            .arg("-o")
            .arg(output)
            .arg(source);
        for dir in &config.include_dirs {
            cmd.arg(format!("-I{}", dir.display()));
        }
        cmd
    }

    /// Compile `src_path` into `<home>/<stem>.so`.
    ///
    /// The compiler writes to a temporary path that is renamed onto the final
    /// one on success and removed on failure.
    fn compile(&self, name: &str, stem: &str, src_path: &Path) -> Result<PathBuf> {
        let so_path = self.config.artifact_path(stem, "so");
        let home = &self.config.home;
        let tmp_so =
            tempfile::Builder::new().prefix(stem).suffix(".so").tempfile_in(home).context(IoSnafu { path: home })?.into_temp_path();

        let mut cmd = self.compile_command(src_path, &tmp_so);
        let command = render_command(&cmd);
        tracing::debug!(kernel.name = %name, %command, "compiling kernel");

        let output = match cmd.output() {
            Ok(output) => output,
            Err(err) => {
                let exit_code = match err.kind() {
                    std::io::ErrorKind::NotFound => 127,
                    std::io::ErrorKind::PermissionDenied => 126,
                    _ => return Err(err).context(IoSnafu { path: cmd.get_program() }),
                };
                return ToolchainFailureSnafu { name, exit_code, command, stderr: err.to_string() }.fail();
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
            tracing::error!(kernel.name = %name, %command, "kernel compilation failed");
            return ToolchainFailureSnafu { name, exit_code: exit_code(&output.status), command, stderr }.fail();
        }
        self.cache.record_compile();

        tmp_so.persist(&so_path).map_err(|err| err.error).context(IoSnafu { path: &so_path })?;
        Ok(so_path)
    }
}

/// Shell-style exit code: the process's own code, or 128 + signal number.
fn exit_code(status: &std::process::ExitStatus) -> i32 {
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    status.code().unwrap_or(-1)
}

fn render_command(cmd: &Command) -> String {
    std::iter::once(cmd.get_program())
        .chain(cmd.get_args())
        .map(|part| part.to_string_lossy())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Load a shared library for the rest of the process.
fn load_library(path: &Path) -> Result<&'static Library> {
    let library = unsafe { Library::new(path) }.map_err(|e| Error::LoadFailure { path: path.to_path_buf(), reason: e.to_string() })?;
    Ok(Box::leak(Box::new(library)))
}

fn resolve_symbol(library: &'static Library, name: &str, path: &Path) -> Result<*const c_void> {
    let symbol = unsafe { library.get::<unsafe extern "C" fn()>(name.as_bytes()) };
    match symbol {
        Ok(symbol) => Ok(*symbol as *const c_void),
        Err(e) => SymbolNotFoundSnafu { name, path, reason: e.to_string() }.fail(),
    }
}
