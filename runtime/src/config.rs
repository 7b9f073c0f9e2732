//! Compiler and environment configuration.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use bon::bon;
use snafu::OptionExt;

use crate::error::{Result, UnresolvedEnvironmentSnafu};

/// Annotation injected ahead of the first loop of every kernel.
pub const PARALLEL_PRAGMA: &str = "#pragma omp parallel for";

/// What to do with a parameter whose type has no ABI mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UnsupportedParamPolicy {
    /// Log and drop the parameter. The resulting descriptor is shorter than
    /// the native signature.
    #[default]
    Drop,
    /// Fail the compile with `UnsupportedParameterType`.
    Abort,
}

impl UnsupportedParamPolicy {
    fn parse(value: &str) -> Option<Self> {
        if value.eq_ignore_ascii_case("drop") {
            Some(Self::Drop)
        } else if value.eq_ignore_ascii_case("abort") {
            Some(Self::Abort)
        } else {
            None
        }
    }
}

/// Architecture the kernels are compiled for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TargetArch {
    /// Whatever the compiler targets by default.
    #[default]
    Host,
    /// 64-bit RISC-V with the vector extension.
    Riscv64,
}

impl TargetArch {
    /// Classify a target triple or compiler name, e.g. `riscv64-unknown-linux-gnu`.
    pub fn from_triple(triple: &str) -> Self {
        if triple.contains("riscv") { Self::Riscv64 } else { Self::Host }
    }

    /// Extra compiler flags enabling the vector extension.
    pub fn vector_flags(&self) -> &'static [&'static str] {
        match self {
            Self::Host => &[],
            Self::Riscv64 => &["-march=rv64gcv", "-mabi=lp64d"],
        }
    }
}

/// Configuration of the kernel JIT.
#[derive(Debug, Clone)]
pub struct JitConfig {
    /// Base directory for generated sources and libraries.
    pub home: PathBuf,
    /// Compiler command, program first.
    pub compiler: Vec<String>,
    pub target: TargetArch,
    pub opt_level: u8,
    /// Flag linking the parallel runtime the injected pragma needs.
    pub parallel_flag: String,
    pub include_dirs: Vec<PathBuf>,
    pub unsupported_params: UnsupportedParamPolicy,
}

#[bon]
impl JitConfig {
    /// Create a configuration with builder pattern.
    ///
    /// Unset include directories default to the headers shipped under `<home>/kiln`.
    #[builder]
    pub fn builder(
        #[builder(into)] home: PathBuf,
        #[builder(default = "g++".to_string(), into)] compiler: String,
        target: Option<TargetArch>,
        #[builder(default = 2)] opt_level: u8,
        #[builder(default = "-fopenmp".to_string(), into)] parallel_flag: String,
        include_dirs: Option<Vec<PathBuf>>,
        #[builder(default)] unsupported_params: UnsupportedParamPolicy,
    ) -> Self {
        let compiler: Vec<String> = compiler.split_whitespace().map(str::to_string).collect();
        let target = target.unwrap_or_else(|| TargetArch::from_triple(compiler.first().map_or("", String::as_str)));
        let include_dirs = include_dirs.unwrap_or_else(|| default_include_dirs(&home));
        Self { home, compiler, target, opt_level, parallel_flag, include_dirs, unsupported_params }
    }

    /// Create configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// * `HOME` - Base directory for generated files (required)
    /// * `KILN_COMPILER` - Compiler command (default: `g++`)
    /// * `KILN_TARGET` - Target triple (default: inferred from the compiler name)
    /// * `KILN_OPT_LEVEL` - Optimization level (default: 2)
    /// * `KILN_UNSUPPORTED_PARAMS` - `drop` or `abort` (default: `drop`)
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var_os(name))
    }

    /// Same as [`from_env`](Self::from_env), reading variables through `get`.
    fn from_lookup(get: impl Fn(&str) -> Option<OsString>) -> Result<Self> {
        let var = |name: &str| get(name).and_then(|value| value.into_string().ok());

        let home = get("HOME").context(UnresolvedEnvironmentSnafu { variable: "HOME" })?;
        let compiler = var("KILN_COMPILER").unwrap_or_else(|| "g++".to_string());
        let target = var("KILN_TARGET").map(|t| TargetArch::from_triple(&t));
        let opt_level = var("KILN_OPT_LEVEL").and_then(|s| s.parse().ok()).unwrap_or(2);
        let unsupported_params = match var("KILN_UNSUPPORTED_PARAMS") {
            Some(value) => UnsupportedParamPolicy::parse(&value).unwrap_or_else(|| {
                tracing::warn!(%value, "unrecognized KILN_UNSUPPORTED_PARAMS, dropping unsupported parameters");
                UnsupportedParamPolicy::Drop
            }),
            None => UnsupportedParamPolicy::default(),
        };

        Ok(Self::builder()
            .home(home)
            .compiler(compiler)
            .maybe_target(target)
            .opt_level(opt_level)
            .unsupported_params(unsupported_params)
            .build())
    }

    /// Path of a generated file: `<home>/<stem>.<extension>`.
    pub fn artifact_path(&self, stem: &str, extension: &str) -> PathBuf {
        self.home.join(format!("{stem}.{extension}"))
    }
}

fn default_include_dirs(home: &Path) -> Vec<PathBuf> {
    let root = home.join("kiln");
    vec![root.join("include"), root.join("3rdparty").join("dlpack").join("include")]
}
