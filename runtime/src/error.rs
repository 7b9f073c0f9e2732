//! Error types for kernel compilation and invocation.

use std::path::PathBuf;

use snafu::Snafu;

/// Result type for runtime operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors that can occur while compiling, loading, describing or invoking a kernel.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    /// A required environment variable is not set.
    #[snafu(display("environment variable {variable} is not set"))]
    UnresolvedEnvironment { variable: String },

    /// Filesystem access failed.
    #[snafu(display("I/O error on {}: {source}", path.display()))]
    Io { path: PathBuf, source: std::io::Error },

    /// The external compiler exited unsuccessfully.
    #[snafu(display("compiling '{name}' failed with exit code {exit_code}\ncommand: {command}\n{stderr}"))]
    ToolchainFailure { name: String, exit_code: i32, command: String, stderr: String },

    /// The compiled shared library could not be loaded.
    #[snafu(display("failed to load {}: {reason}", path.display()))]
    LoadFailure { path: PathBuf, reason: String },

    /// The kernel symbol is missing from the loaded library.
    #[snafu(display("symbol '{name}' not found in {}: {reason}", path.display()))]
    SymbolNotFound { name: String, path: PathBuf, reason: String },

    /// No `<type> name(<params>)` declaration for the kernel was found in its source.
    #[snafu(display("could not parse the signature of '{name}'"))]
    SignatureParseFailure { name: String },

    /// A parameter type has no ABI mapping.
    #[snafu(display("unsupported parameter type '{type_string}'"))]
    UnsupportedParameterType { type_string: String },

    /// The foreign call interface could not be prepared.
    #[snafu(display("failed to prepare call interface for '{name}': {reason}"))]
    DescriptorFailure { name: String, reason: String },

    /// A module was saved with a format different from its own.
    #[snafu(display("can only save to format={expected}, requested {actual}"))]
    FormatMismatch { expected: String, actual: String },

    /// The module does not export the requested function.
    #[snafu(display("function '{name}' not found in module"))]
    FunctionNotFound { name: String },

    /// Wrong number of tensor handles for a kernel call.
    #[snafu(display("'{name}' expects {expected} arguments, got {actual}"))]
    ArgumentCount { name: String, expected: usize, actual: usize },

    /// Metadata sidecar could not be encoded or decoded.
    #[snafu(display("kernel metadata error: {source}"))]
    Metadata { source: serde_json::Error },

    /// Reading or writing a module stream failed.
    #[snafu(display("module stream error: {source}"))]
    Stream { source: std::io::Error },

    /// Persisted module stream is malformed.
    #[snafu(display("malformed module stream: {reason}"))]
    Decode { reason: String },
}
