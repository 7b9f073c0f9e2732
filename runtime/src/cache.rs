//! Compiled-artifact cache.
//!
//! Maps the content hash of a kernel source to the shared library compiled
//! from it and the functions resolved in that library so far. Textually
//! identical kernels share one artifact; the per-artifact function table
//! tells kernels of different names apart.
//!
//! # Thread Safety
//!
//! One `parking_lot::Mutex` guards the map and is held only for map access,
//! never across a compiler run. Two threads missing on the same hash at the
//! same time therefore both compile. Both results are valid and stay loaded;
//! the last insert of a function wins its slot in the table.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use libloading::Library;
use parking_lot::Mutex;

use crate::kernel::ResolvedKernel;

/// A loaded shared library and the kernels resolved from it.
///
/// Libraries are never unloaded: the handle is leaked on load and lives until
/// the process exits, so resolved function pointers never dangle.
struct CompiledArtifact {
    library: &'static Library,
    path: PathBuf,
    functions: HashMap<String, ResolvedKernel>,
}

/// Cache of compiled kernels, keyed by source content hash.
#[derive(Default)]
pub struct ArtifactCache {
    artifacts: Mutex<HashMap<u64, CompiledArtifact>>,
    compiles: AtomicUsize,
}

impl ArtifactCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Previously resolved kernel `name` compiled from the source with `hash`.
    pub fn lookup(&self, hash: u64, name: &str) -> Option<ResolvedKernel> {
        self.artifacts.lock().get(&hash).and_then(|artifact| artifact.functions.get(name).cloned())
    }

    /// Library already loaded for `hash`, with the path it was loaded from.
    pub fn library(&self, hash: u64) -> Option<(&'static Library, PathBuf)> {
        self.artifacts.lock().get(&hash).map(|artifact| (artifact.library, artifact.path.clone()))
    }

    /// Register a freshly loaded library.
    ///
    /// If another thread registered one for the same hash first, that entry is
    /// kept and returned; the caller's library stays loaded but unused by the cache.
    pub fn insert_library(&self, hash: u64, library: &'static Library, path: &Path) -> &'static Library {
        let mut artifacts = self.artifacts.lock();
        let artifact = artifacts.entry(hash).or_insert_with(|| CompiledArtifact {
            library,
            path: path.to_path_buf(),
            functions: HashMap::new(),
        });
        artifact.library
    }

    /// Record a resolved kernel under its artifact. Replaces an existing entry of the same name.
    pub fn insert(&self, hash: u64, library: &'static Library, path: &Path, kernel: ResolvedKernel) {
        let mut artifacts = self.artifacts.lock();
        let artifact = artifacts.entry(hash).or_insert_with(|| CompiledArtifact {
            library,
            path: path.to_path_buf(),
            functions: HashMap::new(),
        });
        artifact.functions.insert(kernel.name().to_string(), kernel);
    }

    /// Count one completed compiler run.
    pub fn record_compile(&self) {
        self.compiles.fetch_add(1, Ordering::Relaxed);
    }

    /// Number of compiler runs recorded so far.
    pub fn compile_count(&self) -> usize {
        self.compiles.load(Ordering::Relaxed)
    }

    /// Number of artifacts.
    pub fn len(&self) -> usize {
        self.artifacts.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.artifacts.lock().is_empty()
    }

    pub fn contains(&self, hash: u64) -> bool {
        self.artifacts.lock().contains_key(&hash)
    }

    /// Number of kernels resolved from the artifact of `hash`.
    pub fn function_count(&self, hash: u64) -> usize {
        self.artifacts.lock().get(&hash).map_or(0, |artifact| artifact.functions.len())
    }
}
