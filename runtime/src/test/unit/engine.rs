//! Compile/load pipeline tests. Tests calling the native toolchain skip
//! themselves when `g++` is unavailable.

use std::sync::Arc;

use kiln_device::TensorView;

use crate::test::{ADD_KERNEL, ADD_SUB_KERNELS, engine_in, require_toolchain};
use crate::{
    ArtifactCache, Error, JitConfig, JitEngine, UnsupportedParamPolicy, artifact_stem, content_hash, parallelize,
};

#[test]
fn test_signature_failure_leaves_only_source() {
    let home = tempfile::tempdir().unwrap();
    let engine = engine_in(home.path());

    let err = engine.compile_and_load(ADD_KERNEL, "mul").unwrap_err();
    assert!(matches!(&err, Error::SignatureParseFailure { name } if name == "mul"), "{err}");

    let stem = artifact_stem(content_hash(ADD_KERNEL));
    let cc = home.path().join(format!("{stem}.cc"));
    assert_eq!(std::fs::read_to_string(&cc).unwrap(), parallelize(ADD_KERNEL).source);
    assert!(!home.path().join(format!("{stem}.so")).exists());
    assert_eq!(engine.cache().compile_count(), 0);
    assert!(engine.cache().is_empty());
}

#[test]
fn test_missing_compiler_is_toolchain_failure() {
    let home = tempfile::tempdir().unwrap();
    let config = JitConfig::builder().home(home.path()).compiler("/nonexistent/kiln-cc").build();
    let engine = JitEngine::new(config);

    let err = engine.compile_and_load(ADD_KERNEL, "add").unwrap_err();
    assert!(matches!(&err, Error::ToolchainFailure { exit_code: 127, name, .. } if name == "add"), "{err}");
    assert!(!home.path().join(format!("{}.so", artifact_stem(content_hash(ADD_KERNEL)))).exists());
}

#[cfg(unix)]
#[test]
fn test_compiler_exit_code_preserved() {
    use std::os::unix::fs::PermissionsExt;

    let home = tempfile::tempdir().unwrap();
    let script = home.path().join("broken-cc");
    std::fs::write(&script, "#!/bin/sh\necho 'fatal: no such luck' >&2\nexit 3\n").unwrap();
    std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

    let engine = JitEngine::new(JitConfig::builder().home(home.path()).compiler(script.to_string_lossy()).build());
    match engine.compile_and_load(ADD_KERNEL, "add").unwrap_err() {
        Error::ToolchainFailure { exit_code, command, stderr, .. } => {
            assert_eq!(exit_code, 3);
            assert!(command.contains("-fPIC -shared -fpermissive -fopenmp"), "{command}");
            assert!(stderr.contains("no such luck"));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(engine.cache().compile_count(), 0);
}

#[test]
fn test_abort_policy_rejects_before_compiling() {
    let home = tempfile::tempdir().unwrap();
    let config = JitConfig::builder().home(home.path()).unsupported_params(UnsupportedParamPolicy::Abort).build();
    let engine = JitEngine::new(config);

    let src = "extern \"C\" void k(float* x, long n) {\n  for (long i = 0; i < n; i++) x[i] = 0;\n}\n";
    let err = engine.compile_and_load(src, "k").unwrap_err();
    assert!(matches!(&err, Error::UnsupportedParameterType { type_string } if type_string == "long"), "{err}");
    assert_eq!(engine.cache().compile_count(), 0);
}

#[test]
fn test_add_end_to_end() {
    require_toolchain!();
    let home = tempfile::tempdir().unwrap();
    let engine = engine_in(home.path());

    let kernel = engine.compile_and_load(ADD_KERNEL, "add").unwrap();
    assert_eq!(kernel.name(), "add");
    assert_eq!(kernel.descriptor().arity(), 3);

    let mut a: Vec<i32> = (0..8).collect();
    let mut b: Vec<i32> = (0..8).map(|i| 10 * i).collect();
    let mut out = vec![0i32; 8];
    {
        let args = [TensorView::from_slice(&mut a), TensorView::from_slice(&mut b), TensorView::from_slice(&mut out)];
        unsafe { kernel.invoke(&args).unwrap() };
    }

    assert_eq!(out, (0..8).map(|i| 11 * i).collect::<Vec<i32>>());
    assert_eq!(a, (0..8).collect::<Vec<i32>>());
}

#[test]
fn test_second_compile_is_cache_hit() {
    require_toolchain!();
    let home = tempfile::tempdir().unwrap();
    let engine = engine_in(home.path());

    let first = engine.compile_and_load(ADD_KERNEL, "add").unwrap();
    let second = engine.compile_and_load(&ADD_KERNEL.to_string(), "add").unwrap();

    assert_eq!(engine.cache().compile_count(), 1);
    assert_eq!(engine.cache().len(), 1);
    assert_eq!(first.code_ptr(), second.code_ptr());
    assert_eq!(first.hash(), content_hash(ADD_KERNEL));
}

#[test]
fn test_functions_of_one_source_share_artifact() {
    require_toolchain!();
    let home = tempfile::tempdir().unwrap();
    let engine = engine_in(home.path());

    let add = engine.compile_and_load(ADD_SUB_KERNELS, "add").unwrap();
    let sub = engine.compile_and_load(ADD_SUB_KERNELS, "sub").unwrap();

    let hash = content_hash(ADD_SUB_KERNELS);
    assert_eq!(engine.cache().compile_count(), 1);
    assert_eq!(engine.cache().function_count(hash), 2);

    let mut a = vec![5, 6, 7, 8];
    let mut b = vec![1, 2, 3, 4];
    let mut sum = vec![0; 4];
    let mut diff = vec![0; 4];
    unsafe {
        add.invoke(&[TensorView::from_slice(&mut a), TensorView::from_slice(&mut b), TensorView::from_slice(&mut sum)])
            .unwrap();
        sub.invoke(&[TensorView::from_slice(&mut a), TensorView::from_slice(&mut b), TensorView::from_slice(&mut diff)])
            .unwrap();
    }
    assert_eq!(sum, vec![6, 8, 10, 12]);
    assert_eq!(diff, vec![4, 4, 4, 4]);
}

#[test]
fn test_shared_cache_across_engines() {
    require_toolchain!();
    let home = tempfile::tempdir().unwrap();
    let cache = Arc::new(ArtifactCache::new());
    let first = JitEngine::with_cache(JitConfig::builder().home(home.path()).build(), Arc::clone(&cache));
    let second = JitEngine::with_cache(JitConfig::builder().home(home.path()).build(), Arc::clone(&cache));

    first.compile_and_load(ADD_KERNEL, "add").unwrap();
    second.compile_and_load(ADD_KERNEL, "add").unwrap();
    assert_eq!(cache.compile_count(), 1);
}

#[test]
fn test_concurrent_first_compile() {
    require_toolchain!();
    let home = tempfile::tempdir().unwrap();
    let engine = engine_in(home.path());

    std::thread::scope(|scope| {
        let handles: Vec<_> = (0..2).map(|_| scope.spawn(|| engine.compile_and_load(ADD_KERNEL, "add"))).collect();
        for handle in handles {
            handle.join().unwrap().unwrap();
        }
    });

    let compiles = engine.cache().compile_count();
    assert!((1..=2).contains(&compiles), "{compiles} compiles");
    assert_eq!(engine.cache().len(), 1);

    let kernel = engine.compile_and_load(ADD_KERNEL, "add").unwrap();
    assert_eq!(engine.cache().compile_count(), compiles);

    let mut a = vec![1i32; 8];
    let mut b = vec![2i32; 8];
    let mut out = vec![0i32; 8];
    unsafe {
        kernel.invoke(&[TensorView::from_slice(&mut a), TensorView::from_slice(&mut b), TensorView::from_slice(&mut out)])
            .unwrap();
    }
    assert_eq!(out, vec![3; 8]);
}

#[test]
fn test_mangled_symbol_not_found() {
    require_toolchain!();
    let home = tempfile::tempdir().unwrap();
    let engine = engine_in(home.path());

    let src = "void scale(float* x) {\n  for (int i = 0; i < 4; i++) x[i] *= 2.0f;\n}\n";
    let err = engine.compile_and_load(src, "scale").unwrap_err();
    assert!(matches!(&err, Error::SymbolNotFound { name, .. } if name == "scale"), "{err}");
    assert_eq!(engine.cache().function_count(content_hash(src)), 0);
}

#[test]
fn test_too_few_tensors_rejected() {
    require_toolchain!();
    let home = tempfile::tempdir().unwrap();
    let engine = engine_in(home.path());
    let kernel = engine.compile_and_load(ADD_KERNEL, "add").unwrap();

    let mut a = vec![0i32; 8];
    let err = unsafe { kernel.invoke(&[TensorView::from_slice(&mut a)]) }.unwrap_err();
    assert!(matches!(err, Error::ArgumentCount { expected: 3, actual: 1, .. }));
}

#[test]
fn test_dropped_parameter_shortens_descriptor() {
    require_toolchain!();
    let home = tempfile::tempdir().unwrap();
    let engine = engine_in(home.path());

    let src = "#include <stdint.h>\nextern \"C\" void fill(int32_t* out, int64_t unused) {\n  for (int i = 0; i < 4; i++) out[i] = 7;\n}\n";
    let kernel = engine.compile_and_load(src, "fill").unwrap();
    assert_eq!(kernel.descriptor().arity(), 1);

    let mut out = vec![0i32; 4];
    unsafe { kernel.invoke(&[TensorView::from_slice(&mut out)]).unwrap() };
    assert_eq!(out, vec![7; 4]);
}
