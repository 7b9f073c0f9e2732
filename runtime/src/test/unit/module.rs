use std::collections::BTreeMap;
use std::io::Cursor;
use std::path::Path;

use kiln_device::TensorView;
use kiln_dtype::DType;

use crate::module::{KernelMetadata, KernelModule, file_format, meta_file_path};
use crate::test::{ADD_KERNEL, ADD_SUB_KERNELS, engine_in, require_toolchain};
use crate::{Error, JitEngine};

fn add_metadata() -> BTreeMap<String, KernelMetadata> {
    let meta = KernelMetadata::new("add", vec![DType::Int32; 3]);
    BTreeMap::from([("add".to_string(), meta)])
}

fn add_module(home: &Path) -> KernelModule {
    KernelModule::new(engine_in(home), ADD_KERNEL, "cc", add_metadata(), "// host view of add")
}

#[test]
fn test_binary_round_trip() {
    let home = tempfile::tempdir().unwrap();
    let mut functions = add_metadata();
    let mut vec_meta = KernelMetadata::new("vadd", vec![DType::Float32.vec(4), DType::Float32.vec(4)]);
    vec_meta.launch_param_tags = vec!["threadIdx.x".to_string()];
    functions.insert("vadd".to_string(), vec_meta);
    let module = KernelModule::new(engine_in(home.path()), ADD_KERNEL, "cc", functions, "");

    let mut bytes = Vec::new();
    module.save_to_binary(&mut bytes).unwrap();
    let loaded = KernelModule::load_binary(&mut Cursor::new(&bytes), engine_in(home.path())).unwrap();

    assert_eq!(loaded.format(), "cc");
    assert_eq!(loaded.functions(), module.functions());
    assert_eq!(loaded.data().as_bytes(), ADD_KERNEL.as_bytes());
}

#[test]
fn test_binary_layout_order() {
    let home = tempfile::tempdir().unwrap();
    let module = KernelModule::new(engine_in(home.path()), "src", "cc", BTreeMap::new(), "");

    let mut bytes = Vec::new();
    module.save_to_binary(&mut bytes).unwrap();

    let mut expected = Vec::new();
    expected.extend_from_slice(&2u64.to_le_bytes());
    expected.extend_from_slice(b"cc");
    expected.extend_from_slice(&0u64.to_le_bytes());
    expected.extend_from_slice(&3u64.to_le_bytes());
    expected.extend_from_slice(b"src");
    assert_eq!(bytes, expected);
}

#[test]
fn test_truncated_stream() {
    let home = tempfile::tempdir().unwrap();
    let mut bytes = Vec::new();
    add_module(home.path()).save_to_binary(&mut bytes).unwrap();
    bytes.truncate(bytes.len() - 5);

    let result = KernelModule::load_binary(&mut Cursor::new(&bytes), engine_in(home.path()));
    assert!(matches!(result, Err(Error::Decode { .. })));
}

#[test]
fn test_file_round_trip_with_sidecar() {
    let home = tempfile::tempdir().unwrap();
    let module = add_module(home.path());
    let path = home.path().join("kernels.cc");

    module.save_to_file(&path, "").unwrap();
    let sidecar = meta_file_path(&path);
    assert_eq!(sidecar, home.path().join("kernels.kiln_meta.json"));
    let json: serde_json::Value = serde_json::from_slice(&std::fs::read(&sidecar).unwrap()).unwrap();
    assert_eq!(json["add"]["arg_types"], serde_json::json!(["int32", "int32", "int32"]));

    let loaded = KernelModule::load_from_file(&path, "", engine_in(home.path())).unwrap();
    assert_eq!(loaded.format(), "cc");
    assert_eq!(loaded.functions(), module.functions());
    assert_eq!(loaded.data(), ADD_KERNEL);
}

#[test]
fn test_save_format_mismatch() {
    let home = tempfile::tempdir().unwrap();
    let module = add_module(home.path());

    let err = module.save_to_file(&home.path().join("kernels.so"), "").unwrap_err();
    assert!(matches!(&err, Error::FormatMismatch { expected, actual } if expected == "cc" && actual == "so"), "{err}");
    assert!(module.save_to_file(&home.path().join("kernels.bin"), "cc").is_ok());
}

#[test]
fn test_file_format() {
    assert_eq!(file_format(Path::new("a/b.cc"), ""), "cc");
    assert_eq!(file_format(Path::new("a/b.cc"), "c"), "c");
    assert_eq!(file_format(Path::new("noext"), ""), "");
}

#[test]
fn test_get_source() {
    let home = tempfile::tempdir().unwrap();
    let module = add_module(home.path());
    assert_eq!(module.get_source("cc"), ADD_KERNEL);
    assert_eq!(module.get_source(""), ADD_KERNEL);
    assert_eq!(module.get_source("asm"), "// host view of add");
    assert_eq!(module.type_key(), "kiln");
}

#[test]
fn test_unknown_function() {
    let home = tempfile::tempdir().unwrap();
    let module = add_module(home.path());
    assert!(module.get_function("mul").is_none());

    let mut a = vec![0i32; 8];
    let err = unsafe { module.dispatch("mul", &[TensorView::from_slice(&mut a)]) }.unwrap_err();
    assert!(matches!(&err, Error::FunctionNotFound { name } if name == "mul"));
}

#[test]
fn test_argument_count_checked_before_compiling() {
    let home = tempfile::tempdir().unwrap();
    let module = add_module(home.path());

    let function = module.get_function("add").unwrap();
    assert_eq!(function.arg_count(), 3);

    let mut a = vec![0i32; 8];
    let mut b = vec![0i32; 8];
    let err = unsafe { function.call(&[TensorView::from_slice(&mut a), TensorView::from_slice(&mut b)]) }.unwrap_err();
    assert!(matches!(err, Error::ArgumentCount { expected: 3, actual: 2, .. }));
    assert_eq!(module.engine().cache().compile_count(), 0);
}

#[test]
fn test_dispatch_after_reload() {
    require_toolchain!();
    let home = tempfile::tempdir().unwrap();
    let mut bytes = Vec::new();
    add_module(home.path()).save_to_binary(&mut bytes).unwrap();

    let engine: std::sync::Arc<JitEngine> = engine_in(home.path());
    let module = KernelModule::load_binary(&mut Cursor::new(&bytes), engine).unwrap();

    let mut a = vec![1i32, 2, 3, 4, 5, 6, 7, 8];
    let mut b = vec![8i32, 7, 6, 5, 4, 3, 2, 1];
    let mut out = vec![0i32; 8];
    for _ in 0..3 {
        unsafe {
            module
                .dispatch("add", &[TensorView::from_slice(&mut a), TensorView::from_slice(&mut b), TensorView::from_slice(&mut out)])
                .unwrap();
        }
    }
    assert_eq!(out, vec![9; 8]);
    assert_eq!(module.engine().cache().compile_count(), 1);
}

#[test]
fn test_module_with_two_kernels() {
    require_toolchain!();
    let home = tempfile::tempdir().unwrap();
    let functions = BTreeMap::from([
        ("add".to_string(), KernelMetadata::new("add", vec![DType::Int32; 3])),
        ("sub".to_string(), KernelMetadata::new("sub", vec![DType::Int32; 3])),
    ]);
    let module = KernelModule::new(engine_in(home.path()), ADD_SUB_KERNELS, "cc", functions, "");

    let mut a = vec![10, 20, 30, 40];
    let mut b = vec![1, 2, 3, 4];
    let mut out = vec![0; 4];
    unsafe {
        module.dispatch("sub", &[TensorView::from_slice(&mut a), TensorView::from_slice(&mut b), TensorView::from_slice(&mut out)]).unwrap();
    }
    assert_eq!(out, vec![9, 18, 27, 36]);
}
