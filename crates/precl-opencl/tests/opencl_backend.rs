//! OpenCL backend integration tests.
//!
//! These tests need an OpenCL driver. Run with:
//! cargo test -p precl-opencl --features opencl-tests -- --ignored
//!
//! On systems without a platform they return early via `skip_without_opencl!`.

#![cfg(feature = "opencl-tests")]

use precl_core::prelude::*;
use precl_opencl::{is_opencl_available, OpenClBackend};

macro_rules! skip_without_opencl {
    () => {
        if !is_opencl_available() {
            eprintln!("Skipping test: OpenCL not available");
            return;
        }
    };
}

const KERNEL: &str = "__kernel void scale(__global float* v, float f) {\n\
                      \x20   size_t i = get_global_id(0);\n\
                      \x20   v[i] = v[i] * f;\n\
                      }\n";

#[test]
#[ignore]
fn test_enumerates_platforms() {
    skip_without_opencl!();

    let backend = OpenClBackend::new().expect("backend");
    let platforms = describe_platforms(&backend).expect("platforms");
    assert!(!platforms.is_empty());
    for platform in &platforms {
        println!("{} ({})", platform.name, platform.version);
        for device in &platform.devices {
            println!("  {}", device);
        }
    }
}

#[test]
#[ignore]
fn test_compile_save_and_reload() {
    skip_without_opencl!();

    let dir = tempfile::tempdir().expect("tempdir");
    let source = dir.path().join("scale.cl");
    let output = dir.path().join("scale.bin");
    std::fs::write(&source, KERNEL).expect("write source");

    let backend = OpenClBackend::new().expect("backend");
    let mut config = PipelineConfig::for_source(&source);
    config.output = Some(output.clone());

    let pipeline = Pipeline::new(&backend, config).expect("pipeline");
    let report = pipeline.run().expect("run");
    assert_eq!(report.kernel, "scale");
    assert_eq!(report.origin, BinaryOrigin::Compiled);
    assert!(report.binary_len > 0);

    let loaded = pipeline.verify(&output).expect("verify");
    assert_eq!(loaded.device.id, report.device.id);

    let again = pipeline.run().expect("second run");
    assert_eq!(again.origin, BinaryOrigin::Cached);
}

#[test]
#[ignore]
fn test_build_failure_has_log() {
    skip_without_opencl!();

    let dir = tempfile::tempdir().expect("tempdir");
    let source = dir.path().join("broken.cl");
    let output = dir.path().join("broken.bin");
    std::fs::write(&source, "__kernel void broken( {").expect("write source");

    let backend = OpenClBackend::new().expect("backend");
    let mut config = PipelineConfig::for_source(&source);
    config.output = Some(output.clone());

    let failure = Pipeline::new(&backend, config)
        .expect("pipeline")
        .run()
        .unwrap_err();
    assert_eq!(failure.stage, PipelineStage::QueueReady);
    assert!(failure.error.build_log().is_some());
    assert!(!output.exists());
}
