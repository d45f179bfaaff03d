//! `precl load` command - Validate a stored binary on the current device.

use std::path::Path;

use colored::Colorize;
use precl::{verify_binary, ComputeBackend, CpuBackend, LoadReport};

use crate::error::CliResult;

use super::{opencl_backend, parse_backend, BackendKind};

/// Execute the `load` command.
pub fn execute(binary: &Path, backend: &str, build_options: &str) -> CliResult<()> {
    let kind = parse_backend(backend)?;

    println!(
        "{} Loading {}",
        "→".bright_cyan(),
        binary.display().to_string().bright_yellow()
    );

    let report = match kind {
        BackendKind::Cpu => load(&CpuBackend::new(), binary, build_options)?,
        BackendKind::OpenCl => load(&opencl_backend()?, binary, build_options)?,
    };

    println!(
        "{} Binary is valid for {} ({} bytes)",
        "✓".bright_green(),
        report.device,
        report.binary_len
    );
    Ok(())
}

fn load<B: ComputeBackend>(
    backend: &B,
    binary: &Path,
    build_options: &str,
) -> CliResult<LoadReport> {
    Ok(verify_binary(backend, binary, build_options)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CliError;
    use precl::{BinaryOrigin, Pipeline, PipelineConfig, PipelineStage};

    #[test]
    fn test_load_after_build() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("copy.cl");
        let output = dir.path().join("copy.bin");
        std::fs::write(
            &source,
            "__kernel void copy(__global int* d, __global const int* s) { d[0] = s[0]; }",
        )
        .unwrap();

        let backend = CpuBackend::new();
        let mut config = PipelineConfig::for_source(&source);
        config.output = Some(output.clone());
        let built = Pipeline::new(&backend, config).unwrap().run().unwrap();
        assert_eq!(built.origin, BinaryOrigin::Compiled);

        let report = load(&backend, &output, "").unwrap();
        assert_eq!(report.binary_len, built.binary_len);
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = load(&CpuBackend::new(), &dir.path().join("none.bin"), "").unwrap_err();
        match err {
            CliError::Pipeline(failure) => assert_eq!(failure.stage, PipelineStage::QueueReady),
            other => panic!("unexpected error: {}", other),
        }
    }
}
