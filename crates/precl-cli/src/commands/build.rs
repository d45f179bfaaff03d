//! `precl build` command - Compile a kernel or reuse its stored binary.

use std::path::PathBuf;

use colored::Colorize;
use precl::{
    BinaryOrigin, CachePolicy, ComputeBackend, CpuBackend, Pipeline, PipelineConfig,
    PipelineReport,
};

use crate::error::CliResult;

use super::{opencl_backend, parse_backend, BackendKind};

/// Arguments of the `build` command.
#[derive(Debug, Clone, Default)]
pub struct BuildArgs {
    /// Kernel source file.
    pub source: Option<PathBuf>,
    /// Binary destination.
    pub output: Option<PathBuf>,
    /// Cache policy override.
    pub policy: Option<CachePolicy>,
    /// Backend name.
    pub backend: String,
    /// Compiler options override.
    pub build_options: Option<String>,
    /// Cache directory override.
    pub cache_dir: Option<PathBuf>,
    /// Configuration file.
    pub config: Option<PathBuf>,
    /// Print the kernel source before compiling.
    pub echo_source: bool,
}

/// Execute the `build` command.
pub fn execute(args: &BuildArgs) -> CliResult<()> {
    let backend = parse_backend(&args.backend)?;
    let config = resolve_config(args)?;

    println!("{} Precompiling kernel", "→".bright_cyan());
    println!(
        "  {} Source: {}",
        "•".dimmed(),
        config.source.display().to_string().bright_yellow()
    );
    println!("  {} Backend: {}", "•".dimmed(), args.backend.bright_yellow());
    println!(
        "  {} Policy: {}",
        "•".dimmed(),
        config.policy.to_string().bright_yellow()
    );
    println!();

    let report = match backend {
        BackendKind::Cpu => run(&CpuBackend::new(), config)?,
        BackendKind::OpenCl => run(&opencl_backend()?, config)?,
    };

    print_report(&report);
    Ok(())
}

/// Layers the configuration file, `PRECL_*` variables and flags.
fn resolve_config(args: &BuildArgs) -> CliResult<PipelineConfig> {
    let mut config = match &args.config {
        Some(path) => PipelineConfig::from_file(path)?,
        None => PipelineConfig::discover(std::env::current_dir()?)?,
    };
    config.apply_env()?;
    apply_flags(&mut config, args);
    tracing::debug!(?config, "Resolved configuration");
    Ok(config)
}

fn apply_flags(config: &mut PipelineConfig, args: &BuildArgs) {
    if let Some(source) = &args.source {
        config.source = source.clone();
    }
    if let Some(output) = &args.output {
        config.output = Some(output.clone());
    }
    if let Some(policy) = args.policy {
        config.policy = policy;
    }
    if let Some(options) = &args.build_options {
        config.build_options = options.clone();
    }
    if let Some(dir) = &args.cache_dir {
        config.cache_dir = Some(dir.clone());
    }
    if args.echo_source {
        config.echo_source = true;
    }
}

fn run<B: ComputeBackend>(backend: &B, config: PipelineConfig) -> CliResult<PipelineReport> {
    let pipeline = Pipeline::new(backend, config)?;
    Ok(pipeline.run()?)
}

fn print_report(report: &PipelineReport) {
    let action = match report.origin {
        BinaryOrigin::Compiled => "Compiled",
        BinaryOrigin::Cached => "Reused cached binary for",
    };

    println!(
        "{} {} '{}'",
        "✓".bright_green(),
        action,
        report.kernel.bright_white()
    );
    println!(
        "  {} Device: {} ({} context)",
        "•".dimmed(),
        report.device,
        report.context_kind
    );
    println!(
        "  {} Binary: {} ({} bytes)",
        "•".dimmed(),
        report.output.display().to_string().bright_yellow(),
        report.binary_len
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CliError;
    use std::fs;

    const KERNEL: &str = "__kernel void add(__global int* a, __global const int* b) {\n\
                          \x20   a[get_global_id(0)] += b[get_global_id(0)];\n\
                          }\n";

    #[test]
    fn test_flags_override_config() {
        let mut config = PipelineConfig::from_toml_str(
            r#"
            source = "from-file.cl"
            build_options = "-DFILE"
            policy = "always"
            "#,
        )
        .unwrap();

        let args = BuildArgs {
            source: Some(PathBuf::from("flag.cl")),
            build_options: Some("-DFLAG".to_string()),
            ..Default::default()
        };
        apply_flags(&mut config, &args);

        assert_eq!(config.source, PathBuf::from("flag.cl"));
        assert_eq!(config.build_options, "-DFLAG");
        assert_eq!(config.policy, CachePolicy::Always);
        assert!(config.output.is_none());
    }

    #[test]
    fn test_run_compiles_then_reuses() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("add.cl");
        let output = dir.path().join("add.bin");
        fs::write(&source, KERNEL).unwrap();

        let mut config = PipelineConfig::for_source(&source);
        config.output = Some(output.clone());

        let backend = CpuBackend::new();
        let first = run(&backend, config.clone()).unwrap();
        assert_eq!(first.origin, BinaryOrigin::Compiled);
        assert!(output.exists());

        let second = run(&backend, config).unwrap();
        assert_eq!(second.origin, BinaryOrigin::Cached);
    }

    #[test]
    fn test_run_reports_compile_failure() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("broken.cl");
        fs::write(&source, "__kernel void broken(").unwrap();

        let mut config = PipelineConfig::for_source(&source);
        config.output = Some(dir.path().join("broken.bin"));

        let err = run(&CpuBackend::new(), config).unwrap_err();
        assert!(matches!(err, CliError::Pipeline(_)));
        assert!(err.to_string().contains("Compilation of 'broken' failed"));
    }

    #[test]
    fn test_run_rejects_missing_source() {
        let err = run(&CpuBackend::new(), PipelineConfig::default()).unwrap_err();
        assert!(matches!(err, CliError::Precl(_)));
    }
}
