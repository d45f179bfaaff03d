//! precl CLI - Precompile compute kernels into device binaries.
//!
//! # Commands
//!
//! - `precl build [SOURCE]` - Compile a kernel (or reuse its binary) and save it
//! - `precl load <BINARY>` - Validate a stored binary on the current device
//! - `precl devices` - List platforms and devices
//! - `precl cache stats|clear` - Inspect or clear the binary cache
//!
//! # Examples
//!
//! ```bash
//! # Compile and write the binary next to the source
//! precl build kernels/matmul.cl -o kernels/matmul.bin
//!
//! # Always recompile, with extra compiler options
//! precl build kernels/matmul.cl --policy always --build-options "-DTILE=16"
//!
//! # Check that a stored binary still loads
//! precl load kernels/matmul.bin
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use colored::Colorize;
use precl::CachePolicy;
use tracing_subscriber::EnvFilter;

mod commands;
mod error;

use commands::{build, cache, devices, load, DEFAULT_BACKEND};

/// precl - compute kernel precompiler
#[derive(Parser)]
#[command(name = "precl")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a kernel source file and save its device binary
    Build {
        /// Kernel source file (default: from config or PRECL_SOURCE)
        source: Option<PathBuf>,

        /// Binary output path (default: per-device entry in the cache directory)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Reuse policy: prefer-cached or always
        #[arg(short, long)]
        policy: Option<CachePolicy>,

        /// Compute backend (opencl, cpu)
        #[arg(short, long, default_value = DEFAULT_BACKEND)]
        backend: String,

        /// Options passed to the kernel compiler
        #[arg(long, allow_hyphen_values = true)]
        build_options: Option<String>,

        /// Binary cache directory
        #[arg(long)]
        cache_dir: Option<PathBuf>,

        /// Configuration file (default: ./precl.toml if present)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Print the kernel source before compiling
        #[arg(long)]
        echo_source: bool,
    },

    /// Load a stored binary and build it for the current device
    Load {
        /// Binary file
        binary: PathBuf,

        /// Compute backend (opencl, cpu)
        #[arg(short, long, default_value = DEFAULT_BACKEND)]
        backend: String,

        /// Options passed when finalizing the program
        #[arg(long, default_value = "", allow_hyphen_values = true)]
        build_options: String,
    },

    /// List compute platforms and devices
    Devices {
        /// Compute backend (opencl, cpu)
        #[arg(short, long, default_value = DEFAULT_BACKEND)]
        backend: String,
    },

    /// Inspect or clear the binary cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,

        /// Binary cache directory
        #[arg(long, global = true)]
        cache_dir: Option<PathBuf>,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[derive(Subcommand)]
enum CacheAction {
    /// Show cache statistics
    Stats,
    /// Remove all cached binaries
    Clear,
}

fn setup_logging(verbose: bool, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .without_time()
        .init();
}

fn print_banner() {
    println!(
        "{} {}\n",
        "precl".bright_cyan().bold(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.quiet);

    if !cli.quiet && !matches!(cli.command, Commands::Completions { .. }) {
        print_banner();
    }

    let result = match cli.command {
        Commands::Build {
            source,
            output,
            policy,
            backend,
            build_options,
            cache_dir,
            config,
            echo_source,
        } => build::execute(&build::BuildArgs {
            source,
            output,
            policy,
            backend,
            build_options,
            cache_dir,
            config,
            echo_source,
        }),

        Commands::Load {
            binary,
            backend,
            build_options,
        } => load::execute(&binary, &backend, &build_options),

        Commands::Devices { backend } => devices::execute(&backend),

        Commands::Cache { action, cache_dir } => match action {
            CacheAction::Stats => cache::stats(cache_dir.as_deref()),
            CacheAction::Clear => cache::clear(cache_dir.as_deref()),
        },

        Commands::Completions { shell } => {
            use clap::CommandFactory;
            clap_complete::generate(shell, &mut Cli::command(), "precl", &mut std::io::stdout());
            Ok(())
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {}", "Error:".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_build() {
        let cli = Cli::try_parse_from([
            "precl",
            "build",
            "k.cl",
            "--policy",
            "always",
            "--build-options",
            "-DN=4",
        ])
        .unwrap();

        match cli.command {
            Commands::Build {
                source,
                policy,
                build_options,
                backend,
                ..
            } => {
                assert_eq!(source, Some(PathBuf::from("k.cl")));
                assert_eq!(policy, Some(CachePolicy::Always));
                assert_eq!(build_options.as_deref(), Some("-DN=4"));
                assert_eq!(backend, DEFAULT_BACKEND);
            }
            _ => panic!("expected build"),
        }
    }

    #[test]
    fn test_parse_rejects_unknown_policy() {
        assert!(Cli::try_parse_from(["precl", "build", "--policy", "sometimes"]).is_err());
    }
}
