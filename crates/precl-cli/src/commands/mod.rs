//! CLI command implementations.

pub mod build;
pub mod cache;
pub mod devices;
pub mod load;

use precl::{OpenClBackend, PreclError};

use crate::error::{CliError, CliResult};

/// Backend used when `--backend` is not given.
#[cfg(feature = "opencl")]
pub const DEFAULT_BACKEND: &str = "opencl";

/// Backend used when `--backend` is not given.
#[cfg(not(feature = "opencl"))]
pub const DEFAULT_BACKEND: &str = "cpu";

/// Compute backends selectable on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// Installed OpenCL platforms.
    OpenCl,
    /// In-process software backend.
    Cpu,
}

/// Parse a backend name.
pub fn parse_backend(name: &str) -> CliResult<BackendKind> {
    match name.trim().to_lowercase().as_str() {
        "opencl" | "cl" => Ok(BackendKind::OpenCl),
        "cpu" | "software" => Ok(BackendKind::Cpu),
        other => Err(CliError::InvalidBackend(format!(
            "'{}' (expected 'opencl' or 'cpu')",
            other
        ))),
    }
}

/// Create the OpenCL backend, reporting a missing feature as such.
pub fn opencl_backend() -> CliResult<OpenClBackend> {
    OpenClBackend::new().map_err(|e| match e {
        PreclError::BackendUnavailable(_) => {
            CliError::FeatureNotAvailable("OpenCL backend".to_string(), "opencl".to_string())
        }
        other => CliError::Precl(other),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_backend() {
        assert_eq!(parse_backend("opencl").unwrap(), BackendKind::OpenCl);
        assert_eq!(parse_backend(" CPU ").unwrap(), BackendKind::Cpu);
        assert!(matches!(
            parse_backend("cuda"),
            Err(CliError::InvalidBackend(_))
        ));
    }

    #[test]
    fn test_default_backend_parses() {
        assert!(parse_backend(DEFAULT_BACKEND).is_ok());
    }

    #[cfg(not(feature = "opencl"))]
    #[test]
    fn test_opencl_requires_feature() {
        assert!(matches!(
            opencl_backend(),
            Err(CliError::FeatureNotAvailable(_, _))
        ));
    }
}
