//! Error types for the precompilation pipeline.

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Result type alias using [`PreclError`].
pub type Result<T> = std::result::Result<T, PreclError>;

/// Errors raised by any stage of the pipeline or by a compute backend.
#[derive(Error, Debug)]
pub enum PreclError {
    /// No platform, device, context or queue could be acquired.
    #[error("Acquisition failed: {0}")]
    Acquisition(String),

    /// A source, binary or manifest file could not be read or written.
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        /// File that was being accessed.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The kernel program failed to compile.
    #[error("Compilation of '{kernel}' failed")]
    Compile {
        /// Kernel name (source file stem).
        kernel: String,
        /// Compiler diagnostics, truncated to the build log limit.
        log: String,
    },

    /// A binary image was rejected by the target device.
    #[error("Binary validation failed: {0}")]
    Validation(String),

    /// A program or device introspection call failed.
    #[error("Query failed: {0}")]
    Query(String),

    /// Configuration is missing or malformed.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The requested backend was not compiled in or is not present.
    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),
}

impl PreclError {
    /// Wraps an I/O error with the path it occurred on.
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// Short category name used in log fields.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Acquisition(_) => "acquisition",
            Self::Io { .. } => "io",
            Self::Compile { .. } => "compile",
            Self::Validation(_) => "validation",
            Self::Query(_) => "query",
            Self::Config(_) => "config",
            Self::BackendUnavailable(_) => "backend",
        }
    }

    /// Compiler log attached to a compile failure, if any.
    pub fn build_log(&self) -> Option<&str> {
        match self {
            Self::Compile { log, .. } => Some(log),
            _ => None,
        }
    }
}

impl From<toml::de::Error> for PreclError {
    fn from(e: toml::de::Error) -> Self {
        PreclError::Config(e.to_string())
    }
}

impl From<toml::ser::Error> for PreclError {
    fn from(e: toml::ser::Error) -> Self {
        PreclError::Config(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_mentions_path() {
        let err = PreclError::io(
            "/tmp/missing.cl",
            std::io::Error::new(std::io::ErrorKind::NotFound, "not found"),
        );
        let msg = err.to_string();
        assert!(msg.contains("/tmp/missing.cl"));
        assert!(msg.contains("not found"));
        assert_eq!(err.category(), "io");
    }

    #[test]
    fn test_compile_error_carries_log() {
        let err = PreclError::Compile {
            kernel: "matmul".to_string(),
            log: "matmul.cl:3:1: error: expected ';'".to_string(),
        };
        assert_eq!(err.category(), "compile");
        assert_eq!(err.build_log(), Some("matmul.cl:3:1: error: expected ';'"));
        assert!(err.to_string().contains("matmul"));
        assert!(PreclError::Query("x".into()).build_log().is_none());
    }
}
