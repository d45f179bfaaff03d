//! Error types for the precl CLI.

use precl::{PipelineFailure, PreclError};
use thiserror::Error;

/// CLI result type alias.
pub type CliResult<T> = Result<T, CliError>;

/// CLI error type.
#[derive(Error, Debug)]
pub enum CliError {
    /// IO error outside the pipeline.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Library error outside a pipeline run.
    #[error(transparent)]
    Precl(#[from] PreclError),

    /// A pipeline run failed.
    #[error(transparent)]
    Pipeline(#[from] PipelineFailure),

    /// Invalid backend specification.
    #[error("Invalid backend: {0}")]
    InvalidBackend(String),

    /// Feature not available.
    #[error("Feature not available: {0}. Enable with --features {1}")]
    FeatureNotAvailable(String, String),
}
