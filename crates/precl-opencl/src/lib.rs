//! OpenCL Backend for precl
//!
//! This crate provides the OpenCL implementation of the precl backend
//! traits using `opencl3`.
//!
//! # Requirements
//!
//! - An installed OpenCL ICD loader and at least one platform driver
//! - The `opencl` feature
//!
//! Without the feature the crate still exposes [`OpenClBackend`], whose
//! constructor reports the backend as unavailable.
//!
//! # Example
//!
//! ```ignore
//! use precl_core::prelude::*;
//! use precl_opencl::OpenClBackend;
//!
//! let backend = OpenClBackend::new()?;
//! let config = PipelineConfig::for_source("kernels/matmul.cl");
//! let report = Pipeline::new(&backend, config)?.run()?;
//! ```

#![warn(missing_docs)]

#[cfg(feature = "opencl")]
mod runtime;

#[cfg(feature = "opencl")]
pub use runtime::{is_opencl_available, OpenClBackend, OpenClContext, OpenClProgram};

#[cfg(not(feature = "opencl"))]
mod stub {
    precl_core::unavailable_backend!(OpenClBackend, "OpenCL");
}

#[cfg(not(feature = "opencl"))]
pub use stub::OpenClBackend;

/// Check if OpenCL is available at runtime.
///
/// Always false when the `opencl` feature is disabled.
#[cfg(not(feature = "opencl"))]
pub fn is_opencl_available() -> bool {
    false
}
