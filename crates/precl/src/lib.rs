//! # precl
//!
//! Precompile compute kernels into device binaries.
//!
//! A run acquires a context on the first platform (accelerator first, CPU as
//! fallback), creates a queue on the first device, then either reloads a
//! current stored binary or compiles the kernel source and writes the
//! device binary to disk.
//!
//! ## Quick Start
//!
//! ```ignore
//! use precl::prelude::*;
//!
//! fn main() -> Result<()> {
//!     let backend = CpuBackend::new();
//!     let mut config = PipelineConfig::for_source("kernels/saxpy.cl");
//!     config.output = Some("saxpy.bin".into());
//!
//!     let report = Pipeline::new(&backend, config)?.run().map_err(|f| f.error)?;
//!     println!("{} ({} bytes)", report.output.display(), report.binary_len);
//!     Ok(())
//! }
//! ```
//!
//! ## Backends
//!
//! - **CPU** - deterministic software backend (always available)
//! - **OpenCL** - installed ICD platforms (requires `opencl` feature)
//!
//! ```toml
//! [dependencies]
//! precl = { version = "0.1", features = ["opencl"] }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(hidden_glob_reexports)]

// Re-export core types
pub use precl_core::*;

// Software backend (always available)
pub use precl_cpu::CpuBackend;

// OpenCL backend; a stub reporting `BackendUnavailable` without the feature
pub use precl_opencl::{is_opencl_available, OpenClBackend};

/// Prelude module for convenient imports.
pub mod prelude {
    pub use precl_core::prelude::*;
    pub use precl_cpu::CpuBackend;
    pub use precl_opencl::OpenClBackend;
}
