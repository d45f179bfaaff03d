//! # precl core
//!
//! Compile a compute kernel once, store its device binary, and reload it on
//! later runs instead of recompiling.
//!
//! ## Core Abstractions
//!
//! - [`ComputeBackend`], [`ComputeContext`], [`ComputeProgram`] - the seam
//!   to the external compute API
//! - [`KernelSource`] - whole-file source reader with a NUL-terminated view
//! - [`Pipeline`] - context, queue, compile-or-load, persist
//! - [`BinaryCache`] - per-kernel, per-device binary files with manifests
//!
//! ## Example
//!
//! ```ignore
//! use precl_core::prelude::*;
//!
//! let config = PipelineConfig::for_source("kernels/matmul.cl");
//! let report = Pipeline::new(&backend, config)?.run()?;
//! println!("{} bytes at {}", report.binary_len, report.output.display());
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod backend;
pub mod backend_stub;
pub mod binary;
pub mod cache;
pub mod config;
pub mod device;
pub mod error;
pub mod pipeline;
pub mod source;

pub use backend::{BinaryStatus, BuildStatus, ComputeBackend, ComputeContext, ComputeProgram};
pub use cache::{BinaryCache, BinaryCacheStats, CacheManifest, CACHE_VERSION};
pub use config::{CachePolicy, PipelineConfig};
pub use device::{DeviceId, DeviceInfo, DeviceKind, PlatformInfo};
pub use error::{PreclError, Result};
pub use pipeline::{
    describe_platforms, verify_binary, BinaryOrigin, LoadReport, Pipeline, PipelineFailure,
    PipelineReport, PipelineStage,
};
pub use source::KernelSource;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::backend::{
        BinaryStatus, BuildStatus, ComputeBackend, ComputeContext, ComputeProgram,
    };
    pub use crate::binary::{extract_binaries, save_program_binary, DeviceBinary};
    pub use crate::cache::{BinaryCache, CacheManifest};
    pub use crate::config::{CachePolicy, PipelineConfig};
    pub use crate::device::{DeviceId, DeviceInfo, DeviceKind, PlatformInfo};
    pub use crate::error::{PreclError, Result};
    pub use crate::pipeline::{
        acquire_context, compile_source, create_queue, describe_platforms, load_binary,
        load_binary_bytes, verify_binary, BinaryOrigin, LoadReport, Pipeline, PipelineFailure,
        PipelineReport, PipelineStage,
    };
    pub use crate::source::KernelSource;
}
