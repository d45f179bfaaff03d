//! Software compute backend for precl.
//!
//! Runs entirely in-process and needs no driver. Its compiler checks kernel
//! structure and emits a small device-bound binary image, which makes every
//! pipeline path reproducible without hardware:
//!
//! - accelerator-to-CPU context fallback (the default backend has no GPU)
//! - compile errors with real diagnostics
//! - binaries that only validate on the device they were built for
//! - injected failures for each stage ([`FaultPlan`])
//! - a [`ReleaseJournal`] showing the order handles were released in
//!
//! # Example
//!
//! ```ignore
//! use precl_cpu::CpuBackend;
//!
//! let backend = CpuBackend::builder()
//!     .platform("Sim")
//!     .accelerator("Sim GPU")
//!     .cpu("Sim CPU")
//!     .build();
//! ```

#![warn(missing_docs)]

pub mod compiler;
pub mod image;
mod program;
mod runtime;

pub use program::CpuProgram;
pub use runtime::{
    CpuBackend, CpuBackendBuilder, CpuContext, CpuQueue, DeviceSpec, FaultPlan, ReleaseJournal,
    Released,
};
