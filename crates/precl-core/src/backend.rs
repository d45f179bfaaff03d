//! Backend traits over the external compute API.
//!
//! A backend exposes platforms, builds contexts on them, and hands out
//! queues and programs bound to those contexts. Every handle releases its
//! underlying resource when dropped.

use std::ffi::CStr;

use crate::device::{DeviceId, DeviceInfo, DeviceKind, PlatformInfo};
use crate::error::Result;

/// Outcome of a program build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildStatus {
    /// Build finished without errors.
    Success,
    /// Build failed with the backend's error code.
    Failure(i32),
}

impl BuildStatus {
    /// Returns true for [`BuildStatus::Success`].
    pub fn is_success(self) -> bool {
        matches!(self, BuildStatus::Success)
    }
}

/// Per-device status reported when a program is created from a binary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryStatus {
    /// The image is valid for the device.
    Success,
    /// The image is malformed or was produced for another device.
    InvalidBinary,
    /// The device is not part of the context.
    InvalidDevice,
}

/// Entry point of a compute backend.
pub trait ComputeBackend {
    /// Context type produced by this backend.
    type Context: ComputeContext;

    /// Short backend name for diagnostics.
    fn name(&self) -> &'static str;

    /// Enumerates platforms and their devices.
    fn platforms(&self) -> Result<Vec<PlatformInfo>>;

    /// Creates a context over every device of `kind` on platform `platform`.
    fn create_context(&self, platform: usize, kind: DeviceKind) -> Result<Self::Context>;
}

/// A live compute context.
pub trait ComputeContext {
    /// Execution queue type.
    type Queue;
    /// Program type.
    type Program: ComputeProgram;

    /// Devices attached to the context, in enumeration order.
    fn devices(&self) -> Result<Vec<DeviceId>>;

    /// Describes one device of the context.
    fn device_info(&self, device: DeviceId) -> Result<DeviceInfo>;

    /// Creates an in-order queue on `device`.
    fn create_queue(&self, device: DeviceId) -> Result<Self::Queue>;

    /// Creates an unbuilt program from a single NUL-terminated source unit.
    fn program_from_source(&self, source: &CStr) -> Result<Self::Program>;

    /// Creates an unbuilt program from a binary image for one device.
    ///
    /// The returned status must be checked before the program is built.
    /// A backend that cannot create any program object for a rejected
    /// image or an unknown device returns [`PreclError::Validation`]
    /// instead of a status; callers treat both forms as a rejection.
    ///
    /// [`PreclError::Validation`]: crate::error::PreclError::Validation
    fn program_from_binary(
        &self,
        device: DeviceId,
        binary: &[u8],
    ) -> Result<(Self::Program, BinaryStatus)>;
}

/// A program object, built or not.
pub trait ComputeProgram {
    /// Builds (or, for binaries, finalizes) the program for `devices`.
    ///
    /// An empty slice means every device attached to the program.
    fn build(&mut self, devices: &[DeviceId], options: &str) -> Result<BuildStatus>;

    /// Compiler output for `device` from the last build.
    fn build_log(&self, device: DeviceId) -> Result<String>;

    /// Number of devices attached to the program.
    fn num_devices(&self) -> Result<u32>;

    /// Devices attached to the program.
    fn devices(&self) -> Result<Vec<DeviceId>>;

    /// Binary size for each attached device, in device order.
    fn binary_sizes(&self) -> Result<Vec<usize>>;

    /// Binaries for every attached device, in device order.
    fn binaries(&self) -> Result<Vec<Vec<u8>>>;
}
