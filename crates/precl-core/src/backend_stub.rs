//! Stubs for backends whose Cargo feature is disabled.
//!
//! A disabled backend still exposes its backend type so callers can name it
//! unconditionally; every operation reports `BackendUnavailable`.

use std::ffi::CStr;

use crate::backend::{BinaryStatus, BuildStatus, ComputeContext, ComputeProgram};
use crate::device::{DeviceId, DeviceInfo};
use crate::error::Result;

/// Handle type of a disabled backend. It has no values, so a stub backend
/// can never hand out a context, queue or program.
#[derive(Debug)]
pub enum Unavailable {}

impl ComputeContext for Unavailable {
    type Queue = Unavailable;
    type Program = Unavailable;

    fn devices(&self) -> Result<Vec<DeviceId>> {
        match *self {}
    }

    fn device_info(&self, _device: DeviceId) -> Result<DeviceInfo> {
        match *self {}
    }

    fn create_queue(&self, _device: DeviceId) -> Result<Self::Queue> {
        match *self {}
    }

    fn program_from_source(&self, _source: &CStr) -> Result<Self::Program> {
        match *self {}
    }

    fn program_from_binary(
        &self,
        _device: DeviceId,
        _binary: &[u8],
    ) -> Result<(Self::Program, BinaryStatus)> {
        match *self {}
    }
}

impl ComputeProgram for Unavailable {
    fn build(&mut self, _devices: &[DeviceId], _options: &str) -> Result<BuildStatus> {
        match *self {}
    }

    fn build_log(&self, _device: DeviceId) -> Result<String> {
        match *self {}
    }

    fn num_devices(&self) -> Result<u32> {
        match *self {}
    }

    fn devices(&self) -> Result<Vec<DeviceId>> {
        match *self {}
    }

    fn binary_sizes(&self) -> Result<Vec<usize>> {
        match *self {}
    }

    fn binaries(&self) -> Result<Vec<Vec<u8>>> {
        match *self {}
    }
}

/// Generate a stub backend for a disabled feature.
///
/// # Example
///
/// ```ignore
/// precl_core::unavailable_backend!(OpenClBackend, "OpenCL");
/// ```
#[macro_export]
macro_rules! unavailable_backend {
    ($backend:ident, $name:expr) => {
        /// Stub backend when the backend feature is disabled.
        #[derive(Debug)]
        pub struct $backend {
            _private: (),
        }

        impl $backend {
            /// Creation fails when the backend is not compiled in.
            pub fn new() -> $crate::error::Result<Self> {
                Err($crate::error::PreclError::BackendUnavailable(
                    concat!($name, " feature not enabled").to_string(),
                ))
            }
        }

        impl $crate::backend::ComputeBackend for $backend {
            type Context = $crate::backend_stub::Unavailable;

            fn name(&self) -> &'static str {
                $name
            }

            fn platforms(&self) -> $crate::error::Result<Vec<$crate::device::PlatformInfo>> {
                Err($crate::error::PreclError::BackendUnavailable(
                    $name.to_string(),
                ))
            }

            fn create_context(
                &self,
                _platform: usize,
                _kind: $crate::device::DeviceKind,
            ) -> $crate::error::Result<Self::Context> {
                Err($crate::error::PreclError::BackendUnavailable(
                    $name.to_string(),
                ))
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use crate::backend::ComputeBackend;
    use crate::device::DeviceKind;
    use crate::error::PreclError;

    crate::unavailable_backend!(TestBackend, "Test");

    #[test]
    fn test_stub_backend_reports_unavailable() {
        match TestBackend::new() {
            Err(PreclError::BackendUnavailable(msg)) => {
                assert_eq!(msg, "Test feature not enabled")
            }
            other => panic!("unexpected: {:?}", other),
        }

        let stub = TestBackend { _private: () };
        assert_eq!(stub.name(), "Test");
        assert!(stub.platforms().is_err());
        assert!(stub.create_context(0, DeviceKind::Cpu).is_err());
    }
}
