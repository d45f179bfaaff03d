//! Software backend programs.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use precl_core::backend::{BuildStatus, ComputeProgram};
use precl_core::device::DeviceId;
use precl_core::error::{PreclError, Result};

use crate::compiler;
use crate::image::{device_signature, ProgramImage};
use crate::runtime::{ContextShared, Released};

/// `CL_BUILD_PROGRAM_FAILURE`.
const BUILD_PROGRAM_FAILURE: i32 = -11;

/// `CL_INVALID_PROGRAM_EXECUTABLE`.
const INVALID_PROGRAM_EXECUTABLE: i32 = -45;

enum Origin {
    Source(String),
    Image(ProgramImage),
    /// Created from a rejected binary; can never be built.
    Rejected,
}

struct Built {
    kernels: Vec<String>,
    digest: [u8; 32],
}

/// Program object of the software backend.
pub struct CpuProgram {
    shared: Arc<ContextShared>,
    devices: Vec<DeviceId>,
    origin: Origin,
    built: Option<Built>,
    logs: HashMap<DeviceId, String>,
}

impl CpuProgram {
    pub(crate) fn from_source(shared: Arc<ContextShared>, text: String) -> Self {
        let devices = shared.devices.iter().map(|(id, _)| *id).collect();
        Self {
            shared,
            devices,
            origin: Origin::Source(text),
            built: None,
            logs: HashMap::new(),
        }
    }

    pub(crate) fn from_image(
        shared: Arc<ContextShared>,
        device: DeviceId,
        image: ProgramImage,
    ) -> Self {
        Self {
            shared,
            devices: vec![device],
            origin: Origin::Image(image),
            built: None,
            logs: HashMap::new(),
        }
    }

    pub(crate) fn empty(shared: Arc<ContextShared>, device: DeviceId) -> Self {
        Self {
            shared,
            devices: vec![device],
            origin: Origin::Rejected,
            built: None,
            logs: HashMap::new(),
        }
    }

    /// Kernel entry points of the built program.
    pub fn kernel_names(&self) -> Option<&[String]> {
        self.built.as_ref().map(|b| b.kernels.as_slice())
    }

    /// Returns true once a build has succeeded.
    pub fn is_built(&self) -> bool {
        self.built.is_some()
    }

    fn image_for(&self, built: &Built, device: DeviceId) -> Result<Vec<u8>> {
        let spec = self
            .shared
            .spec(device)
            .ok_or_else(|| PreclError::Query(format!("unknown device {}", device)))?;
        Ok(ProgramImage {
            device_signature: device_signature(spec),
            source_digest: built.digest,
            kernels: built.kernels.clone(),
        }
        .encode())
    }

    fn built(&self) -> Result<&Built> {
        self.built
            .as_ref()
            .ok_or_else(|| PreclError::Query("program has not been built".to_string()))
    }
}

impl Drop for CpuProgram {
    fn drop(&mut self) {
        self.shared.journal.record(Released::Program);
    }
}

impl ComputeProgram for CpuProgram {
    fn build(&mut self, devices: &[DeviceId], options: &str) -> Result<BuildStatus> {
        if let Some(unknown) = devices.iter().find(|d| !self.devices.contains(*d)) {
            return Err(PreclError::Query(format!(
                "device {} is not attached to the program",
                unknown
            )));
        }

        let targets: Vec<DeviceId> = if devices.is_empty() {
            self.devices.clone()
        } else {
            devices.to_vec()
        };

        let result = match &self.origin {
            Origin::Source(text) => compiler::compile(text, options, "<source>").map(|unit| {
                Built {
                    kernels: unit.kernels,
                    digest: unit.digest,
                }
            }),
            Origin::Image(image) => Ok(Built {
                kernels: image.kernels.clone(),
                digest: image.source_digest,
            }),
            Origin::Rejected => {
                for device in &targets {
                    self.logs
                        .insert(*device, "program has no valid executable".to_string());
                }
                return Ok(BuildStatus::Failure(INVALID_PROGRAM_EXECUTABLE));
            }
        };

        match result {
            Ok(built) => {
                debug!(kernels = ?built.kernels, "Software build succeeded");
                for device in &targets {
                    self.logs.insert(*device, String::new());
                }
                self.built = Some(built);
                Ok(BuildStatus::Success)
            }
            Err(log) => {
                let log = log.to_string();
                for device in &targets {
                    self.logs.insert(*device, log.clone());
                }
                self.built = None;
                Ok(BuildStatus::Failure(BUILD_PROGRAM_FAILURE))
            }
        }
    }

    fn build_log(&self, device: DeviceId) -> Result<String> {
        if !self.devices.contains(&device) {
            return Err(PreclError::Query(format!(
                "device {} is not attached to the program",
                device
            )));
        }
        Ok(self.logs.get(&device).cloned().unwrap_or_default())
    }

    fn num_devices(&self) -> Result<u32> {
        Ok(self.devices.len() as u32)
    }

    fn devices(&self) -> Result<Vec<DeviceId>> {
        Ok(self.devices.clone())
    }

    fn binary_sizes(&self) -> Result<Vec<usize>> {
        if self.shared.faults.binary_query {
            return Err(PreclError::Query(
                "binary size query failed (injected)".to_string(),
            ));
        }
        Ok(self.binaries()?.iter().map(Vec::len).collect())
    }

    fn binaries(&self) -> Result<Vec<Vec<u8>>> {
        let built = self.built()?;
        self.devices
            .iter()
            .map(|device| self.image_for(built, *device))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::CpuBackend;
    use precl_core::backend::{BinaryStatus, ComputeBackend, ComputeContext};
    use precl_core::device::DeviceKind;
    use std::ffi::CString;

    const SRC: &str = "__kernel void fill(__global int* out) { out[get_global_id(0)] = 7; }";

    fn two_gpus() -> CpuBackend {
        CpuBackend::builder()
            .accelerator("Sim GPU A")
            .accelerator("Sim GPU B")
            .build()
    }

    #[test]
    fn test_source_program_has_binary_per_device() {
        let backend = two_gpus();
        let context = backend.create_context(0, DeviceKind::Accelerator).unwrap();
        let mut program = context
            .program_from_source(&CString::new(SRC).unwrap())
            .unwrap();

        assert!(program.binaries().is_err());
        assert_eq!(program.build(&[], "").unwrap(), BuildStatus::Success);
        assert_eq!(program.kernel_names().unwrap(), ["fill".to_string()]);

        let binaries = program.binaries().unwrap();
        assert_eq!(binaries.len(), 2);
        assert_ne!(binaries[0], binaries[1]);
        assert_eq!(
            program.binary_sizes().unwrap(),
            vec![binaries[0].len(), binaries[1].len()]
        );
    }

    #[test]
    fn test_failed_build_keeps_log() {
        let backend = two_gpus();
        let context = backend.create_context(0, DeviceKind::Accelerator).unwrap();
        let device = context.devices().unwrap()[0];
        let mut program = context
            .program_from_source(&CString::new("__kernel void k( {").unwrap())
            .unwrap();

        assert_eq!(
            program.build(&[], "").unwrap(),
            BuildStatus::Failure(BUILD_PROGRAM_FAILURE)
        );
        let log = program.build_log(device).unwrap();
        assert!(log.contains("error:"));
        assert!(!program.is_built());
    }

    #[test]
    fn test_binary_reload_on_same_and_other_device() {
        let backend = two_gpus();
        let context = backend.create_context(0, DeviceKind::Accelerator).unwrap();
        let devices = context.devices().unwrap();
        let mut program = context
            .program_from_source(&CString::new(SRC).unwrap())
            .unwrap();
        program.build(&[], "").unwrap();
        let image = program.binaries().unwrap().remove(0);

        let (mut reloaded, status) = context.program_from_binary(devices[0], &image).unwrap();
        assert_eq!(status, BinaryStatus::Success);
        assert_eq!(
            reloaded.build(&[devices[0]], "").unwrap(),
            BuildStatus::Success
        );
        assert_eq!(reloaded.binaries().unwrap(), vec![image.clone()]);

        let (mut rejected, status) = context.program_from_binary(devices[1], &image).unwrap();
        assert_eq!(status, BinaryStatus::InvalidBinary);
        assert!(!rejected.build(&[], "").unwrap().is_success());
    }

    #[test]
    fn test_binary_for_unknown_device() {
        let backend = two_gpus();
        let context = backend.create_context(0, DeviceKind::Accelerator).unwrap();
        let (_, status) = context
            .program_from_binary(DeviceId(99), b"whatever")
            .unwrap();
        assert_eq!(status, BinaryStatus::InvalidDevice);
    }
}
