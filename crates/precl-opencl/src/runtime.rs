//! OpenCL runtime built on `opencl3`.

use std::ffi::CStr;
use std::ptr;

use opencl3::command_queue::CommandQueue;
use opencl3::context::Context;
use opencl3::device::{Device, CL_DEVICE_TYPE_ALL, CL_DEVICE_TYPE_CPU, CL_DEVICE_TYPE_GPU};
use opencl3::error_codes::{ClError, CL_DEVICE_NOT_FOUND, CL_INVALID_BINARY};
use opencl3::platform::{get_platforms, Platform};
use opencl3::program::Program;
use opencl3::types::{cl_device_id, cl_device_type};
use tracing::debug;

use precl_core::backend::{
    BinaryStatus, BuildStatus, ComputeBackend, ComputeContext, ComputeProgram,
};
use precl_core::device::{DeviceId, DeviceInfo, DeviceKind, PlatformInfo};
use precl_core::error::{PreclError, Result};

fn cl_error(what: &str, e: ClError) -> PreclError {
    PreclError::Query(format!("{}: {}", what, e))
}

fn to_id(device: cl_device_id) -> DeviceId {
    DeviceId(device as usize as u64)
}

fn to_cl(device: DeviceId) -> cl_device_id {
    device.0 as usize as cl_device_id
}

fn kind_of(device_type: cl_device_type) -> DeviceKind {
    if device_type & CL_DEVICE_TYPE_CPU != 0 {
        DeviceKind::Cpu
    } else {
        DeviceKind::Accelerator
    }
}

fn describe(device: cl_device_id) -> Result<DeviceInfo> {
    let handle = Device::new(device);
    Ok(DeviceInfo {
        id: to_id(device),
        kind: kind_of(handle.dev_type().map_err(|e| cl_error("CL_DEVICE_TYPE", e))?),
        name: handle.name().map_err(|e| cl_error("CL_DEVICE_NAME", e))?,
        vendor: handle.vendor().map_err(|e| cl_error("CL_DEVICE_VENDOR", e))?,
        driver_version: handle
            .driver_version()
            .map_err(|e| cl_error("CL_DRIVER_VERSION", e))?,
    })
}

/// OpenCL backend over the installed ICD platforms.
#[derive(Debug, Default)]
pub struct OpenClBackend {
    _private: (),
}

impl OpenClBackend {
    /// Creates the backend. Platforms are enumerated lazily.
    pub fn new() -> Result<Self> {
        Ok(Self { _private: () })
    }

    fn platform(&self, index: usize) -> Result<Platform> {
        let platforms = get_platforms().map_err(|e| cl_error("clGetPlatformIDs", e))?;
        platforms.into_iter().nth(index).ok_or_else(|| {
            PreclError::Acquisition(format!("OpenCL platform {} does not exist", index))
        })
    }
}

impl ComputeBackend for OpenClBackend {
    type Context = OpenClContext;

    fn name(&self) -> &'static str {
        "opencl"
    }

    fn platforms(&self) -> Result<Vec<PlatformInfo>> {
        let platforms = get_platforms().map_err(|e| cl_error("clGetPlatformIDs", e))?;

        platforms
            .iter()
            .enumerate()
            .map(|(index, platform)| {
                let devices = match platform.get_devices(CL_DEVICE_TYPE_ALL) {
                    Ok(ids) => ids.into_iter().map(describe).collect::<Result<Vec<_>>>()?,
                    Err(e) if e.0 == CL_DEVICE_NOT_FOUND => Vec::new(),
                    Err(e) => return Err(cl_error("clGetDeviceIDs", e)),
                };
                Ok(PlatformInfo {
                    index,
                    name: platform.name().map_err(|e| cl_error("CL_PLATFORM_NAME", e))?,
                    vendor: platform
                        .vendor()
                        .map_err(|e| cl_error("CL_PLATFORM_VENDOR", e))?,
                    version: platform
                        .version()
                        .map_err(|e| cl_error("CL_PLATFORM_VERSION", e))?,
                    devices,
                })
            })
            .collect()
    }

    fn create_context(&self, platform: usize, kind: DeviceKind) -> Result<OpenClContext> {
        let device_type = match kind {
            DeviceKind::Accelerator => CL_DEVICE_TYPE_GPU,
            DeviceKind::Cpu => CL_DEVICE_TYPE_CPU,
        };

        let devices = self
            .platform(platform)?
            .get_devices(device_type)
            .map_err(|e| PreclError::Acquisition(format!("no {} devices: {}", kind, e)))?;
        if devices.is_empty() {
            return Err(PreclError::Acquisition(format!("no {} devices", kind)));
        }

        let context = Context::from_devices(&devices, &[], None, ptr::null_mut())
            .map_err(|e| PreclError::Acquisition(format!("clCreateContext: {}", e)))?;

        debug!("Created OpenCL {} context with {} device(s)", kind, devices.len());
        Ok(OpenClContext { context })
    }
}

/// OpenCL context.
pub struct OpenClContext {
    context: Context,
}

impl ComputeContext for OpenClContext {
    type Queue = CommandQueue;
    type Program = OpenClProgram;

    fn devices(&self) -> Result<Vec<DeviceId>> {
        Ok(self.context.devices().iter().map(|d| to_id(*d)).collect())
    }

    fn device_info(&self, device: DeviceId) -> Result<DeviceInfo> {
        describe(to_cl(device))
    }

    fn create_queue(&self, device: DeviceId) -> Result<CommandQueue> {
        if self.context.default_device() != to_cl(device) {
            return Err(PreclError::Acquisition(format!(
                "queues are only created on the first context device, not {}",
                device
            )));
        }

        #[allow(deprecated, unused_unsafe)]
        let queue = unsafe { CommandQueue::create_default(&self.context, 0) }
            .map_err(|e| PreclError::Acquisition(format!("clCreateCommandQueue: {}", e)))?;
        Ok(queue)
    }

    fn program_from_source(&self, source: &CStr) -> Result<OpenClProgram> {
        let text = source.to_str().map_err(|e| PreclError::Compile {
            kernel: "<source>".to_string(),
            log: format!("source is not valid UTF-8: {}", e),
        })?;
        let program = Program::create_from_source(&self.context, text)
            .map_err(|e| cl_error("clCreateProgramWithSource", e))?;
        Ok(OpenClProgram {
            program,
            devices: self.context.devices().to_vec(),
        })
    }

    fn program_from_binary(
        &self,
        device: DeviceId,
        binary: &[u8],
    ) -> Result<(OpenClProgram, BinaryStatus)> {
        // clCreateProgramWithBinary yields no program on failure, so
        // rejections are reported as `Validation` rather than a status.
        let id = to_cl(device);
        if !self.context.devices().contains(&id) {
            return Err(PreclError::Validation(format!(
                "device {} is not part of the context",
                device
            )));
        }

        #[allow(unused_unsafe)]
        let created = unsafe { Program::create_from_binary(&self.context, &[id], &[binary]) };
        match created {
            Ok(program) => Ok((
                OpenClProgram {
                    program,
                    devices: vec![id],
                },
                BinaryStatus::Success,
            )),
            Err(e) if e.0 == CL_INVALID_BINARY => Err(PreclError::Validation(format!(
                "device {} rejected the binary: {}",
                device, e
            ))),
            Err(e) => Err(cl_error("clCreateProgramWithBinary", e)),
        }
    }
}

/// OpenCL program.
pub struct OpenClProgram {
    program: Program,
    devices: Vec<cl_device_id>,
}

impl ComputeProgram for OpenClProgram {
    fn build(&mut self, devices: &[DeviceId], options: &str) -> Result<BuildStatus> {
        let targets: Vec<cl_device_id> = if devices.is_empty() {
            self.devices.clone()
        } else {
            devices.iter().map(|d| to_cl(*d)).collect()
        };

        match self.program.build(&targets, options) {
            Ok(()) => Ok(BuildStatus::Success),
            Err(e) => Ok(BuildStatus::Failure(e.0)),
        }
    }

    fn build_log(&self, device: DeviceId) -> Result<String> {
        self.program
            .get_build_log(to_cl(device))
            .map_err(|e| cl_error("CL_PROGRAM_BUILD_LOG", e))
    }

    fn num_devices(&self) -> Result<u32> {
        self.program
            .get_num_devices()
            .map_err(|e| cl_error("CL_PROGRAM_NUM_DEVICES", e))
    }

    fn devices(&self) -> Result<Vec<DeviceId>> {
        let ids = self
            .program
            .get_devices()
            .map_err(|e| cl_error("CL_PROGRAM_DEVICES", e))?;
        Ok(ids.into_iter().map(|id| DeviceId(id as usize as u64)).collect())
    }

    fn binary_sizes(&self) -> Result<Vec<usize>> {
        self.program
            .get_binary_sizes()
            .map_err(|e| cl_error("CL_PROGRAM_BINARY_SIZES", e))
    }

    fn binaries(&self) -> Result<Vec<Vec<u8>>> {
        self.program
            .get_binaries()
            .map_err(|e| cl_error("CL_PROGRAM_BINARIES", e))
    }
}

/// Check if an OpenCL platform is present.
pub fn is_opencl_available() -> bool {
    get_platforms().map(|p| !p.is_empty()).unwrap_or(false)
}
