//! Software backend runtime.

use std::ffi::CStr;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info};

use precl_core::backend::{BinaryStatus, ComputeBackend, ComputeContext};
use precl_core::device::{DeviceId, DeviceInfo, DeviceKind, PlatformInfo};
use precl_core::error::{PreclError, Result};

use crate::image::ProgramImage;
use crate::program::CpuProgram;

/// Handle kinds recorded by the [`ReleaseJournal`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Released {
    /// A program was released.
    Program,
    /// A queue was released.
    Queue,
    /// A context was released.
    Context,
}

/// Shared record of handle releases, in order.
#[derive(Debug, Clone, Default)]
pub struct ReleaseJournal {
    events: Arc<Mutex<Vec<Released>>>,
}

impl ReleaseJournal {
    pub(crate) fn record(&self, event: Released) {
        self.events.lock().push(event);
    }

    /// Releases recorded so far.
    pub fn events(&self) -> Vec<Released> {
        self.events.lock().clone()
    }

    /// Forgets recorded releases.
    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

/// Failures to inject into the software backend.
#[derive(Debug, Clone, Default)]
pub struct FaultPlan {
    /// Platform enumeration reports no platforms.
    pub no_platforms: bool,
    /// Accelerator context creation fails.
    pub accelerator_context: bool,
    /// CPU context creation fails.
    pub cpu_context: bool,
    /// Queue creation fails.
    pub queue: bool,
    /// Program binary-size queries fail.
    pub binary_query: bool,
}

/// Static description of a simulated device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceSpec {
    /// Device class.
    pub kind: DeviceKind,
    /// Device name.
    pub name: String,
    /// Vendor string.
    pub vendor: String,
    /// Driver version string.
    pub driver_version: String,
}

impl DeviceSpec {
    /// Creates a device with the default vendor and driver version.
    pub fn new(kind: DeviceKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            vendor: "precl".to_string(),
            driver_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    /// Overrides the driver version.
    pub fn with_driver_version(mut self, version: impl Into<String>) -> Self {
        self.driver_version = version.into();
        self
    }
}

#[derive(Debug, Clone)]
struct PlatformSpec {
    name: String,
    devices: Vec<DeviceSpec>,
}

/// Deterministic in-process compute backend.
///
/// The default instance has one platform with a single CPU device, so
/// context creation always goes through the accelerator-to-CPU fallback.
#[derive(Debug)]
pub struct CpuBackend {
    platforms: Vec<PlatformSpec>,
    faults: FaultPlan,
    journal: ReleaseJournal,
}

impl Default for CpuBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl CpuBackend {
    /// Creates the default backend.
    pub fn new() -> Self {
        Self::builder().cpu("precl software device").build()
    }

    /// Starts building a backend with custom platforms and devices.
    pub fn builder() -> CpuBackendBuilder {
        CpuBackendBuilder::default()
    }

    /// Release journal shared with every handle of this backend.
    pub fn journal(&self) -> &ReleaseJournal {
        &self.journal
    }

    fn device_id(platform: usize, index: usize) -> DeviceId {
        DeviceId(((platform as u64 + 1) << 32) | (index as u64 + 1))
    }
}

/// Builder for [`CpuBackend`].
#[derive(Debug, Default)]
pub struct CpuBackendBuilder {
    platforms: Vec<PlatformSpec>,
    faults: FaultPlan,
}

impl CpuBackendBuilder {
    /// Starts a new platform; following devices are added to it.
    pub fn platform(mut self, name: impl Into<String>) -> Self {
        self.platforms.push(PlatformSpec {
            name: name.into(),
            devices: Vec::new(),
        });
        self
    }

    /// Adds a device to the current platform.
    pub fn device(mut self, spec: DeviceSpec) -> Self {
        if self.platforms.is_empty() {
            self = self.platform("precl software platform");
        }
        if let Some(platform) = self.platforms.last_mut() {
            platform.devices.push(spec);
        }
        self
    }

    /// Adds an accelerator device to the current platform.
    pub fn accelerator(self, name: impl Into<String>) -> Self {
        self.device(DeviceSpec::new(DeviceKind::Accelerator, name))
    }

    /// Adds a CPU device to the current platform.
    pub fn cpu(self, name: impl Into<String>) -> Self {
        self.device(DeviceSpec::new(DeviceKind::Cpu, name))
    }

    /// Sets the failures to inject.
    pub fn faults(mut self, faults: FaultPlan) -> Self {
        self.faults = faults;
        self
    }

    /// Finishes the backend.
    pub fn build(self) -> CpuBackend {
        let devices: usize = self.platforms.iter().map(|p| p.devices.len()).sum();
        info!(
            "Initializing software backend ({} platforms, {} devices)",
            self.platforms.len(),
            devices
        );

        CpuBackend {
            platforms: self.platforms,
            faults: self.faults,
            journal: ReleaseJournal::default(),
        }
    }
}

impl ComputeBackend for CpuBackend {
    type Context = CpuContext;

    fn name(&self) -> &'static str {
        "cpu"
    }

    fn platforms(&self) -> Result<Vec<PlatformInfo>> {
        if self.faults.no_platforms {
            return Ok(Vec::new());
        }

        Ok(self
            .platforms
            .iter()
            .enumerate()
            .map(|(index, platform)| PlatformInfo {
                index,
                name: platform.name.clone(),
                vendor: "precl".to_string(),
                version: format!("precl software {}", env!("CARGO_PKG_VERSION")),
                devices: platform
                    .devices
                    .iter()
                    .enumerate()
                    .map(|(i, spec)| describe(Self::device_id(index, i), spec))
                    .collect(),
            })
            .collect())
    }

    fn create_context(&self, platform: usize, kind: DeviceKind) -> Result<CpuContext> {
        let fail = match kind {
            DeviceKind::Accelerator => self.faults.accelerator_context,
            DeviceKind::Cpu => self.faults.cpu_context,
        };
        if fail {
            return Err(PreclError::Acquisition(format!(
                "{} context creation failed (injected)",
                kind
            )));
        }

        let spec = self.platforms.get(platform).ok_or_else(|| {
            PreclError::Acquisition(format!("platform {} does not exist", platform))
        })?;

        let devices: Vec<(DeviceId, DeviceSpec)> = spec
            .devices
            .iter()
            .enumerate()
            .filter(|(_, d)| d.kind == kind)
            .map(|(i, d)| (Self::device_id(platform, i), d.clone()))
            .collect();

        if devices.is_empty() {
            return Err(PreclError::Acquisition(format!(
                "no {} devices on platform '{}'",
                kind, spec.name
            )));
        }

        debug!(
            "Created software context on '{}' with {} {} device(s)",
            spec.name,
            devices.len(),
            kind
        );

        Ok(CpuContext {
            shared: Arc::new(ContextShared {
                devices,
                faults: self.faults.clone(),
                journal: self.journal.clone(),
            }),
        })
    }
}

pub(crate) struct ContextShared {
    pub(crate) devices: Vec<(DeviceId, DeviceSpec)>,
    pub(crate) faults: FaultPlan,
    pub(crate) journal: ReleaseJournal,
}

impl ContextShared {
    pub(crate) fn spec(&self, device: DeviceId) -> Option<&DeviceSpec> {
        self.devices
            .iter()
            .find(|(id, _)| *id == device)
            .map(|(_, spec)| spec)
    }
}

/// Context of the software backend.
pub struct CpuContext {
    shared: Arc<ContextShared>,
}

impl Drop for CpuContext {
    fn drop(&mut self) {
        self.shared.journal.record(Released::Context);
    }
}

/// Queue of the software backend. Work is never submitted to it.
#[derive(Debug)]
pub struct CpuQueue {
    device: DeviceId,
    journal: ReleaseJournal,
}

impl CpuQueue {
    /// Device the queue is bound to.
    pub fn device(&self) -> DeviceId {
        self.device
    }
}

impl Drop for CpuQueue {
    fn drop(&mut self) {
        self.journal.record(Released::Queue);
    }
}

impl ComputeContext for CpuContext {
    type Queue = CpuQueue;
    type Program = CpuProgram;

    fn devices(&self) -> Result<Vec<DeviceId>> {
        Ok(self.shared.devices.iter().map(|(id, _)| *id).collect())
    }

    fn device_info(&self, device: DeviceId) -> Result<DeviceInfo> {
        self.shared
            .spec(device)
            .map(|spec| describe(device, spec))
            .ok_or_else(|| PreclError::Query(format!("unknown device {}", device)))
    }

    fn create_queue(&self, device: DeviceId) -> Result<CpuQueue> {
        if self.shared.faults.queue {
            return Err(PreclError::Acquisition(
                "queue creation failed (injected)".to_string(),
            ));
        }
        if self.shared.spec(device).is_none() {
            return Err(PreclError::Acquisition(format!(
                "device {} is not part of the context",
                device
            )));
        }

        Ok(CpuQueue {
            device,
            journal: self.shared.journal.clone(),
        })
    }

    fn program_from_source(&self, source: &CStr) -> Result<CpuProgram> {
        let text = source.to_str().map_err(|e| PreclError::Compile {
            kernel: "<source>".to_string(),
            log: format!("source is not valid UTF-8: {}", e),
        })?;
        Ok(CpuProgram::from_source(
            Arc::clone(&self.shared),
            text.to_string(),
        ))
    }

    fn program_from_binary(
        &self,
        device: DeviceId,
        binary: &[u8],
    ) -> Result<(CpuProgram, BinaryStatus)> {
        let spec = match self.shared.spec(device) {
            Some(spec) => spec,
            None => {
                let program = CpuProgram::empty(Arc::clone(&self.shared), device);
                return Ok((program, BinaryStatus::InvalidDevice));
            }
        };

        let status = match ProgramImage::decode(binary) {
            Ok(image) if image.device_signature == crate::image::device_signature(spec) => {
                let program = CpuProgram::from_image(Arc::clone(&self.shared), device, image);
                return Ok((program, BinaryStatus::Success));
            }
            Ok(_) => {
                debug!(device = %device, "Binary was produced for another device");
                BinaryStatus::InvalidBinary
            }
            Err(e) => {
                debug!(device = %device, "Binary image rejected: {}", e);
                BinaryStatus::InvalidBinary
            }
        };

        Ok((CpuProgram::empty(Arc::clone(&self.shared), device), status))
    }
}

fn describe(id: DeviceId, spec: &DeviceSpec) -> DeviceInfo {
    DeviceInfo {
        id,
        kind: spec.kind,
        name: spec.name.clone(),
        vendor: spec.vendor.clone(),
        driver_version: spec.driver_version.clone(),
    }
}
