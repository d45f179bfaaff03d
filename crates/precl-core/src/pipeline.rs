//! The precompilation pipeline.
//!
//! A run walks through the stages
//!
//! ```text
//! Start -> ContextReady -> QueueReady -> SourceCompiled -> BinarySaved -> Done
//!                                     \-> BinaryLoaded ------------------/
//! ```
//!
//! and stops at the first failure. Whatever handles were acquired are
//! released exactly once, program first and context last, on every path.

use std::fmt;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::backend::{BinaryStatus, ComputeBackend, ComputeContext, ComputeProgram};
use crate::binary::{read_binary, save_program_binary};
use crate::cache::{BinaryCache, CacheManifest};
use crate::config::{CachePolicy, PipelineConfig};
use crate::device::{DeviceId, DeviceInfo, DeviceKind, PlatformInfo};
use crate::error::{PreclError, Result};
use crate::source::KernelSource;

/// Maximum number of bytes of compiler output kept from a failed build.
pub const BUILD_LOG_LIMIT: usize = 16 * 1024;

/// Pipeline progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    /// Nothing acquired yet.
    Start,
    /// A compute context exists.
    ContextReady,
    /// A queue exists on the selected device.
    QueueReady,
    /// The program was compiled from source.
    SourceCompiled,
    /// The program was reconstructed from a stored binary.
    BinaryLoaded,
    /// The binary was written to disk.
    BinarySaved,
    /// The run completed.
    Done,
    /// The run stopped on an error.
    Failed,
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelineStage::Start => "start",
            PipelineStage::ContextReady => "context-ready",
            PipelineStage::QueueReady => "queue-ready",
            PipelineStage::SourceCompiled => "source-compiled",
            PipelineStage::BinaryLoaded => "binary-loaded",
            PipelineStage::BinarySaved => "binary-saved",
            PipelineStage::Done => "done",
            PipelineStage::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Where the program of a successful run came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOrigin {
    /// Compiled from source and written to disk.
    Compiled,
    /// Loaded from a current stored binary; nothing was written.
    Cached,
}

/// Summary of a successful run.
#[derive(Debug, Clone)]
pub struct PipelineReport {
    /// Kernel name.
    pub kernel: String,
    /// Device the program was built for.
    pub device: DeviceInfo,
    /// Device class of the context that was created.
    pub context_kind: DeviceKind,
    /// Binary file.
    pub output: PathBuf,
    /// Whether the binary was compiled or reused.
    pub origin: BinaryOrigin,
    /// Binary size in bytes.
    pub binary_len: usize,
    /// Last stage reached; always [`PipelineStage::Done`].
    pub stage: PipelineStage,
}

/// Summary of a successful binary load.
#[derive(Debug, Clone)]
pub struct LoadReport {
    /// Device the binary was validated against.
    pub device: DeviceInfo,
    /// Binary file.
    pub path: PathBuf,
    /// Binary size in bytes.
    pub binary_len: usize,
}

/// A failed run together with the last stage it reached.
#[derive(Debug, Error)]
#[error("pipeline failed after stage '{stage}': {error}")]
pub struct PipelineFailure {
    /// Last stage completed before the failure.
    pub stage: PipelineStage,
    /// The error that stopped the run.
    #[source]
    pub error: PreclError,
}

/// A context acquired on the first platform.
pub struct AcquiredContext<C> {
    /// The context.
    pub context: C,
    /// Platform index.
    pub platform: usize,
    /// Device class the context was created for.
    pub kind: DeviceKind,
}

/// Creates a context on the first platform, preferring accelerators and
/// falling back to the CPU.
pub fn acquire_context<B: ComputeBackend>(backend: &B) -> Result<AcquiredContext<B::Context>> {
    let platforms = backend.platforms().map_err(|e| match e {
        PreclError::BackendUnavailable(_) => e,
        other => PreclError::Acquisition(format!("failed to enumerate platforms: {}", other)),
    })?;

    let platform = platforms
        .first()
        .ok_or_else(|| PreclError::Acquisition("no compute platforms found".to_string()))?;

    debug!(platform = %platform.name, vendor = %platform.vendor, "Selected platform");

    let mut last_error = None;
    for kind in DeviceKind::PREFERENCE {
        match backend.create_context(platform.index, kind) {
            Ok(context) => {
                debug!(kind = %kind, "Created context");
                return Ok(AcquiredContext {
                    context,
                    platform: platform.index,
                    kind,
                });
            }
            Err(e) => {
                if kind == DeviceKind::Accelerator {
                    warn!("Could not create GPU context, trying CPU: {}", e);
                }
                last_error = Some(e);
            }
        }
    }

    Err(PreclError::Acquisition(format!(
        "failed to create a GPU or CPU context{}",
        last_error.map(|e| format!(": {}", e)).unwrap_or_default()
    )))
}

/// Creates a queue on the first device of `context`.
///
/// Returns the queue and a description of the device it is bound to.
pub fn create_queue<C: ComputeContext>(context: &C) -> Result<(C::Queue, DeviceInfo)> {
    let devices = context
        .devices()
        .map_err(|e| PreclError::Acquisition(format!("failed to list context devices: {}", e)))?;

    let device = *devices
        .first()
        .ok_or_else(|| PreclError::Acquisition("no devices available".to_string()))?;

    let queue = context.create_queue(device).map_err(|e| {
        PreclError::Acquisition(format!("failed to create queue for device {}: {}", device, e))
    })?;

    let info = context.device_info(device)?;
    debug!(device = %info, "Created queue");

    Ok((queue, info))
}

/// Compiles `source` as a single unit and builds it for every context device.
///
/// On a failed build the compiler log (at most [`BUILD_LOG_LIMIT`] bytes)
/// is logged and returned inside [`PreclError::Compile`].
pub fn compile_source<C: ComputeContext>(
    context: &C,
    device: DeviceId,
    source: &KernelSource,
    build_options: &str,
) -> Result<C::Program> {
    let kernel = source.kernel_name();
    let text = source.to_c_string()?;

    let mut program = context
        .program_from_source(&text)
        .map_err(|e| PreclError::Compile {
            kernel: kernel.clone(),
            log: format!("failed to create program from source: {}", e),
        })?;

    let status = program.build(&[], build_options)?;
    if !status.is_success() {
        let log = program
            .build_log(device)
            .unwrap_or_else(|e| format!("<build log unavailable: {}>", e));
        let log = truncate_log(log);
        error!(kernel = %kernel, status = ?status, "Error in kernel:\n{}", log);
        return Err(PreclError::Compile { kernel, log });
    }

    debug!(kernel = %kernel, "Built program from source");
    Ok(program)
}

/// Reads a binary file and reconstructs a program from it for `device`.
pub fn load_binary<C: ComputeContext>(
    context: &C,
    device: DeviceId,
    path: &Path,
    build_options: &str,
) -> Result<C::Program> {
    let bytes = read_binary(path)?;
    load_binary_bytes(context, device, &bytes, build_options)
}

/// Reconstructs a program from an in-memory binary image.
///
/// The per-device load status must be [`BinaryStatus::Success`]; the
/// program is then still built to finalize it.
pub fn load_binary_bytes<C: ComputeContext>(
    context: &C,
    device: DeviceId,
    bytes: &[u8],
    build_options: &str,
) -> Result<C::Program> {
    let (mut program, status) = context.program_from_binary(device, bytes)?;

    if status != BinaryStatus::Success {
        return Err(PreclError::Validation(format!(
            "device {} rejected the binary ({:?})",
            device, status
        )));
    }

    let build = program.build(&[device], build_options)?;
    if !build.is_success() {
        let log = program.build_log(device).unwrap_or_default();
        return Err(PreclError::Validation(format!(
            "binary failed to build on device {}: {}",
            device,
            truncate_log(log)
        )));
    }

    debug!(device = %device, size = bytes.len(), "Built program from binary");
    Ok(program)
}

/// Acquires a context and queue, then loads and builds the binary at `path`
/// for the queue's device. Nothing is compiled or written.
pub fn verify_binary<B: ComputeBackend>(
    backend: &B,
    path: &Path,
    build_options: &str,
) -> std::result::Result<LoadReport, PipelineFailure> {
    let mut stage = PipelineStage::Start;
    let mut session = Session::new();

    let result = (|| -> Result<LoadReport> {
        let acquired = acquire_context(backend)?;
        let context = session.context.insert(acquired.context);
        stage = PipelineStage::ContextReady;

        let (queue, device) = create_queue(&*context)?;
        session.queue = Some(queue);
        stage = PipelineStage::QueueReady;

        let bytes = read_binary(path)?;
        let program = load_binary_bytes(&*context, device.id, &bytes, build_options)?;
        session.program = Some(program);
        stage = PipelineStage::BinaryLoaded;

        info!(path = %path.display(), device = %device, "Binary is valid");
        stage = PipelineStage::Done;

        Ok(LoadReport {
            device,
            path: path.to_path_buf(),
            binary_len: bytes.len(),
        })
    })();
    drop(session);

    result.map_err(|error| {
        error!(stage = %stage, category = error.category(), "{}", error);
        PipelineFailure { stage, error }
    })
}

/// Lists every platform of `backend` with its devices.
pub fn describe_platforms<B: ComputeBackend>(backend: &B) -> Result<Vec<PlatformInfo>> {
    backend.platforms()
}

fn truncate_log(mut log: String) -> String {
    if log.len() > BUILD_LOG_LIMIT {
        let mut end = BUILD_LOG_LIMIT;
        while !log.is_char_boundary(end) {
            end -= 1;
        }
        log.truncate(end);
    }
    log
}

/// Handles acquired during a run.
///
/// Dropping the session releases program, queue and context in that order.
struct Session<C: ComputeContext> {
    program: Option<C::Program>,
    queue: Option<C::Queue>,
    context: Option<C>,
}

impl<C: ComputeContext> Session<C> {
    fn new() -> Self {
        Self {
            program: None,
            queue: None,
            context: None,
        }
    }
}

impl<C: ComputeContext> Drop for Session<C> {
    fn drop(&mut self) {
        if self.program.take().is_some() {
            debug!("Released program");
        }
        if self.queue.take().is_some() {
            debug!("Released queue");
        }
        if self.context.take().is_some() {
            debug!("Released context");
        }
    }
}

/// One configured precompilation run against a backend.
pub struct Pipeline<'b, B: ComputeBackend> {
    backend: &'b B,
    config: PipelineConfig,
    cache: BinaryCache,
}

impl<'b, B: ComputeBackend> Pipeline<'b, B> {
    /// Creates a pipeline, validating `config`.
    ///
    /// The binary cache directory is only created when no explicit output
    /// path is configured.
    pub fn new(backend: &'b B, config: PipelineConfig) -> Result<Self> {
        config.validate()?;

        let cache = match (&config.cache_dir, &config.output) {
            (Some(dir), _) => BinaryCache::with_dir(dir.clone())?,
            (None, Some(_)) => BinaryCache::disabled(),
            (None, None) => BinaryCache::new()?,
        };

        Ok(Self {
            backend,
            config,
            cache,
        })
    }

    /// Replaces the binary cache.
    pub fn with_cache(mut self, cache: BinaryCache) -> Self {
        self.cache = cache;
        self
    }

    /// Configuration in use.
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Runs all stages.
    pub fn run(&self) -> std::result::Result<PipelineReport, PipelineFailure> {
        let mut stage = PipelineStage::Start;
        let mut session = Session::new();

        let result = self.run_stages(&mut session, &mut stage);
        drop(session);

        result.map_err(|error| {
            error!(stage = %stage, category = error.category(), "{}", error);
            PipelineFailure { stage, error }
        })
    }

    /// Loads and validates a stored binary without compiling anything.
    pub fn verify(&self, path: &Path) -> std::result::Result<LoadReport, PipelineFailure> {
        verify_binary(self.backend, path, &self.config.build_options)
    }

    fn run_stages(
        &self,
        session: &mut Session<B::Context>,
        stage: &mut PipelineStage,
    ) -> Result<PipelineReport> {
        let acquired = acquire_context(self.backend)?;
        let context_kind = acquired.kind;
        let context = session.context.insert(acquired.context);
        *stage = PipelineStage::ContextReady;
        info!(backend = self.backend.name(), kind = %context_kind, "Context ready");

        let (queue, device) = create_queue(&*context)?;
        session.queue = Some(queue);
        *stage = PipelineStage::QueueReady;
        info!(device = %device, "Queue ready");

        let source = KernelSource::read(&self.config.source)?;
        if self.config.echo_source {
            info!("Kernel source:\n{}", source.text());
        }

        let kernel = source.kernel_name();
        let output = self.output_path(&kernel, &device)?;
        let source_sha256 = source.sha256();
        let expected = CacheManifest::new(
            &kernel,
            &source_sha256,
            &device,
            &self.config.build_options,
            &[],
        );

        if self.config.policy == CachePolicy::PreferCached {
            match self.load_cached(&*context, &device, &output, &expected) {
                Ok(Some((program, binary_len))) => {
                    session.program = Some(program);
                    *stage = PipelineStage::BinaryLoaded;
                    info!(path = %output.display(), "Reusing cached binary");
                    *stage = PipelineStage::Done;
                    return Ok(PipelineReport {
                        kernel,
                        device,
                        context_kind,
                        output,
                        origin: BinaryOrigin::Cached,
                        binary_len,
                        stage: *stage,
                    });
                }
                Ok(None) => {}
                Err(e) => warn!("Cached binary unusable, recompiling: {}", e),
            }
        }

        info!(source = %self.config.source.display(), "Creating kernel binary from source");
        let program = compile_source(&*context, device.id, &source, &self.config.build_options)?;
        let program = session.program.insert(program);
        *stage = PipelineStage::SourceCompiled;

        let bytes = save_program_binary(&*program, device.id, &output)?;
        let manifest = CacheManifest::new(
            &kernel,
            &source_sha256,
            &device,
            &self.config.build_options,
            &bytes,
        );
        if let Err(e) = BinaryCache::record(&output, &manifest) {
            warn!("Failed to record cache manifest: {}", e);
            BinaryCache::forget(&output);
        }
        *stage = PipelineStage::BinarySaved;
        info!(path = %output.display(), size = bytes.len(), "Kernel binary saved");

        *stage = PipelineStage::Done;
        Ok(PipelineReport {
            kernel,
            device,
            context_kind,
            output,
            origin: BinaryOrigin::Compiled,
            binary_len: bytes.len(),
            stage: *stage,
        })
    }

    fn output_path(&self, kernel: &str, device: &DeviceInfo) -> Result<PathBuf> {
        match &self.config.output {
            Some(path) => Ok(path.clone()),
            None => self.cache.entry_path(kernel, device),
        }
    }

    fn load_cached(
        &self,
        context: &B::Context,
        device: &DeviceInfo,
        output: &Path,
        expected: &CacheManifest,
    ) -> Result<Option<(<B::Context as ComputeContext>::Program, usize)>> {
        let bytes = match BinaryCache::lookup(output, expected)? {
            Some(bytes) => bytes,
            None => return Ok(None),
        };
        let program = load_binary_bytes(context, device.id, &bytes, &self.config.build_options)?;
        Ok(Some((program, bytes.len())))
    }
}
