//! Binary extraction from built programs and raw binary file I/O.

use std::fs;
use std::io::Write;
use std::path::Path;

use crate::backend::ComputeProgram;
use crate::device::DeviceId;
use crate::error::{PreclError, Result};

/// Compiled binary for one device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceBinary {
    /// Device the binary was produced for.
    pub device: DeviceId,
    /// Raw binary image.
    pub bytes: Vec<u8>,
}

/// Fetches every per-device binary from a built program.
///
/// Queries the device count, the device ids, the binary sizes and finally
/// all binaries in one batched call. The answers must agree with each
/// other; any disagreement is reported as [`PreclError::Query`].
pub fn extract_binaries<P: ComputeProgram>(program: &P) -> Result<Vec<DeviceBinary>> {
    let count = program.num_devices().map_err(|e| query_failed("number of devices", e))? as usize;

    let devices = program.devices().map_err(|e| query_failed("devices", e))?;
    if devices.len() != count {
        return Err(PreclError::Query(format!(
            "program reports {} devices but listed {}",
            count,
            devices.len()
        )));
    }

    let sizes = program
        .binary_sizes()
        .map_err(|e| query_failed("program binary sizes", e))?;
    if sizes.len() != count {
        return Err(PreclError::Query(format!(
            "expected {} binary sizes, got {}",
            count,
            sizes.len()
        )));
    }

    let binaries = program
        .binaries()
        .map_err(|e| query_failed("program binaries", e))?;
    if binaries.len() != count {
        return Err(PreclError::Query(format!(
            "expected {} binaries, got {}",
            count,
            binaries.len()
        )));
    }

    devices
        .into_iter()
        .zip(sizes)
        .zip(binaries)
        .map(|((device, size), bytes)| {
            if bytes.len() != size {
                return Err(PreclError::Query(format!(
                    "binary for device {} is {} bytes, expected {}",
                    device,
                    bytes.len(),
                    size
                )));
            }
            Ok(DeviceBinary { device, bytes })
        })
        .collect()
}

/// Extracts the binary for `device` and writes it to `path`.
///
/// Only the requested device's binary is written. Returns the bytes that
/// were written.
pub fn save_program_binary<P: ComputeProgram>(
    program: &P,
    device: DeviceId,
    path: &Path,
) -> Result<Vec<u8>> {
    let binary = extract_binaries(program)?
        .into_iter()
        .find(|b| b.device == device)
        .ok_or_else(|| {
            PreclError::Query(format!("device {} is not attached to the program", device))
        })?;

    if binary.bytes.is_empty() {
        return Err(PreclError::Query(format!(
            "device {} produced an empty binary",
            device
        )));
    }

    write_binary(path, &binary.bytes)?;

    tracing::debug!(
        path = %path.display(),
        size = binary.bytes.len(),
        device = %device,
        "Saved program binary"
    );

    Ok(binary.bytes)
}

/// Writes `bytes` to `path` through a temporary file and a rename, so the
/// destination holds either the old content or the complete new binary.
pub fn write_binary(path: &Path, bytes: &[u8]) -> Result<()> {
    let temp_path = temp_path_for(path);

    let result = (|| {
        let mut file = fs::File::create(&temp_path)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        drop(file);
        fs::rename(&temp_path, path)
    })();

    if let Err(e) = result {
        let _ = fs::remove_file(&temp_path);
        return Err(PreclError::io(path, e));
    }

    Ok(())
}

/// Reads a raw binary file.
pub fn read_binary(path: &Path) -> Result<Vec<u8>> {
    let bytes = fs::read(path).map_err(|e| PreclError::io(path, e))?;
    if bytes.is_empty() {
        return Err(PreclError::io(
            path,
            std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "binary file is empty"),
        ));
    }
    Ok(bytes)
}

fn temp_path_for(path: &Path) -> std::path::PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

fn query_failed(what: &str, err: PreclError) -> PreclError {
    match err {
        PreclError::Query(msg) => PreclError::Query(format!("{}: {}", what, msg)),
        other => PreclError::Query(format!("{}: {}", what, other)),
    }
}
