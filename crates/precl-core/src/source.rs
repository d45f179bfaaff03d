//! Kernel source loading.
//!
//! The whole file is read in one go and kept as text. Backends receive it
//! as a NUL-terminated C string, so the length handed to the compiler is
//! always the true content length.

use std::ffi::CString;
use std::fs;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::error::{PreclError, Result};

/// Kernel source text together with where it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelSource {
    path: PathBuf,
    text: String,
}

impl KernelSource {
    /// Reads an entire source file.
    ///
    /// Fails with [`PreclError::Io`] if the file cannot be read or is not
    /// valid UTF-8.
    pub fn read(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes = fs::read(path).map_err(|e| PreclError::io(path, e))?;
        let text = String::from_utf8(bytes).map_err(|e| {
            PreclError::io(
                path,
                std::io::Error::new(std::io::ErrorKind::InvalidData, e.utf8_error()),
            )
        })?;

        tracing::debug!(path = %path.display(), size = text.len(), "Read kernel source");

        Ok(Self {
            path: path.to_path_buf(),
            text,
        })
    }

    /// Wraps in-memory source text. `path` is only used for naming.
    pub fn from_text(path: impl Into<PathBuf>, text: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            text: text.into(),
        }
    }

    /// Source file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Source text.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Length in bytes, without terminator.
    pub fn len(&self) -> usize {
        self.text.len()
    }

    /// Returns true if the file was empty.
    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    /// Kernel name: the file name up to its first dot.
    ///
    /// `MatrixMultiplication_Kernels.cl` becomes `MatrixMultiplication_Kernels`.
    pub fn kernel_name(&self) -> String {
        self.path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(|n| n.split('.').find(|part| !part.is_empty()))
            .unwrap_or("kernel")
            .to_string()
    }

    /// The text as a NUL-terminated string for the compiler.
    ///
    /// An embedded NUL would silently cut the program short, so it is
    /// rejected instead.
    pub fn to_c_string(&self) -> Result<CString> {
        CString::new(self.text.as_bytes()).map_err(|e| {
            PreclError::io(
                &self.path,
                std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    format!("embedded NUL byte at offset {}", e.nul_position()),
                ),
            )
        })
    }

    /// SHA-256 of the source text as lowercase hex.
    pub fn sha256(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.text.as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    const KERNEL: &str = "__kernel void add(__global float* a) { a[0] += 1.0f; }\n";

    #[test]
    fn test_read_whole_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("add.cl");
        fs::write(&path, KERNEL).unwrap();

        let source = KernelSource::read(&path).unwrap();
        assert_eq!(source.text(), KERNEL);
        assert_eq!(source.len(), KERNEL.len());
        assert_eq!(source.path(), path.as_path());
    }

    #[test]
    fn test_c_string_is_terminated_at_true_length() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("crlf.cl");
        let mut file = fs::File::create(&path).unwrap();
        file.write_all(b"__kernel void k() {}\r\n\r\n").unwrap();
        drop(file);

        let source = KernelSource::read(&path).unwrap();
        let c = source.to_c_string().unwrap();
        let bytes = c.as_bytes_with_nul();
        assert_eq!(bytes.len(), source.len() + 1);
        assert_eq!(bytes[bytes.len() - 1], 0);
    }

    #[test]
    fn test_embedded_nul_rejected() {
        let source = KernelSource::from_text("bad.cl", "__kernel void k() {}\0garbage");
        let err = source.to_c_string().unwrap_err();
        assert!(err.to_string().contains("embedded NUL"));
    }

    #[test]
    fn test_missing_file() {
        let err = KernelSource::read("/nonexistent/dir/kernel.cl").unwrap_err();
        assert!(matches!(err, PreclError::Io { .. }));
    }

    #[test]
    fn test_invalid_utf8() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("latin1.cl");
        fs::write(&path, [0x5f, 0x5f, 0xff, 0xfe]).unwrap();

        let err = KernelSource::read(&path).unwrap_err();
        assert!(matches!(err, PreclError::Io { .. }));
    }

    #[test]
    fn test_kernel_name() {
        let source = KernelSource::from_text("/k/MatrixMultiplication_Kernels.cl", "");
        assert_eq!(source.kernel_name(), "MatrixMultiplication_Kernels");

        let source = KernelSource::from_text("/k/.hidden.cl", "");
        assert_eq!(source.kernel_name(), "hidden");
    }

    #[test]
    fn test_sha256_stable() {
        let a = KernelSource::from_text("a.cl", KERNEL);
        let b = KernelSource::from_text("b.cl", KERNEL);
        let c = KernelSource::from_text("a.cl", "different");

        assert_eq!(a.sha256().len(), 64);
        assert_eq!(a.sha256(), b.sha256());
        assert_ne!(a.sha256(), c.sha256());
    }
}
