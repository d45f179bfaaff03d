//! Binary image format of the software backend.
//!
//! ```text
//! magic[8] | version u32 | device signature[32] | source digest[32]
//!          | kernel count u32 | (name len u32 | name bytes)*
//! ```
//!
//! All integers are little-endian. The device signature ties an image to
//! the device it was produced for.

use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::runtime::DeviceSpec;

/// Leading bytes of every image.
pub const IMAGE_MAGIC: &[u8; 8] = b"PRECLSW\0";

/// Image format version.
pub const IMAGE_VERSION: u32 = 1;

/// Reasons an image cannot be decoded.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ImageError {
    /// Image is shorter than its header or a declared field.
    #[error("image truncated at offset {0}")]
    Truncated(usize),
    /// Leading bytes do not match [`IMAGE_MAGIC`].
    #[error("bad magic")]
    BadMagic,
    /// Image was written by an incompatible version.
    #[error("unsupported image version {0}")]
    UnsupportedVersion(u32),
    /// A kernel name is not UTF-8.
    #[error("kernel name is not UTF-8")]
    BadKernelName,
    /// Bytes remain after the last field.
    #[error("{0} trailing bytes")]
    TrailingBytes(usize),
}

/// Decoded program image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgramImage {
    /// Signature of the target device.
    pub device_signature: [u8; 32],
    /// Digest of source text and build options.
    pub source_digest: [u8; 32],
    /// Kernel entry points, in source order.
    pub kernels: Vec<String>,
}

impl ProgramImage {
    /// Serializes the image.
    pub fn encode(&self) -> Vec<u8> {
        let names: usize = self.kernels.iter().map(|k| 4 + k.len()).sum();
        let mut out = Vec::with_capacity(8 + 4 + 32 + 32 + 4 + names);
        out.extend_from_slice(IMAGE_MAGIC);
        out.extend_from_slice(&IMAGE_VERSION.to_le_bytes());
        out.extend_from_slice(&self.device_signature);
        out.extend_from_slice(&self.source_digest);
        out.extend_from_slice(&(self.kernels.len() as u32).to_le_bytes());
        for kernel in &self.kernels {
            out.extend_from_slice(&(kernel.len() as u32).to_le_bytes());
            out.extend_from_slice(kernel.as_bytes());
        }
        out
    }

    /// Parses an image.
    pub fn decode(bytes: &[u8]) -> Result<Self, ImageError> {
        let mut reader = Reader { bytes, pos: 0 };

        if reader.take(8)? != IMAGE_MAGIC {
            return Err(ImageError::BadMagic);
        }
        let version = reader.u32()?;
        if version != IMAGE_VERSION {
            return Err(ImageError::UnsupportedVersion(version));
        }

        let device_signature = reader.array()?;
        let source_digest = reader.array()?;

        let count = reader.u32()? as usize;
        let mut kernels = Vec::with_capacity(count.min(1024));
        for _ in 0..count {
            let len = reader.u32()? as usize;
            let name = std::str::from_utf8(reader.take(len)?)
                .map_err(|_| ImageError::BadKernelName)?;
            kernels.push(name.to_string());
        }

        let rest = bytes.len() - reader.pos;
        if rest != 0 {
            return Err(ImageError::TrailingBytes(rest));
        }

        Ok(Self {
            device_signature,
            source_digest,
            kernels,
        })
    }
}

/// Signature binding an image to one device model and driver.
pub fn device_signature(device: &DeviceSpec) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(b"precl-sw\0");
    hasher.update(device.name.as_bytes());
    hasher.update([0]);
    hasher.update(device.vendor.as_bytes());
    hasher.update([0]);
    hasher.update(device.driver_version.as_bytes());
    hasher.finalize().into()
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, len: usize) -> Result<&'a [u8], ImageError> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.bytes.len())
            .ok_or(ImageError::Truncated(self.pos))?;
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u32(&mut self) -> Result<u32, ImageError> {
        let mut buf = [0u8; 4];
        buf.copy_from_slice(self.take(4)?);
        Ok(u32::from_le_bytes(buf))
    }

    fn array(&mut self) -> Result<[u8; 32], ImageError> {
        let mut buf = [0u8; 32];
        buf.copy_from_slice(self.take(32)?);
        Ok(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use precl_core::DeviceKind;

    fn image() -> ProgramImage {
        ProgramImage {
            device_signature: [7; 32],
            source_digest: [9; 32],
            kernels: vec!["matmul".to_string(), "transpose".to_string()],
        }
    }

    #[test]
    fn test_decode_encoded() {
        let bytes = image().encode();
        assert!(bytes.starts_with(IMAGE_MAGIC));
        assert_eq!(ProgramImage::decode(&bytes).unwrap(), image());
    }

    #[test]
    fn test_rejects_garbage() {
        assert_eq!(
            ProgramImage::decode(b"ELF\x7f....."),
            Err(ImageError::BadMagic)
        );
        assert_eq!(ProgramImage::decode(b"PREC"), Err(ImageError::Truncated(0)));
    }

    #[test]
    fn test_rejects_truncated_and_trailing() {
        let bytes = image().encode();
        assert!(matches!(
            ProgramImage::decode(&bytes[..bytes.len() - 3]),
            Err(ImageError::Truncated(_))
        ));

        let mut longer = bytes.clone();
        longer.push(0);
        assert_eq!(
            ProgramImage::decode(&longer),
            Err(ImageError::TrailingBytes(1))
        );
    }

    #[test]
    fn test_rejects_other_version() {
        let mut bytes = image().encode();
        bytes[8..12].copy_from_slice(&2u32.to_le_bytes());
        assert_eq!(
            ProgramImage::decode(&bytes),
            Err(ImageError::UnsupportedVersion(2))
        );
    }

    #[test]
    fn test_device_signature_distinguishes_devices() {
        let gpu = DeviceSpec::new(DeviceKind::Accelerator, "Sim GPU");
        let cpu = DeviceSpec::new(DeviceKind::Cpu, "Sim CPU");
        assert_ne!(device_signature(&gpu), device_signature(&cpu));
        assert_eq!(device_signature(&gpu), device_signature(&gpu.clone()));
    }
}
