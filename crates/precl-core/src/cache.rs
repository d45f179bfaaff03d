//! On-disk cache of compiled program binaries.
//!
//! Each binary is stored as a raw dump, one file per kernel and device.
//! Next to it sits a small TOML manifest recording what the binary was
//! built from, so a later run can tell whether the file is still current.
//!
//! # Cache Key
//!
//! A cached binary is reused only if all of these match:
//! - SHA-256 of the kernel source
//! - device name, vendor and driver version
//! - build options
//! - cache format version
//!
//! # Cache Location
//!
//! Default: `~/.cache/precl/`
//! Override: `PRECL_CACHE_DIR` environment variable

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::binary;
use crate::device::DeviceInfo;
use crate::error::{PreclError, Result};

/// Current cache format version. Increment to invalidate all cached entries.
pub const CACHE_VERSION: u32 = 1;

/// Environment variable overriding the cache directory.
pub const CACHE_DIR_ENV: &str = "PRECL_CACHE_DIR";

const BINARY_EXTENSION: &str = "bin";
const MANIFEST_SUFFIX: &str = ".manifest.toml";

/// Provenance record stored beside a cached binary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheManifest {
    /// Cache format version.
    pub version: u32,
    /// Kernel name.
    pub kernel: String,
    /// SHA-256 of the source the binary was compiled from.
    pub source_sha256: String,
    /// Device name.
    pub device_name: String,
    /// Device vendor.
    pub device_vendor: String,
    /// Driver version at compile time.
    pub driver_version: String,
    /// Compiler options used for the build.
    pub build_options: String,
    /// Binary length in bytes.
    pub binary_len: u64,
    /// SHA-256 of the binary.
    pub binary_sha256: String,
}

impl CacheManifest {
    /// Builds the manifest describing `binary`.
    pub fn new(
        kernel: &str,
        source_sha256: &str,
        device: &DeviceInfo,
        build_options: &str,
        binary: &[u8],
    ) -> Self {
        Self {
            version: CACHE_VERSION,
            kernel: kernel.to_string(),
            source_sha256: source_sha256.to_string(),
            device_name: device.name.clone(),
            device_vendor: device.vendor.clone(),
            driver_version: device.driver_version.clone(),
            build_options: build_options.to_string(),
            binary_len: binary.len() as u64,
            binary_sha256: hash_bytes(binary),
        }
    }

    /// Manifest path for a binary path: `<binary>.manifest.toml`.
    pub fn path_for(binary_path: &Path) -> PathBuf {
        let mut name = binary_path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(MANIFEST_SUFFIX);
        binary_path.with_file_name(name)
    }

    /// Loads the manifest stored beside `binary_path`.
    ///
    /// Returns `None` if no manifest exists.
    pub fn load(binary_path: &Path) -> Result<Option<Self>> {
        let path = Self::path_for(binary_path);
        let contents = match fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(PreclError::io(&path, e)),
        };
        Ok(Some(toml::from_str(&contents)?))
    }

    /// Writes the manifest beside `binary_path`.
    pub fn store(&self, binary_path: &Path) -> Result<()> {
        let path = Self::path_for(binary_path);
        let contents = toml::to_string_pretty(self)?;
        binary::write_binary(&path, contents.as_bytes())
    }

    /// True if `self` was produced from the same inputs as `expected`.
    ///
    /// Binary length and digest are not compared; they describe the output.
    pub fn same_inputs(&self, expected: &CacheManifest) -> bool {
        self.version == expected.version
            && self.kernel == expected.kernel
            && self.source_sha256 == expected.source_sha256
            && self.device_name == expected.device_name
            && self.device_vendor == expected.device_vendor
            && self.driver_version == expected.driver_version
            && self.build_options == expected.build_options
    }

    /// True if `bytes` is the binary this manifest describes.
    pub fn describes(&self, bytes: &[u8]) -> bool {
        self.binary_len == bytes.len() as u64 && self.binary_sha256 == hash_bytes(bytes)
    }
}

/// Directory of cached binaries.
#[derive(Debug, Clone)]
pub struct BinaryCache {
    /// Directory where binaries are stored.
    cache_dir: PathBuf,
    /// Whether caching is enabled.
    enabled: bool,
}

impl Default for BinaryCache {
    fn default() -> Self {
        Self::new().unwrap_or_else(|_| Self::disabled())
    }
}

impl BinaryCache {
    /// Creates a cache in the default or environment-configured directory.
    pub fn new() -> Result<Self> {
        Self::with_dir(Self::default_cache_dir())
    }

    /// Creates a cache in a specific directory, creating it if needed.
    pub fn with_dir(cache_dir: PathBuf) -> Result<Self> {
        if !cache_dir.exists() {
            fs::create_dir_all(&cache_dir).map_err(|e| PreclError::io(&cache_dir, e))?;
        }

        Ok(Self {
            cache_dir,
            enabled: true,
        })
    }

    /// Creates a disabled cache. Only explicit output paths can be used with it.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            cache_dir: PathBuf::new(),
            enabled: false,
        }
    }

    /// Returns whether caching is enabled.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Returns the cache directory path.
    #[must_use]
    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Path of the cached binary for `kernel` on `device`.
    pub fn entry_path(&self, kernel: &str, device: &DeviceInfo) -> Result<PathBuf> {
        if !self.enabled {
            return Err(PreclError::Config(
                "no output path given and the binary cache is disabled".to_string(),
            ));
        }
        Ok(self.cache_dir.join(format!(
            "{}_{}.{}",
            kernel,
            device.slug(),
            BINARY_EXTENSION
        )))
    }

    /// Looks up a current binary at `binary_path`.
    ///
    /// Returns `None` when there is no binary, no manifest, or the manifest
    /// does not match `expected`. A corrupted entry is removed.
    pub fn lookup(binary_path: &Path, expected: &CacheManifest) -> Result<Option<Vec<u8>>> {
        if !binary_path.exists() {
            return Ok(None);
        }

        let manifest = match CacheManifest::load(binary_path) {
            Ok(Some(m)) => m,
            Ok(None) => {
                tracing::debug!(path = %binary_path.display(), "Cached binary has no manifest");
                return Ok(None);
            }
            Err(PreclError::Config(msg)) => {
                tracing::warn!(
                    path = %binary_path.display(),
                    "Discarding corrupted manifest: {}",
                    msg
                );
                let _ = fs::remove_file(CacheManifest::path_for(binary_path));
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        if !manifest.same_inputs(expected) {
            tracing::debug!(path = %binary_path.display(), "Cached binary is stale");
            return Ok(None);
        }

        let bytes = binary::read_binary(binary_path)?;
        if !manifest.describes(&bytes) {
            tracing::warn!(
                path = %binary_path.display(),
                "Cached binary does not match its manifest"
            );
            return Ok(None);
        }

        tracing::debug!(
            path = %binary_path.display(),
            size = bytes.len(),
            "Loaded cached binary"
        );

        Ok(Some(bytes))
    }

    /// Records `manifest` for a binary already written to `binary_path`.
    pub fn record(binary_path: &Path, manifest: &CacheManifest) -> Result<()> {
        manifest.store(binary_path)
    }

    /// Drops the manifest of `binary_path` so the binary is never reused.
    pub fn forget(binary_path: &Path) {
        let manifest = CacheManifest::path_for(binary_path);
        if manifest.exists() {
            let _ = fs::remove_file(manifest);
        }
    }

    /// Removes every binary recorded by a manifest, the manifests and
    /// leftover temp files. Other files in the directory are kept.
    pub fn clear(&self) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }

        let entries =
            fs::read_dir(&self.cache_dir).map_err(|e| PreclError::io(&self.cache_dir, e))?;

        // Classify before removing anything: a binary stops being an entry
        // once its manifest is gone.
        let doomed: Vec<PathBuf> = entries
            .flatten()
            .map(|entry| entry.path())
            .filter(|path| is_cache_entry(path) || is_cache_leftover(path))
            .collect();

        for path in doomed {
            let _ = fs::remove_file(path);
        }

        Ok(())
    }

    /// Returns statistics about the cache.
    #[must_use]
    pub fn stats(&self) -> BinaryCacheStats {
        if !self.enabled {
            return BinaryCacheStats::default();
        }

        let mut entries = 0;
        let mut bytes = 0;

        if let Ok(dir) = fs::read_dir(&self.cache_dir) {
            for entry in dir.flatten() {
                let path = entry.path();
                if is_cache_entry(&path) {
                    entries += 1;
                    if let Ok(metadata) = fs::metadata(&path) {
                        bytes += metadata.len();
                    }
                }
            }
        }

        BinaryCacheStats {
            entries,
            bytes,
            cache_dir: self.cache_dir.clone(),
        }
    }

    /// Returns the default cache directory.
    pub fn default_cache_dir() -> PathBuf {
        if let Ok(dir) = std::env::var(CACHE_DIR_ENV) {
            return PathBuf::from(dir);
        }

        #[cfg(target_os = "linux")]
        {
            if let Ok(xdg) = std::env::var("XDG_CACHE_HOME") {
                return PathBuf::from(xdg).join("precl");
            }
            if let Ok(home) = std::env::var("HOME") {
                return PathBuf::from(home).join(".cache/precl");
            }
        }

        #[cfg(target_os = "macos")]
        {
            if let Ok(home) = std::env::var("HOME") {
                return PathBuf::from(home).join("Library/Caches/precl");
            }
        }

        #[cfg(target_os = "windows")]
        {
            if let Ok(local_app_data) = std::env::var("LOCALAPPDATA") {
                return PathBuf::from(local_app_data).join("precl");
            }
        }

        std::env::temp_dir().join("precl")
    }
}

/// Statistics about the binary cache.
#[derive(Debug, Clone, Default)]
pub struct BinaryCacheStats {
    /// Number of cached binaries.
    pub entries: usize,
    /// Total size of cached binaries in bytes.
    pub bytes: u64,
    /// Cache directory path.
    pub cache_dir: PathBuf,
}

impl std::fmt::Display for BinaryCacheStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Binary cache: {} entries, {:.2} KB at {}",
            self.entries,
            self.bytes as f64 / 1024.0,
            self.cache_dir.display()
        )
    }
}

/// A binary with a sibling manifest.
fn is_cache_entry(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == BINARY_EXTENSION)
        && CacheManifest::path_for(path).exists()
}

/// A manifest, or an interrupted write of a binary or manifest.
fn is_cache_leftover(path: &Path) -> bool {
    let name = match path.file_name().and_then(|n| n.to_str()) {
        Some(n) => n,
        None => return false,
    };
    let binary_suffix = format!(".{}", BINARY_EXTENSION);
    let stem = name.strip_suffix(".tmp").unwrap_or(name);
    let stem = stem.strip_suffix(MANIFEST_SUFFIX).unwrap_or(stem);
    stem != name && stem.ends_with(&binary_suffix)
}

fn hash_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{DeviceId, DeviceKind};
    use tempfile::TempDir;

    fn device(name: &str) -> DeviceInfo {
        DeviceInfo {
            id: DeviceId(1),
            kind: DeviceKind::Accelerator,
            name: name.to_string(),
            vendor: "Acme".to_string(),
            driver_version: "2.1".to_string(),
        }
    }

    fn manifest(source_hash: &str, binary: &[u8]) -> CacheManifest {
        CacheManifest::new("matmul", source_hash, &device("Acme GPU"), "", binary)
    }

    fn store(path: &Path, bytes: &[u8], manifest: &CacheManifest) {
        binary::write_binary(path, bytes).unwrap();
        BinaryCache::record(path, manifest).unwrap();
    }

    #[test]
    fn test_entry_path_per_kernel_and_device() {
        let temp_dir = TempDir::new().unwrap();
        let cache = BinaryCache::with_dir(temp_dir.path().to_path_buf()).unwrap();

        let gpu = cache.entry_path("matmul", &device("Acme GPU")).unwrap();
        let cpu = cache.entry_path("matmul", &device("Acme CPU")).unwrap();
        assert_eq!(gpu, temp_dir.path().join("matmul_acme-gpu.bin"));
        assert_ne!(gpu, cpu);
    }

    #[test]
    fn test_lookup_miss_without_binary() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("k.bin");
        let found = BinaryCache::lookup(&path, &manifest("abc", b"")).unwrap();
        assert!(found.is_none());
    }

    #[test]
    fn test_lookup_hit() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("k.bin");
        let m = manifest("abc", b"binary");
        store(&path, b"binary", &m);

        let found = BinaryCache::lookup(&path, &manifest("abc", b"")).unwrap();
        assert_eq!(found, Some(b"binary".to_vec()));
    }

    #[test]
    fn test_lookup_stale_source() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("k.bin");
        store(&path, b"binary", &manifest("abc", b"binary"));

        let found = BinaryCache::lookup(&path, &manifest("def", b"")).unwrap();
        assert!(found.is_none());
    }

    #[test]
    fn test_lookup_without_manifest() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("k.bin");
        fs::write(&path, b"binary").unwrap();

        assert!(BinaryCache::lookup(&path, &manifest("abc", b""))
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_lookup_tampered_binary() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("k.bin");
        store(&path, b"binary", &manifest("abc", b"binary"));
        fs::write(&path, b"BINARY").unwrap();

        assert!(BinaryCache::lookup(&path, &manifest("abc", b""))
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_corrupted_manifest_removed() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("k.bin");
        fs::write(&path, b"binary").unwrap();
        fs::write(CacheManifest::path_for(&path), "not = [valid").unwrap();

        assert!(BinaryCache::lookup(&path, &manifest("abc", b""))
            .unwrap()
            .is_none());
        assert!(!CacheManifest::path_for(&path).exists());
    }

    #[test]
    fn test_manifest_path() {
        let path = CacheManifest::path_for(Path::new("/k/matmul.cl.bin"));
        assert_eq!(path, PathBuf::from("/k/matmul.cl.bin.manifest.toml"));
    }

    #[test]
    fn test_cache_stats_and_clear() {
        let temp_dir = TempDir::new().unwrap();
        let cache = BinaryCache::with_dir(temp_dir.path().to_path_buf()).unwrap();

        assert_eq!(cache.stats().entries, 0);

        let a = cache.entry_path("a", &device("Acme GPU")).unwrap();
        let b = cache.entry_path("b", &device("Acme GPU")).unwrap();
        store(&a, b"aaaa", &manifest("1", b"aaaa"));
        store(&b, b"bbbbbb", &manifest("2", b"bbbbbb"));
        fs::write(temp_dir.path().join("notes.txt"), "keep me").unwrap();

        let stats = cache.stats();
        assert_eq!(stats.entries, 2);
        assert_eq!(stats.bytes, 10);

        cache.clear().unwrap();
        assert_eq!(cache.stats().entries, 0);
        assert!(!CacheManifest::path_for(&a).exists());
        assert!(temp_dir.path().join("notes.txt").exists());
    }

    #[test]
    fn test_clear_keeps_unrelated_files() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path();
        let cache = BinaryCache::with_dir(dir.to_path_buf()).unwrap();

        let entry = cache.entry_path("a", &device("Acme GPU")).unwrap();
        store(&entry, b"aaaa", &manifest("1", b"aaaa"));
        fs::write(dir.join("firmware.bin"), b"not ours").unwrap();
        fs::write(dir.join("download.tmp"), b"partial").unwrap();
        fs::write(dir.join("b_acme.bin.tmp"), b"interrupted").unwrap();
        fs::write(dir.join("c_acme.bin.manifest.toml"), "orphan").unwrap();

        assert_eq!(cache.stats().entries, 1);
        cache.clear().unwrap();

        assert!(!entry.exists());
        assert!(!CacheManifest::path_for(&entry).exists());
        assert!(!dir.join("b_acme.bin.tmp").exists());
        assert!(!dir.join("c_acme.bin.manifest.toml").exists());
        assert!(dir.join("firmware.bin").exists());
        assert!(dir.join("download.tmp").exists());
    }

    #[test]
    fn test_forget_disables_reuse() {
        let temp_dir = TempDir::new().unwrap();
        let cache = BinaryCache::with_dir(temp_dir.path().to_path_buf()).unwrap();
        let entry = cache.entry_path("a", &device("Acme GPU")).unwrap();
        store(&entry, b"aaaa", &manifest("1", b"aaaa"));

        BinaryCache::forget(&entry);
        assert!(entry.exists());
        assert!(!CacheManifest::path_for(&entry).exists());
        assert_eq!(cache.stats().entries, 0);
    }

    #[test]
    fn test_disabled_cache() {
        let cache = BinaryCache::disabled();

        assert!(!cache.is_enabled());
        assert!(cache.entry_path("k", &device("Acme GPU")).is_err());
        assert_eq!(cache.stats().entries, 0);
        cache.clear().unwrap();
    }

    #[test]
    fn test_stats_display() {
        let stats = BinaryCacheStats {
            entries: 5,
            bytes: 10240,
            cache_dir: PathBuf::from("/tmp/test"),
        };
        let display = format!("{}", stats);
        assert!(display.contains("5 entries"));
        assert!(display.contains("10.00 KB"));
    }
}
