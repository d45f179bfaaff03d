//! Pipeline configuration.
//!
//! Settings are layered: built-in defaults, then a TOML file, then
//! `PRECL_*` environment variables. The CLI applies its flags last.
//!
//! ```toml
//! source = "kernels/MatrixMultiplication_Kernels.cl"
//! output = "kernels/MatrixMultiplication_Kernels.cl.bin"
//! policy = "prefer-cached"
//! build_options = "-cl-fast-relaxed-math"
//! ```

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::cache::CACHE_DIR_ENV;
use crate::error::{PreclError, Result};

/// Default configuration file name looked up in the working directory.
pub const CONFIG_FILE_NAME: &str = "precl.toml";

/// What to do when a binary for the kernel already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CachePolicy {
    /// Reuse the stored binary if it is current and validates on the device.
    #[default]
    PreferCached,
    /// Always compile from source and overwrite the stored binary.
    Always,
}

impl FromStr for CachePolicy {
    type Err = PreclError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "prefer-cached" | "cached" => Ok(CachePolicy::PreferCached),
            "always" | "rebuild" => Ok(CachePolicy::Always),
            other => Err(PreclError::Config(format!(
                "unknown cache policy '{}' (expected 'prefer-cached' or 'always')",
                other
            ))),
        }
    }
}

impl fmt::Display for CachePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CachePolicy::PreferCached => write!(f, "prefer-cached"),
            CachePolicy::Always => write!(f, "always"),
        }
    }
}

/// Configuration for one pipeline run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    /// Kernel source file.
    pub source: PathBuf,

    /// Destination of the binary. Derived from the cache directory when unset.
    pub output: Option<PathBuf>,

    /// Binary cache directory. Uses the platform default when unset.
    pub cache_dir: Option<PathBuf>,

    /// Reuse policy for existing binaries.
    pub policy: CachePolicy,

    /// Options passed to the compiler.
    pub build_options: String,

    /// Log the source text before compiling.
    pub echo_source: bool,
}

impl PipelineConfig {
    /// Configuration for compiling `source` with defaults for everything else.
    pub fn for_source(source: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
            ..Default::default()
        }
    }

    /// Parses a TOML document.
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    /// Reads a TOML file. Relative paths inside it are resolved against the
    /// file's directory.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| PreclError::io(path, e))?;
        let mut config = Self::from_toml_str(&contents)?;

        if let Some(base) = path.parent() {
            config.resolve_relative_to(base);
        }

        tracing::debug!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }

    /// Loads `precl.toml` from `dir` if present, defaults otherwise.
    pub fn discover(dir: impl AsRef<Path>) -> Result<Self> {
        let candidate = dir.as_ref().join(CONFIG_FILE_NAME);
        if candidate.is_file() {
            Self::from_file(candidate)
        } else {
            Ok(Self::default())
        }
    }

    /// Applies `PRECL_*` overrides from the process environment.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_vars(|key| std::env::var(key).ok())
    }

    /// Applies overrides from an arbitrary variable lookup.
    pub fn apply_vars<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(source) = lookup("PRECL_SOURCE") {
            self.source = PathBuf::from(source);
        }
        if let Some(output) = lookup("PRECL_OUTPUT") {
            self.output = Some(PathBuf::from(output));
        }
        if let Some(dir) = lookup(CACHE_DIR_ENV) {
            self.cache_dir = Some(PathBuf::from(dir));
        }
        if let Some(policy) = lookup("PRECL_POLICY") {
            self.policy = policy.parse()?;
        }
        if let Some(options) = lookup("PRECL_BUILD_OPTIONS") {
            self.build_options = options;
        }
        Ok(())
    }

    /// Checks that the configuration can drive a run.
    pub fn validate(&self) -> Result<()> {
        if self.source.as_os_str().is_empty() {
            return Err(PreclError::Config(
                "no kernel source configured (set `source`, PRECL_SOURCE, or pass a path)"
                    .to_string(),
            ));
        }
        if let Some(output) = &self.output {
            if output == &self.source {
                return Err(PreclError::Config(
                    "output path would overwrite the kernel source".to_string(),
                ));
            }
        }
        Ok(())
    }

    fn resolve_relative_to(&mut self, base: &Path) {
        let resolve = |p: &mut PathBuf| {
            if !p.as_os_str().is_empty() && p.is_relative() {
                *p = base.join(&*p);
            }
        };
        resolve(&mut self.source);
        if let Some(output) = self.output.as_mut() {
            resolve(output);
        }
        if let Some(dir) = self.cache_dir.as_mut() {
            resolve(dir);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    #[test]
    fn test_parse_full_config() {
        let config = PipelineConfig::from_toml_str(
            r#"
source = "/k/matmul.cl"
output = "/k/matmul.cl.bin"
policy = "always"
build_options = "-cl-mad-enable"
echo_source = true
"#,
        )
        .unwrap();

        assert_eq!(config.source, PathBuf::from("/k/matmul.cl"));
        assert_eq!(config.output, Some(PathBuf::from("/k/matmul.cl.bin")));
        assert_eq!(config.policy, CachePolicy::Always);
        assert_eq!(config.build_options, "-cl-mad-enable");
        assert!(config.echo_source);
        assert!(config.cache_dir.is_none());
    }

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::from_toml_str("source = \"k.cl\"").unwrap();
        assert_eq!(config.policy, CachePolicy::PreferCached);
        assert!(config.output.is_none());
        assert!(config.build_options.is_empty());
    }

    #[test]
    fn test_unknown_field_rejected() {
        let err = PipelineConfig::from_toml_str("sauce = \"k.cl\"").unwrap_err();
        assert!(matches!(err, PreclError::Config(_)));
    }

    #[test]
    fn test_file_paths_resolved_against_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, "source = \"kernels/k.cl\"\ncache_dir = \"/abs/cache\"\n").unwrap();

        let config = PipelineConfig::discover(dir.path()).unwrap();
        assert_eq!(config.source, dir.path().join("kernels/k.cl"));
        assert_eq!(config.cache_dir, Some(PathBuf::from("/abs/cache")));
    }

    #[test]
    fn test_discover_without_file() {
        let dir = TempDir::new().unwrap();
        assert_eq!(
            PipelineConfig::discover(dir.path()).unwrap(),
            PipelineConfig::default()
        );
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("PRECL_SOURCE", "/env/k.cl"),
            ("PRECL_POLICY", "always"),
            ("PRECL_BUILD_OPTIONS", "-w"),
        ]
        .into_iter()
        .collect();

        let mut config = PipelineConfig::for_source("/file/k.cl");
        config
            .apply_vars(|k| vars.get(k).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.source, PathBuf::from("/env/k.cl"));
        assert_eq!(config.policy, CachePolicy::Always);
        assert_eq!(config.build_options, "-w");
        assert!(config.output.is_none());
    }

    #[test]
    fn test_bad_policy_in_env() {
        let mut config = PipelineConfig::default();
        let err = config
            .apply_vars(|k| (k == "PRECL_POLICY").then(|| "sometimes".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("sometimes"));
    }

    #[test]
    fn test_validate() {
        assert!(PipelineConfig::default().validate().is_err());
        assert!(PipelineConfig::for_source("k.cl").validate().is_ok());

        let mut config = PipelineConfig::for_source("k.cl");
        config.output = Some(PathBuf::from("k.cl"));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_policy_round_trip_names() {
        for policy in [CachePolicy::PreferCached, CachePolicy::Always] {
            assert_eq!(policy.to_string().parse::<CachePolicy>().unwrap(), policy);
        }
    }
}
