//! Configuration file support for kitenv.
//!
//! kitenv reads two configuration file locations:
//! - Global: `~/.kitenv/config.toml` - User-wide defaults
//! - Project: `.kitenv/config.toml` - Project-specific overrides
//!
//! Project config takes precedence over global config. Command line flags
//! take precedence over both.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::fragment::DEFAULT_PRESET_VERSION;

/// Default name of the preset document written by `generate`.
pub const DEFAULT_OUTPUT_FILE: &str = "CMakeUserPresets.json";

/// kitenv configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Scanner settings
    pub scan: ScanConfig,

    /// Resolver settings
    pub resolve: ResolveConfig,

    /// Merge policy
    pub merge: MergeConfig,

    /// Preset output
    pub output: OutputConfig,
}

/// Scanner configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Additional directories searched for toolkits
    pub extra_dirs: Vec<PathBuf>,

    /// Maximum directory depth for filesystem walks (default 8)
    pub max_depth: Option<usize>,

    /// Seconds a single compiler probe may take (default 10)
    pub probe_timeout_secs: Option<u64>,
}

/// Resolver configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolveConfig {
    /// Seconds an environment script may take (default 120)
    pub timeout_secs: Option<u64>,

    /// Number of parallel resolutions (None = host parallelism)
    pub jobs: Option<usize>,

    /// Shell used to source POSIX scripts (default: bash, then sh)
    pub shell: Option<PathBuf>,
}

/// Merge configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MergeConfig {
    /// Fail on conflicting scalar environment variables (default false)
    pub strict: Option<bool>,

    /// Fail on conflicting cache variables (default false)
    pub strict_cache: Option<bool>,
}

impl MergeConfig {
    pub fn is_strict(&self) -> bool {
        self.strict.unwrap_or(false)
    }

    pub fn is_strict_cache(&self) -> bool {
        self.strict_cache.unwrap_or(false)
    }
}

/// Output configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Preset document path, relative to the working directory
    /// (default `CMakeUserPresets.json`)
    pub file: Option<PathBuf>,

    /// `version` field written to new preset documents (default 7)
    pub preset_version: Option<u32>,
}

impl Config {
    /// Load configuration from a file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;

        toml::from_str(&contents)
            .with_context(|| format!("failed to parse config file: {}", path.display()))
    }

    /// Load configuration with fallback to defaults if file doesn't exist.
    pub fn load_or_default(path: &Path) -> Self {
        if path.exists() {
            Self::load(path).unwrap_or_else(|e| {
                tracing::warn!("Failed to load config from {}: {}", path.display(), e);
                Self::default()
            })
        } else {
            Self::default()
        }
    }

    /// Merge another config into this one (other takes precedence).
    pub fn merge(&mut self, other: Config) {
        if !other.scan.extra_dirs.is_empty() {
            self.scan.extra_dirs = other.scan.extra_dirs;
        }
        if other.scan.max_depth.is_some() {
            self.scan.max_depth = other.scan.max_depth;
        }
        if other.scan.probe_timeout_secs.is_some() {
            self.scan.probe_timeout_secs = other.scan.probe_timeout_secs;
        }

        if other.resolve.timeout_secs.is_some() {
            self.resolve.timeout_secs = other.resolve.timeout_secs;
        }
        if other.resolve.jobs.is_some() {
            self.resolve.jobs = other.resolve.jobs;
        }
        if other.resolve.shell.is_some() {
            self.resolve.shell = other.resolve.shell;
        }

        if other.merge.strict.is_some() {
            self.merge.strict = other.merge.strict;
        }
        if other.merge.strict_cache.is_some() {
            self.merge.strict_cache = other.merge.strict_cache;
        }

        if other.output.file.is_some() {
            self.output.file = other.output.file;
        }
        if other.output.preset_version.is_some() {
            self.output.preset_version = other.output.preset_version;
        }
    }

    pub fn output_file(&self) -> PathBuf {
        self.output
            .file
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_FILE))
    }

    pub fn preset_version(&self) -> u32 {
        self.output.preset_version.unwrap_or(DEFAULT_PRESET_VERSION)
    }

    pub fn max_depth(&self) -> usize {
        self.scan.max_depth.unwrap_or(8)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.scan.probe_timeout_secs.unwrap_or(10))
    }

    pub fn resolve_timeout(&self) -> Duration {
        Duration::from_secs(self.resolve.timeout_secs.unwrap_or(120))
    }

    pub fn jobs(&self) -> usize {
        self.resolve.jobs.filter(|j| *j > 0).unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        })
    }
}

/// Get the global kitenv config directory (~/.kitenv).
pub fn global_config_dir() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|b| b.home_dir().join(".kitenv"))
}

/// Get the global config path (~/.kitenv/config.toml).
pub fn global_config_path() -> Option<PathBuf> {
    global_config_dir().map(|dir| dir.join("config.toml"))
}

/// Get the project config path (.kitenv/config.toml).
pub fn project_config_path(project_root: &Path) -> PathBuf {
    project_root.join(".kitenv").join("config.toml")
}

/// Load merged configuration from global and project locations.
///
/// Order of precedence (highest to lowest):
/// 1. Project config (.kitenv/config.toml)
/// 2. Global config (~/.kitenv/config.toml)
/// 3. Defaults
pub fn load_config(global_path: &Path, project_path: &Path) -> Config {
    let mut config = Config::default();

    if global_path.exists() {
        let global = Config::load_or_default(global_path);
        config.merge(global);
    }

    if project_path.exists() {
        let project = Config::load_or_default(project_path);
        config.merge(project);
    }

    config
}

/// Load configuration for a run started in `cwd`.
pub fn load_for_cwd(cwd: &Path) -> Config {
    let project = project_config_path(cwd);
    match global_config_path() {
        Some(global) => load_config(&global, &project),
        None => load_config(&PathBuf::new(), &project),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.max_depth(), 8);
        assert_eq!(config.probe_timeout(), Duration::from_secs(10));
        assert_eq!(config.resolve_timeout(), Duration::from_secs(120));
        assert!(!config.merge.is_strict());
        assert_eq!(config.output_file(), PathBuf::from("CMakeUserPresets.json"));
        assert_eq!(config.preset_version(), 7);
        assert!(config.jobs() >= 1);
    }

    #[test]
    fn test_config_load() {
        let tmp = TempDir::new().unwrap();
        let config_path = tmp.path().join("config.toml");

        std::fs::write(
            &config_path,
            r#"
[scan]
extra_dirs = ["/tools"]
max_depth = 4

[resolve]
timeout_secs = 30
jobs = 2

[merge]
strict = true
"#,
        )
        .unwrap();

        let config = Config::load(&config_path).unwrap();
        assert_eq!(config.scan.extra_dirs, vec![PathBuf::from("/tools")]);
        assert_eq!(config.max_depth(), 4);
        assert_eq!(config.resolve_timeout(), Duration::from_secs(30));
        assert_eq!(config.jobs(), 2);
        assert!(config.merge.is_strict());
        assert!(!config.merge.is_strict_cache());
    }

    #[test]
    fn test_config_load_invalid_falls_back() {
        let tmp = TempDir::new().unwrap();
        let config_path = tmp.path().join("config.toml");
        std::fs::write(&config_path, "[scan\nmax_depth = ").unwrap();

        assert!(Config::load(&config_path).is_err());
        let config = Config::load_or_default(&config_path);
        assert_eq!(config.max_depth(), 8);
    }

    #[test]
    fn test_load_config_precedence() {
        let tmp = TempDir::new().unwrap();
        let global_path = tmp.path().join("global.toml");
        let project_path = tmp.path().join("project.toml");

        std::fs::write(
            &global_path,
            r#"
[scan]
max_depth = 3
probe_timeout_secs = 5

[output]
file = "presets/Global.json"
"#,
        )
        .unwrap();

        std::fs::write(
            &project_path,
            r#"
[scan]
max_depth = 6
"#,
        )
        .unwrap();

        let config = load_config(&global_path, &project_path);

        assert_eq!(config.max_depth(), 6);
        assert_eq!(config.probe_timeout(), Duration::from_secs(5));
        assert_eq!(config.output_file(), PathBuf::from("presets/Global.json"));
    }

    #[test]
    fn test_project_can_turn_strict_off() {
        let tmp = TempDir::new().unwrap();
        let global_path = tmp.path().join("global.toml");
        let project_path = tmp.path().join("project.toml");

        std::fs::write(&global_path, "[merge]\nstrict = true\nstrict_cache = true\n").unwrap();
        std::fs::write(&project_path, "[merge]\nstrict = false\n").unwrap();

        let config = load_config(&global_path, &project_path);
        assert!(!config.merge.is_strict());
        assert!(config.merge.is_strict_cache());
    }

    #[test]
    fn test_project_can_restore_defaults() {
        let tmp = TempDir::new().unwrap();
        let global_path = tmp.path().join("global.toml");
        let project_path = tmp.path().join("project.toml");

        std::fs::write(
            &global_path,
            "[output]\nfile = \"presets/Global.json\"\npreset_version = 6\n",
        )
        .unwrap();
        std::fs::write(
            &project_path,
            "[output]\nfile = \"CMakeUserPresets.json\"\npreset_version = 7\n",
        )
        .unwrap();

        let config = load_config(&global_path, &project_path);
        assert_eq!(config.output_file(), PathBuf::from(DEFAULT_OUTPUT_FILE));
        assert_eq!(config.preset_version(), 7);

        // A project that says nothing keeps the global values.
        std::fs::write(&project_path, "[scan]\nmax_depth = 2\n").unwrap();
        let config = load_config(&global_path, &project_path);
        assert_eq!(config.output_file(), PathBuf::from("presets/Global.json"));
        assert_eq!(config.preset_version(), 6);
    }
}
