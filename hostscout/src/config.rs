use config::{Config as ConfigBuilder, ConfigError, File};
use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};

use crate::hosts::{EncodingMode, HostOptions};

/// Configuration for a scan.
///
/// # Configuration Locations
///
/// Files are layered, later ones overriding earlier ones:
/// 1. Global `$CONFIG_DIR/hostscout/config.yaml`
/// 2. Local `.hostscout.yaml` in the current directory
/// 3. Custom config file specified via `--config`
///
/// # Configuration Format
///
/// ```yaml
/// # Directory holding the check definitions
/// definitions_dir: "checks"
///
/// # Capture files or directories to scan
/// inputs:
///   - "captures/site-a"
///
/// # Worker processes (default: CPU cores)
/// worker_count: 8
///
/// # How to treat captures that are not valid UTF-8 (failfast or lossy)
/// encoding_mode: lossy
///
/// # Capture files to skip (glob syntax)
/// ignore_patterns:
///   - "**/old/**"
///
/// # Only accept these extensions when walking directories
/// file_extensions: ["txt", "cfg"]
///
/// # Log level (trace, debug, info, warn, error)
/// log_level: "info"
/// ```
///
/// Command-line values take precedence; see [`ScanConfig::merge_with_cli`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanConfig {
    /// Root directory of the check definitions
    #[serde(default = "default_definitions_dir")]
    pub definitions_dir: PathBuf,

    /// Capture files or directories to scan
    #[serde(default)]
    pub inputs: Vec<PathBuf>,

    /// Number of concurrent worker processes
    #[serde(default = "default_worker_count")]
    pub worker_count: NonZeroUsize,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub encoding_mode: EncodingMode,

    /// Capture files to skip (glob syntax)
    #[serde(default)]
    pub ignore_patterns: Vec<String>,

    /// Extensions to accept when walking directories; all if unset
    #[serde(default)]
    pub file_extensions: Option<Vec<String>>,

    /// Only print the summary, not individual findings
    #[serde(default)]
    pub stats_only: bool,
}

fn default_definitions_dir() -> PathBuf {
    PathBuf::from("checks")
}

pub fn default_worker_count() -> NonZeroUsize {
    NonZeroUsize::new(num_cpus::get()).unwrap_or(NonZeroUsize::MIN)
}

fn default_log_level() -> String {
    "warn".to_string()
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            definitions_dir: default_definitions_dir(),
            inputs: Vec::new(),
            worker_count: default_worker_count(),
            log_level: default_log_level(),
            encoding_mode: EncodingMode::default(),
            ignore_patterns: Vec::new(),
            file_extensions: None,
            stats_only: false,
        }
    }
}

impl ScanConfig {
    /// Loads configuration from the default locations
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(None)
    }

    /// Loads configuration, layering `config_path` over the default locations.
    ///
    /// A custom path that does not exist is an error; missing default files
    /// are not.
    pub fn load_from(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = ConfigBuilder::builder();

        let defaults = [
            dirs::config_dir().map(|p| p.join("hostscout/config.yaml")),
            Some(PathBuf::from(".hostscout.yaml")),
        ];
        for path in defaults.iter().flatten() {
            if path.exists() {
                builder = builder.add_source(File::from(path.as_path()));
            }
        }
        if let Some(path) = config_path {
            builder = builder.add_source(File::from(path).required(true));
        }

        builder.build()?.try_deserialize()
    }

    /// Merges CLI arguments with configuration file values
    pub fn merge_with_cli(mut self, cli: CliOverrides) -> Self {
        if let Some(dir) = cli.definitions_dir {
            self.definitions_dir = dir;
        }
        if !cli.inputs.is_empty() {
            self.inputs = cli.inputs;
        }
        if let Some(count) = cli.worker_count {
            self.worker_count = count;
        }
        if let Some(level) = cli.log_level {
            self.log_level = level;
        }
        if let Some(mode) = cli.encoding_mode {
            self.encoding_mode = mode;
        }
        if !cli.ignore_patterns.is_empty() {
            self.ignore_patterns = cli.ignore_patterns;
        }
        if cli.file_extensions.is_some() {
            self.file_extensions = cli.file_extensions;
        }
        if cli.stats_only {
            self.stats_only = true;
        }
        self
    }

    /// Options for host enumeration
    pub fn host_options(&self) -> HostOptions {
        HostOptions {
            encoding: self.encoding_mode,
            ignore_patterns: self.ignore_patterns.clone(),
            file_extensions: self.file_extensions.clone(),
        }
    }
}

/// Values given on the command line; unset fields keep the file's value
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub definitions_dir: Option<PathBuf>,
    pub inputs: Vec<PathBuf>,
    pub worker_count: Option<NonZeroUsize>,
    pub log_level: Option<String>,
    pub encoding_mode: Option<EncodingMode>,
    pub ignore_patterns: Vec<String>,
    pub file_extensions: Option<Vec<String>>,
    pub stats_only: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write;
    use tempfile::tempdir;

    fn write_config(content: &str) -> (tempfile::TempDir, PathBuf) {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        let mut file = File::create(&path).unwrap();
        file.write_all(content.as_bytes()).unwrap();
        (dir, path)
    }

    #[test]
    fn test_load_config_file() {
        let (_dir, path) = write_config(
            r#"
            definitions_dir: "audit/checks"
            inputs: ["captures/a", "captures/b"]
            worker_count: 4
            log_level: "debug"
            encoding_mode: lossy
            ignore_patterns: ["**/old/**"]
            file_extensions: ["txt", "cfg"]
            stats_only: true
        "#,
        );

        let config = ScanConfig::load_from(Some(&path)).unwrap();
        assert_eq!(config.definitions_dir, PathBuf::from("audit/checks"));
        assert_eq!(
            config.inputs,
            vec![PathBuf::from("captures/a"), PathBuf::from("captures/b")]
        );
        assert_eq!(config.worker_count, NonZeroUsize::new(4).unwrap());
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.encoding_mode, EncodingMode::Lossy);
        assert_eq!(config.ignore_patterns, vec!["**/old/**".to_string()]);
        assert_eq!(
            config.file_extensions,
            Some(vec!["txt".to_string(), "cfg".to_string()])
        );
        assert!(config.stats_only);
    }

    #[test]
    fn test_default_values() {
        let (_dir, path) = write_config("definitions_dir: \"checks\"\n");

        let config = ScanConfig::load_from(Some(&path)).unwrap();
        assert_eq!(config.definitions_dir, PathBuf::from("checks"));
        assert!(config.inputs.is_empty());
        assert_eq!(config.worker_count, default_worker_count());
        assert_eq!(config.log_level, "warn");
        assert_eq!(config.encoding_mode, EncodingMode::FailFast);
        assert_eq!(config.file_extensions, None);
        assert!(!config.stats_only);
    }

    #[test]
    fn test_merge_with_cli() {
        let file = ScanConfig {
            definitions_dir: PathBuf::from("checks"),
            inputs: vec![PathBuf::from("captures")],
            worker_count: NonZeroUsize::new(4).unwrap(),
            log_level: "info".to_string(),
            encoding_mode: EncodingMode::Lossy,
            ignore_patterns: vec!["**/old/**".to_string()],
            file_extensions: Some(vec!["txt".to_string()]),
            stats_only: false,
        };

        let cli = CliOverrides {
            inputs: vec![PathBuf::from("other")],
            worker_count: NonZeroUsize::new(8),
            stats_only: true,
            ..Default::default()
        };

        let merged = file.merge_with_cli(cli);
        assert_eq!(merged.definitions_dir, PathBuf::from("checks")); // File value
        assert_eq!(merged.inputs, vec![PathBuf::from("other")]); // CLI value
        assert_eq!(merged.worker_count, NonZeroUsize::new(8).unwrap()); // CLI value
        assert_eq!(merged.log_level, "info"); // File value
        assert_eq!(merged.encoding_mode, EncodingMode::Lossy); // File value
        assert_eq!(merged.file_extensions, Some(vec!["txt".to_string()])); // File value
        assert!(merged.stats_only); // CLI value
    }

    #[test]
    fn test_host_options() {
        let config = ScanConfig {
            encoding_mode: EncodingMode::Lossy,
            ignore_patterns: vec!["*.bak".to_string()],
            ..Default::default()
        };
        let options = config.host_options();
        assert_eq!(options.encoding, EncodingMode::Lossy);
        assert_eq!(options.ignore_patterns, vec!["*.bak".to_string()]);
        assert_eq!(options.file_extensions, None);
    }

    #[test]
    fn test_invalid_config() {
        let (_dir, path) = write_config(
            r#"
            worker_count: 0
            encoding_mode: utf16
        "#,
        );
        assert!(ScanConfig::load_from(Some(&path)).is_err());
    }

    #[test]
    fn test_load_nonexistent_file() {
        let result = ScanConfig::load_from(Some(Path::new("nonexistent.yaml")));
        assert!(result.is_err());
    }
}
