//! Core configuration structures and loading logic

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::Path;

/// Error type for configuration operations
#[derive(Debug)]
pub enum ConfigError {
    /// IO error reading config file
    Io(std::io::Error),
    /// TOML parsing error
    Parse(toml::de::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "Failed to read config file: {}", e),
            ConfigError::Parse(e) => write!(f, "Failed to parse config: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::Parse(e)
    }
}

/// Placeholder character marking variable positions in a masked pattern
pub const MASK_PLACEHOLDER: char = '#';

/// Which files of the target directory are picked up
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SelectionConfig {
    /// Plain glob used when no mask is set
    #[serde(default = "default_glob")]
    pub glob: String,
    /// Masked pattern; enables fragment grouping when present
    #[serde(default)]
    pub mask: Option<String>,
    /// Files whose name matches this glob are ignored
    #[serde(default)]
    pub exclude: Option<String>,
}

fn default_glob() -> String {
    "*.avi".to_string()
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self {
            glob: default_glob(),
            mask: None,
            exclude: None,
        }
    }
}

/// Transcoder invocation parameters
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TranscodeConfig {
    /// Path or name of the ffmpeg binary
    #[serde(default = "default_ffmpeg")]
    pub ffmpeg: String,
    /// CRF quality factor (lower is better quality)
    #[serde(default = "default_crf")]
    pub crf: u32,
    /// Encoder speed/quality preset
    #[serde(default = "default_preset")]
    pub preset: String,
    /// Video filter chain passed to `-vf`
    #[serde(default = "default_video_filter")]
    pub video_filter: String,
    /// Video codec passed to `-c:v`
    #[serde(default = "default_video_codec")]
    pub video_codec: String,
    /// Per-job timeout in seconds (0 = none)
    #[serde(default)]
    pub timeout_secs: u64,
}

fn default_ffmpeg() -> String {
    "ffmpeg".to_string()
}

fn default_crf() -> u32 {
    18
}

fn default_preset() -> String {
    "veryfast".to_string()
}

fn default_video_filter() -> String {
    "hqdn3d".to_string()
}

fn default_video_codec() -> String {
    "libx264".to_string()
}

impl Default for TranscodeConfig {
    fn default() -> Self {
        Self {
            ffmpeg: default_ffmpeg(),
            crf: default_crf(),
            preset: default_preset(),
            video_filter: default_video_filter(),
            video_codec: default_video_codec(),
            timeout_secs: 0,
        }
    }
}

/// Scheduler configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SchedulerConfig {
    /// Maximum concurrent transcoder processes (0 = auto-derive)
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: u32,
}

fn default_max_concurrency() -> u32 {
    3
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
        }
    }
}

/// Output handling configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OutputConfig {
    /// Overwrite outputs that already exist
    #[serde(default)]
    pub overwrite: bool,
    /// Move originals of successful batches into the archive directory
    #[serde(default)]
    pub archive_originals: bool,
    /// Annotate output names with the encoding parameters
    #[serde(default)]
    pub quality_naming: bool,
    /// Output directory name, relative to the target directory
    #[serde(default = "default_output_dir_name")]
    pub output_dir_name: String,
    /// Archive directory name, relative to the target directory
    #[serde(default = "default_archive_dir_name")]
    pub archive_dir_name: String,
}

fn default_output_dir_name() -> String {
    "transcoded".to_string()
}

fn default_archive_dir_name() -> String {
    "originals".to_string()
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            overwrite: false,
            archive_originals: false,
            quality_naming: false,
            output_dir_name: default_output_dir_name(),
            archive_dir_name: default_archive_dir_name(),
        }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub selection: SelectionConfig,
    #[serde(default)]
    pub transcode: TranscodeConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" => Some(true),
        "false" | "0" | "no" => Some(false),
        _ => None,
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Parses the file and fills missing optional fields with defaults.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::parse_toml(&content)
    }

    /// Parse configuration from a TOML string
    pub fn parse_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    /// Apply environment variable overrides to the configuration
    ///
    /// Overrides the following values if environment variables are set:
    /// - COMPACTOR_FFMPEG -> transcode.ffmpeg
    /// - COMPACTOR_CRF -> transcode.crf
    /// - COMPACTOR_PRESET -> transcode.preset
    /// - COMPACTOR_TIMEOUT_SECS -> transcode.timeout_secs
    /// - COMPACTOR_MAX_CONCURRENCY -> scheduler.max_concurrency
    /// - COMPACTOR_OVERWRITE -> output.overwrite
    /// - COMPACTOR_ARCHIVE_ORIGINALS -> output.archive_originals
    /// - COMPACTOR_QUALITY_NAMING -> output.quality_naming
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = env::var("COMPACTOR_FFMPEG") {
            if !val.is_empty() {
                self.transcode.ffmpeg = val;
            }
        }

        if let Ok(val) = env::var("COMPACTOR_CRF") {
            if let Ok(crf) = val.parse::<u32>() {
                self.transcode.crf = crf;
            }
        }

        if let Ok(val) = env::var("COMPACTOR_PRESET") {
            if !val.is_empty() {
                self.transcode.preset = val;
            }
        }

        if let Ok(val) = env::var("COMPACTOR_TIMEOUT_SECS") {
            if let Ok(secs) = val.parse::<u64>() {
                self.transcode.timeout_secs = secs;
            }
        }

        if let Ok(val) = env::var("COMPACTOR_MAX_CONCURRENCY") {
            if let Ok(jobs) = val.parse::<u32>() {
                self.scheduler.max_concurrency = jobs;
            }
        }

        // Invalid boolean values keep the existing setting
        if let Some(b) = env::var("COMPACTOR_OVERWRITE").ok().as_deref().and_then(parse_bool) {
            self.output.overwrite = b;
        }
        if let Some(b) = env::var("COMPACTOR_ARCHIVE_ORIGINALS")
            .ok()
            .as_deref()
            .and_then(parse_bool)
        {
            self.output.archive_originals = b;
        }
        if let Some(b) = env::var("COMPACTOR_QUALITY_NAMING")
            .ok()
            .as_deref()
            .and_then(parse_bool)
        {
            self.output.quality_naming = b;
        }
    }

    /// Load configuration from file and apply environment overrides
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = Self::load_from_file(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Defaults plus environment overrides, for runs without a config file
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }
}
