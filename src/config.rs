//! Configuration file parser for `streamledger.toml`.
//!
//! The config file is optional: a missing file yields `Config::default()`.
//! Unknown top-level keys are ignored by serde, though we log a warning when
//! the file contains potential typos.
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// Config file exceeds maximum allowed size.
    #[error("Config file too large: {0}")]
    TooLarge(String),

    /// An include/exclude pattern is not a valid regular expression.
    #[error("Invalid pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// Top-level pipeline configuration.
///
/// All sections use `#[serde(default)]` so any subset of keys can be
/// specified. Missing keys fall back to `Default::default()`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub pipeline: PipelineConfig,
    pub sources: SourcesConfig,
    pub validation: ValidationConfig,
    pub include: IncludeConfig,
    pub exclude: ExcludeConfig,
    pub forced: ForcedConfig,
    pub thresholds: ThresholdsConfig,
}

/// General pipeline settings: identity, locations, expected size.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// User-Agent sent with every request.
    pub user_agent: String,
    /// Curated channel count below this is reported as a warning.
    pub min_channels: usize,
    /// Curated channel count above this is reported as a warning.
    pub max_channels: usize,
    /// Directory receiving `curated.m3u`, `curated_epg.xml.gz` and `report.json`.
    pub output_dir: PathBuf,
    /// Directory holding downloaded source copies.
    pub cache_dir: PathBuf,
    /// Timeout for source downloads, in seconds.
    pub fetch_timeout_secs: u64,
    /// Guide URL advertised in the curated playlist header (`url-tvg`).
    pub tvg_url: Option<String>,
    /// Manual override document. Absent file means no manual overrides.
    pub overrides_file: Option<PathBuf>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            user_agent: "StreamLedger/1.0".to_string(),
            min_channels: 400,
            max_channels: 500,
            output_dir: PathBuf::from("outputs"),
            cache_dir: PathBuf::from("cache"),
            fetch_timeout_secs: 30,
            tvg_url: None,
            overrides_file: Some(PathBuf::from("config/manual_overrides.toml")),
        }
    }
}

impl PipelineConfig {
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn curated_playlist_path(&self) -> PathBuf {
        self.output_dir.join("curated.m3u")
    }

    pub fn curated_guide_path(&self) -> PathBuf {
        self.output_dir.join("curated_epg.xml.gz")
    }

    pub fn report_path(&self) -> PathBuf {
        self.output_dir.join("report.json")
    }

    pub fn guide_cache_dir(&self) -> PathBuf {
        self.cache_dir.join("epg")
    }
}

/// Remote source lists, processed in order.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SourcesConfig {
    pub m3u: Vec<String>,
    pub epg: Vec<String>,
}

/// How stream liveness is checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ValidationMode {
    /// No network probes; every channel stays `unknown`.
    None,
    /// Minimal HEAD probe.
    #[default]
    Light,
    /// HEAD probe with a larger byte range and more patience.
    Deep,
}

impl ValidationMode {
    pub fn as_str(self) -> &'static str {
        match self {
            ValidationMode::None => "none",
            ValidationMode::Light => "light",
            ValidationMode::Deep => "deep",
        }
    }

    /// Interprets a `VALIDATION_MODE` environment value.
    ///
    /// Unrecognized values fall back to `light` with a warning rather than
    /// failing the run.
    pub fn from_env_value(value: &str) -> Self {
        value.parse().unwrap_or_else(|_| {
            tracing::warn!(value = %value, "Unknown VALIDATION_MODE, using light");
            ValidationMode::Light
        })
    }

    /// Effective mode: CLI flag, then `VALIDATION_MODE`, then the config file.
    pub fn resolve(cli: Option<Self>, env: Option<&str>, configured: Self) -> Self {
        match (cli, env) {
            (Some(mode), _) => mode,
            (None, Some(value)) if !value.trim().is_empty() => Self::from_env_value(value),
            _ => configured,
        }
    }
}

impl FromStr for ValidationMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" => Ok(ValidationMode::None),
            "light" => Ok(ValidationMode::Light),
            "deep" => Ok(ValidationMode::Deep),
            other => Err(format!("unknown validation mode: {}", other)),
        }
    }
}

/// Per-mode probe policy.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProbeSettings {
    pub timeout_secs: u64,
    /// Additional attempts after the first failed probe.
    pub retries: u32,
    /// Byte range requested with the probe, e.g. `"0-0"`.
    pub range_bytes: Option<String>,
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self {
            timeout_secs: 6,
            retries: 1,
            range_bytes: Some("0-0".to_string()),
        }
    }
}

impl ProbeSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    pub mode: ValidationMode,
    /// Treat 403/405 probe answers as alive.
    pub soft_alive_on_403_405: bool,
    /// Maximum number of probes in flight.
    pub concurrency: usize,
    pub light: ProbeSettings,
    pub deep: ProbeSettings,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            mode: ValidationMode::Light,
            soft_alive_on_403_405: true,
            concurrency: 16,
            light: ProbeSettings::default(),
            deep: ProbeSettings {
                timeout_secs: 12,
                retries: 2,
                range_bytes: Some("0-65535".to_string()),
            },
        }
    }
}

impl ValidationConfig {
    /// Probe settings for `mode`, or `None` when validation is disabled.
    pub fn settings_for(&self, mode: ValidationMode) -> Option<&ProbeSettings> {
        match mode {
            ValidationMode::None => None,
            ValidationMode::Light => Some(&self.light),
            ValidationMode::Deep => Some(&self.deep),
        }
    }
}

/// Ordinary include policy. Patterns are case-insensitive regex searches.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct IncludeConfig {
    pub networks: Vec<String>,
    pub specialty: Vec<String>,
    /// Substring tokens a "News" channel title must contain to be kept.
    pub news_allow_only: Vec<String>,
}

/// Ordinary exclude policy.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ExcludeConfig {
    /// Exact group labels to drop.
    pub group_title: Vec<String>,
    pub name_regex: Vec<String>,
}

/// Exact and pattern conditions for one side of a forced tier.
///
/// Shared by the config's `[forced.*]` sections and the manual override
/// document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct MatchList {
    /// Exact, case-sensitive station IDs.
    pub station_ids: Vec<String>,
    /// Exact titles, compared case-insensitively.
    pub names: Vec<String>,
    pub patterns: Vec<String>,
}

impl MatchList {
    pub fn is_empty(&self) -> bool {
        self.station_ids.is_empty() && self.names.is_empty() && self.patterns.is_empty()
    }

    pub fn len(&self) -> usize {
        self.station_ids.len() + self.names.len() + self.patterns.len()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ForcedConfig {
    pub include: MatchList,
    pub exclude: MatchList,
}

/// Guide coverage gates.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ThresholdsConfig {
    /// Coverage below this is reported as a warning.
    pub epg_coverage_soft_min: f64,
    /// Coverage below this aborts the run.
    pub epg_coverage_hard_fail: f64,
}

impl Default for ThresholdsConfig {
    fn default() -> Self {
        Self {
            epg_coverage_soft_min: 0.80,
            epg_coverage_hard_fail: 0.30,
        }
    }
}

impl Config {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    /// Top-level sections recognized in the config file.
    const KNOWN_SECTIONS: [&'static str; 7] = [
        "pipeline",
        "sources",
        "validation",
        "include",
        "exclude",
        "forced",
        "thresholds",
    ];

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Unknown keys → silently accepted (serde default behavior), logged as warning
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "Config file disappeared, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        Self::from_toml_str(&content, path)
    }

    /// Parses configuration from TOML text. `origin` is used for logging only.
    pub fn from_toml_str(content: &str, origin: &Path) -> Result<Self, ConfigError> {
        if content.trim().is_empty() {
            tracing::debug!(path = %origin.display(), "Config file is empty, using defaults");
            return Ok(Self::default());
        }

        if let Ok(raw) = content.parse::<toml::Table>() {
            for key in raw.keys() {
                if !Self::KNOWN_SECTIONS.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
        }

        let config: Config = toml::from_str(content)?;
        config.warn_on_inconsistencies();
        tracing::info!(
            path = %origin.display(),
            m3u_sources = config.sources.m3u.len(),
            epg_sources = config.sources.epg.len(),
            mode = config.validation.mode.as_str(),
            "Loaded configuration"
        );
        Ok(config)
    }

    fn warn_on_inconsistencies(&self) {
        let t = &self.thresholds;
        if t.epg_coverage_hard_fail > t.epg_coverage_soft_min {
            tracing::warn!(
                hard_fail = t.epg_coverage_hard_fail,
                soft_min = t.epg_coverage_soft_min,
                "Hard-fail coverage floor is above the soft minimum"
            );
        }
        if self.pipeline.min_channels > self.pipeline.max_channels {
            tracing::warn!(
                min = self.pipeline.min_channels,
                max = self.pipeline.max_channels,
                "min_channels exceeds max_channels; every run will warn"
            );
        }
        if self.validation.concurrency == 0 {
            tracing::warn!("validation.concurrency is 0, probes will run one at a time");
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
