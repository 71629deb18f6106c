//! Run report (`report.json`).
//!
//! Each stage contributes one typed block. Stages run as separate
//! invocations, so the report is read, updated for the current stage, and
//! written back: blocks from other stages survive untouched.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

use crate::config::ThresholdsConfig;
use crate::epg::{CorrelationMetrics, SourceFailure};
use crate::rules::{FilterMetrics, OverrideMetrics};
use crate::util::atomic_write;
use crate::validator::ValidationMetrics;

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("Failed to write report: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to serialize report: {0}")]
    Serialize(#[from] serde_json::Error),
}

// ============================================================================
// Stage Blocks
// ============================================================================

/// Playlist download diagnostics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadMetrics {
    pub sources: usize,
    pub succeeded: usize,
    pub failed: Vec<SourceFailure>,
    pub channels_parsed: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DedupeMetrics {
    pub input: usize,
    pub kept: usize,
    pub dropped: usize,
}

/// Guide coverage relative to the curated playlist.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CoverageSummary {
    pub matched_channels: usize,
    pub curated_channels: usize,
    pub coverage: f64,
    pub soft_min: f64,
}

/// One stage's contribution to the report.
#[derive(Debug, Clone)]
pub enum StageMetrics {
    Download(DownloadMetrics),
    Dedupe(DedupeMetrics),
    Validation(ValidationMetrics),
    Filter(FilterMetrics),
    ManualOverrides(OverrideMetrics),
    Epg(CorrelationMetrics),
}

impl StageMetrics {
    /// Block name, also used as the warning prefix.
    pub fn stage(&self) -> &'static str {
        match self {
            StageMetrics::Download(_) => "download",
            StageMetrics::Dedupe(_) => "dedupe",
            StageMetrics::Validation(_) => "validation",
            StageMetrics::Filter(_) => "filter",
            StageMetrics::ManualOverrides(_) => "manual_overrides",
            StageMetrics::Epg(_) => "epg",
        }
    }
}

// ============================================================================
// Report
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Report {
    pub generated_at: Option<DateTime<Utc>>,
    pub validation_mode: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download: Option<DownloadMetrics>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dedupe: Option<DedupeMetrics>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validation: Option<ValidationMetrics>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter: Option<FilterMetrics>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manual_overrides: Option<OverrideMetrics>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub epg: Option<CorrelationMetrics>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coverage: Option<CoverageSummary>,
    pub warnings: Vec<String>,
}

/// Outcome of checking coverage against the configured thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoverageVerdict {
    Pass,
    /// Below the soft minimum: reported, run continues.
    Warn,
    /// Below the hard floor: the run fails once the report is saved.
    Fail,
}

/// Classifies a coverage value.
pub fn classify_coverage(coverage: f64, thresholds: &ThresholdsConfig) -> CoverageVerdict {
    if coverage < thresholds.epg_coverage_hard_fail {
        CoverageVerdict::Fail
    } else if coverage < thresholds.epg_coverage_soft_min {
        CoverageVerdict::Warn
    } else {
        CoverageVerdict::Pass
    }
}

const COVERAGE_WARNING_PREFIX: &str = "epg: coverage ";

impl Report {
    /// Loads the prior report, or starts a fresh one.
    ///
    /// A corrupt or unreadable prior report is logged and discarded rather
    /// than failing the stage.
    pub fn load_or_default(path: &Path) -> Self {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Self::default(),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Could not read prior report, starting fresh");
                return Self::default();
            }
        };

        match serde_json::from_str(&content) {
            Ok(report) => report,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Discarding corrupt prior report");
                Self::default()
            }
        }
    }

    /// Replaces one stage's block and that stage's warnings.
    pub fn merge_stage(&mut self, metrics: StageMetrics, warnings: Vec<String>) {
        let stage = metrics.stage();
        let prefix = format!("{}: ", stage);
        self.warnings.retain(|w| !w.starts_with(&prefix));
        self.warnings
            .extend(warnings.into_iter().map(|w| format!("{}{}", prefix, w)));

        match metrics {
            StageMetrics::Download(m) => self.download = Some(m),
            StageMetrics::Dedupe(m) => self.dedupe = Some(m),
            StageMetrics::Validation(m) => self.validation = Some(m),
            StageMetrics::Filter(m) => self.filter = Some(m),
            StageMetrics::ManualOverrides(m) => self.manual_overrides = Some(m),
            StageMetrics::Epg(m) => self.epg = Some(m),
        }
    }

    /// Recomputes the coverage summary from the guide block and the number
    /// of channels in the curated playlist.
    ///
    /// Coverage is matched guide channels over `curated`, clamped to 1.0,
    /// and 0 when nothing was curated. Returns `None` (and clears the
    /// summary) until the guide stage has run.
    pub fn recompute_coverage(&mut self, curated: usize, soft_min: f64) -> Option<f64> {
        self.warnings.retain(|w| !w.starts_with(COVERAGE_WARNING_PREFIX));

        let Some(epg) = &self.epg else {
            self.coverage = None;
            return None;
        };
        let coverage = if curated == 0 {
            0.0
        } else {
            (epg.matched_channels as f64 / curated as f64).min(1.0)
        };

        if coverage < soft_min {
            self.warnings.push(format!(
                "{}{:.2} is below the soft minimum {:.2}",
                COVERAGE_WARNING_PREFIX, coverage, soft_min
            ));
        }

        self.coverage = Some(CoverageSummary {
            matched_channels: epg.matched_channels,
            curated_channels: curated,
            coverage,
            soft_min,
        });
        Some(coverage)
    }

    /// Writes the report as pretty JSON, atomically.
    pub fn save(&self, path: &Path) -> Result<(), ReportError> {
        let mut json = serde_json::to_vec_pretty(self)?;
        json.push(b'\n');
        atomic_write(path, &json)?;
        tracing::info!(path = %path.display(), warnings = self.warnings.len(), "Saved report");
        Ok(())
    }
}
