//! Stage orchestration.
//!
//! The playlist stage runs fetch, parse, dedupe, validate, filter and write.
//! The guide stage reads the curated playlist back from disk and correlates
//! it against the guide sources. Each stage merges its diagnostics into the
//! report and saves it before any error is returned.

use std::path::PathBuf;
use thiserror::Error;

use crate::config::{Config, ConfigError, ValidationMode};
use crate::epg::{correlate, GuideError, GuideInput, SourceFailure, WantedKeys};
use crate::playlist::{dedupe, parse, render, Channel};
use crate::report::{
    classify_coverage, CoverageVerdict, DedupeMetrics, DownloadMetrics, Report, ReportError,
    StageMetrics,
};
use crate::rules::{ManualOverrides, RuleEngine};
use crate::source::{FetchError, Fetcher};
use crate::util::atomic_write;
use crate::validator::Validator;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("No playlist sources configured")]
    NoSources,

    #[error("All {0} playlist sources failed to download")]
    AllSourcesFailed(usize),

    #[error("Curated playlist not found at {}; run the playlist stage first", .0.display())]
    CuratedPlaylistMissing(PathBuf),

    #[error("Guide coverage {coverage:.2} is below the hard floor {floor:.2}")]
    CoverageBelowFloor { coverage: f64, floor: f64 },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Guide(#[from] GuideError),

    #[error(transparent)]
    Report(#[from] ReportError),

    #[error("Failed to write output: {0}")]
    Io(#[from] std::io::Error),

    #[error("Guide task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Result of a successful playlist stage.
#[derive(Debug, Clone)]
pub struct PlaylistSummary {
    pub curated: usize,
    pub path: PathBuf,
}

/// Result of a successful guide stage.
#[derive(Debug, Clone)]
pub struct GuideSummary {
    pub matched: usize,
    pub coverage: f64,
    pub path: PathBuf,
}

pub struct Pipeline {
    config: Config,
    mode: ValidationMode,
}

impl Pipeline {
    /// `mode` is the already-resolved validation mode for this run.
    pub fn new(config: Config, mode: ValidationMode) -> Self {
        Self { config, mode }
    }

    /// Runs the playlist stage, then the guide stage.
    pub async fn run_all(&self) -> Result<(PlaylistSummary, GuideSummary), PipelineError> {
        let playlist = self.run_playlist().await?;
        let guide = self.run_epg().await?;
        Ok((playlist, guide))
    }

    /// Builds `curated.m3u` from the configured playlist sources.
    ///
    /// # Errors
    ///
    /// - [`PipelineError::NoSources`] - nothing configured; no request is made
    /// - [`PipelineError::Config`] - an include/exclude pattern is invalid
    /// - [`PipelineError::AllSourcesFailed`] - no source could be downloaded
    /// - [`PipelineError::Io`] - the curated playlist could not be written
    pub async fn run_playlist(&self) -> Result<PlaylistSummary, PipelineError> {
        let cfg = &self.config;
        if cfg.sources.m3u.is_empty() {
            return Err(PipelineError::NoSources);
        }

        let (overrides, override_metrics) =
            ManualOverrides::load(cfg.pipeline.overrides_file.as_deref());
        let engine = RuleEngine::new(cfg, &overrides)?;
        let fetcher = Fetcher::new(
            &cfg.pipeline.user_agent,
            cfg.pipeline.fetch_timeout(),
            &cfg.pipeline.cache_dir,
        )?;
        let validator = Validator::new(&cfg.pipeline.user_agent, cfg.validation.clone())?;

        let report_path = cfg.pipeline.report_path();
        let mut report = Report::load_or_default(&report_path);
        self.stamp(&mut report);

        // Download and parse
        let mut download = DownloadMetrics {
            sources: cfg.sources.m3u.len(),
            ..Default::default()
        };
        let mut download_warnings = Vec::new();
        let mut channels: Vec<Channel> = Vec::new();

        for url in &cfg.sources.m3u {
            match fetcher.fetch_text(url, None).await {
                Ok(text) => {
                    let parsed = parse(&text, url);
                    tracing::info!(url = %url, channels = parsed.len(), "Parsed playlist source");
                    download.succeeded += 1;
                    channels.extend(parsed);
                }
                Err(e) => {
                    tracing::warn!(url = %url, error = %e, "Playlist source failed");
                    download_warnings.push(format!("{} failed: {}", url, e));
                    download.failed.push(SourceFailure {
                        source: url.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }
        download.channels_parsed = channels.len();

        let succeeded = download.succeeded;
        report.merge_stage(StageMetrics::Download(download), download_warnings);
        if succeeded == 0 {
            report.save(&report_path)?;
            return Err(PipelineError::AllSourcesFailed(cfg.sources.m3u.len()));
        }

        // Dedupe
        let input = channels.len();
        let outcome = dedupe(channels);
        let mut channels = outcome.channels;
        report.merge_stage(
            StageMetrics::Dedupe(DedupeMetrics {
                input,
                kept: channels.len(),
                dropped: outcome.dropped,
            }),
            Vec::new(),
        );

        // Validate
        let validation = validator.validate(&mut channels, self.mode).await;
        report.merge_stage(StageMetrics::Validation(validation), Vec::new());

        // Filter
        let filtered = engine.apply(channels);
        let curated = filtered.kept.len();
        let mut filter_warnings = Vec::new();
        let (min, max) = (cfg.pipeline.min_channels, cfg.pipeline.max_channels);
        if curated < min || curated > max {
            tracing::warn!(curated, min, max, "Curated channel count outside expected range");
            filter_warnings.push(format!(
                "curated channel count {} outside expected range [{}, {}]",
                curated, min, max
            ));
        }
        report.merge_stage(StageMetrics::Filter(filtered.metrics()), filter_warnings);
        let override_warnings = override_metrics.warnings();
        report.merge_stage(StageMetrics::ManualOverrides(override_metrics), override_warnings);

        // Write
        let path = cfg.pipeline.curated_playlist_path();
        let text = render(&filtered.kept, cfg.pipeline.tvg_url.as_deref());
        let written = atomic_write(&path, text.as_bytes());
        if let Err(e) = written {
            report.save(&report_path)?;
            return Err(PipelineError::Io(e));
        }
        tracing::info!(path = %path.display(), channels = curated, "Wrote curated playlist");

        report.recompute_coverage(curated, cfg.thresholds.epg_coverage_soft_min);
        report.save(&report_path)?;

        Ok(PlaylistSummary { curated, path })
    }

    /// Builds `curated_epg.xml.gz` for the channels in `curated.m3u`.
    ///
    /// # Errors
    ///
    /// - [`PipelineError::CuratedPlaylistMissing`] - the playlist stage has not run
    /// - [`PipelineError::CoverageBelowFloor`] - raised after the report is saved
    /// - [`PipelineError::Guide`] - the curated guide could not be written
    pub async fn run_epg(&self) -> Result<GuideSummary, PipelineError> {
        let cfg = &self.config;
        let playlist_path = cfg.pipeline.curated_playlist_path();
        let text = match tokio::fs::read_to_string(&playlist_path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(PipelineError::CuratedPlaylistMissing(playlist_path));
            }
            Err(e) => return Err(PipelineError::Io(e)),
        };

        let curated = parse(&text, &playlist_path.display().to_string());
        let wanted = WantedKeys::from_channels(&curated);
        let mut warnings = Vec::new();
        if wanted.is_empty() {
            tracing::warn!(path = %playlist_path.display(), "Curated playlist has no guide keys");
            warnings.push("curated playlist has no station IDs or names".to_string());
        }
        if cfg.sources.epg.is_empty() {
            warnings.push("no guide sources configured".to_string());
        }

        let report_path = cfg.pipeline.report_path();
        let mut report = Report::load_or_default(&report_path);
        self.stamp(&mut report);

        // Download
        let fetcher = Fetcher::new(
            &cfg.pipeline.user_agent,
            cfg.pipeline.fetch_timeout(),
            cfg.pipeline.guide_cache_dir(),
        )?;
        let mut inputs = Vec::new();
        let mut download_failures = Vec::new();
        for url in &cfg.sources.epg {
            match fetcher.fetch_cached(url).await {
                Ok(path) => inputs.push(GuideInput {
                    origin: url.clone(),
                    path,
                }),
                Err(e) => {
                    tracing::warn!(url = %url, error = %e, "Guide source download failed");
                    download_failures.push(SourceFailure {
                        source: url.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        // Correlate
        let output = cfg.pipeline.curated_guide_path();
        let task_output = output.clone();
        let correlated =
            tokio::task::spawn_blocking(move || correlate(&wanted, &inputs, &task_output)).await?;
        let mut metrics = match correlated {
            Ok(metrics) => metrics,
            Err(e) => {
                report.save(&report_path)?;
                return Err(PipelineError::Guide(e));
            }
        };

        metrics.sources = cfg.sources.epg.len();
        download_failures.append(&mut metrics.sources_failed);
        metrics.sources_failed = download_failures;
        warnings.extend(
            metrics
                .sources_failed
                .iter()
                .map(|f| format!("{} failed: {}", f.source, f.reason)),
        );

        let matched = metrics.matched_channels;
        report.merge_stage(StageMetrics::Epg(metrics), warnings);
        let thresholds = &cfg.thresholds;
        let coverage = report
            .recompute_coverage(curated.len(), thresholds.epg_coverage_soft_min)
            .unwrap_or(0.0);
        report.save(&report_path)?;

        if classify_coverage(coverage, thresholds) == CoverageVerdict::Fail {
            tracing::error!(
                coverage,
                floor = thresholds.epg_coverage_hard_fail,
                "Guide coverage below hard floor"
            );
            return Err(PipelineError::CoverageBelowFloor {
                coverage,
                floor: thresholds.epg_coverage_hard_fail,
            });
        }

        Ok(GuideSummary {
            matched,
            coverage,
            path: output,
        })
    }

    fn stamp(&self, report: &mut Report) {
        report.generated_at = Some(chrono::Utc::now());
        report.validation_mode = Some(self.mode.as_str().to_string());
    }
}
