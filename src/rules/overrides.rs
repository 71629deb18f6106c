//! Manual override document.
//!
//! The document is produced by hand (or by an external channel picker) and
//! lists channels that must always be kept or always be dropped:
//!
//! ```toml
//! [include]
//! station_ids = ["BBCOne.uk"]
//! names = ["Film4"]
//!
//! [exclude]
//! patterns = ["(?i)shopping"]
//! ```
//!
//! Loading never fails. Problems are logged and carried in
//! [`OverrideMetrics`] so the report shows why the overrides were ignored.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::config::MatchList;

const MAX_FILE_SIZE: u64 = 1_048_576;

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ManualOverrides {
    pub include: MatchList,
    pub exclude: MatchList,
}

/// Diagnostics for the `manual_overrides` report block.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverrideMetrics {
    pub path: Option<String>,
    pub found: bool,
    /// Rule entries on each side after invalid patterns were dropped.
    pub include_rules: usize,
    pub exclude_rules: usize,
    pub skipped_patterns: Vec<String>,
    /// Why the document was ignored, if it was.
    pub error: Option<String>,
}

impl OverrideMetrics {
    /// Report warnings for this block.
    pub fn warnings(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if let Some(error) = &self.error {
            warnings.push(format!("manual override document ignored: {}", error));
        }
        for pattern in &self.skipped_patterns {
            warnings.push(format!("skipped invalid override pattern '{}'", pattern));
        }
        warnings
    }
}

impl ManualOverrides {
    /// Reads the override document at `path`, if one is configured.
    ///
    /// A missing file is an empty override set. An unreadable or malformed
    /// document is treated as empty and recorded in the metrics. Patterns
    /// that do not compile are removed individually.
    pub fn load(path: Option<&Path>) -> (Self, OverrideMetrics) {
        let mut metrics = OverrideMetrics::default();
        let Some(path) = path else {
            return (Self::default(), metrics);
        };
        metrics.path = Some(path.display().to_string());

        let content = match read_document(path) {
            Ok(Some(content)) => content,
            Ok(None) => {
                tracing::debug!(path = %path.display(), "No manual override document");
                return (Self::default(), metrics);
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Could not read manual override document");
                metrics.found = true;
                metrics.error = Some(e);
                return (Self::default(), metrics);
            }
        };
        metrics.found = true;

        let mut overrides = match Self::parse(&content) {
            Ok(overrides) => overrides,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Invalid manual override document, ignoring");
                metrics.error = Some(e.to_string());
                return (Self::default(), metrics);
            }
        };

        for list in [&mut overrides.include, &mut overrides.exclude] {
            list.patterns.retain(|pattern| {
                match regex::RegexBuilder::new(pattern).case_insensitive(true).build() {
                    Ok(_) => true,
                    Err(e) => {
                        tracing::warn!(pattern = %pattern, error = %e, "Skipping invalid override pattern");
                        metrics.skipped_patterns.push(pattern.clone());
                        false
                    }
                }
            });
        }

        metrics.include_rules = overrides.include.len();
        metrics.exclude_rules = overrides.exclude.len();
        tracing::info!(
            path = %path.display(),
            include = metrics.include_rules,
            exclude = metrics.exclude_rules,
            "Loaded manual overrides"
        );
        (overrides, metrics)
    }

    pub fn parse(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }
}

fn read_document(path: &Path) -> Result<Option<String>, String> {
    match std::fs::metadata(path) {
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.to_string()),
        Ok(meta) if meta.len() > MAX_FILE_SIZE => {
            return Err(format!("document is {} bytes (max {})", meta.len(), MAX_FILE_SIZE));
        }
        Ok(_) => {}
    }
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(Some(content)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn scratch_file(name: &str, content: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "streamledger_overrides_{}_{}",
            name,
            std::process::id()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("manual_overrides.toml");
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_no_path_configured() {
        let (overrides, metrics) = ManualOverrides::load(None);
        assert_eq!(overrides, ManualOverrides::default());
        assert!(!metrics.found);
        assert!(metrics.warnings().is_empty());
    }

    #[test]
    fn test_missing_file_is_empty() {
        let path = Path::new("/tmp/streamledger_no_such_overrides.toml");
        let (overrides, metrics) = ManualOverrides::load(Some(path));
        assert!(overrides.include.is_empty());
        assert!(!metrics.found);
        assert!(metrics.error.is_none());
    }

    #[test]
    fn test_valid_document() {
        let path = scratch_file(
            "valid",
            "[include]\nstation_ids = [\"BBCOne.uk\"]\nnames = [\"Film4\"]\n\n[exclude]\npatterns = [\"shopping\"]\n",
        );
        let (overrides, metrics) = ManualOverrides::load(Some(&path));
        assert_eq!(overrides.include.station_ids, vec!["BBCOne.uk"]);
        assert_eq!(overrides.include.names, vec!["Film4"]);
        assert_eq!(overrides.exclude.patterns, vec!["shopping"]);
        assert_eq!(metrics.include_rules, 2);
        assert_eq!(metrics.exclude_rules, 1);

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_invalid_document_treated_as_empty() {
        let path = scratch_file("invalid", "[include\nstation_ids = oops");
        let (overrides, metrics) = ManualOverrides::load(Some(&path));
        assert_eq!(overrides, ManualOverrides::default());
        assert!(metrics.found);
        assert!(metrics.error.is_some());
        assert_eq!(metrics.warnings().len(), 1);

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_invalid_pattern_skipped() {
        let path = scratch_file("bad_pattern", "[exclude]\npatterns = [\"(unclosed\", \"ok\"]\n");
        let (overrides, metrics) = ManualOverrides::load(Some(&path));
        assert_eq!(overrides.exclude.patterns, vec!["ok"]);
        assert_eq!(metrics.skipped_patterns, vec!["(unclosed"]);
        assert!(metrics.warnings()[0].contains("(unclosed"));

        std::fs::remove_file(&path).ok();
    }
}
