use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

use super::overrides::ManualOverrides;
use crate::config::{Config, ConfigError, MatchList};
use crate::playlist::{Channel, Liveness};
use crate::util::normalize_title;

// ============================================================================
// Outcome Types
// ============================================================================

/// Why a channel was left out of the curated collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RejectReason {
    NotAlive,
    ForcedOut,
    ExcludedGroup,
    ExcludedNameRegex,
    NotIncluded,
}

impl RejectReason {
    pub fn as_str(self) -> &'static str {
        match self {
            RejectReason::NotAlive => "not_alive",
            RejectReason::ForcedOut => "forced_out",
            RejectReason::ExcludedGroup => "excluded_group",
            RejectReason::ExcludedNameRegex => "excluded_name_regex",
            RejectReason::NotIncluded => "not_included",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Decision {
    Keep { forced: bool },
    Reject(RejectReason),
}

/// Result of applying the rule set to a channel collection.
#[derive(Debug)]
pub struct FilterOutcome {
    /// Accepted channels, in input order.
    pub kept: Vec<Channel>,
    /// Rejection counts keyed by reason.
    pub rejected: BTreeMap<String, usize>,
    /// Channels accepted by a forced-include rule.
    pub forced_in: usize,
    /// Channels rejected by a forced-exclude rule.
    pub forced_out: usize,
}

/// Filter stage diagnostics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterMetrics {
    pub input: usize,
    pub kept: usize,
    pub rejected: BTreeMap<String, usize>,
    pub forced_in: usize,
    pub forced_out: usize,
}

impl FilterOutcome {
    pub fn metrics(&self) -> FilterMetrics {
        FilterMetrics {
            input: self.kept.len() + self.rejected.values().sum::<usize>(),
            kept: self.kept.len(),
            rejected: self.rejected.clone(),
            forced_in: self.forced_in,
            forced_out: self.forced_out,
        }
    }
}

// ============================================================================
// Compiled Rules
// ============================================================================

fn compile_pattern(pattern: &str) -> Result<Regex, ConfigError> {
    RegexBuilder::new(pattern)
        .case_insensitive(true)
        .build()
        .map_err(|source| ConfigError::InvalidPattern {
            pattern: pattern.to_string(),
            source,
        })
}

fn compile_patterns<'a>(
    patterns: impl IntoIterator<Item = &'a String>,
) -> Result<Vec<Regex>, ConfigError> {
    patterns.into_iter().map(|p| compile_pattern(p)).collect()
}

/// One forced tier: exact IDs, exact titles, and patterns.
#[derive(Debug, Default)]
struct ForcedMatcher {
    station_ids: HashSet<String>,
    titles: HashSet<String>,
    patterns: Vec<Regex>,
}

impl ForcedMatcher {
    fn compile(lists: &[&MatchList]) -> Result<Self, ConfigError> {
        let mut matcher = Self::default();
        for list in lists {
            matcher.station_ids.extend(list.station_ids.iter().cloned());
            matcher
                .titles
                .extend(list.names.iter().map(|n| normalize_title(n)));
            matcher.patterns.extend(compile_patterns(&list.patterns)?);
        }
        Ok(matcher)
    }

    fn matches(&self, ch: &Channel) -> bool {
        if let Some(id) = &ch.station_id {
            if self.station_ids.contains(id) {
                return true;
            }
        }
        if !self.titles.is_empty() && self.titles.contains(&normalize_title(&ch.title)) {
            return true;
        }
        self.patterns.iter().any(|rx| rx.is_match(&ch.title))
    }

    fn len(&self) -> usize {
        self.station_ids.len() + self.titles.len() + self.patterns.len()
    }
}

/// Compiled, immutable include/exclude rule set.
///
/// Built once per run from the configuration and the manual override
/// document. Forced tiers are the union of both sources.
#[derive(Debug)]
pub struct RuleEngine {
    forced_include: ForcedMatcher,
    forced_exclude: ForcedMatcher,
    excluded_groups: HashSet<String>,
    excluded_names: Vec<Regex>,
    news_tokens: Vec<String>,
    include_patterns: Vec<Regex>,
}

impl RuleEngine {
    /// Compiles the rule set.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidPattern`] for the first pattern that is
    /// not a valid regular expression.
    pub fn new(config: &Config, overrides: &ManualOverrides) -> Result<Self, ConfigError> {
        let engine = Self {
            forced_include: ForcedMatcher::compile(&[&config.forced.include, &overrides.include])?,
            forced_exclude: ForcedMatcher::compile(&[&config.forced.exclude, &overrides.exclude])?,
            excluded_groups: config.exclude.group_title.iter().cloned().collect(),
            excluded_names: compile_patterns(&config.exclude.name_regex)?,
            news_tokens: config
                .include
                .news_allow_only
                .iter()
                .map(|t| t.to_lowercase())
                .filter(|t| !t.is_empty())
                .collect(),
            include_patterns: compile_patterns(
                config.include.networks.iter().chain(&config.include.specialty),
            )?,
        };

        tracing::debug!(
            forced_include = engine.forced_include.len(),
            forced_exclude = engine.forced_exclude.len(),
            include_patterns = engine.include_patterns.len(),
            "Compiled rule set"
        );
        Ok(engine)
    }

    /// Partitions `channels` into kept and rejected, first matching rule wins.
    pub fn apply(&self, channels: Vec<Channel>) -> FilterOutcome {
        let mut outcome = FilterOutcome {
            kept: Vec::with_capacity(channels.len()),
            rejected: BTreeMap::new(),
            forced_in: 0,
            forced_out: 0,
        };

        for ch in channels {
            match self.decide(&ch) {
                Decision::Keep { forced } => {
                    if forced {
                        outcome.forced_in += 1;
                    }
                    outcome.kept.push(ch);
                }
                Decision::Reject(reason) => {
                    if reason == RejectReason::ForcedOut {
                        outcome.forced_out += 1;
                    }
                    *outcome.rejected.entry(reason.as_str().to_string()).or_insert(0) += 1;
                }
            }
        }

        tracing::info!(
            kept = outcome.kept.len(),
            forced_in = outcome.forced_in,
            forced_out = outcome.forced_out,
            rejected = outcome.rejected.values().sum::<usize>(),
            "Applied channel rules"
        );
        outcome
    }

    fn decide(&self, ch: &Channel) -> Decision {
        if ch.liveness == Liveness::Dead {
            return Decision::Reject(RejectReason::NotAlive);
        }
        if self.forced_exclude.matches(ch) {
            return Decision::Reject(RejectReason::ForcedOut);
        }
        if self.excluded_groups.contains(&ch.group_label) {
            return Decision::Reject(RejectReason::ExcludedGroup);
        }
        if self.excluded_names.iter().any(|rx| rx.is_match(&ch.title)) {
            return Decision::Reject(RejectReason::ExcludedNameRegex);
        }
        if self.forced_include.matches(ch) {
            return Decision::Keep { forced: true };
        }
        if !self.news_tokens.is_empty() && ch.group_label.eq_ignore_ascii_case("news") {
            let title = ch.title.to_lowercase();
            return if self.news_tokens.iter().any(|t| title.contains(t.as_str())) {
                Decision::Keep { forced: false }
            } else {
                Decision::Reject(RejectReason::NotIncluded)
            };
        }
        if self.include_patterns.iter().any(|rx| rx.is_match(&ch.title)) {
            Decision::Keep { forced: false }
        } else {
            Decision::Reject(RejectReason::NotIncluded)
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn config_with(f: impl FnOnce(&mut Config)) -> Config {
        let mut config = Config::default();
        config.include.networks = vec!["^BBC".into(), "cnn".into()];
        f(&mut config);
        config
    }

    fn engine(config: &Config) -> RuleEngine {
        RuleEngine::new(config, &ManualOverrides::default()).unwrap()
    }

    fn titles(outcome: &FilterOutcome) -> Vec<&str> {
        outcome.kept.iter().map(|c| c.title.as_str()).collect()
    }

    #[test]
    fn test_include_patterns_are_case_insensitive_searches() {
        let engine = engine(&config_with(|_| {}));
        let outcome = engine.apply(vec![
            Channel::new("bbc One", "http://a"),
            Channel::new("Watch CNN Live", "http://b"),
            Channel::new("Film4", "http://c"),
        ]);
        assert_eq!(titles(&outcome), vec!["bbc One", "Watch CNN Live"]);
        assert_eq!(outcome.rejected.get("not_included"), Some(&1));
    }

    #[test]
    fn test_dead_channels_rejected_first() {
        let config = config_with(|c| c.forced.include.names = vec!["BBC One".into()]);
        let mut dead = Channel::new("BBC One", "http://a");
        dead.liveness = Liveness::Dead;
        let outcome = engine(&config).apply(vec![dead]);
        assert!(outcome.kept.is_empty());
        assert_eq!(outcome.rejected.get("not_alive"), Some(&1));
        assert_eq!(outcome.forced_in, 0);
    }

    #[test]
    fn test_unknown_liveness_is_not_rejected() {
        let outcome = engine(&config_with(|_| {})).apply(vec![Channel::new("BBC Two", "http://a")]);
        assert_eq!(outcome.kept.len(), 1);
    }

    #[test]
    fn test_forced_exclude_beats_forced_include() {
        let config = config_with(|c| {
            c.forced.include.station_ids = vec!["X.uk".into()];
            c.forced.exclude.station_ids = vec!["X.uk".into()];
        });
        let ch = Channel::new("BBC X", "http://a").with_station_id("X.uk");
        let outcome = engine(&config).apply(vec![ch]);
        assert!(outcome.kept.is_empty());
        assert_eq!(outcome.rejected.get("forced_out"), Some(&1));
        assert_eq!(outcome.forced_out, 1);
    }

    #[test]
    fn test_forced_station_id_is_case_sensitive() {
        let config = config_with(|c| c.forced.exclude.station_ids = vec!["bbc1".into()]);
        let ch = Channel::new("BBC One", "http://a").with_station_id("BBC1");
        assert_eq!(engine(&config).apply(vec![ch]).kept.len(), 1);
    }

    #[test]
    fn test_forced_name_matches_normalized_title() {
        let config = config_with(|c| c.forced.include.names = vec!["film4".into()]);
        let outcome = engine(&config).apply(vec![Channel::new("  FILM4 ", "http://a")]);
        assert_eq!(outcome.kept.len(), 1);
        assert_eq!(outcome.forced_in, 1);
    }

    #[test]
    fn test_excluded_group_and_name() {
        let config = config_with(|c| {
            c.exclude.group_title = vec!["Adult".into()];
            c.exclude.name_regex = vec!["radio".into()];
        });
        let outcome = engine(&config).apply(vec![
            Channel::new("BBC Late", "http://a").with_group("Adult"),
            Channel::new("BBC Radio 1", "http://b"),
            Channel::new("BBC One", "http://c").with_group("adult"),
        ]);
        assert_eq!(titles(&outcome), vec!["BBC One"]);
        assert_eq!(outcome.rejected.get("excluded_group"), Some(&1));
        assert_eq!(outcome.rejected.get("excluded_name_regex"), Some(&1));
    }

    #[test]
    fn test_exclusions_beat_forced_include() {
        let config = config_with(|c| {
            c.exclude.group_title = vec!["Adult".into()];
            c.forced.include.names = vec!["Late Show".into()];
        });
        let ch = Channel::new("Late Show", "http://a").with_group("Adult");
        let outcome = engine(&config).apply(vec![ch]);
        assert_eq!(outcome.rejected.get("excluded_group"), Some(&1));
    }

    #[test]
    fn test_news_allow_token_accepts() {
        let config = config_with(|c| {
            c.include.networks = vec![];
            c.include.news_allow_only = vec!["bbc".into()];
        });
        let ch = Channel::new("BBC World News", "http://a").with_group("News");
        let outcome = engine(&config).apply(vec![ch]);
        assert_eq!(outcome.kept.len(), 1);
    }

    #[test]
    fn test_news_without_token_not_included() {
        let config = config_with(|c| c.include.news_allow_only = vec!["cnn".into()]);
        // Would match the ^BBC network pattern, but the news gate decides first
        let ch = Channel::new("BBC World News", "http://a").with_group("news");
        let outcome = engine(&config).apply(vec![ch]);
        assert!(outcome.kept.is_empty());
        assert_eq!(outcome.rejected.get("not_included"), Some(&1));
    }

    #[test]
    fn test_empty_include_lists_reject_everything() {
        let mut config = Config::default();
        config.forced.include.station_ids = vec!["Keep.uk".into()];
        let outcome = RuleEngine::new(&config, &ManualOverrides::default())
            .unwrap()
            .apply(vec![
                Channel::new("Anything", "http://a"),
                Channel::new("Kept", "http://b").with_station_id("Keep.uk"),
            ]);
        assert_eq!(titles(&outcome), vec!["Kept"]);
    }

    #[test]
    fn test_manual_overrides_union_with_config() {
        let config = config_with(|_| {});
        let overrides = ManualOverrides {
            exclude: MatchList {
                patterns: vec!["parliament".into()],
                ..Default::default()
            },
            include: MatchList {
                names: vec!["Film4".into()],
                ..Default::default()
            },
        };
        let engine = RuleEngine::new(&config, &overrides).unwrap();
        let outcome = engine.apply(vec![
            Channel::new("BBC Parliament", "http://a"),
            Channel::new("Film4", "http://b"),
        ]);
        assert_eq!(titles(&outcome), vec!["Film4"]);
        assert_eq!(outcome.forced_out, 1);
        assert_eq!(outcome.forced_in, 1);
    }

    #[test]
    fn test_invalid_config_pattern_is_error() {
        let config = config_with(|c| c.exclude.name_regex = vec!["(unclosed".into()]);
        let err = RuleEngine::new(&config, &ManualOverrides::default()).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidPattern { ref pattern, .. } if pattern == "(unclosed"));
    }

    #[test]
    fn test_output_preserves_input_order() {
        let engine = engine(&config_with(|_| {}));
        let outcome = engine.apply(vec![
            Channel::new("CNN", "http://1"),
            Channel::new("Nope", "http://2"),
            Channel::new("BBC Four", "http://3"),
            Channel::new("BBC Alba", "http://4"),
        ]);
        assert_eq!(titles(&outcome), vec!["CNN", "BBC Four", "BBC Alba"]);
        let metrics = outcome.metrics();
        assert_eq!(metrics.input, 4);
        assert_eq!(metrics.kept, 3);
    }
}
