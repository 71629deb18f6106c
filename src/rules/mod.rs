//! Channel selection rules.
//!
//! - [`engine`] - Compiled include/exclude rule set and its evaluation order
//! - [`overrides`] - The manual override document feeding the forced tiers

mod engine;
mod overrides;

pub use engine::{FilterMetrics, FilterOutcome, RejectReason, RuleEngine};
pub use overrides::{ManualOverrides, OverrideMetrics};
