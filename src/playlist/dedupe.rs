use std::collections::HashSet;

use super::channel::Channel;

/// Result of collapsing duplicate channels.
#[derive(Debug)]
pub struct DedupeOutcome {
    /// Surviving channels, in input order.
    pub channels: Vec<Channel>,
    /// Number of channels dropped as duplicates.
    pub dropped: usize,
}

/// Removes channels whose [`Channel::identity_key`] was already seen.
///
/// First occurrence wins and input order is preserved, so the result is
/// deterministic for a given source order.
pub fn dedupe(channels: Vec<Channel>) -> DedupeOutcome {
    let input_len = channels.len();
    let mut seen = HashSet::with_capacity(input_len);

    let kept: Vec<Channel> = channels
        .into_iter()
        .filter(|ch| seen.insert(ch.identity_key()))
        .collect();

    let dropped = input_len - kept.len();
    tracing::debug!(input = input_len, kept = kept.len(), dropped, "Deduplicated channels");

    DedupeOutcome {
        channels: kept,
        dropped,
    }
}
