use std::collections::HashSet;

use crate::playlist::Channel;
use crate::util::normalize_key;

/// Guide lookup keys derived from the curated channel set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WantedKeys {
    /// Exact, case-sensitive guide station IDs.
    pub station_ids: HashSet<String>,
    /// Normalized display names and titles (see [`normalize_key`]).
    pub names: HashSet<String>,
    /// Distinct curated channels; the coverage denominator.
    pub channel_count: usize,
}

impl WantedKeys {
    pub fn from_channels(channels: &[Channel]) -> Self {
        let mut wanted = Self::default();
        let mut distinct = HashSet::new();

        for ch in channels {
            if let Some(id) = &ch.station_id {
                wanted.station_ids.insert(id.clone());
            }
            for name in [&ch.display_name, &ch.title] {
                let key = normalize_key(name);
                if !key.is_empty() {
                    wanted.names.insert(key);
                }
            }

            let identity = match &ch.station_id {
                Some(id) => format!("id:{}", id),
                None => format!("name:{}", normalize_key(&ch.title)),
            };
            distinct.insert(identity);
        }

        wanted.channel_count = distinct.len();
        wanted
    }

    pub fn is_empty(&self) -> bool {
        self.station_ids.is_empty() && self.names.is_empty()
    }

    pub fn wants_id(&self, id: &str) -> bool {
        self.station_ids.contains(id)
    }

    /// True when `name` normalizes to a wanted name.
    pub fn wants_name(&self, name: &str) -> bool {
        let key = normalize_key(name);
        !key.is_empty() && self.names.contains(&key)
    }
}
