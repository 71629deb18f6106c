use serde::Serialize;

/// Tri-state reachability classification of a stream URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Liveness {
    /// Not probed (validation mode `none`, or not yet validated).
    #[default]
    Unknown,
    /// A probe succeeded or was reclassified as alive.
    Alive,
    /// Every probe attempt failed.
    Dead,
}

/// A single playlist entry, normalized.
///
/// Created by the parser from an `#EXTINF` line and the URL line following
/// it. Only the validator mutates a channel (the `liveness*` fields); the
/// rule engine and the writer consume channels as-is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Channel {
    /// Guide-system identifier (`tvg-id`). `None` when absent or blank.
    pub station_id: Option<String>,
    /// Friendly label (`tvg-name`). Backfilled from `title` when blank.
    pub display_name: String,
    /// Category label (`group-title`), e.g. "News". May be empty.
    pub group_label: String,
    /// The name shown to viewers (text after the `#EXTINF` comma). Never empty.
    pub title: String,
    /// Channel logo URL (`tvg-logo`), carried through to the output.
    pub logo: Option<String>,
    /// Stream URL. Never empty.
    pub stream_url: String,
    /// The source document this entry came from.
    pub source_origin: String,
    pub liveness: Liveness,
    /// HTTP status of the last probe, if one completed.
    pub liveness_code: Option<u16>,
    /// Free-text probe diagnostic (e.g. `ok_200`, `soft_alive_403_405`, `timeout`).
    pub liveness_reason: String,
}

/// Deduplication identity: `(lowercased station id or title, stream url)`.
pub type IdentityKey = (String, String);

impl Channel {
    /// Builds a channel with unknown liveness.
    pub fn new(title: impl Into<String>, stream_url: impl Into<String>) -> Self {
        Self {
            station_id: None,
            display_name: String::new(),
            group_label: String::new(),
            title: title.into(),
            logo: None,
            stream_url: stream_url.into(),
            source_origin: String::new(),
            liveness: Liveness::Unknown,
            liveness_code: None,
            liveness_reason: String::new(),
        }
    }

    /// Two channels with the same key are the same broadcast instance.
    pub fn identity_key(&self) -> IdentityKey {
        let base = match &self.station_id {
            Some(id) => id.to_lowercase(),
            None => self.title.to_lowercase(),
        };
        (base, self.stream_url.clone())
    }

    pub fn with_station_id(mut self, id: impl Into<String>) -> Self {
        self.station_id = Some(id.into());
        self
    }

    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group_label = group.into();
        self
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = name.into();
        self
    }
}
