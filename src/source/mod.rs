//! Remote source retrieval.
//!
//! Playlists are fetched as text on every run; guide documents are cached on
//! disk and reused until the cache file is removed.

mod fetcher;

pub use fetcher::{FetchError, Fetcher};
