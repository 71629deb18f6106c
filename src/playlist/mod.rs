//! Playlist model, parsing, deduplication and rendering.
//!
//! - [`channel`] - The normalized [`Channel`] record and its identity key
//! - [`parser`] - Extended M3U text to channels, never failing on bad input
//! - [`dedupe`] - Order-preserving, first-occurrence-wins deduplication
//! - [`writer`] - Channels back to M3U text, byte-for-byte reproducible
//!
//! # Example
//!
//! ```
//! use streamledger::playlist::{dedupe, parse, render};
//!
//! let text = "#EXTM3U\n#EXTINF:-1 tvg-id=\"bbc1\",BBC One\nhttp://x/bbc1\n";
//! let channels = dedupe(parse(text, "example")).channels;
//! assert!(render(&channels, None).contains("tvg-id=\"bbc1\""));
//! ```

mod channel;
mod dedupe;
mod parser;
mod writer;

pub use channel::{Channel, IdentityKey, Liveness};
pub use dedupe::{dedupe, DedupeOutcome};
pub use parser::parse;
pub use writer::render;
