//! Guide (XMLTV) correlation.
//!
//! - [`wanted`] - Lookup keys derived from the curated playlist
//! - [`correlator`] - Two-pass streaming extraction into a gzip guide

mod correlator;
mod wanted;

pub use correlator::{correlate, CorrelationMetrics, GuideError, GuideInput, SourceFailure};
pub use wanted::WantedKeys;
