//! Utility functions shared across pipeline stages.
//!
//! This module provides reusable utilities for:
//!
//! - **Text normalization**: whitespace collapsing and matching keys used by
//!   the parser, the rule engine and the guide correlator
//! - **URL handling**: source URL validation and deterministic cache paths
//! - **Atomic writes**: write-to-temp-then-rename for every output file
//!
//! # Examples
//!
//! ```
//! use streamledger::util::{collapse_whitespace, normalize_key};
//!
//! assert_eq!(collapse_whitespace(" BBC  One "), "BBC One");
//! assert_eq!(normalize_key("BBC One (HD)"), "bbconehd");
//! ```

mod fs;
mod source_url;
mod text;

pub use fs::{atomic_write, part_path};
pub use source_url::{cache_path, validate_source_url, UrlValidationError};
pub use text::{collapse_whitespace, normalize_key, normalize_title};
