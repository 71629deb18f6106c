//! StreamLedger: curated IPTV playlists and matching XMLTV guides.
//!
//! The library exposes each pipeline component so the stages can be driven
//! individually; [`pipeline::Pipeline`] wires them together the way the
//! `streamledger` binary runs them.

pub mod config;
pub mod epg;
pub mod pipeline;
pub mod playlist;
pub mod report;
pub mod rules;
pub mod source;
pub mod util;
pub mod validator;
