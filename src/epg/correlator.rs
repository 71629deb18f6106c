use flate2::read::MultiGzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

use super::wanted::WantedKeys;
use crate::util::part_path;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

const XML_HEADER: &[u8] = b"<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<tv>\n";
const XML_FOOTER: &[u8] = b"</tv>\n";

/// Errors raised while correlating guide documents.
///
/// Only [`GuideError::Output`] is fatal. Every other variant is scoped to a
/// single source, which is recorded as failed while the rest continue.
#[derive(Debug, Error)]
pub enum GuideError {
    /// Source file could not be opened or decompressed
    #[error("Failed to open guide source: {0}")]
    Open(std::io::Error),
    /// Source document is not well-formed XML
    #[error("Malformed guide document: {0}")]
    Xml(#[from] quick_xml::Error),
    /// Source ended inside an element
    #[error("Guide document ended inside <{0}>")]
    UnexpectedEof(String),
    /// Writing the curated guide failed
    #[error("Failed to write curated guide: {0}")]
    Output(std::io::Error),
}

/// A downloaded guide document, in priority order.
#[derive(Debug, Clone)]
pub struct GuideInput {
    /// Where the document came from (usually its URL).
    pub origin: String,
    pub path: PathBuf,
}

/// A guide source that failed to download or parse, and why.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceFailure {
    pub source: String,
    pub reason: String,
}

/// Guide stage diagnostics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CorrelationMetrics {
    pub sources: usize,
    pub sources_failed: Vec<SourceFailure>,
    pub wanted_ids: usize,
    pub wanted_names: usize,
    pub wanted_channels: usize,
    pub matched_channels: usize,
    pub matched_by_id: usize,
    pub matched_by_name: usize,
    pub programmes_written: usize,
    pub programmes_skipped: usize,
    /// Matched channels over distinct wanted channels, at most 1.0.
    pub coverage: f64,
}

impl CorrelationMetrics {
    fn record_failure(&mut self, origin: &str, error: &GuideError) {
        if self.sources_failed.iter().any(|f| f.source == origin) {
            return;
        }
        tracing::warn!(source = %origin, error = %error, "Guide source failed");
        self.sources_failed.push(SourceFailure {
            source: origin.to_string(),
            reason: error.to_string(),
        });
    }
}

/// Streams guide sources and writes the matching subset to `output_path`.
///
/// Runs two passes over the inputs in order. The first pass keeps every
/// top-level `<channel>` whose `id` is wanted or whose `<display-name>`
/// normalizes to a wanted name; the first source offering an id wins. The
/// second pass keeps `<programme>` elements for kept ids, taken from the
/// same source that supplied the channel.
///
/// Elements are copied byte-for-byte. Only the element under inspection is
/// ever held in memory, so guide size does not bound memory use.
///
/// The output is gzip-compressed and written to `<output>.part` first, then
/// renamed into place.
///
/// # Errors
///
/// Returns [`GuideError::Output`] when the output cannot be written. Source
/// problems are recorded in [`CorrelationMetrics::sources_failed`] instead.
pub fn correlate(
    wanted: &WantedKeys,
    inputs: &[GuideInput],
    output_path: &Path,
) -> Result<CorrelationMetrics, GuideError> {
    let mut metrics = CorrelationMetrics {
        sources: inputs.len(),
        wanted_ids: wanted.station_ids.len(),
        wanted_names: wanted.names.len(),
        wanted_channels: wanted.channel_count,
        ..Default::default()
    };

    if let Some(parent) = output_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(GuideError::Output)?;
        }
    }
    let temp_path = part_path(output_path);

    let result = write_guide(wanted, inputs, &temp_path, &mut metrics)
        .and_then(|()| std::fs::rename(&temp_path, output_path).map_err(GuideError::Output));
    if let Err(e) = result {
        let _ = std::fs::remove_file(&temp_path);
        return Err(e);
    }

    metrics.coverage = if metrics.wanted_channels == 0 {
        0.0
    } else {
        (metrics.matched_channels as f64 / metrics.wanted_channels as f64).min(1.0)
    };

    tracing::info!(
        sources = metrics.sources,
        failed = metrics.sources_failed.len(),
        matched = metrics.matched_channels,
        by_id = metrics.matched_by_id,
        by_name = metrics.matched_by_name,
        programmes = metrics.programmes_written,
        coverage = metrics.coverage,
        output = %output_path.display(),
        "Wrote curated guide"
    );
    Ok(metrics)
}

fn write_guide(
    wanted: &WantedKeys,
    inputs: &[GuideInput],
    temp_path: &Path,
    metrics: &mut CorrelationMetrics,
) -> Result<(), GuideError> {
    let file = File::create(temp_path).map_err(GuideError::Output)?;
    let mut out = GzEncoder::new(BufWriter::new(file), Compression::default());
    out.write_all(XML_HEADER).map_err(GuideError::Output)?;

    // Kept station id -> index of the source that supplied it
    let mut kept: HashMap<String, usize> = HashMap::new();

    for (index, input) in inputs.iter().enumerate() {
        match scan_channels(input, index, wanted, &mut kept, &mut out, metrics) {
            Ok(()) => {}
            Err(e @ GuideError::Output(_)) => return Err(e),
            Err(e) => metrics.record_failure(&input.origin, &e),
        }
    }

    for (index, input) in inputs.iter().enumerate() {
        if !kept.values().any(|&source| source == index) {
            continue;
        }
        match copy_programmes(input, index, &kept, &mut out, metrics) {
            Ok(()) => {}
            Err(e @ GuideError::Output(_)) => return Err(e),
            Err(e) => metrics.record_failure(&input.origin, &e),
        }
    }

    out.write_all(XML_FOOTER).map_err(GuideError::Output)?;
    let writer = out.finish().map_err(GuideError::Output)?;
    let file = writer
        .into_inner()
        .map_err(|e| GuideError::Output(e.into_error()))?;
    file.sync_all().map_err(GuideError::Output)?;
    Ok(())
}

// ============================================================================
// Pass 1: channels
// ============================================================================

fn scan_channels<W: Write>(
    input: &GuideInput,
    index: usize,
    wanted: &WantedKeys,
    kept: &mut HashMap<String, usize>,
    out: &mut W,
    metrics: &mut CorrelationMetrics,
) -> Result<(), GuideError> {
    let mut reader = open_guide(&input.path)?;
    let mut buf = Vec::new();
    let mut scratch = Vec::new();
    let mut depth: usize = 0;

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) if depth == 1 && e.name().as_ref() == b"channel" => {
                let id = attribute(&reader, &e, b"id");
                let mut names = Vec::new();
                let element = capture_element(&mut reader, &e, &mut scratch, Some(&mut names))?;

                if let Some(id) = id {
                    if let Some(by_id) = match_channel(wanted, &id, &names, kept) {
                        write_element(out, &element)?;
                        record_match(metrics, by_id);
                        kept.insert(id, index);
                    }
                }
            }
            Event::Empty(e) if depth == 1 && e.name().as_ref() == b"channel" => {
                if let Some(id) = attribute(&reader, &e, b"id") {
                    if let Some(by_id) = match_channel(wanted, &id, &[], kept) {
                        let mut element = Vec::new();
                        emit(&mut element, &Event::Empty(e));
                        write_element(out, &element)?;
                        record_match(metrics, by_id);
                        kept.insert(id, index);
                    }
                }
            }
            Event::Start(e) if depth == 1 => {
                reader.read_to_end_into(e.name(), &mut scratch)?;
                scratch.clear();
            }
            Event::Start(_) => depth += 1,
            Event::End(_) => depth = depth.saturating_sub(1),
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    tracing::debug!(source = %input.origin, kept = kept.len(), "Scanned guide channels");
    Ok(())
}

/// Returns `Some(true)` for an id match, `Some(false)` for a name match and
/// `None` when the channel is unwanted or its id was already taken.
fn match_channel(
    wanted: &WantedKeys,
    id: &str,
    names: &[String],
    kept: &HashMap<String, usize>,
) -> Option<bool> {
    if kept.contains_key(id) {
        return None;
    }
    if wanted.wants_id(id) {
        return Some(true);
    }
    if names.iter().any(|n| wanted.wants_name(n)) {
        return Some(false);
    }
    None
}

fn record_match(metrics: &mut CorrelationMetrics, by_id: bool) {
    metrics.matched_channels += 1;
    if by_id {
        metrics.matched_by_id += 1;
    } else {
        metrics.matched_by_name += 1;
    }
}

// ============================================================================
// Pass 2: programmes
// ============================================================================

fn copy_programmes<W: Write>(
    input: &GuideInput,
    index: usize,
    kept: &HashMap<String, usize>,
    out: &mut W,
    metrics: &mut CorrelationMetrics,
) -> Result<(), GuideError> {
    let mut reader = open_guide(&input.path)?;
    let mut buf = Vec::new();
    let mut scratch = Vec::new();
    let mut depth: usize = 0;
    let is_kept = |channel: &Option<String>| {
        channel
            .as_ref()
            .and_then(|c| kept.get(c))
            .is_some_and(|&source| source == index)
    };

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) if depth == 1 && e.name().as_ref() == b"programme" => {
                if is_kept(&attribute(&reader, &e, b"channel")) {
                    let element = capture_element(&mut reader, &e, &mut scratch, None)?;
                    write_element(out, &element)?;
                    metrics.programmes_written += 1;
                } else {
                    reader.read_to_end_into(e.name(), &mut scratch)?;
                    scratch.clear();
                    metrics.programmes_skipped += 1;
                }
            }
            Event::Empty(e) if depth == 1 && e.name().as_ref() == b"programme" => {
                if is_kept(&attribute(&reader, &e, b"channel")) {
                    let mut element = Vec::new();
                    emit(&mut element, &Event::Empty(e));
                    write_element(out, &element)?;
                    metrics.programmes_written += 1;
                } else {
                    metrics.programmes_skipped += 1;
                }
            }
            Event::Start(e) if depth == 1 => {
                reader.read_to_end_into(e.name(), &mut scratch)?;
                scratch.clear();
            }
            Event::Start(_) => depth += 1,
            Event::End(_) => depth = depth.saturating_sub(1),
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    Ok(())
}

// ============================================================================
// Streaming helpers
// ============================================================================

fn open_guide(path: &Path) -> Result<Reader<Box<dyn BufRead + Send>>, GuideError> {
    let mut file = BufReader::new(File::open(path).map_err(GuideError::Open)?);
    let has_magic = file.fill_buf().map_err(GuideError::Open)?.starts_with(&GZIP_MAGIC);
    let has_gz_extension = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("gz"));

    let source: Box<dyn BufRead + Send> = if has_magic || has_gz_extension {
        Box::new(BufReader::new(MultiGzDecoder::new(file)))
    } else {
        Box::new(file)
    };
    Ok(Reader::from_reader(source))
}

fn attribute<R>(reader: &Reader<R>, e: &BytesStart<'_>, key: &[u8]) -> Option<String> {
    match e.try_get_attribute(key) {
        Ok(Some(attr)) => attr
            .decode_and_unescape_value(reader.decoder())
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty()),
        Ok(None) => None,
        Err(e) => {
            tracing::debug!(error = %e, "Skipping malformed guide attribute");
            None
        }
    }
}

/// Reads the rest of the element opened by `start` and returns it verbatim.
///
/// When `names` is given, the text of each direct or nested `<display-name>`
/// is collected into it.
fn capture_element<R: BufRead>(
    reader: &mut Reader<R>,
    start: &BytesStart<'_>,
    buf: &mut Vec<u8>,
    mut names: Option<&mut Vec<String>>,
) -> Result<Vec<u8>, GuideError> {
    let mut element = Vec::with_capacity(512);
    element.push(b'<');
    element.extend_from_slice(start);
    element.push(b'>');

    let mut depth: usize = 0;
    let mut name_text: Option<String> = None;

    loop {
        buf.clear();
        let event = reader.read_event_into(buf)?;
        match &event {
            Event::Start(e) => {
                depth += 1;
                if names.is_some() && e.name().as_ref() == b"display-name" {
                    name_text = Some(String::new());
                }
            }
            Event::End(e) => {
                if depth == 0 {
                    emit(&mut element, &event);
                    buf.clear();
                    return Ok(element);
                }
                depth -= 1;
                if e.name().as_ref() == b"display-name" {
                    if let (Some(text), Some(names)) = (name_text.take(), names.as_deref_mut()) {
                        names.push(text);
                    }
                }
            }
            Event::Text(t) => {
                if let Some(text) = name_text.as_mut() {
                    match t.unescape() {
                        Ok(s) => text.push_str(&s),
                        Err(_) => text.push_str(&String::from_utf8_lossy(t)),
                    }
                }
            }
            Event::CData(t) => {
                if let Some(text) = name_text.as_mut() {
                    text.push_str(&String::from_utf8_lossy(t));
                }
            }
            Event::Eof => {
                let name = String::from_utf8_lossy(start.name().as_ref()).into_owned();
                return Err(GuideError::UnexpectedEof(name));
            }
            _ => {}
        }
        emit(&mut element, &event);
    }
}

/// Appends the markup for one event.
fn emit(out: &mut Vec<u8>, event: &Event<'_>) {
    match event {
        Event::Start(e) => {
            out.push(b'<');
            out.extend_from_slice(e);
            out.push(b'>');
        }
        Event::End(e) => {
            out.extend_from_slice(b"</");
            out.extend_from_slice(e);
            out.push(b'>');
        }
        Event::Empty(e) => {
            out.push(b'<');
            out.extend_from_slice(e);
            out.extend_from_slice(b"/>");
        }
        Event::Text(e) => out.extend_from_slice(e),
        Event::CData(e) => {
            out.extend_from_slice(b"<![CDATA[");
            out.extend_from_slice(e);
            out.extend_from_slice(b"]]>");
        }
        Event::Comment(e) => {
            out.extend_from_slice(b"<!--");
            out.extend_from_slice(e);
            out.extend_from_slice(b"-->");
        }
        _ => {}
    }
}

fn write_element<W: Write>(out: &mut W, element: &[u8]) -> Result<(), GuideError> {
    out.write_all(element)
        .and_then(|()| out.write_all(b"\n"))
        .map_err(GuideError::Output)
}

// ============================================================================
// Tests
// ============================================================================
