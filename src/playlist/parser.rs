use super::channel::Channel;
use crate::util::collapse_whitespace;

/// Metadata line marker of the extended M3U format.
const ENTRY_MARKER: &str = "#EXTINF";

/// An `#EXTINF` line waiting for its URL line.
struct PendingEntry {
    attributes: Vec<(String, String)>,
    label: String,
}

/// Parses M3U playlist text into normalized channels.
///
/// Each `#EXTINF` line opens a pending entry; the first following line that
/// is not a `#` directive becomes its stream URL and closes it. A new
/// `#EXTINF` line before a URL replaces the pending entry. Plain lines with
/// no pending entry, blank lines and other directives are ignored.
///
/// This never fails: malformed input simply yields fewer channels.
///
/// # Arguments
///
/// * `text` - Raw playlist text
/// * `source_origin` - Identifier of the source document (usually its URL),
///   stored on every produced channel
pub fn parse(text: &str, source_origin: &str) -> Vec<Channel> {
    let mut channels = Vec::new();
    let mut pending: Option<PendingEntry> = None;

    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if let Some(body) = line.strip_prefix(ENTRY_MARKER) {
            pending = Some(parse_metadata(body));
            continue;
        }

        if line.starts_with('#') {
            continue;
        }

        if let Some(entry) = pending.take() {
            channels.push(build_channel(entry, line, source_origin));
        }
    }

    if pending.is_some() {
        tracing::debug!(source = %source_origin, "Trailing #EXTINF line without URL ignored");
    }

    tracing::debug!(source = %source_origin, channels = channels.len(), "Parsed playlist");
    channels
}

/// Splits the text after `#EXTINF` into attributes and the trailing label.
///
/// The label starts after the first comma outside double quotes, so commas
/// inside attribute values (`group-title="News, UK"`) are not split on.
fn parse_metadata(body: &str) -> PendingEntry {
    let body = body.strip_prefix(':').unwrap_or(body);

    let mut in_quotes = false;
    let mut split = None;
    for (i, ch) in body.char_indices() {
        match ch {
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => {
                split = Some(i);
                break;
            }
            _ => {}
        }
    }

    let (attr_part, label) = match split {
        Some(i) => (&body[..i], &body[i + 1..]),
        None => (body, ""),
    };

    PendingEntry {
        attributes: parse_attributes(attr_part),
        label: collapse_whitespace(label).into_owned(),
    }
}

/// Extracts `key="value"` pairs. Keys are lowercased; values are
/// whitespace-collapsed. Tokens without `=` (such as the `-1` duration) are
/// skipped. Unquoted values run until the next whitespace.
fn parse_attributes(input: &str) -> Vec<(String, String)> {
    let mut attrs = Vec::new();
    let mut chars = input.chars().peekable();

    loop {
        while chars.next_if(|c| c.is_whitespace()).is_some() {}
        if chars.peek().is_none() {
            break;
        }

        let mut key = String::new();
        while let Some(c) = chars.next_if(|c| !c.is_whitespace() && *c != '=') {
            key.push(c);
        }

        if chars.next_if_eq(&'=').is_none() {
            // Bare token, e.g. the duration
            continue;
        }

        let mut value = String::new();
        if chars.next_if_eq(&'"').is_some() {
            for c in chars.by_ref() {
                if c == '"' {
                    break;
                }
                value.push(c);
            }
        } else {
            while let Some(c) = chars.next_if(|c| !c.is_whitespace()) {
                value.push(c);
            }
        }

        if !key.is_empty() {
            attrs.push((
                key.to_ascii_lowercase(),
                collapse_whitespace(&value).into_owned(),
            ));
        }
    }

    attrs
}

fn build_channel(entry: PendingEntry, url: &str, source_origin: &str) -> Channel {
    let mut channel = Channel::new(entry.label, url);
    channel.source_origin = source_origin.to_string();

    for (key, value) in entry.attributes {
        match key.as_str() {
            "tvg-id" if !value.is_empty() => channel.station_id = Some(value),
            "tvg-name" => channel.display_name = value,
            "group-title" => channel.group_label = value,
            "tvg-logo" if !value.is_empty() => channel.logo = Some(value),
            _ => {}
        }
    }

    // Backfill so neither name is empty when the source supplied one
    if channel.display_name.is_empty() {
        channel.display_name = channel.title.clone();
    }
    if channel.title.is_empty() {
        channel.title = channel.display_name.clone();
    }
    if channel.title.is_empty() {
        // Nameless entry: the URL is the only identifying text left
        channel.title = channel.stream_url.clone();
        channel.display_name = channel.stream_url.clone();
    }

    channel
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const SAMPLE: &str = r#"#EXTM3U
#EXTINF:-1 tvg-id="BBCOne.uk" tvg-name="BBC One" tvg-logo="http://logo/bbc1.png" group-title="General",BBC One HD
http://streams.example.com/bbc1.m3u8
#EXTINF:-1 tvg-id="CNN.us" group-title="News",CNN International
#EXTVLCOPT:http-user-agent=Mozilla
http://streams.example.com/cnn.m3u8
"#;

    #[test]
    fn test_parse_extracts_attributes() {
        let channels = parse(SAMPLE, "src");
        assert_eq!(channels.len(), 2);

        let bbc = &channels[0];
        assert_eq!(bbc.station_id.as_deref(), Some("BBCOne.uk"));
        assert_eq!(bbc.display_name, "BBC One");
        assert_eq!(bbc.group_label, "General");
        assert_eq!(bbc.title, "BBC One HD");
        assert_eq!(bbc.logo.as_deref(), Some("http://logo/bbc1.png"));
        assert_eq!(bbc.stream_url, "http://streams.example.com/bbc1.m3u8");
        assert_eq!(bbc.source_origin, "src");
    }

    #[test]
    fn test_directive_between_metadata_and_url_is_ignored() {
        let channels = parse(SAMPLE, "src");
        assert_eq!(channels[1].stream_url, "http://streams.example.com/cnn.m3u8");
        assert_eq!(channels[1].title, "CNN International");
    }

    #[test]
    fn test_display_name_backfilled_from_title() {
        let channels = parse(SAMPLE, "src");
        assert_eq!(channels[1].display_name, "CNN International");
    }

    #[test]
    fn test_title_backfilled_from_display_name() {
        let text = "#EXTINF:-1 tvg-name=\"Sky News\",\nhttp://x/sky\n";
        let channels = parse(text, "src");
        assert_eq!(channels[0].title, "Sky News");
        assert_eq!(channels[0].display_name, "Sky News");
    }

    #[test]
    fn test_comma_inside_quotes_not_split() {
        let text = "#EXTINF:-1 group-title=\"News, UK\",Sky News, Live\nhttp://x/sky\n";
        let channels = parse(text, "src");
        assert_eq!(channels[0].group_label, "News, UK");
        assert_eq!(channels[0].title, "Sky News, Live");
    }

    #[test]
    fn test_keys_are_case_insensitive_and_whitespace_collapsed() {
        let text = "#EXTINF:-1 TVG-ID=\"abc\" Group-Title=\"  Kids   TV \",  Cartoon   Net  \nhttp://x/c\n";
        let channels = parse(text, "src");
        assert_eq!(channels[0].station_id.as_deref(), Some("abc"));
        assert_eq!(channels[0].group_label, "Kids TV");
        assert_eq!(channels[0].title, "Cartoon Net");
    }

    #[test]
    fn test_url_without_metadata_is_ignored() {
        let text = "#EXTM3U\nhttp://orphan/1\n#EXTINF:-1,One\nhttp://x/1\nhttp://orphan/2\n";
        let channels = parse(text, "src");
        assert_eq!(channels.len(), 1);
        assert_eq!(channels[0].stream_url, "http://x/1");
    }

    #[test]
    fn test_second_extinf_replaces_pending() {
        let text = "#EXTINF:-1,First\n#EXTINF:-1,Second\nhttp://x/2\n";
        let channels = parse(text, "src");
        assert_eq!(channels.len(), 1);
        assert_eq!(channels[0].title, "Second");
    }

    #[test]
    fn test_trailing_metadata_without_url_dropped() {
        let channels = parse("#EXTINF:-1,Lonely\n", "src");
        assert!(channels.is_empty());
    }

    #[test]
    fn test_malformed_input_degrades() {
        let text = "garbage\n#EXTINF\nhttp://x/1\n#EXTINF:-1 tvg-id=\"unterminated,Name\nhttp://x/2\n";
        let channels = parse(text, "src");
        assert_eq!(channels.len(), 2);
        assert!(channels.iter().all(|c| !c.title.is_empty()));
        assert!(channels.iter().all(|c| !c.stream_url.is_empty()));
    }

    #[test]
    fn test_blank_tvg_id_is_none() {
        let channels = parse("#EXTINF:-1 tvg-id=\"\",Name\nhttp://x/1\n", "src");
        assert!(channels[0].station_id.is_none());
    }

    #[test]
    fn test_crlf_line_endings() {
        let channels = parse("#EXTM3U\r\n#EXTINF:-1,Name\r\nhttp://x/1\r\n", "src");
        assert_eq!(channels[0].stream_url, "http://x/1");
        assert_eq!(channels[0].title, "Name");
    }
}
