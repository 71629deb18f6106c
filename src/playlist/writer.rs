use std::fmt::Write;

use super::channel::Channel;

/// Renders channels as an extended M3U document.
///
/// Every `#EXTINF` line is re-synthesized from the channel fields rather
/// than copied from the source, so quoting and spacing are identical on
/// every run and the output depends on the channel model alone.
///
/// Attributes are emitted in a fixed order: `tvg-id` (when present),
/// `tvg-name`, `tvg-logo` (when present), `group-title` (when non-empty).
/// Double quotes inside values are replaced with single quotes since the
/// format has no escape for them.
///
/// # Arguments
///
/// * `channels` - Channels to write, in output order
/// * `tvg_url` - Optional guide URL advertised in the header as `url-tvg`
pub fn render(channels: &[Channel], tvg_url: Option<&str>) -> String {
    let mut out = String::with_capacity(64 + channels.len() * 160);

    match tvg_url {
        Some(url) => {
            let _ = writeln!(out, "#EXTM3U url-tvg=\"{}\"", attr_value(url));
        }
        None => out.push_str("#EXTM3U\n"),
    }

    for ch in channels {
        out.push_str("#EXTINF:-1");
        if let Some(id) = &ch.station_id {
            let _ = write!(out, " tvg-id=\"{}\"", attr_value(id));
        }
        let _ = write!(out, " tvg-name=\"{}\"", attr_value(&ch.display_name));
        if let Some(logo) = &ch.logo {
            let _ = write!(out, " tvg-logo=\"{}\"", attr_value(logo));
        }
        if !ch.group_label.is_empty() {
            let _ = write!(out, " group-title=\"{}\"", attr_value(&ch.group_label));
        }
        let _ = writeln!(out, ",{}", ch.title);
        let _ = writeln!(out, "{}", ch.stream_url);
    }

    out
}

fn attr_value(s: &str) -> String {
    s.replace('"', "'")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::playlist::parse;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_render_full_entry() {
        let mut ch = Channel::new("BBC One HD", "http://x/bbc1")
            .with_station_id("BBCOne.uk")
            .with_display_name("BBC One")
            .with_group("General");
        ch.logo = Some("http://logo/bbc1.png".into());

        let text = render(&[ch], None);
        assert_eq!(
            text,
            "#EXTM3U\n\
             #EXTINF:-1 tvg-id=\"BBCOne.uk\" tvg-name=\"BBC One\" tvg-logo=\"http://logo/bbc1.png\" group-title=\"General\",BBC One HD\n\
             http://x/bbc1\n"
        );
    }

    #[test]
    fn test_render_omits_absent_attributes() {
        let ch = Channel::new("Sky News", "http://x/sky").with_display_name("Sky News");
        let text = render(&[ch], None);
        assert!(text.contains("#EXTINF:-1 tvg-name=\"Sky News\",Sky News\n"));
        assert!(!text.contains("tvg-id"));
        assert!(!text.contains("group-title"));
    }

    #[test]
    fn test_render_header_with_guide_url() {
        let text = render(&[], Some("https://example.com/curated_epg.xml.gz"));
        assert_eq!(text, "#EXTM3U url-tvg=\"https://example.com/curated_epg.xml.gz\"\n");
    }

    #[test]
    fn test_render_replaces_double_quotes() {
        let ch = Channel::new("Quote", "http://x/q").with_display_name("The \"Best\" TV");
        let text = render(&[ch], None);
        assert!(text.contains("tvg-name=\"The 'Best' TV\""));
    }

    #[test]
    fn test_round_trip_normalized_entry() {
        let input = "#EXTM3U\n\
                     #EXTINF:-1 tvg-id=\"CNN.us\" tvg-name=\"CNN\" group-title=\"News\",CNN International\n\
                     http://x/cnn\n";
        let parsed = parse(input, "src");
        let rendered = render(&parsed, None);
        assert_eq!(rendered, input);

        let reparsed = parse(&rendered, "src");
        assert_eq!(reparsed, parsed);
    }

    #[test]
    fn test_round_trip_normalizes_messy_spacing() {
        let input = "#EXTM3U\n#EXTINF:-1   tvg-name=\" Sky   News \"   group-title=\"News\" ,  Sky News \nhttp://x/sky\n";
        let parsed = parse(input, "src");
        let reparsed = parse(&render(&parsed, None), "src");
        assert_eq!(reparsed, parsed);
    }
}
