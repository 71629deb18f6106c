use std::borrow::Cow;

/// Collapses every run of whitespace into a single space and trims both ends.
///
/// Playlist attribute values and labels routinely carry doubled spaces, tabs
/// or stray carriage returns from hand-edited sources. Normalizing them here
/// keeps titles comparable across sources and makes rendered output stable.
///
/// Returns `Cow::Borrowed` when the input is already normalized (common case).
///
/// # Examples
///
/// ```
/// use streamledger::util::collapse_whitespace;
///
/// assert_eq!(collapse_whitespace("  BBC\t One  HD "), "BBC One HD");
/// assert_eq!(collapse_whitespace("CNN"), "CNN");
/// ```
pub fn collapse_whitespace(s: &str) -> Cow<'_, str> {
    // Fast path: no leading/trailing whitespace, no whitespace other than
    // single spaces, and no doubled spaces.
    let already_clean = !s.starts_with(char::is_whitespace)
        && !s.ends_with(char::is_whitespace)
        && !s
            .chars()
            .zip(s.chars().skip(1))
            .any(|(a, b)| a.is_whitespace() && b.is_whitespace())
        && !s.chars().any(|c| c.is_whitespace() && c != ' ');

    if already_clean {
        return Cow::Borrowed(s);
    }

    let mut out = String::with_capacity(s.len());
    for word in s.split_whitespace() {
        if !out.is_empty() {
            out.push(' ');
        }
        out.push_str(word);
    }
    Cow::Owned(out)
}

/// Normalizes a channel name into a guide matching key.
///
/// Strips every non-word character (anything that is not alphanumeric or `_`)
/// and lowercases the rest, so `"BBC One (HD)"`, `"bbc-one hd"` and
/// `"BBCOneHD"` all map to `"bbconehd"`.
pub fn normalize_key(s: &str) -> String {
    s.chars()
        .filter(|c| c.is_alphanumeric() || *c == '_')
        .flat_map(char::to_lowercase)
        .collect()
}

/// Normalizes a title for exact, case-insensitive comparison.
///
/// Whitespace is collapsed and the result is lowercased. Unlike
/// [`normalize_key`], punctuation is preserved: `"E! News"` and `"E News"`
/// remain distinct titles.
pub fn normalize_title(s: &str) -> String {
    collapse_whitespace(s).to_lowercase()
}
