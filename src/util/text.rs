use std::borrow::Cow;

/// Marker appended when a field is cut to its storage limit.
pub const TRUNCATION_MARKER: &str = "...";

/// Entities decoded by [`sanitize_html`]. Anything else is left verbatim.
const ENTITIES: [(&str, char); 6] = [
    ("&amp;", '&'),
    ("&lt;", '<'),
    ("&gt;", '>'),
    ("&quot;", '"'),
    ("&#39;", '\''),
    ("&nbsp;", ' '),
];

/// Strips markup from feed-supplied text and normalizes whitespace.
///
/// Line-break tags (`<br>`, `<br/>`, `<BR />`) become newlines, every other
/// tag is removed, the common entities in [`ENTITIES`] are decoded, runs of
/// whitespace collapse to a single space and the result is trimmed.
///
/// Decoding can surface new markup (`&lt;b&gt;` becomes `<b>`), so the pass is
/// repeated until the text stops changing. Each pass either shrinks the text
/// or only rewrites whitespace, which bounds the loop and makes the function
/// idempotent: `sanitize_html(&sanitize_html(s)) == sanitize_html(s)`.
///
/// # Examples
///
/// ```
/// use feedsync::util::sanitize_html;
///
/// assert_eq!(sanitize_html("<p>Hello &amp; <b>world</b></p>"), "Hello & world");
/// assert_eq!(sanitize_html("  a<br/>b  "), "a b");
/// ```
pub fn sanitize_html(raw: &str) -> String {
    let mut current = sanitize_pass(raw);
    loop {
        let next = sanitize_pass(&current);
        if next == current {
            return current;
        }
        current = next;
    }
}

fn sanitize_pass(text: &str) -> String {
    let text = replace_line_breaks(text);
    let text = strip_tags(&text);
    let text = decode_entities(&text);
    collapse_whitespace(&text)
}

/// Replaces `<br>` tags (any case, optional whitespace and self-closing slash) with `\n`.
fn replace_line_breaks(text: &str) -> Cow<'_, str> {
    if !text.contains('<') {
        return Cow::Borrowed(text);
    }

    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(pos) = rest.find('<') {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos..];
        match line_break_len(tail) {
            Some(len) => {
                out.push('\n');
                rest = &tail[len..];
            }
            None => {
                out.push('<');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    Cow::Owned(out)
}

/// Byte length of a `<br\s*/?>` tag at the start of `tail`, if there is one.
fn line_break_len(tail: &str) -> Option<usize> {
    let bytes = tail.as_bytes();
    if bytes.len() < 4 || !bytes[1].eq_ignore_ascii_case(&b'b') || !bytes[2].eq_ignore_ascii_case(&b'r')
    {
        return None;
    }

    let mut idx = 3;
    for (offset, c) in tail[3..].char_indices() {
        if !c.is_whitespace() {
            idx = 3 + offset;
            break;
        }
        idx = 3 + offset + c.len_utf8();
    }
    if tail[idx..].starts_with('/') {
        idx += 1;
    }
    tail[idx..].starts_with('>').then_some(idx + 1)
}

/// Removes `<...>` spans that open like a tag: `<` directly followed by an
/// ASCII letter, `/`, `!` or `?`. Any other `<` (comparisons such as `1 < 2`,
/// the empty `<>`, a `<` with no closing `>`) is kept as literal text.
fn strip_tags(text: &str) -> Cow<'_, str> {
    if !text.contains('<') {
        return Cow::Borrowed(text);
    }

    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(open) = rest.find('<') {
        out.push_str(&rest[..open]);
        let after_open = &rest[open + 1..];
        let opens_tag = after_open
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic() || matches!(c, '/' | '!' | '?'));
        match after_open.find('>') {
            Some(close) if opens_tag => rest = &after_open[close + 1..],
            _ => {
                out.push('<');
                rest = after_open;
            }
        }
    }
    out.push_str(rest);
    Cow::Owned(out)
}

/// Decodes [`ENTITIES`] in a single left-to-right scan.
fn decode_entities(text: &str) -> Cow<'_, str> {
    if !text.contains('&') {
        return Cow::Borrowed(text);
    }

    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    'scan: while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let tail = &rest[amp..];
        for (entity, decoded) in ENTITIES {
            if tail.starts_with(entity) {
                out.push(decoded);
                rest = &tail[entity.len()..];
                continue 'scan;
            }
        }
        out.push('&');
        rest = &tail[1..];
    }
    out.push_str(rest);
    Cow::Owned(out)
}

fn collapse_whitespace(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for word in text.split_whitespace() {
        if !out.is_empty() {
            out.push(' ');
        }
        out.push_str(word);
    }
    out
}

/// Truncates `s` to at most `max_chars` characters, appending
/// [`TRUNCATION_MARKER`] when anything was cut.
///
/// The marker counts toward the limit: a 400-character title limited to 300
/// becomes 297 characters followed by `"..."`.
///
/// ```
/// use feedsync::util::truncate_with_marker;
///
/// assert_eq!(truncate_with_marker("Short", 10), "Short");
/// assert_eq!(truncate_with_marker("Hello World", 8), "Hello...");
/// ```
pub fn truncate_with_marker(s: &str, max_chars: usize) -> Cow<'_, str> {
    if s.chars().count() <= max_chars {
        return Cow::Borrowed(s);
    }
    let keep = max_chars.saturating_sub(TRUNCATION_MARKER.chars().count());
    let mut out: String = s.chars().take(keep).collect();
    out.push_str(TRUNCATION_MARKER);
    Cow::Owned(out)
}

/// Truncates `s` to at most `max_chars` characters with no marker.
pub fn truncate_chars(s: &str, max_chars: usize) -> Cow<'_, str> {
    match s.char_indices().nth(max_chars) {
        Some((byte_end, _)) => Cow::Owned(s[..byte_end].to_string()),
        None => Cow::Borrowed(s),
    }
}
