use super::parser::{parse_date_text, RawEntry};
use crate::storage::ArticleCandidate;
use crate::util::{sanitize_html, truncate_chars, truncate_with_marker};

/// Title used when an entry has none
pub const UNTITLED: &str = "Sans titre";

pub const MAX_TITLE_CHARS: usize = 300;
pub const MAX_LINK_CHARS: usize = 500;
pub const MAX_DESCRIPTION_CHARS: usize = 1000;
pub const MAX_AUTHOR_CHARS: usize = 100;
pub const MAX_GUID_CHARS: usize = 500;

/// Map one raw entry to an article candidate.
///
/// Missing optional fields never fail: they become empty strings (or `None`
/// for the date). Titles and descriptions over their limit are cut and end
/// with `"..."`; links, authors and guids are cut silently. Content is
/// sanitized but kept whole.
///
/// The guid is the entry id, else the generic guid, else the link. An empty
/// guid is still a valid dedup key, so even an entry with no fields at all
/// becomes a "Sans titre" article.
pub fn normalize_entry(entry: &RawEntry) -> ArticleCandidate {
    let title = entry.title.as_deref().unwrap_or(UNTITLED);
    let link = entry.link.as_deref().unwrap_or_default();

    let description = entry
        .summary
        .as_deref()
        .or(entry.description.as_deref())
        .map(sanitize_html)
        .unwrap_or_default();

    let content = entry
        .content
        .first()
        .map(|block| sanitize_html(block))
        .unwrap_or_default();

    let author = entry
        .author
        .as_deref()
        .or_else(|| entry.author_detail.as_ref().and_then(|a| a.name.as_deref()))
        .unwrap_or_default();

    let guid = entry
        .id
        .as_deref()
        .or(entry.guid.as_deref())
        .unwrap_or(link);

    ArticleCandidate {
        guid: truncate_chars(guid, MAX_GUID_CHARS).into_owned(),
        title: truncate_with_marker(title, MAX_TITLE_CHARS).into_owned(),
        link: truncate_chars(link, MAX_LINK_CHARS).into_owned(),
        description: truncate_with_marker(&description, MAX_DESCRIPTION_CHARS).into_owned(),
        content,
        author: truncate_chars(author, MAX_AUTHOR_CHARS).into_owned(),
        published_date: published_timestamp(entry),
    }
}

fn published_timestamp(entry: &RawEntry) -> Option<i64> {
    if let Some(published) = entry.published {
        return Some(published.timestamp());
    }
    let raw = entry.published_raw.as_deref()?;
    match parse_date_text(raw) {
        Some(dt) => Some(dt.timestamp()),
        None => {
            tracing::debug!(raw = %raw, "Unrecognized publish date, storing none");
            None
        }
    }
}
