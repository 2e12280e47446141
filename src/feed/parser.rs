//! RSS/Atom document parsing.
//!
//! [`parse_feed`] runs `feed-rs` first. When the strict parser rejects the
//! document, a lenient `quick-xml` scan recovers every entry that was closed
//! before the document broke, and the result carries a [`ParseWarning`].
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime};
use feed_rs::parser;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::fmt;
use thiserror::Error;

/// Nesting deeper than this is treated as a broken document
const MAX_XML_DEPTH: usize = 64;

#[derive(Debug, Error)]
pub enum ParseError {
    /// Neither parser could extract a single entry
    #[error("Not a readable RSS or Atom feed: {0}")]
    Malformed(String),
}

/// Non-fatal problem: the document was broken but entries were recovered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseWarning {
    /// Why the strict parser rejected the document
    pub cause: String,
    pub recovered_entries: usize,
}

impl fmt::Display for ParseWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "recovered {} entries from malformed document ({})",
            self.recovered_entries, self.cause
        )
    }
}

/// Channel-level metadata
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeedInfo {
    pub title: Option<String>,
    pub description: Option<String>,
    pub link: Option<String>,
    pub language: Option<String>,
    pub last_build_date: Option<DateTime<FixedOffset>>,
}

/// Nested author element (`<author><name>..</name></author>`)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthorDetail {
    pub name: Option<String>,
    pub email: Option<String>,
    pub uri: Option<String>,
}

/// One entry as found in the document. Every field is optional; absent and
/// empty values are both `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawEntry {
    pub title: Option<String>,
    pub link: Option<String>,
    pub summary: Option<String>,
    pub description: Option<String>,
    pub content: Vec<String>,
    pub author: Option<String>,
    pub author_detail: Option<AuthorDetail>,
    /// Publish time in the source's timezone
    pub published: Option<DateTime<FixedOffset>>,
    /// Publish text exactly as it appeared, for formats the parser does not know
    pub published_raw: Option<String>,
    pub id: Option<String>,
    pub guid: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ParsedFeed {
    pub info: FeedInfo,
    /// Entries in document order
    pub entries: Vec<RawEntry>,
    /// Set when the entries came from the lenient scan
    pub warning: Option<ParseWarning>,
}

/// Parse a feed document.
///
/// A strictly valid document with zero entries is a success. A broken document
/// succeeds with a warning if at least one entry can be recovered.
///
/// # Errors
///
/// [`ParseError::Malformed`] when no entries can be extracted from a document
/// the strict parser rejected.
pub fn parse_feed(bytes: &[u8]) -> Result<ParsedFeed, ParseError> {
    // An empty id lets the normalizer fall back to guid and then link instead
    // of a generated hash.
    let strict = parser::Builder::new()
        .id_generator(|_links, _title, _uri| String::new())
        .build();

    match strict.parse(bytes) {
        Ok(feed) => Ok(from_feed_rs(feed)),
        Err(strict_err) => {
            let cause = strict_err.to_string();
            let (info, entries) = scan_lenient(bytes);
            if entries.is_empty() {
                return Err(ParseError::Malformed(cause));
            }
            tracing::warn!(
                error = %cause,
                recovered = entries.len(),
                "Strict parse failed, recovered entries with lenient scan"
            );
            let warning = ParseWarning {
                cause,
                recovered_entries: entries.len(),
            };
            Ok(ParsedFeed {
                info,
                entries,
                warning: Some(warning),
            })
        }
    }
}

/// Parse a free-form date as found in feeds.
///
/// RFC 2822, RFC 3339 and the bare `YYYY-MM-DD[ HH:MM:SS]` forms are accepted;
/// naive values are taken as UTC.
pub fn parse_date_text(text: &str) -> Option<DateTime<FixedOffset>> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(text) {
        return Some(dt);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt);
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S") {
        return Some(naive.and_utc().fixed_offset());
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc().fixed_offset())
}

fn non_empty(value: String) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else if trimmed.len() == value.len() {
        Some(value)
    } else {
        Some(trimmed.to_string())
    }
}

// ============================================================================
// Strict path (feed-rs)
// ============================================================================

fn from_feed_rs(feed: feed_rs::model::Feed) -> ParsedFeed {
    let info = FeedInfo {
        title: feed.title.map(|t| t.content).and_then(non_empty),
        description: feed.description.map(|t| t.content).and_then(non_empty),
        link: feed.links.into_iter().next().map(|l| l.href).and_then(non_empty),
        language: feed.language.and_then(non_empty),
        last_build_date: feed.updated.map(|dt| dt.fixed_offset()),
    };

    let entries = feed
        .entries
        .into_iter()
        .map(|entry| {
            let author_detail = entry.authors.into_iter().next().map(|person| AuthorDetail {
                name: non_empty(person.name),
                email: person.email.and_then(non_empty),
                uri: person.uri.and_then(non_empty),
            });

            RawEntry {
                title: entry.title.map(|t| t.content).and_then(non_empty),
                link: entry.links.into_iter().next().map(|l| l.href).and_then(non_empty),
                summary: entry.summary.map(|t| t.content).and_then(non_empty),
                description: None,
                content: entry
                    .content
                    .and_then(|c| c.body)
                    .and_then(non_empty)
                    .into_iter()
                    .collect(),
                author: None,
                author_detail,
                published: entry.published.map(|dt| dt.fixed_offset()),
                published_raw: None,
                id: non_empty(entry.id),
                guid: None,
            }
        })
        .collect();

    ParsedFeed {
        info,
        entries,
        warning: None,
    }
}

// ============================================================================
// Lenient path (quick-xml)
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Title,
    Link,
    Summary,
    Description,
    Content,
    Author,
    AuthorName,
    AuthorEmail,
    AuthorUri,
    Id,
    Guid,
    Published,
    FeedTitle,
    FeedDescription,
    FeedLink,
    FeedLanguage,
    FeedUpdated,
}

/// Text being collected for one element, closed when `depth` is popped
struct Capture {
    field: Field,
    depth: usize,
    text: String,
}

#[derive(Default)]
struct Scan {
    info: FeedInfo,
    entries: Vec<RawEntry>,
    stack: Vec<String>,
    /// Open entry and the stack depth of its element
    entry: Option<(RawEntry, usize)>,
    capture: Option<Capture>,
}

impl Scan {
    fn parent(&self) -> Option<&str> {
        // The element itself was already pushed
        self.stack.iter().rev().nth(1).map(String::as_str)
    }

    fn field_for(&self, name: &str) -> Option<Field> {
        if self.entry.is_some() {
            if self.parent() == Some("author") {
                return match name {
                    "name" => Some(Field::AuthorName),
                    "email" => Some(Field::AuthorEmail),
                    "uri" => Some(Field::AuthorUri),
                    _ => None,
                };
            }
            return match name {
                "title" => Some(Field::Title),
                "link" => Some(Field::Link),
                "summary" => Some(Field::Summary),
                "description" => Some(Field::Description),
                "content" | "encoded" => Some(Field::Content),
                "author" | "creator" => Some(Field::Author),
                "id" => Some(Field::Id),
                "guid" => Some(Field::Guid),
                "pubDate" | "published" | "date" | "issued" => Some(Field::Published),
                _ => None,
            };
        }

        if !matches!(self.parent(), Some("channel") | Some("feed")) {
            return None;
        }
        match name {
            "title" => Some(Field::FeedTitle),
            "description" | "subtitle" => Some(Field::FeedDescription),
            "link" => Some(Field::FeedLink),
            "language" => Some(Field::FeedLanguage),
            "lastBuildDate" | "updated" => Some(Field::FeedUpdated),
            _ => None,
        }
    }

    fn open(&mut self, name: String, element: &BytesStart<'_>, reader: &Reader<&[u8]>) {
        self.stack.push(name);
        let depth = self.stack.len();
        let name = self.stack[depth - 1].as_str();

        if name == "item" || name == "entry" {
            if self.entry.is_none() {
                self.entry = Some((RawEntry::default(), depth));
                self.capture = None;
            }
            return;
        }

        let Some(field) = self.field_for(name) else {
            return;
        };

        // A container author hands over to its name/email/uri children
        let replace = match &self.capture {
            None => true,
            Some(c) => c.field == Field::Author && depth == c.depth + 1,
        };
        if !replace {
            return;
        }
        if let Some(previous) = self.capture.take() {
            self.store(previous.field, previous.text);
        }

        if matches!(field, Field::Link | Field::FeedLink) {
            if let Some(href) = href_attribute(element, reader) {
                self.store(field, href);
            }
        }
        self.capture = Some(Capture {
            field,
            depth,
            text: String::new(),
        });
    }

    /// Self-closing element: only `<link href=".."/>` carries data
    fn empty(&mut self, name: String, element: &BytesStart<'_>, reader: &Reader<&[u8]>) {
        if name != "link" || self.capture.is_some() {
            return;
        }
        self.stack.push(name);
        let field = self.field_for("link");
        self.stack.pop();

        if let Some(field) = field {
            if let Some(href) = href_attribute(element, reader) {
                self.store(field, href);
            }
        }
    }

    fn text(&mut self, text: &str) {
        if let Some(capture) = self.capture.as_mut() {
            if !capture.text.is_empty() {
                capture.text.push(' ');
            }
            capture.text.push_str(text);
        }
    }

    fn close(&mut self, name: &str) {
        // End names are not checked, so a stray unclosed tag inside an entry
        // leaves extra depth behind. `</item>` and `</entry>` unwind it.
        if name == "item" || name == "entry" {
            if let Some(entry_depth) = self.entry.as_ref().map(|(_, d)| *d) {
                if self.stack.len() > entry_depth {
                    if let Some(capture) = self.capture.take() {
                        self.store(capture.field, capture.text);
                    }
                    self.stack.truncate(entry_depth);
                }
            }
        }

        let depth = self.stack.len();
        if depth == 0 {
            return;
        }

        if self.capture.as_ref().is_some_and(|c| c.depth == depth) {
            if let Some(capture) = self.capture.take() {
                self.store(capture.field, capture.text);
            }
        }

        if self.entry.as_ref().is_some_and(|(_, d)| *d == depth) {
            if let Some((entry, _)) = self.entry.take() {
                self.entries.push(entry);
            }
            self.capture = None;
        }

        self.stack.pop();
    }

    /// First value wins for every field except content blocks
    fn store(&mut self, field: Field, text: String) {
        let Some(text) = non_empty(text) else {
            return;
        };

        let info = &mut self.info;
        match field {
            Field::FeedTitle => set_once(&mut info.title, text),
            Field::FeedDescription => set_once(&mut info.description, text),
            Field::FeedLink => set_once(&mut info.link, text),
            Field::FeedLanguage => set_once(&mut info.language, text),
            Field::FeedUpdated => {
                if info.last_build_date.is_none() {
                    info.last_build_date = parse_date_text(&text);
                }
            }
            _ => {
                let Some((entry, _)) = self.entry.as_mut() else {
                    return;
                };
                match field {
                    Field::Title => set_once(&mut entry.title, text),
                    Field::Link => set_once(&mut entry.link, text),
                    Field::Summary => set_once(&mut entry.summary, text),
                    Field::Description => set_once(&mut entry.description, text),
                    Field::Content => entry.content.push(text),
                    Field::Author => set_once(&mut entry.author, text),
                    Field::AuthorName => {
                        set_once(&mut entry.author_detail.get_or_insert_with(Default::default).name, text)
                    }
                    Field::AuthorEmail => {
                        set_once(&mut entry.author_detail.get_or_insert_with(Default::default).email, text)
                    }
                    Field::AuthorUri => {
                        set_once(&mut entry.author_detail.get_or_insert_with(Default::default).uri, text)
                    }
                    Field::Id => set_once(&mut entry.id, text),
                    Field::Guid => set_once(&mut entry.guid, text),
                    Field::Published => {
                        if entry.published_raw.is_none() {
                            entry.published = parse_date_text(&text);
                            entry.published_raw = Some(text);
                        }
                    }
                    _ => {}
                }
            }
        }
    }
}

fn set_once(slot: &mut Option<String>, value: String) {
    if slot.is_none() {
        *slot = Some(value);
    }
}

fn local_name(element: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(element.local_name().as_ref()).into_owned()
}

/// `href` of a `<link>`, skipping non-alternate relations (`self`, `enclosure`, ...)
fn href_attribute(element: &BytesStart<'_>, reader: &Reader<&[u8]>) -> Option<String> {
    let decoder = reader.decoder();
    let mut href = None;
    let mut alternate = true;

    for attr in element.attributes().flatten() {
        match attr.key.local_name().as_ref() {
            b"href" => {
                href = attr
                    .decode_and_unescape_value(decoder)
                    .ok()
                    .map(|v| v.into_owned());
            }
            b"rel" => {
                alternate = attr
                    .decode_and_unescape_value(decoder)
                    .map(|v| v == "alternate")
                    .unwrap_or(false);
            }
            _ => {}
        }
    }

    if alternate {
        href
    } else {
        None
    }
}

/// Walk the document as far as the tokenizer allows, keeping completed entries.
fn scan_lenient(bytes: &[u8]) -> (FeedInfo, Vec<RawEntry>) {
    let mut reader = Reader::from_reader(bytes);
    reader.config_mut().trim_text(true);
    reader.config_mut().check_end_names = false;

    let mut scan = Scan::default();
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                if scan.stack.len() >= MAX_XML_DEPTH {
                    tracing::debug!(depth = MAX_XML_DEPTH, "Lenient scan stopped at nesting limit");
                    break;
                }
                scan.open(local_name(&e), &e, &reader);
            }
            Ok(Event::Empty(e)) => scan.empty(local_name(&e), &e, &reader),
            Ok(Event::End(e)) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                scan.close(&name);
            }
            Ok(Event::Text(e)) => {
                let text = match e.unescape() {
                    Ok(text) => text.into_owned(),
                    // Unknown entities such as &nbsp; are left for the sanitizer
                    Err(_) => String::from_utf8_lossy(&e).into_owned(),
                };
                scan.text(&text);
            }
            Ok(Event::CData(e)) => scan.text(&String::from_utf8_lossy(&e)),
            Ok(Event::Eof) => break,
            Err(e) => {
                tracing::debug!(
                    error = %e,
                    position = reader.buffer_position(),
                    recovered = scan.entries.len(),
                    "Lenient scan stopped at XML error"
                );
                break;
            }
            _ => {}
        }
        buf.clear();
    }

    (scan.info, scan.entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const RSS: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0" xmlns:dc="http://purl.org/dc/elements/1.1/"
     xmlns:content="http://purl.org/rss/1.0/modules/content/">
  <channel>
    <title>Example News</title>
    <link>https://news.example.com/</link>
    <description>All the news</description>
    <language>fr</language>
    <item>
      <title>First &amp; foremost</title>
      <link>https://news.example.com/1</link>
      <guid>urn:news:1</guid>
      <description>&lt;p&gt;Summary one&lt;/p&gt;</description>
      <content:encoded><![CDATA[<p>Body <b>one</b></p>]]></content:encoded>
      <dc:creator>Alice</dc:creator>
      <pubDate>Mon, 01 Jan 2024 10:00:00 +0100</pubDate>
    </item>
    <item>
      <title>No guid here</title>
      <link>https://news.example.com/2</link>
    </item>
  </channel>
</rss>"#;

    const ATOM: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <title>Atom Example</title>
  <subtitle>Atom subtitle</subtitle>
  <link href="https://atom.example.com/"/>
  <updated>2024-02-01T12:00:00Z</updated>
  <id>urn:feed</id>
  <entry>
    <title>Atom entry</title>
    <link href="https://atom.example.com/entry"/>
    <id>urn:entry:1</id>
    <updated>2024-02-01T12:00:00Z</updated>
    <summary>Atom summary</summary>
    <author><name>Bob</name><email>bob@example.com</email></author>
  </entry>
</feed>"#;

    #[test]
    fn test_parse_rss() {
        let parsed = parse_feed(RSS.as_bytes()).unwrap();
        assert!(parsed.warning.is_none());
        assert_eq!(parsed.info.title.as_deref(), Some("Example News"));
        assert_eq!(parsed.info.language.as_deref(), Some("fr"));
        assert_eq!(parsed.entries.len(), 2);

        let first = &parsed.entries[0];
        assert_eq!(first.title.as_deref(), Some("First & foremost"));
        assert_eq!(first.link.as_deref(), Some("https://news.example.com/1"));
        assert_eq!(first.id.as_deref(), Some("urn:news:1"));
        assert!(first.summary.as_deref().unwrap().contains("Summary one"));
        assert_eq!(first.content.len(), 1);
        assert_eq!(
            first.published.map(|d| d.timestamp()),
            Some(1704099600)
        );
        let author = first
            .author
            .clone()
            .or_else(|| first.author_detail.as_ref().and_then(|a| a.name.clone()));
        assert_eq!(author.as_deref(), Some("Alice"));
    }

    #[test]
    fn test_missing_guid_is_none_not_generated() {
        let parsed = parse_feed(RSS.as_bytes()).unwrap();
        let second = &parsed.entries[1];
        assert_eq!(second.id, None);
        assert_eq!(second.guid, None);
        assert_eq!(second.link.as_deref(), Some("https://news.example.com/2"));
    }

    #[test]
    fn test_parse_atom() {
        let parsed = parse_feed(ATOM.as_bytes()).unwrap();
        assert_eq!(parsed.info.title.as_deref(), Some("Atom Example"));
        assert_eq!(parsed.info.description.as_deref(), Some("Atom subtitle"));
        assert!(parsed.info.last_build_date.is_some());

        let entry = &parsed.entries[0];
        assert_eq!(entry.id.as_deref(), Some("urn:entry:1"));
        assert_eq!(entry.summary.as_deref(), Some("Atom summary"));
        let detail = entry.author_detail.as_ref().unwrap();
        assert_eq!(detail.name.as_deref(), Some("Bob"));
        assert_eq!(detail.email.as_deref(), Some("bob@example.com"));
    }

    #[test]
    fn test_valid_feed_without_entries_is_success() {
        let xml = r#"<?xml version="1.0"?><rss version="2.0"><channel><title>Quiet</title></channel></rss>"#;
        let parsed = parse_feed(xml.as_bytes()).unwrap();
        assert!(parsed.entries.is_empty());
        assert!(parsed.warning.is_none());
    }

    #[test]
    fn test_garbage_is_malformed() {
        assert!(matches!(
            parse_feed(b"this is not xml at all"),
            Err(ParseError::Malformed(_))
        ));
        assert!(matches!(
            parse_feed(b"<html><body>Not a feed</body></html>"),
            Err(ParseError::Malformed(_))
        ));
    }

    #[test]
    fn test_truncated_document_recovers_complete_entries() {
        let xml = r#"<?xml version="1.0"?>
<rss version="2.0"><channel>
  <title>Broken</title>
  <item><title>Kept one</title><guid>a</guid></item>
  <item><title>Kept two</title><link>https://example.com/b</link></item>
  <item><title>Lost</title><gu"#;

        let parsed = parse_feed(xml.as_bytes()).unwrap();
        let titles: Vec<_> = parsed
            .entries
            .iter()
            .map(|e| e.title.clone().unwrap_or_default())
            .collect();
        assert_eq!(titles, vec!["Kept one".to_string(), "Kept two".to_string()]);

        let warning = parsed.warning.unwrap();
        assert_eq!(warning.recovered_entries, 2);
        assert_eq!(parsed.info.title.as_deref(), Some("Broken"));
    }

    #[test]
    fn test_lenient_scan_fields() {
        let xml = r#"<rss><channel>
  <item>
    <title>Loose</title>
    <guid>g-1</guid>
    <pubDate>2024-03-05</pubDate>
    <description>Plain &amp; simple</description>
    <author><name>Carol</name></author>
  </item>
  <item><title>Unclosed <b>bold</item>
</channel></rss><trailing"#;

        let (_, entries) = scan_lenient(xml.as_bytes());
        let first = &entries[0];
        assert_eq!(first.guid.as_deref(), Some("g-1"));
        assert_eq!(first.published_raw.as_deref(), Some("2024-03-05"));
        assert_eq!(first.published.map(|d| d.timestamp()), Some(1709596800));
        assert_eq!(first.description.as_deref(), Some("Plain & simple"));
        assert_eq!(
            first.author_detail.as_ref().and_then(|a| a.name.as_deref()),
            Some("Carol")
        );
    }

    #[test]
    fn test_lenient_atom_link_href() {
        let xml = r#"<feed><entry><title>T</title>
  <link rel="self" href="https://example.com/self"/>
  <link href="https://example.com/post"/>
</entry></feed>"#;
        let (_, entries) = scan_lenient(xml.as_bytes());
        assert_eq!(entries[0].link.as_deref(), Some("https://example.com/post"));
    }

    #[test]
    fn test_parse_date_text_formats() {
        assert!(parse_date_text("Tue, 10 Jun 2003 04:00:00 GMT").is_some());
        assert!(parse_date_text("2003-06-10T04:00:00+02:00").is_some());
        assert_eq!(
            parse_date_text("2024-01-01 00:00:00").map(|d| d.timestamp()),
            Some(1704067200)
        );
        assert_eq!(parse_date_text("yesterday"), None);
        assert_eq!(parse_date_text("   "), None);
    }

    #[test]
    fn test_unclosed_inline_tag_does_not_swallow_later_items() {
        let xml = r#"<?xml version="1.0"?>
<rss version="2.0"><channel><title>Loose HTML</title>
  <item><guid>a</guid><description><p>one<br></p></description></item>
  <item><guid>b</guid><title>Two</title></item>
  <item><guid>c</guid><title>Three</title></item>
</channel></rss>"#;

        let (info, entries) = scan_lenient(xml.as_bytes());
        assert_eq!(info.title.as_deref(), Some("Loose HTML"));
        let guids: Vec<_> = entries.iter().map(|e| e.guid.as_deref()).collect();
        assert_eq!(guids, vec![Some("a"), Some("b"), Some("c")]);
        assert_eq!(entries[0].description.as_deref(), Some("one"));
        assert_eq!(entries[2].title.as_deref(), Some("Three"));

        let parsed = parse_feed(xml.as_bytes()).unwrap();
        assert_eq!(parsed.entries.len(), 3);
        assert_eq!(parsed.warning.map(|w| w.recovered_entries), Some(3));
    }

    #[test]
    fn test_atom_updated_is_not_a_publish_date() {
        let parsed = parse_feed(ATOM.as_bytes()).unwrap();
        let entry = &parsed.entries[0];
        assert_eq!(entry.published, None);
        assert_eq!(entry.published_raw, None);
    }

    #[test]
    fn test_empty_item_is_kept() {
        let xml = r#"<?xml version="1.0"?>
<rss version="2.0"><channel><title>T</title><item></item></channel></rss>"#;
        let parsed = parse_feed(xml.as_bytes()).unwrap();
        assert_eq!(parsed.entries, vec![RawEntry::default()]);
    }
}
