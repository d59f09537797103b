use quick_xml::events::{BytesStart, BytesText, Event};
use quick_xml::name::{Namespace, ResolveResult};
use quick_xml::NsReader;
use thiserror::Error;

use super::model::{ChannelImage, Enclosure, FeedDocument, FeedEntry, Guid, MediaRef};

const ATOM_NS: &[u8] = b"http://www.w3.org/2005/Atom";
const MRSS_NS: &[u8] = b"http://search.yahoo.com/mrss";
const DC_NS: &[u8] = b"http://purl.org/dc/elements/1.1";
const CONTENT_NS: &[u8] = b"http://purl.org/rss/1.0/modules/content";
const RSS1_NS: &[u8] = b"http://purl.org/rss/1.0";

/// SEC-003: Maximum element nesting depth accepted inside a feed document.
const MAX_FEED_DEPTH: usize = 64;

/// Errors that make a whole feed document unusable.
///
/// Problems inside individual items never surface here: the item is dropped
/// and parsing continues.
#[derive(Debug, Error)]
pub enum ParseError {
    /// The bytes contained no root element at all.
    #[error("Document has no root element")]
    MissingRoot,

    /// XML syntax error before the root element was opened.
    #[error("XML parse error: {0}")]
    Xml(String),

    /// The root element is not an RSS, RDF or Atom feed.
    #[error("Unsupported root element <{0}>")]
    UnsupportedRoot(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Ns {
    /// No namespace, or the RSS 1.0 default namespace.
    Plain,
    Atom,
    Media,
    DublinCore,
    Content,
    Other,
}

impl Ns {
    fn from_resolved(res: &ResolveResult<'_>) -> Self {
        match res {
            ResolveResult::Bound(Namespace(uri)) => Self::from_uri(uri),
            ResolveResult::Unbound | ResolveResult::Unknown(_) => Ns::Plain,
        }
    }

    fn from_uri(uri: &[u8]) -> Self {
        // Publishers disagree about the trailing slash
        let uri = uri.strip_suffix(b"/").unwrap_or(uri);
        match uri {
            ATOM_NS => Ns::Atom,
            MRSS_NS => Ns::Media,
            DC_NS => Ns::DublinCore,
            CONTENT_NS => Ns::Content,
            RSS1_NS => Ns::Plain,
            _ => Ns::Other,
        }
    }
}

#[derive(Debug)]
struct Attr {
    ns: Ns,
    local: String,
    qname: String,
    value: String,
}

/// One open element and the character data collected for it.
#[derive(Debug)]
struct Frame {
    ns: Ns,
    local: String,
    qname: String,
    attrs: Vec<Attr>,
    text: String,
    malformed: bool,
}

impl Frame {
    fn open(ns: Ns, start: &BytesStart<'_>, reader: &NsReader<&[u8]>) -> Self {
        let mut frame = Frame {
            ns,
            local: String::from_utf8_lossy(start.local_name().as_ref()).into_owned(),
            qname: String::from_utf8_lossy(start.name().as_ref()).into_owned(),
            attrs: Vec::new(),
            text: String::new(),
            malformed: false,
        };

        for attr_result in start.attributes() {
            let attr = match attr_result {
                Ok(attr) => attr,
                Err(e) => {
                    tracing::debug!(element = %frame.qname, error = %e, "Malformed attribute");
                    frame.malformed = true;
                    continue;
                }
            };
            let (res, local) = reader.resolve_attribute(attr.key);
            let ns = Ns::from_resolved(&res);
            let local = String::from_utf8_lossy(local.as_ref()).into_owned();
            let qname = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
            match attr.decode_and_unescape_value(reader.decoder()) {
                Ok(value) => frame.attrs.push(Attr {
                    ns,
                    local,
                    qname,
                    value: value.into_owned(),
                }),
                Err(e) => {
                    tracing::debug!(element = %frame.qname, attribute = %qname, error = %e, "Undecodable attribute");
                    frame.malformed = true;
                }
            }
        }

        frame
    }

    /// Unprefixed attribute by local name.
    fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|a| a.ns == Ns::Plain && a.local == name)
            .map(|a| a.value.as_str())
    }

    fn is(&self, ns: Ns, local: &str) -> bool {
        self.ns == ns && self.local == local
    }

    fn trimmed_text(&self) -> Option<String> {
        non_empty(&self.text)
    }

    fn media_ref(&self) -> MediaRef {
        MediaRef {
            url: self.attr("url").and_then(non_empty),
            text: self.trimmed_text(),
        }
    }

    /// An Atom link that points at the entry itself (`rel` absent or `alternate`).
    fn is_alternate_link(&self) -> bool {
        matches!(self.attr("rel"), None | Some("alternate"))
    }
}

#[derive(Debug)]
struct OpenItem {
    depth: usize,
    entry: FeedEntry,
    malformed: bool,
}

#[derive(Debug, Default)]
struct FeedParser {
    doc: FeedDocument,
    stack: Vec<Frame>,
    root_seen: bool,
    atom: bool,
    channel_depth: Option<usize>,
    item: Option<OpenItem>,
    skipped: usize,
}

/// Parses RSS 2.0, RSS 1.0 (RDF) and Atom documents into a [`FeedDocument`].
///
/// Field mapping is namespace-aware: Media RSS, Dublin Core, the content
/// module and Atom links are recognised whatever prefix the publisher binds
/// them to. Items that cannot be decoded are skipped with a warning; an XML
/// error after the root element has opened ends parsing but keeps every item
/// completed before it.
///
/// # Errors
///
/// Returns [`ParseError`] only when no usable root element can be read.
pub fn parse_feed(bytes: &[u8]) -> Result<FeedDocument, ParseError> {
    let mut reader = NsReader::from_reader(bytes);
    let mut buf = Vec::new();
    let mut parser = FeedParser::default();

    loop {
        let (ns, event) = match reader.read_resolved_event_into(&mut buf) {
            Ok((res, event)) => (Ns::from_resolved(&res), event),
            Err(e) => {
                if parser.root_seen {
                    tracing::warn!(
                        error = %e,
                        kept = parser.doc.items.len(),
                        "Feed truncated by XML error, keeping items parsed so far"
                    );
                    break;
                }
                return Err(ParseError::Xml(e.to_string()));
            }
        };

        match event {
            Event::Start(start) => {
                let frame = Frame::open(ns, &start, &reader);
                if !parser.push(frame)? {
                    break;
                }
            }
            Event::Empty(start) => {
                let frame = Frame::open(ns, &start, &reader);
                if !parser.push(frame)? {
                    break;
                }
                parser.close();
            }
            Event::End(_) => parser.close(),
            Event::Text(text) => parser.append_text(&text),
            Event::CData(cdata) => parser.append_str(&String::from_utf8_lossy(&cdata), false),
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    parser.finish()
}

impl FeedParser {
    /// Opens an element. Returns `Ok(false)` when parsing should stop early.
    fn push(&mut self, frame: Frame) -> Result<bool, ParseError> {
        let depth = self.stack.len();

        if depth == 0 && !self.root_seen {
            match (frame.ns, frame.local.as_str()) {
                (_, "rss") | (_, "RDF") => {}
                (_, "channel") => self.channel_depth = Some(0),
                (_, "feed") => {
                    self.atom = true;
                    self.channel_depth = Some(0);
                    if let Some(lang) = frame.attrs.iter().find(|a| a.qname == "xml:lang") {
                        self.doc.language = non_empty(&lang.value);
                    }
                }
                _ => return Err(ParseError::UnsupportedRoot(frame.qname)),
            }
            self.root_seen = true;
        } else if depth >= MAX_FEED_DEPTH {
            tracing::warn!(
                max_depth = MAX_FEED_DEPTH,
                kept = self.doc.items.len(),
                "Feed nesting too deep, keeping items parsed so far"
            );
            return Ok(false);
        } else if self.item.is_none() {
            if frame.local == "channel" && self.channel_depth.is_none() {
                self.channel_depth = Some(depth);
            } else if frame.is(Ns::Plain, "item") || (frame.local == "entry" && (self.atom || frame.ns == Ns::Atom)) {
                let entry = FeedEntry {
                    atom_link: frame
                        .attrs
                        .iter()
                        .find(|a| a.ns == Ns::Atom && a.local == "link")
                        .and_then(|a| non_empty(&a.value)),
                    ..FeedEntry::default()
                };
                self.item = Some(OpenItem {
                    depth,
                    entry,
                    malformed: frame.malformed,
                });
            }
        }

        self.stack.push(frame);
        Ok(true)
    }

    fn append_text(&mut self, text: &BytesText<'_>) {
        match text.unescape() {
            Ok(s) => self.append_str(&s, false),
            Err(_) => match text.unescape_with(resolve_entity) {
                Ok(s) => self.append_str(&s, false),
                Err(e) => {
                    tracing::debug!(error = %e, "Unresolvable entity in feed text");
                    self.append_str(&String::from_utf8_lossy(text), true);
                }
            },
        }
    }

    fn append_str(&mut self, s: &str, malformed: bool) {
        if let Some(frame) = self.stack.last_mut() {
            frame.text.push_str(s);
            frame.malformed |= malformed;
        }
    }

    fn close(&mut self) {
        let Some(frame) = self.stack.pop() else {
            return;
        };
        let depth = self.stack.len();

        if let Some(open) = self.item.as_mut() {
            if depth == open.depth {
                self.finish_item(frame.malformed);
                return;
            }
            if depth > open.depth {
                open.malformed |= frame.malformed;
                apply_item_field(
                    &mut open.entry,
                    &frame,
                    self.stack.last(),
                    depth == open.depth + 1,
                );
                return;
            }
        }

        match self.channel_depth {
            Some(channel) if depth == channel => self.channel_depth = None,
            Some(channel) if depth == channel + 1 => apply_channel_field(&mut self.doc, &frame),
            Some(channel) if depth == channel + 2 => {
                if self.stack.last().is_some_and(|p| p.is(Ns::Plain, "image")) {
                    apply_channel_image(&mut self.doc, &frame);
                }
            }
            _ => {}
        }
    }

    fn finish_item(&mut self, closing_malformed: bool) {
        let Some(open) = self.item.take() else {
            return;
        };
        if open.malformed || closing_malformed {
            self.skipped += 1;
            tracing::warn!(title = %open.entry.title, "Skipping malformed feed item");
        } else {
            self.doc.items.push(open.entry);
        }
    }

    fn finish(mut self) -> Result<FeedDocument, ParseError> {
        if !self.root_seen {
            return Err(ParseError::MissingRoot);
        }
        if let Some(open) = self.item.take() {
            self.skipped += 1;
            tracing::warn!(title = %open.entry.title, "Dropping unterminated feed item");
        }
        if self.skipped > 0 {
            tracing::debug!(
                skipped = self.skipped,
                kept = self.doc.items.len(),
                "Feed parsed with skipped items"
            );
        }
        Ok(self.doc)
    }
}

fn apply_item_field(entry: &mut FeedEntry, frame: &Frame, parent: Option<&Frame>, direct: bool) {
    // Image carriers count wherever they sit inside the item (media:group etc.)
    match frame.qname.as_str() {
        "media:content" if entry.media_content.is_none() => {
            entry.media_content = Some(frame.media_ref());
        }
        "media:thumbnail" if entry.media_thumbnail.is_none() => {
            entry.media_thumbnail = Some(frame.media_ref());
        }
        _ => {}
    }
    if frame.ns == Ns::Media {
        match frame.local.as_str() {
            "content" if entry.mrss_content.is_none() => entry.mrss_content = Some(frame.media_ref()),
            "thumbnail" if entry.mrss_thumbnail.is_none() => {
                entry.mrss_thumbnail = Some(frame.media_ref())
            }
            _ => {}
        }
    }

    let parent_is = |ns: Ns, local: &str| parent.is_some_and(|p| p.is(ns, local));

    if frame.local == "img" && parent.is_some_and(|p| p.local == "figure") && entry.figure_image.is_none() {
        entry.figure_image = frame.attr("src").and_then(non_empty).or_else(|| frame.trimmed_text());
    }
    if frame.is(Ns::Atom, "name") && parent_is(Ns::Atom, "author") && entry.creator.is_none() {
        entry.creator = frame.trimmed_text();
    }
    if frame.is(Ns::Plain, "url") && parent_is(Ns::Plain, "image") && entry.image.is_none() {
        entry.image = frame.trimmed_text();
    }

    if !direct {
        return;
    }

    match (frame.ns, frame.local.as_str()) {
        (Ns::Plain | Ns::Atom, "link") => {
            if let Some(href) = frame.attr("href").and_then(non_empty) {
                if frame.attr("rel") == Some("enclosure") {
                    if entry.enclosure.is_none() {
                        entry.enclosure = Some(Enclosure {
                            url: href,
                            mime_type: frame.attr("type").map(str::to_string),
                            length: frame.attr("length").and_then(|l| l.trim().parse().ok()),
                        });
                    }
                } else if frame.is_alternate_link() && entry.atom_link_href.is_none() {
                    entry.atom_link_href = Some(href);
                }
            } else if frame.ns == Ns::Plain && entry.link.is_none() {
                entry.link = frame.trimmed_text();
            }
        }
        (Ns::Plain | Ns::Atom, "title") => entry.title = frame.text.trim().to_string(),
        (Ns::Plain, "description") | (Ns::Atom, "summary") => {
            entry.description = frame.text.trim().to_string();
        }
        (Ns::Content, "encoded") | (Ns::Atom, "content") => {
            entry.content_encoded = frame.trimmed_text();
        }
        (Ns::Plain, "guid") | (Ns::Atom, "id") => {
            entry.guid = frame.trimmed_text().map(|value| Guid {
                value,
                is_permalink: frame.attr("isPermaLink").is_some_and(is_truthy),
            });
        }
        (Ns::Plain, "pubDate") | (Ns::Atom, "published") => {
            if let Some(date) = frame.trimmed_text() {
                entry.pub_date = Some(date);
            }
        }
        (Ns::Atom, "updated") | (Ns::DublinCore, "date") => {
            if entry.pub_date.is_none() {
                entry.pub_date = frame.trimmed_text();
            }
        }
        (Ns::DublinCore, "creator") => {
            if let Some(creator) = frame.trimmed_text() {
                entry.creator = Some(creator);
            }
        }
        (Ns::Plain, "author") => {
            if entry.creator.is_none() {
                entry.creator = frame.trimmed_text();
            }
        }
        (Ns::Plain, "image") => {
            if let Some(image) = frame.trimmed_text() {
                entry.image = Some(image);
            }
        }
        (Ns::Plain, "enclosure") => {
            if entry.enclosure.is_none() {
                if let Some(url) = frame.attr("url") {
                    entry.enclosure = Some(Enclosure {
                        url: url.trim().to_string(),
                        mime_type: frame.attr("type").map(str::to_string),
                        length: frame.attr("length").and_then(|l| l.trim().parse().ok()),
                    });
                }
            }
        }
        (Ns::Plain, "ipimage") => entry.ip_image = frame.trimmed_text(),
        _ => {}
    }
}

fn apply_channel_field(doc: &mut FeedDocument, frame: &Frame) {
    match (frame.ns, frame.local.as_str()) {
        (Ns::Plain | Ns::Atom, "title") => doc.title = frame.text.trim().to_string(),
        (Ns::Plain, "link") if frame.attr("href").is_none() => {
            doc.link = frame.text.trim().to_string();
        }
        (Ns::Atom, "link") if frame.is_alternate_link() && doc.link.is_empty() => {
            doc.link = frame.attr("href").unwrap_or_default().trim().to_string();
        }
        (Ns::Plain, "description") | (Ns::Atom, "subtitle") => {
            doc.description = frame.text.trim().to_string();
        }
        (Ns::Plain, "language") | (Ns::DublinCore, "language") => {
            doc.language = frame.trimmed_text();
        }
        (Ns::Plain, "managingEditor") => doc.managing_editor = frame.trimmed_text(),
        (Ns::Plain, "category") if doc.category.is_none() => doc.category = frame.trimmed_text(),
        (Ns::Plain, "image") => {
            doc.image.get_or_insert_with(ChannelImage::default);
        }
        _ => {}
    }
}

fn apply_channel_image(doc: &mut FeedDocument, frame: &Frame) {
    let image = doc.image.get_or_insert_with(ChannelImage::default);
    let value = frame.text.trim().to_string();
    match frame.local.as_str() {
        "title" => image.title = value,
        "link" => image.link = value,
        "url" => image.url = value,
        _ => {}
    }
}

/// XML builtins plus the HTML entities publishers routinely leak into feeds.
fn resolve_entity(name: &str) -> Option<&'static str> {
    let value = match name {
        "amp" => "&",
        "lt" => "<",
        "gt" => ">",
        "quot" => "\"",
        "apos" => "'",
        "nbsp" => "\u{a0}",
        "ndash" => "\u{2013}",
        "mdash" => "\u{2014}",
        "lsquo" => "\u{2018}",
        "rsquo" => "\u{2019}",
        "ldquo" => "\u{201c}",
        "rdquo" => "\u{201d}",
        "laquo" => "\u{ab}",
        "raquo" => "\u{bb}",
        "hellip" => "\u{2026}",
        "bull" => "\u{2022}",
        "middot" => "\u{b7}",
        "copy" => "\u{a9}",
        "reg" => "\u{ae}",
        "deg" => "\u{b0}",
        "euro" => "\u{20ac}",
        _ => return None,
    };
    Some(value)
}

/// Boolean attribute spellings read as true; anything else is false.
fn is_truthy(value: &str) -> bool {
    matches!(value.trim(), "1" | "t" | "T" | "true" | "TRUE" | "True")
}

fn non_empty(s: &str) -> Option<String> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
