//! Raw feed structures as decoded from the wire.
//!
//! Nothing here is trusted: every field a real-world feed may omit is an
//! `Option` (or an empty string for the text fields every dialect has), and
//! the normalizer decides which of them to believe.

/// Channel-level `<image>` block.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelImage {
    pub title: String,
    pub link: String,
    pub url: String,
}

/// Parse result of one feed URL.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeedDocument {
    pub title: String,
    pub link: String,
    pub description: String,
    pub language: Option<String>,
    pub managing_editor: Option<String>,
    pub category: Option<String>,
    pub image: Option<ChannelImage>,
    pub items: Vec<FeedEntry>,
}

/// `<guid>` value and its `isPermaLink` attribute.
///
/// A guid without the attribute is treated as not a permalink.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Guid {
    pub value: String,
    pub is_permalink: bool,
}

/// A `media:content` / `media:thumbnail` carrier.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MediaRef {
    /// The `url` attribute.
    pub url: Option<String>,
    /// Character data of the element, which some publishers use instead of `url`.
    pub text: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Enclosure {
    pub url: String,
    pub mime_type: Option<String>,
    pub length: Option<u64>,
}

/// One `<item>` (or Atom `<entry>`) with every carrier the dialects use.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeedEntry {
    pub guid: Option<Guid>,
    /// Text of a plain RSS `<link>`.
    pub link: Option<String>,
    /// `href` of the first Atom-style `<link href="..."/>` inside the item.
    pub atom_link_href: Option<String>,
    /// Atom-namespaced `link` attribute on the item element itself.
    pub atom_link: Option<String>,
    pub title: String,
    pub description: String,
    pub pub_date: Option<String>,
    pub creator: Option<String>,
    /// Element spelled literally `media:content`.
    pub media_content: Option<MediaRef>,
    /// Element spelled literally `media:thumbnail`.
    pub media_thumbnail: Option<MediaRef>,
    /// `content` bound to the Media RSS namespace under any prefix.
    pub mrss_content: Option<MediaRef>,
    /// `thumbnail` bound to the Media RSS namespace under any prefix.
    pub mrss_thumbnail: Option<MediaRef>,
    /// Text of an inline `<image>` element.
    pub image: Option<String>,
    /// `<figure><img>` reference.
    pub figure_image: Option<String>,
    pub enclosure: Option<Enclosure>,
    /// Free-text `<ipimage>` used by some regional publishers.
    pub ip_image: Option<String>,
    pub content_encoded: Option<String>,
}
