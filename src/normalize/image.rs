use scraper::node::Element;
use scraper::{ElementRef, Html};

use super::is_http_url;
use crate::feed::{FeedEntry, MediaRef};

/// Picks the image URL for an entry, or an empty string when it has none.
///
/// Carriers are consulted in this order, the first hit wins:
///
/// 1. Media RSS `content` under the Media RSS namespace (any prefix)
/// 2. literal `media:content`
/// 3. literal `media:thumbnail`
/// 4. Media RSS `thumbnail` under the Media RSS namespace
/// 5. inline `<image>`
/// 6. `media:content` again, unvalidated: `url` then its character data
/// 7. `<figure><img>`
/// 8. the first image referenced by the description HTML
/// 9. `<enclosure url>`
/// 10. `<ipimage>`
///
/// Only 1 to 5 are checked for an `http(s)://` prefix.
pub fn resolve_image(entry: &FeedEntry) -> String {
    validated_media(&entry.mrss_content)
        .or_else(|| validated_media(&entry.media_content))
        .or_else(|| validated_media(&entry.media_thumbnail))
        .or_else(|| validated_media(&entry.mrss_thumbnail))
        .or_else(|| {
            entry
                .image
                .as_deref()
                .filter(|url| is_http_url(url))
                .map(|url| url.trim().to_string())
        })
        .or_else(|| entry.media_content.as_ref().and_then(raw_media))
        .or_else(|| entry.figure_image.clone().filter(|url| !url.is_empty()))
        .or_else(|| scan_description(&entry.description))
        .or_else(|| {
            entry
                .enclosure
                .as_ref()
                .map(|e| e.url.clone())
                .filter(|url| !url.is_empty())
        })
        .or_else(|| entry.ip_image.clone().filter(|url| !url.is_empty()))
        .unwrap_or_default()
}

fn validated_media(media: &Option<MediaRef>) -> Option<String> {
    media
        .as_ref()
        .and_then(|m| m.url.as_deref())
        .filter(|url| is_http_url(url))
        .map(|url| url.trim().to_string())
}

fn raw_media(media: &MediaRef) -> Option<String> {
    media
        .url
        .clone()
        .filter(|url| !url.is_empty())
        .or_else(|| media.text.clone().filter(|text| !text.is_empty()))
}

/// Finds an image reference inside description HTML.
fn scan_description(description: &str) -> Option<String> {
    if description.trim().is_empty() {
        return None;
    }
    let fragment = Html::parse_fragment(description);
    let found = scan_element(fragment.root_element());
    (!found.is_empty()).then_some(found)
}

/// Depth-first scan; a non-empty result from a later child replaces anything
/// found earlier, so the last reference in document order wins.
fn scan_element(el: ElementRef<'_>) -> String {
    let node = el.value();
    let mut found = String::new();

    match node.name() {
        "img" => {
            if let Some(src) = node.attr("src") {
                found = src.to_string();
            }
        }
        "enclosure" => {
            if let Some(url) = node.attr("url") {
                return url.to_string();
            }
            if let Some(value) = last_attr(node, &["img", "image"]) {
                found = value;
            }
        }
        "media:content" | "media:thumbnail" => {
            if let Some(value) = last_attr(node, &["url", "img", "image"]) {
                found = value;
            }
        }
        "image" => {
            for child in el.children().filter_map(ElementRef::wrap) {
                if child.value().name() == "url" {
                    if let Some(text) = child.first_child().and_then(|n| n.value().as_text()) {
                        found = text.to_string();
                    }
                }
            }
            if let Some(value) = last_attr(node, &["url", "img", "image"]) {
                found = value;
            }
        }
        "description" | "content:encoded" => {
            if let Some(text) = el.first_child().and_then(|n| n.value().as_text()) {
                if text.contains("http") {
                    found = extract_url_from_text(text);
                }
            }
        }
        _ => {}
    }

    for child in el.children().filter_map(ElementRef::wrap) {
        let nested = scan_element(child);
        if !nested.is_empty() {
            found = nested;
        }
    }

    found
}

fn last_attr(node: &Element, names: &[&str]) -> Option<String> {
    node.attrs()
        .filter(|(name, _)| names.contains(name))
        .last()
        .map(|(_, value)| value.to_string())
}

/// Cuts the URL out of free text: from the first `http` up to the next space.
fn extract_url_from_text(text: &str) -> String {
    let Some(start) = text.find("http") else {
        return String::new();
    };
    let rest = &text[start..];
    let end = rest.find(' ').unwrap_or(rest.len());
    rest[..end].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::Enclosure;

    fn media(url: &str) -> Option<MediaRef> {
        Some(MediaRef {
            url: Some(url.to_string()),
            text: None,
        })
    }

    #[test]
    fn test_no_carriers_is_empty() {
        assert_eq!(resolve_image(&FeedEntry::default()), "");
    }

    #[test]
    fn test_media_content_beats_thumbnail() {
        let entry = FeedEntry {
            media_content: media("https://img.example.com/content.jpg"),
            media_thumbnail: media("https://img.example.com/thumb.jpg"),
            ..FeedEntry::default()
        };
        assert_eq!(resolve_image(&entry), "https://img.example.com/content.jpg");
    }

    #[test]
    fn test_namespaced_content_beats_literal_thumbnail() {
        let entry = FeedEntry {
            media_thumbnail: media("https://img.example.com/thumb.jpg"),
            mrss_content: media("https://img.example.com/mrss.jpg"),
            ..FeedEntry::default()
        };
        assert_eq!(resolve_image(&entry), "https://img.example.com/mrss.jpg");
    }

    #[test]
    fn test_namespaced_content_beats_literal_content() {
        let entry = FeedEntry {
            media_content: media("https://img.example.com/content.jpg"),
            mrss_content: media("https://img.example.com/mrss.jpg"),
            ..FeedEntry::default()
        };
        assert_eq!(resolve_image(&entry), "https://img.example.com/mrss.jpg");
    }

    #[test]
    fn test_namespaced_thumbnail_only_when_nothing_earlier() {
        let entry = FeedEntry {
            media_thumbnail: media("https://img.example.com/thumb.jpg"),
            mrss_thumbnail: media("https://img.example.com/mrss-thumb.jpg"),
            ..FeedEntry::default()
        };
        assert_eq!(resolve_image(&entry), "https://img.example.com/thumb.jpg");

        let entry = FeedEntry {
            mrss_thumbnail: media("https://img.example.com/mrss-thumb.jpg"),
            ..FeedEntry::default()
        };
        assert_eq!(resolve_image(&entry), "https://img.example.com/mrss-thumb.jpg");
    }

    #[test]
    fn test_invalid_url_is_skipped() {
        let entry = FeedEntry {
            media_thumbnail: media("//img.example.com/relative.jpg"),
            image: Some("https://img.example.com/inline.jpg".to_string()),
            ..FeedEntry::default()
        };
        assert_eq!(resolve_image(&entry), "https://img.example.com/inline.jpg");
    }

    #[test]
    fn test_unvalidated_media_content_fallback() {
        let entry = FeedEntry {
            media_content: media("/images/relative.jpg"),
            figure_image: Some("https://img.example.com/figure.jpg".to_string()),
            ..FeedEntry::default()
        };
        assert_eq!(resolve_image(&entry), "/images/relative.jpg");

        let entry = FeedEntry {
            media_content: Some(MediaRef {
                url: None,
                text: Some("https://img.example.com/chardata.jpg".to_string()),
            }),
            ..FeedEntry::default()
        };
        assert_eq!(resolve_image(&entry), "https://img.example.com/chardata.jpg");
    }

    #[test]
    fn test_figure_beats_description() {
        let entry = FeedEntry {
            figure_image: Some("https://img.example.com/figure.jpg".to_string()),
            description: r#"<img src="https://img.example.com/desc.jpg">"#.to_string(),
            ..FeedEntry::default()
        };
        assert_eq!(resolve_image(&entry), "https://img.example.com/figure.jpg");
    }

    #[test]
    fn test_description_img() {
        let entry = FeedEntry {
            description: r#"<p>Story <img src="https://img.example.com/desc.jpg" alt=""></p>"#
                .to_string(),
            ..FeedEntry::default()
        };
        assert_eq!(resolve_image(&entry), "https://img.example.com/desc.jpg");
    }

    #[test]
    fn test_description_last_image_wins() {
        let html = r#"<img src="https://img.example.com/one.jpg"><div><img src="https://img.example.com/two.jpg"></div>"#;
        assert_eq!(
            scan_description(html).as_deref(),
            Some("https://img.example.com/two.jpg")
        );
    }

    #[test]
    fn test_description_enclosure_returns_url_without_children() {
        let html = r#"<enclosure url="https://img.example.com/enc.jpg"><img src="https://img.example.com/inner.jpg"></enclosure>"#;
        assert_eq!(
            scan_description(html).as_deref(),
            Some("https://img.example.com/enc.jpg")
        );
    }

    #[test]
    fn test_description_media_content_attribute() {
        let html = r#"<media:content url="https://img.example.com/m.jpg"></media:content>"#;
        assert_eq!(
            scan_description(html).as_deref(),
            Some("https://img.example.com/m.jpg")
        );
    }

    #[test]
    fn test_description_without_image_is_none() {
        assert_eq!(scan_description("<p>No pictures here</p>"), None);
        assert_eq!(scan_description(""), None);
    }

    #[test]
    fn test_enclosure_then_ipimage() {
        let entry = FeedEntry {
            enclosure: Some(Enclosure {
                url: "https://img.example.com/enc.jpg".to_string(),
                mime_type: Some("image/jpeg".to_string()),
                length: None,
            }),
            ip_image: Some("https://img.example.com/ip.jpg".to_string()),
            ..FeedEntry::default()
        };
        assert_eq!(resolve_image(&entry), "https://img.example.com/enc.jpg");

        let entry = FeedEntry {
            ip_image: Some("https://img.example.com/ip.jpg".to_string()),
            ..FeedEntry::default()
        };
        assert_eq!(resolve_image(&entry), "https://img.example.com/ip.jpg");
    }

    #[test]
    fn test_extract_url_from_text() {
        assert_eq!(
            extract_url_from_text("see https://img.example.com/a.jpg for details"),
            "https://img.example.com/a.jpg"
        );
        assert_eq!(extract_url_from_text("tail http://x.example/b.png"), "http://x.example/b.png");
        assert_eq!(extract_url_from_text("nothing here"), "");
    }
}
