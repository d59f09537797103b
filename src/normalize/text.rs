use scraper::Html;

/// Flattens an HTML fragment to its text content.
///
/// Text nodes are concatenated in document order and the outer whitespace is
/// trimmed; inner whitespace is left as the publisher wrote it. Input with no
/// markup at all is returned trimmed without going through the HTML parser.
pub fn html_to_text(raw: &str) -> String {
    if !raw.contains('<') && !raw.contains('&') {
        return raw.trim().to_string();
    }

    let fragment = Html::parse_fragment(raw);
    let text: String = fragment.root_element().text().collect();
    text.trim().to_string()
}
