//! HTML parser for extracting article links
//!
//! Article HTML from the REST content API links other articles with hrefs
//! relative to the page itself (`./Title_With_Underscores`). Everything else
//! (external links, namespaced pages, in-page anchors) is ignored.

use scraper::{Html, Selector};
use std::collections::HashSet;

/// Extracts the titles of all articles linked from an article's HTML
///
/// # Link Extraction Rules
///
/// **Include:**
/// - `<a href="./...">` relative article links
///
/// **Exclude:**
/// - Absolute and protocol-relative links
/// - Namespaced pages (`File:`, `Category:`, `Template:`, `Help:`, ...)
/// - Fragment-only and empty links
///
/// Fragments and query strings are dropped, the remainder is
/// percent-decoded and underscores become spaces. Titles are returned once
/// each, in first-seen order.
///
/// # Arguments
///
/// * `html` - The article HTML
///
/// # Returns
///
/// The linked article titles
///
/// # Example
///
/// ```
/// use wiki_mapper::crawler::extract_article_links;
///
/// let html = r#"<p><a href="./Go_(programming_language)">Go</a> <a href="./File:Go.svg">logo</a></p>"#;
/// assert_eq!(extract_article_links(html), vec!["Go (programming language)"]);
/// ```
pub fn extract_article_links(html: &str) -> Vec<String> {
    let document = Html::parse_document(html);

    let Ok(a_selector) = Selector::parse("a[href]") else {
        return Vec::new();
    };

    let mut seen = HashSet::new();
    let mut titles = Vec::new();

    for element in document.select(&a_selector) {
        if let Some(title) = element.value().attr("href").and_then(href_to_title) {
            if seen.insert(title.clone()) {
                titles.push(title);
            }
        }
    }

    titles
}

/// Converts a relative article href into a title
///
/// Returns None if the href does not point at a plain article.
fn href_to_title(href: &str) -> Option<String> {
    let path = href.trim().strip_prefix("./")?;

    let end = path.find(|c| c == '#' || c == '?').unwrap_or(path.len());
    let path = &path[..end];

    if path.is_empty() || path.contains(':') {
        return None;
    }

    let decoded = urlencoding::decode(path).ok()?;

    // Decoding can reveal a namespace separator that was escaped as %3A
    if decoded.contains(':') {
        return None;
    }

    let title = decoded.replace('_', " ");
    let title = title.trim();
    if title.is_empty() {
        return None;
    }

    Some(title.to_string())
}
