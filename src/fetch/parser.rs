//! HTML inspection for content metrics
//!
//! The orchestrator does not store page bodies; it records how many distinct
//! outbound links a page carries and its title for reporting.

use scraper::{Html, Selector};
use std::collections::BTreeSet;
use url::Url;

/// Metrics extracted from an HTML page
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageSummary {
    /// Text of the first non-empty `<title>`
    pub title: Option<String>,

    /// Distinct absolute http(s) links found in `<a href>` tags
    pub links: BTreeSet<String>,
}

impl PageSummary {
    pub fn links_found(&self) -> u64 {
        self.links.len() as u64
    }
}

/// Summarizes an HTML document
///
/// # Link Counting Rules
///
/// **Counted:**
/// - `<a href="...">` resolved against `base_url`
///
/// **Ignored:**
/// - `<a href="..." download>`
/// - `javascript:`, `mailto:`, `tel:` and `data:` links
/// - Fragment-only links (same page anchors)
/// - Anything that does not resolve to http(s)
///
/// # Example
///
/// ```
/// use batch_harvest::fetch::summarize_page;
/// use url::Url;
///
/// let html = r#"<html><head><title>Test</title></head><body><a href="/page">Link</a></body></html>"#;
/// let base_url = Url::parse("https://example.com/").unwrap();
/// let summary = summarize_page(html, &base_url);
/// assert_eq!(summary.title, Some("Test".to_string()));
/// assert_eq!(summary.links_found(), 1);
/// ```
pub fn summarize_page(html: &str, base_url: &Url) -> PageSummary {
    let document = Html::parse_document(html);

    PageSummary {
        title: extract_title(&document),
        links: extract_links(&document, base_url),
    }
}

fn extract_title(document: &Html) -> Option<String> {
    let title_selector = Selector::parse("title").ok()?;

    document
        .select(&title_selector)
        .map(|element| element.text().collect::<String>().trim().to_string())
        .find(|s| !s.is_empty())
}

fn extract_links(document: &Html, base_url: &Url) -> BTreeSet<String> {
    let mut links = BTreeSet::new();

    if let Ok(a_selector) = Selector::parse("a[href]") {
        for element in document.select(&a_selector) {
            if element.value().attr("download").is_some() {
                continue;
            }

            if let Some(absolute_url) = element
                .value()
                .attr("href")
                .and_then(|href| resolve_link(href, base_url))
            {
                links.insert(absolute_url);
            }
        }
    }

    links
}

/// Resolves a link href to an absolute http(s) URL without its fragment
fn resolve_link(href: &str, base_url: &Url) -> Option<String> {
    let href = href.trim();

    if href.is_empty() || href.starts_with('#') {
        return None;
    }

    let lowered = href.to_ascii_lowercase();
    if ["javascript:", "mailto:", "tel:", "data:"]
        .iter()
        .any(|scheme| lowered.starts_with(scheme))
    {
        return None;
    }

    let mut absolute_url = base_url.join(href).ok()?;
    if absolute_url.scheme() != "http" && absolute_url.scheme() != "https" {
        return None;
    }
    absolute_url.set_fragment(None);

    Some(absolute_url.to_string())
}
