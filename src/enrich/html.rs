//! Small lookups over a parsed HTML document shared by the page strategies.

use scraper::{Html, Selector};

/// Non-empty `content` of the first `<meta {attr}="{key}">`.
pub(super) fn meta_content(document: &Html, attr: &str, key: &str) -> Option<String> {
    let selector = Selector::parse(&format!("meta[{}='{}']", attr, key)).ok()?;
    document
        .select(&selector)
        .filter_map(|elem| elem.value().attr("content"))
        .map(str::trim)
        .find(|content| !content.is_empty())
        .map(str::to_string)
}

pub(super) fn meta_property(document: &Html, property: &str) -> Option<String> {
    meta_content(document, "property", property)
}

pub(super) fn meta_name(document: &Html, name: &str) -> Option<String> {
    meta_content(document, "name", name)
}

/// Trimmed text of the first element matching `selector`, if non-empty.
pub(super) fn first_text(document: &Html, selector: &str) -> Option<String> {
    let selector = Selector::parse(selector).ok()?;
    let text: String = document.select(&selector).next()?.text().collect();
    let trimmed = text.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

/// Bodies of every `<script type="application/ld+json">` block, in document order.
pub(super) fn json_ld_scripts(document: &Html) -> Vec<String> {
    let Ok(selector) = Selector::parse("script[type='application/ld+json']") else {
        return Vec::new();
    };
    document
        .select(&selector)
        .map(|elem| elem.text().collect::<String>())
        .collect()
}
