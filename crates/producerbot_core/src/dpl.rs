//! Dynamic page list (DPL) queries and parsing of their rendered output.

use std::sync::OnceLock;

use scraper::{Html, Selector};

/// Renders each result as `TITLE||`; the commas separate DPL's
/// list-start, item-start, item-end and list-end slots.
pub const RESULT_FORMAT: &str = ",%TITLE%,{{!}}{{!}},";

const RESULT_SEPARATOR: &str = "||";

/// Song pages in the producer's song categories that the producer page does
/// not link yet.
pub fn song_query(category: &str, producer_title: &str) -> String {
    let pattern = category.replace('%', "\\%").replace('_', "\\_");
    format!(
        "{{{{#dpl:|categorymatch={pattern} songs list%|notcategory={category} songs list/Albums|notlinksfrom={producer_title}|namespace=|format={RESULT_FORMAT}}}}}"
    )
}

/// Album pages in the producer's album category that the producer page does
/// not link yet.
pub fn album_query(category: &str, producer_title: &str) -> String {
    format!(
        "{{{{#dpl:|category={category} songs list/Albums|notlinksfrom={producer_title}|namespace=|format={RESULT_FORMAT}}}}}"
    )
}

/// Titles listed in the first paragraph of a parsed DPL query.
pub fn extract_titles(rendered: &str) -> Vec<String> {
    let document = Html::parse_document(rendered);
    let Some(paragraph) = document.select(paragraph_selector()).next() else {
        return Vec::new();
    };
    let text: String = paragraph.text().collect();
    let text = text.trim();
    if text.is_empty() {
        return Vec::new();
    }

    let mut fragments: Vec<&str> = text.split(RESULT_SEPARATOR).collect();
    fragments.pop();
    fragments
        .into_iter()
        .map(|fragment| {
            let trimmed = fragment.trim();
            let trimmed = trimmed.strip_prefix(',').unwrap_or(trimmed);
            let trimmed = trimmed.strip_suffix(',').unwrap_or(trimmed);
            trimmed.trim().to_string()
        })
        .collect()
}

fn paragraph_selector() -> &'static Selector {
    static SELECTOR: OnceLock<Selector> = OnceLock::new();
    SELECTOR.get_or_init(|| Selector::parse("div.mw-parser-output > p").expect("valid selector"))
}
