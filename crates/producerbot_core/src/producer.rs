use std::sync::OnceLock;

use regex::Regex;

use crate::error::PageError;

/// Category named by the page's `{{ProdLinks|...}}` marker.
///
/// `{{ProdLinks|catname=Foo}}`, `{{ProdLinks|1=Foo}}` and `{{ProdLinks|Foo}}`
/// all yield `Foo`.
pub fn producer_category(content: &str) -> Result<String, PageError> {
    let captures = prod_links_regex()
        .captures(content)
        .ok_or(PageError::MissingMarker)?;
    let raw = captures.get(1).map(|value| value.as_str()).unwrap_or("");
    Ok(category_param_regex()
        .replacen(raw.trim(), 1, "")
        .into_owned())
}

fn prod_links_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| Regex::new(r"\{\{\s*[Pp]rodLinks\s*\|([^}|]*)").expect("valid regex"))
}

fn category_param_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| Regex::new(r"\s*\b(catname|1)\b\s*=\s*").expect("valid regex"))
}
