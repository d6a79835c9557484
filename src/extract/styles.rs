use scraper::{Html, Selector};

/// True when `selectors` parses and matches no element of `document`.
/// Selectors with pseudo-classes or pseudo-elements depend on state the
/// saved page does not have, so they are never reported unused.
pub fn selector_is_unused(document: &Html, selectors: &str) -> bool {
    if selectors.contains(':') || selectors.trim().is_empty() {
        return false;
    }

    match Selector::parse(selectors) {
        Ok(selector) => document.select(&selector).next().is_none(),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_against_the_document() {
        let document = Html::parse_document("<div class=used><p id=x></p></div>");

        assert!(!selector_is_unused(&document, ".used > p"));
        assert!(!selector_is_unused(&document, ".missing, #x"));
        assert!(selector_is_unused(&document, ".missing"));
        assert!(!selector_is_unused(&document, "a:hover"));
        assert!(!selector_is_unused(&document, "[[broken"));
    }
}
