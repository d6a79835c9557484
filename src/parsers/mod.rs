//! # 解析器模块
//!
//! - `html` - HTML文档解析、DOM操作、元数据处理
//! - `css` - CSS样式表引用扫描与规则范围
//! - `js` - 脚本与事件处理器识别

pub mod css;
pub mod html;
pub mod js;

use std::ops::Range;

pub use css::{scan_css_references, scan_style_rules, sniff_charset_rule, CssReference, CssReferenceKind};
pub use html::{get_base_url, get_charset, get_title, html_to_dom, serialize_document};
pub use js::attr_is_event_handler;

/// Replaces byte ranges of `text`. Ranges must not overlap; overlapping or
/// out-of-bounds edits are skipped.
pub fn splice_text(text: &str, mut edits: Vec<(Range<usize>, String)>) -> String {
    edits.sort_by_key(|(range, _)| range.start);

    let mut result = String::with_capacity(text.len());
    let mut pos = 0;
    for (range, replacement) in edits {
        if range.start < pos
            || range.end > text.len()
            || !text.is_char_boundary(range.start)
            || !text.is_char_boundary(range.end)
        {
            continue;
        }
        result.push_str(&text[pos..range.start]);
        result.push_str(&replacement);
        pos = range.end;
    }
    result.push_str(&text[pos..]);

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splices_in_any_order() {
        let text = "a url(x) b url(y)";
        let edits = vec![(14..17, "Y".to_string()), (2..8, "Z".to_string())];
        assert_eq!(splice_text(text, edits), "a Z b urlY");
    }

    #[test]
    fn skips_overlapping_edits() {
        let edits = vec![(0..3, "A".to_string()), (2..4, "B".to_string())];
        assert_eq!(splice_text("abcdef", edits), "Adef");
    }
}
