/// ASCII 空白字符
pub const WHITESPACES: &[char] = &[' ', '\t', '\n', '\x0c', '\r'];

/// `rel` tokens naming an icon of the page. `shortcut` is ignored on its
/// own, so `shortcut icon` matches through `icon`.
const ICON_REL_TOKENS: &[&str] = &["icon", "mask-icon", "fluid-icon"];

/// 检查 `rel` 单个取值是否表示页面图标
pub fn is_favicon(rel_token: &str) -> bool {
    ICON_REL_TOKENS
        .iter()
        .any(|token| token.eq_ignore_ascii_case(rel_token))
}

/// True for `type` attribute values that mark a `<style>` or `<link>` as CSS.
pub fn is_css_type(type_attr: Option<&str>) -> bool {
    match type_attr.map(str::trim) {
        None | Some("") => true,
        Some(value) => value.eq_ignore_ascii_case("text/css"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn icon_tokens() {
        assert!(is_favicon("ICON"));
        assert!(is_favicon("mask-icon"));
        assert!(!is_favicon("shortcut"));
    }

    #[test]
    fn css_types() {
        assert!(is_css_type(None));
        assert!(is_css_type(Some(" text/CSS ")));
        assert!(!is_css_type(Some("text/less")));
    }
}
