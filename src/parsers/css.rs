//! CSS 解析器模块
//!
//! 使用 cssparser 对样式表进行词法扫描，找出所有外部资源引用（`@import` 与
//! `url()`）及其在源文本中的字节范围。重写时只替换这些范围，其余文本
//! 原样保留。
//!
//! # 主要功能
//!
//! - **引用扫描**: 记录 `@import` 字符串、`url()` 函数及未加引号的 URL
//! - **@charset 检测**: 按规范只识别样式表开头的 `@charset "...";`
//! - **规则范围**: 列出顶层样式规则的选择器及其范围，用于删除未使用的样式

use std::ops::Range;

use cssparser::{serialize_identifier, serialize_string, ParseError, Parser, ParserInput, Token};

/// 包含图片URL的CSS属性列表
const CSS_PROPS_WITH_IMAGE_URLS: &[&str] = &[
    // Universal
    "background",
    "background-image",
    "border-image",
    "border-image-source",
    "content",
    "cursor",
    "list-style",
    "list-style-image",
    "mask",
    "mask-image",
    // Specific to @counter-style
    "additive-symbols",
    "negative",
    "pad",
    "prefix",
    "suffix",
    "symbols",
];

/// Nesting deeper than this is not scanned.
const MAX_BLOCK_DEPTH: usize = 64;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CssReferenceKind {
    /// Target of an `@import` rule.
    Import,
    /// Any other `url()`.
    Url,
}

/// One reference inside a stylesheet.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CssReference {
    /// Byte range of the token to replace: a quoted string, or the whole
    /// `url(...)` when the URL is unquoted.
    pub span: Range<usize>,
    pub url: String,
    pub kind: CssReferenceKind,
    /// Name of the property the reference appears in, if any.
    pub property: Option<String>,
    pub quoted: bool,
}

impl CssReference {
    /// Text that replaces the span so that it points at `target`.
    pub fn replacement(&self, target: &str) -> String {
        if self.quoted {
            format_quoted_string(target)
        } else {
            format!("url({})", format_quoted_string(target))
        }
    }

    pub fn is_image_property(&self) -> bool {
        self.property.as_deref().map(is_image_url_prop).unwrap_or(false)
    }
}

/// A top-level style rule.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StyleRule {
    pub selectors: String,
    /// From the start of the prelude to the end of the block.
    pub span: Range<usize>,
}

/// 格式化CSS标识符
pub fn format_ident(ident: &str) -> String {
    let mut res: String = "".to_string();
    let _ = serialize_identifier(ident, &mut res);
    res = res.trim_end().to_string();
    res
}

/// 格式化带引号的CSS字符串
pub fn format_quoted_string(string: &str) -> String {
    let mut res: String = "".to_string();
    let _ = serialize_string(string, &mut res);
    res
}

/// 检查CSS属性是否可能包含图片URL
pub fn is_image_url_prop(prop_name: &str) -> bool {
    CSS_PROPS_WITH_IMAGE_URLS
        .iter()
        .any(|p| prop_name.eq_ignore_ascii_case(p))
}

/// Reads the encoding label of a leading `@charset "label";` rule. Only the
/// exact byte form CSS Syntax §3.2 allows is recognized.
pub fn sniff_charset_rule(bytes: &[u8]) -> Option<String> {
    const PREFIX: &[u8] = b"@charset \"";
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    let rest = bytes.strip_prefix(PREFIX)?;
    let end = rest.iter().position(|&b| b == b'"')?;

    if rest.get(end + 1) != Some(&b';') || end == 0 {
        return None;
    }
    std::str::from_utf8(&rest[..end]).ok().map(str::to_string)
}

struct ScanContext {
    pending_import: bool,
    property: Option<String>,
}

/// Lists every `@import` and `url()` reference with its byte range.
pub fn scan_css_references(css: &str) -> Vec<CssReference> {
    let mut input = ParserInput::new(css);
    let mut parser = Parser::new(&mut input);
    let mut references = Vec::new();

    scan_block(&mut parser, &mut references, None, 0);

    references
}

fn scan_block(
    parser: &mut Parser,
    references: &mut Vec<CssReference>,
    inherited_property: Option<&str>,
    depth: usize,
) {
    let mut context = ScanContext {
        pending_import: false,
        property: inherited_property.map(str::to_string),
    };

    loop {
        let start = parser.position().byte_index();
        let token = match parser.next_including_whitespace_and_comments() {
            Ok(token) => token.clone(),
            Err(_) => break,
        };
        let end = parser.position().byte_index();

        match token {
            Token::AtKeyword(name) => {
                context.pending_import = name.eq_ignore_ascii_case("import");
            }
            Token::Ident(name) => {
                context.property = Some(name.to_string());
            }
            Token::Semicolon => {
                context.pending_import = false;
                context.property = inherited_property.map(str::to_string);
            }
            Token::QuotedString(value) if context.pending_import => {
                context.pending_import = false;
                references.push(CssReference {
                    span: start..end,
                    url: value.to_string(),
                    kind: CssReferenceKind::Import,
                    property: None,
                    quoted: true,
                });
            }
            Token::UnquotedUrl(value) => {
                let kind = if context.pending_import {
                    CssReferenceKind::Import
                } else {
                    CssReferenceKind::Url
                };
                context.pending_import = false;
                references.push(CssReference {
                    span: start..end,
                    url: value.to_string(),
                    kind,
                    property: context.property.clone(),
                    quoted: false,
                });
            }
            Token::Function(name) if name.eq_ignore_ascii_case("url") => {
                let kind = if context.pending_import {
                    CssReferenceKind::Import
                } else {
                    CssReferenceKind::Url
                };
                context.pending_import = false;
                let property = context.property.clone();
                let _ = parser.parse_nested_block(|nested| {
                    scan_url_function(nested, references, kind, property);
                    Ok::<(), ParseError<()>>(())
                });
            }
            Token::Function(_)
            | Token::ParenthesisBlock
            | Token::SquareBracketBlock
            | Token::CurlyBracketBlock => {
                let is_rule_block = matches!(token, Token::CurlyBracketBlock);
                if is_rule_block {
                    context.pending_import = false;
                }
                let property = if is_rule_block {
                    None
                } else {
                    context.property.clone()
                };
                if depth < MAX_BLOCK_DEPTH {
                    let _ = parser.parse_nested_block(|nested| {
                        scan_block(nested, references, property.as_deref(), depth + 1);
                        Ok::<(), ParseError<()>>(())
                    });
                }
                if is_rule_block {
                    context.property = inherited_property.map(str::to_string);
                }
            }
            _ => {}
        }
    }
}

fn scan_url_function(
    parser: &mut Parser,
    references: &mut Vec<CssReference>,
    kind: CssReferenceKind,
    property: Option<String>,
) {
    loop {
        let start = parser.position().byte_index();
        let token = match parser.next() {
            Ok(token) => token.clone(),
            Err(_) => break,
        };
        let end = parser.position().byte_index();

        if let Token::QuotedString(value) = token {
            references.push(CssReference {
                span: start..end,
                url: value.to_string(),
                kind,
                property,
                quoted: true,
            });
            break;
        }
    }
}

/// Lists top-level style rules. At-rules and their blocks are skipped.
pub fn scan_style_rules(css: &str) -> Vec<StyleRule> {
    let mut input = ParserInput::new(css);
    let mut parser = Parser::new(&mut input);
    let mut rules = Vec::new();
    let mut prelude_start: Option<usize> = None;
    let mut in_at_rule = false;

    loop {
        let start = parser.position().byte_index();
        let token = match parser.next_including_whitespace_and_comments() {
            Ok(token) => token.clone(),
            Err(_) => break,
        };

        match token {
            Token::WhiteSpace(_) | Token::Comment(_) | Token::CDO | Token::CDC => {}
            Token::AtKeyword(_) => {
                in_at_rule = true;
                prelude_start.get_or_insert(start);
            }
            Token::Semicolon if in_at_rule || prelude_start.is_none() => {
                in_at_rule = false;
                prelude_start = None;
            }
            Token::CurlyBracketBlock => {
                let _ = parser.parse_nested_block(|_| Ok::<(), ParseError<()>>(()));
                let end = parser.position().byte_index();

                if let (Some(prelude), false) = (prelude_start, in_at_rule) {
                    rules.push(StyleRule {
                        selectors: css[prelude..start].trim().to_string(),
                        span: prelude..end,
                    });
                }
                in_at_rule = false;
                prelude_start = None;
            }
            _ => {
                prelude_start.get_or_insert(start);
            }
        }
    }

    rules
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_imports_and_urls() {
        let css = "@import \"a.css\";\n@import url(b.css) screen;\nbody { background: url( 'bg.png' ) }\n.x{cursor:url(c.cur),auto}";
        let refs = scan_css_references(css);

        assert_eq!(refs.len(), 4);
        assert_eq!((refs[0].kind, refs[0].url.as_str()), (CssReferenceKind::Import, "a.css"));
        assert_eq!(&css[refs[0].span.clone()], "\"a.css\"");
        assert_eq!((refs[1].kind, refs[1].url.as_str()), (CssReferenceKind::Import, "b.css"));
        assert_eq!(&css[refs[1].span.clone()], "url(b.css)");
        assert_eq!((refs[2].kind, refs[2].url.as_str()), (CssReferenceKind::Url, "bg.png"));
        assert_eq!(&css[refs[2].span.clone()], "'bg.png'");
        assert_eq!(refs[2].property.as_deref(), Some("background"));
        assert!(refs[2].is_image_property());
        assert_eq!(refs[3].url, "c.cur");
        assert_eq!(refs[3].property.as_deref(), Some("cursor"));
    }

    #[test]
    fn finds_urls_inside_at_rules() {
        let css = "@font-face { src: url(f.woff2) format('woff2') } @media print { a { background: url(\"p.png\") } }";
        let urls: Vec<String> = scan_css_references(css).into_iter().map(|r| r.url).collect();
        assert_eq!(urls, ["f.woff2", "p.png"]);
    }

    #[test]
    fn ignores_plain_strings() {
        assert!(scan_css_references("a::after { content: \"url(x.png)\" }").is_empty());
    }

    #[test]
    fn replacement_matches_token_form() {
        let refs = scan_css_references("a{b:url(x.png)} c{d:url('y.png')}");
        assert_eq!(refs[0].replacement("index_files/x.png"), "url(\"index_files/x.png\")");
        assert_eq!(refs[1].replacement("index_files/y.png"), "\"index_files/y.png\"");
    }

    #[test]
    fn sniffs_leading_charset_rule() {
        assert_eq!(sniff_charset_rule(b"@charset \"iso-8859-1\"; body{}"), Some("iso-8859-1".to_string()));
        assert_eq!(sniff_charset_rule(b"\xEF\xBB\xBF@charset \"utf-8\";"), Some("utf-8".to_string()));
        assert_eq!(sniff_charset_rule(b"@charset 'utf-8';"), None);
        assert_eq!(sniff_charset_rule(b" @charset \"utf-8\";"), None);
        assert_eq!(sniff_charset_rule(b"@charset \"utf-8\" ;"), None);
    }

    #[test]
    fn lists_top_level_rules() {
        let css = "@import 'a.css';\n/* c */ h1, .title { color: red }\n@media print { p { x: y } }\n#main > p{}";
        let rules = scan_style_rules(css);

        assert_eq!(rules.len(), 2);
        assert_eq!(rules[0].selectors, "h1, .title");
        assert_eq!(&css[rules[0].span.clone()], "h1, .title { color: red }");
        assert_eq!(rules[1].selectors, "#main > p");
    }

    #[test]
    fn test_is_image_url_prop() {
        assert!(is_image_url_prop("Background-Image"));
        assert!(!is_image_url_prop("color"));
    }

    #[test]
    fn test_format_helpers() {
        assert_eq!(format_quoted_string("a\"b"), "\"a\\\"b\"");
        assert_eq!(format_ident("my-class"), "my-class");
    }
}
