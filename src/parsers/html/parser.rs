//! HTML 解析器模块
//!
//! 解析 `<link>` 元素的 `rel` 属性，以及 `srcset` 属性中的候选图片。
//! `srcset` 中的每个 URL 都带有其在属性值中的字节范围，便于逐个替换。
//!
//! ```rust
//! use pagesnap::parsers::html::parser::{parse_link_type, parse_srcset, LinkType};
//!
//! let link_types = parse_link_type("stylesheet preload");
//! assert_eq!(link_types, vec![LinkType::Stylesheet, LinkType::Preload]);
//!
//! let srcset_items = parse_srcset("small.jpg 480w, large.jpg 800w");
//! assert_eq!(srcset_items.len(), 2);
//! ```

use std::ops::Range;

use super::utils::{is_favicon, WHITESPACES};

/// HTML链接类型枚举
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LinkType {
    /// 备用版本链接
    Alternate,
    /// Apple设备触摸图标
    AppleTouchIcon,
    /// DNS预取
    DnsPrefetch,
    /// 网站图标
    Favicon,
    /// 预加载资源
    Preload,
    /// CSS样式表
    Stylesheet,
}

/// SrcSet 属性中的单个候选项
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SrcSetItem<'a> {
    /// 图片文件的路径或URL
    pub path: &'a str,
    /// 路径在属性值中的字节范围
    pub span: Range<usize>,
    /// 宽度描述符（如 "480w"）或像素密度描述符（如 "2x"），可能为空
    pub descriptor: &'a str,
}

/// 解析HTML链接的rel属性值
///
/// 支持多个空格分隔的rel值，不区分大小写；不支持的值被忽略。
pub fn parse_link_type(link_attr_rel_value: &str) -> Vec<LinkType> {
    let mut types: Vec<LinkType> = vec![];

    for link_attr_rel_type in link_attr_rel_value.split_whitespace() {
        if link_attr_rel_type.eq_ignore_ascii_case("alternate") {
            types.push(LinkType::Alternate);
        } else if link_attr_rel_type.eq_ignore_ascii_case("dns-prefetch") {
            types.push(LinkType::DnsPrefetch);
        } else if link_attr_rel_type.eq_ignore_ascii_case("preload") {
            types.push(LinkType::Preload);
        } else if link_attr_rel_type.eq_ignore_ascii_case("stylesheet") {
            types.push(LinkType::Stylesheet);
        } else if is_favicon(link_attr_rel_type) {
            types.push(LinkType::Favicon);
        } else if link_attr_rel_type.eq_ignore_ascii_case("apple-touch-icon") {
            types.push(LinkType::AppleTouchIcon);
        }
    }

    types
}

fn is_whitespace(c: char) -> bool {
    WHITESPACES.contains(&c)
}

/// 解析HTML图片的srcset属性
///
/// 按 HTML 标准的候选项语法切分：URL 不含空白，URL 末尾的逗号结束候选项，
/// 描述符一直延续到括号外的下一个逗号。
pub fn parse_srcset(srcset: &str) -> Vec<SrcSetItem> {
    let mut srcset_items: Vec<SrcSetItem> = vec![];
    let mut pos = 0;

    while pos < srcset.len() {
        let rest = &srcset[pos..];
        let skipped = rest.len() - rest.trim_start_matches(|c: char| is_whitespace(c) || c == ',').len();
        pos += skipped;
        if pos >= srcset.len() {
            break;
        }

        let url_start = pos;
        let url_len = srcset[pos..].find(is_whitespace).unwrap_or(srcset.len() - pos);
        let mut url_end = url_start + url_len;
        pos = url_end;

        let raw_url = &srcset[url_start..url_end];
        let trimmed_url = raw_url.trim_end_matches(',');
        if trimmed_url.len() != raw_url.len() {
            url_end = url_start + trimmed_url.len();
            if !trimmed_url.is_empty() {
                srcset_items.push(SrcSetItem {
                    path: trimmed_url,
                    span: url_start..url_end,
                    descriptor: "",
                });
            }
            continue;
        }

        let mut depth = 0usize;
        let descriptor_start = pos;
        while let Some(c) = srcset[pos..].chars().next() {
            match c {
                '(' => depth += 1,
                ')' => depth = depth.saturating_sub(1),
                ',' if depth == 0 => break,
                _ => {}
            }
            pos += c.len_utf8();
        }

        srcset_items.push(SrcSetItem {
            path: trimmed_url,
            span: url_start..url_end,
            descriptor: srcset[descriptor_start..pos].trim_matches(WHITESPACES),
        });
    }

    srcset_items
}
