//! HTML 文档元数据处理模块
//!
//! 读取 `<base>`、字符编码声明与标题，并在重写后的文档中移除 `<base>`。

use markup5ever_rcdom::Handle;

use crate::mime::parse_content_type_value;

use super::dom::{detach_node, find_nodes, get_node_attr, get_text_content};

/// 获取文档的 base URL
///
/// 只有第一个带 `href` 的 `<base>` 标签有效。
pub fn get_base_url(handle: &Handle) -> Option<String> {
    find_nodes(handle, &["html", "head", "base"])
        .iter()
        .find_map(|base_node| get_node_attr(base_node, "href"))
}

/// 获取文档字符编码
///
/// 支持 `<meta charset="...">` 与
/// `<meta http-equiv="content-type" content="text/html; charset=...">` 两种形式。
pub fn get_charset(node: &Handle) -> Option<String> {
    for meta_node in find_nodes(node, &["html", "head", "meta"]).iter() {
        if let Some(charset) = get_node_attr(meta_node, "charset") {
            return Some(charset.trim().to_string());
        }

        if get_node_attr(meta_node, "http-equiv")
            .unwrap_or_default()
            .eq_ignore_ascii_case("content-type")
        {
            let charset = get_node_attr(meta_node, "content")
                .and_then(|value| parse_content_type_value(&value).ok())
                .and_then(|content_type| content_type.charset().map(str::to_string));
            if charset.is_some() {
                return charset;
            }
        }
    }

    None
}

/// 获取文档标题
pub fn get_title(node: &Handle) -> Option<String> {
    find_nodes(node, &["html", "head", "title"])
        .first()
        .map(|title_node| get_text_content(title_node).trim().to_string())
        .filter(|title| !title.is_empty())
}

/// 删除所有 `<base>` 元素，返回删除的数量
pub fn remove_base_elements(handle: &Handle) -> usize {
    let bases = find_nodes(handle, &["base"]);
    for base in &bases {
        detach_node(base);
    }
    bases.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parsers::html::dom::html_to_dom;

    #[test]
    fn reads_base_charset_and_title() {
        let dom = html_to_dom(
            b"<html><head><base target=_top><base href='https://b.example/'>\
              <meta http-equiv=Content-Type content='text/html; charset=ISO-8859-1'>\
              <title> Hello </title></head></html>",
            "utf-8",
        );

        assert_eq!(get_base_url(&dom.document), Some("https://b.example/".to_string()));
        assert_eq!(get_charset(&dom.document), Some("ISO-8859-1".to_string()));
        assert_eq!(get_title(&dom.document), Some("Hello".to_string()));
    }

    #[test]
    fn missing_metadata() {
        let dom = html_to_dom(b"<p>x</p>", "utf-8");
        assert_eq!(get_base_url(&dom.document), None);
        assert_eq!(get_charset(&dom.document), None);
        assert_eq!(get_title(&dom.document), None);
    }

    #[test]
    fn removes_base_elements() {
        let dom = html_to_dom(b"<head><base href=/x/></head><body></body>", "utf-8");
        assert_eq!(remove_base_elements(&dom.document), 1);
        assert_eq!(get_base_url(&dom.document), None);
    }
}
