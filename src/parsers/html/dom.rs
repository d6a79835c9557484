use encoding_rs::Encoding;
use html5ever::parse_document;
use html5ever::tendril::TendrilSink;
use html5ever::{namespace_url, ns};
use markup5ever_rcdom::{Handle, NodeData, RcDom};

/// 将 HTML 字节转换为 DOM
pub fn html_to_dom(data: &[u8], document_encoding: &str) -> RcDom {
    let s: String = match Encoding::for_label(document_encoding.as_bytes()) {
        Some(encoding) => encoding.decode(data).0.into_owned(),
        None => String::from_utf8_lossy(data).into_owned(),
    };

    parse_document(RcDom::default(), Default::default())
        .from_utf8()
        .read_from(&mut s.as_bytes())
        .unwrap_or_default()
}

/// 查找指定路径的DOM节点
pub fn find_nodes(node: &Handle, node_names: &[&str]) -> Vec<Handle> {
    let mut found_nodes = Vec::new();
    let Some((node_name, rest)) = node_names.split_first() else {
        return found_nodes;
    };

    let matches = matches!(node.data, NodeData::Element { ref name, .. } if &*name.local == *node_name);

    if matches && rest.is_empty() {
        found_nodes.push(node.clone());
    }
    let next = if matches && !rest.is_empty() { rest } else { node_names };
    for child_node in node.children.borrow().iter() {
        found_nodes.append(&mut find_nodes(child_node, next));
    }

    found_nodes
}

/// 获取节点属性值
pub fn get_node_attr(node: &Handle, attr_name: &str) -> Option<String> {
    match &node.data {
        NodeData::Element { attrs, .. } => attrs
            .borrow()
            .iter()
            .find(|attr| (*attr.name.local).eq_ignore_ascii_case(attr_name))
            .map(|attr| attr.value.to_string()),
        _ => None,
    }
}

/// 获取节点的全部属性名
pub fn get_node_attr_names(node: &Handle) -> Vec<String> {
    match &node.data {
        NodeData::Element { attrs, .. } => {
            attrs.borrow().iter().map(|attr| attr.name.local.to_string()).collect()
        }
        _ => Vec::new(),
    }
}

/// 获取节点名称
pub fn get_node_name(node: &Handle) -> Option<&'_ str> {
    match &node.data {
        NodeData::Element { name, .. } => Some(name.local.as_ref()),
        _ => None,
    }
}

/// 设置节点属性；`None` 会删除该属性
pub fn set_node_attr(node: &Handle, attr_name: &str, attr_value: Option<String>) {
    use html5ever::interface::{Attribute, QualName};
    use html5ever::tendril::format_tendril;
    use html5ever::LocalName;

    if let NodeData::Element { attrs, .. } = &node.data {
        let attrs_mut = &mut attrs.borrow_mut();
        let existing = attrs_mut
            .iter()
            .position(|attr| (*attr.name.local).eq_ignore_ascii_case(attr_name));

        match (existing, attr_value) {
            (Some(i), Some(value)) => {
                attrs_mut[i].value.clear();
                attrs_mut[i].value.push_slice(&value);
            }
            (Some(_), None) => {
                attrs_mut.retain(|attr| !(*attr.name.local).eq_ignore_ascii_case(attr_name));
            }
            (None, Some(value)) => attrs_mut.push(Attribute {
                name: QualName::new(None, ns!(), LocalName::from(attr_name)),
                value: format_tendril!("{}", value),
            }),
            (None, None) => {}
        }
    }
}

/// 拼接元素下所有文本子节点
pub fn get_text_content(node: &Handle) -> String {
    node.children
        .borrow()
        .iter()
        .filter_map(|child| match &child.data {
            NodeData::Text { contents } => Some(contents.borrow().to_string()),
            _ => None,
        })
        .collect()
}

/// 用单个文本节点替换元素的全部子节点
pub fn set_text_content(node: &Handle, text: &str) {
    use html5ever::tendril::StrTendril;
    use markup5ever_rcdom::Node;

    let mut children = node.children.borrow_mut();
    for child in children.iter() {
        child.parent.set(None);
    }
    children.clear();

    if !text.is_empty() {
        let child = Node::new(NodeData::Text {
            contents: std::cell::RefCell::new(StrTendril::from_slice(text)),
        });
        child.parent.set(Some(std::rc::Rc::downgrade(node)));
        children.push(child);
    }
}

/// 从父节点中移除该节点
pub fn detach_node(node: &Handle) {
    let Some(parent) = node.parent.take().and_then(|weak| weak.upgrade()) else {
        return;
    };
    parent
        .children
        .borrow_mut()
        .retain(|child| !std::rc::Rc::ptr_eq(child, node));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_nested_nodes_and_attributes() {
        let dom = html_to_dom(b"<html><head><meta charset=utf-8><title>T</title></head></html>", "utf-8");
        let metas = find_nodes(&dom.document, &["html", "head", "meta"]);

        assert_eq!(metas.len(), 1);
        assert_eq!(get_node_attr(&metas[0], "CHARSET"), Some("utf-8".to_string()));
        assert_eq!(get_node_name(&metas[0]), Some("meta"));
    }

    #[test]
    fn sets_and_removes_attributes() {
        let dom = html_to_dom(b"<img src=a.png>", "utf-8");
        let img = find_nodes(&dom.document, &["img"]).remove(0);

        set_node_attr(&img, "src", Some("b.png".to_string()));
        set_node_attr(&img, "alt", Some("x".to_string()));
        assert_eq!(get_node_attr(&img, "src"), Some("b.png".to_string()));
        assert_eq!(get_node_attr_names(&img), ["src", "alt"]);

        set_node_attr(&img, "src", None);
        assert_eq!(get_node_attr(&img, "src"), None);
    }

    #[test]
    fn replaces_text_content() {
        let dom = html_to_dom(b"<style>a{}</style><script>x()</script>", "utf-8");
        let style = find_nodes(&dom.document, &["style"]).remove(0);
        assert_eq!(get_text_content(&style), "a{}");

        set_text_content(&style, "b{}");
        assert_eq!(get_text_content(&style), "b{}");

        let script = find_nodes(&dom.document, &["script"]).remove(0);
        set_text_content(&script, "");
        assert_eq!(get_text_content(&script), "");
    }

    #[test]
    fn decodes_with_document_encoding() {
        let dom = html_to_dom(b"<title>caf\xe9</title>", "windows-1252");
        let title = find_nodes(&dom.document, &["title"]).remove(0);
        assert_eq!(get_text_content(&title), "café");
    }
}
