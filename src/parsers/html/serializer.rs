use encoding_rs::Encoding;
use html5ever::serialize::{serialize, SerializeOpts};
use markup5ever_rcdom::{RcDom, SerializableHandle};

use crate::core::SnapshotError;

/// 序列化文档
///
/// 文档以其声明的字符集编码输出；该字符集无法表示的字符会成为数字字符引用。
pub fn serialize_document(dom: &RcDom, document_encoding: &str) -> Result<Vec<u8>, SnapshotError> {
    let mut buf: Vec<u8> = Vec::new();

    let serializable: SerializableHandle = dom.document.clone().into();
    serialize(&mut buf, &serializable, SerializeOpts::default())
        .map_err(|error| SnapshotError::write_failure("document", error))?;

    if let Some(encoding) = Encoding::for_label(document_encoding.as_bytes()) {
        if encoding != encoding_rs::UTF_8 {
            let s: &str = &String::from_utf8_lossy(&buf);
            let (data, _, _) = encoding.encode(s);
            buf = data.into_owned();
        }
    }

    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parsers::html::dom::html_to_dom;

    #[test]
    fn serializes_in_document_encoding() {
        let dom = html_to_dom("<p>café ☃</p>".as_bytes(), "utf-8");
        let out = serialize_document(&dom, "iso-8859-1").unwrap();
        let text = String::from_utf8_lossy(&out);

        assert!(out.windows(4).any(|w| w == b"caf\xe9"));
        assert!(text.contains("&#9731;"));
    }

    #[test]
    fn utf8_documents_are_left_as_is() {
        let dom = html_to_dom("<p>é</p>".as_bytes(), "utf-8");
        let out = serialize_document(&dom, "utf-8").unwrap();
        assert!(String::from_utf8(out).unwrap().contains("<p>é</p>"));
    }
}
