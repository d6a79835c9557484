//! HTML解析和处理模块
//!
//! - `utils`: 基础工具函数和常量
//! - `parser`: 链接类型与 srcset 解析
//! - `dom`: 基础DOM操作
//! - `metadata`: 文档元数据处理
//! - `serializer`: 序列化功能

pub mod dom;
pub mod metadata;
pub mod parser;
pub mod serializer;
pub mod utils;

pub use dom::{
    detach_node, find_nodes, get_node_attr, get_node_attr_names, get_node_name, get_text_content,
    html_to_dom, set_node_attr, set_text_content,
};
pub use metadata::{get_base_url, get_charset, get_title, remove_base_elements};
pub use parser::{parse_link_type, parse_srcset, LinkType, SrcSetItem};
pub use serializer::serialize_document;
pub use utils::{is_css_type, is_favicon, WHITESPACES};
