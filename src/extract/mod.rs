//! # 引用图提取
//!
//! 遍历已解析的文档或样式表，按固定分类表识别每一个外部资源引用，
//! 生成 [`Reference`] 记录。引用的位置要么是某个节点的属性，要么是某段
//! 文本片段（`style` 属性、`<style>` 内容、`srcset`、样式表）中的字节范围。
//! 节点通过提取时分配的 [`NodeId`] 记录在单元自己的旁路表中，从不修改
//! 外部文档的状态。

pub mod classify;
pub mod document;
pub mod styles;
pub mod stylesheet;
pub mod unit;

use std::ops::Range;

use url::Url;

use crate::archive::bundle::ResourceId;

pub use classify::{classify_element, save_mode_for, ElementSite, TargetKind};
pub use document::extract_document;
pub use styles::selector_is_unused;
pub use stylesheet::{decode_stylesheet, extract_stylesheet};
pub use unit::{ParsedUnit, Resolution, UnitBody};

/// Number of nodes or references processed between two yields to the
/// event loop.
pub const YIELD_INTERVAL: usize = 512;

/// What happens to a reference's target when the page is saved.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SaveMode {
    /// The target is acquired and saved unchanged.
    SaveAlways,
    /// Rewritten to a saved copy if one exists, otherwise to an absolute URL.
    ResolveOnly,
    /// The target is acquired, parsed and saved as a rewritten unit.
    ReplaceWithParsedSubstitute,
    /// The reference is emptied.
    ReplaceWithEmptyPlaceholder,
}

/// Stable identifier of a DOM node inside one unit's side table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub usize);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FragmentId(pub usize);

/// How a replacement is written inside a text span.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SpanForm {
    /// The URL itself, as in `srcset`.
    Plain,
    /// A CSS string, or a whole `url()` token when `quoted` is false.
    Css { quoted: bool },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReferenceSite {
    Attribute { node: NodeId, attribute: String },
    Span {
        fragment: FragmentId,
        span: Range<usize>,
        form: SpanForm,
    },
}

/// Where the text of a fragment lives.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FragmentHolder {
    Attribute { node: NodeId, attribute: String },
    /// Text content of an element such as `<style>`.
    Text { node: NodeId },
    /// The unit itself is a stylesheet.
    Sheet,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TextFragment {
    pub id: FragmentId,
    pub holder: FragmentHolder,
    pub text: String,
    /// CSS fragments can have unused rules removed.
    pub is_css: bool,
}

/// One embedded reference to another resource.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Reference {
    pub site: ReferenceSite,
    /// The reference exactly as written.
    pub spec: String,
    pub base: Url,
    /// `None` when the reference cannot be resolved against its base.
    pub target: Option<Url>,
    pub kind: TargetKind,
    pub mode: SaveMode,
    /// Charset declared by the referencing element, for stylesheets.
    pub charset_hint: Option<String>,
    pub integrity: Option<String>,
    /// Resource the reference was bound to during registration.
    pub resource: Option<ResourceId>,
}

impl Reference {
    pub fn fragment(&self) -> Option<&str> {
        self.target.as_ref().and_then(|target| target.fragment())
    }
}
