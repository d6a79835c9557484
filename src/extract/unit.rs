use std::collections::HashMap;

use encoding_rs::{Encoding, UTF_8};
use markup5ever_rcdom::{Handle, RcDom};

use super::{FragmentHolder, FragmentId, NodeId, Reference, ReferenceSite, SpanForm, TextFragment};
use crate::archive::bundle::ResourceId;
use crate::core::SnapshotError;
use crate::jobs::UnitId;
use crate::parsers::css::{format_quoted_string, scan_style_rules};
use crate::parsers::html::{remove_base_elements, serialize_document, set_node_attr, set_text_content};
use crate::parsers::splice_text;
use url::Url;

/// What a reference becomes in the rewritten output.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Resolution {
    Replace(String),
    /// Left exactly as written.
    Keep,
    /// Emptied, or removed when it is an attribute.
    Remove,
}

pub enum UnitBody {
    Document(RcDom),
    /// The text lives in the unit's only fragment.
    Stylesheet,
}

/// A document or stylesheet whose references are rewritten.
pub struct ParsedUnit {
    pub id: UnitId,
    pub resource: ResourceId,
    /// Address the unit was loaded from.
    pub url: Url,
    /// Label of the encoding the output is written in.
    pub charset: String,
    pub body: UnitBody,
    /// Document whose elements the unit's style rules apply to.
    pub owner: Option<UnitId>,
    pub title: Option<String>,
    pub references: Vec<Reference>,
    pub fragments: Vec<TextFragment>,
    /// Executable scripts whose content is emptied.
    pub scripts: Vec<NodeId>,
    pub event_handlers: Vec<(NodeId, String)>,
    /// Elements whose `integrity` attribute no longer matches after rewriting.
    pub integrity_nodes: Vec<NodeId>,
    nodes: Vec<Handle>,
}

impl ParsedUnit {
    pub fn new(id: UnitId, resource: ResourceId, url: Url, charset: &str, body: UnitBody) -> Self {
        Self {
            id,
            resource,
            url,
            charset: charset.to_string(),
            body,
            owner: None,
            title: None,
            references: Vec::new(),
            fragments: Vec::new(),
            scripts: Vec::new(),
            event_handlers: Vec::new(),
            integrity_nodes: Vec::new(),
            nodes: Vec::new(),
        }
    }

    pub fn is_document(&self) -> bool {
        matches!(self.body, UnitBody::Document(_))
    }

    /// Adds a node to the side table.
    pub fn register_node(&mut self, node: &Handle) -> NodeId {
        self.nodes.push(node.clone());
        NodeId(self.nodes.len() - 1)
    }

    pub fn node(&self, id: NodeId) -> Option<&Handle> {
        self.nodes.get(id.0)
    }

    pub fn add_fragment(&mut self, holder: FragmentHolder, text: String, is_css: bool) -> FragmentId {
        let id = FragmentId(self.fragments.len());
        self.fragments.push(TextFragment {
            id,
            holder,
            text,
            is_css,
        });
        id
    }

    fn encoding(&self) -> &'static Encoding {
        Encoding::for_label(self.charset.as_bytes())
            .unwrap_or(UTF_8)
            .output_encoding()
    }

    /// Name of the charset the rendered bytes are in.
    pub fn output_charset(&self) -> &'static str {
        self.encoding().name()
    }

    /// Produces the rewritten bytes. `resolve` decides every reference;
    /// `is_unused` tells whether a top-level style rule's selector matches
    /// nothing and the rule can be dropped.
    pub fn render(
        &self,
        resolve: impl Fn(&Reference) -> Resolution,
        is_unused: Option<&dyn Fn(&str) -> bool>,
    ) -> Result<Vec<u8>, SnapshotError> {
        let mut edits: HashMap<FragmentId, Vec<(std::ops::Range<usize>, String)>> = HashMap::new();

        for reference in &self.references {
            let resolution = resolve(reference);
            match (&reference.site, resolution) {
                (_, Resolution::Keep) => {}
                (ReferenceSite::Attribute { node, attribute }, resolution) => {
                    if let Some(handle) = self.node(*node) {
                        let value = match resolution {
                            Resolution::Replace(value) => Some(value),
                            _ => None,
                        };
                        set_node_attr(handle, attribute, value);
                    }
                }
                (ReferenceSite::Span { fragment, span, form }, resolution) => {
                    let target = match resolution {
                        Resolution::Replace(value) => value,
                        _ => String::new(),
                    };
                    let text = match form {
                        SpanForm::Plain => escape_candidate_url(&target),
                        SpanForm::Css { quoted: true } => format_quoted_string(&target),
                        SpanForm::Css { quoted: false } => format!("url({})", format_quoted_string(&target)),
                    };
                    edits.entry(*fragment).or_default().push((span.clone(), text));
                }
            }
        }

        let mut sheet_text = String::new();
        for fragment in &self.fragments {
            let mut fragment_edits = edits.remove(&fragment.id).unwrap_or_default();
            if let (true, Some(is_unused)) = (fragment.is_css, is_unused) {
                for rule in scan_style_rules(&fragment.text) {
                    if is_unused(&rule.selectors) {
                        fragment_edits.push((rule.span, String::new()));
                    }
                }
            }
            let text = if fragment_edits.is_empty() {
                fragment.text.clone()
            } else {
                splice_text(&fragment.text, fragment_edits)
            };

            match &fragment.holder {
                FragmentHolder::Attribute { node, attribute } => {
                    if let Some(handle) = self.node(*node) {
                        set_node_attr(handle, attribute, Some(text));
                    }
                }
                FragmentHolder::Text { node } => {
                    if let Some(handle) = self.node(*node) {
                        set_text_content(handle, &text);
                    }
                }
                FragmentHolder::Sheet => sheet_text = text,
            }
        }

        match &self.body {
            UnitBody::Document(dom) => {
                for script in &self.scripts {
                    if let Some(handle) = self.node(*script) {
                        set_text_content(handle, "");
                    }
                }
                for (node, attribute) in &self.event_handlers {
                    if let Some(handle) = self.node(*node) {
                        set_node_attr(handle, attribute, None);
                    }
                }
                for node in &self.integrity_nodes {
                    if let Some(handle) = self.node(*node) {
                        set_node_attr(handle, "integrity", None);
                    }
                }
                remove_base_elements(&dom.document);

                serialize_document(dom, self.output_charset())
            }
            UnitBody::Stylesheet => Ok(self.encoding().encode(&sheet_text).0.into_owned()),
        }
    }
}

/// Escapes the characters that delimit `srcset` candidates.
fn escape_candidate_url(url: &str) -> String {
    url.replace(' ', "%20").replace(',', "%2C")
}
