use markup5ever_rcdom::Handle;

use super::SaveMode;
use crate::core::SnapshotOptions;
use crate::parsers::html::{get_node_attr, get_node_name, is_css_type, parse_link_type, LinkType};

/// What kind of resource a reference points at.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TargetKind {
    Image,
    /// Audio, video, text tracks and plugin content.
    Media,
    Stylesheet,
    Frame,
    Hyperlink,
    Script,
    /// `@import` inside a stylesheet.
    CssImport,
    /// Any other `url()` inside a stylesheet.
    CssResource { image_property: bool },
}

/// One attribute of an element that holds a reference.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ElementSite {
    pub attribute: &'static str,
    pub kind: TargetKind,
    /// The attribute is a `srcset` candidate list.
    pub srcset: bool,
}

const fn site(attribute: &'static str, kind: TargetKind) -> ElementSite {
    ElementSite {
        attribute,
        kind,
        srcset: false,
    }
}

const fn srcset(attribute: &'static str) -> ElementSite {
    ElementSite {
        attribute,
        kind: TargetKind::Image,
        srcset: true,
    }
}

/// Reference-holding attributes per element name.
const ELEMENT_SITES: &[(&str, &[ElementSite])] = &[
    ("img", &[site("src", TargetKind::Image), srcset("srcset"), site("longdesc", TargetKind::Hyperlink)]),
    ("image", &[site("href", TargetKind::Image)]),
    ("body", &[site("background", TargetKind::Image)]),
    ("table", &[site("background", TargetKind::Image)]),
    ("td", &[site("background", TargetKind::Image)]),
    ("th", &[site("background", TargetKind::Image)]),
    ("video", &[site("src", TargetKind::Media), site("poster", TargetKind::Image)]),
    ("audio", &[site("src", TargetKind::Media)]),
    ("track", &[site("src", TargetKind::Media)]),
    ("embed", &[site("src", TargetKind::Media)]),
    ("object", &[site("data", TargetKind::Media)]),
    ("applet", &[site("code", TargetKind::Media), site("archive", TargetKind::Media)]),
    ("frame", &[site("src", TargetKind::Frame), site("longdesc", TargetKind::Hyperlink)]),
    ("iframe", &[site("src", TargetKind::Frame), site("longdesc", TargetKind::Hyperlink)]),
    ("script", &[site("src", TargetKind::Script)]),
    ("a", &[site("href", TargetKind::Hyperlink)]),
    ("area", &[site("href", TargetKind::Hyperlink)]),
    ("q", &[site("cite", TargetKind::Hyperlink)]),
    ("blockquote", &[site("cite", TargetKind::Hyperlink)]),
    ("del", &[site("cite", TargetKind::Hyperlink)]),
    ("ins", &[site("cite", TargetKind::Hyperlink)]),
    ("form", &[site("action", TargetKind::Hyperlink)]),
];

fn parent_name(node: &Handle) -> Option<String> {
    let parent = node.parent.take();
    let name = parent
        .as_ref()
        .and_then(|weak| weak.upgrade())
        .and_then(|parent| get_node_name(&parent).map(str::to_string));
    node.parent.set(parent);
    name
}

/// Lists the reference sites of an element.
pub fn classify_element(name: &str, node: &Handle) -> Vec<ElementSite> {
    match name {
        "link" => {
            let rel = get_node_attr(node, "rel").unwrap_or_default();
            let types = parse_link_type(&rel);
            let kind = if types.contains(&LinkType::Stylesheet)
                && !types.contains(&LinkType::Alternate)
                && is_css_type(get_node_attr(node, "type").as_deref())
            {
                TargetKind::Stylesheet
            } else if types.contains(&LinkType::Favicon) || types.contains(&LinkType::AppleTouchIcon) {
                TargetKind::Image
            } else {
                TargetKind::Hyperlink
            };
            vec![site("href", kind)]
        }
        "input" => {
            let is_image = get_node_attr(node, "type")
                .map(|t| t.trim().eq_ignore_ascii_case("image"))
                .unwrap_or(false);
            if is_image {
                vec![site("src", TargetKind::Image)]
            } else {
                Vec::new()
            }
        }
        "source" => {
            if parent_name(node).as_deref() == Some("picture") {
                vec![site("src", TargetKind::Image), srcset("srcset")]
            } else {
                vec![site("src", TargetKind::Media), srcset("srcset")]
            }
        }
        _ => ELEMENT_SITES
            .iter()
            .find(|(element, _)| *element == name)
            .map(|(_, sites)| sites.to_vec())
            .unwrap_or_default(),
    }
}

/// Elements whose relative references resolve against `codebase`.
pub fn uses_codebase(name: &str) -> bool {
    matches!(name, "object" | "applet")
}

/// Decides the save mode of a reference from its target kind.
pub fn save_mode_for(kind: TargetKind, options: &SnapshotOptions) -> SaveMode {
    match kind {
        TargetKind::Image if options.save_images => SaveMode::SaveAlways,
        TargetKind::Media if options.save_media => SaveMode::SaveAlways,
        TargetKind::CssResource { image_property } if !image_property || options.save_images => {
            SaveMode::SaveAlways
        }
        TargetKind::Stylesheet | TargetKind::Frame | TargetKind::CssImport => {
            SaveMode::ReplaceWithParsedSubstitute
        }
        TargetKind::Script => SaveMode::ReplaceWithEmptyPlaceholder,
        TargetKind::Image
        | TargetKind::Media
        | TargetKind::CssResource { .. }
        | TargetKind::Hyperlink => SaveMode::ResolveOnly,
    }
}
