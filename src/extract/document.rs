use encoding_rs::{Encoding, UTF_8};
use markup5ever_rcdom::{Handle, NodeData};
use tracing::debug;
use url::Url;

use super::classify::{classify_element, save_mode_for, uses_codebase, TargetKind};
use super::stylesheet::css_references;
use super::unit::{ParsedUnit, UnitBody};
use super::{FragmentHolder, NodeId, Reference, ReferenceSite, SpanForm, YIELD_INTERVAL};
use crate::archive::bundle::ResourceId;
use crate::core::SnapshotOptions;
use crate::jobs::UnitId;
use crate::parsers::html::{
    get_base_url, get_charset, get_node_attr, get_node_attr_names, get_text_content, get_title,
    html_to_dom, is_css_type, parse_srcset,
};
use crate::parsers::js::{attr_is_event_handler, is_executable_script};
use crate::utils::url::resolve_url_with_encoding;

/// Picks the document encoding: the transport charset, else the one
/// declared in `<meta>`, else UTF-8. Re-parses when `<meta>` disagrees
/// with the encoding the first parse used.
fn parse_with_charset(data: &[u8], transport_charset: Option<&str>) -> (markup5ever_rcdom::RcDom, &'static Encoding) {
    let declared = transport_charset.and_then(|label| Encoding::for_label(label.trim().as_bytes()));
    if let Some(encoding) = declared {
        return (html_to_dom(data, encoding.name()), encoding);
    }

    let dom = html_to_dom(data, UTF_8.name());
    match get_charset(&dom.document).and_then(|label| Encoding::for_label(label.as_bytes())) {
        Some(encoding) if encoding != UTF_8 && encoding != encoding_rs::UTF_16LE && encoding != encoding_rs::UTF_16BE => {
            (html_to_dom(data, encoding.name()), encoding)
        }
        _ => (dom, UTF_8),
    }
}

struct Walker<'a> {
    unit: ParsedUnit,
    base: Url,
    encoding: &'static Encoding,
    options: &'a SnapshotOptions,
}

impl Walker<'_> {
    fn reference(&self, site: ReferenceSite, spec: &str, base: &Url, kind: TargetKind) -> Reference {
        Reference {
            site,
            spec: spec.to_string(),
            base: base.clone(),
            target: resolve_url_with_encoding(base, spec, self.encoding).ok(),
            kind,
            mode: save_mode_for(kind, self.options),
            charset_hint: None,
            integrity: None,
            resource: None,
        }
    }

    fn visit_element(&mut self, node: &Handle, name: &str) {
        let id = self.unit.register_node(node);

        let base = if uses_codebase(name) {
            get_node_attr(node, "codebase")
                .and_then(|codebase| resolve_url_with_encoding(&self.base, &codebase, self.encoding).ok())
                .unwrap_or_else(|| self.base.clone())
        } else {
            self.base.clone()
        };

        for site in classify_element(name, node) {
            let Some(value) = get_node_attr(node, site.attribute) else {
                continue;
            };
            if value.trim().is_empty() {
                continue;
            }

            if site.srcset {
                self.visit_srcset(id, site.attribute, value, &base);
                continue;
            }

            let mut reference = self.reference(
                ReferenceSite::Attribute {
                    node: id,
                    attribute: site.attribute.to_string(),
                },
                &value,
                &base,
                site.kind,
            );
            if site.kind == TargetKind::Stylesheet {
                reference.charset_hint = get_node_attr(node, "charset");
            }
            if matches!(site.kind, TargetKind::Stylesheet | TargetKind::Script) {
                reference.integrity = get_node_attr(node, "integrity");
                if reference.integrity.is_some() {
                    self.unit.integrity_nodes.push(id);
                }
            }
            if site.kind == TargetKind::Script && !is_executable_script(get_node_attr(node, "type").as_deref()) {
                continue;
            }
            self.unit.references.push(reference);
        }

        if name == "script" && is_executable_script(get_node_attr(node, "type").as_deref()) {
            self.unit.scripts.push(id);
        }

        if name == "style" && is_css_type(get_node_attr(node, "type").as_deref()) {
            let text = get_text_content(node);
            let fragment = self.unit.add_fragment(FragmentHolder::Text { node: id }, text, true);
            let references = css_references(
                &self.unit.fragments[fragment.0].text,
                fragment,
                &self.base,
                self.encoding,
                self.options,
            );
            self.unit.references.extend(references);
        }

        for attribute in get_node_attr_names(node) {
            if attribute.eq_ignore_ascii_case("style") {
                let text = get_node_attr(node, &attribute).unwrap_or_default();
                let fragment = self.unit.add_fragment(
                    FragmentHolder::Attribute { node: id, attribute },
                    text,
                    false,
                );
                let references = css_references(
                    &self.unit.fragments[fragment.0].text,
                    fragment,
                    &self.base,
                    self.encoding,
                    self.options,
                );
                self.unit.references.extend(references);
            } else if self.options.strip_event_handlers && attr_is_event_handler(&attribute) {
                self.unit.event_handlers.push((id, attribute));
            }
        }
    }

    fn visit_srcset(&mut self, node: NodeId, attribute: &str, value: String, base: &Url) {
        let fragment = self.unit.add_fragment(
            FragmentHolder::Attribute {
                node,
                attribute: attribute.to_string(),
            },
            value,
            false,
        );
        let items: Vec<(std::ops::Range<usize>, String)> = parse_srcset(&self.unit.fragments[fragment.0].text)
            .into_iter()
            .map(|item| (item.span, item.path.to_string()))
            .collect();

        for (span, path) in items {
            let reference = self.reference(
                ReferenceSite::Span {
                    fragment,
                    span,
                    form: SpanForm::Plain,
                },
                &path,
                base,
                TargetKind::Image,
            );
            self.unit.references.push(reference);
        }
    }
}

/// Parses an HTML document into a unit and lists its references.
pub async fn extract_document(
    id: UnitId,
    resource: ResourceId,
    data: &[u8],
    url: &Url,
    transport_charset: Option<&str>,
    options: &SnapshotOptions,
) -> ParsedUnit {
    let (dom, encoding) = parse_with_charset(data, transport_charset);

    let base = get_base_url(&dom.document)
        .and_then(|href| resolve_url_with_encoding(url, &href, encoding).ok())
        .unwrap_or_else(|| url.clone());
    let title = get_title(&dom.document);
    let document = dom.document.clone();

    let mut unit = ParsedUnit::new(id, resource, url.clone(), encoding.name(), UnitBody::Document(dom));
    unit.title = title;
    let mut walker = Walker {
        unit,
        base,
        encoding,
        options,
    };

    let mut stack: Vec<Handle> = vec![document];
    let mut visited = 0usize;
    while let Some(node) = stack.pop() {
        visited += 1;
        if visited % YIELD_INTERVAL == 0 {
            tokio::task::yield_now().await;
        }

        if let NodeData::Element { ref name, .. } = node.data {
            let name = name.local.to_ascii_lowercase();
            walker.visit_element(&node, &name);
        }
        for child in node.children.borrow().iter().rev() {
            stack.push(child.clone());
        }
    }

    debug!(
        "{} references in document {} ({} nodes)",
        walker.unit.references.len(),
        url,
        visited
    );
    walker.unit
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::{Resolution, SaveMode};

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    async fn extract(html: &str, options: &SnapshotOptions) -> ParsedUnit {
        extract_document(
            UnitId(0),
            ResourceId::ROOT,
            html.as_bytes(),
            &url("https://a.example/dir/page.html"),
            None,
            options,
        )
        .await
    }

    #[tokio::test(flavor = "current_thread")]
    async fn classifies_every_site() {
        let html = r#"<html><head><base href="https://cdn.example/b/">
            <link rel=stylesheet href=s.css charset=koi8-r integrity="sha256-x">
            <style>body { background: url(bg.png) }</style>
            <script src=app.js></script><script>inline()</script></head>
            <body onload="go()"><a href="other.html#top">x</a>
            <img src=i.png srcset="i1.png 1x, i2.png 2x" style="border-image: url('b.png')">
            <video src=v.mp4 poster=p.jpg></video><iframe src=f.html></iframe>
            <object codebase="https://plugins.example/x/" data=movie.swf></object></body></html>"#;
        let unit = extract(html, &SnapshotOptions::default()).await;

        let found: Vec<(&str, TargetKind, SaveMode)> = unit
            .references
            .iter()
            .map(|r| (r.spec.as_str(), r.kind, r.mode))
            .collect();
        assert_eq!(
            found,
            vec![
                ("s.css", TargetKind::Stylesheet, SaveMode::ReplaceWithParsedSubstitute),
                ("bg.png", TargetKind::CssResource { image_property: true }, SaveMode::SaveAlways),
                ("app.js", TargetKind::Script, SaveMode::ReplaceWithEmptyPlaceholder),
                ("other.html#top", TargetKind::Hyperlink, SaveMode::ResolveOnly),
                ("i.png", TargetKind::Image, SaveMode::SaveAlways),
                ("i1.png", TargetKind::Image, SaveMode::SaveAlways),
                ("i2.png", TargetKind::Image, SaveMode::SaveAlways),
                ("b.png", TargetKind::CssResource { image_property: true }, SaveMode::SaveAlways),
                ("v.mp4", TargetKind::Media, SaveMode::SaveAlways),
                ("p.jpg", TargetKind::Image, SaveMode::SaveAlways),
                ("f.html", TargetKind::Frame, SaveMode::ReplaceWithParsedSubstitute),
                ("movie.swf", TargetKind::Media, SaveMode::SaveAlways),
            ]
        );

        assert_eq!(unit.references[0].target.as_ref().unwrap().as_str(), "https://cdn.example/b/s.css");
        assert_eq!(unit.references[0].charset_hint.as_deref(), Some("koi8-r"));
        assert_eq!(unit.references[0].integrity.as_deref(), Some("sha256-x"));
        assert_eq!(
            unit.references[11].target.as_ref().unwrap().as_str(),
            "https://plugins.example/x/movie.swf"
        );
        assert_eq!(unit.scripts.len(), 2);
        assert_eq!(unit.event_handlers.len(), 1);
        assert_eq!(unit.title, None);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn media_opt_out_resolves_only() {
        let options = SnapshotOptions {
            save_media: false,
            ..SnapshotOptions::default()
        };
        let unit = extract("<video src='movie.mp4'></video>", &options).await;
        assert_eq!(unit.references[0].mode, SaveMode::ResolveOnly);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn meta_charset_triggers_reparse() {
        let html = b"<meta charset=windows-1251><title>\xcf\xf0\xe8\xe2\xe5\xf2</title><a href='?q=\xe0'>";
        let unit = extract_document(UnitId(0), ResourceId::ROOT, html, &url("https://a.example/"), None, &SnapshotOptions::default()).await;

        assert_eq!(unit.charset, "windows-1251");
        assert_eq!(unit.title.as_deref(), Some("Привет"));
        assert_eq!(unit.references[0].target.as_ref().unwrap().as_str(), "https://a.example/?q=%E0");
    }

    #[tokio::test(flavor = "current_thread")]
    async fn renders_rewritten_document() {
        let html = r#"<head><base href="/x/"><script src=a.js integrity="sha384-y">bad()</script></head><body onclick="x()">
            <img src="i.png" srcset="i.png 1x, j.png 2x"><a href="https://b.example/">b</a></body>"#;
        let unit = extract(html, &SnapshotOptions::default()).await;

        let out = unit
            .render(
                |reference| match reference.kind {
                    TargetKind::Script => Resolution::Remove,
                    TargetKind::Hyperlink => Resolution::Keep,
                    _ => Resolution::Replace(format!("page_files/{}", reference.spec)),
                },
                None,
            )
            .unwrap();
        let out = String::from_utf8(out).unwrap();

        assert!(out.contains(r#"<img src="page_files/i.png" srcset="page_files/i.png 1x, page_files/j.png 2x">"#));
        assert!(out.contains("<script></script>"));
        assert!(out.contains(r#"<a href="https://b.example/">"#));
        assert!(!out.contains("<base"));
        assert!(!out.contains("onclick"));
        assert!(!out.contains("integrity"));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn srcset_names_with_commas_stay_single_candidates() {
        let unit = extract(r#"<img srcset="a.png 1x, b.png 2x">"#, &SnapshotOptions::default()).await;

        let out = unit
            .render(
                |reference| Resolution::Replace(format!("page_files/{} ,copy.png", reference.spec)),
                None,
            )
            .unwrap();
        let out = String::from_utf8(out).unwrap();

        assert!(out.contains(
            r#"srcset="page_files/a.png%20%2Ccopy.png 1x, page_files/b.png%20%2Ccopy.png 2x""#
        ));
    }
}
