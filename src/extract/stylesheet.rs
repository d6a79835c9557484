use encoding_rs::{Encoding, UTF_16BE, UTF_16LE, UTF_8};
use tracing::debug;
use url::Url;

use super::classify::{save_mode_for, TargetKind};
use super::unit::{ParsedUnit, UnitBody};
use super::{FragmentHolder, FragmentId, Reference, ReferenceSite, SpanForm, YIELD_INTERVAL};
use crate::archive::bundle::ResourceId;
use crate::core::SnapshotOptions;
use crate::jobs::UnitId;
use crate::parsers::css::{scan_css_references, sniff_charset_rule, CssReferenceKind};
use crate::utils::url::resolve_url_with_encoding;

fn encoding_for(label: Option<&str>) -> Option<&'static Encoding> {
    label.and_then(|label| Encoding::for_label(label.trim().as_bytes()))
}

/// Decodes stylesheet bytes. The encoding is taken from, in order: a byte
/// order mark, the transport charset, a leading `@charset` rule, the
/// referencing element's hint, the referencing document.
pub fn decode_stylesheet(
    data: &[u8],
    transport_charset: Option<&str>,
    hint: Option<&str>,
    referrer_charset: Option<&str>,
) -> (String, &'static Encoding) {
    let encoding = Encoding::for_bom(data)
        .map(|(encoding, _)| encoding)
        .or_else(|| encoding_for(transport_charset))
        .or_else(|| {
            encoding_for(sniff_charset_rule(data).as_deref()).map(|encoding| {
                // A stylesheet that could be read as ASCII cannot be UTF-16
                if encoding == UTF_16BE || encoding == UTF_16LE {
                    UTF_8
                } else {
                    encoding
                }
            })
        })
        .or_else(|| encoding_for(hint))
        .or_else(|| encoding_for(referrer_charset))
        .unwrap_or(UTF_8);

    let (text, used, _) = encoding.decode(data);
    (text.into_owned(), used)
}

/// Lists the references of a CSS fragment. Relative URLs resolve against
/// `base` with the stylesheet's own encoding.
pub fn css_references(
    text: &str,
    fragment: FragmentId,
    base: &Url,
    encoding: &'static Encoding,
    options: &SnapshotOptions,
) -> Vec<Reference> {
    scan_css_references(text)
        .into_iter()
        .map(|css_reference| {
            let kind = match css_reference.kind {
                CssReferenceKind::Import => TargetKind::CssImport,
                CssReferenceKind::Url => TargetKind::CssResource {
                    image_property: css_reference.is_image_property(),
                },
            };
            Reference {
                site: ReferenceSite::Span {
                    fragment,
                    span: css_reference.span.clone(),
                    form: SpanForm::Css {
                        quoted: css_reference.quoted,
                    },
                },
                target: resolve_url_with_encoding(base, &css_reference.url, encoding).ok(),
                spec: css_reference.url,
                base: base.clone(),
                kind,
                mode: save_mode_for(kind, options),
                charset_hint: None,
                integrity: None,
                resource: None,
            }
        })
        .collect()
}

/// Parses an acquired stylesheet into a unit.
#[allow(clippy::too_many_arguments)]
pub async fn extract_stylesheet(
    id: UnitId,
    resource: ResourceId,
    data: &[u8],
    url: &Url,
    transport_charset: Option<&str>,
    hint: Option<&str>,
    owner: Option<(UnitId, &str)>,
    options: &SnapshotOptions,
) -> ParsedUnit {
    let (text, encoding) = decode_stylesheet(data, transport_charset, hint, owner.map(|(_, charset)| charset));

    let mut unit = ParsedUnit::new(id, resource, url.clone(), encoding.name(), UnitBody::Stylesheet);
    unit.owner = owner.map(|(owner, _)| owner);

    let fragment = unit.add_fragment(FragmentHolder::Sheet, text, true);
    let references = css_references(&unit.fragments[fragment.0].text, fragment, url, encoding, options);

    for (index, reference) in references.into_iter().enumerate() {
        if index > 0 && index % YIELD_INTERVAL == 0 {
            tokio::task::yield_now().await;
        }
        unit.references.push(reference);
    }
    debug!("{} references in stylesheet {}", unit.references.len(), url);

    unit
}
