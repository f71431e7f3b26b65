//! Rendered results serialised into the document itself.
//!
//! The isolated stage can't touch display targets, so it leaves a
//! `<script type="data-urls">{"target":"data:…"}</script>` marker behind and
//! the main stage restores from it.

use std::collections::HashSet;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use smol_str::SmolStr;

use super::document::{self, Edit, Element};
use crate::engines::Rendered;
use crate::error::BlockError;

pub const CACHE_MARKER_TYPE: &str = "data-urls";
pub const SVG_DATA_URI_PREFIX: &str = "data:image/svg+xml;base64,";

/// Target reference to data URI, in insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArtifactCache {
    entries: Vec<(SmolStr, String)>,
}

impl ArtifactCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Later inserts for the same target replace earlier ones in place.
    pub fn insert(&mut self, target: impl Into<SmolStr>, data_uri: impl Into<String>) {
        let target = target.into();
        let data_uri = data_uri.into();
        match self.entries.iter_mut().find(|(key, _)| *key == target) {
            Some(entry) => entry.1 = data_uri,
            None => self.entries.push((target, data_uri)),
        }
    }

    pub fn insert_rendered(&mut self, target: impl Into<SmolStr>, rendered: &Rendered) {
        self.insert(target, to_data_uri(rendered));
    }

    pub fn extend(&mut self, other: ArtifactCache) {
        for (target, uri) in other.entries {
            self.insert(target, uri);
        }
    }

    pub fn get(&self, target: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(key, _)| key == target)
            .map(|(_, uri)| uri.as_str())
    }

    pub fn targets(&self) -> impl Iterator<Item = &SmolStr> {
        self.entries.iter().map(|(key, _)| key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn parse(json: &str) -> Result<Self, BlockError> {
        let invalid = |message: String| BlockError::InvalidCache { message };
        let trimmed = json.trim();
        if trimmed.is_empty() {
            return Ok(Self::new());
        }
        let table: serde_json::Map<String, serde_json::Value> =
            serde_json::from_str(trimmed).map_err(|e| invalid(e.to_string()))?;
        let mut cache = Self::new();
        for (target, value) in table {
            match value {
                serde_json::Value::String(uri) => cache.insert(target, uri),
                other => {
                    return Err(invalid(format!(
                        "entry for {target} is {other}, expected a string"
                    )));
                }
            }
        }
        Ok(cache)
    }

    pub fn to_json(&self) -> String {
        let table: serde_json::Map<String, serde_json::Value> = self
            .entries
            .iter()
            .map(|(target, uri)| (target.to_string(), serde_json::Value::String(uri.clone())))
            .collect();
        // Keep `</script>` out of the marker body.
        serde_json::Value::Object(table)
            .to_string()
            .replace('<', "\\u003c")
    }

    /// The marker element carrying this table.
    pub fn to_marker(&self) -> String {
        format!(
            "<script type=\"{CACHE_MARKER_TYPE}\">{}</script>",
            self.to_json()
        )
    }
}

pub fn to_data_uri(rendered: &Rendered) -> String {
    match rendered {
        Rendered::Markup(markup) => format!("{SVG_DATA_URI_PREFIX}{}", STANDARD.encode(markup)),
        Rendered::DataUri(uri) => uri.clone(),
    }
}

/// How a cached or freshly rendered result lands on a display target:
/// image elements get a `src`, anything else gets inner markup.
pub(crate) fn display(target: &Element, data_uri: &str) -> Option<Edit> {
    if target.tag == "img" {
        return Some(Edit::set_attr(target, "src", data_uri));
    }
    let markup = data_uri
        .strip_prefix(SVG_DATA_URI_PREFIX)
        .and_then(|encoded| STANDARD.decode(encoded).ok())
        .and_then(|bytes| String::from_utf8(bytes).ok())
        .unwrap_or_else(|| format!("<img src=\"{}\">", document::escape_attr(data_uri)));
    Edit::set_inner(target, markup)
}

/// Edits substituting every entry of `cache` into its `data-src` targets.
pub(crate) fn display_all(elements: &[Element], cache: &ArtifactCache) -> Vec<Edit> {
    elements
        .iter()
        .filter_map(|element| {
            let uri = cache.get(element.attr("data-src")?.trim())?;
            display(element, uri)
        })
        .collect()
}

/// Result of a restore pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Restored {
    pub text: String,
    /// Target references satisfied from the cache.
    pub targets: HashSet<SmolStr>,
    pub errors: Vec<BlockError>,
}

/// Rehydrate `doc` from its cache markers.
///
/// Every cache marker is consumed, unreadable ones included. Input-file
/// markers of the given types go too, since whatever consumed them has
/// already run. A document without cache markers comes back unchanged.
pub fn restore(doc: &str, input_file_markers: &[&str]) -> Restored {
    let elements = document::scan(doc);
    let markers: Vec<&Element> = elements
        .iter()
        .filter(|el| el.is_script_of_type(CACHE_MARKER_TYPE))
        .collect();
    if markers.is_empty() {
        return Restored {
            text: doc.to_owned(),
            ..Restored::default()
        };
    }

    let mut cache = ArtifactCache::new();
    let mut errors = Vec::new();
    for marker in &markers {
        match ArtifactCache::parse(marker.inner(doc)) {
            Ok(parsed) => cache.extend(parsed),
            Err(error) => {
                tracing::warn!(%error, "discarding render cache marker");
                errors.push(error);
            }
        }
    }

    let mut edits = display_all(&elements, &cache);
    edits.extend(markers.iter().map(|marker| Edit::remove(marker)));
    edits.extend(
        elements
            .iter()
            .filter(|el| input_file_markers.iter().any(|ty| el.is_script_of_type(ty)))
            .map(Edit::remove),
    );
    tracing::debug!(entries = cache.len(), "restored render cache");

    Restored {
        text: document::apply(doc, edits),
        targets: cache.targets().cloned().collect(),
        errors,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn markup_becomes_svg_data_uri() {
        assert_eq!(
            to_data_uri(&Rendered::Markup("<b>ok</b>".into())),
            "data:image/svg+xml;base64,PGI+b2s8L2I+"
        );
        assert_eq!(
            to_data_uri(&Rendered::DataUri("data:image/png;base64,AQID".into())),
            "data:image/png;base64,AQID"
        );
    }

    #[test]
    fn marker_json_is_ordered_and_script_safe() {
        let mut cache = ArtifactCache::new();
        cache.insert("b", "data:x");
        cache.insert("a", "data:</script>");
        cache.insert("b", "data:y");
        assert_eq!(
            cache.to_marker(),
            r#"<script type="data-urls">{"b":"data:y","a":"data:\u003c/script>"}</script>"#
        );
        assert_eq!(ArtifactCache::parse(&cache.to_json()).unwrap(), cache);
    }

    #[test]
    fn parse_rejects_non_string_entries() {
        assert!(matches!(
            ArtifactCache::parse(r#"{"a": 1}"#),
            Err(BlockError::InvalidCache { .. })
        ));
        assert!(ArtifactCache::parse("not json").is_err());
        assert!(ArtifactCache::parse("  ").unwrap().is_empty());
    }

    #[test]
    fn restore_fills_images_and_containers() {
        let doc = concat!(
            r#"<img data-src="p"><div data-src="s">old</div><span data-src="other"></span>"#,
            r#"<script type="application/graph-gnuplot-file" data-file="d.txt">1 2</script>"#,
            r#"<script type="data-urls">{"p":"data:image/png;base64,AQID","s":"data:image/svg+xml;base64,PHN2Zz5vazwvc3ZnPg=="}</script>"#,
        );
        let restored = restore(doc, &["application/graph-gnuplot-file"]);
        assert_eq!(
            restored.text,
            r#"<img data-src="p" src="data:image/png;base64,AQID"><div data-src="s"><svg>ok</svg></div><span data-src="other"></span>"#
        );
        assert!(restored.errors.is_empty());
        assert_eq!(restored.targets.len(), 2);
    }

    #[test]
    fn raster_results_in_containers_become_images() {
        let doc = r#"<div data-src="p"></div><script type="data-urls">{"p":"data:image/png;base64,AQID"}</script>"#;
        assert_eq!(
            restore(doc, &[]).text,
            r#"<div data-src="p"><img src="data:image/png;base64,AQID"></div>"#
        );
    }

    #[test]
    fn invalid_marker_is_reported_and_removed() {
        let doc = r#"<p>keep</p><script type="data-urls">{oops</script>"#;
        let restored = restore(doc, &[]);
        assert_eq!(restored.text, "<p>keep</p>");
        assert!(matches!(
            restored.errors.as_slice(),
            [BlockError::InvalidCache { .. }]
        ));
    }

    #[test]
    fn nothing_to_restore_leaves_document_alone() {
        let doc = r#"<script type="application/graph-gnuplot-file">1 2</script><div data-src="x"></div>"#;
        let restored = restore(doc, &["application/graph-gnuplot-file"]);
        assert_eq!(restored.text, doc);
        assert!(restored.targets.is_empty());
    }
}
