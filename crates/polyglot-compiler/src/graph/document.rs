//! Just enough HTML scanning to find marker and target elements, and to
//! rewrite them in place without reserialising the rest of the document.
//!
//! Everything is span based: [`scan`] reports byte ranges into the source
//! text and [`apply`] splices a batch of [`Edit`]s into it. Bytes outside
//! an edit are never touched.

use std::ops::Range;

use smol_str::SmolStr;

const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param",
    "source", "track", "wbr",
];

/// Content is opaque text up to the matching close tag.
const RAW_TEXT_ELEMENTS: &[&str] = &["script", "style", "textarea", "title"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    /// Lowercased.
    pub name: SmolStr,
    /// Entity-decoded value; `None` for bare attributes.
    pub value: Option<String>,
    /// The whole `name="value"` span.
    pub span: Range<usize>,
    /// Raw value span, quotes excluded.
    pub value_span: Option<Range<usize>>,
    pub quoted: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    /// Lowercased tag name.
    pub tag: SmolStr,
    pub attrs: Vec<Attribute>,
    /// The `<` of the open tag.
    pub start: usize,
    /// The `>` (or `/>`) ending the open tag.
    pub attrs_end: usize,
    /// Just past the open tag.
    pub open_end: usize,
    /// The `<` of the close tag. `None` for void and self-closing elements.
    pub close_start: Option<usize>,
    /// Just past the whole element.
    pub end: usize,
}

impl Element {
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|attr| attr.name.eq_ignore_ascii_case(name))
            .map(|attr| attr.value.as_deref().unwrap_or(""))
    }

    /// `data-*` attributes, with the prefix stripped from the name.
    pub fn data_attrs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.attrs.iter().filter_map(|attr| {
            let name = attr.name.strip_prefix("data-")?;
            Some((name, attr.value.as_deref().unwrap_or("")))
        })
    }

    pub fn inner<'d>(&self, doc: &'d str) -> &'d str {
        match self.close_start {
            Some(close) => &doc[self.open_end..close],
            None => "",
        }
    }

    pub fn is_script_of_type(&self, ty: &str) -> bool {
        self.tag == "script"
            && self
                .attr("type")
                .is_some_and(|value| value.trim().eq_ignore_ascii_case(ty))
    }
}

/// All elements of `doc`, in order of their open tags.
///
/// Unclosed elements run to the close tag of their nearest closed ancestor,
/// or to the end of the document. An open tag that never ends stops the
/// scan.
pub fn scan(doc: &str) -> Vec<Element> {
    let bytes = doc.as_bytes();
    let mut elements: Vec<Element> = Vec::new();
    let mut open: Vec<usize> = Vec::new();
    let mut pos = 0;

    while let Some(offset) = doc[pos..].find('<') {
        let lt = pos + offset;
        let rest = &doc[lt..];

        if rest.starts_with("<!--") {
            pos = rest[4..]
                .find("-->")
                .map(|i| lt + 4 + i + 3)
                .unwrap_or(doc.len());
            continue;
        }

        if rest.starts_with("</") {
            let name_start = lt + 2;
            let name_end = tag_name_end(bytes, name_start);
            if name_end == name_start {
                pos = lt + 1;
                continue;
            }
            let close_end = find_byte(bytes, b'>', name_end)
                .map(|i| i + 1)
                .unwrap_or(doc.len());
            let tag = doc[name_start..name_end].to_ascii_lowercase();
            if let Some(depth) = open.iter().rposition(|&i| elements[i].tag == tag) {
                for &implicit in &open[depth + 1..] {
                    let element = &mut elements[implicit];
                    element.close_start = Some(lt);
                    element.end = lt;
                }
                let element = &mut elements[open[depth]];
                element.close_start = Some(lt);
                element.end = close_end;
                open.truncate(depth);
            }
            pos = close_end;
            continue;
        }

        if rest.starts_with("<!") || rest.starts_with("<?") {
            pos = find_byte(bytes, b'>', lt)
                .map(|i| i + 1)
                .unwrap_or(doc.len());
            continue;
        }

        let name_start = lt + 1;
        let name_end = tag_name_end(bytes, name_start);
        if name_end == name_start || !bytes[name_start].is_ascii_alphabetic() {
            pos = lt + 1;
            continue;
        }
        let Some(tag) = parse_open_tag(doc, name_end) else {
            break;
        };

        let mut element = Element {
            tag: SmolStr::new(doc[name_start..name_end].to_ascii_lowercase()),
            attrs: tag.attrs,
            start: lt,
            attrs_end: tag.attrs_end,
            open_end: tag.end,
            close_start: None,
            end: tag.end,
        };
        let index = elements.len();
        if tag.self_closing || VOID_ELEMENTS.contains(&element.tag.as_str()) {
            pos = element.end;
        } else if RAW_TEXT_ELEMENTS.contains(&element.tag.as_str()) {
            let (close_start, end) = find_raw_close(doc, element.open_end, &element.tag);
            element.close_start = Some(close_start);
            element.end = end;
            pos = end;
        } else {
            open.push(index);
            pos = element.open_end;
        }
        elements.push(element);
    }

    for &unclosed in &open {
        let element = &mut elements[unclosed];
        element.close_start = Some(doc.len());
        element.end = doc.len();
    }
    elements
}

struct OpenTag {
    attrs: Vec<Attribute>,
    attrs_end: usize,
    end: usize,
    self_closing: bool,
}

fn parse_open_tag(doc: &str, from: usize) -> Option<OpenTag> {
    let bytes = doc.as_bytes();
    let len = bytes.len();
    let mut attrs = Vec::new();
    let mut pos = from;

    loop {
        pos = skip_whitespace(bytes, pos);
        if pos >= len {
            return None;
        }
        match bytes[pos] {
            b'>' => {
                return Some(OpenTag {
                    attrs,
                    attrs_end: pos,
                    end: pos + 1,
                    self_closing: false,
                });
            }
            b'/' if bytes.get(pos + 1) == Some(&b'>') => {
                return Some(OpenTag {
                    attrs,
                    attrs_end: pos,
                    end: pos + 2,
                    self_closing: true,
                });
            }
            b'/' | b'=' => {
                pos += 1;
                continue;
            }
            _ => {}
        }

        let name_start = pos;
        while pos < len
            && !bytes[pos].is_ascii_whitespace()
            && !matches!(bytes[pos], b'=' | b'>' | b'/')
        {
            pos += 1;
        }
        let name = SmolStr::new(doc[name_start..pos].to_ascii_lowercase());

        let mut value_span = None;
        let mut quoted = false;
        let after_name = skip_whitespace(bytes, pos);
        if after_name < len && bytes[after_name] == b'=' {
            let value_start = skip_whitespace(bytes, after_name + 1);
            if value_start >= len {
                return None;
            }
            match bytes[value_start] {
                quote @ (b'"' | b'\'') => {
                    let close = find_byte(bytes, quote, value_start + 1)?;
                    value_span = Some(value_start + 1..close);
                    quoted = true;
                    pos = close + 1;
                }
                _ => {
                    let mut value_end = value_start;
                    while value_end < len
                        && !bytes[value_end].is_ascii_whitespace()
                        && bytes[value_end] != b'>'
                    {
                        value_end += 1;
                    }
                    value_span = Some(value_start..value_end);
                    pos = value_end;
                }
            }
        }

        attrs.push(Attribute {
            name,
            value: value_span
                .as_ref()
                .map(|span| decode_entities(&doc[span.clone()])),
            span: name_start..pos,
            value_span,
            quoted,
        });
    }
}

fn tag_name_end(bytes: &[u8], from: usize) -> usize {
    let mut pos = from;
    while pos < bytes.len() && (bytes[pos].is_ascii_alphanumeric() || matches!(bytes[pos], b'-' | b'_' | b':')) {
        pos += 1;
    }
    pos
}

fn skip_whitespace(bytes: &[u8], from: usize) -> usize {
    let mut pos = from;
    while pos < bytes.len() && bytes[pos].is_ascii_whitespace() {
        pos += 1;
    }
    pos
}

fn find_byte(bytes: &[u8], needle: u8, from: usize) -> Option<usize> {
    bytes
        .get(from..)?
        .iter()
        .position(|&b| b == needle)
        .map(|i| from + i)
}

/// Locate `</tag` after `from`, case-insensitively. Returns the close tag's
/// start and the position just past it.
fn find_raw_close(doc: &str, from: usize, tag: &str) -> (usize, usize) {
    let bytes = doc.as_bytes();
    let haystack = doc[from..].to_ascii_lowercase();
    let needle = format!("</{tag}");
    let mut search = 0;
    while let Some(offset) = haystack[search..].find(&needle) {
        let close_start = from + search + offset;
        let after = close_start + needle.len();
        match bytes.get(after) {
            None => return (close_start, doc.len()),
            Some(b) if b.is_ascii_whitespace() || *b == b'>' || *b == b'/' => {
                let end = find_byte(bytes, b'>', after)
                    .map(|i| i + 1)
                    .unwrap_or(doc.len());
                return (close_start, end);
            }
            Some(_) => search += offset + needle.len(),
        }
    }
    (doc.len(), doc.len())
}

pub fn decode_entities(raw: &str) -> String {
    if !raw.contains('&') {
        return raw.to_owned();
    }
    raw.replace("&quot;", "\"")
        .replace("&#34;", "\"")
        .replace("&apos;", "'")
        .replace("&#39;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

pub fn escape_attr(value: &str) -> String {
    value.replace('&', "&amp;").replace('"', "&quot;")
}

/// A replacement of one span of the document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edit {
    pub span: Range<usize>,
    pub text: String,
}

impl Edit {
    pub fn remove(element: &Element) -> Self {
        Self {
            span: element.start..element.end,
            text: String::new(),
        }
    }

    pub fn insert(at: usize, text: impl Into<String>) -> Self {
        Self {
            span: at..at,
            text: text.into(),
        }
    }

    /// Replace the element's content. `None` when it can't have any.
    pub fn set_inner(element: &Element, markup: impl Into<String>) -> Option<Self> {
        let close = element.close_start?;
        Some(Self {
            span: element.open_end..close,
            text: markup.into(),
        })
    }

    /// Set an attribute, replacing the existing value if there is one.
    pub fn set_attr(element: &Element, name: &str, value: &str) -> Self {
        let escaped = escape_attr(value);
        match element
            .attrs
            .iter()
            .find(|attr| attr.name.eq_ignore_ascii_case(name))
        {
            Some(Attribute {
                value_span: Some(span),
                quoted: true,
                ..
            }) => Self {
                span: span.clone(),
                text: escaped,
            },
            Some(attr) => Self {
                span: attr.span.clone(),
                text: format!("{name}=\"{escaped}\""),
            },
            None => Self::insert(element.attrs_end, format!(" {name}=\"{escaped}\"")),
        }
    }
}

/// Splice `edits` into `doc`.
///
/// Edits nested inside another edit are dropped; the outer one wins. Among
/// edits with the same span the first one given wins.
pub fn apply(doc: &str, mut edits: Vec<Edit>) -> String {
    edits.sort_by(|a, b| {
        a.span
            .start
            .cmp(&b.span.start)
            .then((!a.span.is_empty()).cmp(&!b.span.is_empty()))
            .then(b.span.end.cmp(&a.span.end))
    });
    let mut out = String::with_capacity(doc.len());
    let mut cursor = 0;
    for edit in edits {
        if edit.span.start < cursor {
            continue;
        }
        out.push_str(&doc[cursor..edit.span.start]);
        out.push_str(&edit.text);
        cursor = edit.span.end;
    }
    out.push_str(&doc[cursor..]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scans_nested_and_void_elements() {
        let doc = r#"<div id="a"><img src="x.png"><p>text<br></p></div>"#;
        let elements = scan(doc);
        let tags: Vec<_> = elements.iter().map(|el| el.tag.as_str()).collect();
        assert_eq!(tags, ["div", "img", "p", "br"]);

        let div = &elements[0];
        assert_eq!(div.attr("id"), Some("a"));
        assert_eq!(div.inner(doc), r#"<img src="x.png"><p>text<br></p>"#);
        assert_eq!(div.end, doc.len());
        assert_eq!(elements[1].close_start, None);
    }

    #[test]
    fn script_content_is_opaque() {
        let doc = r#"<script type="x">if (a < b) { "<div>" }</script><span data-src="o"></span>"#;
        let elements = scan(doc);
        assert_eq!(elements.len(), 2);
        assert_eq!(elements[0].inner(doc), r#"if (a < b) { "<div>" }"#);
        assert!(elements[0].is_script_of_type("X"));
        assert_eq!(elements[1].attr("data-src"), Some("o"));
    }

    #[test]
    fn attribute_forms() {
        let doc = r#"<img alt='it&#39;s' data-layout=neato hidden>"#;
        let img = &scan(doc)[0];
        assert_eq!(img.attr("alt"), Some("it's"));
        assert_eq!(img.attr("data-layout"), Some("neato"));
        assert_eq!(img.attr("hidden"), Some(""));
        let data: Vec<_> = img.data_attrs().collect();
        assert_eq!(data, [("layout", "neato")]);
    }

    #[test]
    fn comments_are_skipped() {
        let doc = "<!-- <div data-src=\"o\"></div> --><p></p>";
        let elements = scan(doc);
        assert_eq!(elements.len(), 1);
        assert_eq!(elements[0].tag, "p");
    }

    #[test]
    fn unclosed_elements_end_at_parent_close() {
        let doc = "<div><p>one<p>two</div>tail";
        let elements = scan(doc);
        assert_eq!(elements[0].inner(doc), "<p>one<p>two");
        assert_eq!(elements[2].inner(doc), "two");
    }

    #[test]
    fn set_attr_replaces_or_inserts() {
        let doc = r#"<img src="old.png" data-src="o"><img data-src="o"/><img src data-src="o">"#;
        let elements = scan(doc);
        let edits = elements
            .iter()
            .map(|el| Edit::set_attr(el, "src", "new&.png"))
            .collect();
        assert_eq!(
            apply(doc, edits),
            r#"<img src="new&amp;.png" data-src="o"><img data-src="o" src="new&amp;.png"/><img src="new&amp;.png" data-src="o">"#
        );
    }

    #[test]
    fn nested_edits_lose_to_outer_ones() {
        let doc = r#"<div data-src="o"><i>x</i><script type="k"></script></div>!"#;
        let elements = scan(doc);
        let edits = vec![
            Edit::remove(&elements[2]),
            Edit::set_inner(&elements[0], "<b>ok</b>").unwrap(),
            Edit::insert(doc.len(), "?"),
        ];
        assert_eq!(apply(doc, edits), r#"<div data-src="o"><b>ok</b></div>!?"#);
    }
}
