//! HTML fragment parsing and serialization.
//!
//! Fragments are tokenized with `quick-xml` after named HTML entities are
//! converted to Unicode. The tokenizer runs with end-name checking disabled,
//! and the tree builder closes elements the way a lenient HTML parser would:
//! void elements never take children and an end tag closes every element
//! opened after its matching start tag.

use std::fmt::Write;

use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;

use crate::document::{Document, NodeData, NodeId};
use crate::entities::{convert_html_entities, decode_entity};
use crate::error::DomError;

/// Elements that never have content.
const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "source",
    "track", "wbr",
];

/// Wrapper element used to give the tokenizer a single root.
const FRAGMENT_WRAPPER: &str = "mdv-fragment";

/// Whether `tag` is an HTML void element.
pub(crate) fn is_void(tag: &str) -> bool {
    VOID_ELEMENTS.contains(&tag)
}

/// Parsed fragment node, inserted into a [`Document`] after a successful parse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum FragmentNode {
    Element {
        tag: String,
        attrs: Vec<(String, String)>,
        children: Vec<FragmentNode>,
    },
    Text(String),
}

/// Element still waiting for its end tag.
struct OpenElement {
    tag: String,
    attrs: Vec<(String, String)>,
    children: Vec<FragmentNode>,
}

impl OpenElement {
    fn into_node(self) -> FragmentNode {
        FragmentNode::Element {
            tag: self.tag,
            attrs: self.attrs,
            children: self.children,
        }
    }
}

/// Parse an HTML fragment into a list of top-level nodes.
pub(crate) fn parse_fragment(html: &str) -> Result<Vec<FragmentNode>, DomError> {
    let html = convert_html_entities(html);
    let wrapped = format!("<{FRAGMENT_WRAPPER}>{html}</{FRAGMENT_WRAPPER}>");

    let mut reader = Reader::from_str(&wrapped);
    reader.config_mut().trim_text(false);
    reader.config_mut().check_end_names = false;

    let mut stack: Vec<OpenElement> = Vec::new();

    loop {
        match reader.read_event()? {
            Event::Start(e) => {
                let tag = decode_tag(&reader, e.name().as_ref());
                let attrs = decode_attrs(&reader, &e);
                if is_void(&tag) {
                    push_child(&mut stack, FragmentNode::Element {
                        tag,
                        attrs,
                        children: Vec::new(),
                    });
                } else {
                    stack.push(OpenElement {
                        tag,
                        attrs,
                        children: Vec::new(),
                    });
                }
            }
            Event::Empty(e) => {
                let tag = decode_tag(&reader, e.name().as_ref());
                let attrs = decode_attrs(&reader, &e);
                push_child(&mut stack, FragmentNode::Element {
                    tag,
                    attrs,
                    children: Vec::new(),
                });
            }
            Event::Text(e) => {
                let text = reader.decoder().decode(&e)?.into_owned();
                push_text(&mut stack, &text);
            }
            Event::GeneralRef(e) => {
                let entity = reader.decoder().decode(&e)?.into_owned();
                push_text(&mut stack, &decode_entity(&entity));
            }
            Event::CData(e) => {
                let text = String::from_utf8_lossy(&e).into_owned();
                push_text(&mut stack, &text);
            }
            Event::End(e) => {
                let tag = decode_tag(&reader, e.name().as_ref());
                if is_void(&tag) {
                    continue;
                }
                // Stray end tags without a matching start are dropped
                if let Some(pos) = stack.iter().rposition(|open| open.tag == tag) {
                    while stack.len() > pos + 1 {
                        close_top(&mut stack);
                    }
                    if pos == 0 {
                        break;
                    }
                    close_top(&mut stack);
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    // Unclosed elements at end of input close implicitly
    while stack.len() > 1 {
        close_top(&mut stack);
    }

    Ok(stack.pop().map(|wrapper| wrapper.children).unwrap_or_default())
}

fn close_top(stack: &mut Vec<OpenElement>) {
    if let Some(open) = stack.pop() {
        push_child(stack, open.into_node());
    }
}

fn push_child(stack: &mut [OpenElement], node: FragmentNode) {
    if let Some(parent) = stack.last_mut() {
        parent.children.push(node);
    }
}

/// Append text, merging with a directly preceding text node.
fn push_text(stack: &mut [OpenElement], text: &str) {
    if text.is_empty() {
        return;
    }
    let Some(parent) = stack.last_mut() else {
        return;
    };
    if let Some(FragmentNode::Text(existing)) = parent.children.last_mut() {
        existing.push_str(text);
    } else {
        parent.children.push(FragmentNode::Text(text.to_owned()));
    }
}

fn decode_tag(reader: &Reader<&[u8]>, name: &[u8]) -> String {
    reader
        .decoder()
        .decode(name)
        .map_or_else(
            |_| String::from_utf8_lossy(name).into_owned(),
            std::borrow::Cow::into_owned,
        )
        .to_ascii_lowercase()
}

fn decode_attrs(reader: &Reader<&[u8]>, e: &BytesStart) -> Vec<(String, String)> {
    let mut attrs: Vec<(String, String)> = Vec::new();
    for attr in e.html_attributes().flatten() {
        let key = reader.decoder().decode(attr.key.as_ref()).map_or_else(
            |_| String::from_utf8_lossy(attr.key.as_ref()).into_owned(),
            std::borrow::Cow::into_owned,
        );
        let value = attr.unescape_value().map_or_else(
            |_| String::from_utf8_lossy(&attr.value).into_owned(),
            std::borrow::Cow::into_owned,
        );
        if let Some(existing) = attrs.iter_mut().find(|(name, _)| *name == key) {
            existing.1 = value;
        } else {
            attrs.push((key, value));
        }
    }
    attrs
}

/// Serialize the children of `id` as HTML.
pub(crate) fn serialize_children(doc: &Document, id: NodeId, out: &mut String) {
    for &child in doc.children(id) {
        serialize_node(doc, child, out);
    }
}

/// Serialize `id` and its subtree as HTML.
pub(crate) fn serialize_node(doc: &Document, id: NodeId, out: &mut String) {
    match doc.get(id) {
        Some(NodeData::Text(text)) => out.push_str(&escape_text(text)),
        Some(NodeData::Element(element)) => {
            out.push('<');
            out.push_str(element.tag());
            for (key, value) in element.attributes() {
                let _ = write!(out, r#" {}="{}""#, key, escape_attr(value));
            }

            if is_void(element.tag()) {
                out.push_str(" />");
                return;
            }

            out.push('>');
            serialize_children(doc, id, out);
            let _ = write!(out, "</{}>", element.tag());
        }
        None => {}
    }
}

/// Escape text for HTML content.
pub(crate) fn escape_text(text: &str) -> String {
    escape_html(text, false)
}

/// Escape text for HTML attribute values.
pub(crate) fn escape_attr(text: &str) -> String {
    escape_html(text, true)
}

fn escape_html(text: &str, escape_quotes: bool) -> String {
    let mut result = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => result.push_str("&amp;"),
            '<' => result.push_str("&lt;"),
            '>' => result.push_str("&gt;"),
            '"' if escape_quotes => result.push_str("&quot;"),
            _ => result.push(ch),
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn element(tag: &str, children: Vec<FragmentNode>) -> FragmentNode {
        FragmentNode::Element {
            tag: tag.to_owned(),
            attrs: Vec::new(),
            children,
        }
    }

    fn text(value: &str) -> FragmentNode {
        FragmentNode::Text(value.to_owned())
    }

    #[test]
    fn test_parse_simple_element() {
        let nodes = parse_fragment("<p>Hello</p>").unwrap();
        assert_eq!(nodes, vec![element("p", vec![text("Hello")])]);
    }

    #[test]
    fn test_parse_nested_elements_with_tail_text() {
        let nodes = parse_fragment("<p><strong>Bold</strong> text</p>").unwrap();
        assert_eq!(
            nodes,
            vec![element(
                "p",
                vec![element("strong", vec![text("Bold")]), text(" text")]
            )]
        );
    }

    #[test]
    fn test_parse_top_level_text() {
        let nodes = parse_fragment("just text").unwrap();
        assert_eq!(nodes, vec![text("just text")]);
    }

    #[test]
    fn test_parse_void_element_without_slash() {
        let nodes = parse_fragment("<p>Before<br>After</p>").unwrap();
        assert_eq!(
            nodes,
            vec![element(
                "p",
                vec![text("Before"), element("br", vec![]), text("After")]
            )]
        );
    }

    #[test]
    fn test_parse_entities_into_text() {
        let nodes = parse_fragment("<p>a &lt; b&nbsp;&#65;</p>").unwrap();
        assert_eq!(nodes, vec![element("p", vec![text("a < b\u{00a0}A")])]);
    }

    #[test]
    fn test_parse_attributes_in_order() {
        let nodes =
            parse_fragment(r#"<pre class="mermaid" data-original-content="A &amp; B">x</pre>"#)
                .unwrap();
        let FragmentNode::Element { attrs, .. } = &nodes[0] else {
            panic!("expected element");
        };
        assert_eq!(
            attrs,
            &vec![
                ("class".to_owned(), "mermaid".to_owned()),
                ("data-original-content".to_owned(), "A & B".to_owned()),
            ]
        );
    }

    #[test]
    fn test_parse_unclosed_elements_close_at_parent_end() {
        let nodes = parse_fragment("<div><p>one<p>two</div><span>x</span>").unwrap();
        assert_eq!(nodes.len(), 2);
        let FragmentNode::Element { tag, .. } = &nodes[1] else {
            panic!("expected element");
        };
        assert_eq!(tag, "span");
    }

    #[test]
    fn test_parse_stray_end_tag_ignored() {
        let nodes = parse_fragment("<p>a</em>b</p>").unwrap();
        assert_eq!(nodes, vec![element("p", vec![text("ab")])]);
    }

    #[test]
    fn test_escape_special_chars() {
        assert_eq!(escape_text("a < b & c > d"), "a &lt; b &amp; c &gt; d");
        assert_eq!(escape_attr(r#"say "hi""#), "say &quot;hi&quot;");
    }
}
