//! HTML Serialization (innerHTML/outerHTML)
//!
//! Follows the browser's serialization rules: void elements have no end
//! tag, attributes are always quoted, text and attribute values are escaped.

use crate::node::NodeData;
use crate::{DomTree, NodeId};

/// Void elements (no end tag, no children)
pub const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input",
    "link", "meta", "param", "source", "track", "wbr",
];

/// Raw text elements (no escaping for content)
const RAW_TEXT_ELEMENTS: &[&str] = &["script", "style"];

pub(crate) fn outer_html(tree: &DomTree, node: NodeId) -> String {
    let mut output = String::new();
    serialize_node(tree, node, &mut output, false);
    output
}

pub(crate) fn inner_html(tree: &DomTree, node: NodeId) -> String {
    let mut output = String::new();
    let raw = tree
        .tag_name(node)
        .is_some_and(|t| RAW_TEXT_ELEMENTS.iter().any(|r| r.eq_ignore_ascii_case(t)));
    for child in tree.children(node) {
        serialize_node(tree, child, &mut output, raw);
    }
    output
}

fn serialize_node(tree: &DomTree, node: NodeId, output: &mut String, raw: bool) {
    let Some(n) = tree.get(node) else {
        return;
    };
    match &n.data {
        NodeData::Element(elem) => {
            output.push('<');
            output.push_str(&elem.tag);
            for attr in &elem.attrs {
                output.push(' ');
                output.push_str(&attr.name);
                output.push_str("=\"");
                escape_attribute(&attr.value, output);
                output.push('"');
            }
            output.push('>');
            if VOID_ELEMENTS.iter().any(|v| v.eq_ignore_ascii_case(&elem.tag)) {
                return;
            }
            output.push_str(&inner_html(tree, node));
            output.push_str("</");
            output.push_str(&elem.tag);
            output.push('>');
        }
        NodeData::Text(text) if raw => output.push_str(text),
        NodeData::Text(text) => escape_text(text, output),
        NodeData::Comment(text) => {
            output.push_str("<!--");
            output.push_str(text);
            output.push_str("-->");
        }
    }
}

/// Escape text content
pub fn escape_text(text: &str, output: &mut String) {
    for c in text.chars() {
        match c {
            '&' => output.push_str("&amp;"),
            '<' => output.push_str("&lt;"),
            '>' => output.push_str("&gt;"),
            '\u{a0}' => output.push_str("&nbsp;"),
            _ => output.push(c),
        }
    }
}

/// Escape an attribute value
pub fn escape_attribute(value: &str, output: &mut String) {
    for c in value.chars() {
        match c {
            '&' => output.push_str("&amp;"),
            '"' => output.push_str("&quot;"),
            '\u{a0}' => output.push_str("&nbsp;"),
            _ => output.push(c),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::Dom;

    #[test]
    fn test_outer_html_void_and_escaping() {
        let dom = Dom::new();
        let div = dom.create_element("div");
        dom.set_attribute(div, "title", "a \"b\" & c").unwrap();
        let input = dom.create_element("input");
        dom.set_attribute(input, "disabled", "").unwrap();
        let text = dom.create_text("1 < 2");
        dom.append_child(div, input).unwrap();
        dom.append_child(div, text).unwrap();

        assert_eq!(
            dom.outer_html(div),
            r#"<div title="a &quot;b&quot; &amp; c"><input disabled="">1 &lt; 2</div>"#
        );
    }

    #[test]
    fn test_custom_element_empty() {
        let dom = Dom::new();
        let el = dom.create_element("x-1");
        assert_eq!(dom.outer_html(el), "<x-1></x-1>");
        assert_eq!(dom.inner_html(el), "");
    }

    #[test]
    fn test_script_content_is_raw() {
        let dom = Dom::new();
        let script = dom.create_element("script");
        let code = dom.create_text("if (a < b) {}");
        dom.append_child(script, code).unwrap();
        assert_eq!(dom.outer_html(script), "<script>if (a < b) {}</script>");
    }
}
