//! Minimal owned XML element tree over quick-xml.
//!
//! Feeds are small documents that must round-trip through edit-and-rewrite
//! cycles without losing elements the tool does not understand, so the tree
//! keeps every element, attribute, text run, CDATA section, and comment it
//! encounters. Namespaces are resolved at parse time (via [`NsReader`]) and
//! stored per element alongside the prefix as written, which lets lookups be
//! namespace-qualified while serialization reproduces the original spelling.
//!
//! Insignificant whitespace is trimmed during parsing and regenerated by the
//! writer when pretty-printing is requested. Keeping the source indentation
//! would otherwise leave newly inserted elements unindented.

use std::io::Cursor;

use quick_xml::encoding::Decoder;
use quick_xml::events::{BytesCData, BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::name::ResolveResult;
use quick_xml::reader::NsReader;
use quick_xml::writer::Writer;
use thiserror::Error;

/// Errors from parsing, serializing, or element lookups.
#[derive(Debug, Error)]
pub enum XmlError {
    /// The document is not well-formed XML.
    #[error("XML parse error: {0}")]
    Parse(String),

    /// Serialization failed.
    #[error("XML write error: {0}")]
    Write(String),

    /// A required child element is absent. Lookups never create elements;
    /// callers that want creation must ask for it explicitly.
    #[error("required element not found: <{0}>")]
    NotFound(String),

    /// A required attribute is absent.
    #[error("required attribute not found: {0}")]
    AttributeNotFound(String),
}

/// One node in an element's ordered child list.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Element(Element),
    Text(String),
    CData(String),
    Comment(String),
}

/// An XML element: resolved namespace, prefix as written, attributes in
/// document order (values stored unescaped), and ordered children.
#[derive(Debug, Clone, PartialEq)]
pub struct Element {
    pub(crate) prefix: Option<String>,
    pub(crate) local: String,
    pub(crate) namespace: Option<String>,
    pub(crate) attributes: Vec<(String, String)>,
    pub(crate) children: Vec<Node>,
}

impl Element {
    pub fn new(prefix: Option<&str>, namespace: Option<&str>, local: &str) -> Self {
        Element {
            prefix: prefix.map(str::to_string),
            local: local.to_string(),
            namespace: namespace.map(str::to_string),
            attributes: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn local_name(&self) -> &str {
        &self.local
    }

    pub fn prefix(&self) -> Option<&str> {
        self.prefix.as_deref()
    }

    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    /// The element name as it appears in the serialized document.
    pub fn qualified_name(&self) -> String {
        match &self.prefix {
            Some(prefix) => format!("{}:{}", prefix, self.local),
            None => self.local.clone(),
        }
    }

    pub fn children(&self) -> &[Node] {
        &self.children
    }

    /// Child elements only, in document order.
    pub fn child_elements(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(|node| match node {
            Node::Element(el) => Some(el),
            _ => None,
        })
    }

    pub fn child_elements_mut(&mut self) -> impl Iterator<Item = &mut Element> {
        self.children.iter_mut().filter_map(|node| match node {
            Node::Element(el) => Some(el),
            _ => None,
        })
    }

    /// Keep only the children for which `keep` returns true. Used by the
    /// write-time stripping pass; ordinary lookups never remove anything.
    pub fn retain_children(&mut self, keep: impl FnMut(&Node) -> bool) {
        self.children.retain(keep);
    }
}

/// Parse a complete XML document into its root element.
pub fn parse(xml: &str) -> Result<Element, XmlError> {
    let mut reader = NsReader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut stack: Vec<Element> = Vec::new();
    let mut root: Option<Element> = None;
    let decoder = reader.decoder();

    loop {
        match reader
            .read_resolved_event()
            .map_err(|e| XmlError::Parse(e.to_string()))?
        {
            (ns, Event::Start(e)) => {
                let element = element_from_start(decoder, ns, &e)?;
                stack.push(element);
            }
            (ns, Event::Empty(e)) => {
                let element = element_from_start(decoder, ns, &e)?;
                attach(&mut stack, &mut root, Node::Element(element));
            }
            (_, Event::End(_)) => {
                // The reader guarantees well-formed nesting, so End always
                // matches the top of the stack.
                if let Some(element) = stack.pop() {
                    attach(&mut stack, &mut root, Node::Element(element));
                }
            }
            (_, Event::Text(e)) => {
                let text = e
                    .unescape()
                    .map_err(|e| XmlError::Parse(e.to_string()))?
                    .into_owned();
                if let Some(parent) = stack.last_mut() {
                    parent.children.push(Node::Text(text));
                }
            }
            (_, Event::CData(e)) => {
                let text = String::from_utf8_lossy(&e).into_owned();
                if let Some(parent) = stack.last_mut() {
                    parent.children.push(Node::CData(text));
                }
            }
            (_, Event::Comment(e)) => {
                let text = String::from_utf8_lossy(&e).into_owned();
                if let Some(parent) = stack.last_mut() {
                    parent.children.push(Node::Comment(text));
                }
            }
            (_, Event::Eof) => break,
            _ => {}
        }
    }

    root.ok_or_else(|| XmlError::Parse("document contains no root element".to_string()))
}

/// Serialize a tree back to an XML string, with an XML declaration and
/// either two-space indentation or no insignificant whitespace at all.
pub fn render(root: &Element, pretty: bool) -> Result<String, XmlError> {
    let cursor = Cursor::new(Vec::new());
    let mut writer = if pretty {
        Writer::new_with_indent(cursor, b' ', 2)
    } else {
        Writer::new(cursor)
    };

    writer
        .write_event(Event::Decl(BytesDecl::new("1.0", Some("utf-8"), None)))
        .map_err(|e| XmlError::Write(e.to_string()))?;
    write_element(&mut writer, root)?;

    let bytes = writer.into_inner().into_inner();
    String::from_utf8(bytes).map_err(|e| XmlError::Write(e.to_string()))
}

fn element_from_start(
    decoder: Decoder,
    ns: ResolveResult,
    e: &BytesStart<'_>,
) -> Result<Element, XmlError> {
    let name = e.name();
    let local = String::from_utf8_lossy(name.local_name().into_inner()).into_owned();
    let prefix = name
        .prefix()
        .map(|p| String::from_utf8_lossy(p.into_inner()).into_owned());
    let namespace = match ns {
        ResolveResult::Bound(uri) => {
            Some(String::from_utf8_lossy(uri.into_inner()).into_owned())
        }
        // An unbound or undeclared prefix is preserved verbatim but cannot
        // participate in namespace-qualified lookups.
        _ => None,
    };

    let mut attributes = Vec::new();
    for attr in e.attributes() {
        let attr = attr.map_err(|e| XmlError::Parse(e.to_string()))?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr
            .decode_and_unescape_value(decoder)
            .map_err(|e| XmlError::Parse(e.to_string()))?
            .into_owned();
        attributes.push((key, value));
    }

    Ok(Element {
        prefix,
        local,
        namespace,
        attributes,
        children: Vec::new(),
    })
}

fn attach(stack: &mut Vec<Element>, root: &mut Option<Element>, node: Node) {
    if let Some(parent) = stack.last_mut() {
        parent.children.push(node);
    } else if let Node::Element(element) = node {
        if root.is_none() {
            *root = Some(element);
        }
    }
}

fn write_element(
    writer: &mut Writer<Cursor<Vec<u8>>>,
    element: &Element,
) -> Result<(), XmlError> {
    let name = element.qualified_name();
    let mut start = BytesStart::new(name.as_str());
    for (key, value) in &element.attributes {
        start.push_attribute((key.as_str(), value.as_str()));
    }

    if element.children.is_empty() {
        return writer
            .write_event(Event::Empty(start))
            .map_err(|e| XmlError::Write(e.to_string()));
    }

    writer
        .write_event(Event::Start(start))
        .map_err(|e| XmlError::Write(e.to_string()))?;

    for child in &element.children {
        match child {
            Node::Element(el) => write_element(writer, el)?,
            Node::Text(text) => writer
                .write_event(Event::Text(BytesText::new(text)))
                .map_err(|e| XmlError::Write(e.to_string()))?,
            Node::CData(text) => writer
                .write_event(Event::CData(BytesCData::new(text.as_str())))
                .map_err(|e| XmlError::Write(e.to_string()))?,
            Node::Comment(text) => writer
                .write_event(Event::Comment(BytesText::from_escaped(text.as_str())))
                .map_err(|e| XmlError::Write(e.to_string()))?,
        }
    }

    writer
        .write_event(Event::End(BytesEnd::new(name.as_str())))
        .map_err(|e| XmlError::Write(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_resolves_namespaces() {
        let xml = r#"<?xml version="1.0"?>
<feed xmlns="http://www.w3.org/2005/Atom" xmlns:x="urn:example">
  <title>Example</title>
  <x:marker/>
</feed>"#;

        let root = parse(xml).unwrap();
        assert_eq!(root.local_name(), "feed");
        assert_eq!(root.namespace(), Some("http://www.w3.org/2005/Atom"));
        assert_eq!(root.prefix(), None);

        let children: Vec<&Element> = root.child_elements().collect();
        assert_eq!(children.len(), 2);
        assert_eq!(children[0].local_name(), "title");
        assert_eq!(children[0].namespace(), Some("http://www.w3.org/2005/Atom"));
        assert_eq!(children[1].local_name(), "marker");
        assert_eq!(children[1].namespace(), Some("urn:example"));
        assert_eq!(children[1].prefix(), Some("x"));
    }

    #[test]
    fn test_round_trip_preserves_content() {
        let xml = r#"<?xml version="1.0"?>
<rss version="2.0">
  <channel>
    <title>My &amp; Feed</title>
    <item>
      <title>First</title>
      <description><![CDATA[Some <b>bold</b> text & more]]></description>
    </item>
  </channel>
</rss>"#;

        let root = parse(xml).unwrap();
        let rendered = render(&root, true).unwrap();
        let reparsed = parse(&rendered).unwrap();
        assert_eq!(root, reparsed);
    }

    #[test]
    fn test_cdata_written_verbatim() {
        let xml = "<root><body><![CDATA[a < b && c]]></body></root>";
        let root = parse(xml).unwrap();
        let rendered = render(&root, false).unwrap();
        assert!(rendered.contains("<![CDATA[a < b && c]]>"));
    }

    #[test]
    fn test_text_escaping_round_trip() {
        let xml = "<root><t>fish &amp; chips &lt;now&gt;</t></root>";
        let root = parse(xml).unwrap();
        let rendered = render(&root, false).unwrap();
        assert!(rendered.contains("fish &amp; chips &lt;now&gt;"));
        assert_eq!(parse(&rendered).unwrap(), root);
    }

    #[test]
    fn test_attribute_values_unescaped_in_memory() {
        let xml = r#"<root link="https://example.com/?a=1&amp;b=2"/>"#;
        let root = parse(xml).unwrap();
        assert_eq!(
            root.attributes[0].1,
            "https://example.com/?a=1&b=2".to_string()
        );
        // Re-escaped on the way out.
        let rendered = render(&root, false).unwrap();
        assert!(rendered.contains("a=1&amp;b=2"));
    }

    #[test]
    fn test_pretty_and_compact_parse_identically() {
        let xml = "<root><a><b>text</b></a><c/></root>";
        let root = parse(xml).unwrap();
        let pretty = render(&root, true).unwrap();
        let compact = render(&root, false).unwrap();
        assert!(pretty.contains('\n'));
        assert_eq!(parse(&pretty).unwrap(), parse(&compact).unwrap());
    }

    #[test]
    fn test_malformed_document_is_an_error() {
        assert!(parse("<not closed").is_err());
        assert!(parse("").is_err());
    }

    #[test]
    fn test_comments_survive() {
        let xml = "<root><!-- generated --><a/></root>";
        let root = parse(xml).unwrap();
        let rendered = render(&root, false).unwrap();
        assert!(rendered.contains("<!-- generated -->"));
    }
}
