//! Typed, namespace-qualified accessors over [`Element`].
//!
//! This is the only surface the feed and scheduling layers use to touch the
//! tree. The contract that matters: **lookups never mutate structure**. A
//! missing child or attribute is an explicit [`XmlError::NotFound`] /
//! [`XmlError::AttributeNotFound`], never a silently created element:
//! probing for an optional field must leave the document byte-identical.
//! Creation is always a separate, named operation ([`Element::create_child`],
//! [`Element::set_child_text`]).

use super::tree::{Element, Node, XmlError};

impl Element {
    /// Concatenated text content (text and CDATA children).
    ///
    /// Returns `None` for an element with no textual children, which is
    /// distinct from an element whose text is the empty string.
    pub fn text(&self) -> Option<String> {
        let mut out: Option<String> = None;
        for child in &self.children {
            match child {
                Node::Text(t) | Node::CData(t) => out.get_or_insert_with(String::new).push_str(t),
                _ => {}
            }
        }
        out
    }

    /// Replace this element's textual content, dropping prior text runs.
    /// Element children are left in place.
    pub fn set_text(&mut self, text: &str) {
        self.children
            .retain(|node| !matches!(node, Node::Text(_) | Node::CData(_)));
        self.children.push(Node::Text(text.to_string()));
    }

    /// First child with the given namespace and local name.
    pub fn child(&self, namespace: Option<&str>, local: &str) -> Result<&Element, XmlError> {
        self.child_opt(namespace, local)
            .ok_or_else(|| XmlError::NotFound(qualified(namespace, local)))
    }

    /// Like [`Element::child`], but absence is not an error.
    pub fn child_opt(&self, namespace: Option<&str>, local: &str) -> Option<&Element> {
        self.child_elements()
            .find(|el| el.matches(namespace, local))
    }

    pub fn child_mut(
        &mut self,
        namespace: Option<&str>,
        local: &str,
    ) -> Result<&mut Element, XmlError> {
        self.children
            .iter_mut()
            .find_map(|node| match node {
                Node::Element(el) if el.matches(namespace, local) => Some(el),
                _ => None,
            })
            .ok_or_else(|| XmlError::NotFound(qualified(namespace, local)))
    }

    fn matches(&self, namespace: Option<&str>, local: &str) -> bool {
        self.local == local && self.namespace.as_deref() == namespace
    }

    /// All children with the given namespace and local name, in order.
    pub fn children_named<'a>(
        &'a self,
        namespace: Option<&'a str>,
        local: &'a str,
    ) -> impl Iterator<Item = &'a Element> {
        self.child_elements()
            .filter(move |el| el.local == local && el.namespace.as_deref() == namespace)
    }

    pub fn children_named_mut<'a>(
        &'a mut self,
        namespace: Option<&'a str>,
        local: &'a str,
    ) -> impl Iterator<Item = &'a mut Element> {
        self.children.iter_mut().filter_map(move |node| match node {
            Node::Element(el) if el.local == local && el.namespace.as_deref() == namespace => {
                Some(el)
            }
            _ => None,
        })
    }

    /// Append a new child element and return it for further construction.
    pub fn create_child(
        &mut self,
        prefix: Option<&str>,
        namespace: Option<&str>,
        local: &str,
    ) -> &mut Element {
        self.children
            .push(Node::Element(Element::new(prefix, namespace, local)));
        match self.children.last_mut() {
            Some(Node::Element(el)) => el,
            _ => unreachable!("element was just pushed"),
        }
    }

    /// Upsert: set the text of the named child, creating it (with this
    /// element's own prefix, so it lands in the same serialized namespace
    /// scope) if absent. The one deliberately mutating "lookup"; callers
    /// reach for it only when they mean to write.
    pub fn set_child_text(&mut self, namespace: Option<&str>, local: &str, text: &str) {
        if self.children_named_mut(namespace, local).next().is_some() {
            let el = self.children_named_mut(namespace, local).next().unwrap();
            el.set_text(text);
        } else {
            let prefix = self.prefix.clone();
            let el = self.create_child(prefix.as_deref(), namespace, local);
            el.set_text(text);
        }
    }

    /// Remove every child with the given namespace and local name, returning
    /// how many were removed.
    pub fn remove_children(&mut self, namespace: Option<&str>, local: &str) -> usize {
        let before = self.children.len();
        self.children.retain(|node| match node {
            Node::Element(el) => !(el.local == local && el.namespace.as_deref() == namespace),
            _ => true,
        });
        before - self.children.len()
    }

    /// Attribute value by its name as written (e.g. `href`, `xml:base`).
    pub fn attribute(&self, name: &str) -> Result<&str, XmlError> {
        self.attribute_opt(name)
            .ok_or_else(|| XmlError::AttributeNotFound(name.to_string()))
    }

    pub fn attribute_opt(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    /// All attributes in document order, as written.
    pub fn attributes(&self) -> impl Iterator<Item = (&str, &str)> {
        self.attributes
            .iter()
            .map(|(key, value)| (key.as_str(), value.as_str()))
    }

    /// Set (or replace) an attribute, preserving attribute order for
    /// existing keys.
    pub fn set_attribute(&mut self, name: &str, value: &str) {
        match self.attributes.iter_mut().find(|(key, _)| key == name) {
            Some((_, existing)) => *existing = value.to_string(),
            None => self.attributes.push((name.to_string(), value.to_string())),
        }
    }

    pub fn remove_attribute(&mut self, name: &str) {
        self.attributes.retain(|(key, _)| key != name);
    }
}

fn qualified(namespace: Option<&str>, local: &str) -> String {
    match namespace {
        Some(ns) => format!("{{{}}}{}", ns, local),
        None => local.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xml::parse;

    const DOC: &str = r#"<root xmlns:x="urn:example">
  <a>alpha</a>
  <x:a>namespaced</x:a>
  <b attr="1&amp;2"/>
</root>"#;

    #[test]
    fn test_child_lookup_is_namespace_qualified() {
        let root = parse(DOC).unwrap();
        assert_eq!(root.child(None, "a").unwrap().text().as_deref(), Some("alpha"));
        assert_eq!(
            root.child(Some("urn:example"), "a").unwrap().text().as_deref(),
            Some("namespaced")
        );
    }

    #[test]
    fn test_missing_child_is_not_found_and_has_no_side_effect() {
        let root = parse(DOC).unwrap();
        let before = root.children().len();
        let err = root.child(None, "nope").unwrap_err();
        assert!(matches!(err, XmlError::NotFound(_)));
        // Probing must not create anything.
        assert_eq!(root.children().len(), before);
        assert!(root.child_opt(None, "nope").is_none());
    }

    #[test]
    fn test_attribute_access() {
        let root = parse(DOC).unwrap();
        let b = root.child(None, "b").unwrap();
        assert_eq!(b.attribute("attr").unwrap(), "1&2");
        assert!(matches!(
            b.attribute("missing").unwrap_err(),
            XmlError::AttributeNotFound(_)
        ));
    }

    #[test]
    fn test_set_child_text_upserts() {
        let mut root = parse(DOC).unwrap();
        root.set_child_text(None, "a", "updated");
        assert_eq!(root.child(None, "a").unwrap().text().as_deref(), Some("updated"));

        let count = root.children().len();
        root.set_child_text(None, "fresh", "born");
        assert_eq!(root.children().len(), count + 1);
        assert_eq!(root.child(None, "fresh").unwrap().text().as_deref(), Some("born"));
    }

    #[test]
    fn test_created_child_inherits_parent_prefix() {
        let mut root = parse(r#"<a:root xmlns:a="urn:a"/>"#).unwrap();
        root.set_child_text(Some("urn:a"), "item", "v");
        let item = root.child(Some("urn:a"), "item").unwrap();
        assert_eq!(item.prefix(), Some("a"));
        assert_eq!(item.qualified_name(), "a:item");
    }

    #[test]
    fn test_remove_children() {
        let mut root = parse(DOC).unwrap();
        assert_eq!(root.remove_children(None, "a"), 1);
        assert!(root.child_opt(None, "a").is_none());
        // The namespaced sibling is untouched.
        assert!(root.child_opt(Some("urn:example"), "a").is_some());
        assert_eq!(root.remove_children(None, "a"), 0);
    }

    #[test]
    fn test_set_text_replaces_only_text_nodes() {
        let mut root = parse("<root>old<keep/>tail</root>").unwrap();
        root.set_text("new");
        assert_eq!(root.text().as_deref(), Some("new"));
        assert!(root.child_opt(None, "keep").is_some());
    }

    #[test]
    fn test_set_attribute_replaces_in_place() {
        let mut root = parse(r#"<root one="1" two="2"/>"#).unwrap();
        root.set_attribute("one", "uno");
        root.set_attribute("three", "3");
        assert_eq!(root.attribute("one").unwrap(), "uno");
        assert_eq!(root.attribute("three").unwrap(), "3");
        root.remove_attribute("two");
        assert!(root.attribute_opt("two").is_none());
    }
}
