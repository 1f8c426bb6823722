//! The loaded feed document: type detection, channel and entry access,
//! source-URL resolution, and serialization.

use std::collections::BTreeSet;
use std::path::Path;

use url::Url;

use super::dialect::{dialect_for, Dialect, FeedType, ATOM_NS};
use super::FeedError;
use crate::xml::{self, Element, Node, XmlError};

/// A parsed RSS or Atom document.
///
/// The feed type is fixed at load time; every later operation goes through
/// the [`Dialect`] selected here. Entries are addressed by their position in
/// document order (0-based), which is the stable key the scheduling metadata
/// uses. Entry elements are never reordered or removed from the in-memory
/// tree, so indices stay valid for the document's lifetime.
#[derive(Debug, Clone)]
pub struct FeedDocument {
    root: Element,
    dialect: &'static dyn Dialect,
}

impl FeedDocument {
    /// Parse a feed from its XML text.
    pub fn parse(xml_text: &str) -> Result<Self, FeedError> {
        let root = xml::parse(xml_text)?;
        let feed_type = detect(&root)?;
        tracing::debug!(?feed_type, "feed document parsed");
        Ok(FeedDocument {
            root,
            dialect: dialect_for(feed_type),
        })
    }

    pub fn from_path(path: &Path) -> Result<Self, FeedError> {
        let xml_text = std::fs::read_to_string(path)?;
        Self::parse(&xml_text)
    }

    pub fn feed_type(&self) -> FeedType {
        self.dialect.feed_type()
    }

    pub fn dialect(&self) -> &'static dyn Dialect {
        self.dialect
    }

    pub fn root(&self) -> &Element {
        &self.root
    }

    pub fn root_mut(&mut self) -> &mut Element {
        &mut self.root
    }

    /// The element that owns channel metadata and the entries: `<channel>`
    /// for RSS, the root `<feed>` for Atom.
    pub fn channel(&self) -> Result<&Element, FeedError> {
        match self.dialect.feed_type() {
            FeedType::Atom => Ok(&self.root),
            FeedType::Rss => Ok(self.root.child(None, "channel")?),
        }
    }

    pub fn channel_mut(&mut self) -> Result<&mut Element, FeedError> {
        match self.dialect.feed_type() {
            FeedType::Atom => Ok(&mut self.root),
            FeedType::Rss => Ok(self.root.child_mut(None, "channel")?),
        }
    }

    pub fn entry_count(&self) -> Result<usize, FeedError> {
        Ok(self.entries()?.len())
    }

    /// Entry elements in document order.
    pub fn entries(&self) -> Result<Vec<&Element>, FeedError> {
        let ns = self.dialect.content_namespace();
        let local = self.dialect.entry_local_name();
        Ok(self.channel()?.children_named(ns, local).collect())
    }

    pub fn entry(&self, index: usize) -> Result<&Element, FeedError> {
        let entries = self.entries()?;
        let count = entries.len();
        entries
            .into_iter()
            .nth(index)
            .ok_or(FeedError::EntryOutOfRange { index, count })
    }

    pub fn entry_mut(&mut self, index: usize) -> Result<&mut Element, FeedError> {
        let count = self.entry_count()?;
        let ns = self.dialect.content_namespace();
        let local = self.dialect.entry_local_name();
        self.channel_mut()?
            .children_named_mut(ns, local)
            .nth(index)
            .ok_or(FeedError::EntryOutOfRange { index, count })
    }

    /// The source URL the feed advertises for itself.
    ///
    /// RSS: the channel `<link>`. Atom: the `rel="self"` link (or the first
    /// `<link>` if none), resolved against the `xml:base` chain from the
    /// document root down. Atom inherits base URIs, so skipping the chain
    /// would mis-resolve relative hrefs.
    pub fn source_url(&self) -> Result<String, FeedError> {
        match self.dialect.feed_type() {
            FeedType::Rss => {
                let link = self.channel()?.child(None, "link")?;
                Ok(link.text().unwrap_or_default())
            }
            FeedType::Atom => {
                let channel = self.channel()?;
                let links: Vec<&Element> = channel.children_named(Some(ATOM_NS), "link").collect();
                let link = links
                    .iter()
                    .copied()
                    .find(|l| l.attribute_opt("rel") == Some("self"))
                    .or_else(|| links.first().copied())
                    .ok_or_else(|| {
                        FeedError::Xml(XmlError::NotFound(format!("{{{}}}link", ATOM_NS)))
                    })?;
                let href = link.attribute("href")?;
                let bases = [
                    self.root.attribute_opt("xml:base"),
                    link.attribute_opt("xml:base"),
                ];
                resolve_with_bases(&bases, href)
            }
        }
    }

    /// Serialize the document, pretty-printed or compact.
    pub fn to_xml(&self, pretty: bool) -> Result<String, XmlError> {
        xml::render(&self.root, pretty)
    }

    /// An output-only copy with every element in `strip_namespace` removed
    /// (declaration included) and the entries at the given indices dropped.
    /// The document itself is left untouched.
    pub fn public_clone(
        &self,
        strip_namespace: &str,
        drop_entries: &BTreeSet<usize>,
    ) -> Result<FeedDocument, FeedError> {
        let mut stripped = self.clone();
        remove_namespace_elements(&mut stripped.root, strip_namespace);

        let declarations: Vec<String> = stripped
            .root
            .attributes()
            .filter(|(key, value)| {
                (*key == "xmlns" || key.starts_with("xmlns:")) && *value == strip_namespace
            })
            .map(|(key, _)| key.to_string())
            .collect();
        for key in declarations {
            stripped.root.remove_attribute(&key);
        }

        let ns = self.dialect.content_namespace();
        let local = self.dialect.entry_local_name();
        let channel = stripped.channel_mut()?;
        let mut ordinal = 0usize;
        channel.retain_children(|node| match node {
            Node::Element(el) if el.local_name() == local && el.namespace() == ns => {
                let keep = !drop_entries.contains(&ordinal);
                ordinal += 1;
                keep
            }
            _ => true,
        });

        Ok(stripped)
    }
}

fn detect(root: &Element) -> Result<FeedType, FeedError> {
    if root.local_name() == "rss" {
        if root.child_opt(None, "channel").is_some() {
            return Ok(FeedType::Rss);
        }
        return Err(FeedError::UnrecognizedFormat(
            "<rss> root with no <channel> element".to_string(),
        ));
    }
    if root.local_name() == "feed" && root.namespace() == Some(ATOM_NS) {
        return Ok(FeedType::Atom);
    }
    Err(FeedError::UnrecognizedFormat(format!(
        "root element <{}> is neither an RSS <rss>/<channel> document nor an Atom <feed>",
        root.qualified_name()
    )))
}

fn resolve_with_bases(bases: &[Option<&str>], href: &str) -> Result<String, FeedError> {
    let mut current: Option<Url> = None;
    for base in bases.iter().flatten() {
        current = match current {
            Some(cur) => Some(cur.join(base).map_err(|source| FeedError::Url {
                value: (*base).to_string(),
                source,
            })?),
            // A relative base with no absolute ancestor cannot anchor
            // resolution on its own.
            None => Url::parse(base).ok(),
        };
    }
    match current {
        Some(base) => Ok(base
            .join(href)
            .map_err(|source| FeedError::Url {
                value: href.to_string(),
                source,
            })?
            .to_string()),
        None => Ok(href.to_string()),
    }
}

fn remove_namespace_elements(element: &mut Element, namespace: &str) {
    element.retain_children(
        |node| !matches!(node, Node::Element(el) if el.namespace() == Some(namespace)),
    );
    for child in element.child_elements_mut() {
        remove_namespace_elements(child, namespace);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RSS: &str = r#"<?xml version="1.0"?>
<rss version="2.0">
  <channel>
    <title>Example</title>
    <link>https://example.com/</link>
    <item><title>One</title><pubDate>Mon, 02 Jan 2023 00:00:00 +0000</pubDate></item>
    <item><title>Two</title><pubDate>Tue, 03 Jan 2023 00:00:00 +0000</pubDate></item>
  </channel>
</rss>"#;

    const ATOM: &str = r#"<?xml version="1.0"?>
<feed xmlns="http://www.w3.org/2005/Atom" xml:base="https://example.com/feeds/">
  <title>Example</title>
  <link rel="self" href="atom.xml"/>
  <link href="https://example.com/alternate"/>
  <entry><title>One</title><updated>2023-01-02T00:00:00Z</updated></entry>
</feed>"#;

    #[test]
    fn test_detects_rss() {
        let doc = FeedDocument::parse(RSS).unwrap();
        assert_eq!(doc.feed_type(), FeedType::Rss);
        assert_eq!(doc.entry_count().unwrap(), 2);
    }

    #[test]
    fn test_detects_atom() {
        let doc = FeedDocument::parse(ATOM).unwrap();
        assert_eq!(doc.feed_type(), FeedType::Atom);
        assert_eq!(doc.entry_count().unwrap(), 1);
    }

    #[test]
    fn test_rejects_unrecognized_root() {
        let err = FeedDocument::parse("<opml version=\"2.0\"><body/></opml>").unwrap_err();
        assert!(matches!(err, FeedError::UnrecognizedFormat(_)));

        // An Atom-shaped root outside the Atom namespace is not a feed.
        let err = FeedDocument::parse("<feed><entry/></feed>").unwrap_err();
        assert!(matches!(err, FeedError::UnrecognizedFormat(_)));

        // <rss> without a channel is malformed for our purposes.
        let err = FeedDocument::parse("<rss version=\"2.0\"/>").unwrap_err();
        assert!(matches!(err, FeedError::UnrecognizedFormat(_)));
    }

    #[test]
    fn test_rss_source_url() {
        let doc = FeedDocument::parse(RSS).unwrap();
        assert_eq!(doc.source_url().unwrap(), "https://example.com/");
    }

    #[test]
    fn test_atom_source_url_resolves_xml_base() {
        let doc = FeedDocument::parse(ATOM).unwrap();
        assert_eq!(
            doc.source_url().unwrap(),
            "https://example.com/feeds/atom.xml"
        );
    }

    #[test]
    fn test_atom_source_url_base_chain() {
        let xml = r#"<feed xmlns="http://www.w3.org/2005/Atom" xml:base="https://example.com/a/">
  <link rel="self" href="feed.xml" xml:base="nested/"/>
</feed>"#;
        let doc = FeedDocument::parse(xml).unwrap();
        assert_eq!(
            doc.source_url().unwrap(),
            "https://example.com/a/nested/feed.xml"
        );
    }

    #[test]
    fn test_atom_source_url_falls_back_to_first_link() {
        let xml = r#"<feed xmlns="http://www.w3.org/2005/Atom">
  <link href="https://example.com/general"/>
</feed>"#;
        let doc = FeedDocument::parse(xml).unwrap();
        assert_eq!(doc.source_url().unwrap(), "https://example.com/general");
    }

    #[test]
    fn test_entry_indexing_in_document_order() {
        let doc = FeedDocument::parse(RSS).unwrap();
        let titles: Vec<_> = doc
            .entries()
            .unwrap()
            .iter()
            .map(|e| e.child(None, "title").unwrap().text().unwrap())
            .collect();
        assert_eq!(titles, vec!["One", "Two"]);

        let err = doc.entry(5).unwrap_err();
        assert!(matches!(
            err,
            FeedError::EntryOutOfRange { index: 5, count: 2 }
        ));
    }

    #[test]
    fn test_public_clone_drops_requested_entries_and_namespace() {
        let xml = r#"<rss version="2.0" xmlns:zzz="urn:zzz">
  <channel>
    <title>t</title>
    <link>https://example.com/</link>
    <zzz:state>hidden</zzz:state>
    <item><title>a</title><zzz:mark>x</zzz:mark></item>
    <item><title>b</title></item>
  </channel>
</rss>"#;
        let doc = FeedDocument::parse(xml).unwrap();
        let drop: BTreeSet<usize> = [0].into_iter().collect();
        let public = doc.public_clone("urn:zzz", &drop).unwrap();

        assert_eq!(public.entry_count().unwrap(), 1);
        let rendered = public.to_xml(true).unwrap();
        assert!(!rendered.contains("zzz"));
        assert!(rendered.contains("<title>b</title>"));

        // The original document is untouched.
        assert_eq!(doc.entry_count().unwrap(), 2);
        assert!(doc.to_xml(false).unwrap().contains("zzz:state"));
    }
}
