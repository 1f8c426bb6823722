//! RSS/Atom differences behind one capability trait.
//!
//! The two formats disagree on almost every detail this tool touches: which
//! element carries the entry identity (`guid` vs `id`), which carry dates
//! (`pubDate` vs `published`/`updated`), which date grammar those use
//! (RFC 2822 vs RFC 3339), and where the channel lives. Everything
//! format-specific is decided here, once, when the document is loaded;
//! the rest of the crate never branches on feed type.

use chrono::{DateTime, FixedOffset, SecondsFormat, Utc};

use super::FeedError;
use crate::xml::Element;

/// The Atom 1.0 namespace.
pub const ATOM_NS: &str = "http://www.w3.org/2005/Atom";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedType {
    Rss,
    Atom,
}

/// Format-specific operations on entries and the channel element.
///
/// Lookup methods return `None` rather than failing: optional feed fields
/// stay optional, and probing never mutates the tree.
pub trait Dialect: std::fmt::Debug + Sync {
    fn feed_type(&self) -> FeedType;

    /// Namespace the feed's own content elements live in (`None` for RSS,
    /// the Atom namespace for Atom).
    fn content_namespace(&self) -> Option<&'static str>;

    /// Local name of an entry element (`item` / `entry`).
    fn entry_local_name(&self) -> &'static str;

    /// The entry's identity-bearing value (`guid` / `id`), if present.
    fn identifier(&self, entry: &Element) -> Option<String>;

    fn set_identifier(&self, entry: &mut Element, id: &str);

    /// The entry's publication date string, if present.
    fn pubdate(&self, entry: &Element) -> Option<String>;

    fn set_pubdate(&self, entry: &mut Element, when: &DateTime<Utc>);

    /// Refresh the channel-level "last built/updated" fields.
    fn stamp_build_date(&self, channel: &mut Element, when: &DateTime<Utc>);

    /// Format a datetime the way this feed type writes dates to file.
    fn format_datetime(&self, when: &DateTime<Utc>) -> String;

    /// Parse a date string found in this feed type. Each dialect prefers
    /// its own grammar but accepts the other's, since feeds in the wild
    /// mix them freely.
    fn parse_datetime(&self, raw: &str) -> Result<DateTime<FixedOffset>, FeedError>;
}

pub fn dialect_for(feed_type: FeedType) -> &'static dyn Dialect {
    match feed_type {
        FeedType::Rss => &RssDialect,
        FeedType::Atom => &AtomDialect,
    }
}

#[derive(Debug)]
pub struct RssDialect;

#[derive(Debug)]
pub struct AtomDialect;

impl Dialect for RssDialect {
    fn feed_type(&self) -> FeedType {
        FeedType::Rss
    }

    fn content_namespace(&self) -> Option<&'static str> {
        None
    }

    fn entry_local_name(&self) -> &'static str {
        "item"
    }

    fn identifier(&self, entry: &Element) -> Option<String> {
        entry.child_opt(None, "guid").and_then(|el| el.text())
    }

    fn set_identifier(&self, entry: &mut Element, id: &str) {
        entry.set_child_text(None, "guid", id);
        // A generated guid is an opaque token, not a fetchable URL.
        if let Some(guid) = entry.children_named_mut(None, "guid").next() {
            guid.set_attribute("isPermaLink", "false");
        }
    }

    fn pubdate(&self, entry: &Element) -> Option<String> {
        entry.child_opt(None, "pubDate").and_then(|el| el.text())
    }

    fn set_pubdate(&self, entry: &mut Element, when: &DateTime<Utc>) {
        entry.set_child_text(None, "pubDate", &self.format_datetime(when));
    }

    fn stamp_build_date(&self, channel: &mut Element, when: &DateTime<Utc>) {
        let formatted = self.format_datetime(when);
        channel.set_child_text(None, "pubDate", &formatted);
        channel.set_child_text(None, "lastBuildDate", &formatted);
    }

    fn format_datetime(&self, when: &DateTime<Utc>) -> String {
        // RSS 2.0 dates follow RFC 822 (RFC 2822 is its superset).
        when.to_rfc2822()
    }

    fn parse_datetime(&self, raw: &str) -> Result<DateTime<FixedOffset>, FeedError> {
        DateTime::parse_from_rfc2822(raw)
            .or_else(|_| DateTime::parse_from_rfc3339(raw))
            .map_err(|source| FeedError::Date {
                value: raw.to_string(),
                source,
            })
    }
}

impl Dialect for AtomDialect {
    fn feed_type(&self) -> FeedType {
        FeedType::Atom
    }

    fn content_namespace(&self) -> Option<&'static str> {
        Some(ATOM_NS)
    }

    fn entry_local_name(&self) -> &'static str {
        "entry"
    }

    fn identifier(&self, entry: &Element) -> Option<String> {
        entry.child_opt(Some(ATOM_NS), "id").and_then(|el| el.text())
    }

    fn set_identifier(&self, entry: &mut Element, id: &str) {
        entry.set_child_text(Some(ATOM_NS), "id", id);
    }

    fn pubdate(&self, entry: &Element) -> Option<String> {
        entry
            .child_opt(Some(ATOM_NS), "updated")
            .and_then(|el| el.text())
            .or_else(|| {
                entry
                    .child_opt(Some(ATOM_NS), "published")
                    .and_then(|el| el.text())
            })
    }

    fn set_pubdate(&self, entry: &mut Element, when: &DateTime<Utc>) {
        let formatted = self.format_datetime(when);
        entry.set_child_text(Some(ATOM_NS), "published", &formatted);
        entry.set_child_text(Some(ATOM_NS), "updated", &formatted);
    }

    fn stamp_build_date(&self, channel: &mut Element, when: &DateTime<Utc>) {
        channel.set_child_text(Some(ATOM_NS), "updated", &self.format_datetime(when));
    }

    fn format_datetime(&self, when: &DateTime<Utc>) -> String {
        // RFC 4287 §3.3: RFC 3339, uppercase T, Z when the offset is zero.
        when.to_rfc3339_opts(SecondsFormat::Secs, true)
    }

    fn parse_datetime(&self, raw: &str) -> Result<DateTime<FixedOffset>, FeedError> {
        DateTime::parse_from_rfc3339(raw)
            .or_else(|_| DateTime::parse_from_rfc2822(raw))
            .map_err(|source| FeedError::Date {
                value: raw.to_string(),
                source,
            })
    }
}
