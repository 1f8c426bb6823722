//! The rebroadcast engine: pops pending entries, stamps them fresh, and
//! keeps the persisted metadata in sync with the live document.

use std::collections::BTreeSet;
use std::path::Path;

use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, FixedOffset, Utc};
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use sha2::{Digest, Sha256};

use super::metadata::{InitOptions, RerunsMeta, RERUNS_NS};
use super::ScheduleError;
use crate::feed::{FeedDocument, FeedError, FeedType};

/// Serialization choices for [`Rebroadcaster::write_to`] and
/// [`Rebroadcaster::to_xml_string`].
#[derive(Debug, Clone)]
pub struct WriteOptions {
    /// Two-space indentation; affects whitespace only, never content.
    pub pretty: bool,
    /// When false, the output is the public form: reserved-namespace
    /// elements are stripped and entries still pending are dropped: an
    /// un-rebroadcast entry without its metadata would be indistinguishable
    /// from an ordinary original entry, which defeats a reruns-only feed.
    pub with_reruns_data: bool,
}

impl Default for WriteOptions {
    fn default() -> Self {
        WriteOptions {
            pretty: true,
            with_reruns_data: true,
        }
    }
}

/// Owns a loaded feed plus its scheduling metadata and drives rebroadcasts.
///
/// The RNG supplied at construction is the only randomness source: it feeds
/// the one-time shuffle at first initialization and the re-permutation when
/// a run-forever feed starts a new cycle. Tests inject a seeded generator.
pub struct Rebroadcaster {
    doc: FeedDocument,
    meta: RerunsMeta,
    rng: Box<dyn RngCore>,
}

impl Rebroadcaster {
    pub fn from_xml(xml: &str, options: &InitOptions) -> Result<Self, ScheduleError> {
        let doc = FeedDocument::parse(xml)?;
        Self::with_rng(doc, options, Box::new(StdRng::from_os_rng()))
    }

    pub fn from_path(path: &Path, options: &InitOptions) -> Result<Self, ScheduleError> {
        let doc = FeedDocument::from_path(path)?;
        Self::with_rng(doc, options, Box::new(StdRng::from_os_rng()))
    }

    /// Wrap an already-parsed document with an injected randomness source.
    pub fn with_rng(
        doc: FeedDocument,
        options: &InitOptions,
        mut rng: Box<dyn RngCore>,
    ) -> Result<Self, ScheduleError> {
        let meta = RerunsMeta::load_or_init(&doc, options, rng.as_mut())?;
        Ok(Rebroadcaster { doc, meta, rng })
    }

    pub fn feed_type(&self) -> FeedType {
        self.doc.feed_type()
    }

    pub fn document(&self) -> &FeedDocument {
        &self.doc
    }

    pub fn meta(&self) -> &RerunsMeta {
        &self.meta
    }

    pub fn num_remaining(&self) -> usize {
        self.meta.num_remaining()
    }

    pub fn source_url(&self) -> Result<String, ScheduleError> {
        Ok(self.doc.source_url()?)
    }

    /// Configure feed-title decoration and re-derive the displayed title
    /// from the stored base title. Empty strings mean "leave unchanged", and
    /// derivation never starts from an already-decorated title, so repeated
    /// calls cannot compound prefixes.
    pub fn set_feed_title(
        &mut self,
        prefix: Option<&str>,
        suffix: Option<&str>,
    ) -> Result<(), ScheduleError> {
        self.meta.set_feed_affixes(prefix, suffix);
        self.apply_feed_title()
    }

    /// Configure entry-title decoration and re-derive every entry's
    /// displayed title. Affixes may embed strftime directives, expanded per
    /// entry against its *original* publication date; invalid directives are
    /// rejected here, before anything is stored or touched.
    pub fn set_entry_titles(
        &mut self,
        prefix: Option<&str>,
        suffix: Option<&str>,
    ) -> Result<(), ScheduleError> {
        for pattern in [prefix, suffix].into_iter().flatten() {
            if !pattern.is_empty() {
                validate_affix(pattern)?;
            }
        }
        self.meta.set_entry_affixes(prefix, suffix);
        self.apply_entry_titles()
    }

    /// Rebroadcast `count` entries at the current wall-clock time.
    pub fn rebroadcast(&mut self, count: usize) -> Result<Vec<usize>, ScheduleError> {
        self.rebroadcast_at(count, Utc::now())
    }

    /// Rebroadcast `count` entries as of an explicit instant.
    ///
    /// Pops FIFO from the pending queue: oldest-first for chronological
    /// feeds, the fixed persisted permutation for shuffled ones. Each popped
    /// entry gets the new publication date, a freshly generated identifier
    /// (aggregators cache item identity, so reusing the old one would make
    /// the update invisible), and its decorated title. Fails with
    /// [`ScheduleError::InsufficientEntries`] when over-requesting, unless
    /// the feed was initialized run-forever, in which case an exhausted
    /// queue refills for a new cycle. Validation happens before the first
    /// entry is touched; a failed call leaves no partial state.
    pub fn rebroadcast_at(
        &mut self,
        count: usize,
        when: DateTime<Utc>,
    ) -> Result<Vec<usize>, ScheduleError> {
        let remaining = self.meta.num_remaining();
        if count > remaining && !self.meta.run_forever() {
            return Err(ScheduleError::InsufficientEntries {
                requested: count,
                remaining,
            });
        }
        let total = self.doc.entry_count()?;
        if count > 0 && total == 0 {
            return Err(ScheduleError::InsufficientEntries {
                requested: count,
                remaining: 0,
            });
        }

        // Also validates the persisted affix patterns up front.
        let titles = self.decorated_entry_titles()?;

        let dialect = self.doc.dialect();
        let stamp = dialect.format_datetime(&when);
        let mut reran = Vec::with_capacity(count);
        for _ in 0..count {
            if self.meta.num_remaining() == 0 {
                self.meta.refill(self.rng.as_mut());
                tracing::info!(entries = total, "pending queue exhausted; starting a new cycle");
            }
            let index = match self.meta.pop_pending() {
                Some(index) => index,
                None => break,
            };

            let prior = dialect
                .identifier(self.doc.entry(index)?)
                .unwrap_or_default();
            let id = fresh_identifier(dialect.feed_type(), &prior, index, &when);

            let entry = self.doc.entry_mut(index)?;
            dialect.set_pubdate(entry, &when);
            dialect.set_identifier(entry, &id);
            entry.set_child_text(dialect.content_namespace(), "title", &titles[index]);

            self.meta.mark_broadcast(index, stamp.clone(), id)?;
            reran.push(index);
        }

        self.apply_feed_title()?;
        dialect.stamp_build_date(self.doc.channel_mut()?, &when);
        self.meta.serialize_into(&mut self.doc)?;
        tracing::info!(
            count = reran.len(),
            remaining = self.meta.num_remaining(),
            "rebroadcast complete"
        );
        Ok(reran)
    }

    /// Serialize the feed. With reruns data, current metadata is written
    /// into the document first; without it, stripping happens on a clone and
    /// the in-memory document keeps everything.
    pub fn to_xml_string(&mut self, options: &WriteOptions) -> Result<String, ScheduleError> {
        if options.with_reruns_data {
            self.meta.serialize_into(&mut self.doc)?;
            Ok(self.doc.to_xml(options.pretty)?)
        } else {
            let pending: BTreeSet<usize> = self.meta.pending_indices().collect();
            let public = self.doc.public_clone(RERUNS_NS, &pending)?;
            Ok(public.to_xml(options.pretty)?)
        }
    }

    pub fn write_to(&mut self, path: &Path, options: &WriteOptions) -> Result<(), ScheduleError> {
        let xml = self.to_xml_string(options)?;
        std::fs::write(path, xml).map_err(FeedError::Io)?;
        Ok(())
    }

    /// Displayed titles for every entry, derived from base titles and the
    /// current affix configuration. Indexed by entry position.
    fn decorated_entry_titles(&self) -> Result<Vec<String>, ScheduleError> {
        let dialect = self.doc.dialect();
        let prefix = self.meta.entry_title_prefix();
        let suffix = self.meta.entry_title_suffix();
        for pattern in [prefix, suffix].into_iter().flatten() {
            validate_affix(pattern)?;
        }

        let mut titles = Vec::with_capacity(self.meta.entry_states().len());
        for state in self.meta.entry_states() {
            let date = state
                .original_pubdate
                .as_deref()
                .and_then(|raw| match dialect.parse_datetime(raw) {
                    Ok(parsed) => Some(parsed),
                    Err(_) => {
                        tracing::warn!(
                            position = state.position,
                            date = raw,
                            "unparseable original pubdate; affix dates left unexpanded"
                        );
                        None
                    }
                });
            let prefix = prefix.map(|p| expand_affix(p, date.as_ref()));
            let suffix = suffix.map(|s| expand_affix(s, date.as_ref()));
            titles.push(compose(prefix, &state.original_title, suffix));
        }
        Ok(titles)
    }

    fn apply_entry_titles(&mut self) -> Result<(), ScheduleError> {
        let titles = self.decorated_entry_titles()?;
        let ns = self.doc.dialect().content_namespace();
        for (index, title) in titles.iter().enumerate() {
            self.doc.entry_mut(index)?.set_child_text(ns, "title", title);
        }
        Ok(())
    }

    fn apply_feed_title(&mut self) -> Result<(), ScheduleError> {
        let title = compose(
            self.meta.title_prefix().map(str::to_string),
            self.meta.original_title(),
            self.meta.title_suffix().map(str::to_string),
        );
        let ns = self.doc.dialect().content_namespace();
        self.doc.channel_mut()?.set_child_text(ns, "title", &title);
        Ok(())
    }
}

fn compose(prefix: Option<String>, base: &str, suffix: Option<String>) -> String {
    let mut parts = Vec::with_capacity(3);
    if let Some(p) = prefix {
        parts.push(p);
    }
    parts.push(base.to_string());
    if let Some(s) = suffix {
        parts.push(s);
    }
    parts.join(" ")
}

/// Reject affix patterns containing date directives chrono cannot format.
/// `DelayedFormat` panics on such items, so they must never reach it.
fn validate_affix(pattern: &str) -> Result<(), ScheduleError> {
    if StrftimeItems::new(pattern).any(|item| matches!(item, Item::Error)) {
        return Err(ScheduleError::TitlePattern(pattern.to_string()));
    }
    Ok(())
}

/// Expand strftime directives against a date. Affixes without directives
/// (or entries without a usable original date) pass through verbatim.
/// Callers validate the pattern first.
fn expand_affix(pattern: &str, date: Option<&DateTime<FixedOffset>>) -> String {
    match date {
        Some(dt) if pattern.contains('%') => dt.format(pattern).to_string(),
        _ => pattern.to_string(),
    }
}

/// A fresh, document-unique identity for a rebroadcast entry: SHA-256 over
/// the prior identifier, the entry position, and the rebroadcast instant.
fn fresh_identifier(
    feed_type: FeedType,
    prior: &str,
    position: usize,
    when: &DateTime<Utc>,
) -> String {
    let input = format!("{}|{}|{}", prior, position, when.timestamp_micros());
    let digest = Sha256::digest(input.as_bytes());
    let hex = format!("{:x}", digest);
    match feed_type {
        FeedType::Rss => hex,
        // Atom ids must be IRIs; a URN scheme keeps the digest valid there.
        FeedType::Atom => format!("urn:sha256:{hex}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    use crate::schedule::metadata::{EntryStatus, OrderMode};

    const RSS_FIVE: &str = r#"<rss version="2.0">
  <channel>
    <title>History Blog</title>
    <link>https://example.com/</link>
    <item><title>Alpha</title><guid>https://example.com/1</guid><pubDate>Sun, 01 Jan 2023 00:00:00 +0000</pubDate></item>
    <item><title>Beta</title><guid>https://example.com/2</guid><pubDate>Mon, 02 Jan 2023 00:00:00 +0000</pubDate></item>
    <item><title>Gamma</title><guid>https://example.com/3</guid><pubDate>Tue, 03 Jan 2023 00:00:00 +0000</pubDate></item>
    <item><title>Delta</title><guid>https://example.com/4</guid><pubDate>Wed, 04 Jan 2023 00:00:00 +0000</pubDate></item>
    <item><title>Epsilon</title><guid>https://example.com/5</guid><pubDate>Thu, 05 Jan 2023 00:00:00 +0000</pubDate></item>
  </channel>
</rss>"#;

    fn plain_options() -> InitOptions {
        // No decorations, so title behavior is tested separately.
        InitOptions {
            title_prefix: None,
            title_suffix: None,
            entry_title_prefix: None,
            entry_title_suffix: None,
            ..InitOptions::default()
        }
    }

    fn seeded_rng() -> Box<dyn RngCore> {
        Box::new(StdRng::seed_from_u64(7))
    }

    fn instant() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    fn load(xml: &str, options: &InitOptions) -> Rebroadcaster {
        let doc = FeedDocument::parse(xml).unwrap();
        Rebroadcaster::with_rng(doc, options, seeded_rng()).unwrap()
    }

    #[test]
    fn test_chronological_rebroadcast_pops_oldest_first() {
        let mut feed = load(RSS_FIVE, &plain_options());
        let reran = feed.rebroadcast_at(2, instant()).unwrap();
        assert_eq!(reran, vec![0, 1]);
        assert_eq!(feed.num_remaining(), 3);

        // Both rebroadcast entries carry the new date and a fresh guid.
        let expected_date = instant().to_rfc2822();
        for index in [0usize, 1] {
            let entry = feed.document().entry(index).unwrap();
            assert_eq!(
                entry.child(None, "pubDate").unwrap().text().as_deref(),
                Some(expected_date.as_str())
            );
            let guid = entry.child(None, "guid").unwrap().text().unwrap();
            assert!(!guid.starts_with("https://example.com/"));
            assert_eq!(guid.len(), 64);
        }

        // Untouched entries keep their original identity and date.
        let third = feed.document().entry(2).unwrap();
        assert_eq!(
            third.child(None, "guid").unwrap().text().as_deref(),
            Some("https://example.com/3")
        );
    }

    #[test]
    fn test_generated_identifiers_are_unique() {
        let mut feed = load(RSS_FIVE, &plain_options());
        feed.rebroadcast_at(5, instant()).unwrap();
        let mut ids: Vec<String> = (0..5)
            .map(|i| {
                feed.document()
                    .entry(i)
                    .unwrap()
                    .child(None, "guid")
                    .unwrap()
                    .text()
                    .unwrap()
            })
            .collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 5);
    }

    #[test]
    fn test_insufficient_entries_leaves_state_untouched() {
        let mut feed = load(RSS_FIVE, &plain_options());
        feed.rebroadcast_at(2, instant()).unwrap();
        let before_meta = feed.meta().clone();
        let before_xml = feed.to_xml_string(&WriteOptions::default()).unwrap();

        let err = feed.rebroadcast_at(10, instant()).unwrap_err();
        assert!(matches!(
            err,
            ScheduleError::InsufficientEntries {
                requested: 10,
                remaining: 3
            }
        ));
        assert_eq!(feed.meta(), &before_meta);
        assert_eq!(
            feed.to_xml_string(&WriteOptions::default()).unwrap(),
            before_xml
        );
    }

    #[test]
    fn test_run_forever_refills_the_queue() {
        let options = InitOptions {
            run_forever: true,
            ..plain_options()
        };
        let mut feed = load(RSS_FIVE, &options);
        let reran = feed.rebroadcast_at(7, instant()).unwrap();
        assert_eq!(reran.len(), 7);
        // 5 from the first cycle, then a refill and 2 more from the second.
        assert_eq!(&reran[..5], &[0, 1, 2, 3, 4]);
        assert_eq!(feed.num_remaining(), 3);
    }

    #[test]
    fn test_empty_feed_cannot_rebroadcast() {
        let xml = r#"<rss version="2.0"><channel><title>t</title><link>l</link></channel></rss>"#;
        let options = InitOptions {
            run_forever: true,
            ..plain_options()
        };
        let mut feed = load(xml, &options);
        let err = feed.rebroadcast_at(1, instant()).unwrap_err();
        assert!(matches!(
            err,
            ScheduleError::InsufficientEntries { remaining: 0, .. }
        ));
    }

    #[test]
    fn test_feed_title_decoration_is_idempotent() {
        let mut feed = load(RSS_FIVE, &plain_options());
        feed.set_feed_title(Some("[Reruns:]"), None).unwrap();
        feed.set_feed_title(Some("[Reruns:]"), None).unwrap();
        let title = feed
            .document()
            .channel()
            .unwrap()
            .child(None, "title")
            .unwrap()
            .text()
            .unwrap();
        assert_eq!(title, "[Reruns:] History Blog");

        // Rebroadcasting re-applies the decoration without compounding it.
        feed.rebroadcast_at(1, instant()).unwrap();
        let title = feed
            .document()
            .channel()
            .unwrap()
            .child(None, "title")
            .unwrap()
            .text()
            .unwrap();
        assert_eq!(title, "[Reruns:] History Blog");
    }

    #[test]
    fn test_entry_affix_dates_use_original_pubdate() {
        let mut feed = load(RSS_FIVE, &plain_options());
        feed.set_entry_titles(Some("[From %b %d %Y:]"), None).unwrap();
        // Rebroadcast happens in 2024; the affix must show the 2023 date.
        feed.rebroadcast_at(1, instant()).unwrap();
        let title = feed
            .document()
            .entry(0)
            .unwrap()
            .child(None, "title")
            .unwrap()
            .text()
            .unwrap();
        assert_eq!(title, "[From Jan 01 2023:] Alpha");
    }

    #[test]
    fn test_invalid_affix_pattern_is_rejected_before_storing() {
        let mut feed = load(RSS_FIVE, &plain_options());
        let err = feed.set_entry_titles(Some("broken %Q directive"), None).unwrap_err();
        assert!(matches!(err, ScheduleError::TitlePattern(_)));
        assert_eq!(feed.meta().entry_title_prefix(), None);
    }

    #[test]
    fn test_public_output_contains_only_broadcast_entries() {
        let mut feed = load(RSS_FIVE, &plain_options());
        feed.rebroadcast_at(2, instant()).unwrap();

        let public = feed
            .to_xml_string(&WriteOptions {
                pretty: true,
                with_reruns_data: false,
            })
            .unwrap();
        assert!(!public.contains("reruns"));
        assert!(public.contains("Alpha"));
        assert!(public.contains("Beta"));
        assert!(!public.contains("Gamma"));
        assert!(!public.contains("Epsilon"));

        let reparsed = FeedDocument::parse(&public).unwrap();
        assert_eq!(reparsed.entry_count().unwrap(), 2);

        // The in-memory document still has all five entries.
        assert_eq!(feed.document().entry_count().unwrap(), 5);
        assert_eq!(feed.num_remaining(), 3);
    }

    #[test]
    fn test_rebroadcast_updates_build_date() {
        let mut feed = load(RSS_FIVE, &plain_options());
        feed.rebroadcast_at(1, instant()).unwrap();
        let channel = feed.document().channel().unwrap();
        let expected = instant().to_rfc2822();
        assert_eq!(
            channel
                .child(None, "lastBuildDate")
                .unwrap()
                .text()
                .as_deref(),
            Some(expected.as_str())
        );
    }

    #[test]
    fn test_atom_rebroadcast_stamps_atom_fields() {
        let atom = r#"<feed xmlns="http://www.w3.org/2005/Atom">
  <title>Atom Blog</title>
  <link rel="self" href="https://example.com/atom.xml"/>
  <entry>
    <title>First</title>
    <id>urn:original:1</id>
    <updated>2023-01-15T12:00:00Z</updated>
  </entry>
</feed>"#;
        let mut feed = load(atom, &plain_options());
        feed.rebroadcast_at(1, instant()).unwrap();

        let entry = feed.document().entry(0).unwrap();
        let ns = Some(crate::feed::ATOM_NS);
        let id = entry.child(ns, "id").unwrap().text().unwrap();
        assert!(id.starts_with("urn:sha256:"));
        assert_eq!(
            entry.child(ns, "published").unwrap().text().as_deref(),
            Some("2024-06-01T12:00:00Z")
        );
        assert_eq!(
            entry.child(ns, "updated").unwrap().text().as_deref(),
            Some("2024-06-01T12:00:00Z")
        );

        // Broadcast status recorded with the Atom-format timestamp.
        match &feed.meta().entry_states()[0].status {
            EntryStatus::Broadcast { rerun_at, .. } => {
                assert_eq!(rerun_at, "2024-06-01T12:00:00Z")
            }
            other => panic!("expected broadcast status, got {other:?}"),
        }
    }

    #[test]
    fn test_shuffled_feed_pops_persisted_permutation() {
        let options = InitOptions {
            order: OrderMode::Shuffled,
            ..plain_options()
        };
        let mut feed = load(RSS_FIVE, &options);
        let expected: Vec<usize> = feed.meta().pending_indices().collect();
        let reran = feed.rebroadcast_at(3, instant()).unwrap();
        assert_eq!(reran, expected[..3].to_vec());
    }
}
