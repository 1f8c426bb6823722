//! Scheduling state persisted inside the feed document.
//!
//! Everything this tool needs to remember between invocations lives in one
//! reserved namespace on the document itself: a `reruns:channel_data`
//! element on the channel (order mode, run-forever flag, the undecorated
//! feed title, affix configuration, and the pending queue) and one
//! `reruns:entry_data` element per entry (original position, original
//! pubdate and title, pending/broadcast status, and, once broadcast, the
//! assigned timestamp and generated identifier). The element names and the
//! namespace URI are a stable on-disk schema: feeds written by earlier runs
//! must reload into exactly the state they were written from.

use std::collections::VecDeque;

use rand::seq::SliceRandom;
use rand::RngCore;
use serde::Deserialize;

use super::ScheduleError;
use crate::feed::FeedDocument;
use crate::xml::Element;

/// The reserved namespace. Feeds written by any version of this tool carry
/// their state under this URI.
pub const RERUNS_NS: &str = "https://github.com/hannahlog/rss-reruns";
pub const RERUNS_PREFIX: &str = "reruns";

const CHANNEL_DATA: &str = "channel_data";
const ENTRY_DATA: &str = "entry_data";

/// Order in which pending entries are emitted.
///
/// Fixed at first initialization and immutable afterwards: a shuffled feed's
/// permutation is computed exactly once and persisted, never re-randomized
/// on reload, so "shuffled" stays meaningful across runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderMode {
    Chronological,
    Shuffled,
}

impl OrderMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderMode::Chronological => "chronological",
            OrderMode::Shuffled => "shuffled",
        }
    }

    fn parse(text: &str) -> Option<OrderMode> {
        match text.to_ascii_lowercase().as_str() {
            "chronological" => Some(OrderMode::Chronological),
            "shuffled" => Some(OrderMode::Shuffled),
            _ => None,
        }
    }
}

impl std::fmt::Display for OrderMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryStatus {
    Pending,
    Broadcast {
        /// The assigned rebroadcast timestamp, in the document's own date
        /// grammar (RFC 2822 for RSS, RFC 3339 for Atom).
        rerun_at: String,
        /// The generated identifier written into the entry's guid/id field.
        assigned_id: String,
    },
}

/// Per-entry persisted state, indexed by original document position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryState {
    pub position: usize,
    /// Publication date as found before any rebroadcast overwrote it.
    /// Entry-title affixes expand their date directives against this.
    pub original_pubdate: Option<String>,
    /// Undecorated title, captured at first initialization.
    pub original_title: String,
    pub status: EntryStatus,
}

/// Settings applied the first time a feed is wrapped. Ignored on reload;
/// persisted state always wins over fresh options.
#[derive(Debug, Clone)]
pub struct InitOptions {
    pub order: OrderMode,
    pub run_forever: bool,
    pub title_prefix: Option<String>,
    pub title_suffix: Option<String>,
    pub entry_title_prefix: Option<String>,
    pub entry_title_suffix: Option<String>,
}

impl Default for InitOptions {
    fn default() -> Self {
        InitOptions {
            order: OrderMode::Chronological,
            run_forever: false,
            title_prefix: Some("[Reruns:]".to_string()),
            title_suffix: None,
            entry_title_prefix: Some("[Rerun:]".to_string()),
            entry_title_suffix: Some("(Originally published: %b %d %Y)".to_string()),
        }
    }
}

/// The complete persisted scheduling state for one feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RerunsMeta {
    order: OrderMode,
    run_forever: bool,
    original_title: String,
    title_prefix: Option<String>,
    title_suffix: Option<String>,
    entry_title_prefix: Option<String>,
    entry_title_suffix: Option<String>,
    pending: VecDeque<usize>,
    entries: Vec<EntryState>,
}

impl RerunsMeta {
    /// Read existing state from the reserved namespace, or initialize fresh
    /// state if the feed has never been wrapped before.
    ///
    /// The RNG is only consulted for a fresh shuffled initialization; the
    /// resulting permutation is persisted and never recomputed.
    pub fn load_or_init(
        doc: &FeedDocument,
        options: &InitOptions,
        rng: &mut dyn RngCore,
    ) -> Result<Self, ScheduleError> {
        let channel = doc.channel()?;
        if channel.child_opt(Some(RERUNS_NS), CHANNEL_DATA).is_some() {
            let meta = Self::parse_existing(doc)?;
            tracing::debug!(
                order = %meta.order,
                remaining = meta.num_remaining(),
                "loaded existing reruns metadata"
            );
            Ok(meta)
        } else {
            let meta = Self::initialize(doc, options, rng)?;
            tracing::debug!(
                order = %meta.order,
                entries = meta.entries.len(),
                "initialized fresh reruns metadata"
            );
            Ok(meta)
        }
    }

    fn initialize(
        doc: &FeedDocument,
        options: &InitOptions,
        rng: &mut dyn RngCore,
    ) -> Result<Self, ScheduleError> {
        let dialect = doc.dialect();
        let content_ns = dialect.content_namespace();
        let channel = doc.channel()?;
        let original_title = channel
            .child_opt(content_ns, "title")
            .and_then(|el| el.text())
            .unwrap_or_default();

        let mut entries = Vec::new();
        for (position, entry) in doc.entries()?.into_iter().enumerate() {
            entries.push(EntryState {
                position,
                original_pubdate: dialect.pubdate(entry),
                original_title: entry
                    .child_opt(content_ns, "title")
                    .and_then(|el| el.text())
                    .unwrap_or_default(),
                status: EntryStatus::Pending,
            });
        }

        let mut queue: Vec<usize> = (0..entries.len()).collect();
        if options.order == OrderMode::Shuffled {
            queue.shuffle(rng);
        }

        Ok(RerunsMeta {
            order: options.order,
            run_forever: options.run_forever,
            original_title,
            title_prefix: normalize_owned(options.title_prefix.clone()),
            title_suffix: normalize_owned(options.title_suffix.clone()),
            entry_title_prefix: normalize_owned(options.entry_title_prefix.clone()),
            entry_title_suffix: normalize_owned(options.entry_title_suffix.clone()),
            pending: queue.into_iter().collect(),
            entries,
        })
    }

    fn parse_existing(doc: &FeedDocument) -> Result<Self, ScheduleError> {
        let channel = doc.channel()?;
        let data = channel
            .child_opt(Some(RERUNS_NS), CHANNEL_DATA)
            .ok_or_else(|| corrupt("missing reruns:channel_data"))?;

        let order_text = required_text(data, "order")?;
        let order = OrderMode::parse(&order_text)
            .ok_or_else(|| corrupt(format!("unknown order mode {order_text:?}")))?;

        let run_forever = match required_text(data, "run_forever")?.to_ascii_lowercase().as_str() {
            "true" => true,
            "false" => false,
            other => return Err(corrupt(format!("invalid run_forever value {other:?}"))),
        };

        let original_title = required_text(data, "original_title")?;
        let title_prefix = optional_text(data, "title_prefix");
        let title_suffix = optional_text(data, "title_suffix");
        let entry_title_prefix = optional_text(data, "entry_title_prefix");
        let entry_title_suffix = optional_text(data, "entry_title_suffix");

        let mut pending = VecDeque::new();
        for token in required_text(data, "pending_queue")?.split_whitespace() {
            let index: usize = token
                .parse()
                .map_err(|_| corrupt(format!("invalid pending_queue index {token:?}")))?;
            pending.push_back(index);
        }

        let mut entries = Vec::new();
        for (position, entry) in doc.entries()?.into_iter().enumerate() {
            let data = entry
                .child_opt(Some(RERUNS_NS), ENTRY_DATA)
                .ok_or_else(|| corrupt(format!("entry {position} has no reruns:entry_data")))?;

            let declared_text = required_text(data, "position")?;
            let declared: usize = declared_text
                .trim()
                .parse()
                .map_err(|_| corrupt(format!("invalid entry position {declared_text:?}")))?;
            if declared != position {
                return Err(corrupt(format!(
                    "entry at document position {position} declares position {declared}"
                )));
            }

            let status_text = required_text(data, "status")?;
            let status = match status_text.as_str() {
                "pending" => EntryStatus::Pending,
                "broadcast" => EntryStatus::Broadcast {
                    rerun_at: required_text(data, "rerun_at")?,
                    assigned_id: required_text(data, "assigned_id")?,
                },
                other => {
                    return Err(corrupt(format!(
                        "entry {position} has unknown status {other:?}"
                    )))
                }
            };

            entries.push(EntryState {
                position,
                original_pubdate: optional_text(data, "original_pubdate"),
                original_title: required_text(data, "original_title")?,
                status,
            });
        }

        let meta = RerunsMeta {
            order,
            run_forever,
            original_title,
            title_prefix,
            title_suffix,
            entry_title_prefix,
            entry_title_suffix,
            pending,
            entries,
        };
        meta.validate()?;
        Ok(meta)
    }

    /// The partition invariant: pending-queue indices and broadcast entries
    /// are disjoint and together cover every entry exactly once. A violation
    /// is fatal; "repairing" risks double-broadcasting or dropping entries.
    fn validate(&self) -> Result<(), ScheduleError> {
        let count = self.entries.len();
        let mut queued = vec![false; count];
        for &index in &self.pending {
            if index >= count {
                return Err(corrupt(format!(
                    "pending_queue index {index} out of range (feed has {count} entries)"
                )));
            }
            if queued[index] {
                return Err(corrupt(format!("duplicate index {index} in pending_queue")));
            }
            queued[index] = true;
            if !matches!(self.entries[index].status, EntryStatus::Pending) {
                return Err(corrupt(format!(
                    "entry {index} is queued but not marked pending"
                )));
            }
        }
        for (index, state) in self.entries.iter().enumerate() {
            if matches!(state.status, EntryStatus::Pending) && !queued[index] {
                return Err(corrupt(format!(
                    "entry {index} is marked pending but missing from pending_queue"
                )));
            }
        }
        Ok(())
    }

    /// Write current state back into the reserved namespace, replacing any
    /// prior content. Called before every write that keeps reruns data.
    pub fn serialize_into(&self, doc: &mut FeedDocument) -> Result<(), ScheduleError> {
        doc.root_mut()
            .set_attribute(&format!("xmlns:{RERUNS_PREFIX}"), RERUNS_NS);

        let channel = doc.channel_mut()?;
        channel.remove_children(Some(RERUNS_NS), CHANNEL_DATA);
        let data = channel.create_child(Some(RERUNS_PREFIX), Some(RERUNS_NS), CHANNEL_DATA);
        put(data, "order", self.order.as_str());
        put(data, "run_forever", if self.run_forever { "true" } else { "false" });
        put(data, "original_title", &self.original_title);
        if let Some(value) = &self.title_prefix {
            put(data, "title_prefix", value);
        }
        if let Some(value) = &self.title_suffix {
            put(data, "title_suffix", value);
        }
        if let Some(value) = &self.entry_title_prefix {
            put(data, "entry_title_prefix", value);
        }
        if let Some(value) = &self.entry_title_suffix {
            put(data, "entry_title_suffix", value);
        }
        let queue: Vec<String> = self.pending.iter().map(|i| i.to_string()).collect();
        put(data, "pending_queue", &queue.join(" "));

        for (position, state) in self.entries.iter().enumerate() {
            let entry = doc.entry_mut(position)?;
            entry.remove_children(Some(RERUNS_NS), ENTRY_DATA);
            let data = entry.create_child(Some(RERUNS_PREFIX), Some(RERUNS_NS), ENTRY_DATA);
            put(data, "position", &position.to_string());
            if let Some(date) = &state.original_pubdate {
                put(data, "original_pubdate", date);
            }
            put(data, "original_title", &state.original_title);
            match &state.status {
                EntryStatus::Pending => put(data, "status", "pending"),
                EntryStatus::Broadcast {
                    rerun_at,
                    assigned_id,
                } => {
                    put(data, "status", "broadcast");
                    put(data, "rerun_at", rerun_at);
                    put(data, "assigned_id", assigned_id);
                }
            }
        }
        Ok(())
    }

    pub fn num_remaining(&self) -> usize {
        self.pending.len()
    }

    pub fn order(&self) -> OrderMode {
        self.order
    }

    pub fn run_forever(&self) -> bool {
        self.run_forever
    }

    pub fn original_title(&self) -> &str {
        &self.original_title
    }

    pub fn title_prefix(&self) -> Option<&str> {
        self.title_prefix.as_deref()
    }

    pub fn title_suffix(&self) -> Option<&str> {
        self.title_suffix.as_deref()
    }

    pub fn entry_title_prefix(&self) -> Option<&str> {
        self.entry_title_prefix.as_deref()
    }

    pub fn entry_title_suffix(&self) -> Option<&str> {
        self.entry_title_suffix.as_deref()
    }

    pub fn entry_states(&self) -> &[EntryState] {
        &self.entries
    }

    pub fn entry_state(&self, index: usize) -> Option<&EntryState> {
        self.entries.get(index)
    }

    pub fn pending_indices(&self) -> impl Iterator<Item = usize> + '_ {
        self.pending.iter().copied()
    }

    /// Update feed-title affixes. `None` and the empty string both mean
    /// "leave this field unchanged".
    pub fn set_feed_affixes(&mut self, prefix: Option<&str>, suffix: Option<&str>) {
        if let Some(value) = non_empty(prefix) {
            self.title_prefix = Some(value.to_string());
        }
        if let Some(value) = non_empty(suffix) {
            self.title_suffix = Some(value.to_string());
        }
    }

    /// Update entry-title affixes, same normalization as
    /// [`RerunsMeta::set_feed_affixes`].
    pub fn set_entry_affixes(&mut self, prefix: Option<&str>, suffix: Option<&str>) {
        if let Some(value) = non_empty(prefix) {
            self.entry_title_prefix = Some(value.to_string());
        }
        if let Some(value) = non_empty(suffix) {
            self.entry_title_suffix = Some(value.to_string());
        }
    }

    pub(crate) fn pop_pending(&mut self) -> Option<usize> {
        self.pending.pop_front()
    }

    pub(crate) fn mark_broadcast(
        &mut self,
        index: usize,
        rerun_at: String,
        assigned_id: String,
    ) -> Result<(), ScheduleError> {
        match self.entries.get_mut(index) {
            Some(state) => {
                state.status = EntryStatus::Broadcast {
                    rerun_at,
                    assigned_id,
                };
                Ok(())
            }
            None => Err(corrupt(format!("broadcast index {index} out of range"))),
        }
    }

    /// Start a new cycle: every entry becomes pending again, in chronological
    /// order or under a fresh persisted permutation. Only meaningful when
    /// `run_forever` is set.
    pub(crate) fn refill(&mut self, rng: &mut dyn RngCore) {
        let mut queue: Vec<usize> = (0..self.entries.len()).collect();
        if self.order == OrderMode::Shuffled {
            queue.shuffle(rng);
        }
        for state in &mut self.entries {
            state.status = EntryStatus::Pending;
        }
        self.pending = queue.into_iter().collect();
    }
}

fn corrupt(message: impl Into<String>) -> ScheduleError {
    ScheduleError::CorruptMetadata(message.into())
}

fn put(parent: &mut Element, local: &str, text: &str) {
    parent
        .create_child(Some(RERUNS_PREFIX), Some(RERUNS_NS), local)
        .set_text(text);
}

/// Text of a required reruns element; the element may legitimately be empty.
fn required_text(data: &Element, local: &str) -> Result<String, ScheduleError> {
    data.child_opt(Some(RERUNS_NS), local)
        .map(|el| el.text().unwrap_or_default())
        .ok_or_else(|| corrupt(format!("missing reruns:{local}")))
}

/// Text of an optional reruns element; absent and empty both mean unset.
fn optional_text(data: &Element, local: &str) -> Option<String> {
    data.child_opt(Some(RERUNS_NS), local)
        .and_then(|el| el.text())
        .filter(|text| !text.is_empty())
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|s| !s.is_empty())
}

fn normalize_owned(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.is_empty())
}
