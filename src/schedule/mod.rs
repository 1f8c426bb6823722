//! Rebroadcast scheduling: persisted metadata plus the engine that drives it.
//!
//! - [`RerunsMeta`] - the state embedded in the feed's reserved namespace:
//!   order mode, title decoration, and the pending/broadcast partition
//! - [`Rebroadcaster`] - the engine that pops pending entries, stamps
//!   fresh dates and identifiers, and writes the result back out

pub mod metadata;
mod scheduler;

pub use metadata::{
    EntryState, EntryStatus, InitOptions, OrderMode, RerunsMeta, RERUNS_NS, RERUNS_PREFIX,
};
pub use scheduler::{Rebroadcaster, WriteOptions};

use thiserror::Error;

use crate::feed::FeedError;
use crate::xml::XmlError;

/// Errors from scheduling and persistence.
#[derive(Debug, Error)]
pub enum ScheduleError {
    /// The reserved namespace is present but violates the partition or
    /// uniqueness invariants. Fatal: repairing would risk double-broadcasting
    /// entries or silently losing them.
    #[error("corrupt reruns metadata: {0}")]
    CorruptMetadata(String),

    /// More rebroadcasts requested than remain pending. Never silently
    /// clamped; rebroadcasting "all remaining" instead is the caller's call.
    #[error("requested {requested} entries to rebroadcast but only {remaining} remain pending")]
    InsufficientEntries { requested: usize, remaining: usize },

    /// A title affix contains a date directive chrono cannot format.
    #[error("invalid date directive in title affix {0:?}")]
    TitlePattern(String),

    #[error(transparent)]
    Feed(#[from] FeedError),

    #[error(transparent)]
    Xml(#[from] XmlError),
}
