//! Rebroadcast old RSS/Atom feed entries with fresh timestamps and
//! identifiers.
//!
//! The tool wraps an existing feed, picks entries off a persisted pending
//! queue, stamps them as newly published, and writes the modified document
//! back out. There is no database: the schedule (which entries are pending,
//! which already reran, how titles are decorated, whether emission is
//! chronological or shuffled) lives inside the feed itself, in a reserved
//! XML namespace that ordinary readers ignore and that can be stripped for
//! public output.
//!
//! # Modules
//!
//! - [`xml`] - minimal element tree and the typed accessor facade
//! - [`feed`] - RSS/Atom document wrapper and the format dialect trait
//! - [`schedule`] - persisted metadata and the rebroadcast engine
//! - [`config`] - optional TOML configuration for first initialization
//!
//! # Example
//!
//! ```no_run
//! use reruns::schedule::{InitOptions, Rebroadcaster, WriteOptions};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut feed = Rebroadcaster::from_path(
//!     std::path::Path::new("feed.xml"),
//!     &InitOptions::default(),
//! )?;
//! feed.rebroadcast(2)?;
//! feed.write_to(std::path::Path::new("feed.xml"), &WriteOptions::default())?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod feed;
pub mod schedule;
pub mod xml;

pub use feed::{FeedDocument, FeedError, FeedType};
pub use schedule::{InitOptions, OrderMode, Rebroadcaster, RerunsMeta, ScheduleError, WriteOptions};
