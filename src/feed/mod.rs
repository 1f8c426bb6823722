//! Feed abstraction over RSS 2.0 and Atom 1.0 documents.
//!
//! Two pieces live here:
//!
//! - [`Dialect`] - everything format-specific (identity elements, date
//!   elements and grammars, channel location) behind one trait, selected
//!   once at load time
//! - [`FeedDocument`] - the loaded document: entry access by stable index,
//!   source-URL resolution, serialization, and the stripped public copy
//!
//! Scheduling state is a separate concern; see [`crate::schedule`].

mod dialect;
mod document;

pub use dialect::{dialect_for, AtomDialect, Dialect, FeedType, RssDialect, ATOM_NS};
pub use document::FeedDocument;

use thiserror::Error;

use crate::xml::XmlError;

/// Errors loading or querying a feed document.
#[derive(Debug, Error)]
pub enum FeedError {
    /// The root element matches neither the RSS nor the Atom shape. Fatal;
    /// there is nothing sensible to do with a document we cannot classify.
    #[error("unrecognized feed format: {0}")]
    UnrecognizedFormat(String),

    /// An entry index outside the document's entry range.
    #[error("entry index {index} out of range (feed has {count} entries)")]
    EntryOutOfRange { index: usize, count: usize },

    /// A date string that matches neither RFC 2822 nor RFC 3339.
    #[error("could not parse date {value:?}: {source}")]
    Date {
        value: String,
        source: chrono::ParseError,
    },

    /// A URL that could not be parsed or resolved against its base.
    #[error("could not resolve URL {value:?}: {source}")]
    Url {
        value: String,
        source: url::ParseError,
    },

    #[error(transparent)]
    Xml(#[from] XmlError),

    #[error("failed to read feed: {0}")]
    Io(#[from] std::io::Error),
}
