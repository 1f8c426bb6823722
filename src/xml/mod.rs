//! XML collaborator: a minimal element tree plus the typed accessor facade
//! the feed layers are written against.
//!
//! The module is deliberately small. It supports exactly what a feed
//! rewriter needs from an XML object model (namespace-qualified element
//! creation and lookup, ordered child insertion, and serialization with
//! optional pretty-printing) and nothing else.

mod facade;
mod tree;

pub use tree::{parse, render, Element, Node, XmlError};
