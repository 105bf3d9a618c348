//! Warden filtering core — per-client DNS policy evaluation.
//!
//! The engine keeps one reverse-label trie per named list, a registry of
//! client policies, and the glue that keeps both consistent with their
//! on-disk forms (one text file per list, one JSON document for clients).
//! DNS workers read the state through a shared lock; the REST control
//! plane is the sole writer.

pub mod engine;
pub mod entry;
pub mod error;
pub mod models;
pub mod trie;

pub use engine::FilterEngine;
pub use entry::Entry;
pub use error::FilterError;
pub use models::{ClientPolicy, Decision, ListContent, ListKind, ListMetadata};
pub use trie::DomainTrie;

pub type Result<T> = std::result::Result<T, FilterError>;
