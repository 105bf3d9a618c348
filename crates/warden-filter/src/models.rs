//! Wire types shared by the engine, the control plane and the DNS shim.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::FilterError;

/// The two list flavors. The same two values name a client's mode.
///
/// Wire names are the URL-plural strings (`blocklist` / `whitelist`);
/// internally a list either blocks or allows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ListKind {
    #[serde(rename = "blocklist")]
    Block,
    #[serde(rename = "whitelist")]
    Allow,
}

impl ListKind {
    /// The wire name, as it appears in URLs and JSON bodies.
    pub fn as_str(&self) -> &'static str {
        match self {
            ListKind::Block => "blocklist",
            ListKind::Allow => "whitelist",
        }
    }
}

impl fmt::Display for ListKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ListKind {
    type Err = FilterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "blocklist" => Ok(ListKind::Block),
            "whitelist" => Ok(ListKind::Allow),
            other => Err(FilterError::BadKind(other.to_string())),
        }
    }
}

/// The outcome of evaluating a query against a client's policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny,
}

/// A list as returned by the API: name, kind and formatted entries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListContent {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ListKind,
    pub domains: Vec<String>,
}

/// Per-list metadata for the list index endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListMetadata {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ListKind,
    /// Number of endpoint nodes in the trie, not file lines.
    pub count: usize,
    #[serde(rename = "lastModified")]
    pub last_modified: DateTime<Utc>,
}

/// A client's filtering policy.
///
/// On disk the registry is a JSON object keyed by IP, so the `ip` field
/// is empty in the stored record and only filled in on API output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientPolicy {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub ip: String,
    #[serde(default)]
    pub blocklists: Vec<String>,
    #[serde(default)]
    pub whitelists: Vec<String>,
    pub mode: ListKind,
}

impl ClientPolicy {
    /// The ref-set matching the given kind.
    pub fn refs(&self, kind: ListKind) -> &[String] {
        match kind {
            ListKind::Block => &self.blocklists,
            ListKind::Allow => &self.whitelists,
        }
    }
}
