use thiserror::Error;

use crate::models::ListKind;

/// Errors from engine operations.
///
/// Everything the control plane surfaces to callers is one of these; the
/// HTTP layer maps them onto status codes.
#[derive(Debug, Error)]
pub enum FilterError {
    #[error("invalid list type: {0}")]
    BadKind(String),

    #[error("invalid domain entry '{entry}': {reason}")]
    BadEntry { entry: String, reason: String },

    #[error("invalid JSON: {0}")]
    BadJson(#[from] serde_json::Error),

    #[error("{resource} not found: {name}")]
    NotFound { resource: &'static str, name: String },

    #[error("{resource} already exists: {name}")]
    AlreadyExists { resource: &'static str, name: String },

    #[error("referenced {kind} not found: {name}")]
    ReferencedListMissing { kind: ListKind, name: String },

    #[error("request timeout")]
    Timeout,

    #[error("internal error: {0}")]
    Internal(String),
}

impl FilterError {
    pub fn bad_entry(entry: &str, reason: impl Into<String>) -> Self {
        FilterError::BadEntry {
            entry: entry.to_string(),
            reason: reason.into(),
        }
    }

    pub fn not_found(resource: &'static str, name: &str) -> Self {
        FilterError::NotFound {
            resource,
            name: name.to_string(),
        }
    }

    pub fn already_exists(resource: &'static str, name: &str) -> Self {
        FilterError::AlreadyExists {
            resource,
            name: name.to_string(),
        }
    }
}

impl From<std::io::Error> for FilterError {
    fn from(e: std::io::Error) -> Self {
        FilterError::Internal(e.to_string())
    }
}
