//! Errors raised while resolving queries.
//!
//! "Not found" and "forbidden" are ordinary query outcomes and never appear
//! here; see [`crate::query::QueryOutcome`].

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum QueryError {
    /// The resource id contains characters that are not allowed.
    #[error("The resource ID \"{0}\" is invalid. It contains characters that are not allowed within resource identifiers.")]
    InvalidIdentifier(String),

    /// A stored `thing.json` or `type.json` could not be parsed.
    #[error("Syntax error detected in \"{}\": {source}", path.display())]
    MalformedData {
        path: PathBuf,
        #[source]
        source: Arc<serde_json::Error>,
    },

    /// A stat or read failed for a reason other than the file being missing.
    #[error("Unable to read \"{}\": {source}", path.display())]
    Storage {
        path: PathBuf,
        #[source]
        source: Arc<io::Error>,
    },

    /// The requesting user has no record in any database of the chain.
    #[error("Could not find the user \"{0}\"")]
    UnknownUser(String),

    #[error("{0}")]
    Configuration(String),
}

impl QueryError {
    pub fn malformed(path: impl Into<PathBuf>, source: serde_json::Error) -> Self {
        Self::MalformedData {
            path: path.into(),
            source: Arc::new(source),
        }
    }

    pub fn storage(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Storage {
            path: path.into(),
            source: Arc::new(source),
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }
}

pub type Result<T> = std::result::Result<T, QueryError>;
