/// Operational Transform engine for collaborative documents
/// Sequences, transforms and applies concurrent edits to text, JSON and array documents
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

mod operations;
pub use operations::*;

mod content;
pub use content::*;

mod conflict;
pub use conflict::*;

mod transform;
pub use transform::*;

mod history;
pub use history::*;

mod presence;
pub use presence::*;

mod document;
pub use document::*;

mod events;
pub use events::*;

mod config;
pub use config::*;

mod store;
pub use store::*;

mod engine;
pub use engine::*;

mod maintenance;
pub use maintenance::*;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("document not found: {0}")]
    NotFound(DocumentId),

    #[error("document already exists: {0}")]
    AlreadyExists(DocumentId),

    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    #[error("revision {requested} is older than the retained history (oldest {oldest})")]
    StaleRevision { requested: Revision, oldest: Revision },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("internal invariant violated: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, EngineError>;

/// Authoritative document revision. Revision 0 is the initial content.
pub type Revision = u64;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }
    };
}

string_id!(
    /// Collaborative document identifier
    DocumentId
);

string_id!(
    /// User identifier (origin of an operation, member of a document's presence set)
    UserId
);

string_id!(
    /// Client (connection/tab) identifier; used as the primary tie-break key
    ClientId
);
