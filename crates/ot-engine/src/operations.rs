/// Collaborative operations
/// An operation is one client's attempted change to a document, tagged with the
/// revision it was produced against
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{ClientId, EngineError, Result, Revision, UserId};

/// Unique operation identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct OperationId(pub uuid::Uuid);

impl OperationId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for OperationId {
    fn default() -> Self {
        Self::new()
    }
}

/// Kind of document an engine instance manages under one id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentType {
    Text,
    Json,
    Array,
}

/// Operation submitted by a client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    /// Unique operation ID
    pub id: OperationId,

    /// User who created this operation
    pub user_id: UserId,

    /// Connection the operation came from
    pub client_id: ClientId,

    /// Revision the client had observed when it produced the operation.
    /// Replaced by the produced revision once committed.
    pub revision: Revision,

    /// Timestamp when operation was created (client time)
    pub timestamp: DateTime<Utc>,

    /// The actual operation
    pub kind: OperationKind,
}

impl Operation {
    pub fn new(user_id: impl Into<UserId>, kind: OperationKind) -> Self {
        let user_id = user_id.into();
        Self {
            id: OperationId::new(),
            client_id: ClientId::new(user_id.as_str()),
            user_id,
            revision: 0,
            timestamp: Utc::now(),
            kind,
        }
    }

    pub fn with_revision(mut self, revision: Revision) -> Self {
        self.revision = revision;
        self
    }

    pub fn with_client(mut self, client_id: impl Into<ClientId>) -> Self {
        self.client_id = client_id.into();
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Same origin metadata, different payload
    pub(crate) fn with_kind(&self, kind: OperationKind) -> Self {
        Self {
            kind,
            ..self.clone()
        }
    }

    pub fn retain(user_id: impl Into<UserId>) -> Self {
        Self::new(user_id, OperationKind::Retain)
    }

    pub fn text_insert(
        user_id: impl Into<UserId>,
        position: usize,
        content: impl Into<String>,
    ) -> Self {
        Self::new(
            user_id,
            OperationKind::Insert {
                position,
                content: content.into(),
            },
        )
    }

    pub fn text_delete(user_id: impl Into<UserId>, position: usize, length: usize) -> Self {
        Self::new(user_id, OperationKind::Delete { position, length })
    }

    pub fn json_set<P, S>(user_id: impl Into<UserId>, path: P, value: Value) -> Self
    where
        P: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(
            user_id,
            OperationKind::Set {
                path: path.into_iter().map(Into::into).collect(),
                value,
                old_value: None,
            },
        )
    }

    pub fn json_unset<P, S>(user_id: impl Into<UserId>, path: P) -> Self
    where
        P: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(
            user_id,
            OperationKind::Unset {
                path: path.into_iter().map(Into::into).collect(),
                old_value: None,
            },
        )
    }

    pub fn array_insert(user_id: impl Into<UserId>, index: usize, values: Vec<Value>) -> Self {
        Self::new(user_id, OperationKind::ArrayInsert { index, values })
    }

    pub fn array_delete(user_id: impl Into<UserId>, index: usize, count: usize) -> Self {
        Self::new(user_id, OperationKind::ArrayDelete { index, count })
    }

    pub fn array_move(user_id: impl Into<UserId>, from: usize, to: usize) -> Self {
        Self::new(user_id, OperationKind::ArrayMove { from, to })
    }
}

/// Types of operations that can be performed on a document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OperationKind {
    /// No-op; also the result of an operation that lost a conflict
    Retain,

    // Text operations (positions count chars)
    Insert {
        position: usize,
        content: String,
    },
    Delete {
        position: usize,
        length: usize,
    },

    // JSON object operations
    Set {
        path: Vec<String>,
        value: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        old_value: Option<Value>,
    },
    Unset {
        path: Vec<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        old_value: Option<Value>,
    },

    // Array operations
    ArrayInsert {
        index: usize,
        values: Vec<Value>,
    },
    ArrayDelete {
        index: usize,
        count: usize,
    },
    ArrayMove {
        from: usize,
        to: usize,
    },

    /// Parts applied in order. Produced when transformation splits a range.
    Compound {
        parts: Vec<OperationKind>,
    },
}

impl OperationKind {
    /// Short name matching the serialized tag
    pub fn name(&self) -> &'static str {
        match self {
            OperationKind::Retain => "retain",
            OperationKind::Insert { .. } => "insert",
            OperationKind::Delete { .. } => "delete",
            OperationKind::Set { .. } => "set",
            OperationKind::Unset { .. } => "unset",
            OperationKind::ArrayInsert { .. } => "array_insert",
            OperationKind::ArrayDelete { .. } => "array_delete",
            OperationKind::ArrayMove { .. } => "array_move",
            OperationKind::Compound { .. } => "compound",
        }
    }

    /// Document type this kind belongs to; `None` for kinds valid everywhere
    pub fn family(&self) -> Option<DocumentType> {
        match self {
            OperationKind::Retain | OperationKind::Compound { .. } => None,
            OperationKind::Insert { .. } | OperationKind::Delete { .. } => {
                Some(DocumentType::Text)
            }
            OperationKind::Set { .. } | OperationKind::Unset { .. } => Some(DocumentType::Json),
            OperationKind::ArrayInsert { .. }
            | OperationKind::ArrayDelete { .. }
            | OperationKind::ArrayMove { .. } => Some(DocumentType::Array),
        }
    }

    /// Reject kinds that cannot apply to a document of `doc_type`
    pub fn validate_family(&self, doc_type: DocumentType) -> Result<()> {
        if let OperationKind::Compound { parts } = self {
            return parts.iter().try_for_each(|p| p.validate_family(doc_type));
        }

        match self.family() {
            Some(family) if family != doc_type => Err(EngineError::InvalidOperation(format!(
                "{} operation cannot apply to a {:?} document",
                self.name(),
                doc_type
            ))),
            _ => Ok(()),
        }
    }

    /// Whether applying this kind can never change content
    pub fn is_noop(&self) -> bool {
        match self {
            OperationKind::Retain => true,
            OperationKind::Delete { length: 0, .. } => true,
            OperationKind::ArrayDelete { count: 0, .. } => true,
            OperationKind::Delete { .. } | OperationKind::ArrayDelete { .. } => false,
            OperationKind::Insert { content, .. } => content.is_empty(),
            OperationKind::ArrayInsert { values, .. } => values.is_empty(),
            OperationKind::ArrayMove { from, to } => from == to,
            OperationKind::Compound { parts } => parts.iter().all(OperationKind::is_noop),
            OperationKind::Set { .. } | OperationKind::Unset { .. } => false,
        }
    }
}
