/// Document state and the per-document sequencing unit
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error, warn};

use crate::{
    transform_through, Content, DocumentId, DocumentType, EngineError, Operation, OperationHistory,
    OperationKind, PresenceTracker, Result, Revision, UserId, UserState,
};

/// Point-in-time view of a document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentSnapshot {
    pub id: DocumentId,
    pub doc_type: DocumentType,
    pub content: Content,
    pub revision: Revision,
    pub created_at: DateTime<Utc>,
    pub last_modified: DateTime<Utc>,
    pub active_users: Vec<UserId>,
}

/// Result of submitting an operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppliedOperation {
    /// The operation as committed (transformed, with its assigned revision)
    pub operation: Operation,
    pub revision: Revision,

    /// The operation id had already been committed; nothing changed
    pub duplicate: bool,
}

/// What a user needs to catch up with a document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentSync {
    pub document: DocumentSnapshot,

    /// Revision the user had observed before this sync
    pub user_revision: Revision,

    pub pending_operations: Vec<Operation>,
}

/// Per-document line in engine statistics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentSummary {
    pub id: DocumentId,
    pub doc_type: DocumentType,
    pub revision: Revision,
    pub active_users: usize,
    pub history_len: usize,
    pub last_modified: DateTime<Utc>,
}

/// Outcome of a compaction attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compaction {
    /// History below the ceiling
    Untouched,
    Compacted { dropped: usize },

    /// An attached user still needs revisions the compaction would drop
    Skipped {
        lagging_revision: Revision,
        new_base: Revision,
    },
}

/// A live document: content, history and attached users
///
/// Every mutation goes through `&mut self`, so wrapping a document in a mutex
/// makes it the sequencing point for that document.
#[derive(Debug)]
pub struct Document {
    id: DocumentId,
    doc_type: DocumentType,
    content: Content,
    created_at: DateTime<Utc>,
    last_modified: DateTime<Utc>,
    history: OperationHistory,
    presence: PresenceTracker,
    evicted: bool,
}

impl Document {
    pub fn new(id: DocumentId, content: Content) -> Self {
        let now = Utc::now();
        Self {
            id,
            doc_type: content.doc_type(),
            history: OperationHistory::new(content.clone()),
            content,
            created_at: now,
            last_modified: now,
            presence: PresenceTracker::new(),
            evicted: false,
        }
    }

    pub fn id(&self) -> &DocumentId {
        &self.id
    }

    pub fn doc_type(&self) -> DocumentType {
        self.doc_type
    }

    pub fn content(&self) -> &Content {
        &self.content
    }

    pub fn revision(&self) -> Revision {
        self.history.head()
    }

    pub fn last_modified(&self) -> DateTime<Utc> {
        self.last_modified
    }

    pub fn history(&self) -> &OperationHistory {
        &self.history
    }

    pub fn presence(&self) -> &PresenceTracker {
        &self.presence
    }

    pub fn is_evicted(&self) -> bool {
        self.evicted
    }

    pub(crate) fn mark_evicted(&mut self) {
        self.evicted = true;
    }

    pub fn snapshot(&self) -> DocumentSnapshot {
        DocumentSnapshot {
            id: self.id.clone(),
            doc_type: self.doc_type,
            content: self.content.clone(),
            revision: self.revision(),
            created_at: self.created_at,
            last_modified: self.last_modified,
            active_users: self.presence.active_users(),
        }
    }

    pub fn summary(&self) -> DocumentSummary {
        DocumentSummary {
            id: self.id.clone(),
            doc_type: self.doc_type,
            revision: self.revision(),
            active_users: self.presence.len(),
            history_len: self.history.len(),
            last_modified: self.last_modified,
        }
    }

    /// Transform `op` against everything committed since its revision, apply
    /// it and commit it as the next revision.
    pub fn apply(&mut self, op: Operation) -> Result<AppliedOperation> {
        self.ensure_live()?;

        if let Some(existing) = self.history.find(&op.id) {
            debug!(document = %self.id, operation = ?op.id, "duplicate operation ignored");
            return Ok(AppliedOperation {
                operation: existing.clone(),
                revision: existing.revision,
                duplicate: true,
            });
        }

        let current = self.revision();
        if op.revision > current {
            return Err(EngineError::InvalidOperation(format!(
                "operation revision {} is ahead of document revision {current}",
                op.revision
            )));
        }
        op.kind.validate_family(self.doc_type)?;
        if op.revision < current {
            if let Some(view) = self.submitter_view(&op)? {
                view.apply(&op.kind)?;
            }
        }

        // The submitter's own operations are already reflected in its revision
        let concurrent = self
            .history
            .since(op.revision)?
            .iter()
            .filter(|committed| committed.user_id != op.user_id);
        let mut committed = transform_through(&op, concurrent, self.doc_type)?;

        let content = self.content.apply(&committed.kind)?;
        committed.kind = with_old_value(&self.content, committed.kind);
        committed.revision = current + 1;

        if let Err(err) = self.history.append(committed.clone()) {
            error!(document = %self.id, "refusing operation: {}", err);
            if cfg!(debug_assertions) {
                panic!("history invariant violated: {err}");
            }
            return Err(err);
        }
        self.content = content;
        self.last_modified = Utc::now();
        self.presence.observe(&committed.user_id, committed.revision);

        debug_assert!(self.history.check_consistency().is_ok());
        debug!(
            document = %self.id,
            revision = committed.revision,
            kind = committed.kind.name(),
            user = %committed.user_id,
            "operation committed"
        );

        Ok(AppliedOperation {
            revision: committed.revision,
            operation: committed,
            duplicate: false,
        })
    }

    /// The document as the submitter of `op` saw it: the content at
    /// `op.revision` plus the submitter's own operations committed since.
    /// `None` when those no longer replay onto it.
    fn submitter_view(&self, op: &Operation) -> Result<Option<Content>> {
        let mut view = self.history.content_at(op.revision)?;
        let own = self
            .history
            .since(op.revision)?
            .iter()
            .filter(|committed| committed.user_id == op.user_id);
        for committed in own {
            match view.apply(&committed.kind) {
                Ok(next) => view = next,
                Err(err) => {
                    debug!(document = %self.id, "submitter view unavailable: {}", err);
                    return Ok(None);
                }
            }
        }
        Ok(Some(view))
    }

    /// Attach a user at the current revision. Returns `false` for a rejoin.
    pub fn join(&mut self, user_id: &UserId) -> Result<bool> {
        self.ensure_live()?;
        let revision = self.revision();
        Ok(self.presence.join(user_id, revision))
    }

    pub fn leave(&mut self, user_id: &UserId) -> Option<UserState> {
        self.presence.leave(user_id)
    }

    pub fn operations_since(&self, revision: Revision) -> Result<Vec<Operation>> {
        self.ensure_live()?;
        Ok(self.history.since(revision)?.to_vec())
    }

    /// Pending operations for `user_id`; marks the user caught up
    pub fn sync(&mut self, user_id: &UserId) -> Result<DocumentSync> {
        self.ensure_live()?;

        let current = self.revision();
        let user_revision = self
            .presence
            .get(user_id)
            .map(|state| state.revision)
            .unwrap_or(current);
        let pending_operations = self.history.since(user_revision)?.to_vec();
        self.presence.observe(user_id, current);

        Ok(DocumentSync {
            document: self.snapshot(),
            user_revision,
            pending_operations,
        })
    }

    /// Record that `user_id` has observed `revision`
    pub fn acknowledge(&mut self, user_id: &UserId, revision: Revision) -> Result<()> {
        self.ensure_live()?;

        if revision > self.revision() {
            return Err(EngineError::InvalidOperation(format!(
                "cannot acknowledge revision {revision}, document is at {}",
                self.revision()
            )));
        }
        if !self.presence.contains(user_id) {
            return Err(EngineError::InvalidOperation(format!(
                "user {user_id} is not attached to document {}",
                self.id
            )));
        }
        self.presence.observe(user_id, revision);
        Ok(())
    }

    /// Trim history longer than `ceiling` down to the newest `window`
    /// operations, unless an attached user still lags behind the new base.
    pub fn compact(&mut self, ceiling: usize, window: usize) -> Result<Compaction> {
        if self.evicted || self.history.len() <= ceiling {
            return Ok(Compaction::Untouched);
        }

        let new_base = self.revision() - window.min(self.history.len()) as Revision;
        if let Some(lagging_revision) = self.presence.min_revision() {
            if lagging_revision < new_base {
                warn!(
                    document = %self.id,
                    lagging_revision,
                    new_base,
                    "history compaction skipped for lagging user"
                );
                return Ok(Compaction::Skipped {
                    lagging_revision,
                    new_base,
                });
            }
        }

        let dropped = self.history.compact(window)?;
        debug_assert_eq!(self.history.base_revision(), new_base);
        Ok(Compaction::Compacted { dropped })
    }

    /// No attached users and untouched for at least `timeout`
    pub fn is_idle(&self, now: DateTime<Utc>, timeout: Duration) -> bool {
        self.presence.is_empty()
            && now
                .signed_duration_since(self.last_modified)
                .to_std()
                .map(|idle| idle >= timeout)
                .unwrap_or(false)
    }

    fn ensure_live(&self) -> Result<()> {
        if self.evicted {
            Err(EngineError::NotFound(self.id.clone()))
        } else {
            Ok(())
        }
    }

    #[cfg(test)]
    pub(crate) fn set_last_modified(&mut self, at: DateTime<Utc>) {
        self.last_modified = at;
    }
}

/// Fill in the value a JSON write replaces
fn with_old_value(content: &Content, kind: OperationKind) -> OperationKind {
    match kind {
        OperationKind::Set { path, value, .. } => OperationKind::Set {
            old_value: content.value_at(&path).cloned(),
            path,
            value,
        },
        OperationKind::Unset { path, .. } => OperationKind::Unset {
            old_value: content.value_at(&path).cloned(),
            path,
        },
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn text_doc(initial: &str) -> Document {
        Document::new(DocumentId::from("doc"), Content::Text(initial.to_string()))
    }

    #[test]
    fn test_apply_assigns_dense_revisions() {
        let mut doc = text_doc("");
        for i in 0..5 {
            let op = Operation::text_insert("alice", i, "a").with_revision(i as Revision);
            let applied = doc.apply(op).unwrap();
            assert_eq!(applied.revision, i as Revision + 1);
            assert_eq!(applied.operation.revision, applied.revision);
            assert!(!applied.duplicate);
        }
        assert_eq!(doc.revision(), 5);
        assert_eq!(doc.content(), &Content::Text("aaaaa".to_string()));
        assert_eq!(doc.history().replay().unwrap(), *doc.content());
    }

    #[test]
    fn test_late_operation_is_transformed() {
        let mut doc = text_doc("helloworld");
        doc.apply(Operation::text_insert("alice", 5, " ")).unwrap();
        let applied = doc.apply(Operation::text_insert("bob", 10, "!")).unwrap();

        assert_eq!(
            applied.operation.kind,
            OperationKind::Insert {
                position: 11,
                content: "!".to_string()
            }
        );
        assert_eq!(doc.content().as_text(), Some("hello world!"));
    }

    #[test]
    fn test_own_operations_are_not_transformed_against() {
        let mut doc = text_doc("abc");
        doc.apply(Operation::text_insert("alice", 0, "X")).unwrap();
        // Alice already accounted for her own insert
        doc.apply(Operation::text_insert("alice", 4, "Y")).unwrap();
        assert_eq!(doc.content().as_text(), Some("XabcY"));
    }

    #[test]
    fn test_late_operation_out_of_range_at_its_revision_is_rejected() {
        let mut doc = Document::new(
            DocumentId::from("list"),
            Content::Array(vec![json!("a"), json!("b"), json!("c"), json!("d")]),
        );
        doc.apply(Operation::array_delete("bob", 0, 2)).unwrap();

        let err = doc
            .apply(Operation::array_move("alice", 1, 100).with_revision(0))
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidOperation(_)));
        assert_eq!(doc.revision(), 1);
        assert_eq!(doc.history().len(), 1);
        assert_eq!(doc.content().as_array().unwrap(), &[json!("c"), json!("d")]);

        // In range at revision 0 even though the fold turns it into a no-op
        let applied = doc
            .apply(Operation::array_move("alice", 1, 0).with_revision(0))
            .unwrap();
        assert_eq!(applied.revision, 2);
        assert_eq!(applied.operation.kind, OperationKind::Retain);
    }

    #[test]
    fn test_duplicate_returns_original() {
        let mut doc = text_doc("abc");
        let op = Operation::text_insert("alice", 0, "X");
        let first = doc.apply(op.clone()).unwrap();
        let second = doc.apply(op).unwrap();

        assert!(second.duplicate);
        assert_eq!(second.revision, first.revision);
        assert_eq!(doc.revision(), 1);
        assert_eq!(doc.content().as_text(), Some("Xabc"));
    }

    #[test]
    fn test_future_revision_rejected() {
        let mut doc = text_doc("abc");
        let err = doc
            .apply(Operation::text_insert("alice", 0, "X").with_revision(3))
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidOperation(_)));
        assert_eq!(doc.revision(), 0);
    }

    #[test]
    fn test_rejected_operation_leaves_state_untouched() {
        let mut doc = text_doc("abc");
        assert!(doc.apply(Operation::text_delete("alice", 2, 9)).is_err());
        assert!(doc.apply(Operation::array_delete("alice", 0, 1)).is_err());
        assert_eq!(doc.revision(), 0);
        assert_eq!(doc.content().as_text(), Some("abc"));
        assert!(doc.history().is_empty());
    }

    #[test]
    fn test_json_writes_record_old_value() {
        let mut doc = Document::new(DocumentId::from("cfg"), Content::empty(DocumentType::Json));
        doc.apply(Operation::json_set("alice", ["x"], json!(1))).unwrap();
        let applied = doc
            .apply(Operation::json_set("alice", ["x"], json!(2)).with_revision(1))
            .unwrap();
        assert!(matches!(
            applied.operation.kind,
            OperationKind::Set { old_value: Some(ref v), .. } if *v == json!(1)
        ));

        let applied = doc
            .apply(Operation::json_unset("alice", ["x"]).with_revision(2))
            .unwrap();
        assert!(matches!(
            applied.operation.kind,
            OperationKind::Unset { old_value: Some(ref v), .. } if *v == json!(2)
        ));
    }

    #[test]
    fn test_sync_returns_pending_and_catches_up() {
        let mut doc = text_doc("");
        let bob = UserId::from("bob");
        doc.join(&bob).unwrap();

        doc.apply(Operation::text_insert("alice", 0, "a")).unwrap();
        doc.apply(Operation::text_insert("alice", 1, "b").with_revision(1))
            .unwrap();

        let sync = doc.sync(&bob).unwrap();
        assert_eq!(sync.user_revision, 0);
        assert_eq!(sync.pending_operations.len(), 2);
        assert_eq!(sync.document.revision, 2);

        let again = doc.sync(&bob).unwrap();
        assert_eq!(again.user_revision, 2);
        assert!(again.pending_operations.is_empty());

        // Unattached users are treated as caught up
        let stranger = doc.sync(&UserId::from("carol")).unwrap();
        assert_eq!(stranger.user_revision, 2);
        assert!(stranger.pending_operations.is_empty());
    }

    #[test]
    fn test_compaction_respects_lagging_user() {
        let mut doc = text_doc("");
        let bob = UserId::from("bob");
        doc.join(&bob).unwrap();

        for i in 0..12 {
            let op = Operation::text_insert("alice", i, "x").with_revision(i as Revision);
            doc.apply(op).unwrap();
        }

        assert_eq!(
            doc.compact(10, 4).unwrap(),
            Compaction::Skipped {
                lagging_revision: 0,
                new_base: 8
            }
        );
        assert_eq!(doc.history().len(), 12);

        doc.acknowledge(&bob, 9).unwrap();
        assert_eq!(doc.compact(10, 4).unwrap(), Compaction::Compacted { dropped: 8 });
        assert_eq!(doc.history().base_revision(), 8);
        assert_eq!(doc.history().replay().unwrap(), *doc.content());
        assert_eq!(doc.compact(10, 4).unwrap(), Compaction::Untouched);
    }

    #[test]
    fn test_acknowledge_validation() {
        let mut doc = text_doc("");
        let bob = UserId::from("bob");
        assert!(doc.acknowledge(&bob, 0).is_err());
        doc.join(&bob).unwrap();
        assert!(doc.acknowledge(&bob, 1).is_err());
        assert!(doc.acknowledge(&bob, 0).is_ok());
    }

    #[test]
    fn test_idle_detection() {
        let mut doc = text_doc("");
        let timeout = Duration::from_secs(3600);
        let now = Utc::now();
        doc.set_last_modified(now - chrono::Duration::hours(2));
        assert!(doc.is_idle(now, timeout));

        doc.join(&UserId::from("alice")).unwrap();
        assert!(!doc.is_idle(now, timeout));

        doc.leave(&UserId::from("alice"));
        doc.set_last_modified(now - chrono::Duration::minutes(5));
        assert!(!doc.is_idle(now, timeout));
    }

    #[test]
    fn test_evicted_document_refuses_work() {
        let mut doc = text_doc("");
        doc.mark_evicted();
        let err = doc.apply(Operation::text_insert("alice", 0, "x")).unwrap_err();
        assert_eq!(err, EngineError::NotFound(DocumentId::from("doc")));
        assert!(doc.join(&UserId::from("alice")).is_err());
    }
}
