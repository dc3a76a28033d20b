/// Per-document log of committed operations
use std::collections::HashMap;

use crate::{Content, EngineError, Operation, OperationId, Result, Revision};

/// Committed operations on top of a base snapshot
///
/// Every retained operation applies on top of `base_content`, and the i-th
/// operation carries revision `base_revision + i + 1`. Compaction folds the
/// oldest operations into the base and rebuilds both indices.
#[derive(Debug, Clone)]
pub struct OperationHistory {
    operations: Vec<Operation>,

    /// Index by revision for range lookups
    revisions: HashMap<Revision, usize>,

    /// Index by operation ID for deduplication
    ids: HashMap<OperationId, Revision>,

    base_revision: Revision,
    base_content: Content,
}

impl OperationHistory {
    pub fn new(initial: Content) -> Self {
        Self {
            operations: Vec::new(),
            revisions: HashMap::new(),
            ids: HashMap::new(),
            base_revision: 0,
            base_content: initial,
        }
    }

    pub fn base_revision(&self) -> Revision {
        self.base_revision
    }

    pub fn base_content(&self) -> &Content {
        &self.base_content
    }

    /// Revision of the newest committed operation
    pub fn head(&self) -> Revision {
        self.base_revision + self.operations.len() as Revision
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Operation> {
        self.operations.iter()
    }

    /// Append a committed operation; its revision must be `head() + 1`
    pub fn append(&mut self, op: Operation) -> Result<()> {
        let expected = self.head() + 1;
        if op.revision != expected {
            return Err(EngineError::Internal(format!(
                "history append out of order: expected revision {expected}, got {}",
                op.revision
            )));
        }
        if self.ids.contains_key(&op.id) {
            return Err(EngineError::Internal(format!(
                "operation {:?} already recorded",
                op.id
            )));
        }

        self.revisions.insert(op.revision, self.operations.len());
        self.ids.insert(op.id, op.revision);
        self.operations.push(op);
        Ok(())
    }

    /// Get operation by revision
    pub fn get(&self, revision: Revision) -> Option<&Operation> {
        self.revisions
            .get(&revision)
            .and_then(|&idx| self.operations.get(idx))
    }

    /// Get operation by ID
    pub fn find(&self, id: &OperationId) -> Option<&Operation> {
        self.ids.get(id).and_then(|&revision| self.get(revision))
    }

    pub fn contains(&self, id: &OperationId) -> bool {
        self.ids.contains_key(id)
    }

    /// Operations committed strictly after `revision`, in commit order
    pub fn since(&self, revision: Revision) -> Result<&[Operation]> {
        if revision < self.base_revision {
            return Err(EngineError::StaleRevision {
                requested: revision,
                oldest: self.base_revision,
            });
        }
        if revision >= self.head() {
            return Ok(&[]);
        }

        let start = (revision - self.base_revision) as usize;
        Ok(&self.operations[start..])
    }

    /// Drop the oldest operations so at most `keep` remain, folding them into
    /// the base snapshot. Returns how many were dropped.
    pub fn compact(&mut self, keep: usize) -> Result<usize> {
        if self.operations.len() <= keep {
            return Ok(0);
        }

        let dropped = self.operations.len() - keep;
        let mut base = self.base_content.clone();
        for op in &self.operations[..dropped] {
            base = base.apply(&op.kind)?;
        }

        self.operations.drain(..dropped);
        self.base_content = base;
        self.base_revision += dropped as Revision;
        self.rebuild_index();
        Ok(dropped)
    }

    /// Content obtained by applying every retained operation to the base
    pub fn replay(&self) -> Result<Content> {
        self.operations
            .iter()
            .try_fold(self.base_content.clone(), |content, op| content.apply(&op.kind))
    }

    /// Content as it stood at `revision`
    pub fn content_at(&self, revision: Revision) -> Result<Content> {
        if revision > self.head() {
            return Err(EngineError::InvalidOperation(format!(
                "revision {revision} is ahead of history head {}",
                self.head()
            )));
        }
        let upto = self.since(revision)?.len();
        self.operations[..self.operations.len() - upto]
            .iter()
            .try_fold(self.base_content.clone(), |content, op| content.apply(&op.kind))
    }

    /// Check the dense-revision and index invariants
    pub fn check_consistency(&self) -> Result<()> {
        for (idx, op) in self.operations.iter().enumerate() {
            let expected = self.base_revision + idx as Revision + 1;
            if op.revision != expected
                || self.revisions.get(&op.revision) != Some(&idx)
                || self.ids.get(&op.id) != Some(&op.revision)
            {
                return Err(EngineError::Internal(format!(
                    "history index broken at revision {expected}"
                )));
            }
        }
        if self.revisions.len() != self.operations.len() || self.ids.len() != self.operations.len()
        {
            return Err(EngineError::Internal("history index size mismatch".to_string()));
        }
        Ok(())
    }

    fn rebuild_index(&mut self) {
        self.revisions.clear();
        self.ids.clear();
        for (idx, op) in self.operations.iter().enumerate() {
            self.revisions.insert(op.revision, idx);
            self.ids.insert(op.id, op.revision);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn history_with(count: usize) -> OperationHistory {
        let mut history = OperationHistory::new(Content::Text(String::new()));
        for i in 0..count {
            let op = Operation::text_insert("alice", i, "x").with_revision(i as Revision + 1);
            history.append(op).unwrap();
        }
        history
    }

    #[test]
    fn test_append_and_lookup() {
        let history = history_with(3);
        assert_eq!(history.head(), 3);
        assert_eq!(history.len(), 3);

        let second = history.get(2).unwrap();
        assert_eq!(history.find(&second.id).unwrap().revision, 2);
        assert!(history.contains(&second.id));
        assert!(history.get(4).is_none());
    }

    #[test]
    fn test_append_rejects_gaps() {
        let mut history = history_with(2);
        let op = Operation::text_insert("alice", 0, "x").with_revision(5);
        assert!(matches!(history.append(op), Err(EngineError::Internal(_))));
        assert_eq!(history.head(), 2);
    }

    #[test]
    fn test_since() {
        let history = history_with(5);
        let suffix = history.since(2).unwrap();
        let revisions: Vec<_> = suffix.iter().map(|op| op.revision).collect();
        assert_eq!(revisions, vec![3, 4, 5]);

        assert!(history.since(5).unwrap().is_empty());
        assert!(history.since(9).unwrap().is_empty());
        assert_eq!(history.since(0).unwrap().len(), 5);
    }

    #[test]
    fn test_compact_folds_into_base() {
        let mut history = history_with(10);
        let before = history.replay().unwrap();

        assert_eq!(history.compact(4).unwrap(), 6);
        assert_eq!(history.base_revision(), 6);
        assert_eq!(history.base_content(), &Content::Text("xxxxxx".to_string()));
        assert_eq!(history.len(), 4);
        assert_eq!(history.replay().unwrap(), before);
        history.check_consistency().unwrap();

        let err = history.since(3).unwrap_err();
        assert_eq!(
            err,
            EngineError::StaleRevision {
                requested: 3,
                oldest: 6
            }
        );
        assert_eq!(history.since(6).unwrap().len(), 4);
        assert!(history.get(6).is_none());
        assert_eq!(history.get(7).unwrap().revision, 7);
    }

    #[test]
    fn test_content_at_past_revisions() {
        let mut history = history_with(5);
        assert_eq!(history.content_at(0).unwrap(), Content::Text(String::new()));
        assert_eq!(history.content_at(3).unwrap(), Content::Text("xxx".to_string()));
        assert_eq!(history.content_at(5).unwrap(), history.replay().unwrap());
        assert!(matches!(history.content_at(6), Err(EngineError::InvalidOperation(_))));

        history.compact(2).unwrap();
        assert_eq!(history.content_at(4).unwrap(), Content::Text("xxxx".to_string()));
        assert!(matches!(history.content_at(2), Err(EngineError::StaleRevision { .. })));
    }

    #[test]
    fn test_compact_below_window_is_noop() {
        let mut history = history_with(3);
        assert_eq!(history.compact(5).unwrap(), 0);
        assert_eq!(history.base_revision(), 0);
    }
}
