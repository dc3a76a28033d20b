/// Registry of live documents
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;

use crate::{Content, Document, DocumentId, EngineError, Result};

pub type SharedDocument = Arc<Mutex<Document>>;

/// Thread-safe map from document id to its sequencing unit
///
/// Clones share the same map. Map shard locks are released before a document
/// lock is taken, except in `remove_if`, which always locks shard then document.
#[derive(Debug, Clone, Default)]
pub struct DocumentStore {
    documents: Arc<DashMap<DocumentId, SharedDocument>>,
}

impl DocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &DocumentId) -> Option<SharedDocument> {
        self.documents.get(id).map(|entry| entry.value().clone())
    }

    /// Insert a new document; fails if the id is taken
    pub fn create(&self, id: DocumentId, content: Content) -> Result<SharedDocument> {
        match self.documents.entry(id.clone()) {
            Entry::Occupied(_) => Err(EngineError::AlreadyExists(id)),
            Entry::Vacant(entry) => {
                let document = Arc::new(Mutex::new(Document::new(id, content)));
                entry.insert(document.clone());
                Ok(document)
            }
        }
    }

    /// Existing document, or a new one built from `content`. The flag is
    /// `true` when the document was created by this call.
    pub fn get_or_create(
        &self,
        id: &DocumentId,
        content: impl FnOnce() -> Content,
    ) -> (SharedDocument, bool) {
        if let Some(document) = self.get(id) {
            return (document, false);
        }
        match self.documents.entry(id.clone()) {
            Entry::Occupied(entry) => (entry.get().clone(), false),
            Entry::Vacant(entry) => {
                let document = Arc::new(Mutex::new(Document::new(id.clone(), content())));
                entry.insert(document.clone());
                (document, true)
            }
        }
    }

    /// Remove `id` if `predicate` holds for the locked document. The document
    /// is marked evicted before the shard lock is released.
    pub fn remove_if(&self, id: &DocumentId, predicate: impl Fn(&Document) -> bool) -> bool {
        self.documents
            .remove_if(id, |_, document| {
                let mut document = document.lock();
                if predicate(&document) {
                    document.mark_evicted();
                    true
                } else {
                    false
                }
            })
            .is_some()
    }

    pub fn ids(&self) -> Vec<DocumentId> {
        let mut ids: Vec<_> = self.documents.iter().map(|entry| entry.key().clone()).collect();
        ids.sort();
        ids
    }

    /// Snapshot of the registered documents, sorted by id
    pub fn documents(&self) -> Vec<SharedDocument> {
        let mut entries: Vec<_> = self
            .documents
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries.into_iter().map(|(_, document)| document).collect()
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}
