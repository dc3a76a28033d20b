/// Engine façade: routes client requests to document sequencing units
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::info;

use crate::{
    AppliedOperation, Content, DocumentId, DocumentStore, DocumentSummary, DocumentSnapshot,
    DocumentSync, DocumentType, EngineConfig, EngineError, EngineEvent, EventBus, Operation,
    Result, Revision, SharedDocument, UserId,
};

/// Aggregate view over all live documents
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineStatistics {
    pub active_documents: usize,

    /// Attached users, counted once per document
    pub total_users: usize,

    /// Committed operations across live documents
    pub total_operations: u64,

    pub documents: Vec<DocumentSummary>,

    /// Live event subscribers
    pub subscribers: usize,
}

/// Operational Transform engine
///
/// Cloning is cheap; clones share documents, configuration and subscribers.
#[derive(Debug, Clone)]
pub struct OtEngine {
    store: DocumentStore,
    config: EngineConfig,
    events: EventBus,
}

impl OtEngine {
    pub fn new(config: EngineConfig) -> Result<Self> {
        Self::with_store(config, DocumentStore::new())
    }

    /// Engine over an existing store
    pub fn with_store(config: EngineConfig, store: DocumentStore) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            events: EventBus::new(config.event_capacity),
            store,
            config,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &DocumentStore {
        &self.store
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    /// Create a document with explicit type and initial content
    pub fn create_document(
        &self,
        document_id: &DocumentId,
        doc_type: DocumentType,
        initial: Content,
    ) -> Result<DocumentSnapshot> {
        if initial.doc_type() != doc_type {
            return Err(EngineError::InvalidOperation(format!(
                "initial content is {:?}, expected {doc_type:?}",
                initial.doc_type()
            )));
        }

        let document = self.store.create(document_id.clone(), initial)?;
        info!(document = %document_id, ?doc_type, "document created");
        let snapshot = document.lock().snapshot();
        Ok(snapshot)
    }

    pub fn get_document(&self, document_id: &DocumentId) -> Option<DocumentSnapshot> {
        let document = self.store.get(document_id)?;
        let document = document.lock();
        (!document.is_evicted()).then(|| document.snapshot())
    }

    /// Submit a client operation
    pub fn apply_operation(
        &self,
        document_id: &DocumentId,
        operation: Operation,
    ) -> Result<AppliedOperation> {
        let document = self.document(document_id)?;
        let mut document = document.lock();

        let applied = document.apply(operation)?;
        if !applied.duplicate {
            self.events.publish(EngineEvent::OperationApplied {
                document_id: document_id.clone(),
                user_id: applied.operation.user_id.clone(),
                revision: applied.revision,
                operation: applied.operation.clone(),
            });
        }
        Ok(applied)
    }

    /// Attach a user, creating the document on first join
    pub fn join_document(
        &self,
        document_id: &DocumentId,
        user_id: &UserId,
    ) -> Result<DocumentSnapshot> {
        loop {
            let (document, created) = self.store.get_or_create(document_id, || {
                Content::empty(self.config.default_document_type)
            });
            if created {
                info!(document = %document_id, "document created on join");
            }

            let mut document = document.lock();
            // Evicted between lookup and lock; the next lookup creates a fresh one
            if document.is_evicted() {
                continue;
            }

            if document.join(user_id)? {
                info!(document = %document_id, user = %user_id, "user joined");
            }
            let snapshot = document.snapshot();
            self.events.publish(EngineEvent::UserJoined {
                document_id: document_id.clone(),
                user_id: user_id.clone(),
                active_users: snapshot.active_users.clone(),
            });
            return Ok(snapshot);
        }
    }

    /// Detach a user; unknown documents and users are ignored
    pub fn leave_document(&self, document_id: &DocumentId, user_id: &UserId) {
        let Some(document) = self.store.get(document_id) else {
            return;
        };
        let mut document = document.lock();

        if document.leave(user_id).is_some() {
            info!(document = %document_id, user = %user_id, "user left");
            self.events.publish(EngineEvent::UserLeft {
                document_id: document_id.clone(),
                user_id: user_id.clone(),
                active_users: document.presence().active_users(),
            });
        }
    }

    /// Catch-up payload for a (re)connecting user
    pub fn get_document_sync(
        &self,
        document_id: &DocumentId,
        user_id: &UserId,
    ) -> Result<DocumentSync> {
        let document = self.document(document_id)?;
        let sync = document.lock().sync(user_id);
        sync
    }

    pub fn get_operations_since(
        &self,
        document_id: &DocumentId,
        revision: Revision,
    ) -> Result<Vec<Operation>> {
        let document = self.document(document_id)?;
        let operations = document.lock().operations_since(revision);
        operations
    }

    /// Record the revision a user has observed
    pub fn acknowledge(
        &self,
        document_id: &DocumentId,
        user_id: &UserId,
        revision: Revision,
    ) -> Result<()> {
        let document = self.document(document_id)?;
        let result = document.lock().acknowledge(user_id, revision);
        result
    }

    pub fn get_statistics(&self) -> EngineStatistics {
        let documents: Vec<DocumentSummary> = self
            .store
            .documents()
            .iter()
            .filter_map(|document| {
                let document = document.lock();
                (!document.is_evicted()).then(|| document.summary())
            })
            .collect();

        EngineStatistics {
            active_documents: documents.len(),
            total_users: documents.iter().map(|doc| doc.active_users).sum(),
            total_operations: documents.iter().map(|doc| doc.revision).sum(),
            documents,
            subscribers: self.events.subscriber_count(),
        }
    }

    fn document(&self, document_id: &DocumentId) -> Result<SharedDocument> {
        self.store
            .get(document_id)
            .ok_or_else(|| EngineError::NotFound(document_id.clone()))
    }
}
