//! In-process document registry

use dashmap::DashMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::types::{Document, EmbeddingStatus};

/// Documents known to this process, with their embedding status
#[derive(Clone, Default)]
pub struct DocumentRegistry {
    documents: Arc<DashMap<Uuid, Document>>,
}

impl DocumentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a document, replacing any previous entry with the same id
    pub fn insert(&self, document: Document) -> Uuid {
        let id = document.id;
        self.documents.insert(id, document);
        id
    }

    /// Snapshot of a document
    pub fn get(&self, id: &Uuid) -> Option<Document> {
        self.documents.get(id).map(|d| d.clone())
    }

    pub fn contains(&self, id: &Uuid) -> bool {
        self.documents.contains_key(id)
    }

    pub fn remove(&self, id: &Uuid) -> Option<Document> {
        self.documents.remove(id).map(|(_, d)| d)
    }

    /// Documents owned by a user, newest first
    pub fn list_for_user(&self, user_id: &Uuid) -> Vec<Document> {
        let mut docs: Vec<Document> = self
            .documents
            .iter()
            .filter(|d| d.user_id == *user_id)
            .map(|d| d.clone())
            .collect();
        docs.sort_by(|a, b| b.uploaded_at.cmp(&a.uploaded_at));
        docs
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    /// Apply an in-place update
    pub fn update<F>(&self, id: &Uuid, f: F) -> Result<()>
    where
        F: FnOnce(&mut Document),
    {
        let mut entry = self
            .documents
            .get_mut(id)
            .ok_or_else(|| Error::DocumentNotFound(id.to_string()))?;
        f(entry.value_mut());
        Ok(())
    }

    /// Record a successful embedding run
    pub fn mark_completed(&self, id: &Uuid, total_chunks: u32) -> Result<()> {
        self.update(id, |doc| {
            doc.embedding_status = EmbeddingStatus::Completed;
            doc.processing_error = None;
            doc.total_chunks = total_chunks;
        })
    }

    /// Record a failed embedding run
    pub fn mark_failed(&self, id: &Uuid, error: impl Into<String>) -> Result<()> {
        let error = error.into();
        self.update(id, |doc| {
            doc.embedding_status = EmbeddingStatus::Failed;
            doc.processing_error = Some(error);
            doc.total_chunks = 0;
        })
    }
}
