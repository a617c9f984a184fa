//! Registry of successfully ingested documents

use ekip_common::Document;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Documents whose chunks are fully committed to the index
#[derive(Default)]
pub struct DocumentCatalog {
    documents: RwLock<HashMap<Uuid, Document>>,
}

impl DocumentCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, document: Document) {
        self.documents.write().await.insert(document.id, document);
    }

    pub async fn get(&self, id: Uuid) -> Option<Document> {
        self.documents.read().await.get(&id).cloned()
    }

    pub async fn remove(&self, id: Uuid) -> Option<Document> {
        self.documents.write().await.remove(&id)
    }

    /// All documents, oldest upload first
    pub async fn list(&self) -> Vec<Document> {
        let mut documents: Vec<Document> = self.documents.read().await.values().cloned().collect();
        documents.sort_by(|a, b| a.uploaded_at.cmp(&b.uploaded_at).then(a.id.cmp(&b.id)));
        documents
    }

    pub async fn len(&self) -> usize {
        self.documents.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
