//! Core data models.
//!
//! These types mirror the three persisted tables (documents, links, chunks)
//! plus the values that flow between the sync engine and the search path.

use serde::Serialize;

/// A persisted Markdown document, keyed by its repository-relative `path`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Document {
    pub id: String,
    pub path: String,
    pub title: String,
    /// Raw Markdown body with frontmatter stripped.
    pub content: String,
    /// HTML rendered from `content` with wiki links resolved.
    pub rendered: String,
    pub revision: Option<String>,
    pub category: Option<String>,
    pub subcategory: Option<String>,
    /// SHA-256 of `content`, used to detect content changes.
    pub content_hash: String,
    pub updated_at: i64,
}

/// A directed wiki link. `target_id` is `None` while the target is missing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Link {
    pub source_id: String,
    pub target_id: Option<String>,
    pub target_path: String,
    pub link_text: String,
}

impl Link {
    pub fn is_missing(&self) -> bool {
        self.target_id.is_none()
    }
}

/// A retrieval-sized slice of a document's content.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Chunk {
    pub id: String,
    pub document_id: String,
    pub chunk_index: i64,
    pub text: String,
    #[serde(skip)]
    pub vector: Option<Vec<f32>>,
}

/// The fields of a [`Document`] a link resolver needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocRef {
    pub id: String,
    pub path: String,
    pub title: String,
}

impl From<&Document> for DocRef {
    fn from(doc: &Document) -> Self {
        Self {
            id: doc.id.clone(),
            path: doc.path.clone(),
            title: doc.title.clone(),
        }
    }
}

/// One ranked semantic search result.
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub document: Document,
    pub chunk_index: i64,
    pub chunk_text: String,
    pub similarity: f32,
}

/// Aggregate counts over the store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub documents: i64,
    pub links: i64,
    pub missing_links: i64,
    pub chunks: i64,
    pub embedded_chunks: i64,
}
