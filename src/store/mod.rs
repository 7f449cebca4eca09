//! Storage abstraction for documents, links and chunks.
//!
//! The [`Store`] trait is the persistence seam of the engine. Two backends
//! ship with the crate:
//! - [`SqliteStore`]: the on-disk store used by the CLI and server.
//! - [`MemoryStore`]: `RwLock`-guarded vectors, for tests and embedders.
//!
//! # Atomicity
//!
//! [`write_document`](Store::write_document) writes a document's fields and
//! its full link set as one unit, and [`replace_chunks`](Store::replace_chunks)
//! swaps a document's whole chunk set as one unit. Readers never observe a
//! document with another writer's links, nor a half-replaced chunk set.

pub mod memory;
pub mod sqlite;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{Chunk, Document, Link, StoreStats};

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Abstract storage backend.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`ensure_stub`](Store::ensure_stub) | Create an empty document for a path if absent |
/// | [`write_document`](Store::write_document) | Upsert a document by path and replace its links |
/// | [`set_category`](Store::set_category) | Set externally owned classification tags |
/// | [`delete_document`](Store::delete_document) | Delete a document, cascading to links and chunks |
/// | [`links_from`](Store::links_from) / [`links_to`](Store::links_to) | Outgoing links and backlinks |
/// | [`replace_chunks`](Store::replace_chunks) | Replace all chunks for a document |
/// | [`embedded_chunks`](Store::embedded_chunks) | Every chunk with a vector, in insertion order |
#[async_trait]
pub trait Store: Send + Sync {
    async fn get_document(&self, id: &str) -> Result<Option<Document>>;

    async fn get_document_by_path(&self, path: &str) -> Result<Option<Document>>;

    /// All documents, ordered by path.
    async fn list_documents(&self) -> Result<Vec<Document>>;

    /// Create an empty document for `path` unless one exists. Returns the
    /// id of the (new or existing) document.
    async fn ensure_stub(&self, path: &str, title: &str) -> Result<String>;

    /// Insert or update the document with `doc.path` and replace its links.
    ///
    /// An existing row keeps its id, category and subcategory. Links are
    /// re-owned by the stored id. Returns that id.
    async fn write_document(&self, doc: &Document, links: &[Link]) -> Result<String>;

    /// Set the classification tags of a document. These are owned by the
    /// caller; syncs never change them. Returns `false` for an unknown id.
    async fn set_category(
        &self,
        id: &str,
        category: Option<&str>,
        subcategory: Option<&str>,
    ) -> Result<bool>;

    /// Returns `true` when a document was deleted.
    async fn delete_document(&self, id: &str) -> Result<bool>;

    async fn delete_document_by_path(&self, path: &str) -> Result<bool>;

    /// Outgoing links of a document, in textual order.
    async fn links_from(&self, document_id: &str) -> Result<Vec<Link>>;

    /// Links whose `target_id` is the document.
    async fn links_to(&self, document_id: &str) -> Result<Vec<Link>>;

    /// Replace the full chunk set of a document.
    async fn replace_chunks(&self, document_id: &str, chunks: &[Chunk]) -> Result<()>;

    /// Chunks of one document, ordered by index.
    async fn chunks_for(&self, document_id: &str) -> Result<Vec<Chunk>>;

    /// Every chunk that has a vector, in insertion order.
    async fn embedded_chunks(&self) -> Result<Vec<Chunk>>;

    async fn stats(&self) -> Result<StoreStats>;
}
