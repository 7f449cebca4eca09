//! In-memory [`Store`] implementation.
//!
//! All three tables live in one `RwLock`, so every trait method is atomic
//! with respect to every other.

use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use uuid::Uuid;

use super::Store;
use crate::models::{Chunk, Document, Link, StoreStats};

#[derive(Default)]
struct Tables {
    documents: Vec<Document>,
    links: Vec<Link>,
    chunks: Vec<Chunk>,
}

#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Tables>> {
        self.tables
            .read()
            .map_err(|_| anyhow!("memory store lock poisoned"))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Tables>> {
        self.tables
            .write()
            .map_err(|_| anyhow!("memory store lock poisoned"))
    }
}

impl Tables {
    fn remove_document(&mut self, id: &str) -> bool {
        let before = self.documents.len();
        self.documents.retain(|d| d.id != id);
        if self.documents.len() == before {
            return false;
        }
        self.links.retain(|l| l.source_id != id);
        self.chunks.retain(|c| c.document_id != id);
        true
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get_document(&self, id: &str) -> Result<Option<Document>> {
        Ok(self.read()?.documents.iter().find(|d| d.id == id).cloned())
    }

    async fn get_document_by_path(&self, path: &str) -> Result<Option<Document>> {
        Ok(self
            .read()?
            .documents
            .iter()
            .find(|d| d.path == path)
            .cloned())
    }

    async fn list_documents(&self) -> Result<Vec<Document>> {
        let mut docs = self.read()?.documents.clone();
        docs.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(docs)
    }

    async fn ensure_stub(&self, path: &str, title: &str) -> Result<String> {
        let mut tables = self.write()?;
        if let Some(doc) = tables.documents.iter().find(|d| d.path == path) {
            return Ok(doc.id.clone());
        }
        let id = Uuid::new_v4().to_string();
        tables.documents.push(Document {
            id: id.clone(),
            path: path.to_string(),
            title: title.to_string(),
            content: String::new(),
            rendered: String::new(),
            revision: None,
            category: None,
            subcategory: None,
            content_hash: String::new(),
            updated_at: chrono::Utc::now().timestamp(),
        });
        Ok(id)
    }

    async fn write_document(&self, doc: &Document, links: &[Link]) -> Result<String> {
        let mut tables = self.write()?;

        let id = match tables.documents.iter_mut().find(|d| d.path == doc.path) {
            Some(existing) => {
                let keep_id = existing.id.clone();
                let category = existing.category.take();
                let subcategory = existing.subcategory.take();
                *existing = Document {
                    id: keep_id.clone(),
                    category,
                    subcategory,
                    ..doc.clone()
                };
                keep_id
            }
            None => {
                tables.documents.push(doc.clone());
                doc.id.clone()
            }
        };

        tables.links.retain(|l| l.source_id != id);
        tables.links.extend(links.iter().map(|l| Link {
            source_id: id.clone(),
            ..l.clone()
        }));

        Ok(id)
    }

    async fn set_category(
        &self,
        id: &str,
        category: Option<&str>,
        subcategory: Option<&str>,
    ) -> Result<bool> {
        let mut tables = self.write()?;
        match tables.documents.iter_mut().find(|d| d.id == id) {
            Some(doc) => {
                doc.category = category.map(str::to_string);
                doc.subcategory = subcategory.map(str::to_string);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete_document(&self, id: &str) -> Result<bool> {
        Ok(self.write()?.remove_document(id))
    }

    async fn delete_document_by_path(&self, path: &str) -> Result<bool> {
        let mut tables = self.write()?;
        let id = match tables.documents.iter().find(|d| d.path == path) {
            Some(doc) => doc.id.clone(),
            None => return Ok(false),
        };
        Ok(tables.remove_document(&id))
    }

    async fn links_from(&self, document_id: &str) -> Result<Vec<Link>> {
        Ok(self
            .read()?
            .links
            .iter()
            .filter(|l| l.source_id == document_id)
            .cloned()
            .collect())
    }

    async fn links_to(&self, document_id: &str) -> Result<Vec<Link>> {
        let tables = self.read()?;
        let path_of = |id: &str| {
            tables
                .documents
                .iter()
                .find(|d| d.id == id)
                .map(|d| d.path.clone())
                .unwrap_or_default()
        };
        let mut links: Vec<Link> = tables
            .links
            .iter()
            .filter(|l| l.target_id.as_deref() == Some(document_id))
            .cloned()
            .collect();
        // Stable sort keeps textual order within one source.
        links.sort_by_key(|l| path_of(&l.source_id));
        Ok(links)
    }

    async fn replace_chunks(&self, document_id: &str, chunks: &[Chunk]) -> Result<()> {
        let mut tables = self.write()?;
        tables.chunks.retain(|c| c.document_id != document_id);
        tables.chunks.extend(chunks.iter().map(|c| Chunk {
            document_id: document_id.to_string(),
            ..c.clone()
        }));
        Ok(())
    }

    async fn chunks_for(&self, document_id: &str) -> Result<Vec<Chunk>> {
        let mut chunks: Vec<Chunk> = self
            .read()?
            .chunks
            .iter()
            .filter(|c| c.document_id == document_id)
            .cloned()
            .collect();
        chunks.sort_by_key(|c| c.chunk_index);
        Ok(chunks)
    }

    async fn embedded_chunks(&self) -> Result<Vec<Chunk>> {
        Ok(self
            .read()?
            .chunks
            .iter()
            .filter(|c| c.vector.is_some())
            .cloned()
            .collect())
    }

    async fn stats(&self) -> Result<StoreStats> {
        let tables = self.read()?;
        Ok(StoreStats {
            documents: tables.documents.len() as i64,
            links: tables.links.len() as i64,
            missing_links: tables.links.iter().filter(|l| l.is_missing()).count() as i64,
            chunks: tables.chunks.len() as i64,
            embedded_chunks: tables.chunks.iter().filter(|c| c.vector.is_some()).count() as i64,
        })
    }
}
