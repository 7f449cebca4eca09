//! Chunk-vector index and nearest-neighbour search.
//!
//! [`EmbeddingIndex::reindex`] chunks a document, embeds every chunk in
//! index order and swaps the document's chunk set in one store call.
//! Vectors are computed before anything is written, so a provider failure
//! leaves the previous chunk set untouched and surfaces as an error.
//!
//! [`EmbeddingIndex::search`] is brute force: the query vector is scored
//! against every stored chunk vector with cosine similarity. Ties keep
//! insertion order.

use anyhow::Result;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::chunk::chunk_text;
use crate::config::ChunkingConfig;
use crate::embedding::{cosine_similarity, EmbeddingProvider};
use crate::error::IndexError;
use crate::models::{Chunk, Document, SearchHit};
use crate::store::Store;

pub struct EmbeddingIndex {
    store: Arc<dyn Store>,
    provider: Option<Arc<dyn EmbeddingProvider>>,
    chunking: ChunkingConfig,
}

impl EmbeddingIndex {
    pub fn new(
        store: Arc<dyn Store>,
        provider: Option<Arc<dyn EmbeddingProvider>>,
        chunking: ChunkingConfig,
    ) -> Self {
        Self {
            store,
            provider,
            chunking,
        }
    }

    pub fn is_available(&self) -> bool {
        self.provider.is_some()
    }

    fn provider(&self) -> Result<&Arc<dyn EmbeddingProvider>, IndexError> {
        self.provider.as_ref().ok_or_else(|| {
            IndexError::ServiceUnavailable("no embedding provider configured".to_string())
        })
    }

    /// Recompute the chunk set of `document_id` from `text`.
    ///
    /// Returns the number of chunks written. A document deleted since the
    /// job was queued is skipped and reports zero.
    pub async fn reindex(&self, document_id: &str, text: &str) -> Result<usize> {
        let provider = self.provider()?;

        let pieces = chunk_text(text, &self.chunking);
        let mut chunks = Vec::with_capacity(pieces.len());
        for piece in pieces {
            let vector = provider
                .embed(&piece.text)
                .await
                .map_err(|source| IndexError::Provider {
                    document_id: document_id.to_string(),
                    chunk_index: piece.index,
                    source,
                })?;
            chunks.push(Chunk {
                id: Uuid::new_v4().to_string(),
                document_id: document_id.to_string(),
                chunk_index: piece.index as i64,
                text: piece.text,
                vector: Some(vector),
            });
        }

        if self.store.get_document(document_id).await?.is_none() {
            tracing::debug!(document_id, "document gone before reindex finished");
            return Ok(0);
        }

        self.store.replace_chunks(document_id, &chunks).await?;
        tracing::debug!(document_id, chunks = chunks.len(), "document reindexed");
        Ok(chunks.len())
    }

    /// The `limit` chunks most similar to `query`, best first.
    pub async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>> {
        let provider = self.provider()?;

        if query.trim().is_empty() || limit == 0 {
            return Ok(Vec::new());
        }

        let query_vec = provider.embed(query).await.map_err(IndexError::Query)?;

        let mut scored: Vec<(f32, Chunk)> = self
            .store
            .embedded_chunks()
            .await?
            .into_iter()
            .map(|chunk| {
                let sim = chunk
                    .vector
                    .as_deref()
                    .map(|v| cosine_similarity(&query_vec, v))
                    .unwrap_or(0.0);
                // NaN from degenerate provider vectors ranks last.
                let sim = if sim.is_nan() { f32::NEG_INFINITY } else { sim };
                (sim, chunk)
            })
            .collect();

        // sort_by is stable, so equal scores keep insertion order.
        scored.sort_by(|a, b| b.0.total_cmp(&a.0));

        let mut documents: HashMap<String, Option<Document>> = HashMap::new();
        let mut hits = Vec::with_capacity(limit);

        for (similarity, chunk) in scored {
            if hits.len() == limit {
                break;
            }
            if !documents.contains_key(&chunk.document_id) {
                let doc = self.store.get_document(&chunk.document_id).await?;
                documents.insert(chunk.document_id.clone(), doc);
            }
            let Some(Some(document)) = documents.get(&chunk.document_id) else {
                continue;
            };
            hits.push(SearchHit {
                document: document.clone(),
                chunk_index: chunk.chunk_index,
                chunk_text: chunk.text,
                similarity,
            });
        }

        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::is_service_unavailable;
    use crate::models::Link;
    use crate::store::MemoryStore;
    use async_trait::async_trait;

    /// Maps known texts to fixed vectors; anything else fails.
    struct TableProvider(Vec<(&'static str, Vec<f32>)>);

    #[async_trait]
    impl EmbeddingProvider for TableProvider {
        async fn embed(&self, text: &str) -> Result<Vec<f32>> {
            self.0
                .iter()
                .find(|(t, _)| *t == text)
                .map(|(_, v)| v.clone())
                .ok_or_else(|| anyhow::anyhow!("no vector for {:?}", text))
        }
        fn model_name(&self) -> &str {
            "table"
        }
        fn dims(&self) -> usize {
            2
        }
    }

    fn doc(id: &str) -> Document {
        Document {
            id: id.to_string(),
            path: format!("{}.md", id),
            title: id.to_string(),
            content: String::new(),
            rendered: String::new(),
            revision: None,
            category: None,
            subcategory: None,
            content_hash: String::new(),
            updated_at: 0,
        }
    }

    /// Unit vector at `sim` cosine from the query direction (1, 0).
    fn at(sim: f32) -> Vec<f32> {
        vec![sim, (1.0 - sim * sim).sqrt()]
    }

    async fn store_with_docs(ids: &[&str]) -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        for id in ids {
            store.write_document(&doc(id), &[] as &[Link]).await.unwrap();
        }
        store
    }

    #[tokio::test]
    async fn test_search_ranks_by_similarity() {
        let store = store_with_docs(&["a", "b", "c"]).await;
        let provider = TableProvider(vec![
            ("query", vec![1.0, 0.0]),
            ("alpha", at(0.9)),
            ("beta", at(0.5)),
            ("gamma", at(0.95)),
        ]);
        let index = EmbeddingIndex::new(
            store.clone(),
            Some(Arc::new(provider)),
            ChunkingConfig::default(),
        );
        index.reindex("a", "alpha").await.unwrap();
        index.reindex("b", "beta").await.unwrap();
        index.reindex("c", "gamma").await.unwrap();

        let hits = index.search("query", 2).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].chunk_text, "gamma");
        assert_eq!(hits[1].chunk_text, "alpha");
        assert!((hits[0].similarity - 0.95).abs() < 1e-5);
        assert_eq!(hits[1].document.id, "a");
    }

    #[tokio::test]
    async fn test_ties_keep_insertion_order() {
        let store = store_with_docs(&["first", "second"]).await;
        let provider = TableProvider(vec![
            ("query", vec![1.0, 0.0]),
            ("one", at(0.7)),
            ("two", at(0.7)),
        ]);
        let index = EmbeddingIndex::new(
            store.clone(),
            Some(Arc::new(provider)),
            ChunkingConfig::default(),
        );
        index.reindex("first", "one").await.unwrap();
        index.reindex("second", "two").await.unwrap();

        let hits = index.search("query", 5).await.unwrap();
        let ids: Vec<&str> = hits.iter().map(|h| h.document.id.as_str()).collect();
        assert_eq!(ids, vec!["first", "second"]);
    }

    #[tokio::test]
    async fn test_failed_reindex_keeps_previous_chunks() {
        let store = store_with_docs(&["a"]).await;
        let provider = TableProvider(vec![("kept", at(0.3))]);
        let index = EmbeddingIndex::new(
            store.clone(),
            Some(Arc::new(provider)),
            ChunkingConfig::default(),
        );
        assert_eq!(index.reindex("a", "kept").await.unwrap(), 1);

        let err = index.reindex("a", "unknown text").await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<IndexError>(),
            Some(IndexError::Provider { chunk_index: 0, .. })
        ));

        let chunks = store.chunks_for("a").await.unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "kept");
    }

    #[tokio::test]
    async fn test_without_provider_is_unavailable() {
        let store = store_with_docs(&["a"]).await;
        let index = EmbeddingIndex::new(store, None, ChunkingConfig::default());

        let err = index.search("anything", 3).await.unwrap_err();
        assert!(is_service_unavailable(&err));
        let err = index.reindex("a", "text").await.unwrap_err();
        assert!(is_service_unavailable(&err));
    }

    #[tokio::test]
    async fn test_empty_document_clears_chunks() {
        let store = store_with_docs(&["a"]).await;
        let provider = TableProvider(vec![("body", at(0.1))]);
        let index = EmbeddingIndex::new(
            store.clone(),
            Some(Arc::new(provider)),
            ChunkingConfig::default(),
        );
        index.reindex("a", "body").await.unwrap();
        assert_eq!(index.reindex("a", "").await.unwrap(), 0);
        assert!(store.chunks_for("a").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_nan_similarity_ranks_last() {
        let store = store_with_docs(&["bad", "good", "other"]).await;
        let provider = TableProvider(vec![
            ("query", vec![1.0, 0.0]),
            ("broken", vec![f32::NAN, 1.0]),
            ("fine", at(0.8)),
            ("meh", at(0.2)),
        ]);
        let index = EmbeddingIndex::new(
            store.clone(),
            Some(Arc::new(provider)),
            ChunkingConfig::default(),
        );
        index.reindex("bad", "broken").await.unwrap();
        index.reindex("good", "fine").await.unwrap();
        index.reindex("other", "meh").await.unwrap();

        let hits = index.search("query", 3).await.unwrap();
        let ids: Vec<&str> = hits.iter().map(|h| h.document.id.as_str()).collect();
        assert_eq!(ids, vec!["good", "other", "bad"]);
    }
}
