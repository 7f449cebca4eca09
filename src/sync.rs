//! Sync engine: reconciles repository files with the store.
//!
//! # Full sync
//!
//! [`SyncEngine::sync_all`] runs in two phases. Phase 1 reads every
//! document's title and makes sure a row exists for its path, building a
//! [`LinkMap`] over the whole corpus. Phase 2 re-reads each file, resolves
//! its links against that complete map, and writes content, rendered HTML
//! and links. Forward references therefore resolve regardless of visit
//! order. A file that fails in either phase is logged and counted; the rest
//! of the batch continues.
//!
//! # Incremental sync
//!
//! [`SyncEngine::sync_one`] and [`SyncEngine::save`] resolve links against
//! the document itself plus an optional caller-supplied seed. A link to a
//! document created since the last full sync stays missing until the
//! linking document is synced again with a map that knows the target.
//!
//! # Writers
//!
//! All writes to one path are serialised by a per-path async mutex, and
//! the store writes a document together with its links. Concurrent syncs
//! of one path always leave exactly one writer's output.
//!
//! Re-embedding goes through the [`EmbedQueue`] and is only requested when
//! the content hash changed or the stored chunks do not match the current
//! content, which covers documents never embedded and failed reindexes.

use anyhow::{anyhow, Context, Result};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use crate::chunk::chunk_text;
use crate::config::Config;
use crate::embedding::{create_provider, EmbeddingProvider};
use crate::index::EmbeddingIndex;
use crate::jobs::{EmbedQueue, JobHandle};
use crate::links::{resolve, LinkMap};
use crate::markdown::parse_document;
use crate::models::{DocRef, Document, Link, SearchHit, StoreStats};
use crate::scan::{scan_repository, validate_path, PathFilter};
use crate::store::{SqliteStore, Store};
use crate::vcs::{open_vcs, VersionControl};

/// Outcome of a full sync.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub synced: usize,
    pub failed: usize,
}

/// SHA-256 of a document body, hex encoded.
pub fn content_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Lazily created async mutex per document path.
#[derive(Default)]
struct PathLocks {
    locks: StdMutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl PathLocks {
    async fn acquire(&self, path: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            // Drop entries nobody holds or waits on.
            locks.retain(|_, l| Arc::strong_count(l) > 1);
            locks
                .entry(path.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }
}

/// Where link targets are looked up during one document sync.
enum Lookup<'a> {
    /// Complete corpus map from phase 1 of a full sync.
    Corpus(&'a LinkMap),
    /// Caller seed; the document's own entry is added before resolving.
    Seeded(LinkMap),
}

pub struct SyncEngine {
    config: Config,
    root: PathBuf,
    store: Arc<dyn Store>,
    index: Arc<EmbeddingIndex>,
    queue: EmbedQueue,
    vcs: Arc<dyn VersionControl>,
    filter: PathFilter,
    locks: PathLocks,
}

impl SyncEngine {
    /// Build an engine on the configured SQLite store, embedding provider
    /// and version control.
    pub async fn open(config: Config) -> Result<Self> {
        config.validate()?;
        let store: Arc<dyn Store> = Arc::new(SqliteStore::open(&config).await?);
        let provider = create_provider(&config.embedding)?;
        let vcs = open_vcs(&config);
        Self::with_parts(config, store, provider, vcs)
    }

    /// Build an engine from explicit collaborators. Spawns the embedding
    /// worker, so it must run inside a tokio runtime.
    pub fn with_parts(
        config: Config,
        store: Arc<dyn Store>,
        provider: Option<Arc<dyn EmbeddingProvider>>,
        vcs: Arc<dyn VersionControl>,
    ) -> Result<Self> {
        let filter = PathFilter::new(&config.repo)?;
        let index = Arc::new(EmbeddingIndex::new(
            store.clone(),
            provider,
            config.chunking.clone(),
        ));
        let queue = EmbedQueue::spawn(index.clone());

        Ok(Self {
            root: config.repo.root.clone(),
            config,
            store,
            index,
            queue,
            vcs,
            filter,
            locks: PathLocks::default(),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn filter(&self) -> &PathFilter {
        &self.filter
    }

    /// Wait for every queued re-embedding to finish.
    pub async fn wait_idle(&self) {
        self.queue.wait_idle().await;
    }

    /// Two-phase sync of every document in the repository.
    pub async fn sync_all(&self) -> Result<SyncReport> {
        let scan = scan_repository(&self.config.repo, &self.filter)?;
        tracing::info!(
            root = %self.root.display(),
            files = scan.paths.len(),
            skipped = scan.skipped,
            "full sync started"
        );

        // Unreadable entries count as failures; the rest of the batch goes on.
        let mut report = SyncReport {
            synced: 0,
            failed: scan.skipped,
        };

        // Phase 1: a row and a map entry for every file.
        let mut map = LinkMap::new();
        let mut ready = Vec::with_capacity(scan.paths.len());
        for path in scan.paths {
            match self.ensure_stub(&path).await {
                Ok(doc_ref) => {
                    map.insert(doc_ref);
                    ready.push(path);
                }
                Err(e) => {
                    tracing::warn!(path = %path, error = %format!("{:#}", e), "skipping file");
                    report.failed += 1;
                }
            }
        }

        // Phase 2: content, links and rendering against the complete map.
        for path in &ready {
            let _guard = self.locks.acquire(path).await;
            match self.sync_locked(path, None, Lookup::Corpus(&map)).await {
                Ok(_) => report.synced += 1,
                Err(e) => {
                    tracing::warn!(path = %path, error = %format!("{:#}", e), "sync failed");
                    report.failed += 1;
                }
            }
        }

        tracing::info!(
            synced = report.synced,
            failed = report.failed,
            "full sync finished"
        );
        Ok(report)
    }

    /// Incremental sync of one path. `content` overrides the file on disk.
    pub async fn sync_one(&self, path: &str, content: Option<String>) -> Result<Document> {
        self.sync_one_seeded(path, content, LinkMap::new()).await
    }

    /// Incremental sync resolving against `seed` plus the document itself.
    pub async fn sync_one_seeded(
        &self,
        path: &str,
        content: Option<String>,
        seed: LinkMap,
    ) -> Result<Document> {
        validate_path(path, &self.filter)?;
        let _guard = self.locks.acquire(path).await;
        self.sync_locked(path, content, Lookup::Seeded(seed)).await
    }

    /// Write `content` to `path`, commit it, and sync it.
    ///
    /// The commit is best-effort: a failure is logged and the save goes on.
    pub async fn save(&self, path: &str, content: &str) -> Result<Document> {
        validate_path(path, &self.filter)?;
        let _guard = self.locks.acquire(path).await;

        let full_path = self.root.join(path);
        if let Some(parent) = full_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }
        tokio::fs::write(&full_path, content)
            .await
            .with_context(|| format!("Failed to write file: {}", full_path.display()))?;

        match self.vcs.commit(path, &format!("Update {}", path)).await {
            Ok(Some(sha)) => tracing::debug!(path, commit = %sha, "committed"),
            Ok(None) => {}
            Err(e) => tracing::warn!(path, error = %format!("{:#}", e), "commit failed"),
        }

        self.sync_locked(path, Some(content.to_string()), Lookup::Seeded(LinkMap::new()))
            .await
    }

    /// Delete a document by id. Links and chunks go with it; other
    /// documents' links to it are left as they are.
    pub async fn delete(&self, id: &str) -> Result<bool> {
        let deleted = self.store.delete_document(id).await?;
        if deleted {
            tracing::info!(id, "document deleted");
        }
        Ok(deleted)
    }

    /// Delete the document stored for `path`, if any.
    pub async fn delete_path(&self, path: &str) -> Result<bool> {
        let _guard = self.locks.acquire(path).await;
        let deleted = self.store.delete_document_by_path(path).await?;
        if deleted {
            tracing::info!(path, "document deleted");
        }
        Ok(deleted)
    }

    /// Tag a document with a category and subcategory. Syncs leave these
    /// untouched, so the values stay until the next call.
    pub async fn set_category(
        &self,
        id: &str,
        category: Option<&str>,
        subcategory: Option<&str>,
    ) -> Result<bool> {
        self.store.set_category(id, category, subcategory).await
    }

    pub async fn get(&self, id: &str) -> Result<Option<Document>> {
        self.store.get_document(id).await
    }

    pub async fn get_by_path(&self, path: &str) -> Result<Option<Document>> {
        self.store.get_document_by_path(path).await
    }

    /// Links pointing at the document.
    pub async fn backlinks(&self, id: &str) -> Result<Vec<Link>> {
        self.store.links_to(id).await
    }

    pub async fn outgoing(&self, id: &str) -> Result<Vec<Link>> {
        self.store.links_from(id).await
    }

    pub async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>> {
        self.index.search(query, limit).await
    }

    pub async fn stats(&self) -> Result<StoreStats> {
        self.store.stats().await
    }

    /// Queue a re-embedding of a stored document regardless of its hash.
    pub async fn reembed(&self, id: &str) -> Result<JobHandle> {
        let doc = self
            .store
            .get_document(id)
            .await?
            .ok_or_else(|| anyhow!("Document not found: {}", id))?;
        Ok(self.queue.enqueue(&doc.id, &doc.content))
    }

    async fn read_file(&self, path: &str) -> Result<String> {
        let full_path = self.root.join(path);
        tokio::fs::read_to_string(&full_path)
            .await
            .with_context(|| format!("Failed to read file: {}", full_path.display()))
    }

    async fn ensure_stub(&self, path: &str) -> Result<DocRef> {
        let raw = self.read_file(path).await?;
        let title = parse_document(path, &raw).title;
        let _guard = self.locks.acquire(path).await;
        let id = self.store.ensure_stub(path, &title).await?;
        Ok(DocRef {
            id,
            path: path.to_string(),
            title,
        })
    }

    /// True when the content hash moved, or the stored chunks are not the
    /// chunking of the current content (never embedded, or an earlier
    /// reindex failed).
    async fn needs_embedding(
        &self,
        previous: Option<&Document>,
        doc: &Document,
        stored_id: &str,
    ) -> Result<bool> {
        if !previous.is_some_and(|p| p.content_hash == doc.content_hash) {
            return Ok(true);
        }
        let stored = self.store.chunks_for(stored_id).await?;
        let expected = chunk_text(&doc.content, &self.config.chunking);
        Ok(stored.len() != expected.len()
            || stored.iter().zip(&expected).any(|(s, e)| s.text != e.text))
    }

    /// Sync one path. The caller holds the path lock.
    async fn sync_locked(
        &self,
        path: &str,
        content: Option<String>,
        lookup: Lookup<'_>,
    ) -> Result<Document> {
        let raw = match content {
            Some(content) => content,
            None => self.read_file(path).await?,
        };
        let parsed = parse_document(path, &raw);

        let existing = self.store.get_document_by_path(path).await?;
        let id = existing
            .as_ref()
            .map(|d| d.id.clone())
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let seeded;
        let map = match lookup {
            Lookup::Corpus(map) => map,
            Lookup::Seeded(mut seed) => {
                seed.insert(DocRef {
                    id: id.clone(),
                    path: path.to_string(),
                    title: parsed.title.clone(),
                });
                seeded = seed;
                &seeded
            }
        };

        let resolution = resolve(&parsed.content, map, &self.config.render.base_url);
        let hash = content_hash(&parsed.content);

        let doc = Document {
            id,
            path: path.to_string(),
            title: parsed.title,
            rendered: resolution.html.clone(),
            revision: self.vcs.revision(path).await,
            category: existing.as_ref().and_then(|d| d.category.clone()),
            subcategory: existing.as_ref().and_then(|d| d.subcategory.clone()),
            content_hash: hash,
            updated_at: chrono::Utc::now().timestamp(),
            content: parsed.content,
        };
        let links = resolution.to_links(&doc.id);
        let stored_id = self.store.write_document(&doc, &links).await?;

        if self.index.is_available()
            && self
                .needs_embedding(existing.as_ref(), &doc, &stored_id)
                .await?
        {
            self.queue.enqueue(&stored_id, &doc.content);
        }

        tracing::debug!(
            path,
            id = %stored_id,
            links = links.len(),
            missing = links.iter().filter(|l| l.is_missing()).count(),
            "document synced"
        );

        self.store
            .get_document(&stored_id)
            .await?
            .ok_or_else(|| anyhow!("Document vanished while syncing: {}", path))
    }
}
