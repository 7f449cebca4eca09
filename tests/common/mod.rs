#![allow(dead_code)]

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

use wikidex::config::Config;
use wikidex::embedding::EmbeddingProvider;
use wikidex::store::{SqliteStore, Store};
use wikidex::sync::SyncEngine;
use wikidex::vcs::NoVcs;

pub const DIMS: usize = 32;

/// Bag-of-words vectors: each lowercased word bumps one FNV-hashed bucket.
/// Texts sharing words point in similar directions.
pub struct WordHashProvider;

pub fn word_vector(text: &str) -> Vec<f32> {
    let mut v = vec![0.0f32; DIMS];
    for word in text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
    {
        let mut hash: u64 = 0xcbf29ce484222325;
        for b in word.to_lowercase().bytes() {
            hash ^= b as u64;
            hash = hash.wrapping_mul(0x100000001b3);
        }
        v[(hash % DIMS as u64) as usize] += 1.0;
    }
    v
}

#[async_trait]
impl EmbeddingProvider for WordHashProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(word_vector(text))
    }
    fn model_name(&self) -> &str {
        "word-hash"
    }
    fn dims(&self) -> usize {
        DIMS
    }
}

/// [`WordHashProvider`] that can be told to fail every call.
#[derive(Default)]
pub struct SwitchProvider {
    pub failing: AtomicBool,
}

impl SwitchProvider {
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl EmbeddingProvider for SwitchProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if self.failing.load(Ordering::SeqCst) {
            bail!("provider offline");
        }
        Ok(word_vector(text))
    }
    fn model_name(&self) -> &str {
        "switch"
    }
    fn dims(&self) -> usize {
        DIMS
    }
}

pub struct TestWiki {
    pub tmp: TempDir,
    pub root: PathBuf,
    pub config: Config,
}

impl TestWiki {
    pub fn new() -> Self {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("wiki");
        std::fs::create_dir_all(&root).unwrap();
        let config = Config::for_repo(&root, tmp.path().join("data/wikidex.sqlite"));
        Self { tmp, root, config }
    }

    pub fn write(&self, path: &str, content: impl AsRef<[u8]>) {
        let full = self.root.join(path);
        if let Some(parent) = full.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(full, content).unwrap();
    }

    pub fn remove(&self, path: &str) {
        std::fs::remove_file(self.root.join(path)).unwrap();
    }

    pub fn path(&self, path: &str) -> PathBuf {
        self.root.join(path)
    }

    pub async fn engine(&self, provider: Option<Arc<dyn EmbeddingProvider>>) -> SyncEngine {
        let store: Arc<dyn Store> = Arc::new(SqliteStore::open(&self.config).await.unwrap());
        SyncEngine::with_parts(self.config.clone(), store, provider, Arc::new(NoVcs)).unwrap()
    }
}
