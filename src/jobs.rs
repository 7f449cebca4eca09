//! Background embedding queue.
//!
//! Reindexing calls the embedding provider once per chunk, which is far
//! slower than a document write. The sync engine therefore hands reindex
//! work to an [`EmbedQueue`]: a single tokio task that drains jobs in
//! submission order. Each job reports through a [`JobHandle`] so callers
//! that care (tests, the CLI) can wait for completion.
//!
//! Failures are logged at `warn` and recorded on the handle. They never
//! propagate into the sync that queued the job.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::index::EmbeddingIndex;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobStatus {
    Pending,
    Complete { chunks: usize },
    Failed(String),
}

impl JobStatus {
    pub fn is_finished(&self) -> bool {
        !matches!(self, JobStatus::Pending)
    }
}

/// Tracks one queued reindex.
#[derive(Debug, Clone)]
pub struct JobHandle {
    pub document_id: String,
    status: watch::Receiver<JobStatus>,
}

impl JobHandle {
    pub fn status(&self) -> JobStatus {
        self.status.borrow().clone()
    }

    /// Wait until the job has finished and return its final status.
    pub async fn wait(mut self) -> JobStatus {
        let status = match self.status.wait_for(JobStatus::is_finished).await {
            Ok(status) => status.clone(),
            Err(_) => JobStatus::Failed("embedding worker stopped".to_string()),
        };
        status
    }
}

struct Job {
    document_id: String,
    text: String,
    status: watch::Sender<JobStatus>,
}

pub struct EmbedQueue {
    tx: mpsc::UnboundedSender<Job>,
    outstanding: Arc<watch::Sender<usize>>,
    worker: JoinHandle<()>,
}

impl EmbedQueue {
    /// Start the worker task. Must be called inside a tokio runtime.
    pub fn spawn(index: Arc<EmbeddingIndex>) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Job>();
        let outstanding = Arc::new(watch::Sender::new(0usize));
        let counter = outstanding.clone();

        let worker = tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                let status = match index.reindex(&job.document_id, &job.text).await {
                    Ok(chunks) => JobStatus::Complete { chunks },
                    Err(e) => {
                        tracing::warn!(
                            document_id = %job.document_id,
                            error = %format!("{:#}", e),
                            "reindex failed"
                        );
                        JobStatus::Failed(format!("{:#}", e))
                    }
                };
                job.status.send_replace(status);
                counter.send_modify(|n| *n = n.saturating_sub(1));
            }
        });

        Self {
            tx,
            outstanding,
            worker,
        }
    }

    /// Queue a reindex of `document_id` from `text`.
    pub fn enqueue(&self, document_id: &str, text: &str) -> JobHandle {
        let (status_tx, status_rx) = watch::channel(JobStatus::Pending);
        self.outstanding.send_modify(|n| *n += 1);

        let job = Job {
            document_id: document_id.to_string(),
            text: text.to_string(),
            status: status_tx,
        };
        if let Err(mpsc::error::SendError(job)) = self.tx.send(job) {
            job.status
                .send_replace(JobStatus::Failed("embedding worker stopped".to_string()));
            self.outstanding.send_modify(|n| *n = n.saturating_sub(1));
        }

        JobHandle {
            document_id: document_id.to_string(),
            status: status_rx,
        }
    }

    /// Number of jobs queued or running.
    pub fn pending(&self) -> usize {
        *self.outstanding.borrow()
    }

    /// Wait until every job queued so far has finished.
    pub async fn wait_idle(&self) {
        let mut rx = self.outstanding.subscribe();
        let _ = rx.wait_for(|n| *n == 0).await;
    }
}

impl Drop for EmbedQueue {
    fn drop(&mut self) {
        self.worker.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ChunkingConfig;
    use crate::embedding::EmbeddingProvider;
    use crate::models::Document;
    use crate::store::{MemoryStore, Store};
    use anyhow::Result;
    use async_trait::async_trait;

    struct LengthProvider;

    #[async_trait]
    impl EmbeddingProvider for LengthProvider {
        async fn embed(&self, text: &str) -> Result<Vec<f32>> {
            if text.contains("fail") {
                anyhow::bail!("refusing to embed");
            }
            Ok(vec![text.len() as f32, 1.0])
        }
        fn model_name(&self) -> &str {
            "length"
        }
        fn dims(&self) -> usize {
            2
        }
    }

    async fn queue_with_doc(id: &str) -> (EmbedQueue, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        store
            .write_document(
                &Document {
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
                },
                &[],
            )
            .await
            .unwrap();
        let index = EmbeddingIndex::new(
            store.clone(),
            Some(Arc::new(LengthProvider)),
            ChunkingConfig::default(),
        );
        (EmbedQueue::spawn(Arc::new(index)), store)
    }

    #[tokio::test]
    async fn test_job_completes() {
        let (queue, store) = queue_with_doc("a").await;
        let handle = queue.enqueue("a", "some text to embed");
        assert_eq!(handle.clone().wait().await, JobStatus::Complete { chunks: 1 });
        assert_eq!(store.chunks_for("a").await.unwrap().len(), 1);
        assert_eq!(queue.pending(), 0);
    }

    #[tokio::test]
    async fn test_failed_job_reports_error() {
        let (queue, _store) = queue_with_doc("a").await;
        let status = queue.enqueue("a", "this will fail").wait().await;
        assert!(matches!(status, JobStatus::Failed(ref msg) if msg.contains("refusing")));
    }

    #[tokio::test]
    async fn test_wait_idle_drains_queue() {
        let (queue, store) = queue_with_doc("a").await;
        queue.enqueue("a", "first");
        queue.enqueue("a", "second version");
        queue.wait_idle().await;

        let chunks = store.chunks_for("a").await.unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "second version");
    }
}
