//! Typed errors surfaced by the embedding index.
//!
//! Orchestration code passes these around inside [`anyhow::Error`]; callers
//! that need to tell them apart (the HTTP layer mapping to 503) recover them
//! with `downcast_ref::<IndexError>()`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum IndexError {
    /// No embedding provider is configured.
    #[error("embedding service unavailable: {0}")]
    ServiceUnavailable(String),

    /// The provider was reached but failed to embed a text.
    #[error("embedding provider failed on chunk {chunk_index} of document {document_id}")]
    Provider {
        document_id: String,
        chunk_index: usize,
        #[source]
        source: anyhow::Error,
    },

    #[error("embedding provider failed on search query")]
    Query(#[source] anyhow::Error),
}

impl IndexError {
    pub fn is_unavailable(&self) -> bool {
        matches!(self, IndexError::ServiceUnavailable(_))
    }
}

/// True when `err` carries an [`IndexError::ServiceUnavailable`].
pub fn is_service_unavailable(err: &anyhow::Error) -> bool {
    err.downcast_ref::<IndexError>()
        .is_some_and(IndexError::is_unavailable)
}
