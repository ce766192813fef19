//! Error taxonomy for the search core.
//!
//! `CacheMiss` is deliberately absent: a cache miss is represented by
//! `Option::None`, not an error (see `cache::Cache::get`).

use std::fmt;

/// Policy for how the cascade engine reacts to an embedding provider
/// failure: propagate it, or log and skip the semantic stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProviderErrorPolicy {
    Fail,
    #[default]
    Skip,
}

impl fmt::Display for ProviderErrorPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderErrorPolicy::Fail => write!(f, "fail"),
            ProviderErrorPolicy::Skip => write!(f, "skip"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// Post-normalization query has length 0.
    #[error("empty query")]
    EmptyQuery,

    /// Corpus hierarchy traversal detected a back-edge.
    #[error("corpus hierarchy contains a cycle")]
    CorpusCycle,

    /// A semantic operation was requested before the vector index was built.
    #[error("vector index is not ready")]
    VectorIndexNotReady,

    /// The injected embedding provider failed.
    #[error("embedding provider failed (policy={policy}): {source}")]
    EmbeddingProviderError {
        source: anyhow::Error,
        policy: ProviderErrorPolicy,
    },

    /// Concurrent blob save lost the compare-and-swap race after retries.
    #[error("blob save conflict for resource after retries exhausted")]
    BlobConflict,

    /// L2 write failed; the set operation did not update L1.
    #[error("cache write failed: {0}")]
    CacheWriteFailed(String),

    /// Hash mismatch on blob read.
    #[error("corrupt blob: resource_id={resource_id:?} version={version}")]
    CorruptBlob { resource_id: String, version: u64 },

    /// The cascade returned partial results before a deadline.
    #[error("deadline exceeded, partial results returned")]
    DeadlineExceeded,

    /// Programmer error in configuration; fails fast at startup.
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    /// Wraps persistence-layer errors (redb, bincode, io) that don't map
    /// to a more specific kind above.
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

pub type CoreResult<T> = Result<T, CoreError>;
