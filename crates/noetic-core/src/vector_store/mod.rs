//! Vector store seam.
//!
//! `VectorStore` is one of the three pluggable engines behind
//! `MemorySubstrate` (alongside `GraphStore` and `KVStore`). Every document
//! is keyed by the same canonical `uuid` minted by `IdentityMint` — the
//! shared-id invariant that ties a vector-store document to its graph node.
//! This module ships a reference SQLite-backed implementation so the crate
//! is testable standalone; swapping engines means implementing this trait.

pub mod sqlite;

pub use sqlite::SqliteVectorStore;

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::embeddings::Embedding;
use crate::error::Result;

/// One of the embedding kinds an entity may carry: `summary`, `key_points`,
/// `context`, or `holistic` (Reflect-only).
pub type EmbeddingKind = &'static str;

pub const KIND_SUMMARY: EmbeddingKind = "summary";
pub const KIND_KEY_POINTS: EmbeddingKind = "key_points";
pub const KIND_CONTEXT: EmbeddingKind = "context";
pub const KIND_HOLISTIC: EmbeddingKind = "holistic";

/// A semantic-search hit.
#[derive(Debug, Clone)]
pub struct SearchResult {
    pub id: Uuid,
    pub kind: String,
    pub score: f32,
    pub metadata: JsonValue,
}

/// Pluggable vector-store engine.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Insert or replace the embedding of `kind` for entity `id`.
    async fn put(
        &self,
        id: Uuid,
        kind: EmbeddingKind,
        embedding: &Embedding,
        metadata: JsonValue,
    ) -> Result<()>;

    /// Top-`limit` nearest neighbors by cosine similarity, optionally
    /// restricted to one embedding kind.
    async fn search(
        &self,
        query: &Embedding,
        limit: usize,
        kind: Option<EmbeddingKind>,
    ) -> Result<Vec<SearchResult>>;

    /// Direct lookup of one `(id, kind)` document, bypassing similarity
    /// ranking. Used by `MemorySubstrate::Hydrate` to reconstruct a record's
    /// exact stored embeddings rather than its nearest neighbors.
    async fn get(&self, id: Uuid, kind: EmbeddingKind) -> Result<Option<Embedding>>;

    /// Remove every embedding stored for `id`, across all kinds.
    async fn delete(&self, id: Uuid) -> Result<()>;

    /// Total number of stored (id, kind) documents.
    async fn count(&self) -> Result<usize>;

    /// Every distinct entity `id` currently stored, used by
    /// `MemorySubstrate::ReconcileTick` to check the shared-id invariant
    /// against the graph store.
    async fn all_ids(&self) -> Result<Vec<Uuid>>;
}
