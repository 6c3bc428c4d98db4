//! Graph store seam.
//!
//! The second of the three pluggable `MemorySubstrate` engines. Nodes are
//! the permanent entity kinds (`Concept`, `CodeSnapshot`, `Perception`,
//! `ReasoningBranch`, `Action`, `Reflection`, `Pattern`, `AuditEvent`,
//! `IngestionEvent`), each addressed by the same canonical `uuid` as its
//! vector-store counterpart. Edges are the directed relationships:
//! `OBSERVED`, `HAS_BRANCH`, `BASED_ON`, `EXECUTES`, `REFLECTS_ON`,
//! `DISCOVERED`, `PRECEDES`.

pub mod sqlite;

pub use sqlite::SqliteGraphStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::error::Result;

/// Well-known relation names. `GraphStore` implementations treat these as
/// plain strings; this is just the documented vocabulary.
pub mod relations {
    pub const OBSERVED: &str = "OBSERVED";
    pub const HAS_BRANCH: &str = "HAS_BRANCH";
    pub const BASED_ON: &str = "BASED_ON";
    pub const EXECUTES: &str = "EXECUTES";
    pub const REFLECTS_ON: &str = "REFLECTS_ON";
    pub const DISCOVERED: &str = "DISCOVERED";
    pub const PRECEDES: &str = "PRECEDES";
}

/// A node in the graph: one of the permanent entity kinds, serialized as
/// JSON so the store stays schema-agnostic across entity types.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GraphNode {
    pub id: Uuid,
    pub kind: String,
    pub payload: JsonValue,
    pub immutable: bool,
    pub created_at: DateTime<Utc>,
}

impl GraphNode {
    pub fn new(id: Uuid, kind: impl Into<String>, payload: JsonValue, immutable: bool) -> Self {
        Self {
            id,
            kind: kind.into(),
            payload,
            immutable,
            created_at: Utc::now(),
        }
    }
}

/// A directed edge between two nodes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GraphEdge {
    pub from: Uuid,
    pub relation: String,
    pub to: Uuid,
}

/// Direction to traverse when querying edges incident to a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Outgoing,
    Incoming,
}

/// Pluggable graph-store engine.
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Insert a new node, or update an existing mutable one. Attempting to
    /// overwrite a node whose stored `immutable` flag is `true` must fail
    /// with `Error::ImmutableTarget`.
    async fn put_node(&self, node: GraphNode) -> Result<()>;

    /// Fetch a node by id.
    async fn get_node(&self, id: Uuid) -> Result<Option<GraphNode>>;

    /// Create a directed edge. Both endpoints must already exist.
    async fn link(&self, from: Uuid, relation: &str, to: Uuid) -> Result<()>;

    /// Edges incident to `id` in the given direction, optionally filtered to
    /// one relation.
    async fn query_edges(
        &self,
        id: Uuid,
        relation: Option<&str>,
        direction: Direction,
    ) -> Result<Vec<GraphEdge>>;

    /// Every node id currently stored, used by `ReconcileTick` to check the
    /// shared-id invariant against the vector store.
    async fn all_ids(&self) -> Result<Vec<Uuid>>;

    /// Whether `PRECEDES` starting at `from` would eventually reach `to`,
    /// i.e. whether adding `from -PRECEDES-> to` would create a cycle.
    async fn would_cycle(&self, from: Uuid, to: Uuid) -> Result<bool>;
}
