//! `MemorySubstrate`: the facade over `GraphStore`, `VectorStore`,
//! and `KVStore` that is the only thing allowed to touch those engines
//! directly. Exposes `Put`, `Link`, `GetByID`, `SemanticSearch`,
//! `GraphQuery`, `Hydrate`, `ReconcileTick`, and owns enforcement of the
//! shared-id invariant: every vector document's id must correspond to a
//! graph node with the same id.

use std::sync::Arc;

use serde_json::json;
use uuid::Uuid;

use crate::audit::AuditEvent;
use crate::audit_journal::AuditJournal;
use crate::embeddings::PhaseEmbeddings;
use crate::error::Result;
use crate::graph_store::{Direction, GraphEdge, GraphNode, GraphStore};
use crate::identity::IdentityMint;
use crate::kv_store::KVStore;
use crate::vector_store::{
    EmbeddingKind, SearchResult, VectorStore, KIND_CONTEXT, KIND_HOLISTIC, KIND_KEY_POINTS, KIND_SUMMARY,
};

/// A node plus every embedding currently stored for it, as returned by
/// `Hydrate`.
#[derive(Debug, Clone)]
pub struct HydratedRecord {
    pub node: GraphNode,
    pub embeddings: PhaseEmbeddings,
}

pub struct MemorySubstrate {
    graph: Arc<dyn GraphStore>,
    vectors: Arc<dyn VectorStore>,
    kv: Arc<dyn KVStore>,
    mint: IdentityMint,
    audit: Option<Arc<AuditJournal>>,
}

impl MemorySubstrate {
    pub fn new(
        graph: Arc<dyn GraphStore>,
        vectors: Arc<dyn VectorStore>,
        kv: Arc<dyn KVStore>,
        mint: IdentityMint,
        audit: Option<Arc<AuditJournal>>,
    ) -> Self {
        Self {
            graph,
            vectors,
            kv,
            mint,
            audit,
        }
    }

    pub fn kv(&self) -> &Arc<dyn KVStore> {
        &self.kv
    }

    /// Write a node and, if supplied, its phase embeddings. Graph-first,
    /// vector-second: the node (the shared-id anchor) must exist before any
    /// vector document referencing it is written. If a vector write fails
    /// after the graph write succeeded, the failure is surfaced to the
    /// caller rather than silently swallowed — the phase that called `Put`
    /// is responsible for treating this as a fatal, compensable write; a
    /// subsequent `ReconcileTick` will also catch the resulting shared-id
    /// mismatch if the caller can't compensate immediately.
    pub async fn put(&self, node: GraphNode, embeddings: Option<PhaseEmbeddings>) -> Result<()> {
        let id = node.id;
        let kind = node.kind.clone();
        self.graph.put_node(node).await?;

        if let Some(embeddings) = embeddings {
            self.put_embeddings(id, &embeddings).await?;
        }

        if let Some(audit) = &self.audit {
            audit
                .emit("memory_substrate", "put", Some(id), json!({"kind": kind}))
                .await?;
        }
        Ok(())
    }

    async fn put_embeddings(&self, id: Uuid, embeddings: &PhaseEmbeddings) -> Result<()> {
        let slots: [(EmbeddingKind, &Option<Vec<f32>>); 4] = [
            (KIND_SUMMARY, &embeddings.summary),
            (KIND_KEY_POINTS, &embeddings.key_points),
            (KIND_CONTEXT, &embeddings.context),
            (KIND_HOLISTIC, &embeddings.holistic),
        ];
        for (kind, vector) in slots {
            if let Some(vector) = vector {
                self.vectors.put(id, kind, vector, json!({})).await?;
            }
        }
        Ok(())
    }

    /// Create a directed relationship between two existing entities.
    pub async fn link(&self, from: Uuid, relation: &str, to: Uuid) -> Result<()> {
        self.graph.link(from, relation, to).await
    }

    /// Fetch an entity's graph node by id.
    pub async fn get_by_id(&self, id: Uuid) -> Result<Option<GraphNode>> {
        self.graph.get_node(id).await
    }

    /// Nearest-neighbor search over a single embedding kind (or all kinds if
    /// `kind` is `None`).
    pub async fn semantic_search(
        &self,
        query: &[f32],
        limit: usize,
        kind: Option<EmbeddingKind>,
    ) -> Result<Vec<SearchResult>> {
        self.vectors.search(&query.to_vec(), limit, kind).await
    }

    /// Traverse relationships incident to `id`.
    pub async fn graph_query(
        &self,
        id: Uuid,
        relation: Option<&str>,
        direction: Direction,
    ) -> Result<Vec<GraphEdge>> {
        self.graph.query_edges(id, relation, direction).await
    }

    /// Reconstruct the full record for `id`: its graph node plus whichever
    /// embeddings are currently stored for it.
    pub async fn hydrate(&self, id: Uuid) -> Result<Option<HydratedRecord>> {
        let node = match self.graph.get_node(id).await? {
            Some(node) => node,
            None => return Ok(None),
        };

        let embeddings = PhaseEmbeddings {
            summary: self.vectors.get(id, KIND_SUMMARY).await?,
            key_points: self.vectors.get(id, KIND_KEY_POINTS).await?,
            context: self.vectors.get(id, KIND_CONTEXT).await?,
            holistic: self.vectors.get(id, KIND_HOLISTIC).await?,
        };

        Ok(Some(HydratedRecord { node, embeddings }))
    }

    /// Check the shared-id invariant between graph and vector stores,
    /// emitting one `AuditEvent` per mismatch found. Returns the events
    /// raised so the caller (typically `Watchdog`) can decide how to react.
    pub async fn reconcile_tick(&self) -> Result<Vec<AuditEvent>> {
        let graph_ids: std::collections::HashSet<Uuid> =
            self.graph.all_ids().await?.into_iter().collect();
        let vector_ids: std::collections::HashSet<Uuid> =
            self.vectors.all_ids().await?.into_iter().collect();

        let mut events = Vec::new();

        for id in vector_ids.difference(&graph_ids) {
            events.push(AuditEvent::new(
                self.mint.mint("audit_event", None),
                "memory_substrate",
                "shared_id_mismatch",
                Some(*id),
                json!({"present_in": "vector_store", "missing_from": "graph_store"}),
            ));
        }
        for id in graph_ids.difference(&vector_ids) {
            events.push(AuditEvent::new(
                self.mint.mint("audit_event", None),
                "memory_substrate",
                "shared_id_mismatch",
                Some(*id),
                json!({"present_in": "graph_store", "missing_from": "vector_store"}),
            ));
        }
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::PhaseEmbeddings;
    use crate::graph_store::SqliteGraphStore;
    use crate::kv_store::SqliteKVStore;
    use crate::vector_store::SqliteVectorStore;

    fn substrate() -> MemorySubstrate {
        MemorySubstrate::new(
            Arc::new(SqliteGraphStore::new_in_memory().unwrap()),
            Arc::new(SqliteVectorStore::new_in_memory().unwrap()),
            Arc::new(SqliteKVStore::new_in_memory().unwrap()),
            IdentityMint::deterministic(),
            None,
        )
    }

    #[tokio::test]
    async fn put_emits_an_audit_event() {
        let graph: Arc<dyn GraphStore> = Arc::new(SqliteGraphStore::new_in_memory().unwrap());
        let audit = Arc::new(AuditJournal::new(graph.clone(), IdentityMint::deterministic()));
        let substrate = MemorySubstrate::new(
            graph,
            Arc::new(SqliteVectorStore::new_in_memory().unwrap()),
            Arc::new(SqliteKVStore::new_in_memory().unwrap()),
            IdentityMint::deterministic(),
            Some(audit.clone()),
        );
        let mut rx = audit.subscribe();
        let id = Uuid::new_v4();
        substrate
            .put(GraphNode::new(id, "concept", json!({}), false), None)
            .await
            .unwrap();

        let event = rx.recv().await.unwrap();
        assert_eq!(event.actor, "memory_substrate");
        assert_eq!(event.kind, "put");
        assert_eq!(event.target_uuid, Some(id));
    }

    #[tokio::test]
    async fn put_then_get_by_id_round_trips_the_node() {
        let substrate = substrate();
        let id = Uuid::new_v4();
        let node = GraphNode::new(id, "concept", json!({"name": "retry-policy"}), false);
        substrate.put(node.clone(), None).await.unwrap();

        let fetched = substrate.get_by_id(id).await.unwrap().unwrap();
        assert_eq!(fetched.payload, node.payload);
    }

    #[tokio::test]
    async fn hydrate_recovers_node_and_embeddings() {
        let substrate = substrate();
        let id = Uuid::new_v4();
        let node = GraphNode::new(id, "perception", json!({}), false);
        let embeddings = PhaseEmbeddings {
            summary: Some(vec![0.1, 0.2]),
            key_points: Some(vec![0.3, 0.4]),
            context: None,
            holistic: None,
        };
        substrate.put(node, Some(embeddings)).await.unwrap();

        let hydrated = substrate.hydrate(id).await.unwrap().unwrap();
        assert_eq!(hydrated.embeddings.summary, Some(vec![0.1, 0.2]));
        assert_eq!(hydrated.embeddings.context, None);
    }

    #[tokio::test]
    async fn hydrate_returns_none_for_unknown_id() {
        let substrate = substrate();
        assert!(substrate.hydrate(Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn reconcile_tick_flags_vector_only_documents() {
        let substrate = substrate();
        let id = Uuid::new_v4();
        // Bypass `put` to simulate a compensation failure: write the vector
        // document without its graph anchor.
        substrate
            .vectors
            .put(id, crate::vector_store::KIND_SUMMARY, &vec![0.1], json!({}))
            .await
            .unwrap();

        let events = substrate.reconcile_tick().await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, "shared_id_mismatch");
        assert_eq!(events[0].target_uuid, Some(id));
    }

    #[tokio::test]
    async fn reconcile_tick_is_clean_when_stores_agree() {
        let substrate = substrate();
        let id = Uuid::new_v4();
        let node = GraphNode::new(id, "concept", json!({}), false);
        let embeddings = PhaseEmbeddings {
            summary: Some(vec![0.1]),
            key_points: None,
            context: None,
            holistic: None,
        };
        substrate.put(node, Some(embeddings)).await.unwrap();

        assert!(substrate.reconcile_tick().await.unwrap().is_empty());
    }
}
