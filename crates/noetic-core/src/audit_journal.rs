//! `AuditJournal`: append-only log of `AuditEvent`s, realized as graph nodes
//! linked to the entities they describe — a node kind like any other,
//! immutable by construction. `Stream(filter)` is realized with a broadcast
//! channel so observers (notably `Watchdog`) can subscribe without polling
//! the store.

use std::sync::Arc;

use serde_json::json;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::audit::AuditEvent;
use crate::error::Result;
use crate::graph_store::{relations, GraphNode, GraphStore};
use crate::identity::IdentityMint;

/// Backlog size for the broadcast channel. Sized generously; a slow observer
/// that falls behind by more than this sees `RecvError::Lagged` and must
/// resubscribe, rather than this unboundedly buffering.
const CHANNEL_CAPACITY: usize = 4096;

/// Filter applied by a `Stream` consumer; `None` fields match anything.
#[derive(Debug, Clone, Default)]
pub struct AuditFilter {
    pub actor: Option<String>,
    pub kind: Option<String>,
}

impl AuditFilter {
    pub fn matches(&self, event: &AuditEvent) -> bool {
        self.actor
            .as_deref()
            .map_or(true, |actor| actor == event.actor)
            && self.kind.as_deref().map_or(true, |kind| kind == event.kind)
    }
}

pub struct AuditJournal {
    graph: Arc<dyn GraphStore>,
    mint: IdentityMint,
    sender: broadcast::Sender<AuditEvent>,
}

impl AuditJournal {
    pub fn new(graph: Arc<dyn GraphStore>, mint: IdentityMint) -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            graph,
            mint,
            sender,
        }
    }

    /// Persist `event` as an immutable graph node and broadcast it to any
    /// subscribers. `target_uuid`, if present, gets an `OBSERVED` edge from
    /// the event to the entity it describes.
    pub async fn record(&self, event: AuditEvent) -> Result<()> {
        let node = GraphNode::new(
            event.id,
            "audit_event",
            json!({
                "timestamp": event.timestamp,
                "actor": event.actor,
                "kind": event.kind,
                "target_uuid": event.target_uuid,
                "payload": event.payload,
            }),
            true,
        );
        self.graph.put_node(node).await?;

        if let Some(target) = event.target_uuid {
            self.graph.link(event.id, relations::OBSERVED, target).await?;
        }

        // No subscribers is not an error: the event is still durably persisted.
        let _ = self.sender.send(event);
        Ok(())
    }

    /// Convenience: mint an id and record a new event in one call.
    pub async fn emit(
        &self,
        actor: impl Into<String>,
        kind: impl Into<String>,
        target_uuid: Option<Uuid>,
        payload: serde_json::Value,
    ) -> Result<()> {
        let id = self.mint.mint("audit_event", None);
        self.record(AuditEvent::new(id, actor, kind, target_uuid, payload))
            .await
    }

    /// Subscribe to the raw, unfiltered event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<AuditEvent> {
        self.sender.subscribe()
    }

    /// Receive the next event matching `filter`, skipping non-matching
    /// events and tolerating lag by resuming from the next available event.
    pub async fn recv_matching(
        receiver: &mut broadcast::Receiver<AuditEvent>,
        filter: &AuditFilter,
    ) -> Option<AuditEvent> {
        loop {
            match receiver.recv().await {
                Ok(event) if filter.matches(&event) => return Some(event),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph_store::SqliteGraphStore;

    fn journal() -> AuditJournal {
        let graph: Arc<dyn GraphStore> = Arc::new(SqliteGraphStore::new_in_memory().unwrap());
        AuditJournal::new(graph, IdentityMint::deterministic())
    }

    #[tokio::test]
    async fn emit_persists_and_broadcasts() {
        let journal = journal();
        let mut rx = journal.subscribe();
        journal
            .emit("watchdog", "deny", Some(Uuid::new_v4()), json!({"reason": "immutable"}))
            .await
            .unwrap();

        let received = rx.recv().await.unwrap();
        assert_eq!(received.actor, "watchdog");
        assert_eq!(received.kind, "deny");
    }

    #[tokio::test]
    async fn recv_matching_skips_non_matching_events() {
        let journal = journal();
        let mut rx = journal.subscribe();
        journal.emit("scheduler", "admit", None, json!({})).await.unwrap();
        journal.emit("watchdog", "deny", None, json!({})).await.unwrap();

        let filter = AuditFilter {
            actor: Some("watchdog".to_string()),
            kind: None,
        };
        let event = AuditJournal::recv_matching(&mut rx, &filter).await.unwrap();
        assert_eq!(event.actor, "watchdog");
    }
}
