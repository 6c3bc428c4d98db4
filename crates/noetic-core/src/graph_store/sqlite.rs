//! SQLite-backed `GraphStore` reference engine.
//!
//! A single mutex-guarded connection, a normalized schema, JSON payload
//! columns for flexibility. Nodes and edges get their own tables so the
//! store can hold heterogeneous entity kinds rather than one domain object.

use std::collections::{HashSet, VecDeque};
use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use super::{relations, Direction, GraphEdge, GraphNode, GraphStore};
use crate::error::{Error, Result};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS nodes (
    id TEXT PRIMARY KEY,
    kind TEXT NOT NULL,
    payload TEXT NOT NULL,
    immutable INTEGER NOT NULL,
    created_at TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS edges (
    from_id TEXT NOT NULL,
    relation TEXT NOT NULL,
    to_id TEXT NOT NULL,
    PRIMARY KEY (from_id, relation, to_id),
    FOREIGN KEY (from_id) REFERENCES nodes(id),
    FOREIGN KEY (to_id) REFERENCES nodes(id)
);
CREATE INDEX IF NOT EXISTS idx_edges_from ON edges(from_id, relation);
CREATE INDEX IF NOT EXISTS idx_edges_to ON edges(to_id, relation);
";

pub struct SqliteGraphStore {
    conn: Mutex<Connection>,
}

impl SqliteGraphStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.query_row("PRAGMA journal_mode=WAL", [], |_| Ok(()))?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn new_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::LockError("graph store connection lock poisoned".into()))
    }
}

#[async_trait]
impl GraphStore for SqliteGraphStore {
    async fn put_node(&self, node: GraphNode) -> Result<()> {
        let conn = self.lock()?;

        let existing_immutable: Option<i64> = conn
            .query_row(
                "SELECT immutable FROM nodes WHERE id = ?",
                params![node.id.to_string()],
                |row| row.get(0),
            )
            .optional()?;

        if let Some(1) = existing_immutable {
            return Err(Error::ImmutableTarget(format!(
                "node {} is immutable and cannot be overwritten",
                node.id
            )));
        }

        let payload_json = serde_json::to_string(&node.payload)?;
        conn.execute(
            "INSERT OR REPLACE INTO nodes (id, kind, payload, immutable, created_at) VALUES (?, ?, ?, ?, ?)",
            params![
                node.id.to_string(),
                node.kind,
                payload_json,
                node.immutable as i64,
                node.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    async fn get_node(&self, id: Uuid) -> Result<Option<GraphNode>> {
        let conn = self.lock()?;
        let row: Option<(String, String, i64, String)> = conn
            .query_row(
                "SELECT kind, payload, immutable, created_at FROM nodes WHERE id = ?",
                params![id.to_string()],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                },
            )
            .optional()?;

        match row {
            None => Ok(None),
            Some((kind, payload_json, immutable, created_at)) => {
                let payload = serde_json::from_str(&payload_json)?;
                let created_at = chrono::DateTime::parse_from_rfc3339(&created_at)
                    .map_err(|e| Error::Internal(format!("stored timestamp invalid: {e}")))?
                    .with_timezone(&chrono::Utc);
                Ok(Some(GraphNode {
                    id,
                    kind,
                    payload,
                    immutable: immutable != 0,
                    created_at,
                }))
            }
        }
    }

    async fn link(&self, from: Uuid, relation: &str, to: Uuid) -> Result<()> {
        if relation == relations::PRECEDES && self.would_cycle(from, to).await? {
            return Err(Error::InvariantViolation(format!(
                "PRECEDES {from} -> {to} would introduce a lineage cycle"
            )));
        }

        let conn = self.lock()?;
        conn.execute(
            "INSERT OR IGNORE INTO edges (from_id, relation, to_id) VALUES (?, ?, ?)",
            params![from.to_string(), relation, to.to_string()],
        )?;
        Ok(())
    }

    async fn query_edges(
        &self,
        id: Uuid,
        relation: Option<&str>,
        direction: Direction,
    ) -> Result<Vec<GraphEdge>> {
        let conn = self.lock()?;
        let id_str = id.to_string();

        let (column, sql_base) = match direction {
            Direction::Outgoing => ("from_id", "SELECT from_id, relation, to_id FROM edges WHERE from_id = ?"),
            Direction::Incoming => ("to_id", "SELECT from_id, relation, to_id FROM edges WHERE to_id = ?"),
        };
        let _ = column;

        let rows: Vec<(String, String, String)> = match relation {
            Some(relation) => {
                let sql = format!("{sql_base} AND relation = ?");
                let mut stmt = conn.prepare(&sql)?;
                stmt.query_map(params![id_str, relation], |row| {
                    Ok((row.get(0)?, row.get(1)?, row.get(2)?))
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?
            }
            None => {
                let mut stmt = conn.prepare(sql_base)?;
                stmt.query_map(params![id_str], |row| {
                    Ok((row.get(0)?, row.get(1)?, row.get(2)?))
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?
            }
        };

        rows.into_iter()
            .map(|(from, relation, to)| {
                Ok(GraphEdge {
                    from: Uuid::parse_str(&from)
                        .map_err(|e| Error::Internal(format!("stored from_id invalid: {e}")))?,
                    relation,
                    to: Uuid::parse_str(&to)
                        .map_err(|e| Error::Internal(format!("stored to_id invalid: {e}")))?,
                })
            })
            .collect()
    }

    async fn all_ids(&self) -> Result<Vec<Uuid>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT id FROM nodes")?;
        let ids = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?
            .into_iter()
            .filter_map(|id| Uuid::parse_str(&id).ok())
            .collect();
        Ok(ids)
    }

    async fn would_cycle(&self, from: Uuid, to: Uuid) -> Result<bool> {
        if from == to {
            return Ok(true);
        }
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT to_id FROM edges WHERE from_id = ? AND relation = ?",
        )?;

        let mut visited: HashSet<Uuid> = HashSet::new();
        let mut queue: VecDeque<Uuid> = VecDeque::new();
        queue.push_back(to);

        while let Some(current) = queue.pop_front() {
            if current == from {
                return Ok(true);
            }
            if !visited.insert(current) {
                continue;
            }
            let next_ids = stmt
                .query_map(params![current.to_string(), relations::PRECEDES], |row| {
                    row.get::<_, String>(0)
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            for next in next_ids {
                if let Ok(next) = Uuid::parse_str(&next) {
                    queue.push_back(next);
                }
            }
        }
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn node(id: Uuid, immutable: bool) -> GraphNode {
        GraphNode::new(id, "concept", json!({"name": "test"}), immutable)
    }

    #[tokio::test]
    async fn put_and_get_round_trip() {
        let store = SqliteGraphStore::new_in_memory().unwrap();
        let id = Uuid::new_v4();
        store.put_node(node(id, false)).await.unwrap();

        let fetched = store.get_node(id).await.unwrap().unwrap();
        assert_eq!(fetched.kind, "concept");
        assert_eq!(fetched.payload["name"], "test");
    }

    #[tokio::test]
    async fn immutable_node_rejects_overwrite() {
        let store = SqliteGraphStore::new_in_memory().unwrap();
        let id = Uuid::new_v4();
        store.put_node(node(id, true)).await.unwrap();

        let err = store.put_node(node(id, true)).await.unwrap_err();
        assert!(matches!(err, Error::ImmutableTarget(_)));
    }

    #[tokio::test]
    async fn link_and_query_edges_by_direction() {
        let store = SqliteGraphStore::new_in_memory().unwrap();
        let (perception, concept) = (Uuid::new_v4(), Uuid::new_v4());
        store.put_node(node(perception, false)).await.unwrap();
        store.put_node(node(concept, false)).await.unwrap();
        store
            .link(perception, relations::OBSERVED, concept)
            .await
            .unwrap();

        let outgoing = store
            .query_edges(perception, None, Direction::Outgoing)
            .await
            .unwrap();
        assert_eq!(outgoing.len(), 1);
        assert_eq!(outgoing[0].to, concept);

        let incoming = store
            .query_edges(concept, Some(relations::OBSERVED), Direction::Incoming)
            .await
            .unwrap();
        assert_eq!(incoming.len(), 1);
        assert_eq!(incoming[0].from, perception);
    }

    #[tokio::test]
    async fn precedes_link_rejects_cycles() {
        let store = SqliteGraphStore::new_in_memory().unwrap();
        let (v1, v2, v3) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        for id in [v1, v2, v3] {
            store.put_node(node(id, false)).await.unwrap();
        }
        store.link(v1, relations::PRECEDES, v2).await.unwrap();
        store.link(v2, relations::PRECEDES, v3).await.unwrap();

        let err = store.link(v3, relations::PRECEDES, v1).await.unwrap_err();
        assert!(matches!(err, Error::InvariantViolation(_)));
    }
}
