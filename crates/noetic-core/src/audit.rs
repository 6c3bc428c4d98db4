//! `AuditEvent`: the append-only log record every subsystem emits.
//!
//! Defined once here because it is produced by `Watchdog`, `ShortTermCache`,
//! `ToolRegistry`, `EvolutionController`, and `MemorySubstrate`'s
//! reconciliation pass, and consumed by `AuditJournal`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

/// `(actor, kind)` pair realizing a total-order-per-partition guarantee:
/// events from the same actor of the same kind are observed in emission
/// order by any single reader.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct AuditPartition {
    pub actor: String,
    pub kind: String,
}

/// One append-only log record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuditEvent {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub actor: String,
    pub kind: String,
    pub target_uuid: Option<Uuid>,
    pub payload: JsonValue,
}

impl AuditEvent {
    pub fn new(
        id: Uuid,
        actor: impl Into<String>,
        kind: impl Into<String>,
        target_uuid: Option<Uuid>,
        payload: JsonValue,
    ) -> Self {
        Self {
            id,
            timestamp: Utc::now(),
            actor: actor.into(),
            kind: kind.into(),
            target_uuid,
            payload,
        }
    }

    pub fn partition(&self) -> AuditPartition {
        AuditPartition {
            actor: self.actor.clone(),
            kind: self.kind.clone(),
        }
    }
}
