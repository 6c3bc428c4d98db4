//! `ShortTermCache`: the live, in-memory store of per-task phase records.
//! Exclusively owned by whichever `PRAREngine` instance is driving a task;
//! `MemorySubstrate` never reads from it directly. Entries evict on a
//! per-task timer, emitting an `AuditEvent` when they do, and are always
//! released on `Clear(task_id)` once Reflect promotes them to permanent
//! storage.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;
use uuid::Uuid;

use crate::audit_journal::AuditJournal;
use crate::embeddings::PhaseEmbeddings;
use crate::error::{Error, Result};
use crate::identity::IdentityMint;

/// The four PRAR phases, in the order the phase-ordering invariant requires
/// writes to appear in for a given task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd)]
pub enum Phase {
    Perceive,
    Reason,
    Act,
    Reflect,
}

/// One cached record: a phase's raw payload plus its embeddings.
#[derive(Debug, Clone)]
pub struct ProcessStateRecord {
    pub payload: serde_json::Value,
    pub embeddings: PhaseEmbeddings,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct CacheKey {
    task_id: Uuid,
    phase: Phase,
}

struct Entry {
    record: ProcessStateRecord,
    inserted_at: Instant,
}

/// In-memory `(task_id, phase) -> ProcessStateRecord` cache with a
/// background eviction sweep.
pub struct ShortTermCache {
    entries: RwLock<HashMap<CacheKey, Entry>>,
    ttl: Duration,
    audit: Option<Arc<AuditJournal>>,
    mint: IdentityMint,
    sweep_lock: Mutex<()>,
}

impl ShortTermCache {
    pub fn new(ttl: Duration, audit: Option<Arc<AuditJournal>>, mint: IdentityMint) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
            audit,
            mint,
            sweep_lock: Mutex::new(()),
        }
    }

    /// Store a phase record for a task, overwriting any prior record for the
    /// same `(task_id, phase)`.
    pub async fn store(&self, task_id: Uuid, phase: Phase, record: ProcessStateRecord) {
        let key = CacheKey { task_id, phase };
        let mut entries = self.entries.write().await;
        entries.insert(
            key,
            Entry {
                record,
                inserted_at: Instant::now(),
            },
        );
    }

    /// Retrieve the record for one `(task_id, phase)`, if present and not
    /// expired.
    pub async fn retrieve(&self, task_id: Uuid, phase: Phase) -> Option<ProcessStateRecord> {
        let entries = self.entries.read().await;
        entries
            .get(&CacheKey { task_id, phase })
            .filter(|entry| entry.inserted_at.elapsed() < self.ttl)
            .map(|entry| entry.record.clone())
    }

    /// Retrieve every live record for a task, ordered perceive → reason →
    /// act → reflect, as required by the phase-ordering invariant.
    pub async fn retrieve_all(&self, task_id: Uuid) -> Vec<(Phase, ProcessStateRecord)> {
        let entries = self.entries.read().await;
        let mut found: Vec<(Phase, ProcessStateRecord)> = entries
            .iter()
            .filter(|(key, entry)| key.task_id == task_id && entry.inserted_at.elapsed() < self.ttl)
            .map(|(key, entry)| (key.phase, entry.record.clone()))
            .collect();
        found.sort_by_key(|(phase, _)| *phase);
        found
    }

    /// Release every cached record for `task_id`, called once Reflect has
    /// promoted the process to permanent storage.
    pub async fn clear(&self, task_id: Uuid) {
        let mut entries = self.entries.write().await;
        entries.retain(|key, _| key.task_id != task_id);
    }

    /// Sweep expired entries, emitting an `AuditEvent` per eviction. Intended
    /// to be driven by a periodic watchdog timer; safe to call concurrently
    /// (a lock prevents overlapping sweeps from double-reporting the same
    /// evictions).
    pub async fn evict_expired(&self) -> Result<usize> {
        let _guard = self.sweep_lock.lock().await;

        let expired: Vec<CacheKey> = {
            let entries = self.entries.read().await;
            entries
                .iter()
                .filter(|(_, entry)| entry.inserted_at.elapsed() >= self.ttl)
                .map(|(key, _)| *key)
                .collect()
        };

        if expired.is_empty() {
            return Ok(0);
        }

        {
            let mut entries = self.entries.write().await;
            for key in &expired {
                entries.remove(key);
            }
        }

        if let Some(audit) = &self.audit {
            for key in &expired {
                audit
                    .emit(
                        "short_term_cache",
                        "eviction",
                        Some(key.task_id),
                        json!({"phase": format!("{:?}", key.phase)}),
                    )
                    .await?;
            }
        }

        Ok(expired.len())
    }

    /// Whether a new write for `phase` would violate phase ordering: every
    /// phase before it must already be present for this task.
    pub async fn check_phase_order(&self, task_id: Uuid, phase: Phase) -> Result<()> {
        let preceding = match phase {
            Phase::Perceive => &[][..],
            Phase::Reason => &[Phase::Perceive][..],
            Phase::Act => &[Phase::Perceive, Phase::Reason][..],
            Phase::Reflect => &[Phase::Perceive, Phase::Reason, Phase::Act][..],
        };
        let entries = self.entries.read().await;
        for required in preceding {
            if !entries.contains_key(&CacheKey {
                task_id,
                phase: *required,
            }) {
                return Err(Error::InvariantViolation(format!(
                    "task {task_id} attempted {phase:?} before {required:?} was recorded"
                )));
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Phase::Perceive => "perceive",
            Phase::Reason => "reason",
            Phase::Act => "act",
            Phase::Reflect => "reflect",
        };
        write!(f, "{name}")
    }
}
