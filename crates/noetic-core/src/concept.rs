//! `Concept` and `CodeSnapshot`: the permanent, versioned entities the rest
//! of the runtime reasons about.
//!
//! Builder-constructed and immutable once built: private fields, public
//! getters, validation deferred to `build()`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::{Error, Result};

/// Whether a Concept may be superseded by a new version.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Mutability {
    Immutable,
    Evolvable,
}

/// A reified idea, pipeline, skill, or learned pattern.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Concept {
    id: Uuid,
    name: String,
    /// Monotonic per-name version counter.
    version: u64,
    /// Prior versions of this concept, oldest first.
    lineage: Vec<Uuid>,
    mutability: Mutability,
    tags: Vec<String>,
    created_at: DateTime<Utc>,
}

impl Concept {
    pub fn builder() -> ConceptBuilder {
        ConceptBuilder::default()
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn lineage(&self) -> &[Uuid] {
        &self.lineage
    }

    pub fn mutability(&self) -> Mutability {
        self.mutability
    }

    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn is_immutable(&self) -> bool {
        self.mutability == Mutability::Immutable
    }

    /// Produce the next version of this concept, extending lineage.
    /// Immutable concepts may never be superseded.
    pub fn supersede(&self, id: Uuid) -> Result<Concept> {
        if self.is_immutable() {
            return Err(Error::ImmutableTarget(format!(
                "concept {} ({}) is immutable and cannot be superseded",
                self.id, self.name
            )));
        }
        let mut lineage = self.lineage.clone();
        lineage.push(self.id);
        Ok(Concept {
            id,
            name: self.name.clone(),
            version: self.version + 1,
            lineage,
            mutability: self.mutability,
            tags: self.tags.clone(),
            created_at: Utc::now(),
        })
    }
}

#[derive(Default)]
pub struct ConceptBuilder {
    id: Option<Uuid>,
    name: Option<String>,
    version: Option<u64>,
    lineage: Vec<Uuid>,
    mutability: Option<Mutability>,
    tags: Vec<String>,
}

impl ConceptBuilder {
    pub fn id(mut self, id: Uuid) -> Self {
        self.id = Some(id);
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn version(mut self, version: u64) -> Self {
        self.version = Some(version);
        self
    }

    pub fn lineage(mut self, lineage: Vec<Uuid>) -> Self {
        self.lineage = lineage;
        self
    }

    pub fn mutability(mut self, mutability: Mutability) -> Self {
        self.mutability = Some(mutability);
        self
    }

    pub fn tags(mut self, tags: Vec<impl Into<String>>) -> Self {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn build(self) -> Result<Concept> {
        let name = self
            .name
            .ok_or_else(|| Error::Unplanable("concept name is required".into()))?;
        if name.trim().is_empty() {
            return Err(Error::Unplanable("concept name cannot be empty".into()));
        }
        Ok(Concept {
            id: self.id.unwrap_or_else(Uuid::new_v4),
            name,
            version: self.version.unwrap_or(1),
            lineage: self.lineage,
            mutability: self.mutability.unwrap_or(Mutability::Evolvable),
            tags: self.tags,
            created_at: Utc::now(),
        })
    }
}

/// A frozen capture of source implementing a Concept.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CodeSnapshot {
    id: Uuid,
    concept_id: Uuid,
    language: String,
    content_hash: String,
    bytes: Vec<u8>,
    created_at: DateTime<Utc>,
}

/// Languages whose snapshots are treated as kernel/runtime implementation and
/// are therefore always immutable, mirroring the "language = kernel language
/// implies immutable" invariant.
const IMMUTABLE_LANGUAGES: &[&str] = &["go", "rust"];

impl CodeSnapshot {
    /// Build a snapshot, computing `content_hash` from `bytes` via SHA-256.
    pub fn new(id: Uuid, concept_id: Uuid, language: impl Into<String>, bytes: Vec<u8>) -> Self {
        let language = language.into();
        let content_hash = Self::hash_bytes(&bytes);
        Self {
            id,
            concept_id,
            language,
            content_hash,
            bytes,
            created_at: Utc::now(),
        }
    }

    fn hash_bytes(bytes: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        hex::encode(hasher.finalize())
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn concept_id(&self) -> Uuid {
        self.concept_id
    }

    pub fn language(&self) -> &str {
        &self.language
    }

    pub fn content_hash(&self) -> &str {
        &self.content_hash
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Whether the owning Concept must be treated as immutable because of
    /// this snapshot's implementation language.
    pub fn implies_immutable_concept(&self) -> bool {
        IMMUTABLE_LANGUAGES.contains(&self.language.to_lowercase().as_str())
    }

    /// Re-derive the content hash from `bytes` and compare against the
    /// stored `content_hash`, raising `IntegrityMismatch` on divergence.
    pub fn verify_integrity(&self) -> Result<()> {
        let recomputed = Self::hash_bytes(&self.bytes);
        if recomputed != self.content_hash {
            return Err(Error::IntegrityMismatch(format!(
                "snapshot {} content_hash mismatch: stored {}, recomputed {}",
                self.id, self.content_hash, recomputed
            )));
        }
        Ok(())
    }
}
