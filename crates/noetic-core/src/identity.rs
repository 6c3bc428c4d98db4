//! Canonical identifier minting.
//!
//! Every entity in the runtime — Concept, CodeSnapshot, Perception,
//! ReasoningBranch, Action, Reflection, Pattern, AuditEvent, IngestionEvent —
//! is addressed by the same `uuid`: the graph store's primary key, the
//! vector store's document id, and the KV store's key prefix. `IdentityMint`
//! is the single place that produces these ids so the shared-id invariant
//! has exactly one source.

use uuid::Uuid;

/// Fixed namespace used for deterministic v5 minting under test configuration.
/// Chosen once and never changed; changing it would silently re-derive every
/// previously-minted deterministic id.
const DETERMINISTIC_NAMESPACE: Uuid = Uuid::from_bytes([
    0x6e, 0x6f, 0x65, 0x74, 0x69, 0x63, 0x2d, 0x63, 0x6f, 0x72, 0x65, 0x2d, 0x6e, 0x73, 0x00, 0x01,
]);

/// Mints canonical uuids, either randomly (production) or deterministically
/// (tests that need idempotent reconstruction across runs).
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityMint {
    deterministic: bool,
}

impl IdentityMint {
    /// Production mint: every id is v4 random.
    pub fn new() -> Self {
        Self { deterministic: false }
    }

    /// Test mint: every id is v5, namespaced and seeded by `kind`/`name` so
    /// the same inputs always reconstruct the same id.
    pub fn deterministic() -> Self {
        Self { deterministic: true }
    }

    /// Mint a fresh id for an entity of the given `kind` (e.g. "concept",
    /// "perception"). `name` disambiguates deterministic minting when a test
    /// needs more than one id of the same kind; ignored in random mode.
    pub fn mint(&self, kind: &str, name: Option<&str>) -> Uuid {
        if self.deterministic {
            let seed = match name {
                Some(name) => format!("{kind}:{name}"),
                None => kind.to_string(),
            };
            Uuid::new_v5(&DETERMINISTIC_NAMESPACE, seed.as_bytes())
        } else {
            Uuid::new_v4()
        }
    }

    /// Mint the id for a new version of an existing entity. Distinct from
    /// `mint` so call sites make lineage minting explicit; deterministic mode
    /// seeds on the parent id plus a monotonic version marker.
    pub fn mint_version(&self, parent_uuid: Uuid, version: u64) -> Uuid {
        if self.deterministic {
            let seed = format!("version:{parent_uuid}:{version}");
            Uuid::new_v5(&DETERMINISTIC_NAMESPACE, seed.as_bytes())
        } else {
            Uuid::new_v4()
        }
    }
}
