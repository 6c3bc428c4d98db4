//! `EvolutionController`: consumes proposals from Reflect and from scheduled
//! self-improvement cycles, ranks them against an archive of past
//! iterations, submits to `Watchdog` for approval, and applies approved
//! changes to the evolvable tier as a new `CodeSnapshot` linked by
//! `PRECEDES`.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::concept::{CodeSnapshot, Concept};
use crate::error::{Error, Result};
use crate::graph_store::{relations, Direction, GraphNode};
use crate::identity::IdentityMint;
use crate::memory_substrate::MemorySubstrate;
use crate::persona::EvolutionProposal;
use crate::watchdog::{EvolutionApproval, TestRunner, Watchdog};

/// Graph-node kind under which archived iterations are persisted.
pub const KIND_EVOLUTION_ITERATION: &str = "evolution_iteration";

/// Weights applied to `ArchivedIteration::utility`. Configurable so operators
/// can favor score, cost, or turnaround time differently than the default.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ArchiveUtilityWeights {
    pub alpha_score: f64,
    pub alpha_cost: f64,
    pub alpha_time: f64,
}

impl Default for ArchiveUtilityWeights {
    fn default() -> Self {
        Self {
            alpha_score: 0.5,
            alpha_cost: 0.25,
            alpha_time: 0.25,
        }
    }
}

/// One previously evaluated attempt at evolving a target concept.
#[derive(Debug, Clone)]
pub struct ArchivedIteration {
    pub id: Uuid,
    pub target_concept: Uuid,
    pub score: f64,
    pub cost: f64,
    pub time: f64,
    pub timed_out: bool,
}

impl ArchivedIteration {
    /// `U = alpha_score*score + alpha_cost*(1-cost) + alpha_time*(1-time)`,
    /// `cost`/`time` capped to `[0, 1]`; timed-out trials are halved.
    pub fn utility(&self, weights: ArchiveUtilityWeights) -> f64 {
        let cost = self.cost.clamp(0.0, 1.0);
        let time = self.time.clamp(0.0, 1.0);
        let base = weights.alpha_score * self.score
            + weights.alpha_cost * (1.0 - cost)
            + weights.alpha_time * (1.0 - time);
        if self.timed_out {
            base * 0.5
        } else {
            base
        }
    }

    fn to_node(&self) -> GraphNode {
        GraphNode::new(
            self.id,
            KIND_EVOLUTION_ITERATION,
            json!({
                "target_concept": self.target_concept,
                "score": self.score,
                "cost": self.cost,
                "time": self.time,
                "timed_out": self.timed_out,
            }),
            true,
        )
    }

    fn from_node(node: &GraphNode) -> Result<Self> {
        let payload = &node.payload;
        let field = |key: &str| {
            payload
                .get(key)
                .ok_or_else(|| Error::Internal(format!("archived iteration {} missing `{key}`", node.id)))
        };
        Ok(Self {
            id: node.id,
            target_concept: serde_json::from_value(field("target_concept")?.clone())?,
            score: field("score")?.as_f64().unwrap_or(0.0),
            cost: field("cost")?.as_f64().unwrap_or(0.0),
            time: field("time")?.as_f64().unwrap_or(0.0),
            timed_out: field("timed_out")?.as_bool().unwrap_or(false),
        })
    }
}

/// Outcome of applying one approved proposal.
#[derive(Debug, Clone)]
pub enum EvolutionOutcome {
    Activated { snapshot_id: Uuid, checkpoint_id: Uuid },
    RolledBack { checkpoint_id: Uuid, reason: String },
    Rejected { reason: String },
}

pub struct EvolutionController {
    memory: Arc<MemorySubstrate>,
    watchdog: Arc<Watchdog>,
    mint: IdentityMint,
    utility_weights: ArchiveUtilityWeights,
}

impl EvolutionController {
    pub fn new(
        memory: Arc<MemorySubstrate>,
        watchdog: Arc<Watchdog>,
        mint: IdentityMint,
        utility_weights: ArchiveUtilityWeights,
    ) -> Self {
        Self {
            memory,
            watchdog,
            mint,
            utility_weights,
        }
    }

    /// Persist one evaluated iteration to the archive, linked from its
    /// target concept so `fetch_archive` can retrieve it later.
    pub async fn record_iteration(&self, iteration: ArchivedIteration) -> Result<Uuid> {
        let node = iteration.to_node();
        let node_id = node.id;
        self.memory.put(node, None).await?;
        self.memory.link(iteration.target_concept, relations::DISCOVERED, node_id).await?;
        Ok(node_id)
    }

    /// Fetch every archived iteration recorded against `target_concept`.
    pub async fn fetch_archive(&self, target_concept: Uuid) -> Result<Vec<ArchivedIteration>> {
        let edges = self
            .memory
            .graph_query(target_concept, Some(relations::DISCOVERED), Direction::Outgoing)
            .await?;

        let mut archive = Vec::new();
        for edge in edges {
            if let Some(node) = self.memory.get_by_id(edge.to).await? {
                if node.kind == KIND_EVOLUTION_ITERATION {
                    archive.push(ArchivedIteration::from_node(&node)?);
                }
            }
        }
        Ok(archive)
    }

    /// Rank a set of candidate iterations by utility, highest first.
    pub fn rank(&self, candidates: &mut [ArchivedIteration]) {
        let weights = self.utility_weights;
        candidates.sort_by(|a, b| b.utility(weights).partial_cmp(&a.utility(weights)).unwrap());
    }

    /// Submit a proposal for approval and, if approved, apply it: write the
    /// new `CodeSnapshot`, link it to the prior version via `PRECEDES`, run
    /// tests, and activate or roll back.
    pub async fn apply_proposal(
        &self,
        proposal: &EvolutionProposal,
        target: &Concept,
        new_snapshot_bytes: Vec<u8>,
        language: &str,
        test_runner: &dyn TestRunner,
    ) -> Result<EvolutionOutcome> {
        if !matches!(target.mutability(), crate::concept::Mutability::Evolvable) {
            return Ok(EvolutionOutcome::Rejected {
                reason: format!("concept `{}` is not evolvable", target.name()),
            });
        }

        let approval = self.watchdog.approve_evolution(proposal, target, test_runner).await?;

        match approval {
            EvolutionApproval::Rejected { reason } => Ok(EvolutionOutcome::Rejected { reason }),
            EvolutionApproval::RolledBack { checkpoint_id, reason } => {
                Ok(EvolutionOutcome::RolledBack { checkpoint_id, reason })
            }
            EvolutionApproval::Approved { checkpoint_id } => {
                let snapshot_id = self.mint.mint("code_snapshot", None);
                let snapshot = CodeSnapshot::new(snapshot_id, target.id(), language, new_snapshot_bytes);

                let node = GraphNode::new(
                    snapshot.id(),
                    "code_snapshot",
                    json!({
                        "concept_id": snapshot.concept_id(),
                        "language": snapshot.language(),
                        "content_hash": snapshot.content_hash(),
                    }),
                    snapshot.implies_immutable_concept(),
                );
                self.memory.put(node, None).await?;

                if let Some(previous) = target.lineage().last() {
                    self.memory.link(*previous, relations::PRECEDES, snapshot.id()).await?;
                }
                self.memory.link(target.id(), relations::PRECEDES, snapshot.id()).await?;

                Ok(EvolutionOutcome::Activated {
                    snapshot_id: snapshot.id(),
                    checkpoint_id,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit_journal::AuditJournal;
    use crate::graph_store::{GraphStore, SqliteGraphStore};
    use crate::kv_store::SqliteKVStore;
    use crate::vector_store::SqliteVectorStore;
    use crate::watchdog::WatchdogConfig;
    use async_trait::async_trait;

    fn controller() -> EvolutionController {
        let graph: Arc<dyn GraphStore> = Arc::new(SqliteGraphStore::new_in_memory().unwrap());
        let audit = Arc::new(AuditJournal::new(graph.clone(), IdentityMint::deterministic()));
        let memory = Arc::new(MemorySubstrate::new(
            graph,
            Arc::new(SqliteVectorStore::new_in_memory().unwrap()),
            Arc::new(SqliteKVStore::new_in_memory().unwrap()),
            IdentityMint::deterministic(),
            Some(audit.clone()),
        ));
        let watchdog = Arc::new(Watchdog::new(WatchdogConfig::default(), audit));
        EvolutionController::new(memory, watchdog, IdentityMint::deterministic(), ArchiveUtilityWeights::default())
    }

    fn iteration(target: Uuid, score: f64, cost: f64, time: f64, timed_out: bool) -> ArchivedIteration {
        ArchivedIteration {
            id: Uuid::new_v4(),
            target_concept: target,
            score,
            cost,
            time,
            timed_out,
        }
    }

    #[test]
    fn utility_favors_high_score_low_cost_low_time() {
        let weights = ArchiveUtilityWeights::default();
        let good = iteration(Uuid::new_v4(), 1.0, 0.0, 0.0, false);
        let bad = iteration(Uuid::new_v4(), 0.2, 0.8, 0.8, false);
        assert!(good.utility(weights) > bad.utility(weights));
    }

    #[test]
    fn timed_out_trials_are_halved() {
        let weights = ArchiveUtilityWeights::default();
        let full = iteration(Uuid::new_v4(), 1.0, 0.0, 0.0, false);
        let timed_out = iteration(Uuid::new_v4(), 1.0, 0.0, 0.0, true);
        assert!((timed_out.utility(weights) - full.utility(weights) * 0.5).abs() < 1e-9);
    }

    #[test]
    fn configured_weights_change_the_ranking() {
        let cost_heavy = ArchiveUtilityWeights { alpha_score: 0.1, alpha_cost: 0.8, alpha_time: 0.1 };
        let cheap_but_mediocre = iteration(Uuid::new_v4(), 0.5, 0.0, 0.5, false);
        let expensive_but_excellent = iteration(Uuid::new_v4(), 1.0, 0.9, 0.1, false);
        assert!(cheap_but_mediocre.utility(cost_heavy) > expensive_but_excellent.utility(cost_heavy));
    }

    #[tokio::test]
    async fn record_and_fetch_archive_round_trips() {
        let controller = controller();
        let target = Uuid::new_v4();
        let target_node = GraphNode::new(target, "concept", json!({}), false);
        controller.memory.put(target_node, None).await.unwrap();

        controller
            .record_iteration(iteration(target, 0.8, 0.1, 0.1, false))
            .await
            .unwrap();
        controller
            .record_iteration(iteration(target, 0.3, 0.5, 0.5, true))
            .await
            .unwrap();

        let mut archive = controller.fetch_archive(target).await.unwrap();
        assert_eq!(archive.len(), 2);

        controller.rank(&mut archive);
        let weights = controller.utility_weights;
        assert!(archive[0].utility(weights) >= archive[1].utility(weights));
    }

    struct AlwaysPass;
    #[async_trait]
    impl TestRunner for AlwaysPass {
        async fn run_tests(&self, _target: Uuid) -> Result<bool> {
            Ok(true)
        }
    }

    #[tokio::test]
    async fn applying_proposal_to_immutable_concept_is_rejected() {
        let controller = controller();
        let target = Concept::builder()
            .name("kernel")
            .mutability(crate::concept::Mutability::Immutable)
            .build()
            .unwrap();
        let proposal = EvolutionProposal {
            id: Uuid::new_v4(),
            description: "test".to_string(),
            target_concept: target.id(),
            estimated_cost: 0.1,
            estimated_risk: 0.1,
        };

        let outcome = controller
            .apply_proposal(&proposal, &target, b"code".to_vec(), "python", &AlwaysPass)
            .await
            .unwrap();
        assert!(matches!(outcome, EvolutionOutcome::Rejected { .. }));
    }

    #[tokio::test]
    async fn approved_proposal_activates_new_snapshot() {
        let controller = controller();
        let target = Concept::builder()
            .name("retry-policy")
            .mutability(crate::concept::Mutability::Evolvable)
            .build()
            .unwrap();
        let target_node = GraphNode::new(target.id(), "concept", json!({}), false);
        controller.memory.put(target_node, None).await.unwrap();

        let proposal = EvolutionProposal {
            id: Uuid::new_v4(),
            description: "test".to_string(),
            target_concept: target.id(),
            estimated_cost: 0.1,
            estimated_risk: 0.1,
        };

        let outcome = controller
            .apply_proposal(&proposal, &target, b"def run(): pass".to_vec(), "python", &AlwaysPass)
            .await
            .unwrap();
        assert!(matches!(outcome, EvolutionOutcome::Activated { .. }));
    }
}
