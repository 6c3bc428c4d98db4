//! `PRAREngine`: drives one task through Perceive → Reason → Act → Reflect,
//! gated by confidence scoring and capable of online retrieval when
//! confidence in the current plan runs low. Concrete perception/reasoning/
//! reflection are pluggable seams — exactly like `Embedder` — because this
//! crate ships no model inference of its own.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value as JsonValue};
use uuid::Uuid;

use crate::audit_journal::AuditJournal;
use crate::confidence::{BranchScore, PerceiveFactors, PhaseConfidence, ReasonFactors};
use crate::embeddings::{Embedding, EmbeddingPipeline, PhaseEmbeddings, ReflectWeights};
use crate::error::{Error, Result};
use crate::graph_store::{relations, GraphNode};
use crate::identity::IdentityMint;
use crate::memory_substrate::MemorySubstrate;
use crate::persona::EvolutionProposal;
use crate::short_term_cache::{Phase, ProcessStateRecord, ShortTermCache};
use crate::tool_registry::ToolRegistry;
use crate::watchdog::{Watchdog, WatchdogSignal};

/// Per-task state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskStatus {
    Admitted,
    Perceiving,
    Reasoning,
    Acting,
    Reflecting,
    Completed,
    Failed(String),
    Aborted(String),
}

/// Tunable thresholds and bounds governing phase gating and refinement.
#[derive(Debug, Clone)]
pub struct PrarConfig {
    pub theta_perceive: f64,
    pub theta_reason: f64,
    pub theta_plan: f64,
    pub theta_retrieve: f64,
    pub k_perceive: usize,
    pub k_reason: usize,
    pub lambda: f64,
    pub branch_count: usize,
    pub subtask_retry_cap: usize,
    pub act_concurrency_cap: usize,
    /// Weights applied to the Perceive/Reason/Act phase embeddings when
    /// Reflect combines them into the `holistic` vector.
    pub reflect_weights: ReflectWeights,
    /// Licenses a retrieved `IngestionEvent` must carry for its content to be
    /// embedded and stored as a raw-content vector entry. Items whose
    /// license isn't in this list are still recorded as metadata-only nodes.
    pub license_allowlist: Vec<String>,
    /// Upper bound on results a `Retriever` should return per query.
    pub retrieval_top_k: usize,
    /// Minimum similarity score a `Retriever` should apply when ranking
    /// candidates before returning them.
    pub retrieval_min_similarity: f64,
}

impl Default for PrarConfig {
    fn default() -> Self {
        Self {
            theta_perceive: 0.6,
            theta_reason: 0.6,
            theta_plan: 0.5,
            theta_retrieve: 0.4,
            k_perceive: 3,
            k_reason: 2,
            lambda: 0.5,
            branch_count: 3,
            subtask_retry_cap: 3,
            act_concurrency_cap: 4,
            reflect_weights: ReflectWeights::default(),
            license_allowlist: Vec::new(),
            retrieval_top_k: 5,
            retrieval_min_similarity: 0.0,
        }
    }
}

/// One unit of work in a selected branch's plan; `Act` dispatches each via
/// `ToolRegistry::call`.
#[derive(Debug, Clone)]
pub struct Subtask {
    pub tool_name: String,
    pub args: JsonValue,
    pub parallelizable: bool,
}

/// A candidate plan produced by Reason, paired with its selection score.
#[derive(Debug, Clone)]
pub struct PlannedBranch {
    pub score: BranchScore,
    pub subtasks: Vec<Subtask>,
}

/// Produces a Perception from a goal and environment snapshot.
#[async_trait]
pub trait Perceiver: Send + Sync {
    async fn perceive(&self, goal: &str, context: &JsonValue) -> Result<(PerceiveFactors, JsonValue)>;
}

/// Produces candidate branches from a Perception plus semantic recall.
#[async_trait]
pub trait Reasoner: Send + Sync {
    async fn reason(
        &self,
        perception: &JsonValue,
        recall: &[JsonValue],
    ) -> Result<(ReasonFactors, Vec<PlannedBranch>)>;
}

/// Synthesizes a retrieval query and ingests results as observed Concepts
/// when a running task's confidence in its current plan runs low.
#[async_trait]
pub trait Retriever: Send + Sync {
    /// `top_k` and `min_similarity` are the retrieval-tuning knobs from
    /// `PrarConfig`; implementations apply them however fits their backing
    /// search (vector similarity threshold, result cap, etc).
    async fn retrieve(&self, query: &str, top_k: usize, min_similarity: f64) -> Result<Vec<JsonValue>>;
}

/// Summarizes a completed chain and proposes learnings/patterns/evolution.
#[derive(Debug, Clone, Default)]
pub struct ReflectionOutcome {
    pub learnings: Vec<String>,
    pub patterns: Vec<JsonValue>,
    pub proposals: Vec<EvolutionProposal>,
}

#[async_trait]
pub trait Reflector: Send + Sync {
    async fn reflect(&self, chain_summary: &JsonValue) -> Result<ReflectionOutcome>;
}

pub struct PRAREngine {
    config: PrarConfig,
    memory: Arc<MemorySubstrate>,
    cache: Arc<ShortTermCache>,
    embeddings: Arc<EmbeddingPipeline>,
    tools: Arc<ToolRegistry>,
    watchdog: Arc<Watchdog>,
    audit: Arc<AuditJournal>,
    mint: IdentityMint,
    perceiver: Arc<dyn Perceiver>,
    reasoner: Arc<dyn Reasoner>,
    reflector: Arc<dyn Reflector>,
    retriever: Option<Arc<dyn Retriever>>,
}

impl PRAREngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: PrarConfig,
        memory: Arc<MemorySubstrate>,
        cache: Arc<ShortTermCache>,
        embeddings: Arc<EmbeddingPipeline>,
        tools: Arc<ToolRegistry>,
        watchdog: Arc<Watchdog>,
        audit: Arc<AuditJournal>,
        mint: IdentityMint,
        perceiver: Arc<dyn Perceiver>,
        reasoner: Arc<dyn Reasoner>,
        reflector: Arc<dyn Reflector>,
        retriever: Option<Arc<dyn Retriever>>,
    ) -> Self {
        Self {
            config,
            memory,
            cache,
            embeddings,
            tools,
            watchdog,
            audit,
            mint,
            perceiver,
            reasoner,
            reflector,
            retriever,
        }
    }

    /// Run one task end to end, returning its terminal status. Never panics
    /// on task-level failure — failures are reported as `TaskStatus::Failed`
    /// or `TaskStatus::Aborted`.
    #[tracing::instrument(skip(self, environment), fields(%task_id))]
    pub async fn run(&self, task_id: Uuid, goal: &str, environment: JsonValue) -> Result<TaskStatus> {
        tracing::info!(goal, "task admitted");
        self.audit.emit("prar_engine", "task_admitted", Some(task_id), json!({"goal": goal})).await?;

        let perception = match self.perceive(task_id, goal, &environment).await {
            Ok(p) => p,
            Err(err) => return self.fail(task_id, err).await,
        };

        let branches = match self.reason(task_id, &perception).await {
            Ok(b) => b,
            Err(err) => return self.fail(task_id, err).await,
        };

        let mut veto_err = None;
        for (idx, branch) in branches.into_iter().enumerate() {
            match self.act(task_id, branch).await {
                Ok(Some(outcome)) => return Ok(outcome),
                Ok(None) => return self.reflect(task_id).await,
                Err(err) if matches!(err, Error::DeniedByWatchdog(_) | Error::ImmutableTarget(_)) => {
                    tracing::warn!(rejected_branch = idx, reason = %err, "branch vetoed, falling back to next candidate");
                    self.audit
                        .emit(
                            "prar_engine",
                            "branch_fallback",
                            Some(task_id),
                            json!({"rejected_branch": idx, "reason": err.to_string()}),
                        )
                        .await?;
                    veto_err = Some(err);
                }
                Err(err) => return self.fail(task_id, err).await,
            }
        }

        self.fail(task_id, veto_err.unwrap_or_else(|| Error::Unplanable("no branches survived Watchdog review".to_string()))).await
    }

    async fn fail(&self, task_id: Uuid, err: Error) -> Result<TaskStatus> {
        tracing::error!(%task_id, error = %err, "task failed");
        self.audit
            .emit("prar_engine", "task_failed", Some(task_id), json!({"error": err.kind_name(), "message": err.to_string()}))
            .await?;
        self.cache.clear(task_id).await;
        Ok(TaskStatus::Failed(err.to_string()))
    }

    /// Perceive phase, looping up to `K_perceive` times on a low-confidence
    /// gate before failing the task with `Unperceivable`.
    async fn perceive(&self, task_id: Uuid, goal: &str, environment: &JsonValue) -> Result<JsonValue> {
        for attempt in 0..=self.config.k_perceive {
            let (factors, perception) = self.perceiver.perceive(goal, environment).await?;
            let confidence = PhaseConfidence::perceive(factors);

            if confidence.passes_gate(self.config.theta_perceive) {
                let embeddings = self
                    .embeddings
                    .embed_phase(
                        perception.to_string().as_str(),
                        perception.to_string().as_str(),
                        environment.to_string().as_str(),
                    )
                    .await
                    .ok();

                self.cache
                    .store(
                        task_id,
                        Phase::Perceive,
                        ProcessStateRecord {
                            payload: perception.clone(),
                            embeddings: embeddings.unwrap_or_default(),
                        },
                    )
                    .await;

                let node = GraphNode::new(
                    self.mint.mint("perception", None),
                    "perception",
                    json!({"task_id": task_id, "confidence": confidence.score(), "perception": perception}),
                    false,
                );
                self.memory.put(node, None).await?;

                return Ok(perception);
            }

            self.audit
                .emit(
                    "prar_engine",
                    "perceive_retry",
                    Some(task_id),
                    json!({"attempt": attempt, "confidence": confidence.score()}),
                )
                .await?;
        }

        Err(Error::Unperceivable(format!(
            "confidence stayed below theta_perceive={} after {} attempts",
            self.config.theta_perceive, self.config.k_perceive
        )))
    }

    /// Reason phase: generate branches, trigger online retrieval if overall
    /// confidence is too low, select a branch, and refine up to `K_reason`
    /// times if the winner's feasibility is below `theta_reason`.
    async fn reason(&self, task_id: Uuid, perception: &JsonValue) -> Result<Vec<PlannedBranch>> {
        let mut recall: Vec<JsonValue> = Vec::new();

        for attempt in 0..=self.config.k_reason {
            let (factors, mut branches) = self.reasoner.reason(perception, &recall).await?;
            let confidence = PhaseConfidence::reason(factors);

            if confidence.score() < self.config.theta_retrieve {
                if let Some(retriever) = &self.retriever {
                    let query = perception.to_string();
                    let retrieved = retriever
                        .retrieve(&query, self.config.retrieval_top_k, self.config.retrieval_min_similarity)
                        .await?;

                    for item in &retrieved {
                        let license = item.get("license").and_then(|v| v.as_str()).unwrap_or("unspecified");
                        let permitted = self.config.license_allowlist.iter().any(|allowed| allowed == license);

                        // License gate: a permitted license gets the raw
                        // content persisted (graph + vector); anything else
                        // is recorded as metadata only, no raw-content
                        // vector entry.
                        let (payload, embeddings) = if permitted {
                            let embeddings = self
                                .embeddings
                                .embed_phase(item.to_string().as_str(), item.to_string().as_str(), query.as_str())
                                .await
                                .ok();
                            (
                                json!({"provenance": "retrieved", "content": item, "license": license}),
                                embeddings,
                            )
                        } else {
                            (
                                json!({"provenance": "retrieved", "license": license, "license_permitted": false}),
                                None,
                            )
                        };

                        let node = GraphNode::new(self.mint.mint("ingestion_event", None), "ingestion_event", payload, false);
                        self.memory.put(node, embeddings).await?;
                    }

                    recall.extend(retrieved.iter().cloned());

                    let augmented = json!({"augmented_with_retrieval": true, "retrieved_count": retrieved.len()});
                    let embeddings = self
                        .embeddings
                        .embed_phase(
                            augmented.to_string().as_str(),
                            recall.iter().map(|v| v.to_string()).collect::<Vec<_>>().join(" ").as_str(),
                            query.as_str(),
                        )
                        .await
                        .ok();
                    self.cache
                        .store(
                            task_id,
                            Phase::Perceive,
                            ProcessStateRecord {
                                payload: augmented,
                                embeddings: embeddings.unwrap_or_default(),
                            },
                        )
                        .await;
                }
            }

            if branches.is_empty() {
                return Err(Error::Unplanable("reasoner produced no candidate branches".to_string()));
            }

            let scores: Vec<BranchScore> = branches.iter().map(|b| b.score).collect();
            let winner_idx = crate::confidence::select_branch(&scores, self.config.lambda)?;

            if branches[winner_idx].score.feasibility < self.config.theta_reason && attempt < self.config.k_reason {
                self.audit
                    .emit(
                        "prar_engine",
                        "refine_reasoning",
                        Some(task_id),
                        json!({"attempt": attempt, "feasibility": branches[winner_idx].score.feasibility}),
                    )
                    .await?;
                continue;
            }

            let winner = branches.remove(winner_idx);

            let reason_payload = json!({
                "feasibility": winner.score.feasibility,
                "alignment": winner.score.alignment,
                "risk": winner.score.risk,
                "subtask_count": winner.subtasks.len(),
            });
            let tool_names = winner.subtasks.iter().map(|s| s.tool_name.clone()).collect::<Vec<_>>().join(", ");
            let reason_embeddings = self
                .embeddings
                .embed_phase(reason_payload.to_string().as_str(), tool_names.as_str(), perception.to_string().as_str())
                .await
                .ok();

            self.cache
                .store(
                    task_id,
                    Phase::Reason,
                    ProcessStateRecord {
                        payload: reason_payload,
                        embeddings: reason_embeddings.unwrap_or_default(),
                    },
                )
                .await;

            let node = GraphNode::new(
                self.mint.mint("reasoning_branch", None),
                "reasoning_branch",
                json!({"task_id": task_id, "confidence": confidence.score()}),
                false,
            );
            self.memory.put(node, None).await?;

            // Order the runner-up branches by descending utility so that, if
            // the winner is vetoed by the Watchdog during Act, the engine
            // falls back to the next-best candidate instead of failing the
            // task outright.
            branches.sort_by(|a, b| {
                b.score
                    .utility(self.config.lambda)
                    .partial_cmp(&a.score.utility(self.config.lambda))
                    .unwrap_or(std::cmp::Ordering::Equal)
            });

            let mut ordered = Vec::with_capacity(branches.len() + 1);
            ordered.push(winner);
            ordered.extend(branches);

            return Ok(ordered);
        }

        unreachable!("loop always returns or errors within K_reason + 1 attempts")
    }

    /// Execute one subtask with retry/backoff. Returns `Ok((succeeded,
    /// retries_used, last_err))` for a non-veto outcome, or `Err` if the
    /// Watchdog vetoed the dispatch — a plan-level rejection the caller must
    /// propagate so `run` can fall back to the next-best branch. A free
    /// function (rather than a `&self` method) so it can be spawned onto a
    /// `JoinSet` behind an `Arc<ToolRegistry>` without cloning the engine.
    async fn execute_subtask(
        tools: &Arc<ToolRegistry>,
        subtask: &Subtask,
        retry_cap: usize,
    ) -> Result<(bool, usize, Option<Error>)> {
        let mut last_err = None;
        for retry in 0..=retry_cap {
            let mut args = subtask.args.clone();
            if let Some(obj) = args.as_object_mut() {
                obj.insert("__phase".to_string(), json!("act"));
            }
            match tools.call(&subtask.tool_name, args).await {
                Ok(_) => return Ok((true, retry, None)),
                Err(err @ (Error::DeniedByWatchdog(_) | Error::ImmutableTarget(_))) => return Err(err),
                Err(err) if err.is_fatal() => {
                    last_err = Some(err);
                    break;
                }
                Err(err) => {
                    last_err = Some(err);
                    if retry < retry_cap {
                        tokio::time::sleep(Duration::from_millis(50 * 2u64.pow(retry as u32))).await;
                    }
                }
            }
        }
        Ok((false, retry_cap, last_err))
    }

    /// Act phase: execute subtasks, re-evaluating the remaining plan's
    /// feasibility after each one. `parallelizable` subtasks run concurrently
    /// in batches bounded by `act_concurrency_cap`; once feasibility drops
    /// below `theta_plan`, the remaining plan is reordered (parallelizable
    /// subtasks brought forward) and already-attempted duplicates are
    /// skipped. Returns `Some(status)` if the task terminated early (Watchdog
    /// abort or failure), otherwise `None` to proceed to Reflect.
    async fn act(&self, task_id: Uuid, branch: PlannedBranch) -> Result<Option<TaskStatus>> {
        let mut remaining = branch.subtasks;
        let mut completed = 0usize;
        let mut plan_feasibility = branch.score.feasibility;
        let mut degraded = false;
        let mut attempted: Vec<(String, JsonValue)> = Vec::new();

        while !remaining.is_empty() {
            let batch_len = remaining.iter().take_while(|s| s.parallelizable).count().max(1).min(remaining.len());
            let batch: Vec<Subtask> = remaining.drain(..batch_len).collect();

            let mut outcomes = Vec::with_capacity(batch.len());
            if batch.len() == 1 {
                outcomes.push(Self::execute_subtask(&self.tools, &batch[0], self.config.subtask_retry_cap).await?);
            } else {
                for chunk in batch.chunks(self.config.act_concurrency_cap.max(1)) {
                    let mut set = tokio::task::JoinSet::new();
                    for (idx, subtask) in chunk.iter().enumerate() {
                        let subtask = subtask.clone();
                        let tools = self.tools.clone();
                        let retry_cap = self.config.subtask_retry_cap;
                        set.spawn(async move { (idx, Self::execute_subtask(&tools, &subtask, retry_cap).await) });
                    }
                    let mut chunk_outcomes: Vec<Option<Result<(bool, usize, Option<Error>)>>> =
                        (0..chunk.len()).map(|_| None).collect();
                    while let Some(joined) = set.join_next().await {
                        let (idx, outcome) = joined
                            .map_err(|e| Error::Internal(format!("act subtask task panicked: {e}")))?;
                        chunk_outcomes[idx] = Some(outcome);
                    }
                    for outcome in chunk_outcomes {
                        outcomes.push(outcome.expect("every spawned index is filled exactly once")?);
                    }
                }
            }

            for (subtask, (succeeded, retries_used, last_err)) in batch.iter().zip(outcomes.into_iter()) {
                let signal = self.watchdog.observe_outcome(task_id, succeeded).await?;
                if let Some(WatchdogSignal::Abort { reason, .. }) = signal {
                    self.cache.clear(task_id).await;
                    return Ok(Some(TaskStatus::Aborted(reason)));
                }

                if !succeeded {
                    let reason = last_err.map(|e| e.to_string()).unwrap_or_else(|| "subtask failed".to_string());
                    self.cache.clear(task_id).await;
                    return Ok(Some(TaskStatus::Failed(reason)));
                }

                attempted.push((subtask.tool_name.clone(), subtask.args.clone()));
                plan_feasibility = (plan_feasibility - 0.1 * retries_used as f64).max(0.0);
                completed += 1;
            }

            if !degraded && !remaining.is_empty() && plan_feasibility < self.config.theta_plan {
                degraded = true;
                let before = remaining.len();

                // Reorder: bring parallelizable subtasks forward so the
                // engine maximizes concurrent throughput on a degrading plan.
                remaining.sort_by_key(|s| !s.parallelizable);

                // Skip: drop subtasks that exactly duplicate one already
                // attempted this run — no value in repeating them.
                remaining.retain(|s| !attempted.iter().any(|(name, args)| name == &s.tool_name && args == &s.args));
                let skipped = before - remaining.len();

                self.audit
                    .emit(
                        "prar_engine",
                        "act_plan_degraded",
                        Some(task_id),
                        json!({
                            "plan_feasibility": plan_feasibility,
                            "theta_plan": self.config.theta_plan,
                            "reordered": true,
                            "skipped": skipped,
                        }),
                    )
                    .await?;
            }

            let act_payload = json!({"completed_subtasks": completed, "plan_feasibility": plan_feasibility});
            let act_embeddings = self
                .embeddings
                .embed_phase(
                    act_payload.to_string().as_str(),
                    attempted.iter().map(|(name, _)| name.clone()).collect::<Vec<_>>().join(", ").as_str(),
                    task_id.to_string().as_str(),
                )
                .await
                .ok();
            self.cache
                .store(
                    task_id,
                    Phase::Act,
                    ProcessStateRecord {
                        payload: act_payload,
                        embeddings: act_embeddings.unwrap_or_default(),
                    },
                )
                .await;
        }

        Ok(None)
    }

    /// Reflect phase: retrieve the full chain, compute a holistic embedding,
    /// emit learnings/patterns/proposals, promote the process document, and
    /// clear the short-term cache.
    async fn reflect(&self, task_id: Uuid) -> Result<TaskStatus> {
        let chain = self.cache.retrieve_all(task_id).await;
        let chain_summary: Vec<JsonValue> = chain.iter().map(|(phase, record)| {
            json!({"phase": format!("{phase:?}"), "payload": record.payload})
        }).collect();
        let chain_summary = json!({"task_id": task_id, "chain": chain_summary});

        let outcome = self.reflector.reflect(&chain_summary).await?;

        let phase_summary = |phase: Phase| -> Option<Embedding> {
            chain
                .iter()
                .find(|(p, _)| *p == phase)
                .and_then(|(_, record)| record.embeddings.summary.clone())
        };
        let holistic = match (phase_summary(Phase::Perceive), phase_summary(Phase::Reason), phase_summary(Phase::Act)) {
            (Some(perceive), Some(reason), Some(act)) => self
                .embeddings
                .combine_holistic(&perceive, &reason, &act, self.config.reflect_weights)
                .ok(),
            _ => None,
        };

        let root = GraphNode::new(
            task_id,
            "process",
            json!({
                "chain": chain_summary,
                "learnings": outcome.learnings,
                "pattern_count": outcome.patterns.len(),
                "proposal_count": outcome.proposals.len(),
            }),
            false,
        );
        let embeddings = holistic.map(|h| PhaseEmbeddings {
            holistic: Some(h),
            ..Default::default()
        });
        self.memory.put(root, embeddings).await?;

        for pattern in &outcome.patterns {
            let pattern_id = self.mint.mint("pattern", None);
            let node = GraphNode::new(pattern_id, "pattern", pattern.clone(), false);
            self.memory.put(node, None).await?;
            self.memory.link(task_id, relations::DISCOVERED, pattern_id).await?;
        }

        self.audit
            .emit(
                "prar_engine",
                "task_completed",
                Some(task_id),
                json!({"learnings": outcome.learnings.len(), "proposals": outcome.proposals.len()}),
            )
            .await?;

        self.cache.clear(task_id).await;
        Ok(TaskStatus::Completed)
    }
}
