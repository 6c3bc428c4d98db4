//! `Watchdog`: an independent supervisor running concurrently with
//! `PRAREngine`, responsible for pre-dispatch authorization, immutable-tier
//! integrity checks, execution monitoring, resident-tool health, and
//! evolution approval. Every decision is recorded as an `AuditEvent`.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use serde_json::{json, Value as JsonValue};
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use crate::audit_journal::AuditJournal;
use crate::concept::Concept;
use crate::error::{Error, Result};
use crate::persona::EvolutionProposal;
use crate::tool_registry::DispatchAuthorizer;

/// Allow-/deny-list and per-phase budget enforced before any tool dispatch.
#[derive(Debug, Clone, Default)]
pub struct WatchdogConfig {
    pub denied_tools: HashSet<String>,
    pub allowed_tools: Option<HashSet<String>>,
    pub per_phase_budget: HashMap<String, usize>,
    pub immutable_path_globs: Vec<String>,
    pub quarantine_window: Duration,
    pub abort_on_consecutive_failures: usize,
}

const REGEX_METACHARACTERS: &str = r"\.+()|[]{}^$";

fn glob_to_regex(glob: &str) -> Result<Regex> {
    let mut pattern = String::from("^");
    for ch in glob.chars() {
        match ch {
            '*' => pattern.push_str(".*"),
            '?' => pattern.push('.'),
            c if REGEX_METACHARACTERS.contains(c) => {
                pattern.push('\\');
                pattern.push(c);
            }
            c => pattern.push(c),
        }
    }
    pattern.push('$');
    Regex::new(&pattern).map_err(|e| Error::Configuration(format!("invalid immutable_paths glob `{glob}`: {e}")))
}

/// Non-fatal guidance injected into a running task, or a severe-violation
/// abort signal.
#[derive(Debug, Clone)]
pub enum WatchdogSignal {
    Advisory { task_id: Uuid, message: String },
    Abort { task_id: Uuid, reason: String },
}

/// Tool-adapter health observation.
#[derive(Debug, Clone)]
pub struct ToolHealth {
    pub tool_name: String,
    pub healthy: bool,
}

/// Result of an evolution-approval pass.
#[derive(Debug, Clone)]
pub enum EvolutionApproval {
    Approved { checkpoint_id: Uuid },
    Rejected { reason: String },
    RolledBack { checkpoint_id: Uuid, reason: String },
}

/// Injectable test-suite runner, the same seam shape as `Embedder` and
/// `ToolHandler`: `Watchdog` never runs a concrete test harness itself.
#[async_trait]
pub trait TestRunner: Send + Sync {
    async fn run_tests(&self, target: Uuid) -> Result<bool>;
}

struct PerTaskFailureCounter {
    consecutive_failures: usize,
}

pub struct Watchdog {
    config: RwLock<WatchdogConfig>,
    audit: Arc<AuditJournal>,
    failure_counts: Mutex<HashMap<Uuid, PerTaskFailureCounter>>,
    call_counts: Mutex<HashMap<(Uuid, String), usize>>,
}

impl Watchdog {
    pub fn new(config: WatchdogConfig, audit: Arc<AuditJournal>) -> Self {
        Self {
            config: RwLock::new(config),
            audit,
            failure_counts: Mutex::new(HashMap::new()),
            call_counts: Mutex::new(HashMap::new()),
        }
    }

    /// Responsibility 1: pre-dispatch authorization. Enforces the allow-/
    /// deny-list and a per-phase call budget.
    pub async fn authorize_dispatch(&self, phase: &str, tool_name: &str) -> Result<()> {
        let config = self.config.read().await;

        if config.denied_tools.contains(tool_name) {
            tracing::warn!(tool_name, phase, "denying dispatch: tool is denylisted");
            self.audit
                .emit("watchdog", "deny", None, json!({"tool": tool_name, "reason": "denylisted"}))
                .await?;
            return Err(Error::DeniedByWatchdog(format!("tool `{tool_name}` is denylisted")));
        }
        if let Some(allowed) = &config.allowed_tools {
            if !allowed.contains(tool_name) {
                self.audit
                    .emit("watchdog", "deny", None, json!({"tool": tool_name, "reason": "not_allowlisted"}))
                    .await?;
                return Err(Error::DeniedByWatchdog(format!("tool `{tool_name}` is not allowlisted")));
            }
        }

        if let Some(budget) = config.per_phase_budget.get(phase) {
            let mut counts = self.call_counts.lock().await;
            let key = (Uuid::nil(), phase.to_string());
            let used = counts.entry(key).or_insert(0);
            if *used >= *budget {
                self.audit
                    .emit("watchdog", "deny", None, json!({"tool": tool_name, "reason": "phase_budget_exhausted"}))
                    .await?;
                return Err(Error::DeniedByWatchdog(format!("phase `{phase}` exhausted its call budget")));
            }
            *used += 1;
        }

        Ok(())
    }

    /// Responsibility 2: reject any proposal that would modify an immutable
    /// concept, either by `Concept.mutability` or by `immutable_path_globs`
    /// matching the concept's name.
    pub async fn check_immutable_target(&self, concept: &Concept, path_hint: Option<&str>) -> Result<()> {
        if concept.is_immutable() {
            self.audit
                .emit(
                    "watchdog",
                    "integrity_reject",
                    Some(concept.id()),
                    json!({"reason": "immutable_concept"}),
                )
                .await?;
            return Err(Error::ImmutableTarget(format!("concept `{}` is immutable", concept.name())));
        }

        if let Some(path) = path_hint {
            let config = self.config.read().await;
            for glob in &config.immutable_path_globs {
                if glob_to_regex(glob)?.is_match(path) {
                    self.audit
                        .emit(
                            "watchdog",
                            "integrity_reject",
                            Some(concept.id()),
                            json!({"reason": "immutable_path", "path": path, "glob": glob}),
                        )
                        .await?;
                    return Err(Error::ImmutableTarget(format!("path `{path}` matches immutable glob `{glob}`")));
                }
            }
        }
        Ok(())
    }

    /// Responsibility 3: execution monitoring at a configurable cadence.
    /// Called once per observed outcome (success/failure) for a task;
    /// returns an advisory or abort signal once failures cross the
    /// configured threshold.
    pub async fn observe_outcome(&self, task_id: Uuid, succeeded: bool) -> Result<Option<WatchdogSignal>> {
        let mut counts = self.failure_counts.lock().await;
        let entry = counts.entry(task_id).or_insert(PerTaskFailureCounter { consecutive_failures: 0 });

        if succeeded {
            entry.consecutive_failures = 0;
            return Ok(None);
        }

        entry.consecutive_failures += 1;
        let threshold = self.config.read().await.abort_on_consecutive_failures;

        if threshold > 0 && entry.consecutive_failures >= threshold {
            tracing::error!(%task_id, consecutive_failures = entry.consecutive_failures, "aborting task after repeated failures");
            self.audit
                .emit(
                    "watchdog",
                    "abort",
                    Some(task_id),
                    json!({"consecutive_failures": entry.consecutive_failures}),
                )
                .await?;
            return Ok(Some(WatchdogSignal::Abort {
                task_id,
                reason: format!("{} consecutive subtask failures", entry.consecutive_failures),
            }));
        }

        let message = format!("{} consecutive failures observed; consider revising the plan", entry.consecutive_failures);
        self.audit
            .emit("watchdog", "advisory", Some(task_id), json!({"message": message}))
            .await?;
        Ok(Some(WatchdogSignal::Advisory { task_id, message }))
    }

    /// Responsibility 4: resident-tool health observation. Reports eviction
    /// events and the backoff a dependent task should wait before resuming.
    pub async fn check_tool_health(&self, observations: &[ToolHealth]) -> Result<Vec<Duration>> {
        let mut warmups = Vec::new();
        for observation in observations {
            if !observation.healthy {
                self.audit
                    .emit(
                        "watchdog",
                        "tool_eviction",
                        None,
                        json!({"tool": observation.tool_name, "type": "eviction"}),
                    )
                    .await?;
                warmups.push(Duration::from_secs(5));
            }
        }
        Ok(warmups)
    }

    /// Responsibility 5: evolution approval. Rejects proposals touching
    /// immutable targets, otherwise checkpoints, runs the test suite, and
    /// either approves or rolls back.
    pub async fn approve_evolution(
        &self,
        proposal: &EvolutionProposal,
        target: &Concept,
        test_runner: &dyn TestRunner,
    ) -> Result<EvolutionApproval> {
        if let Err(err) = self.check_immutable_target(target, None).await {
            return Ok(EvolutionApproval::Rejected { reason: err.to_string() });
        }

        let checkpoint_id = Uuid::new_v4();
        self.audit
            .emit(
                "watchdog",
                "checkpoint_created",
                Some(proposal.target_concept),
                json!({"checkpoint_id": checkpoint_id, "proposal_id": proposal.id}),
            )
            .await?;

        let tests_passed = test_runner.run_tests(proposal.target_concept).await?;

        if tests_passed {
            self.audit
                .emit(
                    "watchdog",
                    "evolution_approved",
                    Some(proposal.target_concept),
                    json!({"checkpoint_id": checkpoint_id, "proposal_id": proposal.id}),
                )
                .await?;
            Ok(EvolutionApproval::Approved { checkpoint_id })
        } else {
            self.audit
                .emit(
                    "watchdog",
                    "evolution_rolled_back",
                    Some(proposal.target_concept),
                    json!({"checkpoint_id": checkpoint_id, "proposal_id": proposal.id}),
                )
                .await?;
            Ok(EvolutionApproval::RolledBack {
                checkpoint_id,
                reason: "test suite failed post-deploy".to_string(),
            })
        }
    }

    pub async fn update_config(&self, config: WatchdogConfig) {
        *self.config.write().await = config;
    }
}

/// Adapts `Watchdog` to the `ToolRegistry`'s pre-dispatch veto hook. The
/// phase is threaded in via `args["__phase"]` so the registry's flat
/// `Call(name, args)` shape doesn't need a dedicated phase parameter.
pub struct WatchdogAuthorizer {
    watchdog: Arc<Watchdog>,
}

impl WatchdogAuthorizer {
    pub fn new(watchdog: Arc<Watchdog>) -> Self {
        Self { watchdog }
    }
}

#[async_trait]
impl DispatchAuthorizer for WatchdogAuthorizer {
    async fn authorize(&self, tool_name: &str, args: &JsonValue) -> Result<()> {
        let phase = args.get("__phase").and_then(|v| v.as_str()).unwrap_or("unknown");
        self.watchdog.authorize_dispatch(phase, tool_name).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph_store::SqliteGraphStore;
    use crate::identity::IdentityMint;

    fn watchdog(config: WatchdogConfig) -> Watchdog {
        let graph: Arc<dyn crate::graph_store::GraphStore> = Arc::new(SqliteGraphStore::new_in_memory().unwrap());
        let audit = Arc::new(AuditJournal::new(graph, IdentityMint::deterministic()));
        Watchdog::new(config, audit)
    }

    #[tokio::test]
    async fn denylisted_tool_is_rejected() {
        let mut config = WatchdogConfig::default();
        config.denied_tools.insert("rm.force".to_string());
        let watchdog = watchdog(config);

        let err = watchdog.authorize_dispatch("act", "rm.force").await.unwrap_err();
        assert!(matches!(err, Error::DeniedByWatchdog(_)));
    }

    #[tokio::test]
    async fn allowlist_rejects_anything_not_named() {
        let mut config = WatchdogConfig::default();
        config.allowed_tools = Some(["fs.read_file".to_string()].into_iter().collect());
        let watchdog = watchdog(config);

        assert!(watchdog.authorize_dispatch("act", "fs.read_file").await.is_ok());
        assert!(watchdog.authorize_dispatch("act", "fs.write_file").await.is_err());
    }

    #[tokio::test]
    async fn per_phase_budget_is_enforced() {
        let mut config = WatchdogConfig::default();
        config.per_phase_budget.insert("act".to_string(), 1);
        let watchdog = watchdog(config);

        assert!(watchdog.authorize_dispatch("act", "tool.a").await.is_ok());
        assert!(watchdog.authorize_dispatch("act", "tool.b").await.is_err());
    }

    #[tokio::test]
    async fn immutable_concept_rejects_evolution() {
        let watchdog = watchdog(WatchdogConfig::default());
        let concept = Concept::builder().name("core-kernel").mutability(crate::concept::Mutability::Immutable).build().unwrap();

        let err = watchdog.check_immutable_target(&concept, None).await.unwrap_err();
        assert!(matches!(err, Error::ImmutableTarget(_)));
    }

    #[tokio::test]
    async fn immutable_path_glob_matches() {
        let mut config = WatchdogConfig::default();
        config.immutable_path_globs.push("src/watchdog.rs".to_string());
        let watchdog = watchdog(config);
        let concept = Concept::builder().name("watchdog-module").build().unwrap();

        let err = watchdog
            .check_immutable_target(&concept, Some("src/watchdog.rs"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ImmutableTarget(_)));
    }

    #[tokio::test]
    async fn consecutive_failures_trigger_abort() {
        let mut config = WatchdogConfig::default();
        config.abort_on_consecutive_failures = 2;
        let watchdog = watchdog(config);
        let task_id = Uuid::new_v4();

        let first = watchdog.observe_outcome(task_id, false).await.unwrap();
        assert!(matches!(first, Some(WatchdogSignal::Advisory { .. })));

        let second = watchdog.observe_outcome(task_id, false).await.unwrap();
        assert!(matches!(second, Some(WatchdogSignal::Abort { .. })));
    }

    struct AlwaysPass;
    #[async_trait]
    impl TestRunner for AlwaysPass {
        async fn run_tests(&self, _target: Uuid) -> Result<bool> {
            Ok(true)
        }
    }

    struct AlwaysFail;
    #[async_trait]
    impl TestRunner for AlwaysFail {
        async fn run_tests(&self, _target: Uuid) -> Result<bool> {
            Ok(false)
        }
    }

    fn proposal() -> EvolutionProposal {
        EvolutionProposal {
            id: Uuid::new_v4(),
            description: "test".to_string(),
            target_concept: Uuid::new_v4(),
            estimated_cost: 0.1,
            estimated_risk: 0.1,
        }
    }

    #[tokio::test]
    async fn evolution_approval_passes_when_tests_pass() {
        let watchdog = watchdog(WatchdogConfig::default());
        let target = Concept::builder().name("evolvable-module").mutability(crate::concept::Mutability::Evolvable).build().unwrap();

        let approval = watchdog.approve_evolution(&proposal(), &target, &AlwaysPass).await.unwrap();
        assert!(matches!(approval, EvolutionApproval::Approved { .. }));
    }

    #[tokio::test]
    async fn evolution_rolls_back_when_tests_fail() {
        let watchdog = watchdog(WatchdogConfig::default());
        let target = Concept::builder().name("evolvable-module").mutability(crate::concept::Mutability::Evolvable).build().unwrap();

        let approval = watchdog.approve_evolution(&proposal(), &target, &AlwaysFail).await.unwrap();
        assert!(matches!(approval, EvolutionApproval::RolledBack { .. }));
    }
}
