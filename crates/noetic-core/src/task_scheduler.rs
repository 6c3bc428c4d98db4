//! `TaskScheduler`: admission control and concurrency bounding in front of
//! `PRAREngine`. Holds a fixed-size pool of permits (`act_concurrency_cap`),
//! enforces per-task deadlines, propagates cancellation, and guarantees
//! `ShortTermCache` cleanup on every terminal outcome — including ones the
//! engine itself didn't reach (deadline, cancellation).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value as JsonValue;
use tokio::sync::{watch, Mutex, RwLock, Semaphore};
use tokio::time::timeout;
use uuid::Uuid;

use crate::audit_journal::AuditJournal;
use crate::error::{Error, Result};
use crate::prar_engine::{PRAREngine, TaskStatus};
use crate::short_term_cache::ShortTermCache;

/// Why a task was or wasn't admitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdmissionDecision {
    Admitted,
    Rejected(String),
}

/// A task under the scheduler's management.
pub struct ScheduledTask {
    pub id: Uuid,
    pub goal: String,
    pub environment: JsonValue,
    pub deadline: Option<Duration>,
    cancel_tx: watch::Sender<bool>,
}

impl ScheduledTask {
    pub fn new(id: Uuid, goal: impl Into<String>, environment: JsonValue, deadline: Option<Duration>) -> Self {
        let (cancel_tx, _) = watch::channel(false);
        Self { id, goal: goal.into(), environment, deadline, cancel_tx }
    }

    /// Request cooperative cancellation; does not interrupt in-flight tool
    /// calls, but short-circuits the scheduler's wait before the next phase.
    pub fn cancel(&self) {
        let _ = self.cancel_tx.send(true);
    }

    fn cancel_receiver(&self) -> watch::Receiver<bool> {
        self.cancel_tx.subscribe()
    }
}

/// Bounds how many tasks run `PRAREngine::run` concurrently and tracks
/// each task's terminal `TaskStatus`.
pub struct TaskScheduler {
    engine: Arc<PRAREngine>,
    cache: Arc<ShortTermCache>,
    audit: Arc<AuditJournal>,
    permits: Arc<Semaphore>,
    max_queue_depth: usize,
    running: Arc<Mutex<HashMap<Uuid, Arc<ScheduledTask>>>>,
    results: Arc<RwLock<HashMap<Uuid, TaskStatus>>>,
}

impl TaskScheduler {
    pub fn new(
        engine: Arc<PRAREngine>,
        cache: Arc<ShortTermCache>,
        audit: Arc<AuditJournal>,
        concurrency_cap: usize,
        max_queue_depth: usize,
    ) -> Self {
        Self {
            engine,
            cache,
            audit,
            permits: Arc::new(Semaphore::new(concurrency_cap)),
            max_queue_depth,
            running: Arc::new(Mutex::new(HashMap::new())),
            results: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Admit a task if the queue has room; a rejected task is never started.
    #[tracing::instrument(skip(self, task), fields(task_id = %task.id))]
    pub async fn admit(&self, task: ScheduledTask) -> Result<AdmissionDecision> {
        let mut running = self.running.lock().await;
        if running.len() >= self.max_queue_depth {
            tracing::warn!(queue_depth = running.len(), max_queue_depth = self.max_queue_depth, "rejecting task, queue at capacity");
            return Ok(AdmissionDecision::Rejected(format!(
                "queue depth {} at capacity {}",
                running.len(),
                self.max_queue_depth
            )));
        }
        self.audit.emit("scheduler", "task_admitted", Some(task.id), serde_json::json!({"goal": task.goal})).await?;
        tracing::info!("task admitted");
        running.insert(task.id, Arc::new(task));
        Ok(AdmissionDecision::Admitted)
    }

    /// Acquire a concurrency permit, run the task to completion (or
    /// deadline/cancellation), and record its terminal status. Cleans up the
    /// short-term cache and running-set entry regardless of outcome.
    #[tracing::instrument(skip(self))]
    pub async fn run(&self, task_id: Uuid) -> Result<TaskStatus> {
        let task = {
            let running = self.running.lock().await;
            running.get(&task_id).cloned().ok_or_else(|| Error::NotFound(format!("task {task_id} not admitted")))?
        };

        let permit = self.permits.clone().acquire_owned().await.map_err(|_| Error::Cancelled(task_id.to_string()))?;
        let mut cancel_rx = task.cancel_receiver();

        let engine = self.engine.clone();
        let goal = task.goal.clone();
        let environment = task.environment.clone();
        let run_future = engine.run(task_id, &goal, environment);

        let status = tokio::select! {
            result = self.bounded(run_future, task.deadline) => {
                match result {
                    Ok(status) => status,
                    Err(e) => TaskStatus::Failed(e.to_string()),
                }
            }
            _ = cancel_rx.changed() => {
                TaskStatus::Aborted("cancelled by caller".to_string())
            }
        };

        drop(permit);
        self.cache.clear(task_id).await;
        self.running.lock().await.remove(&task_id);
        self.results.write().await.insert(task_id, status.clone());
        tracing::info!(status = ?status, "task reached terminal state");
        self.audit
            .emit(
                "scheduler",
                "task_terminal",
                Some(task_id),
                serde_json::json!({"status": format!("{status:?}")}),
            )
            .await?;
        Ok(status)
    }

    async fn bounded(
        &self,
        fut: impl std::future::Future<Output = Result<TaskStatus>>,
        deadline: Option<Duration>,
    ) -> Result<TaskStatus> {
        match deadline {
            Some(d) => match timeout(d, fut).await {
                Ok(result) => result,
                Err(_) => Err(Error::Timeout(format!("task exceeded deadline {d:?}"))),
            },
            None => fut.await,
        }
    }

    pub async fn status_of(&self, task_id: Uuid) -> Option<TaskStatus> {
        self.results.read().await.get(&task_id).cloned()
    }

    pub async fn running_count(&self) -> usize {
        self.running.lock().await.len()
    }

    pub async fn cancel(&self, task_id: Uuid) -> Result<()> {
        let running = self.running.lock().await;
        let task = running.get(&task_id).ok_or_else(|| Error::NotFound(format!("task {task_id} not running")))?;
        task.cancel();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use serde_json::json;

    use super::*;
    use crate::audit_journal::AuditJournal;
    use crate::confidence::{BranchScore, PerceiveFactors, ReasonFactors};
    use crate::embeddings::{DeterministicTestEmbedder, EmbeddingPipeline};
    use crate::graph_store::sqlite::SqliteGraphStore;
    use crate::identity::IdentityMint;
    use crate::kv_store::SqliteKVStore;
    use crate::memory_substrate::MemorySubstrate;
    use crate::prar_engine::{Perceiver, PlannedBranch, Reasoner, ReflectionOutcome, Reflector, Subtask};
    use crate::short_term_cache::ShortTermCache;
    use crate::tool_registry::{ToolHandler, ToolRegistry};
    use crate::vector_store::sqlite::SqliteVectorStore;
    use crate::watchdog::{Watchdog, WatchdogConfig};

    struct FixedPerceiver;
    #[async_trait]
    impl Perceiver for FixedPerceiver {
        async fn perceive(&self, _goal: &str, _context: &JsonValue) -> Result<(PerceiveFactors, JsonValue)> {
            Ok((PerceiveFactors::new(0.9, 0.9, 0.9), json!({"summary": "ok"})))
        }
    }

    struct NoopHandler(Arc<AtomicUsize>);
    #[async_trait]
    impl ToolHandler for NoopHandler {
        async fn call(&self, _args: JsonValue) -> Result<JsonValue> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(json!({}))
        }
    }

    struct OneBranchReasoner;
    #[async_trait]
    impl Reasoner for OneBranchReasoner {
        async fn reason(
            &self,
            _perception: &JsonValue,
            _recall: &[JsonValue],
        ) -> Result<(ReasonFactors, Vec<PlannedBranch>)> {
            Ok((
                ReasonFactors::new(0.8, 0.8, 0.8, 0.8, 0.1),
                vec![PlannedBranch {
                    score: BranchScore::new(0.9, 0.9, 0.1),
                    subtasks: vec![Subtask { tool_name: "noop".to_string(), args: json!({}), parallelizable: false }],
                }],
            ))
        }
    }

    struct NoopReflector;
    #[async_trait]
    impl Reflector for NoopReflector {
        async fn reflect(&self, _chain_summary: &JsonValue) -> Result<ReflectionOutcome> {
            Ok(ReflectionOutcome::default())
        }
    }

    async fn build_scheduler_with_queue(cap: usize, max_queue_depth: usize) -> (TaskScheduler, Arc<AtomicUsize>) {
        let mint = IdentityMint::deterministic();
        let graph: Arc<dyn crate::graph_store::GraphStore> = Arc::new(SqliteGraphStore::new_in_memory().unwrap());
        let vector: Arc<dyn crate::vector_store::VectorStore> = Arc::new(SqliteVectorStore::new_in_memory().unwrap());
        let kv: Arc<dyn crate::kv_store::KVStore> = Arc::new(SqliteKVStore::new_in_memory().unwrap());
        let audit = Arc::new(AuditJournal::new(graph.clone(), mint));
        let memory = Arc::new(MemorySubstrate::new(graph, vector, kv, mint, Some(audit.clone())));
        let cache = Arc::new(ShortTermCache::new(Duration::from_secs(60), Some(audit.clone()), mint));
        let embeddings = Arc::new(EmbeddingPipeline::new(Box::new(DeterministicTestEmbedder::default())));
        let calls = Arc::new(AtomicUsize::new(0));
        let tools = Arc::new(ToolRegistry::new(None, Some(audit.clone())));
        tools
            .register(
                "noop",
                "no-op test tool",
                crate::tool_registry::ToolClass::BuiltIn,
                json!({}),
                Arc::new(NoopHandler(calls.clone())),
            )
            .await
            .unwrap();
        let watchdog = Arc::new(Watchdog::new(WatchdogConfig::default(), audit.clone()));

        let engine = Arc::new(PRAREngine::new(
            crate::prar_engine::PrarConfig::default(),
            memory,
            cache.clone(),
            embeddings,
            tools,
            watchdog,
            audit.clone(),
            mint,
            Arc::new(FixedPerceiver),
            Arc::new(OneBranchReasoner),
            Arc::new(NoopReflector),
            None,
        ));

        (TaskScheduler::new(engine, cache, audit, cap, max_queue_depth), calls)
    }

    async fn build_scheduler(cap: usize) -> (TaskScheduler, Arc<AtomicUsize>) {
        build_scheduler_with_queue(cap, 16).await
    }

    #[tokio::test]
    async fn admitted_task_runs_to_completion() {
        let (scheduler, calls) = build_scheduler(2).await;
        let task_id = Uuid::new_v4();
        let task = ScheduledTask::new(task_id, "do the thing", json!({}), None);
        assert_eq!(scheduler.admit(task).await.unwrap(), AdmissionDecision::Admitted);

        let status = scheduler.run(task_id).await.unwrap();
        assert_eq!(status, TaskStatus::Completed);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.running_count().await, 0);
        assert_eq!(scheduler.status_of(task_id).await, Some(TaskStatus::Completed));
    }

    #[tokio::test]
    async fn queue_at_capacity_rejects_admission() {
        let (scheduler, _calls) = build_scheduler_with_queue(1, 1).await;

        let first = ScheduledTask::new(Uuid::new_v4(), "first", json!({}), None);
        assert_eq!(scheduler.admit(first).await.unwrap(), AdmissionDecision::Admitted);

        let second = ScheduledTask::new(Uuid::new_v4(), "second", json!({}), None);
        match scheduler.admit(second).await.unwrap() {
            AdmissionDecision::Rejected(_) => {}
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn cancelled_task_aborts_before_completion() {
        let (scheduler, _calls) = build_scheduler(2).await;
        let task_id = Uuid::new_v4();
        let task = ScheduledTask::new(task_id, "do the thing", json!({}), None);
        scheduler.admit(task).await.unwrap();
        scheduler.cancel(task_id).await.unwrap();

        let status = scheduler.run(task_id).await.unwrap();
        assert!(matches!(status, TaskStatus::Aborted(_) | TaskStatus::Completed));
    }
}
