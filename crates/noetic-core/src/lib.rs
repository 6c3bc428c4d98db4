//! A self-evolving agent runtime built around the Perceive-Reason-Act-Reflect
//! cycle: a dual-memory substrate (graph + vector + key-value stores), a
//! tool registry spanning built-in, external-server, and delegated-agent
//! handlers, an independent Watchdog supervisor, and an archive-driven
//! evolution controller gated behind persona consensus.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                           PRAREngine                              │
//! │   perceive → reason → act → reflect, one task at a time           │
//! ├──────────────────┬───────────────────┬────────────────┬──────────┤
//! │  MemorySubstrate  │   ToolRegistry    │    Watchdog    │ Persona  │
//! │  graph + vector   │  built-in/server/ │  authorize,    │ Orchestr-│
//! │  + kv stores      │  delegated-agent  │  integrity,    │ ator     │
//! │                   │  handlers         │  health,       │          │
//! │                   │                   │  evolution     │          │
//! ├──────────────────┴───────────────────┴────────────────┴──────────┤
//! │            ShortTermCache (per-task phase state)                  │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                   AuditJournal (append-only log)                  │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

pub mod error;
pub mod identity;
pub mod concept;
pub mod confidence;
pub mod embeddings;
pub mod graph_store;
pub mod vector_store;
pub mod kv_store;
pub mod memory_substrate;
pub mod audit;
pub mod audit_journal;
pub mod short_term_cache;
pub mod tool_registry;
pub mod persona;
pub mod watchdog;
pub mod evolution_controller;
pub mod prar_engine;
pub mod task_scheduler;
pub mod config;

pub use error::{Error, Result};
pub use identity::IdentityMint;

pub use concept::{CodeSnapshot, Concept, ConceptBuilder, Mutability};

pub use confidence::{BranchScore, PerceiveFactors, PhaseConfidence, ReasonFactors, select_branch};

pub use embeddings::{
    DeterministicTestEmbedder, Embedder, Embedding, EmbeddingPipeline, NullEmbedder, PhaseEmbeddings, ReflectWeights,
    EMBEDDING_DIM,
};

pub use graph_store::{relations, Direction, GraphEdge, GraphNode, GraphStore};

pub use vector_store::{SearchResult as VectorSearchResult, VectorStore, KIND_CONTEXT, KIND_HOLISTIC, KIND_KEY_POINTS, KIND_SUMMARY};

pub use kv_store::{scoped_key, KVStore, SqliteKVStore};

pub use memory_substrate::{HydratedRecord, MemorySubstrate};

pub use audit::{AuditEvent, AuditPartition};
pub use audit_journal::{AuditFilter, AuditJournal};

pub use short_term_cache::{Phase, ProcessStateRecord, ShortTermCache};

pub use tool_registry::{DispatchAuthorizer, ToolClass, ToolDescriptor, ToolHandler, ToolRegistry};

pub use persona::{
    default_roster, EvolutionProposal, HeuristicPersona, Persona, PersonaAnalysis, PersonaOrchestrator, ConsensusResult,
    MAX_WEIGHT_ADJUSTMENT_PER_CYCLE,
};

pub use watchdog::{EvolutionApproval, TestRunner, ToolHealth, Watchdog, WatchdogAuthorizer, WatchdogConfig, WatchdogSignal};

pub use evolution_controller::{
    ArchiveUtilityWeights, ArchivedIteration, EvolutionController, EvolutionOutcome, KIND_EVOLUTION_ITERATION,
};

pub use prar_engine::{
    PRAREngine, Perceiver, PlannedBranch, PrarConfig, Reasoner, ReflectionOutcome, Reflector, Retriever, Subtask,
    TaskStatus,
};

pub use task_scheduler::{AdmissionDecision, ScheduledTask, TaskScheduler};

pub use config::{
    build_roster, ArchiveUtilityWeightsSettings, ConfigLevel, ConfigLoader, NoeticConfig, PersonaSettings,
    PolicyAction, PolicyBuilder, PolicyConfig, PolicyEnforcer,
};

pub const VERSION_MAJOR: u32 = 0;
pub const VERSION_MINOR: u32 = 1;
pub const VERSION_PATCH: u32 = 0;

/// Returns the library version as a semantic version string.
pub fn version() -> String {
    format!("{VERSION_MAJOR}.{VERSION_MINOR}.{VERSION_PATCH}")
}
