//! Centralized error taxonomy.
//!
//! Every fallible boundary in the runtime returns this enum so callers can
//! match on failure class instead of parsing message strings. Variants map
//! directly onto the engine's phase-failure taxonomy; the ambient variants
//! at the bottom cover infrastructure failures (serialization, locking, I/O)
//! that don't belong to any single phase.

use thiserror::Error;

/// Primary error type for the noetic runtime.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// Perception could not produce a usable task representation.
    #[error("unperceivable: {0}")]
    Unperceivable(String),

    /// Reasoning could not produce an actionable plan.
    #[error("unplanable: {0}")]
    Unplanable(String),

    /// Watchdog vetoed a dispatch before it reached a handler.
    #[error("denied by watchdog: {0}")]
    DeniedByWatchdog(String),

    /// An external-server or delegated-agent adapter is unreachable.
    #[error("adapter unavailable: {0}")]
    AdapterUnavailable(String),

    /// Tool invocation arguments or results failed schema validation.
    #[error("schema invalid: {0}")]
    SchemaInvalid(String),

    /// A bounded operation exceeded its deadline.
    #[error("timeout: {0}")]
    Timeout(String),

    /// GraphStore, VectorStore, or KVStore is unreachable or failing.
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    /// The shared-id invariant or another cross-store invariant was violated.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    /// Attempted mutation of an immutable-tier target.
    #[error("immutable target: {0}")]
    ImmutableTarget(String),

    /// Task admission was refused because a quota or concurrency cap was exceeded.
    #[error("overloaded: {0}")]
    Overloaded(String),

    /// Task was cancelled before completion.
    #[error("cancelled: {0}")]
    Cancelled(String),

    /// A tool or persona handler returned an application-level failure.
    #[error("handler error: {0}")]
    HandlerError(String),

    /// Content hash or other integrity check failed.
    #[error("integrity mismatch: {0}")]
    IntegrityMismatch(String),

    /// PersonaOrchestrator could not reach theta_consensus.
    #[error("no consensus: {0}")]
    NoConsensus(String),

    /// Vector dimensionality did not match the embedder's declared width.
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Embedder is unavailable or failed to produce a vector.
    #[error("embedder unavailable: {0}")]
    EmbedderUnavailable(String),

    /// Configuration is missing, malformed, or fails validation.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Lookup by id found nothing.
    #[error("not found: {0}")]
    NotFound(String),

    /// A uniqueness or ordering constraint was violated.
    #[error("conflict: {0}")]
    Conflict(String),

    /// A lock was poisoned or could not be acquired.
    #[error("lock error: {0}")]
    LockError(String),

    /// Generic I/O failure.
    #[error("I/O error: {0}")]
    Io(String),

    /// Serialization/deserialization failure.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Unexpected internal error that doesn't fit another variant.
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Stable, lowercase identifier for the error's variant, suitable for
    /// AuditEvent payloads and metrics labels.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Error::Unperceivable(_) => "unperceivable",
            Error::Unplanable(_) => "unplanable",
            Error::DeniedByWatchdog(_) => "denied_by_watchdog",
            Error::AdapterUnavailable(_) => "adapter_unavailable",
            Error::SchemaInvalid(_) => "schema_invalid",
            Error::Timeout(_) => "timeout",
            Error::StoreUnavailable(_) => "store_unavailable",
            Error::InvariantViolation(_) => "invariant_violation",
            Error::ImmutableTarget(_) => "immutable_target",
            Error::Overloaded(_) => "overloaded",
            Error::Cancelled(_) => "cancelled",
            Error::HandlerError(_) => "handler_error",
            Error::IntegrityMismatch(_) => "integrity_mismatch",
            Error::NoConsensus(_) => "no_consensus",
            Error::DimensionMismatch { .. } => "dimension_mismatch",
            Error::EmbedderUnavailable(_) => "embedder_unavailable",
            Error::Configuration(_) => "configuration",
            Error::NotFound(_) => "not_found",
            Error::Conflict(_) => "conflict",
            Error::LockError(_) => "lock_error",
            Error::Io(_) => "io",
            Error::Serialization(_) => "serialization",
            Error::Internal(_) => "internal",
        }
    }

    /// Whether this error must abort the owning task rather than allow a
    /// phase retry. `InvariantViolation`, `ImmutableTarget`, and
    /// `IntegrityMismatch` indicate the task's world model can no longer be
    /// trusted; everything else is potentially retryable by a caller that
    /// chooses to.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::InvariantViolation(_)
                | Error::ImmutableTarget(_)
                | Error::IntegrityMismatch(_)
                | Error::DeniedByWatchdog(_)
        )
    }
}

/// Result type alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(err: serde_yaml::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error::StoreUnavailable(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_classification_matches_propagation_policy() {
        assert!(Error::InvariantViolation("shared-id split".into()).is_fatal());
        assert!(Error::ImmutableTarget("watchdog.rs".into()).is_fatal());
        assert!(Error::IntegrityMismatch("content_hash".into()).is_fatal());
        assert!(Error::DeniedByWatchdog("write outside tier".into()).is_fatal());
        assert!(!Error::Timeout("embedding call".into()).is_fatal());
        assert!(!Error::Overloaded("queue full".into()).is_fatal());
    }

    #[test]
    fn kind_name_round_trips_for_dimension_mismatch() {
        let err = Error::DimensionMismatch {
            expected: 384,
            actual: 256,
        };
        assert_eq!(err.kind_name(), "dimension_mismatch");
        assert_eq!(err.to_string(), "dimension mismatch: expected 384, got 256");
    }

    #[test]
    fn error_conversion_from_serde_json() {
        let json_err = serde_json::from_str::<serde_json::Value>("not json").unwrap_err();
        let err: Error = json_err.into();
        assert_eq!(err.kind_name(), "serialization");
    }
}
