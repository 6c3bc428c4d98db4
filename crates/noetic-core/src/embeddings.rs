//! Embedding pipeline.
//!
//! Every phase of a task produces `{summary, key_points, context}` vectors;
//! Reflect additionally produces a `holistic` vector over the whole chain.
//! The pipeline enforces dimensionality and normalization only — it never
//! performs inference itself. Concrete inference lives behind the
//! `Embedder` trait so a real model host can be plugged in without touching
//! this module.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Standard embedding width. Vectors of any other length are rejected by
/// `EmbeddingPipeline` with `DimensionMismatch`.
pub const EMBEDDING_DIM: usize = 384;

/// Embedding vector type.
pub type Embedding = Vec<f32>;

/// Pluggable text-to-vector backend. Implementations may call out to a local
/// model host, a hosted embeddings API, or — in tests — return a fixed
/// vector. The pipeline never assumes any particular backend.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Declared output width; the pipeline validates every returned vector
    /// against this.
    fn dimension(&self) -> usize;

    /// Embed a single piece of text.
    async fn embed(&self, text: &str) -> Result<Embedding>;
}

/// Embedder that always fails. The safe default: a task that needs
/// embeddings but has no model host configured fails loudly rather than
/// silently degrading to zero vectors.
pub struct NullEmbedder {
    dimension: usize,
}

impl NullEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }
}

impl Default for NullEmbedder {
    fn default() -> Self {
        Self::new(EMBEDDING_DIM)
    }
}

#[async_trait]
impl Embedder for NullEmbedder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, _text: &str) -> Result<Embedding> {
        Err(Error::EmbedderUnavailable(
            "no embedding backend configured".to_string(),
        ))
    }
}

/// Deterministic embedder for tests: hashes the input text into a fixed-width
/// vector so the same text always produces the same embedding without any
/// real model.
pub struct DeterministicTestEmbedder {
    dimension: usize,
}

impl DeterministicTestEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }
}

impl Default for DeterministicTestEmbedder {
    fn default() -> Self {
        Self::new(EMBEDDING_DIM)
    }
}

#[async_trait]
impl Embedder for DeterministicTestEmbedder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, text: &str) -> Result<Embedding> {
        let mut seed: u64 = 1469598103934665603; // FNV offset basis
        for byte in text.as_bytes() {
            seed ^= u64::from(*byte);
            seed = seed.wrapping_mul(1099511628211); // FNV prime
        }
        let mut vector = Vec::with_capacity(self.dimension);
        let mut state = seed;
        for _ in 0..self.dimension {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1);
            let unit = ((state >> 40) as f32) / (u32::MAX >> 8) as f32;
            vector.push(unit * 2.0 - 1.0);
        }
        Ok(vector)
    }
}

/// The four vectors produced across a task's lifecycle, per phase, plus the
/// `holistic` vector produced once at Reflect.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PhaseEmbeddings {
    pub summary: Option<Embedding>,
    pub key_points: Option<Embedding>,
    pub context: Option<Embedding>,
    pub holistic: Option<Embedding>,
}

/// Weights applied to each phase's `summary` embedding when Reflect combines
/// them into the one `holistic` vector. Must not all be zero.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ReflectWeights {
    pub perceive: f64,
    pub reason: f64,
    pub act: f64,
}

impl Default for ReflectWeights {
    fn default() -> Self {
        Self {
            perceive: 0.2,
            reason: 0.5,
            act: 0.3,
        }
    }
}

/// Drives an `Embedder` to produce `PhaseEmbeddings`, validating
/// dimensionality on every call.
pub struct EmbeddingPipeline {
    embedder: Box<dyn Embedder>,
}

impl EmbeddingPipeline {
    pub fn new(embedder: Box<dyn Embedder>) -> Self {
        Self { embedder }
    }

    fn validate(&self, embedding: &Embedding) -> Result<()> {
        let expected = self.embedder.dimension();
        if embedding.len() != expected {
            return Err(Error::DimensionMismatch {
                expected,
                actual: embedding.len(),
            });
        }
        Ok(())
    }

    async fn embed_validated(&self, text: &str) -> Result<Embedding> {
        let embedding = self.embedder.embed(text).await?;
        self.validate(&embedding)?;
        Ok(embedding)
    }

    /// Produce `{summary, key_points, context}` for one phase record.
    pub async fn embed_phase(
        &self,
        summary: &str,
        key_points: &str,
        context: &str,
    ) -> Result<PhaseEmbeddings> {
        Ok(PhaseEmbeddings {
            summary: Some(self.embed_validated(summary).await?),
            key_points: Some(self.embed_validated(key_points).await?),
            context: Some(self.embed_validated(context).await?),
            holistic: None,
        })
    }

    /// Combine the Perceive, Reason, and Act phase `summary` vectors into the
    /// `holistic` vector: `normalize(w_p*e_p + w_r*e_r + w_a*e_a)`. Pure
    /// vector arithmetic — no `Embedder` call, since the inputs are already
    /// embeddings computed earlier in the chain.
    pub fn combine_holistic(
        &self,
        perceive: &Embedding,
        reason: &Embedding,
        act: &Embedding,
        weights: ReflectWeights,
    ) -> Result<Embedding> {
        self.validate(perceive)?;
        self.validate(reason)?;
        self.validate(act)?;

        let dim = perceive.len();
        let mut combined = vec![0.0f32; dim];
        for i in 0..dim {
            combined[i] = (weights.perceive as f32) * perceive[i]
                + (weights.reason as f32) * reason[i]
                + (weights.act as f32) * act[i];
        }

        let norm = combined.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut combined {
                *v /= norm;
            }
        }

        Ok(combined)
    }
}
