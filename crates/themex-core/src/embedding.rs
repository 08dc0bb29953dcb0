//! Frozen embedding vectors.
//!
//! An [`Embedding`] can only be built through [`Embedding::with_norm`], which
//! computes the L2 norm once and rejects vectors whose norm is non-finite or
//! non-positive. The vector buffer is shared (`Arc<[f32]>`), so cloning an
//! embedding never copies its components.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::vector::l2_norm;

/// Why a vector was refused as an embedding.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum InvalidEmbedding {
    /// The vector had no components.
    #[error("embedding vector is empty")]
    Empty,
    /// At least one component was NaN or infinite.
    #[error("embedding contains a non-finite component")]
    NonFiniteComponent,
    /// The norm overflowed to infinity or NaN.
    #[error("embedding norm is not finite")]
    NonFiniteNorm,
    /// The norm was zero (or negative through rounding).
    #[error("embedding norm is not positive")]
    NonPositiveNorm,
}

/// A validated, immutable embedding.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(try_from = "EmbeddingRepr", into = "EmbeddingRepr")]
pub struct Embedding {
    vector: Arc<[f32]>,
    norm: f32,
    model: Arc<str>,
}

impl Embedding {
    /// Build an embedding, computing and validating its norm.
    ///
    /// This is the only construction path; the norm stored alongside the
    /// vector always matches it.
    pub fn with_norm(
        vector: Vec<f32>,
        model: impl Into<Arc<str>>,
    ) -> Result<Self, InvalidEmbedding> {
        if vector.is_empty() {
            return Err(InvalidEmbedding::Empty);
        }
        if vector.iter().any(|x| !x.is_finite()) {
            return Err(InvalidEmbedding::NonFiniteComponent);
        }
        let norm = l2_norm(&vector);
        if !norm.is_finite() {
            return Err(InvalidEmbedding::NonFiniteNorm);
        }
        if norm <= 0.0 {
            return Err(InvalidEmbedding::NonPositiveNorm);
        }
        Ok(Self {
            vector: vector.into(),
            norm,
            model: model.into(),
        })
    }

    /// The raw vector components.
    pub fn vector(&self) -> &[f32] {
        &self.vector
    }

    /// Precomputed L2 norm (finite, > 0).
    pub fn norm(&self) -> f32 {
        self.norm
    }

    /// Model that produced this embedding.
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Number of dimensions.
    pub fn dimensions(&self) -> usize {
        self.vector.len()
    }

    /// A unit-length copy of the vector.
    pub fn unit_vector(&self) -> Vec<f32> {
        self.vector.iter().map(|x| x / self.norm).collect()
    }

    /// Cosine similarity using the cached norms.
    pub fn cosine(&self, other: &Embedding) -> f32 {
        (crate::vector::dot(&self.vector, &other.vector) / (self.norm * other.norm))
            .clamp(-1.0, 1.0)
    }

    /// Whether two embeddings share the same underlying buffer.
    pub fn shares_buffer_with(&self, other: &Embedding) -> bool {
        Arc::ptr_eq(&self.vector, &other.vector)
    }
}

impl PartialEq for Embedding {
    fn eq(&self, other: &Self) -> bool {
        self.model == other.model && self.vector == other.vector
    }
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EmbeddingRepr {
    vector: Vec<f32>,
    #[serde(default)]
    model: String,
    #[serde(default, skip_deserializing)]
    norm: f32,
    #[serde(default, skip_deserializing)]
    dimensions: usize,
}

impl TryFrom<EmbeddingRepr> for Embedding {
    type Error = InvalidEmbedding;

    fn try_from(repr: EmbeddingRepr) -> Result<Self, Self::Error> {
        Embedding::with_norm(repr.vector, repr.model)
    }
}

impl From<Embedding> for EmbeddingRepr {
    fn from(e: Embedding) -> Self {
        Self {
            norm: e.norm,
            dimensions: e.vector.len(),
            vector: e.vector.to_vec(),
            model: e.model.to_string(),
        }
    }
}
