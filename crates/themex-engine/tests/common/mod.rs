//! Synthetic corpora for engine integration tests.

#![allow(dead_code)]

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use themex_core::{Embedding, Excerpt, SourceDocument, SourceId, SourceType};
use themex_engine::PipelineInput;

/// Builds pre-embedded excerpts clustered around basis vectors.
pub struct CorpusBuilder {
    rng: StdRng,
    dims: usize,
    noise: f32,
    excerpts: Vec<Excerpt>,
    sources: Vec<String>,
}

impl CorpusBuilder {
    pub fn new(dims: usize, noise: f32, seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            dims,
            noise,
            excerpts: Vec::new(),
            sources: Vec::new(),
        }
    }

    /// Add `count` excerpts on `topic` from `source`.
    pub fn add(&mut self, source: &str, topic: usize, count: usize, text: &str) -> &mut Self {
        if !self.sources.iter().any(|s| s == source) {
            self.sources.push(source.to_string());
        }
        for _ in 0..count {
            let mut v: Vec<f32> = (0..self.dims)
                .map(|_| self.rng.random_range(-self.noise..self.noise))
                .collect();
            v[topic % self.dims] += 1.0;
            let id = format!("e{}", self.excerpts.len());
            let embedding = Embedding::with_norm(v, "synthetic").expect("finite vector");
            self.excerpts.push(Excerpt::new(id, source, text).with_embedding(embedding));
        }
        self
    }

    pub fn build(&self) -> PipelineInput {
        PipelineInput {
            excerpts: self.excerpts.clone(),
            sources: self
                .sources
                .iter()
                .map(|id| SourceDocument {
                    id: SourceId::from(id.as_str()),
                    title: format!("Study {id}"),
                    text: String::new(),
                    source_type: SourceType::Transcript,
                    metadata: serde_json::Value::Null,
                })
                .collect(),
        }
    }
}

/// `topics` orthogonal topics of `per_topic` excerpts, spread round-robin
/// over `sources` sources.
pub fn topical(topics: usize, per_topic: usize, sources: usize, dims: usize, seed: u64) -> PipelineInput {
    let mut b = CorpusBuilder::new(dims, 0.03, seed);
    for t in 0..topics {
        for j in 0..per_topic {
            let source = format!("s{}", (t * per_topic + j) % sources);
            let _ = b.add(&source, t, 1, &format!("participants described topic{t} experiences"));
        }
    }
    b.build()
}

/// Ten sources: the first five each open two new topics, the last five
/// only revisit them.
pub fn saturating() -> PipelineInput {
    let mut b = CorpusBuilder::new(32, 0.03, 11);
    for s in 0..10 {
        let source = format!("interview{s}");
        if s < 5 {
            let _ = b.add(&source, 2 * s, 2, "a new concern emerged");
            let _ = b.add(&source, 2 * s + 1, 2, "another new concern emerged");
        } else {
            let _ = b.add(&source, 2 * (s - 5), 2, "the same concern again");
            let _ = b.add(&source, 2 * (s - 5) + 1, 1, "the same concern again");
        }
    }
    b.build()
}
