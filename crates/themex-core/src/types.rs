//! Domain data model: sources, excerpts, themes, and research purposes.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::embedding::Embedding;
use crate::ids::{ExcerptId, SourceId, ThemeId};

// ─────────────────────────────────────────────────────────────────────────────
// Sources and excerpts
// ─────────────────────────────────────────────────────────────────────────────

/// Kind of originating document.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    /// Academic paper or preprint.
    Paper,
    /// Interview or meeting transcript.
    Transcript,
    /// Social media post or thread.
    Social,
    /// Anything else.
    #[default]
    Other,
}

/// A ranked, deduplicated source document from the upstream collector.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceDocument {
    /// Document identifier.
    pub id: SourceId,
    /// Title.
    #[serde(default)]
    pub title: String,
    /// Full text or abstract.
    #[serde(default)]
    pub text: String,
    /// Kind of document.
    #[serde(default)]
    pub source_type: SourceType,
    /// Free-form collaborator metadata.
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub metadata: serde_json::Value,
}

/// A quoted unit of source text used as clustering input.
///
/// Excerpts are immutable; attaching an embedding yields a new value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Excerpt {
    /// Excerpt identifier.
    pub id: ExcerptId,
    /// Originating document.
    pub source_id: SourceId,
    /// Quoted text.
    pub text: String,
    /// Embedding, once generated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Embedding>,
}

impl Excerpt {
    /// Create an excerpt without an embedding.
    pub fn new(id: impl Into<ExcerptId>, source_id: impl Into<SourceId>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            source_id: source_id.into(),
            text: text.into(),
            embedding: None,
        }
    }

    /// Return a copy of this excerpt carrying `embedding`.
    #[must_use]
    pub fn with_embedding(&self, embedding: Embedding) -> Self {
        Self {
            embedding: Some(embedding),
            ..self.clone()
        }
    }

    /// Embedding vector, if present.
    pub fn vector(&self) -> Option<&[f32]> {
        self.embedding.as_ref().map(Embedding::vector)
    }
}

impl From<String> for ExcerptId {
    fn from(s: String) -> Self {
        ExcerptId::from_raw(s)
    }
}

impl From<String> for SourceId {
    fn from(s: String) -> Self {
        SourceId::from_raw(s)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Themes
// ─────────────────────────────────────────────────────────────────────────────

/// One link in a theme's provenance chain (document → excerpt → theme).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvenanceLink {
    /// Originating document.
    pub source_id: SourceId,
    /// Document title, when known.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub source_title: String,
    /// Excerpt that was grouped into the theme.
    pub excerpt_id: ExcerptId,
}

/// A named group of excerpts sharing a concept.
///
/// Depending on purpose this is a construct, theme, category, or meta-theme.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Theme {
    /// Theme identifier.
    pub id: ThemeId,
    /// Short human-readable label.
    pub label: String,
    /// Optional longer description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Member excerpts.
    pub excerpt_ids: Vec<ExcerptId>,
    /// Sources contributing at least one member.
    pub source_ids: Vec<SourceId>,
    /// Mean of member embeddings.
    pub centroid: Vec<f32>,
    /// Purpose-specific quality score in [0, 1].
    pub quality: f64,
    /// Purpose-specific metrics (e.g. `ici`, `ave`, `compositeReliability`).
    #[serde(default)]
    pub metrics: BTreeMap<String, f64>,
    /// Provenance chain.
    #[serde(default)]
    pub provenance: Vec<ProvenanceLink>,
}

impl Theme {
    /// Number of member excerpts.
    pub fn size(&self) -> usize {
        self.excerpt_ids.len()
    }

    /// Read a named metric.
    pub fn metric(&self, name: &str) -> Option<f64> {
        self.metrics.get(name).copied()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Purposes
// ─────────────────────────────────────────────────────────────────────────────

/// Research methodology a run is tailored to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Purpose {
    /// Exploratory concourse construction.
    Exploratory,
    /// Survey-construct validation.
    Survey,
    /// Qualitative saturation detection.
    Saturation,
    /// Multi-source literature synthesis.
    Synthesis,
    /// Grounded-theory hypothesis generation.
    Grounded,
}

impl Purpose {
    /// All purposes, in declaration order.
    pub const ALL: [Purpose; 5] = [
        Purpose::Exploratory,
        Purpose::Survey,
        Purpose::Saturation,
        Purpose::Synthesis,
        Purpose::Grounded,
    ];

    /// Stable snake-case name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Exploratory => "exploratory",
            Self::Survey => "survey",
            Self::Saturation => "saturation",
            Self::Synthesis => "synthesis",
            Self::Grounded => "grounded",
        }
    }
}

impl fmt::Display for Purpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Purpose {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "exploratory" | "q_methodology" | "concourse" => Ok(Self::Exploratory),
            "survey" | "survey_construction" => Ok(Self::Survey),
            "saturation" | "qualitative" | "qualitative_analysis" => Ok(Self::Saturation),
            "synthesis" | "literature_synthesis" => Ok(Self::Synthesis),
            "grounded" | "grounded_theory" | "hypothesis_generation" => Ok(Self::Grounded),
            other => Err(format!("unknown purpose: {other}")),
        }
    }
}

/// Inclusive count bounds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CountRange {
    /// Lower bound.
    pub min: usize,
    /// Upper bound.
    pub max: usize,
}

impl CountRange {
    /// Create a range.
    pub const fn new(min: usize, max: usize) -> Self {
        Self { min, max }
    }

    /// Whether `n` lies inside the range.
    pub fn contains(&self, n: usize) -> bool {
        n >= self.min && n <= self.max
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn purpose_parse_aliases() {
        assert_eq!("exploratory".parse::<Purpose>(), Ok(Purpose::Exploratory));
        assert_eq!("q-methodology".parse::<Purpose>(), Ok(Purpose::Exploratory));
        assert_eq!("grounded_theory".parse::<Purpose>(), Ok(Purpose::Grounded));
        assert!("astrology".parse::<Purpose>().is_err());
    }

    #[test]
    fn purpose_round_trips_through_display() {
        for p in Purpose::ALL {
            assert_eq!(p.to_string().parse::<Purpose>(), Ok(p));
        }
    }

    #[test]
    fn excerpt_with_embedding_leaves_original_untouched() {
        let e = Excerpt::new("e1", "s1", "text");
        let emb = Embedding::with_norm(vec![1.0, 0.0], "m").unwrap();
        let with = e.with_embedding(emb);
        assert!(e.embedding.is_none());
        assert_eq!(with.vector(), Some([1.0f32, 0.0].as_slice()));
    }

    #[test]
    fn source_document_partial_json() {
        let json = serde_json::json!({"id": "s1", "title": "T"});
        let doc: SourceDocument = serde_json::from_value(json).unwrap();
        assert_eq!(doc.source_type, SourceType::Other);
        assert!(doc.text.is_empty());
    }

    #[test]
    fn count_range_contains() {
        let r = CountRange::new(8, 12);
        assert!(r.contains(8));
        assert!(r.contains(12));
        assert!(!r.contains(13));
    }
}
