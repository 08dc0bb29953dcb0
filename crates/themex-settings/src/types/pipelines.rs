//! Per-purpose pipeline thresholds.
//!
//! Defaults are the documented methodological values; every one of them can be
//! overridden from the settings file.

use serde::{Deserialize, Serialize};
use themex_core::{CountRange, Purpose};

/// Settings for all five pipelines.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PipelineSettings {
    /// Exploratory concourse construction.
    pub exploratory: ExploratorySettings,
    /// Survey-construct validation.
    pub survey: SurveySettings,
    /// Saturation detection.
    pub saturation: SaturationSettings,
    /// Literature synthesis.
    pub synthesis: SynthesisSettings,
    /// Grounded-theory hypothesis generation.
    pub grounded: GroundedSettings,
}

impl PipelineSettings {
    /// Documented output bounds for `purpose`.
    pub fn target(&self, purpose: Purpose) -> CountRange {
        match purpose {
            Purpose::Exploratory => self.exploratory.target,
            Purpose::Survey => self.survey.target,
            Purpose::Saturation => self.saturation.target,
            Purpose::Synthesis => self.synthesis.target,
            Purpose::Grounded => self.grounded.target,
        }
    }

    /// Smallest excerpt set `purpose` will accept.
    pub fn min_excerpts(&self, purpose: Purpose) -> usize {
        match purpose {
            Purpose::Exploratory => self.exploratory.min_excerpts,
            Purpose::Survey => self.survey.min_excerpts,
            Purpose::Saturation => self.saturation.min_excerpts,
            Purpose::Synthesis => self.synthesis.min_excerpts,
            Purpose::Grounded => self.grounded.min_excerpts,
        }
    }
}

/// Exploratory concourse construction.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExploratorySettings {
    /// Minimum excerpts.
    pub min_excerpts: usize,
    /// Lower bound for the initial k.
    pub k_min: usize,
    /// Upper bound for the initial k.
    pub k_max: usize,
    /// Accepted construct count.
    pub target: CountRange,
    /// Bisecting target is `k + k * coverage_factor`.
    pub coverage_factor: f64,
    /// Centroid similarity at which constructs are near-duplicates.
    pub diversity_threshold: f32,
    /// Split long excerpts into atomic statements with the assistant.
    pub atomic_splitting: bool,
    /// Excerpts shorter than this are never split.
    pub split_min_chars: usize,
    /// Excerpts per splitting call.
    pub split_batch_size: usize,
    /// Token overlap an atom must share with its source text.
    pub atom_overlap_threshold: f64,
    /// Constructs labelled per assistant call.
    pub label_batch_size: usize,
}

impl Default for ExploratorySettings {
    fn default() -> Self {
        Self {
            min_excerpts: 10,
            k_min: 30,
            k_max: 80,
            target: CountRange::new(40, 80),
            coverage_factor: 0.25,
            diversity_threshold: 0.7,
            atomic_splitting: true,
            split_min_chars: 280,
            split_batch_size: 5,
            atom_overlap_threshold: 0.6,
            label_batch_size: 10,
        }
    }
}

/// Survey-construct validation.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SurveySettings {
    /// Minimum excerpts.
    pub min_excerpts: usize,
    /// Mean inter-item cosine every construct must reach.
    pub ici_threshold: f32,
    /// Fewest items a construct may keep.
    pub min_items: usize,
    /// Accepted construct count.
    pub target: CountRange,
    /// Constructs labelled per assistant call.
    pub label_batch_size: usize,
}

impl Default for SurveySettings {
    fn default() -> Self {
        Self {
            min_excerpts: 9,
            ici_threshold: 0.7,
            min_items: 3,
            target: CountRange::new(8, 12),
            label_batch_size: 12,
        }
    }
}

/// Saturation detection.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SaturationSettings {
    /// Minimum excerpts.
    pub min_excerpts: usize,
    /// Minimum distinct sources.
    pub min_sources: usize,
    /// Cosine needed to join an existing theme instead of opening one.
    pub novelty_threshold: f32,
    /// Trailing sources considered by the posterior.
    pub window: usize,
    /// Posterior at or above which saturation is reached.
    pub reached_posterior: f64,
    /// Posterior at or above which saturation is approaching.
    pub approaching_posterior: f64,
    /// Predicted point within `slack * sources` counts as approaching.
    pub prediction_slack: f64,
    /// Marginal new themes per source below which the fitted curve is flat.
    pub marginal_threshold: f64,
    /// Seeded source-order shuffles for the robustness check.
    pub permutations: usize,
    /// Accepted theme count.
    pub target: CountRange,
    /// Themes labelled per assistant call.
    pub label_batch_size: usize,
}

impl Default for SaturationSettings {
    fn default() -> Self {
        Self {
            min_excerpts: 4,
            min_sources: 2,
            novelty_threshold: 0.75,
            window: 5,
            reached_posterior: 0.8,
            approaching_posterior: 0.5,
            prediction_slack: 1.5,
            marginal_threshold: 0.5,
            permutations: 100,
            target: CountRange::new(5, 20),
            label_batch_size: 10,
        }
    }
}

/// Literature synthesis.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SynthesisSettings {
    /// Minimum excerpts.
    pub min_excerpts: usize,
    /// Minimum distinct sources.
    pub min_sources: usize,
    /// Cosine for an excerpt to join a theme within one source.
    pub source_theme_threshold: f32,
    /// Mutual best-match similarity for a reciprocal translation.
    pub translation_threshold: f32,
    /// Lenient similarity for line-of-argument presence.
    pub line_of_argument_threshold: f32,
    /// Meta-theme centroid similarity treated as duplicate.
    pub dedup_threshold: f32,
    /// Sentiment magnitude that counts as a polarity.
    pub sentiment_margin: f64,
    /// Accepted meta-theme count.
    pub target: CountRange,
    /// Share of sources the meta-themes should cover.
    pub min_coverage: f64,
    /// Meta-themes labelled per assistant call.
    pub label_batch_size: usize,
}

impl Default for SynthesisSettings {
    fn default() -> Self {
        Self {
            min_excerpts: 4,
            min_sources: 2,
            source_theme_threshold: 0.75,
            translation_threshold: 0.7,
            line_of_argument_threshold: 0.6,
            dedup_threshold: 0.85,
            sentiment_margin: 0.2,
            target: CountRange::new(10, 25),
            min_coverage: 0.8,
            label_batch_size: 10,
        }
    }
}

/// Grounded-theory hypothesis generation.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GroundedSettings {
    /// Minimum excerpts.
    pub min_excerpts: usize,
    /// Excerpts per classification call.
    pub batch_size: usize,
    /// Lowest assistant confidence accepted for a code type.
    pub min_confidence: f64,
    /// Weight of normalised centrality in the core score.
    pub centrality_weight: f64,
    /// Weight of text coverage in the core score.
    pub coverage_weight: f64,
    /// Relationship weight below which no edge is drawn.
    pub edge_min_weight: f64,
    /// Accepted category count.
    pub target: CountRange,
}

impl Default for GroundedSettings {
    fn default() -> Self {
        Self {
            min_excerpts: 8,
            batch_size: 10,
            min_confidence: 0.6,
            centrality_weight: 0.7,
            coverage_weight: 0.3,
            edge_min_weight: 0.05,
            target: CountRange::new(8, 15),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn documented_targets() {
        let p = PipelineSettings::default();
        assert_eq!(p.target(Purpose::Exploratory), CountRange::new(40, 80));
        assert_eq!(p.target(Purpose::Survey), CountRange::new(8, 12));
        assert_eq!(p.target(Purpose::Saturation), CountRange::new(5, 20));
        assert_eq!(p.target(Purpose::Synthesis), CountRange::new(10, 25));
        assert_eq!(p.target(Purpose::Grounded), CountRange::new(8, 15));
    }

    #[test]
    fn nested_partial_override() {
        let p: PipelineSettings =
            serde_json::from_str(r#"{"survey": {"iciThreshold": 0.65}}"#).unwrap();
        assert!((p.survey.ici_threshold - 0.65).abs() < f32::EPSILON);
        assert_eq!(p.survey.min_items, 3);
        assert_eq!(p.exploratory.k_max, 80);
    }
}
