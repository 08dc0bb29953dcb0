//! End-to-end runs of each purpose through [`ThemeEngine`].

mod common;

use std::collections::BTreeSet;
use std::sync::Arc;

use themex_core::vector::cosine_similarity;
use themex_core::{CollectingSink, Purpose, SourceId, Stage};
use themex_engine::pipeline::SaturationVerdict;
use themex_engine::{ExtractionRequest, PurposeReport, ThemeEngine, WarningKind, verify_provenance};
use themex_settings::ThemexSettings;

fn engine() -> ThemeEngine {
    ThemeEngine::new(ThemexSettings::default())
}

#[tokio::test]
async fn exploratory_concourse_from_five_sources() {
    let input = common::topical(50, 4, 5, 64, 7);
    let known: BTreeSet<SourceId> = input.sources.iter().map(|s| s.id.clone()).collect();
    let excerpts = input.excerpts.clone();
    let sink = Arc::new(CollectingSink::new());

    let out = engine()
        .extract(ExtractionRequest::new(Purpose::Exploratory, "alice", input).with_progress(sink.clone()))
        .await
        .unwrap();

    assert!((40..=80).contains(&out.themes.len()), "got {} constructs", out.themes.len());
    for (i, a) in out.themes.iter().enumerate() {
        for b in &out.themes[i + 1..] {
            assert!(cosine_similarity(&a.centroid, &b.centroid) < 0.7);
        }
        assert!(!a.source_ids.is_empty());
        assert!(a.source_ids.iter().all(|s| known.contains(s)));
        assert_eq!(a.provenance.len(), a.excerpt_ids.len());
    }
    assert!(verify_provenance(&out.themes, &excerpts).is_empty());
    assert!(!out.truncated);
    assert!(!out.has_warning(WarningKind::Provenance));
    let PurposeReport::Exploratory(report) = &out.report else {
        panic!("expected an exploratory report");
    };
    assert!((30..=80).contains(&report.selected_k));
    assert!(report.max_centroid_similarity < 0.7);

    let stages = sink.stages();
    assert_eq!(stages.first(), Some(&Stage::Validating));
    assert_eq!(stages.last(), Some(&Stage::Complete));
}

#[tokio::test]
async fn fifty_survey_codes_give_consistent_constructs() {
    let input = common::topical(10, 5, 1, 48, 3);
    let out = engine()
        .extract(ExtractionRequest::new(Purpose::Survey, "bob", input))
        .await
        .unwrap();

    assert!((8..=12).contains(&out.themes.len()), "got {} constructs", out.themes.len());
    assert!(out.themes.iter().all(|t| t.metric("ici").unwrap_or(0.0) >= 0.7));
    let PurposeReport::Survey(report) = &out.report else {
        panic!("expected a survey report");
    };
    assert!(report.mean_ici >= 0.7);
}

#[tokio::test]
async fn revisiting_sources_reach_saturation() {
    let out = engine()
        .extract(ExtractionRequest::new(Purpose::Saturation, "carol", common::saturating()))
        .await
        .unwrap();

    let PurposeReport::Saturation(report) = &out.report else {
        panic!("expected a saturation report");
    };
    assert_eq!(report.new_themes_per_source, vec![2, 2, 2, 2, 2, 0, 0, 0, 0, 0]);
    assert_eq!(report.verdict, SaturationVerdict::Reached);
    assert!(report.posterior > 0.8);
    assert_eq!(out.themes.len(), 10);
    assert_eq!(report.robustness.permutations, 100);
}

#[tokio::test]
async fn grounded_run_names_a_core_category() {
    let mut b = common::CorpusBuilder::new(32, 0.03, 17);
    let cues = [
        "when funding pressure was high because staff were lacking",
        "managers decided to implement rotating shifts",
        "this resulted in better retention as an outcome",
        "in the rural hospital setting",
    ];
    for (kind, cue) in cues.iter().enumerate() {
        for sub in 0..3 {
            for s in 0..3 {
                let _ = b.add(&format!("site{s}"), kind * 3 + sub, 1, cue);
            }
        }
    }
    let out = engine()
        .extract(ExtractionRequest::new(Purpose::Grounded, "dana", b.build()))
        .await
        .unwrap();

    let PurposeReport::Grounded(report) = &out.report else {
        panic!("expected a grounded report");
    };
    assert_eq!(out.themes.len(), 12);
    let core = report.core_category.clone().expect("core category");
    assert!(out.themes.iter().any(|t| t.id == core));
    assert!(!report.framework.is_empty());
}

#[tokio::test]
async fn synthesis_across_four_papers() {
    let mut b = common::CorpusBuilder::new(48, 0.03, 23);
    for p in 0..4 {
        for topic in 0..10 {
            let _ = b.add(&format!("paper{p}"), topic, 2, "shared finding");
        }
    }
    let out = engine()
        .extract(ExtractionRequest::new(Purpose::Synthesis, "erin", b.build()))
        .await
        .unwrap();

    let PurposeReport::Synthesis(report) = &out.report else {
        panic!("expected a synthesis report");
    };
    assert_eq!(out.themes.len(), 10);
    assert_eq!(report.lines_of_argument.len(), 10);
    assert!(report.source_coverage >= 0.8);
    assert!(!out.has_warning(WarningKind::LowCoverage));
    assert!(out.themes.iter().all(|t| t.source_ids.len() == 4));
}
