//! Purpose dispatch.
//!
//! [`run_pipeline`] checks the purpose's input minimums, runs the matching
//! pipeline, and wraps its result with cost, truncation and provenance
//! checks.

use themex_core::{EngineError, EngineResult, Purpose, Stage};
use tracing::{debug, instrument, warn};

use crate::pipeline::{
    PipelineEnv, PipelineOutput, PipelineResult, QualityWarning, WarningKind, exploratory, grounded,
    saturation, survey, synthesis,
};
use crate::provenance::{Corpus, verify_provenance};

/// Fewest distinct sources a purpose can work with.
pub fn min_sources(env: &PipelineEnv<'_>, purpose: Purpose) -> usize {
    match purpose {
        Purpose::Saturation => env.settings.saturation.min_sources,
        Purpose::Synthesis => env.settings.synthesis.min_sources,
        Purpose::Exploratory | Purpose::Survey | Purpose::Grounded => 1,
    }
}

/// Reject corpora below the purpose's minimums.
pub fn validate_corpus(env: &PipelineEnv<'_>, purpose: Purpose, corpus: &Corpus) -> EngineResult<()> {
    let min_excerpts = env.settings.min_excerpts(purpose);
    if corpus.len() < min_excerpts {
        return Err(EngineError::Input(format!(
            "{purpose} needs at least {min_excerpts} embedded excerpts, got {}",
            corpus.len()
        )));
    }
    let needed = min_sources(env, purpose);
    let have = corpus.source_count();
    if have < needed {
        return Err(EngineError::Input(format!(
            "{purpose} needs excerpts from at least {needed} sources, got {have}"
        )));
    }
    Ok(())
}

/// Run `purpose` over `corpus` and assemble the output.
#[instrument(skip_all, fields(purpose = %purpose, excerpts = corpus.len()))]
pub async fn run_pipeline(purpose: Purpose, env: &PipelineEnv<'_>, corpus: Corpus) -> EngineResult<PipelineOutput> {
    validate_corpus(env, purpose, &corpus)?;
    let ctx = env.ctx;

    let result = match purpose {
        Purpose::Exploratory => exploratory::run(env, corpus).await?,
        Purpose::Survey => survey::run(env, corpus).await?,
        Purpose::Saturation => saturation::run(env, corpus).await?,
        Purpose::Synthesis => synthesis::run(env, corpus).await?,
        Purpose::Grounded => grounded::run(env, corpus).await?,
    };
    let PipelineResult {
        themes,
        report,
        mut warnings,
        corpus,
    } = result;

    ctx.check_cancelled()?;
    ctx.progress(Stage::Provenance, 95, "verifying provenance");
    let problems = verify_provenance(&themes, corpus.excerpts());
    if !problems.is_empty() {
        warn!(problems = problems.len(), first = %problems[0], "provenance verification failed");
        warnings.extend(
            problems
                .into_iter()
                .map(|p| QualityWarning::new(WarningKind::Provenance, p)),
        );
    }

    let truncated = ctx.is_truncated();
    if truncated {
        let usage = ctx.usage();
        warnings.push(QualityWarning::new(
            WarningKind::Truncated,
            format!(
                "run cut short: {} of {} AI calls used; remaining steps used heuristics",
                usage.ai_calls_used, usage.ai_call_budget
            ),
        ));
    }
    debug!(themes = themes.len(), warnings = warnings.len(), truncated, "pipeline output assembled");

    Ok(PipelineOutput {
        run_id: ctx.run_id().clone(),
        purpose,
        themes,
        report,
        cost: ctx.usage(),
        warnings,
        truncated,
        from_cache: false,
    })
}
