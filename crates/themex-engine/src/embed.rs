//! Run-scoped embedding with retry and usage accounting.

use themex_core::{Embedding, EngineError, EngineResult, Excerpt, RetryPolicy, RunContext, Stage};
use themex_embeddings::EmbeddingOrchestrator;
use themex_resilience::execute_with_retry;
use tracing::{debug, instrument, warn};

/// Excerpts after embedding.
#[derive(Debug, Default)]
pub struct EmbeddedExcerpts {
    /// Input excerpts, embedded where possible, in input order.
    pub excerpts: Vec<Excerpt>,
    /// Excerpts whose vector was rejected and stay unembedded.
    pub rejected: usize,
}

/// Embed `texts`, retrying transient provider failures.
///
/// The result is aligned with `texts`; `None` marks a rejected vector.
pub async fn embed_texts(
    orchestrator: &EmbeddingOrchestrator,
    texts: &[String],
    ctx: &RunContext,
    retry: &RetryPolicy,
) -> EngineResult<Vec<Option<Embedding>>> {
    if texts.is_empty() {
        return Ok(Vec::new());
    }
    ctx.check_cancelled()?;
    let outcome = execute_with_retry(
        || orchestrator.generate_batch_with_stats(texts),
        "embed_texts",
        retry,
        ctx.cancel_token(),
    )
    .await;
    match outcome {
        Ok(done) => {
            let batch = done.value;
            ctx.record_embeddings(batch.generated, batch.cache_hits);
            if batch.rejected > 0 {
                warn!(rejected = batch.rejected, "provider returned invalid vectors");
            }
            Ok(batch.embeddings)
        }
        Err(failure) if failure.cancelled => Err(EngineError::Cancelled),
        Err(failure) => Err(failure.error.into()),
    }
}

/// Attach embeddings to every excerpt that lacks one.
#[instrument(skip_all, fields(excerpts = excerpts.len()))]
pub async fn embed_excerpts(
    orchestrator: &EmbeddingOrchestrator,
    excerpts: Vec<Excerpt>,
    ctx: &RunContext,
    retry: &RetryPolicy,
) -> EngineResult<EmbeddedExcerpts> {
    let missing: Vec<usize> = excerpts
        .iter()
        .enumerate()
        .filter(|(_, e)| e.embedding.is_none())
        .map(|(i, _)| i)
        .collect();
    if missing.is_empty() {
        debug!("all excerpts already embedded");
        return Ok(EmbeddedExcerpts {
            excerpts,
            rejected: 0,
        });
    }

    ctx.progress(Stage::Embedding, 10, format!("embedding {} excerpts", missing.len()));
    let texts: Vec<String> = missing.iter().map(|&i| excerpts[i].text.clone()).collect();
    let vectors = embed_texts(orchestrator, &texts, ctx, retry).await?;

    let mut excerpts = excerpts;
    let mut rejected = 0;
    for (&i, vector) in missing.iter().zip(vectors) {
        match vector {
            Some(embedding) => excerpts[i] = excerpts[i].with_embedding(embedding),
            None => rejected += 1,
        }
    }
    debug!(embedded = missing.len() - rejected, rejected, "excerpts embedded");
    Ok(EmbeddedExcerpts { excerpts, rejected })
}
