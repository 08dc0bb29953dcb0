//! Engine entry point.
//!
//! [`ThemeEngine`] owns the shared, bounded collaborators (embedding
//! orchestrator, assistant router, bulkhead, semantic cache) and runs one
//! [`ExtractionRequest`] at a time per call, each inside the extraction
//! bulkhead and its own `run` span.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use themex_core::vector::{l2_normalize, mean_vector};
use sha2::{Digest, Sha256};
use themex_core::{EngineError, EngineResult, Excerpt, ProgressSink, Purpose, RunContext, Stage};
use themex_embeddings::{EmbeddingConfig, EmbeddingOrchestrator};
use themex_llm::OpenAiChatClient;
use themex_resilience::Bulkhead;
use themex_settings::ThemexSettings;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, warn};

use crate::assist::AssistRouter;
use crate::embed::embed_excerpts;
use crate::pipeline::{PipelineEnv, PipelineInput, PipelineOutput, QualityWarning, WarningKind};
use crate::provenance::{Corpus, verify_provenance};
use crate::router::{run_pipeline, validate_corpus};
use crate::semantic_cache::{SemanticCache, SemanticCacheStats};

/// One extraction call.
pub struct ExtractionRequest {
    /// Research purpose.
    pub purpose: Purpose,
    /// Calling user, for bulkhead accounting.
    pub user_id: String,
    /// Excerpts and sources.
    pub input: PipelineInput,
    /// Seed override.
    pub seed: Option<u64>,
    /// AI-call budget override.
    pub ai_call_budget: Option<u32>,
    /// Wall-clock limit override.
    pub timeout: Option<Duration>,
    /// Caller-owned cancellation.
    pub cancel: Option<CancellationToken>,
    /// Progress receiver.
    pub progress: Option<Arc<dyn ProgressSink>>,
}

impl fmt::Debug for ExtractionRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtractionRequest")
            .field("purpose", &self.purpose)
            .field("user_id", &self.user_id)
            .field("excerpts", &self.input.excerpts.len())
            .field("sources", &self.input.sources.len())
            .field("seed", &self.seed)
            .field("ai_call_budget", &self.ai_call_budget)
            .finish_non_exhaustive()
    }
}

impl ExtractionRequest {
    /// Request with settings defaults for everything optional.
    pub fn new(purpose: Purpose, user_id: impl Into<String>, input: PipelineInput) -> Self {
        Self {
            purpose,
            user_id: user_id.into(),
            input,
            seed: None,
            ai_call_budget: None,
            timeout: None,
            cancel: None,
            progress: None,
        }
    }

    /// Fix the seed.
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Cap assistant calls.
    #[must_use]
    pub fn with_ai_call_budget(mut self, budget: u32) -> Self {
        self.ai_call_budget = Some(budget);
        self
    }

    /// Limit wall-clock time.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Cancel through `token`.
    #[must_use]
    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Report progress to `sink`.
    #[must_use]
    pub fn with_progress(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.progress = Some(sink);
        self
    }
}

/// Thematic extraction engine.
#[derive(Clone)]
pub struct ThemeEngine {
    settings: Arc<ThemexSettings>,
    embedder: Option<Arc<EmbeddingOrchestrator>>,
    assist: AssistRouter,
    bulkhead: Arc<Bulkhead>,
    cache: Option<Arc<SemanticCache<PipelineOutput>>>,
}

impl fmt::Debug for ThemeEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThemeEngine")
            .field("embedder", &self.embedder.as_ref().map(|e| e.provider_info().clone()))
            .field("assist", &self.assist)
            .field("semantic_cache", &self.cache.is_some())
            .finish_non_exhaustive()
    }
}

impl ThemeEngine {
    /// Engine without an embedding provider or assistant.
    ///
    /// Excerpts must arrive embedded; every assisted step uses heuristics.
    pub fn new(settings: ThemexSettings) -> Self {
        let bulkhead = Arc::new(Bulkhead::from_settings(&settings.bulkhead));
        let cache = settings
            .cache
            .semantic_enabled
            .then(|| Arc::new(SemanticCache::from_settings(&settings.cache)));
        Self {
            settings: Arc::new(settings),
            embedder: None,
            assist: AssistRouter::heuristic_only(),
            bulkhead,
            cache,
        }
    }

    /// Engine with the embedding provider and assistant the settings name.
    pub fn from_settings(settings: ThemexSettings) -> EngineResult<Self> {
        let config = EmbeddingConfig::from_settings(&settings.embedding, &settings.cache);
        let embedder = EmbeddingOrchestrator::from_config(&config)?;
        let assist = match OpenAiChatClient::from_settings(&settings.assistant)? {
            Some(client) => AssistRouter::with_text_assistant(Arc::new(client), settings.retry.clone()),
            None => AssistRouter::heuristic_only(),
        };
        info!(
            embedding_model = %config.model,
            assistant = assist.has_assistant(),
            semantic_cache = settings.cache.semantic_enabled,
            "theme engine ready"
        );
        Ok(Self::new(settings)
            .with_embedder(Arc::new(embedder))
            .with_assist(assist))
    }

    /// Use `embedder` for excerpts and derived text.
    #[must_use]
    pub fn with_embedder(mut self, embedder: Arc<EmbeddingOrchestrator>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    /// Use `assist` for assisted steps.
    #[must_use]
    pub fn with_assist(mut self, assist: AssistRouter) -> Self {
        self.assist = assist;
        self
    }

    /// Share a bulkhead with other engines.
    #[must_use]
    pub fn with_bulkhead(mut self, bulkhead: Arc<Bulkhead>) -> Self {
        self.bulkhead = bulkhead;
        self
    }

    /// Replace (or disable) the semantic cache.
    #[must_use]
    pub fn with_semantic_cache(mut self, cache: Option<Arc<SemanticCache<PipelineOutput>>>) -> Self {
        self.cache = cache;
        self
    }

    /// Effective settings.
    pub fn settings(&self) -> &ThemexSettings {
        &self.settings
    }

    /// The bulkhead guarding extractions.
    pub fn bulkhead(&self) -> &Arc<Bulkhead> {
        &self.bulkhead
    }

    /// Semantic cache counters, if the cache is enabled.
    pub fn semantic_cache_stats(&self) -> Option<SemanticCacheStats> {
        self.cache.as_ref().map(|c| c.stats())
    }

    /// Extract themes for `request.purpose`.
    ///
    /// Malformed input fails before any capacity is taken. The run itself
    /// executes inside the user's extraction slot; a full queue or an open
    /// breaker fails with [`EngineError::ResourceExhausted`].
    pub async fn extract(&self, request: ExtractionRequest) -> EngineResult<PipelineOutput> {
        validate_input(&request.input)?;
        let ExtractionRequest {
            purpose,
            user_id,
            input,
            seed,
            ai_call_budget,
            timeout,
            cancel,
            progress,
        } = request;

        let run = &self.settings.run;
        let mut ctx = RunContext::new(purpose, user_id.clone())
            .with_seed(seed.unwrap_or(run.seed))
            .with_ai_call_budget(ai_call_budget.unwrap_or(run.ai_call_budget));
        let limit = timeout.or_else(|| (run.timeout_secs > 0).then(|| Duration::from_secs(run.timeout_secs)));
        if let Some(limit) = limit {
            ctx = ctx.with_timeout(limit);
        }
        if let Some(token) = cancel {
            ctx = ctx.with_cancel(token);
        }
        if let Some(sink) = progress {
            ctx = ctx.with_progress(sink);
        }

        let span = info_span!("run", run_id = %ctx.run_id(), purpose = %purpose, user_id = %user_id);
        let result = self
            .bulkhead
            .execute_extraction(&user_id, self.run(&ctx, input).instrument(span))
            .await;
        let outcome = match &result {
            Ok(_) => "ok",
            Err(e) => e.kind(),
        };
        metrics::counter!("themex_runs_total", "purpose" => purpose.as_str(), "outcome" => outcome).increment(1);
        result
    }

    async fn run(&self, ctx: &RunContext, input: PipelineInput) -> EngineResult<PipelineOutput> {
        let purpose = ctx.purpose();
        let PipelineInput { excerpts, sources } = input;
        ctx.progress(Stage::Validating, 0, format!("{} excerpts from {} sources", excerpts.len(), sources.len()));
        let mut warnings = Vec::new();

        let excerpts = match self.embedder.as_deref() {
            Some(embedder) if excerpts.iter().any(|e| e.embedding.is_none()) => {
                ctx.progress(Stage::Embedding, 5, "embedding excerpts");
                let embedded = embed_excerpts(embedder, excerpts, ctx, &self.settings.retry).await?;
                check_dimensions(&embedded.excerpts)?;
                embedded.excerpts
            }
            _ => excerpts,
        };
        let (corpus, dropped) = Corpus::new(excerpts, &sources);
        if dropped > 0 {
            warn!(dropped, "excerpts without a usable embedding were dropped");
            warnings.push(QualityWarning::new(
                WarningKind::DroppedExcerpts,
                format!("{dropped} excerpts had no usable embedding and were left out"),
            ));
        }
        ctx.check_cancelled()?;
        if ctx.deadline_exceeded() {
            warn!("run deadline reached after embedding, remaining steps use heuristics");
        }

        let env = PipelineEnv {
            ctx,
            assist: &self.assist,
            embedder: self.embedder.as_deref(),
            settings: &self.settings.pipelines,
            retry: &self.settings.retry,
        };
        validate_corpus(&env, purpose, &corpus)?;

        let key = self.cache.as_ref().and_then(|_| {
            let query = cache_query(&corpus)?;
            Some((cache_namespace(ctx, &corpus), query))
        });
        if let (Some(cache), Some((namespace, query))) = (&self.cache, &key) {
            ctx.progress(Stage::CacheLookup, 10, "checking semantic cache");
            if let Some(hit) = cache.get(namespace, query) {
                let problems = verify_provenance(&hit.payload.themes, corpus.excerpts());
                if problems.is_empty() {
                    debug!(similarity = hit.similarity, "semantic cache hit");
                    let mut out = hit.payload;
                    out.run_id = ctx.run_id().clone();
                    out.cost = ctx.usage();
                    out.from_cache = true;
                    ctx.progress(Stage::Complete, 100, "served from cache");
                    return Ok(out);
                }
                warn!(problems = problems.len(), "cached result does not match this corpus, running live");
            }
        }

        let mut out = run_pipeline(purpose, &env, corpus).await?;
        if !warnings.is_empty() {
            warnings.append(&mut out.warnings);
            out.warnings = warnings;
        }
        if let (Some(cache), Some((namespace, query))) = (&self.cache, &key) {
            if out.truncated {
                debug!("truncated output not cached");
            } else {
                cache.set(namespace, query, out.clone());
            }
        }
        info!(
            themes = out.themes.len(),
            warnings = out.warnings.len(),
            truncated = out.truncated,
            ai_calls = out.cost.ai_calls_used,
            elapsed_ms = out.cost.elapsed_ms,
            "run complete"
        );
        ctx.progress(Stage::Complete, 100, format!("{} themes", out.themes.len()));
        Ok(out)
    }
}

/// Structural checks made before any capacity is taken.
fn validate_input(input: &PipelineInput) -> EngineResult<()> {
    if input.excerpts.is_empty() {
        return Err(EngineError::Input("no excerpts supplied".into()));
    }
    let mut seen = HashSet::with_capacity(input.excerpts.len());
    for excerpt in &input.excerpts {
        if !seen.insert(&excerpt.id) {
            return Err(EngineError::Input(format!("duplicate excerpt id {}", excerpt.id)));
        }
        if excerpt.text.trim().is_empty() && excerpt.embedding.is_none() {
            return Err(EngineError::Input(format!("excerpt {} has neither text nor embedding", excerpt.id)));
        }
    }
    check_dimensions(&input.excerpts)
}

/// Every supplied embedding must share one dimension.
fn check_dimensions(excerpts: &[Excerpt]) -> EngineResult<()> {
    let mut embedded = excerpts
        .iter()
        .filter_map(|e| e.embedding.as_ref().map(|v| (e, v.dimensions())));
    let Some((first, expected)) = embedded.next() else {
        return Ok(());
    };
    match embedded.find(|(_, d)| *d != expected) {
        Some((odd, d)) => Err(EngineError::Input(format!(
            "excerpt {} has a {d}-dimensional embedding but excerpt {} has {expected}",
            odd.id, first.id
        ))),
        None => Ok(()),
    }
}

/// Cache namespace: purpose, caller, and a digest of the excerpt ids with
/// their sources plus the run parameters that shape the output. A hit is
/// therefore only possible for the same caller over the same excerpts.
fn cache_namespace(ctx: &RunContext, corpus: &Corpus) -> String {
    let mut members: Vec<(&str, &str)> = corpus
        .excerpts()
        .iter()
        .map(|e| (e.id.as_str(), e.source_id.as_str()))
        .collect();
    members.sort_unstable();
    let mut hasher = Sha256::new();
    for (id, source) in members {
        hasher.update(id.as_bytes());
        hasher.update([0u8]);
        hasher.update(source.as_bytes());
        hasher.update([0u8]);
    }
    hasher.update(ctx.seed().to_le_bytes());
    hasher.update(ctx.usage().ai_call_budget.to_le_bytes());
    let digest: [u8; 32] = hasher.finalize().into();
    let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
    format!("{}:{}:{hex}", ctx.purpose().as_str(), ctx.user_id())
}

/// Normalised mean of the corpus points.
fn cache_query(corpus: &Corpus) -> Option<Vec<f32>> {
    let mut mean = mean_vector(corpus.points().iter().map(Vec::as_slice))?;
    l2_normalize(&mut mean);
    Some(mean)
}
