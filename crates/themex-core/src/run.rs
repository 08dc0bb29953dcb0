//! Per-run context: identity, AI-call budget, deadline, cancellation, progress.
//!
//! A [`RunContext`] is created once per extraction and threaded by reference
//! through every stage. All counters are atomics so concurrent assistant and
//! embedding batches can record usage without locking.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::errors::EngineError;
use crate::ids::RunId;
use crate::progress::{NoopSink, ProgressEvent, ProgressSink, Stage};
use crate::types::Purpose;

/// Default AI-call budget per run.
pub const DEFAULT_AI_CALL_BUDGET: u32 = 20;

/// State shared by every stage of one pipeline run.
pub struct RunContext {
    run_id: RunId,
    purpose: Purpose,
    user_id: String,
    seed: u64,
    ai_call_budget: u32,
    ai_calls_used: AtomicU32,
    ai_calls_failed: AtomicU32,
    embeddings_generated: AtomicU64,
    embedding_cache_hits: AtomicU64,
    prompt_tokens: AtomicU64,
    completion_tokens: AtomicU64,
    truncated: AtomicBool,
    started: Instant,
    deadline: Option<Instant>,
    cancel: CancellationToken,
    progress: Arc<dyn ProgressSink>,
}

impl std::fmt::Debug for RunContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunContext")
            .field("run_id", &self.run_id)
            .field("purpose", &self.purpose)
            .field("user_id", &self.user_id)
            .field("ai_call_budget", &self.ai_call_budget)
            .field("ai_calls_used", &self.ai_calls_used.load(Ordering::Relaxed))
            .field("truncated", &self.truncated.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl RunContext {
    /// Start a run with default budget, no deadline, and a fresh token.
    pub fn new(purpose: Purpose, user_id: impl Into<String>) -> Self {
        Self {
            run_id: RunId::new(),
            purpose,
            user_id: user_id.into(),
            seed: 42,
            ai_call_budget: DEFAULT_AI_CALL_BUDGET,
            ai_calls_used: AtomicU32::new(0),
            ai_calls_failed: AtomicU32::new(0),
            embeddings_generated: AtomicU64::new(0),
            embedding_cache_hits: AtomicU64::new(0),
            prompt_tokens: AtomicU64::new(0),
            completion_tokens: AtomicU64::new(0),
            truncated: AtomicBool::new(false),
            started: Instant::now(),
            deadline: None,
            cancel: CancellationToken::new(),
            progress: Arc::new(NoopSink),
        }
    }

    /// Override the AI-call budget.
    #[must_use]
    pub fn with_ai_call_budget(mut self, budget: u32) -> Self {
        self.ai_call_budget = budget;
        self
    }

    /// Set a wall-clock limit measured from now.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Some(Instant::now() + timeout);
        self
    }

    /// Use a caller-owned cancellation token.
    #[must_use]
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Route progress events to `sink`.
    #[must_use]
    pub fn with_progress(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.progress = sink;
        self
    }

    /// Seed for every randomized step in this run.
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Run identifier.
    pub fn run_id(&self) -> &RunId {
        &self.run_id
    }

    /// Research purpose.
    pub fn purpose(&self) -> Purpose {
        self.purpose
    }

    /// Calling user.
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Seed for clustering and permutation steps.
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Cancellation token for this run.
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    // ── Budget ──────────────────────────────────────────────────────────

    /// Reserve one AI call. Fails once the budget is spent and marks the
    /// run as truncated.
    pub fn try_consume_ai_call(&self) -> Result<(), EngineError> {
        let budget = self.ai_call_budget;
        let reserved = self
            .ai_calls_used
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |used| {
                (used < budget).then_some(used + 1)
            });
        if reserved.is_ok() {
            Ok(())
        } else {
            self.mark_truncated();
            Err(EngineError::BudgetExceeded(format!(
                "AI-call budget of {budget} exhausted"
            )))
        }
    }

    /// AI calls still available.
    pub fn ai_calls_remaining(&self) -> u32 {
        self.ai_call_budget
            .saturating_sub(self.ai_calls_used.load(Ordering::Acquire))
    }

    /// Whether at least one AI call is still available.
    pub fn has_ai_budget(&self) -> bool {
        self.ai_calls_remaining() > 0
    }

    /// Record a failed assistant call (the reservation is not refunded).
    pub fn record_ai_failure(&self) {
        let _ = self.ai_calls_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record token usage of one assistant call.
    pub fn record_tokens(&self, prompt: u64, completion: u64) {
        let _ = self.prompt_tokens.fetch_add(prompt, Ordering::Relaxed);
        let _ = self.completion_tokens.fetch_add(completion, Ordering::Relaxed);
    }

    /// Record embedding work.
    pub fn record_embeddings(&self, generated: u64, cache_hits: u64) {
        let _ = self.embeddings_generated.fetch_add(generated, Ordering::Relaxed);
        let _ = self.embedding_cache_hits.fetch_add(cache_hits, Ordering::Relaxed);
    }

    // ── Deadline & cancellation ─────────────────────────────────────────

    /// Flag the run as having stopped short of its full work.
    pub fn mark_truncated(&self) {
        self.truncated.store(true, Ordering::Release);
    }

    /// Whether any stage was cut short.
    pub fn is_truncated(&self) -> bool {
        self.truncated.load(Ordering::Acquire)
    }

    /// Whether the deadline has passed. Marks the run truncated if so.
    pub fn deadline_exceeded(&self) -> bool {
        let exceeded = self.deadline.is_some_and(|d| Instant::now() >= d);
        if exceeded {
            self.mark_truncated();
        }
        exceeded
    }

    /// Time left before the deadline, if one is set.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// Whether the caller cancelled the run.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Fail with [`EngineError::Cancelled`] if the run was cancelled.
    pub fn check_cancelled(&self) -> Result<(), EngineError> {
        if self.is_cancelled() {
            Err(EngineError::Cancelled)
        } else {
            Ok(())
        }
    }

    // ── Progress & usage ────────────────────────────────────────────────

    /// Emit a progress event.
    pub fn progress(&self, stage: Stage, percent: u8, message: impl Into<String>) {
        self.progress
            .emit(ProgressEvent::new(self.run_id.clone(), stage, percent, message));
    }

    /// Emit a prepared progress event.
    pub fn progress_event(&self, event: ProgressEvent) {
        self.progress.emit(event);
    }

    /// Milliseconds since the run started.
    pub fn elapsed_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    /// Snapshot of resource usage so far.
    pub fn usage(&self) -> RunUsage {
        RunUsage {
            ai_calls_used: self.ai_calls_used.load(Ordering::Acquire),
            ai_call_budget: self.ai_call_budget,
            ai_calls_failed: self.ai_calls_failed.load(Ordering::Relaxed),
            embeddings_generated: self.embeddings_generated.load(Ordering::Relaxed),
            embedding_cache_hits: self.embedding_cache_hits.load(Ordering::Relaxed),
            prompt_tokens: self.prompt_tokens.load(Ordering::Relaxed),
            completion_tokens: self.completion_tokens.load(Ordering::Relaxed),
            elapsed_ms: self.elapsed_ms(),
        }
    }
}

/// Point-in-time resource usage of a run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunUsage {
    /// AI calls reserved.
    pub ai_calls_used: u32,
    /// AI-call budget.
    pub ai_call_budget: u32,
    /// AI calls that failed after reservation.
    pub ai_calls_failed: u32,
    /// Embeddings produced by a provider.
    pub embeddings_generated: u64,
    /// Embeddings served from cache.
    pub embedding_cache_hits: u64,
    /// Prompt tokens consumed.
    pub prompt_tokens: u64,
    /// Completion tokens consumed.
    pub completion_tokens: u64,
    /// Wall-clock time so far.
    pub elapsed_ms: u64,
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::CollectingSink;
    use assert_matches::assert_matches;

    #[test]
    fn budget_is_never_exceeded() {
        let ctx = RunContext::new(Purpose::Exploratory, "u1").with_ai_call_budget(3);
        for _ in 0..3 {
            ctx.try_consume_ai_call().unwrap();
        }
        assert_matches!(ctx.try_consume_ai_call(), Err(EngineError::BudgetExceeded(_)));
        assert_eq!(ctx.usage().ai_calls_used, 3);
        assert_eq!(ctx.ai_calls_remaining(), 0);
        assert!(ctx.is_truncated());
    }

    #[test]
    fn budget_holds_under_contention() {
        let ctx = Arc::new(RunContext::new(Purpose::Survey, "u1").with_ai_call_budget(50));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let ctx = Arc::clone(&ctx);
                std::thread::spawn(move || {
                    (0..20).filter(|_| ctx.try_consume_ai_call().is_ok()).count()
                })
            })
            .collect();
        let granted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(granted, 50);
        assert_eq!(ctx.usage().ai_calls_used, 50);
    }

    #[test]
    fn zero_budget_rejects_immediately() {
        let ctx = RunContext::new(Purpose::Grounded, "u").with_ai_call_budget(0);
        assert!(!ctx.has_ai_budget());
        assert!(ctx.try_consume_ai_call().is_err());
    }

    #[test]
    fn cancellation_is_observed() {
        let token = CancellationToken::new();
        let ctx = RunContext::new(Purpose::Saturation, "u").with_cancel(token.clone());
        assert!(ctx.check_cancelled().is_ok());
        token.cancel();
        assert_matches!(ctx.check_cancelled(), Err(EngineError::Cancelled));
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_marks_truncated() {
        let ctx = RunContext::new(Purpose::Synthesis, "u").with_timeout(Duration::from_secs(5));
        assert!(!ctx.deadline_exceeded());
        assert!(!ctx.is_truncated());
        tokio::time::advance(Duration::from_secs(6)).await;
        assert!(ctx.deadline_exceeded());
        assert!(ctx.is_truncated());
        assert!(ctx.check_cancelled().is_ok());
        assert_eq!(ctx.remaining(), Some(Duration::ZERO));
    }

    #[test]
    fn usage_accumulates() {
        let ctx = RunContext::new(Purpose::Exploratory, "u");
        ctx.record_tokens(100, 20);
        ctx.record_tokens(50, 5);
        ctx.record_embeddings(10, 4);
        ctx.record_ai_failure();
        let u = ctx.usage();
        assert_eq!(u.prompt_tokens, 150);
        assert_eq!(u.completion_tokens, 25);
        assert_eq!(u.embeddings_generated, 10);
        assert_eq!(u.embedding_cache_hits, 4);
        assert_eq!(u.ai_calls_failed, 1);
        assert_eq!(u.ai_call_budget, DEFAULT_AI_CALL_BUDGET);
    }

    #[test]
    fn progress_reaches_sink() {
        let sink = CollectingSink::new();
        let ctx = RunContext::new(Purpose::Exploratory, "u").with_progress(Arc::new(sink.clone()));
        ctx.progress(Stage::Embedding, 10, "embedding");
        let events = sink.events();
        assert_eq!(events.len(), 1);
        assert_eq!(&events[0].run_id, ctx.run_id());
    }
}
