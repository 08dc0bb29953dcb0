//! AI-assisted sub-steps and their heuristic fallbacks.
//!
//! [`Assist`] has two implementations: [`LlmAssist`] drives a
//! [`TextAssistant`], [`HeuristicAssist`] uses keyword and cue-word rules.
//! Pipelines only talk to [`AssistRouter`], which spends the run's AI-call
//! budget on the assistant while it lasts and falls back to heuristics when
//! the budget is gone or the assistant fails. A run never aborts because the
//! assistant is unavailable.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use themex_core::{EngineError, EngineResult, RetryPolicy, Retryable, RunContext};
use themex_llm::{AssistantError, CompletionRequest, TextAssistant, extract_json};
use themex_resilience::execute_with_retry;
use tracing::{debug, warn};

use crate::text::{keyword_label, keywords, truncate_chars};

// ─────────────────────────────────────────────────────────────────────────────
// Request / response types
// ─────────────────────────────────────────────────────────────────────────────

/// A theme to be named.
#[derive(Clone, Debug, PartialEq)]
pub struct LabelRequest {
    /// Caller's key, echoed back in [`ThemeLabel::key`].
    pub key: usize,
    /// Representative excerpt texts.
    pub excerpts: Vec<String>,
    /// Precomputed keywords.
    pub keywords: Vec<String>,
}

/// A theme name.
#[derive(Clone, Debug, PartialEq)]
pub struct ThemeLabel {
    /// Key from the request.
    pub key: usize,
    /// Short label.
    pub label: String,
    /// One-sentence description, when the assistant wrote one.
    pub description: Option<String>,
    /// Produced by the assistant rather than heuristics.
    pub assisted: bool,
}

/// Grounded-theory paradigm code type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CodeType {
    /// Causal or enabling condition.
    Condition,
    /// Action or interaction strategy.
    Action,
    /// Outcome of an action.
    Consequence,
    /// Surrounding setting.
    Context,
}

impl CodeType {
    /// Every code type.
    pub const ALL: [CodeType; 4] = [
        CodeType::Condition,
        CodeType::Action,
        CodeType::Consequence,
        CodeType::Context,
    ];

    /// Stable lowercase name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Condition => "condition",
            Self::Action => "action",
            Self::Consequence => "consequence",
            Self::Context => "context",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "condition" | "conditions" | "causal_condition" => Some(Self::Condition),
            "action" | "actions" | "strategy" | "interaction" => Some(Self::Action),
            "consequence" | "consequences" | "outcome" => Some(Self::Consequence),
            "context" | "setting" | "intervening_condition" => Some(Self::Context),
            _ => None,
        }
    }
}

impl fmt::Display for CodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified excerpt.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CodeLabel {
    /// Assigned type.
    pub code_type: CodeType,
    /// Confidence in `[0, 1]`.
    pub confidence: f64,
    /// Produced by the assistant rather than heuristics.
    pub assisted: bool,
}

/// Input for the grounded-theory framework statement.
#[derive(Clone, Debug, PartialEq)]
pub struct FrameworkBrief {
    /// Core category label.
    pub core_category: String,
    /// Core category code type.
    pub core_type: CodeType,
    /// Strongest relationships as `(from, to, weight)` labels.
    pub relations: Vec<(String, String, f64)>,
}

/// Text produced by an assist step and where it came from.
#[derive(Clone, Debug, PartialEq)]
pub struct Drafted {
    /// The text.
    pub text: String,
    /// Produced by the assistant rather than a template.
    pub assisted: bool,
}

// ─────────────────────────────────────────────────────────────────────────────
// Strategy trait
// ─────────────────────────────────────────────────────────────────────────────

/// One way of performing the AI-assisted sub-steps.
///
/// Implementations that call a metered service reserve one unit of the run's
/// AI-call budget per request with [`RunContext::try_consume_ai_call`].
#[async_trait]
pub trait Assist: Send + Sync {
    /// Strategy name for logs.
    fn name(&self) -> &'static str;

    /// Name each theme in `batch`. Entries may be missing from the result.
    async fn label_themes(
        &self,
        ctx: &RunContext,
        batch: &[LabelRequest],
    ) -> EngineResult<Vec<ThemeLabel>>;

    /// Split each text into atomic statements, one list per input.
    async fn split_atomic(&self, ctx: &RunContext, texts: &[String]) -> EngineResult<Vec<Vec<String>>>;

    /// Classify each text into a paradigm code type, one label per input.
    async fn classify_codes(&self, ctx: &RunContext, texts: &[String]) -> EngineResult<Vec<CodeLabel>>;

    /// Draft a theoretical-framework statement.
    async fn draft_framework(&self, ctx: &RunContext, brief: &FrameworkBrief) -> EngineResult<String>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Heuristics
// ─────────────────────────────────────────────────────────────────────────────

const CONDITION_CUES: &[&str] = &[
    "if", "when", "because", "due", "given", "unless", "whenever", "since", "cause", "caused",
    "lack", "lacking", "without", "pressure", "requirement", "required", "need", "needed",
];
const ACTION_CUES: &[&str] = &[
    "decided", "decide", "chose", "choose", "started", "start", "adopted", "adopt", "tried",
    "try", "implemented", "implement", "used", "use", "using", "worked", "negotiated", "managed",
    "responded", "coped", "organized", "asked", "shared",
];
const CONSEQUENCE_CUES: &[&str] = &[
    "result", "resulted", "results", "led", "leads", "therefore", "consequently", "outcome",
    "outcomes", "so", "thus", "ended", "eventually", "improved", "reduced", "increased",
    "caused", "effect", "impact",
];
const CONTEXT_CUES: &[&str] = &[
    "during", "environment", "setting", "culture", "organization", "organisation", "rural",
    "urban", "community", "policy", "period", "background", "workplace", "hospital", "school",
];

/// Rule-based [`Assist`]; never fails and never spends budget.
#[derive(Clone, Copy, Debug, Default)]
pub struct HeuristicAssist;

impl HeuristicAssist {
    /// Keyword label for one request.
    pub fn label(request: &LabelRequest) -> ThemeLabel {
        let label = if request.keywords.is_empty() {
            keyword_label(&request.excerpts, 3)
        } else {
            request
                .keywords
                .iter()
                .take(3)
                .map(|w| crate::text::capitalize(w))
                .collect::<Vec<_>>()
                .join(", ")
        };
        ThemeLabel {
            key: request.key,
            label,
            description: None,
            assisted: false,
        }
    }

    /// Cue-word classification.
    pub fn classify(text: &str) -> CodeLabel {
        let tokens = crate::text::tokenize(text);
        let count = |cues: &[&str]| tokens.iter().filter(|t| cues.contains(&t.as_str())).count();
        let scores = [
            (CodeType::Condition, count(CONDITION_CUES)),
            (CodeType::Action, count(ACTION_CUES)),
            (CodeType::Consequence, count(CONSEQUENCE_CUES)),
            (CodeType::Context, count(CONTEXT_CUES)),
        ];
        let total: usize = scores.iter().map(|s| s.1).sum();
        // First maximum wins, so ties resolve in paradigm order.
        let (code_type, best) = scores
            .iter()
            .copied()
            .fold((CodeType::Context, 0), |acc, s| if s.1 > acc.1 { s } else { acc });
        let confidence = if total == 0 { 0.5 } else { best as f64 / total as f64 };
        CodeLabel {
            code_type,
            confidence,
            assisted: false,
        }
    }

    /// Template framework statement.
    pub fn framework(brief: &FrameworkBrief) -> String {
        let mut out = format!(
            "\"{}\" emerges as the core category ({}), linking the other categories.",
            brief.core_category, brief.core_type
        );
        for (from, to, weight) in brief.relations.iter().take(3) {
            out.push_str(&format!(" \"{from}\" relates to \"{to}\" (strength {weight:.2})."));
        }
        out
    }
}

#[async_trait]
impl Assist for HeuristicAssist {
    fn name(&self) -> &'static str {
        "heuristic"
    }

    async fn label_themes(
        &self,
        _ctx: &RunContext,
        batch: &[LabelRequest],
    ) -> EngineResult<Vec<ThemeLabel>> {
        Ok(batch.iter().map(Self::label).collect())
    }

    async fn split_atomic(&self, _ctx: &RunContext, texts: &[String]) -> EngineResult<Vec<Vec<String>>> {
        Ok(texts.iter().map(|t| vec![t.clone()]).collect())
    }

    async fn classify_codes(&self, _ctx: &RunContext, texts: &[String]) -> EngineResult<Vec<CodeLabel>> {
        Ok(texts.iter().map(|t| Self::classify(t)).collect())
    }

    async fn draft_framework(&self, _ctx: &RunContext, brief: &FrameworkBrief) -> EngineResult<String> {
        Ok(Self::framework(brief))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Assistant-backed
// ─────────────────────────────────────────────────────────────────────────────

const LABEL_SYSTEM: &str = "You name research themes. Reply with JSON only: \
{\"labels\": [{\"key\": <number>, \"label\": \"<2-6 words>\", \"description\": \"<one sentence>\"}]}";

const SPLIT_SYSTEM: &str = "You split research excerpts into atomic statements. Each statement \
must make exactly one claim and reuse the excerpt's own wording. Reply with JSON only: \
{\"items\": [{\"index\": <number>, \"atoms\": [\"...\"]}]}";

const CLASSIFY_SYSTEM: &str = "You code qualitative data using the grounded-theory paradigm \
model. Classify each excerpt as condition, action, consequence, or context. Reply with JSON \
only: {\"codes\": [{\"index\": <number>, \"type\": \"<type>\", \"confidence\": <0-1>}]}";

const FRAMEWORK_SYSTEM: &str = "You write concise theoretical-framework statements for \
grounded-theory studies. Reply with two to four plain sentences.";

/// Excerpt characters quoted per theme in prompts.
const PROMPT_EXCERPT_CHARS: usize = 300;

#[derive(Deserialize)]
struct LabelsReply {
    #[serde(default)]
    labels: Vec<LabelItem>,
}

#[derive(Deserialize)]
struct LabelItem {
    key: usize,
    label: String,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Deserialize)]
struct SplitReply {
    #[serde(default)]
    items: Vec<SplitItem>,
}

#[derive(Deserialize)]
struct SplitItem {
    index: usize,
    #[serde(default)]
    atoms: Vec<String>,
}

#[derive(Deserialize)]
struct CodesReply {
    #[serde(default)]
    codes: Vec<CodeItem>,
}

#[derive(Deserialize)]
struct CodeItem {
    index: usize,
    #[serde(rename = "type")]
    code_type: String,
    #[serde(default)]
    confidence: f64,
}

/// [`Assist`] backed by a generative-text assistant.
pub struct LlmAssist {
    assistant: Arc<dyn TextAssistant>,
    retry: RetryPolicy,
}

impl fmt::Debug for LlmAssist {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LlmAssist")
            .field("assistant", &self.assistant.name())
            .field("model", &self.assistant.model())
            .finish_non_exhaustive()
    }
}

impl LlmAssist {
    /// Wrap an assistant.
    pub fn new(assistant: Arc<dyn TextAssistant>, retry: RetryPolicy) -> Self {
        Self { assistant, retry }
    }

    /// One logical completion. Every attempt, retries included, reserves
    /// its own unit of the run's AI-call budget; retrying stops when the
    /// budget does.
    async fn complete(&self, ctx: &RunContext, request: CompletionRequest, op: &str) -> EngineResult<String> {
        let assistant = &self.assistant;
        let request = &request;
        let outcome = execute_with_retry(
            || async move {
                ctx.try_consume_ai_call().map_err(AttemptError::Budget)?;
                assistant.complete(request).await.map_err(AttemptError::Assistant)
            },
            op,
            &self.retry,
            ctx.cancel_token(),
        )
        .await;
        match outcome {
            Ok(done) => {
                ctx.record_tokens(done.value.usage.prompt_tokens, done.value.usage.completion_tokens);
                Ok(done.value.text)
            }
            Err(failure) if failure.cancelled => Err(EngineError::Cancelled),
            Err(failure) => {
                debug!(op, attempts = failure.attempts, "assistant call gave up");
                Err(failure.error.into())
            }
        }
    }
}

/// Why one assistant attempt did not produce a reply.
#[derive(Debug)]
enum AttemptError {
    Budget(EngineError),
    Assistant(AssistantError),
}

impl fmt::Display for AttemptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Budget(e) => fmt::Display::fmt(e, f),
            Self::Assistant(e) => fmt::Display::fmt(e, f),
        }
    }
}

impl Retryable for AttemptError {
    fn is_retryable(&self) -> bool {
        match self {
            Self::Budget(_) => false,
            Self::Assistant(e) => e.is_retryable(),
        }
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Budget(_) => None,
            Self::Assistant(e) => e.retry_after(),
        }
    }
}

impl From<AttemptError> for EngineError {
    fn from(err: AttemptError) -> Self {
        match err {
            AttemptError::Budget(e) => e,
            AttemptError::Assistant(e) => e.into(),
        }
    }
}

#[async_trait]
impl Assist for LlmAssist {
    fn name(&self) -> &'static str {
        "assistant"
    }

    async fn label_themes(
        &self,
        ctx: &RunContext,
        batch: &[LabelRequest],
    ) -> EngineResult<Vec<ThemeLabel>> {
        let mut prompt = String::from("Name each theme from its keywords and excerpts.\n");
        for req in batch {
            prompt.push_str(&format!(
                "\nTheme {} (keywords: {})\n",
                req.key,
                req.keywords.join(", ")
            ));
            for text in req.excerpts.iter().take(5) {
                prompt.push_str(&format!("- {}\n", truncate_chars(text, PROMPT_EXCERPT_CHARS)));
            }
        }
        let request = CompletionRequest::new(prompt).with_system(LABEL_SYSTEM).expect_json();
        let text = self.complete(ctx, request, "label_themes").await?;
        let reply: LabelsReply = extract_json(&text)?;
        Ok(reply
            .labels
            .into_iter()
            .filter(|l| !l.label.trim().is_empty())
            .map(|l| ThemeLabel {
                key: l.key,
                label: l.label.trim().to_string(),
                description: l.description.filter(|d| !d.trim().is_empty()),
                assisted: true,
            })
            .collect())
    }

    async fn split_atomic(&self, ctx: &RunContext, texts: &[String]) -> EngineResult<Vec<Vec<String>>> {
        let mut prompt = String::from("Split each excerpt into atomic statements.\n");
        for (i, t) in texts.iter().enumerate() {
            prompt.push_str(&format!("\nExcerpt {i}:\n{t}\n"));
        }
        let request = CompletionRequest::new(prompt).with_system(SPLIT_SYSTEM).expect_json();
        let text = self.complete(ctx, request, "split_atomic").await?;
        let reply: SplitReply = extract_json(&text)?;
        let mut out = vec![Vec::new(); texts.len()];
        for item in reply.items {
            if let Some(slot) = out.get_mut(item.index) {
                *slot = item.atoms.into_iter().filter(|a| !a.trim().is_empty()).collect();
            }
        }
        Ok(out)
    }

    async fn classify_codes(&self, ctx: &RunContext, texts: &[String]) -> EngineResult<Vec<CodeLabel>> {
        let mut prompt = String::from("Classify each excerpt.\n");
        for (i, t) in texts.iter().enumerate() {
            prompt.push_str(&format!("\n{i}: {}\n", truncate_chars(t, PROMPT_EXCERPT_CHARS * 2)));
        }
        let request = CompletionRequest::new(prompt).with_system(CLASSIFY_SYSTEM).expect_json();
        let text = self.complete(ctx, request, "classify_codes").await?;
        let reply: CodesReply = extract_json(&text)?;
        // Unparsed entries get zero confidence so the router re-classifies them.
        let mut out = vec![
            CodeLabel {
                code_type: CodeType::Context,
                confidence: 0.0,
                assisted: true,
            };
            texts.len()
        ];
        for item in reply.codes {
            if let (Some(slot), Some(code_type)) = (out.get_mut(item.index), CodeType::parse(&item.code_type)) {
                *slot = CodeLabel {
                    code_type,
                    confidence: item.confidence.clamp(0.0, 1.0),
                    assisted: true,
                };
            }
        }
        Ok(out)
    }

    async fn draft_framework(&self, ctx: &RunContext, brief: &FrameworkBrief) -> EngineResult<String> {
        let mut prompt = format!(
            "Core category: \"{}\" ({}).\nStrongest relationships:\n",
            brief.core_category, brief.core_type
        );
        for (from, to, w) in &brief.relations {
            prompt.push_str(&format!("- \"{from}\" -> \"{to}\" (weight {w:.2})\n"));
        }
        prompt.push_str("\nWrite the theoretical-framework statement.");
        let request = CompletionRequest::new(prompt).with_system(FRAMEWORK_SYSTEM);
        let text = self.complete(ctx, request, "draft_framework").await?;
        let text = text.trim();
        if text.is_empty() {
            return Err(EngineError::provider("empty framework statement", false));
        }
        Ok(text.to_string())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Router
// ─────────────────────────────────────────────────────────────────────────────

/// Chooses between the assistant and heuristics per call.
#[derive(Clone)]
pub struct AssistRouter {
    assistant: Option<Arc<dyn Assist>>,
    heuristic: HeuristicAssist,
}

impl fmt::Debug for AssistRouter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AssistRouter")
            .field("assistant", &self.assistant.as_ref().map(|a| a.name()))
            .finish()
    }
}

impl Default for AssistRouter {
    fn default() -> Self {
        Self::heuristic_only()
    }
}

impl AssistRouter {
    /// Prefer `assistant` while budget lasts.
    pub fn new(assistant: Arc<dyn Assist>) -> Self {
        Self {
            assistant: Some(assistant),
            heuristic: HeuristicAssist,
        }
    }

    /// Heuristics only.
    pub fn heuristic_only() -> Self {
        Self {
            assistant: None,
            heuristic: HeuristicAssist,
        }
    }

    /// Route to a [`TextAssistant`] through [`LlmAssist`].
    pub fn with_text_assistant(assistant: Arc<dyn TextAssistant>, retry: RetryPolicy) -> Self {
        Self::new(Arc::new(LlmAssist::new(assistant, retry)))
    }

    /// Whether an assistant is configured at all.
    pub fn has_assistant(&self) -> bool {
        self.assistant.is_some()
    }

    /// Name themes, assistant first. Themes the assistant skipped get
    /// keyword labels.
    pub async fn label_themes(
        &self,
        ctx: &RunContext,
        batch: &[LabelRequest],
    ) -> EngineResult<Vec<ThemeLabel>> {
        ctx.check_cancelled()?;
        if batch.is_empty() {
            return Ok(Vec::new());
        }
        if let Some(assistant) = self.admit(ctx, "label_themes") {
            match assistant.label_themes(ctx, batch).await {
                Ok(labels) => {
                    return Ok(batch
                        .iter()
                        .map(|req| {
                            labels
                                .iter()
                                .find(|l| l.key == req.key)
                                .cloned()
                                .unwrap_or_else(|| HeuristicAssist::label(req))
                        })
                        .collect());
                }
                Err(e) => Self::note_failure(ctx, "label_themes", e)?,
            }
        }
        self.heuristic.label_themes(ctx, batch).await
    }

    /// Split texts with the assistant. `None` when no assistant call was
    /// possible; callers keep the original texts.
    pub async fn split_atomic(
        &self,
        ctx: &RunContext,
        texts: &[String],
    ) -> EngineResult<Option<Vec<Vec<String>>>> {
        ctx.check_cancelled()?;
        if texts.is_empty() {
            return Ok(None);
        }
        if let Some(assistant) = self.admit(ctx, "split_atomic") {
            match assistant.split_atomic(ctx, texts).await {
                Ok(atoms) => return Ok(Some(atoms)),
                Err(e) => Self::note_failure(ctx, "split_atomic", e)?,
            }
        }
        Ok(None)
    }

    /// Classify texts; assistant labels below `min_confidence` are replaced
    /// by the cue-word classifier.
    pub async fn classify_codes(
        &self,
        ctx: &RunContext,
        texts: &[String],
        min_confidence: f64,
    ) -> EngineResult<Vec<CodeLabel>> {
        ctx.check_cancelled()?;
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        if let Some(assistant) = self.admit(ctx, "classify_codes") {
            match assistant.classify_codes(ctx, texts).await {
                Ok(labels) if labels.len() == texts.len() => {
                    return Ok(labels
                        .into_iter()
                        .zip(texts)
                        .map(|(label, text)| {
                            if label.confidence >= min_confidence {
                                label
                            } else {
                                HeuristicAssist::classify(text)
                            }
                        })
                        .collect());
                }
                Ok(labels) => {
                    ctx.record_ai_failure();
                    warn!(expected = texts.len(), got = labels.len(), "misaligned code labels, using heuristics");
                }
                Err(e) => Self::note_failure(ctx, "classify_codes", e)?,
            }
        }
        self.heuristic.classify_codes(ctx, texts).await
    }

    /// Draft the framework statement, template as fallback.
    pub async fn draft_framework(&self, ctx: &RunContext, brief: &FrameworkBrief) -> EngineResult<Drafted> {
        ctx.check_cancelled()?;
        if let Some(assistant) = self.admit(ctx, "draft_framework") {
            match assistant.draft_framework(ctx, brief).await {
                Ok(text) => return Ok(Drafted { text, assisted: true }),
                Err(e) => Self::note_failure(ctx, "draft_framework", e)?,
            }
        }
        Ok(Drafted {
            text: HeuristicAssist::framework(brief),
            assisted: false,
        })
    }

    /// The assistant, if one is configured and budget remains. The
    /// assistant reserves budget per attempt itself.
    fn admit(&self, ctx: &RunContext, op: &str) -> Option<&Arc<dyn Assist>> {
        let assistant = self.assistant.as_ref()?;
        if ctx.deadline_exceeded() {
            debug!(op, "run deadline reached, using heuristics");
            return None;
        }
        if ctx.has_ai_budget() {
            Some(assistant)
        } else {
            ctx.mark_truncated();
            debug!(op, "AI-call budget exhausted, using heuristics");
            None
        }
    }

    fn note_failure(ctx: &RunContext, op: &str, error: EngineError) -> EngineResult<()> {
        if matches!(error, EngineError::Cancelled) {
            return Err(error);
        }
        ctx.record_ai_failure();
        warn!(op, kind = error.kind(), error = %error, "assistant failed, using heuristics");
        Ok(())
    }
}

/// Build a label request for a group of excerpt texts.
pub fn label_request(key: usize, texts: &[&str]) -> LabelRequest {
    LabelRequest {
        key,
        excerpts: texts.iter().take(5).map(|t| (*t).to_string()).collect(),
        keywords: keywords(texts, 5),
    }
}
