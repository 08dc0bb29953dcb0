//! Scripted assistant for tests.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::assistant::{Completion, CompletionRequest, TextAssistant, Usage};
use crate::errors::AssistantError;

/// One scripted reply.
#[derive(Clone, Debug)]
pub enum MockReply {
    /// Return this text.
    Text(String),
    /// Fail with this error.
    Error(AssistantError),
    /// Sleep, then apply the inner reply.
    Delay(Duration, Box<MockReply>),
}

type Responder = dyn Fn(&CompletionRequest) -> Result<String, AssistantError> + Send + Sync;

/// Replays scripted replies in order, then falls back to a responder
/// closure (or an `InvalidResponse` error when none is set).
#[derive(Clone, Default)]
pub struct MockAssistant {
    replies: Arc<Mutex<VecDeque<MockReply>>>,
    responder: Option<Arc<Responder>>,
    requests: Arc<Mutex<Vec<CompletionRequest>>>,
    calls: Arc<AtomicUsize>,
}

impl std::fmt::Debug for MockAssistant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockAssistant")
            .field("queued", &self.replies.lock().len())
            .field("calls", &self.call_count())
            .finish_non_exhaustive()
    }
}

impl MockAssistant {
    /// Empty script.
    pub fn new() -> Self {
        Self::default()
    }

    /// Script from a list of replies.
    pub fn with_replies(replies: impl IntoIterator<Item = MockReply>) -> Self {
        Self {
            replies: Arc::new(Mutex::new(replies.into_iter().collect())),
            ..Self::default()
        }
    }

    /// Answer every call with the closure once the script is exhausted.
    #[must_use]
    pub fn with_responder(
        mut self,
        f: impl Fn(&CompletionRequest) -> Result<String, AssistantError> + Send + Sync + 'static,
    ) -> Self {
        self.responder = Some(Arc::new(f));
        self
    }

    /// Every call fails with the same error.
    pub fn always_failing(err: AssistantError) -> Self {
        Self::new().with_responder(move |_| Err(err.clone()))
    }

    /// Queue another reply.
    pub fn push(&self, reply: MockReply) {
        self.replies.lock().push_back(reply);
    }

    /// Number of `complete` calls so far.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Requests seen so far.
    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl TextAssistant for MockAssistant {
    fn name(&self) -> &str {
        "mock"
    }

    fn model(&self) -> &str {
        "mock-model"
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, AssistantError> {
        let _ = self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().push(request.clone());

        let next = self.replies.lock().pop_front();
        let mut reply = match next {
            Some(reply) => reply,
            None => match &self.responder {
                Some(f) => match f(request) {
                    Ok(text) => MockReply::Text(text),
                    Err(e) => MockReply::Error(e),
                },
                None => MockReply::Error(AssistantError::InvalidResponse(
                    "mock script exhausted".into(),
                )),
            },
        };

        loop {
            match reply {
                MockReply::Delay(d, inner) => {
                    tokio::time::sleep(d).await;
                    reply = *inner;
                }
                MockReply::Text(text) => {
                    let usage = Usage {
                        prompt_tokens: (request.prompt.len() / 4) as u64,
                        completion_tokens: (text.len() / 4) as u64,
                    };
                    return Ok(Completion { text, usage });
                }
                MockReply::Error(e) => return Err(e),
            }
        }
    }
}
