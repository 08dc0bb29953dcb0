//! The assistant abstraction and its request/response types.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::AssistantError;

/// One completion request.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionRequest {
    /// System instructions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    /// User prompt.
    pub prompt: String,
    /// Completion token cap; the client default applies when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    /// Ask the backend for a JSON object.
    #[serde(default)]
    pub json: bool,
}

impl CompletionRequest {
    /// Plain-text request.
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Self::default()
        }
    }

    /// Attach system instructions.
    #[must_use]
    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    /// Request JSON output.
    #[must_use]
    pub fn expect_json(mut self) -> Self {
        self.json = true;
        self
    }

    /// Cap completion tokens.
    #[must_use]
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

/// Token accounting for one call.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Usage {
    /// Prompt tokens billed.
    pub prompt_tokens: u64,
    /// Completion tokens billed.
    pub completion_tokens: u64,
}

/// A finished completion.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Completion {
    /// Generated text.
    pub text: String,
    /// Token usage.
    #[serde(default)]
    pub usage: Usage,
}

/// A generative-text backend.
#[async_trait]
pub trait TextAssistant: Send + Sync {
    /// Backend name for logs.
    fn name(&self) -> &str;

    /// Model identifier.
    fn model(&self) -> &str;

    /// Run one completion.
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, AssistantError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_sets_fields() {
        let r = CompletionRequest::new("label these")
            .with_system("You label themes.")
            .expect_json()
            .with_max_tokens(200);
        assert_eq!(r.prompt, "label these");
        assert_eq!(r.system.as_deref(), Some("You label themes."));
        assert!(r.json);
        assert_eq!(r.max_tokens, Some(200));
    }
}
