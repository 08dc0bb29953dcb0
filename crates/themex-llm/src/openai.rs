//! OpenAI-compatible chat completions client.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};
use serde_json::json;
use themex_settings::AssistantSettings;
use tracing::debug;

use crate::assistant::{Completion, CompletionRequest, TextAssistant, Usage};
use crate::errors::AssistantError;

/// Connect timeout, separate from the per-request timeout.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Chat client for `POST {base}/chat/completions`.
#[derive(Clone, Debug)]
pub struct OpenAiChatClient {
    client: Client,
    endpoint: String,
    model: String,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct ChatUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

impl OpenAiChatClient {
    /// Build a client.
    pub fn new(
        api_key: &str,
        base_url: &str,
        model: &str,
        timeout: Duration,
    ) -> Result<Self, AssistantError> {
        if api_key.trim().is_empty() {
            return Err(AssistantError::AuthenticationFailed("missing API key".into()));
        }
        let mut headers = HeaderMap::new();
        let auth = HeaderValue::from_str(&format!("Bearer {}", api_key.trim()))
            .map_err(|_| AssistantError::InvalidRequest("invalid API key header".into()))?;
        let _ = headers.insert(AUTHORIZATION, auth);
        let _ = headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(timeout)
            .default_headers(headers)
            .build()?;
        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            model: model.to_string(),
            max_tokens: 1_024,
            temperature: 0.2,
        })
    }

    /// Build from settings, reading the key from `settings.api_key_env`.
    ///
    /// Returns `Ok(None)` when the assistant is disabled or no key is set.
    pub fn from_settings(settings: &AssistantSettings) -> Result<Option<Self>, AssistantError> {
        if !settings.enabled {
            return Ok(None);
        }
        let Some(key) = std::env::var(&settings.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty())
        else {
            debug!(env = %settings.api_key_env, "assistant key not set, assistant disabled");
            return Ok(None);
        };
        let mut client = Self::new(
            &key,
            &settings.base_url,
            &settings.model,
            Duration::from_millis(settings.timeout_ms),
        )?;
        client.max_tokens = settings.max_tokens;
        client.temperature = settings.temperature;
        Ok(Some(client))
    }
}

#[async_trait]
impl TextAssistant for OpenAiChatClient {
    fn name(&self) -> &str {
        "openai"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, AssistantError> {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = &request.system {
            messages.push(ChatMessage {
                role: "system",
                content: system,
            });
        }
        messages.push(ChatMessage {
            role: "user",
            content: &request.prompt,
        });

        let mut body = json!({
            "model": self.model,
            "messages": messages,
            "max_tokens": request.max_tokens.unwrap_or(self.max_tokens),
            "temperature": self.temperature,
        });
        if request.json {
            body["response_format"] = json!({"type": "json_object"});
        }

        let resp = self.client.post(&self.endpoint).json(&body).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let retry_after = resp
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(themex_core::retry::parse_retry_after);
            let text = resp.text().await.unwrap_or_default();
            return Err(AssistantError::from_status(status.as_u16(), text, retry_after));
        }

        let parsed: ChatResponse = resp.json().await?;
        let text = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| AssistantError::InvalidResponse("no completion choices".into()))?;
        let usage = parsed
            .usage
            .map(|u| Usage {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: u.completion_tokens,
            })
            .unwrap_or_default();
        Ok(Completion { text, usage })
    }
}
