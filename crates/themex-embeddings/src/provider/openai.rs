//! OpenAI-compatible `/embeddings` endpoint.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};

use super::{EmbeddingProvider, ProviderKind, ensure_aligned, retry_after_header};
use crate::errors::{EmbeddingError, Result};

/// Async embeddings client for OpenAI-compatible APIs.
#[derive(Clone, Debug)]
pub struct OpenAiEmbeddingProvider {
    client: Client,
    endpoint: String,
    model: String,
    dimensions: Option<usize>,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    index: usize,
    embedding: Vec<f32>,
}

impl OpenAiEmbeddingProvider {
    /// Build a client with bearer auth.
    pub fn new(
        api_key: &str,
        base_url: &str,
        model: &str,
        dimensions: Option<usize>,
        timeout: Duration,
    ) -> Result<Self> {
        if api_key.trim().is_empty() {
            return Err(EmbeddingError::Config("missing embeddings API key".into()));
        }
        if model.trim().is_empty() {
            return Err(EmbeddingError::Config("missing embeddings model name".into()));
        }
        let mut headers = HeaderMap::new();
        let auth = HeaderValue::from_str(&format!("Bearer {}", api_key.trim()))
            .map_err(|_| EmbeddingError::Config("invalid embeddings API key".into()))?;
        let _ = headers.insert(AUTHORIZATION, auth);
        let _ = headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let client = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()?;
        Ok(Self {
            client,
            endpoint: format!("{}/embeddings", base_url.trim_end_matches('/')),
            model: model.to_string(),
            dimensions,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbeddingProvider {
    fn name(&self) -> &str {
        "openai"
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Remote
    }

    fn dimensions(&self) -> Option<usize> {
        self.dimensions
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let request = EmbeddingRequest {
            model: &self.model,
            input: texts,
            dimensions: self.dimensions,
        };
        let resp = self.client.post(&self.endpoint).json(&request).send().await?;

        let status = resp.status();
        if !status.is_success() {
            let retry_after = retry_after_header(resp.headers());
            let body = resp.text().await.unwrap_or_default();
            return Err(EmbeddingError::from_status(status.as_u16(), body, retry_after));
        }

        let mut parsed: EmbeddingResponse = resp.json().await?;
        ensure_aligned(texts.len(), parsed.data.len())?;
        parsed.data.sort_by_key(|entry| entry.index);
        Ok(parsed.data.into_iter().map(|entry| entry.embedding).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use themex_core::Retryable;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider(server: &MockServer) -> OpenAiEmbeddingProvider {
        OpenAiEmbeddingProvider::new(
            "sk-test",
            &format!("{}/v1", server.uri()),
            "text-embedding-3-small",
            Some(3),
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn reorders_by_index() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/embeddings"))
            .and(header("authorization", "Bearer sk-test"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [
                    {"index": 1, "embedding": [0.0, 1.0, 0.0]},
                    {"index": 0, "embedding": [1.0, 0.0, 0.0]}
                ]
            })))
            .mount(&server)
            .await;

        let out = provider(&server)
            .embed_batch(&["first".to_string(), "second".to_string()])
            .await
            .unwrap();
        assert_eq!(out[0], vec![1.0, 0.0, 0.0]);
        assert_eq!(out[1], vec![0.0, 1.0, 0.0]);
    }

    #[tokio::test]
    async fn unauthorized_is_terminal() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("bad key"))
            .mount(&server)
            .await;

        let err = provider(&server).embed_batch(&["x".to_string()]).await.unwrap_err();
        assert_matches!(err, EmbeddingError::Http { status: 401, .. });
        assert!(!err.is_retryable());
    }

    #[test]
    fn empty_key_rejected() {
        let err = OpenAiEmbeddingProvider::new(" ", "http://x", "m", None, Duration::from_secs(1))
            .unwrap_err();
        assert_matches!(err, EmbeddingError::Config(_));
    }

    #[test]
    fn remote_kind() {
        let p = OpenAiEmbeddingProvider::new("k", "http://x/v1/", "m", None, Duration::from_secs(1))
            .unwrap();
        assert_eq!(p.kind(), ProviderKind::Remote);
        assert_eq!(p.endpoint, "http://x/v1/embeddings");
    }
}
