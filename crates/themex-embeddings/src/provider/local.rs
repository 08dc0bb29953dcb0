//! Self-hosted text-embeddings server (`POST {base}/embed`).

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;

use super::{EmbeddingProvider, ProviderKind, ensure_aligned, retry_after_header};
use crate::errors::{EmbeddingError, Result};

/// Client for a local text-embeddings-inference style server.
#[derive(Clone, Debug)]
pub struct LocalEmbeddingProvider {
    client: Client,
    endpoint: String,
    model: String,
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    inputs: &'a [String],
    truncate: bool,
}

impl LocalEmbeddingProvider {
    /// Build a client for `base_url`.
    pub fn new(base_url: &str, model: &str, timeout: Duration) -> Result<Self> {
        if base_url.trim().is_empty() {
            return Err(EmbeddingError::Config("missing local embedding URL".into()));
        }
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: format!("{}/embed", base_url.trim_end_matches('/')),
            model: model.to_string(),
        })
    }
}

#[async_trait]
impl EmbeddingProvider for LocalEmbeddingProvider {
    fn name(&self) -> &str {
        "local"
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Local
    }

    fn dimensions(&self) -> Option<usize> {
        None
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let resp = self
            .client
            .post(&self.endpoint)
            .json(&EmbedRequest {
                inputs: texts,
                truncate: true,
            })
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let retry_after = retry_after_header(resp.headers());
            let body = resp.text().await.unwrap_or_default();
            return Err(EmbeddingError::from_status(status.as_u16(), body, retry_after));
        }

        let vectors: Vec<Vec<f32>> = resp.json().await?;
        ensure_aligned(texts.len(), vectors.len())?;
        Ok(vectors)
    }
}
