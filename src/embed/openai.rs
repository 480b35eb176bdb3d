//! Remote embedding provider over the OpenAI embeddings API
//!
//! Wire details stay inside this module; the rest of the crate only
//! sees "vector of floats from text". Transient failures are retried
//! with exponential backoff; after the retry budget is exhausted the
//! item comes back absent and the caller proceeds with embedding-less
//! scoring. A persistent 429 surfaces as `ProviderRateLimited`.

use super::{normalize_vector, EmbeddingProvider, EmbeddingResult, TokenBucket};
use crate::config::{RateLimitConfig, RetryConfig};
use crate::error::{ForestError, ForestResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::warn;

const EMBEDDINGS_URL: &str = "https://api.openai.com/v1/embeddings";

pub struct OpenAiProvider {
    client: reqwest::Client,
    api_key: String,
    model: String,
    dimension: usize,
    retry: RetryConfig,
    bucket: TokenBucket,
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: Vec<&'a str>,
    dimensions: usize,
}

#[derive(Deserialize)]
struct EmbedResponse {
    data: Vec<EmbedDatum>,
}

#[derive(Deserialize)]
struct EmbedDatum {
    index: usize,
    embedding: Vec<f32>,
}

impl OpenAiProvider {
    pub fn new(
        api_key: String,
        model: String,
        dimension: usize,
        retry: RetryConfig,
        rate_limit: RateLimitConfig,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            model,
            dimension,
            retry,
            bucket: TokenBucket::new(&rate_limit),
        }
    }

    /// One attempt against the API. Distinguishes rate limiting from
    /// other failures so the retry loop can honor retry-after.
    async fn request(&self, inputs: &[&str]) -> Result<Vec<Vec<f32>>, AttemptError> {
        let request = EmbedRequest {
            model: &self.model,
            input: inputs.to_vec(),
            dimensions: self.dimension,
        };
        let response = self
            .client
            .post(EMBEDDINGS_URL)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| AttemptError::Transient(e.to_string()))?;

        let status = response.status();
        if status.as_u16() == 429 {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse::<u64>().ok());
            return Err(AttemptError::RateLimited(retry_after));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AttemptError::Transient(format!("status {status}: {body}")));
        }

        let parsed: EmbedResponse = response
            .json()
            .await
            .map_err(|e| AttemptError::Transient(e.to_string()))?;
        let mut vectors: Vec<Option<Vec<f32>>> = vec![None; inputs.len()];
        for datum in parsed.data {
            if datum.index < vectors.len() {
                vectors[datum.index] = Some(datum.embedding);
            }
        }
        vectors
            .into_iter()
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| AttemptError::Transient("response missing items".to_string()))
    }

    async fn request_with_retries(&self, inputs: &[&str]) -> ForestResult<Option<Vec<Vec<f32>>>> {
        let mut rate_limited = false;
        for attempt in 0..=self.retry.max_retries {
            self.bucket.acquire().await;
            match self.request(inputs).await {
                Ok(vectors) => {
                    for v in &vectors {
                        if v.len() != self.dimension {
                            return Err(ForestError::DimensionMismatch {
                                stored: v.len(),
                                configured: self.dimension,
                            });
                        }
                    }
                    return Ok(Some(vectors));
                }
                Err(AttemptError::RateLimited(retry_after)) => {
                    rate_limited = true;
                    let delay = retry_after
                        .map(Duration::from_secs)
                        .unwrap_or_else(|| self.backoff_delay(attempt));
                    warn!(attempt, ?delay, "embedding provider rate limited");
                    tokio::time::sleep(delay).await;
                }
                Err(AttemptError::Transient(msg)) => {
                    let delay = self.backoff_delay(attempt);
                    warn!(attempt, %msg, ?delay, "embedding request failed, retrying");
                    tokio::time::sleep(delay).await;
                }
            }
        }
        if rate_limited {
            return Err(ForestError::ProviderRateLimited(format!(
                "openai embeddings still rate limited after {} retries",
                self.retry.max_retries
            )));
        }
        warn!("embedding retries exhausted, proceeding without vectors");
        Ok(None)
    }

    fn backoff_delay(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.retry.base_delay_ms.saturating_mul(1 << attempt.min(8)))
    }
}

enum AttemptError {
    Transient(String),
    RateLimited(Option<u64>),
}

#[async_trait]
impl EmbeddingProvider for OpenAiProvider {
    fn model_id(&self) -> String {
        format!("openai:{}", self.model)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, text: &str) -> ForestResult<EmbeddingResult> {
        if text.trim().is_empty() {
            return Ok(None);
        }
        match self.request_with_retries(&[text]).await? {
            Some(mut vectors) => {
                let mut v = vectors.remove(0);
                normalize_vector(&mut v);
                Ok(Some(v))
            }
            None => Ok(None),
        }
    }

    async fn embed_batch(&self, texts: &[String]) -> ForestResult<Vec<EmbeddingResult>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        // Empty texts are absent without spending a request slot on them.
        let present: Vec<(usize, &str)> = texts
            .iter()
            .enumerate()
            .filter(|(_, t)| !t.trim().is_empty())
            .map(|(i, t)| (i, t.as_str()))
            .collect();
        let mut out: Vec<EmbeddingResult> = vec![None; texts.len()];
        if present.is_empty() {
            return Ok(out);
        }
        let inputs: Vec<&str> = present.iter().map(|(_, t)| *t).collect();
        if let Some(vectors) = self.request_with_retries(&inputs).await? {
            for ((slot, _), mut vector) in present.into_iter().zip(vectors) {
                normalize_vector(&mut vector);
                out[slot] = Some(vector);
            }
        }
        Ok(out)
    }
}
