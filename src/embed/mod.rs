//! Embedding provider adapter
//!
//! Maps text to a fixed-dimension unit vector, or an explicit "absent".
//! Providers are pluggable: local (fastembed, behind the `embeddings`
//! feature), openai (reqwest), mock (deterministic, for tests), none.
//! The adapter normalizes every returned vector before handing it to
//! callers; "absent" is a first-class result, never an error, for empty
//! text, the `none` provider, or a remote call that failed after all
//! retries.

mod mock;
mod openai;
mod rate_limit;

#[cfg(feature = "embeddings")]
mod local;

pub use mock::MockProvider;
pub use openai::OpenAiProvider;
pub use rate_limit::TokenBucket;

#[cfg(feature = "embeddings")]
pub use local::LocalProvider;

use crate::config::{EmbedProviderKind, ForestConfig};
use crate::error::{ForestError, ForestResult};
use async_trait::async_trait;
use std::sync::Arc;

/// A vector-or-absent embedding result for one text.
pub type EmbeddingResult = Option<Vec<f32>>;

/// Uniform interface over embedding backends.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Provider+model identifier persisted with every embedding it
    /// produces, e.g. `openai:text-embedding-3-small`.
    fn model_id(&self) -> String;

    /// Declared output dimension. Must agree with the store's
    /// configured dimension.
    fn dimension(&self) -> usize;

    /// Embed one text. `Ok(None)` means the embedding is absent and the
    /// caller proceeds with embedding-less scoring.
    async fn embed(&self, text: &str) -> ForestResult<EmbeddingResult>;

    /// Embed a batch; one result per input, order preserved.
    async fn embed_batch(&self, texts: &[String]) -> ForestResult<Vec<EmbeddingResult>> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed(text).await?);
        }
        Ok(out)
    }
}

/// Provider that always reports "absent". Selected with
/// `embed_provider = "none"`; the graph runs on lexical and tag signals
/// alone.
pub struct NoneProvider;

#[async_trait]
impl EmbeddingProvider for NoneProvider {
    fn model_id(&self) -> String {
        "none".to_string()
    }

    fn dimension(&self) -> usize {
        0
    }

    async fn embed(&self, _text: &str) -> ForestResult<EmbeddingResult> {
        Ok(None)
    }
}

/// Scale a vector to unit norm. Zero vectors are left untouched.
pub fn normalize_vector(v: &mut [f32]) {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

/// Construct the configured provider.
///
/// Dimension agreement with previously stored embeddings is checked by
/// the store at startup, not here.
pub fn build_provider(config: &ForestConfig) -> ForestResult<Arc<dyn EmbeddingProvider>> {
    match config.embed_provider {
        EmbedProviderKind::None => Ok(Arc::new(NoneProvider)),
        EmbedProviderKind::Mock => Ok(Arc::new(MockProvider::new(config.embed_dimension))),
        EmbedProviderKind::OpenAi => {
            let api_key = config.openai_api_key.clone().ok_or_else(|| {
                ForestError::ValidationFailed(
                    "openai provider requires FOREST_OPENAI_API_KEY".to_string(),
                )
            })?;
            Ok(Arc::new(OpenAiProvider::new(
                api_key,
                config.embed_model.clone(),
                config.embed_dimension,
                config.retry.clone(),
                config.rate_limit.clone(),
            )))
        }
        EmbedProviderKind::Local => {
            #[cfg(feature = "embeddings")]
            {
                Ok(Arc::new(LocalProvider::new(
                    &config.embed_model,
                    config.embed_dimension,
                )?))
            }
            #[cfg(not(feature = "embeddings"))]
            {
                Err(ForestError::ValidationFailed(
                    "local provider requires the `embeddings` feature".to_string(),
                ))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_vector_produces_unit_norm() {
        let mut v = vec![3.0, 4.0];
        normalize_vector(&mut v);
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-6);
    }

    #[test]
    fn normalize_vector_leaves_zero_alone() {
        let mut v = vec![0.0, 0.0];
        normalize_vector(&mut v);
        assert_eq!(v, vec![0.0, 0.0]);
    }

    #[tokio::test]
    async fn none_provider_is_always_absent() {
        let provider = NoneProvider;
        assert!(provider.embed("anything").await.unwrap().is_none());
    }
}
