//! Local embedding provider backed by fastembed (ONNX Runtime)
//!
//! Wraps `fastembed::TextEmbedding` in a `Mutex` because its `embed`
//! method requires `&mut self` while the provider trait uses `&self`.

use super::{normalize_vector, EmbeddingProvider, EmbeddingResult};
use crate::error::{ForestError, ForestResult};
use async_trait::async_trait;
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use std::sync::Mutex;

pub struct LocalProvider {
    model: Mutex<TextEmbedding>,
    model_name: String,
    dimension: usize,
}

impl LocalProvider {
    /// Load a fastembed model by name. Unknown names fall back to
    /// nomic-embed-text-v1.5 (768 dimensions).
    pub fn new(model_name: &str, dimension: usize) -> ForestResult<Self> {
        let model_kind = match model_name {
            "all-minilm-l6-v2" => EmbeddingModel::AllMiniLML6V2,
            "bge-small-en-v1.5" => EmbeddingModel::BGESmallENV15,
            _ => EmbeddingModel::NomicEmbedTextV15,
        };
        let options = InitOptions::new(model_kind).with_show_download_progress(false);
        let embedding = TextEmbedding::try_new(options)
            .map_err(|e| ForestError::Internal(format!("loading embedding model: {e}")))?;
        Ok(Self {
            model: Mutex::new(embedding),
            model_name: model_name.to_string(),
            dimension,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for LocalProvider {
    fn model_id(&self) -> String {
        format!("local:{}", self.model_name)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, text: &str) -> ForestResult<EmbeddingResult> {
        if text.trim().is_empty() {
            return Ok(None);
        }
        let owned = text.to_string();
        let vectors = {
            let mut model = self.model.lock().unwrap();
            model
                .embed(vec![owned], None)
                .map_err(|e| ForestError::Internal(format!("embedding inference: {e}")))?
        };
        let mut vector = vectors
            .into_iter()
            .next()
            .ok_or_else(|| ForestError::Internal("embedding returned no results".to_string()))?;
        if vector.len() != self.dimension {
            return Err(ForestError::DimensionMismatch {
                stored: vector.len(),
                configured: self.dimension,
            });
        }
        normalize_vector(&mut vector);
        Ok(Some(vector))
    }
}
