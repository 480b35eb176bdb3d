//! Deterministic mock provider for tests and offline use

use super::{normalize_vector, EmbeddingProvider, EmbeddingResult};
use crate::error::ForestResult;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

/// Mock embedding provider.
///
/// Texts registered with [`MockProvider::set`] return their fixed
/// vector; unregistered texts hash deterministically into a stable
/// pseudo-vector, so equal texts always embed equally.
pub struct MockProvider {
    dimension: usize,
    fixed: Mutex<HashMap<String, Vec<f32>>>,
}

impl MockProvider {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            fixed: Mutex::new(HashMap::new()),
        }
    }

    /// Register a fixed vector for a text. The vector is normalized on
    /// the way out, not here.
    pub fn set(&self, text: impl Into<String>, vector: Vec<f32>) {
        self.fixed.lock().unwrap().insert(text.into(), vector);
    }

    fn derive(&self, text: &str) -> Vec<f32> {
        // blake3 bytes expanded into the configured dimension.
        let hash = blake3::hash(text.as_bytes());
        let bytes = hash.as_bytes();
        (0..self.dimension)
            .map(|i| {
                let b = bytes[i % bytes.len()];
                (b as f32 / 255.0) * 2.0 - 1.0
            })
            .collect()
    }
}

#[async_trait]
impl EmbeddingProvider for MockProvider {
    fn model_id(&self) -> String {
        "mock:deterministic".to_string()
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, text: &str) -> ForestResult<EmbeddingResult> {
        if text.trim().is_empty() {
            return Ok(None);
        }
        let mut vector = {
            let fixed = self.fixed.lock().unwrap();
            fixed.get(text).cloned().unwrap_or_else(|| self.derive(text))
        };
        normalize_vector(&mut vector);
        Ok(Some(vector))
    }
}
