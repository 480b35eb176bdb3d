//! Shared helpers for the end-to-end scenarios
#![allow(dead_code)]

use forest::{
    CaptureInput, EmbedProviderKind, ForestConfig, ForestEngine, MockProvider, Note,
};
use std::sync::Arc;

pub const DIM: usize = 3;

/// An engine over an in-memory store with a handle on its mock
/// provider, so tests can pin exact vectors per canonical text.
pub struct TestEngine {
    pub engine: ForestEngine,
    pub provider: Arc<MockProvider>,
}

pub fn test_config() -> ForestConfig {
    ForestConfig {
        embed_provider: EmbedProviderKind::Mock,
        embed_dimension: DIM,
        ..Default::default()
    }
}

pub fn engine() -> TestEngine {
    engine_with_config(test_config())
}

pub fn engine_with_config(config: ForestConfig) -> TestEngine {
    let provider = Arc::new(MockProvider::new(config.embed_dimension));
    let engine = ForestEngine::open_in_memory_with_provider(config, provider.clone()).unwrap();
    TestEngine { engine, provider }
}

impl TestEngine {
    /// Pin the embedding a (title, body) pair will produce. The
    /// canonical text is title + blank line + body, the exact string
    /// the ingestion pipeline embeds.
    pub fn pin_vector(&self, title: &str, body: &str, vector: Vec<f32>) {
        self.provider
            .set(format!("{}\n\n{}", title, body), vector);
    }

    pub async fn capture(&self, title: &str, body: &str) -> Note {
        self.engine
            .capture(CaptureInput {
                title: title.to_string(),
                body: body.to_string(),
                ..Default::default()
            })
            .await
            .unwrap()
    }
}
