//! Forest configuration
//!
//! Loaded once at startup into an immutable record; every component
//! receives the slice it needs at construction. Live reconfiguration is
//! not supported — threshold/weight/provider changes that invalidate
//! stored state go through the admin operations instead.

use crate::error::{ForestError, ForestResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Tokenizer revision persisted in the store's config record. Changing
/// the tokenizer invalidates lexical similarity comparisons; a mismatch
/// at startup logs a warning advising an admin rescore.
pub const TOKENIZER_VERSION: u32 = 1;

/// Which embedding adapter implementation to construct.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbedProviderKind {
    Local,
    OpenAi,
    Mock,
    None,
}

impl std::fmt::Display for EmbedProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EmbedProviderKind::Local => write!(f, "local"),
            EmbedProviderKind::OpenAi => write!(f, "openai"),
            EmbedProviderKind::Mock => write!(f, "mock"),
            EmbedProviderKind::None => write!(f, "none"),
        }
    }
}

/// Scorer weight constants. `embedding + token + title` must sum to 1,
/// as must `semantic_vs_tag` with its complement.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ScoreWeights {
    pub embedding: f32,
    pub token: f32,
    pub title: f32,
    /// Weight of the semantic score in the final aggregate; the tag
    /// score gets `1 - semantic_vs_tag`.
    pub semantic_vs_tag: f32,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            embedding: 0.6,
            token: 0.25,
            title: 0.15,
            semantic_vs_tag: 0.7,
        }
    }
}

/// Auto-snapshot policy parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutoSnapshotConfig {
    /// Wall-clock seconds since the last snapshot of any type.
    pub interval_seconds: u64,
    /// Cumulative node+edge mutation count since the last snapshot.
    pub mutation_threshold: u64,
    /// Auto snapshots older than this are garbage-collected.
    pub retention_days: u32,
}

impl Default for AutoSnapshotConfig {
    fn default() -> Self {
        Self {
            interval_seconds: 3600,
            mutation_threshold: 50,
            retention_days: 90,
        }
    }
}

/// Retry policy for the remote embedding provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 250,
        }
    }
}

/// Token-bucket bounds for provider parallelism.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub capacity: u32,
    pub refill_per_second: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            capacity: 8,
            refill_per_second: 4,
        }
    }
}

/// Immutable startup configuration.
///
/// Scalar fields come before the nested tables so the record
/// serializes cleanly to TOML.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ForestConfig {
    pub embed_provider: EmbedProviderKind,
    pub embed_model: String,
    pub embed_dimension: usize,
    pub accept_threshold: f32,
    pub suggest_threshold: f32,
    /// Glob-style pattern (trailing `*` wildcard) naming bridge tags,
    /// e.g. `link/*`.
    pub bridge_tag_pattern: String,
    /// Top-K nearest neighbors considered on the incremental link path.
    pub candidate_k: usize,
    pub db_path: PathBuf,
    /// API key for the openai provider. Usually supplied via the
    /// FOREST_OPENAI_API_KEY environment variable rather than the file.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub openai_api_key: Option<String>,
    pub score_weights: ScoreWeights,
    pub auto_snapshot: AutoSnapshotConfig,
    pub retry: RetryConfig,
    pub rate_limit: RateLimitConfig,
}

impl Default for ForestConfig {
    fn default() -> Self {
        Self {
            embed_provider: EmbedProviderKind::None,
            embed_model: "none".to_string(),
            embed_dimension: 768,
            accept_threshold: 0.60,
            suggest_threshold: 0.40,
            bridge_tag_pattern: "link/*".to_string(),
            candidate_k: 64,
            db_path: default_db_path(),
            openai_api_key: None,
            score_weights: ScoreWeights::default(),
            auto_snapshot: AutoSnapshotConfig::default(),
            retry: RetryConfig::default(),
            rate_limit: RateLimitConfig::default(),
        }
    }
}

/// Default database location: `$XDG_DATA_HOME/forest/forest.db`.
pub fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("forest")
        .join("forest.db")
}

/// Default config file location: `$XDG_CONFIG_HOME/forest/config.toml`.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("forest")
        .join("config.toml")
}

impl ForestConfig {
    /// Load configuration from a TOML file, falling back to defaults when
    /// the file does not exist. The openai API key is taken from the
    /// FOREST_OPENAI_API_KEY environment variable when set.
    pub fn load(path: &Path) -> ForestResult<Self> {
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(path)
                .map_err(|e| ForestError::Internal(format!("reading {}: {e}", path.display())))?;
            toml::from_str(&text)
                .map_err(|e| ForestError::ValidationFailed(format!("config parse: {e}")))?
        } else {
            Self::default()
        };
        if let Ok(key) = std::env::var("FOREST_OPENAI_API_KEY") {
            if !key.is_empty() {
                config.openai_api_key = Some(key);
            }
        }
        config.validate()?;
        Ok(config)
    }

    /// Check the documented constraints: weights sum to one, thresholds
    /// ordered within [0,1], dimension nonzero.
    pub fn validate(&self) -> ForestResult<()> {
        let w = &self.score_weights;
        let sum = w.embedding + w.token + w.title;
        if (sum - 1.0).abs() > 1e-4 {
            return Err(ForestError::ValidationFailed(format!(
                "score weights embedding+token+title must sum to 1, got {sum}"
            )));
        }
        if !(0.0..=1.0).contains(&w.semantic_vs_tag) {
            return Err(ForestError::ValidationFailed(
                "semantic_vs_tag weight must be in [0,1]".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.accept_threshold)
            || !(0.0..=1.0).contains(&self.suggest_threshold)
        {
            return Err(ForestError::ValidationFailed(
                "thresholds must be in [0,1]".to_string(),
            ));
        }
        if self.accept_threshold < self.suggest_threshold {
            return Err(ForestError::ValidationFailed(
                "accept_threshold must be >= suggest_threshold".to_string(),
            ));
        }
        if self.embed_dimension == 0 {
            return Err(ForestError::ValidationFailed(
                "embed_dimension must be nonzero".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        ForestConfig::default().validate().unwrap();
    }

    #[test]
    fn rejects_weights_not_summing_to_one() {
        let mut config = ForestConfig::default();
        config.score_weights.embedding = 0.9;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_inverted_thresholds() {
        let mut config = ForestConfig::default();
        config.accept_threshold = 0.3;
        config.suggest_threshold = 0.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn parses_provider_kind_from_toml() {
        let config: ForestConfig =
            toml::from_str("embed_provider = \"mock\"\nembed_dimension = 3").unwrap();
        assert_eq!(config.embed_provider, EmbedProviderKind::Mock);
        assert_eq!(config.embed_dimension, 3);
    }
}
