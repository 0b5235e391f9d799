//! Runtime configuration for the dispatch + retrieval core
//!
//! Every tunable named in the external interface lives here. Binaries load
//! overrides from the environment; tests construct the struct directly.

use crate::models::Capability;
use std::env;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct Config {
    /// Expected embedding vector length; vectors of any other length are
    /// rejected at the store boundary.
    pub embedding_dim: usize,
    /// Minimum cosine similarity for a record to count as evidence.
    pub similarity_floor: f32,
    /// Default top-k per capability.
    pub summary_k: usize,
    pub tax_k: usize,
    pub spending_k: usize,
    pub compliance_k: usize,
    /// Reasoning-model call timeout.
    pub model_timeout_secs: u64,
    /// Retries after a failed model call. Never more than one attempt
    /// beyond the first.
    pub model_retries: u32,
    pub retry_backoff_ms: u64,
    /// Keyword-rule confidence below this falls through to the model.
    pub classifier_confidence_threshold: f32,
    /// Two records with the same amount whose dates differ by at most this
    /// many days count as duplicates.
    pub duplicate_window_days: i64,
    /// Compliance flags any single transaction at or above this amount.
    pub large_amount_cutoff: f64,
    /// Where the store snapshot lives between runs. None keeps the store
    /// purely in memory.
    pub snapshot_path: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            embedding_dim: 768,
            similarity_floor: 0.25,
            summary_k: 8,
            tax_k: 6,
            spending_k: 12,
            compliance_k: 12,
            model_timeout_secs: 8,
            model_retries: 1,
            retry_backoff_ms: 500,
            classifier_confidence_threshold: 0.6,
            duplicate_window_days: 1,
            large_amount_cutoff: 1000.0,
            snapshot_path: None,
        }
    }
}

impl Config {
    /// Load configuration with environment overrides on top of defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            embedding_dim: env_parse("EMBEDDING_DIM", defaults.embedding_dim),
            similarity_floor: env_parse("SIMILARITY_FLOOR", defaults.similarity_floor),
            summary_k: env_parse("SUMMARY_K", defaults.summary_k),
            tax_k: env_parse("TAX_K", defaults.tax_k),
            spending_k: env_parse("SPENDING_K", defaults.spending_k),
            compliance_k: env_parse("COMPLIANCE_K", defaults.compliance_k),
            model_timeout_secs: env_parse("MODEL_TIMEOUT_SECS", defaults.model_timeout_secs),
            model_retries: env_parse("MODEL_RETRIES", defaults.model_retries),
            retry_backoff_ms: env_parse("RETRY_BACKOFF_MS", defaults.retry_backoff_ms),
            classifier_confidence_threshold: env_parse(
                "CLASSIFIER_CONFIDENCE_THRESHOLD",
                defaults.classifier_confidence_threshold,
            ),
            duplicate_window_days: env_parse(
                "DUPLICATE_WINDOW_DAYS",
                defaults.duplicate_window_days,
            ),
            large_amount_cutoff: env_parse("LARGE_AMOUNT_CUTOFF", defaults.large_amount_cutoff),
            snapshot_path: env::var("STORE_SNAPSHOT_PATH").ok().map(PathBuf::from),
        }
    }

    /// Top-k retrieval size for a capability.
    pub fn k_for(&self, capability: Capability) -> usize {
        match capability {
            Capability::Summary => self.summary_k,
            Capability::Tax => self.tax_k,
            Capability::SpendingPattern => self.spending_k,
            Capability::Compliance => self.compliance_k,
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|raw| raw.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_sane() {
        let config = Config::default();
        assert_eq!(config.embedding_dim, 768);
        assert_eq!(config.model_retries, 1);
        assert!(config.similarity_floor > 0.0 && config.similarity_floor < 1.0);
        assert!(config.classifier_confidence_threshold > 0.0);
    }

    #[test]
    fn test_k_per_capability() {
        let config = Config::default();
        assert_eq!(config.k_for(Capability::Summary), config.summary_k);
        assert_eq!(config.k_for(Capability::Compliance), config.compliance_k);
        assert!(config.k_for(Capability::Compliance) >= config.k_for(Capability::Tax));
    }
}
