//! Shared configuration for the selection pipeline.
//!
//! Loaded from a JSON file; every field has a default so a partial file
//! (or none at all) is valid.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::gallery::AliasTable;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectorConfig {
    pub cache: CacheConfig,
    pub embedding: EmbeddingConfig,
    pub selection: SelectionConfig,
    pub collaborators: CollaboratorConfig,
    pub aliases: AliasTable,
}

impl SelectorConfig {
    /// Read and validate a JSON config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: SelectorConfig = serde_json::from_str(&raw)?;
        config.validate()?;
        info!(
            path = %path.display(),
            aliases = config.aliases.len(),
            provider = ?config.embedding.provider,
            "loaded selector config"
        );
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let checks = [
            (self.cache.capacity == 0, "cache.capacity must be > 0"),
            (self.selection.top_k == 0, "selection.top_k must be > 0"),
            (
                self.embedding.max_poll_attempts == 0,
                "embedding.max_poll_attempts must be > 0",
            ),
            (
                self.embedding.max_concurrency == 0,
                "embedding.max_concurrency must be > 0",
            ),
            (
                self.embedding.request_timeout_secs == 0,
                "embedding.request_timeout_secs must be > 0",
            ),
            (
                self.selection.extraction_timeout_secs == 0,
                "selection.extraction_timeout_secs must be > 0",
            ),
            (
                self.selection.disambiguation_timeout_secs == 0,
                "selection.disambiguation_timeout_secs must be > 0",
            ),
        ];
        if let Some((_, msg)) = checks.into_iter().find(|(failed, _)| *failed) {
            return Err(ConfigError::Invalid(msg.to_string()));
        }
        if let Some(alias) = self.aliases.blank_aliases().next() {
            return Err(ConfigError::Invalid(format!(
                "alias {alias:?} has a blank target gallery name"
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub capacity: usize,
    pub ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: 1000,
            ttl_secs: 3600,
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

/// Shape of the embedding service API.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// One request, one response (`POST /embed`).
    #[default]
    Sync,
    /// Submit a job, then poll it until it finishes (`POST /jobs`, `GET /jobs/{id}`).
    Job,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub provider: ProviderKind,
    pub endpoint: String,
    pub request_timeout_secs: u64,
    pub poll_interval_ms: u64,
    pub max_poll_attempts: u32,
    /// Upper bound on concurrent embedding fetches during narrowing.
    pub max_concurrency: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: ProviderKind::Sync,
            endpoint: "http://localhost:8000".to_string(),
            request_timeout_secs: 30,
            poll_interval_ms: 1000,
            max_poll_attempts: 30,
            max_concurrency: 8,
        }
    }
}

impl EmbeddingConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectionConfig {
    /// Candidates kept per gallery after similarity narrowing.
    pub top_k: usize,
    /// Galleries with more images than this are narrowed.
    pub narrowing_threshold: usize,
    pub extraction_timeout_secs: u64,
    pub disambiguation_timeout_secs: u64,
    pub request_deadline_secs: Option<u64>,
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self {
            top_k: 10,
            narrowing_threshold: 10,
            extraction_timeout_secs: 60,
            disambiguation_timeout_secs: 60,
            request_deadline_secs: None,
        }
    }
}

impl SelectionConfig {
    pub fn extraction_timeout(&self) -> Duration {
        Duration::from_secs(self.extraction_timeout_secs)
    }

    pub fn disambiguation_timeout(&self) -> Duration {
        Duration::from_secs(self.disambiguation_timeout_secs)
    }

    pub fn request_deadline(&self) -> Option<Duration> {
        self.request_deadline_secs.map(Duration::from_secs)
    }
}

/// Endpoints of the external collaborators.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollaboratorConfig {
    pub extraction_endpoint: String,
    pub selection_endpoint: String,
    pub gallery_endpoint: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = SelectorConfig::default();
        assert_eq!(cfg.cache.capacity, 1000);
        assert_eq!(cfg.cache.ttl(), Duration::from_secs(3600));
        assert_eq!(cfg.embedding.provider, ProviderKind::Sync);
        assert_eq!(cfg.embedding.request_timeout(), Duration::from_secs(30));
        assert_eq!(cfg.embedding.poll_interval(), Duration::from_secs(1));
        assert_eq!(cfg.embedding.max_poll_attempts, 30);
        assert_eq!(cfg.selection.top_k, 10);
        assert_eq!(cfg.selection.narrowing_threshold, 10);
        assert!(cfg.selection.request_deadline().is_none());
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn load_partial_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "cache": {{"capacity": 50}},
                "embedding": {{"provider": "job", "endpoint": "http://clip:9000"}},
                "aliases": {{"가온": "레이"}}
            }}"#
        )
        .unwrap();

        let cfg = SelectorConfig::load(file.path()).unwrap();
        assert_eq!(cfg.cache.capacity, 50);
        assert_eq!(cfg.cache.ttl_secs, 3600);
        assert_eq!(cfg.embedding.provider, ProviderKind::Job);
        assert_eq!(cfg.embedding.endpoint, "http://clip:9000");
        assert_eq!(cfg.embedding.max_poll_attempts, 30);
        assert_eq!(cfg.aliases.resolve("가온"), "레이");
    }

    #[test]
    fn load_rejects_zero_capacity() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"cache": {{"capacity": 0}}}}"#).unwrap();
        let err = SelectorConfig::load(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)), "got {err}");
    }

    #[test]
    fn zero_timeouts_are_rejected() {
        let cases = [
            r#"{"embedding": {"request_timeout_secs": 0}}"#,
            r#"{"selection": {"extraction_timeout_secs": 0}}"#,
            r#"{"selection": {"disambiguation_timeout_secs": 0}}"#,
        ];
        for json in cases {
            let cfg: SelectorConfig = serde_json::from_str(json).unwrap();
            let err = cfg.validate().unwrap_err();
            assert!(err.to_string().contains("timeout_secs"), "{json}: got {err}");
        }
    }

    #[test]
    fn load_rejects_blank_alias_target() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"aliases": {{"가온": "레이", "x": ""}}}}"#).unwrap();
        let err = SelectorConfig::load(file.path()).unwrap_err();
        assert!(
            matches!(err, ConfigError::Invalid(ref m) if m.contains("\"x\"")),
            "got {err}"
        );
    }

    #[test]
    fn load_missing_file_is_io_error() {
        let err = SelectorConfig::load(Path::new("/nonexistent/galleria.json")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn load_malformed_json() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{not json").unwrap();
        let err = SelectorConfig::load(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Json(_)));
    }
}
