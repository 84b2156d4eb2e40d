

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use super::error::ConfigError;
use crate::{DEFAULT_CACHE_SIZE, DEFAULT_CACHE_TTL, DEFAULT_EMBEDDING_MODEL, DEFAULT_OLLAMA_URL, DEFAULT_QUERY_CHUNK_CHARS};


/// Tuning knobs for graph-aware retrieval.
///
/// Validated once by [`GragConfig::validate`] when a retriever is built;
/// out-of-range values are rejected, never clamped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GragConfig {
    /// Maximum hop distance explored around each seed.
    pub hops: usize,
    /// Number of seeds picked by direct similarity.
    pub seed_top_k: usize,
    /// Over-fetch factor applied to `top_k` before threshold filtering.
    pub candidate_multiplier: f64,
    pub node_weight: f64,
    pub subgraph_weight: f64,
    /// Per-hop discount applied to the subgraph term.
    pub hop_decay: f64,
    /// `None` disables TTL rebuilds.
    pub cache_ttl_seconds: Option<f64>,
    pub max_context_neighbors: usize,
    pub debug_logging: bool,
    pub store_timeout_seconds: Option<f64>,
    pub embed_timeout_seconds: Option<f64>,
}

impl Default for GragConfig {
    fn default() -> Self {
        Self {
            hops: 2,
            seed_top_k: 24,
            candidate_multiplier: 3.0,
            node_weight: 0.6,
            subgraph_weight: 0.4,
            hop_decay: 0.75,
            cache_ttl_seconds: Some(15.0 * 60.0),
            max_context_neighbors: 6,
            debug_logging: false,
            store_timeout_seconds: None,
            embed_timeout_seconds: None,
        }
    }
}

impl GragConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.seed_top_k == 0 {
            return Err(ConfigError::invalid("seed_top_k", "must be positive"));
        }
        if !self.candidate_multiplier.is_finite() || self.candidate_multiplier < 1.0 {
            return Err(ConfigError::invalid(
                "candidate_multiplier",
                format!("must be >= 1.0, got {}", self.candidate_multiplier),
            ));
        }
        check_unit_interval("node_weight", self.node_weight)?;
        check_unit_interval("subgraph_weight", self.subgraph_weight)?;
        if self.node_weight + self.subgraph_weight == 0.0 {
            return Err(ConfigError::invalid(
                "subgraph_weight",
                "node_weight and subgraph_weight cannot both be 0",
            ));
        }
        if !self.hop_decay.is_finite() || self.hop_decay <= 0.0 || self.hop_decay > 1.0 {
            return Err(ConfigError::invalid(
                "hop_decay",
                format!("must be in (0, 1], got {}", self.hop_decay),
            ));
        }
        if let Some(ttl) = self.cache_ttl_seconds {
            if !ttl.is_finite() || ttl < 0.0 || Duration::try_from_secs_f64(ttl).is_err() {
                return Err(ConfigError::invalid(
                    "cache_ttl_seconds",
                    format!("must be a non-negative, representable number of seconds, got {ttl}"),
                ));
            }
        }
        check_timeout("store_timeout_seconds", self.store_timeout_seconds)?;
        check_timeout("embed_timeout_seconds", self.embed_timeout_seconds)?;
        Ok(())
    }

    pub fn cache_ttl(&self) -> Option<Duration> {
        seconds_to_duration(self.cache_ttl_seconds)
    }

    pub fn store_timeout(&self) -> Option<Duration> {
        seconds_to_duration(self.store_timeout_seconds)
    }

    pub fn embed_timeout(&self) -> Option<Duration> {
        seconds_to_duration(self.embed_timeout_seconds)
    }

    /// Candidate pool scored before threshold filtering and truncation.
    pub fn candidate_pool(&self, top_k: usize) -> usize {
        let scaled = (top_k as f64 * self.candidate_multiplier) as usize;
        scaled.max(top_k)
    }
}

/// Out-of-range values are rejected by `validate`, so `None` here only
/// means the field is unset.
fn seconds_to_duration(seconds: Option<f64>) -> Option<Duration> {
    seconds.and_then(|s| Duration::try_from_secs_f64(s).ok())
}

fn check_unit_interval(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if !(0.0..=1.0).contains(&value) {
        return Err(ConfigError::invalid(field, format!("must be in [0, 1], got {value}")));
    }
    Ok(())
}

fn check_timeout(field: &'static str, value: Option<f64>) -> Result<(), ConfigError> {
    match value {
        Some(secs) if !secs.is_finite() || secs <= 0.0 || Duration::try_from_secs_f64(secs).is_err() => {
            Err(ConfigError::invalid(
                field,
                format!("must be a positive, representable number of seconds, got {secs}"),
            ))
        }
        _ => Ok(()),
    }
}


#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSettings {
    pub embedding_backend: String,
    pub embedding_model: String,
    pub embedding_url: String,
    pub embedding_api_key: Option<String>,
    pub http_timeout_secs: u64,
    pub query_chunk_chars: usize,
    pub embedding_cache_size: usize,
    pub embedding_cache_ttl_secs: u64,
    pub nodes_path: PathBuf,
    pub grag: GragConfig,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            embedding_backend: "ollama".to_string(),
            embedding_model: DEFAULT_EMBEDDING_MODEL.to_string(),
            embedding_url: DEFAULT_OLLAMA_URL.to_string(),
            embedding_api_key: None,
            http_timeout_secs: 30,
            query_chunk_chars: DEFAULT_QUERY_CHUNK_CHARS,
            embedding_cache_size: DEFAULT_CACHE_SIZE,
            embedding_cache_ttl_secs: DEFAULT_CACHE_TTL,
            nodes_path: PathBuf::from("nodes.json"),
            grag: GragConfig::default(),
        }
    }
}

impl AppSettings {
    /// Layers an optional settings file under `GRAG_*` environment variables.
    ///
    /// Nested keys use a double underscore, e.g. `GRAG_GRAG__HOPS=3`.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = ::config::Config::builder();

        match path {
            Some(path) => {
                debug!("Loading settings from {}", path.display());
                builder = builder.add_source(::config::File::from(path).required(true));
            }
            None => {
                builder = builder.add_source(::config::File::with_name("grag").required(false));
            }
        }

        let settings: Self = builder
            .add_source(
                ::config::Environment::with_prefix("GRAG")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        settings.validate()?;
        Ok(settings)
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(None)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        Url::parse(&self.embedding_url).map_err(|source| ConfigError::InvalidUrl {
            field: "embedding_url",
            source,
        })?;
        if self.query_chunk_chars == 0 {
            return Err(ConfigError::invalid("query_chunk_chars", "must be positive"));
        }
        if self.http_timeout_secs == 0 {
            return Err(ConfigError::invalid("http_timeout_secs", "must be positive"));
        }
        self.grag.validate()
    }
}
