//! Engine configuration.
//!
//! All tuning surfaces live here: signal weights, strategy trust weights, the
//! RRF constant, pool sizes, deadlines, and per-subsystem enable flags.
//! Configuration is read at process start (TOML file + `IUDEX_SECTION__KEY`
//! environment overrides) and never changes mid-flight; retuning ranking
//! means editing config, not code.

use crate::error::{IudexError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

mod validator;

pub use validator::ConfigValidator;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub engine: EngineSection,
    pub index: IndexSection,
    pub store: StoreSection,
    pub fusion: FusionSection,
    pub signals: SignalWeights,
    pub expansion: ExpansionSection,
    pub semantic: SemanticSection,
    pub citations: CitationSection,
    pub rerank: RerankSection,
    pub snippet: SnippetSection,
}

/// Request-level limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSection {
    /// Per-request deadline; incomplete sources past it are abandoned
    pub request_deadline_ms: u64,
    /// Upper bound on concurrently executing sources within one request
    pub max_concurrent_sources: usize,
    /// Candidate pool size requested from every source
    pub candidate_pool_size: usize,
    /// Largest accepted page size
    pub max_page_size: usize,
    /// Page size applied when the request passes 0
    pub default_page_size: usize,
}

/// Text index location
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexSection {
    /// Directory holding the tantivy index
    pub dir: PathBuf,
}

/// Decision store location
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreSection {
    /// Path to the sqlite decision database
    pub db_path: PathBuf,
    /// Read-only connection pool size
    pub pool_size: u32,
}

/// Reciprocal rank fusion constant and per-strategy trust weights
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FusionSection {
    /// RRF K constant, identical for every source in a deployment
    pub rrf_k: f32,
    /// AND-all-terms strategy (high precision)
    pub and_weight: f32,
    /// OR-terms-with-expansions strategy (high recall)
    pub or_weight: f32,
    /// Exact phrase strategy
    pub phrase_weight: f32,
    /// Title/regeste focused strategy
    pub field_weight: f32,
    /// Statute-citation filtered strategy
    pub statute_weight: f32,
    /// Vector similarity source
    pub vector_weight: f32,
}

/// Per-signal multipliers for the composite score. Title-side coverage is
/// weighted above body text, reflecting information density of headnotes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalWeights {
    pub bm25: f32,
    pub title_coverage: f32,
    pub regeste_coverage: f32,
    pub snippet_coverage: f32,
    pub title_phrase: f32,
    pub regeste_phrase: f32,
    pub docket_exact: f32,
    pub docket_partial: f32,
    pub statute_boost: f32,
    pub court_prior: f32,
    pub language_match: f32,
    pub vector_similarity: f32,
}

/// Query expansion: static synonym table is always on; the LLM path is
/// optional and strictly time-boxed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpansionSection {
    /// Enable the LLM term-suggestion call
    pub llm_enabled: bool,
    /// OpenAI-compatible chat completions endpoint
    pub endpoint: String,
    /// Environment variable holding the API key
    pub api_key_env: String,
    /// Model identifier passed to the endpoint
    pub model: String,
    /// Sampling temperature
    pub temperature: f32,
    /// Hard timeout for the suggestion call
    pub timeout_ms: u64,
    /// Cap on accepted suggested terms
    pub max_terms: usize,
}

/// Optional semantic retrieval (query embedding + vector index)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SemanticSection {
    /// Enable the vector similarity source
    pub enabled: bool,
    /// Embedding model name (multilingual corpus: de/fr/it)
    pub model: String,
    /// Vector dimension (must match the embedding model)
    pub vector_dim: usize,
    /// HNSW construction parameter
    pub hnsw_ef_construction: usize,
    /// HNSW M parameter (connections per layer)
    pub hnsw_m: usize,
    /// HNSW search beam width
    pub hnsw_ef_search: usize,
    /// Capacity hint for the index
    pub max_elements: usize,
}

/// Optional citation graph collaborator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CitationSection {
    /// Enable the citation graph lookups behind statute_boost
    pub enabled: bool,
    /// Separate citation database; `None` reads the decision store database
    #[serde(skip_serializing_if = "Option::is_none")]
    pub db_path: Option<PathBuf>,
}

/// Optional cross-encoder second pass over the top of the ranking
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RerankSection {
    /// Enable the heavy reranking pass
    pub enabled: bool,
    /// Cross-encoder model name
    pub model: String,
    /// Number of leading results the pass may reorder
    pub top_n: usize,
}

/// Snippet selection bounds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnippetSection {
    /// Sliding window size scored for query-term density
    pub window_chars: usize,
    /// Upper bound on the emitted snippet
    pub max_chars: usize,
    /// Wrap matched terms of returned snippets in `<em>` markers
    pub highlight: bool,
}

impl EngineConfig {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(IudexError::ConfigNotFound {
                path: path.to_path_buf(),
            });
        }

        let content = std::fs::read_to_string(path).map_err(|e| IudexError::Io {
            source: e,
            context: format!("Failed to read config file: {:?}", path),
        })?;
        let mut config: EngineConfig = toml::from_str(&content)?;

        config.apply_env_overrides();
        ConfigValidator::validate(&config)?;

        Ok(config)
    }

    /// Load defaults with environment overrides applied, without a file
    pub fn load_default() -> Result<Self> {
        let mut config = EngineConfig::default();
        config.apply_env_overrides();
        ConfigValidator::validate(&config)?;
        Ok(config)
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| IudexError::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, content).map_err(|e| IudexError::Io {
            source: e,
            context: format!("Failed to write config file: {:?}", path),
        })?;
        Ok(())
    }

    /// Apply environment variable overrides.
    /// Variables use the format `IUDEX_SECTION__KEY=value`.
    pub fn apply_env_overrides(&mut self) {
        for (key, value) in std::env::vars() {
            if let Some(config_key) = key.strip_prefix("IUDEX_") {
                if let Err(e) = self.set_value_from_env(config_key, &value) {
                    tracing::warn!("Failed to apply env override {}: {}", key, e);
                }
            }
        }
    }

    fn set_value_from_env(&mut self, path: &str, value: &str) -> Result<()> {
        fn parse<T: std::str::FromStr>(path: &str, value: &str) -> Result<T> {
            value.parse().map_err(|_| IudexError::InvalidConfigValue {
                path: path.to_string(),
                message: format!("Cannot parse '{}'", value),
            })
        }

        match path {
            "ENGINE__REQUEST_DEADLINE_MS" => {
                self.engine.request_deadline_ms = parse(path, value)?;
            }
            "ENGINE__CANDIDATE_POOL_SIZE" => {
                self.engine.candidate_pool_size = parse(path, value)?;
            }
            "FUSION__RRF_K" => {
                self.fusion.rrf_k = parse(path, value)?;
            }
            "EXPANSION__LLM_ENABLED" => {
                self.expansion.llm_enabled = parse(path, value)?;
            }
            "EXPANSION__ENDPOINT" => {
                self.expansion.endpoint = value.to_string();
            }
            "SEMANTIC__ENABLED" => {
                self.semantic.enabled = parse(path, value)?;
            }
            "SEMANTIC__MODEL" => {
                self.semantic.model = value.to_string();
            }
            "CITATIONS__ENABLED" => {
                self.citations.enabled = parse(path, value)?;
            }
            "RERANK__ENABLED" => {
                self.rerank.enabled = parse(path, value)?;
            }
            _ => {
                tracing::debug!("Unknown env config key: {}", path);
            }
        }
        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| IudexError::Config("Cannot determine config directory".to_string()))?;

        Ok(config_dir.join("iudex").join("config.toml"))
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            engine: EngineSection {
                request_deadline_ms: 2000,
                max_concurrent_sources: 8,
                candidate_pool_size: 50,
                max_page_size: 100,
                default_page_size: 10,
            },
            index: IndexSection {
                dir: PathBuf::from("data/index"),
            },
            store: StoreSection {
                db_path: PathBuf::from("data/decisions.db"),
                pool_size: 16,
            },
            fusion: FusionSection {
                rrf_k: 60.0,
                and_weight: 1.0,
                or_weight: 0.5,
                phrase_weight: 1.2,
                field_weight: 0.9,
                statute_weight: 1.1,
                vector_weight: 0.8,
            },
            signals: SignalWeights {
                bm25: 0.05,
                title_coverage: 2.0,
                regeste_coverage: 1.4,
                snippet_coverage: 0.6,
                title_phrase: 2.5,
                regeste_phrase: 1.5,
                docket_exact: 10.0,
                docket_partial: 3.0,
                statute_boost: 1.8,
                court_prior: 0.4,
                language_match: 0.3,
                vector_similarity: 1.5,
            },
            expansion: ExpansionSection {
                llm_enabled: false,
                endpoint: "https://api.groq.com/openai/v1/chat/completions".to_string(),
                api_key_env: "IUDEX_LLM_API_KEY".to_string(),
                model: "llama-3.1-8b-instant".to_string(),
                temperature: 0.1,
                timeout_ms: 1000,
                max_terms: 6,
            },
            semantic: SemanticSection {
                enabled: false,
                model: "multilingual-e5-small".to_string(),
                vector_dim: 384,
                hnsw_ef_construction: 200,
                hnsw_m: 16,
                hnsw_ef_search: 64,
                max_elements: 2_000_000,
            },
            citations: CitationSection {
                enabled: true,
                db_path: None,
            },
            rerank: RerankSection {
                enabled: false,
                model: "bge-reranker-base".to_string(),
                top_n: 20,
            },
            snippet: SnippetSection {
                window_chars: 300,
                max_chars: 360,
                highlight: true,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config_validates() {
        let config = EngineConfig::default();
        assert!(ConfigValidator::validate(&config).is_ok());
    }

    #[test]
    fn test_roundtrip() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");

        let mut config = EngineConfig::default();
        config.fusion.rrf_k = 30.0;
        config.signals.title_coverage = 3.5;
        config.save(&path).unwrap();

        let loaded = EngineConfig::load(&path).unwrap();
        assert_eq!(loaded.fusion.rrf_k, 30.0);
        assert_eq!(loaded.signals.title_coverage, 3.5);
    }

    #[test]
    fn test_missing_file() {
        let result = EngineConfig::load(Path::new("/nonexistent/config.toml"));
        assert!(matches!(result, Err(IudexError::ConfigNotFound { .. })));
    }
}
