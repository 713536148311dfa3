use crate::config::EngineConfig;
use crate::error::{IudexError, Result, ValidationIssue};
use crate::retrieval::Signal;

/// Configuration validator
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate the configuration
    pub fn validate(config: &EngineConfig) -> Result<()> {
        let mut errors = Vec::new();

        Self::validate_engine(config, &mut errors);
        Self::validate_fusion(config, &mut errors);
        Self::validate_signals(config, &mut errors);
        Self::validate_expansion(config, &mut errors);
        Self::validate_semantic(config, &mut errors);
        Self::validate_rerank(config, &mut errors);
        Self::validate_snippet(config, &mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            Err(IudexError::ConfigValidation { errors })
        }
    }

    fn validate_engine(config: &EngineConfig, errors: &mut Vec<ValidationIssue>) {
        if config.engine.request_deadline_ms == 0 {
            errors.push(ValidationIssue::new(
                "engine.request_deadline_ms",
                "Request deadline must be greater than 0",
            ));
        }

        if config.engine.max_concurrent_sources == 0 {
            errors.push(ValidationIssue::new(
                "engine.max_concurrent_sources",
                "Source concurrency bound must be greater than 0",
            ));
        }

        if config.engine.candidate_pool_size == 0 {
            errors.push(ValidationIssue::new(
                "engine.candidate_pool_size",
                "Candidate pool size must be greater than 0",
            ));
        }

        if config.engine.max_page_size == 0 {
            errors.push(ValidationIssue::new(
                "engine.max_page_size",
                "Max page size must be greater than 0",
            ));
        }

        if config.engine.default_page_size == 0
            || config.engine.default_page_size > config.engine.max_page_size
        {
            errors.push(ValidationIssue::new(
                "engine.default_page_size",
                "Default page size must be in 1..=max_page_size",
            ));
        }
    }

    fn validate_fusion(config: &EngineConfig, errors: &mut Vec<ValidationIssue>) {
        if config.fusion.rrf_k <= 0.0 {
            errors.push(ValidationIssue::new(
                "fusion.rrf_k",
                "RRF K constant must be greater than 0",
            ));
        }

        let weights = [
            ("fusion.and_weight", config.fusion.and_weight),
            ("fusion.or_weight", config.fusion.or_weight),
            ("fusion.phrase_weight", config.fusion.phrase_weight),
            ("fusion.field_weight", config.fusion.field_weight),
            ("fusion.statute_weight", config.fusion.statute_weight),
            ("fusion.vector_weight", config.fusion.vector_weight),
        ];
        for (path, weight) in weights {
            if weight <= 0.0 || !weight.is_finite() {
                errors.push(ValidationIssue::new(
                    path,
                    format!("Strategy weight must be a positive finite number, got {}", weight),
                ));
            }
        }
    }

    fn validate_signals(config: &EngineConfig, errors: &mut Vec<ValidationIssue>) {
        let mut any_positive = false;
        for signal in Signal::ALL {
            let weight = config.signals.weight(signal);
            if weight < 0.0 || !weight.is_finite() {
                errors.push(ValidationIssue::new(
                    format!("signals.{}", signal.key()),
                    format!("Signal weight must be a nonnegative finite number, got {}", weight),
                ));
            }
            if weight > 0.0 {
                any_positive = true;
            }
        }
        if !any_positive {
            errors.push(ValidationIssue::new(
                "signals",
                "At least one signal weight must be positive",
            ));
        }
    }

    fn validate_expansion(config: &EngineConfig, errors: &mut Vec<ValidationIssue>) {
        // The API key is only required once the LLM path is switched on
        if config.expansion.llm_enabled {
            if config.expansion.endpoint.is_empty() {
                errors.push(ValidationIssue::new(
                    "expansion.endpoint",
                    "Endpoint cannot be empty when the LLM path is enabled",
                ));
            }

            let env_var = &config.expansion.api_key_env;
            match std::env::var(env_var) {
                Ok(key) if key.is_empty() => {
                    errors.push(ValidationIssue::new(
                        "expansion.api_key_env",
                        format!("Environment variable {} is empty", env_var),
                    ));
                }
                Ok(_) => {}
                Err(_) => {
                    errors.push(ValidationIssue::new(
                        "expansion.api_key_env",
                        format!("Environment variable {} is not set", env_var),
                    ));
                }
            }
        }

        let temp = config.expansion.temperature;
        if !(0.0..=2.0).contains(&temp) {
            errors.push(ValidationIssue::new(
                "expansion.temperature",
                format!("Temperature must be between 0.0 and 2.0, got {}", temp),
            ));
        }

        if config.expansion.timeout_ms == 0 || config.expansion.timeout_ms > 10_000 {
            errors.push(ValidationIssue::new(
                "expansion.timeout_ms",
                "Expansion timeout must be in 1..=10000 ms",
            ));
        }

        if !(1..=10).contains(&config.expansion.max_terms) {
            errors.push(ValidationIssue::new(
                "expansion.max_terms",
                "max_terms must be in 1..=10",
            ));
        }
    }

    fn validate_semantic(config: &EngineConfig, errors: &mut Vec<ValidationIssue>) {
        if config.semantic.vector_dim == 0 {
            errors.push(ValidationIssue::new(
                "semantic.vector_dim",
                "Vector dimension must be greater than 0",
            ));
        }

        if config.semantic.hnsw_ef_construction == 0 {
            errors.push(ValidationIssue::new(
                "semantic.hnsw_ef_construction",
                "HNSW ef_construction must be greater than 0",
            ));
        }

        if config.semantic.hnsw_m == 0 {
            errors.push(ValidationIssue::new(
                "semantic.hnsw_m",
                "HNSW M must be greater than 0",
            ));
        }

        if config.semantic.hnsw_ef_search == 0 {
            errors.push(ValidationIssue::new(
                "semantic.hnsw_ef_search",
                "HNSW ef_search must be greater than 0",
            ));
        }

        if config.semantic.enabled && config.semantic.model.is_empty() {
            errors.push(ValidationIssue::new(
                "semantic.model",
                "Model name cannot be empty when semantic retrieval is enabled",
            ));
        }
    }

    fn validate_rerank(config: &EngineConfig, errors: &mut Vec<ValidationIssue>) {
        if config.rerank.enabled {
            if config.rerank.model.is_empty() {
                errors.push(ValidationIssue::new(
                    "rerank.model",
                    "Model name cannot be empty when reranking is enabled",
                ));
            }
            if config.rerank.top_n == 0 {
                errors.push(ValidationIssue::new(
                    "rerank.top_n",
                    "top_n must be greater than 0 when reranking is enabled",
                ));
            }
        }
    }

    fn validate_snippet(config: &EngineConfig, errors: &mut Vec<ValidationIssue>) {
        if !(100..=1000).contains(&config.snippet.window_chars) {
            errors.push(ValidationIssue::new(
                "snippet.window_chars",
                "Snippet window must be in 100..=1000 chars",
            ));
        }

        if config.snippet.max_chars < config.snippet.window_chars {
            errors.push(ValidationIssue::new(
                "snippet.max_chars",
                "max_chars must be at least window_chars",
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_config() {
        let config = EngineConfig::default();
        assert!(ConfigValidator::validate(&config).is_ok());
    }

    #[test]
    fn test_zero_rrf_k() {
        let mut config = EngineConfig::default();
        config.fusion.rrf_k = 0.0;
        assert!(ConfigValidator::validate(&config).is_err());
    }

    #[test]
    fn test_negative_signal_weight() {
        let mut config = EngineConfig::default();
        config.signals.title_coverage = -1.0;
        assert!(ConfigValidator::validate(&config).is_err());
    }

    #[test]
    fn test_all_signal_weights_zero() {
        let mut config = EngineConfig::default();
        config.signals = crate::config::SignalWeights {
            bm25: 0.0,
            title_coverage: 0.0,
            regeste_coverage: 0.0,
            snippet_coverage: 0.0,
            title_phrase: 0.0,
            regeste_phrase: 0.0,
            docket_exact: 0.0,
            docket_partial: 0.0,
            statute_boost: 0.0,
            court_prior: 0.0,
            language_match: 0.0,
            vector_similarity: 0.0,
        };
        assert!(ConfigValidator::validate(&config).is_err());
    }

    #[test]
    fn test_snippet_bounds() {
        let mut config = EngineConfig::default();
        config.snippet.window_chars = 10;
        assert!(ConfigValidator::validate(&config).is_err());
    }
}
