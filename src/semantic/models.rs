//! Lazy model lifecycle.
//!
//! Models initialize on first use, off the async runtime, exactly once per
//! process. A failed initialization is cached as permanently unavailable:
//! later requests skip the subsystem silently instead of retrying a download
//! on every search.

use std::sync::Arc;

use fastembed::{RerankInitOptions, RerankerModel, TextRerank};
use tokio::sync::OnceCell;
use tracing::warn;

use super::provider::{EmbeddingError, EmbeddingProvider, FastEmbedProvider};
use crate::config::{RerankSection, SemanticSection};

/// Single-flight holder for the embedding model and the cross-encoder.
pub struct ModelProvider {
    semantic: SemanticSection,
    rerank: RerankSection,
    embedder: OnceCell<Option<Arc<dyn EmbeddingProvider>>>,
    cross_encoder: OnceCell<Option<Arc<CrossEncoder>>>,
}

impl ModelProvider {
    pub fn new(semantic: SemanticSection, rerank: RerankSection) -> Self {
        Self {
            semantic,
            rerank,
            embedder: OnceCell::new(),
            cross_encoder: OnceCell::new(),
        }
    }

    /// Construct with a pre-initialized embedder. Lets tests and embedded
    /// deployments supply a deterministic provider instead of fastembed.
    pub fn with_embedder(
        semantic: SemanticSection,
        rerank: RerankSection,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> Self {
        Self {
            semantic,
            rerank,
            embedder: OnceCell::new_with(Some(Some(embedder))),
            cross_encoder: OnceCell::new(),
        }
    }

    /// The embedding provider, initializing it on first call. `None` means
    /// the model could not be loaded; the outcome is cached either way.
    pub async fn embedder(&self) -> Option<Arc<dyn EmbeddingProvider>> {
        self.embedder
            .get_or_init(|| async {
                let model = self.semantic.model.clone();
                let result =
                    tokio::task::spawn_blocking(move || FastEmbedProvider::new(&model)).await;
                match result {
                    Ok(Ok(provider)) => {
                        Some(Arc::new(provider) as Arc<dyn EmbeddingProvider>)
                    }
                    Ok(Err(error)) => {
                        warn!(%error, model = %self.semantic.model,
                            "embedding model unavailable, vector retrieval disabled");
                        None
                    }
                    Err(error) => {
                        warn!(%error, "embedding model initialization task failed");
                        None
                    }
                }
            })
            .await
            .clone()
    }

    /// The cross-encoder, initializing it on first call.
    pub async fn cross_encoder(&self) -> Option<Arc<CrossEncoder>> {
        self.cross_encoder
            .get_or_init(|| async {
                let model = self.rerank.model.clone();
                let result = tokio::task::spawn_blocking(move || CrossEncoder::new(&model)).await;
                match result {
                    Ok(Ok(encoder)) => Some(Arc::new(encoder)),
                    Ok(Err(error)) => {
                        warn!(%error, model = %self.rerank.model,
                            "cross-encoder unavailable, rerank pass disabled");
                        None
                    }
                    Err(error) => {
                        warn!(%error, "cross-encoder initialization task failed");
                        None
                    }
                }
            })
            .await
            .clone()
    }
}

/// Cross-encoder scoring query/document pairs jointly. Slower than the
/// bi-encoder but considerably sharper on the handful of top candidates.
pub struct CrossEncoder {
    model: TextRerank,
    model_name: String,
}

impl CrossEncoder {
    pub fn new(model_name: &str) -> Result<Self, EmbeddingError> {
        let reranker_model = match model_name {
            "bge-reranker-base" => RerankerModel::BGERerankerBase,
            "bge-reranker-v2-m3" => RerankerModel::BGERerankerV2M3,
            _ => {
                return Err(EmbeddingError::InitializationError(format!(
                    "Unsupported reranker: {}. Supported: bge-reranker-base, bge-reranker-v2-m3",
                    model_name
                )));
            }
        };

        tracing::info!("Initializing cross-encoder: {}", model_name);
        let model = TextRerank::try_new(
            RerankInitOptions::new(reranker_model).with_show_download_progress(true),
        )
        .map_err(|e| EmbeddingError::InitializationError(e.to_string()))?;

        Ok(Self {
            model,
            model_name: model_name.to_string(),
        })
    }

    /// Relevance scores for the documents, aligned with input order.
    pub fn rescore(&self, query: &str, documents: &[String]) -> Result<Vec<f32>, EmbeddingError> {
        if documents.is_empty() {
            return Ok(Vec::new());
        }

        let docs: Vec<&str> = documents.iter().map(String::as_str).collect();
        let results = self
            .model
            .rerank(query, docs, false, None)
            .map_err(|e| EmbeddingError::GenerationError(e.to_string()))?;

        let mut scores = vec![0.0; documents.len()];
        for result in results {
            if let Some(slot) = scores.get_mut(result.index) {
                *slot = result.score;
            }
        }
        Ok(scores)
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;

    struct StubEmbedder;

    impl EmbeddingProvider for StubEmbedder {
        fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbeddingError> {
            Ok(vec![1.0, 0.0])
        }

        fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            Ok(texts.iter().map(|_| vec![1.0, 0.0]).collect())
        }

        fn dimension(&self) -> usize {
            2
        }

        fn model_name(&self) -> &str {
            "stub"
        }
    }

    #[tokio::test]
    async fn test_injected_embedder_is_returned_without_init() {
        let config = EngineConfig::default();
        let provider = ModelProvider::with_embedder(
            config.semantic.clone(),
            config.rerank.clone(),
            Arc::new(StubEmbedder),
        );

        let embedder = provider.embedder().await.expect("injected embedder");
        assert_eq!(embedder.model_name(), "stub");
        assert_eq!(embedder.embed("anything").unwrap(), vec![1.0, 0.0]);
    }

    #[tokio::test]
    async fn test_failed_init_is_cached() {
        let config = EngineConfig::default();
        let mut semantic = config.semantic.clone();
        semantic.model = "no-such-model".to_string();
        let provider = ModelProvider::new(semantic, config.rerank.clone());

        assert!(provider.embedder().await.is_none());
        // second call hits the cached outcome
        assert!(provider.embedder().await.is_none());
    }
}
