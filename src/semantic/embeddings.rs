//! Embedding model wrapper for fastembed.
//!
//! Loads a compact sentence-embedding model and maps text to 384-dimensional
//! unit vectors (mean-pooled, L2-normalized by the model pipeline).

use fastembed::{InitOptions, TextEmbedding};
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use crate::semantic::EMBEDDING_DIM;

/// Default download timeout for model files (5 minutes)
const DEFAULT_DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(300);

/// Wrapper around fastembed's TextEmbedding model.
/// Uses a Mutex because fastembed's embed() requires &mut self.
pub struct EmbeddingModel {
    model: Mutex<TextEmbedding>,
    model_name: String,
}

/// Error type for embedding operations.
///
/// Every variant means the same thing to callers: no vector is available.
/// The distinction only matters for logging and retry decisions.
#[derive(Debug, thiserror::Error)]
pub enum EmbeddingError {
    #[error("Model initialization failed: {0}")]
    InitFailed(String),

    #[error("Embedding generation failed: {0}")]
    EmbeddingFailed(String),

    #[error("Embedding timed out after {0:?}")]
    Timeout(Duration),

    #[error("Invalid model name: {0}")]
    InvalidModel(String),

    #[error("Embedding worker is gone")]
    WorkerGone,
}

impl EmbeddingModel {
    /// Create a new embedding model with the given name.
    ///
    /// The model is downloaded on first use if not cached. Models are cached
    /// in the `models/` subdirectory of `cache_dir`. Only 384-dimensional
    /// models are accepted; the rest of the system assumes that width.
    pub fn new(
        model_name: &str,
        cache_dir: PathBuf,
        download_timeout: Option<Duration>,
    ) -> Result<Self, EmbeddingError> {
        let model_enum = Self::parse_model_name(model_name)?;
        let _timeout = download_timeout.unwrap_or(DEFAULT_DOWNLOAD_TIMEOUT);

        let models_dir = cache_dir.join("models");
        std::fs::create_dir_all(&models_dir).map_err(|e| {
            EmbeddingError::InitFailed(format!("Failed to create models directory: {}", e))
        })?;

        let options = InitOptions::new(model_enum)
            .with_cache_dir(models_dir)
            .with_show_download_progress(true);

        let mut model = TextEmbedding::try_new(options)
            .map_err(|e| EmbeddingError::InitFailed(e.to_string()))?;

        Self::probe_dimensions(&mut model)?;

        Ok(Self {
            model: Mutex::new(model),
            model_name: model_name.to_string(),
        })
    }

    pub fn name(&self) -> &str {
        &self.model_name
    }

    /// Generate an embedding for a single text.
    ///
    /// Never returns a zero or truncated vector: any failure, including an
    /// unexpected output width, surfaces as an error.
    pub fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let mut model = self.model.lock().map_err(|e| {
            EmbeddingError::EmbeddingFailed(format!("Failed to acquire model lock: {}", e))
        })?;

        let embeddings = model
            .embed(vec![text], None)
            .map_err(|e| EmbeddingError::EmbeddingFailed(e.to_string()))?;

        let vector = embeddings
            .into_iter()
            .next()
            .ok_or_else(|| EmbeddingError::EmbeddingFailed("No embedding returned".to_string()))?;

        if vector.len() != EMBEDDING_DIM {
            return Err(EmbeddingError::EmbeddingFailed(format!(
                "Model returned {} components, expected {}",
                vector.len(),
                EMBEDDING_DIM
            )));
        }

        Ok(vector)
    }

    /// Parse model name string to fastembed enum.
    ///
    /// Only 384-dimensional sentence-embedding models are supported.
    fn parse_model_name(name: &str) -> Result<fastembed::EmbeddingModel, EmbeddingError> {
        match name.to_lowercase().as_str() {
            "all-minilm-l6-v2" | "allminiml6v2" => Ok(fastembed::EmbeddingModel::AllMiniLML6V2),
            "all-minilm-l6-v2-q" | "allminiml6v2q" => {
                Ok(fastembed::EmbeddingModel::AllMiniLML6V2Q)
            }
            "bge-small-en-v1.5" | "bgesmallenv15" => {
                Ok(fastembed::EmbeddingModel::BGESmallENV15)
            }
            "bge-small-en-v1.5-q" | "bgesmallenv15q" => {
                Ok(fastembed::EmbeddingModel::BGESmallENV15Q)
            }
            _ => Err(EmbeddingError::InvalidModel(format!(
                "Unknown or unsupported model: {}. Supported 384-dim models: all-MiniLM-L6-v2, bge-small-en-v1.5 (add -q suffix for quantized)",
                name
            ))),
        }
    }

    /// Probe the model once to confirm it produces the expected width.
    fn probe_dimensions(model: &mut TextEmbedding) -> Result<(), EmbeddingError> {
        let test_embeddings = model.embed(vec!["test"], None).map_err(|e| {
            EmbeddingError::InitFailed(format!("Failed to probe dimensions: {}", e))
        })?;

        let dims = test_embeddings
            .first()
            .map(|v| v.len())
            .ok_or_else(|| EmbeddingError::InitFailed("Model returned no embedding".to_string()))?;

        if dims != EMBEDDING_DIM {
            return Err(EmbeddingError::InitFailed(format!(
                "Model produces {}-dim vectors, this system requires {}",
                dims, EMBEDDING_DIM
            )));
        }

        Ok(())
    }
}

/// SHA256 of a model name, without needing the model loaded.
/// Used by the vector sidecar file to detect model changes.
pub fn hash_model_name(name: &str) -> [u8; 32] {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(name.as_bytes());
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;

    // Integration tests require model download - run with --ignored
    #[test]
    #[ignore = "requires model download"]
    fn test_model_creation() {
        let temp_dir = std::env::temp_dir().join("rollcall-embed-test");
        let model = EmbeddingModel::new("all-MiniLM-L6-v2", temp_dir.clone(), None);
        assert!(model.is_ok());

        let model = model.unwrap();
        assert_eq!(model.name(), "all-MiniLM-L6-v2");

        let _ = std::fs::remove_dir_all(&temp_dir);
    }

    #[test]
    #[ignore = "requires model download"]
    fn test_embedding_is_unit_length() {
        let temp_dir = std::env::temp_dir().join("rollcall-embed-test-gen");
        let model = EmbeddingModel::new("all-MiniLM-L6-v2", temp_dir.clone(), None).unwrap();

        let embedding = model.embed("fullstack engineer").unwrap();
        assert_eq!(embedding.len(), EMBEDDING_DIM);

        let norm: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);

        let _ = std::fs::remove_dir_all(&temp_dir);
    }

    #[test]
    #[ignore = "requires model download"]
    fn test_embedding_is_repeatable() {
        let temp_dir = std::env::temp_dir().join("rollcall-embed-test-idem");
        let model = EmbeddingModel::new("all-MiniLM-L6-v2", temp_dir.clone(), None).unwrap();

        let a = model.embed("AI researcher").unwrap();
        let b = model.embed("AI researcher").unwrap();

        let cos: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
        assert!(cos >= 0.999999);

        let _ = std::fs::remove_dir_all(&temp_dir);
    }

    #[test]
    fn test_invalid_model_name() {
        let temp_dir = std::env::temp_dir().join("rollcall-embed-invalid");
        let result = EmbeddingModel::new("nonexistent-model", temp_dir, None);
        assert!(matches!(result, Err(EmbeddingError::InvalidModel(_))));
    }

    #[test]
    fn test_768_dim_models_are_rejected_by_name() {
        // bge-base is 768-dim; the parser must not accept it
        let temp_dir = std::env::temp_dir().join("rollcall-embed-768");
        let result = EmbeddingModel::new("bge-base-en-v1.5", temp_dir, None);
        assert!(matches!(result, Err(EmbeddingError::InvalidModel(_))));
    }

    #[test]
    fn test_model_name_hash_is_deterministic() {
        assert_eq!(
            hash_model_name("all-MiniLM-L6-v2"),
            hash_model_name("all-MiniLM-L6-v2")
        );
        assert_ne!(
            hash_model_name("all-MiniLM-L6-v2"),
            hash_model_name("bge-small-en-v1.5")
        );
    }
}
