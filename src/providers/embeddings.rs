//! Local embedding model backed by fastembed.

use anyhow::{Context, Result};
use async_trait::async_trait;
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

use super::Embedder;

/// Lazily initialised BGE-small model.
///
/// The model is CPU bound, so each batch runs on the blocking pool.
pub struct FastEmbedder {
    model: Arc<Mutex<Option<TextEmbedding>>>,
}

impl std::fmt::Debug for FastEmbedder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FastEmbedder")
            .field("model", &"BGESmallENV15")
            .finish()
    }
}

impl Default for FastEmbedder {
    fn default() -> Self {
        Self::new()
    }
}

impl FastEmbedder {
    pub fn new() -> Self {
        Self {
            model: Arc::new(Mutex::new(None)),
        }
    }

    pub async fn initialize(&self) -> Result<()> {
        let mut model_guard = self.model.lock().await;
        if model_guard.is_none() {
            info!("Initializing fastembed model (BG-Small-En-V1.5)...");
            let mut options = InitOptions::new(EmbeddingModel::BGESmallENV15);
            options.show_download_progress = false;

            let model = tokio::task::spawn_blocking(move || TextEmbedding::try_new(options))
                .await
                .context("embedding model init task panicked")??;
            *model_guard = Some(model);
        }
        Ok(())
    }
}

#[async_trait]
impl Embedder for FastEmbedder {
    async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        self.initialize().await?;

        let mut model_guard = self.model.lock().await;
        let mut owned_model = model_guard
            .take()
            .context("Model unexpectedly None during embed")?;

        let (embeddings_res, returned_model) = tokio::task::spawn_blocking(move || {
            let res = owned_model.embed(texts, None);
            (res, owned_model)
        })
        .await?;

        *model_guard = Some(returned_model);
        embeddings_res.map_err(|e| anyhow::anyhow!(e))
    }
}

/// Cosine similarity; zero when either vector has no magnitude.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_similarity() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < f32::EPSILON);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < f32::EPSILON);
        assert!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]).abs() < f32::EPSILON);
    }
}
