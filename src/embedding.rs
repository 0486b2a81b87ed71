use crate::gemini::LanguageModel;
use tracing::warn;

/// Embeds `text` into a `dimension`-sized vector. Any model failure yields an
/// empty vector, which callers treat as "embedding unavailable".
pub async fn generate_embedding(model: &dyn LanguageModel, text: &str, dimension: usize) -> Vec<f32> {
    match model.embed_content(text, dimension).await {
        Ok(values) => {
            if values.len() != dimension {
                warn!(expected = dimension, got = values.len(), "Embedding has unexpected dimension");
            }
            values
        }
        Err(e) => {
            warn!(error = %e, "Error while embedding");
            Vec::new()
        }
    }
}

/// Little-endian f32 bytes, the on-disk form of a vector column.
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Cosine similarity; 0.0 for empty, mismatched, or zero-norm inputs.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let (mut dot, mut norm_a, mut norm_b) = (0.0f64, 0.0f64, 0.0f64);
    for (x, y) in a.iter().zip(b.iter()) {
        let (x, y) = (*x as f64, *y as f64);
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f64::EPSILON {
        return 0.0;
    }
    dot / denom
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use async_trait::async_trait;

    struct FixedModel(Option<Vec<f32>>);

    #[async_trait]
    impl LanguageModel for FixedModel {
        async fn generate_content(&self, _prompt: &str) -> Result<String> {
            Ok(String::new())
        }

        async fn embed_content(&self, _text: &str, _dimensionality: usize) -> Result<Vec<f32>> {
            self.0.clone().ok_or_else(|| anyhow::anyhow!("quota exceeded"))
        }
    }

    #[tokio::test]
    async fn embedding_passes_vector_through() {
        let model = FixedModel(Some(vec![0.1; 768]));
        let values = generate_embedding(&model, "summary", 768).await;
        assert_eq!(values.len(), 768);
    }

    #[tokio::test]
    async fn embedding_failure_is_an_empty_vector() {
        let model = FixedModel(None);
        assert!(generate_embedding(&model, "summary", 768).await.is_empty());
    }

    #[test]
    fn blob_roundtrip_preserves_values() {
        let vec = vec![1.0f32, -2.5, 3.125, 0.0];
        assert_eq!(blob_to_vec(&vec_to_blob(&vec)), vec);
    }

    #[test]
    fn cosine_of_identical_vectors_is_one() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_of_mismatched_lengths_is_zero() {
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
    }
}
