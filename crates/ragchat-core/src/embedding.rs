//! Embedding vectors and the embedding provider trait.
//!
//! [`Embedding`] is a fixed-length vector: construction fails for any
//! length other than [`EMBEDDING_DIMENSION`], so every chunk stored in a
//! namespace is guaranteed comparable with every query vector.
//!
//! Concrete providers (OpenAI-compatible HTTP) live in the `ragchat`
//! app crate.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Dimensionality of every embedding in the system.
pub const EMBEDDING_DIMENSION: usize = 1536;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Embedding must have {expected} dimensions")]
pub struct InvalidDimension {
    pub expected: usize,
    pub actual: usize,
}

/// A validated embedding vector of exactly [`EMBEDDING_DIMENSION`] floats.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<f32>", into = "Vec<f32>")]
pub struct Embedding(Vec<f32>);

impl Embedding {
    pub fn new(vector: Vec<f32>) -> Result<Self, InvalidDimension> {
        if vector.len() != EMBEDDING_DIMENSION {
            return Err(InvalidDimension {
                expected: EMBEDDING_DIMENSION,
                actual: vector.len(),
            });
        }
        Ok(Self(vector))
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    pub fn into_vec(self) -> Vec<f32> {
        self.0
    }

    pub fn dims(&self) -> usize {
        self.0.len()
    }

    /// Right length and every component finite.
    pub fn is_valid(&self) -> bool {
        self.0.len() == EMBEDDING_DIMENSION && self.0.iter().all(|v| v.is_finite())
    }

    pub fn cosine_similarity(&self, other: &Embedding) -> f32 {
        cosine_similarity(&self.0, &other.0)
    }
}

impl TryFrom<Vec<f32>> for Embedding {
    type Error = InvalidDimension;

    fn try_from(vector: Vec<f32>) -> Result<Self, Self::Error> {
        Embedding::new(vector)
    }
}

impl From<Embedding> for Vec<f32> {
    fn from(embedding: Embedding) -> Self {
        embedding.0
    }
}

/// Compute cosine similarity between two vectors.
///
/// Returns a value in `[-1.0, 1.0]`:
/// - `1.0` = identical direction
/// - `0.0` = orthogonal (unrelated)
/// - `-1.0` = opposite direction
///
/// Returns `0.0` for empty vectors, vectors of different lengths, and
/// zero-norm vectors. Accumulates in `f64` and clamps, so rounding never
/// pushes the result outside the range.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;

    for (&x, &y) in a.iter().zip(b.iter()) {
        let (x, y) = (x as f64, y as f64);
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if !denom.is_finite() || denom < f64::EPSILON {
        return 0.0;
    }

    (dot / denom).clamp(-1.0, 1.0) as f32
}

/// Trait for embedding backends.
///
/// `embed_batch` must return one vector per input text, in input order:
/// ingestion zips the output back onto its records index-for-index.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Returns the model identifier (e.g. `"text-embedding-3-small"`).
    fn model_name(&self) -> &str;
    /// Returns the embedding vector dimensionality (e.g. `1536`).
    fn dims(&self) -> usize;
    /// Embed a batch of texts in one call.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Embed `texts` and validate the provider's output.
///
/// Fails if the provider returns a different number of vectors than
/// texts, or any vector of the wrong dimensionality.
pub async fn embed_texts(provider: &dyn EmbeddingProvider, texts: &[String]) -> Result<Vec<Embedding>> {
    if texts.is_empty() {
        return Ok(Vec::new());
    }

    let vectors = provider.embed_batch(texts).await?;
    if vectors.len() != texts.len() {
        bail!(
            "embedding provider returned {} vectors for {} texts",
            vectors.len(),
            texts.len()
        );
    }

    vectors
        .into_iter()
        .enumerate()
        .map(|(i, v)| Embedding::new(v).with_context(|| format!("embedding {} is invalid", i)))
        .collect()
}

/// Embed a single query text.
pub async fn embed_query(provider: &dyn EmbeddingProvider, text: &str) -> Result<Embedding> {
    let mut embeddings = embed_texts(provider, &[text.to_string()]).await?;
    embeddings
        .pop()
        .context("embedding provider returned no vector for the query")
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn unit(index: usize) -> Vec<f32> {
        let mut v = vec![0.0f32; EMBEDDING_DIMENSION];
        v[index] = 1.0;
        v
    }

    #[test]
    fn test_wrong_dimension_rejected() {
        let err = Embedding::new(vec![0.5; 3]).unwrap_err();
        assert_eq!(err.to_string(), "Embedding must have 1536 dimensions");
        assert_eq!(err.actual, 3);
        assert!(Embedding::new(Vec::new()).is_err());
        assert!(Embedding::new(vec![0.0; EMBEDDING_DIMENSION + 1]).is_err());
    }

    #[test]
    fn test_non_finite_is_not_valid() {
        let mut v = unit(0);
        v[5] = f32::NAN;
        let e = Embedding::new(v).unwrap();
        assert!(!e.is_valid());
    }

    #[test]
    fn test_deserialize_validates_length() {
        let ok: Result<Embedding, _> = serde_json::from_value(serde_json::json!(unit(2)));
        assert!(ok.is_ok());
        let bad: Result<Embedding, _> = serde_json::from_str("[1.0, 2.0]");
        assert!(bad.is_err());
    }

    #[test]
    fn test_cosine_identical() {
        let v = vec![1.0, 2.0, 3.0];
        let sim = cosine_similarity(&v, &v);
        assert!((sim - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_opposite() {
        let a = vec![1.0, 0.0];
        let b = vec![-1.0, 0.0];
        let sim = cosine_similarity(&a, &b);
        assert!((sim + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_empty_and_mismatched() {
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
    }

    struct FixedProvider {
        vectors: Vec<Vec<f32>>,
    }

    #[async_trait]
    impl EmbeddingProvider for FixedProvider {
        fn model_name(&self) -> &str {
            "fixed"
        }
        fn dims(&self) -> usize {
            EMBEDDING_DIMENSION
        }
        async fn embed_batch(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(self.vectors.clone())
        }
    }

    #[tokio::test]
    async fn test_embed_texts_checks_count_and_dims() {
        let provider = FixedProvider {
            vectors: vec![unit(0)],
        };
        let texts = vec!["a".to_string(), "b".to_string()];
        let err = embed_texts(&provider, &texts).await.unwrap_err();
        assert!(err.to_string().contains("1 vectors for 2 texts"));

        let provider = FixedProvider {
            vectors: vec![vec![1.0; 8]],
        };
        let err = embed_query(&provider, "q").await.unwrap_err();
        assert!(format!("{:#}", err).contains("Embedding must have 1536 dimensions"));

        let provider = FixedProvider { vectors: vec![] };
        assert!(embed_texts(&provider, &[]).await.unwrap().is_empty());
    }

    fn vector() -> impl Strategy<Value = Vec<f32>> {
        prop::collection::vec(-1.0f32..1.0, EMBEDDING_DIMENSION)
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn prop_only_exact_dimension_constructs(len in 0usize..4000) {
            let result = Embedding::new(vec![0.25; len]);
            if len == EMBEDDING_DIMENSION {
                prop_assert!(result.map(|e| e.is_valid()).unwrap_or(false));
            } else {
                let err = result.unwrap_err();
                prop_assert_eq!(err.to_string(), "Embedding must have 1536 dimensions");
            }
        }

        #[test]
        fn prop_cosine_range_and_symmetry(a in vector(), b in vector()) {
            let a = Embedding::new(a).unwrap();
            let b = Embedding::new(b).unwrap();
            let ab = a.cosine_similarity(&b);
            let ba = b.cosine_similarity(&a);
            prop_assert!((-1.0..=1.0).contains(&ab));
            prop_assert_eq!(ab, ba);
        }

        #[test]
        fn prop_cosine_self_similarity(a in vector()) {
            let norm: f32 = a.iter().map(|x| x * x).sum();
            prop_assume!(norm > 1e-3);
            let a = Embedding::new(a).unwrap();
            prop_assert!((a.cosine_similarity(&a) - 1.0).abs() < 1e-4);
        }

        #[test]
        fn prop_orthogonal_units(i in 0usize..EMBEDDING_DIMENSION, j in 0usize..EMBEDDING_DIMENSION) {
            prop_assume!(i != j);
            let a = Embedding::new(unit(i)).unwrap();
            let b = Embedding::new(unit(j)).unwrap();
            prop_assert!(a.cosine_similarity(&b).abs() < 1e-4);
        }
    }
}
