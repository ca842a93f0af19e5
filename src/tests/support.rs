//! Deterministic fixtures shared by the unit and scenario tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::catalog::{Catalog, CatalogEntry};
use crate::segment::{SegmentationError, Span, SpanRecognizer};
use crate::semantic::{EmbeddingError, EmbeddingProvider};

/// A "skills" catalog built from `(id, text)` pairs.
pub fn catalog(rows: &[(&str, &str)]) -> Catalog {
    let entries = rows
        .iter()
        .map(|(id, text)| CatalogEntry {
            id: id.to_string(),
            text: text.to_string(),
            label: None,
        })
        .collect();
    Catalog::from_entries("skills", entries).unwrap()
}

/// Counts vocabulary words. One dimension per vocabulary word, so two texts
/// are similar exactly when they share words.
pub struct BagOfWords {
    vocabulary: Vec<String>,
    calls: AtomicUsize,
}

impl BagOfWords {
    pub fn new(vocabulary: &[&str]) -> Self {
        Self {
            vocabulary: vocabulary.iter().map(|w| w.to_string()).collect(),
            calls: AtomicUsize::new(0),
        }
    }

    /// Number of `encode` calls so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn vector(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0; self.vocabulary.len()];
        for token in text
            .to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            if let Some(pos) = self.vocabulary.iter().position(|w| w == token) {
                vector[pos] += 1.0;
            }
        }
        vector
    }
}

impl EmbeddingProvider for BagOfWords {
    fn model_id(&self) -> &str {
        "bag-of-words"
    }

    fn dimensions(&self) -> usize {
        self.vocabulary.len()
    }

    fn encode(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(texts.iter().map(|text| self.vector(text)).collect())
    }
}

/// A provider that is always down.
pub struct Failing;

impl EmbeddingProvider for Failing {
    fn model_id(&self) -> &str {
        "failing"
    }

    fn dimensions(&self) -> usize {
        2
    }

    fn encode(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        Err(EmbeddingError::EmbeddingFailed("provider unavailable".to_string()))
    }
}

/// Returns the same canned spans on every call.
pub struct StaticRecognizer {
    spans: Vec<Vec<Span>>,
    pub calls: Arc<AtomicUsize>,
}

impl StaticRecognizer {
    pub fn new(spans: Vec<Vec<Span>>) -> Self {
        Self {
            spans,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl SpanRecognizer for StaticRecognizer {
    fn recognize(&self, _documents: &[&str]) -> Result<Vec<Vec<Span>>, SegmentationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.spans.clone())
    }
}
