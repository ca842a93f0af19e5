//! The extraction context: named catalogs plus the shared matching engine.
//!
//! An [`Extractor`] is built once at startup (every catalog bootstrapped
//! against the embedding cache) and is read-only afterwards, so request
//! handlers share it through an `Arc` without locking.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;

use crate::aggregate::{aggregate, Match};
use crate::catalog::{Catalog, CatalogLoadError};
use crate::config::{Config, SegmentationStrategy};
use crate::matcher::{SelectionPolicy, SimilarityMatcher};
use crate::segment::{CommandRecognizer, DelimiterSegmenter, SegmentationError, Segmenter, SpanSegmenter};
use crate::semantic::embeddings::encode_checked;
use crate::semantic::{normalize, EmbeddingCache, EmbeddingError, EmbeddingMatrix, EmbeddingProvider, MatrixError};

#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("unknown catalog '{0}'")]
    UnknownCatalog(String),

    #[error("segmentation failed: {0}")]
    Segmentation(#[from] SegmentationError),

    #[error("embedding failed: {0}")]
    Embedding(#[from] EmbeddingError),

    /// Fragment vectors don't fit the catalog matrix. Not retryable.
    #[error("fragment embeddings don't fit catalog matrix: {0}")]
    DimensionMismatch(#[from] MatrixError),
}

#[derive(Debug, thiserror::Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Catalog(#[from] CatalogLoadError),

    #[error("failed to embed catalog '{catalog}': {source}")]
    Embedding {
        catalog: String,
        source: EmbeddingError,
    },

    #[error("catalog '{0}' is already loaded")]
    DuplicateCatalog(String),

    #[error("invalid segmentation config: {0}")]
    Segmentation(String),
}

/// A catalog together with its embedding matrix and threshold.
struct CatalogIndex {
    catalog: Catalog,
    matrix: EmbeddingMatrix,
    threshold: f32,
}

/// Summary of a loaded catalog.
#[derive(Debug, Clone, Serialize)]
pub struct CatalogInfo {
    pub name: String,
    pub entries: usize,
    pub threshold: f32,
}

pub struct Extractor {
    provider: Arc<dyn EmbeddingProvider>,
    segmenter: Box<dyn Segmenter>,
    matcher: SimilarityMatcher,
    catalogs: BTreeMap<String, CatalogIndex>,
}

impl Extractor {
    pub fn new(
        provider: Arc<dyn EmbeddingProvider>,
        segmenter: Box<dyn Segmenter>,
        policy: SelectionPolicy,
    ) -> Self {
        Self {
            provider,
            segmenter,
            matcher: SimilarityMatcher::new(policy),
            catalogs: BTreeMap::new(),
        }
    }

    /// Build the segmenter, load every configured catalog and bootstrap its matrix.
    pub fn from_config(
        config: &Config,
        provider: Arc<dyn EmbeddingProvider>,
        cache: &dyn EmbeddingCache,
    ) -> Result<Self, BootstrapError> {
        let segmenter = segmenter_from_config(config)?;
        let mut extractor = Self::new(provider, segmenter, config.selection_policy);

        for entry in &config.catalogs {
            let catalog = Catalog::load_csv(&entry.name, &config.resolve(&entry.path))?;
            extractor.add_catalog(catalog, entry.threshold, cache, config.embed_batch_size)?;
        }

        Ok(extractor)
    }

    /// Register a catalog, loading or computing its embedding matrix.
    pub fn add_catalog(
        &mut self,
        catalog: Catalog,
        threshold: f32,
        cache: &dyn EmbeddingCache,
        batch_size: usize,
    ) -> Result<(), BootstrapError> {
        if self.catalogs.contains_key(catalog.name()) {
            return Err(BootstrapError::DuplicateCatalog(catalog.name().to_string()));
        }

        let now = Instant::now();
        let matrix = EmbeddingMatrix::bootstrap(&catalog, self.provider.as_ref(), cache, batch_size)
            .map_err(|source| BootstrapError::Embedding {
                catalog: catalog.name().to_string(),
                source,
            })?;

        log::info!(
            "Catalog '{}' ready: {} entries, threshold {threshold}, took {}ms",
            catalog.name(),
            catalog.len(),
            now.elapsed().as_millis()
        );

        self.catalogs.insert(
            catalog.name().to_string(),
            CatalogIndex {
                catalog,
                matrix,
                threshold,
            },
        );

        Ok(())
    }

    pub fn policy(&self) -> SelectionPolicy {
        self.matcher.policy()
    }

    pub fn catalogs(&self) -> Vec<CatalogInfo> {
        self.catalogs
            .values()
            .map(|index| CatalogInfo {
                name: index.catalog.name().to_string(),
                entries: index.catalog.len(),
                threshold: index.threshold,
            })
            .collect()
    }

    pub fn has_catalog(&self, name: &str) -> bool {
        self.catalogs.contains_key(name)
    }

    /// Find entries of catalog `name` in each document.
    ///
    /// Returns one match list per document, same length and order as
    /// `documents`. All fragments of the batch are embedded in a single
    /// provider call. A batch with no text at all returns empty lists
    /// without touching the segmenter or the provider.
    pub fn extract<S: AsRef<str>>(
        &self,
        name: &str,
        documents: &[S],
    ) -> Result<Vec<Vec<Match>>, ExtractError> {
        let index = self
            .catalogs
            .get(name)
            .ok_or_else(|| ExtractError::UnknownCatalog(name.to_string()))?;

        let documents: Vec<&str> = documents.iter().map(|doc| doc.as_ref()).collect();
        if documents.iter().all(|doc| doc.trim().is_empty()) {
            return Ok(vec![Vec::new(); documents.len()]);
        }

        let now = Instant::now();
        let fragments = self.segmenter.segment_batch(&documents)?;
        let counts: Vec<usize> = fragments.iter().map(Vec::len).collect();
        let texts: Vec<String> = fragments
            .into_iter()
            .flatten()
            .map(|fragment| {
                if let Some(label) = &fragment.label {
                    log::trace!("fragment {:?} labeled {label}", fragment.text);
                }
                fragment.text
            })
            .collect();

        if texts.is_empty() {
            return Ok(vec![Vec::new(); documents.len()]);
        }

        let mut vectors = encode_checked(self.provider.as_ref(), &texts)?;
        for vector in vectors.iter_mut() {
            normalize(vector);
        }

        let hits = self.matcher.select(&vectors, &index.matrix, index.threshold)?;
        let matches = aggregate(&counts, hits, &index.catalog);

        log::debug!(
            "extracted from {} documents ({} {} fragments) against '{name}' in {}ms",
            documents.len(),
            texts.len(),
            self.segmenter.name(),
            now.elapsed().as_millis()
        );

        Ok(matches)
    }

    /// Like [`Extractor::extract`], identifiers only.
    pub fn extract_ids<S: AsRef<str>>(
        &self,
        name: &str,
        documents: &[S],
    ) -> Result<Vec<Vec<String>>, ExtractError> {
        Ok(self
            .extract(name, documents)?
            .into_iter()
            .map(|matches| matches.into_iter().map(|m| m.id).collect())
            .collect())
    }
}

fn segmenter_from_config(config: &Config) -> Result<Box<dyn Segmenter>, BootstrapError> {
    let seg = &config.segmentation;
    match seg.strategy {
        SegmentationStrategy::Delimiter => {
            Ok(Box::new(DelimiterSegmenter::new(seg.min_fragment_length)))
        }
        SegmentationStrategy::Span => {
            let recognizer = CommandRecognizer::new(&seg.command).ok_or_else(|| {
                BootstrapError::Segmentation("span strategy needs a command".to_string())
            })?;
            Ok(Box::new(SpanSegmenter::new(Box::new(recognizer))))
        }
    }
}
