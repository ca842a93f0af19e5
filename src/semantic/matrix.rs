//! Catalog embedding matrix and its load-or-compute bootstrap.

use indicatif::{ProgressBar, ProgressStyle};

use crate::catalog::{Catalog, Fingerprint};
use crate::semantic::cache::EmbeddingCache;
use crate::semantic::embeddings::{encode_checked, normalize, EmbeddingError, EmbeddingProvider};

/// Row-major matrix of unit-norm vectors, one row per catalog entry.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingMatrix {
    dimensions: usize,
    data: Vec<f32>,
}

#[derive(Debug, thiserror::Error)]
pub enum MatrixError {
    #[error("Dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("Row count mismatch: expected {expected}, got {got}")]
    RowMismatch { expected: usize, got: usize },
}

impl EmbeddingMatrix {
    /// Build from already-computed rows, normalizing each one.
    pub fn from_rows(rows: Vec<Vec<f32>>, dimensions: usize) -> Result<Self, MatrixError> {
        let mut data = Vec::with_capacity(rows.len() * dimensions);
        for mut row in rows {
            if row.len() != dimensions {
                return Err(MatrixError::DimensionMismatch {
                    expected: dimensions,
                    got: row.len(),
                });
            }
            normalize(&mut row);
            data.extend_from_slice(&row);
        }
        Ok(Self { dimensions, data })
    }

    /// Wrap a raw row-major buffer as-is (no normalization).
    pub(crate) fn from_raw(dimensions: usize, data: Vec<f32>) -> Result<Self, MatrixError> {
        if dimensions == 0 || data.len() % dimensions != 0 {
            return Err(MatrixError::DimensionMismatch {
                expected: dimensions,
                got: data.len(),
            });
        }
        Ok(Self { dimensions, data })
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub fn rows(&self) -> usize {
        if self.dimensions == 0 {
            0
        } else {
            self.data.len() / self.dimensions
        }
    }

    #[cfg(test)]
    pub fn row(&self, index: usize) -> &[f32] {
        &self.data[index * self.dimensions..(index + 1) * self.dimensions]
    }

    pub fn iter_rows(&self) -> impl Iterator<Item = &[f32]> {
        self.data.chunks_exact(self.dimensions.max(1))
    }

    pub(crate) fn as_slice(&self) -> &[f32] {
        &self.data
    }

    /// Sanity check a matrix against the catalog and model it claims to serve.
    pub fn check(&self, rows: usize, dimensions: usize) -> Result<(), MatrixError> {
        if self.dimensions != dimensions {
            return Err(MatrixError::DimensionMismatch {
                expected: dimensions,
                got: self.dimensions,
            });
        }
        if self.rows() != rows {
            return Err(MatrixError::RowMismatch {
                expected: rows,
                got: self.rows(),
            });
        }
        Ok(())
    }

    /// Load the catalog's matrix from `cache`, or compute and store it.
    ///
    /// Unreadable or inconsistent cache entries are evicted and recomputed.
    /// Only provider failures are returned to the caller.
    pub fn bootstrap(
        catalog: &Catalog,
        provider: &dyn EmbeddingProvider,
        cache: &dyn EmbeddingCache,
        batch_size: usize,
    ) -> Result<Self, EmbeddingError> {
        let fingerprint = catalog.fingerprint(provider.model_id());

        match cache.get(&fingerprint) {
            Ok(Some(matrix)) => match matrix.check(catalog.len(), provider.dimensions()) {
                Ok(()) => {
                    log::info!(
                        "Loaded {} embeddings for catalog '{}' from cache ({fingerprint})",
                        matrix.rows(),
                        catalog.name()
                    );
                    return Ok(matrix);
                }
                Err(e) => {
                    log::warn!(
                        "Discarding cached embeddings for catalog '{}': {e}",
                        catalog.name()
                    );
                    Self::evict(cache, catalog, &fingerprint);
                }
            },
            Ok(None) => {
                log::info!(
                    "No cached embeddings for catalog '{}', computing {} rows",
                    catalog.name(),
                    catalog.len()
                );
            }
            Err(e) => {
                log::warn!(
                    "Failed to read cached embeddings for catalog '{}': {e}",
                    catalog.name()
                );
                Self::evict(cache, catalog, &fingerprint);
            }
        }

        let matrix = Self::compute(catalog, provider, batch_size)?;

        if let Err(e) = cache.put(&fingerprint, &matrix) {
            log::warn!(
                "Failed to cache embeddings for catalog '{}': {e}",
                catalog.name()
            );
        }

        Ok(matrix)
    }

    /// Encode every catalog text, `batch_size` rows per provider call.
    fn compute(
        catalog: &Catalog,
        provider: &dyn EmbeddingProvider,
        batch_size: usize,
    ) -> Result<Self, EmbeddingError> {
        let texts = catalog.texts();
        let dimensions = provider.dimensions();

        let progress = ProgressBar::new(texts.len() as u64);
        if let Ok(style) = ProgressStyle::with_template("{msg} [{bar:40}] {pos}/{len} ({eta})") {
            progress.set_style(style.progress_chars("=> "));
        }
        progress.set_message(format!("embedding {}", catalog.name()));

        let mut rows = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(batch_size.max(1)) {
            let vectors = encode_checked(provider, chunk)?;
            progress.inc(chunk.len() as u64);
            rows.extend(vectors);
        }
        progress.finish_and_clear();

        let zero_rows = rows
            .iter()
            .filter(|row| row.iter().all(|x| *x == 0.0))
            .count();
        if zero_rows > 0 {
            log::warn!(
                "{zero_rows} entries of catalog '{}' embedded to a zero vector and can never match",
                catalog.name()
            );
        }

        Self::from_rows(rows, dimensions).map_err(|e| match e {
            MatrixError::DimensionMismatch { expected, got } => {
                EmbeddingError::DimensionMismatch { expected, got }
            }
            MatrixError::RowMismatch { expected, got } => {
                EmbeddingError::CountMismatch { expected, got }
            }
        })
    }

    fn evict(cache: &dyn EmbeddingCache, catalog: &Catalog, fingerprint: &Fingerprint) {
        if let Err(e) = cache.evict(fingerprint) {
            log::warn!(
                "Failed to evict cached embeddings for catalog '{}': {e}",
                catalog.name()
            );
        }
    }
}
