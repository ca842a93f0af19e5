//! Content-addressed store for catalog embedding matrices.

use std::collections::HashMap;
use std::sync::RwLock;

use crate::catalog::Fingerprint;
use crate::semantic::matrix::EmbeddingMatrix;

/// Errors that can occur while reading or writing cached matrices.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid file format: {0}")]
    InvalidFormat(String),

    #[error("Version mismatch: file version {0}, supported version {1}")]
    VersionMismatch(u8, u8),

    #[error("Fingerprint mismatch: file belongs to a different catalog")]
    FingerprintMismatch,

    #[error("Checksum mismatch: file may be corrupted")]
    ChecksumMismatch,

    #[error("Lock poisoned: {0}")]
    Poisoned(String),
}

/// Matrices keyed by catalog fingerprint.
pub trait EmbeddingCache: Send + Sync {
    fn get(&self, fingerprint: &Fingerprint) -> Result<Option<EmbeddingMatrix>, CacheError>;

    fn put(&self, fingerprint: &Fingerprint, matrix: &EmbeddingMatrix) -> Result<(), CacheError>;

    /// Drop an entry. Missing entries are not an error.
    fn evict(&self, fingerprint: &Fingerprint) -> Result<(), CacheError>;
}

/// Process-local cache. Used by tests and `--no-cache`.
#[derive(Default)]
pub struct MemoryCache {
    entries: RwLock<HashMap<Fingerprint, EmbeddingMatrix>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }
}

impl EmbeddingCache for MemoryCache {
    fn get(&self, fingerprint: &Fingerprint) -> Result<Option<EmbeddingMatrix>, CacheError> {
        let entries = self
            .entries
            .read()
            .map_err(|e| CacheError::Poisoned(e.to_string()))?;
        Ok(entries.get(fingerprint).cloned())
    }

    fn put(&self, fingerprint: &Fingerprint, matrix: &EmbeddingMatrix) -> Result<(), CacheError> {
        self.entries
            .write()
            .map_err(|e| CacheError::Poisoned(e.to_string()))?
            .insert(*fingerprint, matrix.clone());
        Ok(())
    }

    fn evict(&self, fingerprint: &Fingerprint) -> Result<(), CacheError> {
        self.entries
            .write()
            .map_err(|e| CacheError::Poisoned(e.to_string()))?
            .remove(fingerprint);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_cache_roundtrip_and_evict() {
        let cache = MemoryCache::new();
        let fp = Fingerprint([7u8; 32]);
        let matrix = EmbeddingMatrix::from_rows(vec![vec![1.0, 0.0]], 2).unwrap();

        assert!(cache.get(&fp).unwrap().is_none());

        cache.put(&fp, &matrix).unwrap();
        assert_eq!(cache.get(&fp).unwrap(), Some(matrix));

        cache.evict(&fp).unwrap();
        assert!(cache.get(&fp).unwrap().is_none());
        // evicting twice is fine
        cache.evict(&fp).unwrap();
    }
}
