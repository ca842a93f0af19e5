//! Reference catalogs (skills, occupations, ...) loaded from CSV.
//!
//! A catalog is read once at startup and never mutated afterwards. Row order
//! matters: the embedding matrix is index-aligned with it.

use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Instant;

use serde::Serialize;
use sha2::{Digest, Sha256};

/// Columns tried, in order, for the text that gets embedded.
const TEXT_COLUMNS: [&str; 4] = ["description", "text", "label", "preferredLabel"];

/// Columns tried, in order, for the human-readable label.
const LABEL_COLUMNS: [&str; 2] = ["label", "preferredLabel"];

#[derive(Debug, thiserror::Error)]
pub enum CatalogLoadError {
    #[error("failed to read catalog '{catalog}' from {}: {source}", .path.display())]
    Io {
        catalog: String,
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("catalog '{catalog}' has no '{column}' column")]
    MissingColumn { catalog: String, column: String },

    #[error("catalog '{catalog}' row {row} has an empty id")]
    EmptyId { catalog: String, row: usize },

    #[error("catalog '{catalog}' contains duplicate id '{id}'")]
    DuplicateId { catalog: String, id: String },

    #[error("catalog '{0}' has no entries")]
    Empty(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CatalogEntry {
    pub id: String,
    /// Descriptive string fed to the embedding model.
    pub text: String,
    pub label: Option<String>,
}

/// SHA-256 over the model id and every catalog row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint(pub [u8; 32]);

impl Fingerprint {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{b:02x}")).collect()
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", &self.to_hex()[..12])
    }
}

#[derive(Debug, Clone)]
pub struct Catalog {
    name: String,
    entries: Vec<CatalogEntry>,
}

impl Catalog {
    /// Build a catalog from entries, rejecting empty and duplicate ids.
    pub fn from_entries(
        name: &str,
        entries: Vec<CatalogEntry>,
    ) -> Result<Self, CatalogLoadError> {
        if entries.is_empty() {
            return Err(CatalogLoadError::Empty(name.to_string()));
        }

        let mut seen = HashSet::with_capacity(entries.len());
        for (row, entry) in entries.iter().enumerate() {
            if entry.id.is_empty() {
                return Err(CatalogLoadError::EmptyId {
                    catalog: name.to_string(),
                    row: row + 1,
                });
            }
            if !seen.insert(entry.id.as_str()) {
                return Err(CatalogLoadError::DuplicateId {
                    catalog: name.to_string(),
                    id: entry.id.clone(),
                });
            }
        }

        Ok(Self {
            name: name.to_string(),
            entries,
        })
    }

    /// Load a headered CSV with an `id` column and a text column.
    pub fn load_csv(name: &str, path: &Path) -> Result<Self, CatalogLoadError> {
        let now = Instant::now();
        // csv::Reader::from_path maps a missing file into csv::Error; keep it an io error
        let file = std::fs::File::open(path).map_err(|source| CatalogLoadError::Io {
            catalog: name.to_string(),
            path: path.to_path_buf(),
            source,
        })?;
        let mut reader = csv::Reader::from_reader(file);
        let headers = reader.headers()?.clone();

        let find = |candidates: &[&str]| {
            candidates
                .iter()
                .find_map(|column| headers.iter().position(|h| h.trim() == *column))
        };

        let id_col = find(&["id"]).ok_or_else(|| CatalogLoadError::MissingColumn {
            catalog: name.to_string(),
            column: "id".to_string(),
        })?;
        let text_col = find(&TEXT_COLUMNS).ok_or_else(|| CatalogLoadError::MissingColumn {
            catalog: name.to_string(),
            column: TEXT_COLUMNS.join("|"),
        })?;
        let label_col = find(&LABEL_COLUMNS).filter(|col| *col != text_col);

        let mut entries = vec![];
        for record in reader.records() {
            let record = record?;
            let id = record.get(id_col).unwrap_or_default().trim().to_string();
            let text = record.get(text_col).unwrap_or_default().trim().to_string();
            let label = label_col
                .and_then(|col| record.get(col))
                .map(|l| l.trim().to_string())
                .filter(|l| !l.is_empty());

            entries.push(CatalogEntry { id, text, label });
        }

        let catalog = Self::from_entries(name, entries)?;

        log::debug!(
            "took {}ms to read catalog '{name}' ({} rows)",
            now.elapsed().as_micros() as f64 / 1000.0,
            catalog.len()
        );

        Ok(catalog)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn get(&self, index: usize) -> Option<&CatalogEntry> {
        self.entries.get(index)
    }

    /// Texts to embed, in row order.
    pub fn texts(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.text.clone()).collect()
    }

    /// Content fingerprint used to key the embedding cache.
    ///
    /// Covers the model id, the row count and every `(id, text)` pair, so
    /// any change to the catalog or the model yields a new fingerprint.
    pub fn fingerprint(&self, model_id: &str) -> Fingerprint {
        let mut hasher = Sha256::new();

        let mut field = |bytes: &[u8]| {
            hasher.update((bytes.len() as u64).to_le_bytes());
            hasher.update(bytes);
        };

        field(model_id.as_bytes());
        field(&(self.entries.len() as u64).to_le_bytes());
        for entry in &self.entries {
            field(entry.id.as_bytes());
            field(entry.text.as_bytes());
        }

        Fingerprint(hasher.finalize().into())
    }
}
