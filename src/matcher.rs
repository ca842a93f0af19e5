//! Fragment-to-catalog similarity scoring.
//!
//! Scoring is a dense `fragments × catalog` pass of dot products over
//! unit-norm vectors (so dot product equals cosine similarity). There is no
//! approximate index: brute force is fine for catalogs in the low thousands
//! and is the scaling limit of this engine.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::semantic::{EmbeddingMatrix, MatrixError};

/// How many catalog entries a single fragment may match.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionPolicy {
    /// The single most similar entry, if it clears the threshold.
    /// Ties go to the lowest catalog index.
    #[default]
    BestMatch,
    /// Every entry that clears the threshold.
    AllMatches,
}

/// A catalog row selected for one fragment.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Hit {
    /// Row index in the catalog
    pub index: usize,
    pub score: f32,
}

#[derive(Debug, Clone, Copy)]
pub struct SimilarityMatcher {
    policy: SelectionPolicy,
}

impl SimilarityMatcher {
    pub fn new(policy: SelectionPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> SelectionPolicy {
        self.policy
    }

    /// Select catalog rows for every fragment vector.
    ///
    /// A row is eligible only when its score is strictly greater than
    /// `threshold`. Returns one hit list per fragment, in input order; hits
    /// inside a list are in catalog order.
    pub fn select(
        &self,
        fragments: &[Vec<f32>],
        matrix: &EmbeddingMatrix,
        threshold: f32,
    ) -> Result<Vec<Vec<Hit>>, MatrixError> {
        if let Some(bad) = fragments.iter().find(|f| f.len() != matrix.dimensions()) {
            return Err(MatrixError::DimensionMismatch {
                expected: matrix.dimensions(),
                got: bad.len(),
            });
        }

        Ok(fragments
            .par_iter()
            .map(|fragment| self.select_one(fragment, matrix, threshold))
            .collect())
    }

    fn select_one(&self, fragment: &[f32], matrix: &EmbeddingMatrix, threshold: f32) -> Vec<Hit> {
        match self.policy {
            SelectionPolicy::BestMatch => best_match(fragment, matrix)
                .filter(|hit| hit.score > threshold)
                .into_iter()
                .collect(),
            SelectionPolicy::AllMatches => scores(fragment, matrix)
                .enumerate()
                .filter(|(_, score)| *score > threshold)
                .map(|(index, score)| Hit { index, score })
                .collect(),
        }
    }
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Similarity of `fragment` against every catalog row, in row order.
fn scores<'a>(fragment: &'a [f32], matrix: &'a EmbeddingMatrix) -> impl Iterator<Item = f32> + 'a {
    matrix.iter_rows().map(move |row| dot(fragment, row))
}

/// Argmax over one similarity row. The first maximum wins.
fn best_match(fragment: &[f32], matrix: &EmbeddingMatrix) -> Option<Hit> {
    scores(fragment, matrix)
        .enumerate()
        .fold(None, |best: Option<Hit>, (index, score)| match best {
            Some(b) if b.score >= score => Some(b),
            _ => Some(Hit { index, score }),
        })
}
