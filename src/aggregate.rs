//! Reassembling per-fragment hits into per-document matches.

use std::collections::HashMap;

use serde::Serialize;

use crate::catalog::Catalog;
use crate::matcher::Hit;

/// One catalog entry found in a document.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Match {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// Best similarity seen for this entry across the document's fragments
    pub score: f32,
}

/// Split the flat hit list back into documents and deduplicate ids.
///
/// `counts[i]` is the number of fragments document `i` produced. The output
/// has exactly `counts.len()` entries, in document order. Within a document
/// entries keep their first-seen order and the highest score.
pub fn aggregate(counts: &[usize], hits: Vec<Vec<Hit>>, catalog: &Catalog) -> Vec<Vec<Match>> {
    debug_assert_eq!(counts.iter().sum::<usize>(), hits.len());

    let mut hits = hits.into_iter();
    counts
        .iter()
        .map(|&count| {
            let mut matches: Vec<Match> = Vec::new();
            let mut seen: HashMap<usize, usize> = HashMap::new();

            for hit in hits.by_ref().take(count).flatten() {
                if let Some(&slot) = seen.get(&hit.index) {
                    let existing = &mut matches[slot];
                    existing.score = existing.score.max(hit.score);
                    continue;
                }

                let Some(entry) = catalog.get(hit.index) else {
                    log::error!(
                        "hit index {} is outside catalog '{}' ({} rows)",
                        hit.index,
                        catalog.name(),
                        catalog.len()
                    );
                    continue;
                };

                seen.insert(hit.index, matches.len());
                matches.push(Match {
                    id: entry.id.clone(),
                    label: entry.label.clone(),
                    score: hit.score,
                });
            }

            matches
        })
        .collect()
}
