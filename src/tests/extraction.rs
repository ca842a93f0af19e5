//! End-to-end extraction behavior with a deterministic provider.

use std::sync::Arc;

use crate::aggregate::Match;
use crate::catalog::Catalog;
use crate::extractor::{ExtractError, Extractor};
use crate::matcher::SelectionPolicy;
use crate::segment::{DelimiterSegmenter, Span, SpanSegmenter};
use crate::semantic::{EmbeddingCache, EmbeddingMatrix, EmbeddingProvider, MemoryCache};
use crate::tests::support::{catalog, BagOfWords, Failing, StaticRecognizer};

const VOCABULARY: [&str; 7] = ["manage", "software", "project", "cook", "meal", "led", "team"];

fn setup(
    policy: SelectionPolicy,
    rows: &[(&str, &str)],
    threshold: f32,
) -> (Extractor, Arc<BagOfWords>) {
    let provider = Arc::new(BagOfWords::new(&VOCABULARY));
    let mut extractor = Extractor::new(
        provider.clone(),
        Box::new(DelimiterSegmenter::default()),
        policy,
    );
    extractor
        .add_catalog(catalog(rows), threshold, &MemoryCache::new(), 32)
        .unwrap();
    (extractor, provider)
}

fn ids(matches: &[Vec<Match>]) -> Vec<Vec<&str>> {
    matches
        .iter()
        .map(|doc| doc.iter().map(|m| m.id.as_str()).collect())
        .collect()
}

#[test]
fn test_software_project_document() {
    let (extractor, _) = setup(
        SelectionPolicy::BestMatch,
        &[("S1", "manage a software project"), ("S2", "cook a meal")],
        0.5,
    );

    let result = extractor
        .extract("skills", &["I led the software project team."])
        .unwrap();

    assert_eq!(ids(&result), vec![vec!["S1"]]);
    // 2 shared words out of 4 and 3: 2 / (2 * sqrt(3))
    let expected = 2.0 / (2.0 * 3f32.sqrt());
    assert!((result[0][0].score - expected).abs() < 1e-5);
}

#[test]
fn test_one_result_per_document_in_order() {
    let (extractor, _) = setup(
        SelectionPolicy::BestMatch,
        &[("S1", "software project"), ("S2", "cook meal")],
        0.5,
    );

    let documents = [
        "cook meal daily",
        "",
        "software project lead",
        "nothing relevant here",
    ];
    let result = extractor.extract("skills", &documents).unwrap();

    assert_eq!(result.len(), documents.len());
    assert_eq!(
        ids(&result),
        vec![vec!["S2"], vec![], vec!["S1"], Vec::<&str>::new()]
    );
}

#[test]
fn test_empty_batch_skips_provider() {
    let (extractor, provider) = setup(
        SelectionPolicy::BestMatch,
        &[("S1", "software project")],
        0.5,
    );
    let calls = provider.calls();

    let none: [&str; 0] = [];
    assert!(extractor.extract("skills", &none).unwrap().is_empty());

    let blank = extractor.extract("skills", &["", "   ", "\n"]).unwrap();
    assert_eq!(blank, vec![Vec::<Match>::new(); 3]);

    assert_eq!(provider.calls(), calls);
}

#[test]
fn test_whole_batch_embedded_in_one_call() {
    let (extractor, provider) = setup(
        SelectionPolicy::BestMatch,
        &[("S1", "software project"), ("S2", "cook meal")],
        0.5,
    );
    let calls = provider.calls();

    extractor
        .extract(
            "skills",
            &["cook meal. software project", "team lead; project manage"],
        )
        .unwrap();

    assert_eq!(provider.calls(), calls + 1);
}

#[test]
fn test_repeated_entry_reported_once() {
    let (extractor, _) = setup(
        SelectionPolicy::BestMatch,
        &[("S1", "software project"), ("S2", "cook meal")],
        0.5,
    );

    let result = extractor
        .extract(
            "skills",
            &["software project. cook meal. software project team"],
        )
        .unwrap();

    assert_eq!(ids(&result), vec![vec!["S1", "S2"]]);
    // the best of the two S1 fragments is kept
    assert!((result[0][0].score - 1.0).abs() < 1e-5);
}

#[test]
fn test_extraction_is_deterministic() {
    let (extractor, _) = setup(
        SelectionPolicy::AllMatches,
        &[
            ("S1", "software project"),
            ("S2", "cook meal"),
            ("S3", "manage team"),
        ],
        0.3,
    );

    let documents = [
        "I led the software project team. I manage meal prep",
        "cook for the team",
    ];
    let first = extractor.extract("skills", &documents).unwrap();
    let second = extractor.extract("skills", &documents).unwrap();
    assert_eq!(first, second);
}

#[test]
fn test_policies_on_tied_entries() {
    let rows = [
        ("S1", "software project"),
        ("S2", "cook meal"),
        ("S3", "cook software"),
    ];
    let document = ["cook software project"];

    let (best, _) = setup(SelectionPolicy::BestMatch, &rows, 0.5);
    let result = best.extract("skills", &document).unwrap();
    // S1 and S3 score the same, the earlier row wins
    assert_eq!(ids(&result), vec![vec!["S1"]]);

    let (all, _) = setup(SelectionPolicy::AllMatches, &rows, 0.5);
    let result = all.extract("skills", &document).unwrap();
    assert_eq!(ids(&result), vec![vec!["S1", "S3"]]);
}

#[test]
fn test_labels_are_reported() {
    let provider = Arc::new(BagOfWords::new(&VOCABULARY));
    let mut extractor = Extractor::new(
        provider,
        Box::new(DelimiterSegmenter::default()),
        SelectionPolicy::BestMatch,
    );
    let occupations = Catalog::from_entries(
        "occupations",
        vec![crate::catalog::CatalogEntry {
            id: "O1".to_string(),
            text: "cook meal".to_string(),
            label: Some("Cook".to_string()),
        }],
    )
    .unwrap();
    extractor
        .add_catalog(occupations, 0.5, &MemoryCache::new(), 8)
        .unwrap();

    let result = extractor.extract("occupations", &["cook meal"]).unwrap();
    assert_eq!(result[0][0].label.as_deref(), Some("Cook"));
}

#[test]
fn test_span_segmentation_feeds_matcher() {
    let recognizer = StaticRecognizer::new(vec![vec![
        Span {
            text: "software project".to_string(),
            label: Some("SKILL".to_string()),
        },
        Span {
            text: "meal".to_string(),
            label: Some("SKILL".to_string()),
        },
    ]]);
    let calls = recognizer.calls.clone();

    let provider = Arc::new(BagOfWords::new(&VOCABULARY));
    let mut extractor = Extractor::new(
        provider,
        Box::new(SpanSegmenter::new(Box::new(recognizer))),
        SelectionPolicy::BestMatch,
    );
    extractor
        .add_catalog(
            catalog(&[("S1", "software project"), ("S2", "cook meal")]),
            0.5,
            &MemoryCache::new(),
            8,
        )
        .unwrap();

    // short spans are kept as-is; "meal" scores 1/sqrt(2) against S2
    let result = extractor
        .extract("skills", &["", "worked on a software project, made a meal"])
        .unwrap();
    assert_eq!(ids(&result), vec![vec![], vec!["S1", "S2"]]);
    assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
}

#[test]
fn test_segmentation_failure_surfaces() {
    // the recognizer answers for zero documents
    let provider = Arc::new(BagOfWords::new(&VOCABULARY));
    let mut extractor = Extractor::new(
        provider,
        Box::new(SpanSegmenter::new(Box::new(StaticRecognizer::new(vec![])))),
        SelectionPolicy::BestMatch,
    );
    extractor
        .add_catalog(catalog(&[("S1", "software")]), 0.5, &MemoryCache::new(), 8)
        .unwrap();

    let result = extractor.extract("skills", &["software"]);
    assert!(matches!(result, Err(ExtractError::Segmentation(_))));
}

#[test]
fn test_provider_failure_at_request_time() {
    let skills = catalog(&[("S1", "software")]);
    let cache = MemoryCache::new();
    // warm cache so bootstrap never calls the failing provider
    let warm = EmbeddingMatrix::from_rows(vec![vec![1.0, 0.0]], 2).unwrap();
    cache
        .put(&skills.fingerprint(Failing.model_id()), &warm)
        .unwrap();

    let mut extractor = Extractor::new(
        Arc::new(Failing),
        Box::new(DelimiterSegmenter::default()),
        SelectionPolicy::BestMatch,
    );
    extractor.add_catalog(skills, 0.5, &cache, 8).unwrap();

    let result = extractor.extract("skills", &["software work"]);
    assert!(matches!(result, Err(ExtractError::Embedding(_))));

    // nothing to embed, nothing to fail
    assert!(extractor.extract("skills", &[""]).is_ok());
}
