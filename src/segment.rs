//! Splitting documents into fragments that are matched independently.
//!
//! Two strategies:
//! - [`DelimiterSegmenter`]: sentence-ish pieces split on `\n \t \r . ;`
//! - [`SpanSegmenter`]: spans reported by an external phrase/entity recognizer

use std::io::Write;
use std::process::{Command, Stdio};

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Default minimum fragment length (characters) for delimiter segmentation
pub const DEFAULT_MIN_FRAGMENT_LENGTH: usize = 5;

/// Compile delimiter regex once. Runs of delimiters collapse into one split.
static DELIMITERS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[\n\t\r.;]+").expect("Failed to compile delimiter regex"));

/// A piece of one input document, the unit of comparison.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fragment {
    pub text: String,
    /// Span label from the recognizer, if any
    #[serde(default)]
    pub label: Option<String>,
}

impl Fragment {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            label: None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SegmentationError {
    #[error("failed to run recognizer '{command}': {source}")]
    Spawn {
        command: String,
        source: std::io::Error,
    },

    #[error("recognizer exited with {status}: {stderr}")]
    Failed { status: String, stderr: String },

    #[error("recognizer output is not valid json: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("recognizer returned {got} documents for {expected}")]
    CountMismatch { expected: usize, got: usize },
}

pub trait Segmenter: Send + Sync {
    /// Split every document into ordered fragments.
    ///
    /// The result has one entry per document, in input order. Empty and
    /// whitespace-only documents produce no fragments.
    fn segment_batch(&self, documents: &[&str]) -> Result<Vec<Vec<Fragment>>, SegmentationError>;

    fn name(&self) -> &str;
}

pub struct DelimiterSegmenter {
    min_length: usize,
}

impl DelimiterSegmenter {
    pub fn new(min_length: usize) -> Self {
        Self { min_length }
    }

    pub fn segment(&self, document: &str) -> Vec<Fragment> {
        DELIMITERS
            .split(document)
            .map(str::trim)
            .filter(|piece| piece.chars().count() >= self.min_length)
            .map(Fragment::new)
            .collect()
    }
}

impl Default for DelimiterSegmenter {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_FRAGMENT_LENGTH)
    }
}

impl Segmenter for DelimiterSegmenter {
    fn segment_batch(&self, documents: &[&str]) -> Result<Vec<Vec<Fragment>>, SegmentationError> {
        Ok(documents.iter().map(|doc| self.segment(doc)).collect())
    }

    fn name(&self) -> &str {
        "delimiter"
    }
}

/// A labeled span emitted by a recognizer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub text: String,
    #[serde(default)]
    pub label: Option<String>,
}

/// External phrase/entity recognizer.
pub trait SpanRecognizer: Send + Sync {
    /// One list of spans per document, in input order.
    fn recognize(&self, documents: &[&str]) -> Result<Vec<Vec<Span>>, SegmentationError>;
}

/// Uses recognizer spans as fragments. No length filter is applied.
pub struct SpanSegmenter {
    recognizer: Box<dyn SpanRecognizer>,
}

impl SpanSegmenter {
    pub fn new(recognizer: Box<dyn SpanRecognizer>) -> Self {
        Self { recognizer }
    }
}

impl Segmenter for SpanSegmenter {
    fn segment_batch(&self, documents: &[&str]) -> Result<Vec<Vec<Fragment>>, SegmentationError> {
        // Only non-empty documents go to the recognizer
        let present: Vec<usize> = documents
            .iter()
            .enumerate()
            .filter(|(_, doc)| !doc.trim().is_empty())
            .map(|(i, _)| i)
            .collect();

        let mut fragments = vec![Vec::new(); documents.len()];
        if present.is_empty() {
            return Ok(fragments);
        }

        let batch: Vec<&str> = present.iter().map(|&i| documents[i]).collect();
        let spans = self.recognizer.recognize(&batch)?;
        if spans.len() != batch.len() {
            return Err(SegmentationError::CountMismatch {
                expected: batch.len(),
                got: spans.len(),
            });
        }

        for (index, doc_spans) in present.into_iter().zip(spans) {
            fragments[index] = doc_spans
                .into_iter()
                .filter_map(|span| {
                    let text = span.text.trim();
                    (!text.is_empty()).then(|| Fragment {
                        text: text.to_string(),
                        label: span.label,
                    })
                })
                .collect();
        }

        Ok(fragments)
    }

    fn name(&self) -> &str {
        "span"
    }
}

/// Runs an external command as the recognizer.
///
/// The command receives a JSON array of documents on stdin and must print a
/// JSON array with one array of `{"text", "label"}` spans per document.
pub struct CommandRecognizer {
    program: String,
    args: Vec<String>,
}

impl CommandRecognizer {
    pub fn new(command: &[String]) -> Option<Self> {
        let (program, args) = command.split_first()?;
        Some(Self {
            program: program.clone(),
            args: args.to_vec(),
        })
    }
}

impl SpanRecognizer for CommandRecognizer {
    fn recognize(&self, documents: &[&str]) -> Result<Vec<Vec<Span>>, SegmentationError> {
        let spawn_err = |source: std::io::Error| SegmentationError::Spawn {
            command: self.program.clone(),
            source,
        };

        let payload = serde_json::to_vec(documents)?;

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(spawn_err)?;

        // Feed stdin from another thread so a chatty child can't deadlock us
        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| spawn_err(std::io::Error::other("stdin not captured")))?;
        let writer = std::thread::spawn(move || stdin.write_all(&payload));

        let output = child.wait_with_output().map_err(spawn_err)?;
        match writer.join() {
            Ok(Ok(())) => {}
            Ok(Err(err)) => log::warn!("recognizer did not read all input: {err}"),
            Err(_) => log::warn!("recognizer stdin writer panicked"),
        }

        if !output.status.success() {
            return Err(SegmentationError::Failed {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(serde_json::from_slice(&output.stdout)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::support::StaticRecognizer;

    fn texts(fragments: &[Fragment]) -> Vec<&str> {
        fragments.iter().map(|f| f.text.as_str()).collect()
    }

    #[test]
    fn test_delimiter_split_and_collapse() {
        let segmenter = DelimiterSegmenter::default();
        let fragments = segmenter.segment("I cook meals.\n\nI write software;; daily\tand more");

        assert_eq!(
            texts(&fragments),
            vec!["I cook meals", "I write software", "daily", "and more"]
        );
    }

    #[test]
    fn test_delimiter_drops_short_pieces() {
        let segmenter = DelimiterSegmenter::default();
        // the "g" of "e.g." is noise
        let fragments = segmenter.segment("Tools e.g. Excel; Word processing");

        assert_eq!(texts(&fragments), vec!["Tools e", "Excel", "Word processing"]);
    }

    #[test]
    fn test_delimiter_min_length_counts_chars() {
        let segmenter = DelimiterSegmenter::new(5);
        // 4 chars, 8 bytes
        assert!(segmenter.segment("ÄÖÜß").is_empty());
        assert_eq!(segmenter.segment("ÄÖÜßa").len(), 1);
    }

    #[test]
    fn test_delimiter_empty_documents() {
        let segmenter = DelimiterSegmenter::default();
        let batch = segmenter.segment_batch(&["", "   ", "\n\t.;"]).unwrap();

        assert_eq!(batch.len(), 3);
        assert!(batch.iter().all(|fragments| fragments.is_empty()));
    }

    #[test]
    fn test_span_segmenter_skips_empty_documents() {
        let recognizer = StaticRecognizer::new(vec![vec![
            Span {
                text: " software project ".to_string(),
                label: Some("SKILL".to_string()),
            },
            Span {
                text: "  ".to_string(),
                label: None,
            },
        ]]);
        let calls = recognizer.calls.clone();
        let segmenter = SpanSegmenter::new(Box::new(recognizer));

        let batch = segmenter.segment_batch(&["", "led the software project"]).unwrap();
        assert_eq!(batch.len(), 2);
        assert!(batch[0].is_empty());
        assert_eq!(
            batch[1],
            vec![Fragment {
                text: "software project".to_string(),
                label: Some("SKILL".to_string()),
            }]
        );
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[test]
    fn test_span_segmenter_all_empty_never_calls_recognizer() {
        let recognizer = StaticRecognizer::new(vec![]);
        let calls = recognizer.calls.clone();
        let segmenter = SpanSegmenter::new(Box::new(recognizer));

        let batch = segmenter.segment_batch(&["", " "]).unwrap();
        assert_eq!(batch, vec![Vec::<Fragment>::new(), Vec::new()]);
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 0);
    }

    #[test]
    fn test_span_segmenter_count_mismatch() {
        let segmenter = SpanSegmenter::new(Box::new(StaticRecognizer::new(vec![])));
        let result = segmenter.segment_batch(&["some text"]);
        assert!(matches!(
            result,
            Err(SegmentationError::CountMismatch { expected: 1, got: 0 })
        ));
    }

    #[test]
    fn test_command_recognizer_requires_program() {
        assert!(CommandRecognizer::new(&[]).is_none());
    }

    #[cfg(unix)]
    #[test]
    fn test_command_recognizer_reads_stdout() {
        let command = vec![
            "sh".to_string(),
            "-c".to_string(),
            r#"cat > /dev/null; echo '[[{"text":"python","label":"SKILL"}],[]]'"#.to_string(),
        ];
        let recognizer = CommandRecognizer::new(&command).unwrap();

        let spans = recognizer.recognize(&["I write python", "nothing"]).unwrap();
        assert_eq!(spans.len(), 2);
        assert_eq!(spans[0][0].text, "python");
        assert_eq!(spans[0][0].label.as_deref(), Some("SKILL"));
        assert!(spans[1].is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn test_command_recognizer_failure() {
        let command = vec![
            "sh".to_string(),
            "-c".to_string(),
            "cat > /dev/null; echo boom >&2; exit 3".to_string(),
        ];
        let recognizer = CommandRecognizer::new(&command).unwrap();

        let result = recognizer.recognize(&["text"]);
        assert!(matches!(result, Err(SegmentationError::Failed { ref stderr, .. }) if stderr == "boom"));
    }

    #[test]
    fn test_command_recognizer_missing_program() {
        let recognizer = CommandRecognizer::new(&["/nonexistent/recognizer".to_string()]).unwrap();
        let result = recognizer.recognize(&["text"]);
        assert!(matches!(result, Err(SegmentationError::Spawn { .. })));
    }
}
