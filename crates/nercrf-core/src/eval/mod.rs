//! # Span Evaluation
//!
//! Entity-level precision, recall and F1 over IOBES label sequences. A span
//! counts as correct only when its boundaries and entity type both match.

use std::collections::HashSet;
use std::ops::AddAssign;

use serde::Serialize;

use crate::labels::{Prefix, Tag};

/// An entity span with inclusive token bounds.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Span {
    pub start: usize,
    pub end: usize,
    pub entity: String,
}

/// Extract entity spans from an IOBES label sequence.
///
/// `B-` marks a start and `E-` closes the span using its own entity type;
/// `S-` is a one-token span. `I-`, `O` and unparsed labels never emit a span.
pub fn spans<S: AsRef<str>>(labels: &[S]) -> Vec<Span> {
    let mut spans = Vec::new();
    let mut start = 0;

    for (idx, label) in labels.iter().enumerate() {
        let Some(tag) = Tag::parse(label.as_ref()) else {
            continue;
        };
        let Some(entity) = tag.entity else {
            continue;
        };
        match tag.prefix {
            Prefix::Begin => start = idx,
            Prefix::End => spans.push(Span {
                start,
                end: idx,
                entity: entity.to_string(),
            }),
            Prefix::Single => spans.push(Span {
                start: idx,
                end: idx,
                entity: entity.to_string(),
            }),
            Prefix::Inside | Prefix::Outside => {}
        }
    }
    spans
}

/// Running span counts over a corpus.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SpanCounts {
    /// Predicted spans that also appear in the gold labels
    pub correct: usize,
    /// Spans in the predictions
    pub predicted: usize,
    /// Spans in the gold labels
    pub gold: usize,
}

impl SpanCounts {
    /// Counts for one sentence.
    pub fn from_sequences<P, G>(predicted: &[P], gold: &[G]) -> Self
    where
        P: AsRef<str>,
        G: AsRef<str>,
    {
        let predicted: HashSet<Span> = spans(predicted).into_iter().collect();
        let gold: HashSet<Span> = spans(gold).into_iter().collect();
        Self {
            correct: predicted.intersection(&gold).count(),
            predicted: predicted.len(),
            gold: gold.len(),
        }
    }

    /// Precision, recall and F1 in percent.
    pub fn metrics(&self) -> SpanMetrics {
        let precision = percent(self.correct, self.predicted);
        let recall = percent(self.correct, self.gold);
        let f1 = if precision + recall > 0.0 {
            2.0 * precision * recall / (precision + recall)
        } else {
            0.0
        };
        SpanMetrics {
            precision,
            recall,
            f1,
        }
    }
}

impl AddAssign for SpanCounts {
    fn add_assign(&mut self, other: Self) {
        self.correct += other.correct;
        self.predicted += other.predicted;
        self.gold += other.gold;
    }
}

/// Entity-level scores, each in `[0, 100]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SpanMetrics {
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
}

fn percent(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 * 100.0 / whole as f64
    }
}
