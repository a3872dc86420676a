//! # Viterbi Decoding
//!
//! Finds the highest-scoring label path of each sequence. The DP runs on the
//! host over rows copied out of the emission and transition tensors; ties go
//! to the lowest label index so repeated decodes always agree.

use serde::Serialize;
use tracing::debug;

use crate::config::PaddingStrategy;
use crate::crf::emissions::EmissionBatch;
use crate::crf::transitions::TransitionMatrix;
use crate::error::{CrfError, Result};
use crate::labels::LabelSpace;

/// Best path of one sequence and its unnormalized score.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DecodedPath {
    /// One label index per real token.
    pub labels: Vec<usize>,
    /// Score of the path, START and STOP transitions included.
    pub score: f32,
}

/// Viterbi decoder over effective transition scores.
#[derive(Debug, Clone, Copy, Default)]
pub struct ViterbiDecoder {
    padding: PaddingStrategy,
}

impl ViterbiDecoder {
    /// Create a decoder that treats padding the same way as the forward
    /// algorithm configured with `padding`.
    pub fn new(padding: PaddingStrategy) -> Self {
        Self { padding }
    }

    /// Decode every sequence of a batch.
    pub fn decode_batch(
        &self,
        labels: &LabelSpace,
        transitions: &TransitionMatrix,
        batch: &EmissionBatch,
    ) -> Result<Vec<DecodedPath>> {
        batch.check_labels(labels)?;
        transitions.check_labels(labels)?;
        // Same policy as the forward pass: a NaN loses every `>` comparison
        // and would otherwise be skipped silently
        batch.check_finite()?;
        transitions.check_finite()?;
        debug!(
            batch_size = batch.batch_size(),
            max_len = batch.max_len(),
            "viterbi decoding"
        );

        let rows = transitions.to_rows()?;
        let scores = batch.scores().to_vec3::<f32>()?;

        scores
            .iter()
            .zip(batch.lengths())
            .enumerate()
            .map(|(sequence, (emissions, &length))| {
                self.decode_padded(labels, &rows, emissions, length)
                    .map_err(|err| at_sequence(err, sequence))
            })
            .collect()
    }

    /// Decode a single unpadded sequence of `[position][label]` rows against
    /// effective transition rows (see [`TransitionMatrix::to_rows`]).
    pub fn decode(
        &self,
        labels: &LabelSpace,
        transitions: &[Vec<f32>],
        emissions: &[Vec<f32>],
    ) -> Result<DecodedPath> {
        if emissions.is_empty() {
            return Err(CrfError::InvalidLength {
                sequence: 0,
                length: 0,
                max_len: 0,
            });
        }
        if let Some(row) = emissions.iter().find(|row| row.len() != labels.len()) {
            return Err(CrfError::LabelCountMismatch {
                what: "emission row",
                expected: labels.len(),
                got: row.len(),
            });
        }
        if let Some(&value) = emissions.iter().flatten().find(|v| !v.is_finite()) {
            return Err(CrfError::NonFinite {
                stage: "emissions",
                sequence: 0,
                value,
            });
        }
        check_transition_rows(labels, transitions)?;
        self.decode_padded(labels, transitions, emissions, emissions.len())
    }

    /// DP over `emissions`, of which only the first `length` rows are real.
    fn decode_padded(
        &self,
        labels: &LabelSpace,
        transitions: &[Vec<f32>],
        emissions: &[Vec<f32>],
        length: usize,
    ) -> Result<DecodedPath> {
        let num_labels = labels.len();
        let (start, stop) = (labels.start(), labels.stop());
        let steps = match self.padding {
            PaddingStrategy::FreezeAtLength => length,
            PaddingStrategy::IdentityTransitions => emissions.len(),
        };

        // delta[l]: best score of a prefix ending in label l
        let mut delta: Vec<f32> = (0..num_labels)
            .map(|l| transitions[start][l] + emissions[0][l])
            .collect();
        check_delta(&delta)?;

        let mut backptr: Vec<Vec<usize>> = Vec::with_capacity(steps);
        backptr.push((0..num_labels).collect());

        for t in 1..steps {
            if t >= length {
                // Identity step: every label points at itself, scores unchanged
                backptr.push((0..num_labels).collect());
                continue;
            }

            let mut next = vec![f32::NEG_INFINITY; num_labels];
            let mut pointers = vec![0usize; num_labels];
            for curr in 0..num_labels {
                let mut best_score = f32::NEG_INFINITY;
                let mut best_prev = 0;
                for (prev, &score) in delta.iter().enumerate() {
                    let score = score + transitions[prev][curr];
                    if score > best_score {
                        best_score = score;
                        best_prev = prev;
                    }
                }
                next[curr] = best_score + emissions[t][curr];
                pointers[curr] = best_prev;
            }
            check_delta(&next)?;
            delta = next;
            backptr.push(pointers);
        }

        let mut best_final = 0;
        let mut best_score = f32::NEG_INFINITY;
        for (label, &score) in delta.iter().enumerate() {
            let score = score + transitions[label][stop];
            if score > best_score {
                best_score = score;
                best_final = label;
            }
        }
        if !best_score.is_finite() {
            // Every path crosses a barrier
            return Err(CrfError::NonFinite {
                stage: "viterbi",
                sequence: 0,
                value: best_score,
            });
        }

        let mut path = Vec::with_capacity(steps);
        let mut curr = best_final;
        path.push(curr);
        for pointers in backptr[1..].iter().rev() {
            curr = pointers[curr];
            path.push(curr);
        }
        path.reverse();
        path.truncate(length);

        Ok(DecodedPath {
            labels: path,
            score: best_score,
        })
    }
}

/// Shape and value check for host transition rows. `-inf` marks a barrier;
/// NaN and `+inf` are rejected.
fn check_transition_rows(labels: &LabelSpace, transitions: &[Vec<f32>]) -> Result<()> {
    let dim = labels.transition_dim();
    if transitions.len() != dim {
        return Err(CrfError::LabelCountMismatch {
            what: "transition rows",
            expected: dim,
            got: transitions.len(),
        });
    }
    for (from, row) in transitions.iter().enumerate() {
        if row.len() != dim {
            return Err(CrfError::LabelCountMismatch {
                what: "transition columns",
                expected: dim,
                got: row.len(),
            });
        }
        if let Some((to, &value)) = row
            .iter()
            .enumerate()
            .find(|(_, v)| v.is_nan() || **v == f32::INFINITY)
        {
            return Err(CrfError::NonFiniteTransition { from, to, value });
        }
    }
    Ok(())
}

fn check_delta(delta: &[f32]) -> Result<()> {
    match delta.iter().find(|v| v.is_nan() || **v == f32::INFINITY) {
        Some(&value) => Err(CrfError::NonFinite {
            stage: "viterbi",
            sequence: 0,
            value,
        }),
        None => Ok(()),
    }
}

/// Attach the batch index to a per-sequence error.
fn at_sequence(err: CrfError, sequence: usize) -> CrfError {
    match err {
        CrfError::NonFinite { stage, value, .. } => CrfError::NonFinite {
            stage,
            sequence,
            value,
        },
        other => other,
    }
}
