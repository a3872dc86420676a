//! # Path Scoring
//!
//! The unnormalized score of one labeling: START transition, every emission
//! and inner transition along the path, then the STOP transition.

use candle_core::Tensor;

use crate::crf::emissions::EmissionBatch;
use crate::crf::ensure_finite;
use crate::crf::transitions::TransitionMatrix;
use crate::error::{CrfError, Result};
use crate::labels::LabelSpace;

/// Score of each gold path in the batch, shape `(batch,)`.
///
/// Differentiable w.r.t. both the emissions and the transition parameter.
/// A gold path that crosses a barrier is rejected up front instead of
/// producing an infinite loss.
pub fn gold_score(
    labels: &LabelSpace,
    transitions: &TransitionMatrix,
    batch: &EmissionBatch,
    gold: &[Vec<usize>],
) -> Result<Tensor> {
    batch.check_labels(labels)?;
    transitions.check_labels(labels)?;
    batch.check_gold(labels, gold)?;
    check_gold_transitions(labels, transitions, gold)?;

    let (max_len, num_labels) = (batch.max_len(), labels.len());
    let dim = labels.transition_dim();
    let device = batch.scores().device();

    let emissions = batch.scores().flatten_all()?;
    let trans = transitions.scores()?.flatten_all()?;

    let mut scores = Vec::with_capacity(gold.len());
    for (b, path) in gold.iter().enumerate() {
        let emit_idx: Vec<u32> = path
            .iter()
            .enumerate()
            .map(|(t, &label)| ((b * max_len + t) * num_labels + label) as u32)
            .collect();
        let trans_idx: Vec<u32> = transition_pairs(labels, path)
            .map(|(from, to, _)| (from * dim + to) as u32)
            .collect();

        let emit_idx = Tensor::from_vec(emit_idx, path.len(), device)?;
        let trans_idx = Tensor::from_vec(trans_idx, path.len() + 1, device)?;

        let emit = emissions.index_select(&emit_idx, 0)?.sum_all()?;
        let step = trans.index_select(&trans_idx, 0)?.sum_all()?;
        scores.push(emit.add(&step)?);
    }

    let scores = Tensor::stack(&scores, 0)?;
    ensure_finite(&scores, "gold score")?;
    Ok(scores)
}

/// Host-side score of one path over `[position][label]` emission rows and
/// effective transition rows.
pub fn path_score(
    labels: &LabelSpace,
    transitions: &[Vec<f32>],
    emissions: &[Vec<f32>],
    path: &[usize],
) -> f32 {
    let emit: f32 = path
        .iter()
        .zip(emissions)
        .map(|(&label, row)| row[label])
        .sum();
    let step: f32 = transition_pairs(labels, path)
        .map(|(from, to, _)| transitions[from][to])
        .sum();
    emit + step
}

/// `(from, to, position)` for every transition a path takes, START and STOP
/// included. `position` is the index of the target token, or the path length
/// for the final STOP transition.
pub(crate) fn transition_pairs<'a>(
    labels: &LabelSpace,
    path: &'a [usize],
) -> impl Iterator<Item = (usize, usize, usize)> + 'a {
    let (start, stop) = (labels.start(), labels.stop());
    let sources = std::iter::once(start).chain(path.iter().copied());
    let targets = path.iter().copied().chain(std::iter::once(stop));
    sources
        .zip(targets)
        .enumerate()
        .map(|(position, (from, to))| (from, to, position))
}

fn check_gold_transitions(
    labels: &LabelSpace,
    transitions: &TransitionMatrix,
    gold: &[Vec<usize>],
) -> Result<()> {
    for (sequence, path) in gold.iter().enumerate() {
        if let Some((from, to, position)) =
            transition_pairs(labels, path).find(|&(from, to, _)| !transitions.is_allowed(from, to))
        {
            return Err(CrfError::ForbiddenTransition {
                sequence,
                position,
                from: labels.name(from).unwrap_or_default().to_string(),
                to: labels.name(to).unwrap_or_default().to_string(),
            });
        }
    }
    Ok(())
}
