//! # Forward Algorithm
//!
//! Computes `logZ`, the log-sum-exp of the scores of every label path, for
//! each sequence of a batch. All sequences advance together as `(batch,
//! labels)` tensor operations; the padding strategy decides how a sequence
//! that has already ended is carried to the last time step.

use candle_core::{Device, IndexOp, Tensor};
use tracing::debug;

use crate::config::PaddingStrategy;
use crate::crf::emissions::EmissionBatch;
use crate::crf::logsumexp::log_sum_exp;
use crate::crf::transitions::TransitionMatrix;
use crate::crf::ensure_finite;
use crate::error::Result;
use crate::labels::LabelSpace;

/// Per-sequence log partition function, shape `(batch,)`.
///
/// The result stays attached to the autograd graph of both the emission
/// tensor and the transition parameter.
pub fn log_partition(
    labels: &LabelSpace,
    transitions: &TransitionMatrix,
    batch: &EmissionBatch,
    padding: PaddingStrategy,
) -> Result<Tensor> {
    batch.check_labels(labels)?;
    transitions.check_labels(labels)?;
    // The clamped reductions in log_sum_exp would turn NaN into a finite value
    batch.check_finite()?;
    transitions.check_finite()?;

    let num_labels = labels.len();
    let (batch_size, max_len) = (batch.batch_size(), batch.max_len());
    debug!(batch_size, max_len, num_labels, ?padding, "forward algorithm");

    let trans = transitions.scores()?;
    let inner = trans.narrow(0, 0, num_labels)?.narrow(1, 0, num_labels)?;
    let from_start = trans.i((labels.start(), ..num_labels))?.unsqueeze(0)?;
    let to_stop = trans.i((..num_labels, labels.stop()))?.unsqueeze(0)?;

    let emissions = batch.masked_scores()?;
    let mask = batch.padding_mask()?;
    let identity = identity_transitions(num_labels, emissions.device())?;

    // alpha[b, l]: log-sum of all prefixes of sequence b ending in label l
    let mut alpha = from_start.broadcast_add(&emissions.i((.., 0))?)?;

    for t in 1..max_len {
        let active = batch.active_at(&mask, t)?;
        let emit = emissions.i((.., t))?;

        alpha = match padding {
            PaddingStrategy::FreezeAtLength => {
                let next = log_sum_exp(&alpha.unsqueeze(2)?.broadcast_add(&inner)?, 1)?
                    .add(&emit)?;
                let keep = active
                    .unsqueeze(1)?
                    .broadcast_as((batch_size, num_labels))?;
                keep.where_cond(&next, &alpha)?
            }
            PaddingStrategy::IdentityTransitions => {
                let step = step_transitions(&active, &inner, &identity)?;
                log_sum_exp(&alpha.unsqueeze(2)?.broadcast_add(&step)?, 1)?.add(&emit)?
            }
        };
    }

    let log_z = log_sum_exp(&alpha.broadcast_add(&to_stop)?, 1)?;
    ensure_finite(&log_z, "log partition")?;
    Ok(log_z)
}

/// `(labels, labels)` matrix with 0 on the diagonal and `-inf` elsewhere.
fn identity_transitions(num_labels: usize, device: &Device) -> Result<Tensor> {
    let mut values = vec![f32::NEG_INFINITY; num_labels * num_labels];
    for l in 0..num_labels {
        values[l * num_labels + l] = 0.0;
    }
    Ok(Tensor::from_vec(values, (num_labels, num_labels), device)?)
}

/// `(batch, labels, labels)` transitions for one step: the learned matrix for
/// active sequences, the identity for sequences already past their length.
fn step_transitions(active: &Tensor, inner: &Tensor, identity: &Tensor) -> Result<Tensor> {
    let batch_size = active.dim(0)?;
    let (rows, cols) = inner.dims2()?;
    let shape = (batch_size, rows, cols);

    let active = active.reshape((batch_size, 1, 1))?.broadcast_as(shape)?;
    Ok(active.where_cond(&inner.broadcast_as(shape)?, &identity.broadcast_as(shape)?)?)
}
