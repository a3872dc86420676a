//! # Negative Log-Likelihood

use candle_core::Tensor;
use tracing::{debug, warn};

use crate::config::PaddingStrategy;
use crate::crf::emissions::EmissionBatch;
use crate::crf::ensure_finite;
use crate::crf::forward::log_partition;
use crate::crf::score::gold_score;
use crate::crf::transitions::TransitionMatrix;
use crate::error::Result;
use crate::labels::LabelSpace;

/// Tolerance below zero before a per-sequence loss is reported as suspicious.
const NEGATIVE_LOSS_TOLERANCE: f32 = 1e-3;

/// Per-sequence `logZ - gold_score`, shape `(batch,)`.
pub fn sequence_losses(
    labels: &LabelSpace,
    transitions: &TransitionMatrix,
    batch: &EmissionBatch,
    gold: &[Vec<usize>],
    padding: PaddingStrategy,
) -> Result<Tensor> {
    let log_z = log_partition(labels, transitions, batch, padding)?;
    let gold = gold_score(labels, transitions, batch, gold)?;
    let losses = log_z.sub(&gold)?;

    let values = ensure_finite(&losses, "loss")?;
    for (sequence, &loss) in values.iter().enumerate() {
        if loss < -NEGATIVE_LOSS_TOLERANCE {
            // logZ bounds every path score, so this is rounding at best
            warn!(sequence, loss, "negative sequence loss");
        }
    }
    Ok(losses)
}

/// Batch loss: the sum of [`sequence_losses`] as a scalar tensor.
pub fn neg_log_likelihood(
    labels: &LabelSpace,
    transitions: &TransitionMatrix,
    batch: &EmissionBatch,
    gold: &[Vec<usize>],
    padding: PaddingStrategy,
) -> Result<Tensor> {
    let loss = sequence_losses(labels, transitions, batch, gold, padding)?.sum_all()?;
    debug!(batch_size = batch.batch_size(), "batch negative log-likelihood");
    Ok(loss)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TransitionConstraints;
    use candle_core::Device;

    fn space(labels: &[&str]) -> LabelSpace {
        LabelSpace::new(labels.iter().map(|s| s.to_string()).collect()).unwrap()
    }

    #[test]
    fn test_two_label_scenario() {
        let labels = space(&["O", "X"]);
        let transitions =
            TransitionMatrix::zeros(&labels, TransitionConstraints::Sentinels, &Device::Cpu)
                .unwrap();
        let batch = EmissionBatch::from_sequences(
            &[vec![vec![1.0, 2.0], vec![3.0, 1.0]]],
            2,
            &Device::Cpu,
        )
        .unwrap();

        let loss = neg_log_likelihood(
            &labels,
            &transitions,
            &batch,
            &[vec![1, 0]],
            PaddingStrategy::FreezeAtLength,
        )
        .unwrap()
        .to_scalar::<f32>()
        .unwrap();
        // log(e^4 + e^2 + e^5 + e^3) - 5
        assert!((loss - 0.4402).abs() < 1e-3);
    }

    #[test]
    fn test_batch_loss_is_sum_of_sequences() {
        let labels = space(&["O", "B-LOC", "I-LOC"]);
        let transitions = TransitionMatrix::random(
            &labels,
            TransitionConstraints::Sentinels,
            0.5,
            21,
            &Device::Cpu,
        )
        .unwrap();
        let sequences = vec![
            vec![vec![0.1, 0.9, -0.4], vec![0.3, -0.2, 1.4]],
            vec![vec![1.0, 0.0, 0.0], vec![0.0, 1.0, 0.0], vec![0.0, 0.0, 1.0]],
            vec![vec![-2.0, 0.5, 0.5]],
        ];
        let gold = vec![vec![1, 2], vec![0, 1, 2], vec![0]];
        let batch = EmissionBatch::from_sequences(&sequences, 3, &Device::Cpu).unwrap();

        for padding in [PaddingStrategy::FreezeAtLength, PaddingStrategy::IdentityTransitions] {
            let per_sequence = sequence_losses(&labels, &transitions, &batch, &gold, padding)
                .unwrap()
                .to_vec1::<f32>()
                .unwrap();
            let total = neg_log_likelihood(&labels, &transitions, &batch, &gold, padding)
                .unwrap()
                .to_scalar::<f32>()
                .unwrap();

            assert!((per_sequence.iter().sum::<f32>() - total).abs() < 1e-4);
            for (b, sequence) in sequences.iter().enumerate() {
                let single = EmissionBatch::from_sequences(&[sequence.clone()], 3, &Device::Cpu)
                    .unwrap();
                let alone = neg_log_likelihood(
                    &labels,
                    &transitions,
                    &single,
                    &[gold[b].clone()],
                    padding,
                )
                .unwrap()
                .to_scalar::<f32>()
                .unwrap();
                assert!((per_sequence[b] - alone).abs() < 1e-4);
                assert!(per_sequence[b] >= -1e-5);
            }
        }
    }

    #[test]
    fn test_gradients_reach_transitions() {
        let labels = space(&["O", "X"]);
        let transitions =
            TransitionMatrix::zeros(&labels, TransitionConstraints::Sentinels, &Device::Cpu)
                .unwrap();
        let batch = EmissionBatch::from_sequences(
            &[vec![vec![1.0, 2.0], vec![3.0, 1.0]]],
            2,
            &Device::Cpu,
        )
        .unwrap();

        let loss = neg_log_likelihood(
            &labels,
            &transitions,
            &batch,
            &[vec![1, 0]],
            PaddingStrategy::FreezeAtLength,
        )
        .unwrap();
        let grads = loss.backward().unwrap();
        let grad = grads
            .get(transitions.var().as_tensor())
            .unwrap()
            .to_vec2::<f32>()
            .unwrap();

        // The gold path uses X -> O, so the loss pushes that score up
        assert!(grad[1][0] < 0.0);
        // Barrier entries receive nothing
        assert_eq!(grad[0][labels.start()], 0.0);
        assert_eq!(grad[labels.stop()][0], 0.0);
    }
}
