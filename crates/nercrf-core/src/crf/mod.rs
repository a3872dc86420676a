//! # Linear-Chain CRF
//!
//! The [`Crf`] type ties a [`LabelSpace`], a [`TransitionMatrix`] and a
//! [`CrfConfig`] together and exposes the training loss and the decoder.
//! The individual algorithms live in their own modules and can be called
//! directly when a caller manages the transition matrix itself.

pub mod checkpoint;
pub mod emissions;
pub mod forward;
pub mod logsumexp;
pub mod loss;
pub mod score;
pub mod transitions;
pub mod viterbi;

pub use checkpoint::Checkpoint;
pub use emissions::EmissionBatch;
pub use forward::log_partition;
pub use logsumexp::{log_sum_exp, log_sum_exp_slice};
pub use loss::{neg_log_likelihood, sequence_losses};
pub use score::{gold_score, path_score};
pub use transitions::TransitionMatrix;
pub use viterbi::{DecodedPath, ViterbiDecoder};

use candle_core::{Device, Tensor};
use tracing::debug;

use crate::config::CrfConfig;
use crate::error::{CrfError, Result};
use crate::labels::LabelSpace;

/// A CRF layer bound to one label space.
#[derive(Debug, Clone)]
pub struct Crf<'a> {
    labels: &'a LabelSpace,
    transitions: TransitionMatrix,
    config: CrfConfig,
}

impl<'a> Crf<'a> {
    /// Create a layer with a fresh random transition matrix.
    pub fn new(labels: &'a LabelSpace, config: CrfConfig, device: &Device) -> Result<Self> {
        let transitions = TransitionMatrix::random(
            labels,
            config.constraints,
            config.init_scale,
            config.seed,
            device,
        )?;
        debug!(
            num_labels = labels.len(),
            seed = config.seed,
            constraints = ?config.constraints,
            "initialized transitions"
        );
        Ok(Self {
            labels,
            transitions,
            config,
        })
    }

    /// Create a layer around existing transitions, e.g. from a checkpoint.
    pub fn with_transitions(
        labels: &'a LabelSpace,
        transitions: TransitionMatrix,
        config: CrfConfig,
    ) -> Result<Self> {
        transitions.check_labels(labels)?;
        Ok(Self {
            labels,
            transitions,
            config,
        })
    }

    /// Rebuild a layer from a loaded checkpoint.
    pub fn from_checkpoint(checkpoint: &'a Checkpoint) -> Result<Self> {
        Self::with_transitions(
            &checkpoint.labels,
            checkpoint.transitions.clone(),
            checkpoint.config.clone(),
        )
    }

    /// Snapshot the layer for [`Checkpoint::save`].
    pub fn to_checkpoint(&self) -> Checkpoint {
        Checkpoint {
            labels: self.labels.clone(),
            config: self.config.clone(),
            transitions: self.transitions.clone(),
        }
    }

    /// Per-sequence `logZ`, shape `(batch,)`.
    pub fn log_partition(&self, batch: &EmissionBatch) -> Result<Tensor> {
        log_partition(self.labels, &self.transitions, batch, self.config.padding)
    }

    /// Per-sequence gold path scores, shape `(batch,)`.
    pub fn gold_score(&self, batch: &EmissionBatch, gold: &[Vec<usize>]) -> Result<Tensor> {
        gold_score(self.labels, &self.transitions, batch, gold)
    }

    /// Per-sequence losses, shape `(batch,)`.
    pub fn sequence_losses(&self, batch: &EmissionBatch, gold: &[Vec<usize>]) -> Result<Tensor> {
        sequence_losses(
            self.labels,
            &self.transitions,
            batch,
            gold,
            self.config.padding,
        )
    }

    /// Summed batch loss as a scalar tensor ready for `backward()`.
    pub fn neg_log_likelihood(&self, batch: &EmissionBatch, gold: &[Vec<usize>]) -> Result<Tensor> {
        neg_log_likelihood(
            self.labels,
            &self.transitions,
            batch,
            gold,
            self.config.padding,
        )
    }

    /// Best path and score for every sequence of the batch.
    pub fn decode(&self, batch: &EmissionBatch) -> Result<Vec<DecodedPath>> {
        ViterbiDecoder::new(self.config.padding).decode_batch(
            self.labels,
            &self.transitions,
            batch,
        )
    }

    pub fn labels(&self) -> &LabelSpace {
        self.labels
    }

    pub fn transitions(&self) -> &TransitionMatrix {
        &self.transitions
    }

    pub fn config(&self) -> &CrfConfig {
        &self.config
    }
}

/// Copy a `(batch,)` result to the host and reject NaN, infinities, and
/// values at the clamp floor of [`log_sum_exp`] (no valid path).
pub(crate) fn ensure_finite(values: &Tensor, stage: &'static str) -> Result<Vec<f32>> {
    let host = values.to_vec1::<f32>()?;
    match host
        .iter()
        .enumerate()
        .find(|(_, v)| !v.is_finite() || **v <= f32::MIN / 2.0)
    {
        Some((sequence, &value)) => Err(CrfError::NonFinite {
            stage,
            sequence,
            value,
        }),
        None => Ok(host),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PaddingStrategy, TransitionConstraints};
    use candle_nn::{Optimizer, SGD};

    fn space(labels: &[&str]) -> LabelSpace {
        LabelSpace::new(labels.iter().map(|s| s.to_string()).collect()).unwrap()
    }

    fn emissions(len: usize, num_labels: usize, salt: usize) -> Vec<Vec<f32>> {
        (0..len)
            .map(|t| {
                (0..num_labels)
                    .map(|l| (((t + 1) * (l + 3) * (salt + 5)) % 13) as f32 * 0.25 - 1.5)
                    .collect()
            })
            .collect()
    }

    #[test]
    fn test_padding_invariance() {
        let labels = space(&["O", "B-PER", "I-PER", "E-PER", "S-PER"]);
        let short = emissions(3, 5, 1);
        let long = emissions(6, 5, 2);
        let gold_short = vec![1, 3, 0];
        let gold_long = vec![0, 4, 1, 2, 3, 0];

        for padding in [PaddingStrategy::FreezeAtLength, PaddingStrategy::IdentityTransitions] {
            let config = CrfConfig::new()
                .with_padding(padding)
                .with_constraints(TransitionConstraints::Scheme)
                .with_init_scale(1.0);
            let crf = Crf::new(&labels, config, &Device::Cpu).unwrap();

            let alone = EmissionBatch::from_sequences(&[short.clone()], 5, &Device::Cpu).unwrap();
            let padded =
                EmissionBatch::from_sequences(&[short.clone(), long.clone()], 5, &Device::Cpu)
                    .unwrap();
            let reversed =
                EmissionBatch::from_sequences(&[long.clone(), short.clone()], 5, &Device::Cpu)
                    .unwrap();

            let z_alone = crf.log_partition(&alone).unwrap().to_vec1::<f32>().unwrap();
            let z_padded = crf.log_partition(&padded).unwrap().to_vec1::<f32>().unwrap();
            let z_reversed = crf.log_partition(&reversed).unwrap().to_vec1::<f32>().unwrap();
            assert!((z_alone[0] - z_padded[0]).abs() < 1e-4, "{padding:?}");
            assert!((z_alone[0] - z_reversed[1]).abs() < 1e-4, "{padding:?}");

            let l_alone = crf
                .sequence_losses(&alone, &[gold_short.clone()])
                .unwrap()
                .to_vec1::<f32>()
                .unwrap();
            let l_padded = crf
                .sequence_losses(&padded, &[gold_short.clone(), gold_long.clone()])
                .unwrap()
                .to_vec1::<f32>()
                .unwrap();
            assert!((l_alone[0] - l_padded[0]).abs() < 1e-4, "{padding:?}");

            let d_alone = crf.decode(&alone).unwrap();
            let d_padded = crf.decode(&padded).unwrap();
            assert_eq!(d_alone[0], d_padded[0]);
            assert_eq!(d_padded[1].labels.len(), 6);
        }
    }

    #[test]
    fn test_strategies_agree() {
        let labels = space(&["O", "B-LOC", "I-LOC"]);
        let sequences = vec![emissions(4, 3, 7), emissions(2, 3, 8), emissions(5, 3, 9)];
        let gold = vec![vec![0, 1, 2, 0], vec![1, 2], vec![1, 2, 2, 0, 0]];
        let batch = EmissionBatch::from_sequences(&sequences, 3, &Device::Cpu).unwrap();

        let frozen = Crf::new(&labels, CrfConfig::new(), &Device::Cpu).unwrap();
        let identity = Crf::with_transitions(
            &labels,
            frozen.transitions().clone(),
            CrfConfig::new().with_padding(PaddingStrategy::IdentityTransitions),
        )
        .unwrap();

        let a = frozen.sequence_losses(&batch, &gold).unwrap().to_vec1::<f32>().unwrap();
        let b = identity.sequence_losses(&batch, &gold).unwrap().to_vec1::<f32>().unwrap();
        for (x, y) in a.iter().zip(&b) {
            assert!((x - y).abs() < 1e-4);
        }
        assert_eq!(frozen.decode(&batch).unwrap(), identity.decode(&batch).unwrap());
    }

    #[test]
    fn test_viterbi_score_matches_path_score() {
        let labels = space(&["O", "B-ORG", "I-ORG", "E-ORG", "S-ORG"]);
        let config = CrfConfig::new()
            .with_constraints(TransitionConstraints::Scheme)
            .with_init_scale(0.8)
            .with_seed(3);
        let crf = Crf::new(&labels, config, &Device::Cpu).unwrap();
        let sequences = vec![emissions(7, 5, 4), emissions(2, 5, 6)];
        let batch = EmissionBatch::from_sequences(&sequences, 5, &Device::Cpu).unwrap();

        let rows = crf.transitions().to_rows().unwrap();
        let decoded = crf.decode(&batch).unwrap();
        let gold: Vec<Vec<usize>> = decoded.iter().map(|d| d.labels.clone()).collect();
        let gold_scores = crf.gold_score(&batch, &gold).unwrap().to_vec1::<f32>().unwrap();
        let log_z = crf.log_partition(&batch).unwrap().to_vec1::<f32>().unwrap();

        for (b, path) in decoded.iter().enumerate() {
            let direct = path_score(&labels, &rows, &sequences[b], &path.labels);
            assert!((path.score - direct).abs() < 1e-4);
            assert!((path.score - gold_scores[b]).abs() < 1e-4);
            assert!(log_z[b] >= path.score - 1e-4);
        }
    }

    #[test]
    fn test_nll_is_non_negative() {
        let labels = space(&["A", "B", "C"]);
        for seed in 0..5 {
            let config = CrfConfig::new().with_init_scale(3.0).with_seed(seed);
            let crf = Crf::new(&labels, config, &Device::Cpu).unwrap();
            let sequences = vec![emissions(3, 3, seed as usize), emissions(1, 3, 11)];
            let batch = EmissionBatch::from_sequences(&sequences, 3, &Device::Cpu).unwrap();

            for gold in [vec![vec![0, 0, 0], vec![2]], vec![vec![2, 1, 0], vec![1]]] {
                let losses = crf.sequence_losses(&batch, &gold).unwrap().to_vec1::<f32>().unwrap();
                assert!(losses.iter().all(|&l| l >= -1e-5), "seed {seed}: {losses:?}");
            }
        }
    }

    #[test]
    fn test_sgd_step_keeps_barriers() {
        let labels = space(&["O", "B-PER", "I-PER", "E-PER", "S-PER"]);
        let config = CrfConfig::new().with_constraints(TransitionConstraints::Scheme);
        let crf = Crf::new(&labels, config, &Device::Cpu).unwrap();
        let batch =
            EmissionBatch::from_sequences(&[emissions(4, 5, 3)], 5, &Device::Cpu).unwrap();
        let gold = vec![vec![1, 2, 3, 0]];

        let before = crf.neg_log_likelihood(&batch, &gold).unwrap().to_scalar::<f32>().unwrap();

        let loss = crf.neg_log_likelihood(&batch, &gold).unwrap();
        let grads = loss.backward().unwrap();
        let grad = grads
            .get(crf.transitions().var().as_tensor())
            .unwrap()
            .to_vec2::<f32>()
            .unwrap();

        let mut sgd = SGD::new(vec![crf.transitions().var().clone()], 0.05).unwrap();
        for _ in 0..3 {
            let loss = crf.neg_log_likelihood(&batch, &gold).unwrap();
            sgd.backward_step(&loss).unwrap();
        }
        let after = crf.neg_log_likelihood(&batch, &gold).unwrap().to_scalar::<f32>().unwrap();
        assert!(after < before);

        let rows = crf.transitions().to_rows().unwrap();
        let dim = labels.transition_dim();
        for from in 0..dim {
            for to in 0..dim {
                if crf.transitions().is_allowed(from, to) {
                    assert!(rows[from][to].is_finite());
                } else {
                    assert_eq!(grad[from][to], 0.0, "gradient on barrier {from} -> {to}");
                    assert_eq!(rows[from][to], f32::NEG_INFINITY);
                }
            }
        }
    }

    #[test]
    fn test_checkpoint_restores_layer() {
        let labels = space(&["O", "S-MISC"]);
        let crf = Crf::new(&labels, CrfConfig::new().with_seed(8), &Device::Cpu).unwrap();
        let dir = std::env::temp_dir().join(format!("nercrf-layer-{}", std::process::id()));
        crf.to_checkpoint().save(&dir).unwrap();

        let checkpoint = Checkpoint::load(&dir, &Device::Cpu).unwrap();
        let restored = Crf::from_checkpoint(&checkpoint).unwrap();
        let batch =
            EmissionBatch::from_sequences(&[emissions(5, 2, 1)], 2, &Device::Cpu).unwrap();
        assert_eq!(crf.decode(&batch).unwrap(), restored.decode(&batch).unwrap());
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_with_transitions_checks_labels() {
        let labels = space(&["O", "X"]);
        let other = space(&["O"]);
        let transitions =
            TransitionMatrix::zeros(&other, TransitionConstraints::Sentinels, &Device::Cpu)
                .unwrap();
        assert!(matches!(
            Crf::with_transitions(&labels, transitions, CrfConfig::new()),
            Err(CrfError::LabelCountMismatch { .. })
        ));
    }

    #[test]
    fn test_ensure_finite() {
        let ok = Tensor::new(&[1f32, -2.0], &Device::Cpu).unwrap();
        assert_eq!(ensure_finite(&ok, "test").unwrap(), vec![1.0, -2.0]);

        let floor = Tensor::new(&[0f32, f32::MIN], &Device::Cpu).unwrap();
        assert!(matches!(
            ensure_finite(&floor, "test"),
            Err(CrfError::NonFinite { sequence: 1, .. })
        ));
    }
}
