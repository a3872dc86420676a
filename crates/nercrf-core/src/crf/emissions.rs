//! # Emission Batch
//!
//! Per-token label scores from the encoder, shaped `(batch, max_len, labels)`,
//! together with the true length of every sequence. Construction validates
//! the lengths so the algorithms never see an empty or overlong sequence.

use candle_core::{DType, Device, IndexOp, Tensor};

use crate::error::{CrfError, Result};
use crate::labels::LabelSpace;

/// A padded batch of emission scores and the true sequence lengths.
#[derive(Debug, Clone)]
pub struct EmissionBatch {
    scores: Tensor,
    lengths: Vec<usize>,
    batch_size: usize,
    max_len: usize,
    num_labels: usize,
}

impl EmissionBatch {
    /// Wrap an encoder output tensor.
    ///
    /// Fails unless `scores` is a non-empty 3-D tensor, `lengths` has one
    /// entry per batch item, and every length is in `1..=max_len`.
    pub fn new(scores: Tensor, lengths: Vec<usize>) -> Result<Self> {
        let (batch_size, max_len, num_labels) = scores.dims3()?;

        if batch_size == 0 {
            return Err(CrfError::EmptyBatch);
        }
        if lengths.len() != batch_size {
            return Err(CrfError::BatchSizeMismatch {
                what: "lengths",
                expected: batch_size,
                got: lengths.len(),
            });
        }
        for (sequence, &length) in lengths.iter().enumerate() {
            if length == 0 || length > max_len {
                return Err(CrfError::InvalidLength {
                    sequence,
                    length,
                    max_len,
                });
            }
        }

        Ok(Self {
            scores: scores.to_dtype(DType::F32)?,
            lengths,
            batch_size,
            max_len,
            num_labels,
        })
    }

    /// Pad host-side `[position][label]` score rows into one batch.
    ///
    /// Each sequence keeps its own length; padding positions are zero.
    pub fn from_sequences(
        sequences: &[Vec<Vec<f32>>],
        num_labels: usize,
        device: &Device,
    ) -> Result<Self> {
        let max_len = sequences.iter().map(Vec::len).max().unwrap_or(0);
        let mut flat = vec![0f32; sequences.len() * max_len * num_labels];

        for (b, sequence) in sequences.iter().enumerate() {
            for (t, row) in sequence.iter().enumerate() {
                if row.len() != num_labels {
                    return Err(CrfError::LabelCountMismatch {
                        what: "emission row",
                        expected: num_labels,
                        got: row.len(),
                    });
                }
                let offset = (b * max_len + t) * num_labels;
                flat[offset..offset + num_labels].copy_from_slice(row);
            }
        }

        let lengths = sequences.iter().map(Vec::len).collect();
        let scores = Tensor::from_vec(flat, (sequences.len(), max_len, num_labels), device)?;
        Self::new(scores, lengths)
    }

    /// The raw (unmasked) score tensor.
    pub fn scores(&self) -> &Tensor {
        &self.scores
    }

    /// True length of every sequence.
    pub fn lengths(&self) -> &[usize] {
        &self.lengths
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn max_len(&self) -> usize {
        self.max_len
    }

    pub fn num_labels(&self) -> usize {
        self.num_labels
    }

    /// `(batch, max_len)` u8 mask, 1 on real tokens and 0 on padding.
    pub fn padding_mask(&self) -> Result<Tensor> {
        let mut mask = vec![0u8; self.batch_size * self.max_len];
        for (b, &length) in self.lengths.iter().enumerate() {
            mask[b * self.max_len..b * self.max_len + length].fill(1);
        }
        Ok(Tensor::from_vec(
            mask,
            (self.batch_size, self.max_len),
            self.scores.device(),
        )?)
    }

    /// Scores with every padding position replaced by zero, so whatever the
    /// encoder left there (including NaN) cannot leak into a result.
    pub fn masked_scores(&self) -> Result<Tensor> {
        let mask = self
            .padding_mask()?
            .unsqueeze(2)?
            .broadcast_as((self.batch_size, self.max_len, self.num_labels))?;
        Ok(mask.where_cond(&self.scores, &self.scores.zeros_like()?)?)
    }

    /// `(batch,)` u8 column of the padding mask at position `t`.
    pub(crate) fn active_at(&self, mask: &Tensor, t: usize) -> Result<Tensor> {
        Ok(mask.i((.., t))?)
    }

    /// Host copy of the real (unpadded) emission rows of one sequence.
    pub fn sequence_rows(&self, sequence: usize) -> Result<Vec<Vec<f32>>> {
        let length = *self
            .lengths
            .get(sequence)
            .ok_or(CrfError::SequenceOutOfRange {
                sequence,
                batch_size: self.batch_size,
            })?;
        Ok(self
            .scores
            .i((sequence, 0..length))?
            .to_vec2::<f32>()?)
    }

    /// Reject NaN or infinite scores at real (non-padding) positions.
    pub(crate) fn check_finite(&self) -> Result<()> {
        let scores = self.scores.to_vec3::<f32>()?;
        for (sequence, (rows, &length)) in scores.iter().zip(&self.lengths).enumerate() {
            if let Some(&value) = rows[..length].iter().flatten().find(|v| !v.is_finite()) {
                return Err(CrfError::NonFinite {
                    stage: "emissions",
                    sequence,
                    value,
                });
            }
        }
        Ok(())
    }

    pub(crate) fn check_labels(&self, labels: &LabelSpace) -> Result<()> {
        if self.num_labels != labels.len() {
            return Err(CrfError::LabelCountMismatch {
                what: "emissions",
                expected: labels.len(),
                got: self.num_labels,
            });
        }
        Ok(())
    }

    /// Validate gold label sequences against this batch and the label space.
    pub(crate) fn check_gold(&self, labels: &LabelSpace, gold: &[Vec<usize>]) -> Result<()> {
        if gold.len() != self.batch_size {
            return Err(CrfError::BatchSizeMismatch {
                what: "gold sequences",
                expected: self.batch_size,
                got: gold.len(),
            });
        }
        for (sequence, (path, &length)) in gold.iter().zip(&self.lengths).enumerate() {
            if path.len() != length {
                return Err(CrfError::GoldLengthMismatch {
                    sequence,
                    expected: length,
                    got: path.len(),
                });
            }
            if let Some((position, &label)) =
                path.iter().enumerate().find(|(_, l)| **l >= labels.len())
            {
                return Err(CrfError::GoldLabelOutOfRange {
                    sequence,
                    position,
                    label,
                    num_labels: labels.len(),
                });
            }
        }
        Ok(())
    }
}
