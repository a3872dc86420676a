//! # Transition Matrix
//!
//! The learned `(L+2) x (L+2)` table of scores for one label following
//! another, START and STOP included. Barrier entries (anything into START,
//! anything out of STOP, and optionally scheme-illegal transitions) always
//! read as `-inf`: the raw parameter is selected through a fixed mask, so
//! gradients never reach the barriers and no optimizer step can lift them.

use candle_core::{DType, Device, Tensor, Var};

use crate::config::TransitionConstraints;
use crate::error::{CrfError, Result};
use crate::labels::LabelSpace;

/// Learned transition scores plus their fixed barrier mask.
#[derive(Debug, Clone)]
pub struct TransitionMatrix {
    raw: Var,
    allowed: Tensor,
    barrier: Tensor,
    allowed_host: Vec<bool>,
    constraints: TransitionConstraints,
    dim: usize,
}

impl TransitionMatrix {
    /// Fresh matrix with scores drawn uniformly from `[-scale, scale)`.
    pub fn random(
        labels: &LabelSpace,
        constraints: TransitionConstraints,
        scale: f32,
        seed: u64,
        device: &Device,
    ) -> Result<Self> {
        let dim = labels.transition_dim();
        let mut rng = oorandom::Rand32::new(seed);
        let values: Vec<f32> = (0..dim * dim)
            .map(|_| (rng.rand_float() * 2.0 - 1.0) * scale)
            .collect();

        Self::from_tensor(
            labels,
            constraints,
            Tensor::from_vec(values, (dim, dim), device)?,
        )
    }

    /// Matrix whose every non-barrier entry is zero.
    pub fn zeros(
        labels: &LabelSpace,
        constraints: TransitionConstraints,
        device: &Device,
    ) -> Result<Self> {
        let dim = labels.transition_dim();
        Self::from_tensor(
            labels,
            constraints,
            Tensor::zeros((dim, dim), DType::F32, device)?,
        )
    }

    /// Matrix from explicit rows, e.g. values restored from a checkpoint.
    ///
    /// Barrier entries are overridden with `-inf` whatever the rows contain.
    pub fn from_rows(
        labels: &LabelSpace,
        constraints: TransitionConstraints,
        rows: &[Vec<f32>],
        device: &Device,
    ) -> Result<Self> {
        let dim = labels.transition_dim();
        if rows.len() != dim {
            return Err(CrfError::LabelCountMismatch {
                what: "transition rows",
                expected: dim,
                got: rows.len(),
            });
        }
        let mut values = Vec::with_capacity(dim * dim);
        for row in rows {
            if row.len() != dim {
                return Err(CrfError::LabelCountMismatch {
                    what: "transition columns",
                    expected: dim,
                    got: row.len(),
                });
            }
            values.extend_from_slice(row);
        }

        Self::from_tensor(
            labels,
            constraints,
            Tensor::from_vec(values, (dim, dim), device)?,
        )
    }

    /// Wrap an existing `(L+2, L+2)` tensor as the trainable parameter.
    pub fn from_tensor(
        labels: &LabelSpace,
        constraints: TransitionConstraints,
        values: Tensor,
    ) -> Result<Self> {
        let dim = labels.transition_dim();
        let (rows, cols) = values.dims2()?;
        if rows != dim || cols != dim {
            return Err(CrfError::LabelCountMismatch {
                what: "transition matrix",
                expected: dim,
                got: if rows != dim { rows } else { cols },
            });
        }

        let device = values.device().clone();
        let allowed_host = allowed_transitions(labels, constraints);
        let mask: Vec<u8> = allowed_host.iter().map(|&ok| u8::from(ok)).collect();
        let allowed = Tensor::from_vec(mask, (dim, dim), &device)?;
        let barrier = Tensor::from_vec(vec![f32::NEG_INFINITY; dim * dim], (dim, dim), &device)?;

        // Barrier entries hold zero in the raw parameter so it stays finite
        let raw = allowed.where_cond(&values.to_dtype(DType::F32)?, &barrier.zeros_like()?)?;

        Ok(Self {
            raw: Var::from_tensor(&raw)?,
            allowed,
            barrier,
            allowed_host,
            constraints,
            dim,
        })
    }

    /// Effective scores with barriers applied. Differentiable w.r.t. [`Self::var`].
    pub fn scores(&self) -> Result<Tensor> {
        Ok(self.allowed.where_cond(self.raw.as_tensor(), &self.barrier)?)
    }

    /// Effective scores copied to host rows.
    pub fn to_rows(&self) -> Result<Vec<Vec<f32>>> {
        Ok(self.scores()?.to_vec2::<f32>()?)
    }

    /// The trainable parameter, for handing to an optimizer.
    pub fn var(&self) -> &Var {
        &self.raw
    }

    /// Whether `from -> to` is a learnable (non-barrier) transition.
    pub fn is_allowed(&self, from: usize, to: usize) -> bool {
        from < self.dim && to < self.dim && self.allowed_host[from * self.dim + to]
    }

    /// Number of real labels this matrix was built for.
    pub fn num_labels(&self) -> usize {
        self.dim - 2
    }

    /// Barrier mode the matrix was built with.
    pub fn constraints(&self) -> TransitionConstraints {
        self.constraints
    }

    /// Reject NaN or infinite values in learnable entries.
    pub(crate) fn check_finite(&self) -> Result<()> {
        let raw = self.raw.as_tensor().to_vec2::<f32>()?;
        for (from, row) in raw.iter().enumerate() {
            for (to, &value) in row.iter().enumerate() {
                if self.is_allowed(from, to) && !value.is_finite() {
                    return Err(CrfError::NonFiniteTransition { from, to, value });
                }
            }
        }
        Ok(())
    }

    pub(crate) fn check_labels(&self, labels: &LabelSpace) -> Result<()> {
        if self.num_labels() != labels.len() {
            return Err(CrfError::LabelCountMismatch {
                what: "transition matrix",
                expected: labels.len(),
                got: self.num_labels(),
            });
        }
        Ok(())
    }
}

/// Row-major `allowed[from * dim + to]` table for the given constraint mode.
fn allowed_transitions(labels: &LabelSpace, constraints: TransitionConstraints) -> Vec<bool> {
    let dim = labels.transition_dim();
    let (start, stop) = (labels.start(), labels.stop());
    let scheme = labels.scheme();

    let mut allowed = vec![true; dim * dim];
    for from in 0..dim {
        for to in 0..dim {
            let ok = if to == start || from == stop || (from == start && to == stop) {
                false
            } else {
                match constraints {
                    TransitionConstraints::Sentinels => true,
                    TransitionConstraints::Scheme => {
                        let prev = if from == start { None } else { labels.tag(from) };
                        let next = if to == stop { None } else { labels.tag(to) };
                        // Labels that are not span tags stay unconstrained
                        let unparsed = (from != start && prev.is_none())
                            || (to != stop && next.is_none());
                        unparsed || scheme.is_valid_transition(prev, next)
                    }
                }
            };
            allowed[from * dim + to] = ok;
        }
    }
    allowed
}
