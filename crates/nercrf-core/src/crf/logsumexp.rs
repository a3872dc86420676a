//! Numerically stable log-sum-exp.
//!
//! `log Σ exp(x_i)` is computed as `m + log Σ exp(x_i - m)` with `m = max x_i`,
//! so no intermediate overflows to infinity or underflows to zero. A slice
//! made entirely of `-inf` reduces to `f32::MIN` instead of `NaN`, which keeps
//! gradients finite when a label is unreachable.

use candle_core::Tensor;

use crate::error::Result;

/// Reduce `dim` of `xs` with a max-shifted log-sum-exp. `dim` is removed.
pub fn log_sum_exp(xs: &Tensor, dim: usize) -> Result<Tensor> {
    // An all -inf slice has max -inf; clamping the shift keeps `x - shift` at
    // -inf rather than NaN.
    let shift = xs.max_keepdim(dim)?.clamp(f32::MIN, f32::MAX)?;
    let summed = xs
        .broadcast_sub(&shift)?
        .exp()?
        .sum_keepdim(dim)?
        // Only reachable below 1.0 when every entry was -inf.
        .clamp(f32::MIN_POSITIVE, f32::INFINITY)?;
    Ok(summed.log()?.add(&shift)?.squeeze(dim)?)
}

/// Host-side counterpart of [`log_sum_exp`] over a slice of scores.
pub fn log_sum_exp_slice(xs: &[f32]) -> f32 {
    let max = xs.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    if max == f32::NEG_INFINITY || xs.is_empty() {
        return f32::NEG_INFINITY;
    }
    let summed: f32 = xs.iter().map(|x| (x - max).exp()).sum();
    max + summed.ln()
}
