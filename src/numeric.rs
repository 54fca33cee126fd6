
// numeric helpers shared by both inference engines.

use ndarray::{Array1, ArrayView1, Zip};
use rand::Rng;

/// Digamma via the recurrence shift by 6 followed by the asymptotic series.
/// Only defined for `x > 0`.
pub fn digamma(x: f64) -> f64 {
    debug_assert!(x > 0.0, "digamma({}) is undefined", x);

    let x = x + 6.0;
    let mut p = 1.0 / (x * x);
    p = (((0.004166666666667 * p - 0.003968253986254) * p + 0.008333333333333) * p
        - 0.083333333333333)
        * p;

    // move back from x + 6 to x
    p + x.ln() - 0.5 / x
        - 1.0 / (x - 1.0)
        - 1.0 / (x - 2.0)
        - 1.0 / (x - 3.0)
        - 1.0 / (x - 4.0)
        - 1.0 / (x - 5.0)
        - 1.0 / (x - 6.0)
}

/// `log(sum(exp(v)))` with the max subtracted before exponentiating.
pub fn log_sum_exp(values: &[f64]) -> f64 {
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if !max.is_finite() {
        return max;
    }
    let sum: f64 = values.iter().map(|v| (v - max).exp()).sum();
    max + sum.ln()
}

/// Mode of a Dirichlet with the given parameters, `None` unless `sum > K`.
pub fn dirichlet_mode(params: ArrayView1<f64>) -> Option<Array1<f64>> {
    let k = params.len() as f64;
    let denominator = params.sum() - k;
    if !(denominator > 0.0) {
        return None;
    }
    Some(params.mapv(|p| (p - 1.0) / denominator))
}

/// Mean of a Dirichlet with the given parameters, `None` if the parameters sum to zero.
pub fn dirichlet_mean(params: ArrayView1<f64>) -> Option<Array1<f64>> {
    let sum = params.sum();
    if !(sum > 0.0) {
        return None;
    }
    Some(params.mapv(|p| p / sum))
}

pub fn squared_distance(a: ArrayView1<f64>, b: ArrayView1<f64>) -> f64 {
    assert_eq!(a.len(), b.len(), "the lengths of a and b don't match");
    let mut sum = 0.0;
    Zip::from(&a).and(&b).for_each(|x, y| {
        let diff = x - y;
        sum += diff * diff;
    });
    sum
}

/// Draws index `i` with probability `weights[i] / sum(weights)` by inverting the
/// cumulative sum. Zero weights are never drawn; a draw that overshoots the
/// total because of rounding falls back to the last index with positive weight.
pub fn sample_multinomial<R: Rng + ?Sized>(weights: &[f64], rng: &mut R) -> usize {
    debug_assert!(!weights.is_empty(), "cannot sample from an empty weight vector");

    let total: f64 = weights.iter().sum();
    let draw = rng.gen::<f64>() * total;

    let mut cumulative = 0.0;
    for (i, w) in weights.iter().enumerate() {
        cumulative += w;
        if draw < cumulative {
            return i;
        }
    }

    weights
        .iter()
        .rposition(|w| *w > 0.0)
        .unwrap_or(weights.len() - 1)
}
