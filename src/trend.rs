//! Trend detection over a price window.
//!
//! Implements the Mann-Kendall original test: pairwise sign statistic S,
//! tie-corrected variance, normal approximation, two-sided p-value. The
//! input must be in chronological order (oldest first); sample queries
//! return newest-first, so callers reverse before calling.

use std::cmp::Ordering;

use crate::types::{TrendDirection, TrendResult};

/// Significance level matching the upstream test's default.
pub const DEFAULT_ALPHA: f64 = 0.05;

/// Classify `samples` (oldest first) as rising, falling, or no trend.
///
/// Windows of two or fewer samples carry no trend information and return
/// the no-trend verdict; orchestrators skip the test entirely in that case.
pub fn detect(samples: &[f64], alpha: f64) -> TrendResult {
    let n = samples.len();
    if n <= 2 {
        return TrendResult::no_trend();
    }

    let mut s: i64 = 0;
    for i in 0..n - 1 {
        for j in i + 1..n {
            s += match samples[j].partial_cmp(&samples[i]) {
                Some(Ordering::Greater) => 1,
                Some(Ordering::Less) => -1,
                _ => 0,
            };
        }
    }

    let var_s = variance_s(samples);
    if var_s <= 0.0 {
        // all-tie window, the statistic is degenerate
        return TrendResult::no_trend();
    }

    let z = if s > 0 {
        (s as f64 - 1.0) / var_s.sqrt()
    } else if s < 0 {
        (s as f64 + 1.0) / var_s.sqrt()
    } else {
        0.0
    };

    let p = 2.0 * (1.0 - norm_cdf(z.abs()));
    let significant = p < alpha;

    let direction = if significant && z > 0.0 {
        TrendDirection::Rising
    } else if significant && z < 0.0 {
        TrendDirection::Falling
    } else {
        TrendDirection::NoTrend
    };

    TrendResult {
        direction,
        is_significant: significant,
    }
}

/// VAR(S) with the tie correction: ties contribute no sign information, so
/// each group of `t` equal values subtracts `t(t-1)(2t+5)` from the
/// untied variance `n(n-1)(2n+5)`, all over 18.
fn variance_s(samples: &[f64]) -> f64 {
    let n = samples.len() as f64;

    let mut sorted = samples.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));

    let mut tie_term = 0.0;
    let mut run = 1usize;
    for i in 1..=sorted.len() {
        if i < sorted.len() && sorted[i] == sorted[i - 1] {
            run += 1;
            continue;
        }
        if run > 1 {
            let t = run as f64;
            tie_term += t * (t - 1.0) * (2.0 * t + 5.0);
        }
        run = 1;
    }

    (n * (n - 1.0) * (2.0 * n + 5.0) - tie_term) / 18.0
}

/// Standard normal CDF via the Abramowitz-Stegun 7.1.26 erf approximation
/// (absolute error < 1.5e-7, plenty for a significance cutoff).
fn norm_cdf(x: f64) -> f64 {
    0.5 * (1.0 + erf(x / std::f64::consts::SQRT_2))
}

fn erf(x: f64) -> f64 {
    let sign = if x < 0.0 { -1.0 } else { 1.0 };
    let x = x.abs();

    const A1: f64 = 0.254829592;
    const A2: f64 = -0.284496736;
    const A3: f64 = 1.421413741;
    const A4: f64 = -1.453152027;
    const A5: f64 = 1.061405429;
    const P: f64 = 0.3275911;

    let t = 1.0 / (1.0 + P * x);
    let poly = ((((A5 * t + A4) * t + A3) * t + A2) * t + A1) * t;
    sign * (1.0 - poly * (-x * x).exp())
}
