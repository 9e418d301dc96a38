// src/normalization.rs
//
// Pure functions mapping a finite non-empty vector of metric samples to a
// same-length vector in a bounded range. Every routine here is total and
// deterministic: no panics, no division by zero, a fixed answer for length-1
// input ([0.5]).

const EPSILON: f64 = 1e-6;

fn min_max_raw(values: &[f64]) -> (f64, f64) {
    let mut min = values[0];
    let mut max = values[0];
    for &v in &values[1..] {
        if v < min {
            min = v;
        }
        if v > max {
            max = v;
        }
    }
    (min, max)
}

/// `(x - min) / (max - min)`; all-zero when `max == min`. Length-1 input
/// returns `[0.5]`.
pub fn min_max_normalize(values: &[f64]) -> Vec<f64> {
    if values.len() == 1 {
        return vec![0.5];
    }
    let (min, max) = min_max_raw(values);
    if (max - min).abs() < f64::EPSILON {
        return vec![0.0; values.len()];
    }
    values.iter().map(|&x| (x - min) / (max - min)).collect()
}

/// Min-max with an `epsilon`-stabilised denominator, used inside the
/// nonlinear pipeline so a near-constant vector doesn't blow up.
pub fn min_max_normalize_eps(values: &[f64]) -> Vec<f64> {
    if values.len() == 1 {
        return vec![0.5];
    }
    let (min, max) = min_max_raw(values);
    let span = (max - min).max(EPSILON);
    values.iter().map(|&x| (x - min) / span).collect()
}

fn log_linear_map(values: &[f64], min: f64, lo: f64, hi: f64) -> Vec<f64> {
    // r_i = x_i / min, l_i = log2(r_i); map the l_i range linearly to [lo, hi].
    let logs: Vec<f64> = values.iter().map(|&x| (x / min).log2()).collect();
    let (lmin, lmax) = min_max_raw(&logs);
    if (lmax - lmin).abs() < f64::EPSILON {
        return vec![(lo + hi) / 2.0; values.len()];
    }
    logs.iter()
        .map(|&l| lo + (hi - lo) * (l - lmin) / (lmax - lmin))
        .collect()
}

/// When `min > 0`: log2-ratio mapped into `[0.2, 1.0]`. Else falls back to
/// plain min-max (the simpler of the two fallback rules the original
/// implementation used for this case).
pub fn precise_cache_normalize(values: &[f64]) -> Vec<f64> {
    if values.len() == 1 {
        return vec![0.5];
    }
    let (min, _max) = min_max_raw(values);
    if min > 0.0 {
        log_linear_map(values, min, 0.2, 1.0)
    } else {
        min_max_normalize(values)
    }
}

/// Shifts all values by `+1` (admits zeros) then applies the same
/// log-then-linear mapping, into `[0.15, 0.95]`.
pub fn precise_running_normalize(values: &[f64]) -> Vec<f64> {
    if values.len() == 1 {
        return vec![0.5];
    }
    let shifted: Vec<f64> = values.iter().map(|&x| x + 1.0).collect();
    let (min, _max) = min_max_raw(&shifted);
    if min > 0.0 {
        log_linear_map(&shifted, min, 0.15, 0.95)
    } else {
        min_max_normalize(values)
    }
}

/// For exactly two positive values, `[r/(r+1), 1/(r+1)]` where `r = max/min`,
/// in the input's original order. Falls back to min-max for other sizes.
pub fn ratio_based_normalize(values: &[f64]) -> Vec<f64> {
    if values.len() == 1 {
        return vec![0.5];
    }
    if values.len() == 2 && values[0] > 0.0 && values[1] > 0.0 {
        let (min, max) = min_max_raw(values);
        let r = max / min;
        let better = r / (r + 1.0);
        let worse = 1.0 / (r + 1.0);
        return if values[0] >= values[1] {
            vec![better, worse]
        } else {
            vec![worse, better]
        };
    }
    min_max_normalize(values)
}

/// Min-max to `[0,1]`, then remapped into a window whose width narrows with
/// the relative spread `(max-min)/min`.
pub fn smooth_normalize(values: &[f64]) -> Vec<f64> {
    if values.len() == 1 {
        return vec![0.5];
    }
    let (min, max) = min_max_raw(values);
    if (max - min).abs() < f64::EPSILON {
        return vec![0.5; values.len()];
    }
    let relative_spread = if min.abs() > f64::EPSILON {
        (max - min) / min.abs()
    } else {
        f64::MAX
    };
    let (lo, hi) = smooth_window(relative_spread);
    values
        .iter()
        .map(|&x| {
            let unit = (x - min) / (max - min);
            lo + (hi - lo) * unit
        })
        .collect()
}

fn smooth_window(relative_spread: f64) -> (f64, f64) {
    if relative_spread < 0.1 {
        (0.45, 0.55)
    } else if relative_spread < 0.3 {
        (0.35, 0.65)
    } else if relative_spread < 0.8 {
        (0.25, 0.75)
    } else if relative_spread < 2.0 {
        (0.15, 0.85)
    } else {
        (0.05, 0.95)
    }
}

/// Tag used by the adaptive-distribution normaliser to pick the two
/// metric-specific special cases from §4.1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    WaitingQueue,
    CacheUsage,
    Other,
}

fn mean_and_stddev(values: &[f64]) -> (f64, f64) {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|&x| (x - mean).powi(2)).sum::<f64>() / n;
    (mean, variance.sqrt())
}

fn adaptive_schedule(cv: f64) -> (f64, f64, f64) {
    // (sensitivity, lo, hi)
    if cv < 0.1 {
        (3.0, 0.4, 0.6)
    } else if cv < 0.3 {
        (2.0, 0.25, 0.75)
    } else if cv < 0.8 {
        (1.5, 0.15, 0.85)
    } else {
        (1.0, 0.1, 0.9)
    }
}

/// Compute mean/stddev/cv, pick `(sensitivity, [lo, hi])` from the cv
/// schedule, map each value through a `tanh` squashing function into
/// `[lo, hi]`, then verify order preservation — falling back to
/// `rank_based_normalize` on violation.
pub fn adaptive_distribution_normalize(values: &[f64], kind: MetricKind) -> Vec<f64> {
    if values.len() == 1 {
        return vec![0.5];
    }

    let (min, max) = min_max_raw(values);

    if kind == MetricKind::WaitingQueue && min >= 0.0 && max > 10.0 * min.max(f64::EPSILON) {
        let transformed: Vec<f64> = values.iter().map(|&x| (1.0 + x.max(0.0)).ln()).collect();
        return adaptive_distribution_core(&transformed, values, false);
    }

    adaptive_distribution_core(values, values, kind == MetricKind::CacheUsage)
}

fn adaptive_distribution_core(
    values_for_stats: &[f64],
    original_order: &[f64],
    cache_usage_case: bool,
) -> Vec<f64> {
    let (mean, stddev) = mean_and_stddev(values_for_stats);
    let cv = if mean.abs() > f64::EPSILON {
        stddev / mean.abs()
    } else {
        0.0
    };

    let (mut sensitivity, mut lo, mut hi) = adaptive_schedule(cv);
    if cache_usage_case && cv < 0.2 {
        sensitivity *= 1.5;
        lo = 0.35;
        hi = 0.65;
    }

    let mapped: Vec<f64> = if stddev.abs() < f64::EPSILON {
        vec![(lo + hi) / 2.0; values_for_stats.len()]
    } else {
        values_for_stats
            .iter()
            .map(|&x| {
                let z = sensitivity * (x - mean) / (2.0 * stddev);
                let unit = 0.5 * (1.0 + z.tanh());
                (lo + (hi - lo) * unit).clamp(0.0, 1.0)
            })
            .collect()
    };

    if preserves_order(original_order, &mapped) {
        mapped
    } else {
        rank_based_normalize(original_order, (lo, hi))
    }
}

fn preserves_order(input: &[f64], output: &[f64]) -> bool {
    let mut input_order: Vec<usize> = (0..input.len()).collect();
    input_order.sort_by(|&a, &b| input[a].partial_cmp(&input[b]).unwrap());
    let mut output_order: Vec<usize> = (0..output.len()).collect();
    output_order.sort_by(|&a, &b| output[a].partial_cmp(&output[b]).unwrap());
    input_order == output_order
}

/// Deterministic fallback guaranteeing monotonicity: the `k`-th smallest
/// input maps to the `k`-th point of an evenly-spaced partition of
/// `[lo, hi]`. Ties are broken by input order (stable sort).
pub fn rank_based_normalize(values: &[f64], (lo, hi): (f64, f64)) -> Vec<f64> {
    if values.len() == 1 {
        return vec![0.5];
    }
    let n = values.len();
    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| values[a].partial_cmp(&values[b]).unwrap());

    let mut ranks = vec![0usize; n];
    for (rank, &idx) in order.iter().enumerate() {
        ranks[idx] = rank;
    }

    ranks
        .iter()
        .map(|&rank| lo + (hi - lo) * (rank as f64) / ((n - 1) as f64))
        .collect()
}
