//! src/score_calculator.rs
//!
//! C2: for a pool and an active algorithm configuration, recompute a score
//! per member from that member's current metrics. Shares the normaliser
//! library (C1) and a small set of weight-adjustment helpers across the
//! whole algorithm family, rather than duplicating the formula per name.

use crate::errors::ScoreError;
use crate::normalization::{
    adaptive_distribution_normalize, min_max_normalize, min_max_normalize_eps,
    precise_cache_normalize, precise_running_normalize, ratio_based_normalize, smooth_normalize,
    MetricKind,
};
use crate::settings::ModeConfig;
use crate::types::Member;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Algorithm {
    S1,
    S1Enhanced,
    S1Adaptive,
    S1Ratio,
    S1Precise,
    S1Nonlinear,
    S1Balanced,
    S1AdaptiveDistribution,
    S1Advanced,
    S1DynamicWaiting,
    S2,
    S2Enhanced,
    S2Nonlinear,
    S2Adaptive,
    S2Advanced,
    S2DynamicWaiting,
}

impl Algorithm {
    pub fn parse(name: &str) -> Option<Self> {
        use Algorithm::*;
        Some(match name {
            "s1" => S1,
            "s1_enhanced" => S1Enhanced,
            "s1_adaptive" => S1Adaptive,
            "s1_ratio" => S1Ratio,
            "s1_precise" => S1Precise,
            "s1_nonlinear" => S1Nonlinear,
            "s1_balanced" => S1Balanced,
            "s1_adaptive_distribution" => S1AdaptiveDistribution,
            "s1_advanced" => S1Advanced,
            "s1_dynamic_waiting" => S1DynamicWaiting,
            "s2" => S2,
            "s2_enhanced" => S2Enhanced,
            "s2_nonlinear" => S2Nonlinear,
            "s2_adaptive" => S2Adaptive,
            "s2_advanced" => S2Advanced,
            "s2_dynamic_waiting" => S2DynamicWaiting,
            _ => return None,
        })
    }

    fn is_s2(self) -> bool {
        use Algorithm::*;
        matches!(
            self,
            S2 | S2Enhanced | S2Nonlinear | S2Adaptive | S2Advanced | S2DynamicWaiting
        )
    }
}

fn cv_of(values: &[f64]) -> f64 {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    if mean.abs() < f64::EPSILON {
        return 0.0;
    }
    let variance = values.iter().map(|&x| (x - mean).powi(2)).sum::<f64>() / n;
    variance.sqrt() / mean.abs()
}

/// Two-stage normalise-power-renormalise pipeline used by the `*_nonlinear`
/// algorithms: epsilon-stabilised min-max, raised to `power`, then
/// epsilon-stabilised min-max again so a single outlier doesn't dominate.
fn nonlinear_pipeline(values: &[f64], power: f64) -> Vec<f64> {
    let first = min_max_normalize_eps(values);
    let powered: Vec<f64> = first.iter().map(|&v| v.powf(power)).collect();
    min_max_normalize_eps(&powered)
}

/// Static weight rule: `w_a(1 - n_w) + w_b(1 - n_c) [+ w_g(1 - n_r)]`, clamped.
fn static_score(w_a: f64, w_b: f64, w_g: f64, n_w: f64, n_c: f64, n_r: Option<f64>) -> f64 {
    let mut score = w_a * (1.0 - n_w) + w_b * (1.0 - n_c);
    if let Some(n_r) = n_r {
        score += w_g * (1.0 - n_r);
    }
    score.clamp(0.0, 1.0)
}

/// Adaptive weight rule: renormalise by each metric's coefficient of
/// variation share, then rescale so the sum is unchanged. Falls back to the
/// static weights when every `cv_i` is zero.
fn adaptive_weights(weights: &[f64], cvs: &[f64]) -> Vec<f64> {
    let cv_sum: f64 = cvs.iter().sum();
    if cv_sum.abs() < f64::EPSILON {
        return weights.to_vec();
    }
    let original_sum: f64 = weights.iter().sum();
    let adjusted: Vec<f64> = weights
        .iter()
        .zip(cvs)
        .map(|(&w, &cv)| w * (1.0 + cv / cv_sum))
        .collect();
    let adjusted_sum: f64 = adjusted.iter().sum();
    if adjusted_sum.abs() < f64::EPSILON {
        return weights.to_vec();
    }
    adjusted
        .iter()
        .map(|&w| w * original_sum / adjusted_sum)
        .collect()
}

const MIN_A_FACTOR: f64 = 0.2;
const MAX_A_FACTOR: f64 = 2.5;
const MIN_B_FACTOR: f64 = 1.8;
const MAX_B_FACTOR: f64 = 0.3;
const MIN_G_FACTOR: f64 = 1.4;
const MAX_G_FACTOR: f64 = 0.6;

/// Dynamic-waiting weight rule: interpolate multipliers on the queueing
/// intensity `ι = tanh(M·steepness/transition_point)`, then rescale so the
/// weighted sum matches the original.
fn dynamic_waiting_weights(
    weights: &[f64],
    max_waiting: f64,
    steepness: f64,
    transition_point: f64,
) -> Vec<f64> {
    let transition_point = if transition_point.abs() < f64::EPSILON {
        1.0
    } else {
        transition_point
    };
    let intensity = (max_waiting * steepness / transition_point).tanh();

    let factor_a = MIN_A_FACTOR + (MAX_A_FACTOR - MIN_A_FACTOR) * intensity;
    let factor_b = MIN_B_FACTOR + (MAX_B_FACTOR - MIN_B_FACTOR) * intensity;

    let mut progressive = vec![weights[0] * factor_a, weights[1] * factor_b];
    if weights.len() == 3 {
        let factor_g = MIN_G_FACTOR + (MAX_G_FACTOR - MIN_G_FACTOR) * intensity;
        progressive.push(weights[2] * factor_g);
    }

    let original_sum: f64 = weights.iter().sum();
    let progressive_sum: f64 = progressive.iter().sum();
    if progressive_sum.abs() < f64::EPSILON {
        return weights.to_vec();
    }
    progressive
        .iter()
        .map(|&w| w * original_sum / progressive_sum)
        .collect()
}

/// Recompute scores for every member of `members` that has the metrics the
/// chosen algorithm requires; members missing a required metric keep their
/// previous score. An unsupported algorithm name fails the whole sweep
/// (scores left unchanged).
pub fn calculate_pool_scores(members: &mut [Member], mode: &ModeConfig) -> Result<(), ScoreError> {
    let algorithm = Algorithm::parse(&mode.name)
        .ok_or_else(|| ScoreError::UnsupportedAlgorithm(mode.name.clone()))?;

    let needs_running = algorithm.is_s2();
    let eligible: Vec<usize> = members
        .iter()
        .enumerate()
        .filter(|(_, m)| {
            if needs_running {
                m.metrics.has_s2_metrics()
            } else {
                m.metrics.has_s1_metrics()
            }
        })
        .map(|(i, _)| i)
        .collect();

    if eligible.is_empty() {
        return Ok(());
    }

    let waiting: Vec<f64> = eligible
        .iter()
        .map(|&i| members[i].metrics.waiting_queue.unwrap())
        .collect();
    let cache: Vec<f64> = eligible
        .iter()
        .map(|&i| members[i].metrics.cache_usage.unwrap())
        .collect();
    let running: Vec<f64> = if needs_running {
        eligible
            .iter()
            .map(|&i| members[i].metrics.running_req.unwrap())
            .collect()
    } else {
        Vec::new()
    };

    use Algorithm::*;
    let (n_w, n_c, n_r): (Vec<f64>, Vec<f64>, Option<Vec<f64>>) = match algorithm {
        S1 => (min_max_normalize(&waiting), cache.clone(), None),
        S1Enhanced => (
            min_max_normalize(&waiting),
            precise_cache_normalize(&cache),
            None,
        ),
        S1Adaptive => (min_max_normalize(&waiting), min_max_normalize(&cache), None),
        S1Ratio => (waiting.clone(), ratio_based_normalize(&cache), None),
        S1Precise => (waiting.clone(), cache.clone(), None),
        S1Nonlinear => (
            nonlinear_pipeline(&waiting, mode.power),
            nonlinear_pipeline(&cache, mode.power),
            None,
        ),
        S1Balanced => (smooth_normalize(&waiting), smooth_normalize(&cache), None),
        S1AdaptiveDistribution | S1Advanced | S1DynamicWaiting => (
            adaptive_distribution_normalize(&waiting, MetricKind::WaitingQueue),
            adaptive_distribution_normalize(&cache, MetricKind::CacheUsage),
            None,
        ),
        S2 => (
            min_max_normalize(&waiting),
            cache.clone(),
            Some(min_max_normalize(&running)),
        ),
        S2Enhanced => (
            min_max_normalize(&waiting),
            precise_cache_normalize(&cache),
            Some(precise_running_normalize(&running)),
        ),
        S2Nonlinear => (
            nonlinear_pipeline(&waiting, mode.power),
            nonlinear_pipeline(&cache, mode.power),
            Some(nonlinear_pipeline(&running, mode.power)),
        ),
        S2Adaptive => (
            min_max_normalize(&waiting),
            min_max_normalize(&cache),
            Some(min_max_normalize(&running)),
        ),
        S2Advanced | S2DynamicWaiting => (
            adaptive_distribution_normalize(&waiting, MetricKind::WaitingQueue),
            adaptive_distribution_normalize(&cache, MetricKind::CacheUsage),
            Some(adaptive_distribution_normalize(&running, MetricKind::Other)),
        ),
    };

    let static_weights = if needs_running {
        vec![mode.w_a, mode.w_b, mode.w_g]
    } else {
        vec![mode.w_a, mode.w_b]
    };

    let weights = match algorithm {
        S1Adaptive | S2Adaptive => {
            let mut cvs = vec![cv_of(&waiting), cv_of(&cache)];
            if needs_running {
                cvs.push(cv_of(&running));
            }
            adaptive_weights(&static_weights, &cvs)
        }
        S1Advanced | S2Advanced => {
            let mut cvs = vec![cv_of(&waiting), cv_of(&cache)];
            if needs_running {
                cvs.push(cv_of(&running));
            }
            adaptive_weights(&static_weights, &cvs)
        }
        S1DynamicWaiting | S2DynamicWaiting => {
            let max_waiting = waiting.iter().cloned().fold(f64::MIN, f64::max);
            dynamic_waiting_weights(&static_weights, max_waiting, mode.steepness, mode.transition_point)
        }
        _ => static_weights,
    };

    for (pos, &member_idx) in eligible.iter().enumerate() {
        let n_r_val = n_r.as_ref().map(|v| v[pos]);
        let score = static_score(weights[0], weights[1], *weights.get(2).unwrap_or(&0.0), n_w[pos], n_c[pos], n_r_val);
        members[member_idx].score = score;
    }

    Ok(())
}
