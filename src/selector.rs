//! src/selector.rs
//!
//! Weighted random selection over scored members (C3), plus the two
//! read-only diagnostics built on top of it (simulate / analyze).

use rand::Rng;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::str::FromStr;

use crate::types::Member;

/// Select one member with probability proportional to its `score`, or
/// `None` if every candidate is filtered out. Uses `Decimal` accumulation
/// (28 significant digits) to avoid the tail-member bias plain f64
/// cumulative summation exhibits under skewed weight vectors.
pub fn select<'a>(members: &'a [Member]) -> Option<&'a Member> {
    select_with_rng(members, &mut rand::thread_rng())
}

/// As `select`, but draws from the caller-supplied RNG rather than
/// `rand::thread_rng()` — lets tests run the same weighted-choice logic
/// deterministically against a seeded RNG.
pub fn select_with_rng<'a, R: Rng + ?Sized>(members: &'a [Member], rng: &mut R) -> Option<&'a Member> {
    let candidates: Vec<&Member> = members.iter().filter(|m| m.score > 0.0).collect();

    if candidates.is_empty() {
        return None;
    }
    if candidates.len() == 1 {
        return Some(candidates[0]);
    }

    select_weighted(&candidates, rng)
}

fn to_decimal(score: f64) -> Decimal {
    Decimal::from_str(&score.to_string()).unwrap_or(Decimal::ZERO)
}

fn select_weighted<'a, R: Rng + ?Sized>(candidates: &[&'a Member], rng: &mut R) -> Option<&'a Member> {
    let weights: Vec<Decimal> = candidates.iter().map(|m| to_decimal(m.score)).collect();
    let total: Decimal = weights.iter().sum();

    if total <= Decimal::ZERO {
        let idx = rng.gen_range(0..candidates.len());
        return Some(candidates[idx]);
    }

    let u: f64 = rng.gen_range(0.0..1.0);
    let point = to_decimal(u) * total;

    let mut cumulative = Decimal::ZERO;
    let last = candidates.len() - 1;
    for (i, &weight) in weights.iter().enumerate() {
        cumulative += weight;
        let in_range = if i == last {
            point <= cumulative
        } else {
            point < cumulative
        };
        if in_range {
            return Some(candidates[i]);
        }
    }

    candidates.last().copied()
}

/// Run `select` `iterations` times against `members` and return the
/// observed selection frequency per `"ip:port"` (diagnostic only — never
/// mutates the pool).
pub fn simulate(members: &[Member], iterations: u32) -> HashMap<String, f64> {
    let mut counts: HashMap<String, u32> = HashMap::new();
    for _ in 0..iterations {
        if let Some(m) = select(members) {
            *counts.entry(m.address()).or_insert(0) += 1;
        } else {
            *counts.entry("none".to_string()).or_insert(0) += 1;
        }
    }
    counts
        .into_iter()
        .map(|(k, v)| (k, v as f64 / iterations as f64))
        .collect()
}

#[derive(Debug, Clone)]
pub struct MemberAccuracy {
    pub address: String,
    pub theoretical: f64,
    pub observed: f64,
    pub deviation: f64,
}

#[derive(Debug, Clone)]
pub struct AccuracyReport {
    pub iterations: u32,
    pub members: Vec<MemberAccuracy>,
    pub max_deviation: f64,
    pub quality: &'static str,
}

/// As `simulate`, but also computes the theoretical frequency `score_i / W`
/// per member and an overall quality verdict.
pub fn analyze(members: &[Member], iterations: u32) -> AccuracyReport {
    let total_score: f64 = members.iter().filter(|m| m.score > 0.0).map(|m| m.score).sum();
    let observed = simulate(members, iterations);

    let mut report_members = Vec::new();
    let mut max_deviation: f64 = 0.0;

    for m in members.iter().filter(|m| m.score > 0.0) {
        let theoretical = if total_score > 0.0 {
            m.score / total_score
        } else {
            1.0 / members.iter().filter(|m| m.score > 0.0).count().max(1) as f64
        };
        let observed_freq = observed.get(&m.address()).copied().unwrap_or(0.0);
        let deviation = (theoretical - observed_freq).abs();
        max_deviation = max_deviation.max(deviation);

        report_members.push(MemberAccuracy {
            address: m.address(),
            theoretical,
            observed: observed_freq,
            deviation,
        });
    }

    let quality = if max_deviation < 0.02 { "good" } else { "skewed" };

    AccuracyReport {
        iterations,
        members: report_members,
        max_deviation,
        quality,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::IpAddr;

    fn member(ip: &str, port: u16, score: f64) -> Member {
        let mut m = Member::new(ip.parse::<IpAddr>().unwrap(), port);
        m.score = score;
        m
    }

    #[test]
    fn empty_candidate_list_returns_none() {
        assert!(select(&[]).is_none());
    }

    #[test]
    fn all_non_positive_scores_returns_none() {
        let members = vec![member("10.0.0.1", 1, 0.0), member("10.0.0.2", 2, -1.0)];
        assert!(select(&members).is_none());
    }

    #[test]
    fn single_valid_member_always_wins() {
        let members = vec![member("10.0.0.1", 1, 0.0), member("10.0.0.2", 2, 0.5)];
        for _ in 0..20 {
            let chosen = select(&members).unwrap();
            assert_eq!(chosen.port, 2);
        }
    }

    #[test]
    fn convergence_within_tolerance_at_1000_draws() {
        let members = vec![member("10.0.0.1", 1, 0.25), member("10.0.0.2", 2, 0.75)];
        let freqs = simulate(&members, 1000);
        let f1 = freqs.get("10.0.0.1:1").copied().unwrap_or(0.0);
        let f2 = freqs.get("10.0.0.2:2").copied().unwrap_or(0.0);
        assert!((f1 - 0.25).abs() < 0.05);
        assert!((f2 - 0.75).abs() < 0.05);
    }

    #[test]
    fn zero_total_weight_falls_back_to_uniform() {
        // Scores must stay within (0, inf) to pass the initial filter but
        // total could still legitimately be zero only if all are <=0, which
        // is covered above; this test instead checks the uniform branch is
        // reachable code-path-wise via a vector of tiny equal positive scores.
        let members = vec![member("10.0.0.1", 1, 1e-300), member("10.0.0.2", 2, 1e-300)];
        let freqs = simulate(&members, 200);
        assert!(freqs.len() <= 2);
    }

    #[test]
    fn convergence_holds_across_seeded_trials() {
        use rand::SeedableRng;
        use rand::rngs::StdRng;

        let members = vec![member("10.0.0.1", 1, 0.1), member("10.0.0.2", 2, 0.3), member("10.0.0.3", 3, 0.6)];
        let weights = [0.1, 0.3, 0.6];

        for seed in 0u64..8 {
            let mut rng = StdRng::seed_from_u64(seed);
            let mut counts = [0u32; 3];
            let draws = 20_000;
            for _ in 0..draws {
                let chosen = select_with_rng(&members, &mut rng).unwrap();
                counts[(chosen.port - 1) as usize] += 1;
            }
            for (i, &w) in weights.iter().enumerate() {
                let observed = counts[i] as f64 / draws as f64;
                assert!(
                    (observed - w).abs() < 0.02,
                    "seed {seed}: member {i} expected ~{w}, observed {observed}"
                );
            }
        }
    }

    #[test]
    fn three_way_split_e6() {
        let members = vec![
            member("10.0.0.1", 1, 0.25),
            member("10.0.0.2", 2, 0.25),
            member("10.0.0.3", 3, 0.50),
        ];
        let freqs = simulate(&members, 10_000);
        assert!((freqs.get("10.0.0.1:1").copied().unwrap_or(0.0) - 0.25).abs() < 0.01);
        assert!((freqs.get("10.0.0.2:2").copied().unwrap_or(0.0) - 0.25).abs() < 0.01);
        assert!((freqs.get("10.0.0.3:3").copied().unwrap_or(0.0) - 0.50).abs() < 0.01);
    }
}
