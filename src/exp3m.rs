//! EXP3.M (adversarial bandit with multiple plays) for path selection.
//!
//! Per-path weights `w_i` define per-path inclusion probabilities
//!
//! ```text
//!   p_i = m * ((1 - gamma) * w'_i / sum(w') + gamma / K)
//! ```
//!
//! where `w'` caps the heaviest weights at `alpha_t` so no `p_i` exceeds one (the capped
//! paths form the set `S0`). The probabilities sum to `m` and are dependent-rounded into
//! an `m`-subset. After the round, uncapped selected paths grow their weight by
//! `exp(m * gamma * (b / p_i) / K)`, an importance-weighted bandwidth reward.
//!
//! The policy is **seedable**; rounding is the only randomness.

use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::decision::{PolicyKind, Selection, SelectionNote};
use crate::error::{Error, Result};
use crate::metric::Metric;
use crate::policy::{check_feedback, check_m, PathPolicy};
use crate::rounding::dependent_rounding;

/// Weights are rescaled once the largest exceeds this.
const RENORMALIZE_ABOVE: f64 = 1e100;

/// Weights never drop below this, so weight ratios stay within normal `f64` range.
const MIN_WEIGHT: f64 = 1e-100;

/// Find the cap `alpha` for weights sorted in descending order.
///
/// `rhs = (1/m - gamma/K) / (1 - gamma)`: the share of the total a single capped path
/// may take. At most `m - 1` paths are ever capped.
fn capping_threshold(rhs: f64, sorted_desc: &[f64], m: usize) -> Result<f64> {
    // suffix[k] = sum(sorted_desc[k..]), accumulated from the smallest weight up.
    let mut suffix = vec![0.0; sorted_desc.len() + 1];
    for k in (0..sorted_desc.len()).rev() {
        suffix[k] = suffix[k + 1] + sorted_desc[k];
    }
    for k in 0..m.min(sorted_desc.len()) {
        let denom = 1.0 - k as f64 * rhs;
        if denom <= 0.0 {
            break;
        }
        let alpha = rhs * suffix[k] / denom;
        if alpha > sorted_desc[k] {
            return Ok(alpha);
        }
    }
    Err(Error::Exp3AlphaNotFound)
}

/// Seedable EXP3.M policy over `K` paths.
#[derive(Debug, Clone)]
pub struct Exp3M {
    gamma: f64,
    weights: Vec<f64>,
    probs: Vec<f64>,
    // None when S0 was empty at the last decision.
    alpha_t: Option<f64>,
    rng: StdRng,
}

impl Exp3M {
    /// `gamma` is the exploration rate and must lie in `(0, 1)`.
    pub fn with_seed(k: usize, gamma: f64, seed: u64) -> Result<Self> {
        if !(gamma > 0.0 && gamma < 1.0) {
            return Err(Error::InvalidParameter {
                name: "gamma",
                value: gamma.to_string(),
            });
        }
        Ok(Self {
            gamma,
            weights: vec![1.0; k],
            probs: vec![1.0; k],
            alpha_t: None,
            rng: StdRng::seed_from_u64(seed),
        })
    }

    pub fn gamma(&self) -> f64 {
        self.gamma
    }

    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    /// Inclusion probabilities of the last decision.
    pub fn probabilities(&self) -> &[f64] {
        &self.probs
    }

    /// Cap of the last decision (`None`: nothing was capped).
    pub fn alpha_t(&self) -> Option<f64> {
        self.alpha_t
    }

    /// Compute `p` for `m` plays from the current weights (updates `alpha_t`).
    fn recompute_probs(&mut self, m: usize) -> Result<()> {
        let k = self.weights.len();
        let kf = k as f64;
        let mf = m as f64;
        let g = self.gamma;
        let wsum: f64 = self.weights.iter().sum();
        let mut sorted = self.weights.clone();
        sorted.sort_by(|a, b| b.total_cmp(a));

        let rhs = (1.0 / mf - g / kf) / (1.0 - g);
        let capped: Vec<f64> = if sorted[0] >= rhs * wsum {
            let alpha = capping_threshold(rhs, &sorted, m)?;
            self.alpha_t = Some(alpha);
            self.weights.iter().map(|&w| w.min(alpha)).collect()
        } else {
            self.alpha_t = None;
            self.weights.clone()
        };
        let csum: f64 = capped.iter().sum();
        self.probs = capped
            .iter()
            .map(|&w| (mf * ((1.0 - g) * w / csum + g / kf)).min(1.0))
            .collect();
        Ok(())
    }

    /// Apply per-path log-growth `exponents` in the log domain: rescale when the largest
    /// weight would exceed [`RENORMALIZE_ABOVE`], then floor at [`MIN_WEIGHT`].
    fn grow(&mut self, exponents: &[f64]) {
        let logs: Vec<f64> = self
            .weights
            .iter()
            .zip(exponents)
            .map(|(&w, &e)| w.ln() + e)
            .collect();
        let max = logs.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let rescale = max > RENORMALIZE_ABOVE.ln();
        let shift = if rescale { max } else { 0.0 };
        for ((w, l), &e) in self.weights.iter_mut().zip(logs).zip(exponents) {
            if rescale || e != 0.0 {
                *w = (l - shift).exp().max(MIN_WEIGHT);
            }
        }
    }
}

impl PathPolicy for Exp3M {
    fn decide(&mut self, m: usize) -> Result<Selection> {
        let k = self.weights.len();
        check_m(m, k)?;
        if m == k {
            self.alpha_t = None;
            self.probs = vec![1.0; k];
            return Ok(Selection::new(PolicyKind::Exp3M, (0..k).collect())
                .with_probs(self.probs.clone())
                .with_note(SelectionNote::AllPaths));
        }
        if m == 0 {
            return Ok(Selection::new(PolicyKind::Exp3M, Vec::new()));
        }
        self.recompute_probs(m)?;
        let paths = dependent_rounding(m, &self.probs, &mut self.rng)?;
        let mut sel = Selection::new(PolicyKind::Exp3M, paths).with_probs(self.probs.clone());
        if let Some(alpha) = self.alpha_t {
            sel = sel.with_note(SelectionNote::CappedWeights { alpha });
        }
        Ok(sel)
    }

    /// Only paths outside the capped set `S0` learn (every path when `S0` is empty).
    fn update_state(&mut self, selected: &[usize], measurements: &[Metric]) -> Result<()> {
        check_feedback(self.weights.len(), selected, measurements)?;
        let l = selected.len() as f64;
        let kf = self.weights.len() as f64;
        let mut exponents = vec![0.0; self.weights.len()];
        for (&k, m) in selected.iter().zip(measurements) {
            let uncapped = self.alpha_t.is_none_or(|alpha| self.weights[k] < alpha);
            let p = self.probs[k];
            if uncapped && p > 0.0 && m.b.is_finite() {
                exponents[k] = l * self.gamma * (m.b / p) / kf;
            }
        }
        self.grow(&exponents);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "EXP3M"
    }

    fn info(&self) -> String {
        format!("Exp3M with gamma={:.6}", self.gamma)
    }

    fn kind(&self) -> PolicyKind {
        PolicyKind::Exp3M
    }

    fn num_paths(&self) -> usize {
        self.weights.len()
    }
}
