//! Multiple-play Thompson sampling (MP-TS).
//!
//! Each path keeps an independent Beta posterior over "bandwidth is high". Every round
//! one sample is drawn per path and the `m` largest samples win. There is no joint
//! constraint; see [`crate::ConMpts`] for the constrained family.
//!
//! Notes:
//! - The policy is **seedable** so selection is reproducible in tests.
//! - Feedback is binarized: a measured bandwidth above `0.5` counts as a success.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Beta, Distribution};

use crate::decision::{PolicyKind, Selection, SelectionNote};
use crate::error::Result;
use crate::metric::Metric;
use crate::policy::{check_feedback, check_m, PathPolicy};
use crate::utils::top_m_indices;

/// Beta posterior state for one path.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BetaArm {
    pub alpha: f64,
    pub beta: f64,
    pub uses: u64,
}

impl Default for BetaArm {
    fn default() -> Self {
        Self {
            alpha: 1.0,
            beta: 1.0,
            uses: 0,
        }
    }
}

impl BetaArm {
    pub fn expected_value(&self) -> f64 {
        let denom = self.alpha + self.beta;
        if denom <= 0.0 {
            0.5
        } else {
            self.alpha / denom
        }
    }

    /// Count one binary outcome.
    pub fn observe(&mut self, success: bool) {
        if success {
            self.alpha += 1.0;
        } else {
            self.beta += 1.0;
        }
        self.uses = self.uses.saturating_add(1);
    }
}

/// Draw from `Beta(alpha, beta)`; degenerate parameters yield the uninformed `0.5`.
pub(crate) fn sample_beta<R: Rng + ?Sized>(rng: &mut R, alpha: f64, beta: f64) -> f64 {
    if !(alpha.is_finite() && beta.is_finite()) || alpha <= 0.0 || beta <= 0.0 {
        return 0.5;
    }
    match Beta::new(alpha, beta) {
        Ok(dist) => dist.sample(rng),
        Err(_) => 0.5,
    }
}

/// Seedable MP-TS policy over `K` paths.
#[derive(Debug, Clone)]
pub struct Mpts {
    arms: Vec<BetaArm>,
    rng: StdRng,
}

impl Mpts {
    /// Uniform `Beta(1, 1)` priors on every path.
    pub fn with_seed(k: usize, seed: u64) -> Self {
        Self::with_prior(k, 1.0, 1.0, seed)
    }

    /// Custom prior; non-positive or non-finite values are replaced by `1`.
    pub fn with_prior(k: usize, alpha0: f64, beta0: f64, seed: u64) -> Self {
        let fix = |x: f64| if x.is_finite() && x > 0.0 { x } else { 1.0 };
        let arm = BetaArm {
            alpha: fix(alpha0),
            beta: fix(beta0),
            uses: 0,
        };
        Self {
            arms: vec![arm; k],
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Per-path posterior state.
    pub fn arms(&self) -> &[BetaArm] {
        &self.arms
    }
}

impl PathPolicy for Mpts {
    fn decide(&mut self, m: usize) -> Result<Selection> {
        check_m(m, self.arms.len())?;
        let thetas: Vec<f64> = self
            .arms
            .iter()
            .map(|a| sample_beta(&mut self.rng, a.alpha, a.beta))
            .collect();
        Ok(Selection::new(PolicyKind::Mpts, top_m_indices(&thetas, m))
            .with_note(SelectionNote::SampledPosteriorTopM))
    }

    fn update_state(&mut self, selected: &[usize], measurements: &[Metric]) -> Result<()> {
        check_feedback(self.arms.len(), selected, measurements)?;
        for (&k, m) in selected.iter().zip(measurements) {
            self.arms[k].observe(m.b > 0.5);
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "MP-TS"
    }

    fn info(&self) -> String {
        format!("MP-TS: K: {}", self.arms.len())
    }

    fn kind(&self) -> PolicyKind {
        PolicyKind::Mpts
    }

    fn num_paths(&self) -> usize {
        self.arms.len()
    }
}
