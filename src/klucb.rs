//! KL-UCB for multiple plays.
//!
//! Each path `k` tracks its visit count `N_k` and cumulative bandwidth gain `G_k`. Its
//! index is the largest `q` with `KL(p, q) <= ln(n) / N_k`, where `p = G_k / N_k` and `n`
//! is the total visit count, found by a bounded Newton iteration. Unvisited paths have an
//! infinite index, so every path is tried before any is repeated.
//!
//! Two selection modes:
//! - **basic**: the `m` largest indices;
//! - **leader**: the `m - 1` paths with the best smoothed mean `(G + 1) / (N + 1)` plus the
//!   best-index path not already among them.

use crate::decision::{PolicyKind, Selection, SelectionNote};
use crate::error::Result;
use crate::metric::Metric;
use crate::policy::{check_feedback, check_m, PathPolicy};
use crate::utils::top_m_indices;

const DELTA: f64 = 1e-8;
const EPS: f64 = 1e-12;
const MAX_NEWTON_STEPS: usize = 20;

/// Bernoulli KL divergence `KL(p || q)`.
fn kl(p: f64, q: f64) -> f64 {
    p * (p / q).ln() + (1.0 - p) * ((1.0 - p) / (1.0 - q)).ln()
}

/// Derivative of `KL(p || q)` in `q`.
fn dkl(p: f64, q: f64) -> f64 {
    (q - p) / (q * (1.0 - q))
}

/// KL-UCB index of one path with `visits >= 1`, given total visit count `n`.
///
/// Non-decreasing in `n` for fixed `(gain, visits)`.
pub fn klucb_index(gain: f64, visits: u64, n: u64) -> f64 {
    if visits == 0 {
        return f64::INFINITY;
    }
    let budget = (n.max(1) as f64).ln() / visits as f64;
    let p = (gain / visits as f64).max(DELTA);
    if p >= 1.0 {
        return 1.0;
    }
    let mut q = p + DELTA;
    for _ in 0..MAX_NEWTON_STEPS {
        let f = budget - kl(p, q);
        if f * f < EPS {
            break;
        }
        let df = -dkl(p, q);
        q = (q - f / df).max(p + DELTA).min(1.0 - DELTA);
    }
    q
}

/// KL-UCB policy over `K` paths; deterministic (no RNG).
#[derive(Debug, Clone)]
pub struct KlUcb {
    visits: Vec<u64>,
    gains: Vec<f64>,
    leader: bool,
}

impl KlUcb {
    /// Basic mode: top-`m` indices.
    pub fn new(k: usize) -> Self {
        Self {
            visits: vec![0; k],
            gains: vec![0.0; k],
            leader: false,
        }
    }

    /// Leader mode: `m - 1` empirical leaders plus one index challenger.
    pub fn leader(k: usize) -> Self {
        Self {
            leader: true,
            ..Self::new(k)
        }
    }

    pub fn is_leader_mode(&self) -> bool {
        self.leader
    }

    pub fn visits(&self) -> &[u64] {
        &self.visits
    }

    pub fn gains(&self) -> &[f64] {
        &self.gains
    }

    /// Current index of every path.
    pub fn indices(&self) -> Vec<f64> {
        let n: u64 = self.visits.iter().sum();
        self.visits
            .iter()
            .zip(&self.gains)
            .map(|(&v, &g)| klucb_index(g, v, n))
            .collect()
    }
}

impl PathPolicy for KlUcb {
    fn decide(&mut self, m: usize) -> Result<Selection> {
        check_m(m, self.visits.len())?;
        let indices = self.indices();
        let unvisited = self.visits.iter().filter(|&&v| v == 0).count();
        if !self.leader || m == 0 {
            return Ok(Selection::new(PolicyKind::KlUcb, top_m_indices(&indices, m))
                .with_note(SelectionNote::IndexTopM { unvisited }));
        }

        let means: Vec<f64> = self
            .visits
            .iter()
            .zip(&self.gains)
            .map(|(&v, &g)| (g + 1.0) / (v as f64 + 1.0))
            .collect();
        let mut paths = top_m_indices(&means, m - 1);
        // m distinct candidates always leave one outside the m - 1 leaders.
        let challenger = top_m_indices(&indices, m)
            .into_iter()
            .find(|i| !paths.contains(i))
            .unwrap_or_default();
        paths.push(challenger);
        Ok(Selection::new(PolicyKind::KlUcb, paths)
            .with_note(SelectionNote::LeaderPlusChallenger { challenger }))
    }

    fn update_state(&mut self, selected: &[usize], measurements: &[Metric]) -> Result<()> {
        check_feedback(self.visits.len(), selected, measurements)?;
        for (&k, m) in selected.iter().zip(measurements) {
            self.visits[k] += 1;
            self.gains[k] += m.b;
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "KL-UCB"
    }

    fn info(&self) -> String {
        let mode = if self.leader { "leader" } else { "basic" };
        format!("KL-UCB: K: {}, mode: {mode}", self.visits.len())
    }

    fn kind(&self) -> PolicyKind {
        PolicyKind::KlUcb
    }

    fn num_paths(&self) -> usize {
        self.visits.len()
    }
}
