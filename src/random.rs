//! Uniform baseline: `m` distinct paths drawn without replacement, no learning.

use rand::rngs::StdRng;
use rand::seq::index::sample;
use rand::SeedableRng;

use crate::decision::{PolicyKind, Selection, SelectionNote};
use crate::error::Result;
use crate::metric::Metric;
use crate::policy::{check_feedback, check_m, PathPolicy};

/// Seedable uniform policy over `K` paths.
#[derive(Debug, Clone)]
pub struct RandomPolicy {
    k: usize,
    rng: StdRng,
}

impl RandomPolicy {
    pub fn with_seed(k: usize, seed: u64) -> Self {
        Self {
            k,
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl PathPolicy for RandomPolicy {
    /// Indices come back in ascending order.
    fn decide(&mut self, m: usize) -> Result<Selection> {
        check_m(m, self.k)?;
        let mut paths = sample(&mut self.rng, self.k, m).into_vec();
        paths.sort_unstable();
        let p = if self.k == 0 { 0.0 } else { m as f64 / self.k as f64 };
        Ok(Selection::new(PolicyKind::Random, paths)
            .with_probs(vec![p; self.k])
            .with_note(SelectionNote::Uniform))
    }

    fn update_state(&mut self, selected: &[usize], measurements: &[Metric]) -> Result<()> {
        check_feedback(self.k, selected, measurements)
    }

    fn name(&self) -> &'static str {
        "RANDOM"
    }

    fn info(&self) -> String {
        format!("RANDOM: K: {}", self.k)
    }

    fn kind(&self) -> PolicyKind {
        PolicyKind::Random
    }

    fn num_paths(&self) -> usize {
        self.k
    }
}
