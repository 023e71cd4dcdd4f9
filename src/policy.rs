//! Unified `PathPolicy` trait for the stateful path-selection policies.
//!
//! Every policy shares the same protocol, run once per round:
//! `decide(m) -> Selection`, then `update_state(selected, measurements)` with the
//! measurements of exactly the selected paths, in the same order.
//!
//! `decide` may only advance the policy's own RNG; all learning happens in the update
//! methods. The damped and averaged pairs are optional: the provided defaults fall back
//! to the vanilla pair, and only the ConMPTS family overrides them.

use crate::config::SimulationConfig;
use crate::conmpts::{ConMpts, Constraint};
use crate::decision::{PolicyKind, Selection};
use crate::error::{ensure_same_len, Error, Result};
use crate::exp3m::Exp3M;
use crate::klucb::KlUcb;
use crate::metric::Metric;
use crate::mpts::Mpts;
use crate::random::RandomPolicy;
use crate::seed::SeedSequence;
use crate::utils::top_m_indices;

/// Common interface for path-selection policies over `K` fixed paths.
///
/// # Example
///
/// ```rust
/// use pathbandit::{Metric, PathPolicy, RandomPolicy};
///
/// fn run_round<P: PathPolicy + ?Sized>(policy: &mut P, m: usize) -> pathbandit::Result<()> {
///     let sel = policy.decide(m)?;
///     let obs = vec![Metric::new(0.1, 0.9, 0.0); sel.paths.len()];
///     policy.update_state(&sel.paths, &obs)
/// }
///
/// let mut random = RandomPolicy::with_seed(3, 7);
/// run_round(&mut random, 2).unwrap();
/// ```
pub trait PathPolicy {
    /// Choose `m` distinct paths for this round.
    ///
    /// Fails with [`Error::TooManyPaths`] when `m > K`.
    fn decide(&mut self, m: usize) -> Result<Selection>;

    /// Convenience: the path indices of [`PathPolicy::decide`].
    fn select_next_paths(&mut self, m: usize) -> Result<Vec<usize>> {
        Ok(self.decide(m)?.paths)
    }

    /// Learn from this round's measurements of the selected paths.
    fn update_state(&mut self, selected: &[usize], measurements: &[Metric]) -> Result<()>;

    /// Update with exponential forgetting.
    fn update_state_damped(&mut self, selected: &[usize], measurements: &[Metric]) -> Result<()> {
        self.update_state(selected, measurements)
    }

    /// Decide from running averages instead of posterior samples.
    fn decide_avg(&mut self, m: usize) -> Result<Selection> {
        self.decide(m)
    }

    /// Update the running averages used by [`PathPolicy::decide_avg`].
    fn update_state_avg(&mut self, selected: &[usize], measurements: &[Metric]) -> Result<()> {
        self.update_state(selected, measurements)
    }

    /// Short stable name (log headers).
    fn name(&self) -> &'static str;

    /// Name plus parameters.
    fn info(&self) -> String;

    fn kind(&self) -> PolicyKind;

    /// Number of paths `K` this policy was built for.
    fn num_paths(&self) -> usize;

    /// Best achievable per-round value given true mean metrics.
    ///
    /// Unconstrained policies use the sum of the `m` highest mean bandwidths; the
    /// constrained family overrides this with its LP optimum. `None` when no oracle exists.
    fn oracle(&self, means: &[Metric], m: usize) -> Option<f64> {
        if m > means.len() {
            return None;
        }
        let bw: Vec<f64> = means.iter().map(|x| x.b).collect();
        Some(top_m_indices(&bw, m).iter().map(|&i| bw[i]).sum())
    }
}

/// Fail fast when more paths are requested than exist.
pub fn check_m(m: usize, k: usize) -> Result<()> {
    if m > k {
        Err(Error::TooManyPaths { m, k })
    } else {
        Ok(())
    }
}

/// Validate the `(selected, measurements)` pair handed to an update method.
pub(crate) fn check_feedback(k: usize, selected: &[usize], measurements: &[Metric]) -> Result<()> {
    ensure_same_len(selected.len(), measurements.len())?;
    if let Some(&index) = selected.iter().find(|&&i| i >= k) {
        return Err(Error::IndexOutOfRange { index, len: k });
    }
    Ok(())
}

/// Build one policy of `kind` over `k` paths.
pub fn build_policy(
    kind: PolicyKind,
    k: usize,
    cfg: &SimulationConfig,
    seed: u64,
) -> Result<Box<dyn PathPolicy>> {
    let policy: Box<dyn PathPolicy> = match kind {
        PolicyKind::ConMptsLatency => Box::new(ConMpts::with_seed(
            Constraint::Latency,
            k,
            cfg.threshold,
            cfg.damping,
            seed,
        )?),
        PolicyKind::ConMptsLoss => Box::new(ConMpts::with_seed(
            Constraint::Loss,
            k,
            cfg.threshold,
            cfg.damping,
            seed,
        )?),
        PolicyKind::ConMptsBandwidth => Box::new(ConMpts::with_seed(
            Constraint::Bandwidth,
            k,
            cfg.threshold,
            cfg.damping,
            seed,
        )?),
        PolicyKind::Mpts => Box::new(Mpts::with_seed(k, seed)),
        PolicyKind::KlUcb if cfg.klucb_leader => Box::new(KlUcb::leader(k)),
        PolicyKind::KlUcb => Box::new(KlUcb::new(k)),
        PolicyKind::Exp3M => Box::new(Exp3M::with_seed(k, cfg.gamma, seed)?),
        PolicyKind::Random => Box::new(RandomPolicy::with_seed(k, seed)),
    };
    Ok(policy)
}

/// Build the policies of a run; the `i`-th gets the seed `("policy", i)` of `seeds`.
pub fn build_policies(
    kinds: &[PolicyKind],
    k: usize,
    cfg: &SimulationConfig,
    seeds: &SeedSequence,
) -> Result<Vec<Box<dyn PathPolicy>>> {
    kinds
        .iter()
        .enumerate()
        .map(|(i, &kind)| build_policy(kind, k, cfg, seeds.seed_for("policy", i)))
        .collect()
}
