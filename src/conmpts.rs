//! Constrained multiple-play Thompson sampling (ConMPTS).
//!
//! Each path keeps two Beta posteriors: one over bandwidth and one over the
//! constrained "cost" signal (latency or loss). A round:
//!
//! 1. samples `hat_b[i]` and `hat_c[i]` per path,
//! 2. solves the LP relaxation for the configured [`Constraint`],
//! 3. dependent-rounds the fractional optimum into exactly `m` paths.
//!
//! If the LP fails (or rounding rejects its output) the `m` paths with the lowest
//! sampled cost are chosen instead, so a round never comes back short.
//!
//! LP shapes (`x` in `[0, 1]^K`, last row is the equality `sum x = m`):
//!
//! ```text
//!   Latency:    max  b'x   s.t.  r_i x_i <= th   (one row per path)
//!   Loss:       max  b'x   s.t.  l'x <= th
//!   Bandwidth:  min  u     s.t.  r_i x_i - u <= 0,  b'x >= th   (variables (u, x))
//! ```
//!
//! Feedback is binarized per signal: a measured value `v` becomes a Bernoulli(`v`)
//! outcome, which is then counted as a success or a failure.

use std::fmt;

use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::debug;

use crate::decision::{PolicyKind, Selection, SelectionNote};
use crate::error::{ensure_same_len, Error, Result};
use crate::lp::{LinearProgram, LpStatus, Matrix};
use crate::metric::Metric;
use crate::mpts::{sample_beta, BetaArm};
use crate::policy::{check_feedback, check_m, PathPolicy};
use crate::rounding::dependent_rounding;
use crate::utils::{bernoulli_trial, bottom_m_indices, dot};

/// Which resource the LP bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Constraint {
    /// Per-path latency share `r_i x_i` capped by the threshold; bandwidth maximized.
    Latency,
    /// Total bandwidth at least the threshold; the largest latency share minimized.
    Bandwidth,
    /// Total loss `l'x` capped by the threshold; bandwidth maximized.
    Loss,
}

impl Constraint {
    /// The signal the constraint is expressed over (and the fallback ranks by).
    fn cost_of(self, m: &Metric) -> f64 {
        match self {
            Constraint::Latency | Constraint::Bandwidth => m.r,
            Constraint::Loss => m.l,
        }
    }

    fn kind(self) -> PolicyKind {
        match self {
            Constraint::Latency => PolicyKind::ConMptsLatency,
            Constraint::Bandwidth => PolicyKind::ConMptsBandwidth,
            Constraint::Loss => PolicyKind::ConMptsLoss,
        }
    }
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Constraint::Latency => "latency",
            Constraint::Bandwidth => "bandwidth",
            Constraint::Loss => "loss",
        })
    }
}

/// `max b'x  s.t.  r_i x_i <= cap, sum x = m`.
pub fn latency_program(r: &[f64], b: &[f64], m: usize, cap: f64) -> Result<LinearProgram> {
    ensure_same_len(r.len(), b.len())?;
    let k = r.len();
    let mut a = Matrix::zeros(k + 1, k);
    for (i, &ri) in r.iter().enumerate() {
        a[(i, i)] = ri;
    }
    a.set_row(k, &vec![1.0; k])?;
    Ok(LinearProgram::new(a, vec![cap; k], b.to_vec(), m as f64)?.maximize())
}

/// `max b'x  s.t.  l'x <= cap, sum x = m`.
pub fn loss_program(l: &[f64], b: &[f64], m: usize, cap: f64) -> Result<LinearProgram> {
    ensure_same_len(l.len(), b.len())?;
    let k = l.len();
    let mut a = Matrix::zeros(2, k);
    a.set_row(0, l)?;
    a.set_row(1, &vec![1.0; k])?;
    Ok(LinearProgram::new(a, vec![cap], b.to_vec(), m as f64)?.maximize())
}

/// `min u  s.t.  r_i x_i - u <= 0, b'x >= floor, sum x = m` over `(u, x)`.
///
/// Column `0` is `u`; the path shares are columns `1..=K`.
pub fn bandwidth_program(r: &[f64], b: &[f64], m: usize, floor: f64) -> Result<LinearProgram> {
    ensure_same_len(r.len(), b.len())?;
    let k = r.len();
    let mut a = Matrix::zeros(k + 2, k + 1);
    for (i, &ri) in r.iter().enumerate() {
        a[(i, 0)] = -1.0;
        a[(i, i + 1)] = ri;
    }
    // b'x >= floor as -b'x <= -floor.
    for (i, &bi) in b.iter().enumerate() {
        a[(k, i + 1)] = -bi;
    }
    for j in 1..=k {
        a[(k + 1, j)] = 1.0;
    }
    let mut rhs = vec![0.0; k + 1];
    rhs[k] = -floor;
    let mut c = vec![0.0; k + 1];
    c[0] = 1.0;
    Ok(LinearProgram::new(a, rhs, c, m as f64)?.minimize())
}

type LpOutcome = std::result::Result<(Vec<f64>, f64), String>;

/// Constrained Thompson sampling over `K` paths.
#[derive(Debug, Clone)]
pub struct ConMpts {
    constraint: Constraint,
    threshold: f64,
    damping: f64,
    bandwidth: Vec<BetaArm>,
    cost: Vec<BetaArm>,
    avg_bandwidth: Vec<f64>,
    avg_cost: Vec<f64>,
    selected_times: Vec<u64>,
    rng: StdRng,
}

impl ConMpts {
    /// `threshold` is the LP bound; `damping` in `[0, 1)` is the forgetting rate of
    /// [`PathPolicy::update_state_damped`].
    pub fn with_seed(
        constraint: Constraint,
        k: usize,
        threshold: f64,
        damping: f64,
        seed: u64,
    ) -> Result<Self> {
        if !threshold.is_finite() {
            return Err(Error::InvalidParameter {
                name: "threshold",
                value: threshold.to_string(),
            });
        }
        if !(0.0..1.0).contains(&damping) {
            return Err(Error::InvalidParameter {
                name: "damping",
                value: damping.to_string(),
            });
        }
        Ok(Self {
            constraint,
            threshold,
            damping,
            bandwidth: vec![BetaArm::default(); k],
            cost: vec![BetaArm::default(); k],
            avg_bandwidth: vec![0.5; k],
            avg_cost: vec![0.5; k],
            selected_times: vec![0; k],
            rng: StdRng::seed_from_u64(seed),
        })
    }

    pub fn constraint(&self) -> Constraint {
        self.constraint
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Bandwidth posteriors, one per path.
    pub fn bandwidth_arms(&self) -> &[BetaArm] {
        &self.bandwidth
    }

    /// Posteriors of the constrained signal (latency or loss), one per path.
    pub fn cost_arms(&self) -> &[BetaArm] {
        &self.cost
    }

    /// Running means used by the averaged mode: `(bandwidth, cost)`.
    pub fn averages(&self) -> (&[f64], &[f64]) {
        (&self.avg_bandwidth, &self.avg_cost)
    }

    fn program(&self, cost: &[f64], bw: &[f64], m: usize) -> Result<LinearProgram> {
        match self.constraint {
            Constraint::Latency => latency_program(cost, bw, m, self.threshold),
            Constraint::Loss => loss_program(cost, bw, m, self.threshold),
            Constraint::Bandwidth => bandwidth_program(cost, bw, m, self.threshold),
        }
    }

    /// Solve the LP. The inner value is the per-path shares and the objective, or the
    /// engine's failure reason.
    fn solve(&self, cost: &[f64], bw: &[f64], m: usize) -> Result<LpOutcome> {
        let lp = self.program(cost, bw, m)?;
        Ok(match lp.solve() {
            LpStatus::Feasible { mut x, objective } => {
                if self.constraint == Constraint::Bandwidth {
                    x.remove(0);
                }
                Ok((x, objective))
            }
            LpStatus::Failed { reason } => Err(reason),
        })
    }

    fn decide_from(
        &mut self,
        cost: &[f64],
        bw: &[f64],
        m: usize,
        source: SelectionNote,
    ) -> Result<Selection> {
        let kind = self.constraint.kind();
        let fallback = |note: SelectionNote| {
            Selection::new(kind, bottom_m_indices(cost, m))
                .with_note(source.clone())
                .with_note(note)
        };
        match self.solve(cost, bw, m)? {
            Ok((x, objective)) => match dependent_rounding(m, &x, &mut self.rng) {
                Ok(paths) => Ok(Selection::new(kind, paths)
                    .with_probs(x)
                    .with_note(source.clone())
                    .with_note(SelectionNote::LpFeasible { objective })),
                Err(e) => {
                    debug!(policy = %kind, error = %e, "rounding rejected lp output; using fallback");
                    Ok(fallback(SelectionNote::RoundingFallback {
                        reason: e.to_string(),
                    }))
                }
            },
            Err(reason) => {
                debug!(policy = %kind, %reason, "lp failed; using lowest-cost fallback");
                Ok(fallback(SelectionNote::LpFallback { reason }))
            }
        }
    }

    /// Bernoulli outcomes `(bandwidth, cost)` for one measurement.
    fn binarize(&mut self, m: &Metric) -> (bool, bool) {
        let tb = bernoulli_trial(&mut self.rng, m.b);
        let tc = bernoulli_trial(&mut self.rng, self.constraint.cost_of(m));
        (tb, tc)
    }
}

fn damp_observe(arm: &mut BetaArm, success: bool, memory: f64) {
    if success {
        arm.alpha = (memory * (arm.alpha + 1.0)).max(1.0);
    } else {
        arm.beta = (memory * (arm.beta + 1.0)).max(1.0);
    }
    arm.uses = arm.uses.saturating_add(1);
}

fn damp_forget(arm: &mut BetaArm, memory: f64) {
    arm.alpha = (memory * arm.alpha).max(1.0);
    arm.beta = (memory * arm.beta).max(1.0);
}

impl PathPolicy for ConMpts {
    fn decide(&mut self, m: usize) -> Result<Selection> {
        check_m(m, self.bandwidth.len())?;
        let k = self.bandwidth.len();
        let mut hat_b = Vec::with_capacity(k);
        let mut hat_c = Vec::with_capacity(k);
        for i in 0..k {
            hat_b.push(sample_beta(&mut self.rng, self.bandwidth[i].alpha, self.bandwidth[i].beta));
            hat_c.push(sample_beta(&mut self.rng, self.cost[i].alpha, self.cost[i].beta));
        }
        self.decide_from(&hat_c, &hat_b, m, SelectionNote::SampledPosteriorTopM)
    }

    fn update_state(&mut self, selected: &[usize], measurements: &[Metric]) -> Result<()> {
        check_feedback(self.bandwidth.len(), selected, measurements)?;
        for (&k, m) in selected.iter().zip(measurements) {
            let (tb, tc) = self.binarize(m);
            self.bandwidth[k].observe(tb);
            self.cost[k].observe(tc);
        }
        Ok(())
    }

    /// Selected paths count their outcome with memory `1 - damping`; every other path
    /// forgets. Pseudo-counts never drop below the uniform prior.
    fn update_state_damped(&mut self, selected: &[usize], measurements: &[Metric]) -> Result<()> {
        check_feedback(self.bandwidth.len(), selected, measurements)?;
        let memory = 1.0 - self.damping;
        let mut touched = vec![false; self.bandwidth.len()];
        for (&k, m) in selected.iter().zip(measurements) {
            let (tb, tc) = self.binarize(m);
            damp_observe(&mut self.bandwidth[k], tb, memory);
            damp_observe(&mut self.cost[k], tc, memory);
            touched[k] = true;
        }
        for (j, seen) in touched.into_iter().enumerate() {
            if !seen {
                damp_forget(&mut self.bandwidth[j], memory);
                damp_forget(&mut self.cost[j], memory);
            }
        }
        Ok(())
    }

    fn decide_avg(&mut self, m: usize) -> Result<Selection> {
        check_m(m, self.bandwidth.len())?;
        let cost = self.avg_cost.clone();
        let bw = self.avg_bandwidth.clone();
        self.decide_from(&cost, &bw, m, SelectionNote::AveragedEstimates)
    }

    fn update_state_avg(&mut self, selected: &[usize], measurements: &[Metric]) -> Result<()> {
        check_feedback(self.bandwidth.len(), selected, measurements)?;
        for (&k, m) in selected.iter().zip(measurements) {
            let n = self.selected_times[k] as f64;
            self.avg_bandwidth[k] = (n * self.avg_bandwidth[k] + m.b) / (n + 1.0);
            self.avg_cost[k] = (n * self.avg_cost[k] + self.constraint.cost_of(m)) / (n + 1.0);
            self.selected_times[k] += 1;
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        match self.constraint {
            Constraint::Latency => "ConMPTSLatency",
            Constraint::Bandwidth => "ConMPTSBandwidth",
            Constraint::Loss => "ConMPTSLoss",
        }
    }

    fn info(&self) -> String {
        format!(
            "{}: K: {}, th: {:.6}, damping: {:.6}",
            self.name(),
            self.bandwidth.len(),
            self.threshold,
            self.damping
        )
    }

    fn kind(&self) -> PolicyKind {
        self.constraint.kind()
    }

    fn num_paths(&self) -> usize {
        self.bandwidth.len()
    }

    /// Latency / Loss: bandwidth of the LP optimum on the true means.
    /// Bandwidth: the optimal largest latency share `u`, so that policy's regret
    /// subtracts a bandwidth reward from a latency-unit oracle.
    fn oracle(&self, means: &[Metric], m: usize) -> Option<f64> {
        if m > means.len() {
            return None;
        }
        let bw: Vec<f64> = means.iter().map(|x| x.b).collect();
        let cost: Vec<f64> = means.iter().map(|x| self.constraint.cost_of(x)).collect();
        let (x, objective) = self.solve(&cost, &bw, m).ok()?.ok()?;
        match self.constraint {
            Constraint::Bandwidth => Some(objective),
            Constraint::Latency | Constraint::Loss => dot(&x, &bw).ok(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    fn scenario_means() -> [Metric; 3] {
        [
            Metric::new(0.2, 0.8, 0.0),
            Metric::new(0.5, 0.5, 0.1),
            Metric::new(0.9, 0.2, 0.3),
        ]
    }

    #[test]
    fn lp_shapes_have_expected_dimensions() {
        let r = [0.2, 0.5, 0.9];
        let b = [0.8, 0.5, 0.2];
        let lat = latency_program(&r, &b, 2, 0.4).unwrap();
        assert_eq!((lat.num_rows(), lat.num_cols()), (4, 3));
        let loss = loss_program(&r, &b, 2, 0.4).unwrap();
        assert_eq!((loss.num_rows(), loss.num_cols()), (2, 3));
        let bw = bandwidth_program(&r, &b, 2, 0.4).unwrap();
        assert_eq!((bw.num_rows(), bw.num_cols()), (5, 4));
        // The equality row only touches the path columns.
        assert_eq!(bw.matrix().row(4), &[0.0, 1.0, 1.0, 1.0]);
        assert!(latency_program(&r, &b[..2], 2, 0.4).is_err());
    }

    #[test]
    fn oracles_match_hand_solutions() {
        let means = scenario_means();
        let lat = ConMpts::with_seed(Constraint::Latency, 3, 0.4, 0.01, 0).unwrap();
        // x = (1, 0.8, 0.2): 0.8 + 0.4 + 0.04.
        assert!((lat.oracle(&means, 2).unwrap() - 1.24).abs() < 1e-6);
        assert!((lat.oracle(&means, 1).unwrap() - 0.8).abs() < 1e-6);

        let loss = ConMpts::with_seed(Constraint::Loss, 3, 0.4, 0.01, 0).unwrap();
        assert!((loss.oracle(&means, 2).unwrap() - 1.3).abs() < 1e-6);

        // Equalized latency shares: u = 1 / sum(1 / r_i).
        let bw = ConMpts::with_seed(Constraint::Bandwidth, 3, 0.4, 0.01, 0).unwrap();
        let expected = 1.0 / (1.0 / 0.2 + 1.0 / 0.5 + 1.0 / 0.9);
        assert!((bw.oracle(&means, 1).unwrap() - expected).abs() < 1e-6);
    }

    #[test]
    fn infeasible_lp_falls_back_to_lowest_cost() {
        // A negative loss budget can never be met.
        let mut p = ConMpts::with_seed(Constraint::Loss, 4, -0.1, 0.01, 3).unwrap();
        for _ in 0..20 {
            let sel = p.decide(2).unwrap();
            assert!(sel.used_fallback());
            assert_eq!(sel.paths.len(), 2);
            assert_ne!(sel.paths[0], sel.paths[1]);
        }
    }

    #[test]
    fn infeasible_latency_and_loss_fall_back_to_lowest_sampled_cost() {
        for constraint in [Constraint::Latency, Constraint::Loss] {
            let mut p = ConMpts::with_seed(constraint, 5, -0.1, 0.01, 42).unwrap();
            for t in 0..10 {
                let sel = p.decide(2).unwrap();
                let obs: Vec<Metric> = sel
                    .paths
                    .iter()
                    .map(|&i| Metric::new(0.1 * i as f64, 0.2 * (t % 5) as f64, 0.15 * i as f64))
                    .collect();
                p.update_state(&sel.paths, &obs).unwrap();
            }
            // Replay the draws decide() is about to make.
            let mut rng = p.rng.clone();
            let mut hat_c = Vec::new();
            for i in 0..5 {
                let _ = sample_beta(&mut rng, p.bandwidth[i].alpha, p.bandwidth[i].beta);
                hat_c.push(sample_beta(&mut rng, p.cost[i].alpha, p.cost[i].beta));
            }
            let sel = p.decide(2).unwrap();
            assert_eq!(sel.paths, bottom_m_indices(&hat_c, 2), "{constraint}");
            assert!(sel
                .notes
                .iter()
                .any(|n| matches!(n, SelectionNote::LpFallback { .. })));
        }
    }

    #[test]
    fn feasible_decisions_carry_lp_probabilities() {
        let mut p = ConMpts::with_seed(Constraint::Latency, 3, 1.0, 0.01, 9).unwrap();
        let sel = p.decide(2).unwrap();
        assert!(!sel.used_fallback());
        let probs = sel.probs.expect("lp shares");
        assert!((probs.iter().sum::<f64>() - 2.0).abs() < 1e-3);
    }

    #[test]
    fn success_counts_never_decrease() {
        let mut p = ConMpts::with_seed(Constraint::Latency, 2, 0.4, 0.01, 1).unwrap();
        let mut prev = p.bandwidth_arms()[0].alpha;
        for _ in 0..50 {
            // b = 1 is a sure success, r = 0 a sure failure.
            p.update_state(&[0], &[Metric::new(0.0, 1.0, 0.0)]).unwrap();
            let now = p.bandwidth_arms()[0].alpha;
            assert!(now > prev);
            prev = now;
        }
        assert_eq!(p.bandwidth_arms()[0].beta, 1.0);
        assert_eq!(p.cost_arms()[0].alpha, 1.0);
        assert_eq!(p.cost_arms()[0].beta, 51.0);
    }

    #[test]
    fn damped_update_forgets_but_keeps_prior_floor() {
        let mut p = ConMpts::with_seed(Constraint::Latency, 2, 0.4, 0.5, 1).unwrap();
        for _ in 0..10 {
            p.update_state_damped(&[0], &[Metric::new(1.0, 1.0, 0.0)]).unwrap();
        }
        // Fixed point of a = 0.5 (a + 1) is 1.
        let a = p.bandwidth_arms()[0].alpha;
        assert!((1.0..=2.0).contains(&a), "{a}");
        let unselected = p.bandwidth_arms()[1];
        assert_eq!((unselected.alpha, unselected.beta), (1.0, 1.0));
        assert!(ConMpts::with_seed(Constraint::Latency, 2, 0.4, 1.0, 1).is_err());
    }

    #[test]
    fn averaged_mode_tracks_running_means() {
        let mut p = ConMpts::with_seed(Constraint::Loss, 2, 0.4, 0.01, 1).unwrap();
        p.update_state_avg(&[1], &[Metric::new(0.0, 0.2, 0.4)]).unwrap();
        p.update_state_avg(&[1], &[Metric::new(0.0, 0.6, 0.0)]).unwrap();
        let (bw, cost) = p.averages();
        assert!((bw[1] - 0.4).abs() < 1e-12);
        assert!((cost[1] - 0.2).abs() < 1e-12);
        assert_eq!(bw[0], 0.5);
        let sel = p.decide_avg(1).unwrap();
        assert!(sel.notes.contains(&SelectionNote::AveragedEstimates));
    }

    #[test]
    fn latency_constrained_prefers_the_fast_path() {
        let means = scenario_means();
        let mut p = ConMpts::with_seed(Constraint::Latency, 3, 0.4, 0.01, 21).unwrap();
        let mut hits = [0u32; 3];
        for _ in 0..1_500 {
            let sel = p.select_next_paths(1).unwrap();
            let obs: Vec<Metric> = sel.iter().map(|&i| means[i]).collect();
            hits[sel[0]] += 1;
            p.update_state(&sel, &obs).unwrap();
        }
        assert!(hits[0] > hits[2], "{hits:?}");
    }

    #[test]
    fn same_seed_same_decisions() {
        let mut a = ConMpts::with_seed(Constraint::Bandwidth, 4, 0.3, 0.01, 77).unwrap();
        let mut b = ConMpts::with_seed(Constraint::Bandwidth, 4, 0.3, 0.01, 77).unwrap();
        let mut rng = StdRng::seed_from_u64(1);
        for _ in 0..30 {
            let sa = a.select_next_paths(2).unwrap();
            assert_eq!(sa, b.select_next_paths(2).unwrap());
            let obs: Vec<Metric> = sa
                .iter()
                .map(|_| Metric::new(rng.random(), rng.random(), rng.random()))
                .collect();
            a.update_state(&sa, &obs).unwrap();
            b.update_state(&sa, &obs).unwrap();
        }
    }
}
