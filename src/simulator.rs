//! Round-based simulation loop.
//!
//! For every round `t` and every policy `p` (policies interleave within a round):
//!
//! 1. the policy decides its `M`-subset (vanilla/damped: `decide`, averaged: `decide_avg`);
//! 2. with a live source, the subset is delivered via `prefer`, the loop waits
//!    `poll_interval` and refreshes the snapshot;
//! 3. every path is measured (all of them, for the full log);
//! 4. the measurements of the selected paths, in selection order, go to the update method
//!    of the configured [`RoundMode`];
//! 5. selection, measurements and the round's reward/regret/violation go to the recorder.
//!
//! The simulator owns its paths and policies for the whole run. Policy state is not reset
//! between repetitions; rebuild the simulator for independent repetitions.

use std::rc::Rc;
use std::thread;
use std::time::Duration;

use tracing::{debug, info, info_span, warn};

use crate::config::{RoundMode, SimulationConfig};
use crate::error::{Error, Result};
use crate::log::{RoundRecorder, RoundReward};
use crate::metric::Metric;
use crate::path::Path;
use crate::policy::{check_m, PathPolicy};
use crate::source::{FeedStatus, MeasurementSource};

/// How a call to [`Simulator::run`] ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// All requested rounds ran.
    Completed { rounds: usize },
    /// Forever mode: the live source reported the end of the transfer before `round`.
    SourceExhausted { round: usize },
}

/// Owns the paths and policies of one run.
pub struct Simulator {
    paths: Vec<Box<dyn Path>>,
    policies: Vec<Box<dyn PathPolicy>>,
    m: usize,
    threshold: f64,
    mode: RoundMode,
    poll_interval: Duration,
    forever: bool,
    max_refresh_attempts: usize,
    oracles: Vec<Option<f64>>,
    source: Option<Rc<dyn MeasurementSource>>,
}

impl std::fmt::Debug for Simulator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Simulator")
            .field("paths", &self.paths.len())
            .field("policies", &self.policy_names())
            .field("m", &self.m)
            .field("mode", &self.mode)
            .field("forever", &self.forever)
            .field("oracles", &self.oracles)
            .finish_non_exhaustive()
    }
}

impl Simulator {
    /// Fails with [`Error::TooManyPaths`] when `cfg.m` exceeds the number of paths and with
    /// [`Error::LengthMismatch`] when a policy was built for a different path count.
    pub fn new(
        paths: Vec<Box<dyn Path>>,
        policies: Vec<Box<dyn PathPolicy>>,
        cfg: &SimulationConfig,
    ) -> Result<Self> {
        let k = paths.len();
        check_m(cfg.m, k)?;
        if let Some(p) = policies.iter().find(|p| p.num_paths() != k) {
            return Err(Error::LengthMismatch {
                left: k,
                right: p.num_paths(),
            });
        }

        let means: Vec<Metric> = paths.iter().map(|p| p.mean_metric()).collect();
        let oracles = policies
            .iter()
            .map(|p| {
                let oracle = p.oracle(&means, cfg.m);
                if oracle.is_none() {
                    debug!(policy = p.name(), "no oracle for the mean metrics; regret reported as 0");
                }
                oracle
            })
            .collect();

        Ok(Self {
            paths,
            policies,
            m: cfg.m,
            threshold: cfg.threshold,
            mode: cfg.mode,
            poll_interval: cfg.poll_interval,
            forever: cfg.forever,
            max_refresh_attempts: cfg.max_refresh_attempts.max(1),
            oracles,
            source: None,
        })
    }

    /// Drive a live source: steer with `prefer` and refresh it every round.
    pub fn with_source(mut self, source: Rc<dyn MeasurementSource>) -> Self {
        self.source = Some(source);
        self
    }

    pub fn num_paths(&self) -> usize {
        self.paths.len()
    }

    pub fn policies(&self) -> &[Box<dyn PathPolicy>] {
        &self.policies
    }

    pub fn policy_names(&self) -> Vec<&'static str> {
        self.policies.iter().map(|p| p.name()).collect()
    }

    /// Per-round oracle value of policy `p`, if it has one.
    pub fn oracle(&self, p: usize) -> Option<f64> {
        self.oracles.get(p).copied().flatten()
    }

    /// Run one repetition of `rounds` rounds (unbounded in forever mode).
    pub fn run<R: RoundRecorder + ?Sized>(
        &mut self,
        recorder: &mut R,
        rounds: usize,
    ) -> Result<RunOutcome> {
        if self.forever && self.source.is_none() {
            return Err(Error::InvalidParameter {
                name: "forever",
                value: "forever mode needs a measurement source".to_string(),
            });
        }
        recorder.begin_repetition();
        let mut t = 0;
        while self.forever || t < rounds {
            for p in 0..self.policies.len() {
                if !self.exec_round(recorder, p, t)? {
                    info!(round = t, "measurement source exhausted; transmission ended");
                    return Ok(RunOutcome::SourceExhausted { round: t });
                }
            }
            t += 1;
        }
        Ok(RunOutcome::Completed { rounds: t })
    }

    /// Run `repetitions` repetitions into the same recorder; stops early if the source
    /// is exhausted.
    pub fn run_repetitions<R: RoundRecorder + ?Sized>(
        &mut self,
        recorder: &mut R,
        repetitions: usize,
        rounds: usize,
    ) -> Result<RunOutcome> {
        info!(
            repetitions,
            rounds,
            paths = self.paths.len(),
            m = self.m,
            mode = %self.mode,
            policies = ?self.policy_names(),
            "simulation start"
        );
        let mut outcome = RunOutcome::Completed { rounds: 0 };
        for rep in 0..repetitions {
            let _span = info_span!("repetition", rep).entered();
            info!(rep, "repetition start");
            outcome = self.run(recorder, rounds)?;
            if let RunOutcome::SourceExhausted { .. } = outcome {
                break;
            }
        }
        info!(?outcome, "simulation end");
        Ok(outcome)
    }

    /// One round of policy `p`. `false` when forever mode must stop.
    fn exec_round<R: RoundRecorder + ?Sized>(
        &mut self,
        recorder: &mut R,
        p: usize,
        t: usize,
    ) -> Result<bool> {
        let selection = {
            let policy = &mut self.policies[p];
            let sel = match self.mode {
                RoundMode::Averaged => policy.decide_avg(self.m)?,
                RoundMode::Vanilla | RoundMode::Damped => policy.decide(self.m)?,
            };
            debug!(policy = policy.name(), round = t, paths = ?sel.paths, notes = ?sel.notes, "selected");
            sel
        };

        if let Some(source) = self.source.clone() {
            if !self.steer(source.as_ref(), &selection.paths, t)? {
                return Ok(false);
            }
        }

        let all: Vec<Metric> = self.paths.iter_mut().map(|path| path.measurement()).collect();
        for (i, &metric) in all.iter().enumerate() {
            recorder.record_measurement(p, t, i, metric);
        }

        let mut measurements = Vec::with_capacity(selection.paths.len());
        for &i in &selection.paths {
            let metric = *all.get(i).ok_or(Error::IndexOutOfRange {
                index: i,
                len: all.len(),
            })?;
            recorder.record_selected(p, t, i);
            measurements.push(metric);
        }

        let policy = &mut self.policies[p];
        match self.mode {
            RoundMode::Vanilla => policy.update_state(&selection.paths, &measurements)?,
            RoundMode::Damped => policy.update_state_damped(&selection.paths, &measurements)?,
            RoundMode::Averaged => policy.update_state_avg(&selection.paths, &measurements)?,
        }

        recorder.record_reward(p, t, self.round_reward(p, &measurements));
        Ok(true)
    }

    fn round_reward(&self, p: usize, measurements: &[Metric]) -> RoundReward {
        let reward: f64 = measurements.iter().map(|m| m.b).sum();
        let violation: f64 = measurements.iter().map(|m| m.r - self.threshold).sum();
        let (oracle, regret) = match self.oracle(p) {
            Some(o) => (o, o - reward),
            None => (0.0, 0.0),
        };
        RoundReward {
            oracle,
            reward,
            regret,
            violation,
        }
    }

    /// Deliver the selection and wait for a fresh snapshot. `false` only when forever mode
    /// sees the end of the transfer; otherwise stale or exhausted feeds reuse the last
    /// snapshot.
    fn steer(&self, source: &dyn MeasurementSource, paths: &[usize], round: usize) -> Result<bool> {
        source.prefer(paths)?;
        thread::sleep(self.poll_interval);
        for attempt in 1..=self.max_refresh_attempts {
            match source.refresh()? {
                FeedStatus::Fresh => return Ok(true),
                FeedStatus::Exhausted if self.forever => return Ok(false),
                FeedStatus::Exhausted => {
                    debug!(round, "measurement source exhausted; reusing last snapshot");
                    return Ok(true);
                }
                FeedStatus::Stale => {
                    warn!(round, attempt, "stale measurements; retrying");
                    thread::sleep(self.poll_interval);
                }
            }
        }
        warn!(
            round,
            attempts = self.max_refresh_attempts,
            "no fresh measurements; reusing last snapshot"
        );
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decision::PolicyKind;
    use crate::log::{RewardLog, RoundLog};
    use crate::path::{source_paths, FixedPath};
    use crate::policy::build_policy;
    use crate::random::RandomPolicy;
    use crate::source::ReplaySource;

    fn fixed(params: &[Metric]) -> Vec<Box<dyn Path>> {
        params
            .iter()
            .map(|&m| Box::new(FixedPath::new(m)) as Box<dyn Path>)
            .collect()
    }

    fn three_paths() -> Vec<Metric> {
        vec![
            Metric::new(0.2, 0.8, 0.0),
            Metric::new(0.5, 0.5, 0.1),
            Metric::new(0.9, 0.2, 0.3),
        ]
    }

    fn cfg() -> SimulationConfig {
        SimulationConfig::default().with_poll_interval(Duration::ZERO)
    }

    #[test]
    fn rejects_m_above_k_and_mismatched_policies() {
        let random: Vec<Box<dyn PathPolicy>> = vec![Box::new(RandomPolicy::with_seed(3, 0))];
        match Simulator::new(fixed(&three_paths()), random, &cfg().with_m(4)) {
            Err(Error::TooManyPaths { m: 4, k: 3 }) => {}
            other => panic!("unexpected: {other:?}"),
        }
        let wrong: Vec<Box<dyn PathPolicy>> = vec![Box::new(RandomPolicy::with_seed(5, 0))];
        assert!(matches!(
            Simulator::new(fixed(&three_paths()), wrong, &cfg()),
            Err(Error::LengthMismatch { left: 3, right: 5 })
        ));
    }

    #[test]
    fn records_every_path_and_each_selection() {
        let policies: Vec<Box<dyn PathPolicy>> = vec![Box::new(RandomPolicy::with_seed(3, 1))];
        let mut sim = Simulator::new(fixed(&three_paths()), policies, &cfg()).unwrap();
        let mut log = RoundLog::new(1, 50, 3);
        let out = sim.run(&mut log, 50).unwrap();
        assert_eq!(out, RunOutcome::Completed { rounds: 50 });
        for t in 0..50 {
            let picked: f64 = (0..3).map(|i| log.selection_frequency(0, t, i)).sum();
            assert_eq!(picked, 2.0);
            assert_eq!(log.mean_metric(0, t, 2), three_paths()[2]);
        }
    }

    #[test]
    fn reward_regret_and_violation_follow_the_selection() {
        // M = K: every round selects all paths, so reward equals the oracle.
        let policies: Vec<Box<dyn PathPolicy>> = vec![Box::new(RandomPolicy::with_seed(3, 1))];
        let mut sim = Simulator::new(fixed(&three_paths()), policies, &cfg().with_m(3)).unwrap();
        assert!((sim.oracle(0).unwrap() - 1.5).abs() < 1e-12);
        let mut rewards = RewardLog::new(1, 4);
        sim.run(&mut rewards, 4).unwrap();
        let r = rewards.get(0, 3).unwrap();
        assert!((r.reward - 1.5).abs() < 1e-12);
        assert!(r.regret.abs() < 1e-12);
        // (0.2 + 0.5 + 0.9) - 3 * 0.4
        assert!((r.violation - 0.4).abs() < 1e-12);
    }

    #[test]
    fn every_mode_runs_every_policy_kind() {
        for mode in [RoundMode::Vanilla, RoundMode::Damped, RoundMode::Averaged] {
            let c = cfg().with_mode(mode).with_m(1);
            let policies = PolicyKind::ALL
                .iter()
                .enumerate()
                .map(|(i, &kind)| build_policy(kind, 3, &c, i as u64))
                .collect::<Result<Vec<_>>>()
                .unwrap();
            let mut sim = Simulator::new(fixed(&three_paths()), policies, &c).unwrap();
            let mut log = RoundLog::new(PolicyKind::ALL.len(), 20, 3);
            sim.run_repetitions(&mut log, 2, 20).unwrap();
            assert_eq!(log.repetitions(), 2);
            for p in 0..PolicyKind::ALL.len() {
                let picked: f64 = (0..3).map(|i| log.selection_frequency(p, 19, i)).sum();
                assert_eq!(picked, 1.0, "mode {mode} policy {p}");
            }
        }
    }

    #[test]
    fn live_source_is_steered_before_it_is_read() {
        let snapshots: Vec<Vec<Metric>> = (0..6)
            .map(|t| vec![Metric::new(0.1, t as f64 / 10.0, 0.0); 2])
            .collect();
        let source = Rc::new(ReplaySource::new(snapshots));
        let shared: Rc<dyn MeasurementSource> = source.clone();
        let policies: Vec<Box<dyn PathPolicy>> = vec![Box::new(RandomPolicy::with_seed(2, 3))];
        let c = cfg().with_m(1);
        let mut sim = Simulator::new(source_paths(2, Rc::clone(&shared)), policies, &c)
            .unwrap()
            .with_source(shared);
        let mut log = RoundLog::new(1, 4, 2);
        assert_eq!(sim.run(&mut log, 4).unwrap(), RunOutcome::Completed { rounds: 4 });
        assert_eq!(source.preferred().len(), 4);
        assert_eq!(source.consumed(), 4);
        // Round t reads snapshot t, which was fetched after that round's steering.
        assert!((log.mean_metric(0, 3, 0).b - 0.3).abs() < 1e-12);
    }

    #[test]
    fn forever_mode_ends_when_the_source_is_exhausted() {
        let source = Rc::new(ReplaySource::new(vec![vec![Metric::new(0.1, 0.5, 0.0); 2]; 3]));
        let shared: Rc<dyn MeasurementSource> = source.clone();
        let policies: Vec<Box<dyn PathPolicy>> = vec![Box::new(RandomPolicy::with_seed(2, 0))];
        let c = cfg().with_m(1).with_forever(true);
        let mut sim = Simulator::new(source_paths(2, Rc::clone(&shared)), policies, &c)
            .unwrap()
            .with_source(shared);
        let mut log = RoundLog::disabled(1, 2);
        let out = sim.run_repetitions(&mut log, 5, 0).unwrap();
        assert_eq!(out, RunOutcome::SourceExhausted { round: 3 });
        assert_eq!(source.preferred().len(), 4);
    }

    #[test]
    fn forever_without_a_source_is_rejected() {
        let policies: Vec<Box<dyn PathPolicy>> = vec![Box::new(RandomPolicy::with_seed(3, 0))];
        let c = cfg().with_forever(true);
        let mut sim = Simulator::new(fixed(&three_paths()), policies, &c).unwrap();
        let mut log = RoundLog::disabled(1, 3);
        assert!(sim.run(&mut log, 10).is_err());
    }

    #[test]
    fn stale_feed_is_retried_then_reused() {
        // Second snapshot is too short: stale, then the third is fresh.
        let source = Rc::new(ReplaySource::with_path_count(
            vec![
                vec![Metric::new(0.1, 0.1, 0.0); 2],
                vec![Metric::new(0.9, 0.9, 0.0)],
                vec![Metric::new(0.2, 0.2, 0.0); 2],
            ],
            2,
        ));
        let shared: Rc<dyn MeasurementSource> = source.clone();
        let policies: Vec<Box<dyn PathPolicy>> = vec![Box::new(RandomPolicy::with_seed(2, 0))];
        let c = cfg().with_m(2);
        let mut sim = Simulator::new(source_paths(2, Rc::clone(&shared)), policies, &c)
            .unwrap()
            .with_source(shared);
        let mut log = RoundLog::new(1, 3, 2);
        sim.run(&mut log, 3).unwrap();
        assert_eq!(source.consumed(), 3);
        assert!((log.mean_metric(0, 1, 1).b - 0.2).abs() < 1e-12);
        // Past the end of the script the last snapshot is reused.
        assert!((log.mean_metric(0, 2, 1).b - 0.2).abs() < 1e-12);
    }
}
