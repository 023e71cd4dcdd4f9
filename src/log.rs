//! Round-wise logs.
//!
//! The simulator reports into a [`RoundRecorder`]. Two recorders exist:
//!
//! - [`RoundLog`]: per `[policy][round][path]` selection counts and metric sums, written
//!   as selection frequency and mean latency / bandwidth / loss per round;
//! - [`RewardLog`]: per `[policy][round]` reward, regret and constraint violation, written
//!   cumulatively.
//!
//! Both accumulate over repetitions and divide by the repetition count on output. A
//! `(A, B)` pair of recorders is itself a recorder, so one run can fill both.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path as FsPath;

use crate::error::{Error, Result};
use crate::metric::Metric;

/// Per-round scalar outcome of one policy.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RoundReward {
    /// Best achievable value this round (`0` when the policy has no oracle).
    pub oracle: f64,
    /// Sum of the selected paths' measured bandwidth.
    pub reward: f64,
    /// `oracle - reward`.
    pub regret: f64,
    /// Sum over selected paths of `latency - threshold` (may be negative).
    pub violation: f64,
}

/// Sink for per-round simulation events. Writes outside the recorder's
/// `[policy][round][path]` shape are ignored.
pub trait RoundRecorder {
    /// A new repetition starts.
    fn begin_repetition(&mut self);

    /// Policy `policy` selected path `path` in `round`.
    fn record_selected(&mut self, policy: usize, round: usize, path: usize);

    /// Path `path` measured `metric` in `round` while `policy` was running.
    fn record_measurement(&mut self, policy: usize, round: usize, path: usize, metric: Metric);

    fn record_reward(&mut self, _policy: usize, _round: usize, _reward: RoundReward) {}
}

impl<A: RoundRecorder, B: RoundRecorder> RoundRecorder for (A, B) {
    fn begin_repetition(&mut self) {
        self.0.begin_repetition();
        self.1.begin_repetition();
    }

    fn record_selected(&mut self, policy: usize, round: usize, path: usize) {
        self.0.record_selected(policy, round, path);
        self.1.record_selected(policy, round, path);
    }

    fn record_measurement(&mut self, policy: usize, round: usize, path: usize, metric: Metric) {
        self.0.record_measurement(policy, round, path, metric);
        self.1.record_measurement(policy, round, path, metric);
    }

    fn record_reward(&mut self, policy: usize, round: usize, reward: RoundReward) {
        self.0.record_reward(policy, round, reward);
        self.1.record_reward(policy, round, reward);
    }
}

impl<R: RoundRecorder + ?Sized> RoundRecorder for &mut R {
    fn begin_repetition(&mut self) {
        (**self).begin_repetition();
    }

    fn record_selected(&mut self, policy: usize, round: usize, path: usize) {
        (**self).record_selected(policy, round, path);
    }

    fn record_measurement(&mut self, policy: usize, round: usize, path: usize, metric: Metric) {
        (**self).record_measurement(policy, round, path, metric);
    }

    fn record_reward(&mut self, policy: usize, round: usize, reward: RoundReward) {
        (**self).record_reward(policy, round, reward);
    }
}

fn write_file_with<F>(path: &FsPath, f: F) -> Result<()>
where
    F: FnOnce(&mut BufWriter<File>) -> io::Result<()>,
{
    let wrap = |source| Error::LogWrite {
        path: path.to_path_buf(),
        source,
    };
    let file = File::create(path).map_err(wrap)?;
    let mut w = BufWriter::new(file);
    f(&mut w).map_err(wrap)?;
    w.flush().map_err(wrap)
}

/// Full `[policy][round][path]` log. Disabled (records and writes nothing) in forever mode.
#[derive(Debug, Clone, PartialEq)]
pub struct RoundLog {
    policies: usize,
    rounds: usize,
    paths: usize,
    repetitions: usize,
    enabled: bool,
    selected: Vec<u64>,
    metrics: Vec<Metric>,
}

impl RoundLog {
    pub fn new(policies: usize, rounds: usize, paths: usize) -> Self {
        let cells = policies * rounds * paths;
        Self {
            policies,
            rounds,
            paths,
            repetitions: 0,
            enabled: true,
            selected: vec![0; cells],
            metrics: vec![Metric::ZERO; cells],
        }
    }

    /// A log that ignores every event (forever mode has no round bound).
    pub fn disabled(policies: usize, paths: usize) -> Self {
        Self {
            policies,
            rounds: 0,
            paths,
            repetitions: 0,
            enabled: false,
            selected: Vec::new(),
            metrics: Vec::new(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn repetitions(&self) -> usize {
        self.repetitions
    }

    pub fn rounds(&self) -> usize {
        self.rounds
    }

    fn cell(&self, policy: usize, round: usize, path: usize) -> Option<usize> {
        (self.enabled && policy < self.policies && round < self.rounds && path < self.paths)
            .then(|| (policy * self.rounds + round) * self.paths + path)
    }

    /// Fraction of repetitions in which `policy` selected `path` in `round`.
    pub fn selection_frequency(&self, policy: usize, round: usize, path: usize) -> f64 {
        match self.cell(policy, round, path) {
            Some(c) if self.repetitions > 0 => self.selected[c] as f64 / self.repetitions as f64,
            _ => 0.0,
        }
    }

    /// Mean measurement of `path` in `round` over repetitions.
    pub fn mean_metric(&self, policy: usize, round: usize, path: usize) -> Metric {
        match self.cell(policy, round, path) {
            Some(c) => self.metrics[c].average_over(self.repetitions as u64),
            None => Metric::ZERO,
        }
    }

    /// Add another log of the same shape (e.g. one built by a separate repetition).
    pub fn merge(&mut self, other: &RoundLog) -> Result<()> {
        if (self.policies, self.rounds, self.paths) != (other.policies, other.rounds, other.paths)
        {
            return Err(Error::LengthMismatch {
                left: self.selected.len(),
                right: other.selected.len(),
            });
        }
        self.repetitions += other.repetitions;
        for (a, b) in self.selected.iter_mut().zip(&other.selected) {
            *a += b;
        }
        for (a, b) in self.metrics.iter_mut().zip(&other.metrics) {
            *a += *b;
        }
        Ok(())
    }

    /// Write the averaged log; `names` holds one name per policy.
    ///
    /// Row layout: round, then each policy's `K` selection frequencies, then each policy's
    /// `K` mean latencies, then bandwidths, then loss rates.
    pub fn write_to<W: Write>(&self, w: &mut W, names: &[&str]) -> io::Result<()> {
        if !self.enabled {
            return Ok(());
        }
        writeln!(w, "# result in: {} simulations.", self.repetitions)?;
        for (p, name) in names.iter().enumerate() {
            writeln!(w, "# policy {p} {name}")?;
        }
        writeln!(w, "#results:")?;
        write!(w, "#T")?;
        for label in ["selection", "rtt", "bw", "lossrate"] {
            for name in names {
                write!(w, " {label}({name})")?;
            }
        }
        writeln!(w)?;

        let policies = names.len().min(self.policies);
        for t in 0..self.rounds {
            write!(w, "{}", t + 1)?;
            for p in 0..policies {
                for i in 0..self.paths {
                    write!(w, " {:.6}", self.selection_frequency(p, t, i))?;
                }
            }
            let signals: [fn(&Metric) -> f64; 3] = [|m| m.r, |m| m.b, |m| m.l];
            for signal in signals {
                for p in 0..policies {
                    for i in 0..self.paths {
                        write!(w, " {:.6}", signal(&self.mean_metric(p, t, i)))?;
                    }
                }
            }
            writeln!(w)?;
        }
        Ok(())
    }

    /// [`RoundLog::write_to`] into a new file; nothing is created when disabled.
    pub fn write_file(&self, path: impl AsRef<FsPath>, names: &[&str]) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        write_file_with(path.as_ref(), |w| self.write_to(w, names))
    }
}

impl RoundRecorder for RoundLog {
    fn begin_repetition(&mut self) {
        if self.enabled {
            self.repetitions += 1;
        }
    }

    fn record_selected(&mut self, policy: usize, round: usize, path: usize) {
        if let Some(c) = self.cell(policy, round, path) {
            self.selected[c] += 1;
        }
    }

    fn record_measurement(&mut self, policy: usize, round: usize, path: usize, metric: Metric) {
        if let Some(c) = self.cell(policy, round, path) {
            self.metrics[c] += metric;
        }
    }
}

/// Per `[policy][round]` reward, regret and violation.
#[derive(Debug, Clone, PartialEq)]
pub struct RewardLog {
    policies: usize,
    rounds: usize,
    repetitions: usize,
    cells: Vec<RoundReward>,
}

impl RewardLog {
    pub fn new(policies: usize, rounds: usize) -> Self {
        Self {
            policies,
            rounds,
            repetitions: 0,
            cells: vec![RoundReward::default(); policies * rounds],
        }
    }

    pub fn repetitions(&self) -> usize {
        self.repetitions
    }

    /// Summed (not averaged) outcome of `policy` in `round`.
    pub fn get(&self, policy: usize, round: usize) -> Option<RoundReward> {
        (policy < self.policies && round < self.rounds)
            .then(|| self.cells[policy * self.rounds + round])
    }

    /// Cumulative `(oracle, reward, regret, violation)` of `policy` up to and including
    /// `round`, averaged over repetitions; violation is clamped at zero.
    pub fn cumulative(&self, policy: usize, round: usize) -> RoundReward {
        let reps = self.repetitions.max(1) as f64;
        let mut acc = RoundReward::default();
        for t in 0..=round.min(self.rounds.saturating_sub(1)) {
            if let Some(c) = self.get(policy, t) {
                acc.oracle += c.oracle;
                acc.reward += c.reward;
                acc.regret += c.regret;
                acc.violation += c.violation;
            }
        }
        RoundReward {
            oracle: acc.oracle / reps,
            reward: acc.reward / reps,
            regret: acc.regret / reps,
            violation: (acc.violation / reps).max(0.0),
        }
    }

    pub fn merge(&mut self, other: &RewardLog) -> Result<()> {
        if (self.policies, self.rounds) != (other.policies, other.rounds) {
            return Err(Error::LengthMismatch {
                left: self.cells.len(),
                right: other.cells.len(),
            });
        }
        self.repetitions += other.repetitions;
        for (a, b) in self.cells.iter_mut().zip(&other.cells) {
            a.oracle += b.oracle;
            a.reward += b.reward;
            a.regret += b.regret;
            a.violation += b.violation;
        }
        Ok(())
    }

    /// Row layout: round, then each policy's cumulative oracle, reward, regret and
    /// violation, grouped by quantity.
    pub fn write_to<W: Write>(&self, w: &mut W, names: &[&str]) -> io::Result<()> {
        writeln!(w, "#averaged result over {} simulations.", self.repetitions)?;
        for (p, name) in names.iter().enumerate() {
            writeln!(w, "#policy {p} {name}")?;
        }
        writeln!(w, "#results:")?;
        write!(w, "#T")?;
        for label in ["oracle", "reward", "regret", "violation"] {
            for name in names {
                write!(w, " {label}({name})")?;
            }
        }
        writeln!(w)?;

        let policies = names.len().min(self.policies);
        let reps = self.repetitions.max(1) as f64;
        let mut cum = vec![RoundReward::default(); policies];
        for t in 0..self.rounds {
            for (p, acc) in cum.iter_mut().enumerate() {
                let c = self.cells[p * self.rounds + t];
                acc.oracle += c.oracle;
                acc.reward += c.reward;
                acc.regret += c.regret;
                acc.violation += c.violation;
            }
            write!(w, "{}", t + 1)?;
            let columns: [fn(&RoundReward) -> f64; 4] = [
                |c| c.oracle,
                |c| c.reward,
                |c| c.regret,
                |c| c.violation.max(0.0),
            ];
            for column in columns {
                for acc in &cum {
                    let avg = RoundReward {
                        oracle: acc.oracle / reps,
                        reward: acc.reward / reps,
                        regret: acc.regret / reps,
                        violation: acc.violation / reps,
                    };
                    write!(w, " {:.6}", column(&avg))?;
                }
            }
            writeln!(w)?;
        }
        Ok(())
    }

    pub fn write_file(&self, path: impl AsRef<FsPath>, names: &[&str]) -> Result<()> {
        write_file_with(path.as_ref(), |w| self.write_to(w, names))
    }
}

impl RoundRecorder for RewardLog {
    fn begin_repetition(&mut self) {
        self.repetitions += 1;
    }

    fn record_selected(&mut self, _policy: usize, _round: usize, _path: usize) {}

    fn record_measurement(&mut self, _policy: usize, _round: usize, _path: usize, _metric: Metric) {}

    fn record_reward(&mut self, policy: usize, round: usize, reward: RoundReward) {
        if policy < self.policies && round < self.rounds {
            let c = &mut self.cells[policy * self.rounds + round];
            c.oracle += reward.oracle;
            c.reward += reward.reward;
            c.regret += reward.regret;
            c.violation += reward.violation;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filled_log() -> RoundLog {
        let mut log = RoundLog::new(2, 2, 3);
        for rep in 0..2 {
            log.begin_repetition();
            for t in 0..2 {
                log.record_selected(0, t, rep);
                log.record_selected(1, t, 2);
                for i in 0..3 {
                    let m = Metric::new(0.1 * (i + 1) as f64, 0.5, rep as f64);
                    log.record_measurement(0, t, i, m);
                    log.record_measurement(1, t, i, m);
                }
            }
        }
        log
    }

    #[test]
    fn frequencies_and_means_divide_by_repetitions() {
        let log = filled_log();
        assert_eq!(log.repetitions(), 2);
        assert_eq!(log.selection_frequency(0, 0, 0), 0.5);
        assert_eq!(log.selection_frequency(0, 0, 1), 0.5);
        assert_eq!(log.selection_frequency(1, 1, 2), 1.0);
        let m = log.mean_metric(0, 1, 2);
        assert!((m.r - 0.3).abs() < 1e-12);
        assert!((m.l - 0.5).abs() < 1e-12);
        // Out-of-shape writes are ignored.
        let mut log = log;
        log.record_selected(5, 0, 0);
        log.record_selected(0, 9, 0);
        assert_eq!(log.selection_frequency(5, 0, 0), 0.0);
    }

    #[test]
    fn writer_uses_grouped_column_order() {
        let log = filled_log();
        let mut out = Vec::new();
        log.write_to(&mut out, &["A", "B"]).unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "# result in: 2 simulations.");
        assert_eq!(lines[1], "# policy 0 A");
        assert_eq!(lines[3], "#results:");
        assert_eq!(
            lines[4],
            "#T selection(A) selection(B) rtt(A) rtt(B) bw(A) bw(B) lossrate(A) lossrate(B)"
        );
        let row: Vec<&str> = lines[5].split(' ').collect();
        // round + 2 policies * 3 paths * 4 quantities.
        assert_eq!(row.len(), 1 + 2 * 3 * 4);
        assert_eq!(row[0], "1");
        assert_eq!(&row[1..4], &["0.500000", "0.500000", "0.000000"]);
        assert_eq!(&row[4..7], &["0.000000", "0.000000", "1.000000"]);
        // First latency column: policy A, path 0.
        assert_eq!(row[7], "0.100000");
        assert_eq!(lines.len(), 5 + 2);
    }

    #[test]
    fn merge_adds_repetitions() {
        let mut a = filled_log();
        let b = filled_log();
        a.merge(&b).unwrap();
        assert_eq!(a.repetitions(), 4);
        assert_eq!(a.selection_frequency(0, 0, 0), 0.5);
        assert!(a.merge(&RoundLog::new(1, 2, 3)).is_err());
    }

    #[test]
    fn disabled_log_records_and_writes_nothing() {
        let mut log = RoundLog::disabled(1, 2);
        log.begin_repetition();
        log.record_selected(0, 0, 0);
        assert!(!log.is_enabled());
        assert_eq!(log.repetitions(), 0);
        let mut out = Vec::new();
        log.write_to(&mut out, &["A"]).unwrap();
        assert!(out.is_empty());

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("never.txt");
        log.write_file(&path, &["A"]).unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn reward_log_is_cumulative_and_clamps_violation() {
        let mut log = RewardLog::new(1, 3);
        log.begin_repetition();
        for t in 0..3 {
            log.record_reward(
                0,
                t,
                RoundReward {
                    oracle: 1.0,
                    reward: 0.75,
                    regret: 0.25,
                    violation: -0.5,
                },
            );
        }
        let c = log.cumulative(0, 2);
        assert_eq!(c.reward, 2.25);
        assert_eq!(c.regret, 0.75);
        assert_eq!(c.violation, 0.0);

        let mut out = Vec::new();
        log.write_to(&mut out, &["P"]).unwrap();
        let text = String::from_utf8(out).unwrap();
        let last = text.lines().last().unwrap();
        assert_eq!(last, "3 3.000000 2.250000 0.750000 0.000000");
    }

    #[test]
    fn pair_recorder_fans_out() {
        let mut pair = (RoundLog::new(1, 1, 2), RewardLog::new(1, 1));
        pair.begin_repetition();
        pair.record_selected(0, 0, 1);
        pair.record_reward(0, 0, RoundReward { reward: 0.5, ..Default::default() });
        assert_eq!(pair.0.selection_frequency(0, 0, 1), 1.0);
        assert_eq!(pair.1.get(0, 0).unwrap().reward, 0.5);
    }

    #[test]
    fn write_file_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pathLog.txt");
        filled_log().write_file(&path, &["A", "B"]).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("# result in: 2 simulations."));
        let bad = dir.path().join("no/such/dir/log.txt");
        assert!(matches!(
            filled_log().write_file(&bad, &["A", "B"]),
            Err(Error::LogWrite { .. })
        ));
    }
}
