//! Run configuration and the path-parameter file.

use std::fmt;
use std::fs;
use std::path::{Path as FsPath, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use tracing::info;

use crate::decision::PolicyKind;
use crate::error::{Error, Result};
use crate::metric::Metric;
use crate::path::PathKind;

/// Which select/update pair the simulator drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum RoundMode {
    /// `decide` + `update_state`.
    #[default]
    Vanilla,
    /// `decide` + `update_state_damped`.
    Damped,
    /// `decide_avg` + `update_state_avg`.
    Averaged,
}

impl fmt::Display for RoundMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RoundMode::Vanilla => "vanilla",
            RoundMode::Damped => "damped",
            RoundMode::Averaged => "averaged",
        })
    }
}

impl FromStr for RoundMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "vanilla" => Ok(RoundMode::Vanilla),
            "damped" => Ok(RoundMode::Damped),
            "averaged" | "avg" => Ok(RoundMode::Averaged),
            other => Err(Error::InvalidParameter {
                name: "mode",
                value: other.to_string(),
            }),
        }
    }
}

/// Everything a run needs besides the paths themselves.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct SimulationConfig {
    /// Independent repetitions averaged into the log.
    pub repetitions: usize,
    /// Rounds per repetition (`T`).
    pub rounds: usize,
    /// Paths selected per round (`M`).
    pub m: usize,
    /// Constraint bound of the ConMPTS family.
    pub threshold: f64,
    /// Wait between steering and fetching live measurements.
    pub poll_interval: Duration,
    /// Run until the live source is exhausted; disables the round log.
    pub forever: bool,
    /// Forgetting rate of the damped update.
    pub damping: f64,
    /// Master seed; `None` draws one from OS entropy.
    pub seed: Option<u64>,
    pub mode: RoundMode,
    /// EXP3.M exploration rate.
    pub gamma: f64,
    /// `Stale` refreshes tolerated per round before reusing the last snapshot.
    pub max_refresh_attempts: usize,
    pub policies: Vec<PolicyKind>,
    pub path_kind: PathKind,
    /// Per-signal standard deviation of normal paths.
    pub stddev: f64,
    /// Use the leader variant of KL-UCB.
    pub klucb_leader: bool,
    pub param_file: PathBuf,
    pub output: PathBuf,
    pub reward_output: Option<PathBuf>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            repetitions: 1,
            rounds: 10_000,
            m: 2,
            threshold: 0.4,
            poll_interval: Duration::from_micros(100),
            forever: false,
            damping: 0.01,
            seed: None,
            mode: RoundMode::Vanilla,
            gamma: 0.1,
            max_refresh_attempts: 64,
            policies: vec![PolicyKind::ConMptsLatency],
            path_kind: PathKind::Fixed,
            stddev: 0.1,
            klucb_leader: false,
            param_file: PathBuf::from("./pathdata/paraFile.txt"),
            output: PathBuf::from("pathLog.txt"),
            reward_output: None,
        }
    }
}

impl SimulationConfig {
    pub fn with_repetitions(mut self, repetitions: usize) -> Self {
        self.repetitions = repetitions;
        self
    }

    pub fn with_rounds(mut self, rounds: usize) -> Self {
        self.rounds = rounds;
        self
    }

    pub fn with_m(mut self, m: usize) -> Self {
        self.m = m;
        self
    }

    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_forever(mut self, forever: bool) -> Self {
        self.forever = forever;
        self
    }

    pub fn with_damping(mut self, damping: f64) -> Self {
        self.damping = damping;
        self
    }

    pub fn with_seed(mut self, seed: Option<u64>) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_mode(mut self, mode: RoundMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_gamma(mut self, gamma: f64) -> Self {
        self.gamma = gamma;
        self
    }

    pub fn with_policies(mut self, policies: Vec<PolicyKind>) -> Self {
        self.policies = policies;
        self
    }

    pub fn with_path_kind(mut self, path_kind: PathKind) -> Self {
        self.path_kind = path_kind;
        self
    }

    pub fn with_klucb_leader(mut self, leader: bool) -> Self {
        self.klucb_leader = leader;
        self
    }

    /// Reject values no run can use. `M > K` is checked later, once `K` is known.
    pub fn validate(&self) -> Result<()> {
        let bad = |name: &'static str, value: String| Err(Error::InvalidParameter { name, value });
        if self.repetitions == 0 {
            return bad("repetitions", "0".into());
        }
        if !self.threshold.is_finite() {
            return bad("threshold", self.threshold.to_string());
        }
        if !(0.0..1.0).contains(&self.damping) {
            return bad("damping", self.damping.to_string());
        }
        if !(self.gamma > 0.0 && self.gamma < 1.0) {
            return bad("gamma", self.gamma.to_string());
        }
        if !(self.stddev.is_finite() && self.stddev >= 0.0) {
            return bad("stddev", self.stddev.to_string());
        }
        if self.policies.is_empty() {
            return bad("policies", "[]".into());
        }
        Ok(())
    }
}

/// Read one `(latency, bandwidth, loss)` triple per line.
///
/// Lines starting with `#` and blank lines are skipped; anything else must hold at least
/// three numbers (extra columns are ignored).
pub fn load_path_parameters(path: impl AsRef<FsPath>) -> Result<Vec<Metric>> {
    let path = path.as_ref();
    let text = fs::read_to_string(path).map_err(|source| Error::ParamFile {
        path: path.to_path_buf(),
        source,
    })?;
    let params = parse_path_parameters(&text).map_err(|(line, details)| Error::ParamParse {
        path: path.to_path_buf(),
        line,
        details,
    })?;
    info!(path = %path.display(), paths = params.len(), "loaded path parameters");
    Ok(params)
}

/// Parse parameter-file text; errors carry the 1-based line number.
pub fn parse_path_parameters(text: &str) -> std::result::Result<Vec<Metric>, (usize, String)> {
    let mut out = Vec::new();
    for (idx, raw) in text.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let mut fields = line.split_whitespace();
        let mut next = |what: &str| -> std::result::Result<f64, (usize, String)> {
            let tok = fields
                .next()
                .ok_or_else(|| (idx + 1, format!("missing {what} column")))?;
            tok.parse::<f64>()
                .map_err(|e| (idx + 1, format!("bad {what} value {tok:?}: {e}")))
        };
        let r = next("latency")?;
        let b = next("bandwidth")?;
        let l = next("loss")?;
        out.push(Metric::new(r, b, l));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_match_the_documented_values() {
        let c = SimulationConfig::default();
        assert_eq!(c.repetitions, 1);
        assert_eq!(c.rounds, 10_000);
        assert_eq!(c.m, 2);
        assert_eq!(c.threshold, 0.4);
        assert_eq!(c.poll_interval, Duration::from_micros(100));
        assert!(!c.forever);
        assert_eq!(c.damping, 0.01);
        assert_eq!(c.seed, None);
        assert_eq!(c.mode, RoundMode::Vanilla);
        assert!(c.validate().is_ok());
    }

    #[test]
    fn validate_rejects_out_of_range_values() {
        let c = SimulationConfig::default();
        assert!(c.clone().with_damping(1.0).validate().is_err());
        assert!(c.clone().with_gamma(0.0).validate().is_err());
        assert!(c.clone().with_repetitions(0).validate().is_err());
        assert!(c.with_policies(vec![]).validate().is_err());
    }

    #[test]
    fn mode_parses() {
        assert_eq!("Damped".parse::<RoundMode>().unwrap(), RoundMode::Damped);
        assert_eq!("avg".parse::<RoundMode>().unwrap(), RoundMode::Averaged);
        assert!("fast".parse::<RoundMode>().is_err());
    }

    #[test]
    fn parses_triples_skipping_comments_and_blanks() {
        let text = "# r b l\n0.2 0.8 0.0\n\n  0.5\t0.5 0.1  \n#x\n0.9 0.2 0.3 extra\n";
        let p = parse_path_parameters(text).unwrap();
        assert_eq!(
            p,
            vec![
                Metric::new(0.2, 0.8, 0.0),
                Metric::new(0.5, 0.5, 0.1),
                Metric::new(0.9, 0.2, 0.3),
            ]
        );
    }

    #[test]
    fn malformed_lines_name_the_line() {
        assert_eq!(parse_path_parameters("# c\n0.1 0.2\n").unwrap_err().0, 2);
        assert_eq!(parse_path_parameters("0.1 x 0.3\n").unwrap_err().0, 1);
    }

    #[test]
    fn load_reads_file_and_reports_missing_file() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, "# header").unwrap();
        writeln!(f, "0.2 0.8 0.0").unwrap();
        let p = load_path_parameters(f.path()).unwrap();
        assert_eq!(p.len(), 1);

        let dir = tempfile::tempdir().unwrap();
        match load_path_parameters(dir.path().join("missing.txt")) {
            Err(Error::ParamFile { .. }) => {}
            other => panic!("unexpected: {other:?}"),
        }
    }
}
