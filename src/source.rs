//! Live measurement boundary.
//!
//! The engine never talks to a device, ioctl or socket. A [`MeasurementSource`] is the
//! injected collaborator that (a) reports how many paths currently exist, (b) fetches a
//! fresh per-round snapshot, (c) serves per-path samples from that snapshot, and
//! (d) receives the steering decision (`prefer`). Methods take `&self`: one source is
//! shared (`Rc`) by every [`crate::SourcePath`] and by the simulator, so implementations
//! keep their snapshot behind interior mutability.
//!
//! [`Normalizer`] turns raw per-path counters into unit-scaled [`Metric`]s;
//! [`ReplaySource`] is an in-memory source for tests and offline replays.

use std::cell::RefCell;
use std::fs;
use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::metric::Metric;

/// Outcome of asking a source for fresh measurements.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedStatus {
    /// A new snapshot is available for every path.
    Fresh,
    /// Not enough valid paths yet; retry after a short wait.
    Stale,
    /// The transfer ended; no more measurements will arrive.
    Exhausted,
}

/// Injected measurement/steering collaborator.
pub trait MeasurementSource {
    /// Number of paths the source currently reports.
    fn path_count(&self) -> usize;

    /// Current-round metric for `path`, if the latest snapshot has one.
    fn sample(&self, path: usize) -> Option<Metric>;

    /// Fetch a fresh snapshot.
    fn refresh(&self) -> Result<FeedStatus>;

    /// Deliver this round's ordered selection to the steering mechanism.
    fn prefer(&self, paths: &[usize]) -> Result<()>;
}

/// Raw per-path counters as reported by a kernel-side scheduler.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RawPathStats {
    /// Smoothed RTT in source units; `0` means the slot is unused.
    pub rtt: u64,
    /// Bottleneck bandwidth estimate in source units.
    pub btlbw: u64,
    pub lost: u64,
    pub delivered: u64,
}

/// Scales raw counters into [`Metric`]s.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Normalizer {
    /// RTT upper bound (same units as [`RawPathStats::rtt`]); must be > 0.
    pub max_rtt: u64,
    /// Bandwidth upper bound (same units as [`RawPathStats::btlbw`]); must be > 0.
    pub max_btlbw: u64,
}

impl Normalizer {
    pub fn new(max_rtt: u64, max_btlbw: u64) -> Result<Self> {
        if max_rtt == 0 {
            return Err(Error::InvalidParameter {
                name: "max_rtt",
                value: "0".to_string(),
            });
        }
        if max_btlbw == 0 {
            return Err(Error::InvalidParameter {
                name: "max_btlbw",
                value: "0".to_string(),
            });
        }
        Ok(Self { max_rtt, max_btlbw })
    }

    /// Convert one snapshot. Unused slots (`rtt == 0`) are skipped, so the output can be
    /// shorter than the input; RTT is clamped to `1.0`; loss is `lost / delivered`
    /// (`0` when nothing was delivered).
    pub fn normalize(&self, raw: &[RawPathStats]) -> Vec<Metric> {
        raw.iter()
            .filter(|s| s.rtt != 0)
            .map(|s| {
                let r = (s.rtt as f64 / self.max_rtt as f64).min(1.0);
                let b = s.btlbw as f64 / self.max_btlbw as f64;
                let l = if s.delivered == 0 {
                    0.0
                } else {
                    s.lost as f64 / s.delivered as f64
                };
                Metric::new(r, b, l)
            })
            .collect()
    }
}

#[derive(Debug, Default)]
struct ReplayState {
    cursor: usize,
    current: Vec<Metric>,
    preferred: Vec<Vec<usize>>,
}

/// Replays scripted per-round snapshots; `Exhausted` once the script runs out.
///
/// A snapshot shorter than the declared path count is reported as `Stale`
/// (the same condition the live reader retries on).
#[derive(Debug)]
pub struct ReplaySource {
    rounds: Vec<Vec<Metric>>,
    paths: usize,
    state: RefCell<ReplayState>,
}

impl ReplaySource {
    /// Path count is the width of the widest snapshot.
    pub fn new(rounds: Vec<Vec<Metric>>) -> Self {
        let paths = rounds.iter().map(Vec::len).max().unwrap_or(0);
        Self::with_path_count(rounds, paths)
    }

    pub fn with_path_count(rounds: Vec<Vec<Metric>>, paths: usize) -> Self {
        Self {
            rounds,
            paths,
            state: RefCell::new(ReplayState::default()),
        }
    }

    /// Build from raw counter snapshots.
    pub fn from_raw(raw: &[Vec<RawPathStats>], paths: usize, normalizer: Normalizer) -> Self {
        let rounds = raw.iter().map(|r| normalizer.normalize(r)).collect();
        Self::with_path_count(rounds, paths)
    }

    /// Every selection delivered through [`MeasurementSource::prefer`], in order.
    pub fn preferred(&self) -> Vec<Vec<usize>> {
        self.state.borrow().preferred.clone()
    }

    /// Snapshots consumed so far.
    pub fn consumed(&self) -> usize {
        self.state.borrow().cursor
    }
}

impl MeasurementSource for ReplaySource {
    fn path_count(&self) -> usize {
        self.paths
    }

    fn sample(&self, path: usize) -> Option<Metric> {
        self.state.borrow().current.get(path).copied()
    }

    fn refresh(&self) -> Result<FeedStatus> {
        let mut st = self.state.borrow_mut();
        let Some(next) = self.rounds.get(st.cursor) else {
            return Ok(FeedStatus::Exhausted);
        };
        st.cursor += 1;
        if next.len() < self.paths {
            return Ok(FeedStatus::Stale);
        }
        st.current = next.clone();
        Ok(FeedStatus::Fresh)
    }

    fn prefer(&self, paths: &[usize]) -> Result<()> {
        self.state.borrow_mut().preferred.push(paths.to_vec());
        Ok(())
    }
}

/// Parse a replay script: one snapshot per line, `r b l` for each path in index order.
///
/// `#` comments and blank lines are skipped. Errors carry the 1-based line number.
pub fn parse_replay(text: &str) -> std::result::Result<Vec<Vec<Metric>>, (usize, String)> {
    let mut rounds = Vec::new();
    for (idx, raw) in text.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let values = line
            .split_whitespace()
            .map(|tok| tok.parse::<f64>().map_err(|e| (idx + 1, format!("bad value {tok:?}: {e}"))))
            .collect::<std::result::Result<Vec<f64>, _>>()?;
        if values.len() % 3 != 0 {
            return Err((idx + 1, format!("{} values is not a list of triples", values.len())));
        }
        rounds.push(
            values
                .chunks_exact(3)
                .map(|c| Metric::new(c[0], c[1], c[2]))
                .collect(),
        );
    }
    Ok(rounds)
}

/// Load a [`ReplaySource`] from a replay script (see [`parse_replay`]).
pub fn load_replay(path: impl AsRef<Path>) -> Result<ReplaySource> {
    let path = path.as_ref();
    let text = fs::read_to_string(path).map_err(|source| Error::ParamFile {
        path: path.to_path_buf(),
        source,
    })?;
    let rounds = parse_replay(&text).map_err(|(line, details)| Error::ParamParse {
        path: path.to_path_buf(),
        line,
        details,
    })?;
    info!(path = %path.display(), snapshots = rounds.len(), "loaded replay script");
    Ok(ReplaySource::new(rounds))
}

/// Block until `source` reports at least `want` paths, polling every `poll`.
///
/// Returns the reported count, or [`Error::SourceTimeout`] after `timeout`.
pub fn wait_for_paths(
    source: &dyn MeasurementSource,
    want: usize,
    poll: Duration,
    timeout: Duration,
) -> Result<usize> {
    let start = Instant::now();
    info!(want, "waiting for measurement source paths");
    loop {
        let have = source.path_count();
        if have >= want {
            info!(have, "measurement source ready");
            return Ok(have);
        }
        let waited = start.elapsed();
        if waited >= timeout {
            return Err(Error::SourceTimeout {
                waited_ms: waited.as_millis(),
                want,
                have,
            });
        }
        debug!(have, want, "source not ready");
        thread::sleep(poll.min(timeout - waited));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizer_matches_reader_rules() {
        let n = Normalizer::new(100, 50).unwrap();
        let raw = [
            RawPathStats {
                rtt: 20,
                btlbw: 25,
                lost: 1,
                delivered: 10,
            },
            // Unused slot.
            RawPathStats::default(),
            RawPathStats {
                rtt: 300,
                btlbw: 50,
                lost: 3,
                delivered: 0,
            },
        ];
        let m = n.normalize(&raw);
        assert_eq!(m.len(), 2);
        assert_eq!(m[0], Metric::new(0.2, 0.5, 0.1));
        assert_eq!(m[1], Metric::new(1.0, 1.0, 0.0));
        assert!(Normalizer::new(0, 1).is_err());
        assert!(Normalizer::new(1, 0).is_err());
    }

    #[test]
    fn replay_walks_script_then_exhausts() {
        let src = ReplaySource::new(vec![
            vec![Metric::new(0.1, 0.1, 0.1), Metric::new(0.2, 0.2, 0.2)],
            vec![Metric::new(0.3, 0.3, 0.3)],
            vec![Metric::new(0.5, 0.5, 0.5), Metric::new(0.6, 0.6, 0.6)],
        ]);
        assert_eq!(src.path_count(), 2);
        assert_eq!(src.sample(0), None);
        assert_eq!(src.refresh().unwrap(), FeedStatus::Fresh);
        assert_eq!(src.sample(1), Some(Metric::new(0.2, 0.2, 0.2)));
        // Too few paths in the second snapshot: stale, previous snapshot kept.
        assert_eq!(src.refresh().unwrap(), FeedStatus::Stale);
        assert_eq!(src.sample(1), Some(Metric::new(0.2, 0.2, 0.2)));
        assert_eq!(src.refresh().unwrap(), FeedStatus::Fresh);
        assert_eq!(src.refresh().unwrap(), FeedStatus::Exhausted);
        assert_eq!(src.consumed(), 3);
    }

    #[test]
    fn replay_records_preferences() {
        let src = ReplaySource::new(vec![]);
        src.prefer(&[2, 0]).unwrap();
        src.prefer(&[1]).unwrap();
        assert_eq!(src.preferred(), vec![vec![2, 0], vec![1]]);
    }

    #[test]
    fn from_raw_normalizes_each_round() {
        let n = Normalizer::new(10, 10).unwrap();
        let raw = vec![vec![RawPathStats {
            rtt: 5,
            btlbw: 10,
            lost: 0,
            delivered: 4,
        }]];
        let src = ReplaySource::from_raw(&raw, 1, n);
        src.refresh().unwrap();
        assert_eq!(src.sample(0), Some(Metric::new(0.5, 1.0, 0.0)));
    }

    #[test]
    fn replay_script_parses_triples_per_line() {
        let text = "# round 0\n0.1 0.9 0.0  0.5 0.5 0.1\n\n0.2 0.8 0.0 0.6 0.4 0.2\n";
        let rounds = parse_replay(text).unwrap();
        assert_eq!(rounds.len(), 2);
        assert_eq!(rounds[1][1], Metric::new(0.6, 0.4, 0.2));
        assert_eq!(parse_replay("0.1 0.2\n").unwrap_err().0, 1);
        assert_eq!(parse_replay("# c\n0.1 x 0.3\n").unwrap_err().0, 2);
    }

    #[test]
    fn load_replay_reports_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("replay.txt");
        std::fs::write(&file, "0.1 0.9 0.0 0.2 0.8 0.0\n").unwrap();
        let src = load_replay(&file).unwrap();
        assert_eq!(src.path_count(), 2);
        assert!(matches!(
            load_replay(dir.path().join("missing.txt")),
            Err(Error::ParamFile { .. })
        ));
    }

    #[test]
    fn wait_for_paths_times_out() {
        let src = ReplaySource::with_path_count(vec![], 1);
        assert_eq!(
            wait_for_paths(&src, 1, Duration::from_millis(1), Duration::from_millis(5)).unwrap(),
            1
        );
        match wait_for_paths(&src, 3, Duration::from_millis(1), Duration::from_millis(5)) {
            Err(Error::SourceTimeout { want: 3, have: 1, .. }) => {}
            other => panic!("unexpected: {other:?}"),
        }
    }
}
