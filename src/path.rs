//! Transmission paths: sources of per-round [`Metric`] samples.
//!
//! A [`Path`] produces a fresh sample each round (`measurement`) and exposes its
//! reference/expected metric (`mean_metric`, constant after construction). Simulated
//! variants own a seeded `StdRng`; [`SourcePath`] reads whatever the shared
//! [`MeasurementSource`] fetched for the current round.

use std::fmt;
use std::rc::Rc;

use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};

use crate::error::{Error, Result};
use crate::metric::Metric;
use crate::seed::SeedSequence;
use crate::source::MeasurementSource;
use crate::utils::bernoulli_trial;

/// Which kind of path produced a sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum PathKind {
    Fixed,
    Bernoulli,
    Normal,
    Source,
}

impl fmt::Display for PathKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PathKind::Fixed => "fixed",
            PathKind::Bernoulli => "bernoulli",
            PathKind::Normal => "normal",
            PathKind::Source => "source",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for PathKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "fixed" | "fixvalue" => Ok(PathKind::Fixed),
            "bernoulli" => Ok(PathKind::Bernoulli),
            "normal" => Ok(PathKind::Normal),
            "source" | "kernel" => Ok(PathKind::Source),
            other => Err(Error::InvalidParameter {
                name: "path_kind",
                value: other.to_string(),
            }),
        }
    }
}

/// A measurable path.
pub trait Path {
    /// Sample this round's metric.
    fn measurement(&mut self) -> Metric;

    /// Expected (reference) metric.
    fn mean_metric(&self) -> Metric;

    fn kind(&self) -> PathKind;

    /// Human-readable parameters (tab-separated mean triple by default).
    fn info(&self) -> String {
        format!("\t{}", self.mean_metric())
    }
}

/// Deterministic path: every sample equals the configured metric.
#[derive(Debug, Clone)]
pub struct FixedPath {
    mean: Metric,
}

impl FixedPath {
    pub fn new(mean: Metric) -> Self {
        Self { mean }
    }
}

impl Path for FixedPath {
    fn measurement(&mut self) -> Metric {
        self.mean
    }

    fn mean_metric(&self) -> Metric {
        self.mean
    }

    fn kind(&self) -> PathKind {
        PathKind::Fixed
    }
}

/// Each signal is an independent Bernoulli draw with the configured mean.
#[derive(Debug, Clone)]
pub struct BernoulliPath {
    mean: Metric,
    rng: StdRng,
}

impl BernoulliPath {
    pub fn with_seed(mean: Metric, seed: u64) -> Self {
        Self {
            mean,
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl Path for BernoulliPath {
    fn measurement(&mut self) -> Metric {
        let mut draw = |mu: f64| if bernoulli_trial(&mut self.rng, mu) { 1.0 } else { 0.0 };
        let r = draw(self.mean.r);
        let b = draw(self.mean.b);
        let l = draw(self.mean.l);
        Metric::new(r, b, l)
    }

    fn mean_metric(&self) -> Metric {
        self.mean
    }

    fn kind(&self) -> PathKind {
        PathKind::Bernoulli
    }
}

/// Each signal drawn from `Normal(mean, stddev)` and clamped to `[0, 1]`.
#[derive(Debug, Clone)]
pub struct NormalPath {
    mean: Metric,
    stddev: Metric,
    rng: StdRng,
}

impl NormalPath {
    /// Standard deviations must be finite and non-negative.
    pub fn with_seed(mean: Metric, stddev: Metric, seed: u64) -> Result<Self> {
        for (name, s) in [("stddev_r", stddev.r), ("stddev_b", stddev.b), ("stddev_l", stddev.l)] {
            if !s.is_finite() || s < 0.0 {
                return Err(Error::InvalidParameter {
                    name,
                    value: s.to_string(),
                });
            }
        }
        Ok(Self {
            mean,
            stddev,
            rng: StdRng::seed_from_u64(seed),
        })
    }

    pub fn stddev(&self) -> Metric {
        self.stddev
    }

    fn draw(&mut self, mu: f64, sigma: f64) -> f64 {
        if sigma == 0.0 {
            return mu.clamp(0.0, 1.0);
        }
        match Normal::new(mu, sigma) {
            Ok(dist) => dist.sample(&mut self.rng).clamp(0.0, 1.0),
            Err(_) => mu.clamp(0.0, 1.0),
        }
    }
}

impl Path for NormalPath {
    fn measurement(&mut self) -> Metric {
        let (m, s) = (self.mean, self.stddev);
        let r = self.draw(m.r, s.r);
        let b = self.draw(m.b, s.b);
        let l = self.draw(m.l, s.l);
        Metric::new(r, b, l)
    }

    fn mean_metric(&self) -> Metric {
        self.mean
    }

    fn kind(&self) -> PathKind {
        PathKind::Normal
    }

    fn info(&self) -> String {
        format!("\t{}\t(sd {})", self.mean, self.stddev)
    }
}

/// Live path backed by a shared measurement source (index into its snapshot).
pub struct SourcePath {
    index: usize,
    reference: Metric,
    last: Metric,
    source: Rc<dyn MeasurementSource>,
}

impl SourcePath {
    /// `reference` is reported as the mean metric ([`source_paths`] uses `(0, 1, 0)`).
    pub fn new(index: usize, reference: Metric, source: Rc<dyn MeasurementSource>) -> Self {
        Self {
            index,
            reference,
            last: reference,
            source,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }
}

impl fmt::Debug for SourcePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourcePath")
            .field("index", &self.index)
            .field("reference", &self.reference)
            .field("last", &self.last)
            .finish_non_exhaustive()
    }
}

impl Path for SourcePath {
    /// The source's current value for this path; the previous sample if it has none.
    fn measurement(&mut self) -> Metric {
        if let Some(m) = self.source.sample(self.index) {
            self.last = m;
        }
        self.last
    }

    fn mean_metric(&self) -> Metric {
        self.reference
    }

    fn kind(&self) -> PathKind {
        PathKind::Source
    }
}

/// Build simulated paths from parameter triples.
///
/// `stddev` is used only for [`PathKind::Normal`]; [`PathKind::Source`] paths need a live
/// source and are built with [`source_paths`] instead.
pub fn build_paths(
    params: &[Metric],
    kind: PathKind,
    seeds: &SeedSequence,
    stddev: f64,
) -> Result<Vec<Box<dyn Path>>> {
    let mut paths: Vec<Box<dyn Path>> = Vec::with_capacity(params.len());
    for (i, &mean) in params.iter().enumerate() {
        let seed = seeds.seed_for("path", i);
        let path: Box<dyn Path> = match kind {
            PathKind::Fixed => Box::new(FixedPath::new(mean)),
            PathKind::Bernoulli => Box::new(BernoulliPath::with_seed(mean, seed)),
            PathKind::Normal => Box::new(NormalPath::with_seed(
                mean,
                Metric::new(stddev, stddev, stddev),
                seed,
            )?),
            PathKind::Source => {
                return Err(Error::InvalidParameter {
                    name: "path_kind",
                    value: "source paths need a measurement source".to_string(),
                })
            }
        };
        paths.push(path);
    }
    Ok(paths)
}

/// One [`SourcePath`] per index `0..count`, all sharing `source`.
pub fn source_paths(count: usize, source: Rc<dyn MeasurementSource>) -> Vec<Box<dyn Path>> {
    (0..count)
        .map(|i| {
            Box::new(SourcePath::new(i, Metric::new(0.0, 1.0, 0.0), Rc::clone(&source)))
                as Box<dyn Path>
        })
        .collect()
}
