//! Per-path measurement triple.

use std::fmt;
use std::ops::{Add, AddAssign};

/// One measurement of a path: latency-type `r`, bandwidth-type `b`, loss-type `l`.
///
/// In simulated mode every component lies in `[0, 1]` (normalized RTT, normalized
/// bottleneck bandwidth, loss rate). Values derived from live counters are not clamped
/// beyond what [`crate::Normalizer`] does.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Metric {
    /// Latency signal (lower is better).
    pub r: f64,
    /// Bandwidth signal (higher is better).
    pub b: f64,
    /// Loss signal (lower is better).
    pub l: f64,
}

impl Metric {
    /// All-zero metric (the additive identity).
    pub const ZERO: Metric = Metric {
        r: 0.0,
        b: 0.0,
        l: 0.0,
    };

    pub const fn new(r: f64, b: f64, l: f64) -> Self {
        Self { r, b, l }
    }

    /// Component-wise mean of a sum accumulated over `n` samples.
    ///
    /// `n == 0` yields [`Metric::ZERO`] rather than NaNs.
    pub fn average_over(&self, n: u64) -> Metric {
        if n == 0 {
            return Metric::ZERO;
        }
        let n = n as f64;
        Metric::new(self.r / n, self.b / n, self.l / n)
    }
}

impl Add for Metric {
    type Output = Metric;

    fn add(self, rhs: Metric) -> Metric {
        Metric::new(self.r + rhs.r, self.b + rhs.b, self.l + rhs.l)
    }
}

impl AddAssign for Metric {
    fn add_assign(&mut self, rhs: Metric) {
        self.r += rhs.r;
        self.b += rhs.b;
        self.l += rhs.l;
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}\t{}\t{}", self.r, self.b, self.l)
    }
}
