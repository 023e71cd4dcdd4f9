//! Dependent rounding: fractional selection vector -> exact `l`-subset.
//!
//! Given marginals `ps` (entries in `[0, 1]`, summing to `l`), produce exactly `l`
//! distinct indices such that index `i` is included with probability `ps[i]`.
//!
//! Each step picks two undetermined entries `(i, j)` and moves probability mass
//! between them so that at least one hits `0` or `1`:
//!
//! ```text
//!   alpha = min(1 - p_i, p_j)
//!   beta  = min(p_i, 1 - p_j)
//!   with prob beta / (alpha + beta):  p_i += alpha, p_j -= alpha
//!   otherwise:                        p_i -= beta,  p_j += beta
//! ```
//!
//! The expected change of each entry is zero, so marginals are preserved exactly and
//! the sum (hence the final cardinality) is invariant. Entries within `1e-3` of `0`/`1`
//! are treated as determined.

use rand::seq::SliceRandom;
use rand::Rng;

use crate::error::{Error, Result};

/// Sum tolerance on the input vector.
pub const SUM_TOLERANCE: f64 = 1e-3;

const HI: f64 = 0.999;
const LO: f64 = 0.001;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Open,
    Out,
    In,
}

fn classify(p: f64) -> Slot {
    if p > HI {
        Slot::In
    } else if p < LO {
        Slot::Out
    } else {
        Slot::Open
    }
}

/// Round `ps` into exactly `l` indices (ascending order).
///
/// Errors (both precondition violations):
/// - [`Error::ProbabilitySum`] if `|sum(ps) - l| > 1e-3`;
/// - [`Error::RoundingCardinality`] if the post-condition `count == l` fails.
pub fn dependent_rounding<R: Rng + ?Sized>(l: usize, ps: &[f64], rng: &mut R) -> Result<Vec<usize>> {
    let total: f64 = ps.iter().sum();
    if !total.is_finite() || (total - l as f64).abs() > SUM_TOLERANCE {
        return Err(Error::ProbabilitySum {
            expected: l,
            actual: total,
        });
    }

    let k = ps.len();
    let mut p = ps.to_vec();
    let mut slots: Vec<Slot> = p.iter().map(|&x| classify(x)).collect();

    // One random visiting order for the whole procedure.
    let mut order: Vec<usize> = (0..k).collect();
    order.shuffle(rng);

    loop {
        let mut open = order.iter().copied().filter(|&i| slots[i] == Slot::Open);
        let Some(i) = open.next() else {
            break;
        };
        let Some(j) = open.next() else {
            slots[i] = if p[i] > 0.5 { Slot::In } else { Slot::Out };
            break;
        };

        let alpha = (1.0 - p[i]).min(p[j]);
        let beta = p[i].min(1.0 - p[j]);
        let u: f64 = rng.random();
        let (pi, pj) = if u < beta / (alpha + beta) {
            (p[i] + alpha, p[j] - alpha)
        } else {
            (p[i] - beta, p[j] + beta)
        };

        for (idx, val) in [(i, pi), (j, pj)] {
            match classify(val) {
                Slot::Open => p[idx] = val,
                decided => slots[idx] = decided,
            }
        }
    }

    let chosen: Vec<usize> = (0..k).filter(|&i| slots[i] == Slot::In).collect();
    if chosen.len() != l {
        return Err(Error::RoundingCardinality {
            expected: l,
            actual: chosen.len(),
        });
    }
    Ok(chosen)
}
