//! Small vector helpers shared by the policies.
//!
//! Ordering helpers are stable: ties keep ascending index order, so a policy that
//! ranks identical scores always picks the lowest path index first.

use rand::Rng;

use crate::error::{ensure_same_len, Result};

/// Indices of the `m` largest values (descending; ties broken by index).
pub fn top_m_indices(values: &[f64], m: usize) -> Vec<usize> {
    let mut idx: Vec<usize> = (0..values.len()).collect();
    idx.sort_by(|&i, &j| values[j].total_cmp(&values[i]));
    idx.truncate(m);
    idx
}

/// Indices of the `m` smallest values (ascending; ties broken by index).
pub fn bottom_m_indices(values: &[f64], m: usize) -> Vec<usize> {
    let mut idx: Vec<usize> = (0..values.len()).collect();
    idx.sort_by(|&i, &j| values[i].total_cmp(&values[j]));
    idx.truncate(m);
    idx
}

/// Dot product; mismatched lengths are a precondition violation.
pub fn dot(a: &[f64], b: &[f64]) -> Result<f64> {
    ensure_same_len(a.len(), b.len())?;
    Ok(a.iter().zip(b).map(|(x, y)| x * y).sum())
}

/// One Bernoulli trial with success probability `mu` (values outside `[0, 1]` saturate).
pub fn bernoulli_trial<R: Rng + ?Sized>(rng: &mut R, mu: f64) -> bool {
    let u: f64 = rng.random();
    u < mu
}
