//! Deterministic seed derivation.
//!
//! Every stochastic component (each policy, each simulated path) owns its own `StdRng`.
//! A run is reproducible from a single master seed: component seeds are derived from
//! `(master, label)` with FNV-1a over the label and a SplitMix64 finalizer. Not
//! cryptographic.

/// Derive a component seed from a master seed and a stable label.
#[must_use]
pub fn derive_seed(master: u64, label: &str) -> u64 {
    let mut h: u64 = 14695981039346656037u64;
    for b in label.as_bytes() {
        h ^= *b as u64;
        h = h.wrapping_mul(1099511628211u64);
    }
    splitmix64(master ^ h)
}

#[inline]
fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9E37_79B9_7F4A_7C15);
    let mut z = x;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

/// Hands out per-component seeds for one run.
///
/// `SeedSequence::new(None)` draws the master seed from OS entropy; pass `Some(seed)`
/// for reproducible runs.
#[derive(Debug, Clone)]
pub struct SeedSequence {
    master: u64,
}

impl SeedSequence {
    pub fn new(master: Option<u64>) -> Self {
        Self {
            master: master.unwrap_or_else(rand::random),
        }
    }

    /// The master seed (log it to reproduce an entropy-seeded run).
    pub fn master(&self) -> u64 {
        self.master
    }

    /// Seed for the `index`-th component of a family (e.g. `("path", 3)`).
    pub fn seed_for(&self, family: &str, index: usize) -> u64 {
        derive_seed(self.master, &format!("{family}/{index}"))
    }

    /// An independent sequence for one repetition of a run.
    pub fn for_repetition(&self, repetition: usize) -> SeedSequence {
        SeedSequence {
            master: derive_seed(self.master, &format!("repetition/{repetition}")),
        }
    }
}
