//! Unified selection envelope for policy outputs.
//!
//! Every policy returns a [`Selection`]: the ordered M-subset plus typed
//! [`SelectionNote`]s saying why this subset was chosen (LP optimum, fallback,
//! posterior top-M, ...). The simulator logs the notes at `debug` level, and tests use
//! them to tell the "normal" path apart from a fallback without heuristics.

use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// Which policy produced a selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum PolicyKind {
    ConMptsLatency,
    ConMptsLoss,
    ConMptsBandwidth,
    Mpts,
    KlUcb,
    Exp3M,
    Random,
}

impl PolicyKind {
    /// Every kind, in the order the CLI lists them.
    pub const ALL: [PolicyKind; 7] = [
        PolicyKind::ConMptsLatency,
        PolicyKind::ConMptsLoss,
        PolicyKind::ConMptsBandwidth,
        PolicyKind::Mpts,
        PolicyKind::KlUcb,
        PolicyKind::Exp3M,
        PolicyKind::Random,
    ];

    /// Whether the kind solves a constrained LP each round.
    pub fn is_constrained(self) -> bool {
        matches!(
            self,
            PolicyKind::ConMptsLatency | PolicyKind::ConMptsLoss | PolicyKind::ConMptsBandwidth
        )
    }
}

impl fmt::Display for PolicyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PolicyKind::ConMptsLatency => "conmpts-latency",
            PolicyKind::ConMptsLoss => "conmpts-loss",
            PolicyKind::ConMptsBandwidth => "conmpts-bandwidth",
            PolicyKind::Mpts => "mpts",
            PolicyKind::KlUcb => "klucb",
            PolicyKind::Exp3M => "exp3m",
            PolicyKind::Random => "random",
        };
        f.write_str(s)
    }
}

impl FromStr for PolicyKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let norm: String = s
            .chars()
            .filter(|c| !matches!(c, '-' | '_' | '.'))
            .collect::<String>()
            .to_ascii_lowercase();
        match norm.as_str() {
            "conmptslatency" | "latency" => Ok(PolicyKind::ConMptsLatency),
            "conmptsloss" | "loss" => Ok(PolicyKind::ConMptsLoss),
            "conmptsbandwidth" | "bandwidth" => Ok(PolicyKind::ConMptsBandwidth),
            "mpts" => Ok(PolicyKind::Mpts),
            "klucb" => Ok(PolicyKind::KlUcb),
            "exp3m" => Ok(PolicyKind::Exp3M),
            "random" => Ok(PolicyKind::Random),
            _ => Err(Error::InvalidParameter {
                name: "policy",
                value: s.to_string(),
            }),
        }
    }
}

/// Audit notes attached to a selection.
///
/// Notes are small and typed. Prefer adding new variants over changing existing semantics.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SelectionNote {
    /// The constrained LP was feasible and its fractional optimum was rounded.
    LpFeasible { objective: f64 },

    /// The LP failed; the deterministic lowest-estimate fallback was used.
    LpFallback { reason: String },

    /// Dependent rounding rejected the LP output; the deterministic fallback was used.
    RoundingFallback { reason: String },

    /// Per-path posterior samples were drawn and the M highest kept.
    SampledPosteriorTopM,

    /// Running averages were used instead of posterior samples.
    AveragedEstimates,

    /// Top-M by upper-confidence index; `unvisited` paths were forced in first.
    IndexTopM { unvisited: usize },

    /// M-1 empirical leaders plus the best-index challenger.
    LeaderPlusChallenger { challenger: usize },

    /// EXP3.M capped the heaviest weights at `alpha` before mixing.
    CappedWeights { alpha: f64 },

    /// M equals K: every path is selected.
    AllPaths,

    /// Uniform draw without replacement.
    Uniform,
}

/// A single policy decision for one round.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Selection {
    /// The policy that produced this selection.
    pub policy: PolicyKind,
    /// Exactly M distinct path indices.
    pub paths: Vec<usize>,
    /// Per-path inclusion probabilities, when the policy has them.
    pub probs: Option<Vec<f64>>,
    pub notes: Vec<SelectionNote>,
}

impl Selection {
    pub fn new(policy: PolicyKind, paths: Vec<usize>) -> Self {
        Self {
            policy,
            paths,
            probs: None,
            notes: Vec::new(),
        }
    }

    pub fn with_probs(mut self, probs: Vec<f64>) -> Self {
        self.probs = Some(probs);
        self
    }

    pub fn with_note(mut self, note: SelectionNote) -> Self {
        self.notes.push(note);
        self
    }

    /// Whether a deterministic fallback replaced the normal decision.
    pub fn used_fallback(&self) -> bool {
        self.notes.iter().any(|n| {
            matches!(
                n,
                SelectionNote::LpFallback { .. } | SelectionNote::RoundingFallback { .. }
            )
        })
    }
}
