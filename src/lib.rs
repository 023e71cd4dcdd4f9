//! `pathbandit`: constrained combinatorial bandits for multipath path selection.
//!
//! Every round a policy chooses `M` of `K` network paths, observes one [`Metric`]
//! (latency `r`, bandwidth `b`, loss `l`) per selected path, and learns from it. The
//! goal is to maximize aggregate bandwidth, optionally subject to a constraint on latency,
//! loss, or a bandwidth floor.
//!
//! **Policies** (all implement [`PathPolicy`]):
//! - [`ConMpts`]: constrained multiple-play Thompson sampling. Beta posteriors per path and
//!   signal are sampled, a linear program ([`LinearProgram`]) finds the best fractional
//!   selection under the constraint, and [`dependent_rounding`] turns it into exactly `M`
//!   paths. Infeasible programs fall back to the `M` paths with the lowest sampled cost.
//! - [`Mpts`]: unconstrained multiple-play Thompson sampling on bandwidth.
//! - [`KlUcb`]: KL-UCB indices (basic top-`M`, or leader mode).
//! - [`Exp3M`]: EXP3.M with weight capping for adversarial rewards.
//! - [`RandomPolicy`]: uniform baseline.
//!
//! **Running**: [`Simulator`] drives policies over [`Path`]s for `T` rounds and
//! reports into a [`RoundRecorder`] ([`RoundLog`], [`RewardLog`]). A live
//! [`MeasurementSource`] replaces simulated paths for real transfers: the simulator
//! delivers each selection with `prefer` and reads the next snapshot.
//!
//! Every stochastic component owns a seeded `StdRng`; [`SeedSequence`] derives them all
//! from one master seed, so a run is reproducible.
//!
//! ```rust
//! use pathbandit::{
//!     build_paths, build_policy, PathKind, PolicyKind, RoundLog, SeedSequence,
//!     SimulationConfig, Simulator, Metric,
//! };
//!
//! let params = vec![
//!     Metric::new(0.2, 0.8, 0.0),
//!     Metric::new(0.5, 0.5, 0.1),
//!     Metric::new(0.9, 0.2, 0.3),
//! ];
//! let cfg = SimulationConfig::default().with_m(1).with_rounds(200).with_seed(Some(7));
//! let seeds = SeedSequence::new(cfg.seed);
//! let paths = build_paths(&params, PathKind::Fixed, &seeds, cfg.stddev).unwrap();
//! let policy = build_policy(PolicyKind::ConMptsLatency, params.len(), &cfg, 1).unwrap();
//!
//! let mut sim = Simulator::new(paths, vec![policy], &cfg).unwrap();
//! let mut log = RoundLog::new(1, cfg.rounds, params.len());
//! sim.run(&mut log, cfg.rounds).unwrap();
//! assert_eq!(log.repetitions(), 1);
//! ```
//!
//! **Non-goals**: no kernel or socket transport (that lives behind
//! [`MeasurementSource`]), no plotting, no parallel repetitions inside one simulator.

#![forbid(unsafe_code)]

mod error;
pub use error::{Error, Result};

mod metric;
pub use metric::*;

mod utils;
pub use utils::*;

mod seed;
pub use seed::*;

mod rounding;
pub use rounding::*;

mod lp;
pub use lp::*;

mod source;
pub use source::*;

mod path;
pub use path::*;

mod decision;
pub use decision::*;

mod policy;
pub use policy::{build_policies, build_policy, check_m, PathPolicy};

mod mpts;
pub use mpts::{BetaArm, Mpts};

mod conmpts;
pub use conmpts::*;

mod klucb;
pub use klucb::*;

mod exp3m;
pub use exp3m::*;

mod random;
pub use random::*;

mod config;
pub use config::*;

mod log;
pub use log::*;

mod simulator;
pub use simulator::*;
