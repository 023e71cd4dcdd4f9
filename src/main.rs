//! `pathbandit` command line: run path-selection policies over simulated or replayed
//! paths and write the round-wise logs.

use std::path::PathBuf;
use std::process::ExitCode;
use std::rc::Rc;
use std::time::Duration;

use clap::Parser;
use pathbandit::{
    build_paths, build_policies, load_path_parameters, load_replay, source_paths,
    wait_for_paths, Error, MeasurementSource, PathKind, PolicyKind, RewardLog, RoundLog,
    RoundMode, RunOutcome, SeedSequence, SimulationConfig, Simulator,
};
use tracing::{error, info};

/// Poll period and patience while waiting for a replayed source to report enough paths.
const SOURCE_POLL: Duration = Duration::from_millis(10);
const SOURCE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Parser)]
#[command(
    name = "pathbandit",
    about = "Constrained bandit path selection: select M of K paths per round and log the outcome"
)]
struct Args {
    /// Independent repetitions averaged into the log
    #[arg(short = 'n', long = "times", default_value_t = 1)]
    times: usize,

    /// Paths selected per round
    #[arg(short = 'M', default_value_t = 2)]
    m: usize,

    /// Rounds per repetition
    #[arg(short = 'T', long, default_value_t = 10_000)]
    rounds: usize,

    /// Path parameter file: one `latency bandwidth loss` triple per line
    #[arg(short = 'f', long, default_value = "./pathdata/paraFile.txt")]
    file: PathBuf,

    /// Round-wise log output
    #[arg(short = 'o', long, default_value = "pathLog.txt")]
    output: PathBuf,

    /// Constraint bound of the ConMPTS policies
    #[arg(long, default_value_t = 0.4)]
    threshold: f64,

    /// Wait between steering and reading measurements (microseconds)
    #[arg(short = 'D', long = "delta", default_value_t = 100)]
    delta_us: u64,

    /// Run until the measurement source ends; no log is written
    #[arg(short = 'F', long)]
    forever: bool,

    /// Forgetting rate of the damped update
    #[arg(short = 'd', long, default_value_t = 0.01)]
    damping: f64,

    /// Master seed (default: OS entropy)
    #[arg(short = 's', long)]
    seed: Option<u64>,

    /// Policy to run; repeat for several (default: conmpts-latency)
    #[arg(long = "policy")]
    policies: Vec<PolicyKind>,

    /// fixed | bernoulli | normal | source
    #[arg(long = "path-type", default_value = "fixed")]
    path_type: PathKind,

    /// Standard deviation of normal paths
    #[arg(long, default_value_t = 0.1)]
    stddev: f64,

    /// vanilla | damped | averaged
    #[arg(long, default_value = "vanilla")]
    mode: RoundMode,

    /// EXP3.M exploration rate
    #[arg(long, default_value_t = 0.1)]
    gamma: f64,

    /// Also write cumulative reward / regret / violation here
    #[arg(long)]
    reward_output: Option<PathBuf>,

    /// Use the leader variant of KL-UCB
    #[arg(long)]
    klucb_leader: bool,

    /// Replay script feeding `--path-type source` (one snapshot per line)
    #[arg(long)]
    replay: Option<PathBuf>,
}

impl Args {
    fn config(&self) -> SimulationConfig {
        let defaults = SimulationConfig::default();
        let policies = if self.policies.is_empty() {
            defaults.policies.clone()
        } else {
            self.policies.clone()
        };
        SimulationConfig {
            repetitions: self.times,
            rounds: self.rounds,
            m: self.m,
            threshold: self.threshold,
            poll_interval: Duration::from_micros(self.delta_us),
            forever: self.forever,
            damping: self.damping,
            seed: self.seed,
            mode: self.mode,
            gamma: self.gamma,
            policies,
            path_kind: self.path_type,
            stddev: self.stddev,
            klucb_leader: self.klucb_leader,
            param_file: self.file.clone(),
            output: self.output.clone(),
            reward_output: self.reward_output.clone(),
            ..defaults
        }
    }
}

fn run(args: &Args) -> pathbandit::Result<()> {
    let cfg = args.config();
    cfg.validate()?;
    let seeds = SeedSequence::new(cfg.seed);
    info!(seed = seeds.master(), "seeded run");

    let (paths, source) = match cfg.path_kind {
        PathKind::Source => {
            let replay = args.replay.as_ref().ok_or_else(|| Error::InvalidParameter {
                name: "replay",
                value: "source paths need --replay".to_string(),
            })?;
            let source: Rc<dyn MeasurementSource> = Rc::new(load_replay(replay)?);
            let k = wait_for_paths(source.as_ref(), cfg.m.max(1), SOURCE_POLL, SOURCE_TIMEOUT)?;
            (source_paths(k, Rc::clone(&source)), Some(source))
        }
        kind => {
            let params = load_path_parameters(&cfg.param_file)?;
            (build_paths(&params, kind, &seeds, cfg.stddev)?, None)
        }
    };

    let k = paths.len();
    let policies = build_policies(&cfg.policies, k, &cfg, &seeds)?;
    for p in &policies {
        info!(policy = %p.info(), "policy");
    }
    let mut sim = Simulator::new(paths, policies, &cfg)?;
    if let Some(source) = source {
        sim = sim.with_source(source);
    }
    let names = sim.policy_names();

    let mut round_log = if cfg.forever {
        RoundLog::disabled(names.len(), k)
    } else {
        RoundLog::new(names.len(), cfg.rounds, k)
    };
    let mut reward_log = RewardLog::new(names.len(), if cfg.forever { 0 } else { cfg.rounds });
    let outcome = sim.run_repetitions(
        &mut (&mut round_log, &mut reward_log),
        cfg.repetitions,
        cfg.rounds,
    )?;
    if let RunOutcome::SourceExhausted { round } = outcome {
        info!(round, "transmission ended");
        return Ok(());
    }

    round_log.write_file(&cfg.output, &names)?;
    info!(path = %cfg.output.display(), "wrote round log");
    if let Some(path) = &cfg.reward_output {
        reward_log.write_file(path, &names)?;
        info!(path = %path.display(), "wrote reward log");
    }
    Ok(())
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_file(true)
        .with_line_number(true)
        .with_target(true)
        .init();

    let args = Args::parse();
    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, precondition = e.is_precondition(), "fatal");
            eprintln!("pathbandit: {e}");
            ExitCode::FAILURE
        }
    }
}
