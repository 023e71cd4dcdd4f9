//! Parameter file in, log files out.

use pathbandit::{
    build_paths, build_policies, load_path_parameters, PathKind, PolicyKind, RewardLog,
    RoundLog, SeedSequence, SimulationConfig, Simulator,
};
use std::fs;
use std::time::Duration;

#[test]
fn averaged_logs_cover_every_round_and_policy() {
    let dir = tempfile::tempdir().unwrap();
    let params_path = dir.path().join("paraFile.txt");
    fs::write(
        &params_path,
        "# latency bandwidth loss\n0.2 0.8 0.0\n0.5 0.5 0.1\n0.9 0.2 0.3\n",
    )
    .unwrap();

    let cfg = SimulationConfig::default()
        .with_m(2)
        .with_rounds(40)
        .with_repetitions(3)
        .with_seed(Some(11))
        .with_poll_interval(Duration::ZERO)
        .with_policies(vec![PolicyKind::ConMptsLatency, PolicyKind::KlUcb]);
    let params = load_path_parameters(&params_path).unwrap();
    let seeds = SeedSequence::new(cfg.seed);
    let paths = build_paths(&params, PathKind::Bernoulli, &seeds, cfg.stddev).unwrap();
    let policies = build_policies(&cfg.policies, params.len(), &cfg, &seeds).unwrap();
    let mut sim = Simulator::new(paths, policies, &cfg).unwrap();
    let names = sim.policy_names();
    assert_eq!(names, vec!["ConMPTSLatency", "KL-UCB"]);

    let mut round_log = RoundLog::new(names.len(), cfg.rounds, params.len());
    let mut reward_log = RewardLog::new(names.len(), cfg.rounds);
    sim.run_repetitions(
        &mut (&mut round_log, &mut reward_log),
        cfg.repetitions,
        cfg.rounds,
    )
    .unwrap();

    let log_path = dir.path().join("pathLog.txt");
    round_log.write_file(&log_path, &names).unwrap();
    let text = fs::read_to_string(&log_path).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines[0], "# result in: 3 simulations.");
    assert_eq!(lines[1], "# policy 0 ConMPTSLatency");
    assert_eq!(lines[2], "# policy 1 KL-UCB");
    let rows: Vec<&str> = lines.iter().copied().filter(|l| !l.starts_with('#')).collect();
    assert_eq!(rows.len(), 40);
    for row in rows {
        let cols: Vec<f64> = row.split(' ').map(|c| c.parse().unwrap()).collect();
        assert_eq!(cols.len(), 1 + 2 * 3 * 4);
        // Selection frequencies of each policy sum to M.
        assert!((cols[1..4].iter().sum::<f64>() - 2.0).abs() < 1e-5);
        assert!((cols[4..7].iter().sum::<f64>() - 2.0).abs() < 1e-5);
    }

    let reward_path = dir.path().join("rewardLog.txt");
    reward_log.write_file(&reward_path, &names).unwrap();
    let text = fs::read_to_string(&reward_path).unwrap();
    assert!(text.starts_with("#averaged result over 3 simulations."));
    assert_eq!(text.lines().filter(|l| !l.starts_with('#')).count(), 40);
    // Bernoulli bandwidth is 0 or 1 per path: cumulative reward is bounded by 2 * t.
    let last = reward_log.cumulative(1, 39);
    assert!(last.reward >= 0.0 && last.reward <= 80.0);
    assert!(last.violation >= 0.0);
}
