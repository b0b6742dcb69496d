use anyhow::Context;
use clap::Parser;
use fesim::core::agent::AgentPars;
use fesim::core::controller::DriverPolicy;
use fesim::core::events::RaceEvent;
use fesim::core::handle_race::handle_race;
use fesim::core::track::{SegmentKind, SegmentPars, TrackPars};
use fesim::interfaces::snapshot::RaceSnapshot;
use fesim::pre::config::{read_sim_pars, SimPars};
use fesim::pre::sim_opts::SimOpts;
use log::{debug, info};
use rayon::prelude::*;
use std::collections::HashMap;
use std::thread;

fn main() -> anyhow::Result<()> {
    let opts = SimOpts::parse();

    let mut logger = env_logger::Builder::from_default_env();
    if opts.debug {
        logger.filter_level(log::LevelFilter::Debug);
    } else {
        logger.filter_level(log::LevelFilter::Info);
    }
    logger.init();

    // load the parameter file or fall back to the built-in demo race
    let mut sim_pars = match &opts.parfile_path {
        Some(path) => read_sim_pars(path)?,
        None => {
            info!("No parameter file given, running the built-in demo race");
            demo_sim_pars()
        }
    };

    // command line overrides
    if let Some(seed) = opts.seed {
        sim_pars.config.race.seed = seed;
    }
    if let Some(timestep_size) = opts.timestep_size {
        sim_pars.config.race.dt = timestep_size;
    }
    if let Some(num_laps) = opts.num_laps {
        sim_pars.config.race.num_laps = num_laps;
    }

    if opts.no_sim_runs <= 1 {
        run_single(&sim_pars, &opts)
    } else {
        run_batch(&sim_pars, &opts)
    }
}

/// run_single simulates one race, optionally streaming live snapshots to a
/// consumer thread, and prints the final classification.
fn run_single(sim_pars: &SimPars, opts: &SimOpts) -> anyhow::Result<()> {
    info!(
        "Simulating {} laps on '{}' with seed {}",
        sim_pars.config.race.num_laps, sim_pars.track_pars.name, sim_pars.config.race.seed
    );

    let result = if opts.live {
        let (tx, rx) = flume::bounded::<RaceSnapshot>(64);
        let printer = thread::spawn(move || {
            let mut t_last_print = f64::NEG_INFINITY;
            for snapshot in rx.iter() {
                for timed in snapshot.events.iter() {
                    print_event(timed.t, &timed.event);
                }
                if snapshot.t - t_last_print >= 5.0 {
                    if let Some(leader) = snapshot.standings.entries.first() {
                        info!(
                            "t={:7.2}s  lap {:2}  leader {} (#{})",
                            snapshot.t, snapshot.standings.leader_lap, leader.initials,
                            leader.agent_id
                        );
                    }
                    t_last_print = snapshot.t;
                }
            }
        });

        let result = handle_race(sim_pars, Some(&tx)).context("Race simulation failed!")?;
        drop(tx);
        printer.join().expect("Live consumer thread panicked!");
        result
    } else {
        let result = handle_race(sim_pars, None).context("Race simulation failed!")?;
        for timed in result.events.iter() {
            print_event(timed.t, &timed.event);
        }
        result
    };

    result.print_standings();
    debug!("{} events over {} ticks", result.events.len(), result.event_ticks.len());

    if let Some(csv_path) = &opts.csv_path {
        let written = result
            .write_laptimes_csv(csv_path)
            .context("Failed to write lap time table!")?;
        info!("Lap times written to {}", written);
    }

    Ok(())
}

/// run_batch simulates the same race under consecutive seeds in parallel and
/// prints a win/retirement table.
fn run_batch(sim_pars: &SimPars, opts: &SimOpts) -> anyhow::Result<()> {
    let base_seed = sim_pars.config.race.seed;
    info!(
        "Simulating {} runs with seeds {}..{}",
        opts.no_sim_runs,
        base_seed,
        base_seed + opts.no_sim_runs as u64 - 1
    );

    let outcomes: Vec<anyhow::Result<(String, u32)>> = (0..opts.no_sim_runs as u64)
        .into_par_iter()
        .map(|run| {
            let mut run_pars = sim_pars.clone();
            run_pars.config.race.seed = base_seed + run;
            let result = handle_race(&run_pars, None)
                .with_context(|| format!("Run with seed {} failed!", base_seed + run))?;
            let winner = result
                .standings
                .entries
                .first()
                .map(|entry| entry.initials.clone())
                .unwrap_or_else(|| "---".to_string());
            let retirements = result
                .standings
                .entries
                .iter()
                .filter(|entry| !entry.active)
                .count() as u32;
            Ok((winner, retirements))
        })
        .collect();

    let mut wins: HashMap<String, u32> = HashMap::new();
    let mut retirements_total = 0;
    for outcome in outcomes {
        let (winner, retirements) = outcome?;
        *wins.entry(winner).or_insert(0) += 1;
        retirements_total += retirements;
    }

    println!("RESULT: Wins over {} runs", opts.no_sim_runs);
    let mut wins_sorted: Vec<(String, u32)> = wins.into_iter().collect();
    wins_sorted.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
    for (initials, count) in wins_sorted {
        println!("{:4}  {:3} wins", initials, count);
    }
    println!(
        "Average retirements per race: {:.2}",
        retirements_total as f64 / opts.no_sim_runs as f64
    );

    Ok(())
}

fn print_event(t: f64, event: &RaceEvent) {
    match event {
        RaceEvent::Overtake {
            attacker, defender, ..
        } => info!("t={:7.2}s  OVERTAKE: #{} passes #{}", t, attacker, defender),
        RaceEvent::Crash { agent, risk } => {
            info!("t={:7.2}s  CRASH: #{} is out (risk {:.2})", t, agent, risk)
        }
        RaceEvent::SafetyCarDeploy { .. } => info!("t={:7.2}s  SAFETY CAR DEPLOYED", t),
        RaceEvent::SafetyCarWithdraw => info!("t={:7.2}s  SAFETY CAR IN", t),
        RaceEvent::AttackActivate { agent, .. } => {
            info!("t={:7.2}s  ATTACK MODE: #{} armed", t, agent)
        }
        RaceEvent::AttackExpire { agent } => {
            info!("t={:7.2}s  ATTACK MODE: #{} expired", t, agent)
        }
        RaceEvent::MechanicalFailure { agent, cause } => {
            info!("t={:7.2}s  MECHANICAL: #{} retires ({:?})", t, agent, cause)
        }
        RaceEvent::LapComplete { .. } => {}
    }
}

/// demo_sim_pars builds a compact street circuit and a twelve-car field so
/// the simulator runs out of the box.
fn demo_sim_pars() -> SimPars {
    let half_turn = 55.0 * std::f64::consts::PI;
    let track_pars = TrackPars {
        name: "demo-street-circuit".to_string(),
        segments: vec![
            SegmentPars {
                kind: SegmentKind::Straight,
                length: 650.0,
                radius: None,
                banking: 0.0,
                camber: 0.0,
                elevation_delta: 0.0,
                grip_multiplier: 1.0,
                ideal_speed: 72.0,
                in_attack_zone: true,
            },
            SegmentPars {
                kind: SegmentKind::LeftCorner,
                length: half_turn,
                radius: Some(55.0),
                banking: 0.03,
                camber: 0.0,
                elevation_delta: 3.0,
                grip_multiplier: 0.95,
                ideal_speed: 25.0,
                in_attack_zone: false,
            },
            SegmentPars {
                kind: SegmentKind::Chicane,
                length: 140.0,
                radius: Some(45.0),
                banking: 0.0,
                camber: 0.0,
                elevation_delta: -1.0,
                grip_multiplier: 1.0,
                ideal_speed: 32.0,
                in_attack_zone: false,
            },
            SegmentPars {
                kind: SegmentKind::Straight,
                length: 480.0,
                radius: None,
                banking: 0.0,
                camber: 0.0,
                elevation_delta: -2.0,
                grip_multiplier: 1.05,
                ideal_speed: 68.0,
                in_attack_zone: true,
            },
            SegmentPars {
                kind: SegmentKind::LeftCorner,
                length: half_turn,
                radius: Some(55.0),
                banking: 0.0,
                camber: 0.0,
                elevation_delta: 0.0,
                grip_multiplier: 1.0,
                ideal_speed: 25.0,
                in_attack_zone: false,
            },
        ],
        ds_geom: 1.0,
    };

    let roster = [
        ("JEV", "Jean-Eric Vergne", 0.92, 0.55, 0.88),
        ("SBU", "Sebastien Buemi", 0.90, 0.50, 0.90),
        ("LDG", "Lucas di Grassi", 0.91, 0.60, 0.85),
        ("SVA", "Stoffel Vandoorne", 0.89, 0.45, 0.92),
        ("MEV", "Mitch Evans", 0.90, 0.58, 0.86),
        ("NCA", "Nick Cassidy", 0.88, 0.52, 0.89),
        ("PWE", "Pascal Wehrlein", 0.89, 0.57, 0.87),
        ("AFE", "Antonio Felix da Costa", 0.88, 0.54, 0.84),
        ("JDE", "Jake Dennis", 0.87, 0.62, 0.83),
        ("ORO", "Oliver Rowland", 0.85, 0.65, 0.80),
        ("NMU", "Nyck Mueller", 0.84, 0.48, 0.86),
        ("SSE", "Sam Settler", 0.82, 0.70, 0.78),
    ];

    let agent_pars_all = roster
        .iter()
        .enumerate()
        .map(|(idx, (initials, name, skill, aggression, consistency))| AgentPars {
            id: idx as u32 + 1,
            initials: (*initials).to_string(),
            name: (*name).to_string(),
            skill: *skill,
            aggression: *aggression,
            consistency: *consistency,
            policy: DriverPolicy::Baseline,
            p_grid: None,
        })
        .collect();

    SimPars {
        config: Default::default(),
        track_pars,
        agent_pars_all,
    }
}
