//! End-to-end scenarios driving the public simulation API.

use fesim::core::agent::AgentPars;
use fesim::core::controller::DriverPolicy;
use fesim::core::events::RaceEvent;
use fesim::core::integrator::Simulation;
use fesim::core::physics::NoisePars;
use fesim::core::track::{SegmentKind, SegmentPars, TrackPars};
use fesim::pre::config::SimConfig;

fn straight(length: f64, in_attack_zone: bool) -> SegmentPars {
    SegmentPars {
        kind: SegmentKind::Straight,
        length,
        radius: None,
        banking: 0.0,
        camber: 0.0,
        elevation_delta: 0.0,
        grip_multiplier: 1.0,
        ideal_speed: 60.0,
        in_attack_zone,
    }
}

fn left_corner(length: f64, radius: f64) -> SegmentPars {
    SegmentPars {
        kind: SegmentKind::LeftCorner,
        length,
        radius: Some(radius),
        banking: 0.0,
        camber: 0.0,
        elevation_delta: 0.0,
        grip_multiplier: 1.0,
        ideal_speed: 22.0,
        in_attack_zone: false,
    }
}

fn ace(id: u32) -> AgentPars {
    AgentPars {
        id,
        initials: format!("A{:02}", id),
        name: format!("Ace {}", id),
        skill: 1.0,
        aggression: 0.0,
        consistency: 1.0,
        policy: DriverPolicy::Baseline,
        p_grid: None,
    }
}

fn quiet_config() -> SimConfig {
    let mut config = SimConfig::default();
    config.noise = NoisePars::zero();
    config.race.safety_car_enabled = false;
    config.events.crash_p_base = 0.0;
    config
}

/// Straight-line sprint: monotone acceleration up to the controller's
/// equilibrium pace, monotone battery drain, no events besides lap
/// completions.
#[test]
fn sprint_reaches_race_pace_with_monotone_battery_drain() {
    let track_pars = TrackPars {
        name: "sprint-1000".to_string(),
        segments: vec![straight(1000.0, false)],
        ds_geom: 1.0,
    };
    let mut config = quiet_config();
    config.race.num_laps = 100; // do not terminate within the observed window
    let v_max = config.physics.v_max;
    let mut sim = Simulation::new(config, &track_pars, &[ace(1)]).unwrap();

    let mut v_prev = 0.0;
    let mut e_prev = f64::INFINITY;
    for _ in 0..2500 {
        sim.tick().unwrap();
        let agent = &sim.race().agents[0];
        assert!(agent.speed() + 1e-9 >= v_prev);
        assert!(agent.battery_energy() <= e_prev);
        v_prev = agent.speed();
        e_prev = agent.battery_energy();
    }
    // the proportional throttle law settles close below the target pace
    assert!(v_prev > 0.8 * v_max);
    assert!(v_prev <= v_max);

    let snapshot = sim.race_snapshot();
    assert!(snapshot
        .events
        .iter()
        .all(|timed| matches!(timed.event, RaceEvent::LapComplete { .. })));
}

/// Corner cap: the speed through a 50 m radius corner never exceeds the
/// physical limit, and braking starts on the straight before the entry.
#[test]
fn corner_speed_stays_capped_and_braking_starts_early() {
    // closed loop: 500 m straight, 200 m corner (r=50), 300 m straight and
    // the closing arc on the same radius
    let closing_len = 50.0 * (2.0 * std::f64::consts::PI - 4.0);
    let track_pars = TrackPars {
        name: "corner-cap".to_string(),
        segments: vec![
            straight(500.0, false),
            left_corner(200.0, 50.0),
            straight(300.0, false),
            left_corner(closing_len, 50.0),
        ],
        ds_geom: 1.0,
    };
    let mut config = quiet_config();
    config.race.num_laps = 3;
    let mut sim = Simulation::new(config, &track_pars, &[ace(1)]).unwrap();

    let mut braked_before_entry = false;
    while !sim.is_finished() {
        sim.tick().unwrap();
        let agent = &sim.race().agents[0];
        let s = agent.lap_distance();
        let v = agent.speed();
        assert!(v.is_finite());

        if (500.0..700.0).contains(&s) {
            // sqrt(1.2 * 9.81 * 50) with the small downforce gain on top
            assert!(v <= 24.6, "corner speed {:.2} m/s above the cap at s={:.1}", v, s);
        }
        if (400.0..500.0).contains(&s) && agent.to_vector()[8] > 0.0 {
            braked_before_entry = true;
        }
    }
    assert!(braked_before_entry, "lookahead braking must begin before the corner");
}

/// Lap completion bookkeeping: the first lap event carries the elapsed time
/// and the distance counter wraps.
#[test]
fn lap_completion_event_matches_elapsed_time() {
    let track_pars = TrackPars {
        name: "sprint-800".to_string(),
        segments: vec![straight(800.0, false)],
        ds_geom: 1.0,
    };
    let mut config = quiet_config();
    config.race.num_laps = 2;
    let dt = config.race.dt;
    let mut sim = Simulation::new(config, &track_pars, &[ace(1)]).unwrap();

    'outer: while !sim.is_finished() {
        sim.tick().unwrap();
        let t_now = sim.race().t;
        let snapshot = sim.race_snapshot();
        for timed in snapshot.events {
            if let RaceEvent::LapComplete { lap, lap_time, .. } = timed.event {
                assert_eq!(lap, 1);
                assert!((timed.t - t_now).abs() < dt);
                // the whole first lap was driven from the start of the race
                assert!((lap_time - timed.t).abs() < 1e-9);
                assert!(sim.race().agents[0].lap_distance() < 1.0);
                assert_eq!(sim.race().agents[0].current_lap(), 1);
                break 'outer;
            }
        }
    }
}

/// All agents crash: the integrator terminates with an empty field.
#[test]
fn field_wide_crash_terminates_the_race() {
    let track_pars = TrackPars {
        name: "sprint-2000".to_string(),
        segments: vec![straight(2000.0, false)],
        ds_geom: 1.0,
    };
    let mut config = quiet_config();
    config.events.crash_p_base = 1.0; // certain crash on the first evaluation
    config.race.num_laps = 10;
    let mut sim = Simulation::new(config, &track_pars, &[ace(1), ace(2), ace(3)]).unwrap();

    sim.run().unwrap();
    assert!(sim.is_finished());
    assert_eq!(sim.race().n_active(), 0);

    let snapshot = sim.race_snapshot();
    let crashes = snapshot
        .events
        .iter()
        .filter(|timed| matches!(timed.event, RaceEvent::Crash { .. }))
        .count();
    assert_eq!(crashes, 3);
}

/// Zero-lap race: immediate termination with the grid as the classification.
#[test]
fn zero_laps_terminate_with_grid_order() {
    let track_pars = TrackPars {
        name: "sprint-2000".to_string(),
        segments: vec![straight(2000.0, false)],
        ds_geom: 1.0,
    };
    let mut config = quiet_config();
    config.race.num_laps = 0;
    let mut sim = Simulation::new(config, &track_pars, &[ace(1), ace(2)]).unwrap();
    sim.run().unwrap();

    let snapshot = sim.race_snapshot();
    assert_eq!(snapshot.step_index, 0);
    assert_eq!(snapshot.standings.entries[0].agent_id, 1);
    assert_eq!(snapshot.standings.entries[1].agent_id, 2);
}

/// Two-agent duel on a long straight: the much faster chaser passes the
/// slower leader, one overtake event fires and the counters move.
#[test]
fn faster_chaser_overtakes_on_the_straight() {
    let track_pars = TrackPars {
        name: "duel-straight".to_string(),
        segments: vec![straight(2000.0, false)],
        ds_geom: 1.0,
    };
    let mut config = quiet_config();
    config.race.num_laps = 20;
    config.race.seed = 1;

    let mut slow_leader = ace(1);
    slow_leader.skill = 0.3;
    slow_leader.aggression = 0.1;
    let fast_chaser = ace(2); // skill 1.0, starts one grid slot behind

    let mut sim = Simulation::new(config, &track_pars, &[slow_leader, fast_chaser]).unwrap();

    let mut overtakes = Vec::new();
    for _ in 0..12_000 {
        sim.tick().unwrap();
        let snapshot = sim.race_snapshot();
        overtakes.extend(snapshot.events.into_iter().filter(|timed| {
            matches!(timed.event, RaceEvent::Overtake { .. })
        }));
        if !overtakes.is_empty() {
            break;
        }
    }

    match &overtakes
        .first()
        .expect("the faster car must get past within two minutes")
        .event
    {
        RaceEvent::Overtake { attacker, defender, .. } => {
            assert_eq!(*attacker, 2);
            assert_eq!(*defender, 1);
        }
        _ => unreachable!(),
    }

    let chaser_idx = sim.race().agent_index_by_id(2).unwrap();
    let leader_idx = sim.race().agent_index_by_id(1).unwrap();
    assert_eq!(sim.race().agents[chaser_idx].position(), 1);
    assert_eq!(sim.race().agents[chaser_idx].overtakes_made(), 1);
    assert_eq!(sim.race().agents[leader_idx].overtakes_received(), 1);
}

/// Attack-mode ignition: a chasing car in an attack zone arms within a few
/// simulated seconds, consuming one activation.
#[test]
fn chasing_car_activates_attack_mode_in_zone() {
    let track_pars = TrackPars {
        name: "attack-oval".to_string(),
        segments: vec![straight(600.0, true)],
        ds_geom: 1.0,
    };
    let mut config = quiet_config();
    config.race.num_laps = 50;
    let attack_duration = config.controller.attack_duration;
    let mut sim = Simulation::new(config, &track_pars, &[ace(1), ace(2)]).unwrap();

    let mut activated_agent = None;
    for _ in 0..5000 {
        sim.tick().unwrap();
        let snapshot = sim.race_snapshot();
        if let Some(timed) = snapshot
            .events
            .iter()
            .find(|timed| matches!(timed.event, RaceEvent::AttackActivate { .. }))
        {
            if let RaceEvent::AttackActivate { agent, remaining } = &timed.event {
                assert!((*remaining - attack_duration).abs() < 1e-9);
                activated_agent = Some(*agent);
            }
            break;
        }
    }

    let agent_id = activated_agent.expect("the chasing car must arm attack mode");
    let idx = sim.race().agent_index_by_id(agent_id).unwrap();
    let agent = &sim.race().agents[idx];
    assert!(agent.attack_active());
    assert_eq!(agent.attack_uses_left(), 1);
    let vector = agent.to_vector();
    assert_eq!(vector[18], 1.0);
    assert!(vector[19] > attack_duration - 1.0);
}
