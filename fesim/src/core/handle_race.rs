use crate::core::error::SimError;
use crate::core::integrator::Simulation;
use crate::interfaces::snapshot::RaceSnapshot;
use crate::post::race_result::{AgentTag, RaceResult};
use crate::post::standings::compute_standings;
use crate::pre::config::SimPars;
use flume::Sender;

/// Upper bound on the live snapshot stream rate (Hz).
pub const MAX_STREAM_FREQUENCY: f64 = 20.0;

/// handle_race creates and simulates a race on the basis of the inserted
/// parameters, and returns the results for post-processing. If a sender is
/// inserted, per-tick snapshots are streamed to it at a bounded rate so an
/// external consumer (live timing, logger) can follow the race; the stream
/// carries the drained events, so the caller must keep processing them in
/// order.
pub fn handle_race(
    sim_pars: &SimPars,
    tx: Option<&Sender<RaceSnapshot>>,
) -> Result<RaceResult, SimError> {
    let mut sim = Simulation::from_sim_pars(sim_pars)?;
    run_to_completion(&mut sim, tx)
}

/// run_to_completion drives an already constructed simulation to its end and
/// assembles the race result.
pub fn run_to_completion(
    sim: &mut Simulation,
    tx: Option<&Sender<RaceSnapshot>>,
) -> Result<RaceResult, SimError> {
    let mut events = Vec::new();
    let stream_interval = 1.0 / MAX_STREAM_FREQUENCY;
    let mut t_next_stream = 0.0;

    while !sim.is_finished() {
        sim.tick()?;

        if tx.is_some() && sim.race().t >= t_next_stream {
            let snapshot = sim.race_snapshot();
            events.extend(snapshot.events.iter().cloned());
            // a closed receiver just ends the stream, never the race
            let _ = tx.unwrap().send(snapshot);
            t_next_stream = sim.race().t + stream_interval;
        }
    }

    // final drain (also sent to a live consumer as the closing frame)
    let final_snapshot = sim.race_snapshot();
    events.extend(final_snapshot.events.iter().cloned());
    if let Some(tx) = tx {
        let _ = tx.send(final_snapshot);
    }

    let tags = sim
        .race()
        .agents
        .iter()
        .map(|agent| AgentTag {
            agent_id: agent.id(),
            initials: agent.driver().initials.clone(),
        })
        .collect();

    Ok(RaceResult::build(
        sim.track().name.clone(),
        sim.config().race.num_laps,
        tags,
        compute_standings(sim.race(), &sim.config().physics),
        events,
        sim.event_ticks().to_vec(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::agent::AgentPars;
    use crate::core::controller::DriverPolicy;
    use crate::core::physics::NoisePars;
    use crate::core::track::{SegmentKind, SegmentPars, TrackPars};
    use crate::pre::config::SimConfig;

    fn sprint_pars() -> SimPars {
        let mut config = SimConfig::default();
        config.noise = NoisePars::zero();
        config.race.num_laps = 2;
        config.race.safety_car_enabled = false;
        config.events.crash_p_base = 0.0;

        SimPars {
            config,
            track_pars: TrackPars {
                name: "sprint".to_string(),
                segments: vec![SegmentPars {
                    kind: SegmentKind::Straight,
                    length: 800.0,
                    radius: None,
                    banking: 0.0,
                    camber: 0.0,
                    elevation_delta: 0.0,
                    grip_multiplier: 1.0,
                    ideal_speed: 60.0,
                    in_attack_zone: false,
                }],
                ds_geom: 1.0,
            },
            agent_pars_all: vec![AgentPars {
                id: 1,
                initials: "ONE".to_string(),
                name: "Driver One".to_string(),
                skill: 1.0,
                aggression: 0.0,
                consistency: 1.0,
                policy: DriverPolicy::Baseline,
                p_grid: None,
            }],
        }
    }

    #[test]
    fn race_completes_and_reports_laps() {
        let result = handle_race(&sprint_pars(), None).unwrap();
        assert_eq!(result.num_laps, 2);
        assert_eq!(result.tags.len(), 1);
        assert!(result.laptimes[0][0].is_some());
        assert!(result.standings.entries[0].active);
        assert_eq!(result.standings.entries[0].current_lap, 2);
        // every event carries a replay tick
        assert_eq!(result.events.len(), result.event_ticks.len());
    }

    #[test]
    fn snapshot_stream_is_rate_bounded_and_ordered() {
        let (tx, rx) = flume::unbounded();
        let result = handle_race(&sprint_pars(), Some(&tx)).unwrap();
        drop(tx);

        let frames: Vec<RaceSnapshot> = rx.drain().collect();
        assert!(!frames.is_empty());
        // monotone snapshot times and events spread across the stream
        for pair in frames.windows(2) {
            assert!(pair[0].t <= pair[1].t);
        }
        let streamed_events: usize = frames.iter().map(|frame| frame.events.len()).sum();
        assert_eq!(streamed_events, result.events.len());
    }
}
