use crate::core::agent::{AgentPars, AgentState, DnfReason};
use crate::core::controller::{compute_controls, RaceContext};
use crate::core::error::SimError;
use crate::core::events::{EventBuffer, EventEngine, RaceEvent};
use crate::core::physics;
use crate::core::race::RaceState;
use crate::core::rng::RngService;
use crate::core::track::{Track, TrackPars};
use crate::interfaces::weather::WeatherView;
use crate::pre::config::{validate_agent_pars, SimConfig, SimPars};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Longitudinal spacing between grid positions (m).
pub const GRID_SPACING: f64 = 8.0;

/// The simulation kernel: track, race state, RNG service and event engine,
/// advanced by a fixed-step integration loop. All agent mutation happens
/// inside `tick`; external consumers observe state between ticks through
/// `race_snapshot` (see the interfaces module).
#[derive(Debug)]
pub struct Simulation {
    pub(crate) config: SimConfig,
    pub(crate) track: Track,
    pub(crate) race: RaceState,
    pub(crate) rng: RngService,
    pub(crate) engine: EventEngine,
    pub(crate) buffer: EventBuffer,
    pub(crate) weather: WeatherView,
    pub(crate) error_state: Option<SimError>,
    pub(crate) finished: bool,
    pub(crate) cancel: Option<Arc<AtomicBool>>,
    /// Tick indices at which events fired (deterministic replay log).
    pub(crate) event_ticks: Vec<u64>,
}

impl Simulation {
    pub fn new(
        config: SimConfig,
        track_pars: &TrackPars,
        agent_pars_all: &[AgentPars],
    ) -> Result<Simulation, SimError> {
        config.validate()?;
        validate_agent_pars(agent_pars_all)?;
        let track = Track::new(track_pars)?;

        let agents: Vec<AgentState> = agent_pars_all
            .iter()
            .map(|pars| AgentState::new(pars, &config.physics, config.race.attack_uses))
            .collect();
        let mut race = RaceState::new(agents, config.race.num_laps);

        // starting order: supplied grid positions when they form a complete
        // permutation, ascending id otherwise
        let grid: Vec<Option<u32>> = agent_pars_all.iter().map(|pars| pars.p_grid).collect();
        let n = race.n_agents() as u32;
        let use_grid = {
            let mut seen: Vec<u32> = grid.iter().flatten().copied().collect();
            seen.sort_unstable();
            seen.len() == n as usize && seen.iter().cloned().eq(1..=n)
        };
        if use_grid {
            // agents are in id order and so is `grid`
            for (idx, pos) in grid.iter().enumerate() {
                race.agents[idx].position = pos.unwrap();
            }
        } else {
            for idx in 0..race.n_agents() {
                race.agents[idx].position = idx as u32 + 1;
            }
        }
        space_grid(&mut race, &track);

        let engine = EventEngine::new(config.events.clone(), &track);
        let rng = RngService::new(config.race.seed, race.n_agents());
        let finished = config.race.num_laps == 0;

        let mut sim = Simulation {
            config,
            track,
            race,
            rng,
            engine,
            buffer: EventBuffer::default(),
            weather: WeatherView::default(),
            error_state: None,
            finished,
            cancel: None,
            event_ticks: Vec::new(),
        };
        sim.race.update_gaps();
        Ok(sim)
    }

    /// Build a simulation from a combined parameter file.
    pub fn from_sim_pars(sim_pars: &SimPars) -> Result<Simulation, SimError> {
        Simulation::new(
            sim_pars.config.clone(),
            &sim_pars.track_pars,
            &sim_pars.agent_pars_all,
        )
    }

    pub fn race(&self) -> &RaceState {
        &self.race
    }

    pub fn track(&self) -> &Track {
        &self.track
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    pub fn weather(&self) -> &WeatherView {
        &self.weather
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn event_ticks(&self) -> &[u64] {
        &self.event_ticks
    }

    /// Install a cancellation flag checked between ticks.
    pub fn set_cancel_token(&mut self, token: Arc<AtomicBool>) {
        self.cancel = Some(token);
    }

    /// Clear a pending per-tick error, permitting the simulation to resume.
    pub fn acknowledge_error(&mut self) -> Option<SimError> {
        self.error_state.take()
    }

    /// tick advances the simulation by one step: controller and physics per
    /// agent in ascending id order, rank recompute, event evaluation in fixed
    /// order, derived metrics and termination. A non-finite value aborts the
    /// tick, restores the pre-tick state and surfaces `NumericalBlowup`; no
    /// partial state is ever committed.
    pub fn tick(&mut self) -> Result<(), SimError> {
        if let Some(err) = &self.error_state {
            return Err(err.clone());
        }
        if self.finished {
            return Ok(());
        }

        let backup_agents = self.race.agents.clone();
        let backup_t = self.race.t;
        let backup_step = self.race.step_index;
        let n_events_before = self.buffer.len();

        let dt = self.config.race.dt;
        self.race.t += dt;
        self.race.step_index += 1;
        let t_now = self.race.t;
        let step = self.race.step_index;

        // tick-entry bookkeeping for the overtake resolution and P2
        let prev_totals: Vec<f64> = backup_agents
            .iter()
            .map(|agent| agent.total_distance)
            .collect();
        for agent in self.race.agents.iter_mut() {
            agent.prev_position = agent.position;
        }

        let race_fraction = self.race.race_fraction();
        let leader_lap = self.race.leader_lap();
        let laps_remaining = self.config.race.num_laps.saturating_sub(leader_lap);

        for idx in 0..self.race.agents.len() {
            if !self.race.agents[idx].active {
                continue;
            }

            // a drained battery retires the agent before any force is applied
            if self.race.agents[idx].battery_energy <= 0.0 {
                self.race.agents[idx].retire(DnfReason::EnergyEmpty);
                continue;
            }

            let ctx = RaceContext {
                step_index: step,
                gap_to_ahead: self.race.agents[idx].gap_to_ahead,
                gap_behind: self.race.agents[idx].gap_behind,
                is_leader: self.race.agents[idx].position == 1,
                position: self.race.agents[idx].position,
                race_fraction,
                laps_remaining,
                safety_car_active: self.race.safety_car_active,
                v_sc: self.config.events.v_sc,
            };

            let controls = compute_controls(
                &self.race.agents[idx],
                &self.track,
                &self.config.physics,
                &self.config.controller,
                &self.config.noise,
                &self.weather,
                &ctx,
                self.rng.agent_stream(idx),
            );

            let outcome = physics::update_agent(
                &mut self.race.agents[idx],
                &controls,
                &self.track,
                &self.config.physics,
                &self.config.noise,
                &self.weather,
                self.rng.agent_stream(idx),
                self.config.race.corner_cap,
                dt,
                t_now,
            );

            let id = self.race.agents[idx].id;
            if let Some((lap, lap_time)) = outcome.lap_completed {
                self.buffer
                    .push(t_now, step, RaceEvent::LapComplete { agent: id, lap, lap_time });
            }
            if outcome.attack_expired {
                self.buffer
                    .push(t_now, step, RaceEvent::AttackExpire { agent: id });
            }

            // attack ignition is gated on the zone and the remaining uses
            if controls.request_attack {
                let in_zone = self.track.in_attack_zone(self.race.agents[idx].lap_distance);
                let agent = &mut self.race.agents[idx];
                if in_zone && !agent.attack_active && agent.attack_uses_left > 0 {
                    agent.attack_active = true;
                    agent.attack_remaining = self.config.controller.attack_duration;
                    agent.attack_uses_left -= 1;
                    let remaining = agent.attack_remaining;
                    self.buffer
                        .push(t_now, step, RaceEvent::AttackActivate { agent: id, remaining });
                }
            }
        }

        // numerical guard: abort the tick atomically on any non-finite value
        if let Some(detail) = self.find_non_finite() {
            self.race.agents = backup_agents;
            self.race.t = backup_t;
            self.race.step_index = backup_step;
            self.buffer.truncate(n_events_before);
            let err = SimError::NumericalBlowup {
                step_index: step,
                detail,
            };
            self.error_state = Some(err.clone());
            return Err(err);
        }

        // rank recompute, then events in fixed order; overtake denial may
        // adjust distances, so ranks are compacted once more afterwards
        self.race.recompute_positions();
        self.engine.evaluate(
            &mut self.race,
            &self.track,
            &self.config.physics,
            &mut self.buffer,
            &mut self.rng,
            dt,
            self.config.race.safety_car_enabled,
            self.config.race.mechanical_failures,
            &prev_totals,
        );
        self.race.recompute_positions();
        self.race.update_gaps();

        // replay log: every event of this tick fired at this step index
        let n_new_events = self.buffer.len() - n_events_before;
        self.event_ticks
            .extend(std::iter::repeat(step).take(n_new_events));

        // termination: leader distance reached, field empty, or tick budget
        if self.config.race.num_laps > 0 && self.race.leader_lap() >= self.config.race.num_laps {
            self.finished = true;
        }
        if self.race.n_active() == 0 {
            self.finished = true;
        }
        if self.race.step_index >= self.config.race.max_ticks {
            self.finished = true;
        }

        #[cfg(debug_assertions)]
        {
            if let Err(err) = self.check_invariants(&prev_totals) {
                self.error_state = Some(err.clone());
                return Err(err);
            }
        }

        Ok(())
    }

    /// run ticks until termination, honouring the optional cancellation flag
    /// between ticks.
    pub fn run(&mut self) -> Result<(), SimError> {
        while !self.finished {
            if let Some(cancel) = &self.cancel {
                if cancel.load(Ordering::Relaxed) {
                    break;
                }
            }
            self.tick()?;
        }
        Ok(())
    }

    fn find_non_finite(&self) -> Option<String> {
        if !self.race.t.is_finite() {
            return Some("race clock is not finite".to_string());
        }
        for agent in self.race.agents.iter() {
            for (i, value) in agent.to_vector().iter().enumerate() {
                if !value.is_finite() {
                    return Some(format!(
                        "agent {} state component {} is not finite",
                        agent.id, i
                    ));
                }
            }
        }
        None
    }

    /// check_invariants verifies the documented state invariants; compiled
    /// into the tick sequence in debug builds only.
    pub fn check_invariants(&self, prev_totals: &[f64]) -> Result<(), SimError> {
        let physics_pars = &self.config.physics;
        let mut active_ranks = Vec::new();

        for (idx, agent) in self.race.agents.iter().enumerate() {
            let fail = |reason: String| Err(SimError::InvariantViolation { reason });

            if !(0.0 <= agent.lap_distance && agent.lap_distance < self.track.total_length) {
                return fail(format!("agent {}: lap_distance out of range", agent.id));
            }
            if agent.total_distance + 1e-9 < prev_totals[idx] {
                return fail(format!("agent {}: total_distance regressed", agent.id));
            }
            if !(0.0 <= agent.battery_energy && agent.battery_energy <= physics_pars.e_cap) {
                return fail(format!("agent {}: battery_energy out of range", agent.id));
            }
            if !(0.0..=1.0).contains(&agent.tire_wear) {
                return fail(format!("agent {}: tire_wear out of range", agent.id));
            }
            let grip_expected =
                physics_pars.mu_max - (physics_pars.mu_max - physics_pars.mu_min) * agent.tire_wear;
            if (agent.grip_coefficient - grip_expected).abs() > 1e-12 {
                return fail(format!("agent {}: grip law violated", agent.id));
            }
            if agent.attack_active && agent.attack_remaining <= 0.0 {
                return fail(format!("agent {}: attack active without remaining time", agent.id));
            }
            if agent.speed() > physics_pars.v_max + 0.5 {
                return fail(format!("agent {}: speed above v_max", agent.id));
            }
            if agent.active {
                active_ranks.push(agent.position);
            }
        }

        active_ranks.sort_unstable();
        if !active_ranks.iter().cloned().eq(1..=active_ranks.len() as u32) {
            return Err(SimError::InvariantViolation {
                reason: "active positions are not a permutation of 1..K".to_string(),
            });
        }

        Ok(())
    }
}

/// space_grid places the field on the grid: rank 1 closest to the line,
/// every following rank `GRID_SPACING` metres further back, all on lap 0 so
/// the ordering invariant holds from the first tick.
pub(crate) fn space_grid(race: &mut RaceState, track: &Track) {
    let n = race.n_agents() as u32;
    for agent in race.agents.iter_mut() {
        let offset = (n - agent.position) as f64 * GRID_SPACING;
        agent.lap_distance = offset.min(track.total_length - 1.0);
        agent.total_distance = agent.lap_distance;
        agent.prev_position = agent.position;
    }
}
