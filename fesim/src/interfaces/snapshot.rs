use crate::core::agent::{DnfReason, STATE_VECTOR_LEN};
use crate::core::error::SimError;
use crate::core::events::TimedEvent;
use crate::core::integrator::{space_grid, Simulation};
use crate::interfaces::weather::WeatherView;
use crate::post::standings::{compute_standings, StandingsSnapshot};
use serde::Serialize;

/// Read-only per-agent view: the canonical state vector plus the
/// non-numeric flags, suitable for logging, dashboards and RL observers.
#[derive(Debug, Clone, Serialize)]
pub struct AgentView {
    pub id: u32,
    pub initials: String,
    pub vector: [f64; STATE_VECTOR_LEN],
    pub position: u32,
    pub active: bool,
    pub dnf_reason: DnfReason,
    pub attack_uses_left: u32,
    pub performance_index: f64,
}

/// Consistent between-tick snapshot of the race. Events are drained exactly
/// once per snapshot; callers must process them in order.
#[derive(Debug, Clone, Serialize)]
pub struct RaceSnapshot {
    pub t: f64,
    pub step_index: u64,
    pub safety_car_active: bool,
    pub agents: Vec<AgentView>,
    pub standings: StandingsSnapshot,
    pub events: Vec<TimedEvent>,
}

impl Simulation {
    /// race_snapshot returns a consistent snapshot formed between ticks and
    /// drains the event buffer in total order.
    pub fn race_snapshot(&mut self) -> RaceSnapshot {
        let standings = compute_standings(&self.race, &self.config.physics);
        let agents = self
            .race
            .agents
            .iter()
            .map(|agent| AgentView {
                id: agent.id(),
                initials: agent.driver().initials.clone(),
                vector: agent.to_vector(),
                position: agent.position(),
                active: agent.is_active(),
                dnf_reason: agent.dnf_reason(),
                attack_uses_left: agent.attack_uses_left(),
                performance_index: agent.performance_index(&self.config.physics),
            })
            .collect();

        RaceSnapshot {
            t: self.race.t,
            step_index: self.race.step_index,
            safety_car_active: self.race.safety_car_active,
            agents,
            standings,
            events: self.buffer.drain(),
        }
    }

    /// inject_starting_grid reorders the field before the first tick. The
    /// inserted sequence must be a permutation of the competitor ids; the
    /// agents are re-spaced longitudinally to preserve the ordering
    /// invariant.
    pub fn inject_starting_grid(&mut self, ids_in_order: &[u32]) -> Result<(), SimError> {
        if self.race.step_index != 0 {
            return Err(SimError::bad_grid(
                "starting grid can only be injected before the first tick",
            ));
        }

        let mut expected: Vec<u32> = self.race.agents.iter().map(|agent| agent.id()).collect();
        let mut supplied: Vec<u32> = ids_in_order.to_vec();
        expected.sort_unstable();
        supplied.sort_unstable();
        if expected != supplied {
            return Err(SimError::bad_grid(
                "grid is not a permutation of the competitor ids",
            ));
        }

        for (order, id) in ids_in_order.iter().enumerate() {
            let idx = self
                .race
                .agent_index_by_id(*id)
                .expect("Permutation check guarantees the id exists!");
            self.race.agents[idx].position = order as u32 + 1;
        }
        space_grid(&mut self.race, &self.track);
        self.race.update_gaps();
        Ok(())
    }

    /// set_weather swaps the weather view; the new record takes effect from
    /// the next tick.
    pub fn set_weather(&mut self, weather: WeatherView) {
        self.weather = weather;
    }
}
