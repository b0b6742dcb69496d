use crate::core::agent::DnfReason;
use crate::core::physics::PhysicsPars;
use crate::core::race::RaceState;
use serde::Serialize;

/// One classification row.
#[derive(Debug, Clone, Serialize)]
pub struct StandingsEntry {
    pub position: u32,
    pub agent_id: u32,
    pub initials: String,
    pub current_lap: u32,
    /// (s) Time interval to the leader (0 for the leader).
    pub interval_to_leader: f64,
    /// (s) Time interval to the car one position ahead.
    pub interval_to_ahead: f64,
    pub best_lap_time: Option<f64>,
    pub last_lap_time: Option<f64>,
    pub overtakes_made: u32,
    pub overtakes_received: u32,
    pub performance_index: f64,
    pub active: bool,
    pub dnf_reason: DnfReason,
}

/// Immutable classification snapshot suitable for presentation: active agents
/// by rank, retired agents afterwards ordered by covered distance.
#[derive(Debug, Clone, Serialize)]
pub struct StandingsSnapshot {
    pub t: f64,
    pub leader_lap: u32,
    pub entries: Vec<StandingsEntry>,
}

/// compute_standings derives the classification from the race state. Pure
/// function; the race state is not modified.
pub fn compute_standings(race: &RaceState, physics_pars: &PhysicsPars) -> StandingsSnapshot {
    let mut ranked: Vec<usize> = (0..race.agents.len()).collect();
    ranked.sort_by(|&a, &b| {
        let (agent_a, agent_b) = (&race.agents[a], &race.agents[b]);
        agent_b
            .is_active()
            .cmp(&agent_a.is_active())
            .then_with(|| {
                if agent_a.is_active() {
                    agent_a.position().cmp(&agent_b.position())
                } else {
                    // retired cars are classified by covered distance
                    agent_b
                        .total_distance()
                        .partial_cmp(&agent_a.total_distance())
                        .expect("Retired car distances must not be NaN!")
                }
            })
    });

    let entries = ranked
        .iter()
        .map(|&idx| {
            let agent = &race.agents[idx];
            StandingsEntry {
                position: agent.position(),
                agent_id: agent.id(),
                initials: agent.driver().initials.clone(),
                current_lap: agent.current_lap(),
                interval_to_leader: if agent.is_active() {
                    agent.gap_to_leader
                } else {
                    f64::INFINITY
                },
                interval_to_ahead: if agent.is_active() {
                    agent.gap_to_ahead
                } else {
                    f64::INFINITY
                },
                best_lap_time: agent.best_lap_time(),
                last_lap_time: agent.last_lap_time(),
                overtakes_made: agent.overtakes_made,
                overtakes_received: agent.overtakes_received,
                performance_index: agent.performance_index(physics_pars),
                active: agent.is_active(),
                dnf_reason: agent.dnf_reason(),
            }
        })
        .collect();

    StandingsSnapshot {
        t: race.t,
        leader_lap: race.leader_lap(),
        entries,
    }
}
