use crate::core::agent::AgentState;
use helpers::general::{argsort, SortOrder};

// floor on the speed used for time-gap estimates (m/s)
const GAP_SPEED_FLOOR: f64 = 0.1;

/// Global race state: the ordered collection of agents, the simulation clock
/// and the safety-car flag. Owned by the `Simulation`; agents are mutated
/// exclusively by the integrator's per-tick sequence.
#[derive(Debug, Clone)]
pub struct RaceState {
    pub t: f64,
    pub step_index: u64,
    /// Agents in ascending id order; `position` holds the race rank.
    pub agents: Vec<AgentState>,
    pub safety_car_active: bool,
    pub safety_car_until: f64,
    pub num_laps: u32,
}

impl RaceState {
    pub fn new(mut agents: Vec<AgentState>, num_laps: u32) -> RaceState {
        // agents are kept in ascending id order so every per-tick iteration
        // is reproducible
        agents.sort_by_key(|agent| agent.id);

        RaceState {
            t: 0.0,
            step_index: 0,
            agents,
            safety_car_active: false,
            safety_car_until: 0.0,
            num_laps,
        }
    }

    pub fn n_agents(&self) -> usize {
        self.agents.len()
    }

    pub fn n_active(&self) -> usize {
        self.agents.iter().filter(|agent| agent.active).count()
    }

    pub fn agent_index_by_id(&self, id: u32) -> Option<usize> {
        self.agents.iter().position(|agent| agent.id == id)
    }

    /// The method returns the index of the race leader (rank 1 among active
    /// agents), if any agent is still active.
    pub fn leader_idx(&self) -> Option<usize> {
        self.agents
            .iter()
            .enumerate()
            .filter(|(_, agent)| agent.active)
            .min_by_key(|(_, agent)| agent.position)
            .map(|(idx, _)| idx)
    }

    pub fn leader_lap(&self) -> u32 {
        self.leader_idx()
            .map(|idx| self.agents[idx].current_lap)
            .unwrap_or(0)
    }

    /// Completed fraction of the race distance, estimated from the leader's
    /// progress.
    pub fn race_fraction(&self) -> f64 {
        if self.num_laps == 0 {
            return 1.0;
        }
        match self.leader_idx() {
            Some(idx) => {
                (self.agents[idx].current_lap as f64 / self.num_laps as f64).clamp(0.0, 1.0)
            }
            None => 1.0,
        }
    }

    /// recompute_positions stable-sorts the active agents by
    /// (current_lap, lap_distance) descending and assigns ranks 1..K.
    /// Inactive agents retain their last rank and do not participate.
    pub fn recompute_positions(&mut self) {
        let active_idxs: Vec<usize> = (0..self.agents.len())
            .filter(|&idx| self.agents[idx].active)
            .collect();

        let progress: Vec<f64> = active_idxs
            .iter()
            .map(|&idx| {
                let agent = &self.agents[idx];
                agent.current_lap as f64 * 1.0e9 + agent.lap_distance
            })
            .collect();

        // argsort is stable, so ties resolve by ascending id
        let order = argsort(&progress, SortOrder::Descending);
        for (rank0, &order_idx) in order.iter().enumerate() {
            self.agents[active_idxs[order_idx]].position = rank0 as u32 + 1;
        }
    }

    /// update_gaps refreshes the time-based gaps to the leader and to the
    /// neighbouring cars, using each agent's current speed.
    pub fn update_gaps(&mut self) {
        // active indices ordered by rank
        let mut ranked: Vec<usize> = (0..self.agents.len())
            .filter(|&idx| self.agents[idx].active)
            .collect();
        ranked.sort_by_key(|&idx| self.agents[idx].position);

        for (order, &idx) in ranked.iter().enumerate() {
            if order == 0 {
                self.agents[idx].gap_to_leader = 0.0;
                self.agents[idx].gap_to_ahead = f64::INFINITY;
            } else {
                let leader = &self.agents[ranked[0]];
                let ahead = &self.agents[ranked[order - 1]];
                let agent = &self.agents[idx];
                let v = agent.speed().max(GAP_SPEED_FLOOR);
                let gap_leader = (leader.total_distance - agent.total_distance) / v;
                let gap_ahead = (ahead.total_distance - agent.total_distance) / v;
                let agent = &mut self.agents[idx];
                agent.gap_to_leader = gap_leader.max(0.0);
                agent.gap_to_ahead = gap_ahead.max(0.0);
            }

            let gap_behind = if order + 1 < ranked.len() {
                let behind = &self.agents[ranked[order + 1]];
                let v_behind = behind.speed().max(GAP_SPEED_FLOOR);
                ((self.agents[idx].total_distance - behind.total_distance) / v_behind).max(0.0)
            } else {
                f64::INFINITY
            };
            self.agents[idx].gap_behind = gap_behind;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::agent::{AgentPars, DnfReason};
    use crate::core::controller::DriverPolicy;
    use crate::core::physics::PhysicsPars;

    fn field(n: u32) -> Vec<AgentState> {
        let physics_pars = PhysicsPars::default();
        (0..n)
            .map(|id| {
                AgentState::new(
                    &AgentPars {
                        id,
                        initials: format!("D{:02}", id),
                        name: format!("Driver {}", id),
                        skill: 0.5,
                        aggression: 0.5,
                        consistency: 1.0,
                        policy: DriverPolicy::Baseline,
                        p_grid: None,
                    },
                    &physics_pars,
                    2,
                )
            })
            .collect()
    }

    #[test]
    fn positions_follow_progress() {
        let mut race = RaceState::new(field(4), 10);
        race.agents[0].current_lap = 2;
        race.agents[0].lap_distance = 100.0;
        race.agents[1].current_lap = 2;
        race.agents[1].lap_distance = 900.0;
        race.agents[2].current_lap = 1;
        race.agents[2].lap_distance = 1200.0;
        race.agents[3].current_lap = 3;
        race.agents[3].lap_distance = 5.0;

        race.recompute_positions();
        assert_eq!(race.agents[3].position, 1);
        assert_eq!(race.agents[1].position, 2);
        assert_eq!(race.agents[0].position, 3);
        assert_eq!(race.agents[2].position, 4);
    }

    #[test]
    fn inactive_agents_retain_rank_and_ranks_stay_compact() {
        let mut race = RaceState::new(field(3), 10);
        race.agents[0].lap_distance = 300.0;
        race.agents[1].lap_distance = 200.0;
        race.agents[2].lap_distance = 100.0;
        race.recompute_positions();
        assert_eq!(race.agents[1].position, 2);

        race.agents[1].retire(DnfReason::Crash);
        race.recompute_positions();

        // retired car keeps rank 2, active ranks compact to 1..2
        assert_eq!(race.agents[1].position, 2);
        assert_eq!(race.agents[0].position, 1);
        assert_eq!(race.agents[2].position, 2);
        let mut active_ranks: Vec<u32> = race
            .agents
            .iter()
            .filter(|agent| agent.active)
            .map(|agent| agent.position)
            .collect();
        active_ranks.sort_unstable();
        assert_eq!(active_ranks, vec![1, 2]);
    }

    #[test]
    fn ties_resolve_by_ascending_id() {
        let mut race = RaceState::new(field(3), 10);
        for agent in race.agents.iter_mut() {
            agent.lap_distance = 50.0;
        }
        race.recompute_positions();
        assert_eq!(race.agents[0].position, 1);
        assert_eq!(race.agents[1].position, 2);
        assert_eq!(race.agents[2].position, 3);
    }

    #[test]
    fn gaps_are_time_based() {
        let mut race = RaceState::new(field(2), 10);
        race.agents[0].lap_distance = 500.0;
        race.agents[0].total_distance = 500.0;
        race.agents[0].vx = 50.0;
        race.agents[1].lap_distance = 400.0;
        race.agents[1].total_distance = 400.0;
        race.agents[1].vx = 50.0;

        race.recompute_positions();
        race.update_gaps();

        assert_eq!(race.agents[0].gap_to_leader, 0.0);
        assert!((race.agents[1].gap_to_ahead - 2.0).abs() < 1e-9);
        assert!((race.agents[1].gap_to_leader - 2.0).abs() < 1e-9);
        assert!((race.agents[0].gap_behind - 2.0).abs() < 1e-9);
        assert_eq!(race.agents[1].gap_behind, f64::INFINITY);
    }
}
