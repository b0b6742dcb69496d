use crate::core::controller::DriverPolicy;
use crate::core::physics::PhysicsPars;
use helpers::general::mean;
use serde::{Deserialize, Serialize};

/// Number of components of the canonical agent state vector.
pub const STATE_VECTOR_LEN: usize = 20;

fn default_skill() -> f64 {
    0.5
}
fn default_aggression() -> f64 {
    0.5
}
fn default_consistency() -> f64 {
    1.0
}

/// * `id` - Competitor number, unique within the field
/// * `initials` - Driver initials, e.g. VER
/// * `name` - Driver name
/// * `skill` - (-) Driver skill in [0, 1]
/// * `aggression` - (-) Driver aggression in [0, 1]
/// * `consistency` - (-) Driver consistency in [0, 1]
/// * `policy` - Driving policy tag (baseline if omitted)
/// * `p_grid` - Starting grid position (by id order if omitted)
#[derive(Debug, Deserialize, Clone)]
pub struct AgentPars {
    pub id: u32,
    pub initials: String,
    pub name: String,
    #[serde(default = "default_skill")]
    pub skill: f64,
    #[serde(default = "default_aggression")]
    pub aggression: f64,
    #[serde(default = "default_consistency")]
    pub consistency: f64,
    #[serde(default)]
    pub policy: DriverPolicy,
    #[serde(default)]
    pub p_grid: Option<u32>,
}

/// Immutable driver descriptor used by the controller and the event engine.
#[derive(Debug, Clone)]
pub struct DriverDescriptor {
    pub initials: String,
    pub name: String,
    pub skill: f64,
    pub aggression: f64,
    pub consistency: f64,
    pub policy: DriverPolicy,
}

/// Tagged reason for a terminal inactive state. `DnfReason::None` while the
/// agent is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DnfReason {
    None,
    Crash,
    EnergyEmpty,
    Mechanical,
    Disqualified,
}

/// Per-competitor simulation state. Mutated exclusively by the integrator's
/// per-tick sequence; external consumers observe it through snapshots or the
/// canonical state vector.
#[derive(Debug, Clone)]
pub struct AgentState {
    pub(crate) id: u32,
    pub(crate) driver: DriverDescriptor,

    // kinematics
    pub(crate) vx: f64,
    pub(crate) vy: f64,
    pub(crate) x: f64,
    pub(crate) y: f64,
    pub(crate) lateral_acc: f64,
    pub(crate) long_acc: f64,
    pub(crate) steering: f64,
    pub(crate) throttle: f64,
    pub(crate) brake: f64,

    // circuit bookkeeping
    pub(crate) lap_distance: f64,
    pub(crate) total_distance: f64,
    pub(crate) current_lap: u32,
    pub(crate) position: u32,

    // energy
    pub(crate) battery_energy: f64,
    pub(crate) battery_temperature: f64,

    // tires
    pub(crate) tire_wear: f64,
    pub(crate) grip_coefficient: f64,
    pub(crate) tire_temperature: f64,

    // attack mode
    pub(crate) attack_active: bool,
    pub(crate) attack_remaining: f64,
    pub(crate) attack_uses_left: u32,

    // liveness
    pub(crate) active: bool,
    pub(crate) dnf_reason: DnfReason,

    // lap-time bookkeeping (not part of the canonical vector)
    pub(crate) t_lap_start: f64,
    pub(crate) last_lap_time: Option<f64>,
    pub(crate) best_lap_time: Option<f64>,
    pub(crate) overtakes_made: u32,
    pub(crate) overtakes_received: u32,
    pub(crate) gap_to_leader: f64,
    pub(crate) gap_to_ahead: f64,
    pub(crate) gap_behind: f64,
    pub(crate) prev_position: u32,
}

impl AgentState {
    pub fn new(agent_pars: &AgentPars, physics_pars: &PhysicsPars, attack_uses: u32) -> AgentState {
        AgentState {
            id: agent_pars.id,
            driver: DriverDescriptor {
                initials: agent_pars.initials.to_owned(),
                name: agent_pars.name.to_owned(),
                skill: agent_pars.skill,
                aggression: agent_pars.aggression,
                consistency: agent_pars.consistency,
                policy: agent_pars.policy.clone(),
            },
            vx: 0.0,
            vy: 0.0,
            x: 0.0,
            y: 0.0,
            lateral_acc: 0.0,
            long_acc: 0.0,
            steering: 0.0,
            throttle: 0.0,
            brake: 0.0,
            lap_distance: 0.0,
            total_distance: 0.0,
            current_lap: 0,
            position: 1,
            battery_energy: physics_pars.e_cap,
            battery_temperature: physics_pars.t_ambient,
            tire_wear: 0.0,
            grip_coefficient: physics_pars.mu_max,
            tire_temperature: physics_pars.t_ambient,
            attack_active: false,
            attack_remaining: 0.0,
            attack_uses_left: attack_uses,
            active: true,
            dnf_reason: DnfReason::None,
            t_lap_start: 0.0,
            last_lap_time: None,
            best_lap_time: None,
            overtakes_made: 0,
            overtakes_received: 0,
            gap_to_leader: 0.0,
            gap_to_ahead: 0.0,
            gap_behind: 0.0,
            prev_position: 1,
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn driver(&self) -> &DriverDescriptor {
        &self.driver
    }

    /// Velocity magnitude (m/s).
    pub fn speed(&self) -> f64 {
        self.vx.hypot(self.vy)
    }

    pub fn position(&self) -> u32 {
        self.position
    }

    pub fn current_lap(&self) -> u32 {
        self.current_lap
    }

    pub fn lap_distance(&self) -> f64 {
        self.lap_distance
    }

    pub fn total_distance(&self) -> f64 {
        self.total_distance
    }

    pub fn battery_energy(&self) -> f64 {
        self.battery_energy
    }

    pub fn tire_wear(&self) -> f64 {
        self.tire_wear
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn dnf_reason(&self) -> DnfReason {
        self.dnf_reason
    }

    pub fn attack_active(&self) -> bool {
        self.attack_active
    }

    pub fn attack_uses_left(&self) -> u32 {
        self.attack_uses_left
    }

    pub fn overtakes_made(&self) -> u32 {
        self.overtakes_made
    }

    pub fn overtakes_received(&self) -> u32 {
        self.overtakes_received
    }

    pub fn best_lap_time(&self) -> Option<f64> {
        self.best_lap_time
    }

    pub fn last_lap_time(&self) -> Option<f64> {
        self.last_lap_time
    }

    /// Battery state of charge in percent of capacity.
    pub fn energy_pct(&self, e_cap: f64) -> f64 {
        100.0 * self.battery_energy / e_cap
    }

    /// to_vector returns the canonical 20-component state vector:
    /// vx, vy, x, y, lateral_acc, long_acc, steering, throttle, brake,
    /// lap_distance, total_distance, current_lap, position, battery_energy,
    /// battery_temperature, tire_wear, grip_coefficient, tire_temperature,
    /// attack_active, attack_remaining.
    pub fn to_vector(&self) -> [f64; STATE_VECTOR_LEN] {
        [
            self.vx,
            self.vy,
            self.x,
            self.y,
            self.lateral_acc,
            self.long_acc,
            self.steering,
            self.throttle,
            self.brake,
            self.lap_distance,
            self.total_distance,
            self.current_lap as f64,
            self.position as f64,
            self.battery_energy,
            self.battery_temperature,
            self.tire_wear,
            self.grip_coefficient,
            self.tire_temperature,
            if self.attack_active { 1.0 } else { 0.0 },
            self.attack_remaining,
        ]
    }

    /// from_vector applies a canonical state vector onto the agent. The
    /// round trip through `to_vector` is the identity on all numeric fields
    /// (floats are copied without intermediate rounding).
    pub fn from_vector(&mut self, v: &[f64; STATE_VECTOR_LEN]) {
        self.vx = v[0];
        self.vy = v[1];
        self.x = v[2];
        self.y = v[3];
        self.lateral_acc = v[4];
        self.long_acc = v[5];
        self.steering = v[6];
        self.throttle = v[7];
        self.brake = v[8];
        self.lap_distance = v[9];
        self.total_distance = v[10];
        self.current_lap = v[11] as u32;
        self.position = v[12] as u32;
        self.battery_energy = v[13];
        self.battery_temperature = v[14];
        self.tire_wear = v[15];
        self.grip_coefficient = v[16];
        self.tire_temperature = v[17];
        self.attack_active = v[18] != 0.0;
        self.attack_remaining = v[19];
    }

    /// performance_index returns the weighted normalized scalar summarizing
    /// the agent's instantaneous competitiveness in [0, 1].
    pub fn performance_index(&self, physics_pars: &PhysicsPars) -> f64 {
        let v_norm = (self.speed() / physics_pars.v_max).clamp(0.0, 1.0);
        let a_norm = (self.long_acc / (physics_pars.mu_max * crate::core::physics::G))
            .abs()
            .clamp(0.0, 1.0);
        let e_norm = (self.battery_energy / physics_pars.e_cap).clamp(0.0, 1.0);
        let tire_factor = 1.0 - self.tire_wear;
        let strategy_factor = mean(&[v_norm, e_norm, tire_factor]);

        0.30 * v_norm + 0.15 * a_norm + 0.25 * e_norm + 0.20 * tire_factor + 0.10 * strategy_factor
    }

    /// The method marks the agent as retired with the inserted reason.
    pub(crate) fn retire(&mut self, reason: DnfReason) {
        self.active = false;
        self.dnf_reason = reason;
        self.throttle = 0.0;
        self.brake = 0.0;
    }
}
