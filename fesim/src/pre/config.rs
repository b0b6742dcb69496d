use crate::core::agent::AgentPars;
use crate::core::controller::ControllerPars;
use crate::core::error::SimError;
use crate::core::events::{EventPars, FailureModel};
use crate::core::physics::{CornerCap, NoisePars, PhysicsPars};
use crate::core::track::TrackPars;
use anyhow::Context;
use serde::Deserialize;
use std::fs::OpenOptions;
use std::path::Path;

/// Race-level settings and feature flags.
///
/// * `num_laps` - Race distance in laps (0 terminates immediately)
/// * `dt` - (s) Integration step size
/// * `seed` - Master seed of the RNG service
/// * `safety_car_enabled` / `mechanical_failures` - Event-model flags
/// * `corner_cap` - Corner-speed enforcement policy
/// * `max_ticks` - Fail-safe tick budget
/// * `attack_uses` - Attack-mode activations available per agent
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RacePars {
    pub num_laps: u32,
    pub dt: f64,
    pub seed: u64,
    pub safety_car_enabled: bool,
    pub mechanical_failures: bool,
    pub corner_cap: CornerCap,
    pub max_ticks: u64,
    pub attack_uses: u32,
}

impl Default for RacePars {
    fn default() -> Self {
        RacePars {
            num_laps: 10,
            dt: 0.01,
            seed: 42,
            safety_car_enabled: true,
            mechanical_failures: false,
            corner_cap: CornerCap::Hard,
            max_ticks: 2_000_000,
            attack_uses: 2,
        }
    }
}

/// The complete configuration surface: every tunable of the kernel in one
/// record, with defaults equal to the calibrated values.
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct SimConfig {
    pub race: RacePars,
    pub physics: PhysicsPars,
    pub controller: ControllerPars,
    pub events: EventPars,
    pub noise: NoisePars,
}

impl SimConfig {
    /// validate checks every parameter range; the first violation is
    /// reported as `BadConfig`.
    pub fn validate(&self) -> Result<(), SimError> {
        let race = &self.race;
        if !(race.dt > 0.0) {
            return Err(SimError::bad_config("dt must be positive"));
        }
        if race.max_ticks == 0 {
            return Err(SimError::bad_config("max_ticks must be positive"));
        }

        let physics = &self.physics;
        if !(physics.mass > 0.0) {
            return Err(SimError::bad_config("mass must be positive"));
        }
        if !(physics.e_cap > 0.0) {
            return Err(SimError::bad_config("e_cap must be positive"));
        }
        if !(physics.v_max > 0.0) {
            return Err(SimError::bad_config("v_max must be positive"));
        }
        if !(physics.wheelbase > 0.0) {
            return Err(SimError::bad_config("wheelbase must be positive"));
        }
        if !(physics.a_brake_max > 0.0) {
            return Err(SimError::bad_config("a_brake_max must be positive"));
        }
        if !(physics.mu_min > 0.0) || physics.mu_max < physics.mu_min {
            return Err(SimError::bad_config("grip range requires mu_max >= mu_min > 0"));
        }
        if !(physics.eta_motor > 0.0 && physics.eta_motor <= 1.0) {
            return Err(SimError::bad_config("eta_motor must be in (0, 1]"));
        }
        if !(0.0..=1.0).contains(&physics.eta_regen) {
            return Err(SimError::bad_config("eta_regen must be in [0, 1]"));
        }
        for (name, value) in [
            ("k_wear_base", physics.k_wear_base),
            ("k_wear_temp", physics.k_wear_temp),
            ("k_wear_speed", physics.k_wear_speed),
            ("k_wear_lat", physics.k_wear_lat),
            ("k_wear_lock", physics.k_wear_lock),
        ] {
            if value < 0.0 {
                return Err(SimError::bad_config(format!("{} must not be negative", name)));
            }
        }

        let noise = &self.noise;
        for (name, value) in [
            ("noise.vx", noise.vx),
            ("noise.vy", noise.vy),
            ("noise.x", noise.x),
            ("noise.y", noise.y),
            ("noise.long_acc", noise.long_acc),
            ("noise.tire_temp", noise.tire_temp),
            ("noise.batt_temp", noise.batt_temp),
            ("noise.wear_frac", noise.wear_frac),
            ("noise.energy_base", noise.energy_base),
            ("noise.energy_temp", noise.energy_temp),
            ("noise.throttle", noise.throttle),
            ("noise.brake", noise.brake),
            ("noise.steering", noise.steering),
        ] {
            if value < 0.0 {
                return Err(SimError::bad_config(format!("{} must not be negative", name)));
            }
        }

        let controller = &self.controller;
        if controller.t_lookahead < 0.0 {
            return Err(SimError::bad_config("t_lookahead must not be negative"));
        }
        if !(controller.attack_duration > 0.0) {
            return Err(SimError::bad_config("attack_duration must be positive"));
        }
        if !(0.0..=1.0).contains(&controller.attack_request_prob) {
            return Err(SimError::bad_config("attack_request_prob must be in [0, 1]"));
        }

        let events = &self.events;
        if !(events.overtake_proximity > 0.0) {
            return Err(SimError::bad_config("overtake_proximity must be positive"));
        }
        if !(0.0..=1.0).contains(&events.overtake_scale) {
            return Err(SimError::bad_config("overtake_scale must be in [0, 1]"));
        }
        if events.crash_p_base < 0.0 {
            return Err(SimError::bad_config("crash_p_base must not be negative"));
        }
        if !(events.sc_duration > 0.0) {
            return Err(SimError::bad_config("sc_duration must be positive"));
        }
        if !(events.v_sc > 0.0) {
            return Err(SimError::bad_config("v_sc must be positive"));
        }
        if let Some(lap_time) = events.lap_time_nominal {
            if !(lap_time > 0.0) {
                return Err(SimError::bad_config("lap_time_nominal must be positive"));
            }
        }
        if let FailureModel::Weibull { k, lambda_w } = events.failure_model {
            if !(k > 0.0 && lambda_w > 0.0) {
                return Err(SimError::bad_config("weibull parameters must be positive"));
            }
        }

        Ok(())
    }
}

/// validate_agent_pars checks competitor descriptors: unique ids and driver
/// scalars within [0, 1].
pub fn validate_agent_pars(agent_pars_all: &[AgentPars]) -> Result<(), SimError> {
    if agent_pars_all.is_empty() {
        return Err(SimError::bad_config("at least one competitor is required"));
    }

    let mut ids: Vec<u32> = agent_pars_all.iter().map(|pars| pars.id).collect();
    ids.sort_unstable();
    ids.dedup();
    if ids.len() != agent_pars_all.len() {
        return Err(SimError::bad_config("competitor ids must be unique"));
    }

    for pars in agent_pars_all.iter() {
        for (name, value) in [
            ("skill", pars.skill),
            ("aggression", pars.aggression),
            ("consistency", pars.consistency),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(SimError::bad_config(format!(
                    "competitor {}: {} must be in [0, 1]",
                    pars.id, name
                )));
            }
        }
    }

    Ok(())
}

/// SimPars is used to store all other parameter structs.
#[derive(Debug, Deserialize, Clone)]
pub struct SimPars {
    #[serde(default)]
    pub config: SimConfig,
    pub track_pars: TrackPars,
    pub agent_pars_all: Vec<AgentPars>,
}

/// read_sim_pars reads the JSON file and decodes the JSON string into the
/// simulation parameters struct.
pub fn read_sim_pars(filepath: &Path) -> anyhow::Result<SimPars> {
    let fh = OpenOptions::new().read(true).open(filepath).context(format!(
        "Failed to open parameter file {}!",
        filepath.display()
    ))?;
    let pars = serde_json::from_reader(&fh).context(format!(
        "Failed to parse parameter file {}!",
        filepath.display()
    ))?;
    Ok(pars)
}

/// Read a track definition (segment list) from a JSON file.
pub fn read_track_pars(filepath: &Path) -> anyhow::Result<TrackPars> {
    let fh = OpenOptions::new().read(true).open(filepath).context(format!(
        "Failed to open track file {}!",
        filepath.display()
    ))?;
    let pars = serde_json::from_reader(&fh).context(format!(
        "Failed to parse track file {}!",
        filepath.display()
    ))?;
    Ok(pars)
}

/// Read a configuration record from a JSON file (missing fields fall back to
/// the calibrated defaults).
pub fn read_config(filepath: &Path) -> anyhow::Result<SimConfig> {
    let fh = OpenOptions::new().read(true).open(filepath).context(format!(
        "Failed to open config file {}!",
        filepath.display()
    ))?;
    let config = serde_json::from_reader(&fh).context(format!(
        "Failed to parse config file {}!",
        filepath.display()
    ))?;
    Ok(config)
}
