use crate::core::agent::AgentState;
use crate::core::controller::ControlInputs;
use crate::core::rng::SubStream;
use crate::core::track::{corner_speed_limit, Track};
use crate::interfaces::weather::WeatherView;
use serde::Deserialize;

/// Gravitational acceleration (m/s^2).
pub const G: f64 = 9.81;

/// Corner-speed enforcement policy. `Hard` clamps the speed to the corner
/// limit after integration (stable, the lookahead controller brakes early so
/// the clamp is rarely binding); `Soft` approaches the limit at the maximum
/// braking rate instead.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CornerCap {
    Hard,
    Soft,
}

impl Default for CornerCap {
    fn default() -> Self {
        CornerCap::Hard
    }
}

/// Physics constants and calibration parameters (single source of truth).
///
/// * `rho` - (kg/m^3) Air density
/// * `cd` / `cl` - (-) Drag / lift coefficient
/// * `frontal_area` - (m^2) Frontal area
/// * `mass` - (kg) Vehicle mass incl. driver
/// * `c_roll` - (-) Rolling resistance coefficient
/// * `wheelbase` - (m) Wheelbase
/// * `p_max` / `p_boost` - (W) Base / attack-mode motor power
/// * `eta_motor` / `eta_regen` - (-) Motor / recuperation efficiency
/// * `p_regen_max` - (W) Recuperation power limit
/// * `e_cap` - (J) Usable battery capacity
/// * `v_max` - (m/s) Maximum velocity
/// * `delta_max` - (rad) Steering lock
/// * `mu_max` / `mu_min` - (-) Grip coefficient of fresh / fully worn tires
/// * `a_brake_max` - (m/s^2) Maximum braking deceleration
/// * `t_tire_opt` / `t_batt_opt` - (degC) Optimum tire / battery temperature
/// * `k_wear_*` - Tire wear rate coefficients (corrected calibration; an
///   earlier published parameter set was ~1000x larger and wore tires out
///   within seconds, so these values are deliberately configurable)
/// * `k_tire_heat` / `k_tire_cool` - Tire temperature model coefficients
/// * `m_batt` / `cp_batt` - (kg, J/(kg K)) Battery mass / heat capacity
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct PhysicsPars {
    pub rho: f64,
    pub cd: f64,
    pub cl: f64,
    pub frontal_area: f64,
    pub mass: f64,
    pub c_roll: f64,
    pub wheelbase: f64,
    pub p_max: f64,
    pub p_boost: f64,
    pub eta_motor: f64,
    pub p_regen_max: f64,
    pub eta_regen: f64,
    pub e_cap: f64,
    pub v_max: f64,
    pub delta_max: f64,
    pub mu_max: f64,
    pub mu_min: f64,
    pub a_brake_max: f64,
    pub t_tire_opt: f64,
    pub t_batt_opt: f64,
    pub t_ambient: f64,
    pub v_min_force: f64,
    pub regen_brake_frac: f64,
    pub attack_energy_factor: f64,
    pub k_wear_base: f64,
    pub k_wear_temp: f64,
    pub k_wear_speed: f64,
    pub k_wear_lat: f64,
    pub k_wear_lock: f64,
    pub k_tire_heat: f64,
    pub k_tire_cool: f64,
    pub tire_temp_max: f64,
    pub m_batt: f64,
    pub cp_batt: f64,
    pub batt_cool_active: f64,
    pub batt_cool_passive: f64,
    pub batt_temp_min: f64,
    pub batt_temp_max: f64,
}

impl Default for PhysicsPars {
    fn default() -> Self {
        PhysicsPars {
            rho: 1.225,
            cd: 0.32,
            cl: 1.8,
            frontal_area: 1.5,
            mass: 920.0,
            c_roll: 0.015,
            wheelbase: 2.97,
            p_max: 350e3,
            p_boost: 50e3,
            eta_motor: 0.97,
            p_regen_max: 600e3,
            eta_regen: 0.40,
            e_cap: 51.0 * 3.6e6,
            v_max: 322.0 / 3.6,
            delta_max: 0.52,
            mu_max: 1.2,
            mu_min: 0.9,
            a_brake_max: 5.5,
            t_tire_opt: 90.0,
            t_batt_opt: 40.0,
            t_ambient: 25.0,
            v_min_force: 1.0,
            regen_brake_frac: 0.7,
            attack_energy_factor: 1.3,
            k_wear_base: 1e-5,
            k_wear_temp: 1e-6,
            k_wear_speed: 2e-8,
            k_wear_lat: 1e-7,
            k_wear_lock: 5e-4,
            k_tire_heat: 0.8,
            k_tire_cool: 0.1,
            tire_temp_max: 130.0,
            m_batt: 300.0,
            cp_batt: 900.0,
            batt_cool_active: 0.8,
            batt_cool_passive: 0.05,
            batt_temp_min: 20.0,
            batt_temp_max: 60.0,
        }
    }
}

/// Process and model noise standard deviations. The process stds are per
/// square-root second and scale with sqrt(dt).
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct NoisePars {
    pub vx: f64,
    pub vy: f64,
    pub x: f64,
    pub y: f64,
    pub long_acc: f64,
    pub tire_temp: f64,
    pub batt_temp: f64,
    /// Tire wear noise as a fraction of the deterministic increment.
    pub wear_frac: f64,
    /// Energy draw noise: base fraction plus per-degC battery deviation.
    pub energy_base: f64,
    pub energy_temp: f64,
    /// Control noise stds, scaled by (1 - consistency).
    pub throttle: f64,
    pub brake: f64,
    pub steering: f64,
}

impl Default for NoisePars {
    fn default() -> Self {
        NoisePars {
            vx: 0.05,
            vy: 0.02,
            x: 0.01,
            y: 0.01,
            long_acc: 0.05,
            tire_temp: 0.05,
            batt_temp: 0.02,
            wear_frac: 0.15,
            energy_base: 0.02,
            energy_temp: 0.001,
            throttle: 0.02,
            brake: 0.02,
            steering: 0.005,
        }
    }
}

impl NoisePars {
    /// All stds zero; used by deterministic tests and calibration runs.
    pub fn zero() -> Self {
        NoisePars {
            vx: 0.0,
            vy: 0.0,
            x: 0.0,
            y: 0.0,
            long_acc: 0.0,
            tire_temp: 0.0,
            batt_temp: 0.0,
            wear_frac: 0.0,
            energy_base: 0.0,
            energy_temp: 0.0,
            throttle: 0.0,
            brake: 0.0,
            steering: 0.0,
        }
    }
}

/// Per-tick result of the physics update for one agent.
#[derive(Debug, Default, Clone, Copy)]
pub struct PhysicsOutcome {
    /// Set when the agent crossed the finish line this tick: (completed lap
    /// number, lap time derived from elapsed tick time).
    pub lap_completed: Option<(u32, f64)>,
    /// Attack mode timed out this tick.
    pub attack_expired: bool,
    /// Battery reached zero this tick.
    pub energy_depleted: bool,
}

/// effective_grip composes tire grip, segment surface, weather and the
/// velocity-dependent downforce gain into the friction coefficient used by
/// the corner cap and the traction circle.
pub fn effective_grip(agent_grip: f64, segment_grip: f64, weather_grip: f64, v: f64) -> f64 {
    agent_grip * segment_grip * weather_grip * (1.0 + 0.05 * (v / 80.0).min(1.0))
}

/// update_agent advances one agent by one tick: control application, force
/// balance, longitudinal integration, corner cap, lateral dynamics, tire
/// wear and temperature, energy and battery-thermal updates, attack timer and
/// process noise. The caller (integrator) owns ordering and event emission.
///
/// The draw order on the agent's noise stream is fixed (wear, energy, then
/// the seven process components) so replays stay bit-identical.
#[allow(clippy::too_many_arguments)]
pub fn update_agent(
    agent: &mut AgentState,
    controls: &ControlInputs,
    track: &Track,
    pars: &PhysicsPars,
    noise: &NoisePars,
    weather: &WeatherView,
    stream: &mut SubStream,
    corner_cap: CornerCap,
    dt: f64,
    t_now: f64,
) -> PhysicsOutcome {
    let mut outcome = PhysicsOutcome::default();

    // apply the synthesized control inputs
    agent.throttle = controls.throttle;
    agent.brake = controls.brake;
    agent.steering = controls.steering;

    let v = agent.speed();
    let (segment, _) = track.segment_at(agent.lap_distance);
    let mu_eff = effective_grip(
        agent.grip_coefficient,
        segment.grip_multiplier,
        weather.grip_multiplier,
        v,
    );

    // 1. motor force, soft-capped by the traction circle (previous tick's
    // lateral acceleration)
    let p_avail = pars.p_max + if agent.attack_active { pars.p_boost } else { 0.0 };
    let p_drive = p_avail * agent.throttle;
    let mut f_motor = p_drive * pars.eta_motor / v.max(pars.v_min_force);
    let a_long_avail = ((mu_eff * G).powi(2) - agent.lateral_acc.powi(2)).max(0.0).sqrt();
    f_motor = f_motor.min(pars.mass * a_long_avail);

    // 2.-4. resistive forces
    let f_drag = 0.5 * pars.rho * pars.cd * pars.frontal_area * v * v;
    let f_down = 0.5 * pars.rho * pars.cl * pars.frontal_area * v * v;
    let f_roll = pars.c_roll * (pars.mass * G + f_down);
    let f_grad = pars.mass * G * segment.gradient_sin;

    // 5. brake force and recuperation (power budget, bounded by headroom)
    let f_brake = agent.brake * pars.mass * pars.a_brake_max;
    let p_regen = (pars.regen_brake_frac * f_brake * v).min(pars.p_regen_max);
    let e_regen = (p_regen * pars.eta_regen * dt).min(pars.e_cap - agent.battery_energy);

    // 6. longitudinal integration
    let a = (f_motor - f_drag - f_roll - f_brake - f_grad) / pars.mass;
    let mut v_new = (v + a * dt).clamp(0.0, pars.v_max);
    let ds = (v * dt + 0.5 * a * dt * dt).max(0.0);

    let s_raw = agent.lap_distance + ds;
    if s_raw >= track.total_length {
        agent.current_lap += 1;
        let lap_time = t_now - agent.t_lap_start;
        agent.t_lap_start = t_now;
        agent.last_lap_time = Some(lap_time);
        if agent.best_lap_time.map_or(true, |best| lap_time < best) {
            agent.best_lap_time = Some(lap_time);
        }
        outcome.lap_completed = Some((agent.current_lap, lap_time));
    }
    agent.lap_distance = helpers::general::wrap_s(s_raw, track.total_length);
    agent.total_distance += ds;

    // 7. hard corner speed cap (the lookahead controller brakes early, so
    // this clamp is rarely binding in normal racing)
    let (segment_new, _) = track.segment_at(agent.lap_distance);
    let kappa = track.curvature_at(agent.lap_distance);
    if kappa.abs() > 1e-12 {
        let mu_eff_new = effective_grip(
            agent.grip_coefficient,
            segment_new.grip_multiplier,
            weather.grip_multiplier,
            v_new,
        );
        let v_corner =
            corner_speed_limit(1.0 / kappa.abs(), mu_eff_new, segment_new.banking, pars.v_max);
        if v_new > v_corner {
            v_new = match corner_cap {
                CornerCap::Hard => v_corner,
                CornerCap::Soft => (v_new - pars.a_brake_max * dt).max(v_corner),
            };
        }
    }

    // write back kinematics along the track tangent
    let (x, y, heading, _) = track.geometry_at(agent.lap_distance);
    agent.x = x;
    agent.y = y;
    agent.vx = v_new * heading.cos();
    agent.vy = v_new * heading.sin();
    agent.long_acc = (v_new - v) / dt;

    // 8. lateral dynamics, clamped to the friction limit
    let a_lat_raw = v_new * v_new * agent.steering.tan() / pars.wheelbase;
    agent.lateral_acc = a_lat_raw.clamp(-mu_eff * G, mu_eff * G);

    // 9. tire wear and grip
    let lockup = agent.brake > 0.95 && v > 20.0;
    let mut d_wear = (pars.k_wear_base
        + pars.k_wear_temp * (agent.tire_temperature - pars.t_tire_opt).abs()
        + pars.k_wear_speed * v * v
        + pars.k_wear_lat * agent.lateral_acc * agent.lateral_acc
        + if lockup { pars.k_wear_lock } else { 0.0 })
        * dt;
    let wear_std = noise.wear_frac * d_wear * (1.0 + (agent.tire_temperature - 70.0) / 100.0);
    d_wear = stream.gauss(d_wear, wear_std.max(0.0)).max(0.0);
    agent.tire_wear = (agent.tire_wear + d_wear).min(1.0);
    agent.grip_coefficient = pars.mu_max - (pars.mu_max - pars.mu_min) * agent.tire_wear;

    // 10. tire temperature
    let heat = pars.k_tire_heat * (0.5 * agent.lateral_acc.abs() + 0.3 * a.abs());
    let cool = pars.k_tire_cool * (agent.tire_temperature - weather.temperature);
    agent.tire_temperature = (agent.tire_temperature + (heat - cool) * dt)
        .clamp(weather.temperature, pars.tire_temp_max);

    // 11. energy update
    let attack_factor = if agent.attack_active {
        pars.attack_energy_factor
    } else {
        1.0
    };
    let e_used = (p_drive / pars.eta_motor) * dt * attack_factor;
    let e_std = (noise.energy_base
        + noise.energy_temp * (agent.battery_temperature - pars.t_batt_opt).abs())
        * e_used;
    let e_used = stream.gauss(e_used, e_std.max(0.0)).max(0.0);
    agent.battery_energy = (agent.battery_energy + e_regen - e_used).clamp(0.0, pars.e_cap);
    if agent.battery_energy <= 0.0 && agent.active {
        outcome.energy_depleted = true;
    }

    // 12. battery temperature: ohmic heating, active and passive cooling
    let heat_batt = (1.0 - pars.eta_motor) * (e_used - e_regen).abs() / (pars.m_batt * pars.cp_batt);
    let mut t_batt = agent.battery_temperature + heat_batt;
    if t_batt > pars.t_batt_opt {
        t_batt -= pars.batt_cool_active * (t_batt - pars.t_batt_opt) * dt;
    }
    t_batt -= pars.batt_cool_passive * (t_batt - weather.temperature) * dt;
    agent.battery_temperature = t_batt.clamp(pars.batt_temp_min, pars.batt_temp_max);

    // 13. attack timer
    if agent.attack_active {
        agent.attack_remaining -= dt;
        if agent.attack_remaining <= 0.0 {
            agent.attack_remaining = 0.0;
            agent.attack_active = false;
            outcome.attack_expired = true;
        }
    }

    // 14. process noise (sqrt(dt) scaling)
    let sqrt_dt = dt.sqrt();
    agent.vx += sqrt_dt * stream.gauss(0.0, noise.vx);
    agent.vy += sqrt_dt * stream.gauss(0.0, noise.vy);
    agent.x += sqrt_dt * stream.gauss(0.0, noise.x);
    agent.y += sqrt_dt * stream.gauss(0.0, noise.y);
    agent.long_acc += sqrt_dt * stream.gauss(0.0, noise.long_acc);
    agent.tire_temperature += sqrt_dt * stream.gauss(0.0, noise.tire_temp);
    agent.battery_temperature += sqrt_dt * stream.gauss(0.0, noise.batt_temp);

    outcome
}
