use crate::core::agent::AgentState;
use crate::core::physics::{effective_grip, NoisePars, PhysicsPars};
use crate::core::rng::SubStream;
use crate::core::track::{corner_speed_limit, Segment, SegmentKind, Track};
use crate::interfaces::weather::WeatherView;
use serde::{Deserialize, Serialize};

/// Synthesized control inputs of one agent for one tick. Also the action
/// vector of the external MDP adaptor.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct ControlInputs {
    pub throttle: f64,
    pub brake: f64,
    pub steering: f64,
    pub request_attack: bool,
}

/// Tagged driving policy. The controller is a pure function branching on the
/// tag; `Scripted` bypasses the synthesis entirely and replays a fixed control
/// sequence (clamped to its last entry).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriverPolicy {
    Baseline,
    Aggressive,
    Conservative,
    Scripted(Vec<ControlInputs>),
}

impl Default for DriverPolicy {
    fn default() -> Self {
        DriverPolicy::Baseline
    }
}

/// Controller gains and thresholds.
///
/// * `t_lookahead` - (s) Preview horizon for early braking
/// * `skill_base` / `skill_gain` - Target-speed scaling 0.95 + 0.10 * skill
/// * `aggression_base` / `aggression_gain` - Scaling 0.92 + 0.06 * aggression
/// * `chase_gap` / `chase_boost` - Close-battle push (+5% below 1.5 s)
/// * `lead_gap` / `lead_ease` - Leader management (-5% above 5 s)
/// * `energy_*` / `wear_*` - Resource conservation multipliers
/// * `rain_factor` - Target reduction per unit rain intensity
/// * `deadband` - (m/s) Proportional control deadband
/// * `attack_*` - Attack-mode arming policy
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ControllerPars {
    pub t_lookahead: f64,
    pub skill_base: f64,
    pub skill_gain: f64,
    pub aggression_base: f64,
    pub aggression_gain: f64,
    pub chase_gap: f64,
    pub chase_boost: f64,
    pub lead_gap: f64,
    pub lead_ease: f64,
    pub energy_low_pct: f64,
    pub energy_low_factor: f64,
    pub energy_mid_pct: f64,
    pub energy_mid_factor: f64,
    pub wear_threshold: f64,
    pub wear_factor: f64,
    pub rain_factor: f64,
    pub deadband: f64,
    pub throttle_gain: f64,
    pub throttle_base: f64,
    pub throttle_aggression: f64,
    pub corner_throttle_factor: f64,
    pub brake_panic_delta: f64,
    pub brake_corner_gain: f64,
    pub brake_straight_gain: f64,
    pub cruise_throttle: f64,
    pub attack_min_energy_pct: f64,
    pub attack_request_prob: f64,
    pub attack_duration: f64,
    pub attack_uses: u32,
    pub attack_final_fraction: f64,
    pub attack_close_gap: f64,
    pub attack_energy_rich_pct: f64,
    pub attack_laps_remaining: u32,
}

impl Default for ControllerPars {
    fn default() -> Self {
        ControllerPars {
            t_lookahead: 2.0,
            skill_base: 0.95,
            skill_gain: 0.10,
            aggression_base: 0.92,
            aggression_gain: 0.06,
            chase_gap: 1.5,
            chase_boost: 0.05,
            lead_gap: 5.0,
            lead_ease: 0.05,
            energy_low_pct: 15.0,
            energy_low_factor: 0.92,
            energy_mid_pct: 30.0,
            energy_mid_factor: 0.95,
            wear_threshold: 0.7,
            wear_factor: 0.95,
            rain_factor: 0.2,
            deadband: 1.0,
            throttle_gain: 15.0,
            throttle_base: 0.7,
            throttle_aggression: 0.3,
            corner_throttle_factor: 0.5,
            brake_panic_delta: 20.0,
            brake_corner_gain: 30.0,
            brake_straight_gain: 50.0,
            cruise_throttle: 0.3,
            attack_min_energy_pct: 40.0,
            attack_request_prob: 0.05,
            attack_duration: 240.0,
            attack_uses: 2,
            attack_final_fraction: 0.7,
            attack_close_gap: 2.0,
            attack_energy_rich_pct: 60.0,
            attack_laps_remaining: 3,
        }
    }
}

/// Per-tick race situation of one agent, assembled by the integrator.
#[derive(Debug, Clone, Copy)]
pub struct RaceContext {
    pub step_index: u64,
    /// Time gap to the car one position ahead (infinite for the leader).
    pub gap_to_ahead: f64,
    /// Time gap to the car one position behind (infinite for the last car).
    pub gap_behind: f64,
    pub is_leader: bool,
    pub position: u32,
    /// Completed fraction of the race distance in [0, 1].
    pub race_fraction: f64,
    pub laps_remaining: u32,
    pub safety_car_active: bool,
    pub v_sc: f64,
}

/// compute_controls synthesizes (throttle, brake, steering, request_attack)
/// for one agent. Pure function of the inserted state; the only side effect
/// is consuming draws from the agent's noise stream (one steering draw, an
/// optional attack draw, three control-noise draws, in that order).
#[allow(clippy::too_many_arguments)]
pub fn compute_controls(
    agent: &AgentState,
    track: &Track,
    physics_pars: &PhysicsPars,
    pars: &ControllerPars,
    noise: &NoisePars,
    weather: &WeatherView,
    ctx: &RaceContext,
    stream: &mut SubStream,
) -> ControlInputs {
    // scripted policies replay their sequence verbatim
    if let DriverPolicy::Scripted(seq) = &agent.driver.policy {
        return if seq.is_empty() {
            ControlInputs::default()
        } else {
            seq[(ctx.step_index as usize).min(seq.len() - 1)]
        };
    }

    let aggression = agent.driver.aggression;
    let skill = agent.driver.skill;
    let consistency = agent.driver.consistency;

    let v = agent.speed();
    let s = agent.lap_distance;
    let (segment, _) = track.segment_at(s);
    let s_ahead = s + v * pars.t_lookahead;
    let (segment_ahead, _) = track.segment_at(s_ahead);

    // 1.-2. baseline with lookahead: brake early for the slower of the
    // current and the previewed segment
    let base_here = baseline_speed(agent, segment, weather, physics_pars);
    let base_ahead = baseline_speed(agent, segment_ahead, weather, physics_pars);
    let baseline = base_here.min(base_ahead);

    // 3.-4. driver scaling, plus the fixed pace offset of the policy tag
    let mut multiplier = (pars.skill_base + pars.skill_gain * skill)
        * (pars.aggression_base + pars.aggression_gain * aggression);
    multiplier *= match agent.driver.policy {
        DriverPolicy::Aggressive => 1.05,
        DriverPolicy::Conservative => 0.95,
        _ => 1.0,
    };

    // 5. race situation
    if !ctx.is_leader && ctx.gap_to_ahead < pars.chase_gap {
        multiplier += pars.chase_boost;
    } else if ctx.is_leader && ctx.gap_behind > pars.lead_gap {
        multiplier -= pars.lead_ease;
    }

    // 6. resource conservation
    let e_pct = agent.energy_pct(physics_pars.e_cap);
    if e_pct < pars.energy_low_pct {
        multiplier *= pars.energy_low_factor;
    } else if e_pct < pars.energy_mid_pct {
        multiplier *= pars.energy_mid_factor;
    }
    if agent.tire_wear > pars.wear_threshold {
        multiplier *= pars.wear_factor;
    }

    // 7. weather
    multiplier *= 1.0 - pars.rain_factor * weather.rain_intensity;

    let mut v_target = (baseline * multiplier).clamp(0.0, physics_pars.v_max);
    if ctx.safety_car_active {
        v_target = v_target.min(ctx.v_sc);
    }

    // steering: track the corner at hand (current, or previewed from a
    // straight), otherwise hold the wheel straight up to consistency jitter
    let corner_seg = if segment.is_corner() {
        Some((segment, track.segment_at(s).1))
    } else if segment_ahead.is_corner() {
        Some((segment_ahead, track.segment_at(s_ahead).1))
    } else {
        None
    };
    let steering = match corner_seg {
        None => stream.gauss(0.0, (1.0 - consistency) * 0.01),
        Some((seg, local_s)) => {
            let delta_base = match seg.kind {
                SegmentKind::LeftCorner => (physics_pars.wheelbase / seg.radius).atan(),
                SegmentKind::RightCorner => -(physics_pars.wheelbase / seg.radius).atan(),
                SegmentKind::Chicane => {
                    (physics_pars.wheelbase / seg.radius).atan() * (local_s / 10.0).sin()
                }
                SegmentKind::Straight => 0.0,
            };
            delta_base + stream.gauss(0.0, (1.0 - skill) * 0.03)
        }
    }
    .clamp(-physics_pars.delta_max, physics_pars.delta_max);

    // proportional throttle/brake with deadband
    let delta_v = v_target - v;
    let in_corner = segment.is_corner();
    let (mut throttle, mut brake) = if delta_v > pars.deadband {
        let mut th = (delta_v / pars.throttle_gain).min(1.0)
            * (pars.throttle_base + pars.throttle_aggression * aggression);
        if in_corner {
            th *= pars.corner_throttle_factor;
        }
        (th, 0.0)
    } else if delta_v < -pars.deadband {
        let overspeed = -delta_v;
        let br = if in_corner && overspeed > pars.brake_panic_delta {
            1.0
        } else if in_corner {
            (overspeed / pars.brake_corner_gain).min(1.0)
        } else {
            (overspeed / pars.brake_straight_gain).min(1.0)
        };
        (0.0, br)
    } else {
        (pars.cruise_throttle, 0.0)
    };

    // attack-mode arming: two of four tactical conditions plus resources
    let mut request_attack = false;
    if agent.attack_uses_left > 0
        && !agent.attack_active
        && e_pct >= pars.attack_min_energy_pct
    {
        let close_battle =
            ctx.gap_to_ahead.abs() < pars.attack_close_gap && !segment.is_corner();
        let conditions = [
            ctx.race_fraction >= pars.attack_final_fraction,
            close_battle,
            (2..=6).contains(&ctx.position) && close_battle,
            e_pct > pars.attack_energy_rich_pct
                && ctx.laps_remaining <= pars.attack_laps_remaining,
        ];
        if conditions.iter().filter(|&&c| c).count() >= 2 {
            request_attack = stream.bernoulli(pars.attack_request_prob);
        }
    }

    // control noise, re-clamped to the admissible ranges
    let noise_scale = 1.0 - consistency;
    throttle = (throttle + stream.gauss(0.0, noise.throttle * noise_scale)).clamp(0.0, 1.0);
    brake = (brake + stream.gauss(0.0, noise.brake * noise_scale)).clamp(0.0, 1.0);
    let steering = (steering + stream.gauss(0.0, noise.steering * noise_scale))
        .clamp(-physics_pars.delta_max, physics_pars.delta_max);

    ControlInputs {
        throttle,
        brake,
        steering,
        request_attack,
    }
}

/// baseline_speed returns the physically admissible segment speed: the corner
/// limit under the agent's current effective grip, or v_max on straights.
fn baseline_speed(
    agent: &AgentState,
    segment: &Segment,
    weather: &WeatherView,
    physics_pars: &PhysicsPars,
) -> f64 {
    if !segment.is_corner() {
        return physics_pars.v_max;
    }
    let mu_eff = effective_grip(
        agent.grip_coefficient,
        segment.grip_multiplier,
        weather.grip_multiplier,
        agent.speed(),
    );
    corner_speed_limit(segment.radius, mu_eff, segment.banking, physics_pars.v_max)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::agent::AgentPars;
    use crate::core::rng::RngService;
    use crate::core::track::{SegmentPars, Track, TrackPars};

    fn straight_seg(length: f64) -> SegmentPars {
        SegmentPars {
            kind: SegmentKind::Straight,
            length,
            radius: None,
            banking: 0.0,
            camber: 0.0,
            elevation_delta: 0.0,
            grip_multiplier: 1.0,
            ideal_speed: 80.0,
            in_attack_zone: false,
        }
    }

    fn corner_seg(length: f64, radius: f64) -> SegmentPars {
        SegmentPars {
            kind: SegmentKind::LeftCorner,
            length,
            radius: Some(radius),
            banking: 0.0,
            camber: 0.0,
            elevation_delta: 0.0,
            grip_multiplier: 1.0,
            ideal_speed: 20.0,
            in_attack_zone: false,
        }
    }

    /// 500 m straight into a 50 m radius half-turn and back.
    fn braking_track() -> Track {
        let half_turn = 50.0 * std::f64::consts::PI;
        Track::new(&TrackPars {
            name: "brake".to_string(),
            segments: vec![
                straight_seg(500.0),
                corner_seg(half_turn, 50.0),
                straight_seg(500.0),
                corner_seg(half_turn, 50.0),
            ],
            ds_geom: 1.0,
        })
        .unwrap()
    }

    fn quiet_ctx() -> RaceContext {
        RaceContext {
            step_index: 0,
            gap_to_ahead: f64::INFINITY,
            gap_behind: f64::INFINITY,
            is_leader: false,
            position: 1,
            race_fraction: 0.0,
            laps_remaining: 10,
            safety_car_active: false,
            v_sc: 80.0 / 3.6,
        }
    }

    fn make_agent(skill: f64, aggression: f64, consistency: f64) -> AgentState {
        AgentState::new(
            &AgentPars {
                id: 0,
                initials: "TST".to_string(),
                name: "Test".to_string(),
                skill,
                aggression,
                consistency,
                policy: DriverPolicy::Baseline,
                p_grid: None,
            },
            &PhysicsPars::default(),
            2,
        )
    }

    fn synth(agent: &AgentState, track: &Track, ctx: &RaceContext) -> ControlInputs {
        let mut rng = RngService::new(3, 1);
        compute_controls(
            agent,
            track,
            &PhysicsPars::default(),
            &ControllerPars::default(),
            &NoisePars::zero(),
            &WeatherView::default(),
            ctx,
            rng.agent_stream(0),
        )
    }

    #[test]
    fn slow_agent_on_straight_opens_throttle() {
        let track = braking_track();
        let mut agent = make_agent(1.0, 0.5, 1.0);
        agent.vx = 20.0;
        agent.lap_distance = 10.0;

        let controls = synth(&agent, &track, &quiet_ctx());
        assert!(controls.throttle > 0.5);
        assert_eq!(controls.brake, 0.0);
    }

    #[test]
    fn lookahead_brakes_well_before_corner_entry() {
        let track = braking_track();
        let mut agent = make_agent(1.0, 0.0, 1.0);
        agent.vx = 80.0;
        // 100 m before corner entry, preview horizon reaches the corner
        agent.lap_distance = 400.0;

        let controls = synth(&agent, &track, &quiet_ctx());
        assert_eq!(controls.throttle, 0.0);
        assert!(controls.brake > 0.5);
    }

    #[test]
    fn overspeed_in_corner_panic_brakes() {
        let track = braking_track();
        let mut agent = make_agent(1.0, 0.0, 1.0);
        agent.vx = 60.0; // corner limit is ~24 m/s
        agent.lap_distance = 520.0;

        let controls = synth(&agent, &track, &quiet_ctx());
        assert_eq!(controls.brake, 1.0);
        assert_eq!(controls.throttle, 0.0);
    }

    #[test]
    fn cruise_inside_deadband() {
        let track = braking_track();
        let physics_pars = PhysicsPars::default();
        let pars = ControllerPars::default();
        let mut agent = make_agent(1.0, 0.0, 1.0);
        let multiplier = (pars.skill_base + pars.skill_gain) * pars.aggression_base;
        agent.vx = physics_pars.v_max * multiplier;
        agent.lap_distance = 10.0;

        let controls = synth(&agent, &track, &quiet_ctx());
        assert_eq!(controls.throttle, pars.cruise_throttle);
        assert_eq!(controls.brake, 0.0);
    }

    #[test]
    fn policy_tags_shift_target_pace() {
        let track = braking_track();
        let physics_pars = PhysicsPars::default();
        let pars = ControllerPars::default();
        // hold the baseline equilibrium pace on the straight
        let multiplier = (pars.skill_base + pars.skill_gain) * pars.aggression_base;
        let mut agent = make_agent(1.0, 0.0, 1.0);
        agent.vx = physics_pars.v_max * multiplier;
        agent.lap_distance = 10.0;

        // an aggressive policy raises the target above the held speed
        agent.driver.policy = DriverPolicy::Aggressive;
        let controls = synth(&agent, &track, &quiet_ctx());
        assert!(controls.throttle > 0.0);
        assert_ne!(controls.throttle, pars.cruise_throttle);
        assert_eq!(controls.brake, 0.0);

        // a conservative policy lowers it below the held speed
        agent.driver.policy = DriverPolicy::Conservative;
        let controls = synth(&agent, &track, &quiet_ctx());
        assert_eq!(controls.throttle, 0.0);
        assert!(controls.brake > 0.0);
    }

    #[test]
    fn attack_arming_ignores_the_safety_car_flag() {
        // the arming predicate is resources + tactics only; the safety car
        // caps the target speed but not the request draw
        let track = braking_track();
        let physics_pars = PhysicsPars::default();
        let pars = ControllerPars::default();
        let noise = NoisePars::zero();
        let weather = WeatherView::default();

        let mut agent = make_agent(0.8, 0.5, 1.0);
        agent.vx = 40.0;
        agent.lap_distance = 10.0;

        let mut ctx = quiet_ctx();
        ctx.position = 3;
        ctx.gap_to_ahead = 1.0;
        ctx.race_fraction = 0.8;
        ctx.safety_car_active = true;

        let mut rng = RngService::new(42, 1);
        let mut fired = false;
        for step in 0..1000 {
            ctx.step_index = step;
            let controls = compute_controls(
                &agent,
                &track,
                &physics_pars,
                &pars,
                &noise,
                &weather,
                &ctx,
                rng.agent_stream(0),
            );
            if controls.request_attack {
                fired = true;
                break;
            }
        }
        assert!(fired);
    }

    #[test]
    fn corner_steering_follows_radius_sign() {
        let track = braking_track();
        let mut agent = make_agent(1.0, 0.0, 1.0);
        agent.vx = 20.0;
        agent.lap_distance = 520.0; // inside the left corner

        let controls = synth(&agent, &track, &quiet_ctx());
        let expected = (PhysicsPars::default().wheelbase / 50.0).atan();
        assert!((controls.steering - expected).abs() < 1e-9);
    }

    #[test]
    fn safety_car_caps_target_speed() {
        let track = braking_track();
        let mut agent = make_agent(1.0, 0.5, 1.0);
        agent.vx = 50.0;
        agent.lap_distance = 10.0;
        let mut ctx = quiet_ctx();
        ctx.safety_car_active = true;

        let controls = synth(&agent, &track, &ctx);
        // 50 m/s is far above the 22.2 m/s safety-car pace
        assert_eq!(controls.throttle, 0.0);
        assert!(controls.brake > 0.0);
    }

    #[test]
    fn attack_requested_only_with_two_conditions() {
        let track = braking_track();
        let physics_pars = PhysicsPars::default();
        let pars = ControllerPars::default();
        let noise = NoisePars::zero();
        let weather = WeatherView::default();

        let mut agent = make_agent(0.8, 0.5, 1.0);
        agent.vx = 40.0;
        agent.lap_distance = 10.0; // straight

        // position 3 in a close battle during the final stint: armed
        let mut ctx = quiet_ctx();
        ctx.position = 3;
        ctx.gap_to_ahead = 1.0;
        ctx.race_fraction = 0.8;

        let mut rng = RngService::new(42, 1);
        let mut fired = false;
        for step in 0..1000 {
            ctx.step_index = step;
            let controls = compute_controls(
                &agent,
                &track,
                &physics_pars,
                &pars,
                &noise,
                &weather,
                &ctx,
                rng.agent_stream(0),
            );
            if controls.request_attack {
                fired = true;
                break;
            }
        }
        assert!(fired, "5% per-tick arming must fire within 1000 ticks");

        // energy below the floor: never armed
        agent.battery_energy = 0.2 * physics_pars.e_cap;
        let mut rng = RngService::new(42, 1);
        for step in 0..1000 {
            ctx.step_index = step;
            let controls = compute_controls(
                &agent,
                &track,
                &physics_pars,
                &pars,
                &noise,
                &weather,
                &ctx,
                rng.agent_stream(0),
            );
            assert!(!controls.request_attack);
        }
    }

    #[test]
    fn scripted_policy_replays_sequence() {
        let track = braking_track();
        let physics_pars = PhysicsPars::default();
        let script = vec![
            ControlInputs {
                throttle: 0.25,
                brake: 0.0,
                steering: 0.1,
                request_attack: false,
            },
            ControlInputs {
                throttle: 0.75,
                brake: 0.0,
                steering: -0.1,
                request_attack: false,
            },
        ];
        let mut agent = make_agent(0.5, 0.5, 0.5);
        agent.driver.policy = DriverPolicy::Scripted(script.clone());

        let mut ctx = quiet_ctx();
        let mut rng = RngService::new(1, 1);
        let pars = ControllerPars::default();
        let noise = NoisePars::zero();
        let weather = WeatherView::default();

        for (step, expected) in [(0u64, script[0]), (1, script[1]), (5, script[1])] {
            ctx.step_index = step;
            let controls = compute_controls(
                &agent,
                &track,
                &physics_pars,
                &pars,
                &noise,
                &weather,
                &ctx,
                rng.agent_stream(0),
            );
            assert_eq!(controls, expected);
        }
    }
}
