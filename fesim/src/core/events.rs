use crate::core::agent::DnfReason;
use crate::core::physics::PhysicsPars;
use crate::core::race::RaceState;
use crate::core::rng::{GlobalStream, RngService};
use crate::core::track::{SegmentKind, Track};
use helpers::general::{circular_distance, wrap_s};
use serde::{Deserialize, Serialize};

/// Typed race events, appended per tick and drained through snapshots.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RaceEvent {
    LapComplete {
        agent: u32,
        lap: u32,
        lap_time: f64,
    },
    Overtake {
        attacker: u32,
        defender: u32,
        at_s: f64,
    },
    Crash {
        agent: u32,
        risk: f64,
    },
    SafetyCarDeploy {
        reason: SafetyCarReason,
    },
    SafetyCarWithdraw,
    AttackActivate {
        agent: u32,
        remaining: f64,
    },
    AttackExpire {
        agent: u32,
    },
    MechanicalFailure {
        agent: u32,
        cause: MechanicalCause,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SafetyCarReason {
    Hazard,
    RecentCrashes,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MechanicalCause {
    Powertrain,
    Suspension,
    Brakes,
}

impl RaceEvent {
    /// Rank used in the total event order (t, kind_rank, subject_id).
    pub fn kind_rank(&self) -> u8 {
        match self {
            RaceEvent::LapComplete { .. } => 0,
            RaceEvent::Overtake { .. } => 1,
            RaceEvent::Crash { .. } => 2,
            RaceEvent::SafetyCarDeploy { .. } => 3,
            RaceEvent::SafetyCarWithdraw => 4,
            RaceEvent::AttackActivate { .. } => 5,
            RaceEvent::AttackExpire { .. } => 6,
            RaceEvent::MechanicalFailure { .. } => 7,
        }
    }

    /// Subject agent id (0 for field-wide events such as the safety car).
    pub fn subject_id(&self) -> u32 {
        match self {
            RaceEvent::LapComplete { agent, .. }
            | RaceEvent::Crash { agent, .. }
            | RaceEvent::AttackActivate { agent, .. }
            | RaceEvent::AttackExpire { agent }
            | RaceEvent::MechanicalFailure { agent, .. } => *agent,
            RaceEvent::Overtake { attacker, .. } => *attacker,
            RaceEvent::SafetyCarDeploy { .. } | RaceEvent::SafetyCarWithdraw => 0,
        }
    }
}

/// One event with its emission time and tick index.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimedEvent {
    pub t: f64,
    pub step_index: u64,
    pub event: RaceEvent,
}

/// Append-only event buffer, drained once per snapshot. Drained batches are
/// totally ordered by (t, kind_rank, subject_id).
#[derive(Debug, Default, Clone)]
pub struct EventBuffer {
    events: Vec<TimedEvent>,
}

impl EventBuffer {
    pub fn push(&mut self, t: f64, step_index: u64, event: RaceEvent) {
        self.events.push(TimedEvent {
            t,
            step_index,
            event,
        });
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Roll the buffer back to the inserted length (tick abort path).
    pub fn truncate(&mut self, len: usize) {
        self.events.truncate(len);
    }

    /// drain removes and returns all buffered events in total order.
    pub fn drain(&mut self) -> Vec<TimedEvent> {
        let mut drained = std::mem::take(&mut self.events);
        drained.sort_by(|a, b| {
            a.t.partial_cmp(&b.t)
                .expect("Event timestamps must not be NaN!")
                .then(a.event.kind_rank().cmp(&b.event.kind_rank()))
                .then(a.event.subject_id().cmp(&b.event.subject_id()))
        });
        drained
    }
}

/// Mechanical failure hazard model. Off unless enabled in the race flags.
#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum FailureModel {
    None,
    Weibull { k: f64, lambda_w: f64 },
}

impl Default for FailureModel {
    fn default() -> Self {
        FailureModel::Weibull {
            k: 2.5,
            lambda_w: 5000.0,
        }
    }
}

/// Event probability coefficients.
///
/// * `overtake_proximity` - (m) Maximum distance delta for an overtake duel
/// * `overtake_scale` - Per-tick scaling of the logistic admission
/// * `overtake_*_coeff` - Logistic weights on speed, energy, aggression, wear
/// * `k_seg_*` - Segment factor of the overtake logit
/// * `deny_margin` - (m) Gap restored behind the defender on a failed pass
/// * `crash_p_base` - Per-tick base crash probability
/// * `sc_rate_per_lap` - Safety-car hazard per leader lap
/// * `sc_duration` / `v_sc` - (s, m/s) Deployment length and enforced pace
/// * `lap_time_nominal` - (s) Hazard normalization; estimated from the track
///   segment speeds when absent
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct EventPars {
    pub overtake_proximity: f64,
    pub overtake_scale: f64,
    pub overtake_dv_coeff: f64,
    pub overtake_de_coeff: f64,
    pub overtake_attacker_aggr_coeff: f64,
    pub overtake_defender_aggr_coeff: f64,
    pub overtake_wear_coeff: f64,
    pub k_seg_straight: f64,
    pub k_seg_corner: f64,
    pub k_seg_chicane: f64,
    pub deny_margin: f64,
    pub crash_p_base: f64,
    pub crash_risk_gain: f64,
    pub crash_w_speed: f64,
    pub crash_w_wear: f64,
    pub crash_w_aggression: f64,
    pub crash_w_traffic: f64,
    pub crash_w_energy: f64,
    pub crash_nearby_radius: f64,
    pub crash_nearby_norm: f64,
    pub sc_rate_per_lap: f64,
    pub sc_crash_gain: f64,
    pub sc_duration: f64,
    pub v_sc: f64,
    pub sc_min_gap_laps: u32,
    pub sc_crash_window_laps: u32,
    pub lap_time_nominal: Option<f64>,
    pub failure_model: FailureModel,
}

impl Default for EventPars {
    fn default() -> Self {
        EventPars {
            overtake_proximity: 10.0,
            overtake_scale: 0.1,
            overtake_dv_coeff: 0.5,
            overtake_de_coeff: 0.02,
            overtake_attacker_aggr_coeff: 0.3,
            overtake_defender_aggr_coeff: 0.2,
            overtake_wear_coeff: 0.4,
            k_seg_straight: 0.8,
            k_seg_corner: 0.3,
            k_seg_chicane: 0.5,
            deny_margin: 0.5,
            crash_p_base: 1e-7,
            crash_risk_gain: 50.0,
            crash_w_speed: 0.30,
            crash_w_wear: 0.25,
            crash_w_aggression: 0.20,
            crash_w_traffic: 0.15,
            crash_w_energy: 0.10,
            crash_nearby_radius: 20.0,
            crash_nearby_norm: 5.0,
            sc_rate_per_lap: 0.1,
            sc_crash_gain: 0.5,
            sc_duration: 180.0,
            v_sc: 80.0 / 3.6,
            sc_min_gap_laps: 5,
            sc_crash_window_laps: 2,
            lap_time_nominal: None,
            failure_model: FailureModel::default(),
        }
    }
}

fn sigmoid(z: f64) -> f64 {
    1.0 / (1.0 + (-z).exp())
}

/// Stochastic event engine: overtake duels, crash hazard, safety-car
/// deployment and mechanical failures, evaluated once per tick after the
/// physics and position updates, in that fixed order.
#[derive(Debug, Clone)]
pub struct EventEngine {
    pars: EventPars,
    lap_time_nominal: f64,
    /// Leader laps on which crashes occurred (window bookkeeping).
    crash_laps: Vec<u32>,
    last_sc_deploy_lap: Option<u32>,
}

impl EventEngine {
    pub fn new(pars: EventPars, track: &Track) -> EventEngine {
        let lap_time_nominal = pars.lap_time_nominal.unwrap_or_else(|| track.nominal_lap_time());
        EventEngine {
            pars,
            lap_time_nominal,
            crash_laps: Vec::new(),
            last_sc_deploy_lap: None,
        }
    }

    pub fn pars(&self) -> &EventPars {
        &self.pars
    }

    /// evaluate runs the per-tick event models in fixed order and commits
    /// their state mutations. `prev_totals` carries each agent's
    /// total_distance at tick entry for the overtake resolution.
    #[allow(clippy::too_many_arguments)]
    pub fn evaluate(
        &mut self,
        race: &mut RaceState,
        track: &Track,
        physics_pars: &PhysicsPars,
        buffer: &mut EventBuffer,
        rng: &mut RngService,
        dt: f64,
        safety_car_enabled: bool,
        mechanical_failures: bool,
        prev_totals: &[f64],
    ) {
        self.evaluate_overtakes(race, track, physics_pars, buffer, rng, prev_totals);
        self.evaluate_crashes(race, track, physics_pars, buffer, rng);
        if safety_car_enabled {
            self.evaluate_safety_car(race, buffer, rng, dt);
        }
        if mechanical_failures {
            self.evaluate_mechanical(race, buffer, rng, dt);
        }
    }

    /// Overtake duels. A candidate pair is an attacker that moved physically
    /// ahead of the defender this tick while still ranked behind at tick
    /// entry. A successful logistic draw admits the pass; a failed draw (or
    /// an active safety car) restores the attacker just behind the defender.
    fn evaluate_overtakes(
        &mut self,
        race: &mut RaceState,
        track: &Track,
        physics_pars: &PhysicsPars,
        buffer: &mut EventBuffer,
        rng: &mut RngService,
        prev_totals: &[f64],
    ) {
        let n = race.agents.len();
        let t = race.t;
        let step = race.step_index;
        let sc_active = race.safety_car_active;

        // deterministic candidate order: attacker by ascending id, then
        // defender by ascending id (agents are stored in id order)
        for a in 0..n {
            for b in 0..n {
                if a == b {
                    continue;
                }
                let (attacker, defender) = (&race.agents[a], &race.agents[b]);
                if !attacker.active || !defender.active {
                    continue;
                }
                let delta_d = attacker.total_distance - defender.total_distance;
                if delta_d <= 0.0 || delta_d >= self.pars.overtake_proximity {
                    continue;
                }
                // still ranked behind at tick entry
                if attacker.prev_position <= defender.prev_position {
                    continue;
                }

                let admitted = if sc_active {
                    // no overtakes under the safety car
                    false
                } else {
                    let delta_v = attacker.speed() - defender.speed();
                    let delta_e = attacker.energy_pct(physics_pars.e_cap)
                        - defender.energy_pct(physics_pars.e_cap);
                    let delta_wear = defender.tire_wear - attacker.tire_wear;
                    let (segment, _) = track.segment_at(attacker.lap_distance);
                    let k_seg = match segment.kind {
                        SegmentKind::Straight => self.pars.k_seg_straight,
                        SegmentKind::Chicane => self.pars.k_seg_chicane,
                        _ => self.pars.k_seg_corner,
                    };
                    let z = self.pars.overtake_dv_coeff * delta_v
                        + self.pars.overtake_de_coeff * delta_e
                        + self.pars.overtake_attacker_aggr_coeff * attacker.driver.aggression
                        - self.pars.overtake_defender_aggr_coeff * defender.driver.aggression
                        + self.pars.overtake_wear_coeff * delta_wear
                        + k_seg;

                    let u = rng.global_stream(GlobalStream::Overtake).uniform01();
                    u < sigmoid(z) * self.pars.overtake_scale
                };

                if admitted {
                    let at_s = race.agents[a].lap_distance;
                    race.agents[a].overtakes_made += 1;
                    race.agents[b].overtakes_received += 1;
                    // ranks already follow the new physical order; swap the
                    // entry ranks so later pairs judge against the new state
                    let (pa, pb) = (
                        race.agents[a].prev_position,
                        race.agents[b].prev_position,
                    );
                    race.agents[a].prev_position = pb;
                    race.agents[b].prev_position = pa;
                    buffer.push(
                        t,
                        step,
                        RaceEvent::Overtake {
                            attacker: race.agents[a].id,
                            defender: race.agents[b].id,
                            at_s,
                        },
                    );
                } else {
                    // the defence holds: place the attacker just behind,
                    // without regressing below its tick-entry distance and
                    // without crossing back over the finish line
                    let target =
                        (race.agents[b].total_distance - self.pars.deny_margin).max(prev_totals[a]);
                    let delta = race.agents[a].total_distance - target;
                    if delta > 0.0 && race.agents[a].lap_distance - delta >= 0.0 {
                        race.agents[a].total_distance = target;
                        let s = race.agents[a].lap_distance - delta;
                        race.agents[a].lap_distance = wrap_s(s, track.total_length);
                    }
                }
            }
        }
    }

    /// Per-agent crash hazard: sigmoid-free risk score scaled onto a small
    /// per-tick probability.
    fn evaluate_crashes(
        &mut self,
        race: &mut RaceState,
        track: &Track,
        physics_pars: &PhysicsPars,
        buffer: &mut EventBuffer,
        rng: &mut RngService,
    ) {
        let t = race.t;
        let step = race.step_index;
        let leader_lap = race.leader_lap();
        let n = race.agents.len();

        for i in 0..n {
            if !race.agents[i].active {
                continue;
            }

            let nearby = (0..n)
                .filter(|&j| j != i && race.agents[j].active)
                .filter(|&j| {
                    circular_distance(
                        race.agents[i].lap_distance,
                        race.agents[j].lap_distance,
                        track.total_length,
                    ) < self.pars.crash_nearby_radius
                })
                .count() as f64;

            let agent = &race.agents[i];
            let risk = self.pars.crash_w_speed * agent.speed() / physics_pars.v_max
                + self.pars.crash_w_wear * agent.tire_wear
                + self.pars.crash_w_aggression * agent.driver.aggression
                + self.pars.crash_w_traffic * (nearby / self.pars.crash_nearby_norm).min(1.0)
                + self.pars.crash_w_energy
                    * (1.0 - agent.energy_pct(physics_pars.e_cap) / 100.0).max(0.0);

            let p = self.pars.crash_p_base * (1.0 + self.pars.crash_risk_gain * risk);
            if rng.global_stream(GlobalStream::Crash).uniform01() < p {
                let id = race.agents[i].id;
                race.agents[i].retire(DnfReason::Crash);
                self.crash_laps.push(leader_lap);
                buffer.push(t, step, RaceEvent::Crash { agent: id, risk });
            }
        }
    }

    /// Safety-car deployment and withdrawal. The deployment hazard rises with
    /// recent crashes; no evaluation on lap 1 or within the minimum lap gap
    /// of the previous deployment.
    fn evaluate_safety_car(
        &mut self,
        race: &mut RaceState,
        buffer: &mut EventBuffer,
        rng: &mut RngService,
        dt: f64,
    ) {
        let t = race.t;
        let step = race.step_index;
        let leader_lap = race.leader_lap();

        if race.safety_car_active {
            if t >= race.safety_car_until {
                race.safety_car_active = false;
                race.safety_car_until = 0.0;
                buffer.push(t, step, RaceEvent::SafetyCarWithdraw);
            }
            return;
        }

        // leader lap is 0-based completed laps; skip the opening lap
        if leader_lap < 1 {
            return;
        }
        if let Some(deploy_lap) = self.last_sc_deploy_lap {
            if leader_lap < deploy_lap + self.pars.sc_min_gap_laps {
                return;
            }
        }

        let crashes_recent = self
            .crash_laps
            .iter()
            .filter(|&&lap| lap + self.pars.sc_crash_window_laps >= leader_lap)
            .count() as f64;
        let lambda = self.pars.sc_rate_per_lap * (1.0 + self.pars.sc_crash_gain * crashes_recent);
        let p = 1.0 - (-lambda * dt / self.lap_time_nominal).exp();

        if rng.global_stream(GlobalStream::SafetyCar).uniform01() < p {
            race.safety_car_active = true;
            race.safety_car_until = t + self.pars.sc_duration;
            self.last_sc_deploy_lap = Some(leader_lap);
            let reason = if crashes_recent > 0.0 {
                SafetyCarReason::RecentCrashes
            } else {
                SafetyCarReason::Hazard
            };
            buffer.push(t, step, RaceEvent::SafetyCarDeploy { reason });
        }
    }

    /// Weibull mechanical hazard on the stress-scaled effective age.
    fn evaluate_mechanical(
        &mut self,
        race: &mut RaceState,
        buffer: &mut EventBuffer,
        rng: &mut RngService,
        dt: f64,
    ) {
        let (k, lambda_w) = match self.pars.failure_model {
            FailureModel::Weibull { k, lambda_w } => (k, lambda_w),
            FailureModel::None => return,
        };

        let t = race.t;
        let step = race.step_index;
        let n = race.agents.len();

        for i in 0..n {
            if !race.agents[i].active {
                continue;
            }
            let agent = &race.agents[i];
            let stress = 0.5 * agent.driver.aggression + 0.5 * agent.tire_wear;
            let age = t * (1.0 + stress);
            let hazard = (k / lambda_w) * (age / lambda_w).powf(k - 1.0);

            let stream = rng.global_stream(GlobalStream::Mechanical);
            if stream.uniform01() < hazard * dt {
                let cause = match (stream.uniform01() * 3.0) as u32 {
                    0 => MechanicalCause::Powertrain,
                    1 => MechanicalCause::Suspension,
                    _ => MechanicalCause::Brakes,
                };
                let id = race.agents[i].id;
                race.agents[i].retire(DnfReason::Mechanical);
                buffer.push(t, step, RaceEvent::MechanicalFailure { agent: id, cause });
            }
        }
    }
}
