use crate::core::error::SimError;
use crate::core::physics::G;
use helpers::general::wrap_s;
use serde::Deserialize;

/// Default arc-length spacing of the precomputed geometry table.
pub const DS_GEOM_DEFAULT: f64 = 1.0;

// closure tolerance on the accumulated heading (rad, mod 2*pi)
const HEADING_CLOSURE_TOL: f64 = 1e-3;

fn default_grip_multiplier() -> f64 {
    1.0
}
fn default_ds_geom() -> f64 {
    DS_GEOM_DEFAULT
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SegmentKind {
    Straight,
    LeftCorner,
    RightCorner,
    Chicane,
}

/// * `kind` - Segment kind (straight, left_corner, right_corner, chicane)
/// * `length` - (m) Segment length, must be positive
/// * `radius` - (m) Corner radius, not required for straights
/// * `banking` - (rad) Banking angle of the road surface
/// * `camber` - (rad) Camber angle of the road surface
/// * `elevation_delta` - (m) Elevation change over the segment
/// * `grip_multiplier` - (-) Local surface grip factor, typically 0.9-1.1
/// * `ideal_speed` - (m/s) Target speed a reference driver holds in the segment
/// * `in_attack_zone` - True if attack mode may be armed within the segment
#[derive(Debug, Deserialize, Clone)]
pub struct SegmentPars {
    pub kind: SegmentKind,
    pub length: f64,
    #[serde(default)]
    pub radius: Option<f64>,
    #[serde(default)]
    pub banking: f64,
    #[serde(default)]
    pub camber: f64,
    #[serde(default)]
    pub elevation_delta: f64,
    #[serde(default = "default_grip_multiplier")]
    pub grip_multiplier: f64,
    pub ideal_speed: f64,
    #[serde(default)]
    pub in_attack_zone: bool,
}

/// * `name` - Track name
/// * `segments` - Ordered segment records forming a closed loop
/// * `ds_geom` - (m) Arc-length spacing of the geometry sample table
#[derive(Debug, Deserialize, Clone)]
pub struct TrackPars {
    pub name: String,
    pub segments: Vec<SegmentPars>,
    #[serde(default = "default_ds_geom")]
    pub ds_geom: f64,
}

#[derive(Debug, Clone)]
pub struct Segment {
    pub kind: SegmentKind,
    pub length: f64,
    pub radius: f64, // f64::INFINITY for straights
    pub banking: f64,
    pub camber: f64,
    pub elevation_delta: f64,
    pub grip_multiplier: f64,
    pub ideal_speed: f64,
    pub in_attack_zone: bool,
    pub s_start: f64,
    pub gradient_sin: f64, // sin(alpha) of the road gradient
}

/// One sample of the precomputed geometry table. The heading is stored
/// unwrapped (continuous along the lap) so interpolation never jumps.
#[derive(Debug, Clone, Copy)]
pub struct GeomSample {
    pub x: f64,
    pub y: f64,
    pub heading: f64,
    pub curvature: f64,
}

/// The immutable track descriptor: segment catalog plus a geometry table
/// mapping cumulative arc-length to (segment, local offset, position, heading,
/// signed curvature). Built once, shared read-only for the lifetime of the
/// simulation.
#[derive(Debug)]
pub struct Track {
    pub name: String,
    pub total_length: f64,
    segments: Vec<Segment>,
    seg_ends: Vec<f64>, // cumulative end coordinate per segment
    geometry: Vec<GeomSample>,
    ds_geom: f64,
}

impl Track {
    pub fn new(track_pars: &TrackPars) -> Result<Track, SimError> {
        if track_pars.segments.is_empty() {
            return Err(SimError::bad_track("track must contain at least one segment"));
        }
        if !(track_pars.ds_geom > 0.0) {
            return Err(SimError::bad_track("ds_geom must be positive"));
        }

        // build the segment catalog with cumulative start coordinates
        let mut segments = Vec::with_capacity(track_pars.segments.len());
        let mut seg_ends = Vec::with_capacity(track_pars.segments.len());
        let mut s_cum = 0.0;

        for (i, seg_pars) in track_pars.segments.iter().enumerate() {
            if !(seg_pars.length > 0.0) {
                return Err(SimError::bad_track(format!(
                    "segment {} has non-positive length {:.3} m",
                    i, seg_pars.length
                )));
            }
            if !(seg_pars.ideal_speed > 0.0) {
                return Err(SimError::bad_track(format!(
                    "segment {} has non-positive ideal speed",
                    i
                )));
            }
            if !(seg_pars.grip_multiplier > 0.0) {
                return Err(SimError::bad_track(format!(
                    "segment {} has non-positive grip multiplier",
                    i
                )));
            }

            let radius = match seg_pars.kind {
                SegmentKind::Straight => f64::INFINITY,
                _ => match seg_pars.radius {
                    Some(r) if r > 0.0 => r,
                    _ => {
                        return Err(SimError::bad_track(format!(
                            "segment {} ({:?}) requires a positive radius",
                            i, seg_pars.kind
                        )))
                    }
                },
            };

            segments.push(Segment {
                kind: seg_pars.kind,
                length: seg_pars.length,
                radius,
                banking: seg_pars.banking,
                camber: seg_pars.camber,
                elevation_delta: seg_pars.elevation_delta,
                grip_multiplier: seg_pars.grip_multiplier,
                ideal_speed: seg_pars.ideal_speed,
                in_attack_zone: seg_pars.in_attack_zone,
                s_start: s_cum,
                gradient_sin: (seg_pars.elevation_delta / seg_pars.length).clamp(-1.0, 1.0),
            });

            s_cum += seg_pars.length;
            seg_ends.push(s_cum);
        }

        let total_length = s_cum;

        // closed-loop check: the accumulated heading change must be a multiple
        // of 2*pi (chicanes contribute zero by construction)
        let mut theta_total = 0.0;
        for seg in segments.iter() {
            theta_total += seg.heading_delta();
        }
        let two_pi = 2.0 * std::f64::consts::PI;
        let mismatch =
            (theta_total % two_pi + two_pi + std::f64::consts::PI) % two_pi - std::f64::consts::PI;
        if mismatch.abs() > HEADING_CLOSURE_TOL {
            return Err(SimError::bad_track(format!(
                "segments do not close: final heading mismatch {:.5} rad",
                mismatch
            )));
        }

        let geometry = build_geometry_table(&segments, total_length, track_pars.ds_geom);

        Ok(Track {
            name: track_pars.name.to_owned(),
            total_length,
            segments,
            seg_ends,
            geometry,
            ds_geom: track_pars.ds_geom,
        })
    }

    /// The method returns the segment containing the wrapped arc-length
    /// coordinate together with the local offset within it (O(log n)).
    pub fn segment_at(&self, s: f64) -> (&Segment, f64) {
        let s_wrapped = wrap_s(s, self.total_length);
        let idx = self
            .seg_ends
            .partition_point(|&end| end <= s_wrapped)
            .min(self.segments.len() - 1);
        let seg = &self.segments[idx];
        (seg, s_wrapped - seg.s_start)
    }

    /// The method returns (x, y, heading, signed curvature) at the wrapped
    /// arc-length coordinate by linear interpolation of the sample table.
    pub fn geometry_at(&self, s: f64) -> (f64, f64, f64, f64) {
        let s_wrapped = wrap_s(s, self.total_length);
        let idx = ((s_wrapped / self.ds_geom) as usize).min(self.geometry.len() - 2);
        // the final interval may be shorter than ds_geom (table closes at
        // exactly total_length)
        let s_a = idx as f64 * self.ds_geom;
        let s_b = ((idx + 1) as f64 * self.ds_geom).min(self.total_length);
        let frac = ((s_wrapped - s_a) / (s_b - s_a)).clamp(0.0, 1.0);

        let a = &self.geometry[idx];
        let b = &self.geometry[idx + 1];
        (
            a.x + (b.x - a.x) * frac,
            a.y + (b.y - a.y) * frac,
            a.heading + (b.heading - a.heading) * frac,
            a.curvature + (b.curvature - a.curvature) * frac,
        )
    }

    pub fn grip_at(&self, s: f64) -> f64 {
        self.segment_at(s).0.grip_multiplier
    }

    pub fn ideal_speed_at(&self, s: f64) -> f64 {
        self.segment_at(s).0.ideal_speed
    }

    pub fn in_attack_zone(&self, s: f64) -> bool {
        self.segment_at(s).0.in_attack_zone
    }

    /// The method returns the signed curvature at the coordinate (left
    /// corners positive, right corners negative, chicanes alternating).
    pub fn curvature_at(&self, s: f64) -> f64 {
        let (seg, local_s) = self.segment_at(s);
        seg.curvature_at(local_s)
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// The method estimates a nominal lap time from the segment target speeds.
    pub fn nominal_lap_time(&self) -> f64 {
        self.segments
            .iter()
            .map(|seg| seg.length / seg.ideal_speed)
            .sum()
    }
}

impl Segment {
    /// Total heading change contributed by the segment.
    fn heading_delta(&self) -> f64 {
        match self.kind {
            SegmentKind::Straight => 0.0,
            SegmentKind::LeftCorner => self.length / self.radius,
            SegmentKind::RightCorner => -self.length / self.radius,
            // two opposite arcs of half the length, cancelling exactly
            SegmentKind::Chicane => 0.0,
        }
    }

    /// Signed curvature at a local offset within the segment.
    pub fn curvature_at(&self, local_s: f64) -> f64 {
        match self.kind {
            SegmentKind::Straight => 0.0,
            SegmentKind::LeftCorner => 1.0 / self.radius,
            SegmentKind::RightCorner => -1.0 / self.radius,
            SegmentKind::Chicane => {
                if local_s < 0.5 * self.length {
                    1.0 / self.radius
                } else {
                    -1.0 / self.radius
                }
            }
        }
    }

    pub fn is_corner(&self) -> bool {
        !matches!(self.kind, SegmentKind::Straight)
    }
}

/// corner_speed_limit returns the physically admissible speed through a corner
/// of the given radius (m) under the effective friction coefficient and
/// banking angle. An infinite radius yields the inserted maximum velocity.
pub fn corner_speed_limit(radius: f64, mu_eff: f64, banking: f64, v_max: f64) -> f64 {
    if !radius.is_finite() {
        return v_max;
    }
    let v = (mu_eff * G * radius * (1.0 + 0.5 * banking.tan()))
        .max(0.0)
        .sqrt();
    v.min(v_max)
}

/// build_geometry_table integrates the heading along the segments with exact
/// constant-curvature steps and stores samples at fixed arc-length spacing.
/// The final sample sits at s = total_length so interpolation never wraps.
fn build_geometry_table(segments: &[Segment], total_length: f64, ds_geom: f64) -> Vec<GeomSample> {
    let n_samples = (total_length / ds_geom).ceil() as usize + 1;
    let mut table = Vec::with_capacity(n_samples);

    let mut x = 0.0;
    let mut y = 0.0;
    let mut heading = 0.0;

    // inline segment lookup (the table is built before the Track exists)
    let curvature_of = |s: f64| -> f64 {
        let s_wrapped = wrap_s(s, total_length);
        let mut kappa = 0.0;
        for seg in segments.iter() {
            if s_wrapped < seg.s_start + seg.length {
                kappa = seg.curvature_at(s_wrapped - seg.s_start);
                break;
            }
        }
        kappa
    };

    table.push(GeomSample {
        x,
        y,
        heading,
        curvature: curvature_of(0.0),
    });

    for i in 1..n_samples {
        let s_prev = ((i - 1) as f64 * ds_geom).min(total_length);
        let s_next = (i as f64 * ds_geom).min(total_length);
        let ds = s_next - s_prev;
        // sample curvature at the step midpoint so chicane reversals land on
        // the correct half
        let kappa = curvature_of(s_prev + 0.5 * ds);

        if kappa.abs() < 1e-12 {
            x += heading.cos() * ds;
            y += heading.sin() * ds;
        } else {
            // exact update for a constant-curvature arc
            let heading_new = heading + kappa * ds;
            x += (heading_new.sin() - heading.sin()) / kappa;
            y += (heading.cos() - heading_new.cos()) / kappa;
            heading = heading_new;
        }

        table.push(GeomSample {
            x,
            y,
            heading,
            curvature: curvature_of(s_next),
        });
    }

    table
}
