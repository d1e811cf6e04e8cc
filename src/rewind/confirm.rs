//! Hit confirmation against a reconstructed frame.
//!
//! Every test here is a pure function over an immutable snapshot; the live
//! entity is never moved, so there is nothing to restore afterwards.

use std::str::FromStr;

use glam::Vec3;
use serde::{Deserialize, Serialize};

use super::hitbox::{class_for_bone, HitboxClass};
use super::snapshot::{HitboxSnapshot, OrientedBox};

/// Geometry used to confirm hits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HitStrategy {
    /// Capsules reduced to sphere chains, analytic line-vs-sphere tests
    #[default]
    Spheres,
    /// Oriented boxes, head volume first
    Boxes,
}

impl FromStr for HitStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "spheres" | "capsules" => Ok(HitStrategy::Spheres),
            "boxes" => Ok(HitStrategy::Boxes),
            other => Err(format!("unknown hit strategy '{}'", other)),
        }
    }
}

/// Which hit volumes take part in a cast
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VolumeFilter {
    All,
    HeadOnly,
    ExcludeHead,
}

impl VolumeFilter {
    fn admits(self, class: HitboxClass) -> bool {
        match self {
            VolumeFilter::All => true,
            VolumeFilter::HeadOnly => class == HitboxClass::Head,
            VolumeFilter::ExcludeHead => class != HitboxClass::Head,
        }
    }
}

/// The segment a shot is validated along
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Trace {
    pub start: Vec3,
    pub end: Vec3,
}

impl Trace {
    /// Trace from `start` through `hit_location`, stretched by `extension`
    /// so a hit point reported on the surface still crosses the volume.
    pub fn toward(start: Vec3, hit_location: Vec3, extension: f32) -> Self {
        Self {
            start,
            end: start + (hit_location - start) * extension,
        }
    }

    /// Unit direction and length, `None` for a degenerate trace
    fn direction_and_length(&self) -> Option<(Vec3, f32)> {
        let delta = self.end - self.start;
        let length = delta.length();
        if length <= f32::EPSILON {
            return None;
        }
        Some((delta / length, length))
    }
}

/// A single struck volume
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SurfaceHit {
    pub class: HitboxClass,
    /// Distance from the trace start to the impact point
    pub distance: f32,
    pub location: Vec3,
    pub normal: Vec3,
}

impl SurfaceHit {
    /// Higher severity wins, then the hit nearer to the trace start
    fn beats(&self, other: &SurfaceHit) -> bool {
        self.class > other.class || (self.class == other.class && self.distance < other.distance)
    }
}

/// Outcome of validating one hit claim
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct HitConfirmation {
    pub confirmed: bool,
    pub hitbox_class: HitboxClass,
    pub impact_location: Vec3,
    pub impact_normal: Vec3,
}

impl HitConfirmation {
    pub fn miss() -> Self {
        Self::default()
    }
}

impl From<Option<SurfaceHit>> for HitConfirmation {
    fn from(hit: Option<SurfaceHit>) -> Self {
        match hit {
            Some(hit) => Self {
                confirmed: true,
                hitbox_class: hit.class,
                impact_location: hit.location,
                impact_normal: hit.normal,
            },
            None => Self::miss(),
        }
    }
}

/// Line-vs-sphere test for a segment starting at `start` with unit direction `dir`.
pub fn line_sphere_intersection(start: Vec3, dir: Vec3, length: f32, center: Vec3, radius: f32) -> bool {
    let eo = start - center;
    let v = dir.dot(center - start);
    let disc = radius * radius - (eo.dot(eo) - v * v);

    if disc < 0.0 {
        return false;
    }

    let time = (v - disc.sqrt()) / length;
    (0.0..=1.0).contains(&time)
}

/// First point where a line entering the sphere touches it.
/// Only meaningful when the line is known to intersect.
pub fn first_intersection_point(start: Vec3, dir: Vec3, center: Vec3, radius: f32) -> Vec3 {
    let closest = start + dir * dir.dot(center - start);
    let closest_dist_sq = closest.distance_squared(center);
    closest - dir * (radius * radius - closest_dist_sq).max(0.0).sqrt()
}

/// Best hit against the sphere chains of `frame`.
///
/// Stops after `max_spheres_hit` intersecting spheres.
pub fn trace_spheres(
    frame: &HitboxSnapshot,
    trace: &Trace,
    filter: VolumeFilter,
    max_spheres_hit: usize,
) -> Option<SurfaceHit> {
    let (dir, length) = trace.direction_and_length()?;
    let mut best: Option<SurfaceHit> = None;
    let mut spheres_hit = 0;

    'capsules: for capsule in frame.capsules.iter().filter(|c| filter.admits(c.class)) {
        for sphere in capsule.spheres() {
            if !line_sphere_intersection(trace.start, dir, length, sphere.center, sphere.radius) {
                continue;
            }

            let location = first_intersection_point(trace.start, dir, sphere.center, sphere.radius);
            let hit = SurfaceHit {
                class: sphere.class,
                distance: location.distance(trace.start),
                location,
                normal: (location - sphere.center).normalize_or_zero(),
            };
            if best.as_ref().map_or(true, |current| hit.beats(current)) {
                best = Some(hit);
            }

            spheres_hit += 1;
            if spheres_hit >= max_spheres_hit {
                break 'capsules;
            }
        }
    }

    best
}

/// Segment-vs-oriented-box slab test. Returns the entry distance and the face normal.
pub fn segment_box_intersection(trace: &Trace, hitbox: &OrientedBox) -> Option<(f32, Vec3)> {
    let (_, length) = trace.direction_and_length()?;
    let inverse = hitbox.rotation.inverse();
    let origin = inverse * (trace.start - hitbox.location);
    let delta = inverse * (trace.end - trace.start);

    let mut t_enter = f32::NEG_INFINITY;
    let mut t_exit = f32::INFINITY;
    let mut enter_normal = Vec3::ZERO;

    for axis in 0..3 {
        let o = origin[axis];
        let d = delta[axis];
        let e = hitbox.extent[axis];

        if d.abs() <= f32::EPSILON {
            if o.abs() > e {
                return None;
            }
            continue;
        }

        let mut near = (-e - o) / d;
        let mut far = (e - o) / d;
        let mut sign = -1.0;
        if near > far {
            std::mem::swap(&mut near, &mut far);
            sign = 1.0;
        }

        if near > t_enter {
            t_enter = near;
            enter_normal = Vec3::ZERO;
            enter_normal[axis] = sign;
        }
        t_exit = t_exit.min(far);

        if t_enter > t_exit {
            return None;
        }
    }

    if t_exit < 0.0 || t_enter > 1.0 {
        return None;
    }

    // Trace starts inside the box
    if t_enter < 0.0 {
        return Some((0.0, -(trace.end - trace.start).normalize_or_zero()));
    }

    Some((t_enter * length, hitbox.rotation * enter_normal))
}

/// Nearest box struck among those the filter admits
pub fn trace_boxes(frame: &HitboxSnapshot, trace: &Trace, filter: VolumeFilter) -> Option<SurfaceHit> {
    let (dir, _) = trace.direction_and_length()?;

    frame
        .boxes
        .iter()
        .map(|(bone, hitbox)| (class_for_bone(bone), hitbox))
        .filter(|(class, _)| filter.admits(*class))
        .filter_map(|(class, hitbox)| {
            segment_box_intersection(trace, hitbox).map(|(distance, normal)| SurfaceHit {
                class,
                distance,
                location: trace.start + dir * distance,
                normal,
            })
        })
        .min_by(|a, b| a.distance.total_cmp(&b.distance))
}

/// Cast one pass of `strategy` restricted by `filter`
pub fn cast(
    frame: &HitboxSnapshot,
    trace: &Trace,
    strategy: HitStrategy,
    filter: VolumeFilter,
    max_spheres_hit: usize,
) -> Option<SurfaceHit> {
    match strategy {
        HitStrategy::Spheres => trace_spheres(frame, trace, filter, max_spheres_hit),
        HitStrategy::Boxes => trace_boxes(frame, trace, filter),
    }
}

/// Confirm a claimed trace against a reconstructed frame
pub fn confirm_hit(
    frame: &HitboxSnapshot,
    trace: &Trace,
    strategy: HitStrategy,
    max_spheres_hit: usize,
) -> HitConfirmation {
    let hit = match strategy {
        HitStrategy::Spheres => trace_spheres(frame, trace, VolumeFilter::All, max_spheres_hit),
        // Head volume first; only fall through to the rest of the body on a miss
        HitStrategy::Boxes => trace_boxes(frame, trace, VolumeFilter::HeadOnly)
            .or_else(|| trace_boxes(frame, trace, VolumeFilter::ExcludeHead)),
    };
    hit.into()
}
