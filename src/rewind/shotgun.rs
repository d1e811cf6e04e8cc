//! Multi-pellet confirmation

use std::collections::HashMap;

use glam::Vec3;
use uuid::Uuid;

use super::confirm::{cast, HitStrategy, SurfaceHit, Trace, VolumeFilter};
use super::hitbox::HitboxClass;
use super::scoring::DamageTable;
use super::snapshot::HitboxSnapshot;

/// Confirmed pellets on one target, by class
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PelletTally {
    pub head_shots: u32,
    pub body_shots: u32,
    pub leg_shots: u32,
}

impl PelletTally {
    fn record(&mut self, class: HitboxClass) {
        match class {
            HitboxClass::Head => self.head_shots += 1,
            HitboxClass::Body => self.body_shots += 1,
            HitboxClass::Legs => self.leg_shots += 1,
            HitboxClass::None => {}
        }
    }

    pub fn total(&self) -> u32 {
        self.head_shots + self.body_shots + self.leg_shots
    }

    /// Sum of per-pellet damage
    pub fn damage(&self, table: &DamageTable, base_damage: f32) -> f32 {
        self.head_shots as f32 * table.damage_for(HitboxClass::Head, base_damage)
            + self.body_shots as f32 * table.damage_for(HitboxClass::Body, base_damage)
            + self.leg_shots as f32 * table.damage_for(HitboxClass::Legs, base_damage)
    }
}

/// Pellet casting parameters
#[derive(Debug, Clone, Copy)]
pub struct PelletCast {
    pub strategy: HitStrategy,
    pub max_spheres_hit: usize,
    pub trace_extension: f32,
}

/// Nearest target struck by `trace` in one pass
fn nearest_target(
    frames: &[(Uuid, HitboxSnapshot)],
    trace: &Trace,
    filter: VolumeFilter,
    params: &PelletCast,
) -> Option<(Uuid, SurfaceHit)> {
    frames
        .iter()
        .filter_map(|(target, frame)| {
            cast(frame, trace, params.strategy, filter, params.max_spheres_hit)
                .map(|hit| (*target, hit))
        })
        .min_by(|(_, a), (_, b)| a.distance.total_cmp(&b.distance))
}

/// Count pellets per target: a head-only pass, then a body pass for the
/// pellets that did not already land on a head.
pub fn confirm_pellets(
    frames: &[(Uuid, HitboxSnapshot)],
    trace_start: Vec3,
    hit_locations: &[Vec3],
    params: &PelletCast,
) -> HashMap<Uuid, PelletTally> {
    let mut tallies: HashMap<Uuid, PelletTally> = HashMap::new();
    let traces: Vec<Trace> = hit_locations
        .iter()
        .map(|hit| Trace::toward(trace_start, *hit, params.trace_extension))
        .collect();

    let mut headshot = vec![false; traces.len()];
    for (pellet, trace) in traces.iter().enumerate() {
        if let Some((target, _)) = nearest_target(frames, trace, VolumeFilter::HeadOnly, params) {
            tallies.entry(target).or_default().record(HitboxClass::Head);
            headshot[pellet] = true;
        }
    }

    for (pellet, trace) in traces.iter().enumerate() {
        if headshot[pellet] {
            continue;
        }
        if let Some((target, hit)) = nearest_target(frames, trace, VolumeFilter::ExcludeHead, params) {
            tallies.entry(target).or_default().record(hit.class);
        }
    }

    tallies
}
