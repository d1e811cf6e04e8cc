//! Lag compensator: owns every entity's history and scores hit claims against it

use std::collections::HashMap;

use glam::Vec3;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::ws::protocol::WeaponType;

use super::confirm::{confirm_hit, HitConfirmation, HitStrategy, Trace};
use super::history::HistoryBuffer;
use super::lookup::find_frame;
use super::scoring::{DamageSink, DamageTable};
use super::shotgun::{confirm_pellets, PelletCast, PelletTally};
use super::snapshot::HitboxSnapshot;
use super::RewindError;

/// Tunables for rewind and confirmation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RewindConfig {
    /// Seconds of history kept per entity
    pub max_record_time: f32,
    /// Sphere hits after which a cast stops looking
    pub max_spheres_hit: usize,
    pub strategy: HitStrategy,
    /// Trace length past the reported hit location, as a factor of start→hit
    pub trace_extension: f32,
    pub damage: DamageTable,
}

impl Default for RewindConfig {
    fn default() -> Self {
        Self {
            max_record_time: 2.0,
            max_spheres_hit: 4,
            strategy: HitStrategy::Spheres,
            trace_extension: 1.25,
            damage: DamageTable::default(),
        }
    }
}

/// Whether this instance owns the simulation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Authority {
    Server,
    Replica,
}

/// A single-trace hit claim
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RewindQuery {
    pub target: Uuid,
    pub trace_start: Vec3,
    pub hit_location: Vec3,
    /// Server-clock time the shooter saw when firing
    pub claimed_time: f32,
}

/// A multi-pellet hit claim
#[derive(Debug, Clone, PartialEq)]
pub struct ShotgunQuery {
    pub targets: Vec<Uuid>,
    pub trace_start: Vec3,
    pub hit_locations: Vec<Vec3>,
    pub claimed_time: f32,
}

pub struct LagCompensator {
    config: RewindConfig,
    authority: Authority,
    histories: HashMap<Uuid, HistoryBuffer>,
}

impl LagCompensator {
    pub fn new(config: RewindConfig, authority: Authority) -> Self {
        Self {
            config,
            authority,
            histories: HashMap::new(),
        }
    }

    pub fn is_authoritative(&self) -> bool {
        self.authority == Authority::Server
    }

    /// Append this tick's frame for `entity`. Replicas never keep history.
    pub fn record(&mut self, entity: Uuid, snapshot: HitboxSnapshot) {
        if !self.is_authoritative() {
            return;
        }

        let max_record_time = self.config.max_record_time;
        let history = self
            .histories
            .entry(entity)
            .or_insert_with(|| HistoryBuffer::new(max_record_time));

        if let Err(e) = history.record(snapshot) {
            warn!(entity = %entity, error = %e, "Dropped hitbox frame");
        }
    }

    /// Forget an entity's history (left the match, died, teleported)
    pub fn forget(&mut self, entity: &Uuid) {
        self.histories.remove(entity);
    }

    pub fn history(&self, entity: &Uuid) -> Option<&HistoryBuffer> {
        self.histories.get(entity)
    }

    pub fn tracked_entities(&self) -> usize {
        self.histories.len()
    }

    /// Frame of `target` at `time`, interpolated when needed
    pub fn frame_at(&self, target: &Uuid, time: f32) -> Result<HitboxSnapshot, RewindError> {
        let history = self
            .history(target)
            .ok_or(RewindError::NoHistory { frames: 0 })?;
        find_frame(history, time)
    }

    /// Validate a claim, reporting why a rewind was impossible
    pub fn confirm(&self, query: &RewindQuery) -> Result<HitConfirmation, RewindError> {
        let frame = self.frame_at(&query.target, query.claimed_time)?;
        let trace = Trace::toward(query.trace_start, query.hit_location, self.config.trace_extension);
        Ok(confirm_hit(
            &frame,
            &trace,
            self.config.strategy,
            self.config.max_spheres_hit,
        ))
    }

    /// Per-target pellet counts for a multi-pellet claim
    pub fn confirm_multi(&self, query: &ShotgunQuery) -> HashMap<Uuid, PelletTally> {
        let mut frames = Vec::with_capacity(query.targets.len());
        for target in &query.targets {
            if frames.iter().any(|(id, _)| id == target) {
                continue;
            }
            match self.frame_at(target, query.claimed_time) {
                Ok(frame) => frames.push((*target, frame)),
                Err(e) => log_rewind_failure(target, &e),
            }
        }

        let params = PelletCast {
            strategy: self.config.strategy,
            max_spheres_hit: self.config.max_spheres_hit,
            trace_extension: self.config.trace_extension,
        };
        confirm_pellets(&frames, query.trace_start, &query.hit_locations, &params)
    }

    /// Confirm a single-trace claim and apply its damage.
    ///
    /// A failed rewind is returned as the error; a rewind that found no
    /// intersection is `Ok` with an unconfirmed result. Nothing is applied
    /// in either case.
    pub fn score_hit<S: DamageSink>(
        &self,
        shooter: Uuid,
        query: &RewindQuery,
        weapon: WeaponType,
        base_damage: f32,
        sink: &mut S,
    ) -> Result<HitConfirmation, RewindError> {
        if !self.is_authoritative() {
            warn!(shooter = %shooter, "Score request on a non-authoritative instance ignored");
            return Ok(HitConfirmation::miss());
        }

        let confirmation = self.confirm(query).map_err(|e| {
            log_rewind_failure(&query.target, &e);
            e
        })?;
        if !confirmation.confirmed {
            debug!(
                shooter = %shooter,
                target_id = %query.target,
                claimed_time = query.claimed_time,
                "Hit not confirmed"
            );
            return Ok(confirmation);
        }

        let damage = self
            .config
            .damage
            .damage_for(confirmation.hitbox_class, base_damage);

        info!(
            shooter = %shooter,
            target_id = %query.target,
            hitbox = %confirmation.hitbox_class,
            damage,
            claimed_time = query.claimed_time,
            "Hit confirmed"
        );

        sink.apply_damage(query.target, damage, shooter, weapon);
        sink.spawn_impact_effect(
            confirmation.impact_location,
            confirmation.impact_normal,
            weapon,
        );
        Ok(confirmation)
    }

    /// Confirm a multi-pellet claim and apply summed damage per target
    pub fn score_hit_multi<S: DamageSink>(
        &self,
        shooter: Uuid,
        query: &ShotgunQuery,
        weapon: WeaponType,
        base_damage: f32,
        sink: &mut S,
    ) -> HashMap<Uuid, PelletTally> {
        if !self.is_authoritative() {
            warn!(shooter = %shooter, "Score request on a non-authoritative instance ignored");
            return HashMap::new();
        }

        let tallies = self.confirm_multi(query);
        for (target, tally) in &tallies {
            let damage = tally.damage(&self.config.damage, base_damage);
            if damage <= 0.0 {
                continue;
            }

            info!(
                shooter = %shooter,
                target_id = %target,
                pellets = tally.total(),
                head_shots = tally.head_shots,
                body_shots = tally.body_shots,
                leg_shots = tally.leg_shots,
                damage,
                "Pellet hits confirmed"
            );
            sink.apply_damage(*target, damage, shooter, weapon);
        }
        tallies
    }
}

fn log_rewind_failure(target: &Uuid, e: &RewindError) {
    match e {
        RewindError::TopologyMismatch { .. } => {
            error!(target_id = %target, error = %e, "Hitbox topology changed between frames");
        }
        _ => {
            debug!(target_id = %target, reason = e.code(), error = %e, "Rewind not possible");
        }
    }
}
