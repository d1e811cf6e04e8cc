//! Combat system - weapons, damage, claim sanity checks

use glam::Vec3;

use crate::ws::protocol::WeaponType;

pub const MAX_HEALTH: f32 = 100.0;

/// Seconds a dead player waits before respawning
pub const RESPAWN_DELAY: f32 = 3.0;

/// Longest hitscan trace a weapon can fire
pub const TRACE_LENGTH: f32 = 80_000.0;

/// Fastest a client may move its character, units per second
pub const MAX_MOVE_SPEED: f32 = 600.0;

/// Weapon stats per weapon type
#[derive(Debug, Clone, Copy)]
pub struct WeaponStats {
    /// Damage per hit (per pellet for scatter weapons)
    pub damage: f32,
    /// Traces per trigger pull
    pub pellets: u32,
}

impl WeaponStats {
    pub fn for_type(weapon: WeaponType) -> Self {
        match weapon {
            WeaponType::AssaultRifle => Self {
                damage: 20.0,
                pellets: 1,
            },
            WeaponType::Pistol => Self {
                damage: 25.0,
                pellets: 1,
            },
            WeaponType::SubmachineGun => Self {
                damage: 12.0,
                pellets: 1,
            },
            WeaponType::Shotgun => Self {
                damage: 15.0,
                pellets: 10,
            },
        }
    }

    pub fn is_scatter(&self) -> bool {
        self.pellets > 1
    }
}

/// Combat system for managing damage
pub struct CombatSystem;

impl CombatSystem {
    /// Apply damage to health, returns (new_health, is_dead)
    pub fn apply_damage(current_health: f32, damage: f32) -> (f32, bool) {
        let new_health = (current_health - damage).clamp(0.0, MAX_HEALTH);
        (new_health, new_health <= 0.0)
    }

    /// Whether a claimed hit lies within weapon reach of its trace start
    pub fn in_range(trace_start: Vec3, hit_location: Vec3) -> bool {
        trace_start.distance(hit_location) <= TRACE_LENGTH
    }

    /// Clamp a client-reported move to what `dt` seconds allow
    pub fn clamp_move(from: Vec3, to: Vec3, dt: f32) -> Vec3 {
        from + (to - from).clamp_length_max(MAX_MOVE_SPEED * dt)
    }
}
