//! Damage multipliers and the outbound damage interface

use glam::Vec3;
use uuid::Uuid;

use crate::ws::protocol::WeaponType;

use super::hitbox::HitboxClass;

/// Damage multiplier per hitbox class
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DamageTable {
    pub none: f32,
    pub legs: f32,
    pub body: f32,
    pub head: f32,
}

impl Default for DamageTable {
    fn default() -> Self {
        Self {
            none: 1.0,
            legs: 0.85,
            body: 1.25,
            head: 5.0,
        }
    }
}

impl DamageTable {
    pub fn multiplier(&self, class: HitboxClass) -> f32 {
        match class {
            HitboxClass::None => self.none,
            HitboxClass::Legs => self.legs,
            HitboxClass::Body => self.body,
            HitboxClass::Head => self.head,
        }
    }

    pub fn damage_for(&self, class: HitboxClass, base_damage: f32) -> f32 {
        base_damage * self.multiplier(class)
    }
}

/// Receives the effects of confirmed hits. Implemented by whatever owns entity health.
pub trait DamageSink {
    fn apply_damage(&mut self, target: Uuid, amount: f32, instigator: Uuid, weapon: WeaponType);

    fn spawn_impact_effect(&mut self, location: Vec3, normal: Vec3, weapon: WeaponType);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-4
    }

    #[test]
    fn default_multipliers() {
        let table = DamageTable::default();
        assert!(approx(table.damage_for(HitboxClass::Head, 20.0), 100.0));
        assert!(approx(table.damage_for(HitboxClass::Body, 20.0), 25.0));
        assert!(approx(table.damage_for(HitboxClass::Legs, 20.0), 17.0));
        assert!(approx(table.damage_for(HitboxClass::None, 20.0), 20.0));
    }

    #[test]
    fn configured_multipliers() {
        let table = DamageTable {
            head: 2.0,
            ..DamageTable::default()
        };
        assert!(approx(table.damage_for(HitboxClass::Head, 30.0), 60.0));
        assert!(approx(table.multiplier(HitboxClass::Body), 1.25));
    }
}
