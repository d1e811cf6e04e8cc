//! Hitbox snapshot types

use std::collections::BTreeMap;

use glam::{Quat, Vec3};

use super::hitbox::HitboxClass;

/// Stable identifier of a skeleton bone
pub type BoneId = &'static str;

/// An oriented hit box in world space
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OrientedBox {
    /// Box center
    pub location: Vec3,
    pub rotation: Quat,
    /// Half extents along the box's local axes
    pub extent: Vec3,
}

/// A capsule hit volume in world space
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Capsule {
    pub bone: BoneId,
    pub a: Vec3,
    pub b: Vec3,
    pub radius: f32,
    pub class: HitboxClass,
}

/// Bounding sphere produced from a capsule
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sphere {
    pub center: Vec3,
    pub radius: f32,
    pub class: HitboxClass,
}

impl Capsule {
    /// The sphere chain standing in for this capsule: both end caps and the midpoint.
    pub fn spheres(&self) -> [Sphere; 3] {
        let sphere = |center| Sphere {
            center,
            radius: self.radius,
            class: self.class,
        };
        [sphere(self.a), sphere(self.a.lerp(self.b, 0.5)), sphere(self.b)]
    }
}

/// One timestamped capture of an entity's hit geometry
#[derive(Debug, Clone, PartialEq)]
pub struct HitboxSnapshot {
    /// Server clock, seconds
    pub timestamp: f32,
    pub boxes: BTreeMap<BoneId, OrientedBox>,
    pub capsules: Vec<Capsule>,
}

impl HitboxSnapshot {
    pub fn new(timestamp: f32) -> Self {
        Self {
            timestamp,
            boxes: BTreeMap::new(),
            capsules: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capsule_sphere_chain() {
        let capsule = Capsule {
            bone: "spine_02",
            a: Vec3::new(0.0, 0.0, 100.0),
            b: Vec3::new(0.0, 0.0, 140.0),
            radius: 15.0,
            class: HitboxClass::Body,
        };
        let spheres = capsule.spheres();
        assert_eq!(spheres[0].center, capsule.a);
        assert_eq!(spheres[1].center, Vec3::new(0.0, 0.0, 120.0));
        assert_eq!(spheres[2].center, capsule.b);
        assert!(spheres
            .iter()
            .all(|s| s.radius == 15.0 && s.class == HitboxClass::Body));
    }
}
