//! Snapshot capture from a live skeleton pose

use std::collections::HashMap;

use glam::{Quat, Vec3};

use super::hitbox::class_for_bone;
use super::snapshot::{BoneId, Capsule, HitboxSnapshot, OrientedBox};

/// World transform of one bone
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoneTransform {
    pub translation: Vec3,
    pub rotation: Quat,
}

impl BoneTransform {
    pub fn transform_point(&self, local: Vec3) -> Vec3 {
        self.translation + self.rotation * local
    }
}

/// Capsule shape in bone space
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CapsuleShape {
    pub center: Vec3,
    /// Unit axis of the capsule's cylinder
    pub axis: Vec3,
    /// Half the cylinder length, caps excluded
    pub half_length: f32,
    pub radius: f32,
}

/// Hit box shape in bone space
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoxShape {
    pub offset: Vec3,
    pub extent: Vec3,
}

/// Physics bodies attached to one bone
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BodySetup {
    pub bone: BoneId,
    pub capsule: Option<CapsuleShape>,
    pub hitbox: Option<BoxShape>,
}

/// Bone world transforms for one tick
#[derive(Debug, Clone, Default)]
pub struct SkeletonPose {
    bones: HashMap<BoneId, BoneTransform>,
}

impl SkeletonPose {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, bone: BoneId, transform: BoneTransform) {
        self.bones.insert(bone, transform);
    }

    pub fn get(&self, bone: &str) -> Option<&BoneTransform> {
        self.bones.get(bone)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CaptureError {
    #[error("pose has no transform for bone '{0}'")]
    MissingBone(BoneId),
}

/// Build a snapshot of the rig's hit geometry at the given pose.
///
/// Read-only against the pose; any bone the rig needs but the pose lacks fails the capture.
pub fn capture(
    rig: &[BodySetup],
    pose: &SkeletonPose,
    timestamp: f32,
) -> Result<HitboxSnapshot, CaptureError> {
    let mut snapshot = HitboxSnapshot::new(timestamp);

    for body in rig {
        let transform = pose
            .get(body.bone)
            .ok_or(CaptureError::MissingBone(body.bone))?;

        if let Some(shape) = body.capsule {
            let half = shape.axis * shape.half_length;
            snapshot.capsules.push(Capsule {
                bone: body.bone,
                a: transform.transform_point(shape.center - half),
                b: transform.transform_point(shape.center + half),
                radius: shape.radius,
                class: class_for_bone(body.bone),
            });
        }

        if let Some(shape) = body.hitbox {
            snapshot.boxes.insert(
                body.bone,
                OrientedBox {
                    location: transform.transform_point(shape.offset),
                    rotation: transform.rotation,
                    extent: shape.extent,
                },
            );
        }
    }

    Ok(snapshot)
}
