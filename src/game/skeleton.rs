//! Humanoid rig: the physics bodies every player carries and the pose derived
//! from their replicated transform

use glam::{Quat, Vec3};

use crate::rewind::capture::{BodySetup, BoneTransform, BoxShape, CapsuleShape, SkeletonPose};
use crate::rewind::snapshot::BoneId;

/// Vertical squash applied to every bone offset while crouched
pub const CROUCH_SCALE: f32 = 0.65;

const fn body(bone: BoneId, axis: Vec3, half_length: f32, radius: f32, extent: Vec3) -> BodySetup {
    BodySetup {
        bone,
        capsule: Some(CapsuleShape {
            center: Vec3::ZERO,
            axis,
            half_length,
            radius,
        }),
        hitbox: Some(BoxShape {
            offset: Vec3::ZERO,
            extent,
        }),
    }
}

/// Physics asset of the mannequin, in bone space
pub const HUMANOID_RIG: &[BodySetup] = &[
    body("head", Vec3::Z, 3.0, 11.0, Vec3::new(11.0, 10.0, 13.0)),
    body("neck_01", Vec3::Z, 4.0, 7.0, Vec3::new(7.0, 7.0, 6.0)),
    body("spine_03", Vec3::Y, 6.0, 16.0, Vec3::new(14.0, 22.0, 9.0)),
    body("spine_02", Vec3::Y, 5.0, 15.0, Vec3::new(13.0, 19.0, 8.0)),
    body("spine_01", Vec3::Y, 5.0, 14.0, Vec3::new(12.0, 18.0, 8.0)),
    body("pelvis", Vec3::Y, 6.0, 14.0, Vec3::new(13.0, 19.0, 9.0)),
    body("upperarm_l", Vec3::Z, 9.0, 6.0, Vec3::new(6.0, 6.0, 15.0)),
    body("upperarm_r", Vec3::Z, 9.0, 6.0, Vec3::new(6.0, 6.0, 15.0)),
    body("lowerarm_l", Vec3::Z, 8.0, 5.0, Vec3::new(5.0, 5.0, 13.0)),
    body("lowerarm_r", Vec3::Z, 8.0, 5.0, Vec3::new(5.0, 5.0, 13.0)),
    body("hand_l", Vec3::Z, 2.0, 5.0, Vec3::new(5.0, 3.0, 7.0)),
    body("hand_r", Vec3::Z, 2.0, 5.0, Vec3::new(5.0, 3.0, 7.0)),
    body("thigh_l", Vec3::Z, 12.0, 9.0, Vec3::new(9.0, 9.0, 21.0)),
    body("thigh_r", Vec3::Z, 12.0, 9.0, Vec3::new(9.0, 9.0, 21.0)),
    body("calf_l", Vec3::Z, 11.0, 7.0, Vec3::new(7.0, 7.0, 18.0)),
    body("calf_r", Vec3::Z, 11.0, 7.0, Vec3::new(7.0, 7.0, 18.0)),
    body("foot_l", Vec3::X, 6.0, 5.0, Vec3::new(12.0, 5.0, 5.0)),
    body("foot_r", Vec3::X, 6.0, 5.0, Vec3::new(12.0, 5.0, 5.0)),
];

/// Standing bone positions relative to the feet, facing +X
pub const REFERENCE_POSE: &[(BoneId, Vec3)] = &[
    ("head", Vec3::new(0.0, 0.0, 165.0)),
    ("neck_01", Vec3::new(0.0, 0.0, 150.0)),
    ("spine_03", Vec3::new(0.0, 0.0, 135.0)),
    ("spine_02", Vec3::new(0.0, 0.0, 120.0)),
    ("spine_01", Vec3::new(0.0, 0.0, 106.0)),
    ("pelvis", Vec3::new(0.0, 0.0, 94.0)),
    ("upperarm_l", Vec3::new(0.0, 24.0, 124.0)),
    ("upperarm_r", Vec3::new(0.0, -24.0, 124.0)),
    ("lowerarm_l", Vec3::new(0.0, 26.0, 98.0)),
    ("lowerarm_r", Vec3::new(0.0, -26.0, 98.0)),
    ("hand_l", Vec3::new(0.0, 27.0, 80.0)),
    ("hand_r", Vec3::new(0.0, -27.0, 80.0)),
    ("thigh_l", Vec3::new(0.0, 10.0, 68.0)),
    ("thigh_r", Vec3::new(0.0, -10.0, 68.0)),
    ("calf_l", Vec3::new(0.0, 10.0, 30.0)),
    ("calf_r", Vec3::new(0.0, -10.0, 30.0)),
    ("foot_l", Vec3::new(6.0, 10.0, 5.0)),
    ("foot_r", Vec3::new(6.0, -10.0, 5.0)),
];

/// World pose of a player standing (or crouching) at `position` facing `yaw`
pub fn pose_for(position: Vec3, yaw: f32, crouched: bool) -> SkeletonPose {
    let rotation = Quat::from_rotation_z(yaw);
    let squash = if crouched {
        Vec3::new(1.0, 1.0, CROUCH_SCALE)
    } else {
        Vec3::ONE
    };

    let mut pose = SkeletonPose::new();
    for (bone, offset) in REFERENCE_POSE {
        pose.insert(
            *bone,
            BoneTransform {
                translation: position + rotation * (*offset * squash),
                rotation,
            },
        );
    }
    pose
}
