//! Hitbox severity classes and the static bone → class table

use serde::{Deserialize, Serialize};

/// Severity tier of a hit volume.
///
/// Variants are declared in ascending severity so the derived `Ord` gives
/// `Head > Body > Legs > None`, which is what hit tie-breaking relies on.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum HitboxClass {
    #[default]
    None,
    Legs,
    Body,
    Head,
}

impl HitboxClass {
    pub fn as_str(self) -> &'static str {
        match self {
            HitboxClass::None => "none",
            HitboxClass::Legs => "legs",
            HitboxClass::Body => "body",
            HitboxClass::Head => "head",
        }
    }
}

impl std::fmt::Display for HitboxClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Bone name → hitbox class for the mannequin skeleton
pub const BONE_HITBOX_CLASSES: &[(&str, HitboxClass)] = &[
    ("head", HitboxClass::Head),
    ("neck_01", HitboxClass::Head),
    ("pelvis", HitboxClass::Body),
    ("spine_01", HitboxClass::Body),
    ("spine_02", HitboxClass::Body),
    ("spine_03", HitboxClass::Body),
    ("upperarm_l", HitboxClass::Body),
    ("upperarm_r", HitboxClass::Body),
    ("lowerarm_l", HitboxClass::Body),
    ("lowerarm_r", HitboxClass::Body),
    ("hand_l", HitboxClass::Body),
    ("hand_r", HitboxClass::Body),
    ("thigh_l", HitboxClass::Legs),
    ("thigh_r", HitboxClass::Legs),
    ("calf_l", HitboxClass::Legs),
    ("calf_r", HitboxClass::Legs),
    ("foot_l", HitboxClass::Legs),
    ("foot_r", HitboxClass::Legs),
];

/// Look up the class of a bone. Bones missing from the table are `None`.
pub fn class_for_bone(bone: &str) -> HitboxClass {
    BONE_HITBOX_CLASSES
        .iter()
        .find(|(name, _)| *name == bone)
        .map(|(_, class)| *class)
        .unwrap_or(HitboxClass::None)
}
