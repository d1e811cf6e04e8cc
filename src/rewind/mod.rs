//! Server-side rewind: hitbox history, time lookup and hit confirmation

pub mod capture;
pub mod compensator;
pub mod confirm;
pub mod history;
pub mod hitbox;
pub mod lookup;
pub mod scoring;
pub mod shotgun;
pub mod snapshot;

pub use compensator::{Authority, LagCompensator, RewindConfig, RewindQuery, ShotgunQuery};
pub use confirm::HitStrategy;
pub use scoring::{DamageSink, DamageTable};

/// Reasons a rewind cannot produce a frame to check against.
///
/// Every variant resolves to "hit not confirmed" at the scoring layer.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RewindError {
    #[error("not enough history to rewind ({frames} frames)")]
    NoHistory { frames: usize },

    #[error("claimed time {claimed:.3}s precedes oldest frame at {oldest:.3}s")]
    TooOld { claimed: f32, oldest: f32 },

    #[error("hitbox topology differs between frames at {older:.3}s and {younger:.3}s")]
    TopologyMismatch { older: f32, younger: f32 },

    #[error("frame at {timestamp:.3}s is older than newest frame at {newest:.3}s")]
    OutOfOrder { timestamp: f32, newest: f32 },
}

impl RewindError {
    /// Short machine-readable code for rejection messages
    pub fn code(&self) -> &'static str {
        match self {
            RewindError::NoHistory { .. } => "no_history",
            RewindError::TooOld { .. } => "too_old",
            RewindError::TopologyMismatch { .. } => "topology_mismatch",
            RewindError::OutOfOrder { .. } => "out_of_order",
        }
    }
}
