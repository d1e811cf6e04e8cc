//! Game simulation modules

pub mod combat;
pub mod r#match;
pub mod skeleton;
pub mod snapshot;

pub use r#match::{GameMatch, MatchHandle, MatchRegistry, PlayerState};

use glam::Vec3;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::ws::protocol::{ClientMsg, ServerMsg};

/// Player input received from WebSocket
#[derive(Debug, Clone)]
pub struct PlayerInput {
    pub user_id: Uuid,
    pub msg: ClientMsg,
    /// Replies meant for this connection only
    pub reply_tx: mpsc::Sender<ServerMsg>,
}

/// Latest accepted movement for a player (processed from ClientMsg::Move)
#[derive(Debug, Clone, Default)]
pub struct TickInput {
    pub position: Vec3,
    pub yaw: f32,
    pub crouched: bool,
}
