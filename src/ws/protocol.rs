//! WebSocket protocol message definitions
//! These are the wire types for client-server communication

use glam::Vec3;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Weapons a player can score hits with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WeaponType {
    #[default]
    AssaultRifle,
    Pistol,
    SubmachineGun,
    /// Fires several pellets per shot
    Shotgun,
}

/// Messages sent from client to server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMsg {
    /// Request to join a match
    JoinMatch {
        #[serde(default)]
        display_name: Option<String>,
    },

    /// Locally simulated movement for this tick
    Move {
        /// Sequence number for client-side prediction reconciliation
        seq: u32,
        position: Vec3,
        /// Facing in radians around Z
        yaw: f32,
        #[serde(default)]
        crouched: bool,
    },

    /// Single-trace hit claim
    ScoreHit {
        target_id: Uuid,
        trace_start: Vec3,
        hit_location: Vec3,
        /// Server time the shooter saw when firing
        hit_time: f32,
        weapon: WeaponType,
    },

    /// Multi-pellet hit claim
    ScoreHitMulti {
        target_ids: Vec<Uuid>,
        trace_start: Vec3,
        hit_locations: Vec<Vec3>,
        hit_time: f32,
        weapon: WeaponType,
    },

    /// Ping for latency measurement
    Ping {
        /// Client timestamp
        t: u64,
    },

    /// Leave current match
    LeaveMatch,
}

/// Messages sent from server to client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMsg {
    /// Welcome message after connection
    Welcome {
        user_id: Uuid,
        server_time: u64,
    },

    /// Confirmation of match join
    MatchJoined {
        match_id: Uuid,
        /// Seed for deterministic random generation
        seed: u64,
        /// All players in the match at join time
        players: Vec<PlayerInfo>,
    },

    /// Player joined the match
    PlayerJoined {
        player: PlayerInfo,
    },

    /// Player left the match
    PlayerLeft {
        user_id: Uuid,
        reason: String,
    },

    /// Game state snapshot (sent at regular intervals)
    Snapshot {
        /// Server tick number
        tick: u64,
        /// Match clock in seconds, the timebase for `hit_time`
        server_time: f32,
        /// All player states
        players: Vec<PlayerSnapshot>,
        /// Events that occurred since last snapshot
        events: Vec<GameEvent>,
    },

    /// A hit claim that was not confirmed
    ShotRejected {
        shooter_id: Uuid,
        target_id: Option<Uuid>,
        reason: String,
    },

    /// Error message
    Error {
        code: String,
        message: String,
    },

    /// Pong response
    Pong {
        /// Echo back client timestamp
        t: u64,
        server_time: f32,
    },
}

/// Player info for lobby/join
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerInfo {
    pub user_id: Uuid,
    pub display_name: String,
}

/// Player state in a snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerSnapshot {
    pub user_id: Uuid,
    pub position: Vec3,
    pub yaw: f32,
    pub crouched: bool,
    /// Health (0-100)
    pub health: f32,
    pub alive: bool,
    /// Last processed input sequence
    pub last_input_seq: u32,
    pub kills: u32,
    pub deaths: u32,
}

/// Game events (damage, kills, etc.)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum GameEvent {
    /// Confirmed damage
    Hit {
        shooter_id: Uuid,
        target_id: Uuid,
        weapon: WeaponType,
        damage: f32,
    },

    /// Where a confirmed trace struck
    Impact {
        location: Vec3,
        normal: Vec3,
        weapon: WeaponType,
    },

    /// Player killed
    Kill {
        killer_id: Uuid,
        victim_id: Uuid,
        weapon: WeaponType,
    },

    Respawn {
        user_id: Uuid,
        position: Vec3,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_score_hit() {
        let target = Uuid::new_v4();
        let json = format!(
            r#"{{"type":"score_hit","target_id":"{}","trace_start":[0,0,100],"hit_location":[500,0,160],"hit_time":12.5,"weapon":"assault_rifle"}}"#,
            target
        );

        match serde_json::from_str::<ClientMsg>(&json).unwrap() {
            ClientMsg::ScoreHit {
                target_id,
                trace_start,
                hit_location,
                hit_time,
                weapon,
            } => {
                assert_eq!(target_id, target);
                assert_eq!(trace_start, Vec3::new(0.0, 0.0, 100.0));
                assert_eq!(hit_location, Vec3::new(500.0, 0.0, 160.0));
                assert_eq!(hit_time, 12.5);
                assert_eq!(weapon, WeaponType::AssaultRifle);
            }
            other => panic!("unexpected message {:?}", other),
        }
    }

    #[test]
    fn move_defaults_to_standing() {
        let msg: ClientMsg = serde_json::from_str(
            r#"{"type":"move","seq":3,"position":[1,2,3],"yaw":0.5}"#,
        )
        .unwrap();
        assert!(matches!(msg, ClientMsg::Move { crouched: false, seq: 3, .. }));
    }

    #[test]
    fn unknown_weapon_is_rejected() {
        let json = format!(
            r#"{{"type":"score_hit","target_id":"{}","trace_start":[0,0,0],"hit_location":[1,0,0],"hit_time":1.0,"weapon":"railgun"}}"#,
            Uuid::new_v4()
        );
        assert!(serde_json::from_str::<ClientMsg>(&json).is_err());
    }

    #[test]
    fn events_are_tagged() {
        let event = GameEvent::Impact {
            location: Vec3::new(1.0, 2.0, 3.0),
            normal: Vec3::X,
            weapon: WeaponType::Shotgun,
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["event_type"], "impact");
        assert_eq!(value["weapon"], "shotgun");
        assert_eq!(value["location"], serde_json::json!([1.0, 2.0, 3.0]));
    }
}
