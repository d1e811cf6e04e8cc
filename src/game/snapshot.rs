//! Snapshot building

use std::collections::HashMap;
use uuid::Uuid;

use crate::ws::protocol::{GameEvent, PlayerSnapshot, ServerMsg};

use super::PlayerState;

/// Builds snapshots for network transmission
pub struct SnapshotBuilder {
    /// Tick counter since last snapshot
    ticks_since_snapshot: u32,
    /// Snapshot interval in ticks
    snapshot_interval: u32,
}

impl SnapshotBuilder {
    pub fn new(snapshot_interval: u32) -> Self {
        Self {
            ticks_since_snapshot: 0,
            snapshot_interval: snapshot_interval.max(1),
        }
    }

    /// Check if it's time to send a snapshot
    pub fn should_send(&mut self) -> bool {
        self.ticks_since_snapshot += 1;
        if self.ticks_since_snapshot >= self.snapshot_interval {
            self.ticks_since_snapshot = 0;
            true
        } else {
            false
        }
    }

    /// Build a snapshot message
    pub fn build(
        &self,
        tick: u64,
        server_time: f32,
        players: &HashMap<Uuid, PlayerState>,
        events: Vec<GameEvent>,
    ) -> ServerMsg {
        let players = players
            .values()
            .map(|p| PlayerSnapshot {
                user_id: p.user_id,
                position: p.position,
                yaw: p.yaw,
                crouched: p.crouched,
                health: p.health,
                alive: p.alive,
                last_input_seq: p.last_input_seq,
                kills: p.kills,
                deaths: p.deaths,
            })
            .collect();

        ServerMsg::Snapshot {
            tick,
            server_time,
            players,
            events,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sends_every_nth_tick() {
        let mut builder = SnapshotBuilder::new(3);
        let sent: Vec<bool> = (0..6).map(|_| builder.should_send()).collect();
        assert_eq!(sent, vec![false, false, true, false, false, true]);
    }

    #[test]
    fn zero_interval_sends_every_tick() {
        let mut builder = SnapshotBuilder::new(0);
        assert!(builder.should_send());
        assert!(builder.should_send());
    }
}
