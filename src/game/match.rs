//! Match state and authoritative tick loop

use dashmap::DashMap;
use glam::Vec3;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::time::interval;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::rewind::capture::capture;
use crate::rewind::{Authority, DamageSink, LagCompensator, RewindConfig, RewindQuery, ShotgunQuery};
use crate::util::time::{tick_delta, SIMULATION_TPS, SNAPSHOT_TPS};
use crate::ws::protocol::{ClientMsg, GameEvent, PlayerInfo, ServerMsg, WeaponType};

use super::combat::{CombatSystem, WeaponStats, MAX_HEALTH, RESPAWN_DELAY};
use super::skeleton::{pose_for, HUMANOID_RIG};
use super::snapshot::SnapshotBuilder;
use super::{PlayerInput, TickInput};

/// Spawn ring around the map origin
const SPAWN_MIN_DISTANCE: f32 = 200.0;
const SPAWN_MAX_DISTANCE: f32 = 2000.0;

/// Player state in a match (authoritative)
#[derive(Debug, Clone)]
pub struct PlayerState {
    pub user_id: Uuid,
    pub display_name: String,

    pub position: Vec3,
    pub yaw: f32,
    pub crouched: bool,

    pub health: f32,
    pub alive: bool,
    /// Seconds until respawn while dead
    pub respawn_timer: f32,

    // Input tracking
    pub last_input_seq: u32,
    pub current_input: TickInput,

    // Stats
    pub kills: u32,
    pub deaths: u32,
    pub damage_dealt: f32,
    pub damage_taken: f32,
    pub shots_fired: u32,
    pub shots_hit: u32,
}

impl PlayerState {
    pub fn new(user_id: Uuid, display_name: String, spawn: Vec3, yaw: f32) -> Self {
        Self {
            user_id,
            display_name,
            position: spawn,
            yaw,
            crouched: false,
            health: MAX_HEALTH,
            alive: true,
            respawn_timer: 0.0,
            last_input_seq: 0,
            current_input: TickInput {
                position: spawn,
                yaw,
                crouched: false,
            },
            kills: 0,
            deaths: 0,
            damage_dealt: 0.0,
            damage_taken: 0.0,
            shots_fired: 0,
            shots_hit: 0,
        }
    }

    fn info(&self) -> PlayerInfo {
        PlayerInfo {
            user_id: self.user_id,
            display_name: self.display_name.clone(),
        }
    }
}

/// A hit claim waiting for the next tick
#[derive(Debug, Clone)]
enum ShotClaim {
    Single {
        shooter: Uuid,
        reply_tx: mpsc::Sender<ServerMsg>,
        target: Uuid,
        trace_start: Vec3,
        hit_location: Vec3,
        hit_time: f32,
        weapon: WeaponType,
    },
    Multi {
        shooter: Uuid,
        reply_tx: mpsc::Sender<ServerMsg>,
        targets: Vec<Uuid>,
        trace_start: Vec3,
        hit_locations: Vec<Vec3>,
        hit_time: f32,
        weapon: WeaponType,
    },
}

/// Match state (owned by match task)
pub struct MatchState {
    pub id: Uuid,
    pub seed: u64,
    pub tick: u64,
    /// Match clock in seconds
    pub time: f32,
    pub players: HashMap<Uuid, PlayerState>,
    pub rng: ChaCha8Rng,
    pub max_players: usize,
    /// Events since the last snapshot
    pub events: Vec<GameEvent>,
}

impl MatchState {
    pub fn new(id: Uuid, seed: u64, max_players: usize) -> Self {
        Self {
            id,
            seed,
            tick: 0,
            time: 0.0,
            players: HashMap::new(),
            rng: ChaCha8Rng::seed_from_u64(seed),
            max_players,
            events: Vec::new(),
        }
    }

    /// Generate a spawn position and facing for a player
    pub fn generate_spawn_position(&mut self) -> (Vec3, f32) {
        let angle = self.rng.gen_range(0.0..std::f32::consts::TAU);
        let distance = self.rng.gen_range(SPAWN_MIN_DISTANCE..SPAWN_MAX_DISTANCE);
        let position = Vec3::new(angle.cos() * distance, angle.sin() * distance, 0.0);
        let yaw = self.rng.gen_range(0.0..std::f32::consts::TAU);
        (position, yaw)
    }
}

impl DamageSink for MatchState {
    fn apply_damage(&mut self, target: Uuid, amount: f32, instigator: Uuid, weapon: WeaponType) {
        let Some(victim) = self.players.get_mut(&target) else {
            return;
        };
        if !victim.alive {
            return;
        }

        let (new_health, killed) = CombatSystem::apply_damage(victim.health, amount);
        let dealt = victim.health - new_health;
        victim.health = new_health;
        victim.damage_taken += dealt;
        if killed {
            victim.alive = false;
            victim.deaths += 1;
            victim.respawn_timer = RESPAWN_DELAY;
        }

        if let Some(shooter) = self.players.get_mut(&instigator) {
            shooter.damage_dealt += dealt;
            shooter.shots_hit += 1;
            if killed {
                shooter.kills += 1;
            }
        }

        self.events.push(GameEvent::Hit {
            shooter_id: instigator,
            target_id: target,
            weapon,
            damage: amount,
        });

        if killed {
            info!(
                match_id = %self.id,
                killer_id = %instigator,
                victim_id = %target,
                ?weapon,
                "Player killed"
            );
            self.events.push(GameEvent::Kill {
                killer_id: instigator,
                victim_id: target,
                weapon,
            });
        }
    }

    fn spawn_impact_effect(&mut self, location: Vec3, normal: Vec3, weapon: WeaponType) {
        self.events.push(GameEvent::Impact {
            location,
            normal,
            weapon,
        });
    }
}

/// Handle to a running match
#[derive(Clone)]
pub struct MatchHandle {
    pub id: Uuid,
    pub input_tx: mpsc::Sender<PlayerInput>,
    pub snapshot_tx: broadcast::Sender<ServerMsg>,
    /// Occupied slots: joined players plus joins still in flight
    pub player_count: Arc<AtomicUsize>,
}

impl MatchHandle {
    pub fn player_count(&self) -> usize {
        self.player_count.load(Ordering::Acquire)
    }

    /// Claim a slot before the join reaches the match task
    pub fn try_reserve(&self, max_players: usize) -> bool {
        self.player_count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < max_players).then_some(n + 1)
            })
            .is_ok()
    }
}

/// Registry of all active matches
pub struct MatchRegistry {
    matches: DashMap<Uuid, MatchHandle>,
}

impl MatchRegistry {
    pub fn new() -> Self {
        Self {
            matches: DashMap::new(),
        }
    }

    pub fn get(&self, id: &Uuid) -> Option<MatchHandle> {
        self.matches.get(id).map(|m| m.value().clone())
    }

    pub fn insert(&self, handle: MatchHandle) {
        self.matches.insert(handle.id, handle);
    }

    pub fn remove(&self, id: &Uuid) -> Option<MatchHandle> {
        self.matches.remove(id).map(|(_, h)| h)
    }

    pub fn active_matches(&self) -> usize {
        self.matches.len()
    }

    pub fn total_players(&self) -> usize {
        self.matches
            .iter()
            .map(|m| m.value().player_count())
            .sum()
    }

    /// Reserve a slot in the first match that has one
    pub fn reserve_slot(&self, max_players: usize) -> Option<MatchHandle> {
        self.matches
            .iter()
            .find(|entry| entry.value().try_reserve(max_players))
            .map(|entry| entry.value().clone())
    }
}

impl Default for MatchRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// The authoritative game match
pub struct GameMatch {
    state: MatchState,
    compensator: LagCompensator,
    pending_shots: Vec<ShotClaim>,
    input_rx: mpsc::Receiver<PlayerInput>,
    snapshot_tx: broadcast::Sender<ServerMsg>,
    snapshot_builder: SnapshotBuilder,
    player_count: Arc<AtomicUsize>,
    /// Set once the first player joins
    populated: bool,
}

impl GameMatch {
    /// Create a new match
    pub fn new(id: Uuid, seed: u64, max_players: usize, rewind: RewindConfig) -> (Self, MatchHandle) {
        let (input_tx, input_rx) = mpsc::channel(256);
        let (snapshot_tx, _) = broadcast::channel(64);
        let player_count = Arc::new(AtomicUsize::new(0));

        let handle = MatchHandle {
            id,
            input_tx,
            snapshot_tx: snapshot_tx.clone(),
            player_count: player_count.clone(),
        };

        let snapshot_interval = SIMULATION_TPS / SNAPSHOT_TPS;
        let game_match = Self {
            state: MatchState::new(id, seed, max_players),
            compensator: LagCompensator::new(rewind, Authority::Server),
            pending_shots: Vec::new(),
            input_rx,
            snapshot_tx,
            snapshot_builder: SnapshotBuilder::new(snapshot_interval),
            player_count,
            populated: false,
        };

        (game_match, handle)
    }

    /// Run the authoritative tick loop until every player has left
    pub async fn run(mut self) {
        info!(match_id = %self.state.id, "Match started");

        let tick_duration = Duration::from_micros(1_000_000 / SIMULATION_TPS as u64);
        let mut tick_interval = interval(tick_duration);
        tick_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tick_interval.tick().await;
            self.step();

            if self.populated && self.state.players.is_empty() && self.reserved_slots() == 0 {
                info!(match_id = %self.state.id, "All players left, ending match");
                break;
            }
        }
    }

    /// One full tick: drain inputs, simulate, broadcast when due
    pub fn step(&mut self) {
        self.process_inputs();
        self.run_tick();

        if self.snapshot_builder.should_send() {
            let events = std::mem::take(&mut self.state.events);
            let snapshot = self.snapshot_builder.build(
                self.state.tick,
                self.state.time,
                &self.state.players,
                events,
            );

            // Broadcast to all connected clients
            let _ = self.snapshot_tx.send(snapshot);
        }
    }

    /// Process all pending inputs from players
    fn process_inputs(&mut self) {
        while let Ok(input) = self.input_rx.try_recv() {
            let PlayerInput {
                user_id,
                msg,
                reply_tx,
            } = input;
            match msg {
                ClientMsg::JoinMatch { display_name } => {
                    self.handle_join(user_id, display_name, &reply_tx);
                }
                ClientMsg::Move {
                    seq,
                    position,
                    yaw,
                    crouched,
                } => {
                    self.handle_move(user_id, seq, position, yaw, crouched);
                }
                ClientMsg::ScoreHit {
                    target_id,
                    trace_start,
                    hit_location,
                    hit_time,
                    weapon,
                } => {
                    if !self.is_member(user_id, &reply_tx) {
                        continue;
                    }
                    self.pending_shots.push(ShotClaim::Single {
                        shooter: user_id,
                        reply_tx,
                        target: target_id,
                        trace_start,
                        hit_location,
                        hit_time,
                        weapon,
                    });
                }
                ClientMsg::ScoreHitMulti {
                    target_ids,
                    trace_start,
                    hit_locations,
                    hit_time,
                    weapon,
                } => {
                    if !self.is_member(user_id, &reply_tx) {
                        continue;
                    }
                    self.pending_shots.push(ShotClaim::Multi {
                        shooter: user_id,
                        reply_tx,
                        targets: target_ids,
                        trace_start,
                        hit_locations,
                        hit_time,
                        weapon,
                    });
                }
                ClientMsg::Ping { t } => {
                    reply(
                        &reply_tx,
                        ServerMsg::Pong {
                            t,
                            server_time: self.state.time,
                        },
                    );
                }
                ClientMsg::LeaveMatch => {
                    self.handle_leave(user_id);
                }
            }
        }
    }

    /// Handle player join request. Every join arrives holding a reserved slot.
    fn handle_join(
        &mut self,
        user_id: Uuid,
        display_name: Option<String>,
        reply_tx: &mpsc::Sender<ServerMsg>,
    ) {
        if self.state.players.contains_key(&user_id) {
            warn!(user_id = %user_id, "Player already in match");
            self.release_slot();
            send_error(reply_tx, "already_joined", "Already in this match");
            return;
        }

        if self.state.players.len() >= self.state.max_players {
            self.release_slot();
            send_error(reply_tx, "match_full", "Match is full");
            return;
        }

        let display_name = display_name
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| format!("Player_{}", &user_id.to_string()[..8]));
        let (spawn, yaw) = self.state.generate_spawn_position();
        let player = PlayerState::new(user_id, display_name, spawn, yaw);
        let player_info = player.info();

        self.state.players.insert(user_id, player);
        self.populated = true;

        // Notify all players of the new player
        let _ = self.snapshot_tx.send(ServerMsg::PlayerJoined {
            player: player_info,
        });

        // Send match joined to the new player
        let players: Vec<PlayerInfo> = self.state.players.values().map(PlayerState::info).collect();
        reply(
            reply_tx,
            ServerMsg::MatchJoined {
                match_id: self.state.id,
                seed: self.state.seed,
                players,
            },
        );

        info!(
            match_id = %self.state.id,
            user_id = %user_id,
            player_count = self.state.players.len(),
            "Player joined match"
        );
    }

    /// Handle a movement update
    fn handle_move(&mut self, user_id: Uuid, seq: u32, position: Vec3, yaw: f32, crouched: bool) {
        let Some(player) = self.state.players.get_mut(&user_id) else {
            return;
        };
        if !player.alive || seq <= player.last_input_seq {
            return;
        }
        if !position.is_finite() || !yaw.is_finite() {
            warn!(user_id = %user_id, seq, "Dropped non-finite movement");
            return;
        }

        player.last_input_seq = seq;
        player.current_input = TickInput {
            position,
            yaw,
            crouched,
        };
    }

    /// Handle player leave
    fn handle_leave(&mut self, user_id: Uuid) {
        if let Some(player) = self.state.players.remove(&user_id) {
            self.compensator.forget(&user_id);
            self.release_slot();

            let _ = self.snapshot_tx.send(ServerMsg::PlayerLeft {
                user_id,
                reason: "disconnected".to_string(),
            });

            info!(
                match_id = %self.state.id,
                user_id = %user_id,
                kills = player.kills,
                deaths = player.deaths,
                shots_fired = player.shots_fired,
                shots_hit = player.shots_hit,
                damage_dealt = player.damage_dealt,
                damage_taken = player.damage_taken,
                tracked_entities = self.compensator.tracked_entities(),
                "Player left match"
            );
        }
    }

    /// Run a single simulation tick
    fn run_tick(&mut self) {
        let dt = tick_delta();
        self.state.tick += 1;
        self.state.time += dt;

        self.update_movement(dt);
        self.record_hitboxes();
        self.resolve_shots();
        self.update_respawns(dt);
    }

    /// Move every live player toward its latest reported position
    fn update_movement(&mut self, dt: f32) {
        for player in self.state.players.values_mut() {
            if !player.alive {
                continue;
            }
            let input = &player.current_input;
            player.position = CombatSystem::clamp_move(player.position, input.position, dt);
            player.yaw = input.yaw;
            player.crouched = input.crouched;
        }
    }

    /// Capture this tick's hitboxes into the compensator
    fn record_hitboxes(&mut self) {
        let time = self.state.time;
        for player in self.state.players.values() {
            if !player.alive {
                continue;
            }

            let pose = pose_for(player.position, player.yaw, player.crouched);
            match capture(HUMANOID_RIG, &pose, time) {
                Ok(snapshot) => self.compensator.record(player.user_id, snapshot),
                Err(e) => {
                    error!(user_id = %player.user_id, error = %e, "Hitbox capture failed");
                }
            }
        }
    }

    /// Validate queued hit claims against history
    fn resolve_shots(&mut self) {
        for claim in std::mem::take(&mut self.pending_shots) {
            match claim {
                ShotClaim::Single {
                    shooter,
                    reply_tx,
                    target,
                    trace_start,
                    hit_location,
                    hit_time,
                    weapon,
                } => {
                    let query = RewindQuery {
                        target,
                        trace_start,
                        hit_location,
                        claimed_time: hit_time,
                    };
                    self.resolve_single(shooter, &reply_tx, query, weapon)
                }
                ShotClaim::Multi {
                    shooter,
                    reply_tx,
                    targets,
                    trace_start,
                    hit_locations,
                    hit_time,
                    weapon,
                } => {
                    let query = ShotgunQuery {
                        targets,
                        trace_start,
                        hit_locations,
                        claimed_time: hit_time,
                    };
                    self.resolve_multi(shooter, &reply_tx, query, weapon)
                }
            }
        }

        // A corpse and its respawn must never be blended together
        for player in self.state.players.values().filter(|p| !p.alive) {
            self.compensator.forget(&player.user_id);
        }
    }

    /// Claims from connections that never joined are answered directly
    fn is_member(&self, user_id: Uuid, reply_tx: &mpsc::Sender<ServerMsg>) -> bool {
        if self.state.players.contains_key(&user_id) {
            return true;
        }
        send_error(reply_tx, "not_in_match", "Join a match before scoring hits");
        false
    }

    /// Shooter must still be a live member of this match
    fn check_shooter(&mut self, shooter: Uuid, reply_tx: &mpsc::Sender<ServerMsg>) -> bool {
        match self.state.players.get_mut(&shooter) {
            Some(player) if player.alive => {
                player.shots_fired += 1;
                true
            }
            Some(_) => {
                self.reject(reply_tx, shooter, None, "shooter_dead");
                false
            }
            // Left between sending the claim and this tick
            None => false,
        }
    }

    fn check_target(&self, shooter: Uuid, target: Uuid, reply_tx: &mpsc::Sender<ServerMsg>) -> bool {
        if target == shooter || !self.state.players.contains_key(&target) {
            warn!(shooter = %shooter, target_id = %target, "Hit claim on unknown target");
            send_error(reply_tx, "unknown_target", "Target is not in this match");
            return false;
        }
        true
    }

    fn resolve_single(
        &mut self,
        shooter: Uuid,
        reply_tx: &mpsc::Sender<ServerMsg>,
        query: RewindQuery,
        weapon: WeaponType,
    ) {
        let target = query.target;
        if !self.check_shooter(shooter, reply_tx) || !self.check_target(shooter, target, reply_tx) {
            return;
        }

        let stats = WeaponStats::for_type(weapon);
        if stats.is_scatter() {
            self.reject(reply_tx, shooter, Some(target), "wrong_weapon");
            return;
        }
        if !CombatSystem::in_range(query.trace_start, query.hit_location) {
            self.reject(reply_tx, shooter, Some(target), "out_of_range");
            return;
        }

        let outcome = self
            .compensator
            .score_hit(shooter, &query, weapon, stats.damage, &mut self.state);
        match outcome {
            Ok(confirmation) if confirmation.confirmed => {}
            Ok(_) => self.reject(reply_tx, shooter, Some(target), "not_confirmed"),
            Err(e) => self.reject(reply_tx, shooter, Some(target), e.code()),
        }
    }

    fn resolve_multi(
        &mut self,
        shooter: Uuid,
        reply_tx: &mpsc::Sender<ServerMsg>,
        query: ShotgunQuery,
        weapon: WeaponType,
    ) {
        if !self.check_shooter(shooter, reply_tx) {
            return;
        }
        if !query
            .targets
            .iter()
            .all(|target| self.check_target(shooter, *target, reply_tx))
        {
            return;
        }

        let stats = WeaponStats::for_type(weapon);
        if !stats.is_scatter() {
            self.reject(reply_tx, shooter, None, "wrong_weapon");
            return;
        }
        if query.hit_locations.len() > stats.pellets as usize {
            self.reject(reply_tx, shooter, None, "too_many_pellets");
            return;
        }
        if !query
            .hit_locations
            .iter()
            .all(|hit| CombatSystem::in_range(query.trace_start, *hit))
        {
            self.reject(reply_tx, shooter, None, "out_of_range");
            return;
        }

        let tallies =
            self.compensator
                .score_hit_multi(shooter, &query, weapon, stats.damage, &mut self.state);

        if tallies.is_empty() {
            self.reject(reply_tx, shooter, None, "not_confirmed");
        }
    }

    /// Bring dead players back once their timer runs out
    fn update_respawns(&mut self, dt: f32) {
        let dead: Vec<Uuid> = self
            .state
            .players
            .values()
            .filter(|p| !p.alive)
            .map(|p| p.user_id)
            .collect();

        for user_id in dead {
            let ready = match self.state.players.get_mut(&user_id) {
                Some(player) => {
                    player.respawn_timer -= dt;
                    player.respawn_timer <= 0.0
                }
                None => false,
            };
            if !ready {
                continue;
            }

            let (spawn, yaw) = self.state.generate_spawn_position();
            if let Some(player) = self.state.players.get_mut(&user_id) {
                player.alive = true;
                player.health = MAX_HEALTH;
                player.respawn_timer = 0.0;
                player.position = spawn;
                player.yaw = yaw;
                player.crouched = false;
                player.current_input = TickInput {
                    position: spawn,
                    yaw,
                    crouched: false,
                };
            }

            debug!(match_id = %self.state.id, user_id = %user_id, "Player respawned");
            self.state.events.push(GameEvent::Respawn {
                user_id,
                position: spawn,
            });
        }
    }

    fn reject(
        &self,
        reply_tx: &mpsc::Sender<ServerMsg>,
        shooter: Uuid,
        target: Option<Uuid>,
        reason: &str,
    ) {
        debug!(
            match_id = %self.state.id,
            shooter = %shooter,
            target_id = ?target,
            reason,
            "Hit claim rejected"
        );
        reply(
            reply_tx,
            ServerMsg::ShotRejected {
                shooter_id: shooter,
                target_id: target,
                reason: reason.to_string(),
            },
        );
    }

    fn reserved_slots(&self) -> usize {
        self.player_count.load(Ordering::Acquire)
    }

    fn release_slot(&self) {
        let _ = self
            .player_count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
    }
}

/// Queue a message for one connection without blocking the tick
fn reply(reply_tx: &mpsc::Sender<ServerMsg>, msg: ServerMsg) {
    if let Err(e) = reply_tx.try_send(msg) {
        debug!(error = %e, "Dropped direct reply");
    }
}

fn send_error(reply_tx: &mpsc::Sender<ServerMsg>, code: &str, message: &str) {
    reply(
        reply_tx,
        ServerMsg::Error {
            code: code.to_string(),
            message: message.to_string(),
        },
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::combat::MAX_MOVE_SPEED;

    const MAX_PLAYERS: usize = 4;

    struct Harness {
        game: GameMatch,
        handle: MatchHandle,
        rx: broadcast::Receiver<ServerMsg>,
        reply_tx: mpsc::Sender<ServerMsg>,
        replies: mpsc::Receiver<ServerMsg>,
    }

    impl Harness {
        fn new() -> Self {
            let (game, handle) =
                GameMatch::new(Uuid::new_v4(), 7, MAX_PLAYERS, RewindConfig::default());
            let rx = handle.snapshot_tx.subscribe();
            let (reply_tx, replies) = mpsc::channel(256);
            Self {
                game,
                handle,
                rx,
                reply_tx,
                replies,
            }
        }

        fn send(&self, user_id: Uuid, msg: ClientMsg) {
            self.send_with(user_id, msg, self.reply_tx.clone());
        }

        fn send_with(&self, user_id: Uuid, msg: ClientMsg, reply_tx: mpsc::Sender<ServerMsg>) {
            self.handle
                .input_tx
                .try_send(PlayerInput {
                    user_id,
                    msg,
                    reply_tx,
                })
                .unwrap();
        }

        fn join(&mut self) -> Uuid {
            assert!(self.handle.try_reserve(MAX_PLAYERS));
            let user_id = Uuid::new_v4();
            self.send(user_id, ClientMsg::JoinMatch { display_name: None });
            self.game.step();
            user_id
        }

        /// Teleport a player without going through movement clamping
        fn place(&mut self, user_id: Uuid, position: Vec3) {
            let player = self.game.state.players.get_mut(&user_id).unwrap();
            player.position = position;
            player.yaw = 0.0;
            player.current_input.position = position;
            player.current_input.yaw = 0.0;
        }

        fn steps(&mut self, n: usize) {
            for _ in 0..n {
                self.game.step();
            }
        }

        /// Broadcasts followed by direct replies
        fn drain(&mut self) -> Vec<ServerMsg> {
            let mut messages = drain_broadcast(&mut self.rx);
            while let Ok(msg) = self.replies.try_recv() {
                messages.push(msg);
            }
            messages
        }

        fn player(&self, user_id: Uuid) -> &PlayerState {
            &self.game.state.players[&user_id]
        }
    }

    fn drain_broadcast(rx: &mut broadcast::Receiver<ServerMsg>) -> Vec<ServerMsg> {
        let mut messages = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            messages.push(msg);
        }
        messages
    }

    fn head_shot(target: Uuid, hit_time: f32, weapon: WeaponType) -> ClientMsg {
        ClientMsg::ScoreHit {
            target_id: target,
            trace_start: Vec3::new(0.0, 0.0, 165.0),
            hit_location: Vec3::new(489.0, 0.0, 165.0),
            hit_time,
            weapon,
        }
    }

    fn rejection(messages: &[ServerMsg]) -> Option<String> {
        messages.iter().find_map(|msg| match msg {
            ServerMsg::ShotRejected { reason, .. } => Some(reason.clone()),
            _ => None,
        })
    }

    /// Shooter at the origin, target standing at x=500 for 10 ticks then
    /// strafing away. Returns the time the shooter saw the target standing.
    fn setup_strafe(h: &mut Harness) -> (Uuid, Uuid, f32) {
        let shooter = h.join();
        let target = h.join();
        h.place(shooter, Vec3::new(-100.0, 0.0, 0.0));
        h.place(target, Vec3::new(500.0, 0.0, 0.0));
        h.steps(10);
        let seen_at = h.game.state.time;

        h.place(target, Vec3::new(500.0, 300.0, 0.0));
        h.steps(10);
        h.drain();
        (shooter, target, seen_at)
    }

    #[test]
    fn rewound_headshot_kills() {
        let mut h = Harness::new();
        let (shooter, target, seen_at) = setup_strafe(&mut h);

        h.send(shooter, head_shot(target, seen_at, WeaponType::AssaultRifle));
        h.steps(SIMULATION_TPS as usize / SNAPSHOT_TPS as usize);

        let victim = h.player(target);
        assert!(!victim.alive);
        assert_eq!(victim.health, 0.0);
        assert_eq!(h.player(shooter).kills, 1);

        let events: Vec<GameEvent> = h
            .drain()
            .into_iter()
            .filter_map(|msg| match msg {
                ServerMsg::Snapshot { events, .. } => Some(events),
                _ => None,
            })
            .flatten()
            .collect();
        assert!(events.iter().any(|e| matches!(
            e,
            GameEvent::Hit { damage, .. } if (*damage - 100.0).abs() < 1e-3
        )));
        assert!(events
            .iter()
            .any(|e| matches!(e, GameEvent::Kill { victim_id, .. } if *victim_id == target)));
        assert!(events.iter().any(|e| matches!(e, GameEvent::Impact { .. })));
    }

    #[test]
    fn present_time_claim_misses_moved_target() {
        let mut h = Harness::new();
        let (shooter, target, _) = setup_strafe(&mut h);

        let now = h.game.state.time;
        h.send(shooter, head_shot(target, now, WeaponType::Pistol));
        h.steps(1);

        assert_eq!(h.player(target).health, MAX_HEALTH);
        assert_eq!(rejection(&h.drain()).as_deref(), Some("not_confirmed"));
    }

    #[test]
    fn too_old_claim_is_rejected() {
        let mut h = Harness::new();
        let (shooter, target, seen_at) = setup_strafe(&mut h);

        h.send(shooter, head_shot(target, seen_at - 5.0, WeaponType::AssaultRifle));
        h.steps(1);

        assert_eq!(h.player(target).health, MAX_HEALTH);
        assert_eq!(rejection(&h.drain()).as_deref(), Some("too_old"));
    }

    #[test]
    fn scatter_weapon_needs_multi_claim() {
        let mut h = Harness::new();
        let (shooter, target, seen_at) = setup_strafe(&mut h);

        h.send(shooter, head_shot(target, seen_at, WeaponType::Shotgun));
        h.steps(1);

        assert_eq!(h.player(target).health, MAX_HEALTH);
        assert_eq!(rejection(&h.drain()).as_deref(), Some("wrong_weapon"));
    }

    #[test]
    fn unknown_target_is_an_error() {
        let mut h = Harness::new();
        let (shooter, _, seen_at) = setup_strafe(&mut h);

        h.send(shooter, head_shot(Uuid::new_v4(), seen_at, WeaponType::Pistol));
        h.steps(1);

        assert!(h.drain().iter().any(|msg| matches!(
            msg,
            ServerMsg::Error { code, .. } if code == "unknown_target"
        )));
    }

    #[test]
    fn shotgun_pellets_stack() {
        let mut h = Harness::new();
        let (shooter, target, seen_at) = setup_strafe(&mut h);

        h.send(
            shooter,
            ClientMsg::ScoreHitMulti {
                target_ids: vec![target],
                trace_start: Vec3::new(0.0, 0.0, 165.0),
                hit_locations: vec![
                    Vec3::new(489.0, 0.0, 165.0),
                    Vec3::new(489.0, 1.0, 166.0),
                    Vec3::new(489.0, 0.0, 4000.0),
                ],
                hit_time: seen_at,
                weapon: WeaponType::Shotgun,
            },
        );
        h.steps(1);

        // Two head pellets at 15 x 5
        assert!(!h.player(target).alive);
        assert!((h.player(shooter).damage_dealt - MAX_HEALTH).abs() < 1e-3);
    }

    #[test]
    fn moves_are_speed_clamped() {
        let mut h = Harness::new();
        let player = h.join();
        h.place(player, Vec3::ZERO);

        h.send(
            player,
            ClientMsg::Move {
                seq: 1,
                position: Vec3::new(5000.0, 0.0, 0.0),
                yaw: 0.0,
                crouched: false,
            },
        );
        h.steps(1);

        let moved = h.player(player).position.length();
        assert!(moved > 0.0);
        assert!(moved <= MAX_MOVE_SPEED * tick_delta() + 1e-3);

        // Stale sequence numbers are ignored
        h.send(
            player,
            ClientMsg::Move {
                seq: 1,
                position: Vec3::new(-5000.0, 0.0, 0.0),
                yaw: 0.0,
                crouched: false,
            },
        );
        h.steps(1);
        assert!(h.player(player).position.x > 0.0);
    }

    #[test]
    fn dead_players_respawn_with_fresh_history() {
        let mut h = Harness::new();
        let (shooter, target, seen_at) = setup_strafe(&mut h);

        h.send(shooter, head_shot(target, seen_at, WeaponType::AssaultRifle));
        h.steps(1);
        assert!(!h.player(target).alive);
        assert!(h.game.compensator.history(&target).is_none());

        h.steps((RESPAWN_DELAY * SIMULATION_TPS as f32) as usize + 3);
        let respawned = h.player(target);
        assert!(respawned.alive);
        assert_eq!(respawned.health, MAX_HEALTH);
        assert!(h.game.compensator.history(&target).is_some());
    }

    #[test]
    fn pong_carries_match_clock() {
        let mut h = Harness::new();
        let player = h.join();
        h.steps(5);
        h.drain();

        h.send(player, ClientMsg::Ping { t: 42 });
        h.game.step();

        let pong = h.drain().into_iter().find_map(|msg| match msg {
            ServerMsg::Pong { t, server_time } => Some((t, server_time)),
            _ => None,
        });
        let (t, server_time) = pong.unwrap();
        assert_eq!(t, 42);
        assert!(server_time > 0.0);
    }

    #[test]
    fn full_match_refuses_reservations_until_a_leave() {
        let mut h = Harness::new();
        let players: Vec<Uuid> = (0..MAX_PLAYERS).map(|_| h.join()).collect();
        assert_eq!(h.game.state.players.len(), MAX_PLAYERS);
        assert!(!h.handle.try_reserve(MAX_PLAYERS));

        h.send(players[0], ClientMsg::LeaveMatch);
        h.game.step();
        assert_eq!(h.handle.player_count(), MAX_PLAYERS - 1);
        assert!(h.handle.try_reserve(MAX_PLAYERS));
    }

    #[test]
    fn joins_in_flight_hold_their_slots() {
        let h = Harness::new();
        for _ in 0..MAX_PLAYERS {
            assert!(h.handle.try_reserve(MAX_PLAYERS));
        }
        // No join has reached the match task yet
        assert!(h.game.state.players.is_empty());
        assert!(!h.handle.try_reserve(MAX_PLAYERS));
    }

    #[test]
    fn refused_join_is_answered_privately() {
        let mut h = Harness::new();
        let player = h.join();
        let slots_before = h.handle.player_count();
        h.drain();

        // Second join for the same user
        assert!(h.handle.try_reserve(MAX_PLAYERS));
        let (own_tx, mut own_rx) = mpsc::channel(8);
        h.send_with(player, ClientMsg::JoinMatch { display_name: None }, own_tx);
        h.game.step();

        assert!(matches!(
            own_rx.try_recv(),
            Ok(ServerMsg::Error { code, .. }) if code == "already_joined"
        ));
        assert!(!h
            .drain()
            .iter()
            .any(|msg| matches!(msg, ServerMsg::Error { .. })));
        assert_eq!(h.handle.player_count(), slots_before);
    }

    #[test]
    fn rejections_reach_only_the_shooter() {
        let mut h = Harness::new();
        let (shooter, target, seen_at) = setup_strafe(&mut h);

        let (own_tx, mut own_rx) = mpsc::channel(8);
        h.send_with(shooter, head_shot(target, seen_at - 5.0, WeaponType::Pistol), own_tx);
        h.steps(1);

        assert!(matches!(
            own_rx.try_recv(),
            Ok(ServerMsg::ShotRejected { shooter_id, reason, .. })
                if shooter_id == shooter && reason == "too_old"
        ));
        assert_eq!(rejection(&h.drain()), None);
    }

    #[test]
    fn claims_from_outside_the_match_are_refused() {
        let mut h = Harness::new();
        let (_, target, seen_at) = setup_strafe(&mut h);

        let (own_tx, mut own_rx) = mpsc::channel(8);
        h.send_with(
            Uuid::new_v4(),
            head_shot(target, seen_at, WeaponType::Pistol),
            own_tx,
        );
        h.steps(1);

        assert!(matches!(
            own_rx.try_recv(),
            Ok(ServerMsg::Error { code, .. }) if code == "not_in_match"
        ));
        assert_eq!(h.player(target).health, MAX_HEALTH);
    }

    #[tokio::test]
    async fn run_loop_ends_when_everyone_leaves() {
        let (game, handle) = GameMatch::new(Uuid::new_v4(), 1, MAX_PLAYERS, RewindConfig::default());
        let task = tokio::spawn(game.run());
        let (reply_tx, mut replies) = mpsc::channel(8);

        assert!(handle.try_reserve(MAX_PLAYERS));
        let user_id = Uuid::new_v4();
        for msg in [ClientMsg::JoinMatch { display_name: None }, ClientMsg::LeaveMatch] {
            handle
                .input_tx
                .send(PlayerInput {
                    user_id,
                    msg,
                    reply_tx: reply_tx.clone(),
                })
                .await
                .unwrap();
        }

        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("match loop did not stop")
            .unwrap();
        assert_eq!(handle.player_count(), 0);
        assert!(matches!(replies.recv().await, Some(ServerMsg::MatchJoined { .. })));
    }
}
