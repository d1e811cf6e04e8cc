//! Application state shared across routes

use std::sync::atomic::Ordering;
use std::sync::Arc;

use rand::Rng;
use tracing::info;
use uuid::Uuid;

use crate::config::Config;
use crate::game::{GameMatch, MatchHandle, MatchRegistry};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub match_registry: Arc<MatchRegistry>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        Self {
            config: Arc::new(config),
            match_registry: Arc::new(MatchRegistry::new()),
        }
    }

    /// Reserve a slot in a match, spawning a new one when every match is full.
    ///
    /// The returned handle holds one reserved slot; the caller must follow up
    /// with a `JoinMatch` input for it.
    pub fn join_match(&self) -> MatchHandle {
        let max_players = self.config.max_players_per_match;
        if let Some(handle) = self.match_registry.reserve_slot(max_players) {
            return handle;
        }

        let id = Uuid::new_v4();
        let seed = rand::thread_rng().gen();
        let (game_match, handle) = GameMatch::new(id, seed, max_players, self.config.rewind);
        // First slot is taken before the match becomes visible
        handle.player_count.store(1, Ordering::Release);
        self.match_registry.insert(handle.clone());

        let registry = self.match_registry.clone();
        tokio::spawn(async move {
            game_match.run().await;
            registry.remove(&id);
            info!(match_id = %id, "Match removed from registry");
        });

        info!(match_id = %id, seed, "Created match");
        handle
    }
}
