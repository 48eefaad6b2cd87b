//! Application state shared across tasks

use std::sync::Arc;
use std::time::Instant;

use crate::config::Config;
use crate::game::world::{ArenaBounds, World};

/// Shared application state, handed to every task at construction
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub world: Arc<World>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let world = Arc::new(World::new(ArenaBounds::default(), config.world_seed));

        Self {
            config: Arc::new(config),
            world,
            started_at: Instant::now(),
        }
    }

    /// Seconds since the server state was created
    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}
