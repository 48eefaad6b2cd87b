//! Snapshot broadcasting

use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};

use super::lifecycle::{check_winner, MatchResult};
use super::world::World;
use crate::net::protocol::ServerMsg;

/// Sends the full world to every connection on a fixed period and runs the
/// win check on the same beat
pub struct Broadcaster {
    world: Arc<World>,
    period: Duration,
}

impl Broadcaster {
    pub fn new(world: Arc<World>, period: Duration) -> Self {
        Self { world, period }
    }

    pub async fn run(self) {
        let mut ticker = interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            self.tick();
        }
    }

    /// Publish one snapshot, then settle the match if it's over
    pub fn tick(&self) -> Option<MatchResult> {
        if self.world.connection_count() > 0 {
            let snapshot = self.world.snapshot();
            self.world.publish(ServerMsg::State(Arc::new(snapshot)));
        }
        check_winner(&self.world)
    }
}
