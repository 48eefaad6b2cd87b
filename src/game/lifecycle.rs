//! Match lifecycle - lobby, active, finished and back to lobby

use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tracing::info;

use super::world::{ActionState, MatchPhase, World};
use crate::net::protocol::ServerMsg;

/// Winner placeholder when nobody survived
pub const NO_ONE: &str = "NO ONE";

/// How a finished match came out
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchResult {
    pub winner: String,
    /// Winner first, then most recent death onwards
    pub ranking: Vec<String>,
}

/// Periodically starts matches and expires attack animations
pub struct LifecycleController {
    world: Arc<World>,
    min_players: usize,
    period: Duration,
}

impl LifecycleController {
    pub fn new(world: Arc<World>, min_players: usize, period: Duration) -> Self {
        Self {
            world,
            min_players,
            period,
        }
    }

    /// Run the fixed-period tick loop forever
    pub async fn run(self) {
        let mut ticker = interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            self.tick();
        }
    }

    /// One controller step
    pub fn tick(&self) {
        match self.world.phase() {
            MatchPhase::Lobby => {
                self.try_start_match();
            }
            MatchPhase::Active => {
                self.collapse_attacks();
                self.reset_if_abandoned();
            }
            MatchPhase::Finished => {}
        }
    }

    /// Start when enough players are registered and all of them are ready.
    /// Returns whether the match started.
    pub fn try_start_match(&self) -> bool {
        let mut phase = self.world.phase_mut();
        if *phase != MatchPhase::Lobby {
            return false;
        }

        let players = self.world.players_in_join_order();
        if players.len() < self.min_players || !players.iter().all(|p| p.ready) {
            return false;
        }

        self.world.for_each_player_mut(|p| p.reset_for_match());
        self.world.clear_graves();
        self.world.clear_death_ledger();
        let weapon_count = players.len().saturating_sub(1).max(1);
        self.world.respawn_weapons(weapon_count);

        *phase = MatchPhase::Active;
        drop(phase);

        self.world.publish(ServerMsg::StartGame);
        info!(players = players.len(), weapons = weapon_count, "Match started");
        true
    }

    fn collapse_attacks(&self) {
        self.world.for_each_player_mut(|p| {
            if p.action == ActionState::Attacking {
                p.action = ActionState::Idle;
            }
        });
    }

    /// Disconnects left fewer than two players, so the win check can never
    /// fire. Back to the lobby without a result.
    fn reset_if_abandoned(&self) {
        let mut phase = self.world.phase_mut();
        let remaining = self.world.player_count();
        if *phase != MatchPhase::Active || remaining >= 2 {
            return;
        }

        self.world.for_each_player_mut(|p| {
            p.has_weapon = false;
            p.ready = false;
            p.action = ActionState::Idle;
        });
        self.world.respawn_weapons(0);
        self.world.clear_graves();
        self.world.clear_death_ledger();
        *phase = MatchPhase::Lobby;
        info!(remaining, "Match abandoned");
    }
}

/// End the match once at most one of at least two players is left standing.
/// Publishes `WINNER` and drops back to the lobby.
pub fn check_winner(world: &World) -> Option<MatchResult> {
    let mut phase = world.phase_mut();
    if *phase != MatchPhase::Active {
        return None;
    }

    let players = world.players_in_join_order();
    let alive: Vec<&str> = players
        .iter()
        .filter(|p| p.alive)
        .map(|p| p.name.as_str())
        .collect();
    if alive.len() > 1 || players.len() < 2 {
        return None;
    }

    let winner = alive.first().copied().unwrap_or(NO_ONE).to_string();
    let registered: Vec<&str> = players.iter().map(|p| p.name.as_str()).collect();
    let ranking = build_ranking(&winner, &world.death_ledger(), &registered);

    *phase = MatchPhase::Finished;
    world.publish(ServerMsg::Winner {
        winner: winner.clone(),
        ranking: ranking.clone(),
    });
    info!(winner = %winner, ranking = ?ranking, "Match finished");

    world.clear_death_ledger();
    world.for_each_player_mut(|p| p.ready = false);
    *phase = MatchPhase::Lobby;

    Some(MatchResult { winner, ranking })
}

/// Winner first, then the death ledger newest-first, then anyone still
/// unplaced in join order. Each name appears once.
pub fn build_ranking(winner: &str, death_ledger: &[String], registered: &[&str]) -> Vec<String> {
    let mut ranking = vec![winner.to_string()];
    let names = death_ledger
        .iter()
        .rev()
        .map(String::as_str)
        .chain(registered.iter().copied());

    for name in names {
        if !ranking.iter().any(|r| r == name) {
            ranking.push(name.to_string());
        }
    }
    ranking
}
