//! Command interpreter - gates client commands on match phase and player
//! state, then hands them to the combat resolver

use tracing::debug;

use super::combat::{AttackOutcome, CombatResolver};
use super::world::{MatchPhase, World};
use crate::net::protocol::ClientMsg;

/// Apply one parsed command on behalf of `name`. Commands that don't fit the
/// current phase, or name a missing player, are dropped without reply.
pub fn dispatch(world: &World, name: &str, msg: ClientMsg) {
    let phase = world.phase();

    match msg {
        ClientMsg::Move {
            x,
            y,
            facing,
            moving,
        } => {
            if phase == MatchPhase::Active {
                CombatResolver::apply_move(world, name, x, y, facing, moving);
            }
        }
        ClientMsg::Ready => {
            if phase == MatchPhase::Lobby {
                toggle_ready(world, name);
            }
        }
        ClientMsg::PickupSword { index } => {
            if phase == MatchPhase::Active {
                CombatResolver::try_pickup(world, name, index);
            }
        }
        ClientMsg::Attack => {
            if phase == MatchPhase::Active {
                if let AttackOutcome::Hit { target, killed } = CombatResolver::resolve_attack(world, name)
                {
                    debug!(attacker = %name, target = %target, killed, "Attack landed");
                }
            }
        }
        ClientMsg::Select { .. } => {
            debug!(player = %name, "Ignoring SELECT after handshake");
        }
    }
}

fn toggle_ready(world: &World, name: &str) {
    if let Some(ready) = world.with_player_mut(name, |p| {
        p.ready = !p.ready;
        p.ready
    }) {
        debug!(player = %name, ready, "Ready toggled");
    }
}
