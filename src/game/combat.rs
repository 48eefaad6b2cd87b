//! Combat system - movement, weapon pickup, melee hits, deaths

use tracing::{debug, info};

use super::world::{ActionState, Facing, World, MAX_HP};

/// Max distance between player and weapon centers for a pickup
pub const PICKUP_RANGE: f64 = 50.0;
/// Player sprite center relative to its position
const PLAYER_CENTER_OFFSET: i32 = 32;
/// Weapon sprite center relative to its position
const WEAPON_CENTER_OFFSET: i32 = 20;
/// A target is hit when both axis deltas are strictly below this
pub const ATTACK_REACH: i32 = 70;
/// Damage per landed hit
pub const ATTACK_DAMAGE: i32 = 25;

/// Result of a swing
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttackOutcome {
    /// Attacker missing, dead, or unarmed
    NotArmed,
    /// Swung at nobody; the weapon is kept
    Missed,
    /// Landed on `target`; the weapon was consumed
    Hit { target: String, killed: bool },
}

/// Stateless combat rules applied to the shared world
pub struct CombatResolver;

impl CombatResolver {
    /// Apply damage to health, returns (new_health, is_dead)
    pub fn apply_damage(current_health: i32, damage: i32) -> (i32, bool) {
        let new_health = (current_health - damage).clamp(0, MAX_HP);
        (new_health, new_health == 0)
    }

    /// Center-to-center pickup check between a player and weapon position
    pub fn in_pickup_range(player: (i32, i32), weapon: (i32, i32)) -> bool {
        let dx = f64::from((player.0 + PLAYER_CENTER_OFFSET) - (weapon.0 + WEAPON_CENTER_OFFSET));
        let dy = f64::from((player.1 + PLAYER_CENTER_OFFSET) - (weapon.1 + WEAPON_CENTER_OFFSET));
        dx.hypot(dy) <= PICKUP_RANGE
    }

    /// Melee reach check between two player positions
    pub fn in_attack_reach(attacker: (i32, i32), target: (i32, i32)) -> bool {
        (attacker.0 - target.0).abs() < ATTACK_REACH && (attacker.1 - target.1).abs() < ATTACK_REACH
    }

    /// Take the client's word for position and facing. An attack in progress
    /// keeps its animation state.
    pub fn apply_move(world: &World, name: &str, x: i32, y: i32, facing: Facing, moving: bool) {
        world.with_player_mut(name, |p| {
            if !p.alive {
                return;
            }
            p.x = x;
            p.y = y;
            p.facing = facing;
            if matches!(p.action, ActionState::Idle | ActionState::Walking) {
                p.action = if moving {
                    ActionState::Walking
                } else {
                    ActionState::Idle
                };
            }
        });
    }

    /// Claim weapon `index` if it's free and close enough. Returns whether the
    /// pickup happened.
    pub fn try_pickup(world: &World, name: &str, index: usize) -> bool {
        let Some(player) = world.player(name) else {
            return false;
        };
        if !player.alive || player.has_weapon {
            return false;
        }

        {
            let mut weapons = world.weapons_mut();
            let Some(weapon) = weapons.get_mut(index) else {
                debug!(player = %name, index, "Pickup of unknown weapon");
                return false;
            };
            if weapon.picked_up || !Self::in_pickup_range((player.x, player.y), (weapon.x, weapon.y)) {
                return false;
            }
            weapon.picked_up = true;
            weapon.owner = Some(name.to_string());
        }

        world.with_player_mut(name, |p| p.has_weapon = true);
        debug!(player = %name, index, "Weapon picked up");
        true
    }

    /// Swing at the first other living player in reach, scanning in join
    /// order. A hit deals fixed damage and consumes the weapon, which
    /// respawns somewhere random.
    pub fn resolve_attack(world: &World, name: &str) -> AttackOutcome {
        let armed = world
            .with_player_mut(name, |p| {
                if p.alive && p.has_weapon {
                    p.action = ActionState::Attacking;
                    Some((p.x, p.y))
                } else {
                    None
                }
            })
            .flatten();
        let Some(origin) = armed else {
            return AttackOutcome::NotArmed;
        };

        let candidates = world
            .players_in_join_order()
            .into_iter()
            .filter(|p| p.name != name && p.alive)
            .filter(|p| Self::in_attack_reach(origin, (p.x, p.y)));

        for candidate in candidates {
            // The snapshot may be stale; re-check under the target's lock
            let hit = world
                .with_player_mut(&candidate.name, |t| {
                    if !t.alive {
                        return None;
                    }
                    let (hp, dead) = Self::apply_damage(t.hp, ATTACK_DAMAGE);
                    t.hp = hp;
                    if dead {
                        t.alive = false;
                    }
                    Some((dead, t.x, t.y))
                })
                .flatten();

            let Some((killed, x, y)) = hit else {
                continue;
            };

            if killed {
                world.record_death(&candidate.name, x, y);
                info!(attacker = %name, victim = %candidate.name, "Player killed");
            }
            Self::consume_weapon(world, name);

            return AttackOutcome::Hit {
                target: candidate.name,
                killed,
            };
        }

        AttackOutcome::Missed
    }

    /// Detach the attacker's weapon and drop it somewhere new
    fn consume_weapon(world: &World, owner: &str) {
        world.with_player_mut(owner, |p| p.has_weapon = false);

        let (x, y) = world.random_point();
        let mut weapons = world.weapons_mut();
        if let Some(weapon) = weapons
            .iter_mut()
            .find(|w| w.owner.as_deref() == Some(owner))
        {
            weapon.release();
            weapon.x = x;
            weapon.y = y;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::world::{ArenaBounds, MatchPhase, WeaponEntry};

    /// World with players placed at fixed spots and `weapons` laid out
    fn arena(players: &[(&str, i32, i32)], weapons: &[(i32, i32)]) -> World {
        let world = World::new(ArenaBounds::default(), Some(7));
        for (name, x, y) in players {
            world.join(name, "knight").unwrap();
            world.with_player_mut(name, |p| {
                p.x = *x;
                p.y = *y;
            });
        }
        *world.weapons_mut() = weapons.iter().map(|(x, y)| WeaponEntry::new(*x, *y)).collect();
        *world.phase_mut() = MatchPhase::Active;
        world
    }

    fn arm(world: &World, name: &str) {
        let (x, y) = {
            let p = world.player(name).unwrap();
            (p.x, p.y)
        };
        world.weapons_mut().push(WeaponEntry::new(x + 12, y + 12));
        let index = world.weapons().len() - 1;
        assert!(CombatResolver::try_pickup(world, name, index));
    }

    #[test]
    fn damage_clamps_at_zero() {
        assert_eq!(CombatResolver::apply_damage(100, 25), (75, false));
        assert_eq!(CombatResolver::apply_damage(25, 25), (0, true));
        assert_eq!(CombatResolver::apply_damage(10, 25), (0, true));
    }

    #[test]
    fn pickup_range_uses_sprite_centers() {
        // Centers coincide
        assert!(CombatResolver::in_pickup_range((0, 0), (12, 12)));
        // Exactly 50 away along x
        assert!(CombatResolver::in_pickup_range((0, 0), (62, 12)));
        assert!(!CombatResolver::in_pickup_range((0, 0), (63, 12)));
    }

    #[test]
    fn attack_reach_is_strict_on_both_axes() {
        assert!(CombatResolver::in_attack_reach((0, 0), (69, -69)));
        assert!(!CombatResolver::in_attack_reach((0, 0), (70, 0)));
        assert!(!CombatResolver::in_attack_reach((0, 0), (0, -70)));
    }

    #[test]
    fn move_keeps_attack_animation() {
        let world = arena(&[("a", 100, 100)], &[]);
        CombatResolver::apply_move(&world, "a", 150, 160, Facing::Left, true);
        let a = world.player("a").unwrap();
        assert_eq!((a.x, a.y, a.facing, a.action), (150, 160, Facing::Left, ActionState::Walking));

        world.with_player_mut("a", |p| p.action = ActionState::Attacking);
        CombatResolver::apply_move(&world, "a", 10, 20, Facing::Up, false);
        let a = world.player("a").unwrap();
        assert_eq!((a.x, a.y, a.action), (10, 20, ActionState::Attacking));
    }

    #[test]
    fn pickup_in_range_claims_weapon() {
        let world = arena(&[("a", 100, 100)], &[(112, 112)]);
        assert!(CombatResolver::try_pickup(&world, "a", 0));

        let weapon = &world.weapons()[0];
        assert!(weapon.picked_up);
        assert_eq!(weapon.owner.as_deref(), Some("a"));
        assert!(world.player("a").unwrap().has_weapon);
    }

    #[test]
    fn pickup_refuses_far_taken_unknown_or_second_weapon() {
        let world = arena(&[("a", 100, 100), ("b", 100, 100)], &[(400, 400), (112, 112), (110, 110)]);
        assert!(!CombatResolver::try_pickup(&world, "a", 0));
        assert!(!CombatResolver::try_pickup(&world, "a", 9));

        assert!(CombatResolver::try_pickup(&world, "a", 1));
        assert!(!CombatResolver::try_pickup(&world, "b", 1));
        // Already armed
        assert!(!CombatResolver::try_pickup(&world, "a", 2));
        let owned = world
            .weapons()
            .iter()
            .filter(|w| w.owner.as_deref() == Some("a"))
            .count();
        assert_eq!(owned, 1);
    }

    #[test]
    fn unarmed_attack_does_nothing() {
        let world = arena(&[("a", 100, 100), ("b", 110, 110)], &[]);
        assert_eq!(CombatResolver::resolve_attack(&world, "a"), AttackOutcome::NotArmed);
        assert_eq!(world.player("b").unwrap().hp, MAX_HP);
        assert_eq!(world.player("a").unwrap().action, ActionState::Idle);
    }

    #[test]
    fn miss_keeps_weapon_but_still_animates() {
        let world = arena(&[("a", 100, 100), ("b", 300, 100)], &[]);
        arm(&world, "a");
        assert_eq!(CombatResolver::resolve_attack(&world, "a"), AttackOutcome::Missed);

        let a = world.player("a").unwrap();
        assert!(a.has_weapon);
        assert_eq!(a.action, ActionState::Attacking);
        assert_eq!(world.player("b").unwrap().hp, MAX_HP);
    }

    #[test]
    fn hit_damages_first_in_join_order_and_consumes_weapon() {
        let world = arena(&[("a", 100, 100), ("b", 120, 120), ("c", 110, 110)], &[]);
        arm(&world, "a");

        assert_eq!(
            CombatResolver::resolve_attack(&world, "a"),
            AttackOutcome::Hit {
                target: "b".into(),
                killed: false
            }
        );
        assert_eq!(world.player("b").unwrap().hp, 75);
        assert_eq!(world.player("c").unwrap().hp, MAX_HP);

        assert!(!world.player("a").unwrap().has_weapon);
        let weapon = &world.weapons()[0];
        assert!(!weapon.picked_up);
        assert!(weapon.owner.is_none());
    }

    #[test]
    fn four_hits_kill_and_leave_a_grave() {
        let world = arena(&[("a", 100, 100), ("b", 130, 90)], &[]);
        for round in 1..=4 {
            arm(&world, "a");
            let outcome = CombatResolver::resolve_attack(&world, "a");
            assert_eq!(
                outcome,
                AttackOutcome::Hit {
                    target: "b".into(),
                    killed: round == 4
                }
            );
        }

        let b = world.player("b").unwrap();
        assert_eq!(b.hp, 0);
        assert!(!b.alive);
        assert_eq!(world.graves(), [crate::game::world::DeathMarker { x: 130, y: 90 }]);
        assert_eq!(world.death_ledger(), ["b"]);

        // Dead targets are skipped
        arm(&world, "a");
        assert_eq!(CombatResolver::resolve_attack(&world, "a"), AttackOutcome::Missed);
    }

    #[test]
    fn dead_players_do_not_move() {
        let world = arena(&[("a", 100, 100)], &[]);
        world.with_player_mut("a", |p| {
            p.hp = 0;
            p.alive = false;
        });
        CombatResolver::apply_move(&world, "a", 5, 5, Facing::Up, true);
        assert_eq!(world.player("a").unwrap().x, 100);
    }
}
