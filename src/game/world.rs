//! Shared world state
//!
//! Every collection here is guarded at the granularity of a single operation:
//! players live in a `DashMap` (per-entry locks), weapons, graves and the
//! death ledger sit behind their own `parking_lot` locks. A command that
//! touches several of them (an attack: damage, grave, ledger, weapon respawn)
//! is not atomic as a whole. Readers such as the broadcaster may observe the
//! middle of it and the next tick corrects the picture.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock, RwLockWriteGuard};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::ops::Range;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::broadcast;

use crate::net::protocol::ServerMsg;

/// Full health
pub const MAX_HP: i32 = 100;

/// Outbound queue depth per connection before it starts lagging
const OUTBOUND_CAPACITY: usize = 256;

/// Match phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchPhase {
    /// Waiting for everyone to ready up
    Lobby,
    /// Fight in progress
    Active,
    /// Brief window while the result is published and the world reset
    Finished,
}

impl MatchPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Lobby => "lobby",
            Self::Active => "active",
            Self::Finished => "finished",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ActionState {
    #[default]
    Idle,
    Walking,
    /// Lasts until the next lifecycle tick
    Attacking,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Facing {
    Up,
    #[default]
    Down,
    Left,
    Right,
}

/// One connected, named participant
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerEntry {
    pub name: String,
    pub skin: String,
    pub x: i32,
    pub y: i32,
    /// Always within `0..=MAX_HP`
    pub hp: i32,
    pub has_weapon: bool,
    pub alive: bool,
    pub ready: bool,
    pub action: ActionState,
    pub facing: Facing,
    /// Join order, used wherever a stable scan order matters
    pub(crate) join_seq: u64,
}

impl PlayerEntry {
    pub fn new(name: impl Into<String>, skin: impl Into<String>, x: i32, y: i32) -> Self {
        Self {
            name: name.into(),
            skin: skin.into(),
            x,
            y,
            hp: MAX_HP,
            has_weapon: false,
            alive: true,
            ready: false,
            action: ActionState::Idle,
            facing: Facing::default(),
            join_seq: 0,
        }
    }

    /// Restore full health for a fresh match
    pub fn reset_for_match(&mut self) {
        self.hp = MAX_HP;
        self.alive = true;
        self.has_weapon = false;
        self.action = ActionState::Idle;
    }
}

/// A weapon lying in the arena or carried by a player
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WeaponEntry {
    pub x: i32,
    pub y: i32,
    pub picked_up: bool,
    /// Carrier's name, looked up on demand rather than held as a handle
    pub owner: Option<String>,
}

impl WeaponEntry {
    pub fn new(x: i32, y: i32) -> Self {
        Self {
            x,
            y,
            picked_up: false,
            owner: None,
        }
    }

    /// Drop back to the ground, detached from any carrier
    pub fn release(&mut self) {
        self.picked_up = false;
        self.owner = None;
    }
}

/// Where someone fell
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeathMarker {
    pub x: i32,
    pub y: i32,
}

/// Rectangle that spawns are drawn from
#[derive(Debug, Clone)]
pub struct ArenaBounds {
    pub x: Range<i32>,
    pub y: Range<i32>,
}

impl Default for ArenaBounds {
    fn default() -> Self {
        Self {
            x: 120..640,
            y: 320..440,
        }
    }
}

/// Join refusals
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum JoinError {
    #[error("game already started")]
    GameAlreadyStarted,

    #[error("name already taken")]
    NameTaken,
}

impl JoinError {
    /// Wire code sent back in the `ERROR:<code>` reply
    pub fn code(&self) -> &'static str {
        match self {
            Self::GameAlreadyStarted => "GAME_ALREADY_STARTED",
            Self::NameTaken => "NAME_TAKEN",
        }
    }
}

/// Point-in-time copy of everything the broadcaster sends
#[derive(Debug, Clone, Default)]
pub struct WorldSnapshot {
    pub players: Vec<PlayerEntry>,
    pub weapons: Vec<WeaponEntry>,
    pub graves: Vec<DeathMarker>,
}

/// Authoritative world for the whole process
pub struct World {
    phase: RwLock<MatchPhase>,
    players: DashMap<String, PlayerEntry>,
    next_join_seq: AtomicU64,
    weapons: RwLock<Vec<WeaponEntry>>,
    graves: Mutex<Vec<DeathMarker>>,
    death_ledger: Mutex<Vec<String>>,
    rng: Mutex<ChaCha8Rng>,
    bounds: ArenaBounds,
    outbound: broadcast::Sender<ServerMsg>,
}

impl World {
    /// Create an empty world in the lobby. A seed makes spawns reproducible.
    pub fn new(bounds: ArenaBounds, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_entropy(),
        };
        let (outbound, _) = broadcast::channel(OUTBOUND_CAPACITY);

        Self {
            phase: RwLock::new(MatchPhase::Lobby),
            players: DashMap::new(),
            next_join_seq: AtomicU64::new(0),
            weapons: RwLock::new(Vec::new()),
            graves: Mutex::new(Vec::new()),
            death_ledger: Mutex::new(Vec::new()),
            rng: Mutex::new(rng),
            bounds,
            outbound,
        }
    }

    // ------------------------------------------------------------------
    // Phase
    // ------------------------------------------------------------------

    pub fn phase(&self) -> MatchPhase {
        *self.phase.read()
    }

    /// Exclusive hold on the phase for a transition. Lock order is phase
    /// first, then any player entry; nothing takes them the other way round.
    pub(crate) fn phase_mut(&self) -> RwLockWriteGuard<'_, MatchPhase> {
        self.phase.write()
    }

    // ------------------------------------------------------------------
    // Players
    // ------------------------------------------------------------------

    /// Register a new player at a random spawn point. Fails outside the
    /// lobby or when the name is in use.
    pub fn join(&self, name: &str, skin: &str) -> Result<PlayerEntry, JoinError> {
        // Held across the insert so a match can't start in between
        let phase = self.phase.read();
        if *phase != MatchPhase::Lobby {
            return Err(JoinError::GameAlreadyStarted);
        }

        match self.players.entry(name.to_string()) {
            Entry::Occupied(_) => Err(JoinError::NameTaken),
            Entry::Vacant(slot) => {
                let (x, y) = self.random_point();
                let mut player = PlayerEntry::new(name, skin, x, y);
                player.join_seq = self.next_join_seq.fetch_add(1, Ordering::Relaxed);
                slot.insert(player.clone());
                Ok(player)
            }
        }
    }

    /// Unregister a player. Any weapon they carried is released where it
    /// lies. Leaving is not a death.
    pub fn remove_player(&self, name: &str) -> Option<PlayerEntry> {
        let (_, player) = self.players.remove(name)?;
        if player.has_weapon {
            self.release_weapons_of(name);
        }
        Some(player)
    }

    pub fn player(&self, name: &str) -> Option<PlayerEntry> {
        self.players.get(name).map(|p| p.value().clone())
    }

    /// Run `f` against one player under that entry's lock
    pub fn with_player_mut<R>(&self, name: &str, f: impl FnOnce(&mut PlayerEntry) -> R) -> Option<R> {
        self.players.get_mut(name).map(|mut p| f(p.value_mut()))
    }

    /// Run `f` against every player, one entry lock at a time
    pub fn for_each_player_mut(&self, mut f: impl FnMut(&mut PlayerEntry)) {
        for mut entry in self.players.iter_mut() {
            f(entry.value_mut());
        }
    }

    /// Copies of all players in join order
    pub fn players_in_join_order(&self) -> Vec<PlayerEntry> {
        let mut players: Vec<PlayerEntry> =
            self.players.iter().map(|p| p.value().clone()).collect();
        players.sort_by_key(|p| p.join_seq);
        players
    }

    pub fn player_count(&self) -> usize {
        self.players.len()
    }

    // ------------------------------------------------------------------
    // Weapons
    // ------------------------------------------------------------------

    pub fn weapons(&self) -> Vec<WeaponEntry> {
        self.weapons.read().clone()
    }

    pub(crate) fn weapons_mut(&self) -> RwLockWriteGuard<'_, Vec<WeaponEntry>> {
        self.weapons.write()
    }

    /// Replace every weapon with `count` fresh ones at random positions
    pub fn respawn_weapons(&self, count: usize) {
        let fresh: Vec<WeaponEntry> = (0..count)
            .map(|_| {
                let (x, y) = self.random_point();
                WeaponEntry::new(x, y)
            })
            .collect();
        *self.weapons.write() = fresh;
    }

    fn release_weapons_of(&self, name: &str) {
        for weapon in self.weapons.write().iter_mut() {
            if weapon.owner.as_deref() == Some(name) {
                weapon.release();
            }
        }
    }

    // ------------------------------------------------------------------
    // Deaths
    // ------------------------------------------------------------------

    /// Drop a grave and append to the ledger unless already listed
    pub fn record_death(&self, name: &str, x: i32, y: i32) {
        self.graves.lock().push(DeathMarker { x, y });
        let mut ledger = self.death_ledger.lock();
        if !ledger.iter().any(|n| n == name) {
            ledger.push(name.to_string());
        }
    }

    pub fn graves(&self) -> Vec<DeathMarker> {
        self.graves.lock().clone()
    }

    pub fn death_ledger(&self) -> Vec<String> {
        self.death_ledger.lock().clone()
    }

    pub fn clear_graves(&self) {
        self.graves.lock().clear();
    }

    pub fn clear_death_ledger(&self) {
        self.death_ledger.lock().clear();
    }

    // ------------------------------------------------------------------
    // Output
    // ------------------------------------------------------------------

    /// Register a connection for broadcast output
    pub fn subscribe(&self) -> broadcast::Receiver<ServerMsg> {
        self.outbound.subscribe()
    }

    /// Queue a message for every registered connection
    pub fn publish(&self, msg: ServerMsg) {
        // No receivers just means nobody is connected
        let _ = self.outbound.send(msg);
    }

    pub fn connection_count(&self) -> usize {
        self.outbound.receiver_count()
    }

    pub fn snapshot(&self) -> WorldSnapshot {
        WorldSnapshot {
            players: self.players_in_join_order(),
            weapons: self.weapons(),
            graves: self.graves(),
        }
    }

    /// Uniform point inside the arena bounds
    pub fn random_point(&self) -> (i32, i32) {
        let mut rng = self.rng.lock();
        let x = rng.gen_range(self.bounds.x.clone());
        let y = rng.gen_range(self.bounds.y.clone());
        (x, y)
    }
}
