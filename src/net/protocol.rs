//! Line protocol definitions
//! These are the wire types for client-server communication. Every message is
//! one newline-terminated UTF-8 line; fields are `:`-separated.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::game::world::{ActionState, Facing, JoinError, WorldSnapshot};

/// Characters that delimit snapshot records and so can't appear in names
const RESERVED: [char; 3] = [':', ',', '|'];

/// Messages sent from client to server
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientMsg {
    /// Join handshake, first line only
    Select { name: String, skin: String },

    /// Client-reported position and facing
    Move {
        x: i32,
        y: i32,
        facing: Facing,
        moving: bool,
    },

    /// Toggle lobby readiness
    Ready,

    /// Claim the weapon at `index`
    PickupSword { index: usize },

    /// Swing the carried weapon
    Attack,
}

/// Why a client line was rejected
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("empty line")]
    Empty,

    #[error("unknown command {0:?}")]
    UnknownCommand(String),

    #[error("{command} expects {expected} fields, got {got}")]
    FieldCount {
        command: &'static str,
        expected: usize,
        got: usize,
    },

    #[error("invalid {field}: {value:?}")]
    InvalidField { field: &'static str, value: String },
}

impl ProtocolError {
    fn invalid(field: &'static str, value: &str) -> Self {
        Self::InvalidField {
            field,
            value: value.to_string(),
        }
    }
}

impl FromStr for ClientMsg {
    type Err = ProtocolError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let line = line.trim_end_matches(['\r', '\n']);
        if line.trim().is_empty() {
            return Err(ProtocolError::Empty);
        }

        let parts: Vec<&str> = line.split(':').collect();
        let expect = |command: &'static str, expected: usize| {
            if parts.len() == expected {
                Ok(())
            } else {
                Err(ProtocolError::FieldCount {
                    command,
                    expected,
                    got: parts.len(),
                })
            }
        };

        match parts[0] {
            "SELECT" => {
                expect("SELECT", 3)?;
                let name = parts[1].trim();
                let skin = parts[2].trim();
                if !is_valid_name(name) {
                    return Err(ProtocolError::invalid("name", name));
                }
                if !is_valid_name(skin) {
                    return Err(ProtocolError::invalid("skin", skin));
                }
                Ok(Self::Select {
                    name: name.to_string(),
                    skin: skin.to_string(),
                })
            }
            "MOVE" => {
                expect("MOVE", 5)?;
                let x = parts[1]
                    .trim()
                    .parse()
                    .map_err(|_| ProtocolError::invalid("x", parts[1]))?;
                let y = parts[2]
                    .trim()
                    .parse()
                    .map_err(|_| ProtocolError::invalid("y", parts[2]))?;
                let facing = parts[3]
                    .parse()
                    .map_err(|_| ProtocolError::invalid("facing", parts[3]))?;
                let moving = parse_flag(parts[4])
                    .ok_or_else(|| ProtocolError::invalid("isMoving", parts[4]))?;
                Ok(Self::Move {
                    x,
                    y,
                    facing,
                    moving,
                })
            }
            "READY" => {
                expect("READY", 1)?;
                Ok(Self::Ready)
            }
            "PICKUP_SWORD" => {
                expect("PICKUP_SWORD", 2)?;
                let index = parts[1]
                    .trim()
                    .parse()
                    .map_err(|_| ProtocolError::invalid("index", parts[1]))?;
                Ok(Self::PickupSword { index })
            }
            "ATTACK" => {
                expect("ATTACK", 1)?;
                Ok(Self::Attack)
            }
            other => Err(ProtocolError::UnknownCommand(other.to_string())),
        }
    }
}

fn is_valid_name(s: &str) -> bool {
    !s.is_empty() && !s.contains(RESERVED)
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" => Some(true),
        "false" | "0" => Some(false),
        _ => None,
    }
}

impl FromStr for Facing {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "UP" | "U" => Ok(Self::Up),
            "DOWN" | "D" => Ok(Self::Down),
            "LEFT" | "L" => Ok(Self::Left),
            "RIGHT" | "R" => Ok(Self::Right),
            _ => Err(()),
        }
    }
}

impl fmt::Display for Facing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Up => "UP",
            Self::Down => "DOWN",
            Self::Left => "LEFT",
            Self::Right => "RIGHT",
        })
    }
}

impl fmt::Display for ActionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Idle => "IDLE",
            Self::Walking => "WALKING",
            Self::Attacking => "ATTACKING",
        })
    }
}

/// Messages sent from server to client
#[derive(Debug, Clone)]
pub enum ServerMsg {
    /// Join accepted
    Success,

    /// Join refused
    Rejected(JoinError),

    /// Lobby turned into an active match
    StartGame,

    /// Match over, `ranking[0]` is the winner
    Winner { winner: String, ranking: Vec<String> },

    /// Player left mid-fight (only under the announce disconnect policy)
    Dead { name: String },

    /// Periodic full world snapshot
    State(Arc<WorldSnapshot>),
}

impl ServerMsg {
    /// Encode as a single newline-terminated wire line
    pub fn to_line(&self) -> String {
        let mut line = self.to_string();
        line.push('\n');
        line
    }
}

impl fmt::Display for ServerMsg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => f.write_str("SUCCESS"),
            Self::Rejected(err) => write!(f, "ERROR:{}", err.code()),
            Self::StartGame => f.write_str("START_GAME"),
            Self::Winner { winner, ranking } => {
                write!(f, "WINNER:{}:{}", winner, ranking.join(","))
            }
            Self::Dead { name } => write!(f, "DEAD:{}", name),
            Self::State(snapshot) => write_snapshot(f, snapshot),
        }
    }
}

/// `STATE:<p>[:<p>..]|SWORDS:<w>[:<w>..]|GRAVES:<g>[:<g>..]`
fn write_snapshot(f: &mut fmt::Formatter<'_>, snapshot: &WorldSnapshot) -> fmt::Result {
    f.write_str("STATE:")?;
    for (i, p) in snapshot.players.iter().enumerate() {
        if i > 0 {
            f.write_str(":")?;
        }
        write!(
            f,
            "{},{},{},{},{},{},{},{},{},{}",
            p.name, p.x, p.y, p.hp, p.has_weapon, p.skin, p.alive, p.ready, p.action, p.facing
        )?;
    }

    f.write_str("|SWORDS:")?;
    for (i, w) in snapshot.weapons.iter().enumerate() {
        if i > 0 {
            f.write_str(":")?;
        }
        write!(f, "{},{},{}", w.x, w.y, w.picked_up)?;
    }

    f.write_str("|GRAVES:")?;
    for (i, g) in snapshot.graves.iter().enumerate() {
        if i > 0 {
            f.write_str(":")?;
        }
        write!(f, "{},{}", g.x, g.y)?;
    }
    Ok(())
}
