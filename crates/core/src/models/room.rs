//! Room model - the code-addressed estimation session

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{Participant, Round};
use crate::error::{Error, Result};

/// Characters used for room codes (no 0/O or 1/I lookalikes)
const CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// Length of a generated room code
pub const ROOM_CODE_LEN: usize = 6;

/// Room lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoomStatus {
    Active,
}

impl RoomStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoomStatus::Active => "active",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "active" => Some(RoomStatus::Active),
            _ => None,
        }
    }
}

/// Short, human-shareable room token
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomCode(String);

impl RoomCode {
    /// Generate a random code; uniqueness is the store's concern
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        let code = (0..ROOM_CODE_LEN)
            .map(|_| CODE_ALPHABET[rng.gen_range(0..CODE_ALPHABET.len())] as char)
            .collect();
        Self(code)
    }

    /// Parse user input, normalizing case and surrounding whitespace
    pub fn parse(value: &str) -> Result<Self> {
        let code = value.trim().to_ascii_uppercase();
        if code.is_empty() {
            return Err(Error::Validation("room code is empty".into()));
        }
        if !code.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(Error::Validation(format!(
                "room code '{}' contains invalid characters",
                code
            )));
        }
        Ok(Self(code))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RoomCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A Room groups participants and a sequence of rounds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Room {
    pub id: Uuid,
    pub code: RoomCode,
    pub status: RoomStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Room {
    pub fn new(code: RoomCode) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            code,
            status: RoomStatus::Active,
            created_at: now,
            updated_at: now,
        }
    }
}

/// A room together with its full roster and round history
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomSnapshot {
    pub room: Room,
    pub participants: Vec<Participant>,
    pub rounds: Vec<Round>,
}

impl RoomSnapshot {
    /// The round with the highest number, if any
    pub fn current_round(&self) -> Option<&Round> {
        self.rounds.iter().max_by_key(|r| r.round_number)
    }
}
