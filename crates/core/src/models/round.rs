//! Round model - one voting cycle within a room

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Round status. `Revealed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoundStatus {
    Selecting,
    Revealed,
}

impl RoundStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoundStatus::Selecting => "selecting",
            RoundStatus::Revealed => "revealed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "selecting" => Some(RoundStatus::Selecting),
            "revealed" => Some(RoundStatus::Revealed),
            _ => None,
        }
    }
}

impl std::fmt::Display for RoundStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Aggregates of a revealed round's card values
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RoundStatistics {
    pub max: u8,
    pub min: u8,
    pub median: f64,
    pub avg: f64,
}

impl RoundStatistics {
    /// Average rounded to one decimal, as shown to users
    pub fn display_avg(&self) -> String {
        format!("{:.1}", self.avg)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Round {
    pub id: Uuid,
    pub room_id: Uuid,
    /// 1-based, strictly increasing per room
    pub round_number: u32,
    pub status: RoundStatus,
    pub max_value: Option<u8>,
    pub min_value: Option<u8>,
    pub median_value: Option<f64>,
    pub avg_value: Option<f64>,
    pub revealed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Round {
    pub fn new(room_id: Uuid, round_number: u32) -> Self {
        Self {
            id: Uuid::new_v4(),
            room_id,
            round_number,
            status: RoundStatus::Selecting,
            max_value: None,
            min_value: None,
            median_value: None,
            avg_value: None,
            revealed_at: None,
            created_at: Utc::now(),
        }
    }

    pub fn is_selecting(&self) -> bool {
        self.status == RoundStatus::Selecting
    }

    pub fn is_revealed(&self) -> bool {
        self.status == RoundStatus::Revealed
    }

    /// Stored aggregates, present only once all four fields were written
    pub fn statistics(&self) -> Option<RoundStatistics> {
        Some(RoundStatistics {
            max: self.max_value?,
            min: self.min_value?,
            median: self.median_value?,
            avg: self.avg_value?,
        })
    }
}
