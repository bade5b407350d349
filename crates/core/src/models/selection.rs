//! Card selection model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

/// The deck: Fibonacci values a participant may select
pub const FIBONACCI_DECK: [u8; 7] = [1, 2, 3, 5, 8, 13, 21];

/// A validated card value
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct CardValue(u8);

impl CardValue {
    pub fn new(value: u8) -> Result<Self> {
        if FIBONACCI_DECK.contains(&value) {
            Ok(Self(value))
        } else {
            Err(Error::Validation(format!(
                "card value {} is not one of {:?}",
                value, FIBONACCI_DECK
            )))
        }
    }

    pub fn value(self) -> u8 {
        self.0
    }

    /// Every card in the deck, lowest first
    pub fn deck() -> impl Iterator<Item = CardValue> {
        FIBONACCI_DECK.iter().map(|v| CardValue(*v))
    }
}

impl TryFrom<u8> for CardValue {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        CardValue::new(value)
    }
}

impl From<CardValue> for u8 {
    fn from(card: CardValue) -> u8 {
        card.0
    }
}

impl std::fmt::Display for CardValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A participant's card for a round. Unique per (round, participant).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardSelection {
    pub id: Uuid,
    pub round_id: Uuid,
    pub participant_id: Uuid,
    pub card_value: CardValue,
    pub created_at: DateTime<Utc>,
}
