//! Typed change notifications for the three mutable entity tables

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{CardSelection, Participant, Round};

/// Kind of row-level change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Insert,
    Update,
}

/// Entity tables that produce change notifications
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Participant,
    Round,
    CardSelection,
}

impl EntityKind {
    /// Table name used by change payloads
    pub fn table(&self) -> &'static str {
        match self {
            EntityKind::Participant => "participants",
            EntityKind::Round => "rounds",
            EntityKind::CardSelection => "card_selections",
        }
    }

    pub fn from_table(table: &str) -> Option<Self> {
        match table {
            "participants" => Some(EntityKind::Participant),
            "rounds" => Some(EntityKind::Round),
            "card_selections" => Some(EntityKind::CardSelection),
            _ => None,
        }
    }
}

/// Scope of a subscription: a room id for participants and rounds,
/// a round id for card selections
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FilterKey(pub Uuid);

/// A change notification carrying the entity snapshot after the write
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "entity", rename_all = "snake_case")]
pub enum ChangeEvent {
    Participant {
        kind: ChangeKind,
        participant: Participant,
    },
    Round {
        kind: ChangeKind,
        round: Round,
    },
    CardSelection {
        kind: ChangeKind,
        selection: CardSelection,
    },
}

impl ChangeEvent {
    pub fn entity(&self) -> EntityKind {
        match self {
            ChangeEvent::Participant { .. } => EntityKind::Participant,
            ChangeEvent::Round { .. } => EntityKind::Round,
            ChangeEvent::CardSelection { .. } => EntityKind::CardSelection,
        }
    }

    pub fn kind(&self) -> ChangeKind {
        match self {
            ChangeEvent::Participant { kind, .. }
            | ChangeEvent::Round { kind, .. }
            | ChangeEvent::CardSelection { kind, .. } => *kind,
        }
    }

    /// The key subscribers filter on
    pub fn filter_key(&self) -> FilterKey {
        match self {
            ChangeEvent::Participant { participant, .. } => FilterKey(participant.room_id),
            ChangeEvent::Round { round, .. } => FilterKey(round.room_id),
            ChangeEvent::CardSelection { selection, .. } => FilterKey(selection.round_id),
        }
    }
}

/// Receives committed changes from a store.
///
/// Implementations must not block or call back into the store: `publish`
/// is called while the store still holds its connection, so events arrive
/// in commit order.
pub trait ChangeSink: Send + Sync {
    fn publish(&self, event: ChangeEvent);
}
