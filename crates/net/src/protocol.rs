//! Change feed payloads
//!
//! Notifications arrive as loosely-typed JSON rows. They are decoded into
//! the closed [`ChangeEvent`] enum here, at the feed boundary; nothing
//! untyped travels further.

use pointroom_core::{CardSelection, ChangeEvent, ChangeKind, EntityKind, Participant, Round};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A row-level change as delivered by the transport
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawChange {
    pub table: String,
    #[serde(rename = "eventType")]
    pub event_type: String,
    /// Row contents after the change
    #[serde(rename = "new")]
    pub record: serde_json::Value,
}

impl RawChange {
    /// Deserialize from JSON bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes)
            .map_err(|e| Error::Protocol(format!("Invalid change payload: {}", e)))
    }

    /// Serialize to JSON bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self)
            .map_err(|e| Error::Protocol(format!("Serialization failed: {}", e)))
    }

    /// Build the raw form of a typed event
    pub fn from_event(event: &ChangeEvent) -> Result<Self> {
        let record = match event {
            ChangeEvent::Participant { participant, .. } => serde_json::to_value(participant),
            ChangeEvent::Round { round, .. } => serde_json::to_value(round),
            ChangeEvent::CardSelection { selection, .. } => serde_json::to_value(selection),
        }
        .map_err(|e| Error::Protocol(format!("Serialization failed: {}", e)))?;

        Ok(Self {
            table: event.entity().table().to_string(),
            event_type: match event.kind() {
                ChangeKind::Insert => "INSERT",
                ChangeKind::Update => "UPDATE",
            }
            .to_string(),
            record,
        })
    }

    /// Decode into a typed event
    pub fn decode(self) -> Result<ChangeEvent> {
        let kind = match self.event_type.as_str() {
            "INSERT" => ChangeKind::Insert,
            "UPDATE" => ChangeKind::Update,
            other => {
                return Err(Error::Protocol(format!(
                    "Unsupported event type '{}'",
                    other
                )))
            }
        };

        let entity = EntityKind::from_table(&self.table)
            .ok_or_else(|| Error::Protocol(format!("Unknown table '{}'", self.table)))?;

        let invalid = |e: serde_json::Error| {
            Error::Protocol(format!("Invalid {} record: {}", self.table, e))
        };

        let event = match entity {
            EntityKind::Participant => ChangeEvent::Participant {
                kind,
                participant: serde_json::from_value::<Participant>(self.record.clone())
                    .map_err(invalid)?,
            },
            EntityKind::Round => ChangeEvent::Round {
                kind,
                round: serde_json::from_value::<Round>(self.record.clone()).map_err(invalid)?,
            },
            EntityKind::CardSelection => ChangeEvent::CardSelection {
                kind,
                selection: serde_json::from_value::<CardSelection>(self.record.clone())
                    .map_err(invalid)?,
            },
        };
        Ok(event)
    }
}
