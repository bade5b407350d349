//! Card selection storage operations

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::instrument;
use uuid::Uuid;

use super::parse::{parse_card, parse_datetime, parse_uuid};
use crate::error::Result;
use crate::models::{CardSelection, CardValue};

const SELECTION_COLUMNS: &str = "id, round_id, participant_id, card_value, created_at";

fn selection_from_row(row: &Row<'_>) -> rusqlite::Result<CardSelection> {
    Ok(CardSelection {
        id: parse_uuid(&row.get::<_, String>(0)?)?,
        round_id: parse_uuid(&row.get::<_, String>(1)?)?,
        participant_id: parse_uuid(&row.get::<_, String>(2)?)?,
        card_value: parse_card(row.get(3)?)?,
        created_at: parse_datetime(&row.get::<_, String>(4)?)?,
    })
}

pub struct SelectionStore<'a> {
    conn: &'a Connection,
}

impl<'a> SelectionStore<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Insert or overwrite the card for (round, participant).
    /// The row keeps its original id when overwritten.
    #[instrument(skip(self))]
    pub fn upsert(
        &self,
        round_id: Uuid,
        participant_id: Uuid,
        card: CardValue,
        created_at: DateTime<Utc>,
    ) -> Result<()> {
        self.conn.execute(
            "INSERT INTO card_selections (id, round_id, participant_id, card_value, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(round_id, participant_id) DO UPDATE SET
                card_value = excluded.card_value",
            params![
                Uuid::new_v4().to_string(),
                round_id.to_string(),
                participant_id.to_string(),
                card.value(),
                created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Find the selection a participant made in a round
    #[instrument(skip(self))]
    pub fn find(&self, round_id: Uuid, participant_id: Uuid) -> Result<Option<CardSelection>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM card_selections WHERE round_id = ?1 AND participant_id = ?2",
            SELECTION_COLUMNS
        ))?;
        let selection = stmt
            .query_row(
                params![round_id.to_string(), participant_id.to_string()],
                selection_from_row,
            )
            .optional()?;
        Ok(selection)
    }

    /// All selections of a round
    #[instrument(skip(self))]
    pub fn list_for_round(&self, round_id: Uuid) -> Result<Vec<CardSelection>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM card_selections WHERE round_id = ?1 ORDER BY created_at, id",
            SELECTION_COLUMNS
        ))?;
        let selections = stmt
            .query_map(params![round_id.to_string()], selection_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(selections)
    }
}
