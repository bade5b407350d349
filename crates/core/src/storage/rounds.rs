//! Round storage operations

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::instrument;
use uuid::Uuid;

use super::parse::{parse_datetime, parse_datetime_opt, parse_round_status, parse_uuid};
use crate::error::Result;
use crate::models::{Round, RoundStatistics};

const ROUND_COLUMNS: &str = "id, room_id, round_number, status, max_value, min_value, \
                             median_value, avg_value, revealed_at, created_at";

fn round_from_row(row: &Row<'_>) -> rusqlite::Result<Round> {
    Ok(Round {
        id: parse_uuid(&row.get::<_, String>(0)?)?,
        room_id: parse_uuid(&row.get::<_, String>(1)?)?,
        round_number: row.get(2)?,
        status: parse_round_status(&row.get::<_, String>(3)?)?,
        max_value: row.get(4)?,
        min_value: row.get(5)?,
        median_value: row.get(6)?,
        avg_value: row.get(7)?,
        revealed_at: parse_datetime_opt(row.get::<_, Option<String>>(8)?)?,
        created_at: parse_datetime(&row.get::<_, String>(9)?)?,
    })
}

pub struct RoundStore<'a> {
    conn: &'a Connection,
}

impl<'a> RoundStore<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Insert a round numbered one past the room's highest round.
    ///
    /// The number is computed in the same statement as the insert;
    /// `UNIQUE(room_id, round_number)` rejects duplicates.
    #[instrument(skip(self))]
    pub fn insert_next(&self, id: Uuid, room_id: Uuid, created_at: DateTime<Utc>) -> Result<()> {
        self.conn.execute(
            "INSERT INTO rounds (id, room_id, round_number, status, created_at)
             VALUES (?1, ?2,
                     (SELECT COALESCE(MAX(round_number), 0) + 1 FROM rounds WHERE room_id = ?2),
                     'selecting', ?3)",
            params![id.to_string(), room_id.to_string(), created_at.to_rfc3339()],
        )?;
        Ok(())
    }

    /// Find round by ID
    #[instrument(skip(self))]
    pub fn find_by_id(&self, id: Uuid) -> Result<Option<Round>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM rounds WHERE id = ?1",
            ROUND_COLUMNS
        ))?;
        let round = stmt
            .query_row(params![id.to_string()], round_from_row)
            .optional()?;
        Ok(round)
    }

    /// The round with the highest number in a room
    #[instrument(skip(self))]
    pub fn current_for_room(&self, room_id: Uuid) -> Result<Option<Round>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM rounds WHERE room_id = ?1 ORDER BY round_number DESC LIMIT 1",
            ROUND_COLUMNS
        ))?;
        let round = stmt
            .query_row(params![room_id.to_string()], round_from_row)
            .optional()?;
        Ok(round)
    }

    /// All rounds of a room, oldest first
    #[instrument(skip(self))]
    pub fn list_for_room(&self, room_id: Uuid) -> Result<Vec<Round>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM rounds WHERE room_id = ?1 ORDER BY round_number",
            ROUND_COLUMNS
        ))?;
        let rounds = stmt
            .query_map(params![room_id.to_string()], round_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rounds)
    }

    /// Write aggregates to a round that is still selecting.
    /// Returns the number of rows changed (0 once revealed).
    #[instrument(skip(self, stats))]
    pub fn write_statistics(&self, id: Uuid, stats: Option<&RoundStatistics>) -> Result<usize> {
        let changed = self.conn.execute(
            "UPDATE rounds SET max_value = ?1, min_value = ?2, median_value = ?3, avg_value = ?4
             WHERE id = ?5 AND status = 'selecting'",
            params![
                stats.map(|s| s.max),
                stats.map(|s| s.min),
                stats.map(|s| s.median),
                stats.map(|s| s.avg),
                id.to_string(),
            ],
        )?;
        Ok(changed)
    }

    /// Transition selecting -> revealed. A no-op (0 rows) when already revealed.
    #[instrument(skip(self))]
    pub fn mark_revealed(&self, id: Uuid, revealed_at: DateTime<Utc>) -> Result<usize> {
        let changed = self.conn.execute(
            "UPDATE rounds SET status = 'revealed', revealed_at = ?1
             WHERE id = ?2 AND status = 'selecting'",
            params![revealed_at.to_rfc3339(), id.to_string()],
        )?;
        Ok(changed)
    }
}
