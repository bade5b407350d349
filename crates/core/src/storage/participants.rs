//! Participant storage operations

use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::instrument;
use uuid::Uuid;

use super::parse::{parse_datetime, parse_uuid};
use crate::error::Result;
use crate::models::Participant;

const PARTICIPANT_COLUMNS: &str =
    "id, room_id, session_id, display_name, is_active, is_owner, created_at";

fn participant_from_row(row: &Row<'_>) -> rusqlite::Result<Participant> {
    Ok(Participant {
        id: parse_uuid(&row.get::<_, String>(0)?)?,
        room_id: parse_uuid(&row.get::<_, String>(1)?)?,
        session_id: parse_uuid(&row.get::<_, String>(2)?)?,
        display_name: row.get(3)?,
        is_active: row.get::<_, i32>(4)? != 0,
        is_owner: row.get::<_, i32>(5)? != 0,
        created_at: parse_datetime(&row.get::<_, String>(6)?)?,
    })
}

pub struct ParticipantStore<'a> {
    conn: &'a Connection,
}

impl<'a> ParticipantStore<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Insert a participant, claiming ownership iff the room has no participants yet.
    ///
    /// The claim is decided inside the INSERT itself, and the partial unique
    /// index on owners rejects a second claimant.
    #[instrument(skip(self, participant), fields(room_id = %participant.room_id))]
    pub fn insert_claiming_owner(&self, participant: &Participant) -> Result<()> {
        self.conn.execute(
            "INSERT INTO participants (id, room_id, session_id, display_name, is_active, is_owner, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5,
                     NOT EXISTS (SELECT 1 FROM participants WHERE room_id = ?2),
                     ?6)",
            params![
                participant.id.to_string(),
                participant.room_id.to_string(),
                participant.session_id.to_string(),
                participant.display_name,
                participant.is_active as i32,
                participant.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Find participant by ID
    #[instrument(skip(self))]
    pub fn find_by_id(&self, id: Uuid) -> Result<Option<Participant>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM participants WHERE id = ?1",
            PARTICIPANT_COLUMNS
        ))?;
        let participant = stmt
            .query_row(params![id.to_string()], participant_from_row)
            .optional()?;
        Ok(participant)
    }

    /// Find the participant bound to an identity in a room
    #[instrument(skip(self))]
    pub fn find_by_session(&self, room_id: Uuid, session_id: Uuid) -> Result<Option<Participant>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM participants WHERE room_id = ?1 AND session_id = ?2",
            PARTICIPANT_COLUMNS
        ))?;
        let participant = stmt
            .query_row(
                params![room_id.to_string(), session_id.to_string()],
                participant_from_row,
            )
            .optional()?;
        Ok(participant)
    }

    /// List every participant ever recorded for a room, in join order
    #[instrument(skip(self))]
    pub fn list_for_room(&self, room_id: Uuid) -> Result<Vec<Participant>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM participants WHERE room_id = ?1 ORDER BY created_at, id",
            PARTICIPANT_COLUMNS
        ))?;
        let participants = stmt
            .query_map(params![room_id.to_string()], participant_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(participants)
    }

    /// Update name and presence. Returns the number of rows changed.
    #[instrument(skip(self))]
    pub fn update_presence(
        &self,
        id: Uuid,
        display_name: Option<&str>,
        is_active: bool,
    ) -> Result<usize> {
        let changed = match display_name {
            Some(name) => self.conn.execute(
                "UPDATE participants SET display_name = ?1, is_active = ?2 WHERE id = ?3",
                params![name, is_active as i32, id.to_string()],
            )?,
            None => self.conn.execute(
                "UPDATE participants SET is_active = ?1 WHERE id = ?2",
                params![is_active as i32, id.to_string()],
            )?,
        };
        Ok(changed)
    }
}
