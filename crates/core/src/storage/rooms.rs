//! Room storage operations

use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::instrument;
use uuid::Uuid;

use super::parse::{parse_datetime, parse_room_code, parse_room_status, parse_uuid};
use crate::error::Result;
use crate::models::{Room, RoomCode};

const ROOM_COLUMNS: &str = "id, code, status, created_at, updated_at";

fn room_from_row(row: &Row<'_>) -> rusqlite::Result<Room> {
    Ok(Room {
        id: parse_uuid(&row.get::<_, String>(0)?)?,
        code: parse_room_code(row.get(1)?)?,
        status: parse_room_status(&row.get::<_, String>(2)?)?,
        created_at: parse_datetime(&row.get::<_, String>(3)?)?,
        updated_at: parse_datetime(&row.get::<_, String>(4)?)?,
    })
}

pub struct RoomStore<'a> {
    conn: &'a Connection,
}

impl<'a> RoomStore<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Create a new room
    #[instrument(skip(self, room), fields(code = %room.code))]
    pub fn create(&self, room: &Room) -> Result<()> {
        self.conn.execute(
            "INSERT INTO rooms (id, code, status, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                room.id.to_string(),
                room.code.as_str(),
                room.status.as_str(),
                room.created_at.to_rfc3339(),
                room.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Find room by ID
    #[instrument(skip(self))]
    pub fn find_by_id(&self, id: Uuid) -> Result<Option<Room>> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {} FROM rooms WHERE id = ?1", ROOM_COLUMNS))?;
        let room = stmt
            .query_row(params![id.to_string()], room_from_row)
            .optional()?;
        Ok(room)
    }

    /// Find room by its shareable code
    #[instrument(skip(self), fields(code = %code))]
    pub fn find_by_code(&self, code: &RoomCode) -> Result<Option<Room>> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {} FROM rooms WHERE code = ?1", ROOM_COLUMNS))?;
        let room = stmt
            .query_row(params![code.as_str()], room_from_row)
            .optional()?;
        Ok(room)
    }

    /// Is this code already taken?
    pub fn code_exists(&self, code: &RoomCode) -> Result<bool> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM rooms WHERE code = ?1",
            params![code.as_str()],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Touch the room's update timestamp
    pub fn touch(&self, id: Uuid) -> Result<()> {
        self.conn.execute(
            "UPDATE rooms SET updated_at = ?1 WHERE id = ?2",
            params![chrono::Utc::now().to_rfc3339(), id.to_string()],
        )?;
        Ok(())
    }

    /// Minimal query used as a connectivity probe
    pub fn probe(&self) -> Result<()> {
        let mut stmt = self.conn.prepare("SELECT id FROM rooms LIMIT 1")?;
        let _ = stmt.query_row([], |row| row.get::<_, String>(0)).optional()?;
        Ok(())
    }
}
