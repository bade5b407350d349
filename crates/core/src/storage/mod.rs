//! SQLite entity store for Pointroom

mod migrations;
mod parse;
mod participants;
mod rooms;
mod rounds;
mod selections;
mod traits;

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use rusqlite::Connection;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::{
    CardSelection, CardValue, ChangeEvent, ChangeKind, ChangeSink, Participant, Room, RoomCode,
    RoomSnapshot, Round, RoundStatistics, RoundStatus,
};
use crate::stats::compute_statistics;

pub use participants::ParticipantStore;
pub use rooms::RoomStore;
pub use rounds::RoundStore;
pub use selections::SelectionStore;
pub use traits::{
    EntityStore, ParticipantRepository, RoomRepository, RoundRepository, SelectionRepository,
};

/// Attempts at drawing an unused room code before giving up
const MAX_CODE_ATTEMPTS: usize = 16;

/// Main database handle
///
/// Every committed insert or update of a participant, round or card
/// selection is forwarded to the attached [`ChangeSink`].
pub struct Database {
    conn: Mutex<Connection>,
    sink: Option<Arc<dyn ChangeSink>>,
    reachable: AtomicBool,
}

impl Database {
    /// Open or create database at the given path
    #[instrument(skip(path), fields(path = %path.as_ref().display()))]
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::init(Connection::open(path)?)
    }

    /// Open in-memory database (for testing)
    #[instrument]
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON")?;
        migrations::run_migrations(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            sink: None,
            reachable: AtomicBool::new(true),
        })
    }

    /// Attach the sink that receives change notifications
    pub fn with_change_sink(mut self, sink: Arc<dyn ChangeSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Simulate losing or regaining the transport to the store.
    /// While unreachable every request fails with [`Error::Unreachable`].
    pub fn set_reachable(&self, reachable: bool) {
        info!(reachable, "Store reachability changed");
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    pub fn is_reachable(&self) -> bool {
        self.reachable.load(Ordering::SeqCst)
    }

    /// Get current schema version
    pub fn schema_version(&self) -> Result<u32> {
        let conn = self.conn()?;
        migrations::get_current_version(&conn)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        if !self.is_reachable() {
            return Err(Error::Unreachable("store is not reachable".into()));
        }
        self.conn
            .lock()
            .map_err(|_| Error::Persistence("database lock poisoned".into()))
    }

    fn publish(&self, event: ChangeEvent) {
        if let Some(sink) = &self.sink {
            debug!(entity = ?event.entity(), kind = ?event.kind(), "Publishing change");
            sink.publish(event);
        }
    }
}

fn unique_code(conn: &Connection) -> Result<RoomCode> {
    let rooms = RoomStore::new(conn);
    for _ in 0..MAX_CODE_ATTEMPTS {
        let code = RoomCode::generate();
        if !rooms.code_exists(&code)? {
            return Ok(code);
        }
    }
    Err(Error::Persistence(
        "could not generate an unused room code".into(),
    ))
}

fn require_room(conn: &Connection, room_id: Uuid) -> Result<Room> {
    RoomStore::new(conn)
        .find_by_id(room_id)?
        .ok_or_else(|| Error::NotFound(format!("room {}", room_id)))
}

fn require_round(conn: &Connection, round_id: Uuid) -> Result<Round> {
    RoundStore::new(conn)
        .find_by_id(round_id)?
        .ok_or_else(|| Error::NotFound(format!("round {}", round_id)))
}

fn require_participant(conn: &Connection, id: Uuid) -> Result<Participant> {
    ParticipantStore::new(conn)
        .find_by_id(id)?
        .ok_or_else(|| Error::NotFound(format!("participant {}", id)))
}

impl RoomRepository for Database {
    fn create_room(&self) -> Result<Room> {
        let conn = self.conn()?;
        let room = Room::new(unique_code(&conn)?);
        RoomStore::new(&conn).create(&room)?;
        info!(room_id = %room.id, code = %room.code, "Room created");
        Ok(room)
    }

    fn generate_room_code(&self) -> Result<RoomCode> {
        let conn = self.conn()?;
        unique_code(&conn)
    }

    fn find_room_by_id(&self, id: Uuid) -> Result<Option<Room>> {
        let conn = self.conn()?;
        RoomStore::new(&conn).find_by_id(id)
    }

    fn find_room_by_code(&self, code: &RoomCode) -> Result<Option<Room>> {
        let conn = self.conn()?;
        RoomStore::new(&conn).find_by_code(code)
    }

    fn load_room(&self, room_id: Uuid) -> Result<Option<RoomSnapshot>> {
        let conn = self.conn()?;
        let Some(room) = RoomStore::new(&conn).find_by_id(room_id)? else {
            return Ok(None);
        };
        let participants = ParticipantStore::new(&conn).list_for_room(room_id)?;
        let rounds = RoundStore::new(&conn).list_for_room(room_id)?;
        Ok(Some(RoomSnapshot {
            room,
            participants,
            rounds,
        }))
    }

    fn probe(&self) -> Result<()> {
        let conn = self.conn()?;
        RoomStore::new(&conn).probe()
    }
}

impl ParticipantRepository for Database {
    fn find_participant(&self, room_id: Uuid, session_id: Uuid) -> Result<Option<Participant>> {
        let conn = self.conn()?;
        ParticipantStore::new(&conn).find_by_session(room_id, session_id)
    }

    fn find_participant_by_id(&self, id: Uuid) -> Result<Option<Participant>> {
        let conn = self.conn()?;
        ParticipantStore::new(&conn).find_by_id(id)
    }

    fn insert_participant(&self, participant: &Participant) -> Result<Participant> {
        let conn = self.conn()?;
        require_room(&conn, participant.room_id)?;
        ParticipantStore::new(&conn).insert_claiming_owner(participant)?;
        let inserted = require_participant(&conn, participant.id)?;

        info!(
            participant_id = %inserted.id,
            room_id = %inserted.room_id,
            is_owner = inserted.is_owner,
            "Participant joined"
        );
        self.publish(ChangeEvent::Participant {
            kind: ChangeKind::Insert,
            participant: inserted.clone(),
        });
        Ok(inserted)
    }

    fn reactivate_participant(&self, id: Uuid, display_name: &str) -> Result<Participant> {
        let conn = self.conn()?;
        if ParticipantStore::new(&conn).update_presence(id, Some(display_name), true)? == 0 {
            return Err(Error::NotFound(format!("participant {}", id)));
        }
        let updated = require_participant(&conn, id)?;

        self.publish(ChangeEvent::Participant {
            kind: ChangeKind::Update,
            participant: updated.clone(),
        });
        Ok(updated)
    }

    fn set_participant_active(&self, id: Uuid, is_active: bool) -> Result<Participant> {
        let conn = self.conn()?;
        if ParticipantStore::new(&conn).update_presence(id, None, is_active)? == 0 {
            return Err(Error::NotFound(format!("participant {}", id)));
        }
        let updated = require_participant(&conn, id)?;

        self.publish(ChangeEvent::Participant {
            kind: ChangeKind::Update,
            participant: updated.clone(),
        });
        Ok(updated)
    }

    fn list_participants(&self, room_id: Uuid) -> Result<Vec<Participant>> {
        let conn = self.conn()?;
        ParticipantStore::new(&conn).list_for_room(room_id)
    }
}

impl RoundRepository for Database {
    fn start_round(&self, room_id: Uuid) -> Result<Round> {
        let conn = self.conn()?;
        require_room(&conn, room_id)?;
        let id = Uuid::new_v4();
        RoundStore::new(&conn).insert_next(id, room_id, Utc::now())?;
        RoomStore::new(&conn).touch(room_id)?;
        let round = require_round(&conn, id)?;

        info!(round_id = %round.id, room_id = %room_id, number = round.round_number, "Round started");
        self.publish(ChangeEvent::Round {
            kind: ChangeKind::Insert,
            round: round.clone(),
        });
        Ok(round)
    }

    fn find_round_by_id(&self, id: Uuid) -> Result<Option<Round>> {
        let conn = self.conn()?;
        RoundStore::new(&conn).find_by_id(id)
    }

    fn current_round(&self, room_id: Uuid) -> Result<Option<Round>> {
        let conn = self.conn()?;
        RoundStore::new(&conn).current_for_room(room_id)
    }

    fn list_rounds(&self, room_id: Uuid) -> Result<Vec<Round>> {
        let conn = self.conn()?;
        RoundStore::new(&conn).list_for_room(room_id)
    }

    fn calculate_round_statistics(&self, round_id: Uuid) -> Result<Option<RoundStatistics>> {
        let conn = self.conn()?;
        let round = require_round(&conn, round_id)?;
        if round.status == RoundStatus::Revealed {
            return Ok(round.statistics());
        }

        let values: Vec<CardValue> = SelectionStore::new(&conn)
            .list_for_round(round_id)?
            .into_iter()
            .map(|s| s.card_value)
            .collect();
        let stats = compute_statistics(&values);

        let rounds = RoundStore::new(&conn);
        if rounds.write_statistics(round_id, stats.as_ref())? == 0 {
            // Revealed between the read and the write
            return Ok(require_round(&conn, round_id)?.statistics());
        }
        let updated = require_round(&conn, round_id)?;

        debug!(round_id = %round_id, cards = values.len(), "Statistics written");
        self.publish(ChangeEvent::Round {
            kind: ChangeKind::Update,
            round: updated,
        });
        Ok(stats)
    }

    fn reveal_round(&self, round_id: Uuid) -> Result<Round> {
        let conn = self.conn()?;
        require_round(&conn, round_id)?;
        let changed = RoundStore::new(&conn).mark_revealed(round_id, Utc::now())?;
        let round = require_round(&conn, round_id)?;

        if changed > 0 {
            info!(round_id = %round_id, number = round.round_number, "Round revealed");
            self.publish(ChangeEvent::Round {
                kind: ChangeKind::Update,
                round: round.clone(),
            });
        } else {
            debug!(round_id = %round_id, "Round already revealed");
        }
        Ok(round)
    }
}

impl SelectionRepository for Database {
    fn upsert_selection(
        &self,
        round_id: Uuid,
        participant_id: Uuid,
        card: CardValue,
    ) -> Result<CardSelection> {
        let conn = self.conn()?;
        let tx = conn.unchecked_transaction()?;

        let round = require_round(&tx, round_id)?;
        if !round.is_selecting() {
            return Err(Error::Persistence(format!(
                "round {} is already revealed; selection rejected",
                round.round_number
            )));
        }
        let participant = require_participant(&tx, participant_id)?;
        if participant.room_id != round.room_id {
            return Err(Error::Persistence(format!(
                "participant {} does not belong to the round's room",
                participant_id
            )));
        }

        let selections = SelectionStore::new(&tx);
        let kind = match selections.find(round_id, participant_id)? {
            Some(_) => ChangeKind::Update,
            None => ChangeKind::Insert,
        };
        selections.upsert(round_id, participant_id, card, Utc::now())?;
        let selection = selections
            .find(round_id, participant_id)?
            .ok_or_else(|| Error::Persistence("selection vanished after upsert".into()))?;
        tx.commit()?;

        self.publish(ChangeEvent::CardSelection {
            kind,
            selection: selection.clone(),
        });
        Ok(selection)
    }

    fn find_selection(
        &self,
        round_id: Uuid,
        participant_id: Uuid,
    ) -> Result<Option<CardSelection>> {
        let conn = self.conn()?;
        SelectionStore::new(&conn).find(round_id, participant_id)
    }

    fn list_selections(&self, round_id: Uuid) -> Result<Vec<CardSelection>> {
        let conn = self.conn()?;
        SelectionStore::new(&conn).list_for_round(round_id)
    }
}
