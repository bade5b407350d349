//! Entity store traits
//!
//! These traits are the interface between the session core and whatever
//! persists rooms, participants, rounds and selections (SQLite, mock,
//! future remote backend).

use uuid::Uuid;

use crate::error::Result;
use crate::models::{
    CardSelection, CardValue, Participant, Room, RoomCode, RoomSnapshot, Round, RoundStatistics,
};

/// Room repository operations
pub trait RoomRepository {
    /// Create a room with a freshly generated unique code
    fn create_room(&self) -> Result<Room>;

    /// Produce a short code not used by any room
    fn generate_room_code(&self) -> Result<RoomCode>;

    /// Find room by ID
    fn find_room_by_id(&self, id: Uuid) -> Result<Option<Room>>;

    /// Find room by code
    fn find_room_by_code(&self, code: &RoomCode) -> Result<Option<Room>>;

    /// Room with its participants and rounds
    fn load_room(&self, room_id: Uuid) -> Result<Option<RoomSnapshot>>;

    /// Cheapest possible request, used to test reachability
    fn probe(&self) -> Result<()>;
}

/// Participant repository operations
pub trait ParticipantRepository {
    /// Find the participant for an identity in a room
    fn find_participant(&self, room_id: Uuid, session_id: Uuid) -> Result<Option<Participant>>;

    /// Find participant by ID
    fn find_participant_by_id(&self, id: Uuid) -> Result<Option<Participant>>;

    /// Insert a participant; the store decides `is_owner` atomically
    fn insert_participant(&self, participant: &Participant) -> Result<Participant>;

    /// Reactivate a participant under a (possibly new) display name
    fn reactivate_participant(&self, id: Uuid, display_name: &str) -> Result<Participant>;

    /// Mark a participant active or soft-departed
    fn set_participant_active(&self, id: Uuid, is_active: bool) -> Result<Participant>;

    /// List a room's participants
    fn list_participants(&self, room_id: Uuid) -> Result<Vec<Participant>>;
}

/// Round repository operations
pub trait RoundRepository {
    /// Insert the next round for a room at `selecting`
    fn start_round(&self, room_id: Uuid) -> Result<Round>;

    /// Find round by ID
    fn find_round_by_id(&self, id: Uuid) -> Result<Option<Round>>;

    /// Highest-numbered round of a room
    fn current_round(&self, room_id: Uuid) -> Result<Option<Round>>;

    /// All rounds of a room
    fn list_rounds(&self, room_id: Uuid) -> Result<Vec<Round>>;

    /// Aggregate the committed selections and write them to the round.
    /// Never recomputes a revealed round.
    fn calculate_round_statistics(&self, round_id: Uuid) -> Result<Option<RoundStatistics>>;

    /// Transition to `revealed`; a no-op if already revealed
    fn reveal_round(&self, round_id: Uuid) -> Result<Round>;
}

/// Card selection repository operations
pub trait SelectionRepository {
    /// Insert or overwrite the card for (round, participant)
    fn upsert_selection(
        &self,
        round_id: Uuid,
        participant_id: Uuid,
        card: CardValue,
    ) -> Result<CardSelection>;

    /// Find a participant's selection in a round
    fn find_selection(&self, round_id: Uuid, participant_id: Uuid)
        -> Result<Option<CardSelection>>;

    /// All selections of a round
    fn list_selections(&self, round_id: Uuid) -> Result<Vec<CardSelection>>;
}

/// Combined entity store interface
pub trait EntityStore:
    RoomRepository + ParticipantRepository + RoundRepository + SelectionRepository + Send + Sync
{
}

// Blanket implementation: any type implementing all traits implements EntityStore
impl<T> EntityStore for T where
    T: RoomRepository
        + ParticipantRepository
        + RoundRepository
        + SelectionRepository
        + Send
        + Sync
{
}
