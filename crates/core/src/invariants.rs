//! Developer guardrails and invariants
//!
//! Debug assertions for detecting impossible states during development.
//! These checks are compiled out in release builds.

use std::collections::HashSet;

use uuid::Uuid;

use crate::models::{CardSelection, RoomSnapshot, Round};

/// Validate that a room snapshot is internally consistent
pub fn assert_snapshot_invariants(snapshot: &RoomSnapshot) {
    let room_id = snapshot.room.id;

    let owners = snapshot.participants.iter().filter(|p| p.is_owner).count();
    debug_assert!(
        owners <= 1,
        "Room {} has {} owners, expected at most 1",
        room_id,
        owners
    );
    debug_assert!(
        owners == 1 || snapshot.participants.is_empty(),
        "Room {} has participants but no owner",
        room_id
    );

    assert_round_sequence(room_id, &snapshot.rounds);
}

/// Round numbers are 1..=n without gaps or duplicates.
///
/// A lower round may still be selecting when two clients started rounds at
/// once; the highest one is current and the other is simply abandoned.
pub fn assert_round_sequence(room_id: Uuid, rounds: &[Round]) {
    let mut numbers: Vec<u32> = rounds.iter().map(|r| r.round_number).collect();
    numbers.sort_unstable();
    for (i, number) in numbers.iter().enumerate() {
        debug_assert!(
            *number as usize == i + 1,
            "Room {} round numbers {:?} have a gap or duplicate",
            room_id,
            numbers
        );
    }
}

/// A round never holds two selections from the same participant
pub fn assert_selection_invariants(round_id: Uuid, selections: &[CardSelection]) {
    let mut seen = HashSet::new();
    for selection in selections {
        debug_assert!(
            selection.round_id == round_id,
            "Selection {} belongs to round {} not {}",
            selection.id,
            selection.round_id,
            round_id
        );
        debug_assert!(
            seen.insert(selection.participant_id),
            "Participant {} has two selections in round {}",
            selection.participant_id,
            round_id
        );
    }
}
