//! Read-only session snapshot for the presentation layer

use std::collections::HashMap;

use pointroom_core::{
    is_unanimous, CardSelection, CardValue, Participant, Room, RoomCode, Round, RoundStatistics,
    RoundStatus,
};
use serde::Serialize;
use uuid::Uuid;

use crate::completion::{check_all_selected, CompletionCheck};

/// One roster line
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RosterEntry {
    pub participant_id: Uuid,
    pub display_name: String,
    pub is_active: bool,
    pub is_owner: bool,
    pub is_you: bool,
    pub has_selected: bool,
    /// Only filled once the round is revealed
    pub card: Option<CardValue>,
}

/// The current round as seen by this client
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoundView {
    pub id: Uuid,
    pub round_number: u32,
    pub status: RoundStatus,
    pub progress: CompletionCheck,
    pub statistics: Option<RoundStatistics>,
    /// Average rounded for display
    pub average: Option<String>,
    pub unanimous: bool,
}

/// Everything a screen needs to render a room
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionView {
    pub room_id: Option<Uuid>,
    pub room_code: Option<RoomCode>,
    pub participant_id: Option<Uuid>,
    pub is_owner: bool,
    pub roster: Vec<RosterEntry>,
    pub round: Option<RoundView>,
    pub own_selection: Option<CardValue>,
}

impl SessionView {
    /// View of a client outside any room
    pub fn empty() -> Self {
        Self {
            room_id: None,
            room_code: None,
            participant_id: None,
            is_owner: false,
            roster: Vec::new(),
            round: None,
            own_selection: None,
        }
    }

    pub(crate) fn build(
        room: Option<&Room>,
        me: Option<&Participant>,
        participants: &[Participant],
        round: Option<&Round>,
        selections: &[CardSelection],
    ) -> Self {
        let Some(room) = room else {
            return Self::empty();
        };

        let revealed = round.is_some_and(|r| r.is_revealed());
        let by_participant: HashMap<Uuid, CardValue> = selections
            .iter()
            .map(|s| (s.participant_id, s.card_value))
            .collect();

        let mut roster: Vec<RosterEntry> = participants
            .iter()
            .map(|p| RosterEntry {
                participant_id: p.id,
                display_name: p.display_name.clone(),
                is_active: p.is_active,
                is_owner: p.is_owner,
                is_you: me.is_some_and(|m| m.id == p.id),
                has_selected: by_participant.contains_key(&p.id),
                card: if revealed {
                    by_participant.get(&p.id).copied()
                } else {
                    None
                },
            })
            .collect();
        roster.sort_by(|a, b| {
            b.is_owner
                .cmp(&a.is_owner)
                .then_with(|| a.display_name.cmp(&b.display_name))
        });

        let round = round.map(|r| {
            let statistics = r.statistics();
            let cards: Vec<CardValue> = selections.iter().map(|s| s.card_value).collect();
            RoundView {
                id: r.id,
                round_number: r.round_number,
                status: r.status,
                progress: check_all_selected(participants, selections),
                average: statistics.as_ref().map(RoundStatistics::display_avg),
                statistics,
                unanimous: revealed && is_unanimous(&cards),
            }
        });

        Self {
            room_id: Some(room.id),
            room_code: Some(room.code.clone()),
            participant_id: me.map(|m| m.id),
            is_owner: me.is_some_and(|m| m.is_owner),
            own_selection: me.and_then(|m| by_participant.get(&m.id).copied()),
            roster,
            round,
        }
    }
}
