//! Completion detection
//!
//! A round is complete when every active participant has a committed
//! selection. Inactive participants never block completion, and selections
//! left behind by participants who have since gone inactive are not counted.

use std::collections::HashSet;

use pointroom_core::{CardSelection, Participant};
use serde::Serialize;
use uuid::Uuid;

/// Outcome of a completion check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CompletionCheck {
    pub all_selected: bool,
    pub total_participants: usize,
    pub selected_count: usize,
}

/// Compare the active roster against the selection set of one round
pub fn check_all_selected(
    participants: &[Participant],
    selections: &[CardSelection],
) -> CompletionCheck {
    let active: HashSet<Uuid> = participants
        .iter()
        .filter(|p| p.is_active)
        .map(|p| p.id)
        .collect();
    let selected: HashSet<Uuid> = selections.iter().map(|s| s.participant_id).collect();

    let selected_count = active.intersection(&selected).count();
    CompletionCheck {
        all_selected: !active.is_empty() && selected_count == active.len(),
        total_participants: active.len(),
        selected_count,
    }
}
