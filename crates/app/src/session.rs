//! Session state machine
//!
//! One client's view of one room: roster, current round and the selections
//! made in it. Writes go to the entity store; every client (the writer
//! included) then converges through [`Session::apply_change`]. Reveal is
//! driven from here, either when completion detection finds every active
//! participant has chosen or when the owner forces it. Both paths rely on
//! the store's reveal being idempotent, so several clients may race to
//! reveal the same round.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use pointroom_core::invariants::{assert_selection_invariants, assert_snapshot_invariants};
use pointroom_core::{
    validate_display_name, CardSelection, CardValue, ChangeEvent, EntityStore, Error,
    Participant, Result, Room, RoomCode, Round,
};
use pointroom_net::ConnectivityMonitor;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::completion::{check_all_selected, CompletionCheck};
use crate::identity::IdentityProvider;
use crate::view::SessionView;

/// Result of a card selection request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectOutcome {
    /// Written to the store
    Recorded,
    /// This client already chose a card in the round; nothing was sent
    AlreadySelected,
}

/// What applying a change notification did to local state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeOutcome {
    /// Stale, duplicate or out of scope
    Ignored,
    Updated,
    /// A newer round became current
    RoundChanged(Uuid),
}

#[derive(Debug, Default)]
struct SessionState {
    room: Option<Room>,
    me: Option<Participant>,
    participants: HashMap<Uuid, Participant>,
    round: Option<Round>,
    /// Selections of the current round, keyed by participant
    selections: HashMap<Uuid, CardSelection>,
}

impl SessionState {
    fn participants(&self) -> Vec<Participant> {
        self.participants.values().cloned().collect()
    }

    fn selections(&self) -> Vec<CardSelection> {
        self.selections.values().cloned().collect()
    }

    fn own_selection(&self) -> Option<CardValue> {
        let me = self.me.as_ref()?;
        self.selections.get(&me.id).map(|s| s.card_value)
    }

    fn replace_selections(&mut self, selections: Vec<CardSelection>) {
        self.selections = selections
            .into_iter()
            .map(|s| (s.participant_id, s))
            .collect();
    }
}

/// A client's session in one room
pub struct Session<S: EntityStore> {
    store: Arc<S>,
    identity: Arc<dyn IdentityProvider>,
    monitor: Option<ConnectivityMonitor>,
    state: Mutex<SessionState>,
}

impl<S: EntityStore> Session<S> {
    pub fn new(store: Arc<S>, identity: Arc<dyn IdentityProvider>) -> Self {
        Self {
            store,
            identity,
            monitor: None,
            state: Mutex::new(SessionState::default()),
        }
    }

    /// Report network-classified store failures to this monitor
    pub fn with_monitor(mut self, monitor: ConnectivityMonitor) -> Self {
        self.monitor = Some(monitor);
        self
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Pass a store result through, telling the monitor about transport failures
    fn observe<T>(&self, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            if e.is_network() {
                if let Some(monitor) = &self.monitor {
                    monitor.report_transport_failure();
                }
            }
        }
        result
    }

    // ---- context ----

    pub fn room(&self) -> Option<Room> {
        self.lock().room.clone()
    }

    pub fn room_id(&self) -> Option<Uuid> {
        self.lock().room.as_ref().map(|r| r.id)
    }

    pub fn participant(&self) -> Option<Participant> {
        self.lock().me.clone()
    }

    pub fn current_round(&self) -> Option<Round> {
        self.lock().round.clone()
    }

    pub fn current_round_id(&self) -> Option<Uuid> {
        self.lock().round.as_ref().map(|r| r.id)
    }

    pub fn own_selection(&self) -> Option<CardValue> {
        self.lock().own_selection()
    }

    /// Snapshot for rendering
    pub fn view(&self) -> SessionView {
        let state = self.lock();
        let participants = state.participants();
        let selections = state.selections();
        SessionView::build(
            state.room.as_ref(),
            state.me.as_ref(),
            &participants,
            state.round.as_ref(),
            &selections,
        )
    }

    // ---- intents ----

    /// Create a room with a fresh code. Does not join it.
    pub fn create_room(&self) -> Result<Room> {
        self.observe(self.store.create_room())
    }

    /// Join a room, or rejoin it under the same identity
    pub fn join_room(&self, room_id: Uuid, display_name: &str) -> Result<Participant> {
        let name = validate_display_name(display_name)?;
        let session_id = self.identity.session_id()?;

        self.observe(self.store.find_room_by_id(room_id))?
            .ok_or_else(|| Error::NotFound(format!("room {}", room_id)))?;

        let participant = match self.observe(self.store.find_participant(room_id, session_id))? {
            Some(existing) => {
                debug!(participant_id = %existing.id, "Reactivating participant");
                self.observe(self.store.reactivate_participant(existing.id, &name))?
            }
            None => {
                let candidate = Participant::new(room_id, session_id, name);
                self.observe(self.store.insert_participant(&candidate))?
            }
        };

        let fresh = self.fetch_state(room_id, participant.id)?;
        *self.lock() = fresh;

        info!(
            room_id = %room_id,
            participant_id = %participant.id,
            is_owner = participant.is_owner,
            "Joined room"
        );
        Ok(participant)
    }

    /// Resolve a shared code, then join
    pub fn join_room_by_code(&self, code: &str, display_name: &str) -> Result<Participant> {
        let code = RoomCode::parse(code)?;
        let room = self
            .observe(self.store.find_room_by_code(&code))?
            .ok_or_else(|| Error::NotFound(format!("room with code {}", code)))?;
        self.join_room(room.id, display_name)
    }

    /// Start the next round. The caller is expected to be the owner.
    pub fn start_round(&self, room_id: Uuid) -> Result<Round> {
        if let Some(me) = self.lock().me.as_ref().filter(|m| !m.is_owner) {
            warn!(participant_id = %me.id, "Round started by a participant who is not the owner");
        }

        let round = self.observe(self.store.start_round(room_id))?;
        self.merge_round(round.clone());
        Ok(round)
    }

    /// Choose a card in the current round.
    ///
    /// Once this client has a selection in the round, later calls are a
    /// no-op; the store itself would accept the overwrite.
    pub fn select_card(
        &self,
        round_id: Uuid,
        participant_id: Uuid,
        value: u8,
    ) -> Result<SelectOutcome> {
        let card = CardValue::new(value)?;

        {
            let state = self.lock();
            if let Some(round) = state.round.as_ref().filter(|r| r.id == round_id) {
                if round.is_revealed() {
                    return Err(Error::Validation(format!(
                        "round {} is already revealed",
                        round.round_number
                    )));
                }
                if state.selections.contains_key(&participant_id)
                    && state.me.as_ref().is_some_and(|m| m.id == participant_id)
                {
                    debug!(round_id = %round_id, "Card already selected; ignoring");
                    return Ok(SelectOutcome::AlreadySelected);
                }
            }
        }

        let selection = self.observe(self.store.upsert_selection(round_id, participant_id, card))?;
        debug!(round_id = %round_id, card = %card, "Card selected");
        {
            let mut state = self.lock();
            if state.round.as_ref().is_some_and(|r| r.id == round_id) {
                state.selections.insert(participant_id, selection);
            }
        }

        self.check_completion();
        Ok(SelectOutcome::Recorded)
    }

    /// Reveal now, with whatever selections exist
    pub fn force_reveal(&self, round_id: Uuid) -> Result<Round> {
        {
            let state = self.lock();
            if let Some(round) = state.round.as_ref().filter(|r| r.id == round_id) {
                if round.is_revealed() {
                    return Err(Error::Validation(format!(
                        "round {} is already revealed",
                        round.round_number
                    )));
                }
            }
            if let Some(me) = state.me.as_ref().filter(|m| !m.is_owner) {
                warn!(participant_id = %me.id, "Forced reveal by a participant who is not the owner");
            }
        }

        info!(round_id = %round_id, "Forcing reveal");
        self.reveal(round_id)
    }

    /// Soft departure: mark this participant inactive and drop the context
    pub fn leave_room(&self) -> Result<()> {
        let me = self
            .lock()
            .me
            .clone()
            .ok_or_else(|| Error::Validation("not in a room".into()))?;

        self.observe(self.store.set_participant_active(me.id, false))?;
        *self.lock() = SessionState::default();
        info!(room_id = %me.room_id, participant_id = %me.id, "Left room");
        Ok(())
    }

    // ---- reactions ----

    /// Apply a change notification. Safe to call with duplicates and with
    /// events that arrive out of order.
    pub fn apply_change(&self, event: ChangeEvent) -> ChangeOutcome {
        match event {
            ChangeEvent::Participant { participant, .. } => {
                let outcome = self.merge_participant(participant);
                if outcome != ChangeOutcome::Ignored {
                    self.check_completion();
                }
                outcome
            }
            ChangeEvent::Round { round, .. } => self.merge_round(round),
            ChangeEvent::CardSelection { selection, .. } => {
                let outcome = self.merge_selection(selection);
                if outcome != ChangeOutcome::Ignored {
                    self.check_completion();
                }
                outcome
            }
        }
    }

    fn merge_participant(&self, participant: Participant) -> ChangeOutcome {
        let mut state = self.lock();
        if state.room.as_ref().map(|r| r.id) != Some(participant.room_id) {
            return ChangeOutcome::Ignored;
        }
        if state.participants.get(&participant.id) == Some(&participant) {
            return ChangeOutcome::Ignored;
        }

        if state.me.as_ref().is_some_and(|m| m.id == participant.id) {
            state.me = Some(participant.clone());
        }
        debug!(
            participant_id = %participant.id,
            is_active = participant.is_active,
            "Roster updated"
        );
        state.participants.insert(participant.id, participant);
        ChangeOutcome::Updated
    }

    fn merge_round(&self, round: Round) -> ChangeOutcome {
        let became_revealed = {
            let mut state = self.lock();
            if state.room.as_ref().map(|r| r.id) != Some(round.room_id) {
                return ChangeOutcome::Ignored;
            }

            let (is_newer, became_revealed) = match state.round.as_ref() {
                Some(current) if round.round_number < current.round_number => {
                    debug!(
                        stale = round.round_number,
                        current = current.round_number,
                        "Ignoring older round"
                    );
                    return ChangeOutcome::Ignored;
                }
                Some(current) if current.id == round.id => {
                    if *current == round || (current.is_revealed() && round.is_selecting()) {
                        return ChangeOutcome::Ignored;
                    }
                    (false, current.is_selecting() && round.is_revealed())
                }
                Some(current) if current.round_number == round.round_number => {
                    return ChangeOutcome::Ignored;
                }
                _ => (true, false),
            };

            if is_newer {
                info!(
                    round_id = %round.id,
                    number = round.round_number,
                    "New current round"
                );
                let id = round.id;
                state.round = Some(round);
                state.selections.clear();
                return ChangeOutcome::RoundChanged(id);
            }
            state.round = Some(round.clone());
            became_revealed
        };

        if became_revealed {
            info!(
                round_id = %round.id,
                number = round.round_number,
                "Round revealed"
            );
            // Pull the full set so every revealed card is known
            if let Err(e) = self.refresh_selections(round.id) {
                warn!(error = %e, round_id = %round.id, "Could not load revealed cards");
            }
        }
        ChangeOutcome::Updated
    }

    fn merge_selection(&self, selection: CardSelection) -> ChangeOutcome {
        let mut state = self.lock();
        let Some(round) = state.round.as_ref() else {
            return ChangeOutcome::Ignored;
        };
        if round.id != selection.round_id {
            debug!(round_id = %selection.round_id, "Selection for a round that is not current");
            return ChangeOutcome::Ignored;
        }
        if state.selections.get(&selection.participant_id) == Some(&selection) {
            return ChangeOutcome::Ignored;
        }
        state.selections.insert(selection.participant_id, selection);
        ChangeOutcome::Updated
    }

    fn refresh_selections(&self, round_id: Uuid) -> Result<Vec<CardSelection>> {
        let selections = self.observe(self.store.list_selections(round_id))?;
        assert_selection_invariants(round_id, &selections);

        let mut state = self.lock();
        if state.round.as_ref().is_some_and(|r| r.id == round_id) {
            state.replace_selections(selections.clone());
        }
        Ok(selections)
    }

    /// Reveal the current round if every active participant has chosen.
    ///
    /// Failures are logged and swallowed; the next notification or a
    /// reconciliation will try again.
    pub fn check_completion(&self) -> Option<CompletionCheck> {
        let (round_id, participants) = {
            let state = self.lock();
            let round = state.round.as_ref().filter(|r| r.is_selecting())?;
            (round.id, state.participants())
        };

        let selections = match self.refresh_selections(round_id) {
            Ok(selections) => selections,
            Err(e) => {
                warn!(error = %e, round_id = %round_id, "Completion check failed");
                return None;
            }
        };

        let check = check_all_selected(&participants, &selections);
        debug!(
            round_id = %round_id,
            selected = check.selected_count,
            total = check.total_participants,
            "Completion checked"
        );

        let still_selecting = self
            .lock()
            .round
            .as_ref()
            .is_some_and(|r| r.id == round_id && r.is_selecting());
        if check.all_selected && still_selecting {
            info!(round_id = %round_id, "All participants selected; revealing");
            if let Err(e) = self.reveal(round_id) {
                warn!(error = %e, round_id = %round_id, "Automatic reveal failed");
            }
        }
        Some(check)
    }

    /// Statistics first, then the status flip. Both are idempotent in the store.
    fn reveal(&self, round_id: Uuid) -> Result<Round> {
        self.observe(self.store.calculate_round_statistics(round_id))?;
        let round = self.observe(self.store.reveal_round(round_id))?;
        self.merge_round(round.clone());
        Ok(round)
    }

    // ---- reconciliation ----

    /// Replace local state with a full re-fetch from the store, then run a
    /// completion check. A no-op outside a room.
    pub fn reconcile(&self) -> Result<()> {
        let (room_id, me_id) = {
            let state = self.lock();
            match (state.room.as_ref(), state.me.as_ref()) {
                (Some(room), Some(me)) => (room.id, me.id),
                _ => return Ok(()),
            }
        };

        let fresh = self.fetch_state(room_id, me_id)?;
        let round = fresh.round.as_ref().map(|r| (r.round_number, r.status));
        *self.lock() = fresh;
        info!(room_id = %room_id, round = ?round, "Reconciled with store");

        self.check_completion();
        Ok(())
    }

    /// Reconcile, logging instead of returning failures
    pub fn try_reconcile(&self) -> bool {
        match self.reconcile() {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "Reconciliation failed");
                false
            }
        }
    }

    fn fetch_state(&self, room_id: Uuid, me_id: Uuid) -> Result<SessionState> {
        let snapshot = self
            .observe(self.store.load_room(room_id))?
            .ok_or_else(|| Error::NotFound(format!("room {}", room_id)))?;
        assert_snapshot_invariants(&snapshot);

        let round = snapshot.current_round().cloned();
        let selections = match &round {
            Some(round) => self.observe(self.store.list_selections(round.id))?,
            None => Vec::new(),
        };

        let me = snapshot
            .participants
            .iter()
            .find(|p| p.id == me_id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("participant {}", me_id)))?;

        let mut state = SessionState {
            room: Some(snapshot.room),
            me: Some(me),
            participants: snapshot
                .participants
                .into_iter()
                .map(|p| (p.id, p))
                .collect(),
            round,
            selections: HashMap::new(),
        };
        state.replace_selections(selections);
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::{FixedIdentity, NoIdentity};
    use pointroom_core::{
        Database, ParticipantRepository, RoundRepository, RoundStatus, SelectionRepository,
    };

    fn client(db: &Arc<Database>) -> Session<Database> {
        Session::new(db.clone(), Arc::new(FixedIdentity(Uuid::new_v4())))
    }

    /// A room with `n` joined clients; the first is the owner
    fn room_with(n: usize) -> (Arc<Database>, Room, Vec<Session<Database>>) {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let room = client(&db).create_room().unwrap();
        let sessions: Vec<_> = (0..n)
            .map(|i| {
                let s = client(&db);
                s.join_room(room.id, &format!("player{}", i)).unwrap();
                s
            })
            .collect();
        for s in &sessions {
            s.reconcile().unwrap();
        }
        (db, room, sessions)
    }

    fn me(s: &Session<Database>) -> Uuid {
        s.participant().unwrap().id
    }

    #[test]
    fn test_first_joiner_owns_room() {
        let (_db, _room, sessions) = room_with(3);
        let owners: Vec<bool> = sessions
            .iter()
            .map(|s| s.participant().unwrap().is_owner)
            .collect();
        assert_eq!(owners, vec![true, false, false]);
        assert_eq!(sessions[2].view().roster.len(), 3);
    }

    #[test]
    fn test_rejoin_reactivates() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let room = client(&db).create_room().unwrap();
        let identity = Arc::new(FixedIdentity(Uuid::new_v4()));

        let first = Session::new(db.clone(), identity.clone());
        let p = first.join_room(room.id, "ada").unwrap();
        first.leave_room().unwrap();
        assert!(first.room_id().is_none());
        assert!(!db.find_participant_by_id(p.id).unwrap().unwrap().is_active);

        let again = Session::new(db.clone(), identity);
        let rejoined = again.join_room(room.id, "  Ada L ").unwrap();
        assert_eq!(rejoined.id, p.id);
        assert!(rejoined.is_active);
        assert!(rejoined.is_owner);
        assert_eq!(rejoined.display_name, "Ada L");
        assert_eq!(db.list_participants(room.id).unwrap().len(), 1);
    }

    #[test]
    fn test_join_errors() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let room = client(&db).create_room().unwrap();

        let anonymous = Session::new(db.clone(), Arc::new(NoIdentity));
        assert!(matches!(
            anonymous.join_room(room.id, "ada"),
            Err(Error::Authentication(_))
        ));

        let s = client(&db);
        assert!(matches!(s.join_room(Uuid::new_v4(), "ada"), Err(Error::NotFound(_))));
        assert!(matches!(s.join_room(room.id, "   "), Err(Error::Validation(_))));
        assert!(matches!(
            s.join_room_by_code("ZZZZZZ", "ada"),
            Err(Error::NotFound(_))
        ));
        assert!(s.room_id().is_none());
    }

    #[test]
    fn test_join_by_code() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let room = client(&db).create_room().unwrap();
        let s = client(&db);
        let lower = room.code.as_str().to_lowercase();
        s.join_room_by_code(&lower, "ada").unwrap();
        assert_eq!(s.room_id(), Some(room.id));
    }

    #[test]
    fn test_join_while_store_down() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let room = client(&db).create_room().unwrap();
        db.set_reachable(false);

        let s = client(&db);
        let err = s.join_room(room.id, "ada").unwrap_err();
        assert!(err.is_persistence());
        assert!(s.room_id().is_none());
    }

    #[test]
    fn test_round_numbers_increase() {
        let (_db, room, sessions) = room_with(1);
        let owner = &sessions[0];
        assert_eq!(owner.start_round(room.id).unwrap().round_number, 1);
        assert_eq!(owner.start_round(room.id).unwrap().round_number, 2);
        assert_eq!(owner.current_round().unwrap().round_number, 2);
    }

    #[test]
    fn test_three_players_auto_reveal() {
        let (db, room, sessions) = room_with(3);
        let round = sessions[0].start_round(room.id).unwrap();
        for s in &sessions {
            s.reconcile().unwrap();
        }

        sessions[0].select_card(round.id, me(&sessions[0]), 5).unwrap();
        sessions[1].select_card(round.id, me(&sessions[1]), 8).unwrap();
        let check = sessions[1].check_completion().unwrap();
        assert!(!check.all_selected);
        assert_eq!(check.selected_count, 2);
        assert!(db.find_round_by_id(round.id).unwrap().unwrap().is_selecting());

        sessions[2].select_card(round.id, me(&sessions[2]), 5).unwrap();

        let stored = db.find_round_by_id(round.id).unwrap().unwrap();
        assert_eq!(stored.status, RoundStatus::Revealed);
        let stats = stored.statistics().unwrap();
        assert_eq!((stats.max, stats.min), (8, 5));
        assert_eq!(stats.median, 5.0);
        assert_eq!(stats.avg, 6.0);

        let view = sessions[2].view();
        let round_view = view.round.unwrap();
        assert_eq!(round_view.status, RoundStatus::Revealed);
        assert_eq!(round_view.average.as_deref(), Some("6.0"));
        assert!(view.roster.iter().all(|e| e.card.is_some()));
    }

    #[test]
    fn test_single_player_reveal() {
        let (db, room, sessions) = room_with(1);
        let round = sessions[0].start_round(room.id).unwrap();
        sessions[0].select_card(round.id, me(&sessions[0]), 13).unwrap();

        let stats = db
            .find_round_by_id(round.id)
            .unwrap()
            .unwrap()
            .statistics()
            .unwrap();
        assert_eq!((stats.max, stats.min), (13, 13));
        assert_eq!((stats.median, stats.avg), (13.0, 13.0));
        assert!(sessions[0].current_round().unwrap().is_revealed());
    }

    #[test]
    fn test_forced_reveal_with_partial_selection() {
        let (db, room, sessions) = room_with(3);
        let round = sessions[0].start_round(room.id).unwrap();
        for s in &sessions {
            s.reconcile().unwrap();
        }
        sessions[1].select_card(round.id, me(&sessions[1]), 3).unwrap();
        assert!(sessions[0].current_round().unwrap().is_selecting());

        let revealed = sessions[0].force_reveal(round.id).unwrap();
        assert!(revealed.is_revealed());
        let stats = revealed.statistics().unwrap();
        assert_eq!((stats.max, stats.min, stats.median, stats.avg), (3, 3, 3.0, 3.0));

        // Late selections do not touch the revealed round
        assert!(db.upsert_selection(round.id, me(&sessions[2]), CardValue::new(21).unwrap()).is_err());
        assert!(matches!(
            sessions[0].force_reveal(round.id),
            Err(Error::Validation(_))
        ));
        let after = db.find_round_by_id(round.id).unwrap().unwrap();
        assert_eq!(after.statistics(), Some(stats));
    }

    #[test]
    fn test_forced_reveal_with_no_cards() {
        let (_db, room, sessions) = room_with(2);
        let round = sessions[0].start_round(room.id).unwrap();
        let revealed = sessions[0].force_reveal(round.id).unwrap();
        assert!(revealed.is_revealed());
        assert!(revealed.statistics().is_none());
        assert_eq!(revealed.max_value, None);
    }

    #[test]
    fn test_invalid_card_rejected_before_store() {
        let (db, room, sessions) = room_with(1);
        let round = sessions[0].start_round(room.id).unwrap();
        db.set_reachable(false);
        assert!(matches!(
            sessions[0].select_card(round.id, me(&sessions[0]), 4),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn test_second_selection_is_local_noop() {
        let (db, room, sessions) = room_with(2);
        let round = sessions[0].start_round(room.id).unwrap();
        let p = me(&sessions[0]);

        assert_eq!(sessions[0].select_card(round.id, p, 5).unwrap(), SelectOutcome::Recorded);
        assert_eq!(
            sessions[0].select_card(round.id, p, 8).unwrap(),
            SelectOutcome::AlreadySelected
        );
        let stored = db.find_selection(round.id, p).unwrap().unwrap();
        assert_eq!(stored.card_value.value(), 5);

        // The store still overwrites when asked directly
        db.upsert_selection(round.id, p, CardValue::new(8).unwrap()).unwrap();
        assert_eq!(db.list_selections(round.id).unwrap().len(), 1);
    }

    #[test]
    fn test_select_after_reveal_rejected() {
        let (_db, room, sessions) = room_with(2);
        let round = sessions[0].start_round(room.id).unwrap();
        sessions[0].force_reveal(round.id).unwrap();
        assert!(matches!(
            sessions[0].select_card(round.id, me(&sessions[0]), 5),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn test_inactive_participant_does_not_block() {
        let (db, room, sessions) = room_with(3);
        let round = sessions[0].start_round(room.id).unwrap();
        for s in &sessions {
            s.reconcile().unwrap();
        }

        sessions[0].select_card(round.id, me(&sessions[0]), 2).unwrap();
        sessions[1].select_card(round.id, me(&sessions[1]), 3).unwrap();
        assert!(db.find_round_by_id(round.id).unwrap().unwrap().is_selecting());

        // The straggler leaves; the roster change completes the round
        let departed = db.set_participant_active(me(&sessions[2]), false).unwrap();
        let outcome = sessions[0].apply_change(ChangeEvent::Participant {
            kind: pointroom_core::ChangeKind::Update,
            participant: departed,
        });
        assert_eq!(outcome, ChangeOutcome::Updated);
        assert!(db.find_round_by_id(round.id).unwrap().unwrap().is_revealed());
    }

    #[test]
    fn test_duplicate_and_stale_events_ignored() {
        let (db, room, sessions) = room_with(2);
        let s = &sessions[1];
        let first = db.start_round(room.id).unwrap();
        let second = db.start_round(room.id).unwrap();

        let event = |round: &Round| ChangeEvent::Round {
            kind: pointroom_core::ChangeKind::Insert,
            round: round.clone(),
        };
        assert_eq!(s.apply_change(event(&second)), ChangeOutcome::RoundChanged(second.id));
        assert_eq!(s.apply_change(event(&second)), ChangeOutcome::Ignored);
        assert_eq!(s.apply_change(event(&first)), ChangeOutcome::Ignored);
        assert_eq!(s.current_round_id(), Some(second.id));

        // A selection for the orphaned round never lands locally
        let stray = db
            .upsert_selection(first.id, me(s), CardValue::new(5).unwrap())
            .unwrap();
        assert_eq!(
            s.apply_change(ChangeEvent::CardSelection {
                kind: pointroom_core::ChangeKind::Insert,
                selection: stray,
            }),
            ChangeOutcome::Ignored
        );
    }

    #[test]
    fn test_revealed_round_never_downgraded() {
        let (db, room, sessions) = room_with(2);
        let s = &sessions[1];
        let selecting = db.start_round(room.id).unwrap();
        db.calculate_round_statistics(selecting.id).unwrap();
        let revealed = db.reveal_round(selecting.id).unwrap();

        let event = |round: &Round| ChangeEvent::Round {
            kind: pointroom_core::ChangeKind::Update,
            round: round.clone(),
        };
        s.apply_change(event(&selecting));
        assert_eq!(s.apply_change(event(&revealed)), ChangeOutcome::Updated);
        assert_eq!(s.apply_change(event(&selecting)), ChangeOutcome::Ignored);
        assert!(s.current_round().unwrap().is_revealed());
    }

    #[test]
    fn test_concurrent_start_round_highest_wins() {
        let (db, room, sessions) = room_with(2);
        let (a, b) = (&sessions[0], &sessions[1]);

        let one = a.start_round(room.id).unwrap();
        let two = b.start_round(room.id).unwrap();
        assert_eq!((one.round_number, two.round_number), (1, 2));

        let event = |round: &Round| ChangeEvent::Round {
            kind: pointroom_core::ChangeKind::Insert,
            round: round.clone(),
        };
        assert_eq!(a.apply_change(event(&two)), ChangeOutcome::RoundChanged(two.id));
        assert_eq!(b.apply_change(event(&one)), ChangeOutcome::Ignored);
        assert_eq!(a.current_round_id(), Some(two.id));
        assert_eq!(b.current_round_id(), Some(two.id));

        // The orphan stays selecting and is not an error
        assert!(db.find_round_by_id(one.id).unwrap().unwrap().is_selecting());
        a.reconcile().unwrap();
        assert_eq!(a.current_round_id(), Some(two.id));
    }

    #[test]
    fn test_reconcile_after_missed_events() {
        let (db, room, sessions) = room_with(3);
        let (a, b, c) = (&sessions[0], &sessions[1], &sessions[2]);
        let round = a.start_round(room.id).unwrap();
        b.reconcile().unwrap();
        c.reconcile().unwrap();
        a.select_card(round.id, me(a), 8).unwrap();

        // `a` is cut off and sees none of this
        b.select_card(round.id, me(b), 5).unwrap();
        c.select_card(round.id, me(c), 5).unwrap();
        assert!(db.find_round_by_id(round.id).unwrap().unwrap().is_revealed());
        assert!(a.current_round().unwrap().is_selecting());

        a.reconcile().unwrap();
        let view = a.view();
        let round_view = view.round.unwrap();
        assert_eq!(round_view.status, RoundStatus::Revealed);
        let stats = round_view.statistics.unwrap();
        assert_eq!((stats.max, stats.min, stats.median), (8, 5, 5.0));
        assert_eq!(round_view.progress.selected_count, 3);
        assert_eq!(view.own_selection, Some(CardValue::new(8).unwrap()));
    }

    #[test]
    fn test_reconcile_reveals_completed_round() {
        let (db, room, sessions) = room_with(2);
        let round = sessions[0].start_round(room.id).unwrap();

        // Both selections land without any client running the check
        db.upsert_selection(round.id, me(&sessions[0]), CardValue::new(2).unwrap())
            .unwrap();
        db.upsert_selection(round.id, me(&sessions[1]), CardValue::new(3).unwrap())
            .unwrap();
        assert!(db.find_round_by_id(round.id).unwrap().unwrap().is_selecting());

        sessions[1].reconcile().unwrap();
        assert!(db.find_round_by_id(round.id).unwrap().unwrap().is_revealed());
    }

    #[test]
    fn test_reconcile_failure_keeps_state() {
        let (db, room, sessions) = room_with(1);
        let round = sessions[0].start_round(room.id).unwrap();
        db.set_reachable(false);

        assert!(!sessions[0].try_reconcile());
        assert_eq!(sessions[0].current_round_id(), Some(round.id));
        assert!(sessions[0].check_completion().is_none());
    }

    #[test]
    fn test_reconcile_outside_room_is_noop() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let session = client(&db);
        // Any store call would fail with Unreachable
        db.set_reachable(false);

        assert!(session.reconcile().is_ok());
        assert!(session.try_reconcile());
        assert!(session.room().is_none());
        assert!(session.check_completion().is_none());
        assert_eq!(session.view(), SessionView::empty());
    }

    #[test]
    fn test_reveal_race_is_idempotent() {
        let (db, room, sessions) = room_with(2);
        let round = sessions[0].start_round(room.id).unwrap();
        for s in &sessions {
            s.reconcile().unwrap();
        }
        db.upsert_selection(round.id, me(&sessions[0]), CardValue::new(8).unwrap())
            .unwrap();
        db.upsert_selection(round.id, me(&sessions[1]), CardValue::new(13).unwrap())
            .unwrap();

        sessions[0].check_completion();
        let first = db.find_round_by_id(round.id).unwrap().unwrap();
        // The second client still believes the round is selecting
        assert!(sessions[1].current_round().unwrap().is_selecting());
        sessions[1].force_reveal(round.id).unwrap();
        let second = db.find_round_by_id(round.id).unwrap().unwrap();

        assert_eq!(first.statistics(), second.statistics());
        assert_eq!(first.revealed_at, second.revealed_at);
        assert_eq!(db.list_rounds(room.id).unwrap().len(), 1);
    }
}
