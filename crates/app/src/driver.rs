//! Session driver
//!
//! Background task that feeds a [`Session`] from the change feed and the
//! connectivity monitor. It follows the current round with its selection
//! subscription and reconciles whenever the monitor comes back to
//! `connected`.

use std::sync::Arc;

use pointroom_core::{EntityKind, EntityStore, Error, FilterKey, Result};
use pointroom_net::{
    next_or_pending, ChangeFeed, ConnectionStatus, ConnectivityMonitor, StatusSubscription,
    Subscription,
};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::session::Session;

/// Handle to a running driver task
pub struct SessionDriver {
    stop: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl SessionDriver {
    /// Start driving a session that has already joined a room.
    /// Must be called from within a tokio runtime.
    pub fn spawn<S>(
        session: Arc<Session<S>>,
        feed: Arc<ChangeFeed>,
        monitor: Option<ConnectivityMonitor>,
    ) -> Result<Self>
    where
        S: EntityStore + 'static,
    {
        let room_id = session
            .room_id()
            .ok_or_else(|| Error::Validation("session has not joined a room".into()))?;

        // Subscribe before the task starts so nothing committed from here on is missed
        let feeds = Feeds::open(&feed, room_id, session.current_round_id());
        let status = monitor.as_ref().map(|m| (m.subscribe(), m.status()));

        let (stop, stop_rx) = oneshot::channel();
        let task = tokio::spawn(run(session, feed, monitor, feeds, status, stop_rx));
        info!(room_id = %room_id, "Session driver started");

        Ok(Self { stop, task })
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    /// Stop reacting, drop every subscription and wait for the task to end.
    /// Writes already in flight complete.
    pub async fn shutdown(self) {
        let Self { stop, task } = self;
        let _ = stop.send(());
        if let Err(e) = task.await {
            warn!(error = %e, "Session driver ended abnormally");
        }
    }
}

struct Feeds {
    participants: Subscription,
    rounds: Subscription,
    selections: Option<Subscription>,
}

impl Feeds {
    fn open(feed: &ChangeFeed, room_id: Uuid, round_id: Option<Uuid>) -> Self {
        Self {
            participants: feed.subscribe(EntityKind::Participant, FilterKey(room_id)),
            rounds: feed.subscribe(EntityKind::Round, FilterKey(room_id)),
            selections: round_id
                .map(|id| feed.subscribe(EntityKind::CardSelection, FilterKey(id))),
        }
    }

    /// Point the selection subscription at the current round.
    /// Returns true when it moved.
    fn follow_round(&mut self, feed: &ChangeFeed, round_id: Option<Uuid>) -> bool {
        let subscribed = self.selections.as_ref().map(|s| s.filter().0);
        if subscribed == round_id {
            return false;
        }
        if let Some(old) = self.selections.take() {
            feed.unsubscribe(old.id());
        }
        self.selections =
            round_id.map(|id| feed.subscribe(EntityKind::CardSelection, FilterKey(id)));
        debug!(round_id = ?round_id, "Selection subscription moved");
        true
    }

    fn close(self, feed: &ChangeFeed) {
        feed.unsubscribe(self.participants.id());
        feed.unsubscribe(self.rounds.id());
        if let Some(selections) = self.selections {
            feed.unsubscribe(selections.id());
        }
    }
}

async fn next_status(
    status: &mut Option<(StatusSubscription, ConnectionStatus)>,
) -> Option<ConnectionStatus> {
    match status {
        Some((sub, _)) => sub.next().await,
        None => std::future::pending().await,
    }
}

async fn run<S>(
    session: Arc<Session<S>>,
    feed: Arc<ChangeFeed>,
    monitor: Option<ConnectivityMonitor>,
    mut feeds: Feeds,
    mut status: Option<(StatusSubscription, ConnectionStatus)>,
    mut stop: oneshot::Receiver<()>,
) where
    S: EntityStore + 'static,
{
    loop {
        tokio::select! {
            _ = &mut stop => break,
            Some(event) = feeds.participants.next() => {
                session.apply_change(event);
            }
            Some(event) = feeds.rounds.next() => {
                session.apply_change(event);
            }
            Some(event) = next_or_pending(&mut feeds.selections) => {
                session.apply_change(event);
            }
            Some(next) = next_status(&mut status) => {
                if let Some((_, last)) = status.as_mut() {
                    let previous = std::mem::replace(last, next);
                    if next == ConnectionStatus::Connected && previous != ConnectionStatus::Connected {
                        info!(from = %previous, "Connection restored; reconciling");
                        session.try_reconcile();
                    }
                }
            }
            else => break,
        }

        if feeds.follow_round(&feed, session.current_round_id()) {
            // Selections committed before the new subscription existed
            session.check_completion();
        }
    }

    feeds.close(&feed);
    if let (Some(monitor), Some((sub, _))) = (monitor, status) {
        monitor.unsubscribe(sub.id());
    }
    debug!("Session driver stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::FixedIdentity;
    use pointroom_core::{ChangeEvent, ChangeSink, Database, RoundRepository};
    use pointroom_net::MonitorConfig;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    async fn eventually(mut cond: impl FnMut() -> bool) -> bool {
        for _ in 0..1000 {
            if cond() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        cond()
    }

    fn session(db: &Arc<Database>) -> Arc<Session<Database>> {
        Arc::new(Session::new(db.clone(), Arc::new(FixedIdentity(Uuid::new_v4()))))
    }

    #[tokio::test(start_paused = true)]
    async fn test_clients_converge_through_feed() {
        let feed = Arc::new(ChangeFeed::new());
        let db = Arc::new(Database::open_in_memory().unwrap().with_change_sink(feed.clone()));

        let owner = session(&db);
        let room = owner.create_room().unwrap();
        owner.join_room(room.id, "owner").unwrap();
        let owner_driver = SessionDriver::spawn(owner.clone(), feed.clone(), None).unwrap();

        let guest = session(&db);
        guest.join_room(room.id, "guest").unwrap();
        let guest_driver = SessionDriver::spawn(guest.clone(), feed.clone(), None).unwrap();
        assert!(eventually(|| owner.view().roster.len() == 2).await);

        let round = owner.start_round(room.id).unwrap();
        assert!(eventually(|| guest.current_round_id() == Some(round.id)).await);

        let owner_id = owner.participant().unwrap().id;
        let guest_id = guest.participant().unwrap().id;
        owner.select_card(round.id, owner_id, 3).unwrap();
        assert!(eventually(|| guest.view().round.unwrap().progress.selected_count == 1).await);
        guest.select_card(round.id, guest_id, 5).unwrap();

        assert!(eventually(|| owner.current_round().unwrap().is_revealed()).await);
        assert!(eventually(|| guest.current_round().unwrap().is_revealed()).await);
        let stats = owner.view().round.unwrap().statistics.unwrap();
        assert_eq!((stats.max, stats.min, stats.median, stats.avg), (5, 3, 4.0, 4.0));

        // The next round moves both selection subscriptions
        let next = guest.start_round(room.id).unwrap();
        assert!(eventually(|| owner.current_round_id() == Some(next.id)).await);
        assert_eq!(feed.subscriber_count(), 6);

        owner_driver.shutdown().await;
        guest_driver.shutdown().await;
        assert_eq!(feed.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_spawn_requires_room() {
        let feed = Arc::new(ChangeFeed::new());
        let db = Arc::new(Database::open_in_memory().unwrap());
        assert!(matches!(
            SessionDriver::spawn(session(&db), feed, None),
            Err(Error::Validation(_))
        ));
    }

    /// Fans store changes out to two transports, one of which can drop out
    struct Relay {
        flaky: Arc<ChangeFeed>,
        flaky_online: Arc<AtomicBool>,
        steady: Arc<ChangeFeed>,
    }

    impl ChangeSink for Relay {
        fn publish(&self, event: ChangeEvent) {
            if self.flaky_online.load(Ordering::SeqCst) {
                self.flaky.deliver(&event);
            }
            self.steady.deliver(&event);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_reconciles_missed_reveal() {
        let flaky = Arc::new(ChangeFeed::new());
        let online = Arc::new(AtomicBool::new(true));
        let relay = Arc::new(Relay {
            flaky: flaky.clone(),
            flaky_online: online.clone(),
            steady: Arc::new(ChangeFeed::new()),
        });
        let db = Arc::new(Database::open_in_memory().unwrap().with_change_sink(relay));
        let monitor = ConnectivityMonitor::start(db.clone(), MonitorConfig::default());

        let a = Arc::new(
            Session::new(db.clone(), Arc::new(FixedIdentity(Uuid::new_v4())))
                .with_monitor(monitor.clone()),
        );
        let room = a.create_room().unwrap();
        a.join_room(room.id, "a").unwrap();
        let b = session(&db);
        b.join_room(room.id, "b").unwrap();
        let c = session(&db);
        c.join_room(room.id, "c").unwrap();
        a.reconcile().unwrap();

        let driver = SessionDriver::spawn(a.clone(), flaky.clone(), Some(monitor.clone())).unwrap();
        let round = a.start_round(room.id).unwrap();
        b.reconcile().unwrap();
        c.reconcile().unwrap();
        a.select_card(round.id, a.participant().unwrap().id, 8).unwrap();
        tokio::task::yield_now().await;

        // a drops off while the others finish the round
        online.store(false, Ordering::SeqCst);
        monitor.report_transport_failure();
        b.select_card(round.id, b.participant().unwrap().id, 5).unwrap();
        c.select_card(round.id, c.participant().unwrap().id, 5).unwrap();
        assert!(db.find_round_by_id(round.id).unwrap().unwrap().is_revealed());
        assert!(a.current_round().unwrap().is_selecting());
        online.store(true, Ordering::SeqCst);

        assert!(eventually(|| a.current_round().unwrap().is_revealed()).await);
        assert_eq!(monitor.status(), ConnectionStatus::Connected);
        let view = a.view();
        let stats = view.round.unwrap().statistics.unwrap();
        assert_eq!((stats.max, stats.min, stats.median), (8, 5, 5.0));
        assert!(view.roster.iter().all(|e| e.card.is_some()));

        driver.shutdown().await;
        monitor.shutdown();
        assert_eq!(flaky.subscriber_count(), 0);
    }
}
