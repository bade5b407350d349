//! Connectivity monitor
//!
//! Tracks transport health for the whole process. While not connected it
//! probes the store on a fixed interval; a network failure schedules one
//! retry after a fixed delay. Status transitions are broadcast to every
//! subscriber in order.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use pointroom_core::RoomRepository;
use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Transport health as seen by this process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Connected,
    Connecting,
    Disconnected,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionStatus::Connected => "connected",
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::Disconnected => "disconnected",
        };
        write!(f, "{}", s)
    }
}

/// Something cheap the monitor can ask "are you there?"
pub trait StoreProbe: Send + Sync {
    fn ping(&self) -> pointroom_core::Result<()>;
}

impl<T> StoreProbe for T
where
    T: RoomRepository + Send + Sync,
{
    fn ping(&self) -> pointroom_core::Result<()> {
        self.probe()
    }
}

/// Monitor timing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorConfig {
    /// How often to probe while not connected
    pub check_interval: Duration,
    /// Delay before the single retry after a network failure
    pub retry_delay: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(5),
            retry_delay: Duration::from_secs(2),
        }
    }
}

/// Receives status transitions
pub struct StatusSubscription {
    id: u64,
    rx: mpsc::UnboundedReceiver<ConnectionStatus>,
}

impl StatusSubscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Next transition. `None` after unsubscribe or shutdown.
    pub async fn next(&mut self) -> Option<ConnectionStatus> {
        self.rx.recv().await
    }

    pub fn try_next(&mut self) -> Option<ConnectionStatus> {
        self.rx.try_recv().ok()
    }
}

struct Listener {
    id: u64,
    tx: mpsc::UnboundedSender<ConnectionStatus>,
}

struct MonitorState {
    status: ConnectionStatus,
    next_listener_id: u64,
    listeners: Vec<Listener>,
    retry: Option<JoinHandle<()>>,
    ticker: Option<JoinHandle<()>>,
    shut_down: bool,
}

struct MonitorInner {
    probe: Arc<dyn StoreProbe>,
    config: MonitorConfig,
    runtime: Handle,
    state: Mutex<MonitorState>,
}

impl MonitorInner {
    fn lock(&self) -> MutexGuard<'_, MonitorState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Cloneable handle to the process-wide monitor
#[derive(Clone)]
pub struct ConnectivityMonitor {
    inner: Arc<MonitorInner>,
}

impl ConnectivityMonitor {
    /// Start monitoring. Must be called from within a tokio runtime.
    pub fn start(probe: Arc<dyn StoreProbe>, config: MonitorConfig) -> Self {
        let inner = Arc::new(MonitorInner {
            probe,
            config,
            runtime: Handle::current(),
            state: Mutex::new(MonitorState {
                status: ConnectionStatus::Connected,
                next_listener_id: 1,
                listeners: Vec::new(),
                retry: None,
                ticker: None,
                shut_down: false,
            }),
        });

        let ticker = inner.runtime.spawn(run_ticker(
            Arc::downgrade(&inner),
            config.check_interval,
        ));
        inner.lock().ticker = Some(ticker);

        info!(
            check_interval_ms = config.check_interval.as_millis() as u64,
            retry_delay_ms = config.retry_delay.as_millis() as u64,
            "Connectivity monitor started"
        );
        Self { inner }
    }

    /// Current status
    pub fn status(&self) -> ConnectionStatus {
        self.inner.lock().status
    }

    /// Receive every subsequent status transition
    pub fn subscribe(&self) -> StatusSubscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.inner.lock();
        let id = state.next_listener_id;
        state.next_listener_id += 1;
        if !state.shut_down {
            state.listeners.push(Listener { id, tx });
        }
        StatusSubscription { id, rx }
    }

    /// Stop delivering to one subscriber
    pub fn unsubscribe(&self, id: u64) -> bool {
        let mut state = self.inner.lock();
        let before = state.listeners.len();
        state.listeners.retain(|l| l.id != id);
        state.listeners.len() != before
    }

    /// Probe the store unless already connected
    pub fn check_connection(&self) {
        {
            let state = self.inner.lock();
            if state.shut_down || state.status == ConnectionStatus::Connected {
                return;
            }
        }

        match self.inner.probe.ping() {
            Ok(()) => self.set_status(ConnectionStatus::Connected),
            Err(e) if e.is_network() => {
                warn!(error = %e, "Store probe failed");
                self.set_status(ConnectionStatus::Disconnected);
                self.schedule_retry();
            }
            Err(e) => {
                debug!(error = %e, "Store probe failed without a network cause");
            }
        }
    }

    /// Called by anyone who saw a network-classified store error
    pub fn report_transport_failure(&self) {
        if self.inner.lock().shut_down {
            return;
        }
        warn!("Transport failure reported");
        self.set_status(ConnectionStatus::Disconnected);
        self.schedule_retry();
    }

    /// Cancel timers and end every subscription
    pub fn shutdown(&self) {
        let mut state = self.inner.lock();
        if state.shut_down {
            return;
        }
        state.shut_down = true;
        if let Some(retry) = state.retry.take() {
            retry.abort();
        }
        if let Some(ticker) = state.ticker.take() {
            ticker.abort();
        }
        state.listeners.clear();
        info!("Connectivity monitor shut down");
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.lock().shut_down
    }

    fn set_status(&self, status: ConnectionStatus) {
        let mut state = self.inner.lock();
        if state.status == status {
            return;
        }
        let previous = std::mem::replace(&mut state.status, status);
        info!(from = %previous, to = %status, "Connection status changed");
        state.listeners.retain(|l| l.tx.send(status).is_ok());
    }

    /// Connecting until the single pending retry fires; a retry already
    /// waiting is left alone
    fn schedule_retry(&self) {
        {
            let mut state = self.inner.lock();
            if state.shut_down {
                return;
            }
            if state.retry.is_none() {
                let weak = Arc::downgrade(&self.inner);
                let delay = self.inner.config.retry_delay;
                state.retry = Some(self.inner.runtime.spawn(async move {
                    tokio::time::sleep(delay).await;
                    if let Some(inner) = weak.upgrade() {
                        inner.lock().retry = None;
                        ConnectivityMonitor { inner }.check_connection();
                    }
                }));
                debug!(
                    delay_ms = delay.as_millis() as u64,
                    "Retry scheduled"
                );
            }
        }
        self.set_status(ConnectionStatus::Connecting);
    }
}

async fn run_ticker(weak: Weak<MonitorInner>, period: Duration) {
    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        interval.tick().await;
        let Some(inner) = weak.upgrade() else {
            break;
        };
        ConnectivityMonitor { inner }.check_connection();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pointroom_core::{Database, Error as CoreError};
    use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};

    const ONLINE: u8 = 0;
    const OFFLINE: u8 = 1;
    const BROKEN: u8 = 2;

    struct FakeProbe {
        mode: AtomicU8,
        calls: AtomicUsize,
    }

    impl FakeProbe {
        fn new(mode: u8) -> Arc<Self> {
            Arc::new(Self {
                mode: AtomicU8::new(mode),
                calls: AtomicUsize::new(0),
            })
        }

        fn set(&self, mode: u8) {
            self.mode.store(mode, Ordering::SeqCst);
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl StoreProbe for FakeProbe {
        fn ping(&self) -> pointroom_core::Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.mode.load(Ordering::SeqCst) {
                ONLINE => Ok(()),
                OFFLINE => Err(CoreError::Unreachable("no route".into())),
                _ => Err(CoreError::Persistence("permission denied".into())),
            }
        }
    }

    use ConnectionStatus::*;

    #[tokio::test(start_paused = true)]
    async fn test_connected_monitor_does_not_probe() {
        let probe = FakeProbe::new(OFFLINE);
        let monitor = ConnectivityMonitor::start(probe.clone(), MonitorConfig::default());

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(monitor.status(), Connected);
        assert_eq!(probe.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_retries_until_recovered() {
        let probe = FakeProbe::new(OFFLINE);
        let monitor = ConnectivityMonitor::start(probe.clone(), MonitorConfig::default());
        let mut sub = monitor.subscribe();

        monitor.report_transport_failure();
        assert_eq!(sub.next().await, Some(Disconnected));
        assert_eq!(sub.next().await, Some(Connecting));

        // First retry at 2s still fails and schedules another
        assert_eq!(sub.next().await, Some(Disconnected));
        assert_eq!(sub.next().await, Some(Connecting));
        assert_eq!(probe.calls(), 1);

        probe.set(ONLINE);
        assert_eq!(sub.next().await, Some(Connected));
        assert_eq!(probe.calls(), 2);
        assert_eq!(monitor.status(), Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_outstanding_retry() {
        let probe = FakeProbe::new(OFFLINE);
        let monitor = ConnectivityMonitor::start(probe.clone(), MonitorConfig::default());

        monitor.report_transport_failure();
        monitor.report_transport_failure();
        monitor.report_transport_failure();
        probe.set(ONLINE);

        tokio::time::sleep(Duration::from_millis(2500)).await;
        assert_eq!(probe.calls(), 1);
        assert_eq!(monitor.status(), Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_interval_probe_recovers() {
        let probe = FakeProbe::new(OFFLINE);
        let config = MonitorConfig {
            check_interval: Duration::from_secs(5),
            retry_delay: Duration::from_secs(60),
        };
        let monitor = ConnectivityMonitor::start(probe.clone(), config);

        monitor.report_transport_failure();
        probe.set(ONLINE);
        tokio::time::sleep(Duration::from_secs(6)).await;

        assert_eq!(probe.calls(), 1);
        assert_eq!(monitor.status(), Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_check_with_pending_retry_stays_connecting() {
        let probe = FakeProbe::new(OFFLINE);
        let config = MonitorConfig {
            check_interval: Duration::from_secs(5),
            retry_delay: Duration::from_secs(60),
        };
        let monitor = ConnectivityMonitor::start(probe.clone(), config);
        let mut sub = monitor.subscribe();

        monitor.report_transport_failure();
        assert_eq!(sub.next().await, Some(Disconnected));
        assert_eq!(sub.next().await, Some(Connecting));

        // Interval check at 5s fails while the 60s retry is still waiting
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(probe.calls(), 1);
        assert_eq!(sub.try_next(), Some(Disconnected));
        assert_eq!(sub.try_next(), Some(Connecting));
        assert_eq!(monitor.status(), Connecting);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_network_failure_keeps_status() {
        let probe = FakeProbe::new(OFFLINE);
        let monitor = ConnectivityMonitor::start(probe.clone(), MonitorConfig::default());
        let mut sub = monitor.subscribe();

        monitor.report_transport_failure();
        assert_eq!(sub.next().await, Some(Disconnected));
        assert_eq!(sub.next().await, Some(Connecting));

        probe.set(BROKEN);
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(probe.calls(), 1);
        assert_eq!(monitor.status(), Connecting);
        assert!(sub.try_next().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unsubscribe_is_isolated() {
        let probe = FakeProbe::new(OFFLINE);
        let monitor = ConnectivityMonitor::start(probe.clone(), MonitorConfig::default());
        let mut a = monitor.subscribe();
        let mut b = monitor.subscribe();

        assert!(monitor.unsubscribe(a.id()));
        monitor.report_transport_failure();

        assert_eq!(b.next().await, Some(Disconnected));
        assert_eq!(a.next().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_everything() {
        let probe = FakeProbe::new(OFFLINE);
        let monitor = ConnectivityMonitor::start(probe.clone(), MonitorConfig::default());
        let mut sub = monitor.subscribe();

        monitor.report_transport_failure();
        monitor.shutdown();
        assert!(monitor.is_shut_down());

        // Already-queued transitions drain, then the stream ends
        assert_eq!(sub.next().await, Some(Disconnected));
        assert_eq!(sub.next().await, Some(Connecting));
        assert_eq!(sub.next().await, None);

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(probe.calls(), 0);
        monitor.report_transport_failure();
        assert_eq!(monitor.status(), Connecting);
    }

    #[tokio::test(start_paused = true)]
    async fn test_probes_database_reachability() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let monitor = ConnectivityMonitor::start(db.clone(), MonitorConfig::default());
        let mut sub = monitor.subscribe();

        db.set_reachable(false);
        monitor.report_transport_failure();
        assert_eq!(sub.next().await, Some(Disconnected));
        assert_eq!(sub.next().await, Some(Connecting));

        db.set_reachable(true);
        assert_eq!(sub.next().await, Some(Connected));
    }
}
