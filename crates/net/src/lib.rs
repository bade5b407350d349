//! Pointroom Network Library
//!
//! Change delivery and transport health for Pointroom clients.
//!
//! # Architecture
//!
//! - **Protocol**: raw JSON change rows, decoded into typed events at the boundary
//! - **ChangeFeed**: per-entity, per-key subscriptions fed by the entity store
//! - **ConnectivityMonitor**: probes the store and broadcasts status transitions
//! - **JoinLink**: shareable room links
//!
//! # Usage
//!
//! ```ignore
//! let feed = Arc::new(ChangeFeed::new());
//! let db = Arc::new(Database::open(path)?.with_change_sink(feed.clone()));
//!
//! let monitor = ConnectivityMonitor::start(db.clone(), MonitorConfig::default());
//! let mut rounds = feed.subscribe(EntityKind::Round, FilterKey(room.id));
//!
//! while let Some(event) = rounds.next().await {
//!     session.apply_change(event);
//! }
//! ```

pub mod error;
pub mod feed;
pub mod invite;
pub mod monitor;
pub mod protocol;

pub use error::{Error, Result};
pub use feed::{next_or_pending, ChangeFeed, Subscription, SubscriptionId};
pub use invite::JoinLink;
pub use monitor::{
    ConnectionStatus, ConnectivityMonitor, MonitorConfig, StatusSubscription, StoreProbe,
};
pub use protocol::RawChange;

/// Base URL used for join links when none is configured
pub const DEFAULT_JOIN_BASE: &str = "http://localhost:3000";
