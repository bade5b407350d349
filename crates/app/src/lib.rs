//! Pointroom client library
//!
//! The session coordination core: a per-client state machine for one
//! estimation room, completion detection and reveal, reconciliation after
//! reconnect, and the async driver that wires it to the change feed and
//! the connectivity monitor.

pub mod completion;
pub mod config;
pub mod driver;
pub mod identity;
pub mod session;
pub mod view;

pub use completion::{check_all_selected, CompletionCheck};
pub use config::{ClientConfig, ConfigError};
pub use driver::SessionDriver;
pub use identity::{AnonymousIdentity, FixedIdentity, IdentityProvider, NoIdentity};
pub use session::{ChangeOutcome, SelectOutcome, Session};
pub use view::{RosterEntry, RoundView, SessionView};
