//! Pointroom Core Library
//!
//! Models, statistics, invariants and the SQLite entity store for
//! Pointroom estimation rooms.

pub mod error;
pub mod invariants;
pub mod models;
pub mod stats;
pub mod storage;

pub use error::{Error, Result};
pub use models::*;
pub use stats::{compute_statistics, is_unanimous};
pub use storage::{
    Database, EntityStore, ParticipantRepository, RoomRepository, RoundRepository,
    SelectionRepository,
};
