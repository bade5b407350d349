//! Participant model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

/// Maximum display name length, in characters
pub const MAX_DISPLAY_NAME_LEN: usize = 50;

/// One identity bound to a room
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub id: Uuid,
    pub room_id: Uuid,
    /// Opaque identity correlating a client session to this participant
    pub session_id: Uuid,
    pub display_name: String,
    /// False once the participant has soft-departed
    pub is_active: bool,
    pub is_owner: bool,
    pub created_at: DateTime<Utc>,
}

impl Participant {
    /// Build a new, active, non-owner participant. Ownership is decided by the store.
    pub fn new(room_id: Uuid, session_id: Uuid, display_name: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            room_id,
            session_id,
            display_name,
            is_active: true,
            is_owner: false,
            created_at: Utc::now(),
        }
    }
}

/// Trim and validate a display name
pub fn validate_display_name(name: &str) -> Result<String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(Error::Validation("display name is empty".into()));
    }
    if trimmed.chars().count() > MAX_DISPLAY_NAME_LEN {
        return Err(Error::Validation(format!(
            "display name exceeds {} characters",
            MAX_DISPLAY_NAME_LEN
        )));
    }
    Ok(trimmed.to_string())
}
