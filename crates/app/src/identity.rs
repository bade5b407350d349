//! Client identity
//!
//! A session id is the opaque identity a participant row is keyed on.
//! Rejoining a room with the same id reactivates the existing participant.

use std::sync::OnceLock;

use pointroom_core::{Error, Result};
use tracing::debug;
use uuid::Uuid;

/// Issues the identity this client acts as
pub trait IdentityProvider: Send + Sync {
    fn session_id(&self) -> Result<Uuid>;
}

/// Anonymous identity, minted on first use and stable for the process
#[derive(Debug, Default)]
pub struct AnonymousIdentity {
    id: OnceLock<Uuid>,
}

impl AnonymousIdentity {
    pub fn new() -> Self {
        Self::default()
    }
}

impl IdentityProvider for AnonymousIdentity {
    fn session_id(&self) -> Result<Uuid> {
        Ok(*self.id.get_or_init(|| {
            let id = Uuid::new_v4();
            debug!(session_id = %id, "Anonymous identity issued");
            id
        }))
    }
}

/// A known identity, e.g. restored from disk
#[derive(Debug, Clone, Copy)]
pub struct FixedIdentity(pub Uuid);

impl IdentityProvider for FixedIdentity {
    fn session_id(&self) -> Result<Uuid> {
        Ok(self.0)
    }
}

/// No identity could be established
#[derive(Debug, Clone, Copy, Default)]
pub struct NoIdentity;

impl IdentityProvider for NoIdentity {
    fn session_id(&self) -> Result<Uuid> {
        Err(Error::Authentication("no session identity available".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_anonymous_identity_is_stable() {
        let identity = AnonymousIdentity::new();
        assert_eq!(identity.session_id().unwrap(), identity.session_id().unwrap());
        assert_ne!(
            identity.session_id().unwrap(),
            AnonymousIdentity::new().session_id().unwrap()
        );
    }

    #[test]
    fn test_missing_identity() {
        assert!(matches!(NoIdentity.session_id(), Err(Error::Authentication(_))));
    }
}
