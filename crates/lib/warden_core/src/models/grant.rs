//! Persisted grant model (operational store).

use chrono::{DateTime, Utc};

/// A refresh token or other long-lived grant issued to a client.
///
/// Owned by the protocol engine. Warden only reads it to decide whether a
/// client still has a live session.
#[derive(Debug, Clone)]
pub struct PersistedGrant {
    pub key: String,
    pub grant_type: String,
    pub subject_id: Option<String>,
    pub client_id: String,
    pub creation_time: DateTime<Utc>,
    /// `None` means the grant does not expire by this mechanism.
    pub expiration: Option<DateTime<Utc>>,
}

impl PersistedGrant {
    /// Whether the grant still counts as live at `now`.
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        match self.expiration {
            None => true,
            Some(expiration) => expiration > now,
        }
    }
}
