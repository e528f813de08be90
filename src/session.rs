//! Participant identity. A nickname, an admin flag, and nothing else —
//! admin is granted by matching the shared password from settings, a
//! plain string comparison by design. The session lives in the local
//! cache so a restart doesn't ask the participant to log in again.

use crate::cache::{CacheError, CacheFile};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("nickname must not be empty")]
    EmptyNickname,

    #[error("wrong admin password")]
    WrongPassword,

    #[error("cache: {0}")]
    Cache(#[from] CacheError),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub nickname: String,
    pub admin: bool,
}

impl Session {
    /// Log in with a nickname. Supplying the admin password grants the
    /// admin flag; supplying a wrong one is an error rather than a silent
    /// downgrade. The session is persisted before being returned.
    pub fn login(
        cache: &CacheFile,
        nickname: &str,
        password: Option<&str>,
        admin_password: &str,
    ) -> Result<Session, SessionError> {
        let nickname = nickname.trim();
        if nickname.is_empty() {
            return Err(SessionError::EmptyNickname);
        }

        let admin = match password {
            Some(given) if given == admin_password => true,
            Some(_) => return Err(SessionError::WrongPassword),
            None => false,
        };

        let session = Session { nickname: nickname.to_string(), admin };
        cache.store_session(&session)?;
        Ok(session)
    }

    /// Restore the persisted session, if any.
    pub fn resume(cache: &CacheFile) -> Result<Option<Session>, CacheError> {
        cache.load_session()
    }

    pub fn logout(cache: &CacheFile) -> Result<(), CacheError> {
        cache.clear_session()
    }
}

// ── Tests ──────────────────────────────────────────────────────
