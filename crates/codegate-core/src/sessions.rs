use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    domain::SessionId,
    errors::Error,
    security::generate_token,
    store::{Redemption, Store},
    Result,
};

const MAX_ID_ATTEMPTS: usize = 3;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session_id: SessionId,
    pub created_at: DateTime<Utc>,
    /// Code that spawned this session (audit only).
    pub access_code: String,
    pub message_count: u32,
    pub last_request_at: Option<DateTime<Utc>>,
}

/// Counter/timestamp pair the rate limiter decides on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SessionState {
    pub message_count: u32,
    pub last_request_at: Option<DateTime<Utc>>,
}

#[derive(Clone)]
pub struct SessionStore {
    store: Arc<dyn Store>,
}

impl SessionStore {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub async fn create_session(&self, access_code: &str, now: DateTime<Utc>) -> Result<SessionId> {
        for _ in 0..MAX_ID_ATTEMPTS {
            let record = new_record(access_code, now);
            let session_id = record.session_id.clone();
            if self.store.insert_session(record).await? {
                return Ok(session_id);
            }
        }

        Err(id_exhausted())
    }

    /// Consume one use of `access_code` and create its session in one store
    /// step. `None` when the code is not redeemable; nothing is written then.
    pub async fn create_for_code(
        &self,
        access_code: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<SessionId>> {
        for _ in 0..MAX_ID_ATTEMPTS {
            let record = new_record(access_code, now);
            let session_id = record.session_id.clone();
            match self.store.redeem_code(access_code, record).await? {
                Redemption::Redeemed => return Ok(Some(session_id)),
                Redemption::CodeUnavailable => return Ok(None),
                Redemption::SessionIdTaken => continue,
            }
        }

        Err(id_exhausted())
    }

    pub async fn get_session_state(&self, session_id: &SessionId) -> Result<SessionState> {
        let record = self
            .store
            .get_session(session_id)
            .await?
            .ok_or(Error::SessionNotFound)?;
        Ok(SessionState {
            message_count: record.message_count,
            last_request_at: record.last_request_at,
        })
    }

    pub async fn get(&self, session_id: &SessionId) -> Result<Option<SessionRecord>> {
        self.store.get_session(session_id).await
    }

    pub async fn reset_window(&self, session_id: &SessionId, now: DateTime<Utc>) -> Result<()> {
        if self.store.reset_session_window(session_id, now).await? {
            Ok(())
        } else {
            Err(Error::SessionNotFound)
        }
    }

    /// Returns the counter after the increment.
    pub async fn increment_and_touch(
        &self,
        session_id: &SessionId,
        now: DateTime<Utc>,
    ) -> Result<u32> {
        self.store
            .touch_session(session_id, now)
            .await?
            .ok_or(Error::SessionNotFound)
    }
}

fn new_record(access_code: &str, now: DateTime<Utc>) -> SessionRecord {
    SessionRecord {
        session_id: SessionId(generate_token()),
        created_at: now,
        access_code: access_code.to_string(),
        message_count: 0,
        last_request_at: Some(now),
    }
}

fn id_exhausted() -> Error {
    Error::Storage("could not allocate a unique session id".to_string())
}
