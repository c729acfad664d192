use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::{
    codes::AccessCode,
    domain::{SessionId, UserId},
    moderation::{BannedUser, Subscription},
    sessions::SessionRecord,
    transcript::{StoreStats, TranscriptEntry},
    Result,
};

use super::{Redemption, Store};

/// Process-local store with one lock per relation. Nothing survives a restart.
///
/// Locks are taken one at a time, except in `redeem_code`, which holds `codes`
/// while taking `sessions`. No path takes them in the other order.
#[derive(Default)]
pub struct MemoryStore {
    codes: Mutex<HashMap<String, AccessCode>>,
    sessions: Mutex<HashMap<SessionId, SessionRecord>>,
    bans: Mutex<HashMap<UserId, BannedUser>>,
    subscriptions: Mutex<HashMap<UserId, Subscription>>,
    messages: Mutex<Vec<TranscriptEntry>>,
}

impl MemoryStore {
    pub fn in_memory() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn insert_code(&self, code: AccessCode) -> Result<bool> {
        let mut codes = self.codes.lock().await;
        if codes.contains_key(&code.code) {
            return Ok(false);
        }
        codes.insert(code.code.clone(), code);
        Ok(true)
    }

    async fn get_code(&self, code: &str) -> Result<Option<AccessCode>> {
        Ok(self.codes.lock().await.get(code).cloned())
    }

    async fn consume_code(&self, code: &str) -> Result<bool> {
        let mut codes = self.codes.lock().await;
        let Some(record) = codes.get_mut(code).filter(|c| c.is_redeemable()) else {
            return Ok(false);
        };
        record.used_count = record.used_count.saturating_add(1);
        Ok(true)
    }

    async fn recent_codes(&self, limit: usize) -> Result<Vec<AccessCode>> {
        let mut out: Vec<AccessCode> = self.codes.lock().await.values().cloned().collect();
        out.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| a.code.cmp(&b.code))
        });
        out.truncate(limit);
        Ok(out)
    }

    async fn redeem_code(&self, code: &str, session: SessionRecord) -> Result<Redemption> {
        let mut codes = self.codes.lock().await;
        let Some(record) = codes.get_mut(code).filter(|c| c.is_redeemable()) else {
            return Ok(Redemption::CodeUnavailable);
        };

        let mut sessions = self.sessions.lock().await;
        if sessions.contains_key(&session.session_id) {
            return Ok(Redemption::SessionIdTaken);
        }
        record.used_count = record.used_count.saturating_add(1);
        sessions.insert(session.session_id.clone(), session);
        Ok(Redemption::Redeemed)
    }

    async fn insert_session(&self, session: SessionRecord) -> Result<bool> {
        let mut sessions = self.sessions.lock().await;
        if sessions.contains_key(&session.session_id) {
            return Ok(false);
        }
        sessions.insert(session.session_id.clone(), session);
        Ok(true)
    }

    async fn get_session(&self, id: &SessionId) -> Result<Option<SessionRecord>> {
        Ok(self.sessions.lock().await.get(id).cloned())
    }

    async fn reset_session_window(&self, id: &SessionId, now: DateTime<Utc>) -> Result<bool> {
        let mut sessions = self.sessions.lock().await;
        let Some(record) = sessions.get_mut(id) else {
            return Ok(false);
        };
        record.message_count = 0;
        record.last_request_at = Some(now);
        Ok(true)
    }

    async fn touch_session(&self, id: &SessionId, now: DateTime<Utc>) -> Result<Option<u32>> {
        let mut sessions = self.sessions.lock().await;
        let Some(record) = sessions.get_mut(id) else {
            return Ok(None);
        };
        record.message_count = record.message_count.saturating_add(1);
        record.last_request_at = Some(now);
        Ok(Some(record.message_count))
    }

    async fn upsert_ban(&self, ban: BannedUser) -> Result<()> {
        self.bans.lock().await.insert(ban.user_id, ban);
        Ok(())
    }

    async fn delete_ban(&self, user_id: UserId) -> Result<bool> {
        let removed = self.bans.lock().await.remove(&user_id).is_some();
        if removed {
            }
        Ok(removed)
    }

    async fn get_ban(&self, user_id: UserId) -> Result<Option<BannedUser>> {
        Ok(self.bans.lock().await.get(&user_id).cloned())
    }

    async fn upsert_subscription(&self, sub: Subscription) -> Result<()> {
        self.subscriptions.lock().await.insert(sub.user_id, sub);
        Ok(())
    }

    async fn get_subscription(&self, user_id: UserId) -> Result<Option<Subscription>> {
        Ok(self.subscriptions.lock().await.get(&user_id).cloned())
    }

    async fn append_message(&self, entry: TranscriptEntry) -> Result<()> {
        self.messages.lock().await.push(entry);
        Ok(())
    }

    async fn session_messages(&self, id: &SessionId) -> Result<Vec<TranscriptEntry>> {
        let mut out: Vec<TranscriptEntry> = self
            .messages
            .lock()
            .await
            .iter()
            .filter(|e| &e.session_id == id)
            .cloned()
            .collect();
        out.sort_by_key(|e| e.created_at);
        Ok(out)
    }

    async fn stats(&self, now: DateTime<Utc>) -> Result<StoreStats> {
        let active_subscriptions = self
            .subscriptions
            .lock()
            .await
            .values()
            .filter(|s| s.is_active_at(now))
            .count();
        let banned_users = self.bans.lock().await.len();
        let (sessions, session_messages) = {
            let sessions = self.sessions.lock().await;
            let total = sessions.values().map(|s| u64::from(s.message_count)).sum();
            (sessions.len(), total)
        };

        Ok(StoreStats {
            active_subscriptions,
            banned_users,
            sessions,
            session_messages,
        })
    }
}
