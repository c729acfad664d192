//! Backing store for the gateway's relations.
//!
//! One trait, one method per atomic per-entity operation. Each call is a single
//! logical transaction; callers that need read-decide-write sequences serialize
//! them per key (see `gateway`).

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{
    codes::AccessCode,
    domain::{SessionId, UserId},
    moderation::{BannedUser, Subscription},
    sessions::SessionRecord,
    transcript::{StoreStats, TranscriptEntry},
    Result,
};

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Outcome of the combined consume-and-create step of a redemption.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Redemption {
    Redeemed,
    /// Unknown, exhausted or disabled. Nothing was written.
    CodeUnavailable,
    /// The generated session id collided. Nothing was written.
    SessionIdTaken,
}

#[async_trait]
pub trait Store: Send + Sync {
    // Access codes

    /// Returns `false` if the token is already taken.
    async fn insert_code(&self, code: AccessCode) -> Result<bool>;
    async fn get_code(&self, code: &str) -> Result<Option<AccessCode>>;
    /// Conditional increment: applies only while the code is active and under
    /// its cap. Returns whether a use was counted.
    async fn consume_code(&self, code: &str) -> Result<bool>;
    async fn recent_codes(&self, limit: usize) -> Result<Vec<AccessCode>>;
    /// Consume one use of `code` and insert `session` as one unit: either both
    /// land or neither does.
    async fn redeem_code(&self, code: &str, session: SessionRecord) -> Result<Redemption>;

    // Sessions

    /// Returns `false` if the id is already taken.
    async fn insert_session(&self, session: SessionRecord) -> Result<bool>;
    async fn get_session(&self, id: &SessionId) -> Result<Option<SessionRecord>>;
    /// `message_count = 0, last_request_at = now`. `false` for unknown ids.
    async fn reset_session_window(&self, id: &SessionId, now: DateTime<Utc>) -> Result<bool>;
    /// `message_count += 1, last_request_at = now`; returns the new count.
    async fn touch_session(&self, id: &SessionId, now: DateTime<Utc>) -> Result<Option<u32>>;

    // Bans

    async fn upsert_ban(&self, ban: BannedUser) -> Result<()>;
    /// Returns whether a row was removed.
    async fn delete_ban(&self, user_id: UserId) -> Result<bool>;
    async fn get_ban(&self, user_id: UserId) -> Result<Option<BannedUser>>;

    // Subscriptions

    async fn upsert_subscription(&self, sub: Subscription) -> Result<()>;
    async fn get_subscription(&self, user_id: UserId) -> Result<Option<Subscription>>;

    // Transcript

    async fn append_message(&self, entry: TranscriptEntry) -> Result<()>;
    async fn session_messages(&self, id: &SessionId) -> Result<Vec<TranscriptEntry>>;

    async fn stats(&self, now: DateTime<Utc>) -> Result<StoreStats>;
}
