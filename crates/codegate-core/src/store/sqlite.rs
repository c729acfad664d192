//! SQLite-backed store.
//!
//! Every trait method is one statement (or one transaction for redemption), so a
//! failed write never leaves a partial change behind. Timestamps are stored as
//! unix microseconds and compared numerically.

use std::{path::Path, time::Duration};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions},
    FromRow,
};

use crate::{
    codes::{AccessCode, UsageLimit},
    domain::{SessionId, UserId},
    errors::Error,
    moderation::{BannedUser, Subscription},
    sessions::SessionRecord,
    transcript::{StoreStats, TranscriptEntry},
    Result,
};

use super::{Redemption, Store};

const MAX_CONNECTIONS: u32 = 8;
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Column list for `access_codes` SELECT queries.
const CODE_COLUMNS: &str = "code, created_by, created_at, used_count, max_uses, active";

/// Column list for `sessions` SELECT queries.
const SESSION_COLUMNS: &str =
    "session_id, created_at, access_code, message_count, last_request_at";

/// Conditional increment; matches no row once the code is spent or disabled.
const CONSUME_SQL: &str = "\
    UPDATE access_codes SET used_count = used_count + 1 \
    WHERE code = ? AND active = 1 AND (max_uses = -1 OR used_count < max_uses)";

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `path` and apply migrations.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(BUSY_TIMEOUT);

        let pool = SqlitePoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .connect_with(options)
            .await?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| Error::Storage(format!("migrations failed: {e}")))?;

        tracing::info!(path = %path.display(), "store opened");
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

// ── Row mapping ─────────────────────────────────────────────────────────

#[derive(FromRow)]
struct CodeRow {
    code: String,
    created_by: i64,
    created_at: i64,
    used_count: i64,
    max_uses: i64,
    active: bool,
}

impl TryFrom<CodeRow> for AccessCode {
    type Error = Error;

    fn try_from(r: CodeRow) -> Result<Self> {
        Ok(AccessCode {
            code: r.code,
            created_by: UserId(r.created_by),
            created_at: from_micros(r.created_at)?,
            used_count: to_u32(r.used_count)?,
            max_uses: UsageLimit::try_from(r.max_uses).map_err(Error::Storage)?,
            active: r.active,
        })
    }
}

#[derive(FromRow)]
struct SessionRow {
    session_id: String,
    created_at: i64,
    access_code: String,
    message_count: i64,
    last_request_at: Option<i64>,
}

impl TryFrom<SessionRow> for SessionRecord {
    type Error = Error;

    fn try_from(r: SessionRow) -> Result<Self> {
        Ok(SessionRecord {
            session_id: SessionId(r.session_id),
            created_at: from_micros(r.created_at)?,
            access_code: r.access_code,
            message_count: to_u32(r.message_count)?,
            last_request_at: r.last_request_at.map(from_micros).transpose()?,
        })
    }
}

#[derive(FromRow)]
struct MessageRow {
    session_id: String,
    message: String,
    response: String,
    created_at: i64,
}

fn to_micros(t: DateTime<Utc>) -> i64 {
    t.timestamp_micros()
}

fn from_micros(v: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_micros(v)
        .ok_or_else(|| Error::Storage(format!("timestamp out of range: {v}")))
}

fn to_u32(v: i64) -> Result<u32> {
    u32::try_from(v).map_err(|_| Error::Storage(format!("counter out of range: {v}")))
}

fn to_count(v: i64) -> usize {
    usize::try_from(v).unwrap_or(0)
}

#[async_trait]
impl Store for SqliteStore {
    async fn insert_code(&self, code: AccessCode) -> Result<bool> {
        let res = sqlx::query(
            "INSERT INTO access_codes (code, created_by, created_at, used_count, max_uses, active) \
             VALUES (?, ?, ?, ?, ?, ?) ON CONFLICT (code) DO NOTHING",
        )
        .bind(&code.code)
        .bind(code.created_by.0)
        .bind(to_micros(code.created_at))
        .bind(i64::from(code.used_count))
        .bind(i64::from(code.max_uses))
        .bind(code.active)
        .execute(&self.pool)
        .await?;
        Ok(res.rows_affected() == 1)
    }

    async fn get_code(&self, code: &str) -> Result<Option<AccessCode>> {
        let query = format!("SELECT {CODE_COLUMNS} FROM access_codes WHERE code = ?");
        sqlx::query_as::<_, CodeRow>(&query)
            .bind(code)
            .fetch_optional(&self.pool)
            .await?
            .map(AccessCode::try_from)
            .transpose()
    }

    async fn consume_code(&self, code: &str) -> Result<bool> {
        let res = sqlx::query(CONSUME_SQL)
            .bind(code)
            .execute(&self.pool)
            .await?;
        Ok(res.rows_affected() == 1)
    }

    async fn recent_codes(&self, limit: usize) -> Result<Vec<AccessCode>> {
        let query = format!(
            "SELECT {CODE_COLUMNS} FROM access_codes \
             ORDER BY created_at DESC, code ASC LIMIT ?"
        );
        sqlx::query_as::<_, CodeRow>(&query)
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(AccessCode::try_from)
            .collect()
    }

    async fn redeem_code(&self, code: &str, session: SessionRecord) -> Result<Redemption> {
        // The first statement is a write, so the transaction takes the write
        // lock up front and never has to upgrade from a read.
        let mut tx = self.pool.begin().await?;

        let consumed = sqlx::query(CONSUME_SQL)
            .bind(code)
            .execute(&mut *tx)
            .await?
            .rows_affected()
            == 1;
        if !consumed {
            tx.rollback().await?;
            return Ok(Redemption::CodeUnavailable);
        }

        let inserted = sqlx::query(
            "INSERT INTO sessions (session_id, created_at, access_code, message_count, last_request_at) \
             VALUES (?, ?, ?, ?, ?) ON CONFLICT (session_id) DO NOTHING",
        )
        .bind(session.session_id.as_str())
        .bind(to_micros(session.created_at))
        .bind(&session.access_code)
        .bind(i64::from(session.message_count))
        .bind(session.last_request_at.map(to_micros))
        .execute(&mut *tx)
        .await?
        .rows_affected()
            == 1;
        if !inserted {
            tx.rollback().await?;
            return Ok(Redemption::SessionIdTaken);
        }

        tx.commit().await?;
        Ok(Redemption::Redeemed)
    }

    async fn insert_session(&self, session: SessionRecord) -> Result<bool> {
        let res = sqlx::query(
            "INSERT INTO sessions (session_id, created_at, access_code, message_count, last_request_at) \
             VALUES (?, ?, ?, ?, ?) ON CONFLICT (session_id) DO NOTHING",
        )
        .bind(session.session_id.as_str())
        .bind(to_micros(session.created_at))
        .bind(&session.access_code)
        .bind(i64::from(session.message_count))
        .bind(session.last_request_at.map(to_micros))
        .execute(&self.pool)
        .await?;
        Ok(res.rows_affected() == 1)
    }

    async fn get_session(&self, id: &SessionId) -> Result<Option<SessionRecord>> {
        let query = format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE session_id = ?");
        sqlx::query_as::<_, SessionRow>(&query)
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await?
            .map(SessionRecord::try_from)
            .transpose()
    }

    async fn reset_session_window(&self, id: &SessionId, now: DateTime<Utc>) -> Result<bool> {
        let res = sqlx::query(
            "UPDATE sessions SET message_count = 0, last_request_at = ? WHERE session_id = ?",
        )
        .bind(to_micros(now))
        .bind(id.as_str())
        .execute(&self.pool)
        .await?;
        Ok(res.rows_affected() == 1)
    }

    async fn touch_session(&self, id: &SessionId, now: DateTime<Utc>) -> Result<Option<u32>> {
        sqlx::query_scalar::<_, i64>(
            "UPDATE sessions SET message_count = message_count + 1, last_request_at = ? \
             WHERE session_id = ? RETURNING message_count",
        )
        .bind(to_micros(now))
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await?
        .map(to_u32)
        .transpose()
    }

    async fn upsert_ban(&self, ban: BannedUser) -> Result<()> {
        sqlx::query(
            "INSERT INTO banned_users (user_id, reason, banned_at) VALUES (?, ?, ?) \
             ON CONFLICT (user_id) DO UPDATE SET reason = excluded.reason, banned_at = excluded.banned_at",
        )
        .bind(ban.user_id.0)
        .bind(&ban.reason)
        .bind(to_micros(ban.banned_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_ban(&self, user_id: UserId) -> Result<bool> {
        let res = sqlx::query("DELETE FROM banned_users WHERE user_id = ?")
            .bind(user_id.0)
            .execute(&self.pool)
            .await?;
        Ok(res.rows_affected() == 1)
    }

    async fn get_ban(&self, user_id: UserId) -> Result<Option<BannedUser>> {
        let row = sqlx::query_as::<_, (String, i64)>(
            "SELECT reason, banned_at FROM banned_users WHERE user_id = ?",
        )
        .bind(user_id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|(reason, banned_at)| {
            Ok(BannedUser {
                user_id,
                reason,
                banned_at: from_micros(banned_at)?,
            })
        })
        .transpose()
    }

    async fn upsert_subscription(&self, sub: Subscription) -> Result<()> {
        sqlx::query(
            "INSERT INTO subscriptions (user_id, subscribed_at, expires_at) VALUES (?, ?, ?) \
             ON CONFLICT (user_id) DO UPDATE SET \
             subscribed_at = excluded.subscribed_at, expires_at = excluded.expires_at",
        )
        .bind(sub.user_id.0)
        .bind(to_micros(sub.subscribed_at))
        .bind(to_micros(sub.expires_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_subscription(&self, user_id: UserId) -> Result<Option<Subscription>> {
        let row = sqlx::query_as::<_, (i64, i64)>(
            "SELECT subscribed_at, expires_at FROM subscriptions WHERE user_id = ?",
        )
        .bind(user_id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|(subscribed_at, expires_at)| {
            Ok(Subscription {
                user_id,
                subscribed_at: from_micros(subscribed_at)?,
                expires_at: from_micros(expires_at)?,
            })
        })
        .transpose()
    }

    async fn append_message(&self, entry: TranscriptEntry) -> Result<()> {
        sqlx::query(
            "INSERT INTO messages (session_id, message, response, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(entry.session_id.as_str())
        .bind(&entry.message)
        .bind(&entry.response)
        .bind(to_micros(entry.created_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn session_messages(&self, id: &SessionId) -> Result<Vec<TranscriptEntry>> {
        let rows = sqlx::query_as::<_, MessageRow>(
            "SELECT session_id, message, response, created_at FROM messages \
             WHERE session_id = ? ORDER BY created_at ASC, id ASC",
        )
        .bind(id.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|r| {
                Ok(TranscriptEntry {
                    session_id: SessionId(r.session_id),
                    message: r.message,
                    response: r.response,
                    created_at: from_micros(r.created_at)?,
                })
            })
            .collect()
    }

    async fn stats(&self, now: DateTime<Utc>) -> Result<StoreStats> {
        let (active, banned, sessions, messages) = sqlx::query_as::<_, (i64, i64, i64, i64)>(
            "SELECT \
               (SELECT COUNT(*) FROM subscriptions WHERE expires_at > ?), \
               (SELECT COUNT(*) FROM banned_users), \
               (SELECT COUNT(*) FROM sessions), \
               (SELECT COALESCE(SUM(message_count), 0) FROM sessions)",
        )
        .bind(to_micros(now))
        .fetch_one(&self.pool)
        .await?;

        Ok(StoreStats {
            active_subscriptions: to_count(active),
            banned_users: to_count(banned),
            sessions: to_count(sessions),
            session_messages: u64::try_from(messages).unwrap_or(0),
        })
    }
}
