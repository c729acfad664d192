//! Access Gateway: the only entry point external collaborators use for
//! redemption and per-message admission.

use std::{collections::HashMap, hash::Hash, sync::Arc};

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::{
    codes::CodeRegistry,
    domain::{SessionId, UserId},
    errors::Error,
    moderation::{BanRegistry, SubscriptionRegistry},
    rate_limit::{Decision, RateLimitPolicy},
    security::{self, fingerprint},
    sessions::SessionStore,
    store::Store,
    transcript::TranscriptLog,
    Result,
};

/// Explicit gateway configuration (no process-wide state).
#[derive(Clone, Debug)]
pub struct GatewayConfig {
    pub admin_user_ids: Vec<i64>,
    pub api_secret: String,
    pub rate_limit: RateLimitPolicy,
}

/// Outcome of a successful `admit_request`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Admission {
    /// Counter after this request was counted.
    pub message_count: u32,
    pub remaining: u32,
    pub window_reset: bool,
}

/// One async mutex per key, created on demand. Distinct keys never contend.
pub struct KeyedLocks<K> {
    inner: Mutex<HashMap<K, Arc<Mutex<()>>>>,
}

impl<K> Default for KeyedLocks<K> {
    fn default() -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
        }
    }
}

impl<K: Eq + Hash + Clone> KeyedLocks<K> {
    pub async fn lock(&self, key: &K) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.inner.lock().await;
            // Entries nobody holds or waits on are only the map's own reference.
            map.retain(|_, l| Arc::strong_count(l) > 1);
            map.entry(key.clone())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }

    /// Number of keys currently tracked.
    pub async fn tracked(&self) -> usize {
        self.inner.lock().await.len()
    }
}

pub struct Gateway {
    cfg: GatewayConfig,
    codes: CodeRegistry,
    sessions: SessionStore,
    bans: BanRegistry,
    subscriptions: SubscriptionRegistry,
    transcripts: TranscriptLog,
    code_locks: KeyedLocks<String>,
    session_locks: KeyedLocks<SessionId>,
}

impl Gateway {
    pub fn new(store: Arc<dyn Store>, cfg: GatewayConfig) -> Self {
        Self {
            cfg,
            codes: CodeRegistry::new(store.clone()),
            sessions: SessionStore::new(store.clone()),
            bans: BanRegistry::new(store.clone()),
            subscriptions: SubscriptionRegistry::new(store.clone()),
            transcripts: TranscriptLog::new(store),
            code_locks: KeyedLocks::default(),
            session_locks: KeyedLocks::default(),
        }
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.cfg
    }

    pub fn codes(&self) -> &CodeRegistry {
        &self.codes
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    pub fn bans(&self) -> &BanRegistry {
        &self.bans
    }

    pub fn subscriptions(&self) -> &SubscriptionRegistry {
        &self.subscriptions
    }

    pub fn transcripts(&self) -> &TranscriptLog {
        &self.transcripts
    }

    pub fn is_admin(&self, user_id: UserId) -> bool {
        security::is_admin(Some(user_id), &self.cfg.admin_user_ids)
    }

    pub fn verify_api_key(&self, presented: Option<&str>) -> bool {
        security::verify_api_key(presented, &self.cfg.api_secret)
    }

    pub async fn redeem_code(&self, code: &str) -> Result<SessionId> {
        self.redeem_code_at(code, Utc::now()).await
    }

    /// Verify, then consume and create the session in one store step,
    /// serialized per code.
    ///
    /// Every rejection is `Error::InvalidCode`, whatever the cause. A storage
    /// failure leaves neither a spent use nor a session behind.
    pub async fn redeem_code_at(&self, code: &str, now: DateTime<Utc>) -> Result<SessionId> {
        let code = code.trim();
        if code.is_empty() {
            return Err(Error::InvalidCode);
        }

        // Cheap pre-check keeps lock entries to codes that actually exist.
        if !self.codes.verify_code(code).await? {
            tracing::info!(code = %fingerprint(code), "redemption rejected");
            return Err(Error::InvalidCode);
        }

        let _guard = self.code_locks.lock(&code.to_string()).await;

        let Some(session_id) = self.sessions.create_for_code(code, now).await? else {
            tracing::info!(code = %fingerprint(code), "redemption rejected");
            return Err(Error::InvalidCode);
        };

        tracing::info!(
            code = %fingerprint(code),
            session = %fingerprint(session_id.as_str()),
            "code redeemed"
        );
        Ok(session_id)
    }

    pub async fn admit_request(&self, session_id: &SessionId) -> Result<Admission> {
        self.admit_request_at(session_id, Utc::now()).await
    }

    /// Rate-check and count one request, serialized per session.
    ///
    /// A rejected request leaves the session untouched.
    pub async fn admit_request_at(
        &self,
        session_id: &SessionId,
        now: DateTime<Utc>,
    ) -> Result<Admission> {
        if self.sessions.get(session_id).await?.is_none() {
            return Err(Error::SessionNotFound);
        }

        let _guard = self.session_locks.lock(session_id).await;

        let state = self.sessions.get_session_state(session_id).await?;
        let policy = &self.cfg.rate_limit;

        let window_reset = match policy.decide(state.message_count, state.last_request_at, now) {
            Decision::Reject => {
                tracing::info!(
                    session = %fingerprint(session_id.as_str()),
                    count = state.message_count,
                    "request rate limited"
                );
                return Err(Error::RateLimited);
            }
            Decision::Reset => {
                self.sessions.reset_window(session_id, now).await?;
                tracing::debug!(session = %fingerprint(session_id.as_str()), "rate window reset");
                true
            }
            Decision::Admit => false,
        };

        let message_count = self.sessions.increment_and_touch(session_id, now).await?;
        Ok(Admission {
            message_count,
            remaining: policy.remaining(message_count),
            window_reset,
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeDelta;

    use super::*;
    use crate::{
        codes::{AccessCode, UsageLimit},
        store::{MemoryStore, SqliteStore},
    };

    fn gateway() -> Arc<Gateway> {
        Arc::new(Gateway::new(
            Arc::new(MemoryStore::in_memory()),
            GatewayConfig {
                admin_user_ids: vec![100],
                api_secret: "secret".to_string(),
                rate_limit: RateLimitPolicy::default(),
            },
        ))
    }

    async fn session_with_history(
        gw: &Gateway,
        count: u32,
        at: DateTime<Utc>,
    ) -> SessionId {
        let code = gw.codes().create_code(UserId(100), 0).await.unwrap();
        let id = gw.redeem_code_at(&code.code, at).await.unwrap();
        for _ in 0..count {
            gw.admit_request_at(&id, at).await.unwrap();
        }
        id
    }

    #[tokio::test]
    async fn end_to_end_single_use_code() {
        let gw = gateway();
        let code = gw.codes().create_code(UserId(100), 1).await.unwrap();

        let s1 = gw.redeem_code(&code.code).await.unwrap();
        assert_eq!(
            gw.codes().get(&code.code).await.unwrap().unwrap().used_count,
            1
        );
        assert!(matches!(
            gw.redeem_code(&code.code).await,
            Err(Error::InvalidCode)
        ));

        let now = Utc::now();
        for i in 1..=20 {
            let a = gw.admit_request_at(&s1, now).await.unwrap();
            assert_eq!(a.message_count, i);
        }
        assert!(matches!(
            gw.admit_request_at(&s1, now).await,
            Err(Error::RateLimited)
        ));
    }

    #[tokio::test]
    async fn invalid_code_hides_the_cause() {
        let gw = gateway();
        let code = gw.codes().create_code(UserId(100), 1).await.unwrap();
        gw.redeem_code(&code.code).await.unwrap();

        let exhausted = gw.redeem_code(&code.code).await.unwrap_err();
        let unknown = gw.redeem_code("no-such-code").await.unwrap_err();
        let blank = gw.redeem_code("   ").await.unwrap_err();
        assert_eq!(exhausted.to_string(), unknown.to_string());
        assert_eq!(exhausted.kind(), unknown.kind());
        assert_eq!(blank.kind(), unknown.kind());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_redemptions_never_exceed_cap() {
        let gw = gateway();
        let code = gw.codes().create_code(UserId(100), 3).await.unwrap();

        let mut tasks = Vec::new();
        for _ in 0..24 {
            let gw = gw.clone();
            let c = code.code.clone();
            tasks.push(tokio::spawn(async move { gw.redeem_code(&c).await }));
        }

        let mut ok = 0;
        let mut invalid = 0;
        for t in tasks {
            match t.await.unwrap() {
                Ok(_) => ok += 1,
                Err(Error::InvalidCode) => invalid += 1,
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
        assert_eq!(ok, 3);
        assert_eq!(invalid, 21);
        assert_eq!(
            gw.codes().get(&code.code).await.unwrap().unwrap().used_count,
            3
        );
    }

    #[tokio::test]
    async fn unlimited_code_counts_every_redemption() {
        let gw = gateway();
        let code = gw.codes().create_code(UserId(100), 0).await.unwrap();
        assert_eq!(code.max_uses, UsageLimit::Unlimited);

        let mut ids = Vec::new();
        for _ in 0..10 {
            ids.push(gw.redeem_code(&code.code).await.unwrap());
        }
        ids.sort_by(|a, b| a.0.cmp(&b.0));
        ids.dedup();
        assert_eq!(ids.len(), 10);
        assert_eq!(
            gw.codes().get(&code.code).await.unwrap().unwrap().used_count,
            10
        );
    }

    #[tokio::test]
    async fn window_boundary_admits_twentieth_then_rejects() {
        let gw = gateway();
        let now = Utc::now();
        let id = session_with_history(&gw, 19, now - TimeDelta::minutes(30)).await;

        let a = gw.admit_request_at(&id, now).await.unwrap();
        assert_eq!(a.message_count, 20);
        assert_eq!(a.remaining, 0);

        assert!(matches!(
            gw.admit_request_at(&id, now).await,
            Err(Error::RateLimited)
        ));
        let st = gw.sessions().get_session_state(&id).await.unwrap();
        assert_eq!(st.message_count, 20);
        assert_eq!(st.last_request_at, Some(now));
    }

    #[tokio::test]
    async fn elapsed_window_resets_then_counts() {
        let gw = gateway();
        let now = Utc::now();
        let id = session_with_history(&gw, 20, now - TimeDelta::minutes(61)).await;

        let a = gw.admit_request_at(&id, now).await.unwrap();
        assert!(a.window_reset);
        assert_eq!(a.message_count, 1);
        assert_eq!(a.remaining, 19);
    }

    #[tokio::test]
    async fn unknown_session_is_never_created() {
        let gw = gateway();
        let id = SessionId::from("nonexistent");
        assert!(matches!(
            gw.admit_request(&id).await,
            Err(Error::SessionNotFound)
        ));
        assert!(gw.sessions().get(&id).await.unwrap().is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_admissions_do_not_lose_updates() {
        let gw = gateway();
        let now = Utc::now();
        let id = session_with_history(&gw, 0, now).await;

        let mut tasks = Vec::new();
        for _ in 0..30 {
            let gw = gw.clone();
            let id = id.clone();
            tasks.push(tokio::spawn(
                async move { gw.admit_request_at(&id, now).await },
            ));
        }
        let mut admitted = 0;
        for t in tasks {
            if t.await.unwrap().is_ok() {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 20);
        let st = gw.sessions().get_session_state(&id).await.unwrap();
        assert_eq!(st.message_count, 20);
    }

    #[test]
    fn admin_and_api_key_checks_use_config() {
        let gw = gateway();
        assert!(gw.is_admin(UserId(100)));
        assert!(!gw.is_admin(UserId(1)));
        assert!(gw.verify_api_key(Some("secret")));
        assert!(!gw.verify_api_key(Some("nope")));
        assert!(!gw.verify_api_key(None));
    }

    #[tokio::test]
    async fn disabled_code_is_invalid() {
        let store = Arc::new(MemoryStore::in_memory());
        let gw = Gateway::new(
            store.clone(),
            GatewayConfig {
                admin_user_ids: vec![100],
                api_secret: "secret".to_string(),
                rate_limit: RateLimitPolicy::default(),
            },
        );
        store
            .insert_code(AccessCode {
                code: "OFF".to_string(),
                created_by: UserId(100),
                created_at: Utc::now(),
                used_count: 0,
                max_uses: UsageLimit::Unlimited,
                active: false,
            })
            .await
            .unwrap();

        let err = gw.redeem_code("OFF").await.unwrap_err();
        assert!(matches!(err, Error::InvalidCode));
        let unknown = gw.redeem_code("nope").await.unwrap_err();
        assert_eq!(err.to_string(), unknown.to_string());
        assert_eq!(gw.codes().get("OFF").await.unwrap().unwrap().used_count, 0);
    }

    #[tokio::test]
    async fn idle_lock_entries_are_dropped() {
        let gw = gateway();
        let now = Utc::now();
        for _ in 0..5 {
            let id = session_with_history(&gw, 1, now).await;
            gw.admit_request_at(&id, now).await.unwrap();
        }
        assert!(gw.session_locks.tracked().await <= 1);
        assert!(gw.code_locks.tracked().await <= 1);
    }

    #[tokio::test]
    async fn storage_failure_during_redemption_leaves_nothing_behind() {
        let ts = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        let path = format!("/tmp/codegate-gw-{}-{ts}.db", std::process::id());
        let store = Arc::new(SqliteStore::open(&path).await.unwrap());
        let gw = Gateway::new(
            store.clone(),
            GatewayConfig {
                admin_user_ids: vec![100],
                api_secret: "secret".to_string(),
                rate_limit: RateLimitPolicy::default(),
            },
        );
        let code = gw.codes().create_code(UserId(100), 1).await.unwrap();
        sqlx::query("DROP TABLE sessions")
            .execute(store.pool())
            .await
            .unwrap();

        let err = gw.redeem_code(&code.code).await.unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Storage);
        let after = gw.codes().get(&code.code).await.unwrap().unwrap();
        assert_eq!(after.used_count, 0);
        assert!(after.is_redeemable());

        store.pool().close().await;
        for suffix in ["", "-wal", "-shm"] {
            let _ = std::fs::remove_file(format!("{path}{suffix}"));
        }
    }
}
