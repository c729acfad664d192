use std::{num::NonZeroU32, sync::Arc};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    domain::UserId,
    errors::Error,
    security::{fingerprint, generate_token},
    store::Store,
    Result,
};

/// Attempts at drawing a fresh token before giving up on a collision streak.
const MAX_TOKEN_ATTEMPTS: usize = 3;

/// How many times a code may be redeemed.
///
/// Persisted as a signed integer where `-1` means unlimited.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub enum UsageLimit {
    Unlimited,
    Limited(NonZeroU32),
}

impl UsageLimit {
    /// Normalize an admin-supplied cap. `0` and `-1` both mean unlimited.
    pub fn from_requested(max_uses: i64) -> Result<Self> {
        match max_uses {
            0 | -1 => Ok(UsageLimit::Unlimited),
            n if n > 0 => u32::try_from(n)
                .ok()
                .and_then(NonZeroU32::new)
                .map(UsageLimit::Limited)
                .ok_or_else(|| Error::InvalidInput(format!("max uses too large: {n}"))),
            n => Err(Error::InvalidInput(format!("invalid max uses: {n}"))),
        }
    }

    pub fn allows(self, used_count: u32) -> bool {
        match self {
            UsageLimit::Unlimited => true,
            UsageLimit::Limited(max) => used_count < max.get(),
        }
    }
}

impl From<UsageLimit> for i64 {
    fn from(v: UsageLimit) -> Self {
        match v {
            UsageLimit::Unlimited => -1,
            UsageLimit::Limited(n) => i64::from(n.get()),
        }
    }
}

impl TryFrom<i64> for UsageLimit {
    type Error = String;

    fn try_from(v: i64) -> std::result::Result<Self, Self::Error> {
        match v {
            -1 => Ok(UsageLimit::Unlimited),
            n => u32::try_from(n)
                .ok()
                .and_then(NonZeroU32::new)
                .map(UsageLimit::Limited)
                .ok_or_else(|| format!("invalid stored max_uses: {n}")),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessCode {
    pub code: String,
    pub created_by: UserId,
    pub created_at: DateTime<Utc>,
    pub used_count: u32,
    pub max_uses: UsageLimit,
    pub active: bool,
}

impl AccessCode {
    pub fn is_redeemable(&self) -> bool {
        self.active && self.max_uses.allows(self.used_count)
    }
}

/// Issuance, validation and consumption of access codes.
#[derive(Clone)]
pub struct CodeRegistry {
    store: Arc<dyn Store>,
}

impl CodeRegistry {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub async fn create_code(&self, issuer: UserId, max_uses: i64) -> Result<AccessCode> {
        self.create_code_at(issuer, max_uses, Utc::now()).await
    }

    pub async fn create_code_at(
        &self,
        issuer: UserId,
        max_uses: i64,
        now: DateTime<Utc>,
    ) -> Result<AccessCode> {
        let max_uses = UsageLimit::from_requested(max_uses)?;

        for _ in 0..MAX_TOKEN_ATTEMPTS {
            let record = AccessCode {
                code: generate_token(),
                created_by: issuer,
                created_at: now,
                used_count: 0,
                max_uses,
                active: true,
            };
            if self.store.insert_code(record.clone()).await? {
                tracing::info!(
                    issuer = %issuer,
                    code = %fingerprint(&record.code),
                    max_uses = i64::from(max_uses),
                    "access code created"
                );
                return Ok(record);
            }
        }

        Err(Error::Storage(
            "could not allocate a unique access code".to_string(),
        ))
    }

    /// Unknown, exhausted and disabled codes all read as `false`.
    pub async fn verify_code(&self, code: &str) -> Result<bool> {
        Ok(self
            .store
            .get_code(code)
            .await?
            .map(|c| c.is_redeemable())
            .unwrap_or(false))
    }

    /// Count one use. Returns `false` when the code is no longer redeemable,
    /// so a racing caller can never push `used_count` past the cap.
    pub async fn consume_code(&self, code: &str) -> Result<bool> {
        self.store.consume_code(code).await
    }

    pub async fn get(&self, code: &str) -> Result<Option<AccessCode>> {
        self.store.get_code(code).await
    }

    /// Newest first.
    pub async fn list_recent(&self, limit: usize) -> Result<Vec<AccessCode>> {
        self.store.recent_codes(limit).await
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeDelta;

    use super::*;
    use crate::store::MemoryStore;

    fn registry() -> CodeRegistry {
        CodeRegistry::new(Arc::new(MemoryStore::in_memory()))
    }

    #[test]
    fn zero_and_minus_one_normalize_to_unlimited() {
        assert_eq!(UsageLimit::from_requested(0).unwrap(), UsageLimit::Unlimited);
        assert_eq!(UsageLimit::from_requested(-1).unwrap(), UsageLimit::Unlimited);
        assert!(UsageLimit::from_requested(-5).is_err());
        assert_eq!(i64::from(UsageLimit::from_requested(3).unwrap()), 3);
    }

    #[test]
    fn usage_limit_persists_as_signed_integer() {
        let v = serde_json::to_value(UsageLimit::Unlimited).unwrap();
        assert_eq!(v, serde_json::json!(-1));
        let back: UsageLimit = serde_json::from_value(serde_json::json!(4)).unwrap();
        assert_eq!(back, UsageLimit::from_requested(4).unwrap());
        assert!(serde_json::from_value::<UsageLimit>(serde_json::json!(0)).is_err());
    }

    #[tokio::test]
    async fn created_code_starts_fresh_and_active() {
        let reg = registry();
        let c = reg.create_code(UserId(1), 2).await.unwrap();
        assert_eq!(c.used_count, 0);
        assert!(c.active);
        assert_eq!(c.created_by, UserId(1));
        assert!(reg.verify_code(&c.code).await.unwrap());
    }

    #[tokio::test]
    async fn unknown_and_exhausted_codes_do_not_verify() {
        let reg = registry();
        assert!(!reg.verify_code("does-not-exist").await.unwrap());

        let c = reg.create_code(UserId(1), 1).await.unwrap();
        assert!(reg.consume_code(&c.code).await.unwrap());
        assert!(!reg.verify_code(&c.code).await.unwrap());
        assert!(!reg.consume_code(&c.code).await.unwrap());
        assert_eq!(reg.get(&c.code).await.unwrap().unwrap().used_count, 1);
    }

    #[tokio::test]
    async fn unlimited_code_keeps_counting() {
        let reg = registry();
        let c = reg.create_code(UserId(1), 0).await.unwrap();
        assert_eq!(c.max_uses, UsageLimit::Unlimited);
        for _ in 0..50 {
            assert!(reg.consume_code(&c.code).await.unwrap());
        }
        assert!(reg.verify_code(&c.code).await.unwrap());
        assert_eq!(reg.get(&c.code).await.unwrap().unwrap().used_count, 50);
    }

    #[tokio::test]
    async fn list_recent_is_newest_first_and_limited() {
        let reg = registry();
        let base = Utc::now();
        let mut made = Vec::new();
        for i in 0..4 {
            let c = reg
                .create_code_at(UserId(1), 1, base + TimeDelta::seconds(i))
                .await
                .unwrap();
            made.push(c.code);
        }

        let recent = reg.list_recent(3).await.unwrap();
        let codes: Vec<_> = recent.into_iter().map(|c| c.code).collect();
        assert_eq!(codes, vec![made[3].clone(), made[2].clone(), made[1].clone()]);
    }
}
