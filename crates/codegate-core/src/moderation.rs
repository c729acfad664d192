//! Per-user ban flags and subscription terms for the chat bot.

use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::{domain::UserId, errors::Error, store::Store, Result};

pub const DEFAULT_BAN_REASON: &str = "abuse";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BannedUser {
    pub user_id: UserId,
    pub reason: String,
    pub banned_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub user_id: UserId,
    pub subscribed_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Subscription {
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

#[derive(Clone)]
pub struct BanRegistry {
    store: Arc<dyn Store>,
}

impl BanRegistry {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Replaces any existing ban; the latest reason wins.
    pub async fn ban(&self, user_id: UserId, reason: &str) -> Result<()> {
        let reason = match reason.trim() {
            "" => DEFAULT_BAN_REASON,
            r => r,
        };
        self.store
            .upsert_ban(BannedUser {
                user_id,
                reason: reason.to_string(),
                banned_at: Utc::now(),
            })
            .await?;
        tracing::info!(user_id = %user_id, reason, "user banned");
        Ok(())
    }

    /// No-op when the user is not banned.
    pub async fn unban(&self, user_id: UserId) -> Result<()> {
        if self.store.delete_ban(user_id).await? {
            tracing::info!(user_id = %user_id, "user unbanned");
        }
        Ok(())
    }

    pub async fn is_banned(&self, user_id: UserId) -> Result<bool> {
        Ok(self.store.get_ban(user_id).await?.is_some())
    }

    pub async fn get(&self, user_id: UserId) -> Result<Option<BannedUser>> {
        self.store.get_ban(user_id).await
    }
}

#[derive(Clone)]
pub struct SubscriptionRegistry {
    store: Arc<dyn Store>,
}

impl SubscriptionRegistry {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub async fn subscribe(&self, user_id: UserId, days: u32) -> Result<Subscription> {
        self.subscribe_at(user_id, days, Utc::now()).await
    }

    /// Term always runs from `now`; any unexpired remainder is discarded.
    pub async fn subscribe_at(
        &self,
        user_id: UserId,
        days: u32,
        now: DateTime<Utc>,
    ) -> Result<Subscription> {
        let term = TimeDelta::try_days(i64::from(days))
            .ok_or_else(|| Error::InvalidInput(format!("subscription too long: {days} days")))?;
        let expires_at = now
            .checked_add_signed(term)
            .ok_or_else(|| Error::InvalidInput(format!("subscription too long: {days} days")))?;

        let sub = Subscription {
            user_id,
            subscribed_at: now,
            expires_at,
        };
        self.store.upsert_subscription(sub.clone()).await?;
        tracing::info!(user_id = %user_id, days, "subscription set");
        Ok(sub)
    }

    pub async fn is_subscribed(&self, user_id: UserId) -> Result<bool> {
        self.is_subscribed_at(user_id, Utc::now()).await
    }

    pub async fn is_subscribed_at(&self, user_id: UserId, now: DateTime<Utc>) -> Result<bool> {
        Ok(self
            .store
            .get_subscription(user_id)
            .await?
            .map(|s| s.is_active_at(now))
            .unwrap_or(false))
    }

    pub async fn get(&self, user_id: UserId) -> Result<Option<Subscription>> {
        self.store.get_subscription(user_id).await
    }
}
