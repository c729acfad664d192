//! Audit storage of web conversations and admin statistics.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{domain::SessionId, store::Store, Result};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptEntry {
    pub session_id: SessionId,
    pub message: String,
    pub response: String,
    pub created_at: DateTime<Utc>,
}

/// Aggregate counters for the admin `/stats` report.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub active_subscriptions: usize,
    pub banned_users: usize,
    pub sessions: usize,
    pub session_messages: u64,
}

#[derive(Clone)]
pub struct TranscriptLog {
    store: Arc<dyn Store>,
}

impl TranscriptLog {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub async fn record(&self, session_id: &SessionId, message: &str, response: &str) -> Result<()> {
        self.store
            .append_message(TranscriptEntry {
                session_id: session_id.clone(),
                message: message.to_string(),
                response: response.to_string(),
                created_at: Utc::now(),
            })
            .await
    }

    /// Oldest first.
    pub async fn history(&self, session_id: &SessionId) -> Result<Vec<TranscriptEntry>> {
        self.store.session_messages(session_id).await
    }

    pub async fn stats(&self) -> Result<StoreStats> {
        self.store.stats(Utc::now()).await
    }
}
