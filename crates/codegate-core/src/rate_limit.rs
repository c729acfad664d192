//! Per-session request ceiling.
//!
//! Fixed window with lazy reset: the counter only rolls over when a request
//! arrives after the window has fully elapsed, so bursts straddling a window
//! boundary are possible.

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};

use crate::{errors::Error, Result};

pub const DEFAULT_MAX_REQUESTS: u32 = 20;
pub const DEFAULT_WINDOW_MINUTES: i64 = 60;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Decision {
    Admit,
    /// Window elapsed: zero the counter, then admit this request.
    Reset,
    Reject,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RateLimitPolicy {
    pub max_requests: u32,
    pub window: TimeDelta,
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        Self {
            max_requests: DEFAULT_MAX_REQUESTS,
            window: TimeDelta::minutes(DEFAULT_WINDOW_MINUTES),
        }
    }
}

impl RateLimitPolicy {
    pub fn new(max_requests: u32, window: Duration) -> Result<Self> {
        let window = TimeDelta::from_std(window)
            .map_err(|e| Error::Config(format!("rate limit window out of range: {e}")))?;
        Ok(Self {
            max_requests,
            window,
        })
    }

    pub fn decide(
        &self,
        message_count: u32,
        last_request_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Decision {
        let Some(last) = last_request_at else {
            return Decision::Admit;
        };

        if now.signed_duration_since(last) > self.window {
            return Decision::Reset;
        }

        if message_count >= self.max_requests {
            return Decision::Reject;
        }

        Decision::Admit
    }

    /// Requests left in the current window after `message_count` admissions.
    pub fn remaining(&self, message_count: u32) -> u32 {
        self.max_requests.saturating_sub(message_count)
    }
}
