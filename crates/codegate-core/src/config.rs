use std::{env, path::PathBuf, time::Duration};

use crate::{
    errors::Error,
    gateway::GatewayConfig,
    rate_limit::RateLimitPolicy,
    security::generate_token,
    Result,
};

/// `STORE_FILE` value that keeps all state in process memory.
pub const IN_MEMORY_STORE: &str = ":memory:";

/// Typed configuration, loaded once and passed explicitly to every component.
#[derive(Clone, Debug)]
pub struct Config {
    // Telegram
    pub telegram_bot_token: String,
    pub admin_user_ids: Vec<i64>,

    // Web API
    pub api_secret_key: String,
    /// True when no secret was configured and one was generated for this run.
    pub api_secret_generated: bool,
    pub web_bind_addr: String,

    // Storage
    pub store_file: Option<PathBuf>,

    // Completion provider
    pub completion_api_url: String,
    pub completion_timeout: Duration,

    // Rate limiting
    pub rate_limit_requests: u32,
    pub rate_limit_window: Duration,

    // Bot behavior
    pub subscription_days: u32,
    pub recent_codes_limit: usize,
}

impl Config {
    pub fn load() -> Result<Self> {
        // Optional `.env`; never overrides the real environment.
        let _ = dotenvy::dotenv();

        let telegram_bot_token = env_str("TELEGRAM_BOT_TOKEN")
            .or_else(|| env_str("BOT_TOKEN"))
            .and_then(non_empty)
            .ok_or_else(|| {
                Error::Config("TELEGRAM_BOT_TOKEN environment variable is required".to_string())
            })?;
        let admin_user_ids = parse_csv_i64(env_str("ADMIN_USER_IDS"));

        let (api_secret_key, api_secret_generated) =
            match env_str("API_SECRET_KEY").and_then(non_empty) {
                Some(k) => (k, false),
                None => (generate_token(), true),
            };

        let web_bind_addr = env_str("WEB_BIND_ADDR")
            .and_then(non_empty)
            .or_else(|| env_u16("PORT").map(|p| format!("0.0.0.0:{p}")))
            .unwrap_or_else(|| "0.0.0.0:5000".to_string());

        let store_file = match env_str("STORE_FILE").and_then(non_empty) {
            Some(s) if s == IN_MEMORY_STORE => None,
            Some(s) => Some(PathBuf::from(s)),
            None => Some(PathBuf::from("codegate.db")),
        };

        let completion_api_url = env_str("COMPLETION_API_URL")
            .and_then(non_empty)
            .unwrap_or_else(|| "https://sii3.top/api/DarkCode.php".to_string());
        let completion_timeout =
            Duration::from_millis(env_u64("COMPLETION_TIMEOUT_MS").unwrap_or(10_000));

        let rate_limit_requests = env_u32("RATE_LIMIT_REQUESTS").unwrap_or(20);
        let rate_limit_window = Duration::from_secs(env_u64("RATE_LIMIT_WINDOW").unwrap_or(3600));
        if rate_limit_requests == 0 {
            return Err(Error::Config(
                "RATE_LIMIT_REQUESTS must be at least 1".to_string(),
            ));
        }

        let subscription_days = env_u32("SUBSCRIPTION_DAYS").unwrap_or(30);
        let recent_codes_limit = env_usize("RECENT_CODES_LIMIT").unwrap_or(10).max(1);

        let cfg = Self {
            telegram_bot_token,
            admin_user_ids,
            api_secret_key,
            api_secret_generated,
            web_bind_addr,
            store_file,
            completion_api_url,
            completion_timeout,
            rate_limit_requests,
            rate_limit_window,
            subscription_days,
            recent_codes_limit,
        };

        if cfg.api_secret_generated {
            warn_generated_secret(&cfg.api_secret_key);
        }
        if cfg.admin_user_ids.is_empty() {
            tracing::warn!("ADMIN_USER_IDS is empty; admin commands are disabled");
        }

        Ok(cfg)
    }

    pub fn rate_limit_policy(&self) -> Result<RateLimitPolicy> {
        RateLimitPolicy::new(self.rate_limit_requests, self.rate_limit_window)
    }

    pub fn gateway_config(&self) -> Result<GatewayConfig> {
        Ok(GatewayConfig {
            admin_user_ids: self.admin_user_ids.clone(),
            api_secret: self.api_secret_key.clone(),
            rate_limit: self.rate_limit_policy()?,
        })
    }
}

fn warn_generated_secret(secret: &str) {
    tracing::warn!(
        api_key_prefix = %secret_hint(secret),
        "API_SECRET_KEY not set; generated a one-off secret for this run"
    );
}

/// First few characters of a secret, for logs.
fn secret_hint(secret: &str) -> String {
    let prefix: String = secret.chars().take(6).collect();
    format!("{prefix}…")
}

fn env_str(key: &str) -> Option<String> {
    env::var(key).ok()
}

fn env_u64(key: &str) -> Option<u64> {
    env_str(key).and_then(|s| s.trim().parse::<u64>().ok())
}

fn env_u32(key: &str) -> Option<u32> {
    env_str(key).and_then(|s| s.trim().parse::<u32>().ok())
}

fn env_u16(key: &str) -> Option<u16> {
    env_str(key).and_then(|s| s.trim().parse::<u16>().ok())
}

fn env_usize(key: &str) -> Option<usize> {
    env_str(key).and_then(|s| s.trim().parse::<usize>().ok())
}

fn parse_csv_i64(v: Option<String>) -> Vec<i64> {
    v.unwrap_or_default()
        .split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .filter_map(|s| s.parse::<i64>().ok())
        .collect()
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use chrono::TimeDelta;

    use super::*;

    fn sample() -> Config {
        Config {
            telegram_bot_token: "x".to_string(),
            admin_user_ids: vec![1, 2],
            api_secret_key: "k".to_string(),
            api_secret_generated: false,
            web_bind_addr: "127.0.0.1:0".to_string(),
            store_file: None,
            completion_api_url: "http://localhost".to_string(),
            completion_timeout: Duration::from_secs(1),
            rate_limit_requests: 20,
            rate_limit_window: Duration::from_secs(3600),
            subscription_days: 30,
            recent_codes_limit: 10,
        }
    }

    #[test]
    fn csv_ids_skip_garbage() {
        assert_eq!(
            parse_csv_i64(Some(" 1, x,, 6521966233 ,-4".to_string())),
            vec![1, 6521966233, -4]
        );
        assert!(parse_csv_i64(None).is_empty());
    }

    #[test]
    fn gateway_config_carries_policy_and_principals() {
        let g = sample().gateway_config().unwrap();
        assert_eq!(g.admin_user_ids, vec![1, 2]);
        assert_eq!(g.api_secret, "k");
        assert_eq!(g.rate_limit.max_requests, 20);
        assert_eq!(g.rate_limit.window, TimeDelta::minutes(60));
        assert_eq!(g.rate_limit, RateLimitPolicy::default());
    }

    #[derive(Clone, Default)]
    struct LogBuffer(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for LogBuffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn generated_secret_is_never_logged_in_full() {
        let secret = generate_token();
        let buf = LogBuffer::default();
        let writer = buf.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .finish();

        tracing::subscriber::with_default(subscriber, || warn_generated_secret(&secret));

        let out = String::from_utf8(buf.0.lock().unwrap().clone()).unwrap();
        assert!(out.contains("generated a one-off secret"));
        assert!(out.contains(&secret[..6]));
        assert!(!out.contains(&secret));
    }

    #[test]
    fn secret_hint_is_short() {
        assert_eq!(secret_hint("abcdefghijk"), "abcdef…");
        assert_eq!(secret_hint("ab"), "ab…");
    }

    #[test]
    fn non_empty_rejects_whitespace() {
        assert_eq!(non_empty("  ".to_string()), None);
        assert_eq!(non_empty("a".to_string()), Some("a".to_string()));
    }
}
