use std::sync::Arc;

use teloxide::{prelude::*, types::ChatAction};

use codegate_core::{domain::UserId, ports::FALLBACK_REPLY, Result};

use crate::router::AppState;

use super::telegram_user_id;

const BANNED_NOTICE: &str = "❌ You have been banned from using this bot.";
const SUBSCRIBE_HINT: &str =
    "🔒 You need an active subscription to chat. Use /subscribe to subscribe.";

/// Returns the reply that stops a plain-text message before it reaches the
/// completion provider, or `None` when the user may chat.
pub async fn text_gate(state: &AppState, user_id: UserId) -> Result<Option<String>> {
    let gw = &state.gateway;
    if gw.bans().is_banned(user_id).await? {
        return Ok(Some(BANNED_NOTICE.to_string()));
    }
    if !gw.subscriptions().is_subscribed(user_id).await? {
        return Ok(Some(SUBSCRIBE_HINT.to_string()));
    }
    Ok(None)
}

pub(super) async fn handle_text(bot: Bot, msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    let Some(user) = msg.from() else {
        return Ok(());
    };
    let Some(text) = msg.text() else {
        return Ok(());
    };
    let user_id = telegram_user_id(user);

    match text_gate(&state, user_id).await {
        Ok(None) => {}
        Ok(Some(reply)) => {
            let _ = bot.send_message(msg.chat.id, reply).await;
            return Ok(());
        }
        Err(e) => {
            tracing::error!(user_id = %user_id, error = %e, "text gate lookup failed");
            let _ = bot.send_message(msg.chat.id, FALLBACK_REPLY).await;
            return Ok(());
        }
    }

    let _ = bot.send_chat_action(msg.chat.id, ChatAction::Typing).await;

    let reply = match state.completion.complete(text).await {
        Ok(reply) => reply,
        Err(e) => {
            tracing::warn!(user_id = %user_id, error = %e, "completion failed");
            FALLBACK_REPLY.to_string()
        }
    };

    let _ = bot.send_message(msg.chat.id, reply).await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use async_trait::async_trait;
    use chrono::{TimeDelta, Utc};

    use codegate_core::{
        config::Config,
        gateway::{Gateway, GatewayConfig},
        ports::CompletionPort,
        rate_limit::RateLimitPolicy,
        store::MemoryStore,
    };

    use super::*;

    struct NoCompletion;

    #[async_trait]
    impl CompletionPort for NoCompletion {
        async fn complete(&self, _text: &str) -> Result<String> {
            Ok(String::new())
        }
    }

    fn test_state() -> AppState {
        let cfg = Config {
            telegram_bot_token: "x".to_string(),
            admin_user_ids: Vec::new(),
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
        };
        let gateway = Gateway::new(
            Arc::new(MemoryStore::in_memory()),
            GatewayConfig {
                admin_user_ids: Vec::new(),
                api_secret: "k".to_string(),
                rate_limit: RateLimitPolicy::default(),
            },
        );
        AppState {
            cfg: Arc::new(cfg),
            gateway: Arc::new(gateway),
            completion: Arc::new(NoCompletion),
        }
    }

    #[tokio::test]
    async fn unsubscribed_user_gets_hint() {
        let state = test_state();
        let gate = text_gate(&state, UserId(1)).await.unwrap();
        assert_eq!(gate.as_deref(), Some(SUBSCRIBE_HINT));
    }

    #[tokio::test]
    async fn subscribed_user_passes() {
        let state = test_state();
        state.gateway.subscriptions().subscribe(UserId(1), 30).await.unwrap();
        assert_eq!(text_gate(&state, UserId(1)).await.unwrap(), None);
    }

    #[tokio::test]
    async fn expired_subscription_gets_hint() {
        let state = test_state();
        let long_ago = Utc::now() - TimeDelta::days(45);
        state
            .gateway
            .subscriptions()
            .subscribe_at(UserId(1), 30, long_ago)
            .await
            .unwrap();
        let gate = text_gate(&state, UserId(1)).await.unwrap();
        assert_eq!(gate.as_deref(), Some(SUBSCRIBE_HINT));
    }

    #[tokio::test]
    async fn ban_wins_over_subscription() {
        let state = test_state();
        state.gateway.subscriptions().subscribe(UserId(1), 30).await.unwrap();
        state.gateway.bans().ban(UserId(1), "spam").await.unwrap();
        let gate = text_gate(&state, UserId(1)).await.unwrap();
        assert_eq!(gate.as_deref(), Some(BANNED_NOTICE));
    }
}
