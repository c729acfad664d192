use std::sync::Arc;

use teloxide::{dispatching::Dispatcher, dptree, prelude::*};

use codegate_core::{config::Config, gateway::Gateway, ports::CompletionPort};

use crate::handlers;

#[derive(Clone)]
pub struct AppState {
    pub cfg: Arc<Config>,
    pub gateway: Arc<Gateway>,
    pub completion: Arc<dyn CompletionPort>,
}

pub async fn run_polling(state: Arc<AppState>) -> anyhow::Result<()> {
    let bot = Bot::new(state.cfg.telegram_bot_token.clone());

    match bot.get_me().await {
        Ok(me) => tracing::info!(username = %me.username(), "telegram bot started"),
        Err(e) => tracing::warn!(error = %e, "telegram getMe failed"),
    }
    tracing::info!(
        admins = state.cfg.admin_user_ids.len(),
        "telegram long polling"
    );

    let handler = dptree::entry().branch(Update::filter_message().endpoint(handlers::handle_message));

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![state])
        .build()
        .dispatch()
        .await;

    Ok(())
}
