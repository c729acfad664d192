//! Telegram update handlers.
//!
//! Each handler is a small adapter that extracts the caller from the update,
//! runs the corresponding core operation and replies with plain text.

use std::sync::Arc;

use teloxide::{prelude::*, types::Message};

use codegate_core::domain::UserId;

use crate::router::AppState;

mod commands;
mod text;

pub use commands::{execute_command, parse_command, CommandContext};
pub use text::text_gate;

pub async fn handle_message(bot: Bot, msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    let Some(text) = msg.text() else {
        return Ok(());
    };

    if text.starts_with('/') {
        return commands::handle_command(bot, msg, state).await;
    }

    text::handle_text(bot, msg, state).await
}

fn telegram_user_id(user: &teloxide::types::User) -> UserId {
    UserId(user.id.0 as i64)
}
