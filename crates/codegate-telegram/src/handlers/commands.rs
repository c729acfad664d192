use std::sync::Arc;

use chrono::{DateTime, Utc};
use teloxide::prelude::*;

use codegate_core::{
    codes::{AccessCode, UsageLimit},
    domain::UserId,
    moderation::DEFAULT_BAN_REASON,
    ErrorKind, Result,
};

use crate::router::AppState;

use super::telegram_user_id;

const BANNED_REPLY: &str = "❌ You have been banned from using this bot.";
const NO_PERMISSION_REPLY: &str = "❌ You do not have permission to use this command.";
const FAILURE_REPLY: &str = "⚠️ Something went wrong. Please try again later.";

/// Who sent the command, and whose message it replied to (if any).
#[derive(Clone, Copy, Debug)]
pub struct CommandContext {
    pub user_id: UserId,
    pub reply_to_user: Option<UserId>,
}

pub fn parse_command(text: &str) -> (String, String) {
    // Telegram may send `/cmd@botname arg1 ...`
    let mut parts = text.trim().splitn(2, char::is_whitespace);
    let first = parts.next().unwrap_or("").trim();
    let rest = parts.next().unwrap_or("").trim().to_string();

    let cmd = first
        .trim_start_matches('/')
        .split('@')
        .next()
        .unwrap_or("")
        .to_lowercase();

    (cmd, rest)
}

pub async fn handle_command(bot: Bot, msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    let Some(user) = msg.from() else {
        return Ok(());
    };
    let Some(text) = msg.text() else {
        return Ok(());
    };

    let ctx = CommandContext {
        user_id: telegram_user_id(user),
        reply_to_user: msg
            .reply_to_message()
            .and_then(|m| m.from())
            .map(telegram_user_id),
    };

    let reply = match execute_command(&state, ctx, text).await {
        Ok(reply) => reply,
        Err(e) => {
            tracing::error!(user_id = %ctx.user_id, error = %e, "command failed");
            FAILURE_REPLY.to_string()
        }
    };

    let _ = bot.send_message(msg.chat.id, reply).await;
    Ok(())
}

/// Run one bot command against the core and return the reply text.
pub async fn execute_command(state: &AppState, ctx: CommandContext, text: &str) -> Result<String> {
    let gw = &state.gateway;
    let (cmd, arg) = parse_command(text);

    match cmd.as_str() {
        "start" | "help" | "subscribe" | "mysub" => {
            if gw.bans().is_banned(ctx.user_id).await? {
                return Ok(BANNED_REPLY.to_string());
            }
            match cmd.as_str() {
                "subscribe" => {
                    let days = state.cfg.subscription_days;
                    gw.subscriptions().subscribe(ctx.user_id, days).await?;
                    Ok(format!("✅ Your subscription is active for {days} days!"))
                }
                "mysub" => match gw.subscriptions().get(ctx.user_id).await? {
                    Some(s) if s.is_active_at(Utc::now()) => Ok(format!(
                        "✅ Your subscription is active until {}.",
                        format_time(s.expires_at)
                    )),
                    _ => Ok(
                        "❌ You have no active subscription. Use /subscribe to subscribe."
                            .to_string(),
                    ),
                },
                _ => Ok(help_text(gw.is_admin(ctx.user_id))),
            }
        }

        "ban" | "unban" | "stats" | "newcode" | "codes" if !gw.is_admin(ctx.user_id) => {
            Ok(NO_PERMISSION_REPLY.to_string())
        }

        "ban" => {
            let (target, reason) = match ctx.reply_to_user {
                Some(target) => (target, arg),
                None => {
                    let mut parts = arg.splitn(2, char::is_whitespace);
                    let target = parts.next().and_then(|s| s.trim().parse::<i64>().ok());
                    let Some(target) = target else {
                        return Ok(
                            "❌ Reply to the user's message with /ban [reason], or use /ban <user_id> [reason]."
                                .to_string(),
                        );
                    };
                    (UserId(target), parts.next().unwrap_or("").trim().to_string())
                }
            };
            let reason = if reason.is_empty() {
                DEFAULT_BAN_REASON.to_string()
            } else {
                reason
            };
            gw.bans().ban(target, &reason).await?;
            Ok(format!("✅ User {target} has been banned."))
        }

        "unban" => {
            let Ok(target) = arg.split_whitespace().next().unwrap_or("").parse::<i64>() else {
                return Ok("❌ Usage: /unban <user_id>".to_string());
            };
            gw.bans().unban(UserId(target)).await?;
            Ok(format!("✅ User {target} has been unbanned."))
        }

        "stats" => {
            let st = gw.transcripts().stats().await?;
            Ok(format!(
                "📊 Bot statistics:\n\n\
👥 Active subscribers (Telegram): {}\n\
🌐 Web sessions: {}\n\
💬 Total web messages: {}\n\
🚫 Banned users: {}",
                st.active_subscriptions, st.sessions, st.session_messages, st.banned_users
            ))
        }

        "newcode" => {
            let max_uses = if arg.is_empty() {
                Ok(1)
            } else {
                arg.split_whitespace().next().unwrap_or("").parse::<i64>()
            };
            let Ok(max_uses) = max_uses else {
                return Ok("❌ Usage: /newcode [max_uses] (0 = unlimited)".to_string());
            };
            match gw.codes().create_code(ctx.user_id, max_uses).await {
                Ok(code) => Ok(format!(
                    "✅ New access code ({}):\n{}",
                    format_limit(code.max_uses),
                    code.code
                )),
                Err(e) if e.kind() == ErrorKind::InvalidInput => {
                    Ok("❌ Usage: /newcode [max_uses] (0 = unlimited)".to_string())
                }
                Err(e) => Err(e),
            }
        }

        "codes" => {
            let limit = arg
                .split_whitespace()
                .next()
                .and_then(|s| s.parse::<usize>().ok())
                .filter(|n| *n > 0)
                .unwrap_or(state.cfg.recent_codes_limit);
            let codes = gw.codes().list_recent(limit).await?;
            if codes.is_empty() {
                return Ok("No access codes yet. Use /newcode to create one.".to_string());
            }
            let mut lines = vec![format!("🔑 Latest {} access codes:", codes.len())];
            lines.extend(codes.iter().map(format_code_line));
            Ok(lines.join("\n"))
        }

        other => Ok(format!("❓ Unknown command /{other}. Use /help.")),
    }
}

fn help_text(is_admin: bool) -> String {
    let mut out = String::from(
        "🆘 Commands:\n\n\
/start - Start using the bot\n\
/help - Show this help\n\
/mysub - Check your subscription\n\
/subscribe - Subscribe to the bot",
    );
    if is_admin {
        out.push_str(
            "\n\nAdmin only:\n\
/ban [reason] - Ban a user (reply to their message) or /ban <user_id> [reason]\n\
/unban <user_id> - Unban a user\n\
/stats - Bot statistics\n\
/newcode [max_uses] - Create a web access code (0 = unlimited)\n\
/codes [limit] - List recent access codes",
        );
    }
    out
}

fn format_time(t: DateTime<Utc>) -> String {
    t.format("%Y-%m-%d %H:%M UTC").to_string()
}

fn format_limit(limit: UsageLimit) -> String {
    match limit {
        UsageLimit::Unlimited => "unlimited uses".to_string(),
        UsageLimit::Limited(n) if n.get() == 1 => "single use".to_string(),
        UsageLimit::Limited(n) => format!("{n} uses"),
    }
}

fn format_code_line(c: &AccessCode) -> String {
    let max = match c.max_uses {
        UsageLimit::Unlimited => "∞".to_string(),
        UsageLimit::Limited(n) => n.to_string(),
    };
    let status = if c.is_redeemable() { "" } else { " (spent)" };
    format!(
        "• {} | {}/{}{} | {}",
        c.code,
        c.used_count,
        max,
        status,
        format_time(c.created_at)
    )
}
