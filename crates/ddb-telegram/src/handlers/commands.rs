use std::sync::Arc;

use teloxide::prelude::*;

use ddb_core::{domain::UserId, router::BotCommand};
use tracing::error;

use crate::router::AppState;

fn parse_command(text: &str) -> String {
    // Telegram may send `/cmd@botname arg1 ...`
    let first = text.trim().split_whitespace().next().unwrap_or("");
    first
        .trim_start_matches('/')
        .split('@')
        .next()
        .unwrap_or("")
        .to_lowercase()
}

pub async fn handle_command(
    bot: Bot,
    msg: Message,
    owner: UserId,
    state: Arc<AppState>,
) -> ResponseResult<()> {
    let command = match parse_command(msg.text().unwrap_or_default()).as_str() {
        "start" => BotCommand::Start,
        "help" => BotCommand::Help,
        "cancel" => BotCommand::Cancel,
        other => {
            let _ = bot
                .send_message(
                    msg.chat.id,
                    format!("Неизвестная команда /{other}. Используйте /help."),
                )
                .await;
            return Ok(());
        }
    };

    if let Err(e) = state
        .router
        .handle_command(owner, command, state.messenger.as_ref())
        .await
    {
        error!(owner = %owner, error = %e, "command handler failed");
        super::report_failure(&bot, msg.chat.id, "command").await;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_bot_mention_and_arguments() {
        assert_eq!(parse_command("/start"), "start");
        assert_eq!(parse_command("/Help@drink_diary_bot"), "help");
        assert_eq!(parse_command("/cancel now please"), "cancel");
    }
}
