//! Telegram update handlers.
//!
//! Thin adapters: each resolves the sender, upserts the user profile and
//! hands the update to the `ddb-core` conversation router. Domain errors
//! never bubble into the dispatcher; they are logged and answered with a
//! generic notice.

use std::sync::Arc;

use teloxide::{
    prelude::*,
    types::{CallbackQuery, Message},
};

use ddb_core::domain::UserId;
use tracing::error;

use crate::router::AppState;

mod callback;
mod commands;
mod text;

pub async fn handle_callback(
    bot: Bot,
    q: CallbackQuery,
    state: Arc<AppState>,
) -> ResponseResult<()> {
    callback::handle_callback(bot, q, state).await
}

pub async fn handle_message(bot: Bot, msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    let Some(user) = msg.from() else {
        return Ok(());
    };
    let owner = UserId(user.id.0 as i64);

    if let Err(e) = state
        .router
        .store()
        .ensure_user(owner, user.username.as_deref(), Some(&user.first_name))
    {
        error!(owner = %owner, error = %e, "failed to upsert user");
    }

    let Some(message_text) = msg.text() else {
        let _ = bot
            .send_message(msg.chat.id, "Я понимаю только текстовые сообщения.")
            .await;
        return Ok(());
    };

    if message_text.starts_with('/') {
        return commands::handle_command(bot, msg, owner, state).await;
    }

    // Sequentialize text per chat: the entry flow awaits the polisher and a
    // second message must not interleave with it.
    let _guard = state.chat_locks.lock_chat(msg.chat.id.0).await;
    text::handle_text(bot, msg, owner, state).await
}

pub(crate) async fn report_failure(bot: &Bot, chat: teloxide::types::ChatId, context: &str) {
    error!(context, "handler failed");
    let _ = bot
        .send_message(chat, "Внутренняя ошибка. Попробуйте еще раз позже.")
        .await;
}
