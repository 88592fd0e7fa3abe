use std::sync::Arc;

use teloxide::{prelude::*, types::CallbackQuery};

use ddb_core::domain::UserId;
use tracing::error;

use crate::router::AppState;

pub async fn handle_callback(
    bot: Bot,
    q: CallbackQuery,
    state: Arc<AppState>,
) -> ResponseResult<()> {
    let owner = UserId(q.from.id.0 as i64);

    if let Err(e) = state.router.store().ensure_user(
        owner,
        q.from.username.as_deref(),
        Some(&q.from.first_name),
    ) {
        error!(owner = %owner, error = %e, "failed to upsert user");
    }

    let Some(data) = q.data.as_deref() else {
        let _ = bot.answer_callback_query(q.id.clone()).await;
        return Ok(());
    };

    if let Err(e) = state
        .router
        .handle_callback(owner, &q.id, data, state.messenger.as_ref())
        .await
    {
        error!(owner = %owner, error = %e, "callback handler failed");
        let _ = bot.answer_callback_query(q.id.clone()).await;
        if let Some(msg) = q.message {
            super::report_failure(&bot, msg.chat.id, "callback").await;
        }
    }
    Ok(())
}
