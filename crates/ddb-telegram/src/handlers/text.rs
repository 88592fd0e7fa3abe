use std::sync::Arc;

use teloxide::prelude::*;

use ddb_core::domain::UserId;
use tracing::error;

use crate::router::AppState;

pub async fn handle_text(
    bot: Bot,
    msg: Message,
    owner: UserId,
    state: Arc<AppState>,
) -> ResponseResult<()> {
    let text = msg.text().unwrap_or_default();

    if let Err(e) = state
        .router
        .handle_text(owner, text, state.messenger.as_ref())
        .await
    {
        error!(owner = %owner, error = %e, "text handler failed");
        super::report_failure(&bot, msg.chat.id, "text").await;
    }
    Ok(())
}
