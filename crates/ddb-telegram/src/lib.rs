//! Telegram adapter (teloxide).
//!
//! This crate implements the `ddb-core` TransportPort over the Telegram
//! Bot API and hosts the long-polling dispatcher.

use async_trait::async_trait;

use teloxide::{
    prelude::*,
    types::{
        InlineKeyboardButton, InlineKeyboardMarkup, InputFile, KeyboardButton, KeyboardMarkup,
    },
};

use tokio::time::sleep;

pub mod handlers;
pub mod router;

use ddb_core::{
    domain::UserId,
    errors::Error,
    ports::{InlineKeyboard, TransportPort},
    router::main_menu_rows,
    Result,
};

#[derive(Clone)]
pub struct TelegramMessenger {
    bot: Bot,
}

impl TelegramMessenger {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }

    pub fn from_token(token: &str) -> Self {
        Self::new(Bot::new(token.to_string()))
    }

    pub fn bot(&self) -> Bot {
        self.bot.clone()
    }

    fn tg_chat(owner: UserId) -> teloxide::types::ChatId {
        teloxide::types::ChatId(owner.0)
    }

    fn map_err(e: teloxide::RequestError) -> Error {
        Error::External(format!("telegram error: {e}"))
    }

    async fn with_retry<T, Fut>(&self, mut op: impl FnMut() -> Fut) -> Result<T>
    where
        Fut: std::future::IntoFuture<Output = std::result::Result<T, teloxide::RequestError>>,
        Fut::IntoFuture: Send,
    {
        const MAX_RETRIES: usize = 1;
        let mut attempts = 0usize;
        loop {
            match op().await {
                Ok(v) => return Ok(v),
                Err(e) => match e {
                    teloxide::RequestError::RetryAfter(d) if attempts < MAX_RETRIES => {
                        attempts += 1;
                        sleep(d).await;
                        continue;
                    }
                    other => return Err(Self::map_err(other)),
                },
            }
        }
    }
}

/// Persistent reply keyboard with the five menu actions.
pub fn main_menu_markup() -> KeyboardMarkup {
    let rows: Vec<Vec<KeyboardButton>> = main_menu_rows()
        .into_iter()
        .map(|row| row.into_iter().map(KeyboardButton::new).collect())
        .collect();
    KeyboardMarkup::new(rows).resize_keyboard(true).persistent()
}

#[async_trait]
impl TransportPort for TelegramMessenger {
    async fn send_text(&self, chat: UserId, text: &str) -> Result<()> {
        self.with_retry(|| self.bot.send_message(Self::tg_chat(chat), text.to_string()))
            .await?;
        Ok(())
    }

    async fn send_menu_text(&self, chat: UserId, text: &str) -> Result<()> {
        self.with_retry(|| {
            self.bot
                .send_message(Self::tg_chat(chat), text.to_string())
                .reply_markup(main_menu_markup())
        })
        .await?;
        Ok(())
    }

    async fn send_keyboard(&self, chat: UserId, text: &str, keyboard: InlineKeyboard) -> Result<()> {
        let rows: Vec<Vec<InlineKeyboardButton>> = keyboard
            .rows
            .into_iter()
            .map(|row| {
                row.into_iter()
                    .map(|b| InlineKeyboardButton::callback(b.label, b.data))
                    .collect()
            })
            .collect();
        let markup = InlineKeyboardMarkup::new(rows);

        self.with_retry(|| {
            self.bot
                .send_message(Self::tg_chat(chat), text.to_string())
                .reply_markup(markup.clone())
        })
        .await?;
        Ok(())
    }

    async fn send_document(
        &self,
        chat: UserId,
        file_name: &str,
        bytes: Vec<u8>,
        caption: &str,
    ) -> Result<()> {
        let file = InputFile::memory(bytes).file_name(file_name.to_string());
        self.with_retry(|| {
            self.bot
                .send_document(Self::tg_chat(chat), file.clone())
                .caption(caption.to_string())
        })
        .await?;
        Ok(())
    }

    async fn answer_callback(
        &self,
        callback_id: &str,
        text: Option<&str>,
        alert: bool,
    ) -> Result<()> {
        self.with_retry(|| {
            let mut req = self.bot.answer_callback_query(callback_id.to_string());
            if let Some(t) = text {
                req = req.text(t.to_string());
            }
            if alert {
                req = req.show_alert(true);
            }
            req
        })
        .await?;
        Ok(())
    }
}
