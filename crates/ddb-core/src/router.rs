//! Conversation router.
//!
//! Drives multi-step interactions across asynchronous message turns: reads
//! the stored step, validates referenced entities through the store,
//! performs the step's effect, then writes the next step (or clears it).
//! Every path either re-enters idle or advances; there is no terminal
//! state and no step history.

use std::sync::Arc;

use chrono::Utc;
use tracing::warn;

use crate::backup::{
    backup_file_name, build_backup_csv, format_backup_date, frequency_label, summarize_backup,
};
use crate::config::Config;
use crate::domain::{BackupFrequency, Entry, ShareLinkKind, Subject, UserId};
use crate::format::{cleaned_text_differs, normalize_single_line, split_chat_message, strip_markdown_artifacts};
use crate::parsers::parse_entry_input;
use crate::ports::{InlineButton, InlineKeyboard, Polisher, QrRenderer, TransportPort};
use crate::steps::{ConversationStep, GiftDraft};
use crate::store::{NewEntry, NewShareLink, Store, SubjectScope};
use crate::token::issue_unique_token;
use crate::Result;

pub const MENU_NEW_SUBJECT: &str = "➕ Новый напиток";
pub const MENU_CURRENT: &str = "📂 Текущие напитки";
pub const MENU_ARCHIVED: &str = "🗄 Архивные напитки";
pub const MENU_SHARE: &str = "🔗 QR напитка";
pub const MENU_BACKUP: &str = "💾 Бэкап CSV";

const ENTRY_FORMAT_HINT: &str = "ДД.ММ.ГГГГ | текст";
const CHAT_CHUNK_LIMIT: usize = 3800;

/// Reply-keyboard layout for the adapter to build its persistent menu from.
pub fn main_menu_rows() -> Vec<Vec<&'static str>> {
    vec![
        vec![MENU_NEW_SUBJECT, MENU_CURRENT],
        vec![MENU_ARCHIVED, MENU_SHARE],
        vec![MENU_BACKUP],
    ]
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BotCommand {
    Start,
    Help,
    Cancel,
}

pub struct Router {
    cfg: Arc<Config>,
    store: Arc<Store>,
    polisher: Arc<dyn Polisher>,
    qr: Arc<dyn QrRenderer>,
}

impl Router {
    pub fn new(
        cfg: Arc<Config>,
        store: Arc<Store>,
        polisher: Arc<dyn Polisher>,
        qr: Arc<dyn QrRenderer>,
    ) -> Self {
        Self {
            cfg,
            store,
            polisher,
            qr,
        }
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    pub async fn handle_command(
        &self,
        owner: UserId,
        command: BotCommand,
        tx: &dyn TransportPort,
    ) -> Result<()> {
        match command {
            BotCommand::Start => {
                self.store.clear_conversation_step(owner)?;
                tx.send_menu_text(
                    owner,
                    "Дневник напитков запущен.\n\
                     Главное меню: Новый напиток, Текущие, Архивные, QR, Бэкап CSV.\n\
                     Используйте /help для подсказки.",
                )
                .await
            }
            BotCommand::Help => {
                tx.send_menu_text(
                    owner,
                    &format!(
                        "Команды:\n\
                         /start - открыть меню\n\
                         /cancel - отменить текущий шаг\n\n\
                         Логика:\n\
                         - в Текущих: добавить запись или архивировать напиток;\n\
                         - в Архивных: вернуть напиток в текущие;\n\
                         - в QR: выбрать тип ссылки (обычная/подарочная), затем напиток;\n\
                         - в Бэкап CSV: ручной экспорт и настройка автоотправки.\n\n\
                         Формат записи:\n\
                         24.02.2026 | Сделал перелив, добавил 50 г меда\n\
                         или просто текст (дата подставится сегодняшняя).\n\
                         Шаблон даты: {ENTRY_FORMAT_HINT}"
                    ),
                )
                .await
            }
            BotCommand::Cancel => {
                self.store.clear_conversation_step(owner)?;
                tx.send_menu_text(owner, "Текущий сценарий отменен.").await
            }
        }
    }

    pub async fn handle_text(
        &self,
        owner: UserId,
        raw_text: &str,
        tx: &dyn TransportPort,
    ) -> Result<()> {
        let raw_text = raw_text.trim();
        if raw_text.is_empty() || raw_text.starts_with('/') {
            return Ok(());
        }

        match normalize_single_line(raw_text).as_str() {
            MENU_NEW_SUBJECT => {
                self.store
                    .set_conversation_step(owner, &ConversationStep::AwaitSubjectName)?;
                return tx
                    .send_text(
                        owner,
                        "Введите название напитка (например: Сидр, Медовуха вишня):",
                    )
                    .await;
            }
            MENU_CURRENT => return self.send_subject_list(owner, SubjectScope::Active, tx).await,
            MENU_ARCHIVED => {
                return self.send_subject_list(owner, SubjectScope::Archived, tx).await
            }
            MENU_SHARE => return self.send_share_kind_menu(owner, tx).await,
            MENU_BACKUP => return self.send_backup_menu(owner, None, tx).await,
            _ => {}
        }

        let Some(step) = self.store.conversation_step(owner)? else {
            return tx
                .send_menu_text(owner, "Не понял команду. Используйте /help или кнопки меню.")
                .await;
        };

        match step {
            ConversationStep::AwaitSubjectName => self.on_subject_name(owner, raw_text, tx).await,
            ConversationStep::AwaitEntryText { subject_id } => {
                self.on_entry_text(owner, &subject_id, raw_text, tx).await
            }
            ConversationStep::AwaitGiftRecipient { subject_id } => {
                self.on_gift_recipient(owner, &subject_id, raw_text, tx).await
            }
            ConversationStep::AwaitGiftDecision { .. } => {
                // Text where a button press was expected: the step is stale.
                self.store.clear_conversation_step(owner)?;
                tx.send_menu_text(owner, "Шаг устарел. Начните заново через QR напитка.")
                    .await
            }
            ConversationStep::AwaitGiftMessage { draft } => {
                let message = match raw_text.trim() {
                    "" => None,
                    text => Some(text.to_string()),
                };
                self.finalize_gift(owner, draft, message, tx).await
            }
        }
    }

    pub async fn handle_callback(
        &self,
        owner: UserId,
        callback_id: &str,
        data: &str,
        tx: &dyn TransportPort,
    ) -> Result<()> {
        if let Some(subject_id) = data.strip_prefix("current:open:") {
            return self.open_current(owner, subject_id, callback_id, tx).await;
        }
        if let Some(subject_id) = data.strip_prefix("current:add:") {
            return self.start_entry(owner, subject_id, callback_id, tx).await;
        }
        if let Some(subject_id) = data.strip_prefix("current:history:") {
            return self.send_history(owner, subject_id, callback_id, tx).await;
        }
        if let Some(subject_id) = data.strip_prefix("current:archive:") {
            return self.archive(owner, subject_id, callback_id, tx).await;
        }
        if let Some(subject_id) = data.strip_prefix("archived:open:") {
            return self.open_archived(owner, subject_id, callback_id, tx).await;
        }
        if let Some(subject_id) = data.strip_prefix("archived:history:") {
            return self.send_history(owner, subject_id, callback_id, tx).await;
        }
        if let Some(subject_id) = data.strip_prefix("archived:restore:") {
            return self.restore(owner, subject_id, callback_id, tx).await;
        }
        if data == "qr-type:plain" || data == "qr-type:gift" {
            let kind = if data == "qr-type:plain" {
                ShareLinkKind::Plain
            } else {
                ShareLinkKind::Gift
            };
            tx.answer_callback(callback_id, None, false).await?;
            return self.send_share_subject_menu(owner, kind, tx).await;
        }
        if let Some(subject_id) = data.strip_prefix("qr:plain:") {
            return self.send_plain_link(owner, subject_id, callback_id, tx).await;
        }
        if let Some(subject_id) = data.strip_prefix("qr:gift:") {
            return self.start_gift(owner, subject_id, callback_id, tx).await;
        }
        if data == "gift-msg:none" || data == "gift-msg:add" {
            return self.on_gift_decision(owner, data, callback_id, tx).await;
        }
        if data == "backup:export" {
            tx.answer_callback(callback_id, None, false).await?;
            return self
                .send_backup_file(owner, "Ручной CSV-бэкап логов.", tx)
                .await;
        }
        if let Some(raw) = data.strip_prefix("backup:set:") {
            return self.set_backup_frequency(owner, raw, callback_id, tx).await;
        }

        tx.answer_callback(callback_id, None, false).await
    }

    // -- Subject creation / entries --

    async fn on_subject_name(
        &self,
        owner: UserId,
        raw_text: &str,
        tx: &dyn TransportPort,
    ) -> Result<()> {
        if raw_text.chars().count() < 2 {
            return tx
                .send_text(owner, "Название слишком короткое. Введите минимум 2 символа.")
                .await;
        }

        let subject = self.store.create_subject(owner, raw_text)?;
        self.store.set_conversation_step(
            owner,
            &ConversationStep::AwaitEntryText {
                subject_id: subject.id.clone(),
            },
        )?;

        tx.send_menu_text(
            owner,
            &format!(
                "Напиток создан: {}\nДобавьте первую запись.\nОтправьте текст в формате:\n{ENTRY_FORMAT_HINT}\nили просто текст.",
                subject.name
            ),
        )
        .await
    }

    async fn on_entry_text(
        &self,
        owner: UserId,
        subject_id: &str,
        raw_text: &str,
        tx: &dyn TransportPort,
    ) -> Result<()> {
        let Some(subject) = self.store.subject_for_owner(subject_id, owner)? else {
            self.store.clear_conversation_step(owner)?;
            return tx
                .send_menu_text(owner, "Напиток не найден. Выберите его заново.")
                .await;
        };
        if subject.is_archived() {
            self.store.clear_conversation_step(owner)?;
            return tx
                .send_menu_text(
                    owner,
                    "Этот напиток в архиве. Для новой записи сначала верните его в текущие.",
                )
                .await;
        }

        let Some(parsed) = parse_entry_input(raw_text, Utc::now().date_naive()) else {
            return tx
                .send_text(
                    owner,
                    &format!(
                        "Не смог прочитать запись. Используйте формат {ENTRY_FORMAT_HINT} или просто текст."
                    ),
                )
                .await;
        };

        tx.send_text(owner, "Сохраняю запись и исправляю текст...").await?;
        let cleaned = self
            .polisher
            .polish(&subject.name, &parsed.text)
            .await
            .map(|t| strip_markdown_artifacts(&t))
            .filter(|t| !t.is_empty());

        // The cleanup call is asynchronous; the user may have cancelled or
        // advanced meanwhile. Commit only if the stored step still matches
        // the one this turn started under, otherwise discard as stale.
        let still_current = matches!(
            self.store.conversation_step(owner)?,
            Some(ConversationStep::AwaitEntryText { subject_id: ref id }) if id.as_str() == subject_id
        );
        if !still_current {
            return tx
                .send_menu_text(owner, "Шаг был отменен, запись не сохранена.")
                .await;
        }

        let entry_date = parsed.entry_date.format("%Y-%m-%d").to_string();
        let has_cleaned = cleaned.is_some();
        self.store.create_entry(NewEntry {
            subject_id: subject.id.clone(),
            owner,
            entry_date: entry_date.clone(),
            raw_text: parsed.text,
            cleaned_text: cleaned,
        })?;
        self.store.clear_conversation_step(owner)?;

        tx.send_menu_text(
            owner,
            &format!(
                "Запись сохранена для {}.\nДата: {entry_date}\n{}",
                subject.name,
                if has_cleaned {
                    "Текст аккуратно исправлен и сохранен."
                } else {
                    "Сохранен исходный текст."
                }
            ),
        )
        .await
    }

    // -- Subject lists and per-subject actions --

    async fn send_subject_list(
        &self,
        owner: UserId,
        scope: SubjectScope,
        tx: &dyn TransportPort,
    ) -> Result<()> {
        let subjects = self.store.list_subjects(owner, scope)?;
        if subjects.is_empty() {
            let text = match scope {
                SubjectScope::Archived => "Архивных напитков пока нет.",
                _ => "Текущих напитков пока нет. Создайте новый напиток.",
            };
            return tx.send_menu_text(owner, text).await;
        }

        let prefix = match scope {
            SubjectScope::Archived => "archived",
            _ => "current",
        };
        let mut keyboard = InlineKeyboard::new();
        for subject in &subjects {
            keyboard = keyboard.row(vec![InlineButton::new(
                subject.name.clone(),
                format!("{prefix}:open:{}", subject.id),
            )]);
        }

        let header = match scope {
            SubjectScope::Archived => "Архивные напитки. Выберите напиток:",
            _ => "Текущие напитки. Выберите напиток:",
        };
        tx.send_keyboard(owner, header, keyboard).await
    }

    async fn open_current(
        &self,
        owner: UserId,
        subject_id: &str,
        callback_id: &str,
        tx: &dyn TransportPort,
    ) -> Result<()> {
        let Some(subject) = self.active_subject(owner, subject_id)? else {
            return tx
                .answer_callback(callback_id, Some("Текущий напиток не найден"), true)
                .await;
        };

        tx.answer_callback(callback_id, None, false).await?;
        let keyboard = InlineKeyboard::new()
            .row(vec![InlineButton::new(
                "📝 Добавить запись",
                format!("current:add:{}", subject.id),
            )])
            .row(vec![InlineButton::new(
                "📚 История",
                format!("current:history:{}", subject.id),
            )])
            .row(vec![InlineButton::new(
                "📦 Архивировать",
                format!("current:archive:{}", subject.id),
            )]);
        tx.send_keyboard(
            owner,
            &format!("Напиток: {}\nВыберите действие:", subject.name),
            keyboard,
        )
        .await
    }

    async fn open_archived(
        &self,
        owner: UserId,
        subject_id: &str,
        callback_id: &str,
        tx: &dyn TransportPort,
    ) -> Result<()> {
        let subject = self.store.subject_for_owner(subject_id, owner)?;
        let Some(subject) = subject.filter(Subject::is_archived) else {
            return tx
                .answer_callback(callback_id, Some("Архивный напиток не найден"), true)
                .await;
        };

        tx.answer_callback(callback_id, None, false).await?;
        let keyboard = InlineKeyboard::new()
            .row(vec![InlineButton::new(
                "📚 История",
                format!("archived:history:{}", subject.id),
            )])
            .row(vec![InlineButton::new(
                "♻️ Вернуть в текущие",
                format!("archived:restore:{}", subject.id),
            )]);
        tx.send_keyboard(
            owner,
            &format!("Архивный напиток: {}\nВыберите действие:", subject.name),
            keyboard,
        )
        .await
    }

    async fn start_entry(
        &self,
        owner: UserId,
        subject_id: &str,
        callback_id: &str,
        tx: &dyn TransportPort,
    ) -> Result<()> {
        let Some(subject) = self.active_subject(owner, subject_id)? else {
            return tx
                .answer_callback(callback_id, Some("Напиток не найден или уже в архиве"), true)
                .await;
        };

        self.store.set_conversation_step(
            owner,
            &ConversationStep::AwaitEntryText {
                subject_id: subject.id.clone(),
            },
        )?;
        tx.answer_callback(callback_id, Some(&format!("Выбран: {}", subject.name)), false)
            .await?;
        tx.send_text(
            owner,
            &format!(
                "Запись для {}.\nОтправьте текст в формате:\n{ENTRY_FORMAT_HINT}\nили просто текст.",
                subject.name
            ),
        )
        .await
    }

    async fn archive(
        &self,
        owner: UserId,
        subject_id: &str,
        callback_id: &str,
        tx: &dyn TransportPort,
    ) -> Result<()> {
        let Some(subject) = self.active_subject(owner, subject_id)? else {
            return tx
                .answer_callback(callback_id, Some("Напиток уже в архиве или не найден"), true)
                .await;
        };

        let archived = self.store.archive_subject(&subject.id, owner)?;
        tx.answer_callback(
            callback_id,
            Some(if archived {
                "Перенесено в архив"
            } else {
                "Не удалось архивировать"
            }),
            false,
        )
        .await?;
        tx.send_text(owner, &format!("Напиток \"{}\" перенесен в архив.", subject.name))
            .await
    }

    async fn restore(
        &self,
        owner: UserId,
        subject_id: &str,
        callback_id: &str,
        tx: &dyn TransportPort,
    ) -> Result<()> {
        let subject = self.store.subject_for_owner(subject_id, owner)?;
        let Some(subject) = subject.filter(Subject::is_archived) else {
            return tx
                .answer_callback(callback_id, Some("Напиток не в архиве"), true)
                .await;
        };

        let restored = self.store.unarchive_subject(&subject.id, owner)?;
        tx.answer_callback(
            callback_id,
            Some(if restored {
                "Возвращено в текущие"
            } else {
                "Не удалось вернуть"
            }),
            false,
        )
        .await?;
        tx.send_text(owner, &format!("Напиток \"{}\" возвращен в текущие.", subject.name))
            .await
    }

    async fn send_history(
        &self,
        owner: UserId,
        subject_id: &str,
        callback_id: &str,
        tx: &dyn TransportPort,
    ) -> Result<()> {
        let Some(subject) = self.store.subject_for_owner(subject_id, owner)? else {
            return tx
                .answer_callback(callback_id, Some("Напиток не найден"), true)
                .await;
        };

        tx.answer_callback(callback_id, None, false).await?;
        let entries = self.store.entries_for_subject(&subject.id)?;
        if entries.is_empty() {
            return tx
                .send_text(owner, &format!("По напитку {} пока нет записей.", subject.name))
                .await;
        }

        let formatted = format_history(&subject.name, &entries);
        for chunk in split_chat_message(&formatted, CHAT_CHUNK_LIMIT) {
            tx.send_text(owner, &chunk).await?;
        }
        Ok(())
    }

    // -- Share links --

    async fn send_share_kind_menu(&self, owner: UserId, tx: &dyn TransportPort) -> Result<()> {
        let keyboard = InlineKeyboard::new()
            .row(vec![InlineButton::new("Обычный QR", "qr-type:plain")])
            .row(vec![InlineButton::new("Подарочный QR", "qr-type:gift")]);
        tx.send_keyboard(owner, "Выберите тип QR:", keyboard).await
    }

    async fn send_share_subject_menu(
        &self,
        owner: UserId,
        kind: ShareLinkKind,
        tx: &dyn TransportPort,
    ) -> Result<()> {
        let subjects = self.store.list_subjects(owner, SubjectScope::All)?;
        if subjects.is_empty() {
            return tx
                .send_menu_text(owner, "Напитков пока нет. Сначала создайте напиток.")
                .await;
        }

        let mut keyboard = InlineKeyboard::new();
        for subject in &subjects {
            let label = if subject.is_archived() {
                format!("{} (архив)", subject.name)
            } else {
                subject.name.clone()
            };
            keyboard = keyboard.row(vec![InlineButton::new(
                label,
                format!("qr:{}:{}", kind.as_str(), subject.id),
            )]);
        }

        let header = match kind {
            ShareLinkKind::Plain => "Выберите напиток для обычного QR:",
            ShareLinkKind::Gift => "Выберите напиток для подарочного QR:",
        };
        tx.send_keyboard(owner, header, keyboard).await
    }

    /// Canonical plain link per subject: get-or-create, idempotent.
    async fn send_plain_link(
        &self,
        owner: UserId,
        subject_id: &str,
        callback_id: &str,
        tx: &dyn TransportPort,
    ) -> Result<()> {
        let Some(subject) = self.store.subject_for_owner(subject_id, owner)? else {
            return tx
                .answer_callback(callback_id, Some("Напиток не найден"), true)
                .await;
        };
        tx.answer_callback(callback_id, None, false).await?;

        let refreshed = self.polish_missing_entries(&subject).await?;
        if refreshed > 0 {
            tx.send_text(
                owner,
                &format!("Перед генерацией QR исправил оформление {refreshed} записей."),
            )
            .await?;
        }

        let link = match self.store.plain_link_for_subject(&subject.id)? {
            Some(link) => link,
            None => self.store.create_share_link(NewShareLink {
                token: issue_unique_token(&self.store)?,
                subject_id: subject.id.clone(),
                kind: ShareLinkKind::Plain,
                gift_recipient: None,
                bottle_code: None,
                gift_message: None,
                created_by: owner,
            })?,
        };

        let url = self.cfg.share_url(&link.token);
        let caption = format!("QR напитка {}\n{url}", subject.name);
        self.send_share(owner, &url, &format!("{}-qr.svg", subject.name), &caption, tx)
            .await
    }

    async fn start_gift(
        &self,
        owner: UserId,
        subject_id: &str,
        callback_id: &str,
        tx: &dyn TransportPort,
    ) -> Result<()> {
        let Some(subject) = self.store.subject_for_owner(subject_id, owner)? else {
            return tx
                .answer_callback(callback_id, Some("Напиток не найден"), true)
                .await;
        };

        self.store.set_conversation_step(
            owner,
            &ConversationStep::AwaitGiftRecipient {
                subject_id: subject.id.clone(),
            },
        )?;
        tx.answer_callback(callback_id, Some(&format!("Выбран: {}", subject.name)), false)
            .await?;
        tx.send_text(
            owner,
            &format!("Подарочный QR для {}.\nВведите имя получателя:", subject.name),
        )
        .await
    }

    async fn on_gift_recipient(
        &self,
        owner: UserId,
        subject_id: &str,
        raw_text: &str,
        tx: &dyn TransportPort,
    ) -> Result<()> {
        let Some(subject) = self.store.subject_for_owner(subject_id, owner)? else {
            self.store.clear_conversation_step(owner)?;
            return tx
                .send_menu_text(owner, "Напиток не найден. Начните заново через QR напитка.")
                .await;
        };

        let recipient = raw_text.trim();
        if recipient.chars().count() < 2 {
            return tx
                .send_text(owner, "Имя получателя слишком короткое. Введите еще раз.")
                .await;
        }

        let bottle_code = self.store.next_gift_bottle_code(&subject.id)?;
        let draft = GiftDraft {
            subject_id: subject.id.clone(),
            recipient: recipient.to_string(),
            bottle_code: bottle_code.clone(),
        };
        self.store
            .set_conversation_step(owner, &ConversationStep::AwaitGiftDecision { draft })?;

        let keyboard = InlineKeyboard::new().row(vec![
            InlineButton::new("Без сообщения", "gift-msg:none"),
            InlineButton::new("Добавить сообщение", "gift-msg:add"),
        ]);
        tx.send_keyboard(
            owner,
            &format!(
                "Получатель: {recipient}\nНомер бутылки: {bottle_code}\nДобавить персональное сообщение?"
            ),
            keyboard,
        )
        .await
    }

    async fn on_gift_decision(
        &self,
        owner: UserId,
        data: &str,
        callback_id: &str,
        tx: &dyn TransportPort,
    ) -> Result<()> {
        let Some(ConversationStep::AwaitGiftDecision { draft }) =
            self.store.conversation_step(owner)?
        else {
            return tx
                .answer_callback(
                    callback_id,
                    Some("Шаг устарел. Начните заново через QR напитка."),
                    true,
                )
                .await;
        };

        if data == "gift-msg:none" {
            tx.answer_callback(callback_id, None, false).await?;
            return self.finalize_gift(owner, draft, None, tx).await;
        }

        self.store
            .set_conversation_step(owner, &ConversationStep::AwaitGiftMessage { draft })?;
        tx.answer_callback(callback_id, None, false).await?;
        tx.send_text(owner, "Введите сообщение для получателя:").await
    }

    async fn finalize_gift(
        &self,
        owner: UserId,
        draft: GiftDraft,
        message: Option<String>,
        tx: &dyn TransportPort,
    ) -> Result<()> {
        let Some(subject) = self.store.subject_for_owner(&draft.subject_id, owner)? else {
            self.store.clear_conversation_step(owner)?;
            return tx
                .send_menu_text(owner, "Напиток не найден. Начните заново через QR напитка.")
                .await;
        };

        let link = self.store.create_share_link(NewShareLink {
            token: issue_unique_token(&self.store)?,
            subject_id: subject.id.clone(),
            kind: ShareLinkKind::Gift,
            gift_recipient: Some(draft.recipient.clone()),
            bottle_code: Some(draft.bottle_code.clone()),
            gift_message: message,
            created_by: owner,
        })?;

        let url = self.cfg.share_url(&link.token);
        let caption = format!(
            "Подарочный QR для {}\nПолучатель: {}\nНомер бутылки: {}\n{url}",
            subject.name, draft.recipient, draft.bottle_code
        );
        self.send_share(owner, &url, &format!("gift-{}.svg", link.token), &caption, tx)
            .await?;

        self.store.clear_conversation_step(owner)?;
        tx.send_menu_text(owner, "Подарочная ссылка создана и сохранена в базе.")
            .await
    }

    async fn send_share(
        &self,
        owner: UserId,
        url: &str,
        file_name: &str,
        caption: &str,
        tx: &dyn TransportPort,
    ) -> Result<()> {
        match self.qr.render_svg(url) {
            Some(svg) => {
                tx.send_document(owner, file_name, svg.into_bytes(), caption)
                    .await
            }
            None => tx.send_text(owner, caption).await,
        }
    }

    /// Fill cleaned text for entries that still lack it, best-effort.
    async fn polish_missing_entries(&self, subject: &Subject) -> Result<usize> {
        if !self.polisher.enabled() {
            return Ok(0);
        }

        let mut updated = 0usize;
        for entry in self.store.entries_for_subject(&subject.id)? {
            if entry.cleaned_text.is_some() {
                continue;
            }
            let Some(cleaned) = self.polisher.polish(&subject.name, &entry.raw_text).await else {
                continue;
            };
            let cleaned = strip_markdown_artifacts(&cleaned);
            if cleaned.is_empty() {
                continue;
            }
            self.store.update_entry_cleaned_text(&entry.id, &cleaned)?;
            updated += 1;
        }
        Ok(updated)
    }

    // -- Backup menu --

    async fn send_backup_menu(
        &self,
        owner: UserId,
        header: Option<&str>,
        tx: &dyn TransportPort,
    ) -> Result<()> {
        let setting = self.store.backup_setting(owner)?;
        let keyboard = InlineKeyboard::new()
            .row(vec![InlineButton::new("📤 Экспорт сейчас", "backup:export")])
            .row(vec![
                InlineButton::new("Выкл", "backup:set:off"),
                InlineButton::new("7 дней", "backup:set:weekly"),
            ])
            .row(vec![
                InlineButton::new("14 дней", "backup:set:biweekly"),
                InlineButton::new("30 дней", "backup:set:monthly"),
            ]);

        let mut lines = Vec::new();
        if let Some(header) = header {
            lines.push(header.to_string());
        }
        lines.push("Бэкап CSV отправляется в этот чат.".to_string());
        lines.push(format!("Текущая частота: {}", frequency_label(setting.frequency)));
        lines.push(format!(
            "Следующая отправка: {}",
            format_backup_date(setting.next_run_at.as_deref())
        ));
        lines.push(format!(
            "Последняя отправка: {}",
            format_backup_date(setting.last_sent_at.as_deref())
        ));

        tx.send_keyboard(owner, &lines.join("\n"), keyboard).await
    }

    async fn set_backup_frequency(
        &self,
        owner: UserId,
        raw: &str,
        callback_id: &str,
        tx: &dyn TransportPort,
    ) -> Result<()> {
        let Some(frequency) = BackupFrequency::parse(raw) else {
            return tx
                .answer_callback(callback_id, Some("Неверная частота"), true)
                .await;
        };

        let setting = self
            .store
            .set_backup_frequency(owner, frequency, Utc::now())?;
        tx.answer_callback(
            callback_id,
            Some(&format!("Сохранено: {}", frequency_label(setting.frequency))),
            false,
        )
        .await?;
        self.send_backup_menu(owner, Some("Настройки автобэкапа обновлены."), tx)
            .await
    }

    pub async fn send_backup_file(
        &self,
        owner: UserId,
        title: &str,
        tx: &dyn TransportPort,
    ) -> Result<()> {
        let backup = build_backup_csv(&self.store, owner)?;
        let file_name = backup_file_name(owner, &backup.generated_at);
        let caption = format!("{title}\n{}", summarize_backup(backup.subjects, backup.rows));

        tx.send_document(owner, &file_name, backup.csv.into_bytes(), &caption)
            .await
    }

    fn active_subject(&self, owner: UserId, subject_id: &str) -> Result<Option<Subject>> {
        let subject = self.store.subject_for_owner(subject_id, owner)?;
        if let Some(s) = &subject {
            if s.is_archived() {
                warn!(subject = %s.id, "selected subject is archived");
            }
        }
        Ok(subject.filter(|s| !s.is_archived()))
    }
}

fn format_history(subject_name: &str, entries: &[Entry]) -> String {
    let mut blocks = vec![format!("История: {subject_name}")];

    for (index, entry) in entries.iter().enumerate() {
        let raw = entry.raw_text.replace("\r\n", "\n");
        let raw = raw.trim();
        let mut lines = vec![format!("{}. {}", index + 1, entry.entry_date), raw.to_string()];

        if let Some(cleaned) = entry.cleaned_text.as_deref() {
            if cleaned_text_differs(raw, cleaned) {
                lines.push("_____________________________".to_string());
                lines.push("Аккуратная версия записи:".to_string());
                lines.push(cleaned.trim().to_string());
            }
        }

        blocks.push(lines.join("\n"));
    }

    blocks.join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::{PolisherDisabled, QrDisabled};
    use async_trait::async_trait;
    use std::path::PathBuf;
    use std::time::Duration as StdDuration;
    use tokio::sync::Mutex;

    #[derive(Debug, PartialEq, Eq)]
    enum Sent {
        Text(String),
        MenuText(String),
        Keyboard(String),
        Document { file_name: String, caption: String },
        Callback { text: Option<String>, alert: bool },
    }

    #[derive(Default)]
    struct RecordingTransport {
        sent: Mutex<Vec<Sent>>,
    }

    impl RecordingTransport {
        async fn take(&self) -> Vec<Sent> {
            std::mem::take(&mut *self.sent.lock().await)
        }
    }

    #[async_trait]
    impl TransportPort for RecordingTransport {
        async fn send_text(&self, _chat: UserId, text: &str) -> Result<()> {
            self.sent.lock().await.push(Sent::Text(text.to_string()));
            Ok(())
        }

        async fn send_menu_text(&self, _chat: UserId, text: &str) -> Result<()> {
            self.sent.lock().await.push(Sent::MenuText(text.to_string()));
            Ok(())
        }

        async fn send_keyboard(
            &self,
            _chat: UserId,
            text: &str,
            _keyboard: InlineKeyboard,
        ) -> Result<()> {
            self.sent.lock().await.push(Sent::Keyboard(text.to_string()));
            Ok(())
        }

        async fn send_document(
            &self,
            _chat: UserId,
            file_name: &str,
            _bytes: Vec<u8>,
            caption: &str,
        ) -> Result<()> {
            self.sent.lock().await.push(Sent::Document {
                file_name: file_name.to_string(),
                caption: caption.to_string(),
            });
            Ok(())
        }

        async fn answer_callback(
            &self,
            _callback_id: &str,
            text: Option<&str>,
            alert: bool,
        ) -> Result<()> {
            self.sent.lock().await.push(Sent::Callback {
                text: text.map(str::to_string),
                alert,
            });
            Ok(())
        }
    }

    fn test_config() -> Arc<Config> {
        Arc::new(Config {
            telegram_bot_token: "token".into(),
            public_base_url: "https://drinks.example".into(),
            db_path: PathBuf::from(":memory:"),
            polish_api_key: None,
            polish_base_url: "https://api.openai.com/v1".into(),
            polish_model: "gpt-4o-mini".into(),
            backup_poll_interval: StdDuration::from_secs(60),
        })
    }

    fn router_with(polisher: Arc<dyn Polisher>) -> (Router, Arc<Store>) {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let router = Router::new(test_config(), store.clone(), polisher, Arc::new(QrDisabled));
        (router, store)
    }

    fn router() -> (Router, Arc<Store>) {
        router_with(Arc::new(PolisherDisabled))
    }

    const OWNER: UserId = UserId(100);

    fn seed_owner(store: &Store) {
        store.ensure_user(OWNER, Some("tester"), None).unwrap();
    }

    #[tokio::test]
    async fn new_subject_flow_advances_to_entry_text() {
        let (router, store) = router();
        seed_owner(&store);
        let tx = RecordingTransport::default();

        router.handle_text(OWNER, MENU_NEW_SUBJECT, &tx).await.unwrap();
        assert_eq!(
            store.conversation_step(OWNER).unwrap(),
            Some(ConversationStep::AwaitSubjectName)
        );

        // Too short: re-prompt, stay on the same step.
        router.handle_text(OWNER, "С", &tx).await.unwrap();
        assert_eq!(
            store.conversation_step(OWNER).unwrap(),
            Some(ConversationStep::AwaitSubjectName)
        );

        router.handle_text(OWNER, "Сидр", &tx).await.unwrap();
        let subjects = store.list_subjects(OWNER, SubjectScope::Active).unwrap();
        assert_eq!(subjects.len(), 1);
        assert_eq!(subjects[0].name, "Сидр");
        assert_eq!(
            store.conversation_step(OWNER).unwrap(),
            Some(ConversationStep::AwaitEntryText {
                subject_id: subjects[0].id.clone()
            })
        );
    }

    #[tokio::test]
    async fn entry_with_date_prefix_is_stored_under_that_date() {
        let (router, store) = router();
        seed_owner(&store);
        let subject = store.create_subject(OWNER, "Медовуха").unwrap();
        store
            .set_conversation_step(
                OWNER,
                &ConversationStep::AwaitEntryText {
                    subject_id: subject.id.clone(),
                },
            )
            .unwrap();

        let tx = RecordingTransport::default();
        router
            .handle_text(OWNER, "24.02.2026 | Added 50g honey", &tx)
            .await
            .unwrap();

        let entries = store.entries_for_subject(&subject.id).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].entry_date, "2026-02-24");
        assert_eq!(entries[0].raw_text, "Added 50g honey");
        assert_eq!(entries[0].cleaned_text, None);
        assert_eq!(store.conversation_step(OWNER).unwrap(), None);
    }

    #[tokio::test]
    async fn entry_without_date_prefix_is_dated_today() {
        let (router, store) = router();
        seed_owner(&store);
        let subject = store.create_subject(OWNER, "Медовуха").unwrap();
        store
            .set_conversation_step(
                OWNER,
                &ConversationStep::AwaitEntryText {
                    subject_id: subject.id.clone(),
                },
            )
            .unwrap();

        let tx = RecordingTransport::default();
        router.handle_text(OWNER, "Tasted — sour", &tx).await.unwrap();

        let entries = store.entries_for_subject(&subject.id).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(
            entries[0].entry_date,
            Utc::now().date_naive().format("%Y-%m-%d").to_string()
        );
        assert_eq!(entries[0].raw_text, "Tasted — sour");
    }

    #[tokio::test]
    async fn archived_subject_clears_entry_step_without_writing() {
        let (router, store) = router();
        seed_owner(&store);
        let subject = store.create_subject(OWNER, "Медовуха").unwrap();
        store
            .set_conversation_step(
                OWNER,
                &ConversationStep::AwaitEntryText {
                    subject_id: subject.id.clone(),
                },
            )
            .unwrap();
        store.archive_subject(&subject.id, OWNER).unwrap();

        let tx = RecordingTransport::default();
        router.handle_text(OWNER, "запись", &tx).await.unwrap();

        assert_eq!(store.conversation_step(OWNER).unwrap(), None);
        assert!(store.entries_for_subject(&subject.id).unwrap().is_empty());
    }

    #[tokio::test]
    async fn foreign_subject_in_resumed_step_resets_to_idle() {
        let (router, store) = router();
        seed_owner(&store);
        let stranger = UserId(200);
        store.ensure_user(stranger, None, None).unwrap();
        let foreign = store.create_subject(stranger, "Чужой").unwrap();
        store
            .set_conversation_step(
                OWNER,
                &ConversationStep::AwaitEntryText {
                    subject_id: foreign.id.clone(),
                },
            )
            .unwrap();

        let tx = RecordingTransport::default();
        router.handle_text(OWNER, "запись", &tx).await.unwrap();

        assert_eq!(store.conversation_step(OWNER).unwrap(), None);
        assert!(store.entries_for_subject(&foreign.id).unwrap().is_empty());
    }

    #[tokio::test]
    async fn gift_flow_end_to_end_with_message() {
        let (router, store) = router();
        seed_owner(&store);
        let subject = store.create_subject(OWNER, "Сидр").unwrap();
        let tx = RecordingTransport::default();

        router
            .handle_callback(OWNER, "cb1", &format!("qr:gift:{}", subject.id), &tx)
            .await
            .unwrap();
        assert_eq!(
            store.conversation_step(OWNER).unwrap(),
            Some(ConversationStep::AwaitGiftRecipient {
                subject_id: subject.id.clone()
            })
        );

        router.handle_text(OWNER, "Анна", &tx).await.unwrap();
        let Some(ConversationStep::AwaitGiftDecision { draft }) =
            store.conversation_step(OWNER).unwrap()
        else {
            panic!("expected gift decision step");
        };
        assert_eq!(draft.recipient, "Анна");
        assert_eq!(draft.bottle_code, "001");

        router
            .handle_callback(OWNER, "cb2", "gift-msg:add", &tx)
            .await
            .unwrap();
        router.handle_text(OWNER, "С днем рождения!", &tx).await.unwrap();

        let links = store.share_links_for_export(OWNER).unwrap();
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].kind, ShareLinkKind::Gift);
        assert_eq!(links[0].gift_recipient.as_deref(), Some("Анна"));
        assert_eq!(links[0].bottle_code.as_deref(), Some("001"));
        assert_eq!(links[0].gift_message.as_deref(), Some("С днем рождения!"));
        assert_eq!(store.conversation_step(OWNER).unwrap(), None);
    }

    #[tokio::test]
    async fn unexpected_input_at_gift_decision_resets_to_idle() {
        let (router, store) = router();
        seed_owner(&store);
        let subject = store.create_subject(OWNER, "Сидр").unwrap();
        store
            .set_conversation_step(
                OWNER,
                &ConversationStep::AwaitGiftDecision {
                    draft: GiftDraft {
                        subject_id: subject.id.clone(),
                        recipient: "Анна".into(),
                        bottle_code: "001".into(),
                    },
                },
            )
            .unwrap();

        let tx = RecordingTransport::default();
        router.handle_text(OWNER, "что-то невпопад", &tx).await.unwrap();

        assert_eq!(store.conversation_step(OWNER).unwrap(), None);
        let sent = tx.take().await;
        assert!(sent.iter().any(|s| matches!(
            s,
            Sent::MenuText(t) if t.contains("Начните заново через QR напитка")
        )));
        assert!(store.share_links_for_export(OWNER).unwrap().is_empty());
    }

    #[tokio::test]
    async fn stale_gift_decision_callback_is_answered_with_alert() {
        let (router, store) = router();
        seed_owner(&store);

        let tx = RecordingTransport::default();
        router
            .handle_callback(OWNER, "cb", "gift-msg:none", &tx)
            .await
            .unwrap();

        let sent = tx.take().await;
        assert_eq!(
            sent,
            vec![Sent::Callback {
                text: Some("Шаг устарел. Начните заново через QR напитка.".into()),
                alert: true
            }]
        );
    }

    #[tokio::test]
    async fn plain_link_is_get_or_create() {
        let (router, store) = router();
        seed_owner(&store);
        let subject = store.create_subject(OWNER, "Сидр").unwrap();
        let tx = RecordingTransport::default();

        let data = format!("qr:plain:{}", subject.id);
        router.handle_callback(OWNER, "cb1", &data, &tx).await.unwrap();
        router.handle_callback(OWNER, "cb2", &data, &tx).await.unwrap();

        let links = store.share_links_for_export(OWNER).unwrap();
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].kind, ShareLinkKind::Plain);

        // QR rendering disabled: the share URL goes out as text.
        let sent = tx.take().await;
        let url = format!("https://drinks.example/q/{}", links[0].token);
        assert!(sent.iter().any(|s| matches!(s, Sent::Text(t) if t.contains(&url))));
    }

    struct CancellingPolisher {
        store: Arc<Store>,
    }

    #[async_trait]
    impl Polisher for CancellingPolisher {
        fn enabled(&self) -> bool {
            true
        }

        async fn polish(&self, _subject_name: &str, _text: &str) -> Option<String> {
            // Simulates the user cancelling while the cleanup call is in
            // flight.
            self.store.clear_conversation_step(OWNER).unwrap();
            Some("polished".to_string())
        }
    }

    #[tokio::test]
    async fn entry_result_is_discarded_when_step_changed_mid_flight() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        seed_owner(&store);
        let router = Router::new(
            test_config(),
            store.clone(),
            Arc::new(CancellingPolisher {
                store: store.clone(),
            }),
            Arc::new(QrDisabled),
        );

        let subject = store.create_subject(OWNER, "Сидр").unwrap();
        store
            .set_conversation_step(
                OWNER,
                &ConversationStep::AwaitEntryText {
                    subject_id: subject.id.clone(),
                },
            )
            .unwrap();

        let tx = RecordingTransport::default();
        router.handle_text(OWNER, "перелив", &tx).await.unwrap();

        assert!(store.entries_for_subject(&subject.id).unwrap().is_empty());
        let sent = tx.take().await;
        assert!(sent.iter().any(|s| matches!(
            s,
            Sent::MenuText(t) if t.contains("запись не сохранена")
        )));
    }

    #[tokio::test]
    async fn cancel_clears_any_pending_step() {
        let (router, store) = router();
        seed_owner(&store);
        store
            .set_conversation_step(OWNER, &ConversationStep::AwaitSubjectName)
            .unwrap();

        let tx = RecordingTransport::default();
        router
            .handle_command(OWNER, BotCommand::Cancel, &tx)
            .await
            .unwrap();
        assert_eq!(store.conversation_step(OWNER).unwrap(), None);
    }

    #[tokio::test]
    async fn manual_export_sends_csv_document() {
        let (router, store) = router();
        seed_owner(&store);
        store.create_subject(OWNER, "Сидр").unwrap();

        let tx = RecordingTransport::default();
        router
            .handle_callback(OWNER, "cb", "backup:export", &tx)
            .await
            .unwrap();

        let sent = tx.take().await;
        assert!(sent.iter().any(|s| matches!(
            s,
            Sent::Document { file_name, caption }
                if file_name.starts_with("backup-100-") && caption.contains("Напитков: 1")
        )));
    }

    #[tokio::test]
    async fn backup_frequency_button_updates_setting() {
        let (router, store) = router();
        seed_owner(&store);

        let tx = RecordingTransport::default();
        router
            .handle_callback(OWNER, "cb", "backup:set:monthly", &tx)
            .await
            .unwrap();

        let setting = store.backup_setting(OWNER).unwrap();
        assert_eq!(setting.frequency, BackupFrequency::Monthly);
        assert!(setting.next_run_at.is_some());

        router
            .handle_callback(OWNER, "cb2", "backup:set:off", &tx)
            .await
            .unwrap();
        let off = store.backup_setting(OWNER).unwrap();
        assert_eq!(off.frequency, BackupFrequency::Off);
        assert_eq!(off.next_run_at, None);
    }
}
