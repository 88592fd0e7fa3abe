//! Ports (traits) for the external collaborators.
//!
//! Telegram is the first transport implementation; the shape is kept
//! messenger-agnostic so the router and scheduler never see teloxide
//! types. The cleanup service and QR rendering are optional: both degrade
//! gracefully when disabled.

use async_trait::async_trait;

use crate::domain::UserId;
use crate::Result;

/// Inline keyboard (buttons under a message).
#[derive(Clone, Debug, Default)]
pub struct InlineKeyboard {
    pub rows: Vec<Vec<InlineButton>>,
}

#[derive(Clone, Debug)]
pub struct InlineButton {
    pub label: String,
    pub data: String,
}

impl InlineButton {
    pub fn new(label: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            data: data.into(),
        }
    }
}

impl InlineKeyboard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn row(mut self, buttons: Vec<InlineButton>) -> Self {
        self.rows.push(buttons);
        self
    }
}

/// Outbound side of the chat transport.
///
/// Delivery is at-least-once with no ordering guarantee across users;
/// conversation turns for a single user are processed one at a time.
#[async_trait]
pub trait TransportPort: Send + Sync {
    async fn send_text(&self, chat: UserId, text: &str) -> Result<()>;

    /// Text with the persistent main-menu reply keyboard attached.
    async fn send_menu_text(&self, chat: UserId, text: &str) -> Result<()>;

    async fn send_keyboard(&self, chat: UserId, text: &str, keyboard: InlineKeyboard)
        -> Result<()>;

    async fn send_document(
        &self,
        chat: UserId,
        file_name: &str,
        bytes: Vec<u8>,
        caption: &str,
    ) -> Result<()>;

    async fn answer_callback(&self, callback_id: &str, text: Option<&str>, alert: bool)
        -> Result<()>;
}

/// Optional text-cleanup collaborator.
#[async_trait]
pub trait Polisher: Send + Sync {
    fn enabled(&self) -> bool;

    /// Best-effort cleanup of an entry text. `None` on any failure or when
    /// disabled; callers keep the raw text and surface no error.
    async fn polish(&self, subject_name: &str, text: &str) -> Option<String>;
}

/// No-op polisher used when no API key is configured.
pub struct PolisherDisabled;

#[async_trait]
impl Polisher for PolisherDisabled {
    fn enabled(&self) -> bool {
        false
    }

    async fn polish(&self, _subject_name: &str, _text: &str) -> Option<String> {
        None
    }
}

/// Optional QR renderer for share URLs.
pub trait QrRenderer: Send + Sync {
    /// SVG document for the url, or `None` when rendering is unavailable
    /// (the share URL is then sent as text instead).
    fn render_svg(&self, url: &str) -> Option<String>;
}

/// Disabled renderer; share flows fall back to plain URLs.
pub struct QrDisabled;

impl QrRenderer for QrDisabled {
    fn render_svg(&self, _url: &str) -> Option<String> {
        None
    }
}
