//! Text-polishing adapter.
//!
//! Calls an OpenAI-compatible chat-completions endpoint to fix spelling and
//! punctuation in diary entries. Polishing is strictly best-effort: any
//! failure is logged and the caller keeps the raw text.

use async_trait::async_trait;
use serde_json::json;
use tracing::warn;

use ddb_core::ports::Polisher;

const SYSTEM_PROMPT: &str = "Ты корректор дневника домашних напитков. \
Исправь орфографию и пунктуацию в заметке, сохрани смысл, термины и числа без изменений. \
Не добавляй ничего от себя, не используй разметку markdown. \
Верни только исправленный текст.";

#[derive(Clone, Debug)]
pub struct PolishClient {
    api_key: String,
    base_url: String,
    model: String,
    http: reqwest::Client,
}

impl PolishClient {
    pub fn new(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .expect("reqwest client build");
        Self {
            api_key: api_key.into(),
            base_url: base_url.into(),
            model: model.into(),
            http,
        }
    }

    async fn complete(&self, subject_name: &str, text: &str) -> Result<String, String> {
        let body = json!({
            "model": self.model,
            "temperature": 0.1,
            "messages": [
                { "role": "system", "content": SYSTEM_PROMPT },
                {
                    "role": "user",
                    "content": format!("Напиток: {subject_name}\nЗаметка:\n{text}"),
                },
            ],
        });

        let resp = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| format!("polish request error: {e}"))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(format!(
                "polish failed: {status} {}",
                body.chars().take(200).collect::<String>()
            ));
        }

        let v: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| format!("polish json error: {e}"))?;

        let content = v
            .pointer("/choices/0/message/content")
            .and_then(|c| c.as_str())
            .unwrap_or("")
            .trim()
            .to_string();

        if content.is_empty() {
            return Err("polish returned empty text".to_string());
        }
        Ok(content)
    }
}

#[async_trait]
impl Polisher for PolishClient {
    fn enabled(&self) -> bool {
        true
    }

    async fn polish(&self, subject_name: &str, text: &str) -> Option<String> {
        match self.complete(subject_name, text).await {
            Ok(cleaned) => Some(cleaned),
            Err(e) => {
                warn!(error = %e, "polishing skipped");
                None
            }
        }
    }
}
