use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{errors::Error, Result};

/// Typed configuration for the bot.
#[derive(Clone, Debug)]
pub struct Config {
    // Core
    pub telegram_bot_token: String,
    pub public_base_url: String,
    pub db_path: PathBuf,

    // Text cleanup (optional collaborator)
    pub polish_api_key: Option<String>,
    pub polish_base_url: String,
    pub polish_model: String,

    // Backup scheduler
    pub backup_poll_interval: Duration,
}

impl Config {
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));

        let telegram_bot_token = env_str("TELEGRAM_BOT_TOKEN").unwrap_or_default();
        if telegram_bot_token.trim().is_empty() {
            return Err(Error::Config(
                "TELEGRAM_BOT_TOKEN environment variable is required".to_string(),
            ));
        }

        let public_base_url = env_str("PUBLIC_BASE_URL")
            .and_then(non_empty)
            .ok_or_else(|| {
                Error::Config("PUBLIC_BASE_URL environment variable is required".to_string())
            })?
            .trim_end_matches('/')
            .to_string();

        let db_path = env_path("DB_PATH").unwrap_or_else(|| PathBuf::from("./data/drinks.sqlite"));

        let polish_api_key = env_str("POLISH_API_KEY").and_then(non_empty);
        let polish_base_url = env_str("POLISH_BASE_URL")
            .and_then(non_empty)
            .unwrap_or_else(|| "https://api.openai.com/v1".to_string())
            .trim_end_matches('/')
            .to_string();
        let polish_model = env_str("POLISH_MODEL")
            .and_then(non_empty)
            .unwrap_or_else(|| "gpt-4o-mini".to_string());

        let backup_poll_interval = env_str("BACKUP_POLL_INTERVAL_SECS")
            .and_then(|s| s.trim().parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(Duration::from_secs(60));

        Ok(Self {
            telegram_bot_token,
            public_base_url,
            db_path,
            polish_api_key,
            polish_base_url,
            polish_model,
            backup_poll_interval,
        })
    }

    /// Public URL the share token resolves to on the web renderer.
    pub fn share_url(&self, token: &str) -> String {
        format!("{}/q/{token}", self.public_base_url)
    }
}

fn env_str(key: &str) -> Option<String> {
    env::var(key).ok()
}

fn env_path(key: &str) -> Option<PathBuf> {
    env::var_os(key).map(PathBuf::from)
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}

fn load_dotenv_if_present(path: &Path) {
    let Ok(contents) = fs::read_to_string(path) else {
        return;
    };

    for raw in contents.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((k, v)) = line.split_once('=') else {
            continue;
        };

        let key = k.trim();
        if key.is_empty() {
            continue;
        }
        if env::var_os(key).is_some() {
            continue; // do not override existing env
        }

        let mut value = v.trim();
        if value.len() >= 2
            && ((value.starts_with('"') && value.ends_with('"'))
                || (value.starts_with('\'') && value.ends_with('\'')))
        {
            value = &value[1..value.len() - 1];
        }
        env::set_var(key, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn share_url_joins_base_and_token() {
        let cfg = Config {
            telegram_bot_token: "t".into(),
            public_base_url: "https://drinks.example".into(),
            db_path: PathBuf::from(":memory:"),
            polish_api_key: None,
            polish_base_url: "https://api.openai.com/v1".into(),
            polish_model: "gpt-4o-mini".into(),
            backup_poll_interval: Duration::from_secs(60),
        };
        assert_eq!(cfg.share_url("abc"), "https://drinks.example/q/abc");
    }
}
