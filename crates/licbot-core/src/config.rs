use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{errors::Error, Result};

/// Typed configuration for the bot, loaded from the environment
/// (with optional `.env` file support).
#[derive(Clone, Debug)]
pub struct Config {
    // Core
    pub telegram_bot_token: String,
    pub openrouter_api_key: String,

    // Admin bot (optional; password must be provisioned explicitly)
    pub admin_bot_token: Option<String>,
    pub admin_password: Option<String>,

    // Licensing
    pub data_dir: PathBuf,
    pub purge_expired: bool,
    pub sweep_interval: Duration,

    // Chat relay
    pub chat_model: String,
    pub prompt_file: PathBuf,
    pub memory_limit: usize,
    pub request_timeout: Duration,
}

impl Config {
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from an injectable variable lookup so validation is testable
    /// without racing on the process environment.
    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let telegram_bot_token = lookup("TELEGRAM_BOT_TOKEN").unwrap_or_default();
        if telegram_bot_token.trim().is_empty() {
            return Err(Error::Config(
                "TELEGRAM_BOT_TOKEN environment variable is required".to_string(),
            ));
        }

        let openrouter_api_key = lookup("OPENROUTER_API_KEY").unwrap_or_default();
        if openrouter_api_key.trim().is_empty() {
            return Err(Error::Config(
                "OPENROUTER_API_KEY environment variable is required".to_string(),
            ));
        }

        let admin_bot_token = lookup("ADMIN_BOT_TOKEN").and_then(non_empty);
        let admin_password = lookup("ADMIN_PASSWORD").and_then(non_empty);

        // Fail closed: an admin surface without an explicitly provisioned
        // password must refuse to start rather than fall back to a default.
        if admin_bot_token.is_some() && admin_password.is_none() {
            return Err(Error::Config(
                "ADMIN_PASSWORD is required when ADMIN_BOT_TOKEN is set".to_string(),
            ));
        }

        let data_dir = to_path(lookup("LICENSE_DATA_PATH")).unwrap_or_else(|| PathBuf::from("./data"));
        let purge_expired = parse_bool(lookup("LICENSE_PURGE_EXPIRED")).unwrap_or(false);
        let sweep_interval =
            Duration::from_secs(parse_u64(lookup("LICENSE_SWEEP_INTERVAL_SECS")).unwrap_or(60));

        let chat_model =
            lookup("CHAT_MODEL").unwrap_or_else(|| "deepseek/deepseek-chat".to_string());
        let prompt_file =
            to_path(lookup("PROMPT_FILE")).unwrap_or_else(|| PathBuf::from("./prompt.txt"));
        let memory_limit = parse_usize(lookup("MEMORY_LIMIT")).unwrap_or(1000);
        let request_timeout =
            Duration::from_millis(parse_u64(lookup("REQUEST_TIMEOUT_MS")).unwrap_or(60_000));

        Ok(Self {
            telegram_bot_token,
            openrouter_api_key,
            admin_bot_token,
            admin_password,
            data_dir,
            purge_expired,
            sweep_interval,
            chat_model,
            prompt_file,
            memory_limit,
            request_timeout,
        })
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

        let mut val = v.trim().to_string();
        // Strip optional surrounding quotes.
        if val.len() >= 2
            && ((val.starts_with('"') && val.ends_with('"'))
                || (val.starts_with('\'') && val.ends_with('\'')))
        {
            val = val[1..val.len() - 1].to_string();
        }

        env::set_var(key, val);
    }
}

fn parse_bool(v: Option<String>) -> Option<bool> {
    v.map(|s| {
        matches!(
            s.trim().to_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        )
    })
}

fn parse_u64(v: Option<String>) -> Option<u64> {
    v.and_then(|s| s.trim().parse::<u64>().ok())
}

fn parse_usize(v: Option<String>) -> Option<usize> {
    v.and_then(|s| s.trim().parse::<usize>().ok())
}

fn to_path(v: Option<String>) -> Option<PathBuf> {
    v.map(PathBuf::from)
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn missing_bot_token_is_rejected() {
        let err = Config::from_lookup(lookup_from(&[("OPENROUTER_API_KEY", "or-key")])).unwrap_err();
        assert!(matches!(err, Error::Config(msg) if msg.contains("TELEGRAM_BOT_TOKEN")));
    }

    #[test]
    fn missing_model_api_key_is_rejected() {
        let err = Config::from_lookup(lookup_from(&[("TELEGRAM_BOT_TOKEN", "tg-token")])).unwrap_err();
        assert!(matches!(err, Error::Config(msg) if msg.contains("OPENROUTER_API_KEY")));
    }

    #[test]
    fn admin_bot_without_password_fails_closed() {
        let err = Config::from_lookup(lookup_from(&[
            ("TELEGRAM_BOT_TOKEN", "tg-token"),
            ("OPENROUTER_API_KEY", "or-key"),
            ("ADMIN_BOT_TOKEN", "admin-token"),
        ]))
        .unwrap_err();
        assert!(matches!(err, Error::Config(msg) if msg.contains("ADMIN_PASSWORD")));
    }

    #[test]
    fn blank_admin_password_also_fails_closed() {
        let err = Config::from_lookup(lookup_from(&[
            ("TELEGRAM_BOT_TOKEN", "tg-token"),
            ("OPENROUTER_API_KEY", "or-key"),
            ("ADMIN_BOT_TOKEN", "admin-token"),
            ("ADMIN_PASSWORD", "   "),
        ]))
        .unwrap_err();
        assert!(matches!(err, Error::Config(msg) if msg.contains("ADMIN_PASSWORD")));
    }

    #[test]
    fn minimal_environment_gets_the_documented_defaults() {
        let cfg = Config::from_lookup(lookup_from(&[
            ("TELEGRAM_BOT_TOKEN", "tg-token"),
            ("OPENROUTER_API_KEY", "or-key"),
        ]))
        .unwrap();

        assert!(cfg.admin_bot_token.is_none());
        assert_eq!(cfg.data_dir, PathBuf::from("./data"));
        assert!(!cfg.purge_expired);
        assert_eq!(cfg.sweep_interval, Duration::from_secs(60));
        assert_eq!(cfg.chat_model, "deepseek/deepseek-chat");
        assert_eq!(cfg.memory_limit, 1000);
    }

    #[test]
    fn admin_bot_with_password_is_accepted() {
        let cfg = Config::from_lookup(lookup_from(&[
            ("TELEGRAM_BOT_TOKEN", "tg-token"),
            ("OPENROUTER_API_KEY", "or-key"),
            ("ADMIN_BOT_TOKEN", "admin-token"),
            ("ADMIN_PASSWORD", "s3cret"),
            ("LICENSE_PURGE_EXPIRED", "true"),
            ("LICENSE_SWEEP_INTERVAL_SECS", "15"),
        ]))
        .unwrap();

        assert_eq!(cfg.admin_password.as_deref(), Some("s3cret"));
        assert!(cfg.purge_expired);
        assert_eq!(cfg.sweep_interval, Duration::from_secs(15));
    }
}
