use std::{env, fs, path::Path, time::Duration};

use crate::{errors::Error, Result};

pub const DEFAULT_VISION_QUESTION: &str =
    "Analyze this medical image or tablet and explain what it is.";

/// Typed configuration for the bot process.
#[derive(Clone, Debug)]
pub struct Config {
    // External analysis service
    pub analysis_api_url: String,
    pub analysis_timeout: Duration,

    // WPPConnect server
    pub wpp_base_url: String,
    pub wpp_session: String,
    pub wpp_token: String,

    // Inbound webhook
    pub webhook_bind: String,
    pub webhook_secret: Option<String>,

    // Sessions
    pub session_ttl: Option<Duration>,
    pub session_sweep_interval: Duration,

    // Outbound throttling
    pub throttle_global: Duration,
    pub throttle_per_chat: Duration,

    // Bot behaviour
    pub vision_default_question: String,
}

impl Config {
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup (env in production, a map in tests).
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let str_or = |key: &str, default: &str| {
            get(key)
                .and_then(non_empty)
                .unwrap_or_else(|| default.to_string())
        };
        let u64_or = |key: &str, default: u64| -> Result<u64> {
            match get(key).and_then(non_empty) {
                None => Ok(default),
                Some(raw) => raw.trim().parse::<u64>().map_err(|_| {
                    Error::Config(format!("{key} must be a non-negative integer, got {raw:?}"))
                }),
            }
        };

        let wpp_token = get("WPP_TOKEN").and_then(non_empty).ok_or_else(|| {
            Error::Config("WPP_TOKEN environment variable is required".to_string())
        })?;

        let analysis_api_url = trim_trailing_slash(str_or("ANALYSIS_API_URL", "http://127.0.0.1:8000"));
        let analysis_timeout = Duration::from_secs(u64_or("ANALYSIS_TIMEOUT_SECS", 120)?);

        let wpp_base_url = trim_trailing_slash(str_or("WPP_BASE_URL", "http://127.0.0.1:21465"));
        let wpp_session = str_or("WPP_SESSION", "arogya-bot");

        let webhook_bind = str_or("WEBHOOK_BIND", "0.0.0.0:8080");
        let webhook_secret = get("WEBHOOK_SECRET").and_then(non_empty);

        // 0 disables expiry (sessions live as long as the process).
        let session_ttl = match u64_or("SESSION_TTL_SECS", 0)? {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };
        let session_sweep_interval = Duration::from_secs(u64_or("SESSION_SWEEP_SECS", 300)?.max(1));

        let throttle_global = Duration::from_millis(u64_or("THROTTLE_GLOBAL_MS", 40)?);
        let throttle_per_chat = Duration::from_millis(u64_or("THROTTLE_PER_CHAT_MS", 250)?);

        let vision_default_question = str_or("VISION_DEFAULT_QUESTION", DEFAULT_VISION_QUESTION);

        Ok(Self {
            analysis_api_url,
            analysis_timeout,
            wpp_base_url,
            wpp_session,
            wpp_token,
            webhook_bind,
            webhook_secret,
            session_ttl,
            session_sweep_interval,
            throttle_global,
            throttle_per_chat,
            vision_default_question,
        })
    }
}

fn load_dotenv_if_present(path: &Path) {
    let Ok(contents) = fs::read_to_string(path) else {
        return;
    };

    for (key, val) in parse_dotenv(&contents) {
        if env::var_os(&key).is_some() {
            continue; // do not override existing env
        }
        env::set_var(key, val);
    }
}

fn parse_dotenv(contents: &str) -> Vec<(String, String)> {
    let mut out = Vec::new();
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

        let mut val = v.trim().to_string();
        // Strip optional surrounding quotes.
        if val.len() >= 2
            && ((val.starts_with('"') && val.ends_with('"'))
                || (val.starts_with('\'') && val.ends_with('\'')))
        {
            val = val[1..val.len() - 1].to_string();
        }

        out.push((key.to_string(), val));
    }
    out
}

fn trim_trailing_slash(s: String) -> String {
    s.trim_end_matches('/').to_string()
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}
