use std::{
    collections::HashMap,
    env, fs,
    path::Path,
    time::Duration,
};

use crate::{errors::Error, Result};

pub const DEFAULT_API_URL: &str = "https://api.spacebar.chat/api/v9";
pub const DEFAULT_MAX_ATTACHMENTS: usize = 10;

/// Typed configuration for the sync core and its adapters.
#[derive(Clone, Debug)]
pub struct Config {
    // REST transport
    pub api_base_url: String,
    pub token: Option<String>,
    pub request_timeout: Duration,

    // Signed-in account used to stamp queued messages
    pub account_id: Option<u64>,
    pub account_name: String,

    // Sending
    pub max_attachments: usize,

    // Typing
    /// Quiet period after the last keystroke before "stop typing" fires.
    pub typing_quiet_period: Duration,
    /// Minimum spacing between outbound "typing" signals.
    pub typing_signal_cooldown: Duration,
    /// How long a remote user's TYPING_START stays valid.
    pub remote_typing_ttl: Duration,

    // Notifications
    pub event_buffer: usize,

    // Experiments (name -> treatment)
    pub experiments: HashMap<String, u32>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_URL.to_string(),
            token: None,
            request_timeout: Duration::from_millis(15_000),
            account_id: None,
            account_name: "me".to_string(),
            max_attachments: DEFAULT_MAX_ATTACHMENTS,
            typing_quiet_period: Duration::from_millis(10_000),
            typing_signal_cooldown: Duration::from_millis(10_000),
            remote_typing_ttl: Duration::from_millis(10_000),
            event_buffer: 256,
            experiments: HashMap::new(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));
        let defaults = Self::default();

        let api_base_url = env_str("CHATSYNC_API_URL")
            .and_then(non_empty)
            .map(|s| s.trim_end_matches('/').to_string())
            .unwrap_or(defaults.api_base_url);
        if !(api_base_url.starts_with("http://") || api_base_url.starts_with("https://")) {
            return Err(Error::Config(format!(
                "CHATSYNC_API_URL must be an http(s) URL, got {api_base_url}"
            )));
        }

        let token = env_str("CHATSYNC_TOKEN").and_then(non_empty);
        let account_id = env_u64("CHATSYNC_ACCOUNT_ID");
        let account_name = env_str("CHATSYNC_ACCOUNT_NAME")
            .and_then(non_empty)
            .unwrap_or(defaults.account_name);

        let max_attachments =
            env_usize("CHATSYNC_MAX_ATTACHMENTS").unwrap_or(defaults.max_attachments);
        if max_attachments == 0 {
            return Err(Error::Config(
                "CHATSYNC_MAX_ATTACHMENTS must be at least 1".to_string(),
            ));
        }

        let request_timeout =
            env_millis("CHATSYNC_REQUEST_TIMEOUT_MS").unwrap_or(defaults.request_timeout);
        let typing_quiet_period =
            env_millis("CHATSYNC_TYPING_QUIET_MS").unwrap_or(defaults.typing_quiet_period);
        let typing_signal_cooldown =
            env_millis("CHATSYNC_TYPING_COOLDOWN_MS").unwrap_or(defaults.typing_signal_cooldown);
        let remote_typing_ttl =
            env_millis("CHATSYNC_REMOTE_TYPING_TTL_MS").unwrap_or(defaults.remote_typing_ttl);

        let event_buffer = env_usize("CHATSYNC_EVENT_BUFFER")
            .unwrap_or(defaults.event_buffer)
            .max(1);

        let experiments = parse_experiments(env_str("CHATSYNC_EXPERIMENTS"));

        Ok(Self {
            api_base_url,
            token,
            request_timeout,
            account_id,
            account_name,
            max_attachments,
            typing_quiet_period,
            typing_signal_cooldown,
            remote_typing_ttl,
            event_buffer,
            experiments,
        })
    }
}

/// Parse `name=treatment` pairs separated by commas. Malformed pairs are skipped.
pub fn parse_experiments(v: Option<String>) -> HashMap<String, u32> {
    v.unwrap_or_default()
        .split(',')
        .filter_map(|pair| {
            let (name, treatment) = pair.split_once('=')?;
            let name = name.trim();
            if name.is_empty() {
                return None;
            }
            let treatment = treatment.trim().parse::<u32>().ok()?;
            Some((name.to_string(), treatment))
        })
        .collect()
}

fn env_str(key: &str) -> Option<String> {
    env::var(key).ok()
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
        if val.len() >= 2
            && ((val.starts_with('"') && val.ends_with('"'))
                || (val.starts_with('\'') && val.ends_with('\'')))
        {
            val = val[1..val.len() - 1].to_string();
        }

        env::set_var(key, val);
    }
}

fn env_u64(key: &str) -> Option<u64> {
    env_str(key).and_then(|s| s.trim().parse::<u64>().ok())
}

fn env_usize(key: &str) -> Option<usize> {
    env_str(key).and_then(|s| s.trim().parse::<usize>().ok())
}

fn env_millis(key: &str) -> Option<Duration> {
    env_u64(key).map(Duration::from_millis)
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}
