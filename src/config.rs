//! Configuration types.

use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;

/// Bot configuration, read from `RIDESHARE_*` environment variables.
#[derive(Debug, Clone)]
pub struct BotConfig {
    /// Telegram Bot API token. `None` runs the local CLI channel instead.
    pub bot_token: Option<SecretString>,
    /// Channel handle (e.g. `@rides_news`) users must be subscribed to.
    /// Empty disables the subscription check.
    pub required_channel: String,
    /// Privileged identities allowed to use the admin surface.
    pub admin_ids: HashSet<i64>,
    /// SQLite database path.
    pub db_path: PathBuf,
    /// Interval between lifecycle sweeps.
    pub sweep_interval: Duration,
    /// Idle sessions older than this are evicted.
    pub session_ttl: Duration,
    /// Interval between session prune passes.
    pub session_prune_interval: Duration,
    /// Link to the full text of the user agreement.
    pub terms_url: String,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            bot_token: None,
            required_channel: String::new(),
            admin_ids: HashSet::new(),
            db_path: PathBuf::from("./data/rideshare.db"),
            sweep_interval: Duration::from_secs(6 * 3600), // 6 hours
            session_ttl: Duration::from_secs(24 * 3600),   // 1 day
            session_prune_interval: Duration::from_secs(600),
            terms_url: "https://example.org/rideshare/terms".to_string(),
        }
    }
}

impl BotConfig {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup (tests pass a map).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(token) = lookup("RIDESHARE_BOT_TOKEN").filter(|t| !t.trim().is_empty()) {
            config.bot_token = Some(SecretString::from(token.trim().to_string()));
        }
        if let Some(channel) = lookup("RIDESHARE_REQUIRED_CHANNEL") {
            config.required_channel = channel.trim().to_string();
        }
        if let Some(ids) = lookup("RIDESHARE_ADMIN_IDS") {
            config.admin_ids = parse_admin_ids(&ids)?;
        }
        if let Some(path) = lookup("RIDESHARE_DB_PATH").filter(|p| !p.trim().is_empty()) {
            config.db_path = PathBuf::from(path.trim());
        }
        if let Some(secs) = lookup("RIDESHARE_SWEEP_INTERVAL_SECS") {
            config.sweep_interval = parse_secs("RIDESHARE_SWEEP_INTERVAL_SECS", &secs)?;
        }
        if let Some(secs) = lookup("RIDESHARE_SESSION_TTL_SECS") {
            config.session_ttl = parse_secs("RIDESHARE_SESSION_TTL_SECS", &secs)?;
        }
        if let Some(url) = lookup("RIDESHARE_TERMS_URL").filter(|u| !u.trim().is_empty()) {
            config.terms_url = url.trim().to_string();
        }

        Ok(config)
    }
}

fn parse_admin_ids(raw: &str) -> Result<HashSet<i64>, ConfigError> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<i64>().map_err(|e| ConfigError::InvalidValue {
                key: "RIDESHARE_ADMIN_IDS".into(),
                message: format!("'{s}': {e}"),
            })
        })
        .collect()
}

fn parse_secs(key: &str, raw: &str) -> Result<Duration, ConfigError> {
    let secs: u64 = raw.trim().parse().map_err(|e| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("'{raw}': {e}"),
    })?;
    if secs == 0 {
        return Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: "must be greater than zero".into(),
        });
    }
    Ok(Duration::from_secs(secs))
}
