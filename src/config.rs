//! Configuration types.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;
use crate::notify::event::DEFAULT_EVENT_CAPACITY;

/// Push gateway the webhook sink posts to.
#[derive(Debug, Clone)]
pub struct PushConfig {
    pub url: String,
    pub token: Option<SecretString>,
}

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// SQLite database file.
    pub db_path: PathBuf,
    /// How long a writer waits for the store's write lock.
    pub lock_timeout: Duration,
    /// Capacity of the event queue between engine and router.
    pub event_queue_capacity: usize,
    /// Per-notification delivery timeout.
    pub notify_timeout: Duration,
    /// Director approval archives the letter immediately.
    pub archive_on_approval: bool,
    /// Directory scanned letters live under. Unset: only require a recorded path.
    pub attachment_root: Option<PathBuf>,
    /// Unset: notifications are only logged.
    pub push: Option<PushConfig>,
    /// Daily rolling log files go here when set.
    pub log_dir: Option<PathBuf>,
    /// Attempts per command when the store is contended.
    pub max_retries: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("./data/digimail.db"),
            lock_timeout: Duration::from_secs(5),
            event_queue_capacity: DEFAULT_EVENT_CAPACITY,
            notify_timeout: Duration::from_secs(10),
            archive_on_approval: true,
            attachment_root: None,
            push: None,
            log_dir: None,
            max_retries: 3,
        }
    }
}

impl EngineConfig {
    /// Read `DIGIMAIL_*` variables, falling back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup. Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let defaults = Self::default();

        let push = match get("DIGIMAIL_PUSH_URL") {
            Some(url) => Some(PushConfig {
                url,
                token: get("DIGIMAIL_PUSH_TOKEN").map(SecretString::from),
            }),
            None => None,
        };

        let config = Self {
            db_path: get("DIGIMAIL_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.db_path),
            lock_timeout: parse(&get, "DIGIMAIL_LOCK_TIMEOUT_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.lock_timeout),
            event_queue_capacity: parse(&get, "DIGIMAIL_EVENT_QUEUE_CAPACITY")?
                .unwrap_or(defaults.event_queue_capacity),
            notify_timeout: parse(&get, "DIGIMAIL_NOTIFY_TIMEOUT_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.notify_timeout),
            archive_on_approval: parse(&get, "DIGIMAIL_ARCHIVE_ON_APPROVAL")?
                .unwrap_or(defaults.archive_on_approval),
            attachment_root: get("DIGIMAIL_ATTACHMENT_ROOT").map(PathBuf::from),
            push,
            log_dir: get("DIGIMAIL_LOG_DIR").map(PathBuf::from),
            max_retries: parse(&get, "DIGIMAIL_MAX_RETRIES")?.unwrap_or(defaults.max_retries),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.lock_timeout.is_zero() {
            return Err(invalid("DIGIMAIL_LOCK_TIMEOUT_MS", "must be greater than zero"));
        }
        if self.event_queue_capacity == 0 {
            return Err(invalid("DIGIMAIL_EVENT_QUEUE_CAPACITY", "must be greater than zero"));
        }
        if self.notify_timeout.is_zero() {
            return Err(invalid("DIGIMAIL_NOTIFY_TIMEOUT_SECS", "must be greater than zero"));
        }
        if self.max_retries == 0 {
            return Err(invalid("DIGIMAIL_MAX_RETRIES", "must allow at least one attempt"));
        }
        if let Some(ref push) = self.push
            && !(push.url.starts_with("http://") || push.url.starts_with("https://"))
        {
            return Err(invalid("DIGIMAIL_PUSH_URL", "must be an http(s) URL"));
        }
        Ok(())
    }
}

fn parse<T, G>(get: &G, key: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    get(key)
        .map(|raw| raw.parse::<T>().map_err(|e| invalid(key, format!("{raw:?}: {e}"))))
        .transpose()
}

fn invalid(key: &str, message: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        message: message.into(),
    }
}
