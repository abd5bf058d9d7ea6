use std::{env, fmt, net::SocketAddr, path::PathBuf, time::Duration};

use url::Url;

use super::server_bind_address;

const DEFAULT_GAME_CACHE_PATH: &str = "cache.json";
const DEFAULT_EVENT_LOG_DIR: &str = "logs";
const DEFAULT_HELIX_TIMEOUT_SECS: u64 = 10;
const DEFAULT_LEASE_SECS: u64 = 864_000;

/// Application runtime environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
    Test,
}

impl Environment {
    fn from_str(value: &str) -> Result<Self, ConfigError> {
        match value {
            "development" | "dev" => Ok(Self::Development),
            "production" | "prod" => Ok(Self::Production),
            "test" => Ok(Self::Test),
            other => Err(ConfigError::InvalidEnvironment(other.to_string())),
        }
    }

    /// Returns the canonical name used for logging/metrics labels.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Production => "production",
            Self::Test => "test",
        }
    }
}

/// Twitch application credentials and the channel to track.
#[derive(Clone)]
pub struct TwitchConfig {
    pub client_id: String,
    pub client_secret: String,
    pub channel: String,
}

impl fmt::Debug for TwitchConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TwitchConfig")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("channel", &self.channel)
            .finish()
    }
}

/// Public callback and signing secret used for the WebSub subscription.
#[derive(Clone)]
pub struct WebhookConfig {
    /// Full callback URL, `/webhook` already appended.
    pub callback_url: Url,
    pub secret: String,
    pub lease: Duration,
}

impl fmt::Debug for WebhookConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebhookConfig")
            .field("callback_url", &self.callback_url.as_str())
            .field("secret", &"<redacted>")
            .field("lease", &self.lease)
            .finish()
    }
}

/// Runtime configuration resolved from environment variables.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    pub environment: Environment,
    pub twitch: TwitchConfig,
    pub webhook: WebhookConfig,
    pub game_cache_path: PathBuf,
    pub event_log_dir: PathBuf,
    pub helix_timeout: Duration,
}

impl AppConfig {
    /// Constructs the configuration by reading and validating environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let env_value = env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());
        let environment = Environment::from_str(&env_value)?;
        let bind_addr = server_bind_address().map_err(ConfigError::BindAddress)?;

        let twitch = TwitchConfig {
            client_id: required("TWITCH_CLIENT_ID")?,
            client_secret: required("TWITCH_CLIENT_SECRET")?,
            channel: required("TWITCH_CHANNEL")?.to_lowercase(),
        };

        let callback_base = required("WEBHOOK_CALLBACK_URL")?;
        let callback_url = callback_url(&callback_base)?;
        let webhook = WebhookConfig {
            callback_url,
            secret: required("WEBHOOK_SECRET")?,
            lease: Duration::from_secs(seconds("SUBSCRIPTION_LEASE_SECS", DEFAULT_LEASE_SECS)?),
        };

        let game_cache_path = env::var("GAME_CACHE_PATH")
            .unwrap_or_else(|_| DEFAULT_GAME_CACHE_PATH.to_string())
            .into();
        let event_log_dir = env::var("EVENT_LOG_DIR")
            .unwrap_or_else(|_| DEFAULT_EVENT_LOG_DIR.to_string())
            .into();
        let helix_timeout =
            Duration::from_secs(seconds("HELIX_TIMEOUT_SECS", DEFAULT_HELIX_TIMEOUT_SECS)?);

        Ok(Self {
            bind_addr,
            environment,
            twitch,
            webhook,
            game_cache_path,
            event_log_dir,
            helix_timeout,
        })
    }
}

fn required(name: &'static str) -> Result<String, ConfigError> {
    match env::var(name) {
        Ok(value) if !value.trim().is_empty() => Ok(value.trim().to_string()),
        _ => Err(ConfigError::Missing(name)),
    }
}

fn seconds(name: &'static str, default: u64) -> Result<u64, ConfigError> {
    match env::var(name) {
        Ok(raw) => match raw.trim().parse::<u64>() {
            Ok(value) if value > 0 => Ok(value),
            _ => Err(ConfigError::InvalidNumber { name, value: raw }),
        },
        Err(_) => Ok(default),
    }
}

fn callback_url(base: &str) -> Result<Url, ConfigError> {
    let full = format!("{}/webhook", base.trim_end_matches('/'));
    let url = Url::parse(&full).map_err(|err| ConfigError::CallbackUrl(err.to_string()))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(ConfigError::CallbackUrl(format!(
            "unsupported scheme '{other}'"
        ))),
    }
}

/// Errors that can occur during configuration loading.
#[derive(Debug)]
pub enum ConfigError {
    InvalidEnvironment(String),
    BindAddress(std::net::AddrParseError),
    Missing(&'static str),
    InvalidNumber { name: &'static str, value: String },
    CallbackUrl(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidEnvironment(value) => write!(
                f,
                "APP_ENV must be one of 'development', 'production', or 'test' (got {value})"
            ),
            Self::BindAddress(err) => write!(f, "invalid APP_BIND_ADDR value: {err}"),
            Self::Missing(name) => write!(f, "{name} must be set"),
            Self::InvalidNumber { name, value } => {
                write!(f, "{name} must be a positive integer (got {value})")
            }
            Self::CallbackUrl(reason) => write!(f, "invalid WEBHOOK_CALLBACK_URL: {reason}"),
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{DEFAULT_BIND_ADDR, ENV_GUARD};

    const OPTIONAL: [&str; 7] = [
        "APP_ENV",
        "APP_BIND_ADDR",
        "GAME_CACHE_PATH",
        "EVENT_LOG_DIR",
        "HELIX_TIMEOUT_SECS",
        "SUBSCRIPTION_LEASE_SECS",
        "WEBHOOK_CALLBACK_URL",
    ];

    fn set_required() {
        for name in OPTIONAL {
            env::remove_var(name);
        }
        env::set_var("TWITCH_CLIENT_ID", "client-id");
        env::set_var("TWITCH_CLIENT_SECRET", "client-secret");
        env::set_var("TWITCH_CHANNEL", "SomeStreamer");
        env::set_var("WEBHOOK_CALLBACK_URL", "https://tracker.example/");
        env::set_var("WEBHOOK_SECRET", "payload-secret");
    }

    fn clear_all() {
        for name in OPTIONAL {
            env::remove_var(name);
        }
        for name in [
            "TWITCH_CLIENT_ID",
            "TWITCH_CLIENT_SECRET",
            "TWITCH_CHANNEL",
            "WEBHOOK_SECRET",
        ] {
            env::remove_var(name);
        }
    }

    #[test]
    fn loads_defaults_in_development() {
        let _guard = ENV_GUARD.lock().expect("env guard poisoned");
        set_required();

        let config = AppConfig::from_env().expect("config should load with defaults");
        assert_eq!(config.environment, Environment::Development);
        assert_eq!(config.bind_addr.to_string(), DEFAULT_BIND_ADDR);
        assert_eq!(config.twitch.channel, "somestreamer");
        assert_eq!(
            config.webhook.callback_url.as_str(),
            "https://tracker.example/webhook"
        );
        assert_eq!(config.webhook.lease, Duration::from_secs(864_000));
        assert_eq!(config.game_cache_path, PathBuf::from("cache.json"));
        assert_eq!(config.event_log_dir, PathBuf::from("logs"));
        assert_eq!(config.helix_timeout, Duration::from_secs(10));

        clear_all();
    }

    #[test]
    fn rejects_invalid_environment() {
        let _guard = ENV_GUARD.lock().expect("env guard poisoned");
        set_required();
        env::set_var("APP_ENV", "invalid");

        let err = AppConfig::from_env().expect_err("invalid env should error");
        assert!(matches!(err, ConfigError::InvalidEnvironment(value) if value == "invalid"));

        clear_all();
    }

    #[test]
    fn reports_missing_required_variable() {
        let _guard = ENV_GUARD.lock().expect("env guard poisoned");
        set_required();
        env::remove_var("WEBHOOK_SECRET");

        let err = AppConfig::from_env().expect_err("missing secret should error");
        assert!(matches!(err, ConfigError::Missing("WEBHOOK_SECRET")));

        clear_all();
    }

    #[test]
    fn parses_overrides() {
        let _guard = ENV_GUARD.lock().expect("env guard poisoned");
        set_required();
        env::set_var("APP_ENV", "production");
        env::set_var("APP_BIND_ADDR", "0.0.0.0:9000");
        env::set_var("HELIX_TIMEOUT_SECS", "3");
        env::set_var("GAME_CACHE_PATH", "/var/lib/gamelog/cache.json");

        let config = AppConfig::from_env().expect("config should load");
        assert_eq!(config.environment, Environment::Production);
        assert_eq!(config.bind_addr.to_string(), "0.0.0.0:9000");
        assert_eq!(config.helix_timeout, Duration::from_secs(3));
        assert_eq!(
            config.game_cache_path,
            PathBuf::from("/var/lib/gamelog/cache.json")
        );

        clear_all();
    }

    #[test]
    fn rejects_zero_timeout() {
        let _guard = ENV_GUARD.lock().expect("env guard poisoned");
        set_required();
        env::set_var("HELIX_TIMEOUT_SECS", "0");

        let err = AppConfig::from_env().expect_err("zero timeout should error");
        assert!(matches!(
            err,
            ConfigError::InvalidNumber { name: "HELIX_TIMEOUT_SECS", .. }
        ));

        clear_all();
    }

    #[test]
    fn rejects_non_http_callback() {
        let _guard = ENV_GUARD.lock().expect("env guard poisoned");
        set_required();
        env::set_var("WEBHOOK_CALLBACK_URL", "ftp://tracker.example");

        let err = AppConfig::from_env().expect_err("ftp callback should error");
        assert!(matches!(err, ConfigError::CallbackUrl(_)));

        clear_all();
    }
}
