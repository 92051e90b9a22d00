use crate::error::{FanoutError, Result};
use std::env;
use std::time::Duration;
use url::Url;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// API server configuration
    pub api: ApiServerConfig,
    /// Message bus configuration
    pub bus: BusConfig,
    /// Connection hub configuration
    pub hub: HubConfig,
    /// Logging configuration
    pub log: LogConfig,
}

#[derive(Debug, Clone)]
pub struct ApiServerConfig {
    /// Port for the API server (default: 8000)
    pub port: u16,
    /// Host to bind to (default: 0.0.0.0)
    pub host: String,
    /// Allowed CORS origins (comma-separated, empty = localhost only)
    pub cors_origins: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusBackend {
    Redis,
    Memory,
}

impl BusBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Redis => "redis",
            Self::Memory => "memory",
        }
    }
}

#[derive(Debug, Clone)]
pub struct BusConfig {
    /// Which bus implementation to run against
    pub backend: BusBackend,
    /// Redis endpoint
    pub url: String,
    /// Maximum concurrent bus connections
    pub pool_size: usize,
    /// Per-operation deadline in seconds
    pub timeout_seconds: u64,
}

impl BusConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            backend: BusBackend::Redis,
            url: "redis://localhost".to_string(),
            pool_size: 10,
            timeout_seconds: 5,
        }
    }
}

/// What `send_to` does when the recipient is neither local nor reachable over the bus
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UnknownRecipientPolicy {
    #[default]
    Error,
    Drop,
}

impl UnknownRecipientPolicy {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "error" | "reject" => Some(Self::Error),
            "drop" | "ignore" => Some(Self::Drop),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Channel that plain frames and join/leave notices are published to
    pub broadcast_channel: String,
    /// Behaviour for messages addressed to unknown connections
    pub unknown_recipient: UnknownRecipientPolicy,
    /// Outbound frames buffered per connection before new ones are dropped
    pub outbound_buffer: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            broadcast_channel: "ws".to_string(),
            unknown_recipient: UnknownRecipientPolicy::Error,
            outbound_buffer: 256,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Log level (debug, info, warn, error)
    pub level: String,
    /// Output format (json, pretty)
    pub format: String,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Ok(Config {
            api: ApiServerConfig {
                port: get_env_or("API_PORT", "8000").parse().map_err(|_| {
                    FanoutError::InvalidConfig("API_PORT must be a valid port number".into())
                })?,
                host: get_env_or("API_HOST", "0.0.0.0"),
                cors_origins: get_env_or("CORS_ORIGINS", "")
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect(),
            },
            bus: parse_bus_config()?,
            hub: HubConfig {
                broadcast_channel: parse_channel_name()?,
                unknown_recipient: UnknownRecipientPolicy::parse(&get_env_or(
                    "HUB_UNKNOWN_RECIPIENT",
                    "error",
                ))
                .ok_or_else(|| {
                    FanoutError::InvalidConfig(
                        "HUB_UNKNOWN_RECIPIENT must be one of: error, drop".into(),
                    )
                })?,
                outbound_buffer: parse_positive("HUB_OUTBOUND_BUFFER", "256")?,
            },
            log: LogConfig {
                level: get_env_or("LOG_LEVEL", "info"),
                format: get_env_or("LOG_FORMAT", "pretty"),
            },
        })
    }

    /// Get the API server address
    pub fn api_addr(&self) -> String {
        format!("{}:{}", self.api.host, self.api.port)
    }
}

fn parse_bus_config() -> Result<BusConfig> {
    let backend = match get_env_or("BUS_BACKEND", "redis").to_lowercase().as_str() {
        "redis" => BusBackend::Redis,
        "memory" | "local" => BusBackend::Memory,
        other => {
            return Err(FanoutError::InvalidConfig(format!(
                "BUS_BACKEND has unsupported value: {}",
                other
            )))
        }
    };

    let raw = get_env_or("REDIS_URL", "redis://localhost");
    let url = Url::parse(raw.trim()).map_err(|e| {
        FanoutError::InvalidConfig(format!("REDIS_URL must be a valid URL: {}", e))
    })?;
    match url.scheme() {
        "redis" | "rediss" | "redis+unix" | "unix" => {}
        other => {
            return Err(FanoutError::InvalidConfig(format!(
                "REDIS_URL has unsupported scheme: {}",
                other
            )))
        }
    }

    Ok(BusConfig {
        backend,
        url: raw.trim().to_string(),
        pool_size: parse_positive("REDIS_POOL_SIZE", "10")?,
        timeout_seconds: parse_positive::<u64>("REDIS_TIMEOUT", "5")?,
    })
}

fn parse_channel_name() -> Result<String> {
    let channel = get_env_or("HUB_BROADCAST_CHANNEL", "ws").trim().to_string();
    if channel.is_empty() {
        return Err(FanoutError::InvalidConfig(
            "HUB_BROADCAST_CHANNEL must not be empty".into(),
        ));
    }
    if crate::bus::is_reserved_channel(&channel) {
        return Err(FanoutError::InvalidConfig(format!(
            "HUB_BROADCAST_CHANNEL must not start with '{}' or '{}'",
            crate::bus::CONNECTION_CHANNEL_PREFIX,
            crate::bus::NODE_CHANNEL_PREFIX
        )));
    }
    Ok(channel)
}

fn parse_positive<T>(key: &str, default: &str) -> Result<T>
where
    T: std::str::FromStr + PartialOrd + From<u8>,
{
    let value: T = get_env_or(key, default)
        .trim()
        .parse()
        .map_err(|_| FanoutError::InvalidConfig(format!("{} must be a valid number", key)))?;
    if value < T::from(1) {
        return Err(FanoutError::InvalidConfig(format!(
            "{} must be at least 1",
            key
        )));
    }
    Ok(value)
}

/// Get environment variable with a default value
fn get_env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::Mutex;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    const CONFIG_ENV_KEYS: &[&str] = &[
        "API_PORT",
        "API_HOST",
        "CORS_ORIGINS",
        "BUS_BACKEND",
        "REDIS_URL",
        "REDIS_POOL_SIZE",
        "REDIS_TIMEOUT",
        "HUB_BROADCAST_CHANNEL",
        "HUB_UNKNOWN_RECIPIENT",
        "HUB_OUTBOUND_BUFFER",
        "LOG_LEVEL",
        "LOG_FORMAT",
    ];

    struct EnvGuard {
        saved: Vec<(String, Option<String>)>,
    }

    impl EnvGuard {
        fn new(keys: &[&str]) -> Self {
            let saved = keys
                .iter()
                .map(|&key| {
                    let old = env::var(key).ok();
                    env::remove_var(key);
                    (key.to_string(), old)
                })
                .collect();

            Self { saved }
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            for (key, value) in self.saved.drain(..) {
                match value {
                    Some(v) => env::set_var(key, v),
                    None => env::remove_var(key),
                }
            }
        }
    }

    #[test]
    fn test_config_from_env_defaults() {
        let _lock = ENV_LOCK.lock().unwrap();
        let _guard = EnvGuard::new(CONFIG_ENV_KEYS);

        let config = Config::from_env().unwrap();

        assert_eq!(config.api.port, 8000);
        assert_eq!(config.api.host, "0.0.0.0");
        assert!(config.api.cors_origins.is_empty());

        assert_eq!(config.bus.backend, BusBackend::Redis);
        assert_eq!(config.bus.url, "redis://localhost");
        assert_eq!(config.bus.pool_size, 10);
        assert_eq!(config.bus.timeout(), Duration::from_secs(5));

        assert_eq!(config.hub.broadcast_channel, "ws");
        assert_eq!(config.hub.unknown_recipient, UnknownRecipientPolicy::Error);
        assert_eq!(config.hub.outbound_buffer, 256);
    }

    #[test]
    fn test_config_from_env_overrides() {
        let _lock = ENV_LOCK.lock().unwrap();
        let _guard = EnvGuard::new(CONFIG_ENV_KEYS);

        env::set_var("API_PORT", "9001");
        env::set_var("CORS_ORIGINS", "https://a.example, https://b.example");
        env::set_var("BUS_BACKEND", "memory");
        env::set_var("REDIS_URL", "redis://cache.internal:6380/2");
        env::set_var("REDIS_POOL_SIZE", "4");
        env::set_var("REDIS_TIMEOUT", "2");
        env::set_var("HUB_BROADCAST_CHANNEL", "lobby");
        env::set_var("HUB_UNKNOWN_RECIPIENT", "drop");

        let config = Config::from_env().unwrap();

        assert_eq!(config.api.port, 9001);
        assert_eq!(
            config.api.cors_origins,
            vec![
                "https://a.example".to_string(),
                "https://b.example".to_string()
            ]
        );
        assert_eq!(config.bus.backend, BusBackend::Memory);
        assert_eq!(config.bus.url, "redis://cache.internal:6380/2");
        assert_eq!(config.bus.pool_size, 4);
        assert_eq!(config.bus.timeout_seconds, 2);
        assert_eq!(config.hub.broadcast_channel, "lobby");
        assert_eq!(config.hub.unknown_recipient, UnknownRecipientPolicy::Drop);
    }

    #[test]
    fn test_config_from_env_invalid_port() {
        let _lock = ENV_LOCK.lock().unwrap();
        let _guard = EnvGuard::new(CONFIG_ENV_KEYS);

        env::set_var("API_PORT", "not-a-port");
        let err = Config::from_env().unwrap_err();
        assert!(matches!(err, FanoutError::InvalidConfig(_)));
    }

    #[test]
    fn test_config_from_env_rejects_non_redis_url() {
        let _lock = ENV_LOCK.lock().unwrap();
        let _guard = EnvGuard::new(CONFIG_ENV_KEYS);

        env::set_var("REDIS_URL", "http://localhost:6379");
        let err = Config::from_env().unwrap_err();
        assert!(matches!(err, FanoutError::InvalidConfig(_)));
    }

    #[test]
    fn test_config_from_env_rejects_zero_pool() {
        let _lock = ENV_LOCK.lock().unwrap();
        let _guard = EnvGuard::new(CONFIG_ENV_KEYS);

        env::set_var("REDIS_POOL_SIZE", "0");
        let err = Config::from_env().unwrap_err();
        assert!(matches!(err, FanoutError::InvalidConfig(_)));
    }

    #[test]
    fn test_config_from_env_rejects_unknown_policy() {
        let _lock = ENV_LOCK.lock().unwrap();
        let _guard = EnvGuard::new(CONFIG_ENV_KEYS);

        env::set_var("HUB_UNKNOWN_RECIPIENT", "maybe");
        let err = Config::from_env().unwrap_err();
        assert!(matches!(err, FanoutError::InvalidConfig(_)));
    }

    #[test]
    fn test_config_from_env_rejects_reserved_broadcast_channel() {
        let _lock = ENV_LOCK.lock().unwrap();
        let _guard = EnvGuard::new(CONFIG_ENV_KEYS);

        for channel in ["conn:lobby", "node:lobby"] {
            env::set_var("HUB_BROADCAST_CHANNEL", channel);
            let err = Config::from_env().unwrap_err();
            assert!(matches!(err, FanoutError::InvalidConfig(_)));
        }
    }

    #[test]
    fn test_config_formatters() {
        let config = Config {
            api: ApiServerConfig {
                port: 8000,
                host: "127.0.0.1".to_string(),
                cors_origins: vec![],
            },
            bus: BusConfig::default(),
            hub: HubConfig::default(),
            log: LogConfig {
                level: "info".to_string(),
                format: "json".to_string(),
            },
        };

        assert_eq!(config.api_addr(), "127.0.0.1:8000");
        assert_eq!(config.bus.backend.as_str(), "redis");
    }
}
