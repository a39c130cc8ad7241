use dotenvy::dotenv;
use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::error::AppError;
use crate::models::EventLimits;

/// WebSocket keep-alive settings
#[derive(Debug, Clone)]
pub struct WsConfig {
    pub heartbeat_interval: Duration,
    pub client_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    /// Private-channel deliveries kept per offline participant.
    pub inbox_capacity: usize,
    pub limits: EventLimits,
    pub ws: WsConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            inbox_capacity: 256,
            limits: EventLimits::default(),
            ws: WsConfig {
                heartbeat_interval: Duration::from_secs(5),
                client_timeout: Duration::from_secs(30),
            },
        }
    }
}

impl Config {
    fn parse_var<T: FromStr>(name: &str, default: T) -> Result<T, AppError> {
        match env::var(name) {
            Ok(raw) => raw
                .trim()
                .parse()
                .map_err(|_| AppError::Config(format!("{name} has invalid value {raw:?}"))),
            Err(_) => Ok(default),
        }
    }

    pub fn from_env() -> Result<Self, AppError> {
        dotenv().ok();
        let defaults = Self::default();

        let host = env::var("HUB_HOST").unwrap_or(defaults.host);
        let port = Self::parse_var("PORT", defaults.port)?;
        let inbox_capacity = Self::parse_var("INBOX_CAPACITY", defaults.inbox_capacity)?;
        let max_content_bytes =
            Self::parse_var("MAX_CONTENT_BYTES", defaults.limits.max_content_bytes)?;
        let max_metadata_entries =
            Self::parse_var("MAX_METADATA_ENTRIES", defaults.limits.max_metadata_entries)?;
        let heartbeat_secs = Self::parse_var(
            "WS_HEARTBEAT_INTERVAL_SECS",
            defaults.ws.heartbeat_interval.as_secs(),
        )?;
        let timeout_secs =
            Self::parse_var("WS_CLIENT_TIMEOUT_SECS", defaults.ws.client_timeout.as_secs())?;

        if inbox_capacity == 0 {
            return Err(AppError::Config("INBOX_CAPACITY must be positive".into()));
        }
        if heartbeat_secs == 0 || timeout_secs <= heartbeat_secs {
            return Err(AppError::Config(
                "WS_CLIENT_TIMEOUT_SECS must exceed a positive WS_HEARTBEAT_INTERVAL_SECS".into(),
            ));
        }

        Ok(Self {
            host,
            port,
            inbox_capacity,
            limits: EventLimits {
                max_content_bytes,
                max_metadata_entries,
            },
            ws: WsConfig {
                heartbeat_interval: Duration::from_secs(heartbeat_secs),
                client_timeout: Duration::from_secs(timeout_secs),
            },
        })
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const VARS: [&str; 7] = [
        "HUB_HOST",
        "PORT",
        "INBOX_CAPACITY",
        "MAX_CONTENT_BYTES",
        "MAX_METADATA_ENTRIES",
        "WS_HEARTBEAT_INTERVAL_SECS",
        "WS_CLIENT_TIMEOUT_SECS",
    ];

    fn clear() {
        for var in VARS {
            env::remove_var(var);
        }
    }

    #[test]
    #[serial]
    fn test_defaults() {
        clear();
        let cfg = Config::from_env().unwrap();
        assert_eq!(cfg.port, 3000);
        assert_eq!(cfg.inbox_capacity, 256);
        assert_eq!(cfg.bind_addr(), "0.0.0.0:3000");
        assert_eq!(cfg.ws.client_timeout, Duration::from_secs(30));
    }

    #[test]
    #[serial]
    fn test_overrides() {
        clear();
        env::set_var("PORT", "8088");
        env::set_var("MAX_CONTENT_BYTES", "1024");
        let cfg = Config::from_env().unwrap();
        clear();
        assert_eq!(cfg.port, 8088);
        assert_eq!(cfg.limits.max_content_bytes, 1024);
    }

    #[test]
    #[serial]
    fn test_invalid_number_is_config_error() {
        clear();
        env::set_var("PORT", "not-a-port");
        let err = Config::from_env().unwrap_err();
        clear();
        assert!(matches!(err, AppError::Config(_)));
    }

    #[test]
    #[serial]
    fn test_timeout_must_exceed_heartbeat() {
        clear();
        env::set_var("WS_HEARTBEAT_INTERVAL_SECS", "10");
        env::set_var("WS_CLIENT_TIMEOUT_SECS", "10");
        let err = Config::from_env().unwrap_err();
        clear();
        assert!(matches!(err, AppError::Config(_)));
    }
}
