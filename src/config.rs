use crate::error::{HuddleError, Result};
use std::env;
use std::time::Duration;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// API server configuration
    pub api: ApiServerConfig,
    /// Database configuration
    pub database: DatabaseConfig,
    /// Connection hub tuning
    pub hub: HubConfig,
    /// Logging configuration
    pub log: LogConfig,
}

#[derive(Debug, Clone)]
pub struct ApiServerConfig {
    /// Port for the API server (default: 8080)
    pub port: u16,
    /// Host to bind to (default: 0.0.0.0)
    pub host: String,
    /// Origins allowed to open a meeting socket (comma-separated, empty = any)
    pub allowed_origins: Vec<String>,
    /// Timeout for plain HTTP requests in seconds
    pub request_timeout: u64,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Database host
    pub host: String,
    /// Database port
    pub port: u16,
    /// Database user
    pub user: String,
    /// Database password
    pub password: String,
    /// Database name
    pub name: String,
    /// SSL mode (disable, require, prefer)
    pub ssl_mode: String,
    /// Maximum connections in pool
    pub max_connections: u32,
    /// Minimum connections in pool
    pub min_connections: u32,
}

/// Timing and sizing knobs for the connection hub
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HubConfig {
    /// Capacity of each connection's outbound queue
    pub queue_capacity: usize,
    /// Receive deadline; refreshed by every inbound frame and pong
    pub pong_wait: Duration,
    /// Interval between liveness probes, strictly shorter than `pong_wait`
    pub ping_period: Duration,
    /// Deadline for a single transport write
    pub write_wait: Duration,
    /// Largest inbound message accepted on upgrade
    pub max_message_bytes: usize,
    /// How often the registry sweep runs
    pub sweep_interval: Duration,
    /// Upper bound on a chat persistence call
    pub persist_timeout: Duration,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 256,
            pong_wait: Duration::from_secs(60),
            ping_period: Duration::from_secs(45),
            write_wait: Duration::from_secs(10),
            max_message_bytes: 1024 * 1024,
            sweep_interval: Duration::from_secs(30),
            persist_timeout: Duration::from_secs(5),
        }
    }
}

impl HubConfig {
    /// Reject settings that would let a healthy peer miss its deadline
    pub fn validate(&self) -> Result<()> {
        if self.queue_capacity == 0 {
            return Err(HuddleError::InvalidConfig(
                "HUB_QUEUE_CAPACITY must be greater than zero".into(),
            ));
        }
        if self.ping_period >= self.pong_wait {
            return Err(HuddleError::InvalidConfig(
                "HUB_PING_PERIOD_SECS must be shorter than HUB_PONG_WAIT_SECS".into(),
            ));
        }
        if self.ping_period.is_zero() || self.sweep_interval.is_zero() {
            return Err(HuddleError::InvalidConfig(
                "hub intervals must be greater than zero".into(),
            ));
        }
        Ok(())
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
        let hub = HubConfig {
            queue_capacity: parse_env("HUB_QUEUE_CAPACITY", "256")?,
            pong_wait: Duration::from_secs(parse_env("HUB_PONG_WAIT_SECS", "60")?),
            ping_period: Duration::from_secs(parse_env("HUB_PING_PERIOD_SECS", "45")?),
            write_wait: Duration::from_secs(parse_env("HUB_WRITE_WAIT_SECS", "10")?),
            max_message_bytes: parse_env("HUB_MAX_MESSAGE_BYTES", "1048576")?,
            sweep_interval: Duration::from_secs(parse_env("HUB_SWEEP_INTERVAL_SECS", "30")?),
            persist_timeout: Duration::from_secs(parse_env("HUB_PERSIST_TIMEOUT_SECS", "5")?),
        };
        hub.validate()?;

        Ok(Config {
            api: ApiServerConfig {
                port: get_env_or("API_PORT", "8080").parse().map_err(|_| {
                    HuddleError::InvalidConfig("API_PORT must be a valid port number".into())
                })?,
                host: get_env_or("API_HOST", "0.0.0.0"),
                allowed_origins: get_env_or("ALLOWED_ORIGINS", "")
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect(),
                request_timeout: parse_env("REQUEST_TIMEOUT_SECS", "30")?,
            },
            database: DatabaseConfig {
                host: get_env_or("DB_HOST", "localhost"),
                port: get_env_or("DB_PORT", "5432").parse().map_err(|_| {
                    HuddleError::InvalidConfig("DB_PORT must be a valid port number".into())
                })?,
                user: get_env_or("DB_USER", "huddle"),
                password: get_env_or("DB_PASSWORD", "huddle_password"),
                name: get_env_or("DB_NAME", "huddle"),
                ssl_mode: get_env_or("DB_SSLMODE", "disable"),
                max_connections: parse_env("DB_MAX_CONNECTIONS", "50")?,
                min_connections: parse_env("DB_MIN_CONNECTIONS", "5")?,
            },
            hub,
            log: LogConfig {
                level: get_env_or("LOG_LEVEL", "info"),
                format: get_env_or("LOG_FORMAT", "pretty"),
            },
        })
    }

    /// Get the database connection URL
    pub fn database_url(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}?sslmode={}",
            self.database.user,
            self.database.password,
            self.database.host,
            self.database.port,
            self.database.name,
            self.database.ssl_mode
        )
    }

    /// Get the API server address
    pub fn api_addr(&self) -> String {
        format!("{}:{}", self.api.host, self.api.port)
    }
}

/// Get environment variable with a default value
fn get_env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse_env<T: std::str::FromStr>(key: &str, default: &str) -> Result<T> {
    get_env_or(key, default)
        .trim()
        .parse()
        .map_err(|_| HuddleError::InvalidConfig(format!("{} must be a valid number", key)))
}
