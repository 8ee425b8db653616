use std::env;
use std::time::Duration;

use thiserror::Error;

// ── Error ──────────────────────────────────────────────────────────────────────

/// Errors that can occur while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An environment variable contained an unparseable value.
    #[error("env {var}={raw:?}: expected {expected}")]
    Parse {
        var: &'static str,
        raw: String,
        expected: &'static str,
    },
    /// A value was parsed successfully but violated a constraint.
    #[error("env {var}: {message}")]
    InvalidValue { var: &'static str, message: String },
}

// ── Broker ─────────────────────────────────────────────────────────────────────

/// Transport parameters for one AMQP connection.
///
/// Consumed by `messaging::RabbitConnection`. The consumer and the publisher
/// each build their own connection from a clone of these settings.
#[derive(Debug, Clone)]
pub struct BrokerSettings {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    /// Env: `RABBITMQ_VHOST` · Default: `/`
    pub vhost: String,
    /// AMQP heartbeat negotiated with the broker.
    pub heartbeat: Duration,
    /// Upper bound for a single publish (including its confirm). A broker that
    /// blocks the connection for longer turns the publish into a failure.
    pub blocked_connection_timeout: Duration,
    /// Transport-level attempts made by one `connect()` call. Constraint: ≥ 1
    pub connection_attempts: u32,
    /// Delay between those attempts.
    pub retry_delay: Duration,
    /// Bound on each TCP/AMQP handshake attempt.
    pub socket_timeout: Duration,
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5672,
            username: "guest".to_string(),
            password: "guest".to_string(),
            vhost: "/".to_string(),
            heartbeat: Duration::from_secs(600),
            blocked_connection_timeout: Duration::from_secs(300),
            connection_attempts: 3,
            retry_delay: Duration::from_secs(5),
            socket_timeout: Duration::from_secs(10),
        }
    }
}

impl BrokerSettings {
    /// `host:port`, for logs. Never includes credentials.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Destination queue names for each known result category.
#[derive(Debug, Clone)]
pub struct ResultQueues {
    pub pron: String,
    pub inton: String,
    pub llm: String,
    pub error: String,
    pub conversation: String,
}

impl Default for ResultQueues {
    fn default() -> Self {
        Self {
            pron: "pron_result".to_string(),
            inton: "inton_result".to_string(),
            llm: "llm_result".to_string(),
            error: "error_result".to_string(),
            conversation: "conversation_result".to_string(),
        }
    }
}

// ── Config ─────────────────────────────────────────────────────────────────────

/// Centralised application configuration.
///
/// All fields are populated from environment variables with hardcoded defaults.
/// Call [`Config::load`] once at startup. It validates every value eagerly so
/// any misconfiguration is reported before any connection attempt is made.
#[derive(Debug, Clone)]
pub struct Config {
    pub broker: BrokerSettings,

    /// Env: `RABBITMQ_QUEUE` · Default: `ai.jobs`
    pub job_queue: String,

    /// Env: `RABBITMQ_{PRON,INTON,LLM,ERROR,CONVERSATION}_QUEUE`
    pub result_queues: ResultQueues,

    // ── Reconnect backoff ─────────────────────────────────────────────────────
    /// Env: `RECONNECT_INITIAL_DELAY_SEC` · Default: `1` · Constraint: > 0
    pub reconnect_initial_delay: Duration,
    /// Env: `RECONNECT_MAX_DELAY_SEC` · Default: `60` · Constraint: ≥ initial
    pub reconnect_max_delay: Duration,

    // ── Analysis backend ──────────────────────────────────────────────────────
    /// Env: `AI_BASE_URL` · Default: `http://localhost:5001`
    pub ai_base_url: String,
    /// Env: `AI_TIMEOUT_SEC` · Default: `300`. Analysis is slow; keep it generous.
    pub ai_timeout: Duration,

    // ── HTTP API ──────────────────────────────────────────────────────────────
    /// Env: `API_HOST` · Default: `0.0.0.0`
    pub api_host: String,
    /// Env: `API_PORT` · Default: `8000`
    pub api_port: u16,
}

impl Config {
    /// Load and validate configuration from environment variables.
    ///
    /// Missing variables fall back to hardcoded defaults.
    /// Returns [`ConfigError`] on the first invalid value encountered.
    pub fn load() -> Result<Self, ConfigError> {
        let defaults = BrokerSettings::default();

        // ── Broker ────────────────────────────────────────────────────────────
        let host = env_str("RABBITMQ_HOST", &defaults.host);
        validate("RABBITMQ_HOST", !host.trim().is_empty(), "must not be empty")?;

        let port = parse_u16("RABBITMQ_PORT", defaults.port)?;
        validate("RABBITMQ_PORT", port > 0, "must be in range 1-65535")?;

        let connection_attempts = parse_u32("RABBITMQ_CONNECTION_ATTEMPTS", 3)?;
        validate("RABBITMQ_CONNECTION_ATTEMPTS", connection_attempts >= 1, "must be ≥ 1")?;

        let socket_timeout = parse_secs("RABBITMQ_SOCKET_TIMEOUT_SEC", 10)?;
        validate("RABBITMQ_SOCKET_TIMEOUT_SEC", !socket_timeout.is_zero(), "must be > 0")?;

        let blocked_connection_timeout = parse_secs("RABBITMQ_BLOCKED_TIMEOUT_SEC", 300)?;
        validate(
            "RABBITMQ_BLOCKED_TIMEOUT_SEC",
            !blocked_connection_timeout.is_zero(),
            "must be > 0",
        )?;

        let heartbeat = parse_secs("RABBITMQ_HEARTBEAT_SEC", 600)?;
        validate(
            "RABBITMQ_HEARTBEAT_SEC",
            heartbeat.as_secs() <= u64::from(u16::MAX),
            "must fit in 16 bits",
        )?;

        let broker = BrokerSettings {
            host,
            port,
            username: env_str("RABBITMQ_USER", &defaults.username),
            password: env_str("RABBITMQ_PASS", &defaults.password),
            vhost: env_str("RABBITMQ_VHOST", &defaults.vhost),
            heartbeat,
            blocked_connection_timeout,
            connection_attempts,
            retry_delay: parse_secs("RABBITMQ_RETRY_DELAY_SEC", 5)?,
            socket_timeout,
        };

        // ── Queues ────────────────────────────────────────────────────────────
        let job_queue = env_str("RABBITMQ_QUEUE", "ai.jobs");
        validate("RABBITMQ_QUEUE", !job_queue.is_empty(), "must not be empty")?;

        let q = ResultQueues::default();
        let result_queues = ResultQueues {
            pron: env_str("RABBITMQ_PRON_QUEUE", &q.pron),
            inton: env_str("RABBITMQ_INTON_QUEUE", &q.inton),
            llm: env_str("RABBITMQ_LLM_QUEUE", &q.llm),
            error: env_str("RABBITMQ_ERROR_QUEUE", &q.error),
            conversation: env_str("RABBITMQ_CONVERSATION_QUEUE", &q.conversation),
        };

        // ── Backoff ───────────────────────────────────────────────────────────
        let reconnect_initial_delay = parse_secs("RECONNECT_INITIAL_DELAY_SEC", 1)?;
        validate(
            "RECONNECT_INITIAL_DELAY_SEC",
            !reconnect_initial_delay.is_zero(),
            "must be > 0",
        )?;
        let reconnect_max_delay = parse_secs("RECONNECT_MAX_DELAY_SEC", 60)?;
        validate(
            "RECONNECT_MAX_DELAY_SEC",
            reconnect_max_delay >= reconnect_initial_delay,
            "must be ≥ RECONNECT_INITIAL_DELAY_SEC",
        )?;

        // ── Analysis backend ──────────────────────────────────────────────────
        let ai_base_url = env_str("AI_BASE_URL", "http://localhost:5001")
            .trim_end_matches('/')
            .to_string();
        validate(
            "AI_BASE_URL",
            ai_base_url.starts_with("http://") || ai_base_url.starts_with("https://"),
            "must be an http(s) URL",
        )?;
        let ai_timeout = parse_secs("AI_TIMEOUT_SEC", 300)?;
        validate("AI_TIMEOUT_SEC", !ai_timeout.is_zero(), "must be > 0")?;

        // ── HTTP API ──────────────────────────────────────────────────────────
        let api_host = env_str("API_HOST", "0.0.0.0");
        let api_port = parse_u16("API_PORT", 8000)?;
        validate("API_PORT", api_port > 0, "must be in range 1-65535")?;

        Ok(Self {
            broker,
            job_queue,
            result_queues,
            reconnect_initial_delay,
            reconnect_max_delay,
            ai_base_url,
            ai_timeout,
            api_host,
            api_port,
        })
    }

    /// Human-readable `host:port` string for the HTTP API server.
    pub fn api_addr(&self) -> String {
        format!("{}:{}", self.api_host, self.api_port)
    }

    /// Log a summary of the loaded configuration. Credentials are omitted.
    pub fn log_summary(&self) {
        tracing::info!(
            broker       = %self.broker.addr(),
            vhost        = %self.broker.vhost,
            job_queue    = %self.job_queue,
            attempts     = self.broker.connection_attempts,
            backoff_max  = self.reconnect_max_delay.as_secs(),
            ai_base_url  = %self.ai_base_url,
            ai_timeout   = self.ai_timeout.as_secs(),
            api_addr     = %self.api_addr(),
            "⚙️  configuration loaded"
        );
    }
}

// ── Private parse helpers ──────────────────────────────────────────────────────

/// Return the env var value as a `String`, or `default` if unset.
fn env_str(var: &str, default: &str) -> String {
    env::var(var).unwrap_or_else(|_| default.to_string())
}

/// Emit a `ConfigError::InvalidValue` if `condition` is false.
fn validate(var: &'static str, condition: bool, message: &str) -> Result<(), ConfigError> {
    if condition {
        Ok(())
    } else {
        Err(ConfigError::InvalidValue {
            var,
            message: message.to_string(),
        })
    }
}

fn parse_u32(var: &'static str, default: u32) -> Result<u32, ConfigError> {
    match env::var(var) {
        Err(_) => Ok(default),
        Ok(raw) => raw.trim().parse::<u32>().map_err(|_| ConfigError::Parse {
            var,
            raw,
            expected: "unsigned integer (u32)",
        }),
    }
}

fn parse_u16(var: &'static str, default: u16) -> Result<u16, ConfigError> {
    match env::var(var) {
        Err(_) => Ok(default),
        Ok(raw) => raw.trim().parse::<u16>().map_err(|_| ConfigError::Parse {
            var,
            raw,
            expected: "port number (1-65535)",
        }),
    }
}

/// Whole seconds, returned as a [`Duration`].
fn parse_secs(var: &'static str, default: u64) -> Result<Duration, ConfigError> {
    match env::var(var) {
        Err(_) => Ok(Duration::from_secs(default)),
        Ok(raw) => raw
            .trim()
            .parse::<u64>()
            .map(Duration::from_secs)
            .map_err(|_| ConfigError::Parse {
                var,
                raw,
                expected: "whole number of seconds",
            }),
    }
}
