use std::env;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

/// Distinguishes runtime behavior for different stages of the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnvironment {
    Development,
    Test,
    Production,
}

impl AppEnvironment {
    fn from_str(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "prod" | "production" => Self::Production,
            "test" | "ci" => Self::Test,
            _ => Self::Development,
        }
    }
}

/// Top-level configuration for the application.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: AppEnvironment,
    pub server: ServerConfig,
    pub telemetry: TelemetryConfig,
    pub scheduler: SchedulerConfig,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let environment = AppEnvironment::from_str(
            &env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()),
        );

        let host = env::var("APP_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = env::var("APP_PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse::<u16>()
            .map_err(|_| ConfigError::InvalidPort)?;

        let log_level = env::var("APP_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        Ok(Self {
            environment,
            server: ServerConfig { host, port },
            telemetry: TelemetryConfig { log_level },
            scheduler: SchedulerConfig::load()?,
        })
    }
}

/// Settings controlling the HTTP server binding.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        if self.host.eq_ignore_ascii_case("localhost") {
            return Ok(SocketAddr::new(IpAddr::from([127, 0, 0, 1]), self.port));
        }

        let ip: IpAddr = self
            .host
            .parse()
            .map_err(|source| ConfigError::InvalidHost { source })?;

        Ok(SocketAddr::new(ip, self.port))
    }
}

/// Tracing and metrics controls.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub log_level: String,
}

/// Knobs for the evaluation pass: cadence of the tick loop, parallelism
/// bounds, and the dispatch retry budget.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Seconds between automatic evaluation passes.
    pub tick_interval_secs: u64,
    /// Companies evaluated in parallel within a pass.
    pub company_concurrency: usize,
    /// Debts evaluated in parallel within one company.
    pub debt_concurrency: usize,
    /// Dispatch attempts per step within a single pass (transient
    /// failures, exponential backoff between them).
    pub max_dispatch_attempts: u32,
    /// Total attempts per (debt, rule, step) across passes before the
    /// outcome is pinned to Failed.
    pub max_step_attempts: u32,
    /// Base delay for exponential backoff between transient retries.
    pub backoff_base_ms: u64,
    /// A claim older than this with no terminal commit is considered
    /// abandoned and eligible for retry.
    pub claim_timeout_secs: u64,
}

impl SchedulerConfig {
    fn load() -> Result<Self, ConfigError> {
        Ok(Self {
            tick_interval_secs: env_u64("APP_TICK_INTERVAL_SECS", 300)?,
            company_concurrency: env_u64("APP_COMPANY_CONCURRENCY", 4)?.max(1) as usize,
            debt_concurrency: env_u64("APP_DEBT_CONCURRENCY", 16)?.max(1) as usize,
            max_dispatch_attempts: env_u64("APP_MAX_DISPATCH_ATTEMPTS", 5)?.max(1) as u32,
            max_step_attempts: env_u64("APP_MAX_STEP_ATTEMPTS", 10)?.max(1) as u32,
            backoff_base_ms: env_u64("APP_BACKOFF_BASE_MS", 500)?,
            claim_timeout_secs: env_u64("APP_CLAIM_TIMEOUT_SECS", 900)?.max(1),
        })
    }

    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }

    pub fn claim_timeout(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.claim_timeout_secs as i64)
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: 300,
            company_concurrency: 4,
            debt_concurrency: 16,
            max_dispatch_attempts: 5,
            max_step_attempts: 10,
            backoff_base_ms: 500,
            claim_timeout_secs: 900,
        }
    }
}

fn env_u64(key: &'static str, default: u64) -> Result<u64, ConfigError> {
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<u64>()
            .map_err(|_| ConfigError::InvalidSchedulerValue { key }),
        Err(_) => Ok(default),
    }
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidPort,
    InvalidHost { source: std::net::AddrParseError },
    InvalidSchedulerValue { key: &'static str },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidPort => write!(f, "APP_PORT must be a valid u16"),
            ConfigError::InvalidHost { .. } => {
                write!(f, "APP_HOST must parse to an IPv4 or IPv6 address")
            }
            ConfigError::InvalidSchedulerValue { key } => {
                write!(f, "{key} must be a non-negative integer")
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::InvalidPort | ConfigError::InvalidSchedulerValue { .. } => None,
            ConfigError::InvalidHost { source } => Some(source),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::{Mutex, OnceLock};

    fn env_guard() -> &'static Mutex<()> {
        static GUARD: OnceLock<Mutex<()>> = OnceLock::new();
        GUARD.get_or_init(|| Mutex::new(()))
    }

    fn reset_env() {
        env::remove_var("APP_ENV");
        env::remove_var("APP_HOST");
        env::remove_var("APP_PORT");
        env::remove_var("APP_LOG_LEVEL");
        env::remove_var("APP_TICK_INTERVAL_SECS");
        env::remove_var("APP_COMPANY_CONCURRENCY");
        env::remove_var("APP_DEBT_CONCURRENCY");
        env::remove_var("APP_MAX_DISPATCH_ATTEMPTS");
        env::remove_var("APP_MAX_STEP_ATTEMPTS");
        env::remove_var("APP_BACKOFF_BASE_MS");
        env::remove_var("APP_CLAIM_TIMEOUT_SECS");
    }

    #[test]
    fn load_uses_defaults_when_env_missing() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        let config = AppConfig::load().expect("config loads with defaults");
        assert_eq!(config.environment, AppEnvironment::Development);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.telemetry.log_level, "info");
        assert_eq!(config.scheduler.tick_interval_secs, 300);
        assert_eq!(config.scheduler.max_dispatch_attempts, 5);
    }

    #[test]
    fn accepts_localhost_host() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        env::set_var("APP_HOST", "localhost");
        let config = AppConfig::load().expect("config loads");
        let addr = config.server.socket_addr().expect("localhost resolves");
        assert_eq!(addr, SocketAddr::new(IpAddr::from([127, 0, 0, 1]), 3000));
        env::remove_var("APP_HOST");
    }

    #[test]
    fn scheduler_overrides_are_honored() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        env::set_var("APP_TICK_INTERVAL_SECS", "60");
        env::set_var("APP_COMPANY_CONCURRENCY", "2");
        let config = AppConfig::load().expect("config loads");
        assert_eq!(config.scheduler.tick_interval_secs, 60);
        assert_eq!(config.scheduler.company_concurrency, 2);
        reset_env();
    }

    #[test]
    fn rejects_non_numeric_scheduler_values() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        env::set_var("APP_MAX_DISPATCH_ATTEMPTS", "often");
        let error = AppConfig::load().expect_err("config rejects garbage");
        assert!(matches!(
            error,
            ConfigError::InvalidSchedulerValue {
                key: "APP_MAX_DISPATCH_ATTEMPTS"
            }
        ));
        reset_env();
    }
}
