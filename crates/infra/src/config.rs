//! Process configuration from environment variables.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use riskmap_scoring::TierThresholds;

use crate::jobs::{RetryPolicy, RunnerConfig};
use crate::payments::Price;

/// Configuration error.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} is required")]
    Missing(&'static str),

    #[error("{var}={value:?} is invalid: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },

    #[error("at least one of ANTHROPIC_API_KEY or DEEPSEEK_API_KEY must be set")]
    NoAiProvider,
}

/// Deployment environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
}

impl Environment {
    pub fn is_production(self) -> bool {
        self == Environment::Production
    }
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "development" | "dev" | "local" | "test" => Ok(Environment::Development),
            "production" | "prod" => Ok(Environment::Production),
            other => Err(format!("unknown environment {other:?}")),
        }
    }
}

/// Credentials and model for one AI provider.
#[derive(Clone, PartialEq, Eq)]
pub struct ProviderConfig {
    pub api_key: String,
    pub model: String,
}

impl fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("api_key", &"<redacted>")
            .field("model", &self.model)
            .finish()
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub environment: Environment,
    /// Public site root, used for report links.
    pub base_url: String,

    pub database_url: String,
    pub database_max_connections: u32,

    pub anthropic: Option<ProviderConfig>,
    pub deepseek: Option<ProviderConfig>,

    pub resend_api_key: String,
    pub email_from_addr: String,
    pub email_from_name: String,

    pub worker_count: usize,
    pub queue_capacity: usize,
    pub poll_interval: Duration,
    pub job_timeout: Duration,
    pub max_attempts: u32,
    pub retry_base_delay: Duration,
    pub recovery_window: Duration,

    pub tier_thresholds: TierThresholds,
    pub price: Price,
}

impl fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppConfig")
            .field("environment", &self.environment)
            .field("base_url", &self.base_url)
            .field("database_max_connections", &self.database_max_connections)
            .field("anthropic", &self.anthropic)
            .field("deepseek", &self.deepseek)
            .field("email_from_addr", &self.email_from_addr)
            .field("worker_count", &self.worker_count)
            .field("queue_capacity", &self.queue_capacity)
            .field("poll_interval", &self.poll_interval)
            .field("job_timeout", &self.job_timeout)
            .field("max_attempts", &self.max_attempts)
            .field("recovery_window", &self.recovery_window)
            .field("tier_thresholds", &self.tier_thresholds)
            .field("price", &self.price)
            .finish_non_exhaustive()
    }
}

impl AppConfig {
    /// Load `.env` if present, then read the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        // A missing .env file is normal outside local development.
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup. Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = Vars { lookup };

        let environment = vars.parse_or("ENV", Environment::Development)?;
        let anthropic = vars.get("ANTHROPIC_API_KEY").map(|api_key| ProviderConfig {
            api_key,
            model: vars.get_or("ANTHROPIC_MODEL", riskmap_ai::anthropic::DEFAULT_MODEL),
        });
        let deepseek = vars.get("DEEPSEEK_API_KEY").map(|api_key| ProviderConfig {
            api_key,
            model: vars.get_or("DEEPSEEK_MODEL", riskmap_ai::deepseek::DEFAULT_MODEL),
        });
        if anthropic.is_none() && deepseek.is_none() {
            return Err(ConfigError::NoAiProvider);
        }

        let worker_count: usize = vars.parse_or("WORKER_COUNT", 3)?;
        if worker_count == 0 {
            return Err(vars.invalid("WORKER_COUNT", "must be at least 1"));
        }
        let queue_capacity: usize = vars.parse_or("QUEUE_CAPACITY", worker_count * 2)?;
        if queue_capacity == 0 {
            return Err(vars.invalid("QUEUE_CAPACITY", "must be at least 1"));
        }
        let max_attempts: u32 = vars.parse_or("MAX_ATTEMPTS", 3)?;
        if max_attempts == 0 {
            return Err(vars.invalid("MAX_ATTEMPTS", "must be at least 1"));
        }

        let high_impact: u8 = vars.parse_or("TIER_HIGH_IMPACT", riskmap_scoring::tier::HIGH_IMPACT_THRESHOLD)?;
        let high_probability: u8 =
            vars.parse_or("TIER_HIGH_PROBABILITY", riskmap_scoring::tier::HIGH_PROBABILITY_THRESHOLD)?;
        let tier_thresholds = TierThresholds::new(high_impact, high_probability).map_err(|e| {
            ConfigError::Invalid {
                var: "TIER_HIGH_IMPACT/TIER_HIGH_PROBABILITY",
                value: format!("{high_impact}/{high_probability}"),
                reason: e.to_string(),
            }
        })?;

        Ok(Self {
            environment,
            base_url: vars
                .get_or("BASE_URL", "http://localhost:3000")
                .trim_end_matches('/')
                .to_string(),
            database_url: vars.require("DATABASE_URL")?,
            database_max_connections: vars.parse_or("DATABASE_MAX_CONNECTIONS", 10)?,
            anthropic,
            deepseek,
            resend_api_key: vars.require("RESEND_API_KEY")?,
            email_from_addr: vars.get_or("EMAIL_FROM_ADDR", "reports@example.com"),
            email_from_name: vars.get_or("EMAIL_FROM_NAME", "Risk Mapper"),
            worker_count,
            queue_capacity,
            poll_interval: Duration::from_secs(vars.parse_or("POLL_INTERVAL_SECS", 30)?),
            job_timeout: Duration::from_secs(vars.parse_or("JOB_TIMEOUT_SECS", 300)?),
            max_attempts,
            retry_base_delay: Duration::from_secs(vars.parse_or("RETRY_BASE_DELAY_SECS", 2)?),
            recovery_window: Duration::from_secs(
                vars.parse_or::<u64>("RECOVERY_WINDOW_HOURS", 24)?.saturating_mul(3600),
            ),
            tier_thresholds,
            price: Price {
                amount_cents: vars.parse_or("PRICE_AMOUNT_CENTS", 5900)?,
                currency: vars.get_or("PRICE_CURRENCY", "usd").to_ascii_lowercase(),
            },
        })
    }

    pub fn runner_config(&self) -> RunnerConfig {
        RunnerConfig::default()
            .with_workers(self.worker_count)
            .with_queue_capacity(self.queue_capacity)
            .with_poll_interval(self.poll_interval)
            .with_job_timeout(self.job_timeout)
            .with_retry(RetryPolicy::exponential(
                self.max_attempts,
                self.retry_base_delay,
                Duration::from_secs(5 * 60),
            ))
            .with_recovery_window(self.recovery_window)
    }
}

struct Vars<F> {
    lookup: F,
}

impl<F> Vars<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, key: &str) -> Option<String> {
        (self.lookup)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn get_or(&self, key: &str, default: &str) -> String {
        self.get(key).unwrap_or_else(|| default.to_string())
    }

    fn require(&self, key: &'static str) -> Result<String, ConfigError> {
        self.get(key).ok_or(ConfigError::Missing(key))
    }

    fn parse_or<T>(&self, key: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        match self.get(key) {
            None => Ok(default),
            Some(raw) => raw.parse().map_err(|e: T::Err| ConfigError::Invalid {
                var: key,
                value: raw.clone(),
                reason: e.to_string(),
            }),
        }
    }

    fn invalid(&self, key: &'static str, reason: &str) -> ConfigError {
        ConfigError::Invalid {
            var: key,
            value: self.get(key).unwrap_or_default(),
            reason: reason.to_string(),
        }
    }
}
