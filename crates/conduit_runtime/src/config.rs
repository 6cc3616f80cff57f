//! Runtime configuration.

use std::env::VarError;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::options::{ConfigDescriptor, Configurable, OptionSpec, ParsedOptions};

/// Environment variable overriding [`RuntimeConfig::shutdown_grace`] (ms).
pub const SHUTDOWN_GRACE_ENV: &str = "CONDUIT_SHUTDOWN_GRACE_MS";
/// Environment variable overriding [`RuntimeConfig::drain_timeout`] (ms).
pub const DRAIN_TIMEOUT_ENV: &str = "CONDUIT_DRAIN_TIMEOUT_MS";
/// Environment variable overriding [`RuntimeConfig::metrics_interval`] (ms, 0 disables).
pub const METRICS_INTERVAL_ENV: &str = "CONDUIT_METRICS_INTERVAL_MS";
/// Environment variable overriding [`RuntimeConfig::error_policy`].
pub const ERROR_POLICY_ENV: &str = "CONDUIT_ERROR_POLICY";

/// What the scheduler does when a component hook fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorPolicy {
    /// Log the failure; the component stays eligible for later cycles.
    #[default]
    Continue,
    /// Log the failure and shut the runtime down.
    Shutdown,
}

impl FromStr for ErrorPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "continue" => Ok(Self::Continue),
            "shutdown" => Ok(Self::Shutdown),
            other => Err(ConfigError::Invalid {
                option: "error_policy".to_string(),
                reason: format!("expected `continue` or `shutdown`, got `{other}`"),
            }),
        }
    }
}

/// Configuration for the dispatch loop and its shutdown sequence.
#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeConfig {
    /// How long in-flight offloaded calls may run after shutdown begins.
    pub shutdown_grace: Duration,
    /// Upper bound for delivering already published events during shutdown.
    pub drain_timeout: Duration,
    /// How long the graph must stay idle before draining is considered done.
    pub drain_quiet_period: Duration,
    /// Averaging window for metric events (`None` disables metrics).
    pub metrics_interval: Option<Duration>,
    /// Reaction to component failures.
    pub error_policy: ErrorPolicy,
    /// Longest single wait of the loop when nothing is scheduled.
    pub idle_poll: Duration,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            shutdown_grace: Duration::from_secs(5),
            drain_timeout: Duration::from_secs(5),
            drain_quiet_period: Duration::from_millis(50),
            metrics_interval: Some(Duration::from_secs(1)),
            error_policy: ErrorPolicy::Continue,
            idle_poll: Duration::from_millis(100),
        }
    }
}

impl RuntimeConfig {
    /// Defaults overridden by the `CONDUIT_*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if a variable is set but malformed
    /// or not valid Unicode.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var))
    }

    /// Defaults overridden by whatever `lookup` returns for each variable.
    fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Result<String, VarError>,
    {
        let mut config = Self::default();
        if let Some(ms) = env_millis(SHUTDOWN_GRACE_ENV, &lookup)? {
            config.shutdown_grace = ms;
        }
        if let Some(ms) = env_millis(DRAIN_TIMEOUT_ENV, &lookup)? {
            config.drain_timeout = ms;
        }
        if let Some(ms) = env_millis(METRICS_INTERVAL_ENV, &lookup)? {
            config.metrics_interval = (!ms.is_zero()).then_some(ms);
        }
        if let Some(policy) = env_value(ERROR_POLICY_ENV, &lookup)? {
            config.error_policy = policy.parse()?;
        }
        Ok(config)
    }

    /// Override fields with the options of [`RuntimeConfig::descriptor`]
    /// present in `options`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for malformed options.
    pub fn apply(mut self, options: &ParsedOptions) -> Result<Self, ConfigError> {
        if let Some(ms) = options.get::<u64>("shutdown_grace_ms")? {
            self.shutdown_grace = Duration::from_millis(ms);
        }
        if let Some(ms) = options.get::<u64>("drain_timeout_ms")? {
            self.drain_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = options.get::<u64>("metrics_interval_ms")? {
            self.metrics_interval = (ms > 0).then(|| Duration::from_millis(ms));
        }
        if let Some(policy) = options.get::<String>("error_policy")? {
            self.error_policy = policy.parse()?;
        }
        Ok(self)
    }

    /// Override the shutdown grace period.
    #[must_use]
    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    /// Override the drain timeout.
    #[must_use]
    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }

    /// Override the drain quiet period.
    #[must_use]
    pub fn with_drain_quiet_period(mut self, quiet: Duration) -> Self {
        self.drain_quiet_period = quiet;
        self
    }

    /// Override the metric window; `None` disables metric events.
    #[must_use]
    pub fn with_metrics_interval(mut self, interval: Option<Duration>) -> Self {
        self.metrics_interval = interval;
        self
    }

    /// Override the error policy.
    #[must_use]
    pub fn with_error_policy(mut self, policy: ErrorPolicy) -> Self {
        self.error_policy = policy;
        self
    }
}

fn env_value<F>(var: &str, lookup: &F) -> Result<Option<String>, ConfigError>
where
    F: Fn(&str) -> Result<String, VarError>,
{
    match lookup(var) {
        Ok(raw) => Ok(Some(raw)),
        Err(VarError::NotPresent) => Ok(None),
        Err(e @ VarError::NotUnicode(_)) => Err(ConfigError::Invalid {
            option: var.to_string(),
            reason: e.to_string(),
        }),
    }
}

fn env_millis<F>(var: &str, lookup: &F) -> Result<Option<Duration>, ConfigError>
where
    F: Fn(&str) -> Result<String, VarError>,
{
    let Some(raw) = env_value(var, lookup)? else {
        return Ok(None);
    };
    raw.trim()
        .parse::<u64>()
        .map(|ms| Some(Duration::from_millis(ms)))
        .map_err(|e| ConfigError::Invalid {
            option: var.to_string(),
            reason: e.to_string(),
        })
}

impl Configurable for RuntimeConfig {
    type Config = RuntimeConfig;

    fn descriptor() -> ConfigDescriptor {
        let defaults = RuntimeConfig::default();
        ConfigDescriptor::new("runtime")
            .option(
                OptionSpec::new("shutdown_grace_ms", "grace period for in-flight offloaded calls")
                    .with_default(defaults.shutdown_grace.as_millis() as u64),
            )
            .option(
                OptionSpec::new("drain_timeout_ms", "maximum time to drain events on shutdown")
                    .with_default(defaults.drain_timeout.as_millis() as u64),
            )
            .option(
                OptionSpec::new("metrics_interval_ms", "metric averaging window, 0 disables metrics")
                    .with_default(1000),
            )
            .option(
                OptionSpec::new("error_policy", "`continue` or `shutdown` on component failure")
                    .with_default("continue"),
            )
    }

    fn configure(options: &ParsedOptions) -> Result<Self::Config, ConfigError> {
        RuntimeConfig::default().apply(options)
    }
}
