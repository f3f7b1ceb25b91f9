use clap::Parser;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;
use validator::{Validate, ValidationError};

use crate::error::ConfigError;

/// Admission controller limits. Fixed once a limiter is built.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Validate)]
pub struct LimiterConfig {
    /// Tokens per second restored to each client bucket
    #[validate(custom(function = "validate_rate"))]
    pub ip_rate: f64,

    /// Burst capacity of each client bucket
    #[validate(range(min = 1, message = "must be at least 1"))]
    pub ip_burst: u32,

    /// Tokens per second restored to the global bucket
    #[validate(custom(function = "validate_rate"))]
    pub global_rate: f64,

    /// Burst capacity of the global bucket
    #[validate(range(min = 1, message = "must be at least 1"))]
    pub global_burst: u32,

    /// Period of the idle-bucket sweep
    #[serde(with = "humantime_serde")]
    #[validate(custom(function = "validate_interval"))]
    pub sweep_interval: Duration,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            ip_rate: 10.0,
            ip_burst: 20,
            global_rate: 100.0,
            global_burst: 200,
            sweep_interval: Duration::from_secs(10 * 60),
        }
    }
}

impl LimiterConfig {
    pub fn new(ip_rate: f64, ip_burst: u32, global_rate: f64, global_burst: u32) -> Self {
        Self {
            ip_rate,
            ip_burst,
            global_rate,
            global_burst,
            ..Self::default()
        }
    }

    pub fn with_sweep_interval(mut self, sweep_interval: Duration) -> Self {
        self.sweep_interval = sweep_interval;
        self
    }

    /// Reject configurations that would make the limiter meaningless.
    pub fn validated(self) -> Result<Self, ConfigError> {
        self.validate()?;
        Ok(self)
    }
}

fn validate_rate(rate: f64) -> Result<(), ValidationError> {
    if !rate.is_finite() || rate <= 0.0 {
        let mut err = ValidationError::new("rate");
        err.message = Some("must be a finite number greater than 0".into());
        return Err(err);
    }
    Ok(())
}

fn validate_interval(interval: &Duration) -> Result<(), ValidationError> {
    if interval.is_zero() {
        let mut err = ValidationError::new("interval");
        err.message = Some("must be greater than 0".into());
        return Err(err);
    }
    Ok(())
}

/// Process configuration, read from flags or the environment.
#[derive(Debug, Clone, Parser)]
#[command(name = "gatekeeper", version, about = "Rate limiting edge for the library API gateway")]
pub struct Config {
    /// Server bind address
    #[arg(long, env = "BIND_ADDR", default_value = "0.0.0.0:8000")]
    pub bind_addr: SocketAddr,

    /// Tokens per second per client IP
    #[arg(long, env = "RATE_LIMIT_IP", default_value_t = 10.0)]
    pub rate_limit_ip: f64,

    /// Burst capacity per client IP
    #[arg(long, env = "RATE_LIMIT_IP_BURST", default_value_t = 20)]
    pub rate_limit_ip_burst: u32,

    /// Tokens per second across all clients
    #[arg(long, env = "RATE_LIMIT_GLOBAL", default_value_t = 100.0)]
    pub rate_limit_global: f64,

    /// Burst capacity across all clients
    #[arg(long, env = "RATE_LIMIT_GLOBAL_BURST", default_value_t = 200)]
    pub rate_limit_global_burst: u32,

    /// How often idle client buckets are reclaimed (e.g. "10m", "30s")
    #[arg(
        long,
        env = "RATE_LIMIT_SWEEP_INTERVAL",
        default_value = "10m",
        value_parser = humantime_serde::re::humantime::parse_duration
    )]
    pub sweep_interval: Duration,

    /// Log level used when RUST_LOG is not set
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Emit logs as JSON lines
    #[arg(long, env = "LOG_JSON", default_value_t = false)]
    pub log_json: bool,

    /// Deployment environment; "production" forces JSON logs
    #[arg(long, env = "APP_ENV", default_value = "development")]
    pub app_env: String,

    /// Upper bound on handling a single request
    #[arg(
        long,
        env = "REQUEST_TIMEOUT",
        default_value = "15s",
        value_parser = humantime_serde::re::humantime::parse_duration
    )]
    pub request_timeout: Duration,

    /// How long in-flight connections may drain after a shutdown signal
    #[arg(
        long,
        env = "SHUTDOWN_GRACE",
        default_value = "10s",
        value_parser = humantime_serde::re::humantime::parse_duration
    )]
    pub shutdown_grace: Duration,
}

impl Default for Config {
    fn default() -> Self {
        let limiter = LimiterConfig::default();
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8000)),
            rate_limit_ip: limiter.ip_rate,
            rate_limit_ip_burst: limiter.ip_burst,
            rate_limit_global: limiter.global_rate,
            rate_limit_global_burst: limiter.global_burst,
            sweep_interval: limiter.sweep_interval,
            log_level: "info".to_string(),
            log_json: false,
            app_env: "development".to_string(),
            request_timeout: Duration::from_secs(15),
            shutdown_grace: Duration::from_secs(10),
        }
    }
}

impl Config {
    /// Limiter settings carried by this configuration.
    pub fn limiter(&self) -> LimiterConfig {
        LimiterConfig::new(
            self.rate_limit_ip,
            self.rate_limit_ip_burst,
            self.rate_limit_global,
            self.rate_limit_global_burst,
        )
        .with_sweep_interval(self.sweep_interval)
    }

    pub fn is_production(&self) -> bool {
        self.app_env.eq_ignore_ascii_case("production")
    }

    /// JSON logs were requested explicitly or implied by production.
    pub fn json_logs(&self) -> bool {
        self.log_json || self.is_production()
    }
}
