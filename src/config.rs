use anyhow::Result;
use dotenvy::dotenv;
use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::custody::SimulatorConfig;
use crate::services::PaymentPolicy;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
}

impl FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "pretty" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            other => anyhow::bail!("LOG_FORMAT must be 'pretty' or 'json', got '{}'", other),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server_port: u16,
    pub database_url: Option<String>,
    pub required_signatures: u32,
    pub service_fee_bps: u32,
    pub custody_timeout_ms: u64,
    pub custody_latency_ms: u64,
    pub custody_latency_jitter_ms: u64,
    pub custody_confirmation_delay_secs: u64,
    pub custody_failure_threshold: u32,
    pub custody_reset_timeout_secs: u64,
    pub settlement_timeout_secs: u64,
    pub seed_demo_data: bool,
    pub log_format: LogFormat,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_port: 3000,
            database_url: None,
            required_signatures: 2,
            service_fee_bps: 25,
            custody_timeout_ms: 2_000,
            custody_latency_ms: 100,
            custody_latency_jitter_ms: 50,
            custody_confirmation_delay_secs: 30,
            custody_failure_threshold: 3,
            custody_reset_timeout_secs: 60,
            settlement_timeout_secs: 300,
            seed_demo_data: true,
            log_format: LogFormat::Pretty,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv().ok(); // Load .env file if present

        let defaults = Config::default();
        let config = Config {
            server_port: var_or("SERVER_PORT", defaults.server_port)?,
            database_url: env::var("DATABASE_URL").ok().filter(|url| !url.trim().is_empty()),
            required_signatures: var_or("REQUIRED_SIGNATURES", defaults.required_signatures)?,
            service_fee_bps: var_or("SERVICE_FEE_BPS", defaults.service_fee_bps)?,
            custody_timeout_ms: var_or("CUSTODY_TIMEOUT_MS", defaults.custody_timeout_ms)?,
            custody_latency_ms: var_or("CUSTODY_LATENCY_MS", defaults.custody_latency_ms)?,
            custody_latency_jitter_ms: var_or(
                "CUSTODY_LATENCY_JITTER_MS",
                defaults.custody_latency_jitter_ms,
            )?,
            custody_confirmation_delay_secs: var_or(
                "CUSTODY_CONFIRMATION_DELAY_SECS",
                defaults.custody_confirmation_delay_secs,
            )?,
            custody_failure_threshold: var_or(
                "CUSTODY_FAILURE_THRESHOLD",
                defaults.custody_failure_threshold,
            )?,
            custody_reset_timeout_secs: var_or(
                "CUSTODY_RESET_TIMEOUT_SECS",
                defaults.custody_reset_timeout_secs,
            )?,
            settlement_timeout_secs: var_or(
                "SETTLEMENT_TIMEOUT_SECS",
                defaults.settlement_timeout_secs,
            )?,
            seed_demo_data: var_or("SEED_DEMO_DATA", defaults.seed_demo_data)?,
            log_format: var_or("LOG_FORMAT", defaults.log_format)?,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.required_signatures == 0 {
            anyhow::bail!("REQUIRED_SIGNATURES must be at least 1");
        }
        if self.service_fee_bps > 10_000 {
            anyhow::bail!("SERVICE_FEE_BPS must not exceed 10000");
        }
        if self.custody_timeout_ms == 0 {
            anyhow::bail!("CUSTODY_TIMEOUT_MS must be greater than 0");
        }
        if self.custody_failure_threshold == 0 {
            anyhow::bail!("CUSTODY_FAILURE_THRESHOLD must be at least 1");
        }
        Ok(())
    }

    pub fn policy(&self) -> PaymentPolicy {
        PaymentPolicy {
            required_signatures: self.required_signatures,
            service_fee_bps: self.service_fee_bps,
        }
    }

    pub fn simulator(&self) -> SimulatorConfig {
        SimulatorConfig {
            latency: Duration::from_millis(self.custody_latency_ms),
            latency_jitter: Duration::from_millis(self.custody_latency_jitter_ms),
            confirmation_delay: Duration::from_secs(self.custody_confirmation_delay_secs),
            ..SimulatorConfig::default()
        }
    }

    pub fn custody_timeout(&self) -> Duration {
        Duration::from_millis(self.custody_timeout_ms)
    }

    pub fn settlement_timeout(&self) -> Duration {
        Duration::from_secs(self.settlement_timeout_secs)
    }
}

fn var_or<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid {}: {}", name, e)),
        Err(_) => Ok(default),
    }
}
