use std::str::FromStr;

use anyhow::{Context, Result, anyhow};
use loanbook_waiver::EngineConfig;

const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 3600;

#[derive(Clone, Debug)]
pub struct ServiceConfig {
    pub database_url: String,
    pub redis_url: String,
    pub sweep_interval_secs: u64,
}

impl ServiceConfig {
    pub fn worker_from_env() -> Result<Self> {
        let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL is required")?;
        let redis_url = std::env::var("REDIS_URL").context("REDIS_URL is required")?;
        let sweep_interval_secs = parse_optional(
            &|key: &str| std::env::var(key).ok(),
            "SWEEP_INTERVAL_SECS",
        )?
        .unwrap_or(DEFAULT_SWEEP_INTERVAL_SECS);

        Ok(Self {
            database_url,
            redis_url,
            sweep_interval_secs,
        })
    }
}

/// Engine tuning read from `WAIVER_*` variables on top of the defaults.
#[derive(Clone, Debug, Default)]
pub struct EngineSettings {
    pub engine: EngineConfig,
}

impl EngineSettings {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut engine = EngineConfig::default();
        let policy = &mut engine.policy;

        if let Some(value) = parse_optional(&lookup, "WAIVER_AUTO_APPROVE_MAX")? {
            policy.auto_approve_max = value;
        }
        if let Some(value) = parse_optional(&lookup, "WAIVER_SUPERVISOR_MIN")? {
            policy.supervisor_min = value;
        }
        if let Some(value) = parse_optional(&lookup, "WAIVER_COLLECTIONS_HEAD_MIN")? {
            policy.collections_head_min = value;
        }
        if let Some(value) = parse_optional(&lookup, "WAIVER_OPERATIONS_HEAD_MIN")? {
            policy.operations_head_min = value;
        }
        if let Some(value) = parse_optional(&lookup, "WAIVER_DEFAULT_VALIDITY_DAYS")? {
            engine.default_validity_days = value;
        }
        if let Some(value) = parse_optional(&lookup, "WAIVER_LOCK_TIMEOUT_MS")? {
            engine.lock_timeout_ms = value;
        }
        if let Some(value) = parse_optional(&lookup, "WAIVER_COMMIT_RETRIES")? {
            engine.commit_retries = value;
        }

        let policy = &engine.policy;
        if policy.auto_approve_max < 0
            || policy.supervisor_min > policy.collections_head_min
            || policy.collections_head_min > policy.operations_head_min
        {
            return Err(anyhow!(
                "approval thresholds must be non-negative and ascending by tier"
            ));
        }
        if engine.default_validity_days < 0 {
            return Err(anyhow!("WAIVER_DEFAULT_VALIDITY_DAYS must not be negative"));
        }

        Ok(Self { engine })
    }

    pub fn into_engine_config(self) -> EngineConfig {
        self.engine
    }
}

fn parse_optional<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map(Some)
            .with_context(|| format!("{key} is not a valid number: {raw}")),
        _ => Ok(None),
    }
}
