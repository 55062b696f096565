use std::time::Duration;

use anyhow::{Context, Result};

use crate::prediction::model::Weights;
use crate::prediction::recommendations::FactorThresholds;
use crate::prediction::retry::RetryPolicy;

/// Default bus debounce window. Bursts of stale notifications inside it coalesce
/// into one recalculation.
pub const DEFAULT_DEBOUNCE_MS: u64 = 400;
pub const DEFAULT_RECOMMENDATION_CAP: usize = 5;
const MAX_DEBOUNCE_MS: u64 = 60_000;
const MAX_RETRY_ATTEMPTS: u32 = 10;
const MAX_RETRY_BASE_MS: u64 = 60_000;

/// Application configuration loaded from environment variables.
/// Fails at startup if required variables are missing or tunables are invalid.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub port: u16,
    pub rust_log: String,
    pub prediction: PredictionConfig,
}

/// Every tunable of the prediction engine in one place.
#[derive(Debug, Clone)]
pub struct PredictionConfig {
    pub weights: Weights,
    pub thresholds: FactorThresholds,
    pub recommendation_cap: usize,
    pub debounce: Duration,
    pub retry: RetryPolicy,
}

impl Default for PredictionConfig {
    fn default() -> Self {
        Self {
            weights: Weights::default(),
            thresholds: FactorThresholds::default(),
            recommendation_cap: DEFAULT_RECOMMENDATION_CAP,
            debounce: Duration::from_millis(DEFAULT_DEBOUNCE_MS),
            retry: RetryPolicy::default(),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing

        Ok(Config {
            database_url: require_env("DATABASE_URL")?,
            port: std::env::var("PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse::<u16>()
                .context("PORT must be a valid port number")?,
            rust_log: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
            prediction: PredictionConfig::from_env()?,
        })
    }
}

impl PredictionConfig {
    pub fn from_env() -> Result<Self> {
        let lookup = |key: &str| std::env::var(key).ok();
        Self::from_lookup(lookup)
    }

    /// Builds the config from an arbitrary key lookup so overrides can be tested
    /// without touching the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let weights = match lookup("PREDICTION_WEIGHTS") {
            Some(raw) => parse_weights(&raw)?,
            None => defaults.weights,
        };

        let debounce_ms = parse_or("PREDICTION_DEBOUNCE_MS", &lookup, DEFAULT_DEBOUNCE_MS)?;
        if debounce_ms == 0 || debounce_ms > MAX_DEBOUNCE_MS {
            anyhow::bail!("PREDICTION_DEBOUNCE_MS must be between 1 and {MAX_DEBOUNCE_MS}");
        }

        let recommendation_cap = parse_or(
            "PREDICTION_RECOMMENDATION_CAP",
            &lookup,
            DEFAULT_RECOMMENDATION_CAP,
        )?;
        if recommendation_cap == 0 {
            anyhow::bail!("PREDICTION_RECOMMENDATION_CAP must be at least 1");
        }

        let max_attempts = parse_or(
            "PREDICTION_RETRY_ATTEMPTS",
            &lookup,
            defaults.retry.max_attempts,
        )?;
        if max_attempts == 0 || max_attempts > MAX_RETRY_ATTEMPTS {
            anyhow::bail!("PREDICTION_RETRY_ATTEMPTS must be between 1 and {MAX_RETRY_ATTEMPTS}");
        }
        let base_ms = parse_or(
            "PREDICTION_RETRY_BASE_MS",
            &lookup,
            defaults.retry.base_delay.as_millis() as u64,
        )?;
        if base_ms > MAX_RETRY_BASE_MS {
            anyhow::bail!("PREDICTION_RETRY_BASE_MS must be at most {MAX_RETRY_BASE_MS}");
        }

        Ok(Self {
            weights,
            thresholds: defaults.thresholds,
            recommendation_cap,
            debounce: Duration::from_millis(debounce_ms),
            retry: RetryPolicy {
                max_attempts,
                base_delay: Duration::from_millis(base_ms),
            },
        })
    }
}

fn parse_weights(raw: &str) -> Result<Weights> {
    let values = raw
        .split(',')
        .map(|v| v.trim().parse::<f64>())
        .collect::<Result<Vec<_>, _>>()
        .context("PREDICTION_WEIGHTS must be five comma-separated numbers")?;
    Ok(Weights::from_slice(&values)?)
}

fn parse_or<T, F>(key: &str, lookup: &F, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .with_context(|| format!("{key} has an invalid value '{raw}'")),
        None => Ok(default),
    }
}

fn require_env(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("Required environment variable '{key}' is not set"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_without_overrides() {
        let cfg = PredictionConfig::from_lookup(lookup_from(&[])).unwrap();
        assert_eq!(cfg.debounce, Duration::from_millis(400));
        assert_eq!(cfg.recommendation_cap, 5);
        assert_eq!(cfg.weights, Weights::default());
        assert_eq!(cfg.thresholds.preparation, 60);
    }

    #[test]
    fn test_overrides_are_applied() {
        let cfg = PredictionConfig::from_lookup(lookup_from(&[
            ("PREDICTION_DEBOUNCE_MS", "300"),
            ("PREDICTION_RECOMMENDATION_CAP", "3"),
            ("PREDICTION_WEIGHTS", "0.2, 0.2, 0.2, 0.2, 0.2"),
        ]))
        .unwrap();
        assert_eq!(cfg.debounce, Duration::from_millis(300));
        assert_eq!(cfg.recommendation_cap, 3);
        assert!((cfg.weights.practice - 0.2).abs() < f64::EPSILON);
    }

    #[test]
    fn test_misconfigured_weights_fail_startup() {
        let err = PredictionConfig::from_lookup(lookup_from(&[(
            "PREDICTION_WEIGHTS",
            "0.5,0.5,0.5,0.0,0.0",
        )]))
        .unwrap_err();
        assert!(err.to_string().contains("sum to 1.0"), "{err}");
    }

    #[test]
    fn test_rejects_zero_cap_and_bad_debounce() {
        assert!(PredictionConfig::from_lookup(lookup_from(&[(
            "PREDICTION_RECOMMENDATION_CAP",
            "0"
        )]))
        .is_err());
        assert!(
            PredictionConfig::from_lookup(lookup_from(&[("PREDICTION_DEBOUNCE_MS", "abc")]))
                .is_err()
        );
    }

    #[test]
    fn test_rejects_out_of_range_retry_settings() {
        let err = PredictionConfig::from_lookup(lookup_from(&[(
            "PREDICTION_RETRY_BASE_MS",
            "18446744073709551615",
        )]))
        .unwrap_err();
        assert!(err.to_string().contains("PREDICTION_RETRY_BASE_MS"), "{err}");

        assert!(PredictionConfig::from_lookup(lookup_from(&[(
            "PREDICTION_RETRY_ATTEMPTS",
            "1000"
        )]))
        .is_err());

        let cfg = PredictionConfig::from_lookup(lookup_from(&[
            ("PREDICTION_RETRY_BASE_MS", "60000"),
            ("PREDICTION_RETRY_ATTEMPTS", "10"),
        ]))
        .unwrap();
        assert_eq!(cfg.retry.base_delay, Duration::from_secs(60));
    }
}
