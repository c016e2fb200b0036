//! Engine configuration loaded from environment variables.

use crate::readiness::Readiness;
use crate::tenant::DEMO_TENANT;
use crate::{Error, Result};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Engine configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Base URL of the document server; `None` keeps everything in memory
    pub remote_url: Option<String>,
    /// Bearer token sent to the document server
    pub remote_token: Option<String>,
    /// JSON file backing the local store; `None` keeps it in memory
    pub local_path: Option<PathBuf>,
    /// Signed-in user, used for tenant lookup and `updatedBy`
    pub user_id: Option<String>,
    pub demo_tenant: String,
    /// Period of automatic full passes; `None` disables them
    pub sync_interval: Option<Duration>,
    /// Delay before the start-up pass
    pub startup_delay: Duration,
    pub max_retries: u32,
    pub readiness: Readiness,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            remote_url: None,
            remote_token: None,
            local_path: None,
            user_id: None,
            demo_tenant: DEMO_TENANT.to_string(),
            sync_interval: None,
            startup_delay: Duration::from_millis(3000),
            max_retries: crate::queue::DEFAULT_MAX_RETRIES,
            readiness: Readiness::default(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from `TANDEM_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let interval_secs: u64 = parse(&var, "TANDEM_SYNC_INTERVAL_SECS", 0)?;
        let startup_ms: u64 = parse(
            &var,
            "TANDEM_STARTUP_DELAY_MS",
            defaults.startup_delay.as_millis() as u64,
        )?;
        let ready_delay_ms: u64 = parse(
            &var,
            "TANDEM_READY_DELAY_MS",
            defaults.readiness.delay.as_millis() as u64,
        )?;

        Ok(Self {
            remote_url: var("TANDEM_REMOTE_URL"),
            remote_token: var("TANDEM_REMOTE_TOKEN"),
            local_path: var("TANDEM_LOCAL_PATH").map(PathBuf::from),
            user_id: var("TANDEM_USER_ID"),
            demo_tenant: var("TANDEM_DEMO_TENANT").unwrap_or(defaults.demo_tenant),
            sync_interval: (interval_secs > 0).then(|| Duration::from_secs(interval_secs)),
            startup_delay: Duration::from_millis(startup_ms),
            max_retries: parse(&var, "TANDEM_MAX_RETRIES", defaults.max_retries)?,
            readiness: Readiness::new(
                parse(&var, "TANDEM_READY_ATTEMPTS", defaults.readiness.attempts)?,
                Duration::from_millis(ready_delay_ms),
            ),
        })
    }
}

fn parse<T, F>(var: &F, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match var(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| Error::Config(format!("invalid {key}: {raw}"))),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_when_unset() {
        let config = EngineConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.demo_tenant, "demo_tenant");
        assert_eq!(config.sync_interval, None);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.readiness, Readiness::new(10, Duration::from_millis(500)));
    }

    #[test]
    fn reads_every_variable() {
        let config = EngineConfig::from_lookup(lookup(&[
            ("TANDEM_REMOTE_URL", "http://localhost:3000"),
            ("TANDEM_REMOTE_TOKEN", "secret"),
            ("TANDEM_LOCAL_PATH", "/tmp/tandem.json"),
            ("TANDEM_USER_ID", "u-1"),
            ("TANDEM_DEMO_TENANT", "sandbox"),
            ("TANDEM_SYNC_INTERVAL_SECS", "300"),
            ("TANDEM_STARTUP_DELAY_MS", "0"),
            ("TANDEM_MAX_RETRIES", "5"),
            ("TANDEM_READY_ATTEMPTS", "2"),
            ("TANDEM_READY_DELAY_MS", "50"),
        ]))
        .unwrap();

        assert_eq!(config.remote_url.as_deref(), Some("http://localhost:3000"));
        assert_eq!(config.remote_token.as_deref(), Some("secret"));
        assert_eq!(config.local_path, Some(PathBuf::from("/tmp/tandem.json")));
        assert_eq!(config.user_id.as_deref(), Some("u-1"));
        assert_eq!(config.demo_tenant, "sandbox");
        assert_eq!(config.sync_interval, Some(Duration::from_secs(300)));
        assert_eq!(config.startup_delay, Duration::ZERO);
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.readiness, Readiness::new(2, Duration::from_millis(50)));
    }

    #[test]
    fn blank_values_count_as_unset() {
        let config = EngineConfig::from_lookup(lookup(&[
            ("TANDEM_REMOTE_URL", "  "),
            ("TANDEM_MAX_RETRIES", ""),
        ]))
        .unwrap();
        assert_eq!(config.remote_url, None);
        assert_eq!(config.max_retries, 3);
    }

    #[test]
    fn rejects_malformed_numbers() {
        let err = EngineConfig::from_lookup(lookup(&[("TANDEM_MAX_RETRIES", "many")])).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert!(err.to_string().contains("TANDEM_MAX_RETRIES"));
    }
}
