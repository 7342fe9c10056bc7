//! Runtime configuration for the coordinator.
//!
//! Every knob has a default so an empty config file (or none at all) yields a
//! working coordinator. Durations are humane strings ("30s", "5m").

use std::net::SocketAddr;
use std::num::NonZeroU8;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use url::Url;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Config {
    /// Socket the HTTP API binds to.
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,

    /// External base URL participants use to reach the coordinator. LRA ids
    /// are minted under it. Defaults to `http://{listen}`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<Url>,

    /// Journal file for durable state. When unset, state is in-memory only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub journal_path: Option<PathBuf>,

    #[serde(default)]
    pub dispatch: RetryPolicy,

    #[serde(default)]
    pub recovery: RecoveryConfig,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            listen: default_listen(),
            base_url: None,
            journal_path: None,
            dispatch: RetryPolicy::default(),
            recovery: RecoveryConfig::default(),
        }
    }
}

impl Config {
    pub fn from_yaml_file(path: &Path) -> anyhow::Result<Config> {
        let raw = fs_err::read_to_string(path)?;
        serde_yaml::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
    }

    /// The base URL LRA ids are minted under.
    pub fn effective_base_url(&self) -> Url {
        match &self.base_url {
            Some(url) => url.clone(),
            // The listen address always forms a valid URL.
            None => Url::parse(&format!("http://{}", self.listen)).expect("listen addr as URL"),
        }
    }
}

fn default_listen() -> SocketAddr {
    "127.0.0.1:8070".parse().expect("static socket addr")
}

/// Retry and timeout behavior for participant callbacks.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RetryPolicy {
    /// Deadline for a single callback attempt.
    #[serde(default = "default_request_timeout", with = "crate::serde_dur")]
    pub request_timeout: Duration,

    /// Attempts before a participant is marked failed.
    #[serde(default = "default_attempts")]
    pub max_attempts: NonZeroU8,

    /// Delay before the first retry; doubles per attempt.
    #[serde(default = "default_base_delay", with = "crate::serde_dur")]
    pub base_delay: Duration,

    /// Upper bound for the doubling delay.
    #[serde(default = "default_max_delay", with = "crate::serde_dur")]
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            request_timeout: default_request_timeout(),
            max_attempts: default_attempts(),
            base_delay: default_base_delay(),
            max_delay: default_max_delay(),
        }
    }
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_attempts() -> NonZeroU8 {
    NonZeroU8::new(5).expect("nonzero literal")
}

fn default_base_delay() -> Duration {
    Duration::from_secs(15)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(240)
}

/// Background sweep behavior.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RecoveryConfig {
    /// Pause between sweeps.
    #[serde(default = "default_scan_interval", with = "crate::serde_dur")]
    pub interval: Duration,

    /// A non-terminal LRA idle longer than this is re-driven.
    #[serde(default = "default_staleness", with = "crate::serde_dur")]
    pub staleness: Duration,

    /// An Active LRA older than this is cancelled. Unset means Active LRAs
    /// wait for an explicit close or cancel forever.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "crate::serde_dur::option"
    )]
    pub lra_deadline: Option<Duration>,

    /// Terminal LRAs are purged this long after they ended.
    #[serde(default = "default_retention", with = "crate::serde_dur")]
    pub retention: Duration,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        RecoveryConfig {
            interval: default_scan_interval(),
            staleness: default_staleness(),
            lra_deadline: None,
            retention: default_retention(),
        }
    }
}

fn default_scan_interval() -> Duration {
    Duration::from_secs(60)
}

fn default_staleness() -> Duration {
    Duration::from_secs(90)
}

fn default_retention() -> Duration {
    Duration::from_secs(600)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_yaml_yields_defaults() {
        let config: Config = serde_yaml::from_str("{}").unwrap();
        assert_eq!(config.listen, default_listen());
        assert_eq!(config.dispatch.max_attempts.get(), 5);
        assert_eq!(config.dispatch.request_timeout, Duration::from_secs(30));
        assert_eq!(config.recovery.interval, Duration::from_secs(60));
        assert!(config.recovery.lra_deadline.is_none());
        assert!(config.journal_path.is_none());
    }

    #[test]
    fn test_durations_parse_from_strings() {
        let config: Config = serde_yaml::from_str(
            r#"
            listen: "0.0.0.0:9000"
            baseUrl: "https://lra.example.com"
            dispatch:
              requestTimeout: 5s
              maxAttempts: 3
              baseDelay: 100ms
              maxDelay: 2s
            recovery:
              interval: 10s
              staleness: 30s
              lraDeadline: 1h
              retention: 5m
            "#,
        )
        .unwrap();

        assert_eq!(config.dispatch.request_timeout, Duration::from_secs(5));
        assert_eq!(config.dispatch.max_attempts.get(), 3);
        assert_eq!(config.dispatch.base_delay, Duration::from_millis(100));
        assert_eq!(config.recovery.lra_deadline, Some(Duration::from_secs(3600)));
        assert_eq!(
            config.effective_base_url().as_str(),
            "https://lra.example.com/"
        );
    }

    #[test]
    fn test_unknown_fields_rejected() {
        let result: Result<Config, _> = serde_yaml::from_str("bogus: true");
        assert!(result.is_err());
    }

    #[test]
    fn test_base_url_defaults_to_listen() {
        let config = Config::default();
        assert_eq!(
            config.effective_base_url().as_str(),
            "http://127.0.0.1:8070/"
        );
    }
}
