use std::time::Duration;

use anyhow::{bail, Context, Result};

// ---------------------------------------------------------------------------
// FcmConfig
// ---------------------------------------------------------------------------

/// Firebase Cloud Messaging credentials. Push delivery is disabled (log-only)
/// unless both the project id and an access token are configured.
#[derive(Debug, Clone, PartialEq)]
pub struct FcmConfig {
    pub base_url: String,
    pub project_id: String,
    /// OAuth2 bearer token with the `firebase.messaging` scope.
    pub access_token: String,
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Config {
    /// Postgres URL. `None` runs the service on the in-memory store.
    pub database_url: Option<String>,
    pub server_host: String,
    pub server_port: u16,
    /// Readings strictly above this value raise an alert.
    pub gas_threshold: f64,
    /// Minimum spacing between two alerts for the same device.
    pub throttle_window: Duration,
    /// Upper bound for each store write and each push delivery.
    pub io_timeout: Duration,
    /// Maximum concurrent deliveries per alert.
    pub fanout_concurrency: usize,
    pub fcm: Option<FcmConfig>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup, so parsing can be tested without
    /// touching the process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let optional = |key: &str, default: &str| -> String {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| default.to_owned())
        };

        let gas_threshold: f64 = optional("GAS_THRESHOLD", "50")
            .parse()
            .context("GAS_THRESHOLD must be a number")?;
        if !gas_threshold.is_finite() {
            bail!("GAS_THRESHOLD must be finite, got {gas_threshold}");
        }

        let fanout_concurrency: usize = optional("FANOUT_CONCURRENCY", "8")
            .parse()
            .context("FANOUT_CONCURRENCY must be a positive integer")?;
        if fanout_concurrency == 0 {
            bail!("FANOUT_CONCURRENCY must be at least 1");
        }

        let fcm = match (lookup("FCM_PROJECT_ID"), lookup("FCM_ACCESS_TOKEN")) {
            (Some(project_id), Some(access_token))
                if !project_id.is_empty() && !access_token.is_empty() =>
            {
                Some(FcmConfig {
                    base_url: optional("FCM_BASE_URL", "https://fcm.googleapis.com"),
                    project_id,
                    access_token,
                })
            }
            _ => None,
        };

        Ok(Self {
            database_url: lookup("DATABASE_URL").filter(|v| !v.is_empty()),
            server_host: optional("SERVER_HOST", "0.0.0.0"),
            server_port: optional("SERVER_PORT", "3000")
                .parse()
                .context("SERVER_PORT must be a valid port number")?,
            gas_threshold,
            throttle_window: Duration::from_secs(
                optional("ALERT_THROTTLE_SECS", "120")
                    .parse()
                    .context("ALERT_THROTTLE_SECS must be a non-negative integer")?,
            ),
            io_timeout: Duration::from_secs(
                optional("IO_TIMEOUT_SECS", "10")
                    .parse()
                    .context("IO_TIMEOUT_SECS must be a non-negative integer")?,
            ),
            fanout_concurrency,
            fcm,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config_from(pairs: &[(&str, &str)]) -> Result<Config> {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        Config::from_lookup(|key| env.get(key).cloned())
    }

    #[test]
    fn defaults_match_the_field_deployment() {
        let c = config_from(&[]).unwrap();
        assert_eq!(c.database_url, None);
        assert_eq!(c.server_host, "0.0.0.0");
        assert_eq!(c.server_port, 3000);
        assert_eq!(c.gas_threshold, 50.0);
        assert_eq!(c.throttle_window, Duration::from_secs(120));
        assert_eq!(c.io_timeout, Duration::from_secs(10));
        assert_eq!(c.fanout_concurrency, 8);
        assert!(c.fcm.is_none());
    }

    #[test]
    fn overrides_are_parsed() {
        let c = config_from(&[
            ("DATABASE_URL", "postgres://localhost/gas"),
            ("SERVER_PORT", "8080"),
            ("GAS_THRESHOLD", "37.5"),
            ("ALERT_THROTTLE_SECS", "30"),
            ("IO_TIMEOUT_SECS", "2"),
            ("FANOUT_CONCURRENCY", "3"),
        ])
        .unwrap();
        assert_eq!(c.database_url.as_deref(), Some("postgres://localhost/gas"));
        assert_eq!(c.server_port, 8080);
        assert_eq!(c.gas_threshold, 37.5);
        assert_eq!(c.throttle_window, Duration::from_secs(30));
        assert_eq!(c.io_timeout, Duration::from_secs(2));
        assert_eq!(c.fanout_concurrency, 3);
    }

    #[test]
    fn fcm_requires_project_and_token() {
        let c = config_from(&[("FCM_PROJECT_ID", "gas-detector")]).unwrap();
        assert!(c.fcm.is_none());

        let c = config_from(&[
            ("FCM_PROJECT_ID", "gas-detector"),
            ("FCM_ACCESS_TOKEN", "ya29.token"),
        ])
        .unwrap();
        assert_eq!(
            c.fcm,
            Some(FcmConfig {
                base_url: "https://fcm.googleapis.com".to_owned(),
                project_id: "gas-detector".to_owned(),
                access_token: "ya29.token".to_owned(),
            })
        );
    }

    #[test]
    fn bad_threshold_errors() {
        let err = config_from(&[("GAS_THRESHOLD", "lots")]).unwrap_err();
        assert!(err.to_string().contains("GAS_THRESHOLD"));

        let err = config_from(&[("GAS_THRESHOLD", "inf")]).unwrap_err();
        assert!(err.to_string().contains("finite"));
    }

    #[test]
    fn zero_concurrency_errors() {
        let err = config_from(&[("FANOUT_CONCURRENCY", "0")]).unwrap_err();
        assert!(err.to_string().contains("at least 1"));
    }

    #[test]
    fn bad_port_errors() {
        let err = config_from(&[("SERVER_PORT", "99999")]).unwrap_err();
        assert!(err.to_string().contains("SERVER_PORT"));
    }
}
