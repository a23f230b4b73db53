//! Configuration assembled from the environment at process start.
//!
//! Workers and the coordinator read their entire configuration once at
//! startup; nothing is reconfigured at runtime. A missing required variable
//! is a fatal startup error reported by name.

use std::time::Duration;

use thiserror::Error;

use crate::models::BundleStatus;

/// Default expected token audience.
pub const DEFAULT_AUDIENCE: &str = "long-term-archive";

/// Default maximum claim age before the reaper releases a claim (12 hours).
pub const DEFAULT_MAX_CLAIM_AGE_SECONDS: u64 = 43_200;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing expected configuration parameter: '{0}'")]
    Missing(&'static str),
    #[error("Invalid value for configuration parameter '{name}': {value}")]
    Invalid { name: &'static str, value: String },
}

/// Fetch a required environment variable, rejecting empty values.
pub fn require_env(name: &'static str) -> Result<String, ConfigError> {
    match std::env::var(name) {
        Ok(value) if !value.is_empty() => Ok(value),
        _ => Err(ConfigError::Missing(name)),
    }
}

/// Fetch an optional environment variable, mapping empty to `None`.
pub fn optional_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

/// Fetch an environment variable with a fallback default.
pub fn env_or(name: &str, default: &str) -> String {
    optional_env(name).unwrap_or_else(|| default.to_string())
}

/// Parse a numeric environment variable with a fallback default.
pub fn env_parse<T: std::str::FromStr>(
    name: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match optional_env(name) {
        Some(value) => value.parse().map_err(|_| ConfigError::Invalid {
            name,
            value,
        }),
        None => Ok(default),
    }
}

/// Parse a boolean flag; absent means false.
pub fn env_flag(name: &str) -> bool {
    matches!(
        optional_env(name).as_deref().map(str::to_ascii_lowercase),
        Some(ref v) if ["1", "t", "true", "y", "yes"].contains(&v.as_str())
    )
}

/// Credentials for obtaining a bearer token.
#[derive(Debug, Clone)]
pub enum AuthCredentials {
    /// OIDC client-credentials grant against the token issuer.
    ClientCredentials {
        openid_url: String,
        client_id: String,
        client_secret: String,
    },
    /// HS256 shared secret; the client self-signs its token (test mode).
    SharedSecret { secret: String },
}

impl AuthCredentials {
    /// Assemble credentials from the environment.
    ///
    /// `LTA_AUTH_SECRET` takes precedence; otherwise the full OIDC triple
    /// is required.
    pub fn from_env() -> Result<Self, ConfigError> {
        if let Some(secret) = optional_env("LTA_AUTH_SECRET") {
            return Ok(AuthCredentials::SharedSecret { secret });
        }
        Ok(AuthCredentials::ClientCredentials {
            openid_url: require_env("LTA_AUTH_OPENID_URL")?,
            client_id: require_env("CLIENT_ID")?,
            client_secret: require_env("CLIENT_SECRET")?,
        })
    }
}

/// Configuration common to every worker harness instance.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Identity for claims and heartbeats.
    pub component_name: String,
    pub source_site: String,
    pub dest_site: String,
    /// Status the stage claims work from.
    pub input_status: BundleStatus,
    /// Status the stage advances work to.
    pub output_status: BundleStatus,
    pub coordinator_url: String,
    pub auth: AuthCredentials,
    pub work_sleep: Duration,
    pub work_retries: u32,
    pub work_timeout: Duration,
    pub heartbeat_sleep: Duration,
    pub heartbeat_retries: u32,
    pub heartbeat_timeout: Duration,
    /// Exit after a single claim attempt.
    pub run_once_and_die: bool,
    /// Exit when a work cycle claims nothing.
    pub run_until_no_work: bool,
    pub metrics_port: Option<u16>,
}

impl WorkerConfig {
    /// Assemble a worker configuration from the environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let input_status = parse_status("INPUT_STATUS")?;
        let output_status = parse_status("OUTPUT_STATUS")?;
        Ok(Self {
            component_name: require_env("COMPONENT_NAME")?,
            source_site: require_env("SOURCE_SITE")?,
            dest_site: require_env("DEST_SITE")?,
            input_status,
            output_status,
            coordinator_url: require_env("LTA_REST_URL")?,
            auth: AuthCredentials::from_env()?,
            work_sleep: Duration::from_secs(env_parse(
                "WORK_SLEEP_DURATION_SECONDS",
                60,
            )?),
            work_retries: env_parse("WORK_RETRIES", 3)?,
            work_timeout: Duration::from_secs(env_parse("WORK_TIMEOUT_SECONDS", 30)?),
            heartbeat_sleep: Duration::from_secs(env_parse(
                "HEARTBEAT_SLEEP_DURATION_SECONDS",
                60,
            )?),
            heartbeat_retries: env_parse("HEARTBEAT_PATCH_RETRIES", 3)?,
            heartbeat_timeout: Duration::from_secs(env_parse(
                "HEARTBEAT_PATCH_TIMEOUT_SECONDS",
                10,
            )?),
            run_once_and_die: env_flag("RUN_ONCE_AND_DIE"),
            run_until_no_work: env_flag("RUN_UNTIL_NO_WORK"),
            metrics_port: optional_env("PROMETHEUS_METRICS_PORT")
                .map(|v| {
                    v.parse().map_err(|_| ConfigError::Invalid {
                        name: "PROMETHEUS_METRICS_PORT",
                        value: v,
                    })
                })
                .transpose()?,
        })
    }
}

fn parse_status(name: &'static str) -> Result<BundleStatus, ConfigError> {
    let value = require_env(name)?;
    BundleStatus::from_str(&value).ok_or(ConfigError::Invalid { name, value })
}

/// Configuration for the coordinator REST service.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub host: String,
    pub port: u16,
    pub database_path: std::path::PathBuf,
    pub audience: String,
    /// OIDC issuer for JWKS discovery; absent in shared-secret deployments.
    pub openid_url: Option<String>,
    /// HS256 shared secret (test mode).
    pub auth_secret: Option<String>,
    pub max_claim_age: Duration,
    pub reaper_interval: Duration,
    pub metrics_port: Option<u16>,
}

impl CoordinatorConfig {
    /// Assemble the coordinator configuration from the environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let auth_secret = optional_env("LTA_AUTH_SECRET");
        let openid_url = optional_env("LTA_AUTH_OPENID_URL");
        if auth_secret.is_none() && openid_url.is_none() {
            return Err(ConfigError::Missing("LTA_AUTH_OPENID_URL"));
        }
        Ok(Self {
            host: env_or("LTA_REST_HOST", "localhost"),
            port: env_parse("LTA_REST_PORT", 8080)?,
            database_path: require_env("LTA_DATABASE_PATH")?.into(),
            audience: env_or("LTA_AUTH_AUDIENCE", DEFAULT_AUDIENCE),
            openid_url,
            auth_secret,
            max_claim_age: Duration::from_secs(env_parse(
                "LTA_MAX_CLAIM_AGE_SECONDS",
                DEFAULT_MAX_CLAIM_AGE_SECONDS,
            )?),
            reaper_interval: Duration::from_secs(env_parse(
                "LTA_REAPER_INTERVAL_SECONDS",
                300,
            )?),
            metrics_port: optional_env("PROMETHEUS_METRICS_PORT")
                .map(|v| {
                    v.parse().map_err(|_| ConfigError::Invalid {
                        name: "PROMETHEUS_METRICS_PORT",
                        value: v,
                    })
                })
                .transpose()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_flag_truthy_values() {
        std::env::set_var("COLDSTOW_TEST_FLAG_A", "TRUE");
        assert!(env_flag("COLDSTOW_TEST_FLAG_A"));
        std::env::set_var("COLDSTOW_TEST_FLAG_A", "yes");
        assert!(env_flag("COLDSTOW_TEST_FLAG_A"));
        std::env::set_var("COLDSTOW_TEST_FLAG_A", "0");
        assert!(!env_flag("COLDSTOW_TEST_FLAG_A"));
        std::env::remove_var("COLDSTOW_TEST_FLAG_A");
        assert!(!env_flag("COLDSTOW_TEST_FLAG_A"));
    }

    #[test]
    fn test_require_env_rejects_empty() {
        std::env::set_var("COLDSTOW_TEST_EMPTY", "");
        assert!(require_env("COLDSTOW_TEST_EMPTY").is_err());
    }

    #[test]
    fn test_env_parse_default_and_invalid() {
        std::env::remove_var("COLDSTOW_TEST_NUM");
        assert_eq!(env_parse("COLDSTOW_TEST_NUM", 7u32).unwrap(), 7);
        std::env::set_var("COLDSTOW_TEST_NUM", "41");
        assert_eq!(env_parse("COLDSTOW_TEST_NUM", 7u32).unwrap(), 41);
        std::env::set_var("COLDSTOW_TEST_NUM", "nope");
        assert!(env_parse("COLDSTOW_TEST_NUM", 7u32).is_err());
        std::env::remove_var("COLDSTOW_TEST_NUM");
    }
}
