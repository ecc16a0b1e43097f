//! Run configuration.
//!
//! A [`DefragConfig`] is built once (defaults, optional file, environment,
//! flags) and handed read-only to every component.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{DefragError, Result};
use crate::rule;

/// Default storage quota of the store: 2 GiB.
pub const DEFAULT_QUOTA_BYTES: u64 = 2 * 1024 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DefragConfig {
    pub endpoints: Vec<String>,
    pub use_cluster_endpoints: bool,
    pub exclude_localhost: bool,
    pub move_leader: bool,

    #[serde(with = "duration_str")]
    pub dial_timeout: Duration,
    #[serde(with = "duration_str")]
    pub command_timeout: Duration,
    #[serde(with = "duration_str")]
    pub keepalive_time: Duration,
    #[serde(with = "duration_str")]
    pub keepalive_timeout: Duration,

    pub insecure_transport: bool,
    pub insecure_skip_tls_verify: bool,
    pub cert_file: Option<PathBuf>,
    pub key_file: Option<PathBuf>,
    pub ca_file: Option<PathBuf>,

    pub username: Option<String>,
    pub password: Option<String>,

    pub dns_domain: Option<String>,
    pub dns_service: Option<String>,
    pub insecure_discovery: bool,

    pub compaction: bool,
    pub continue_on_error: bool,
    pub db_quota_bytes: u64,
    pub defrag_rule: String,
    pub dry_run: bool,
    pub skip_healthcheck_cluster_endpoints: bool,

    pub auto_disalarm: bool,
    pub disalarm_threshold: f64,
}

impl Default for DefragConfig {
    fn default() -> Self {
        Self {
            endpoints: vec![String::from("127.0.0.1:2379")],
            use_cluster_endpoints: false,
            exclude_localhost: false,
            move_leader: false,
            dial_timeout: Duration::from_secs(2),
            command_timeout: Duration::from_secs(30),
            keepalive_time: Duration::from_secs(2),
            keepalive_timeout: Duration::from_secs(6),
            insecure_transport: true,
            insecure_skip_tls_verify: false,
            cert_file: None,
            key_file: None,
            ca_file: None,
            username: None,
            password: None,
            dns_domain: None,
            dns_service: None,
            insecure_discovery: true,
            compaction: true,
            continue_on_error: true,
            db_quota_bytes: DEFAULT_QUOTA_BYTES,
            defrag_rule: String::new(),
            dry_run: false,
            skip_healthcheck_cluster_endpoints: false,
            auto_disalarm: false,
            disalarm_threshold: 0.8,
        }
    }
}

impl DefragConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();

        match ext.to_lowercase().as_str() {
            "toml" => toml::from_str(&contents).map_err(|e| DefragError::Serialization(e.to_string())),
            "json" => {
                serde_json::from_str(&contents).map_err(|e| DefragError::Serialization(e.to_string()))
            }
            _ => Err(DefragError::Config(format!(
                "unsupported config file extension: {}",
                ext
            ))),
        }
    }

    /// Reject inconsistent settings before any network call is made.
    pub fn validate(&self) -> Result<()> {
        for (flag, path) in [
            ("cert", &self.cert_file),
            ("key", &self.key_file),
            ("cacert", &self.ca_file),
        ] {
            if matches!(path, Some(p) if p.as_os_str().is_empty()) {
                return Err(DefragError::Config(format!(
                    "empty string is passed to --{} option",
                    flag
                )));
            }
        }

        rule::validate_rule(&self.defrag_rule)?;

        if self.skip_healthcheck_cluster_endpoints {
            if self.endpoints.iter().all(|ep| ep.trim().is_empty()) {
                return Err(DefragError::Config(
                    "--skip-healthcheck-cluster-endpoints requires explicit endpoints to be provided via --endpoints flag".to_string(),
                ));
            }
            if self.use_cluster_endpoints {
                return Err(DefragError::Config(
                    "--skip-healthcheck-cluster-endpoints and --cluster flags are mutually exclusive".to_string(),
                ));
            }
            if self.discovery_domain().is_some() {
                return Err(DefragError::Config(
                    "--skip-healthcheck-cluster-endpoints and --discovery-srv flags are mutually exclusive".to_string(),
                ));
            }
        }

        if !(self.disalarm_threshold > 0.0 && self.disalarm_threshold <= 1.0) {
            return Err(DefragError::Config(format!(
                "disalarm threshold must be within (0, 1], got {}",
                self.disalarm_threshold
            )));
        }
        if self.db_quota_bytes == 0 {
            return Err(DefragError::Config("storage quota must be positive".to_string()));
        }
        if self.command_timeout.is_zero() {
            return Err(DefragError::Config("command timeout must be positive".to_string()));
        }

        Ok(())
    }

    /// Discovery domain, if one is configured.
    pub fn discovery_domain(&self) -> Option<&str> {
        self.dns_domain.as_deref().filter(|d| !d.is_empty())
    }

    /// Username and password, accepting `user:password` in the username.
    pub fn credentials(&self) -> Option<(String, String)> {
        let username = self.username.as_deref().filter(|u| !u.is_empty())?;
        match self.password.as_deref().filter(|p| !p.is_empty()) {
            Some(password) => Some((username.to_string(), password.to_string())),
            None => {
                let (user, secret) = username.split_once(':')?;
                Some((user.to_string(), secret.to_string()))
            }
        }
    }
}

/// Serde adapter storing durations as `"30s"`-style strings.
mod duration_str {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&humantime::format_duration(*value).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(deserializer)?;
        humantime::parse_duration(&raw).map_err(serde::de::Error::custom)
    }
}
