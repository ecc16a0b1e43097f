//! Command line and environment overlay.
//!
//! Every flag is optional so that only values actually given (on the command
//! line or through `KVDEFRAG_*` variables) override the config file and the
//! built-in defaults.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::config::DefragConfig;
use crate::error::Result;

#[derive(Parser, Debug, Default)]
#[command(
    name = "kvdefrag",
    about = "A maintenance tool that defragments every member of a key-value store cluster",
    long_about = None
)]
pub struct Cli {
    /// Config file (.toml or .json) loaded before flags are applied
    #[arg(long, env = "KVDEFRAG_CONFIG")]
    pub config: Option<PathBuf>,

    /// Comma separated cluster endpoints
    #[arg(long, env = "KVDEFRAG_ENDPOINTS", value_delimiter = ',')]
    pub endpoints: Option<Vec<String>>,

    /// Use all endpoints from the cluster member list
    #[arg(long, env = "KVDEFRAG_CLUSTER", num_args = 0..=1, default_missing_value = "true")]
    pub cluster: Option<bool>,

    /// Exclude localhost endpoints from the member list
    #[arg(long, env = "KVDEFRAG_EXCLUDE_LOCALHOST", num_args = 0..=1, default_missing_value = "true")]
    pub exclude_localhost: Option<bool>,

    /// Move the leadership away before defragmenting the leader
    #[arg(long, env = "KVDEFRAG_MOVE_LEADER", num_args = 0..=1, default_missing_value = "true")]
    pub move_leader: Option<bool>,

    /// Dial timeout for client connections, e.g. "2s"
    #[arg(long, env = "KVDEFRAG_DIAL_TIMEOUT", value_parser = humantime::parse_duration)]
    pub dial_timeout: Option<Duration>,

    /// Timeout for short running commands, e.g. "30s"
    #[arg(long, env = "KVDEFRAG_COMMAND_TIMEOUT", value_parser = humantime::parse_duration)]
    pub command_timeout: Option<Duration>,

    /// Keepalive time for client connections
    #[arg(long, env = "KVDEFRAG_KEEPALIVE_TIME", value_parser = humantime::parse_duration)]
    pub keepalive_time: Option<Duration>,

    /// Keepalive timeout for client connections
    #[arg(long, env = "KVDEFRAG_KEEPALIVE_TIMEOUT", value_parser = humantime::parse_duration)]
    pub keepalive_timeout: Option<Duration>,

    /// Disable transport security for scheme-less endpoints
    #[arg(long, env = "KVDEFRAG_INSECURE_TRANSPORT", num_args = 0..=1, default_missing_value = "true")]
    pub insecure_transport: Option<bool>,

    /// Skip server certificate verification
    #[arg(long, env = "KVDEFRAG_INSECURE_SKIP_TLS_VERIFY", num_args = 0..=1, default_missing_value = "true")]
    pub insecure_skip_tls_verify: Option<bool>,

    // TLS paths are taken as plain strings so an empty value reaches
    // `DefragConfig::validate` instead of failing in the parser.

    /// Identify secure client using this TLS certificate file
    #[arg(long, env = "KVDEFRAG_CERT")]
    pub cert: Option<String>,

    /// Identify secure client using this TLS key file
    #[arg(long, env = "KVDEFRAG_KEY")]
    pub key: Option<String>,

    /// Verify certificates of TLS-enabled servers using this CA bundle
    #[arg(long, env = "KVDEFRAG_CACERT")]
    pub cacert: Option<String>,

    /// Username[:password] for authentication
    #[arg(long, env = "KVDEFRAG_USER")]
    pub user: Option<String>,

    /// Password for authentication
    #[arg(long, env = "KVDEFRAG_PASSWORD")]
    pub password: Option<String>,

    /// Domain name to query for SRV records describing cluster endpoints
    #[arg(short = 'd', long, env = "KVDEFRAG_DISCOVERY_SRV")]
    pub discovery_srv: Option<String>,

    /// Service name to query when using DNS discovery
    #[arg(long, env = "KVDEFRAG_DISCOVERY_SRV_NAME")]
    pub discovery_srv_name: Option<String>,

    /// Accept insecure SRV records describing cluster endpoints
    #[arg(long, env = "KVDEFRAG_INSECURE_DISCOVERY", num_args = 0..=1, default_missing_value = "true")]
    pub insecure_discovery: Option<bool>,

    /// Compact the key space before defragmenting
    #[arg(long, env = "KVDEFRAG_COMPACTION", num_args = 0..=1, default_missing_value = "true")]
    pub compaction: Option<bool>,

    /// Keep defragmenting the remaining members after a failure
    #[arg(long, env = "KVDEFRAG_CONTINUE_ON_ERROR", num_args = 0..=1, default_missing_value = "true")]
    pub continue_on_error: Option<bool>,

    /// Storage quota of the store in bytes
    #[arg(long, env = "KVDEFRAG_STORAGE_QUOTA_BYTES")]
    pub storage_quota_bytes: Option<u64>,

    /// Boolean expression deciding whether a member is defragmented
    #[arg(long, env = "KVDEFRAG_DEFRAG_RULE")]
    pub defrag_rule: Option<String>,

    /// Evaluate whether members would be defragmented without doing it
    #[arg(long, env = "KVDEFRAG_DRY_RUN", num_args = 0..=1, default_missing_value = "true")]
    pub dry_run: Option<bool>,

    /// Health-check only the explicit endpoints instead of every member
    #[arg(long, env = "KVDEFRAG_SKIP_HEALTHCHECK_CLUSTER_ENDPOINTS", num_args = 0..=1, default_missing_value = "true")]
    pub skip_healthcheck_cluster_endpoints: Option<bool>,

    /// Clear NOSPACE alarms once every member is below the threshold
    #[arg(long, env = "KVDEFRAG_AUTO_DISALARM", num_args = 0..=1, default_missing_value = "true")]
    pub auto_disalarm: Option<bool>,

    /// Fraction of the quota every member must be under before disalarming
    #[arg(long, env = "KVDEFRAG_DISALARM_THRESHOLD")]
    pub disalarm_threshold: Option<f64>,

    /// Print the version and exit
    #[arg(long)]
    pub version: bool,
}

fn overlay<T>(slot: &mut T, value: Option<T>) {
    if let Some(value) = value {
        *slot = value;
    }
}

impl Cli {
    /// Defaults, then the config file, then environment and flags.
    pub fn into_config(self) -> Result<DefragConfig> {
        let mut config = match &self.config {
            Some(path) => DefragConfig::from_file(path)?,
            None => DefragConfig::default(),
        };

        overlay(&mut config.endpoints, self.endpoints);
        overlay(&mut config.use_cluster_endpoints, self.cluster);
        overlay(&mut config.exclude_localhost, self.exclude_localhost);
        overlay(&mut config.move_leader, self.move_leader);
        overlay(&mut config.dial_timeout, self.dial_timeout);
        overlay(&mut config.command_timeout, self.command_timeout);
        overlay(&mut config.keepalive_time, self.keepalive_time);
        overlay(&mut config.keepalive_timeout, self.keepalive_timeout);
        overlay(&mut config.insecure_transport, self.insecure_transport);
        overlay(&mut config.insecure_skip_tls_verify, self.insecure_skip_tls_verify);
        if let Some(cert) = self.cert {
            config.cert_file = Some(PathBuf::from(cert));
        }
        if let Some(key) = self.key {
            config.key_file = Some(PathBuf::from(key));
        }
        if let Some(cacert) = self.cacert {
            config.ca_file = Some(PathBuf::from(cacert));
        }
        if self.user.is_some() {
            config.username = self.user;
        }
        if self.password.is_some() {
            config.password = self.password;
        }
        if self.discovery_srv.is_some() {
            config.dns_domain = self.discovery_srv;
        }
        if self.discovery_srv_name.is_some() {
            config.dns_service = self.discovery_srv_name;
        }
        overlay(&mut config.insecure_discovery, self.insecure_discovery);
        overlay(&mut config.compaction, self.compaction);
        overlay(&mut config.continue_on_error, self.continue_on_error);
        overlay(&mut config.db_quota_bytes, self.storage_quota_bytes);
        overlay(&mut config.defrag_rule, self.defrag_rule);
        overlay(&mut config.dry_run, self.dry_run);
        overlay(
            &mut config.skip_healthcheck_cluster_endpoints,
            self.skip_healthcheck_cluster_endpoints,
        );
        overlay(&mut config.auto_disalarm, self.auto_disalarm);
        overlay(&mut config.disalarm_threshold, self.disalarm_threshold);

        Ok(config)
    }
}

/// Text printed by `--version`.
pub fn version_string() -> String {
    format!(
        "{} Version: {}\nOS/Arch: {}/{}",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION"),
        std::env::consts::OS,
        std::env::consts::ARCH
    )
}
