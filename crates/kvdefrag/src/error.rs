//! Error types for the maintenance engine.

use thiserror::Error;

use crate::service::ClientError;

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, DefragError>;

/// Error variants raised while resolving, checking, or maintaining a cluster.
#[derive(Debug, Error)]
pub enum DefragError {
    /// Endpoint resolution produced nothing and no fallback applied.
    #[error("no endpoints provided")]
    NoEndpoints,

    /// An endpoint URL uses a scheme other than http, https, unix or unixs.
    #[error("url scheme must be http or https: {endpoint}")]
    BadScheme {
        /// The offending endpoint.
        endpoint: String,
    },

    /// An endpoint could not be split into host and port.
    #[error("invalid endpoint {endpoint}: {reason}")]
    InvalidEndpoint {
        /// The offending endpoint.
        endpoint: String,
        /// Why it was rejected.
        reason: String,
    },

    /// Name-service discovery failed.
    #[error("discovery failed for domain {domain}: {source}")]
    Discovery {
        /// The discovery domain.
        domain: String,
        /// Underlying lookup error.
        source: ClientError,
    },

    /// The membership query failed.
    #[error("failed to get member list: {0}")]
    MembershipQuery(ClientError),

    /// A status fetch failed.
    #[error("failed to get member({endpoint:?}) status: {source}")]
    StatusFetch {
        /// The endpoint whose status could not be read.
        endpoint: String,
        /// Underlying call error.
        source: ClientError,
    },

    /// The defragmentation rule is malformed or not boolean.
    #[error("invalid rule {rule:?}: {reason}")]
    InvalidRule {
        /// The rule text.
        rule: String,
        /// Why it was rejected.
        reason: String,
    },

    /// One or more endpoints failed health checking.
    #[error("health check failed: {unhealthy} of {total} endpoint(s) unhealthy")]
    HealthCheck {
        /// Number of unhealthy endpoints.
        unhealthy: usize,
        /// Number of probed endpoints.
        total: usize,
    },

    /// Leadership could not be moved off the endpoint.
    #[error("failed to transfer the leadership from {leader:x}: {reason}")]
    LeaderTransfer {
        /// Current leader member ID.
        leader: u64,
        /// Why the transfer failed.
        reason: String,
    },

    /// The defragment call failed.
    #[error("failed to defragment member {endpoint:?}: {source}")]
    Defragment {
        /// Target endpoint.
        endpoint: String,
        /// Underlying call error.
        source: ClientError,
    },

    /// The post-defragmentation status fetch failed.
    #[error("failed to verify member {endpoint:?} after defragmentation: {source}")]
    Verification {
        /// Target endpoint.
        endpoint: String,
        /// Underlying call error.
        source: ClientError,
    },

    /// The compaction call failed.
    #[error("compaction at revision {revision} via {endpoint:?} failed: {source}")]
    Compaction {
        /// Endpoint the compaction was issued against.
        endpoint: String,
        /// Target revision.
        revision: i64,
        /// Underlying call error.
        source: ClientError,
    },

    /// Listing or clearing alarms failed.
    #[error("alarm operation failed: {0}")]
    Alarm(ClientError),

    /// Configuration is inconsistent.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// A per-endpoint phase change was not allowed.
    #[error("invalid transition for {endpoint}: {from} -> {to}")]
    InvalidTransition {
        /// Endpoint being processed.
        endpoint: String,
        /// Phase before the attempted change.
        from: String,
        /// Requested phase.
        to: String,
    },

    /// Wraps standard I/O errors.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Config file could not be decoded.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl DefragError {
    /// Build an [`DefragError::InvalidRule`] for `rule`.
    pub fn invalid_rule(rule: &str, reason: impl Into<String>) -> Self {
        DefragError::InvalidRule {
            rule: rule.to_string(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_no_endpoints_message() {
        assert_eq!(DefragError::NoEndpoints.to_string(), "no endpoints provided");
    }

    #[test]
    fn test_status_fetch_includes_endpoint_and_cause() {
        let err = DefragError::StatusFetch {
            endpoint: "http://10.0.0.1:2379".to_string(),
            source: ClientError::Timeout {
                operation: "status",
                timeout: Duration::from_secs(30),
            },
        };
        let msg = err.to_string();
        assert!(msg.contains("10.0.0.1:2379"));
        assert!(msg.contains("timed out"));
    }

    #[test]
    fn test_leader_transfer_formats_hex_id() {
        let err = DefragError::LeaderTransfer {
            leader: 0xdeadbeef,
            reason: "no follower".to_string(),
        };
        assert!(err.to_string().contains("deadbeef"));
    }

    #[test]
    fn test_invalid_rule_helper() {
        let err = DefragError::invalid_rule("dbSize -", "unexpected end of input");
        match err {
            DefragError::InvalidRule { rule, reason } => {
                assert_eq!(rule, "dbSize -");
                assert_eq!(reason, "unexpected end of input");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_io_error_from_std() {
        let std_err = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: DefragError = std_err.into();
        assert!(matches!(err, DefragError::Io(_)));
    }
}
