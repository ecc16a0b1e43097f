//! Cluster service capability consumed by the maintenance engine.
//!
//! The engine never talks to the store directly. Every remote operation goes
//! through [`ClusterService`] (and [`NameService`] for discovery), so the
//! orchestration logic can be driven by the HTTP gateway client in production
//! and by an in-memory fake in tests.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure of a single external call.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ClientError {
    /// The store rejected the request for lack of permission.
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    /// The call did not finish within its deadline.
    #[error("{operation} timed out after {timeout:?}")]
    Timeout {
        /// Operation name.
        operation: &'static str,
        /// Deadline that elapsed.
        timeout: Duration,
    },
    /// Connection-level failure.
    #[error("transport error: {0}")]
    Transport(String),
    /// The store answered with an error.
    #[error("request failed with code {code}: {message}")]
    Status {
        /// Store error code.
        code: i32,
        /// Store error message.
        message: String,
    },
    /// The response could not be decoded.
    #[error("decode error: {0}")]
    Decode(String),
    /// The request cannot be expressed by this client.
    #[error("unsupported: {0}")]
    Unsupported(String),
}

impl ClientError {
    /// True when the store refused the call on permission grounds.
    pub fn is_permission_denied(&self) -> bool {
        matches!(self, ClientError::PermissionDenied(_))
    }
}

/// Result type alias for external calls.
pub type ClientResult<T> = Result<T, ClientError>;

/// One member as reported by the membership query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterMember {
    /// Member ID.
    pub id: u64,
    /// Human-readable member name.
    pub name: String,
    /// Client-facing URLs advertised by the member.
    pub client_urls: Vec<String>,
    /// Non-voting members replicate but never lead.
    pub is_learner: bool,
}

/// Status snapshot of one endpoint, captured once and never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointStatus {
    /// Endpoint the status was fetched from.
    pub endpoint: String,
    /// Member ID answering on the endpoint.
    pub member_id: u64,
    /// Member ID the endpoint believes is raft leader.
    pub leader_id: u64,
    /// Physically allocated backend size in bytes.
    pub db_size: u64,
    /// Logically used backend size in bytes.
    pub db_size_in_use: u64,
    /// Current store revision.
    pub revision: i64,
    /// Current raft term.
    pub raft_term: u64,
    /// Current raft index.
    pub raft_index: u64,
}

impl EndpointStatus {
    /// True when the endpoint reports itself as the raft leader.
    pub fn is_leader(&self) -> bool {
        self.member_id == self.leader_id
    }
}

impl fmt::Display for EndpointStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "endpoint: {}, dbSize: {}, dbSizeInUse: {}, memberId: {:x}, leader: {:x}, revision: {}, term: {}, index: {}",
            self.endpoint,
            self.db_size,
            self.db_size_in_use,
            self.member_id,
            self.leader_id,
            self.revision,
            self.raft_term,
            self.raft_index
        )
    }
}

/// Alarm kinds raised by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AlarmKind {
    /// Storage quota exhausted.
    NoSpace,
    /// Data corruption detected.
    Corrupt,
    /// Any alarm this tool does not know about.
    Unknown,
}

impl AlarmKind {
    /// Parse the store's alarm name.
    pub fn from_name(name: &str) -> Self {
        match name {
            "NOSPACE" | "1" => AlarmKind::NoSpace,
            "CORRUPT" | "2" => AlarmKind::Corrupt,
            _ => AlarmKind::Unknown,
        }
    }

    /// Wire name of the alarm.
    pub fn as_str(&self) -> &'static str {
        match self {
            AlarmKind::NoSpace => "NOSPACE",
            AlarmKind::Corrupt => "CORRUPT",
            AlarmKind::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for AlarmKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An active alarm on a member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlarmMember {
    /// Member the alarm is raised on.
    pub member_id: u64,
    /// Alarm kind.
    pub kind: AlarmKind,
}

/// Remote operations against the clustered store.
///
/// Cluster-wide calls take the bootstrap endpoint set explicitly; per-member
/// calls take the single endpoint they must be issued against.
#[async_trait]
pub trait ClusterService: Send + Sync {
    /// List cluster members.
    async fn list_members(&self, endpoints: &[String]) -> ClientResult<Vec<ClusterMember>>;

    /// Fetch the status of the member answering on `endpoint`.
    async fn status(&self, endpoint: &str) -> ClientResult<EndpointStatus>;

    /// Read one key through `endpoint`.
    async fn read_key(&self, endpoint: &str, key: &str) -> ClientResult<Option<Vec<u8>>>;

    /// List active alarms.
    async fn list_alarms(&self, endpoints: &[String]) -> ClientResult<Vec<AlarmMember>>;

    /// Deactivate one alarm.
    async fn clear_alarm(&self, endpoints: &[String], alarm: &AlarmMember) -> ClientResult<()>;

    /// Physically compact history up to `revision`.
    async fn compact(&self, endpoint: &str, revision: i64) -> ClientResult<()>;

    /// Defragment the member answering on `endpoint`.
    async fn defragment(&self, endpoint: &str) -> ClientResult<()>;

    /// Hand raft leadership from the leader at `endpoint` to `target`.
    async fn transfer_leadership(&self, endpoint: &str, target: u64) -> ClientResult<()>;
}

/// Name-service lookup returning advertised endpoints.
#[async_trait]
pub trait NameService: Send + Sync {
    /// Resolve `domain` (and optional `service` suffix) into endpoint URLs.
    async fn lookup(&self, domain: &str, service: &str) -> ClientResult<Vec<String>>;
}

/// Run `fut` under a per-call deadline.
pub async fn with_timeout<T, F>(operation: &'static str, timeout: Duration, fut: F) -> ClientResult<T>
where
    F: Future<Output = ClientResult<T>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(ClientError::Timeout { operation, timeout }),
    }
}
