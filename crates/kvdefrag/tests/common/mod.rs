//! In-memory cluster for driving the orchestrator end to end.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use kvdefrag::{
    AlarmKind, AlarmMember, ClientError, ClientResult, ClusterMember, ClusterService,
    DefragConfig, EndpointStatus, NameService,
};

/// One recorded external call.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    ListMembers,
    Status(String),
    ReadKey(String),
    ListAlarms,
    ClearAlarm(u64),
    Compact(String, i64),
    Defragment(String),
    TransferLeadership(String, u64),
}

#[derive(Default)]
pub struct FakeCluster {
    pub members: Vec<ClusterMember>,
    pub statuses: Mutex<HashMap<String, EndpointStatus>>,
    pub alarms: Mutex<Vec<AlarmMember>>,
    pub calls: Mutex<Vec<Call>>,

    /// Endpoints whose health read fails.
    pub fail_read: HashSet<String>,
    /// Status calls per endpoint that succeed before every later one fails.
    pub fail_status_after: HashMap<String, usize>,
    pub fail_defrag: HashSet<String>,
    pub fail_compact: bool,
    pub fail_transfer: bool,
    status_calls: Mutex<HashMap<String, usize>>,
}

pub fn endpoint(i: u64) -> String {
    format!("http://10.0.0.{}:2379", i)
}

impl FakeCluster {
    /// `n` voting members, member `i` served at `endpoint(i)`, with `leader`
    /// as raft leader. Every member reports `db_size` bytes, half in use.
    pub fn new(n: u64, leader: u64, db_size: u64) -> Self {
        let mut members = Vec::new();
        let mut statuses = HashMap::new();
        for id in 1..=n {
            let ep = endpoint(id);
            members.push(ClusterMember {
                id,
                name: format!("infra{}", id),
                client_urls: vec![ep.clone()],
                is_learner: false,
            });
            statuses.insert(
                ep.clone(),
                EndpointStatus {
                    endpoint: ep,
                    member_id: id,
                    leader_id: leader,
                    db_size,
                    db_size_in_use: db_size / 2,
                    revision: 1000 + id as i64,
                    raft_term: 4,
                    raft_index: 2000,
                },
            );
        }
        Self {
            members,
            statuses: Mutex::new(statuses),
            ..Self::default()
        }
    }

    pub fn endpoints(&self) -> Vec<String> {
        self.members.iter().flat_map(|m| m.client_urls.clone()).collect()
    }

    /// Config aimed at every member explicitly.
    pub fn config(&self) -> DefragConfig {
        DefragConfig {
            endpoints: self.endpoints(),
            ..DefragConfig::default()
        }
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn defragmented(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Defragment(ep) => Some(ep),
                _ => None,
            })
            .collect()
    }

    pub fn count(&self, call: &Call) -> usize {
        self.calls().iter().filter(|c| *c == call).count()
    }

    pub fn position(&self, call: &Call) -> Option<usize> {
        self.calls().iter().position(|c| c == call)
    }

    pub fn is_mutating(call: &Call) -> bool {
        matches!(
            call,
            Call::ClearAlarm(_) | Call::Compact(..) | Call::Defragment(_) | Call::TransferLeadership(..)
        )
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

fn refused(endpoint: &str) -> ClientError {
    ClientError::Transport(format!("dial tcp {}: connection refused", endpoint))
}

#[async_trait]
impl ClusterService for FakeCluster {
    async fn list_members(&self, _endpoints: &[String]) -> ClientResult<Vec<ClusterMember>> {
        self.record(Call::ListMembers);
        Ok(self.members.clone())
    }

    async fn status(&self, endpoint: &str) -> ClientResult<EndpointStatus> {
        self.record(Call::Status(endpoint.to_string()));
        let seen = {
            let mut counts = self.status_calls.lock().unwrap();
            let n = counts.entry(endpoint.to_string()).or_insert(0);
            *n += 1;
            *n
        };
        if let Some(limit) = self.fail_status_after.get(endpoint) {
            if seen > *limit {
                return Err(refused(endpoint));
            }
        }
        self.statuses
            .lock()
            .unwrap()
            .get(endpoint)
            .cloned()
            .ok_or_else(|| refused(endpoint))
    }

    async fn read_key(&self, endpoint: &str, _key: &str) -> ClientResult<Option<Vec<u8>>> {
        self.record(Call::ReadKey(endpoint.to_string()));
        if self.fail_read.contains(endpoint) {
            return Err(refused(endpoint));
        }
        Ok(None)
    }

    async fn list_alarms(&self, _endpoints: &[String]) -> ClientResult<Vec<AlarmMember>> {
        self.record(Call::ListAlarms);
        Ok(self.alarms.lock().unwrap().clone())
    }

    async fn clear_alarm(&self, _endpoints: &[String], alarm: &AlarmMember) -> ClientResult<()> {
        self.record(Call::ClearAlarm(alarm.member_id));
        self.alarms.lock().unwrap().retain(|a| a != alarm);
        Ok(())
    }

    async fn compact(&self, endpoint: &str, revision: i64) -> ClientResult<()> {
        self.record(Call::Compact(endpoint.to_string(), revision));
        if self.fail_compact {
            return Err(ClientError::Status {
                code: 11,
                message: "etcdserver: mvcc: required revision is a future revision".to_string(),
            });
        }
        Ok(())
    }

    async fn defragment(&self, endpoint: &str) -> ClientResult<()> {
        self.record(Call::Defragment(endpoint.to_string()));
        if self.fail_defrag.contains(endpoint) {
            return Err(ClientError::Timeout {
                operation: "defragment",
                timeout: std::time::Duration::from_secs(30),
            });
        }
        if let Some(status) = self.statuses.lock().unwrap().get_mut(endpoint) {
            status.db_size = status.db_size_in_use;
        }
        Ok(())
    }

    async fn transfer_leadership(&self, endpoint: &str, target: u64) -> ClientResult<()> {
        self.record(Call::TransferLeadership(endpoint.to_string(), target));
        if self.fail_transfer {
            return Err(ClientError::Status {
                code: 9,
                message: "etcdserver: bad leader transferee".to_string(),
            });
        }
        for status in self.statuses.lock().unwrap().values_mut() {
            status.leader_id = target;
        }
        Ok(())
    }
}

pub fn nospace(member_id: u64) -> AlarmMember {
    AlarmMember {
        member_id,
        kind: AlarmKind::NoSpace,
    }
}

/// Name service with a fixed answer.
#[derive(Default)]
pub struct FakeNames {
    pub records: Vec<String>,
}

#[async_trait]
impl NameService for FakeNames {
    async fn lookup(&self, _domain: &str, _service: &str) -> ClientResult<Vec<String>> {
        Ok(self.records.clone())
    }
}
