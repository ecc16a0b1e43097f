//! In-memory cluster used by unit tests.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::service::{
    AlarmMember, ClientError, ClientResult, ClusterMember, ClusterService, EndpointStatus,
    NameService,
};

#[derive(Default)]
pub struct StubCluster {
    pub members: Vec<ClusterMember>,
    pub statuses: HashMap<String, EndpointStatus>,
    pub alarms: Mutex<Vec<AlarmMember>>,
    pub read_errors: HashMap<String, ClientError>,
    pub alarm_list_fails: bool,
    pub members_fail: bool,
    pub cleared: Mutex<Vec<AlarmMember>>,
    pub defragmented: Mutex<Vec<String>>,
    pub failing_status: HashSet<String>,
}

impl StubCluster {
    pub fn with_members(members: Vec<ClusterMember>) -> Self {
        Self {
            members,
            ..Self::default()
        }
    }
}

pub fn member(id: u64, urls: &[&str], is_learner: bool) -> ClusterMember {
    ClusterMember {
        id,
        name: format!("m{}", id),
        client_urls: urls.iter().map(|u| u.to_string()).collect(),
        is_learner,
    }
}

pub fn status(endpoint: &str, member_id: u64, leader_id: u64, db_size: u64) -> EndpointStatus {
    EndpointStatus {
        endpoint: endpoint.to_string(),
        member_id,
        leader_id,
        db_size,
        db_size_in_use: db_size / 2,
        revision: 100,
        raft_term: 2,
        raft_index: 500,
    }
}

#[async_trait]
impl ClusterService for StubCluster {
    async fn list_members(&self, _endpoints: &[String]) -> ClientResult<Vec<ClusterMember>> {
        if self.members_fail {
            return Err(ClientError::Transport("connection refused".to_string()));
        }
        Ok(self.members.clone())
    }

    async fn status(&self, endpoint: &str) -> ClientResult<EndpointStatus> {
        if self.failing_status.contains(endpoint) {
            return Err(ClientError::Transport("connection refused".to_string()));
        }
        self.statuses
            .get(endpoint)
            .cloned()
            .ok_or_else(|| ClientError::Transport(format!("no such endpoint {}", endpoint)))
    }

    async fn read_key(&self, endpoint: &str, _key: &str) -> ClientResult<Option<Vec<u8>>> {
        match self.read_errors.get(endpoint) {
            Some(err) => Err(err.clone()),
            None => Ok(None),
        }
    }

    async fn list_alarms(&self, _endpoints: &[String]) -> ClientResult<Vec<AlarmMember>> {
        if self.alarm_list_fails {
            return Err(ClientError::Transport("alarm list unavailable".to_string()));
        }
        Ok(self.alarms.lock().unwrap().clone())
    }

    async fn clear_alarm(&self, _endpoints: &[String], alarm: &AlarmMember) -> ClientResult<()> {
        self.alarms.lock().unwrap().retain(|a| a != alarm);
        self.cleared.lock().unwrap().push(alarm.clone());
        Ok(())
    }

    async fn compact(&self, _endpoint: &str, _revision: i64) -> ClientResult<()> {
        Ok(())
    }

    async fn defragment(&self, endpoint: &str) -> ClientResult<()> {
        self.defragmented.lock().unwrap().push(endpoint.to_string());
        Ok(())
    }

    async fn transfer_leadership(&self, _endpoint: &str, _target: u64) -> ClientResult<()> {
        Ok(())
    }
}

/// Name service answering every lookup with a fixed list.
#[derive(Default)]
pub struct StubNames {
    pub records: Vec<String>,
    pub fail: bool,
}

#[async_trait]
impl NameService for StubNames {
    async fn lookup(&self, _domain: &str, _service: &str) -> ClientResult<Vec<String>> {
        if self.fail {
            return Err(ClientError::Transport("SERVFAIL".to_string()));
        }
        Ok(self.records.clone())
    }
}
