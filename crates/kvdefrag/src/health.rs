//! Concurrent endpoint health probing.
//!
//! Every endpoint is probed by its own task. A probe reads a key (a
//! permission error still proves the member answers), then lists active
//! alarms. `NOSPACE` alone keeps the endpoint healthy so defragmentation can
//! relieve it; any other alarm marks it unhealthy.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::service::{with_timeout, AlarmKind, ClusterService};

/// Key read by the probe. Its value is irrelevant.
pub const PROBE_KEY: &str = "health";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointHealth {
    pub endpoint: String,
    pub healthy: bool,
    pub took: Duration,
    pub error: Option<String>,
    /// Alarm kinds reported while probing this endpoint.
    pub alarms: Vec<AlarmKind>,
}

impl EndpointHealth {
    fn unhealthy(endpoint: &str, took: Duration, error: String) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            healthy: false,
            took,
            error: Some(error),
            alarms: Vec::new(),
        }
    }

    pub fn has_nospace_alarm(&self) -> bool {
        self.alarms.contains(&AlarmKind::NoSpace)
    }
}

impl fmt::Display for EndpointHealth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "endpoint: {}, health: {}, took: {:?}, error: {}",
            self.endpoint,
            self.healthy,
            self.took,
            self.error.as_deref().unwrap_or_default()
        )
    }
}

/// Outcome of probing every endpoint; order follows the input.
#[derive(Debug, Clone, Default)]
pub struct HealthReport {
    pub records: Vec<EndpointHealth>,
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        self.records.iter().all(|r| r.healthy)
    }

    pub fn unhealthy_count(&self) -> usize {
        self.records.iter().filter(|r| !r.healthy).count()
    }

    /// True when any probe observed a capacity alarm.
    pub fn saw_nospace_alarm(&self) -> bool {
        self.records.iter().any(EndpointHealth::has_nospace_alarm)
    }
}

/// Probe one endpoint. Never fails; errors are folded into the record.
pub async fn probe(cluster: &dyn ClusterService, endpoint: &str, timeout: Duration) -> EndpointHealth {
    let start = Instant::now();
    let read = with_timeout("health read", timeout, cluster.read_key(endpoint, PROBE_KEY)).await;
    let took = start.elapsed();

    if let Err(e) = read {
        if !e.is_permission_denied() {
            return EndpointHealth::unhealthy(endpoint, took, e.to_string());
        }
        debug!("health read on {} denied, member is reachable", endpoint);
    }

    let scope = [endpoint.to_string()];
    let alarms = match with_timeout("alarm list", timeout, cluster.list_alarms(&scope)).await {
        Ok(alarms) => alarms,
        Err(e) => {
            return EndpointHealth::unhealthy(
                endpoint,
                took,
                format!("Unable to fetch the alarm list: {}", e),
            )
        }
    };

    let kinds: Vec<AlarmKind> = alarms.iter().map(|a| a.kind).collect();
    let healthy = kinds.iter().all(|k| *k == AlarmKind::NoSpace);
    let error = if kinds.is_empty() {
        None
    } else {
        let names: Vec<&str> = kinds.iter().map(AlarmKind::as_str).collect();
        Some(format!("Active Alarm(s): {}", names.join(" ")))
    };

    EndpointHealth {
        endpoint: endpoint.to_string(),
        healthy,
        took,
        error,
        alarms: kinds,
    }
}

/// Probe all endpoints concurrently, one task per endpoint. Each task owns
/// its result slot, so nothing is shared between probes.
pub async fn probe_all(
    cluster: Arc<dyn ClusterService>,
    endpoints: &[String],
    timeout: Duration,
) -> HealthReport {
    let handles: Vec<_> = endpoints
        .iter()
        .map(|ep| {
            let cluster = Arc::clone(&cluster);
            let ep = ep.clone();
            tokio::spawn(async move { probe(cluster.as_ref(), &ep, timeout).await })
        })
        .collect();

    let mut records = Vec::with_capacity(endpoints.len());
    for (ep, handle) in endpoints.iter().zip(handles) {
        let record = match handle.await {
            Ok(record) => record,
            Err(e) => EndpointHealth::unhealthy(ep, Duration::ZERO, format!("probe task failed: {}", e)),
        };
        records.push(record);
    }

    HealthReport { records }
}
