//! Sequential per-endpoint status collection.

use std::time::Duration;

use tracing::info;

use crate::error::{DefragError, Result};
use crate::service::{with_timeout, ClusterService, EndpointStatus};

/// Fetch the status of a single endpoint under `timeout`.
pub async fn fetch_status(
    cluster: &dyn ClusterService,
    endpoint: &str,
    timeout: Duration,
) -> Result<EndpointStatus> {
    with_timeout("status", timeout, cluster.status(endpoint))
        .await
        .map_err(|source| DefragError::StatusFetch {
            endpoint: endpoint.to_string(),
            source,
        })
}

/// Collect one status record per endpoint, in input order.
///
/// The first failure aborts the collection: a partial status set cannot be
/// ordered or evaluated safely.
pub async fn collect_status(
    cluster: &dyn ClusterService,
    endpoints: &[String],
    timeout: Duration,
) -> Result<Vec<EndpointStatus>> {
    let mut statuses = Vec::with_capacity(endpoints.len());
    for ep in endpoints {
        let status = fetch_status(cluster, ep, timeout).await?;
        info!("{}", status);
        statuses.push(status);
    }
    Ok(statuses)
}

/// Highest revision across `statuses`, if any.
pub fn max_revision(statuses: &[EndpointStatus]) -> Option<i64> {
    statuses.iter().map(|s| s.revision).max()
}
